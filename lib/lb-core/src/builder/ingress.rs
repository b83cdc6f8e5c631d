use crate::config::Settings;
use crate::event::NamespacedName;
use k8s_openapi::api::networking::v1::{Ingress, ServiceBackendPort};

/// Port of a Service referenced by number or by name
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum PortSelector {
    Number(u16),
    Name(String),
}

impl PortSelector {
    fn from_backend(port: Option<&ServiceBackendPort>) -> Option<Self> {
        let port = port?;
        if let Some(name) = port.name.as_ref().filter(|n| !n.is_empty()) {
            return Some(PortSelector::Name(name.clone()));
        }
        port.number
            .and_then(|n| u16::try_from(n).ok())
            .map(PortSelector::Number)
    }
}

/// One (host, path) pair of an ingress and the service behind it
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Route {
    pub ingress: NamespacedName,
    pub host: String,
    pub path: String,
    pub exact: bool,
    pub service: String,
    pub port: PortSelector,
}

impl Route {
    pub fn service_key(&self) -> NamespacedName {
        NamespacedName::new(self.ingress.namespace.clone(), self.service.clone())
    }
}

/// Host of a rule; host-less rules get `<ingress>.<namespace>.<suffix>`
pub(crate) fn rule_host(settings: &Settings, key: &NamespacedName, host: Option<&str>) -> Option<String> {
    match host.filter(|h| !h.is_empty()) {
        Some(host) => Some(host.to_ascii_lowercase()),
        None => settings
            .domain_suffix
            .as_deref()
            .map(|suffix| format!("{}.{}.{}", key.name, key.namespace, suffix.trim_start_matches('.'))),
    }
}

/// Every routable (host, path) of an ingress
pub(crate) fn routes(settings: &Settings, ingress: &Ingress) -> Vec<Route> {
    let key = NamespacedName::of(ingress);
    let Some(spec) = ingress.spec.as_ref() else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for rule in spec.rules.iter().flatten() {
        let Some(host) = rule_host(settings, &key, rule.host.as_deref()) else {
            continue;
        };
        let Some(http) = rule.http.as_ref() else { continue };
        for path in &http.paths {
            let Some(service) = path.backend.service.as_ref() else {
                continue;
            };
            let Some(port) = PortSelector::from_backend(service.port.as_ref()) else {
                continue;
            };
            let value = path.path.clone().filter(|p| !p.is_empty()).unwrap_or_else(|| "/".to_string());
            out.push(Route {
                ingress: key.clone(),
                host: host.clone(),
                path: value,
                exact: path.path_type == "Exact",
                service: service.name.clone(),
                port,
            });
        }
    }
    out
}

/// Hosts an ingress routes, in rule order without duplicates
pub(crate) fn hosts(settings: &Settings, ingress: &Ingress) -> Vec<String> {
    let mut hosts: Vec<String> = Vec::new();
    for route in routes(settings, ingress) {
        if !hosts.contains(&route.host) {
            hosts.push(route.host);
        }
    }
    hosts
}

/// Secret named by the ingress TLS section for a host
pub(crate) fn tls_secret(ingress: &Ingress, host: &str) -> Option<String> {
    ingress
        .spec
        .as_ref()?
        .tls
        .iter()
        .flatten()
        .find(|tls| {
            tls.hosts
                .iter()
                .flatten()
                .any(|h| h.eq_ignore_ascii_case(host))
        })
        .and_then(|tls| tls.secret_name.clone())
        .filter(|s| !s.is_empty())
}

pub(crate) fn references_service(ingress: &Ingress, service: &NamespacedName) -> bool {
    if ingress.metadata.namespace.as_deref().unwrap_or_default() != service.namespace {
        return false;
    }
    ingress
        .spec
        .iter()
        .flat_map(|s| s.rules.iter().flatten())
        .flat_map(|r| r.http.iter().flat_map(|h| h.paths.iter()))
        .filter_map(|p| p.backend.service.as_ref())
        .any(|s| s.name == service.name)
}

pub(crate) fn references_secret(ingress: &Ingress, secret: &NamespacedName) -> bool {
    if ingress.metadata.namespace.as_deref().unwrap_or_default() != secret.namespace {
        return false;
    }
    ingress
        .spec
        .iter()
        .flat_map(|s| s.tls.iter().flatten())
        .any(|t| t.secret_name.as_deref() == Some(secret.name.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::fixtures::*;

    #[test]
    fn test_routes_default_path_and_exact_type() {
        let settings = settings();
        let mut ingress = ingress("default", "ing", "Foo.com", &[("", "svc", 80), ("/api", "api", 8080)], None);
        if let Some(path) = ingress
            .spec
            .as_mut()
            .and_then(|s| s.rules.as_mut())
            .and_then(|r| r[0].http.as_mut())
            .map(|h| &mut h.paths[1])
        {
            path.path_type = "Exact".to_string();
        }

        let routes = routes(&settings, &ingress);
        assert_eq!(routes.len(), 2);
        assert_eq!(routes[0].host, "foo.com");
        assert_eq!(routes[0].path, "/");
        assert!(!routes[0].exact);
        assert_eq!(routes[1].port, PortSelector::Number(8080));
        assert!(routes[1].exact);
    }

    #[test]
    fn test_hostless_rule_uses_domain_suffix() {
        let mut settings = settings();
        let key = NamespacedName::new("red", "ing");
        settings.domain_suffix = None;
        assert_eq!(rule_host(&settings, &key, None), None);

        settings.domain_suffix = Some("avi.internal".to_string());
        assert_eq!(rule_host(&settings, &key, None).as_deref(), Some("ing.red.avi.internal"));
        assert_eq!(rule_host(&settings, &key, Some("")).as_deref(), Some("ing.red.avi.internal"));
    }

    #[test]
    fn test_tls_secret_lookup() {
        let ingress = ingress("default", "ing", "foo.com", &[("/", "svc", 80)], Some("foo-tls"));
        assert_eq!(tls_secret(&ingress, "foo.com").as_deref(), Some("foo-tls"));
        assert_eq!(tls_secret(&ingress, "bar.com"), None);
        assert!(references_secret(&ingress, &NamespacedName::new("default", "foo-tls")));
        assert!(!references_secret(&ingress, &NamespacedName::new("other", "foo-tls")));
    }
}
