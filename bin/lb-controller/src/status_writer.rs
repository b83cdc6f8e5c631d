//! Writes CRD, Ingress and Service status back to the cluster

use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client};
use lb_api::{AviInfraSetting, HTTPRule, HostRule, L4Rule};
use lb_core::{LoadBalancerEntry, NamespacedName, RuleKind, RuleRef, StatusUpdate};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt::Debug;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};

const FIELD_MANAGER: &str = "lb-controller";

/// Object whose status subresource is patched
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum StatusTarget {
    Rule(RuleRef),
    Ingress(NamespacedName),
    Service(NamespacedName),
}

fn load_balancer(entries: &[LoadBalancerEntry]) -> Value {
    let ingress: Vec<Value> = entries
        .iter()
        .map(|e| match &e.hostname {
            Some(hostname) => json!({ "ip": e.ip, "hostname": hostname }),
            None => json!({ "ip": e.ip }),
        })
        .collect();
    json!({ "status": { "loadBalancer": { "ingress": ingress } } })
}

/// Patch body for an update
pub fn render(update: &StatusUpdate) -> (StatusTarget, Value) {
    match update {
        StatusUpdate::Rule { rule, status } => (StatusTarget::Rule(rule.clone()), json!({ "status": status })),
        StatusUpdate::Ingress { ingress, entries } => (StatusTarget::Ingress(ingress.clone()), load_balancer(entries)),
        StatusUpdate::Service { service, entries } => (StatusTarget::Service(service.clone()), load_balancer(entries)),
    }
}

/// Last body written per object
#[derive(Debug, Default)]
pub struct Written {
    bodies: HashMap<StatusTarget, Value>,
}

impl Written {
    pub fn unchanged(&self, target: &StatusTarget, body: &Value) -> bool {
        self.bodies.get(target) == Some(body)
    }

    pub fn record(&mut self, target: StatusTarget, body: Value) {
        self.bodies.insert(target, body);
    }

    pub fn forget(&mut self, target: &StatusTarget) {
        self.bodies.remove(target);
    }
}

pub struct StatusWriter {
    client: Client,
    written: Written,
}

impl StatusWriter {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            written: Written::default(),
        }
    }

    pub async fn run(mut self, mut updates: UnboundedReceiver<StatusUpdate>) {
        info!("Status writer started");
        while let Some(update) = updates.recv().await {
            let (target, body) = render(&update);
            if self.written.unchanged(&target, &body) {
                debug!(?target, "Status unchanged, skipping patch");
                continue;
            }
            match self.patch(&target, &body).await {
                Ok(()) => {
                    debug!(?target, "Patched status");
                    self.written.record(target, body);
                }
                Err(e) => {
                    warn!(?target, error = %e, "Failed to patch status");
                    self.written.forget(&target);
                }
            }
        }
        info!("Status writer stopped");
    }

    async fn patch(&self, target: &StatusTarget, body: &Value) -> Result<(), kube::Error> {
        let client = self.client.clone();
        match target {
            StatusTarget::Rule(rule) => match rule.kind {
                RuleKind::HostRule => {
                    patch_status(Api::<HostRule>::namespaced(client, &rule.namespace), &rule.name, body).await
                }
                RuleKind::HttpRule => {
                    patch_status(Api::<HTTPRule>::namespaced(client, &rule.namespace), &rule.name, body).await
                }
                RuleKind::L4Rule => {
                    patch_status(Api::<L4Rule>::namespaced(client, &rule.namespace), &rule.name, body).await
                }
                RuleKind::InfraSetting => patch_status(Api::<AviInfraSetting>::all(client), &rule.name, body).await,
            },
            StatusTarget::Ingress(name) => {
                patch_status(Api::<Ingress>::namespaced(client, &name.namespace), &name.name, body).await
            }
            StatusTarget::Service(name) => {
                patch_status(Api::<Service>::namespaced(client, &name.namespace), &name.name, body).await
            }
        }
    }
}

async fn patch_status<K>(api: Api<K>, name: &str, body: &Value) -> Result<(), kube::Error>
where
    K: Clone + DeserializeOwned + Debug,
{
    match api
        .patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(body))
        .await
    {
        Ok(_) => Ok(()),
        // Deleted since the update was produced
        Err(kube::Error::Api(e)) if e.code == 404 => {
            debug!(name, "Object is gone, dropping status");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lb_api::CrdStatus;

    #[test]
    fn test_ingress_entries_carry_hostnames() {
        let update = StatusUpdate::Ingress {
            ingress: NamespacedName::new("default", "ing"),
            entries: vec![LoadBalancerEntry {
                ip: "10.250.0.1".to_string(),
                hostname: Some("foo.com".to_string()),
            }],
        };
        let (target, body) = render(&update);
        assert_eq!(target, StatusTarget::Ingress(NamespacedName::new("default", "ing")));
        assert_eq!(
            body,
            json!({ "status": { "loadBalancer": { "ingress": [{ "ip": "10.250.0.1", "hostname": "foo.com" }] } } })
        );
    }

    #[test]
    fn test_service_entries_and_empty_status() {
        let update = StatusUpdate::Service {
            service: NamespacedName::new("red", "svc"),
            entries: vec![LoadBalancerEntry {
                ip: "10.250.0.2".to_string(),
                hostname: None,
            }],
        };
        assert_eq!(render(&update).1["status"]["loadBalancer"]["ingress"], json!([{ "ip": "10.250.0.2" }]));

        let cleared = StatusUpdate::Service {
            service: NamespacedName::new("red", "svc"),
            entries: Vec::new(),
        };
        assert_eq!(render(&cleared).1["status"]["loadBalancer"]["ingress"], json!([]));
    }

    #[test]
    fn test_rule_status_and_dedup() {
        let rule = RuleRef::new(RuleKind::HostRule, "default", "hr");
        let update = StatusUpdate::Rule {
            rule: rule.clone(),
            status: CrdStatus::rejected("Aliases must be unique"),
        };
        let (target, body) = render(&update);
        assert_eq!(body, json!({ "status": { "status": "Rejected", "error": "Aliases must be unique" } }));

        let mut written = Written::default();
        assert!(!written.unchanged(&target, &body));
        written.record(target.clone(), body.clone());
        assert!(written.unchanged(&target, &body));
        assert!(!written.unchanged(&target, &json!({ "status": { "status": "Accepted", "error": "" } })));
        written.forget(&target);
        assert!(!written.unchanged(&target, &body));
        assert_eq!(target, StatusTarget::Rule(rule));
    }
}
