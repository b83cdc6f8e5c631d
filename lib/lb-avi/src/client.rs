//! REST access to the load-balancer controller

use crate::error::{Method, RestError, Result};
use async_trait::async_trait;
use lb_core::catalog::ProfileKind;
use lb_core::config::ControllerSettings;
use lb_core::ObjectKind;
use reqwest::{RequestBuilder, StatusCode};
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tracing::{debug, trace};

const PAGE_SIZE: u32 = 200;

/// Operations the reconciler and the cache need from the controller. Every
/// failure names the object it was about.
#[async_trait]
pub trait AviClient: Send + Sync {
    /// Every object of a kind visible to the tenant
    async fn list(&self, kind: ObjectKind, tenant: &str) -> std::result::Result<Vec<Value>, RestError>;

    /// Names and types of the pre-existing objects of a profile kind
    async fn list_profiles(
        &self,
        kind: ProfileKind,
        tenant: &str,
    ) -> std::result::Result<Vec<(String, Option<String>)>, RestError>;

    async fn get_by_name(
        &self,
        kind: ObjectKind,
        tenant: &str,
        name: &str,
    ) -> std::result::Result<Option<Value>, RestError>;

    /// POST; returns the stored object with its uuid
    async fn create(&self, kind: ObjectKind, tenant: &str, body: &Value) -> std::result::Result<Value, RestError>;

    /// PUT over the whole object
    async fn update(
        &self,
        kind: ObjectKind,
        tenant: &str,
        uuid: &str,
        body: &Value,
    ) -> std::result::Result<Value, RestError>;

    async fn delete(&self, kind: ObjectKind, tenant: &str, uuid: &str, name: &str) -> std::result::Result<(), RestError>;
}

/// Type of a profile as listed: `type` for most kinds, `profile.type` for
/// network profiles
pub fn profile_type(value: &Value) -> Option<String> {
    value
        .get("type")
        .or_else(|| value.pointer("/profile/type"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn object_name(body: &Value) -> String {
    body.get("name").and_then(Value::as_str).unwrap_or_default().to_string()
}

/// reqwest-backed client authenticating with basic auth
pub struct RestClient {
    http: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
    version: String,
}

impl RestClient {
    pub fn new(settings: &ControllerSettings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .danger_accept_invalid_certs(settings.insecure)
            .build()?;
        let host = settings.host.trim_end_matches('/');
        let base_url = if host.starts_with("http://") || host.starts_with("https://") {
            host.to_string()
        } else {
            format!("https://{host}")
        };
        Ok(Self {
            http,
            base_url,
            username: settings.username.clone(),
            password: settings.password.clone(),
            version: settings.version.clone(),
        })
    }

    fn request(&self, method: reqwest::Method, url: &str, tenant: &str) -> RequestBuilder {
        self.http
            .request(method, url)
            .basic_auth(&self.username, Some(&self.password))
            .header("X-Avi-Version", &self.version)
            .header("X-Avi-Tenant", tenant)
    }

    fn collection_url(&self, collection: &str) -> String {
        format!("{}/api/{}", self.base_url, collection)
    }

    async fn send(
        &self,
        request: RequestBuilder,
        method: Method,
        kind: impl fmt::Display,
        name: &str,
    ) -> std::result::Result<Option<Value>, RestError> {
        let kind = kind.to_string();
        let response = request
            .send()
            .await
            .map_err(|e| RestError::new(method, &kind, name, None, e.to_string()))?;
        let status = response.status();
        trace!(%method, %kind, name, status = status.as_u16(), "REST response");

        if status == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        let text = response
            .text()
            .await
            .map_err(|e| RestError::new(method, &kind, name, None, e.to_string()))?;
        if !status.is_success() {
            let message = serde_json::from_str::<Value>(&text)
                .ok()
                .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_string))
                .unwrap_or(text);
            return Err(RestError::new(method, &kind, name, Some(status.as_u16()), message));
        }
        if text.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| RestError::new(method, &kind, name, Some(status.as_u16()), format!("invalid response: {e}")))
    }

    /// Follow `next` links until the collection is exhausted
    async fn list_collection(
        &self,
        collection: &str,
        tenant: &str,
        filter: Option<&str>,
    ) -> std::result::Result<Vec<Value>, RestError> {
        let mut url = format!(
            "{}?include_name=true&page_size={}",
            self.collection_url(collection),
            PAGE_SIZE
        );
        if let Some(name) = filter {
            url.push_str(&format!("&name={name}"));
        }
        let mut out = Vec::new();
        loop {
            let request = self.request(reqwest::Method::GET, &url, tenant);
            let page = self
                .send(request, Method::Get, collection, filter.unwrap_or("*"))
                .await?
                .unwrap_or(Value::Null);
            if let Some(results) = page.get("results").and_then(Value::as_array) {
                out.extend(results.iter().cloned());
            }
            match page.get("next").and_then(Value::as_str) {
                Some(next) if !next.is_empty() => url = next.to_string(),
                _ => break,
            }
        }
        debug!(collection, tenant, count = out.len(), "Listed objects");
        Ok(out)
    }
}

#[async_trait]
impl AviClient for RestClient {
    async fn list(&self, kind: ObjectKind, tenant: &str) -> std::result::Result<Vec<Value>, RestError> {
        self.list_collection(kind.api_path(), tenant, None).await
    }

    async fn list_profiles(
        &self,
        kind: ProfileKind,
        tenant: &str,
    ) -> std::result::Result<Vec<(String, Option<String>)>, RestError> {
        let objects = self.list_collection(kind.api_path(), tenant, None).await?;
        Ok(objects
            .iter()
            .filter_map(|o| Some((o.get("name")?.as_str()?.to_string(), profile_type(o))))
            .collect())
    }

    async fn get_by_name(
        &self,
        kind: ObjectKind,
        tenant: &str,
        name: &str,
    ) -> std::result::Result<Option<Value>, RestError> {
        let objects = self.list_collection(kind.api_path(), tenant, Some(name)).await?;
        Ok(objects.into_iter().next())
    }

    async fn create(&self, kind: ObjectKind, tenant: &str, body: &Value) -> std::result::Result<Value, RestError> {
        let name = object_name(body);
        let request = self
            .request(reqwest::Method::POST, &self.collection_url(kind.api_path()), tenant)
            .json(body);
        let created = self.send(request, Method::Post, kind, &name).await?;
        created.ok_or_else(|| RestError::new(Method::Post, kind, name, None, "empty response"))
    }

    async fn update(
        &self,
        kind: ObjectKind,
        tenant: &str,
        uuid: &str,
        body: &Value,
    ) -> std::result::Result<Value, RestError> {
        let name = object_name(body);
        let url = format!("{}/{}", self.collection_url(kind.api_path()), uuid);
        let request = self.request(reqwest::Method::PUT, &url, tenant).json(body);
        let updated = self.send(request, Method::Put, kind, &name).await?;
        updated.ok_or_else(|| RestError::new(Method::Put, kind, name, None, "empty response"))
    }

    async fn delete(&self, kind: ObjectKind, tenant: &str, uuid: &str, name: &str) -> std::result::Result<(), RestError> {
        let url = format!("{}/{}", self.collection_url(kind.api_path()), uuid);
        let request = self.request(reqwest::Method::DELETE, &url, tenant);
        self.send(request, Method::Delete, kind, name).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_profile_type_locations() {
        assert_eq!(
            profile_type(&json!({ "name": "a", "type": "APPLICATION_PROFILE_TYPE_L4" })).as_deref(),
            Some("APPLICATION_PROFILE_TYPE_L4")
        );
        assert_eq!(
            profile_type(&json!({ "name": "n", "profile": { "type": "PROTOCOL_TYPE_TCP_PROXY" } })).as_deref(),
            Some("PROTOCOL_TYPE_TCP_PROXY")
        );
        assert_eq!(profile_type(&json!({ "name": "w" })), None);
    }

    #[test]
    fn test_base_url_defaults_to_https() {
        let settings = ControllerSettings {
            host: "10.1.1.1/".to_string(),
            ..Default::default()
        };
        let client = RestClient::new(&settings).unwrap();
        assert_eq!(client.collection_url("pool"), "https://10.1.1.1/api/pool");

        let settings = ControllerSettings {
            host: "http://ctrl.local:8080".to_string(),
            ..Default::default()
        };
        let client = RestClient::new(&settings).unwrap();
        assert_eq!(client.collection_url("vsvip"), "http://ctrl.local:8080/api/vsvip");
    }
}
