//! In-process controller used for dry runs and tests
//!
//! It behaves like the real controller where the sync engine cares: names
//! are unique per kind, references must resolve, referenced objects cannot be
//! deleted, and VIPs are allocated on VS-VIP creation.

use crate::client::{profile_type, AviClient};
use crate::error::{Method, RestError};
use crate::objects::parse_ref;
use async_trait::async_trait;
use lb_core::catalog::ProfileKind;
use lb_core::ObjectKind;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, VecDeque};
use tokio::sync::Mutex;
use uuid::Uuid;

const DEFAULT_VRF: &str = "global";

/// One recorded call
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Call {
    pub method: Method,
    pub kind: String,
    pub name: String,
}

/// A failure returned by the next matching call
#[derive(Clone, Debug)]
pub struct Fault {
    pub method: Option<Method>,
    pub kind: Option<ObjectKind>,
    pub status: Option<u16>,
    pub message: String,
}

impl Fault {
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self {
            method: None,
            kind: None,
            status: Some(status),
            message: message.into(),
        }
    }

    pub fn on(mut self, method: Method, kind: ObjectKind) -> Self {
        self.method = Some(method);
        self.kind = Some(kind);
        self
    }

    fn matches(&self, method: Method, kind: &str) -> bool {
        self.method.map(|m| m == method).unwrap_or(true)
            && self.kind.map(|k| k.api_path() == kind).unwrap_or(true)
    }
}

#[derive(Default)]
struct State {
    /// Objects by kind, then name
    objects: HashMap<ObjectKind, BTreeMap<String, Value>>,
    profiles: HashMap<ProfileKind, BTreeMap<String, Option<String>>>,
    calls: Vec<Call>,
    faults: VecDeque<Fault>,
    /// Kinds whose listing always fails
    broken_lists: Vec<ObjectKind>,
    next_vip: u32,
}

impl State {
    fn record(&mut self, method: Method, kind: &str, name: &str) -> Result<(), RestError> {
        self.calls.push(Call {
            method,
            kind: kind.to_string(),
            name: name.to_string(),
        });
        if let Some(idx) = self.faults.iter().position(|f| f.matches(method, kind)) {
            if let Some(fault) = self.faults.remove(idx) {
                return Err(RestError::new(method, kind, name, fault.status, fault.message));
            }
        }
        Ok(())
    }

    fn find_uuid(&self, kind: ObjectKind, uuid: &str) -> Option<String> {
        self.objects.get(&kind)?.iter().find_map(|(name, obj)| {
            (obj.get("uuid").and_then(Value::as_str) == Some(uuid)).then(|| name.clone())
        })
    }

    fn exists(&self, collection: &str, name: &str) -> bool {
        if let Some(kind) = ObjectKind::from_api_path(collection) {
            if self.objects.get(&kind).map(|o| o.contains_key(name)).unwrap_or(false) {
                return true;
            }
        }
        self.profiles
            .iter()
            .any(|(kind, names)| kind.api_path() == collection && names.contains_key(name))
    }

    /// Whether references into this collection are checked at all. VRFs are
    /// infrastructure and always assumed present.
    fn checks(&self, collection: &str) -> bool {
        let kind = ObjectKind::from_api_path(collection);
        (kind.is_some() && kind != Some(ObjectKind::VrfContext))
            || self
                .profiles
                .iter()
                .any(|(kind, names)| kind.api_path() == collection && !names.is_empty())
    }

    fn unresolved_ref(&self, body: &Value) -> Option<(String, String)> {
        let mut refs = Vec::new();
        collect_refs(body, &mut refs);
        refs.into_iter()
            .filter_map(|r| parse_ref(&r))
            .find(|(collection, name)| self.checks(collection) && !self.exists(collection, name))
    }

    /// First object, other than the target itself, referencing kind/name
    fn referrer(&self, kind: ObjectKind, name: &str) -> Option<String> {
        for (other_kind, objects) in &self.objects {
            for (other_name, obj) in objects {
                if *other_kind == kind && other_name == name {
                    continue;
                }
                let mut refs = Vec::new();
                collect_refs(obj, &mut refs);
                let hit = refs
                    .iter()
                    .filter_map(|r| parse_ref(r))
                    .any(|(collection, n)| collection == kind.api_path() && n == name);
                if hit {
                    return Some(format!("{other_kind} {other_name}"));
                }
            }
        }
        None
    }

    fn allocate_vips(&mut self, body: &mut Value, previous: Option<&Value>) {
        let Some(vips) = body.get_mut("vip").and_then(Value::as_array_mut) else {
            return;
        };
        for (i, vip) in vips.iter_mut().enumerate() {
            if vip.get("ip_address").is_some() {
                continue;
            }
            let kept = previous
                .and_then(|p| p.pointer(&format!("/vip/{i}/ip_address")))
                .cloned();
            let address = match kept {
                Some(address) => address,
                None => {
                    self.next_vip += 1;
                    let n = self.next_vip;
                    json!({ "addr": format!("10.250.{}.{}", n / 250, n % 250 + 1), "type": "V4" })
                }
            };
            vip["ip_address"] = address;
        }
    }
}

fn collect_refs(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for (field, v) in map {
                if field.ends_with("_ref") {
                    if let Some(r) = v.as_str() {
                        out.push(r.to_string());
                    }
                } else if field.ends_with("_refs") {
                    out.extend(v.as_array().into_iter().flatten().filter_map(Value::as_str).map(str::to_string));
                } else {
                    collect_refs(v, out);
                }
            }
        }
        Value::Array(items) => items.iter().for_each(|i| collect_refs(i, out)),
        _ => {}
    }
}

fn tenant_of(value: &Value) -> Option<String> {
    value
        .get("tenant_ref")
        .and_then(Value::as_str)
        .and_then(parse_ref)
        .map(|(_, name)| name)
}

fn name_of(body: &Value) -> String {
    body.get("name").and_then(Value::as_str).unwrap_or_default().to_string()
}

/// Controller state held in memory
pub struct InMemoryController {
    state: Mutex<State>,
}

impl InMemoryController {
    /// Stock profiles and the default VRF
    pub fn new() -> Self {
        let mut state = State::default();
        let stock: [(ProfileKind, &str, Option<&str>); 12] = [
            (ProfileKind::ApplicationProfile, "System-HTTP", Some("APPLICATION_PROFILE_TYPE_HTTP")),
            (ProfileKind::ApplicationProfile, "System-Secure-HTTP", Some("APPLICATION_PROFILE_TYPE_HTTP")),
            (ProfileKind::ApplicationProfile, "System-L4-Application", Some("APPLICATION_PROFILE_TYPE_L4")),
            (ProfileKind::ApplicationProfile, "System-SSL-Application", Some("APPLICATION_PROFILE_TYPE_SSL")),
            (ProfileKind::NetworkProfile, "System-TCP-Proxy", Some("PROTOCOL_TYPE_TCP_PROXY")),
            (ProfileKind::NetworkProfile, "System-UDP-Fast-Path", Some("PROTOCOL_TYPE_UDP_FAST_PATH")),
            (ProfileKind::NetworkProfile, "System-TCP-Fast-Path", Some("PROTOCOL_TYPE_TCP_FAST_PATH")),
            (ProfileKind::SslProfile, "System-Standard", None),
            (ProfileKind::PersistenceProfile, "System-Persistence-Client-IP", None),
            (ProfileKind::HealthMonitor, "System-TCP", None),
            (ProfileKind::AnalyticsProfile, "System-Analytics-Profile", None),
            (ProfileKind::PkiProfile, "System-PKI-Profile", None),
        ];
        for (kind, name, profile_type) in stock {
            state
                .profiles
                .entry(kind)
                .or_default()
                .insert(name.to_string(), profile_type.map(str::to_string));
        }
        let vrf = json!({
            "name": DEFAULT_VRF,
            "uuid": format!("vrfcontext-{}", Uuid::new_v4()),
            "tenant_ref": "/api/tenant?name=admin",
            "static_routes": [],
        });
        state
            .objects
            .entry(ObjectKind::VrfContext)
            .or_default()
            .insert(DEFAULT_VRF.to_string(), vrf);
        Self {
            state: Mutex::new(state),
        }
    }

    pub async fn add_profile(&self, kind: ProfileKind, name: &str, profile_type: Option<&str>) {
        self.state
            .lock()
            .await
            .profiles
            .entry(kind)
            .or_default()
            .insert(name.to_string(), profile_type.map(str::to_string));
    }

    /// Fail the next call matching the fault once
    pub async fn fail_next(&self, fault: Fault) {
        self.state.lock().await.faults.push_back(fault);
    }

    /// Make every listing of a kind fail until restored
    pub async fn break_list(&self, kind: ObjectKind, broken: bool) {
        let mut state = self.state.lock().await;
        state.broken_lists.retain(|k| *k != kind);
        if broken {
            state.broken_lists.push(kind);
        }
    }

    /// Store an object as if some other client had created it
    pub async fn insert(&self, kind: ObjectKind, mut body: Value) -> Value {
        let mut state = self.state.lock().await;
        body["uuid"] = json!(format!("{}-{}", kind.api_path(), Uuid::new_v4()));
        state.objects.entry(kind).or_default().insert(name_of(&body), body.clone());
        body
    }

    pub async fn object(&self, kind: ObjectKind, name: &str) -> Option<Value> {
        self.state.lock().await.objects.get(&kind)?.get(name).cloned()
    }

    /// Names of the stored objects of a kind
    pub async fn names(&self, kind: ObjectKind) -> Vec<String> {
        self.state
            .lock()
            .await
            .objects
            .get(&kind)
            .map(|o| o.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn calls(&self) -> Vec<Call> {
        self.state.lock().await.calls.clone()
    }

    /// Calls that changed something
    pub async fn write_count(&self) -> usize {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter(|c| c.method != Method::Get)
            .count()
    }

    pub async fn clear_calls(&self) {
        self.state.lock().await.calls.clear();
    }
}

impl Default for InMemoryController {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AviClient for InMemoryController {
    async fn list(&self, kind: ObjectKind, tenant: &str) -> Result<Vec<Value>, RestError> {
        let mut state = self.state.lock().await;
        state.record(Method::Get, kind.api_path(), "*")?;
        if state.broken_lists.contains(&kind) {
            return Err(RestError::new(Method::Get, kind, "*", Some(500), "internal error"));
        }
        Ok(state
            .objects
            .get(&kind)
            .map(|objects| {
                objects
                    .values()
                    .filter(|o| kind == ObjectKind::VrfContext || tenant_of(o).as_deref() == Some(tenant))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn list_profiles(&self, kind: ProfileKind, _tenant: &str) -> Result<Vec<(String, Option<String>)>, RestError> {
        let mut state = self.state.lock().await;
        state.record(Method::Get, kind.api_path(), "*")?;
        let mut out: Vec<(String, Option<String>)> = state
            .profiles
            .get(&kind)
            .map(|p| p.iter().map(|(n, t)| (n.clone(), t.clone())).collect())
            .unwrap_or_default();
        if let Some(object_kind) = ObjectKind::from_api_path(kind.api_path()) {
            if let Some(objects) = state.objects.get(&object_kind) {
                out.extend(objects.iter().map(|(n, o)| (n.clone(), profile_type(o))));
            }
        }
        Ok(out)
    }

    async fn get_by_name(&self, kind: ObjectKind, _tenant: &str, name: &str) -> Result<Option<Value>, RestError> {
        let mut state = self.state.lock().await;
        state.record(Method::Get, kind.api_path(), name)?;
        Ok(state.objects.get(&kind).and_then(|o| o.get(name)).cloned())
    }

    async fn create(&self, kind: ObjectKind, _tenant: &str, body: &Value) -> Result<Value, RestError> {
        let name = name_of(body);
        let mut state = self.state.lock().await;
        state.record(Method::Post, kind.api_path(), &name)?;
        if state.objects.get(&kind).map(|o| o.contains_key(&name)).unwrap_or(false) {
            return Err(RestError::new(Method::Post, kind, &name, Some(409), format!("{kind} {name} already exists")));
        }
        if let Some((collection, missing)) = state.unresolved_ref(body) {
            return Err(RestError::new(
                Method::Post,
                kind,
                &name,
                Some(400),
                format!("Cannot find object {collection} {missing}"),
            ));
        }
        let mut stored = body.clone();
        stored["uuid"] = json!(format!("{}-{}", kind.api_path(), Uuid::new_v4()));
        if kind == ObjectKind::VsVip {
            state.allocate_vips(&mut stored, None);
        }
        state.objects.entry(kind).or_default().insert(name, stored.clone());
        Ok(stored)
    }

    async fn update(&self, kind: ObjectKind, _tenant: &str, uuid: &str, body: &Value) -> Result<Value, RestError> {
        let name = name_of(body);
        let mut state = self.state.lock().await;
        state.record(Method::Put, kind.api_path(), &name)?;
        let Some(existing) = state.find_uuid(kind, uuid) else {
            return Err(RestError::new(Method::Put, kind, &name, Some(404), format!("{kind} {uuid} not found")));
        };
        if let Some((collection, missing)) = state.unresolved_ref(body) {
            return Err(RestError::new(
                Method::Put,
                kind,
                &name,
                Some(400),
                format!("Cannot find object {collection} {missing}"),
            ));
        }
        let previous = state.objects.get_mut(&kind).and_then(|o| o.remove(&existing));
        let mut stored = body.clone();
        stored["uuid"] = json!(uuid);
        if kind == ObjectKind::VsVip {
            state.allocate_vips(&mut stored, previous.as_ref());
        }
        state.objects.entry(kind).or_default().insert(name, stored.clone());
        Ok(stored)
    }

    async fn delete(&self, kind: ObjectKind, _tenant: &str, uuid: &str, name: &str) -> Result<(), RestError> {
        let mut state = self.state.lock().await;
        state.record(Method::Delete, kind.api_path(), name)?;
        let Some(existing) = state.find_uuid(kind, uuid) else {
            return Err(RestError::new(Method::Delete, kind, name, Some(404), format!("{kind} {uuid} not found")));
        };
        if let Some(referrer) = state.referrer(kind, &existing) {
            return Err(RestError::new(
                Method::Delete,
                kind,
                name,
                Some(409),
                format!("Cannot delete, object is referred by {referrer}"),
            ));
        }
        if let Some(objects) = state.objects.get_mut(&kind) {
            objects.remove(&existing);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(name: &str) -> Value {
        json!({ "name": name, "tenant_ref": "/api/tenant?name=admin", "created_by": "ako-cluster" })
    }

    #[tokio::test]
    async fn test_create_assigns_uuid_and_rejects_duplicates() {
        let ctrl = InMemoryController::new();
        let created = ctrl.create(ObjectKind::Pool, "admin", &pool("p1")).await.unwrap();
        assert!(created["uuid"].as_str().unwrap().starts_with("pool-"));

        let err = ctrl.create(ObjectKind::Pool, "admin", &pool("p1")).await.unwrap_err();
        assert_eq!(err.status, Some(409));
        assert_eq!(ctrl.list(ObjectKind::Pool, "admin").await.unwrap().len(), 1);
        assert!(ctrl.list(ObjectKind::Pool, "other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unresolved_references_are_rejected() {
        let ctrl = InMemoryController::new();
        let pg = json!({
            "name": "pg1",
            "tenant_ref": "/api/tenant?name=admin",
            "members": [{ "pool_ref": "/api/pool?name=missing" }],
        });
        let err = ctrl.create(ObjectKind::PoolGroup, "admin", &pg).await.unwrap_err();
        assert_eq!(err.status, Some(400));
        assert_eq!(err.message, "Cannot find object pool missing");

        let mut vs = pool("vs1");
        vs["application_profile_ref"] = json!("/api/applicationprofile?name=Nope");
        let err = ctrl.create(ObjectKind::VirtualService, "admin", &vs).await.unwrap_err();
        assert_eq!(err.message, "Cannot find object applicationprofile Nope");
    }

    #[tokio::test]
    async fn test_referenced_objects_cannot_be_deleted() {
        let ctrl = InMemoryController::new();
        let p = ctrl.create(ObjectKind::Pool, "admin", &pool("p1")).await.unwrap();
        let pg = json!({
            "name": "pg1",
            "tenant_ref": "/api/tenant?name=admin",
            "members": [{ "pool_ref": "/api/pool?name=p1" }],
        });
        let pg = ctrl.create(ObjectKind::PoolGroup, "admin", &pg).await.unwrap();

        let uuid = p["uuid"].as_str().unwrap();
        let err = ctrl.delete(ObjectKind::Pool, "admin", uuid, "p1").await.unwrap_err();
        assert_eq!(err.status, Some(409));

        ctrl.delete(ObjectKind::PoolGroup, "admin", pg["uuid"].as_str().unwrap(), "pg1").await.unwrap();
        ctrl.delete(ObjectKind::Pool, "admin", uuid, "p1").await.unwrap();
        let err = ctrl.delete(ObjectKind::Pool, "admin", uuid, "p1").await.unwrap_err();
        assert_eq!(err.status, Some(404));
    }

    #[tokio::test]
    async fn test_vip_survives_updates() {
        let ctrl = InMemoryController::new();
        let body = json!({
            "name": "vip1",
            "tenant_ref": "/api/tenant?name=admin",
            "vip": [{ "vip_id": "0", "auto_allocate_ip": true }],
        });
        let created = ctrl.create(ObjectKind::VsVip, "admin", &body).await.unwrap();
        let addr = created["vip"][0]["ip_address"]["addr"].clone();
        assert!(addr.is_string());

        let mut changed = body.clone();
        changed["dns_info"] = json!([{ "fqdn": "foo.com" }]);
        let updated = ctrl
            .update(ObjectKind::VsVip, "admin", created["uuid"].as_str().unwrap(), &changed)
            .await
            .unwrap();
        assert_eq!(updated["vip"][0]["ip_address"]["addr"], addr);
    }

    #[tokio::test]
    async fn test_fault_fires_once() {
        let ctrl = InMemoryController::new();
        ctrl.fail_next(Fault::status(503, "unavailable").on(Method::Post, ObjectKind::Pool)).await;

        let err = ctrl.create(ObjectKind::Pool, "admin", &pool("p1")).await.unwrap_err();
        assert_eq!(err.status, Some(503));
        assert!(ctrl.create(ObjectKind::Pool, "admin", &pool("p1")).await.is_ok());
        assert_eq!(ctrl.write_count().await, 2);
    }
}
