//! Profiles and other pre-existing objects available on the remote controller

use std::collections::{BTreeMap, HashMap};
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ProfileKind {
    ApplicationProfile,
    NetworkProfile,
    AnalyticsProfile,
    WafPolicy,
    ErrorPageProfile,
    SslProfile,
    PersistenceProfile,
    PkiProfile,
    HealthMonitor,
    DataScript,
    HttpPolicySet,
    SslKeyCert,
}

impl ProfileKind {
    pub const ALL: [ProfileKind; 12] = [
        ProfileKind::ApplicationProfile,
        ProfileKind::NetworkProfile,
        ProfileKind::AnalyticsProfile,
        ProfileKind::WafPolicy,
        ProfileKind::ErrorPageProfile,
        ProfileKind::SslProfile,
        ProfileKind::PersistenceProfile,
        ProfileKind::PkiProfile,
        ProfileKind::HealthMonitor,
        ProfileKind::DataScript,
        ProfileKind::HttpPolicySet,
        ProfileKind::SslKeyCert,
    ];

    pub fn api_path(&self) -> &'static str {
        match self {
            ProfileKind::ApplicationProfile => "applicationprofile",
            ProfileKind::NetworkProfile => "networkprofile",
            ProfileKind::AnalyticsProfile => "analyticsprofile",
            ProfileKind::WafPolicy => "wafpolicy",
            ProfileKind::ErrorPageProfile => "errorpageprofile",
            ProfileKind::SslProfile => "sslprofile",
            ProfileKind::PersistenceProfile => "applicationpersistenceprofile",
            ProfileKind::PkiProfile => "pkiprofile",
            ProfileKind::HealthMonitor => "healthmonitor",
            ProfileKind::DataScript => "vsdatascriptset",
            ProfileKind::HttpPolicySet => "httppolicyset",
            ProfileKind::SslKeyCert => "sslkeyandcertificate",
        }
    }

    /// Name used in rejection messages
    pub fn label(&self) -> &'static str {
        match self {
            ProfileKind::ApplicationProfile => "applicationProfile",
            ProfileKind::NetworkProfile => "networkProfile",
            ProfileKind::AnalyticsProfile => "analyticsProfile",
            ProfileKind::WafPolicy => "wafPolicy",
            ProfileKind::ErrorPageProfile => "errorPageProfile",
            ProfileKind::SslProfile => "sslProfile",
            ProfileKind::PersistenceProfile => "applicationPersistenceProfile",
            ProfileKind::PkiProfile => "pkiProfile",
            ProfileKind::HealthMonitor => "healthMonitor",
            ProfileKind::DataScript => "datascript",
            ProfileKind::HttpPolicySet => "httpPolicySet",
            ProfileKind::SslKeyCert => "sslKeyCertificate",
        }
    }
}

impl fmt::Display for ProfileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Application profile type that terminates TLS for L4 listeners
pub const APP_PROFILE_L4_SSL: &str = "APPLICATION_PROFILE_TYPE_SSL";
/// Network profile type compatible with TLS listeners
pub const NETWORK_PROFILE_TCP_PROXY: &str = "PROTOCOL_TYPE_TCP_PROXY";

/// Names and types of objects present on the controller
#[derive(Clone, Debug, Default)]
pub struct ProfileCatalog {
    loaded: bool,
    entries: HashMap<ProfileKind, BTreeMap<String, Option<String>>>,
}

impl ProfileCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the entries of one kind and mark the catalog loaded
    pub fn set_kind(&mut self, kind: ProfileKind, entries: impl IntoIterator<Item = (String, Option<String>)>) {
        self.entries.insert(kind, entries.into_iter().collect());
        self.loaded = true;
    }

    pub fn insert(&mut self, kind: ProfileKind, name: impl Into<String>, profile_type: Option<&str>) {
        self.entries
            .entry(kind)
            .or_default()
            .insert(name.into(), profile_type.map(str::to_string));
        self.loaded = true;
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Unknown when the catalog was never loaded
    pub fn contains(&self, kind: ProfileKind, name: &str) -> bool {
        !self.loaded
            || self
                .entries
                .get(&kind)
                .map(|e| e.contains_key(name))
                .unwrap_or(false)
    }

    pub fn profile_type(&self, kind: ProfileKind, name: &str) -> Option<&str> {
        self.entries.get(&kind)?.get(name)?.as_deref()
    }

    /// Check a reference, producing the stable rejection message
    pub fn require(&self, kind: ProfileKind, name: &str) -> Result<(), String> {
        if self.contains(kind, name) {
            Ok(())
        } else {
            Err(format!("{} {} not found", kind.label(), name))
        }
    }
}
