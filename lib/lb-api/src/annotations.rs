//! Well-known annotation keys read from Services, Nodes and IngressClasses

/// Services carrying the same value in one namespace share a single VIP
pub const SHARED_VIP: &str = "ako.vmware.com/enable-shared-vip";

/// Use endpoint addresses as pool servers even in NodePort mode
pub const SKIP_NODE_PORT: &str = "skipnodeport.ako.vmware.com/enabled";

/// Name of the L4Rule (same namespace) applied to a LoadBalancer Service
pub const L4_RULE: &str = "ako.vmware.com/l4rule";

/// Name of the AviInfraSetting applied to a LoadBalancer Service
pub const INFRA_SETTING: &str = "aviinfrasetting.ako.vmware.com/name";

/// Comma separated pod CIDRs overriding the Node spec
pub const POD_CIDRS: &str = "ako.vmware.com/pod-cidrs";

/// IngressClass parameters kind selecting an AviInfraSetting
pub const INFRA_SETTING_KIND: &str = "AviInfraSetting";

/// Returns true when an annotation is present with a truthy value
pub fn is_enabled(annotations: Option<&std::collections::BTreeMap<String, String>>, key: &str) -> bool {
    annotations
        .and_then(|a| a.get(key))
        .map(|v| v.trim().eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Parse a comma separated annotation value, trimming each entry and dropping empties
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_split_list_trims_entries() {
        assert_eq!(
            split_list(" 10.1.0.0/24 ,10.2.0.0/24,, "),
            vec!["10.1.0.0/24".to_string(), "10.2.0.0/24".to_string()]
        );
        assert!(split_list("").is_empty());
    }

    #[test]
    fn test_is_enabled() {
        let mut annotations = BTreeMap::new();
        annotations.insert(SKIP_NODE_PORT.to_string(), "True".to_string());
        assert!(is_enabled(Some(&annotations), SKIP_NODE_PORT));
        assert!(!is_enabled(Some(&annotations), SHARED_VIP));
        assert!(!is_enabled(None, SKIP_NODE_PORT));
    }
}
