//! Key tagging and tier routing.
//!
//! Keys starting with the distributed tag (`ECM_` by default) live in the
//! shared remote store; every other key stays in the process-local tier.
//!
//! ```text
//! ECM_42.SESSION_ADDCUSTOMER_RESULT_guid_alice
//! └┬─┘└┬┘└──────────────┬─────────────────────┘
//!  tag scope          suffix
//! ```

/// Default tag marking a key as distributed.
pub const DEFAULT_DISTRIBUTED_TAG: &str = "ECM_";

/// Separator between the base scope id and the rest of the key.
pub const SCOPE_SEPARATOR: char = '.';

/// Pure key-naming rules shared by every node of one deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyNamespace {
    distributed_tag: String,
}

impl Default for KeyNamespace {
    fn default() -> Self {
        Self::new(DEFAULT_DISTRIBUTED_TAG)
    }
}

impl KeyNamespace {
    pub fn new(distributed_tag: impl Into<String>) -> Self {
        Self {
            distributed_tag: distributed_tag.into(),
        }
    }

    pub fn distributed_tag(&self) -> &str {
        &self.distributed_tag
    }

    /// True if the key is routed through the remote tier.
    pub fn is_distributed(&self, key: &str) -> bool {
        key.starts_with(&self.distributed_tag)
    }

    /// Canonical key for a lookup; prepends the tag when `force_distributed`
    /// is set and the key does not carry it yet.
    pub fn prefixed(&self, key: &str, force_distributed: bool) -> String {
        if force_distributed && !self.is_distributed(key) {
            format!("{}{}", self.distributed_tag, key)
        } else {
            key.to_string()
        }
    }

    /// Base scope id (tenant/company) of a key, or an empty string.
    ///
    /// Only feeds the advisory per-scope key index.
    pub fn base_scope<'a>(&self, key: &'a str) -> &'a str {
        match key.find(SCOPE_SEPARATOR) {
            Some(pos) => {
                let head = &key[..pos];
                head.strip_prefix(self.distributed_tag.as_str())
                    .unwrap_or(head)
            }
            None => "",
        }
    }

    /// Key of the session-style entries: `ECM_{scope}.SESSION_{category}_{key}_{portal}_{user}`.
    pub fn session_key(
        &self,
        base_scope_id: i64,
        category: &str,
        key: &str,
        portal_guid: &str,
        username: &str,
    ) -> String {
        format!(
            "{}{base_scope_id}{SCOPE_SEPARATOR}SESSION_{category}_{key}_{portal_guid}_{username}",
            self.distributed_tag
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_distributed() {
        let ns = KeyNamespace::default();
        assert!(ns.is_distributed("ECM_42.orders"));
        assert!(!ns.is_distributed("DNN_Portal_7"));
        assert!(!ns.is_distributed("ecm_42.orders"));
    }

    #[test]
    fn test_prefixed() {
        let ns = KeyNamespace::default();
        assert_eq!(ns.prefixed("42.orders", true), "ECM_42.orders");
        assert_eq!(ns.prefixed("ECM_42.orders", true), "ECM_42.orders");
        assert_eq!(ns.prefixed("42.orders", false), "42.orders");
    }

    #[test]
    fn test_base_scope() {
        let ns = KeyNamespace::default();
        assert_eq!(ns.base_scope("ECM_42.SESSION_X"), "42");
        assert_eq!(ns.base_scope("ECM_42"), "");
        assert_eq!(ns.base_scope("portal.settings"), "portal");
        assert_eq!(ns.base_scope("ECM_.x"), "");
    }

    #[test]
    fn test_session_key() {
        let ns = KeyNamespace::default();
        assert_eq!(
            ns.session_key(42, "ADDCUSTOMER", "RESULT", "guid", "alice"),
            "ECM_42.SESSION_ADDCUSTOMER_RESULT_guid_alice"
        );
    }

    #[test]
    fn test_custom_tag() {
        let ns = KeyNamespace::new("SHARED:");
        assert!(ns.is_distributed("SHARED:1.a"));
        assert_eq!(ns.base_scope("SHARED:1.a"), "1");
    }
}
