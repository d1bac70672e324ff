//! Registry mapping device identities to vendor profiles.

use std::sync::Arc;

use log::debug;
use regex::Regex;

use crate::device::VendorProfile;
use crate::error::ConnectError;

struct Entry {
    pattern: String,
    regex: Regex,
    profile: Arc<dyn VendorProfile>,
}

/// Ordered set of `(identity pattern, profile)` pairs.
///
/// Resolution walks the entries in registration order and returns the first
/// match, so overlapping patterns always resolve the same way.
#[derive(Default)]
pub struct ProfileRegistry {
    entries: Vec<Entry>,
}

impl ProfileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `profile` under `pattern`.
    ///
    /// Fails on an invalid regex or when the exact pattern text is already
    /// registered; the registry is left unchanged in both cases.
    pub fn register(
        &mut self,
        pattern: &str,
        profile: Arc<dyn VendorProfile>,
    ) -> Result<(), ConnectError> {
        if self.entries.iter().any(|e| e.pattern == pattern) {
            return Err(ConnectError::ProfileAlreadyRegistered(pattern.to_string()));
        }
        let regex = Regex::new(pattern)?;
        debug!("registered profile {} for {}", profile.name(), pattern);
        self.entries.push(Entry {
            pattern: pattern.to_string(),
            regex,
            profile,
        });
        Ok(())
    }

    /// Returns the first profile whose pattern matches `identity`.
    pub fn resolve(&self, identity: &str) -> Result<Arc<dyn VendorProfile>, ConnectError> {
        self.entries
            .iter()
            .find(|e| e.regex.is_match(identity))
            .map(|e| e.profile.clone())
            .ok_or_else(|| ConnectError::ProfileNotFound(identity.to_string()))
    }

    /// Patterns matching `identity`, in the order they are tried.
    pub fn overlaps(&self, identity: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| e.regex.is_match(identity))
            .map(|e| e.pattern.as_str())
            .collect()
    }

    /// Registered patterns in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.pattern.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceProfile;

    fn profile(name: &str) -> Arc<dyn VendorProfile> {
        Arc::new(DeviceProfile::new(name))
    }

    #[test]
    fn resolve_prefers_first_registered_pattern() {
        let mut registry = ProfileRegistry::new();
        registry
            .register(r"(?i)cisco\.asa\..*", profile("asa"))
            .expect("register asa");
        registry
            .register(r"(?i)cisco\..*", profile("generic"))
            .expect("register generic");

        for _ in 0..16 {
            let resolved = registry.resolve("Cisco.ASA.9.6").expect("resolve");
            assert_eq!(resolved.name(), "asa");
        }
        assert_eq!(registry.overlaps("cisco.asa.9.6").len(), 2);
        assert_eq!(registry.resolve("cisco.ios.15").expect("resolve").name(), "generic");
    }

    #[test]
    fn duplicate_pattern_is_rejected() {
        let mut registry = ProfileRegistry::new();
        registry.register("a\\..*", profile("a")).expect("first");
        let err = match registry.register("a\\..*", profile("b")) {
            Ok(_) => panic!("duplicate registration should fail"),
            Err(err) => err,
        };
        assert!(matches!(err, ConnectError::ProfileAlreadyRegistered(_)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn invalid_pattern_leaves_registry_unchanged() {
        let mut registry = ProfileRegistry::new();
        assert!(registry.register("(", profile("x")).is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn unknown_identity_is_not_found() {
        let registry = ProfileRegistry::new();
        let err = match registry.resolve("acme.box.1") {
            Ok(_) => panic!("empty registry should not resolve"),
            Err(err) => err,
        };
        assert!(matches!(err, ConnectError::ProfileNotFound(ref id) if id == "acme.box.1"));
    }
}
