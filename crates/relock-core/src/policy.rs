use std::sync::Arc;

use tracing::debug;

use crate::error::Result;
use crate::platform::CapabilityProbe;
use crate::preferences::PreferenceStore;

pub const KEY_LOCK_ENABLED: &str = "biometric_lock_enabled";

/// The persisted "lock enabled" bit.
///
/// `enabled` can only be stored as `true` while the capability probe reports
/// strong authentication as available.
pub struct LockPolicyStore {
    prefs: Arc<dyn PreferenceStore>,
    capability: Arc<dyn CapabilityProbe>,
}

impl LockPolicyStore {
    pub fn new(prefs: Arc<dyn PreferenceStore>, capability: Arc<dyn CapabilityProbe>) -> Self {
        Self { prefs, capability }
    }

    pub fn is_enabled(&self) -> bool {
        self.prefs.get_bool(KEY_LOCK_ENABLED, false)
    }

    /// Persists `want && capability available` and returns that value.
    pub fn set_enabled(&self, want: bool) -> Result<bool> {
        let effective = want && self.capability.available();
        if want && !effective {
            debug!("lock requested without strong authentication; storing disabled");
        }
        self.prefs.put_bool(KEY_LOCK_ENABLED, effective)?;
        Ok(effective)
    }

    pub fn should_offer_toggle(&self) -> bool {
        self.capability.available()
    }

    pub(crate) fn capability_available(&self) -> bool {
        self.capability.available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preferences::MemoryPreferences;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Probe(AtomicBool);

    impl CapabilityProbe for Probe {
        fn available(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    fn store(available: bool) -> (LockPolicyStore, Arc<Probe>) {
        let probe = Arc::new(Probe(AtomicBool::new(available)));
        let store = LockPolicyStore::new(Arc::new(MemoryPreferences::new()), probe.clone());
        (store, probe)
    }

    #[test]
    fn defaults_to_disabled() {
        let (store, _) = store(true);
        assert!(!store.is_enabled());
    }

    #[test]
    fn enable_requires_capability() {
        let (store, probe) = store(false);
        assert!(!store.set_enabled(true).unwrap());
        assert!(!store.is_enabled());
        assert!(!store.should_offer_toggle());

        probe.0.store(true, Ordering::SeqCst);
        assert!(store.set_enabled(true).unwrap());
        assert!(store.is_enabled());
        assert!(store.should_offer_toggle());
    }

    #[test]
    fn set_enabled_is_idempotent() {
        let (store, _) = store(true);
        assert!(store.set_enabled(true).unwrap());
        assert!(store.set_enabled(true).unwrap());
        assert!(store.is_enabled());
        assert!(!store.set_enabled(false).unwrap());
        assert!(!store.set_enabled(false).unwrap());
        assert!(!store.is_enabled());
    }
}
