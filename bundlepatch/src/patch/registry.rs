//! Registry of running orchestration instances.
//!
//! Each instance id may be driven by at most one orchestrator at a time.
//! Registration hands out a guard; dropping the guard frees the id.

use std::sync::Arc;
use std::time::Instant;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

use super::error::{PatchError, PatchResult};
use super::events::InstanceId;

/// Tracks which instance ids are in use.
///
/// Clones share the same table.
#[derive(Debug, Clone, Default)]
pub struct PatchRegistry {
    active: Arc<DashMap<InstanceId, Instant>>,
}

impl PatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `instance`.
    ///
    /// # Errors
    ///
    /// [`PatchError::InstanceInUse`] if another orchestrator holds the id.
    pub fn register(&self, instance: InstanceId) -> PatchResult<RegistrationGuard> {
        match self.active.entry(instance) {
            Entry::Occupied(_) => Err(PatchError::InstanceInUse(instance)),
            Entry::Vacant(slot) => {
                slot.insert(Instant::now());
                debug!(instance = %instance, "Instance registered");
                Ok(RegistrationGuard {
                    instance,
                    active: Arc::clone(&self.active),
                })
            }
        }
    }

    pub fn is_active(&self, instance: InstanceId) -> bool {
        self.active.contains_key(&instance)
    }

    /// Number of registered instances.
    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Registered ids in ascending order.
    pub fn instances(&self) -> Vec<InstanceId> {
        let mut ids: Vec<InstanceId> = self.active.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids
    }
}

/// Holds an instance id until dropped.
#[derive(Debug)]
pub struct RegistrationGuard {
    instance: InstanceId,
    active: Arc<DashMap<InstanceId, Instant>>,
}

impl RegistrationGuard {
    pub fn instance(&self) -> InstanceId {
        self.instance
    }
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        if let Some((_, since)) = self.active.remove(&self.instance) {
            debug!(
                instance = %self.instance,
                held_ms = since.elapsed().as_millis() as u64,
                "Instance released"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_registration_rejected() {
        let registry = PatchRegistry::new();
        let guard = registry.register(InstanceId::APP).unwrap();

        let err = registry.register(InstanceId::APP).unwrap_err();
        assert!(matches!(err, PatchError::InstanceInUse(id) if id == InstanceId::APP));

        // Other ids are independent.
        let _dlc = registry.register(InstanceId(7)).unwrap();
        assert_eq!(registry.instances(), vec![InstanceId::APP, InstanceId(7)]);
        drop(guard);
        assert!(!registry.is_active(InstanceId::APP));
    }

    #[test]
    fn test_drop_frees_id() {
        let registry = PatchRegistry::new();
        {
            let _guard = registry.register(InstanceId(3)).unwrap();
            assert!(registry.is_active(InstanceId(3)));
            assert_eq!(registry.len(), 1);
        }
        assert!(registry.is_empty());
        assert!(registry.register(InstanceId(3)).is_ok());
    }

    #[test]
    fn test_clones_share_table() {
        let registry = PatchRegistry::new();
        let other = registry.clone();
        let _guard = registry.register(InstanceId(1)).unwrap();
        assert!(other.register(InstanceId(1)).is_err());
    }
}
