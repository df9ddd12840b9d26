//! Target registry
//!
//! Canonical map from identity to live `Target`. The registry is embedded in
//! the service's locked core, so every call here already runs under the
//! service lock; taking a hold before that lock drops is what makes release
//! unable to race with destruction.

use super::Target;
use crate::error::StartError;
use crate::spec::TargetIdentity;
use crate::topology::Topology;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Default)]
pub struct TargetRegistry {
    targets: HashMap<TargetIdentity, Arc<Target>>,
}

impl TargetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up or lazily create the target for `identity`, taking one hold
    /// for the caller before returning.
    ///
    /// Identities that do not resolve against the topology produce
    /// `ObjectDoesNotExist` and create nothing.
    pub fn get_or_create(
        &mut self,
        identity: &TargetIdentity,
        topology: &dyn Topology,
    ) -> Result<Arc<Target>, StartError> {
        if let Some(target) = self.targets.get(identity) {
            target.add_hold();
            return Ok(Arc::clone(target));
        }

        let descriptor = topology
            .resolve(identity)
            .ok_or_else(|| StartError::ObjectDoesNotExist(identity.to_string()))?;

        let target = Target::new(descriptor);
        target.add_hold();
        self.targets.insert(identity.clone(), Arc::clone(&target));
        tracing::debug!(target = %identity, "target created");
        Ok(target)
    }

    /// Drop one hold. When the count reaches zero the target is dequeued
    /// here and destroyed by the caller outside the service lock (the
    /// returned `Arc` is the last one once every clone drops).
    pub fn release(&mut self, target: &Arc<Target>) -> bool {
        if target.drop_hold() == 0 {
            self.targets.remove(target.identity());
            tracing::debug!(target = %target.identity(), "target idle, destroyed");
            true
        } else {
            false
        }
    }

    pub fn get(&self, identity: &TargetIdentity) -> Option<Arc<Target>> {
        self.targets.get(identity).cloned()
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Target>> {
        self.targets.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::mock::MockTopology;

    #[test]
    fn test_lazy_create_and_reuse() {
        let topology = MockTopology::new().with_target(1, 10, 0x1000);
        let mut registry = TargetRegistry::new();
        let identity = TargetIdentity::Object { id: 1, namespace: 0 };

        let a = registry.get_or_create(&identity, &topology).unwrap();
        let b = registry.get_or_create(&identity, &topology).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.thread_count(), 2);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unresolvable_identity_creates_nothing() {
        let topology = MockTopology::new();
        let mut registry = TargetRegistry::new();
        let identity = TargetIdentity::Object { id: 9, namespace: 0 };

        assert!(matches!(
            registry.get_or_create(&identity, &topology),
            Err(StartError::ObjectDoesNotExist(_))
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_release_destroys_at_zero() {
        let topology = MockTopology::new().with_target(1, 10, 0x1000);
        let mut registry = TargetRegistry::new();
        let identity = TargetIdentity::Object { id: 1, namespace: 0 };

        let a = registry.get_or_create(&identity, &topology).unwrap();
        let b = registry.get_or_create(&identity, &topology).unwrap();

        assert!(!registry.release(&a));
        assert_eq!(registry.len(), 1);
        assert!(registry.release(&b));
        assert!(registry.is_empty());
    }
}
