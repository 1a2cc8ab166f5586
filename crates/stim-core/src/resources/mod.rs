//! Shared registry of declared resources and their download state.

use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use stim_model::{ResourceName, ResourceRecord, ResourceSpec, ResourceStatus};
use tracing::trace;

/// Answer of [`ResourceRegistry::poll`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// At least one resource is still downloading (or a manifest is still expected).
    Pending { waiting: Vec<ResourceName> },
    /// Every requested resource reached an outcome.
    Ready {
        /// Resources whose download failed.
        failed: Vec<ResourceName>,
        /// Requested names that were never declared.
        missing: Vec<ResourceName>,
    },
}

/// In-memory resource state, shared between the download pipeline and the flow.
///
/// Every update happens under a single write lock, so readers never observe a record
/// whose status and payload disagree.
#[derive(Clone, Default)]
pub struct ResourceRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

#[derive(Default)]
struct RegistryInner {
    records: HashMap<ResourceName, ResourceRecord>,
    /// Registration order.
    order: Vec<ResourceName>,
    payloads: HashMap<ResourceName, Arc<[u8]>>,
    /// A server manifest was requested and has not been applied yet.
    manifest_pending: bool,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Declare a resource. Returns `false` if the name was already registered.
    pub fn register(&self, spec: &ResourceSpec) -> bool {
        let mut inner = self.write();
        if inner.records.contains_key(&spec.name) {
            return false;
        }
        inner
            .records
            .insert(spec.name.clone(), ResourceRecord::registered(spec));
        inner.order.push(spec.name.clone());
        trace!(resource = %spec.name, path = %spec.path, "resource registered");
        true
    }

    /// Update the status of a resource; unknown names are ignored.
    pub fn update_status(&self, name: &str, status: ResourceStatus, error: Option<String>) {
        let mut inner = self.write();
        if let Some(record) = inner.records.get_mut(name) {
            record.status = status;
            record.error = error;
        }
    }

    /// Store the payload and mark the resource downloaded in one step.
    pub fn complete(&self, name: &str, payload: Vec<u8>) {
        let mut inner = self.write();
        let Some(record) = inner.records.get_mut(name) else {
            return;
        };
        record.status = ResourceStatus::Downloaded;
        record.error = None;
        inner.payloads.insert(name.to_string(), Arc::from(payload));
    }

    pub fn fail(&self, name: &str, reason: impl Into<String>) {
        self.update_status(name, ResourceStatus::Error, Some(reason.into()));
    }

    pub fn get(&self, name: &str) -> Option<ResourceRecord> {
        self.read().records.get(name).cloned()
    }

    /// Downloaded bytes of a resource.
    pub fn payload(&self, name: &str) -> Option<Arc<[u8]>> {
        self.read().payloads.get(name).cloned()
    }

    /// All records in registration order.
    pub fn list_all(&self) -> Vec<ResourceRecord> {
        let inner = self.read();
        inner
            .order
            .iter()
            .filter_map(|name| inner.records.get(name).cloned())
            .collect()
    }

    pub fn list_by_status(&self, status: ResourceStatus) -> Vec<ResourceRecord> {
        self.list_all()
            .into_iter()
            .filter(|record| record.status == status)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().records.is_empty()
    }

    pub fn set_manifest_pending(&self, pending: bool) {
        self.write().manifest_pending = pending;
    }

    pub fn manifest_pending(&self) -> bool {
        self.read().manifest_pending
    }

    /// Check whether the named resources reached an outcome.
    ///
    /// An empty `names` slice means every registered resource. Names that are not
    /// registered count as pending while a manifest is expected and as missing otherwise.
    /// The answer is computed from a single consistent snapshot.
    pub fn poll(&self, names: &[ResourceName]) -> Readiness {
        let inner = self.read();

        let requested: Vec<&ResourceName> = if names.is_empty() {
            if inner.manifest_pending {
                return Readiness::Pending { waiting: vec![] };
            }
            inner.order.iter().collect()
        } else {
            names.iter().collect()
        };

        let mut waiting = Vec::new();
        let mut failed = Vec::new();
        let mut missing = Vec::new();

        for name in requested {
            match inner.records.get(name) {
                Some(record) if record.status.is_pending() => waiting.push(name.clone()),
                Some(record) if record.status == ResourceStatus::Error => {
                    failed.push(name.clone())
                }
                Some(_) => {}
                None if inner.manifest_pending => waiting.push(name.clone()),
                None => missing.push(name.clone()),
            }
        }

        if waiting.is_empty() {
            Readiness::Ready { failed, missing }
        } else {
            Readiness::Pending { waiting }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<ResourceName> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn registry_with(list: &[&str]) -> ResourceRegistry {
        let registry = ResourceRegistry::new();
        for name in list {
            registry.register(&ResourceSpec::new(*name, format!("stimuli/{name}")));
        }
        registry
    }

    #[test]
    fn register_is_idempotent() {
        let registry = ResourceRegistry::new();
        let spec = ResourceSpec::new("a.png", "a.png");
        assert!(registry.register(&spec));
        assert!(!registry.register(&spec));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn list_all_keeps_registration_order() {
        let registry = registry_with(&["c", "a", "b"]);
        let order: Vec<String> = registry.list_all().into_iter().map(|r| r.name).collect();
        assert_eq!(order, names(&["c", "a", "b"]));
    }

    #[test]
    fn complete_sets_status_and_payload_together() {
        let registry = registry_with(&["a"]);
        registry.complete("a", vec![1, 2, 3]);

        let record = registry.get("a").unwrap();
        assert_eq!(record.status, ResourceStatus::Downloaded);
        assert_eq!(registry.payload("a").as_deref(), Some(&[1u8, 2, 3][..]));
    }

    #[test]
    fn poll_waits_for_pending_names() {
        let registry = registry_with(&["a", "b"]);
        registry.update_status("a", ResourceStatus::Downloading, None);
        assert_eq!(
            registry.poll(&names(&["a", "b"])),
            Readiness::Pending {
                waiting: names(&["a", "b"])
            }
        );

        registry.complete("a", vec![]);
        registry.fail("b", "404");
        assert_eq!(
            registry.poll(&names(&["a", "b"])),
            Readiness::Ready {
                failed: names(&["b"]),
                missing: vec![]
            }
        );
    }

    #[test]
    fn empty_names_cover_all_registered() {
        let registry = registry_with(&["a", "b"]);
        registry.complete("a", vec![]);
        assert!(matches!(registry.poll(&[]), Readiness::Pending { .. }));

        registry.complete("b", vec![]);
        assert!(matches!(registry.poll(&[]), Readiness::Ready { .. }));
    }

    #[test]
    fn empty_registry_is_ready() {
        let registry = ResourceRegistry::new();
        assert_eq!(
            registry.poll(&[]),
            Readiness::Ready {
                failed: vec![],
                missing: vec![]
            }
        );
    }

    #[test]
    fn pending_manifest_holds_unknown_names() {
        let registry = ResourceRegistry::new();
        registry.set_manifest_pending(true);
        assert!(matches!(registry.poll(&[]), Readiness::Pending { .. }));
        assert!(matches!(
            registry.poll(&names(&["later"])),
            Readiness::Pending { .. }
        ));

        registry.set_manifest_pending(false);
        assert_eq!(
            registry.poll(&names(&["later"])),
            Readiness::Ready {
                failed: vec![],
                missing: names(&["later"])
            }
        );
    }
}
