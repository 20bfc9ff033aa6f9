//! In-memory artifact store
//!
//! Tenant-partitioned map of deployed artifacts. The synchronizer is the
//! only writer; any number of query tasks read concurrently.
//!
//! Partitions live in a `DashMap` and each sits behind its own
//! `parking_lot::RwLock`. The outer map is held only long enough to clone
//! the partition handle, and no lock is ever held across I/O.

mod partition;

pub use partition::{PartitionDiff, ReplaceMode, TenantPartition};

use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::models::{Artifact, ArtifactKey};

/// Store faults
///
/// Absence is never an error; these mean an internal invariant broke.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Artifact {key} does not belong to tenant partition {partition}")]
    TenantMismatch { partition: String, key: ArtifactKey },

    #[error("Corrupted entry for {key} in tenant partition {tenant}")]
    Corrupted { tenant: String, key: ArtifactKey },

    #[error("Invalid artifact key: {0}")]
    InvalidKey(String),
}

type PartitionHandle = Arc<RwLock<TenantPartition>>;

/// Deployment state of one gateway node
#[derive(Debug, Default)]
pub struct ArtifactStore {
    partitions: DashMap<String, PartitionHandle>,
}

impl ArtifactStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn partition(&self, tenant: &str) -> Option<PartitionHandle> {
        self.partitions.get(tenant).map(|p| Arc::clone(p.value()))
    }

    fn partition_or_create(&self, tenant: &str) -> PartitionHandle {
        if let Some(existing) = self.partition(tenant) {
            return existing;
        }
        let handle = self
            .partitions
            .entry(tenant.to_string())
            .or_insert_with(|| {
                debug!("Creating partition for tenant {}", tenant);
                Arc::new(RwLock::new(TenantPartition::new(tenant)))
            });
        Arc::clone(handle.value())
    }

    /// Point lookup
    pub fn get(
        &self,
        tenant: &str,
        name: &str,
        version: &str,
    ) -> Result<Option<Arc<Artifact>>, StoreError> {
        self.get_key(&ArtifactKey::new(tenant, name, version))
    }

    pub fn get_key(&self, key: &ArtifactKey) -> Result<Option<Arc<Artifact>>, StoreError> {
        match self.partition(&key.tenant_domain) {
            Some(partition) => partition.read().get(key),
            None => Ok(None),
        }
    }

    pub fn contains(&self, key: &ArtifactKey) -> bool {
        matches!(self.get_key(key), Ok(Some(_)))
    }

    /// Sequences deployed for an API; empty when there are none
    pub fn list_sequences(
        &self,
        tenant: &str,
        name: &str,
        version: &str,
    ) -> Result<Vec<Arc<Artifact>>, StoreError> {
        match self.partition(tenant) {
            Some(partition) => partition.read().sequences_of(name, version),
            None => Ok(Vec::new()),
        }
    }

    /// Insert or overwrite, returning the previous value
    pub fn put(&self, artifact: Artifact) -> Result<Option<Arc<Artifact>>, StoreError> {
        validate_key(&artifact.key)?;
        let partition = self.partition_or_create(&artifact.key.tenant_domain);
        let previous = partition.write().put(Arc::new(artifact))?;
        Ok(previous)
    }

    /// Remove an entry, returning it if it existed
    pub fn remove(&self, key: &ArtifactKey) -> Option<Arc<Artifact>> {
        self.partition(&key.tenant_domain)
            .and_then(|p| p.write().remove(key, None))
    }

    /// Remove an entry and remember the undeploy version for replay checks
    pub fn remove_at(&self, key: &ArtifactKey, version: u64) -> Option<Arc<Artifact>> {
        let partition = self.partition_or_create(&key.tenant_domain);
        let removed = partition.write().remove(key, Some(version));
        removed
    }

    /// Version of the last deploy or undeploy applied to `key`
    pub fn recorded_version(&self, key: &ArtifactKey) -> Option<u64> {
        self.partition(&key.tenant_domain)
            .and_then(|p| p.read().recorded_version(key))
    }

    /// All artifacts for a tenant, ordered by key
    pub fn snapshot(&self, tenant: &str) -> Result<Vec<Arc<Artifact>>, StoreError> {
        match self.partition(tenant) {
            Some(partition) => partition.read().snapshot(),
            None => Ok(Vec::new()),
        }
    }

    /// Atomically replace a tenant's partition with authoritative state
    pub fn replace_partition(
        &self,
        tenant: &str,
        authoritative: Vec<Artifact>,
    ) -> Result<PartitionDiff, StoreError> {
        self.swap_partition(tenant, authoritative, ReplaceMode::Merge)
    }

    /// Replace a tenant's partition and take its versions from the
    /// authoritative state, even where they are lower than recorded
    pub fn rebase_partition(
        &self,
        tenant: &str,
        authoritative: Vec<Artifact>,
    ) -> Result<PartitionDiff, StoreError> {
        self.swap_partition(tenant, authoritative, ReplaceMode::Rebase)
    }

    fn swap_partition(
        &self,
        tenant: &str,
        authoritative: Vec<Artifact>,
        mode: ReplaceMode,
    ) -> Result<PartitionDiff, StoreError> {
        for artifact in &authoritative {
            validate_key(&artifact.key)?;
        }
        let partition = self.partition_or_create(tenant);
        let diff = partition.write().replace(authoritative, mode)?;
        info!(
            "Replaced partition {} ({:?}): {} removed, {} upserted, {} unchanged",
            tenant,
            mode,
            diff.removed.len(),
            diff.upserted.len(),
            diff.unchanged
        );
        Ok(diff)
    }

    /// Drop a tenant's partition, returning how many artifacts it held
    pub fn evict_tenant(&self, tenant: &str) -> usize {
        match self.partitions.remove(tenant) {
            Some((_, partition)) => {
                let count = partition.read().len();
                info!("Evicted partition for tenant {} ({} artifacts)", tenant, count);
                count
            }
            None => 0,
        }
    }

    /// Known tenants, sorted
    pub fn tenants(&self) -> Vec<String> {
        let mut tenants: Vec<String> = self.partitions.iter().map(|p| p.key().clone()).collect();
        tenants.sort();
        tenants
    }

    /// Number of artifacts for a tenant
    pub fn len(&self, tenant: &str) -> usize {
        self.partition(tenant).map(|p| p.read().len()).unwrap_or(0)
    }

    /// Total number of artifacts across tenants
    pub fn total(&self) -> usize {
        self.tenants().iter().map(|t| self.len(t)).sum()
    }
}

fn validate_key(key: &ArtifactKey) -> Result<(), StoreError> {
    if key.tenant_domain.is_empty() || key.name.is_empty() || key.version.is_empty() {
        return Err(StoreError::InvalidKey(key.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ApiRef, ArtifactKind};
    use std::thread;

    fn api(tenant: &str, name: &str, payload: &str, version: u64) -> Artifact {
        Artifact::new(ArtifactKey::new(tenant, name, "v1"), ArtifactKind::Api, payload, version)
    }

    fn sequence(tenant: &str, name: &str, api: &str, version: u64) -> Artifact {
        Artifact::new(
            ArtifactKey::new(tenant, name, "v1"),
            ArtifactKind::Sequence,
            format!("<sequence name=\"{name}\"/>"),
            version,
        )
        .with_api(ApiRef::new(api, "v1"))
    }

    #[test]
    fn test_put_get_remove() {
        let store = ArtifactStore::new();
        assert!(store.get("t1", "PetStore", "v1").unwrap().is_none());

        assert!(store.put(api("t1", "PetStore", "P1", 5)).unwrap().is_none());
        let found = store.get("t1", "PetStore", "v1").unwrap().unwrap();
        assert_eq!(found.payload, "P1");

        let previous = store.put(api("t1", "PetStore", "P2", 6)).unwrap().unwrap();
        assert_eq!(previous.payload, "P1");

        let removed = store.remove(&ArtifactKey::new("t1", "PetStore", "v1")).unwrap();
        assert_eq!(removed.payload, "P2");
        assert!(store.get("t1", "PetStore", "v1").unwrap().is_none());
    }

    #[test]
    fn test_tenant_isolation() {
        let store = ArtifactStore::new();
        store.put(api("t1", "PetStore", "P1", 1)).unwrap();

        assert!(store.get("t2", "PetStore", "v1").unwrap().is_none());
        assert!(store.snapshot("t2").unwrap().is_empty());
        assert_eq!(store.tenants(), vec!["t1".to_string()]);
    }

    #[test]
    fn test_list_sequences_empty_and_filtered() {
        let store = ArtifactStore::new();
        assert!(store.list_sequences("t1", "PetStore", "v1").unwrap().is_empty());

        store.put(api("t1", "PetStore", "P1", 1)).unwrap();
        assert!(store.list_sequences("t1", "PetStore", "v1").unwrap().is_empty());

        store.put(sequence("t1", "PetStore--Out", "PetStore", 2)).unwrap();
        store.put(sequence("t1", "PetStore--In", "PetStore", 3)).unwrap();
        store.put(sequence("t1", "Other--In", "Other", 4)).unwrap();

        let names: Vec<_> = store
            .list_sequences("t1", "PetStore", "v1")
            .unwrap()
            .iter()
            .map(|a| a.key.name.clone())
            .collect();
        assert_eq!(names, vec!["PetStore--In", "PetStore--Out"]);
    }

    #[test]
    fn test_invalid_key_rejected() {
        let store = ArtifactStore::new();
        let result = store.put(api("", "PetStore", "P1", 1));
        assert!(matches!(result, Err(StoreError::InvalidKey(_))));
    }

    #[test]
    fn test_evict_tenant() {
        let store = ArtifactStore::new();
        store.put(api("t1", "A", "a", 1)).unwrap();
        store.put(api("t1", "B", "b", 2)).unwrap();
        store.put(api("t2", "A", "a", 3)).unwrap();

        assert_eq!(store.evict_tenant("t1"), 2);
        assert_eq!(store.evict_tenant("t1"), 0);
        assert_eq!(store.tenants(), vec!["t2".to_string()]);
        assert_eq!(store.total(), 1);
    }

    #[test]
    fn test_replace_partition_is_atomic_for_readers() {
        let store = Arc::new(ArtifactStore::new());
        for i in 0..50 {
            store.put(api("t1", &format!("old-{i:02}"), "o", 1)).unwrap();
        }

        let reader = {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for _ in 0..200 {
                    let snapshot = store.snapshot("t1").unwrap();
                    let old = snapshot.iter().filter(|a| a.key.name.starts_with("old")).count();
                    let new = snapshot.iter().filter(|a| a.key.name.starts_with("new")).count();
                    assert!(
                        (old == 50 && new == 0) || (old == 0 && new == 50),
                        "observed mixed snapshot: {old} old, {new} new"
                    );
                }
            })
        };

        let authoritative = (0..50)
            .map(|i| api("t1", &format!("new-{i:02}"), "n", 2))
            .collect();
        store.replace_partition("t1", authoritative).unwrap();

        reader.join().unwrap();
        assert_eq!(store.len("t1"), 50);
    }

    #[test]
    fn test_rebase_partition_takes_authoritative_versions() {
        let store = ArtifactStore::new();
        let petstore = ArtifactKey::new("t1", "PetStore", "v1");
        let orders = ArtifactKey::new("t1", "Orders", "v1");
        store.put(api("t1", "PetStore", "P", 5)).unwrap();
        store.put(api("t1", "Orders", "O", 4)).unwrap();
        store.remove_at(&orders, 6);

        store
            .rebase_partition("t1", vec![api("t1", "PetStore", "P", 2)])
            .unwrap();

        assert_eq!(store.recorded_version(&petstore), Some(2));
        assert_eq!(store.recorded_version(&orders), None);
        assert_eq!(store.len("t1"), 1);
    }

    #[test]
    fn test_concurrent_reads_see_whole_values() {
        let store = Arc::new(ArtifactStore::new());
        store.put(api("t1", "PetStore", "payload-0", 0)).unwrap();

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for _ in 0..500 {
                        let artifact = store.get("t1", "PetStore", "v1").unwrap().unwrap();
                        assert_eq!(artifact.payload, format!("payload-{}", artifact.version));
                    }
                })
            })
            .collect();

        for v in 1..200u64 {
            store.put(api("t1", "PetStore", &format!("payload-{v}"), v)).unwrap();
        }

        for reader in readers {
            reader.join().unwrap();
        }
    }
}
