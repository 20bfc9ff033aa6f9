//! Tenant partition
//!
//! Holds every artifact deployed for one tenant, plus the version at which
//! each removed key was undeployed.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::models::{Artifact, ArtifactKey};

use super::StoreError;

/// Changes applied by a partition replacement
#[derive(Clone, Debug, Default)]
pub struct PartitionDiff {
    /// Entries that were present but absent from the authoritative state
    pub removed: Vec<Arc<Artifact>>,

    /// Entries added or whose content changed
    pub upserted: Vec<Arc<Artifact>>,

    /// Keys whose content already matched
    pub unchanged: usize,
}

/// How a replacement treats recorded versions
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplaceMode {
    /// Keep the versions already recorded for unchanged keys and tombstone
    /// removed ones
    Merge,

    /// Take every version from the authoritative state and forget
    /// tombstones, so versions may move backwards after a feed rollback
    Rebase,
}

/// Artifacts for a single tenant
#[derive(Debug)]
pub struct TenantPartition {
    tenant: String,
    entries: BTreeMap<ArtifactKey, Arc<Artifact>>,
    tombstones: HashMap<ArtifactKey, u64>,
}

impl TenantPartition {
    pub fn new(tenant: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
            entries: BTreeMap::new(),
            tombstones: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &ArtifactKey) -> Result<Option<Arc<Artifact>>, StoreError> {
        match self.entries.get(key) {
            Some(artifact) => {
                self.verify(key, artifact)?;
                Ok(Some(Arc::clone(artifact)))
            }
            None => Ok(None),
        }
    }

    /// Version of the last deploy or undeploy applied to `key`
    pub fn recorded_version(&self, key: &ArtifactKey) -> Option<u64> {
        self.entries
            .get(key)
            .map(|a| a.version)
            .or_else(|| self.tombstones.get(key).copied())
    }

    pub fn put(&mut self, artifact: Arc<Artifact>) -> Result<Option<Arc<Artifact>>, StoreError> {
        if artifact.key.tenant_domain != self.tenant {
            return Err(StoreError::TenantMismatch {
                partition: self.tenant.clone(),
                key: artifact.key.clone(),
            });
        }
        self.tombstones.remove(&artifact.key);
        Ok(self.entries.insert(artifact.key.clone(), artifact))
    }

    pub fn remove(&mut self, key: &ArtifactKey, tombstone: Option<u64>) -> Option<Arc<Artifact>> {
        let removed = self.entries.remove(key);
        let version = match (&removed, tombstone) {
            (_, Some(v)) => Some(v),
            (Some(a), None) => Some(a.version),
            (None, None) => None,
        };
        if let Some(version) = version {
            let slot = self.tombstones.entry(key.clone()).or_insert(version);
            *slot = (*slot).max(version);
        }
        removed
    }

    /// Entries ordered by key
    pub fn snapshot(&self) -> Result<Vec<Arc<Artifact>>, StoreError> {
        self.entries
            .iter()
            .map(|(key, artifact)| {
                self.verify(key, artifact)?;
                Ok(Arc::clone(artifact))
            })
            .collect()
    }

    /// Sequences bound to the given API, ordered by key
    pub fn sequences_of(
        &self,
        name: &str,
        version: &str,
    ) -> Result<Vec<Arc<Artifact>>, StoreError> {
        let mut found = Vec::new();
        for (key, artifact) in &self.entries {
            if artifact.is_sequence_of(name, version) {
                self.verify(key, artifact)?;
                found.push(Arc::clone(artifact));
            }
        }
        Ok(found)
    }

    /// Swap the partition contents for the authoritative state
    ///
    /// Removals are applied before additions. The caller holds the write
    /// lock for the whole call, so readers see either side of the swap.
    pub fn replace(
        &mut self,
        authoritative: Vec<Artifact>,
        mode: ReplaceMode,
    ) -> Result<PartitionDiff, StoreError> {
        let mut incoming: BTreeMap<ArtifactKey, Artifact> = BTreeMap::new();
        for artifact in authoritative {
            if artifact.key.tenant_domain != self.tenant {
                return Err(StoreError::TenantMismatch {
                    partition: self.tenant.clone(),
                    key: artifact.key,
                });
            }
            incoming.insert(artifact.key.clone(), artifact);
        }

        let mut diff = PartitionDiff::default();
        if mode == ReplaceMode::Rebase {
            self.tombstones.clear();
        }

        let stale: Vec<ArtifactKey> = self
            .entries
            .keys()
            .filter(|key| !incoming.contains_key(*key))
            .cloned()
            .collect();
        for key in stale {
            let removed = match mode {
                ReplaceMode::Merge => self.remove(&key, None),
                ReplaceMode::Rebase => self.entries.remove(&key),
            };
            if let Some(removed) = removed {
                diff.removed.push(removed);
            }
        }

        for (key, artifact) in incoming {
            match self.entries.get(&key) {
                Some(current) if current.same_content(&artifact) => {
                    if mode == ReplaceMode::Rebase && current.version != artifact.version {
                        self.entries.insert(key, Arc::new(artifact));
                    }
                    diff.unchanged += 1;
                }
                _ => {
                    let artifact = Arc::new(artifact);
                    self.tombstones.remove(&key);
                    self.entries.insert(key, Arc::clone(&artifact));
                    diff.upserted.push(artifact);
                }
            }
        }

        Ok(diff)
    }

    fn verify(&self, key: &ArtifactKey, artifact: &Artifact) -> Result<(), StoreError> {
        if &artifact.key != key || key.tenant_domain != self.tenant {
            return Err(StoreError::Corrupted {
                tenant: self.tenant.clone(),
                key: key.clone(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ArtifactKind;

    fn api(tenant: &str, name: &str, payload: &str, version: u64) -> Artifact {
        Artifact::new(ArtifactKey::new(tenant, name, "v1"), ArtifactKind::Api, payload, version)
    }

    #[test]
    fn test_put_rejects_foreign_tenant() {
        let mut partition = TenantPartition::new("t1");
        let result = partition.put(Arc::new(api("t2", "PetStore", "P1", 1)));
        assert!(matches!(result, Err(StoreError::TenantMismatch { .. })));
        assert!(partition.is_empty());
    }

    #[test]
    fn test_tombstone_keeps_recorded_version() {
        let mut partition = TenantPartition::new("t1");
        let key = ArtifactKey::new("t1", "PetStore", "v1");
        partition.put(Arc::new(api("t1", "PetStore", "P1", 5))).unwrap();
        assert_eq!(partition.recorded_version(&key), Some(5));

        partition.remove(&key, Some(6));
        assert_eq!(partition.recorded_version(&key), Some(6));
        assert!(partition.get(&key).unwrap().is_none());

        partition.put(Arc::new(api("t1", "PetStore", "P2", 7))).unwrap();
        assert_eq!(partition.recorded_version(&key), Some(7));
    }

    #[test]
    fn test_replace_reports_diff() {
        let mut partition = TenantPartition::new("t1");
        partition.put(Arc::new(api("t1", "Keep", "K", 1))).unwrap();
        partition.put(Arc::new(api("t1", "Change", "C1", 1))).unwrap();
        partition.put(Arc::new(api("t1", "Drop", "D", 1))).unwrap();

        let diff = partition
            .replace(
                vec![
                    api("t1", "Keep", "K", 2),
                    api("t1", "Change", "C2", 2),
                    api("t1", "New", "N", 2),
                ],
                ReplaceMode::Merge,
            )
            .unwrap();

        assert_eq!(diff.removed.len(), 1);
        assert_eq!(diff.removed[0].key.name, "Drop");
        assert_eq!(diff.upserted.len(), 2);
        assert_eq!(diff.unchanged, 1);

        let names: Vec<_> = partition
            .snapshot()
            .unwrap()
            .iter()
            .map(|a| a.key.name.clone())
            .collect();
        assert_eq!(names, vec!["Change", "Keep", "New"]);
    }

    #[test]
    fn test_merge_keeps_recorded_versions() {
        let mut partition = TenantPartition::new("t1");
        let keep = ArtifactKey::new("t1", "Keep", "v1");
        let gone = ArtifactKey::new("t1", "Gone", "v1");
        partition.put(Arc::new(api("t1", "Keep", "K", 5))).unwrap();
        partition.put(Arc::new(api("t1", "Gone", "G", 6))).unwrap();

        partition
            .replace(vec![api("t1", "Keep", "K", 2)], ReplaceMode::Merge)
            .unwrap();

        assert_eq!(partition.recorded_version(&keep), Some(5));
        assert_eq!(partition.recorded_version(&gone), Some(6));
    }

    #[test]
    fn test_rebase_lowers_recorded_versions() {
        let mut partition = TenantPartition::new("t1");
        let keep = ArtifactKey::new("t1", "Keep", "v1");
        let gone = ArtifactKey::new("t1", "Gone", "v1");
        let undeployed = ArtifactKey::new("t1", "Undeployed", "v1");
        partition.put(Arc::new(api("t1", "Keep", "K", 5))).unwrap();
        partition.put(Arc::new(api("t1", "Gone", "G", 6))).unwrap();
        partition.put(Arc::new(api("t1", "Undeployed", "U", 3))).unwrap();
        partition.remove(&undeployed, Some(7));

        let diff = partition
            .replace(vec![api("t1", "Keep", "K", 2)], ReplaceMode::Rebase)
            .unwrap();

        assert_eq!(diff.unchanged, 1);
        assert!(diff.upserted.is_empty());
        assert_eq!(diff.removed.len(), 1);
        assert_eq!(partition.recorded_version(&keep), Some(2));
        assert_eq!(partition.get(&keep).unwrap().unwrap().version, 2);
        assert_eq!(partition.recorded_version(&gone), None);
        assert_eq!(partition.recorded_version(&undeployed), None);
    }
}
