//! Full resynchronization and tenant lifecycle
//!
//! A resync swaps a tenant partition for the control plane's authoritative
//! state in one write, then pushes removals to the engine before additions.

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::feed::ControlPlaneFeed;
use crate::models::ArtifactKey;
use crate::observe::{Observation, Operation, Outcome};
use crate::store::ReplaceMode;
use crate::utils::Timer;

use super::synchronizer::{PendingPush, PushOp, Synchronizer};
use super::SyncError;

/// Result of resynchronizing one tenant
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ResyncSummary {
    pub tenant: String,
    pub removed: usize,
    pub upserted: usize,
    pub unchanged: usize,
    /// Unchanged artifacts pushed again because their earlier push failed
    pub repushed: usize,
}

impl<F: ControlPlaneFeed> Synchronizer<F> {
    /// Replace a tenant's partition with the control plane's full state
    pub async fn resync_tenant(&mut self, tenant: &str) -> Result<ResyncSummary, SyncError> {
        self.resync_tenant_as(tenant, ReplaceMode::Merge).await
    }

    async fn resync_tenant_as(
        &mut self,
        tenant: &str,
        mode: ReplaceMode,
    ) -> Result<ResyncSummary, SyncError> {
        let timer = Timer::start(format!("resync {tenant}"));

        let authoritative = match self.feed.fetch_full_state(tenant).await {
            Ok(artifacts) => artifacts,
            Err(e) => {
                self.observe(
                    Observation::for_tenant(tenant, Operation::Resync, Outcome::Failed)
                        .latency(timer.elapsed())
                        .detail(e.to_string()),
                );
                return Err(e.into());
            }
        };

        let superseded = self.supersede_tenant_retries(tenant, "resync");

        let replaced = match mode {
            ReplaceMode::Merge => self.store.replace_partition(tenant, authoritative),
            ReplaceMode::Rebase => self.store.rebase_partition(tenant, authoritative),
        };
        let diff = match replaced {
            Ok(diff) => diff,
            Err(e) => {
                self.observe(
                    Observation::for_tenant(tenant, Operation::Resync, Outcome::Fault)
                        .latency(timer.elapsed())
                        .detail(e.to_string()),
                );
                return Err(e.into());
            }
        };

        let mut removals: Vec<PendingPush> = diff
            .removed
            .iter()
            .map(|artifact| PendingPush::new(PushOp::undeploy(artifact), artifact.version, false))
            .collect();
        let mut upserts: Vec<PendingPush> = diff
            .upserted
            .iter()
            .map(|artifact| {
                PendingPush::new(PushOp::Deploy(Arc::clone(artifact)), artifact.version, false)
            })
            .collect();

        // Unchanged keys whose push never landed still need one
        let mut repushed = 0;
        for pending in superseded {
            let key = pending.op().key();
            if diff
                .removed
                .iter()
                .chain(diff.upserted.iter())
                .any(|artifact| &artifact.key == key)
            {
                continue;
            }
            match self.store.get_key(key) {
                Ok(Some(current)) => {
                    upserts.push(PendingPush::new(
                        PushOp::Deploy(Arc::clone(&current)),
                        current.version,
                        false,
                    ));
                    repushed += 1;
                }
                Ok(None) => {
                    removals.push(PendingPush::new(
                        PushOp::Undeploy {
                            key: key.clone(),
                            kind: pending.op().kind(),
                        },
                        pending.version(),
                        false,
                    ));
                    repushed += 1;
                }
                Err(e) => warn!("Skipping repush of {}: {}", key, e),
            }
        }

        self.push_batch(removals).await;
        self.push_batch(upserts).await;

        let summary = ResyncSummary {
            tenant: tenant.to_string(),
            removed: diff.removed.len(),
            upserted: diff.upserted.len(),
            unchanged: diff.unchanged,
            repushed,
        };
        self.observe(
            Observation::for_tenant(tenant, Operation::Resync, Outcome::Committed)
                .latency(timer.stop())
                .detail(format!(
                    "{} removed, {} upserted, {} unchanged, {} repushed",
                    summary.removed, summary.upserted, summary.unchanged, summary.repushed
                )),
        );
        Ok(summary)
    }

    /// Resync every tenant known to the control plane or the store
    pub async fn resync_all(&mut self) -> Vec<ResyncSummary> {
        let (summaries, _) = self.resync_tenants(ReplaceMode::Merge).await;
        summaries
    }

    /// Resync every tenant, counting the ones that could not be resynced
    ///
    /// A failed tenant listing counts as one failure.
    async fn resync_tenants(&mut self, mode: ReplaceMode) -> (Vec<ResyncSummary>, usize) {
        let mut failures = 0;
        let mut tenants = match self.feed.tenants().await {
            Ok(tenants) => tenants,
            Err(e) => {
                warn!("Could not list control-plane tenants: {}", e);
                failures += 1;
                Vec::new()
            }
        };
        for tenant in self.store.tenants() {
            if !tenants.contains(&tenant) {
                tenants.push(tenant);
            }
        }
        tenants.sort();

        let mut summaries = Vec::with_capacity(tenants.len());
        for tenant in &tenants {
            match self.resync_tenant_as(tenant, mode).await {
                Ok(summary) => summaries.push(summary),
                Err(e) => {
                    warn!("Resync of tenant {} failed: {}", tenant, e);
                    failures += 1;
                }
            }
        }
        (summaries, failures)
    }

    /// Drop a deleted tenant from the store and the engine
    pub async fn evict_tenant(&mut self, tenant: &str, version: u64) -> usize {
        if self.shared.cursor.is_behind(version) {
            self.observe(
                Observation::for_tenant(tenant, Operation::TenantEvict, Outcome::Stale)
                    .detail(format!("deletion v{version} is behind checkpoint")),
            );
            return 0;
        }

        let artifacts = match self.store.snapshot(tenant) {
            Ok(artifacts) => artifacts,
            Err(e) => {
                warn!("Evicting tenant {} with unreadable partition: {}", tenant, e);
                Vec::new()
            }
        };

        let superseded = self.supersede_tenant_retries(tenant, "tenant deletion");
        let evicted = self.store.evict_tenant(tenant);
        self.shared.forget_tenant(tenant);

        let mut undeploys: Vec<PendingPush> = artifacts
            .iter()
            .map(|artifact| PendingPush::new(PushOp::undeploy(artifact), version, false))
            .collect();
        for pending in superseded {
            let key = pending.op().key();
            if !artifacts.iter().any(|artifact| &artifact.key == key) {
                undeploys.push(PendingPush::new(
                    PushOp::Undeploy {
                        key: key.clone(),
                        kind: pending.op().kind(),
                    },
                    version,
                    false,
                ));
            }
        }
        self.push_batch(undeploys).await;

        self.shared.cursor.advance(version);
        self.checkpoint_dirty = true;

        self.observe(
            Observation::for_tenant(tenant, Operation::TenantEvict, Outcome::Committed)
                .detail(format!("{evicted} artifacts evicted at v{version}")),
        );
        evicted
    }

    /// Compare the control plane's head with the committed checkpoint
    ///
    /// A head behind the checkpoint means the feed was rolled back. Every
    /// tenant is rebased onto its full state, and the cursor only moves back
    /// once all of them succeeded; otherwise the next heartbeat tries again.
    pub async fn check_heartbeat(&mut self, head_version: u64) {
        match self.shared.cursor.checkpoint() {
            Some(checkpoint) if head_version < checkpoint => {
                warn!(
                    "Control-plane head v{} is behind checkpoint v{}; resynchronizing",
                    head_version, checkpoint
                );
                let (summaries, failures) = self.resync_tenants(ReplaceMode::Rebase).await;
                if failures > 0 {
                    warn!(
                        "{} tenant resyncs failed; keeping checkpoint v{}",
                        failures, checkpoint
                    );
                    return;
                }
                self.shared.cursor.reset(head_version);
                self.checkpoint_dirty = true;
                info!(
                    "Resynchronized {} tenants; cursor reset to v{}",
                    summaries.len(),
                    head_version
                );
            }
            _ => debug!("Heartbeat at head v{}", head_version),
        }
    }

    fn supersede_tenant_retries(&mut self, tenant: &str, reason: &str) -> Vec<PendingPush> {
        let mut keys: Vec<ArtifactKey> = self
            .retries
            .keys()
            .filter(|key| key.tenant_domain == tenant)
            .cloned()
            .collect();
        keys.sort();

        let mut superseded = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(pending) = self.retries.remove(&key) {
                self.observe(
                    Observation::for_key(&key, Operation::Retry, Outcome::Superseded)
                        .detail(format!("superseded by {reason}")),
                );
                superseded.push(pending);
            }
        }
        self.sync_pending_count();
        superseded
    }
}
