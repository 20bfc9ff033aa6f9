//! Synchronizer run loop
//!
//! Events are applied to the store first and pushed to the engine second.
//! A failed push keeps the store mutation, waits in the retry queue and is
//! retried with backoff while the feed keeps flowing.

use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep, sleep_until, timeout, Instant};
use tracing::{debug, info, warn};

use crate::adapter::{AdapterError, EngineAdapters};
use crate::config::AppConfig;
use crate::feed::{ControlPlaneFeed, FeedError};
use crate::models::{
    ApplyState, Artifact, ArtifactKey, ArtifactKind, DeploymentEvent, EventOp, FeedMessage,
};
use crate::observe::{Observation, Operation, Outcome, SyncObserver, TracingObserver};
use crate::store::ArtifactStore;

use super::cursor::CheckpointStore;
use super::retry::RetryPolicy;
use super::status::{DeadLetter, SyncShared, SyncStatusHandle};
use super::SyncError;

/// Observation subject for feed-level events
const FEED_SUBJECT: &str = "control-plane";

/// Synchronizer tuning
#[derive(Clone, Debug)]
pub struct SyncSettings {
    pub retry: RetryPolicy,

    /// Bound on each engine push
    pub push_timeout: Duration,

    /// Wait before reconnecting a failed feed
    pub reconnect_backoff: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            push_timeout: Duration::from_secs(5),
            reconnect_backoff: Duration::from_secs(1),
        }
    }
}

impl SyncSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn push_timeout(mut self, timeout: Duration) -> Self {
        self.push_timeout = timeout;
        self
    }

    pub fn reconnect_backoff(mut self, backoff: Duration) -> Self {
        self.reconnect_backoff = backoff;
        self
    }
}

impl From<&AppConfig> for SyncSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            retry: RetryPolicy::from(&config.retry),
            push_timeout: Duration::from_millis(config.engine.push_timeout_ms),
            reconnect_backoff: Duration::from_millis(config.feed.reconnect_backoff_ms),
        }
    }
}

/// Change to push to the engine
#[derive(Clone, Debug)]
pub(super) enum PushOp {
    Deploy(Arc<Artifact>),
    Undeploy { key: ArtifactKey, kind: ArtifactKind },
}

impl PushOp {
    pub(super) fn undeploy(artifact: &Artifact) -> Self {
        PushOp::Undeploy {
            key: artifact.key.clone(),
            kind: artifact.kind,
        }
    }

    pub(super) fn key(&self) -> &ArtifactKey {
        match self {
            PushOp::Deploy(artifact) => &artifact.key,
            PushOp::Undeploy { key, .. } => key,
        }
    }

    pub(super) fn kind(&self) -> ArtifactKind {
        match self {
            PushOp::Deploy(artifact) => artifact.kind,
            PushOp::Undeploy { kind, .. } => *kind,
        }
    }

    fn event_op(&self) -> EventOp {
        match self {
            PushOp::Deploy(_) => EventOp::Deploy,
            PushOp::Undeploy { .. } => EventOp::Undeploy,
        }
    }
}

/// Push waiting for its next attempt
#[derive(Clone, Debug)]
pub(super) struct PendingPush {
    op: PushOp,
    version: u64,
    attempts: u32,
    due: Instant,
    /// Committing this push advances the cursor
    from_feed: bool,
}

impl PendingPush {
    pub(super) fn new(op: PushOp, version: u64, from_feed: bool) -> Self {
        Self {
            op,
            version,
            attempts: 0,
            due: Instant::now(),
            from_feed,
        }
    }

    pub(super) fn op(&self) -> &PushOp {
        &self.op
    }

    pub(super) fn version(&self) -> u64 {
        self.version
    }
}

/// What screening decided for an incoming event
enum Verdict {
    Apply,
    Stale(String),
    Duplicate,
}

fn operation_for(op: EventOp) -> Operation {
    match op {
        EventOp::Deploy => Operation::Deploy,
        EventOp::Undeploy => Operation::Undeploy,
    }
}

/// Single writer keeping the store and the engine in line with the feed
pub struct Synchronizer<F> {
    pub(super) store: Arc<ArtifactStore>,
    pub(super) adapters: EngineAdapters,
    pub(super) feed: F,
    pub(super) settings: SyncSettings,
    pub(super) observer: Arc<dyn SyncObserver>,
    pub(super) checkpoints: Option<CheckpointStore>,
    pub(super) shared: Arc<SyncShared>,
    pub(super) retries: HashMap<ArtifactKey, PendingPush>,
    pub(super) checkpoint_dirty: bool,
}

impl<F: ControlPlaneFeed> Synchronizer<F> {
    pub fn new(store: Arc<ArtifactStore>, adapters: EngineAdapters, feed: F) -> Self {
        Self {
            store,
            adapters,
            feed,
            settings: SyncSettings::default(),
            observer: Arc::new(TracingObserver),
            checkpoints: None,
            shared: Arc::new(SyncShared::default()),
            retries: HashMap::new(),
            checkpoint_dirty: false,
        }
    }

    pub fn settings(mut self, settings: SyncSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn observer(mut self, observer: Arc<dyn SyncObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Persist the cursor to a checkpoint file
    pub fn checkpoint_store(mut self, checkpoints: CheckpointStore) -> Self {
        self.checkpoints = Some(checkpoints);
        self
    }

    pub fn status_handle(&self) -> SyncStatusHandle {
        SyncStatusHandle::new(Arc::clone(&self.shared))
    }

    pub fn store(&self) -> &Arc<ArtifactStore> {
        &self.store
    }

    pub fn checkpoint(&self) -> Option<u64> {
        self.shared.cursor.checkpoint()
    }

    pub fn pending_retries(&self) -> usize {
        self.retries.len()
    }

    /// Due time of the earliest pending retry
    pub fn next_retry_due(&self) -> Option<Instant> {
        self.retries.values().map(|p| p.due).min()
    }

    pub(super) fn observe(&self, observation: Observation) {
        self.shared.counters.observe(&observation);
        self.observer.observe(&observation);
    }

    pub(super) fn sync_pending_count(&self) {
        self.shared.set_pending_retries(self.retries.len());
    }

    /// Load the persisted checkpoint, if one is configured
    pub async fn restore_checkpoint(&mut self) -> Result<Option<u64>, SyncError> {
        if let Some(checkpoints) = &self.checkpoints {
            if let Some(checkpoint) = checkpoints.load().await? {
                self.shared.cursor.advance(checkpoint.version);
            }
        }
        Ok(self.shared.cursor.checkpoint())
    }

    async fn flush_checkpoint(&mut self) {
        if !self.checkpoint_dirty {
            return;
        }
        let (Some(checkpoints), Some(version)) =
            (&self.checkpoints, self.shared.cursor.checkpoint())
        else {
            self.checkpoint_dirty = false;
            return;
        };
        match checkpoints.save(version).await {
            Ok(()) => self.checkpoint_dirty = false,
            Err(e) => warn!("Failed to persist checkpoint {}: {}", version, e),
        }
    }

    /// Run until the feed ends, draining pending retries afterwards
    pub async fn run_until_end(&mut self) -> Result<(), SyncError> {
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        self.run(shutdown_rx).await
    }

    /// Run until the feed ends or `shutdown` fires
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), SyncError> {
        self.restore_checkpoint().await?;

        if !self.connect(&mut shutdown).await {
            return Ok(());
        }
        // The store lives in memory, so a restored checkpoint still starts empty
        match self.shared.cursor.checkpoint() {
            None => {
                info!("No checkpoint; resynchronizing all tenants");
                self.resync_all().await;
            }
            Some(checkpoint) if self.store.tenants().is_empty() => {
                info!(
                    "Checkpoint v{} restored into an empty store; resynchronizing all tenants",
                    checkpoint
                );
                self.resync_all().await;
            }
            Some(_) => {}
        }

        enum Step {
            Shutdown,
            RetryDue,
            Feed(Result<Option<FeedMessage>, FeedError>),
        }

        loop {
            let next_due = self.next_retry_due();
            let step = tokio::select! {
                biased;
                _ = shutdown.changed() => Step::Shutdown,
                _ = wait_until(next_due) => Step::RetryDue,
                message = self.feed.next() => Step::Feed(message),
            };

            match step {
                Step::Shutdown => {
                    info!("Shutdown requested; {} retries pending", self.retries.len());
                    break;
                }
                Step::RetryDue => {
                    self.process_due_retries().await;
                }
                Step::Feed(Ok(Some(message))) => self.handle_message(message).await,
                Step::Feed(Ok(None)) => {
                    info!("Control-plane feed ended");
                    self.drain_retries(&mut shutdown).await;
                    break;
                }
                Step::Feed(Err(e)) if !e.is_transient() => {
                    self.observe(
                        Observation::for_tenant(
                            FEED_SUBJECT,
                            Operation::FeedReceive,
                            Outcome::ProtocolViolation,
                        )
                        .detail(e.to_string()),
                    );
                }
                Step::Feed(Err(e)) => {
                    self.observe(
                        Observation::for_tenant(
                            FEED_SUBJECT,
                            Operation::FeedReceive,
                            Outcome::Failed,
                        )
                        .detail(e.to_string()),
                    );
                    if !self.reconnect(&mut shutdown).await {
                        break;
                    }
                }
            }

            self.flush_checkpoint().await;
        }

        self.flush_checkpoint().await;
        Ok(())
    }

    /// Connect the feed, retrying until it succeeds; false on shutdown
    async fn connect(&mut self, shutdown: &mut watch::Receiver<bool>) -> bool {
        let mut attempt = 0u32;
        loop {
            let resume_from = self.shared.cursor.checkpoint();
            match self.feed.connect(resume_from).await {
                Ok(()) => {
                    info!("Connected to control-plane feed (resume from {:?})", resume_from);
                    return true;
                }
                Err(e) => {
                    attempt += 1;
                    let delay = self.reconnect_delay(attempt);
                    warn!(
                        "Feed connect attempt {} failed: {}; retrying in {}ms",
                        attempt,
                        e,
                        delay.as_millis()
                    );
                    tokio::select! {
                        biased;
                        _ = shutdown.changed() => return false,
                        _ = sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn reconnect(&mut self, shutdown: &mut watch::Receiver<bool>) -> bool {
        tokio::select! {
            biased;
            _ = shutdown.changed() => return false,
            _ = sleep(self.settings.reconnect_backoff) => {}
        }
        self.connect(shutdown).await
    }

    fn reconnect_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.settings
            .reconnect_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.settings.retry.max_backoff.max(self.settings.reconnect_backoff))
    }

    /// Retry until the queue is empty or shutdown fires
    async fn drain_retries(&mut self, shutdown: &mut watch::Receiver<bool>) {
        while let Some(due) = self.next_retry_due() {
            tokio::select! {
                biased;
                _ = shutdown.changed() => return,
                _ = sleep_until(due) => {}
            }
            self.process_due_retries().await;
            self.flush_checkpoint().await;
        }
    }

    pub async fn handle_message(&mut self, message: FeedMessage) {
        match message {
            FeedMessage::Event(event) => {
                self.apply_event(event).await;
            }
            FeedMessage::TenantDeleted { tenant, version } => {
                self.evict_tenant(&tenant, version).await;
            }
            FeedMessage::ResyncRequested { tenant } => {
                if let Err(e) = self.resync_tenant(&tenant).await {
                    warn!("Requested resync of tenant {} failed: {}", tenant, e);
                }
            }
            FeedMessage::Heartbeat { head_version } => self.check_heartbeat(head_version).await,
        }
    }

    fn screen(&self, event: &DeploymentEvent) -> Result<Verdict, SyncError> {
        if let Some(checkpoint) = self.shared.cursor.checkpoint() {
            if event.version < checkpoint {
                return Ok(Verdict::Stale(format!(
                    "v{} is behind checkpoint v{}",
                    event.version, checkpoint
                )));
            }
        }

        let Some(recorded) = self.store.recorded_version(&event.key) else {
            return Ok(Verdict::Apply);
        };
        if event.version < recorded {
            return Ok(Verdict::Stale(format!(
                "v{} is older than recorded v{}",
                event.version, recorded
            )));
        }
        if event.version > recorded {
            return Ok(Verdict::Apply);
        }

        let current = self.store.get_key(&event.key)?;
        let same = match (event.op, current) {
            (EventOp::Deploy, Some(current)) => event
                .to_artifact()
                .map(|incoming| incoming.same_content(&current))
                .unwrap_or(false),
            (EventOp::Undeploy, None) => true,
            _ => false,
        };

        if same {
            Ok(Verdict::Duplicate)
        } else {
            Err(SyncError::ProtocolViolation {
                key: event.key.clone(),
                reason: format!("v{} replayed with different content", event.version),
            })
        }
    }

    /// Apply one deployment event to the store and the engine
    pub async fn apply_event(&mut self, event: DeploymentEvent) -> Outcome {
        let key = event.key.clone();
        let operation = operation_for(event.op);

        match self.screen(&event) {
            Ok(Verdict::Apply) => {}
            Ok(Verdict::Stale(reason)) => {
                self.observe(Observation::for_key(&key, operation, Outcome::Stale).detail(reason));
                return Outcome::Stale;
            }
            Ok(Verdict::Duplicate) => {
                self.observe(
                    Observation::for_key(&key, operation, Outcome::Duplicate)
                        .detail(format!("v{} already applied", event.version)),
                );
                return Outcome::Duplicate;
            }
            Err(e @ SyncError::ProtocolViolation { .. }) => {
                self.observe(
                    Observation::for_key(&key, operation, Outcome::ProtocolViolation)
                        .detail(e.to_string()),
                );
                return Outcome::ProtocolViolation;
            }
            Err(e) => {
                self.observe(
                    Observation::for_key(&key, operation, Outcome::Fault).detail(e.to_string()),
                );
                return Outcome::Fault;
            }
        }

        if let Some(pending) = self.retries.remove(&key) {
            self.sync_pending_count();
            self.observe(
                Observation::for_key(&key, Operation::Retry, Outcome::Superseded)
                    .attempt(pending.attempts)
                    .detail(format!("v{} superseded by v{}", pending.version, event.version)),
            );
        }

        let op = match event.op {
            EventOp::Deploy => {
                let Some(artifact) = event.to_artifact() else {
                    self.observe(
                        Observation::for_key(&key, operation, Outcome::ProtocolViolation)
                            .detail(format!("deploy v{} without payload", event.version)),
                    );
                    return Outcome::ProtocolViolation;
                };
                if let Err(e) = self.store.put(artifact.clone()) {
                    self.observe(
                        Observation::for_key(&key, operation, Outcome::Fault)
                            .detail(e.to_string()),
                    );
                    return Outcome::Fault;
                }
                PushOp::Deploy(Arc::new(artifact))
            }
            EventOp::Undeploy => {
                self.store.remove_at(&key, event.version);
                PushOp::Undeploy {
                    key: key.clone(),
                    kind: event.kind,
                }
            }
        };

        self.shared.begin(&key, event.version);
        self.attempt(PendingPush::new(op, event.version, true)).await
    }

    /// Retry every pending push that is due, in key order
    pub async fn process_due_retries(&mut self) -> usize {
        let now = Instant::now();
        let mut due: Vec<ArtifactKey> = self
            .retries
            .iter()
            .filter(|(_, pending)| pending.due <= now)
            .map(|(key, _)| key.clone())
            .collect();
        due.sort();

        let mut processed = 0;
        for key in due {
            let Some(pending) = self.retries.remove(&key) else {
                continue;
            };
            self.sync_pending_count();
            debug!("Retrying {} v{} (attempt {})", key, pending.version, pending.attempts + 1);
            self.attempt(pending).await;
            processed += 1;
        }
        processed
    }

    async fn push(&self, op: &PushOp) -> Result<(), AdapterError> {
        let result = match op {
            PushOp::Deploy(artifact) => {
                timeout(self.settings.push_timeout, self.adapters.deploy(artifact)).await
            }
            PushOp::Undeploy { key, kind } => {
                timeout(self.settings.push_timeout, self.adapters.undeploy(*kind, key)).await
            }
        };
        match result {
            Ok(pushed) => pushed,
            Err(_) => Err(AdapterError::Timeout(
                self.settings.push_timeout.as_millis() as u64,
            )),
        }
    }

    async fn attempt(&mut self, mut pending: PendingPush) -> Outcome {
        let started = Instant::now();
        let result = self.push(&pending.op).await;
        pending.attempts += 1;
        self.settle(pending, result, started.elapsed())
    }

    /// Push a batch concurrently; keys within a batch must be distinct
    pub(super) async fn push_batch(&mut self, batch: Vec<PendingPush>) {
        if batch.is_empty() {
            return;
        }
        for pending in &batch {
            self.shared.begin(pending.op.key(), pending.version);
        }

        let started = Instant::now();
        let results = join_all(batch.iter().map(|pending| self.push(&pending.op))).await;
        let latency = started.elapsed();

        for (mut pending, result) in batch.into_iter().zip(results) {
            pending.attempts += 1;
            self.settle(pending, result, latency);
        }
    }

    fn settle(
        &mut self,
        mut pending: PendingPush,
        result: Result<(), AdapterError>,
        latency: Duration,
    ) -> Outcome {
        let key = pending.op.key().clone();
        let operation = if pending.attempts > 1 {
            Operation::Retry
        } else {
            operation_for(pending.op.event_op())
        };

        let error = match result {
            Ok(()) => {
                self.shared.transition(&key, pending.version, ApplyState::Committed);
                self.shared.clear_dead_letter(&key, pending.version);
                if pending.from_feed {
                    self.shared.cursor.advance(pending.version);
                    self.checkpoint_dirty = true;
                }
                self.observe(
                    Observation::for_key(&key, operation, Outcome::Committed)
                        .latency(latency)
                        .attempt(pending.attempts)
                        .detail(format!("{} v{}", pending.op.event_op(), pending.version)),
                );
                return Outcome::Committed;
            }
            Err(error) => error,
        };

        self.shared.transition(&key, pending.version, ApplyState::Failed);

        if self.settings.retry.allows_retry(pending.attempts) {
            let delay = self.settings.retry.backoff(pending.attempts);
            pending.due = Instant::now() + delay;
            self.shared.transition(&key, pending.version, ApplyState::Retrying);
            self.observe(
                Observation::for_key(&key, operation, Outcome::Failed)
                    .latency(latency)
                    .attempt(pending.attempts)
                    .detail(format!("{}; retrying in {}ms", error, delay.as_millis())),
            );
            self.retries.insert(key, pending);
            self.sync_pending_count();
            return Outcome::Failed;
        }

        self.shared.transition(&key, pending.version, ApplyState::DeadLettered);
        self.shared.dead_letter(DeadLetter {
            key: key.clone(),
            kind: pending.op.kind(),
            op: pending.op.event_op(),
            version: pending.version,
            attempts: pending.attempts,
            error: error.to_string(),
            at: chrono::Utc::now(),
        });
        self.observe(
            Observation::for_key(&key, operation, Outcome::DeadLettered)
                .latency(latency)
                .attempt(pending.attempts)
                .detail(format!(
                    "{} v{} abandoned after {} attempts: {}",
                    pending.op.event_op(),
                    pending.version,
                    pending.attempts,
                    error
                )),
        );
        Outcome::DeadLettered
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}
