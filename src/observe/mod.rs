//! Structured observability hook
//!
//! The synchronizer and the query gateway report every unit of work as an
//! [`Observation`]: which key, what was attempted, how it ended, how long
//! it took. Sinks decide what to do with it.

use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::models::ArtifactKey;

/// Unit of work being observed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Deploy,
    Undeploy,
    Retry,
    Resync,
    TenantEvict,
    FeedReceive,
    QueryApi,
    QuerySequences,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Deploy => "deploy",
            Operation::Undeploy => "undeploy",
            Operation::Retry => "retry",
            Operation::Resync => "resync",
            Operation::TenantEvict => "tenant_evict",
            Operation::FeedReceive => "feed_receive",
            Operation::QueryApi => "query_api",
            Operation::QuerySequences => "query_sequences",
        }
    }
}

/// How a unit of work ended
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Committed,
    Duplicate,
    Stale,
    Superseded,
    ProtocolViolation,
    Failed,
    DeadLettered,
    Found,
    NotFound,
    Fault,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Committed => "committed",
            Outcome::Duplicate => "duplicate",
            Outcome::Stale => "stale",
            Outcome::Superseded => "superseded",
            Outcome::ProtocolViolation => "protocol_violation",
            Outcome::Failed => "failed",
            Outcome::DeadLettered => "dead_lettered",
            Outcome::Found => "found",
            Outcome::NotFound => "not_found",
            Outcome::Fault => "fault",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One observed unit of work
#[derive(Clone, Debug, Serialize)]
pub struct Observation {
    pub tenant: String,
    pub key: Option<ArtifactKey>,
    pub operation: Operation,
    pub outcome: Outcome,
    pub latency: Duration,
    pub attempt: u32,
    pub detail: Option<String>,
}

impl Observation {
    pub fn for_key(key: &ArtifactKey, operation: Operation, outcome: Outcome) -> Self {
        Self {
            tenant: key.tenant_domain.clone(),
            key: Some(key.clone()),
            operation,
            outcome,
            latency: Duration::ZERO,
            attempt: 0,
            detail: None,
        }
    }

    pub fn for_tenant(tenant: impl Into<String>, operation: Operation, outcome: Outcome) -> Self {
        Self {
            tenant: tenant.into(),
            key: None,
            operation,
            outcome,
            latency: Duration::ZERO,
            attempt: 0,
            detail: None,
        }
    }

    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    fn subject(&self) -> String {
        match &self.key {
            Some(key) => key.to_string(),
            None => self.tenant.clone(),
        }
    }
}

/// Sink for observations
pub trait SyncObserver: Send + Sync {
    fn observe(&self, observation: &Observation);
}

/// Emits observations as structured tracing events
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingObserver;

impl SyncObserver for TracingObserver {
    fn observe(&self, o: &Observation) {
        let subject = o.subject();
        let latency_ms = o.latency.as_millis() as u64;
        let detail = o.detail.as_deref().unwrap_or("");
        match o.outcome {
            Outcome::DeadLettered | Outcome::Fault => error!(
                subject = %subject,
                operation = o.operation.as_str(),
                outcome = o.outcome.as_str(),
                attempt = o.attempt,
                latency_ms,
                "{}",
                detail
            ),
            Outcome::Failed | Outcome::ProtocolViolation => warn!(
                subject = %subject,
                operation = o.operation.as_str(),
                outcome = o.outcome.as_str(),
                attempt = o.attempt,
                latency_ms,
                "{}",
                detail
            ),
            Outcome::Committed => info!(
                subject = %subject,
                operation = o.operation.as_str(),
                outcome = o.outcome.as_str(),
                latency_ms,
                "{}",
                detail
            ),
            _ => debug!(
                subject = %subject,
                operation = o.operation.as_str(),
                outcome = o.outcome.as_str(),
                latency_ms,
                "{}",
                detail
            ),
        }
    }
}

/// Counts observations per outcome
#[derive(Debug, Default)]
pub struct CountingObserver {
    counts: DashMap<Outcome, u64>,
}

impl CountingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, outcome: Outcome) -> u64 {
        self.counts.get(&outcome).map(|c| *c).unwrap_or(0)
    }

    /// Counts keyed by outcome name, sorted
    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        self.counts
            .iter()
            .map(|entry| (entry.key().as_str().to_string(), *entry.value()))
            .collect()
    }
}

impl SyncObserver for CountingObserver {
    fn observe(&self, observation: &Observation) {
        *self.counts.entry(observation.outcome).or_insert(0) += 1;
    }
}

/// Keeps every observation in memory
#[cfg(test)]
#[derive(Debug, Default)]
pub struct RecordingObserver {
    observations: parking_lot::Mutex<Vec<Observation>>,
}

#[cfg(test)]
impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observations(&self) -> Vec<Observation> {
        self.observations.lock().clone()
    }

    pub fn with_outcome(&self, outcome: Outcome) -> Vec<Observation> {
        self.observations
            .lock()
            .iter()
            .filter(|o| o.outcome == outcome)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
impl SyncObserver for RecordingObserver {
    fn observe(&self, observation: &Observation) {
        self.observations.lock().push(observation.clone());
    }
}

/// Forwards to several observers
#[derive(Clone, Default)]
pub struct FanoutObserver {
    sinks: Vec<Arc<dyn SyncObserver>>,
}

impl FanoutObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn SyncObserver>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl SyncObserver for FanoutObserver {
    fn observe(&self, observation: &Observation) {
        for sink in &self.sinks {
            sink.observe(observation);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counting_observer() {
        let counter = CountingObserver::new();
        let key = ArtifactKey::new("t1", "PetStore", "v1");
        counter.observe(&Observation::for_key(&key, Operation::Deploy, Outcome::Committed));
        counter.observe(&Observation::for_key(&key, Operation::Deploy, Outcome::Committed));
        counter.observe(&Observation::for_key(&key, Operation::Deploy, Outcome::Stale));

        assert_eq!(counter.count(Outcome::Committed), 2);
        assert_eq!(counter.count(Outcome::Stale), 1);
        assert_eq!(counter.count(Outcome::DeadLettered), 0);
        assert_eq!(counter.snapshot().get("committed"), Some(&2));
    }

    #[test]
    fn test_fanout_reaches_all_sinks() {
        let recorder = Arc::new(RecordingObserver::new());
        let counter = Arc::new(CountingObserver::new());
        let fanout = FanoutObserver::new()
            .with(recorder.clone())
            .with(counter.clone())
            .with(Arc::new(TracingObserver));

        fanout.observe(
            &Observation::for_tenant("t1", Operation::Resync, Outcome::Committed)
                .latency(Duration::from_millis(12))
                .detail("2 upserted"),
        );

        assert_eq!(recorder.observations().len(), 1);
        assert_eq!(counter.count(Outcome::Committed), 1);
        assert_eq!(recorder.observations()[0].subject(), "t1");
    }
}
