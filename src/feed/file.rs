//! File-backed control-plane feed
//!
//! Events come from a JSON-lines file, one [`FeedMessage`] per line. Full
//! tenant state lives in `<state_dir>/<tenant>.json` as a JSON array of
//! [`ArtifactRecord`]s.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::models::{ApiRef, Artifact, ArtifactKey, ArtifactKind, FeedMessage};

use super::{ControlPlaneFeed, FeedError};

/// Artifact as written in full-state files
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub name: String,
    pub version: String,
    pub kind: ArtifactKind,
    pub payload: String,
    #[serde(default)]
    pub event_version: u64,
    #[serde(default)]
    pub api: Option<ApiRef>,
    /// When the control plane deployed it; defaults to load time
    #[serde(default)]
    pub deployed_at: Option<DateTime<Utc>>,
}

impl ArtifactRecord {
    pub fn into_artifact(self, tenant: &str) -> Artifact {
        let key = ArtifactKey::new(tenant, self.name, self.version);
        let mut artifact = Artifact::new(key, self.kind, self.payload, self.event_version);
        artifact.api = self.api;
        match self.deployed_at {
            Some(at) => artifact.with_deployed_at(at),
            None => artifact,
        }
    }
}

/// Feed replaying a recorded event file
#[derive(Debug)]
pub struct FileFeed {
    events_path: PathBuf,
    state_dir: Option<PathBuf>,
    lines: Vec<String>,
    position: usize,
    resume_from: Option<u64>,
}

impl FileFeed {
    pub fn new(events_path: impl Into<PathBuf>) -> Self {
        Self {
            events_path: events_path.into(),
            state_dir: None,
            lines: Vec::new(),
            position: 0,
            resume_from: None,
        }
    }

    /// Directory holding `<tenant>.json` full-state files
    pub fn with_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = Some(dir.into());
        self
    }

    fn state_file(&self, tenant: &str) -> Option<PathBuf> {
        self.state_dir
            .as_ref()
            .map(|dir| dir.join(format!("{tenant}.json")))
    }

    fn skip(&self, message: &FeedMessage) -> bool {
        match (message, self.resume_from) {
            (FeedMessage::Event(event), Some(resume)) => event.version < resume,
            _ => false,
        }
    }
}

async fn read_to_string(path: &Path) -> Result<String, FeedError> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|e| FeedError::Io(format!("{}: {e}", path.display())))
}

#[async_trait]
impl ControlPlaneFeed for FileFeed {
    async fn connect(&mut self, resume_from: Option<u64>) -> Result<(), FeedError> {
        let content = read_to_string(&self.events_path).await?;
        self.lines = content.lines().map(str::to_string).collect();
        self.position = 0;
        self.resume_from = resume_from;
        info!(
            "Opened event file {} ({} lines, resume from {:?})",
            self.events_path.display(),
            self.lines.len(),
            resume_from
        );
        Ok(())
    }

    async fn next(&mut self) -> Result<Option<FeedMessage>, FeedError> {
        while self.position < self.lines.len() {
            let line_no = self.position + 1;
            let line = self.lines[self.position].trim().to_string();
            self.position += 1;

            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let message: FeedMessage =
                serde_json::from_str(&line).map_err(|e| FeedError::Malformed {
                    position: line_no,
                    reason: e.to_string(),
                })?;

            if self.skip(&message) {
                debug!("Skipping line {} below resume point", line_no);
                continue;
            }
            return Ok(Some(message));
        }
        Ok(None)
    }

    async fn fetch_full_state(&self, tenant: &str) -> Result<Vec<Artifact>, FeedError> {
        let path = self
            .state_file(tenant)
            .ok_or_else(|| FeedError::UnknownTenant(tenant.to_string()))?;
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(FeedError::UnknownTenant(tenant.to_string()));
        }

        let content = read_to_string(&path).await?;
        let records: Vec<ArtifactRecord> =
            serde_json::from_str(&content).map_err(|e| FeedError::Malformed {
                position: 0,
                reason: format!("{}: {e}", path.display()),
            })?;

        Ok(records
            .into_iter()
            .map(|r| r.into_artifact(tenant))
            .collect())
    }

    async fn tenants(&self) -> Result<Vec<String>, FeedError> {
        let Some(dir) = &self.state_dir else {
            return Ok(Vec::new());
        };

        let mut entries = tokio::fs::read_dir(dir)
            .await
            .map_err(|e| FeedError::Io(format!("{}: {e}", dir.display())))?;

        let mut tenants = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| FeedError::Io(e.to_string()))?
        {
            let path = entry.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    tenants.push(stem.to_string());
                }
            }
        }
        tenants.sort();
        Ok(tenants)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EventOp;
    use std::fs;
    use tempfile::TempDir;

    const EVENTS: &str = r#"# recorded feed
{"type":"event","key":{"tenant_domain":"t1","name":"PetStore","version":"v1"},"kind":"api","op":"deploy","version":5,"payload":"P1"}

{"type":"event","key":{"tenant_domain":"t1","name":"PetStore","version":"v1"},"kind":"api","op":"undeploy","version":6}
not json
{"type":"heartbeat","head_version":6}
"#;

    fn write_events(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("events.jsonl");
        fs::write(&path, EVENTS).unwrap();
        path
    }

    #[tokio::test]
    async fn test_reads_messages_and_reports_malformed_lines() {
        let dir = TempDir::new().unwrap();
        let mut feed = FileFeed::new(write_events(&dir));
        feed.connect(None).await.unwrap();

        let first = feed.next().await.unwrap().unwrap();
        assert!(matches!(first, FeedMessage::Event(ref e) if e.op == EventOp::Deploy));

        let second = feed.next().await.unwrap().unwrap();
        assert!(matches!(second, FeedMessage::Event(ref e) if e.op == EventOp::Undeploy));

        let err = feed.next().await.unwrap_err();
        assert!(matches!(err, FeedError::Malformed { position: 5, .. }));

        let fourth = feed.next().await.unwrap().unwrap();
        assert_eq!(fourth, FeedMessage::Heartbeat { head_version: 6 });
        assert!(feed.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_resume_skips_older_events() {
        let dir = TempDir::new().unwrap();
        let mut feed = FileFeed::new(write_events(&dir));
        feed.connect(Some(6)).await.unwrap();

        let first = feed.next().await.unwrap().unwrap();
        assert!(matches!(first, FeedMessage::Event(ref e) if e.version == 6));
    }

    #[tokio::test]
    async fn test_full_state_and_tenants() {
        let dir = TempDir::new().unwrap();
        let state_dir = dir.path().join("state");
        fs::create_dir_all(&state_dir).unwrap();
        fs::write(
            state_dir.join("t1.json"),
            r#"[{"name":"PetStore","version":"v1","kind":"api","payload":"P9","event_version":9,"deployed_at":"2026-01-02T03:04:05Z"},
                {"name":"PetStore--In","version":"v1","kind":"sequence","payload":"<seq/>","api":{"name":"PetStore","version":"v1"}}]"#,
        )
        .unwrap();

        let feed = FileFeed::new(write_events(&dir)).with_state_dir(&state_dir);
        assert_eq!(feed.tenants().await.unwrap(), vec!["t1".to_string()]);

        let state = feed.fetch_full_state("t1").await.unwrap();
        assert_eq!(state.len(), 2);
        assert_eq!(state[0].key.tenant_domain, "t1");
        assert_eq!(state[0].deployed_at.to_rfc3339(), "2026-01-02T03:04:05+00:00");
        assert!(state[1].is_sequence_of("PetStore", "v1"));

        assert_eq!(
            feed.fetch_full_state("t2").await,
            Err(FeedError::UnknownTenant("t2".to_string()))
        );
    }
}
