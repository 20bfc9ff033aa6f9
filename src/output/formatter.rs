//! Output formatters for sync reports and query answers
//!
//! Provides table and JSON output formats.

use serde::Serialize;

use crate::query::ApiResponse;
use crate::store::ArtifactStore;
use crate::sync::SyncStatus;

/// Output format options
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
    JsonPretty,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "table" => Some(OutputFormat::Table),
            "json" => Some(OutputFormat::Json),
            "json-pretty" | "jsonpretty" => Some(OutputFormat::JsonPretty),
            _ => None,
        }
    }
}

/// One stored artifact as listed in reports
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StoreEntry {
    pub tenant: String,
    pub name: String,
    pub version: String,
    pub kind: String,
    pub event_version: u64,
    pub content_hash: String,
}

/// Flatten the store into entries ordered by tenant then key
pub fn store_entries(store: &ArtifactStore) -> Vec<StoreEntry> {
    let mut tenants = store.tenants();
    tenants.sort();

    let mut entries = Vec::new();
    for tenant in tenants {
        // Corrupted partitions are reported by the synchronizer, not here
        let Ok(mut artifacts) = store.snapshot(&tenant) else {
            continue;
        };
        artifacts.sort_by(|a, b| a.key.cmp(&b.key));
        entries.extend(artifacts.iter().map(|a| StoreEntry {
            tenant: a.key.tenant_domain.clone(),
            name: a.key.name.clone(),
            version: a.key.version.clone(),
            kind: a.kind.name().to_string(),
            event_version: a.version,
            content_hash: a.content_hash.chars().take(12).collect(),
        }));
    }
    entries
}

/// Report formatter
pub struct ReportFormatter {
    format: OutputFormat,
    colorize: bool,
}

impl ReportFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            colorize: true,
        }
    }

    pub fn no_color(mut self) -> Self {
        self.colorize = false;
        self
    }

    fn json<T: Serialize>(&self, value: &T) -> String {
        let rendered = if self.format == OutputFormat::JsonPretty {
            serde_json::to_string_pretty(value)
        } else {
            serde_json::to_string(value)
        };
        rendered.unwrap_or_default()
    }

    /// Format the synchronizer status
    pub fn format_status(&self, status: &SyncStatus) -> String {
        match self.format {
            OutputFormat::Table => self.format_status_table(status),
            _ => self.json(status),
        }
    }

    fn format_status_table(&self, status: &SyncStatus) -> String {
        let mut output = String::new();

        let state = match (status.is_converged(), self.colorize) {
            (true, true) => "\x1b[32m✓ CONVERGED\x1b[0m",
            (true, false) => "✓ CONVERGED",
            (false, true) => "\x1b[31m✗ DIVERGED\x1b[0m",
            (false, false) => "✗ DIVERGED",
        };

        output.push_str("\n╔══════════════════════════════════════════════════════════════╗\n");
        output.push_str(&format!("║  Sync Status: {:46} ║\n", state));
        output.push_str("╠══════════════════════════════════════════════════════════════╣\n");
        let checkpoint = status
            .checkpoint
            .map(|v| v.to_string())
            .unwrap_or_else(|| "-".to_string());
        output.push_str(&format!("║  Checkpoint:      {:42} ║\n", checkpoint));
        output.push_str(&format!(
            "║  Pending retries: {:<42} ║\n",
            status.pending_retries
        ));
        output.push_str(&format!("║  In flight:       {:<42} ║\n", status.in_flight));
        output.push_str(&format!(
            "║  Dead letters:    {:<42} ║\n",
            status.dead_letters.len()
        ));

        if !status.outcomes.is_empty() {
            output.push_str("╠══════════════════════════════════════════════════════════════╣\n");
            for (outcome, count) in &status.outcomes {
                output.push_str(&format!("║  {:16} {:<43} ║\n", outcome, count));
            }
        }

        if !status.dead_letters.is_empty() {
            output.push_str("╠══════════════════════════════════════════════════════════════╣\n");
            for letter in &status.dead_letters {
                output.push_str(&format!(
                    "║  {} {} v{} after {} attempts: {}\n",
                    letter.op, letter.key, letter.version, letter.attempts, letter.error
                ));
            }
        }

        output.push_str("╚══════════════════════════════════════════════════════════════╝\n");
        output
    }

    /// Format the stored artifacts
    pub fn format_store(&self, entries: &[StoreEntry]) -> String {
        match self.format {
            OutputFormat::Table => self.format_store_table(entries),
            _ => self.json(&entries),
        }
    }

    fn format_store_table(&self, entries: &[StoreEntry]) -> String {
        let mut output = String::new();

        output.push_str(
            "\n┌──────────────────┬──────────────────────────┬─────────┬─────────────┬─────────┐\n",
        );
        output.push_str(
            "│ Tenant           │ Name                     │ Version │ Kind        │ Event   │\n",
        );
        output.push_str(
            "├──────────────────┼──────────────────────────┼─────────┼─────────────┼─────────┤\n",
        );

        for entry in entries {
            output.push_str(&format!(
                "│ {:16} │ {:24} │ {:7} │ {:11} │ {:>7} │\n",
                entry.tenant, entry.name, entry.version, entry.kind, entry.event_version
            ));
        }

        output.push_str(
            "└──────────────────┴──────────────────────────┴─────────┴─────────────┴─────────┘\n",
        );
        output.push_str(&format!("{} artifacts\n", entries.len()));

        output
    }

    /// Format a query answer
    pub fn format_response(&self, response: &ApiResponse) -> String {
        match self.format {
            OutputFormat::Table => {
                let code = if !self.colorize {
                    response.status.to_string()
                } else if response.is_success() {
                    format!("\x1b[32m{}\x1b[0m", response.status)
                } else {
                    format!("\x1b[31m{}\x1b[0m", response.status)
                };
                format!("{code}\n{}", response.body)
            }
            _ => self.json(response),
        }
    }
}
