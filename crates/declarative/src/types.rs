//! Core types for reconciliation runs

use crate::resource::ResourceId;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::process::Output;

/// State of one resource within a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Status {
    Pending,
    Applying,
    /// Already in the desired state
    Unchanged,
    /// Converged, refreshed, or (in a dry run) would have been
    Changed {
        changes: Vec<String>,
        refreshed: bool,
        simulated: bool,
    },
    /// Refresh-only and not triggered
    Skipped { reason: String },
    Failed { error: String },
    /// Not attempted because `failed` failed; `via` is the direct dependency
    Blocked { failed: ResourceId, via: ResourceId },
}

impl Status {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending | Self::Applying)
    }

    pub fn is_change(&self) -> bool {
        matches!(self, Self::Changed { .. })
    }

    /// Failed or blocked
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. } | Self::Blocked { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Applying => "applying",
            Self::Unchanged => "unchanged",
            Self::Changed { .. } => "changed",
            Self::Skipped { .. } => "skipped",
            Self::Failed { .. } => "failed",
            Self::Blocked { .. } => "blocked",
        }
    }
}

/// Phase of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Building,
    Planning,
    Executing,
    Completed,
    Aborted,
}

/// Final state of one resource
#[derive(Debug, Clone, Serialize)]
pub struct ReportEntry {
    pub id: ResourceId,
    pub component: String,
    pub description: String,
    pub status: Status,
}

/// Outcome of a reconciliation run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub state: RunState,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// One entry per resource, in run order
    pub entries: Vec<ReportEntry>,
}

impl RunReport {
    pub fn new(dry_run: bool) -> Self {
        Self {
            state: RunState::Building,
            dry_run,
            started_at: Utc::now(),
            finished_at: None,
            entries: Vec::new(),
        }
    }

    pub fn summary(&self) -> ExecuteSummary {
        let mut summary = ExecuteSummary::default();
        for entry in &self.entries {
            summary.add_status(&entry.status);
        }
        summary
    }

    pub fn is_success(&self) -> bool {
        self.state == RunState::Completed
    }

    pub fn entry(&self, id: &ResourceId) -> Option<&ReportEntry> {
        self.entries.iter().find(|e| &e.id == id)
    }

    pub fn status(&self, id: &ResourceId) -> Option<&Status> {
        self.entry(id).map(|e| &e.status)
    }

    pub fn failures(&self) -> impl Iterator<Item = &ReportEntry> {
        self.entries
            .iter()
            .filter(|e| matches!(e.status, Status::Failed { .. }))
    }

    /// Resources blocked by the failure of `failed`
    pub fn blocked_by<'a>(
        &'a self,
        failed: &'a ResourceId,
    ) -> impl Iterator<Item = &'a ReportEntry> {
        self.entries
            .iter()
            .filter(move |e| matches!(&e.status, Status::Blocked { failed: f, .. } if f == failed))
    }

    pub fn changed(&self) -> impl Iterator<Item = &ReportEntry> {
        self.entries.iter().filter(|e| e.status.is_change())
    }

    /// Time between start and finish
    pub fn elapsed(&self) -> Option<chrono::Duration> {
        self.finished_at.map(|f| f - self.started_at)
    }
}

/// Counts of final states
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecuteSummary {
    pub changed: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub failed: usize,
    pub blocked: usize,
}

impl ExecuteSummary {
    /// Check if execution was fully successful (no failures)
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.blocked == 0
    }

    /// Total number of resources processed
    pub fn total(&self) -> usize {
        self.changed + self.unchanged + self.skipped + self.failed + self.blocked
    }

    /// Merge another summary into this one
    pub fn merge(&mut self, other: &ExecuteSummary) {
        self.changed += other.changed;
        self.unchanged += other.unchanged;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.blocked += other.blocked;
    }

    /// Add a final status to the summary
    pub fn add_status(&mut self, status: &Status) {
        match status {
            Status::Changed { .. } => self.changed += 1,
            Status::Unchanged => self.unchanged += 1,
            Status::Skipped { .. } => self.skipped += 1,
            Status::Failed { .. } => self.failed += 1,
            Status::Blocked { .. } => self.blocked += 1,
            Status::Pending | Status::Applying => {}
        }
    }
}

/// Options for execution
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Don't make changes, just show what would happen
    pub dry_run: bool,
    /// Number of parallel jobs; 1 runs the plan sequentially
    pub jobs: usize,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            jobs: 4,
        }
    }
}

/// Output from a command
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub success: bool,
    /// Exit code, if the process exited normally
    pub code: Option<i32>,
}

impl From<Output> for CommandOutput {
    fn from(output: Output) -> Self {
        Self {
            stdout: output.stdout,
            stderr: output.stderr,
            success: output.status.success(),
            code: output.status.code(),
        }
    }
}

impl CommandOutput {
    /// An output with the given exit code and no captured text
    pub fn exit(code: i32) -> Self {
        Self {
            success: code == 0,
            code: Some(code),
            ..Self::default()
        }
    }

    /// Get stdout as a string
    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }

    /// Get stderr as a string
    pub fn stderr_str(&self) -> String {
        String::from_utf8_lossy(&self.stderr).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::Kind;

    fn entry(title: &str, status: Status) -> ReportEntry {
        ReportEntry {
            id: ResourceId::new(Kind::Package, title),
            component: String::new(),
            description: String::new(),
            status,
        }
    }

    #[test]
    fn test_summary_counts() {
        let failed = ResourceId::new(Kind::Package, "a");
        let mut report = RunReport::new(false);
        report.entries = vec![
            entry("a", Status::Failed { error: "boom".into() }),
            entry(
                "b",
                Status::Blocked {
                    failed: failed.clone(),
                    via: failed.clone(),
                },
            ),
            entry("c", Status::Unchanged),
            entry(
                "d",
                Status::Changed {
                    changes: vec!["installed".into()],
                    refreshed: false,
                    simulated: false,
                },
            ),
        ];
        let summary = report.summary();
        assert_eq!(summary.total(), 4);
        assert_eq!(summary.changed, 1);
        assert!(!summary.is_success());
        assert_eq!(report.failures().count(), 1);
        assert_eq!(report.blocked_by(&failed).count(), 1);
    }

    #[test]
    fn test_status_serializes_tagged() {
        let skipped = Status::Skipped {
            reason: "not triggered".into(),
        };
        let json = serde_json::to_string(&skipped).unwrap();
        assert_eq!(json, r#"{"state":"skipped","reason":"not triggered"}"#);
    }

    #[test]
    fn test_command_output_exit() {
        assert!(CommandOutput::exit(0).success);
        assert_eq!(CommandOutput::exit(3).code, Some(3));
    }
}
