//! Per-run audit records.
//!
//! One JSON document per workflow run: which phases ran, what the human
//! decided, where the artifacts live, and how the run ended. Written at
//! terminal states so a rejected or failed run still leaves a complete
//! record behind.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::gate::Decision;
use crate::phase::{AbortReason, Phase, Task};

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum RunOutcome {
    Completed,
    Aborted { at_phase: Phase, reason: AbortReason },
}

/// Audit entry for one executed phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseAuditEntry {
    pub phase: Phase,
    pub agent_name: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    /// Missing when the phase failed before reaching its checkpoint.
    pub decision: Option<Decision>,
    pub raw_input: Option<String>,
    pub artifact_ref: Option<PathBuf>,
    pub summary_chars: usize,
}

/// The full audit record of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunAudit {
    pub run_id: Uuid,
    pub task: Task,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Tracker issue recording this run, when one was created.
    pub issue_id: Option<u64>,
    pub phases: Vec<PhaseAuditEntry>,
    pub outcome: Option<RunOutcome>,
}

impl RunAudit {
    pub fn new(task: &Task) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            task: task.clone(),
            started_at: Utc::now(),
            ended_at: None,
            issue_id: None,
            phases: Vec::new(),
            outcome: None,
        }
    }

    pub fn record_phase(&mut self, entry: PhaseAuditEntry) {
        self.phases.push(entry);
    }

    pub fn finish(&mut self, outcome: RunOutcome) {
        self.ended_at = Some(Utc::now());
        self.outcome = Some(outcome);
    }
}

/// Writes run audit records under `<audit_dir>/runs/`.
pub struct AuditLogger {
    audit_dir: PathBuf,
}

impl AuditLogger {
    pub fn new(audit_dir: impl Into<PathBuf>) -> Self {
        Self {
            audit_dir: audit_dir.into(),
        }
    }

    /// Persist a finished run record and return its path.
    pub fn write(&self, run: &RunAudit) -> Result<PathBuf> {
        let runs_dir = self.audit_dir.join("runs");
        fs::create_dir_all(&runs_dir)
            .with_context(|| format!("Failed to create runs directory {}", runs_dir.display()))?;

        let filename = format!(
            "{}_{}.json",
            run.started_at.format("%Y-%m-%dT%H-%M-%S"),
            &run.run_id.to_string()[..8]
        );
        let run_file = runs_dir.join(filename);

        let json = serde_json::to_string_pretty(run).context("Failed to serialize run audit")?;
        fs::write(&run_file, json)
            .with_context(|| format!("Failed to write run audit {}", run_file.display()))?;
        Ok(run_file)
    }

    pub fn list_runs(&self) -> Result<Vec<PathBuf>> {
        let runs_dir = self.audit_dir.join("runs");
        if !runs_dir.exists() {
            return Ok(Vec::new());
        }
        let mut runs: Vec<PathBuf> = fs::read_dir(&runs_dir)
            .with_context(|| format!("Failed to read runs directory {}", runs_dir.display()))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .collect();
        runs.sort();
        Ok(runs)
    }
}

/// Load a run audit back from disk.
pub fn load_run(path: &Path) -> Result<RunAudit> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read run audit {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse run audit {}", path.display()))
}
