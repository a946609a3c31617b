//! Phase definitions and the per-run data model.
//!
//! This module provides:
//! - `Phase` enum representing the five ordered workflow stages
//! - `Task` struct created once per workflow invocation
//! - `PhaseResult` recording one phase's gated output
//! - `WorkflowOutcome` as the terminal state of a run

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

/// One of the five ordered workflow stages.
///
/// The ordering is total: `Research < Plan < Implement < Validate < Integrate`.
/// A later phase never starts before the previous one is approved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Research,
    Plan,
    Implement,
    Validate,
    Integrate,
}

impl Phase {
    /// All phases in execution order.
    pub const ALL: [Phase; 5] = [
        Phase::Research,
        Phase::Plan,
        Phase::Implement,
        Phase::Validate,
        Phase::Integrate,
    ];

    /// Human-readable name of the phase.
    pub fn name(&self) -> &'static str {
        match self {
            Phase::Research => "research",
            Phase::Plan => "plan",
            Phase::Implement => "implement",
            Phase::Validate => "validate",
            Phase::Integrate => "integrate",
        }
    }

    /// Identity of the agent that executes this phase, used for archive
    /// filenames and issue comments.
    pub fn agent_name(&self) -> &'static str {
        match self {
            Phase::Research => "researcher",
            Phase::Plan => "planner",
            Phase::Implement => "implementer",
            Phase::Validate => "validator",
            Phase::Integrate => "integrator",
        }
    }

    /// The phase that follows this one, or `None` for `Integrate`.
    pub fn next(&self) -> Option<Phase> {
        let idx = Phase::ALL.iter().position(|p| p == self)?;
        Phase::ALL.get(idx + 1).copied()
    }

    /// Whether this phase executes inside an exclusive workspace.
    pub fn needs_workspace(&self) -> bool {
        matches!(self, Phase::Implement | Phase::Validate)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A unit of work driven through the five phases. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Stable identifier, used to derive the workspace branch name.
    pub id: String,
    /// Free-form description handed to every phase agent.
    pub description: String,
}

impl Task {
    /// Create a task whose id is a slug of the description.
    pub fn new(description: &str) -> Self {
        Self {
            id: slugify(description),
            description: description.to_string(),
        }
    }

    /// Create a task with an explicit id.
    pub fn with_id(id: &str, description: &str) -> Self {
        Self {
            id: id.to_string(),
            description: description.to_string(),
        }
    }

    /// Deterministic workspace branch name for this task.
    pub fn branch_name(&self) -> String {
        format!("implement-{}", self.id)
    }
}

/// Lowercase, hyphen-separated slug of arbitrary text.
fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut last_was_sep = true;
    for ch in text.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
            last_was_sep = false;
        } else if !last_was_sep {
            slug.push('-');
            last_was_sep = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

/// The gated record of one phase's execution. Immutable once stored in the
/// outcome; `approved` is set only after the checkpoint returns Approve.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseResult {
    pub phase: Phase,
    /// The bounded summary that crosses into the next phase's input.
    pub summary_text: String,
    /// Location of the archived full artifact.
    pub full_artifact_ref: PathBuf,
    /// Metrics declared by the phase agent.
    #[serde(default)]
    pub metrics: HashMap<String, serde_json::Value>,
    pub approved: bool,
}

/// Why a run aborted before completing all five phases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "detail")]
pub enum AbortReason {
    /// The human checkpoint rejected the phase (includes mapped Modify).
    Rejected,
    /// The phase agent's execution failed; not retried.
    ExecutionFailed(String),
    /// An issue-tracker or workspace-control call failed.
    ExternalToolFailed(String),
    /// The integration merge hit conflicts; workspace left for inspection.
    MergeConflict,
}

/// Terminal state of one workflow run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WorkflowOutcome {
    /// All five phases approved and the workspace merged and removed.
    Completed(Vec<PhaseResult>),
    /// The run stopped at `at_phase`; `results` holds everything produced so
    /// far, including the unapproved result of the failing phase when one
    /// exists.
    Aborted {
        at_phase: Phase,
        reason: AbortReason,
        results: Vec<PhaseResult>,
    },
}

impl WorkflowOutcome {
    /// All phase results produced by the run, regardless of outcome.
    pub fn results(&self) -> &[PhaseResult] {
        match self {
            WorkflowOutcome::Completed(results) => results,
            WorkflowOutcome::Aborted { results, .. } => results,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, WorkflowOutcome::Completed(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================
    // Phase tests
    // =========================================

    #[test]
    fn test_phase_order_is_total() {
        assert!(Phase::Research < Phase::Plan);
        assert!(Phase::Plan < Phase::Implement);
        assert!(Phase::Implement < Phase::Validate);
        assert!(Phase::Validate < Phase::Integrate);
    }

    #[test]
    fn test_phase_next_chain() {
        assert_eq!(Phase::Research.next(), Some(Phase::Plan));
        assert_eq!(Phase::Plan.next(), Some(Phase::Implement));
        assert_eq!(Phase::Validate.next(), Some(Phase::Integrate));
        assert_eq!(Phase::Integrate.next(), None);
    }

    #[test]
    fn test_phase_all_matches_next_ordering() {
        for window in Phase::ALL.windows(2) {
            assert_eq!(window[0].next(), Some(window[1]));
        }
    }

    #[test]
    fn test_phase_needs_workspace() {
        assert!(!Phase::Research.needs_workspace());
        assert!(!Phase::Plan.needs_workspace());
        assert!(Phase::Implement.needs_workspace());
        assert!(Phase::Validate.needs_workspace());
        assert!(!Phase::Integrate.needs_workspace());
    }

    #[test]
    fn test_phase_serialization() {
        assert_eq!(
            serde_json::to_string(&Phase::Implement).unwrap(),
            "\"implement\""
        );
        let parsed: Phase = serde_json::from_str("\"validate\"").unwrap();
        assert_eq!(parsed, Phase::Validate);
    }

    // =========================================
    // Task tests
    // =========================================

    #[test]
    fn test_task_new_derives_slug_id() {
        let task = Task::new("Add login endpoint");
        assert_eq!(task.id, "add-login-endpoint");
        assert_eq!(task.description, "Add login endpoint");
    }

    #[test]
    fn test_task_branch_name_is_deterministic() {
        let a = Task::new("add login");
        let b = Task::new("add login");
        assert_eq!(a.branch_name(), b.branch_name());
        assert_eq!(a.branch_name(), "implement-add-login");
    }

    #[test]
    fn test_slugify_collapses_punctuation() {
        assert_eq!(slugify("Fix: the  (weird) bug!"), "fix-the-weird-bug");
        assert_eq!(slugify("trailing---"), "trailing");
    }

    // =========================================
    // Outcome tests
    // =========================================

    fn result(phase: Phase, approved: bool) -> PhaseResult {
        PhaseResult {
            phase,
            summary_text: String::new(),
            full_artifact_ref: PathBuf::from("/tmp/x.md"),
            metrics: HashMap::new(),
            approved,
        }
    }

    #[test]
    fn test_outcome_results_accessor() {
        let completed = WorkflowOutcome::Completed(vec![result(Phase::Research, true)]);
        assert!(completed.is_completed());
        assert_eq!(completed.results().len(), 1);

        let aborted = WorkflowOutcome::Aborted {
            at_phase: Phase::Validate,
            reason: AbortReason::Rejected,
            results: vec![result(Phase::Research, true), result(Phase::Plan, false)],
        };
        assert!(!aborted.is_completed());
        assert_eq!(aborted.results().len(), 2);
    }

    #[test]
    fn test_abort_reason_serialization() {
        let json = serde_json::to_string(&AbortReason::ExecutionFailed("boom".into())).unwrap();
        assert!(json.contains("execution_failed"));
        let parsed: AbortReason = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, AbortReason::ExecutionFailed("boom".into()));
    }
}
