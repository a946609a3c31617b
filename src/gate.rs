//! Human checkpoint gates between phases.
//!
//! A checkpoint is a synchronous suspension point: the issuing task blocks
//! until a decision arrives, but holds no lock that could stall other tasks.
//! Exactly three raw inputs are recognized (Approve, Reject, Modify), and
//! Modify degrades deterministically to Reject: there is no remediation path,
//! and defaulting unsupported input to approval would defeat the
//! human-in-the-loop guarantee this component exists to provide.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dialoguer::{Select, theme::ColorfulTheme};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Mutex;

use crate::errors::GateError;
use crate::phase::Phase;

/// The two decisions a checkpoint can store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Reject,
}

/// Record of one checkpoint decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointDecision {
    pub phase: Phase,
    pub decision: Decision,
    /// What the human actually entered ("approve", "reject", "modify").
    pub raw_input: String,
    pub timestamp: DateTime<Utc>,
}

impl CheckpointDecision {
    /// Map raw human input to a stored decision.
    ///
    /// "approve" approves; "reject" and "modify" reject; unrecognized input
    /// also rejects.
    pub fn from_raw(phase: Phase, raw: &str) -> Self {
        let decision = match raw.trim().to_ascii_lowercase().as_str() {
            "approve" => Decision::Approve,
            _ => Decision::Reject,
        };
        Self {
            phase,
            decision,
            raw_input: raw.to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn is_approved(&self) -> bool {
        self.decision == Decision::Approve
    }
}

/// The structured payload presented to the human at a checkpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckpointPayload {
    /// The agent's one-line account of the phase.
    pub headline: String,
    /// The firewall summary: the only phase output shown here, and the only
    /// text that will cross into the next phase.
    pub summary: String,
    /// Metrics declared by the phase agent.
    pub metrics: HashMap<String, serde_json::Value>,
    /// Location of the archived full artifact.
    pub artifact_ref: PathBuf,
    /// Quality/test gate findings from inside the phase. Not auto-fatal;
    /// the human decides whether to proceed.
    pub validation_failures: Vec<String>,
}

/// Port through which the coordinator asks for a human decision.
///
/// Implementations may be an interactive terminal, a scripted harness, or a
/// remote approval service; the core does not care.
#[async_trait]
pub trait CheckpointGate: Send + Sync {
    async fn approve(
        &self,
        phase: Phase,
        payload: &CheckpointPayload,
    ) -> Result<CheckpointDecision, GateError>;
}

/// Interactive terminal gate using a select prompt.
pub struct ConsoleGate;

const GATE_OPTIONS: &[&str] = &[
    "Approve - continue to the next phase",
    "Reject - abort the workflow here",
    "Modify - request changes (treated as reject)",
];

const GATE_RAW_INPUTS: &[&str] = &["approve", "reject", "modify"];

impl ConsoleGate {
    fn render(phase: Phase, payload: &CheckpointPayload) {
        println!();
        println!(
            "{} {}",
            console::style(format!("[{phase}]")).cyan().bold(),
            console::style(&payload.headline).bold()
        );
        println!("{}", payload.summary);
        if !payload.metrics.is_empty() {
            let mut keys: Vec<_> = payload.metrics.keys().collect();
            keys.sort();
            for key in keys {
                println!(
                    "  {} {}",
                    console::style(format!("{key}:")).dim(),
                    payload.metrics[key]
                );
            }
        }
        for failure in &payload.validation_failures {
            println!("  {} {}", console::style("validation:").yellow(), failure);
        }
        println!(
            "  {} {}",
            console::style("artifact:").dim(),
            payload.artifact_ref.display()
        );
    }
}

#[async_trait]
impl CheckpointGate for ConsoleGate {
    async fn approve(
        &self,
        phase: Phase,
        payload: &CheckpointPayload,
    ) -> Result<CheckpointDecision, GateError> {
        Self::render(phase, payload);

        // The prompt blocks on stdin; run it off the async runtime so a
        // pending checkpoint never stalls other tasks' phases.
        let selection = tokio::task::spawn_blocking(move || {
            Select::with_theme(&ColorfulTheme::default())
                .with_prompt("Checkpoint decision")
                .items(GATE_OPTIONS)
                .default(0)
                .interact()
        })
        .await
        .map_err(|e| GateError::Prompt(e.to_string()))?
        .map_err(|e| GateError::Prompt(e.to_string()))?;

        let raw = GATE_RAW_INPUTS.get(selection).copied().unwrap_or("reject");
        Ok(CheckpointDecision::from_raw(phase, raw))
    }
}

/// Deterministic gate that replays a fixed sequence of raw inputs.
///
/// Used by the scripted harness (`--scripted`) and the test suite; each call
/// consumes the next entry.
pub struct ScriptedGate {
    script: Mutex<VecDeque<String>>,
}

impl ScriptedGate {
    pub fn new(raw_inputs: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            script: Mutex::new(raw_inputs.into_iter().map(Into::into).collect()),
        }
    }

    /// A gate that approves every checkpoint.
    pub fn approve_all() -> Self {
        Self::new(std::iter::repeat_n("approve", Phase::ALL.len()))
    }
}

#[async_trait]
impl CheckpointGate for ScriptedGate {
    async fn approve(
        &self,
        phase: Phase,
        _payload: &CheckpointPayload,
    ) -> Result<CheckpointDecision, GateError> {
        let raw = self
            .script
            .lock()
            .map_err(|_| GateError::Prompt("script lock poisoned".into()))?
            .pop_front()
            .ok_or_else(|| GateError::ScriptExhausted(phase.name().to_string()))?;
        Ok(CheckpointDecision::from_raw(phase, &raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_raw_approve() {
        let d = CheckpointDecision::from_raw(Phase::Research, "approve");
        assert_eq!(d.decision, Decision::Approve);
        assert!(d.is_approved());
        assert_eq!(d.raw_input, "approve");
    }

    #[test]
    fn test_from_raw_reject() {
        let d = CheckpointDecision::from_raw(Phase::Plan, "reject");
        assert_eq!(d.decision, Decision::Reject);
    }

    #[test]
    fn test_from_raw_modify_degrades_to_reject() {
        let d = CheckpointDecision::from_raw(Phase::Validate, "modify");
        assert_eq!(d.decision, Decision::Reject);
        // The raw input is preserved even though the stored decision is Reject.
        assert_eq!(d.raw_input, "modify");
    }

    #[test]
    fn test_from_raw_unrecognized_degrades_to_reject() {
        for raw in ["", "yes", "ship it", "APPROVE LATER"] {
            let d = CheckpointDecision::from_raw(Phase::Implement, raw);
            assert_eq!(d.decision, Decision::Reject, "raw input {raw:?}");
        }
    }

    #[test]
    fn test_from_raw_is_case_insensitive_for_approve() {
        let d = CheckpointDecision::from_raw(Phase::Research, " Approve ");
        assert!(d.is_approved());
    }

    #[tokio::test]
    async fn test_scripted_gate_replays_in_order() {
        let gate = ScriptedGate::new(["approve", "modify"]);
        let payload = CheckpointPayload::default();

        let first = gate.approve(Phase::Research, &payload).await.unwrap();
        assert!(first.is_approved());

        let second = gate.approve(Phase::Plan, &payload).await.unwrap();
        assert_eq!(second.decision, Decision::Reject);
        assert_eq!(second.raw_input, "modify");
    }

    #[tokio::test]
    async fn test_scripted_gate_exhaustion_is_an_error() {
        let gate = ScriptedGate::new(Vec::<String>::new());
        let payload = CheckpointPayload::default();
        let err = gate.approve(Phase::Research, &payload).await.unwrap_err();
        assert!(matches!(err, GateError::ScriptExhausted(_)));
    }

    #[tokio::test]
    async fn test_approve_all_covers_every_phase() {
        let gate = ScriptedGate::approve_all();
        let payload = CheckpointPayload::default();
        for phase in Phase::ALL {
            assert!(gate.approve(phase, &payload).await.unwrap().is_approved());
        }
    }
}
