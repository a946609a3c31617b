//! The sequential phase state machine.
//!
//! Drives one task through research, plan, implement, validate, and
//! integrate. Each phase consumes only the previous phase's approved
//! firewall summary, never the full artifact, and nothing advances past a
//! checkpoint that did not approve. There is no retry anywhere: an agent
//! failure, tracker failure, workspace conflict, or rejection terminates the
//! run with everything produced so far preserved.

use anyhow::Result;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;

use crate::agent::AgentRunner;
use crate::audit::{AuditLogger, PhaseAuditEntry, RunAudit, RunOutcome};
use crate::firewall::ContextFirewall;
use crate::gate::{CheckpointGate, CheckpointPayload};
use crate::issues::IssueTracker;
use crate::phase::{AbortReason, Phase, PhaseResult, Task, WorkflowOutcome};
use crate::ui::WorkflowUI;
use crate::workspace::{MergeOutcome, Workspace, WorkspacePool};

/// Label attached to every tracker issue created for a run.
pub const RUN_LABEL: &str = "cadence-run";

pub struct PhaseStateMachine {
    agent: Arc<dyn AgentRunner>,
    gate: Arc<dyn CheckpointGate>,
    tracker: Arc<dyn IssueTracker>,
    firewall: ContextFirewall,
    pool: Arc<WorkspacePool>,
    audit: AuditLogger,
    ui: Option<Arc<WorkflowUI>>,
}

impl PhaseStateMachine {
    pub fn new(
        agent: Arc<dyn AgentRunner>,
        gate: Arc<dyn CheckpointGate>,
        tracker: Arc<dyn IssueTracker>,
        firewall: ContextFirewall,
        pool: Arc<WorkspacePool>,
        audit: AuditLogger,
    ) -> Self {
        Self {
            agent,
            gate,
            tracker,
            firewall,
            pool,
            audit,
            ui: None,
        }
    }

    pub fn with_ui(mut self, ui: Arc<WorkflowUI>) -> Self {
        self.ui = Some(ui);
        self
    }

    /// Drive `task` through all five phases.
    ///
    /// Collaborator failures and rejections come back as
    /// `WorkflowOutcome::Aborted`; an `Err` is reserved for the
    /// coordinator's own infrastructure (archive or audit I/O, a broken
    /// gate prompt).
    pub async fn run(&self, task: &Task) -> Result<WorkflowOutcome> {
        let mut run_audit = RunAudit::new(task);
        let mut results: Vec<PhaseResult> = Vec::new();
        let mut previous_summary = String::new();
        let mut workspace: Option<Workspace> = None;

        tracing::info!(task = %task.id, "workflow run started");

        let issue_id = match self
            .tracker
            .create_issue(
                &format!("Task: {}", task.description),
                &task.description,
                &[RUN_LABEL.to_string()],
            )
            .await
        {
            Ok(id) => {
                run_audit.issue_id = Some(id);
                id
            }
            Err(e) => {
                return self.abort(
                    run_audit,
                    results,
                    Phase::Research,
                    AbortReason::ExternalToolFailed(e.to_string()),
                );
            }
        };

        for phase in Phase::ALL {
            let started_at = Utc::now();
            if let Some(ui) = &self.ui {
                ui.start_phase(phase);
            }

            // Implement and Validate run inside the task's exclusive
            // workspace; it is acquired once, before the implement agent
            // executes, and merged only during Integrate.
            if phase.needs_workspace() && workspace.is_none() {
                match self.pool.create(&task.branch_name()) {
                    Ok(ws) => workspace = Some(ws),
                    Err(e) => {
                        return self.abort(
                            run_audit,
                            results,
                            phase,
                            AbortReason::ExternalToolFailed(e.to_string()),
                        );
                    }
                }
            }

            // The phase input is the task description plus the previous
            // phase's approved summary only. This is the deliberate
            // bottleneck that keeps per-phase context bounded no matter how
            // large any single phase's output becomes.
            let output = match self.agent.execute(&task.description, &previous_summary).await {
                Ok(output) => output,
                Err(e) => {
                    tracing::error!(phase = %phase, error = %e, "agent execution failed");
                    run_audit.record_phase(PhaseAuditEntry {
                        phase,
                        agent_name: phase.agent_name().to_string(),
                        started_at,
                        ended_at: Utc::now(),
                        decision: None,
                        raw_input: None,
                        artifact_ref: None,
                        summary_chars: 0,
                    });
                    return self.abort(
                        run_audit,
                        results,
                        phase,
                        AbortReason::ExecutionFailed(e.to_string()),
                    );
                }
            };

            let artifact = self
                .firewall
                .archive(phase.agent_name(), phase, &output.full_artifact)?;

            let payload = CheckpointPayload {
                headline: output.summary_text.clone(),
                summary: artifact.summary_text.clone(),
                metrics: output.metrics.clone(),
                artifact_ref: artifact.full_content_location.clone(),
                validation_failures: extract_validation_failures(&output.metrics),
            };
            let decision = self.gate.approve(phase, &payload).await?;
            let approved = decision.is_approved();

            if let Some(ui) = &self.ui {
                ui.phase_decided(phase, approved);
            }

            results.push(PhaseResult {
                phase,
                summary_text: artifact.summary_text.clone(),
                full_artifact_ref: artifact.full_content_location.clone(),
                metrics: output.metrics,
                approved,
            });

            run_audit.record_phase(PhaseAuditEntry {
                phase,
                agent_name: phase.agent_name().to_string(),
                started_at,
                ended_at: Utc::now(),
                decision: Some(decision.decision),
                raw_input: Some(decision.raw_input.clone()),
                artifact_ref: Some(artifact.full_content_location.clone()),
                summary_chars: artifact.summary_text.len(),
            });

            let comment = format!(
                "**{}** {}: {}\nartifact: {}",
                phase.name(),
                if approved { "approved" } else { "rejected" },
                payload.headline,
                artifact.full_content_location.display()
            );
            if let Err(e) = self.tracker.comment_issue(issue_id, &comment).await {
                return self.abort(
                    run_audit,
                    results,
                    phase,
                    AbortReason::ExternalToolFailed(e.to_string()),
                );
            }

            if !approved {
                tracing::info!(phase = %phase, "checkpoint rejected; aborting run");
                return self.abort(run_audit, results, phase, AbortReason::Rejected);
            }

            previous_summary = artifact.summary_text;

            if phase == Phase::Integrate
                && let Some(ws) = workspace.take()
            {
                match self.pool.merge(&ws.branch_name) {
                    Ok(MergeOutcome::Merged(_)) => {}
                    Ok(MergeOutcome::Conflict(_)) => {
                        return self.abort(run_audit, results, phase, AbortReason::MergeConflict);
                    }
                    Err(e) => {
                        return self.abort(
                            run_audit,
                            results,
                            phase,
                            AbortReason::ExternalToolFailed(e.to_string()),
                        );
                    }
                }
            }
        }

        if let Err(e) = self.tracker.close_issue(issue_id).await {
            return self.abort(
                run_audit,
                results,
                Phase::Integrate,
                AbortReason::ExternalToolFailed(e.to_string()),
            );
        }

        if let Some(ui) = &self.ui {
            ui.finish(true);
        }
        run_audit.finish(RunOutcome::Completed);
        self.audit.write(&run_audit)?;
        tracing::info!(task = %task.id, "workflow run completed");
        Ok(WorkflowOutcome::Completed(results))
    }

    fn abort(
        &self,
        mut run_audit: RunAudit,
        results: Vec<PhaseResult>,
        at_phase: Phase,
        reason: AbortReason,
    ) -> Result<WorkflowOutcome> {
        if let Some(ui) = &self.ui {
            ui.finish(false);
        }
        run_audit.finish(RunOutcome::Aborted {
            at_phase,
            reason: reason.clone(),
        });
        self.audit.write(&run_audit)?;
        tracing::warn!(phase = %at_phase, reason = ?reason, "workflow run aborted");
        Ok(WorkflowOutcome::Aborted {
            at_phase,
            reason,
            results,
        })
    }
}

/// Quality-gate findings the agent declared. Surfaced in the checkpoint
/// payload for the human to weigh; never auto-fatal.
fn extract_validation_failures(
    metrics: &HashMap<String, serde_json::Value>,
) -> Vec<String> {
    metrics
        .get("validation_failures")
        .and_then(|value| value.as_array())
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| entry.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}
