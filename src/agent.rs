//! Phase agent capability interface and the subprocess-backed default.
//!
//! The coordinator never reasons about code itself; it hands the phase
//! prompt to an `AgentRunner` and treats the call as atomic and
//! non-cancellable. Execution errors are fatal for the current run; no
//! retry lives here.

use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::process::Stdio;
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::errors::AgentError;

/// What a phase agent hands back to the coordinator.
#[derive(Debug, Clone)]
pub struct AgentOutput {
    /// One-line account of what the agent did, shown in the checkpoint
    /// payload headline. Never crosses a phase boundary on its own.
    pub summary_text: String,
    /// The full phase artifact, archived by the context firewall.
    pub full_artifact: String,
    /// Metrics declared by the agent (durations, sizes, gate results).
    pub metrics: HashMap<String, serde_json::Value>,
}

/// Capability interface for the external agent that performs phase work.
#[async_trait]
pub trait AgentRunner: Send + Sync {
    async fn execute(
        &self,
        task_description: &str,
        context_summary: &str,
    ) -> Result<AgentOutput, AgentError>;
}

/// Runs a configured command per phase, feeding the prompt on stdin and
/// capturing stdout as the full artifact.
pub struct CommandAgent {
    program: String,
    args: Vec<String>,
}

impl CommandAgent {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    fn build_prompt(task_description: &str, context_summary: &str) -> String {
        let mut prompt = format!("## TASK\n{task_description}\n");
        if !context_summary.is_empty() {
            prompt.push_str(&format!(
                "\n## CONTEXT FROM PREVIOUS PHASE\n{context_summary}\n"
            ));
        }
        prompt
    }
}

#[async_trait]
impl AgentRunner for CommandAgent {
    async fn execute(
        &self,
        task_description: &str,
        context_summary: &str,
    ) -> Result<AgentOutput, AgentError> {
        let prompt = Self::build_prompt(task_description, context_summary);
        let start = Instant::now();

        tracing::debug!(command = %self.program, prompt_chars = prompt.len(), "spawning agent");

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| AgentError::SpawnFailed {
                command: self.program.clone(),
                source,
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(prompt.as_bytes()).await?;
            stdin.shutdown().await?;
        }

        let output = child.wait_with_output().await?;
        let duration = start.elapsed();

        if !output.status.success() {
            return Err(AgentError::NonZeroExit {
                exit_code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }

        let full_artifact = String::from_utf8_lossy(&output.stdout).to_string();
        let summary_text = full_artifact
            .lines()
            .find(|line| !line.trim().is_empty())
            .unwrap_or("(agent produced no output)")
            .trim()
            .to_string();

        let mut metrics = HashMap::new();
        metrics.insert(
            "duration_secs".to_string(),
            json!(duration.as_secs_f64()),
        );
        metrics.insert("output_chars".to_string(), json!(full_artifact.len()));

        Ok(AgentOutput {
            summary_text,
            full_artifact,
            metrics,
        })
    }
}
