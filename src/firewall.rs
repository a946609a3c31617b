//! The context firewall: durable archival of full phase output plus a
//! bounded, deterministic summary that is the only text allowed to cross
//! into the next phase.
//!
//! The firewall exists so that per-phase context stays bounded no matter how
//! large any single phase's output becomes. Every summary carries a pointer
//! back to the archived full artifact, so nothing is lost, only fenced off.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::phase::Phase;

/// Maximum number of structured points carried into a summary.
pub const STRUCTURED_POINT_LIMIT: usize = 20;

/// Characters of raw content used when the output has no structured points.
pub const RAW_FALLBACK_CHARS: usize = 1200;

/// Appended when the summary body was hard-truncated to the budget.
pub const TRUNCATION_MARKER: &str = "\n[truncated: summary budget reached]";

/// Default summary character budget.
pub const DEFAULT_SUMMARY_BUDGET: usize = 2000;

/// Durable record of one archived phase output. Never mutated; retained for
/// the lifetime of the task run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirewallArtifact {
    pub id: Uuid,
    pub agent_name: String,
    pub phase: Phase,
    pub created_at: DateTime<Utc>,
    pub full_content_location: PathBuf,
    pub summary_text: String,
    pub summary_size_bytes: usize,
}

/// Archives full phase output and produces bounded summaries.
#[derive(Debug, Clone)]
pub struct ContextFirewall {
    archive_dir: PathBuf,
    budget: usize,
}

impl ContextFirewall {
    /// Create a firewall writing archives under `archive_dir`.
    pub fn new(archive_dir: impl Into<PathBuf>, budget: usize) -> Result<Self> {
        let archive_dir = archive_dir.into();
        fs::create_dir_all(&archive_dir).with_context(|| {
            format!("Failed to create archive directory {}", archive_dir.display())
        })?;
        Ok(Self { archive_dir, budget })
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Persist `full_content` at a timestamped location and return the
    /// artifact with its bounded summary.
    ///
    /// The location is keyed by (agent, phase, timestamp); concurrent archive
    /// calls from different tasks never collide because the store is
    /// append-only and same-millisecond keys get a numeric suffix.
    pub fn archive(
        &self,
        agent_name: &str,
        phase: Phase,
        full_content: &str,
    ) -> Result<FirewallArtifact> {
        let created_at = Utc::now();
        let stem = format!(
            "{}-{}-{}",
            agent_name,
            phase.name(),
            created_at.format("%Y%m%dT%H%M%S%3f")
        );

        let mut location = self.archive_dir.join(format!("{stem}.md"));
        let mut bump = 0u32;
        while location.exists() {
            bump += 1;
            location = self.archive_dir.join(format!("{stem}-{bump}.md"));
        }

        fs::write(&location, full_content)
            .with_context(|| format!("Failed to write artifact {}", location.display()))?;

        let summary_text = self.summarize(full_content, &location);
        tracing::debug!(
            agent = agent_name,
            phase = %phase,
            location = %location.display(),
            full_bytes = full_content.len(),
            summary_bytes = summary_text.len(),
            "archived phase output"
        );

        Ok(FirewallArtifact {
            id: Uuid::new_v4(),
            agent_name: agent_name.to_string(),
            phase,
            created_at,
            full_content_location: location,
            summary_text: summary_text.clone(),
            summary_size_bytes: summary_text.len(),
        })
    }

    /// Produce the bounded summary of `content`, ending with a pointer to
    /// `full_location`.
    ///
    /// Deterministic: identical input yields identical output. The result is
    /// at most `budget` characters plus the fixed truncation-marker and
    /// pointer-line overhead, and never loses the full-content pointer.
    pub fn summarize(&self, content: &str, full_location: &Path) -> String {
        let points: Vec<&str> = content
            .lines()
            .map(str::trim)
            .filter(|line| is_structured_point(line))
            .collect();

        let header = if content.trim().is_empty() {
            "No findings: phase output was empty.".to_string()
        } else {
            format!("{} structured point(s) found.", points.len())
        };

        let body = if points.is_empty() {
            truncate_chars(content, RAW_FALLBACK_CHARS).to_string()
        } else {
            points
                .iter()
                .take(STRUCTURED_POINT_LIMIT)
                .copied()
                .collect::<Vec<_>>()
                .join("\n")
        };

        let mut text = if body.is_empty() {
            header
        } else {
            format!("{header}\n{body}")
        };

        if text.len() > self.budget {
            let cut = truncate_chars(&text, self.budget).len();
            text.truncate(cut);
            text.push_str(TRUNCATION_MARKER);
        }

        text.push_str(&format!(
            "\nFull output archived at: {}",
            full_location.display()
        ));
        text
    }
}

/// A line that looks like a bullet or numbered list item.
fn is_structured_point(line: &str) -> bool {
    if let Some(rest) = line
        .strip_prefix("- ")
        .or_else(|| line.strip_prefix("* "))
        .or_else(|| line.strip_prefix("+ "))
    {
        return !rest.trim().is_empty();
    }
    // Numbered markers: "1. text" or "1) text"
    let digits = line.chars().take_while(char::is_ascii_digit).count();
    if digits == 0 {
        return false;
    }
    let rest = &line[digits..];
    rest.starts_with(". ") || rest.starts_with(") ")
}

/// First `max` characters of `s`, cut at a char boundary.
fn truncate_chars(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
