//! Terminal UI for interactive runs, rendered via `indicatif`.
//!
//! A single phase bar tracks progress through the five stages; headers and
//! decision lines print above it so the bar never swallows output.

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

use crate::phase::Phase;

pub struct WorkflowUI {
    phase_bar: ProgressBar,
    quiet: bool,
}

impl WorkflowUI {
    /// Create the UI. When `quiet` is set (scripted runs, tests), nothing is
    /// drawn.
    pub fn new(quiet: bool) -> Self {
        let phase_bar = if quiet {
            ProgressBar::hidden()
        } else {
            let bar = ProgressBar::new(Phase::ALL.len() as u64);
            bar.set_style(
                ProgressStyle::default_bar()
                    .template("{prefix:.bold.dim} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                    .expect("progress bar template is a valid static string")
                    .progress_chars("█▓▒░"),
            );
            bar.set_prefix("Phases");
            bar.enable_steady_tick(Duration::from_millis(120));
            bar
        };
        Self { phase_bar, quiet }
    }

    pub fn start_phase(&self, phase: Phase) {
        self.phase_bar.set_message(phase.name().to_string());
        if !self.quiet {
            self.phase_bar.println(format!(
                "{} {} phase ({})",
                style("==>").cyan().bold(),
                phase.name(),
                phase.agent_name()
            ));
        }
    }

    pub fn phase_decided(&self, phase: Phase, approved: bool) {
        if !self.quiet {
            let verdict = if approved {
                style("approved").green().to_string()
            } else {
                style("rejected").red().to_string()
            };
            self.phase_bar
                .println(format!("    {} checkpoint {}", phase.name(), verdict));
        }
        if approved {
            self.phase_bar.inc(1);
        }
    }

    pub fn finish(&self, completed: bool) {
        if completed {
            self.phase_bar.finish_with_message("completed");
        } else {
            self.phase_bar.abandon_with_message("aborted");
        }
    }
}
