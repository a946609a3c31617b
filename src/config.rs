//! Runtime configuration for cadence.
//!
//! One `Config` value is constructed in `main` and passed into every
//! collaborator; credentials live here, never in process-wide state.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Optional on-disk settings, read from `<project>/cadence.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CadenceToml {
    /// Character budget for firewall summaries.
    pub summary_budget: Option<usize>,
    /// Branch workspaces are merged into (defaults to `main`).
    pub integration_branch: Option<String>,
    /// Command executed per phase.
    pub agent_command: Option<String>,
    pub agent_args: Vec<String>,
    /// `owner/repo` slug enabling the GitHub issue tracker.
    pub github_repo: Option<String>,
}

impl CadenceToml {
    /// Load `cadence.toml` from the project directory, or defaults when the
    /// file does not exist.
    pub fn load_or_default(project_dir: &Path) -> Result<Self> {
        let path = project_dir.join("cadence.toml");
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }
}

/// Resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    /// Where the context firewall archives full phase output.
    pub archive_dir: PathBuf,
    /// Where run audit records are written.
    pub audit_dir: PathBuf,
    /// Parent directory for exclusive workspaces.
    pub workspaces_dir: PathBuf,
    pub integration_branch: String,
    pub summary_budget: usize,
    pub agent_command: String,
    pub agent_args: Vec<String>,
    pub github_repo: Option<String>,
    pub github_token: Option<String>,
    pub verbose: bool,
}

impl Config {
    pub fn new(project_dir: PathBuf, verbose: bool) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;

        let toml = CadenceToml::load_or_default(&project_dir)?;

        let cadence_dir = project_dir.join(".cadence");
        let agent_command = toml.agent_command.unwrap_or_else(|| {
            std::env::var("CADENCE_AGENT_CMD").unwrap_or_else(|_| "claude".to_string())
        });
        let agent_args = if toml.agent_args.is_empty() {
            vec!["--print".to_string()]
        } else {
            toml.agent_args
        };

        Ok(Self {
            archive_dir: cadence_dir.join("artifacts"),
            audit_dir: cadence_dir.join("audit"),
            workspaces_dir: cadence_dir.join("workspaces"),
            project_dir,
            integration_branch: toml
                .integration_branch
                .unwrap_or_else(|| "main".to_string()),
            summary_budget: toml
                .summary_budget
                .unwrap_or(crate::firewall::DEFAULT_SUMMARY_BUDGET),
            agent_command,
            agent_args,
            github_repo: toml.github_repo,
            github_token: std::env::var("GITHUB_TOKEN").ok(),
            verbose,
        })
    }

    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.archive_dir)
            .context("Failed to create artifacts directory")?;
        std::fs::create_dir_all(&self.audit_dir).context("Failed to create audit directory")?;
        std::fs::create_dir_all(&self.workspaces_dir)
            .context("Failed to create workspaces directory")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_config_defaults_without_toml() {
        let dir = tempdir().unwrap();
        let config = Config::new(dir.path().to_path_buf(), false).unwrap();
        assert_eq!(config.integration_branch, "main");
        assert_eq!(config.summary_budget, crate::firewall::DEFAULT_SUMMARY_BUDGET);
        assert!(config.github_repo.is_none());
        assert!(
            config
                .archive_dir
                .ends_with(PathBuf::from(".cadence/artifacts"))
        );
    }

    #[test]
    fn test_config_reads_cadence_toml() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("cadence.toml"),
            r#"
summary_budget = 512
integration_branch = "trunk"
agent_command = "echo"
agent_args = ["-n"]
github_repo = "acme/login"
"#,
        )
        .unwrap();

        let config = Config::new(dir.path().to_path_buf(), true).unwrap();
        assert_eq!(config.summary_budget, 512);
        assert_eq!(config.integration_branch, "trunk");
        assert_eq!(config.agent_command, "echo");
        assert_eq!(config.agent_args, vec!["-n"]);
        assert_eq!(config.github_repo.as_deref(), Some("acme/login"));
        assert!(config.verbose);
    }

    #[test]
    fn test_config_invalid_toml_is_an_error() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("cadence.toml"), "summary_budget = [nope").unwrap();
        let result = Config::new(dir.path().to_path_buf(), false);
        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Failed to parse config file")
        );
    }

    #[test]
    fn test_ensure_directories() {
        let dir = tempdir().unwrap();
        let config = Config::new(dir.path().to_path_buf(), false).unwrap();
        config.ensure_directories().unwrap();
        assert!(config.archive_dir.exists());
        assert!(config.audit_dir.exists());
        assert!(config.workspaces_dir.exists());
    }
}
