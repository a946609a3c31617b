//! Issue-tracker collaborator: the narrow interface the coordinator uses to
//! record phase lifecycle, plus the GitHub-backed and in-memory
//! implementations.
//!
//! The core never shells out to a tracker CLI; everything goes through
//! `IssueTracker`, and credentials arrive via the configuration object.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::errors::TrackerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueState {
    Open,
    Closed,
}

/// A tracked work item (subset of fields the coordinator cares about).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub id: u64,
    pub title: String,
    pub body: String,
    pub labels: Vec<String>,
    pub state: IssueState,
}

/// Narrow collaborator interface over the issue tracker.
#[async_trait]
pub trait IssueTracker: Send + Sync {
    async fn create_issue(
        &self,
        title: &str,
        body: &str,
        labels: &[String],
    ) -> Result<u64, TrackerError>;
    async fn get_issue(&self, id: u64) -> Result<Issue, TrackerError>;
    async fn comment_issue(&self, id: u64, text: &str) -> Result<(), TrackerError>;
    async fn close_issue(&self, id: u64) -> Result<(), TrackerError>;
    async fn list_issues(&self, labels: &[String]) -> Result<Vec<Issue>, TrackerError>;
}

const GITHUB_API_URL: &str = "https://api.github.com";

/// GitHub REST implementation of `IssueTracker`.
pub struct GitHubIssues {
    client: reqwest::Client,
    api_url: String,
    /// `owner/repo` slug.
    repo_slug: String,
    token: String,
}

/// GitHub issue payload (subset of fields).
#[derive(Debug, Deserialize)]
struct IssuePayload {
    number: u64,
    title: String,
    body: Option<String>,
    #[serde(default)]
    labels: Vec<LabelPayload>,
    state: String,
    /// Pull requests also come through the issues endpoint; filter them out.
    pull_request: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct LabelPayload {
    name: String,
}

impl From<IssuePayload> for Issue {
    fn from(payload: IssuePayload) -> Self {
        Issue {
            id: payload.number,
            title: payload.title,
            body: payload.body.unwrap_or_default(),
            labels: payload.labels.into_iter().map(|l| l.name).collect(),
            state: if payload.state == "closed" {
                IssueState::Closed
            } else {
                IssueState::Open
            },
        }
    }
}

impl GitHubIssues {
    pub fn new(repo_slug: impl Into<String>, token: impl Into<String>) -> Self {
        Self::with_api_url(GITHUB_API_URL, repo_slug, token)
    }

    /// Point the client at a non-default API root (GitHub Enterprise, tests).
    pub fn with_api_url(
        api_url: impl Into<String>,
        repo_slug: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: api_url.into(),
            repo_slug: repo_slug.into(),
            token: token.into(),
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.api_url, path))
            .header("Accept", "application/vnd.github+json")
            .header("Authorization", format!("Bearer {}", self.token))
            .header("User-Agent", "cadence")
    }

    async fn send(
        &self,
        builder: reqwest::RequestBuilder,
        issue_id: Option<u64>,
    ) -> Result<reqwest::Response, TrackerError> {
        let resp = builder
            .send()
            .await
            .map_err(|e| TrackerError::Request(e.to_string()))?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND
            && let Some(id) = issue_id
        {
            return Err(TrackerError::IssueNotFound(id));
        }
        resp.error_for_status()
            .map_err(|e| TrackerError::Request(e.to_string()))
    }
}

#[async_trait]
impl IssueTracker for GitHubIssues {
    async fn create_issue(
        &self,
        title: &str,
        body: &str,
        labels: &[String],
    ) -> Result<u64, TrackerError> {
        let builder = self
            .request(
                reqwest::Method::POST,
                &format!("/repos/{}/issues", self.repo_slug),
            )
            .json(&json!({ "title": title, "body": body, "labels": labels }));
        let payload: IssuePayload = self
            .send(builder, None)
            .await?
            .json()
            .await
            .map_err(|e| TrackerError::BadPayload(e.to_string()))?;
        Ok(payload.number)
    }

    async fn get_issue(&self, id: u64) -> Result<Issue, TrackerError> {
        let builder = self.request(
            reqwest::Method::GET,
            &format!("/repos/{}/issues/{}", self.repo_slug, id),
        );
        let payload: IssuePayload = self
            .send(builder, Some(id))
            .await?
            .json()
            .await
            .map_err(|e| TrackerError::BadPayload(e.to_string()))?;
        Ok(payload.into())
    }

    async fn comment_issue(&self, id: u64, text: &str) -> Result<(), TrackerError> {
        let builder = self
            .request(
                reqwest::Method::POST,
                &format!("/repos/{}/issues/{}/comments", self.repo_slug, id),
            )
            .json(&json!({ "body": text }));
        self.send(builder, Some(id)).await?;
        Ok(())
    }

    async fn close_issue(&self, id: u64) -> Result<(), TrackerError> {
        let builder = self
            .request(
                reqwest::Method::PATCH,
                &format!("/repos/{}/issues/{}", self.repo_slug, id),
            )
            .json(&json!({ "state": "closed" }));
        self.send(builder, Some(id)).await?;
        Ok(())
    }

    async fn list_issues(&self, labels: &[String]) -> Result<Vec<Issue>, TrackerError> {
        let builder = self
            .request(
                reqwest::Method::GET,
                &format!("/repos/{}/issues", self.repo_slug),
            )
            .query(&[("labels", labels.join(",")), ("state", "all".to_string())]);
        let payloads: Vec<IssuePayload> = self
            .send(builder, None)
            .await?
            .json()
            .await
            .map_err(|e| TrackerError::BadPayload(e.to_string()))?;
        Ok(payloads
            .into_iter()
            .filter(|p| p.pull_request.is_none())
            .map(Issue::from)
            .collect())
    }
}

/// In-memory tracker: the offline default and the test suite's double.
#[derive(Default)]
pub struct InMemoryIssues {
    next_id: AtomicU64,
    issues: Mutex<HashMap<u64, Issue>>,
    comments: Mutex<HashMap<u64, Vec<String>>>,
}

impl InMemoryIssues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Comments recorded against an issue, for assertions and status display.
    pub fn comments(&self, id: u64) -> Vec<String> {
        self.comments
            .lock()
            .map(|c| c.get(&id).cloned().unwrap_or_default())
            .unwrap_or_default()
    }
}

#[async_trait]
impl IssueTracker for InMemoryIssues {
    async fn create_issue(
        &self,
        title: &str,
        body: &str,
        labels: &[String],
    ) -> Result<u64, TrackerError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let issue = Issue {
            id,
            title: title.to_string(),
            body: body.to_string(),
            labels: labels.to_vec(),
            state: IssueState::Open,
        };
        self.issues
            .lock()
            .map_err(|_| TrackerError::Request("issue table poisoned".into()))?
            .insert(id, issue);
        Ok(id)
    }

    async fn get_issue(&self, id: u64) -> Result<Issue, TrackerError> {
        self.issues
            .lock()
            .map_err(|_| TrackerError::Request("issue table poisoned".into()))?
            .get(&id)
            .cloned()
            .ok_or(TrackerError::IssueNotFound(id))
    }

    async fn comment_issue(&self, id: u64, text: &str) -> Result<(), TrackerError> {
        // Commenting a nonexistent issue is a contract violation, same as GitHub.
        self.get_issue(id).await?;
        self.comments
            .lock()
            .map_err(|_| TrackerError::Request("comment table poisoned".into()))?
            .entry(id)
            .or_default()
            .push(text.to_string());
        Ok(())
    }

    async fn close_issue(&self, id: u64) -> Result<(), TrackerError> {
        let mut issues = self
            .issues
            .lock()
            .map_err(|_| TrackerError::Request("issue table poisoned".into()))?;
        let issue = issues.get_mut(&id).ok_or(TrackerError::IssueNotFound(id))?;
        issue.state = IssueState::Closed;
        Ok(())
    }

    async fn list_issues(&self, labels: &[String]) -> Result<Vec<Issue>, TrackerError> {
        let issues = self
            .issues
            .lock()
            .map_err(|_| TrackerError::Request("issue table poisoned".into()))?;
        let mut matched: Vec<Issue> = issues
            .values()
            .filter(|issue| labels.iter().all(|l| issue.labels.contains(l)))
            .cloned()
            .collect();
        matched.sort_by_key(|issue| issue.id);
        Ok(matched)
    }
}

/// Persistence format for work items migrated from an external tracker.
/// Written and read by one-off migration scripts; the core only defines the
/// shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationRecord {
    pub migrated_at: DateTime<Utc>,
    pub source: String,
    pub project_id: String,
    pub github_issue: u64,
    pub status: String,
}

impl MigrationRecord {
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .context("Failed to serialize migration record")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write migration record {}", path.display()))?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read migration record {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse migration record {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_in_memory_create_and_get() {
        let tracker = InMemoryIssues::new();
        let id = tracker
            .create_issue("Task: add login", "body", &["cadence-run".to_string()])
            .await
            .unwrap();
        let issue = tracker.get_issue(id).await.unwrap();
        assert_eq!(issue.title, "Task: add login");
        assert_eq!(issue.state, IssueState::Open);
        assert_eq!(issue.labels, vec!["cadence-run"]);
    }

    #[tokio::test]
    async fn test_in_memory_comment_and_close() {
        let tracker = InMemoryIssues::new();
        let id = tracker.create_issue("t", "b", &[]).await.unwrap();
        tracker.comment_issue(id, "research approved").await.unwrap();
        tracker.comment_issue(id, "plan approved").await.unwrap();
        tracker.close_issue(id).await.unwrap();

        assert_eq!(
            tracker.comments(id),
            vec!["research approved", "plan approved"]
        );
        assert_eq!(tracker.get_issue(id).await.unwrap().state, IssueState::Closed);
    }

    #[tokio::test]
    async fn test_in_memory_missing_issue_errors() {
        let tracker = InMemoryIssues::new();
        assert!(matches!(
            tracker.get_issue(99).await,
            Err(TrackerError::IssueNotFound(99))
        ));
        assert!(matches!(
            tracker.comment_issue(99, "x").await,
            Err(TrackerError::IssueNotFound(99))
        ));
    }

    #[tokio::test]
    async fn test_in_memory_list_filters_by_labels() {
        let tracker = InMemoryIssues::new();
        tracker
            .create_issue("a", "", &["cadence-run".to_string()])
            .await
            .unwrap();
        tracker.create_issue("b", "", &[]).await.unwrap();

        let matched = tracker
            .list_issues(&["cadence-run".to_string()])
            .await
            .unwrap();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].title, "a");

        let all = tracker.list_issues(&[]).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn test_issue_payload_maps_to_issue() {
        let json = r#"{
            "number": 7,
            "title": "Task: add login",
            "body": null,
            "labels": [{"name": "cadence-run"}],
            "state": "closed"
        }"#;
        let payload: IssuePayload = serde_json::from_str(json).unwrap();
        let issue: Issue = payload.into();
        assert_eq!(issue.id, 7);
        assert_eq!(issue.body, "");
        assert_eq!(issue.labels, vec!["cadence-run"]);
        assert_eq!(issue.state, IssueState::Closed);
    }

    #[test]
    fn test_migration_record_roundtrip_uses_camel_case() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("record.json");
        let record = MigrationRecord {
            migrated_at: Utc::now(),
            source: "legacy-tracker".to_string(),
            project_id: "proj-42".to_string(),
            github_issue: 7,
            status: "migrated".to_string(),
        };
        record.save(&path).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("migratedAt"));
        assert!(raw.contains("projectId"));
        assert!(raw.contains("githubIssue"));

        let loaded = MigrationRecord::load(&path).unwrap();
        assert_eq!(loaded, record);
    }
}
