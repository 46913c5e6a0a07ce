//! GitLab client (provider kind B).
//!
//! Inline comments are posted as discussions anchored by `new_path` +
//! `new_line` plus the merge request's diff SHAs (`base_sha`, `head_sha`,
//! `start_sha`). The raw diff is assembled from the per-file `changes`
//! payload since the API does not serve one unified document.

use std::collections::HashSet;

use async_trait::async_trait;
use serde::Deserialize;

use crate::models::ProviderKind;

use super::publish::{extract_marker_tags, InlineComment};
use super::{with_read_retries, ChangeRequestMeta, ScmClient, ScmError};

/// Default API root.
const DEFAULT_BASE_URL: &str = "https://gitlab.com/api/v4";

/// GitLab REST client.
pub struct GitLabClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct MrResponse {
    title: String,
    description: Option<String>,
    target_branch: String,
    diff_refs: DiffRefs,
}

#[derive(Debug, Deserialize)]
struct DiffRefs {
    base_sha: String,
    head_sha: String,
    start_sha: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChangesResponse {
    changes: Vec<FileChange>,
}

#[derive(Debug, Deserialize)]
struct FileChange {
    old_path: String,
    new_path: String,
    diff: String,
    #[serde(default)]
    new_file: bool,
    #[serde(default)]
    deleted_file: bool,
}

#[derive(Debug, Deserialize)]
struct NoteResponse {
    body: Option<String>,
}

impl GitLabClient {
    pub fn new(base_url: Option<&str>, token: impl Into<String>) -> Result<Self, ScmError> {
        let token = token.into();
        if token.is_empty() {
            return Err(ScmError::NotConfigured(
                "no GitLab token set".to_string(),
            ));
        }
        Ok(Self {
            http: reqwest::Client::new(),
            base_url: base_url
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            token,
        })
    }

    fn mr_url(&self, repo: &str, iid: u64, suffix: &str) -> String {
        format!(
            "{}/projects/{}/merge_requests/{iid}{suffix}",
            self.base_url,
            encode_project_id(repo)
        )
    }

    fn request(&self, method: reqwest::Method, url: String) -> reqwest::RequestBuilder {
        self.http
            .request(method, url)
            .header("PRIVATE-TOKEN", &self.token)
            .header(reqwest::header::USER_AGENT, crate::constants::APP_NAME)
    }

    async fn check(&self, response: reqwest::Response) -> Result<reqwest::Response, ScmError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(ScmError::from_status(
            ProviderKind::GitLab,
            status.as_u16(),
            message,
        ))
    }

    fn transport(&self, e: reqwest::Error) -> ScmError {
        ScmError::Transport {
            provider: ProviderKind::GitLab,
            source: e,
        }
    }
}

#[async_trait]
impl ScmClient for GitLabClient {
    fn provider(&self) -> ProviderKind {
        ProviderKind::GitLab
    }

    async fn fetch_diff(
        &self,
        repo: &str,
        number: u64,
        _context_lines: u32,
    ) -> Result<String, ScmError> {
        let url = self.mr_url(repo, number, "/changes");
        let changes: ChangesResponse = with_read_retries("gitlab.fetch_diff", || {
            let url = url.clone();
            async move {
                let response = self
                    .request(reqwest::Method::GET, url)
                    .send()
                    .await
                    .map_err(|e| self.transport(e))?;
                self.check(response)
                    .await?
                    .json()
                    .await
                    .map_err(|e| self.transport(e))
            }
        })
        .await?;

        Ok(assemble_unified_diff(&changes.changes))
    }

    async fn fetch_metadata(&self, repo: &str, number: u64) -> Result<ChangeRequestMeta, ScmError> {
        let url = self.mr_url(repo, number, "");
        let mr: MrResponse = with_read_retries("gitlab.fetch_metadata", || {
            let url = url.clone();
            async move {
                let response = self
                    .request(reqwest::Method::GET, url)
                    .send()
                    .await
                    .map_err(|e| self.transport(e))?;
                self.check(response)
                    .await?
                    .json()
                    .await
                    .map_err(|e| self.transport(e))
            }
        })
        .await?;

        Ok(ChangeRequestMeta {
            title: mr.title,
            description: mr.description.unwrap_or_default(),
            base_branch: mr.target_branch,
            head_sha: mr.diff_refs.head_sha,
            base_sha: Some(mr.diff_refs.base_sha),
            start_sha: mr.diff_refs.start_sha,
        })
    }

    async fn list_marker_tags(&self, repo: &str, number: u64) -> Result<HashSet<String>, ScmError> {
        let url = self.mr_url(repo, number, "/notes?per_page=100");
        let notes: Vec<NoteResponse> = with_read_retries("gitlab.list_marker_tags", || {
            let url = url.clone();
            async move {
                let response = self
                    .request(reqwest::Method::GET, url)
                    .send()
                    .await
                    .map_err(|e| self.transport(e))?;
                self.check(response)
                    .await?
                    .json()
                    .await
                    .map_err(|e| self.transport(e))
            }
        })
        .await?;

        let mut tags = HashSet::new();
        for note in notes {
            if let Some(body) = note.body {
                tags.extend(extract_marker_tags(&body));
            }
        }
        Ok(tags)
    }

    async fn post_inline_comment(
        &self,
        repo: &str,
        number: u64,
        meta: &ChangeRequestMeta,
        comment: &InlineComment,
    ) -> Result<(), ScmError> {
        let url = self.mr_url(repo, number, "/discussions");
        let payload = discussion_payload(meta, comment);
        let response = self
            .request(reqwest::Method::POST, url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| self.transport(e))?;
        self.check(response).await.map(|_| ())
    }

    async fn post_summary_comment(
        &self,
        repo: &str,
        number: u64,
        body: &str,
    ) -> Result<(), ScmError> {
        let url = self.mr_url(repo, number, "/notes");
        let response = self
            .request(reqwest::Method::POST, url)
            .json(&serde_json::json!({ "body": body }))
            .send()
            .await
            .map_err(|e| self.transport(e))?;
        self.check(response).await.map(|_| ())
    }
}

/// Percent-encode a `group/project` path for use as a project id.
fn encode_project_id(repo: &str) -> String {
    repo.replace('/', "%2F")
}

/// Build the discussion payload for a line-anchored inline comment.
fn discussion_payload(meta: &ChangeRequestMeta, comment: &InlineComment) -> serde_json::Value {
    serde_json::json!({
        "body": comment.body,
        "position": {
            "position_type": "text",
            "base_sha": meta.base_sha.clone().unwrap_or_default(),
            "head_sha": meta.head_sha,
            "start_sha": meta.start_sha.clone().unwrap_or_default(),
            "new_path": comment.file,
            "new_line": comment.line,
        },
    })
}

/// Reassemble one unified diff document from per-file change payloads.
fn assemble_unified_diff(changes: &[FileChange]) -> String {
    let mut out = String::new();
    for change in changes {
        if change.diff.is_empty() {
            continue;
        }
        if change.new_file {
            out.push_str("--- /dev/null\n");
        } else {
            out.push_str(&format!("--- a/{}\n", change.old_path));
        }
        if change.deleted_file {
            out.push_str("+++ /dev/null\n");
        } else {
            out.push_str(&format!("+++ b/{}\n", change.new_path));
        }
        out.push_str(&change.diff);
        if !change.diff.ends_with('\n') {
            out.push('\n');
        }
    }
    out
}
