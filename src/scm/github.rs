//! GitHub client (provider kind A).
//!
//! Inline comments are anchored by *diff position*: the 1-based index of
//! the target line within the file's unified-diff text, counting each
//! hunk header and hunk line. Reads use the REST API with the diff media
//! type for the raw diff.

use std::collections::HashSet;

use async_trait::async_trait;
use serde::Deserialize;

use crate::models::ProviderKind;

use super::publish::{extract_marker_tags, InlineComment};
use super::{with_read_retries, ChangeRequestMeta, ScmClient, ScmError};

/// Default API root.
const DEFAULT_BASE_URL: &str = "https://api.github.com";

/// GitHub REST client.
pub struct GitHubClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct PullResponse {
    title: String,
    body: Option<String>,
    base: RefResponse,
    head: RefResponse,
}

#[derive(Debug, Deserialize)]
struct RefResponse {
    #[serde(rename = "ref", default)]
    ref_name: String,
    sha: String,
}

#[derive(Debug, Deserialize)]
struct CommentResponse {
    body: Option<String>,
}

impl GitHubClient {
    pub fn new(base_url: Option<&str>, token: impl Into<String>) -> Result<Self, ScmError> {
        let token = token.into();
        if token.is_empty() {
            return Err(ScmError::NotConfigured(
                "no GitHub token set".to_string(),
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

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn request(&self, method: reqwest::Method, url: String, accept: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, url)
            .bearer_auth(&self.token)
            .header(reqwest::header::ACCEPT, accept)
            .header(reqwest::header::USER_AGENT, crate::constants::APP_NAME)
    }

    async fn check(&self, response: reqwest::Response) -> Result<reqwest::Response, ScmError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(ScmError::from_status(
            ProviderKind::GitHub,
            status.as_u16(),
            message,
        ))
    }

    fn transport(&self, e: reqwest::Error) -> ScmError {
        ScmError::Transport {
            provider: ProviderKind::GitHub,
            source: e,
        }
    }
}

#[async_trait]
impl ScmClient for GitHubClient {
    fn provider(&self) -> ProviderKind {
        ProviderKind::GitHub
    }

    async fn fetch_diff(
        &self,
        repo: &str,
        number: u64,
        _context_lines: u32,
    ) -> Result<String, ScmError> {
        // GitHub serves the diff with its default context; the parameter
        // is advisory only.
        let url = self.url(&format!("/repos/{repo}/pulls/{number}"));
        with_read_retries("github.fetch_diff", || {
            let url = url.clone();
            async move {
                let response = self
                    .request(
                        reqwest::Method::GET,
                        url,
                        "application/vnd.github.v3.diff",
                    )
                    .send()
                    .await
                    .map_err(|e| self.transport(e))?;
                self.check(response)
                    .await?
                    .text()
                    .await
                    .map_err(|e| self.transport(e))
            }
        })
        .await
    }

    async fn fetch_metadata(&self, repo: &str, number: u64) -> Result<ChangeRequestMeta, ScmError> {
        let url = self.url(&format!("/repos/{repo}/pulls/{number}"));
        let pull: PullResponse = with_read_retries("github.fetch_metadata", || {
            let url = url.clone();
            async move {
                let response = self
                    .request(reqwest::Method::GET, url, "application/vnd.github+json")
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
            title: pull.title,
            description: pull.body.unwrap_or_default(),
            base_branch: pull.base.ref_name,
            head_sha: pull.head.sha,
            base_sha: Some(pull.base.sha),
            start_sha: None,
        })
    }

    async fn list_marker_tags(&self, repo: &str, number: u64) -> Result<HashSet<String>, ScmError> {
        // Inline comments live on the pull, the summary on the issue.
        let urls = [
            self.url(&format!(
                "/repos/{repo}/pulls/{number}/comments?per_page=100"
            )),
            self.url(&format!(
                "/repos/{repo}/issues/{number}/comments?per_page=100"
            )),
        ];

        let mut tags = HashSet::new();
        for url in urls {
            let comments: Vec<CommentResponse> =
                with_read_retries("github.list_marker_tags", || {
                    let url = url.clone();
                    async move {
                        let response = self
                            .request(reqwest::Method::GET, url, "application/vnd.github+json")
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

            for comment in comments {
                if let Some(body) = comment.body {
                    tags.extend(extract_marker_tags(&body));
                }
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
        let Some(position) = comment.position else {
            return Err(ScmError::Payload {
                provider: ProviderKind::GitHub,
                message: format!(
                    "no diff position for {}:{}",
                    comment.file, comment.line
                ),
            });
        };

        let url = self.url(&format!("/repos/{repo}/pulls/{number}/comments"));
        let payload = inline_comment_payload(meta, comment, position);
        let response = self
            .request(reqwest::Method::POST, url, "application/vnd.github+json")
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
        let url = self.url(&format!("/repos/{repo}/issues/{number}/comments"));
        let response = self
            .request(reqwest::Method::POST, url, "application/vnd.github+json")
            .json(&serde_json::json!({ "body": body }))
            .send()
            .await
            .map_err(|e| self.transport(e))?;
        self.check(response).await.map(|_| ())
    }
}

/// Build the review-comment payload for the position-based API.
fn inline_comment_payload(
    meta: &ChangeRequestMeta,
    comment: &InlineComment,
    position: u32,
) -> serde_json::Value {
    serde_json::json!({
        "body": comment.body,
        "commit_id": meta.head_sha,
        "path": comment.file,
        "position": position,
    })
}
