//! GitHub REST client for issue creation.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use triage_contract::IssueTracker;

use crate::github_transport_helpers::{
    is_retryable_github_status, is_retryable_transport_error, parse_retry_after, retry_delay,
    truncate_for_error,
};

/// Owner/name pair identifying the target repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    /// Parses `owner/name`.
    pub fn parse(value: &str) -> Result<Self> {
        let trimmed = value.trim();
        let Some((owner, name)) = trimmed.split_once('/') else {
            bail!("repository must be in owner/name format, got '{trimmed}'");
        };
        if owner.is_empty() || name.is_empty() || name.contains('/') {
            bail!("repository must be in owner/name format, got '{trimmed}'");
        }
        Ok(Self {
            owner: owner.to_string(),
            name: name.to_string(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct GithubIssueClientConfig {
    pub api_base: String,
    pub token: String,
    pub repo: RepoRef,
    pub request_timeout_ms: u64,
    pub retry_max_attempts: usize,
    pub retry_base_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
struct GithubIssueCreateResponse {
    html_url: Option<String>,
}

/// Token-authenticated GitHub issue client with bounded retries.
#[derive(Clone)]
pub struct GithubIssueClient {
    http: reqwest::Client,
    api_base: String,
    repo: RepoRef,
    retry_max_attempts: usize,
    retry_base_delay_ms: u64,
}

impl GithubIssueClient {
    pub fn new(config: GithubIssueClientConfig) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            reqwest::header::HeaderValue::from_static("triage-issue-intake"),
        );
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            "x-github-api-version",
            reqwest::header::HeaderValue::from_static("2022-11-28"),
        );
        let auth_header = format!("Bearer {}", config.token.trim());
        headers.insert(
            reqwest::header::AUTHORIZATION,
            reqwest::header::HeaderValue::from_str(&auth_header)
                .context("invalid github authorization header")?,
        );

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(config.request_timeout_ms.max(1)))
            .build()
            .context("failed to create github api client")?;
        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            repo: config.repo,
            retry_max_attempts: config.retry_max_attempts.max(1),
            retry_base_delay_ms: config.retry_base_delay_ms.max(1),
        })
    }

    async fn create_issue(&self, title: &str, body: &str, labels: &[String]) -> Result<String> {
        let url = format!(
            "{}/repos/{}/{}/issues",
            self.api_base, self.repo.owner, self.repo.name
        );
        let payload = json!({
            "title": title,
            "body": body,
            "labels": labels,
        });

        let mut attempt = 0_usize;
        loop {
            attempt = attempt.saturating_add(1);
            let response = self.http.post(&url).json(&payload).send().await;
            match response {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let parsed = response
                            .json::<GithubIssueCreateResponse>()
                            .await
                            .context("failed to decode github issue create response")?;
                        let Some(html_url) = parsed.html_url else {
                            bail!("github issue create response carried no html_url");
                        };
                        return Ok(html_url);
                    }

                    let retry_after = parse_retry_after(response.headers());
                    let response_body = response.text().await.unwrap_or_default();
                    if attempt < self.retry_max_attempts
                        && is_retryable_github_status(status.as_u16())
                    {
                        tokio::time::sleep(retry_delay(
                            self.retry_base_delay_ms,
                            attempt,
                            retry_after,
                        ))
                        .await;
                        continue;
                    }

                    bail!(
                        "github issue create failed with status {}: {}",
                        status.as_u16(),
                        truncate_for_error(&response_body, 800)
                    );
                }
                Err(error) => {
                    if attempt < self.retry_max_attempts && is_retryable_transport_error(&error) {
                        tokio::time::sleep(retry_delay(self.retry_base_delay_ms, attempt, None))
                            .await;
                        continue;
                    }
                    return Err(error).context("github issue create request failed");
                }
            }
        }
    }
}

#[async_trait]
impl IssueTracker for GithubIssueClient {
    async fn file_issue(&self, title: &str, body: &str, labels: &[String]) -> Result<String> {
        self.create_issue(title, body, labels).await
    }
}
