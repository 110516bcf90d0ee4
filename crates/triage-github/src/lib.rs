//! GitHub issue-tracker client for Triage.
//!
//! Files issues over the REST v3 API with token auth and bounded retries.
//! Implements [`triage_contract::IssueTracker`] for the intake finalize path.

mod github_issue_client;
mod github_transport_helpers;

pub use github_issue_client::{GithubIssueClient, GithubIssueClientConfig, RepoRef};
