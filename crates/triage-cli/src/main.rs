mod bootstrap_helpers;
mod cli_args;

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use triage_discord::{run_discord_bridge, DiscordBridgeRuntimeConfig};
use triage_github::{GithubIssueClient, GithubIssueClientConfig, RepoRef};
use triage_registry::SharedRegistry;

use crate::bootstrap_helpers::init_tracing;
use crate::cli_args::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let registry = SharedRegistry::load(&cli.registry_path).with_context(|| {
        format!(
            "failed to load guild registry from {}",
            cli.registry_path.display()
        )
    })?;

    let repo = RepoRef::parse(&cli.github_repo)?;
    let tracker = GithubIssueClient::new(GithubIssueClientConfig {
        api_base: cli.github_api_base.clone(),
        token: cli.github_token.clone(),
        repo,
        request_timeout_ms: cli.request_timeout_ms,
        retry_max_attempts: cli.retry_max_attempts,
        retry_base_delay_ms: cli.retry_base_delay_ms,
    })?;

    run_discord_bridge(DiscordBridgeRuntimeConfig {
        token: cli.discord_token.clone(),
        api_base: cli.discord_api_base.clone(),
        gateway_url: cli.gateway_url.clone(),
        bot_user_id: cli.bot_user_id.clone(),
        registry,
        tracker: Arc::new(tracker),
        idle_window: Duration::from_millis(cli.idle_window_ms),
        request_timeout_ms: cli.request_timeout_ms,
        retry_max_attempts: cli.retry_max_attempts,
        retry_base_delay_ms: cli.retry_base_delay_ms,
        reconnect_delay: Duration::from_millis(cli.reconnect_delay_ms),
    })
    .await
}
