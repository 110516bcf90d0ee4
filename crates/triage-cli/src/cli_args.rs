use std::path::PathBuf;

use clap::Parser;

fn parse_positive_usize(value: &str) -> Result<usize, String> {
    let parsed = value
        .parse::<usize>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

#[derive(Debug, Parser)]
#[command(
    name = "triage",
    about = "Conversational issue intake bot bridging Discord threads to GitHub issues",
    version
)]
pub struct Cli {
    #[arg(
        long = "discord-token",
        env = "TRIAGE_DISCORD_TOKEN",
        hide_env_values = true,
        help = "Discord bot token used for the gateway session and REST calls"
    )]
    pub discord_token: String,

    #[arg(
        long = "github-token",
        env = "TRIAGE_GITHUB_TOKEN",
        hide_env_values = true,
        help = "GitHub token with permission to create issues in the target repository"
    )]
    pub github_token: String,

    #[arg(
        long = "github-repo",
        env = "TRIAGE_GITHUB_REPO",
        help = "Target repository in owner/name format"
    )]
    pub github_repo: String,

    #[arg(
        long = "registry-path",
        env = "TRIAGE_REGISTRY_PATH",
        default_value = ".triage/registry.json",
        help = "Path of the guild registry file (admins, channels, default labels)"
    )]
    pub registry_path: PathBuf,

    #[arg(
        long = "idle-window-ms",
        env = "TRIAGE_IDLE_WINDOW_MS",
        default_value_t = 300_000,
        value_parser = parse_positive_u64,
        help = "Idle window before an intake thread is finalized automatically"
    )]
    pub idle_window_ms: u64,

    #[arg(
        long = "request-timeout-ms",
        env = "TRIAGE_REQUEST_TIMEOUT_MS",
        default_value_t = 30_000,
        value_parser = parse_positive_u64,
        help = "Per-request timeout for Discord and GitHub REST calls"
    )]
    pub request_timeout_ms: u64,

    #[arg(
        long = "retry-max-attempts",
        env = "TRIAGE_RETRY_MAX_ATTEMPTS",
        default_value_t = 3,
        value_parser = parse_positive_usize,
        help = "Maximum attempts per REST request before giving up"
    )]
    pub retry_max_attempts: usize,

    #[arg(
        long = "retry-base-delay-ms",
        env = "TRIAGE_RETRY_BASE_DELAY_MS",
        default_value_t = 500,
        value_parser = parse_positive_u64,
        help = "Base delay for exponential retry backoff"
    )]
    pub retry_base_delay_ms: u64,

    #[arg(
        long = "reconnect-delay-ms",
        env = "TRIAGE_RECONNECT_DELAY_MS",
        default_value_t = 5_000,
        value_parser = parse_positive_u64,
        help = "Delay between gateway reconnect attempts"
    )]
    pub reconnect_delay_ms: u64,

    #[arg(
        long = "discord-api-base",
        env = "TRIAGE_DISCORD_API_BASE",
        default_value = "https://discord.com/api/v10",
        help = "Base URL for the Discord REST API"
    )]
    pub discord_api_base: String,

    #[arg(
        long = "github-api-base",
        env = "TRIAGE_GITHUB_API_BASE",
        default_value = "https://api.github.com",
        help = "Base URL for the GitHub REST API"
    )]
    pub github_api_base: String,

    #[arg(
        long = "gateway-url",
        env = "TRIAGE_GATEWAY_URL",
        help = "Optional gateway URL override; skips /gateway/bot discovery"
    )]
    pub gateway_url: Option<String>,

    #[arg(
        long = "bot-user-id",
        env = "TRIAGE_BOT_USER_ID",
        help = "Optional bot user id override; skips /users/@me resolution"
    )]
    pub bot_user_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::Cli;

    fn base_args() -> Vec<&'static str> {
        vec![
            "triage",
            "--discord-token",
            "dt",
            "--github-token",
            "gt",
            "--github-repo",
            "acme/widgets",
        ]
    }

    #[test]
    fn unit_cli_defaults_cover_runtime_knobs() {
        let cli = Cli::try_parse_from(base_args()).expect("parse");
        assert_eq!(cli.idle_window_ms, 300_000);
        assert_eq!(cli.request_timeout_ms, 30_000);
        assert_eq!(cli.retry_max_attempts, 3);
        assert_eq!(cli.reconnect_delay_ms, 5_000);
        assert_eq!(cli.discord_api_base, "https://discord.com/api/v10");
        assert_eq!(cli.github_api_base, "https://api.github.com");
        assert!(cli.gateway_url.is_none());
    }

    #[test]
    fn unit_cli_rejects_zero_idle_window() {
        let mut args = base_args();
        args.extend(["--idle-window-ms", "0"]);
        assert!(Cli::try_parse_from(args).is_err());
    }

    #[test]
    fn unit_cli_accepts_overrides() {
        let mut args = base_args();
        args.extend([
            "--idle-window-ms",
            "60000",
            "--gateway-url",
            "wss://gateway.example",
        ]);
        let cli = Cli::try_parse_from(args).expect("parse");
        assert_eq!(cli.idle_window_ms, 60_000);
        assert_eq!(cli.gateway_url.as_deref(), Some("wss://gateway.example"));
    }
}
