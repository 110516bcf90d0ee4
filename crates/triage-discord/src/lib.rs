//! Discord bridge for the Triage issue-intake bot.
//!
//! Connects to the gateway for inbound messages, exposes the REST surface the
//! intake core needs through [`triage_contract::ChatClient`], and hosts the
//! `!issue` / `!issue-config` guild command surface.

mod discord_runtime;

pub use discord_runtime::{
    run_discord_bridge, DiscordApiClient, DiscordApiClientConfig, DiscordBridgeRuntimeConfig,
};
