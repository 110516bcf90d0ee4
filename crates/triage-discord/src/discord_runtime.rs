//! Discord bridge runtime: gateway session loop, message routing into the
//! intake supervisor, and the guild command surface.

use std::{collections::HashMap, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use triage_contract::{InboundMessage, IssueTracker, MessageRef, ThreadHandle};
use triage_intake::{
    classify_message, IntakeError, IntakeRequest, IntakeRuntimeConfig, IntakeSupervisor,
    MessageCommand,
};
use triage_registry::SharedRegistry;

mod bridge_commands;
mod discord_api_client;
mod discord_gateway;
mod discord_transport_helpers;

use bridge_commands::{parse_bridge_command, BridgeCommand, ConfigCommand};
pub use discord_api_client::{DiscordApiClient, DiscordApiClientConfig};
use discord_gateway::{
    heartbeat_payload, identify_payload, normalize_message_create, parse_gateway_frame,
    DiscordMessageEvent, OP_DISPATCH, OP_HEARTBEAT, OP_HEARTBEAT_ACK, OP_HELLO,
    OP_INVALID_SESSION, OP_RECONNECT,
};

/// Runtime configuration for the Discord bridge.
#[derive(Clone)]
pub struct DiscordBridgeRuntimeConfig {
    pub token: String,
    pub api_base: String,
    /// Overrides the REST-discovered gateway url (used by tests).
    pub gateway_url: Option<String>,
    /// Overrides REST resolution of the bot identity.
    pub bot_user_id: Option<String>,
    pub registry: SharedRegistry,
    pub tracker: Arc<dyn IssueTracker>,
    pub idle_window: Duration,
    pub request_timeout_ms: u64,
    pub retry_max_attempts: usize,
    pub retry_base_delay_ms: u64,
    pub reconnect_delay: Duration,
}

enum SessionEnd {
    Shutdown,
    Reconnect,
}

/// Runs the Discord bridge until ctrl-c.
pub async fn run_discord_bridge(config: DiscordBridgeRuntimeConfig) -> Result<()> {
    let mut runtime = DiscordBridgeRuntime::new(config).await?;
    runtime.run().await
}

/// Cached per-guild facts needed for the administrator capability check.
struct GuildAccess {
    owner_id: String,
    admin_role_ids: Vec<String>,
}

struct DiscordBridgeRuntime {
    config: DiscordBridgeRuntimeConfig,
    api: DiscordApiClient,
    supervisor: Arc<IntakeSupervisor>,
    bot_user_id: String,
    guild_access_cache: HashMap<String, GuildAccess>,
}

impl DiscordBridgeRuntime {
    async fn new(config: DiscordBridgeRuntimeConfig) -> Result<Self> {
        let api = DiscordApiClient::new(DiscordApiClientConfig {
            api_base: config.api_base.clone(),
            token: config.token.clone(),
            request_timeout_ms: config.request_timeout_ms,
            retry_max_attempts: config.retry_max_attempts,
            retry_base_delay_ms: config.retry_base_delay_ms,
        })?;

        let bot_user_id = match config.bot_user_id.clone() {
            Some(user_id) if !user_id.trim().is_empty() => user_id.trim().to_string(),
            _ => api.resolve_bot_user_id().await?,
        };

        let supervisor = IntakeSupervisor::new(IntakeRuntimeConfig {
            chat: Arc::new(api.clone()),
            tracker: config.tracker.clone(),
            permissions: Arc::new(config.registry.clone()),
            bot_user_id: bot_user_id.clone(),
            idle_window: config.idle_window,
        });

        Ok(Self {
            config,
            api,
            supervisor,
            bot_user_id,
            guild_access_cache: HashMap::new(),
        })
    }

    async fn run(&mut self) -> Result<()> {
        loop {
            let gateway_url = match self.config.gateway_url.clone() {
                Some(url) => url,
                None => match self.api.fetch_gateway_url().await {
                    Ok(url) => url,
                    Err(error) => {
                        eprintln!("discord bridge failed to resolve gateway url: {error}");
                        tokio::select! {
                            _ = tokio::signal::ctrl_c() => {
                                println!("discord bridge shutdown requested");
                                return Ok(());
                            }
                            _ = tokio::time::sleep(self.config.reconnect_delay) => {}
                        }
                        continue;
                    }
                },
            };

            let socket_url = format!("{}/?v=10&encoding=json", gateway_url.trim_end_matches('/'));
            match self.run_gateway_session(&socket_url).await {
                Ok(SessionEnd::Shutdown) => {
                    println!("discord bridge shutdown requested");
                    return Ok(());
                }
                Ok(SessionEnd::Reconnect) => {}
                Err(error) => {
                    eprintln!("discord bridge gateway session error: {error}");
                }
            }

            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    println!("discord bridge shutdown requested");
                    return Ok(());
                }
                _ = tokio::time::sleep(self.config.reconnect_delay) => {}
            }
        }
    }

    async fn run_gateway_session(&mut self, socket_url: &str) -> Result<SessionEnd> {
        let (stream, _response) = connect_async(socket_url)
            .await
            .with_context(|| "failed to connect discord gateway websocket")?;
        let (mut sink, mut source) = stream.split();

        let mut heartbeat: Option<tokio::time::Interval> = None;
        let mut last_sequence: Option<u64> = None;

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    return Ok(SessionEnd::Shutdown);
                }
                _ = heartbeat_due(&mut heartbeat) => {
                    sink.send(WsMessage::Text(heartbeat_payload(last_sequence).into()))
                        .await
                        .context("failed to send gateway heartbeat")?;
                }
                maybe_message = source.next() => {
                    let Some(message_result) = maybe_message else {
                        return Ok(SessionEnd::Reconnect);
                    };
                    let message = message_result.context("failed reading gateway message")?;
                    let Some(frame) = parse_gateway_frame(message)? else {
                        continue;
                    };
                    if let Some(sequence) = frame.s {
                        last_sequence = Some(sequence);
                    }
                    match frame.op {
                        OP_HELLO => {
                            let interval_ms = frame
                                .d
                                .get("heartbeat_interval")
                                .and_then(|value| value.as_u64())
                                .unwrap_or(41_250);
                            heartbeat = Some(tokio::time::interval(Duration::from_millis(
                                interval_ms.max(1_000),
                            )));
                            sink.send(WsMessage::Text(
                                identify_payload(&self.config.token).into(),
                            ))
                            .await
                            .context("failed to send gateway identify")?;
                        }
                        OP_HEARTBEAT => {
                            sink.send(WsMessage::Text(heartbeat_payload(last_sequence).into()))
                                .await
                                .context("failed to send requested heartbeat")?;
                        }
                        OP_RECONNECT | OP_INVALID_SESSION => {
                            return Ok(SessionEnd::Reconnect);
                        }
                        OP_DISPATCH => match frame.t.as_deref() {
                            Some("READY") => {
                                println!("discord bridge connected as {}", self.bot_user_id);
                            }
                            Some("MESSAGE_CREATE") => {
                                if let Some(event) = normalize_message_create(&frame.d) {
                                    self.handle_message_event(event).await;
                                }
                            }
                            _ => {}
                        },
                        OP_HEARTBEAT_ACK => {}
                        _ => {}
                    }
                }
            }
        }
    }

    async fn handle_message_event(&mut self, event: DiscordMessageEvent) {
        if event.author_is_bot || event.author_id == self.bot_user_id {
            return;
        }

        let thread = ThreadHandle(event.channel_id.clone());
        let author_has_admin_permission = self.resolve_admin_capability(&event).await;
        let inbound = InboundMessage {
            author_id: event.author_id.clone(),
            author_tag: event.author_tag.clone(),
            author_role_ids: event.author_role_ids.clone(),
            author_has_admin_permission,
            text: event.text.clone(),
            attachments: event.attachments.clone(),
            message: MessageRef {
                channel_id: event.channel_id.clone(),
                message_id: event.message_id.clone(),
            },
        };
        if self.supervisor.deliver_message(&thread, inbound).await {
            return;
        }

        // Not an intake thread: check the guild command surface.
        let Some(guild_id) = event.guild_id.clone() else {
            return;
        };
        match parse_bridge_command(&event.text) {
            None => {}
            Some(BridgeCommand::Issue { title }) => {
                self.handle_issue_command(&event, &guild_id, title).await;
            }
            Some(BridgeCommand::Config(command)) => {
                self.handle_config_command(&event, &guild_id, command).await;
            }
            Some(BridgeCommand::Invalid { message }) => {
                self.reply(&event, &message).await;
            }
        }
    }

    /// Guild administrator capability, only resolved when the message could
    /// actually exercise it.
    async fn resolve_admin_capability(&mut self, event: &DiscordMessageEvent) -> bool {
        if !matches!(classify_message(&event.text), MessageCommand::Privileged(_)) {
            return false;
        }
        let Some(guild_id) = event.guild_id.clone() else {
            return false;
        };
        self.has_admin_capability(&guild_id, &event.author_id, &event.author_role_ids)
            .await
    }

    /// True for the guild owner and for members holding a role that carries
    /// the administrator permission bit. `@everyone` counts as held by all
    /// members even though it never appears in member role lists.
    async fn has_admin_capability(
        &mut self,
        guild_id: &str,
        user_id: &str,
        role_ids: &[String],
    ) -> bool {
        let Some(access) = self.guild_access(guild_id).await else {
            return false;
        };
        if access.owner_id == user_id {
            return true;
        }
        access.admin_role_ids.iter().any(|admin_role| {
            admin_role == guild_id || role_ids.iter().any(|held| held == admin_role)
        })
    }

    async fn guild_access(&mut self, guild_id: &str) -> Option<&GuildAccess> {
        if !self.guild_access_cache.contains_key(guild_id) {
            let owner_id = match self.api.fetch_guild_owner(guild_id).await {
                Ok(owner_id) => owner_id,
                Err(error) => {
                    eprintln!("discord bridge failed to fetch guild {guild_id}: {error}");
                    return None;
                }
            };
            let admin_role_ids = match self.api.fetch_guild_admin_role_ids(guild_id).await {
                Ok(role_ids) => role_ids,
                Err(error) => {
                    eprintln!("discord bridge failed to fetch roles for guild {guild_id}: {error}");
                    return None;
                }
            };
            self.guild_access_cache.insert(
                guild_id.to_string(),
                GuildAccess {
                    owner_id,
                    admin_role_ids,
                },
            );
        }
        self.guild_access_cache.get(guild_id)
    }

    async fn handle_issue_command(
        &mut self,
        event: &DiscordMessageEvent,
        guild_id: &str,
        title: Option<String>,
    ) {
        let channel_is_thread = match self.api.is_thread_channel(&event.channel_id).await {
            Ok(is_thread) => is_thread,
            Err(error) => {
                eprintln!(
                    "discord bridge failed to inspect channel {}: {error}",
                    event.channel_id
                );
                false
            }
        };
        let request = IntakeRequest {
            guild_id: guild_id.to_string(),
            channel_id: event.channel_id.clone(),
            channel_is_thread,
            requester_id: event.author_id.clone(),
            requester_tag: event.author_tag.clone(),
            title,
        };
        match self.supervisor.begin_intake(request).await {
            Ok(_) => {
                self.reply(event, "One second, creating a thread for your issue.")
                    .await;
            }
            Err(IntakeError::Rejected(rejection)) => {
                self.reply(event, &rejection.to_string()).await;
            }
            Err(IntakeError::Platform(error)) => {
                eprintln!("discord bridge failed to open intake thread: {error}");
                self.reply(event, "Sorry, something went wrong creating the intake thread.")
                    .await;
            }
        }
    }

    async fn handle_config_command(
        &mut self,
        event: &DiscordMessageEvent,
        guild_id: &str,
        command: ConfigCommand,
    ) {
        let is_admin = self
            .has_admin_capability(guild_id, &event.author_id, &event.author_role_ids)
            .await
            || self.config.registry.with(|registry| {
                registry.is_user_admin(guild_id, &event.author_id, &event.author_role_ids)
            });
        if !is_admin {
            self.reply(
                event,
                "Sorry, only admins can manage the issue intake configuration.",
            )
            .await;
            return;
        }

        let response = self.apply_config_command(event, guild_id, command);
        self.reply(event, &response).await;
    }

    fn apply_config_command(
        &self,
        event: &DiscordMessageEvent,
        guild_id: &str,
        command: ConfigCommand,
    ) -> String {
        let registry = &self.config.registry;
        let outcome = match command {
            ConfigCommand::AddAdmin { user_id } => registry
                .with(|store| store.add_user_admin(guild_id, &user_id))
                .map(|added| match added {
                    true => format!("Added <@{user_id}> as an intake admin."),
                    false => format!("<@{user_id}> is already an intake admin."),
                }),
            ConfigCommand::RemoveAdmin { user_id } => registry
                .with(|store| store.remove_user_admin(guild_id, &user_id))
                .map(|removed| match removed {
                    true => format!("Removed <@{user_id}> from the intake admins."),
                    false => format!("<@{user_id}> was not an intake admin."),
                }),
            ConfigCommand::AddRole { role_id } => registry
                .with(|store| store.add_role_admin(guild_id, &role_id))
                .map(|added| match added {
                    true => format!("Added role <@&{role_id}> as an intake admin role."),
                    false => format!("Role <@&{role_id}> is already an intake admin role."),
                }),
            ConfigCommand::RemoveRole { role_id } => registry
                .with(|store| store.remove_role_admin(guild_id, &role_id))
                .map(|removed| match removed {
                    true => format!("Removed role <@&{role_id}> from the intake admin roles."),
                    false => format!("Role <@&{role_id}> was not an intake admin role."),
                }),
            ConfigCommand::AddChannel { channel_id } => {
                let channel_id = channel_id.unwrap_or_else(|| event.channel_id.clone());
                registry
                    .with(|store| store.add_channel(guild_id, &channel_id))
                    .map(|added| match added {
                        true => format!("Channel <#{channel_id}> now accepts issue intake."),
                        false => format!("Channel <#{channel_id}> was already allow-listed."),
                    })
            }
            ConfigCommand::RemoveChannel { channel_id } => {
                let channel_id = channel_id.unwrap_or_else(|| event.channel_id.clone());
                registry
                    .with(|store| store.remove_channel(guild_id, &channel_id))
                    .map(|removed| match removed {
                        true => format!("Channel <#{channel_id}> no longer accepts issue intake."),
                        false => format!("Channel <#{channel_id}> was not allow-listed."),
                    })
            }
            ConfigCommand::AddLabel { label } => registry
                .with(|store| store.add_default_label(guild_id, &label))
                .map(|added| match added {
                    true => format!("Label `{label}` will be applied to new issues."),
                    false => format!("Label `{label}` was already configured."),
                }),
            ConfigCommand::RemoveLabel { label } => registry
                .with(|store| store.remove_default_label(guild_id, &label))
                .map(|removed| match removed {
                    true => format!("Label `{label}` removed."),
                    false => format!("Label `{label}` was not configured."),
                }),
            ConfigCommand::List => Ok(registry.with(|store| {
                let admins = store
                    .admins_for_guild(guild_id)
                    .into_iter()
                    .map(|(user, role)| match (user, role) {
                        (Some(user), _) => format!("user <@{user}>"),
                        (_, Some(role)) => format!("role <@&{role}>"),
                        _ => "unknown".to_string(),
                    })
                    .collect::<Vec<_>>();
                let channels = store
                    .channels_for_guild(guild_id)
                    .into_iter()
                    .map(|channel| format!("<#{channel}>"))
                    .collect::<Vec<_>>();
                let labels = store.default_labels_for_guild(guild_id);
                format!(
                    "Intake configuration:\nadmins: {}\nchannels: {}\nlabels: {}",
                    render_list(&admins),
                    render_list(&channels),
                    render_list(&labels),
                )
            })),
        };

        match outcome {
            Ok(message) => message,
            Err(error) => {
                eprintln!("discord bridge failed to update registry: {error}");
                "Sorry, the configuration change could not be saved.".to_string()
            }
        }
    }

    async fn reply(&self, event: &DiscordMessageEvent, text: &str) {
        if let Err(error) = self
            .api
            .create_message(&event.channel_id, text, Some(&event.message_id))
            .await
        {
            eprintln!(
                "discord bridge failed to reply in channel {}: {error}",
                event.channel_id
            );
        }
    }
}

fn render_list(values: &[String]) -> String {
    if values.is_empty() {
        "none".to_string()
    } else {
        values.join(", ")
    }
}

async fn heartbeat_due(heartbeat: &mut Option<tokio::time::Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
