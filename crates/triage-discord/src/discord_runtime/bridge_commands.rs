//! Parsing for the guild-facing `!issue` and `!issue-config` commands.

/// Registry mutations and queries available to guild admins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum ConfigCommand {
    AddAdmin { user_id: String },
    RemoveAdmin { user_id: String },
    AddRole { role_id: String },
    RemoveRole { role_id: String },
    AddChannel { channel_id: Option<String> },
    RemoveChannel { channel_id: Option<String> },
    AddLabel { label: String },
    RemoveLabel { label: String },
    List,
}

/// Top-level commands recognized outside intake threads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum BridgeCommand {
    Issue { title: Option<String> },
    Config(ConfigCommand),
    Invalid { message: String },
}

pub(super) fn config_usage() -> String {
    [
        "Usage: !issue-config <subcommand>",
        "  add-admin <user-id> | remove-admin <user-id>",
        "  add-role <role-id> | remove-role <role-id>",
        "  add-channel [channel-id] | remove-channel [channel-id]",
        "  add-label <label> | remove-label <label>",
        "  list",
    ]
    .join("\n")
}

/// Parses a raw guild message. Returns `None` when the message is not
/// addressed to the bot's command surface.
pub(super) fn parse_bridge_command(text: &str) -> Option<BridgeCommand> {
    let trimmed = text.trim();
    let (command, remainder) = match trimmed.split_once(char::is_whitespace) {
        Some((command, remainder)) => (command, remainder.trim()),
        None => (trimmed, ""),
    };

    match command.to_ascii_lowercase().as_str() {
        "!issue" => Some(BridgeCommand::Issue {
            title: (!remainder.is_empty()).then(|| remainder.to_string()),
        }),
        "!issue-config" => Some(parse_config_command(remainder)),
        _ => None,
    }
}

fn parse_config_command(remainder: &str) -> BridgeCommand {
    let (subcommand, argument) = match remainder.split_once(char::is_whitespace) {
        Some((subcommand, argument)) => (subcommand, argument.trim()),
        None => (remainder, ""),
    };

    let required = |name: &str| -> Result<String, BridgeCommand> {
        if argument.is_empty() {
            Err(BridgeCommand::Invalid {
                message: format!("{subcommand} requires a {name}.\n{}", config_usage()),
            })
        } else {
            Ok(argument.to_string())
        }
    };

    let command = match subcommand.to_ascii_lowercase().as_str() {
        "add-admin" => match required("user id") {
            Ok(user_id) => ConfigCommand::AddAdmin { user_id },
            Err(invalid) => return invalid,
        },
        "remove-admin" => match required("user id") {
            Ok(user_id) => ConfigCommand::RemoveAdmin { user_id },
            Err(invalid) => return invalid,
        },
        "add-role" => match required("role id") {
            Ok(role_id) => ConfigCommand::AddRole { role_id },
            Err(invalid) => return invalid,
        },
        "remove-role" => match required("role id") {
            Ok(role_id) => ConfigCommand::RemoveRole { role_id },
            Err(invalid) => return invalid,
        },
        "add-channel" => ConfigCommand::AddChannel {
            channel_id: (!argument.is_empty()).then(|| argument.to_string()),
        },
        "remove-channel" => ConfigCommand::RemoveChannel {
            channel_id: (!argument.is_empty()).then(|| argument.to_string()),
        },
        "add-label" => match required("label") {
            Ok(label) => ConfigCommand::AddLabel { label },
            Err(invalid) => return invalid,
        },
        "remove-label" => match required("label") {
            Ok(label) => ConfigCommand::RemoveLabel { label },
            Err(invalid) => return invalid,
        },
        "list" => ConfigCommand::List,
        "" => {
            return BridgeCommand::Invalid {
                message: config_usage(),
            }
        }
        other => {
            return BridgeCommand::Invalid {
                message: format!("Unknown subcommand '{other}'.\n{}", config_usage()),
            }
        }
    };
    BridgeCommand::Config(command)
}
