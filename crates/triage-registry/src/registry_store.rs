//! JSON-backed guild registry with atomic persistence.

use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use triage_contract::PermissionLookup;

const REGISTRY_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct AdminRecord {
    guild: String,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    role: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct ChannelRecord {
    guild: String,
    channel: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct LabelRecord {
    guild: String,
    label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RegistryDocument {
    schema_version: u32,
    #[serde(default)]
    admins: Vec<AdminRecord>,
    #[serde(default)]
    channels: Vec<ChannelRecord>,
    #[serde(default)]
    labels: Vec<LabelRecord>,
}

impl Default for RegistryDocument {
    fn default() -> Self {
        Self {
            schema_version: REGISTRY_SCHEMA_VERSION,
            admins: Vec::new(),
            channels: Vec::new(),
            labels: Vec::new(),
        }
    }
}

/// Per-guild admin/channel/label registry persisted as one JSON document.
#[derive(Debug)]
pub struct GuildRegistry {
    path: PathBuf,
    document: RegistryDocument,
}

impl GuildRegistry {
    /// Loads the registry from `path`, creating an empty document when the
    /// file does not exist yet.
    pub fn load(path: &Path) -> Result<Self> {
        if path.as_os_str().is_empty() {
            bail!("registry path cannot be empty");
        }
        let document = if path.exists() {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            serde_json::from_str::<RegistryDocument>(&raw)
                .with_context(|| format!("failed to parse registry {}", path.display()))?
        } else {
            RegistryDocument::default()
        };
        Ok(Self {
            path: path.to_path_buf(),
            document,
        })
    }

    fn save(&self) -> Result<()> {
        let serialized = serde_json::to_string_pretty(&self.document)
            .context("failed to serialize registry document")?;
        write_text_atomic(&self.path, &serialized)
    }

    /// Registers `user_id` as an admin for `guild_id`. Returns false when the
    /// user is already registered.
    pub fn add_user_admin(&mut self, guild_id: &str, user_id: &str) -> Result<bool> {
        let exists = self.document.admins.iter().any(|record| {
            record.guild == guild_id && record.user.as_deref() == Some(user_id)
        });
        if exists {
            return Ok(false);
        }
        self.document.admins.push(AdminRecord {
            guild: guild_id.to_string(),
            user: Some(user_id.to_string()),
            role: None,
        });
        self.save()?;
        Ok(true)
    }

    /// Registers `role_id` as an admin role for `guild_id`.
    pub fn add_role_admin(&mut self, guild_id: &str, role_id: &str) -> Result<bool> {
        let exists = self.document.admins.iter().any(|record| {
            record.guild == guild_id && record.role.as_deref() == Some(role_id)
        });
        if exists {
            return Ok(false);
        }
        self.document.admins.push(AdminRecord {
            guild: guild_id.to_string(),
            user: None,
            role: Some(role_id.to_string()),
        });
        self.save()?;
        Ok(true)
    }

    /// Removes a user admin registration. Returns false when absent.
    pub fn remove_user_admin(&mut self, guild_id: &str, user_id: &str) -> Result<bool> {
        let before = self.document.admins.len();
        self.document.admins.retain(|record| {
            !(record.guild == guild_id && record.user.as_deref() == Some(user_id))
        });
        if self.document.admins.len() == before {
            return Ok(false);
        }
        self.save()?;
        Ok(true)
    }

    /// Removes a role admin registration. Returns false when absent.
    pub fn remove_role_admin(&mut self, guild_id: &str, role_id: &str) -> Result<bool> {
        let before = self.document.admins.len();
        self.document.admins.retain(|record| {
            !(record.guild == guild_id && record.role.as_deref() == Some(role_id))
        });
        if self.document.admins.len() == before {
            return Ok(false);
        }
        self.save()?;
        Ok(true)
    }

    /// Lists admin registrations for a guild as `(user, role)` pairs.
    pub fn admins_for_guild(&self, guild_id: &str) -> Vec<(Option<String>, Option<String>)> {
        self.document
            .admins
            .iter()
            .filter(|record| record.guild == guild_id)
            .map(|record| (record.user.clone(), record.role.clone()))
            .collect()
    }

    /// Allow-lists an intake channel. Returns false when already present.
    pub fn add_channel(&mut self, guild_id: &str, channel_id: &str) -> Result<bool> {
        let exists = self
            .document
            .channels
            .iter()
            .any(|record| record.guild == guild_id && record.channel == channel_id);
        if exists {
            return Ok(false);
        }
        self.document.channels.push(ChannelRecord {
            guild: guild_id.to_string(),
            channel: channel_id.to_string(),
        });
        self.save()?;
        Ok(true)
    }

    /// Removes a channel from the allow list. Returns false when absent.
    pub fn remove_channel(&mut self, guild_id: &str, channel_id: &str) -> Result<bool> {
        let before = self.document.channels.len();
        self.document
            .channels
            .retain(|record| !(record.guild == guild_id && record.channel == channel_id));
        if self.document.channels.len() == before {
            return Ok(false);
        }
        self.save()?;
        Ok(true)
    }

    pub fn channels_for_guild(&self, guild_id: &str) -> Vec<String> {
        self.document
            .channels
            .iter()
            .filter(|record| record.guild == guild_id)
            .map(|record| record.channel.clone())
            .collect()
    }

    /// Adds a default issue label for a guild. Returns false when present.
    pub fn add_default_label(&mut self, guild_id: &str, label: &str) -> Result<bool> {
        let exists = self
            .document
            .labels
            .iter()
            .any(|record| record.guild == guild_id && record.label == label);
        if exists {
            return Ok(false);
        }
        self.document.labels.push(LabelRecord {
            guild: guild_id.to_string(),
            label: label.to_string(),
        });
        self.save()?;
        Ok(true)
    }

    /// Removes a default issue label. Returns false when absent.
    pub fn remove_default_label(&mut self, guild_id: &str, label: &str) -> Result<bool> {
        let before = self.document.labels.len();
        self.document
            .labels
            .retain(|record| !(record.guild == guild_id && record.label == label));
        if self.document.labels.len() == before {
            return Ok(false);
        }
        self.save()?;
        Ok(true)
    }

    pub fn default_labels_for_guild(&self, guild_id: &str) -> Vec<String> {
        self.document
            .labels
            .iter()
            .filter(|record| record.guild == guild_id)
            .map(|record| record.label.clone())
            .collect()
    }

    pub fn is_channel_allowed(&self, guild_id: &str, channel_id: &str) -> bool {
        self.document
            .channels
            .iter()
            .any(|record| record.guild == guild_id && record.channel == channel_id)
    }

    /// True when the user is registered directly or holds a registered role.
    pub fn is_user_admin(&self, guild_id: &str, user_id: &str, role_ids: &[String]) -> bool {
        self.document.admins.iter().any(|record| {
            record.guild == guild_id
                && (record.user.as_deref() == Some(user_id)
                    || record
                        .role
                        .as_ref()
                        .is_some_and(|role| role_ids.iter().any(|held| held == role)))
        })
    }
}

/// Thread-safe registry handle shared between the command surface (writes)
/// and intake sessions (reads).
#[derive(Debug, Clone)]
pub struct SharedRegistry {
    inner: Arc<Mutex<GuildRegistry>>,
}

impl SharedRegistry {
    pub fn load(path: &Path) -> Result<Self> {
        Ok(Self {
            inner: Arc::new(Mutex::new(GuildRegistry::load(path)?)),
        })
    }

    pub fn with<T>(&self, action: impl FnOnce(&mut GuildRegistry) -> T) -> T {
        let mut guard = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        action(&mut guard)
    }
}

impl PermissionLookup for SharedRegistry {
    fn is_channel_allowed(&self, guild_id: &str, channel_id: &str) -> bool {
        self.with(|registry| registry.is_channel_allowed(guild_id, channel_id))
    }

    fn is_admin(&self, guild_id: &str, user_id: &str, role_ids: &[String]) -> bool {
        self.with(|registry| registry.is_user_admin(guild_id, user_id, role_ids))
    }

    fn default_labels(&self, guild_id: &str) -> Vec<String> {
        self.with(|registry| registry.default_labels_for_guild(guild_id))
    }
}

/// Writes text using a temp file + rename so readers never observe partial data.
fn write_text_atomic(path: &Path, content: &str) -> Result<()> {
    let parent_dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent_dir)
        .with_context(|| format!("failed to create {}", parent_dir.display()))?;

    let temp_name = format!(
        ".{}.tmp-{}",
        path.file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("registry"),
        std::process::id(),
    );
    let temp_path = parent_dir.join(temp_name);
    std::fs::write(&temp_path, content)
        .with_context(|| format!("failed to write temporary file {}", temp_path.display()))?;
    std::fs::rename(&temp_path, path).with_context(|| {
        format!(
            "failed to rename {} to {}",
            temp_path.display(),
            path.display()
        )
    })?;
    Ok(())
}
