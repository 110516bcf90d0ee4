//! Guild permission and configuration registry for the Triage bot.
//!
//! Stores per-guild admin users/roles, allow-listed intake channels, and
//! default issue labels in a single JSON document. Sessions only read from it
//! through [`triage_contract::PermissionLookup`]; mutation happens on the
//! admin command surface.

mod registry_store;

pub use registry_store::{GuildRegistry, SharedRegistry};
