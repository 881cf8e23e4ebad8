//! Shared types for botrt
//!
//! This crate defines the data exchanged between the bot runtime and its
//! collaborators (the partition layer that persists bots, and hosts that
//! display actions). It deliberately carries no behavior beyond
//! serialization helpers, so that both sides can depend on it.
//!
//! - [`Bot`]: an external snapshot of a bot (id, space, raw tags, masks)
//! - [`BotUpdate`]: a delta naming the tags that changed
//! - [`Action`]: the events emitted by script execution
//! - [`StateUpdatedEvent`]: what changed after a store mutation

mod action;
mod bot;
mod event;
mod space;

pub use action::{Action, RemoteDevice};
pub use bot::{Bot, BotTags, BotUpdate, TagMasks};
pub use event::{BotState, ScriptErrorRecord, StateUpdatedEvent};
pub use space::{RealtimeEditMode, Space};

use serde::{Deserialize, Serialize};

/// Identifier of a bot
pub type BotId = String;

/// Identifier correlating an async request with its resolution
pub type TaskId = u64;

/// Build information exposed to scripts through `os.version()`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionInfo {
    #[serde(default)]
    pub hash: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub major: u32,
    #[serde(default)]
    pub minor: u32,
    #[serde(default)]
    pub patch: u32,
    #[serde(default)]
    pub alpha: bool,
}

impl Default for VersionInfo {
    fn default() -> Self {
        Self {
            hash: String::new(),
            version: "v0.0.0".to_string(),
            major: 0,
            minor: 0,
            patch: 0,
            alpha: true,
        }
    }
}

/// Device capabilities exposed to scripts through `os.device()`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    #[serde(default)]
    pub supports_ar: bool,
    #[serde(default)]
    pub supports_vr: bool,
}
