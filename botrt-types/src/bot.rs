use crate::{BotId, Space};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Tag name to raw tag value
pub type BotTags = BTreeMap<String, serde_json::Value>;

/// Space to overlay tags
pub type TagMasks = BTreeMap<Space, BotTags>;

/// External snapshot of a bot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bot {
    pub id: BotId,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub space: Option<Space>,

    #[serde(default)]
    pub tags: BotTags,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub masks: TagMasks,
}

impl Bot {
    pub fn new(id: impl Into<BotId>) -> Self {
        Self {
            id: id.into(),
            space: None,
            tags: BotTags::new(),
            masks: TagMasks::new(),
        }
    }

    /// Builder helper used heavily by tests and the CLI
    pub fn with_tag(mut self, tag: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.tags.insert(tag.into(), value.into());
        self
    }

    pub fn with_space(mut self, space: impl Into<Space>) -> Self {
        self.space = Some(space.into());
        self
    }

    pub fn with_mask(
        mut self,
        space: impl Into<Space>,
        tag: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.masks
            .entry(space.into())
            .or_default()
            .insert(tag.into(), value.into());
        self
    }

    /// The effective space, defaulting to shared
    pub fn space(&self) -> Space {
        self.space.clone().unwrap_or_default()
    }
}

/// A delta for one bot. A `null` tag value deletes the tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotUpdate {
    pub id: BotId,

    #[serde(default)]
    pub tags: BotTags,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub masks: TagMasks,
}

impl BotUpdate {
    pub fn new(id: impl Into<BotId>) -> Self {
        Self {
            id: id.into(),
            tags: BotTags::new(),
            masks: TagMasks::new(),
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.tags.insert(tag.into(), value.into());
        self
    }
}
