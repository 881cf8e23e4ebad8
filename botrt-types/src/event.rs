use crate::{BotId, BotTags, Space, TagMasks};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Externally visible state of one bot inside a [`StateUpdatedEvent`]
///
/// For added bots every field is filled in. For updated bots `tags` holds
/// only the raw tags that changed and `values` only the computed values that
/// changed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BotState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub space: Option<Space>,

    #[serde(default)]
    pub tags: BotTags,

    #[serde(default)]
    pub values: BTreeMap<String, serde_json::Value>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub masks: TagMasks,
}

/// Net externally visible change produced by one store mutation call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateUpdatedEvent {
    /// `None` marks a removed bot
    pub state: BTreeMap<BotId, Option<BotState>>,
    pub added_bots: Vec<BotId>,
    pub removed_bots: Vec<BotId>,
    pub updated_bots: Vec<BotId>,
}

impl StateUpdatedEvent {
    pub fn is_empty(&self) -> bool {
        self.added_bots.is_empty() && self.removed_bots.is_empty() && self.updated_bots.is_empty()
    }

    /// Computed value of `tag` on `bot` as reported by this event
    pub fn value(&self, bot: &str, tag: &str) -> Option<&serde_json::Value> {
        self.state
            .get(bot)
            .and_then(|s| s.as_ref())
            .and_then(|s| s.values.get(tag))
    }
}

/// A script failure reported on the error channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptErrorRecord {
    /// Display string of the thrown value, e.g. `"Error: boom"`
    pub error: String,

    /// Error name (`Error`, `TypeError`, `SyntaxError`, ...)
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot: Option<BotId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_removed_bot_serializes_as_null() {
        let mut event = StateUpdatedEvent::default();
        event.state.insert("gone".to_string(), None);
        event.removed_bots.push("gone".to_string());

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["state"]["gone"], serde_json::Value::Null);
        assert_eq!(json["removedBots"], json!(["gone"]));
    }

    #[test]
    fn test_value_lookup() {
        let mut state = BotState::default();
        state.values.insert("num".to_string(), json!(2));
        let mut event = StateUpdatedEvent::default();
        event.state.insert("a".to_string(), Some(state));

        assert_eq!(event.value("a", "num"), Some(&json!(2)));
        assert_eq!(event.value("b", "num"), None);
    }
}
