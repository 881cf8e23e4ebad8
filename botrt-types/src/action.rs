use crate::{Bot, BotId, BotTags, TagMasks, TaskId};
use serde::{Deserialize, Serialize};

/// Identifies a remote device (another session) for device-scoped actions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteDevice {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

/// An event produced by, or fed into, script execution
///
/// `BotAdded`, `BotRemoved` and `BotUpdated` form the bot-mutation subset
/// that the edit-mode gate may transform or suppress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    BotAdded {
        id: BotId,
        bot: Bot,
    },
    BotRemoved {
        id: BotId,
    },
    BotUpdated {
        id: BotId,
        #[serde(default)]
        tags: BotTags,
        #[serde(default, skip_serializing_if = "TagMasks::is_empty")]
        masks: TagMasks,
    },
    ShowToast {
        #[serde(default)]
        message: serde_json::Value,
    },
    ShowInput {
        task_id: TaskId,
        #[serde(default)]
        current_value: serde_json::Value,
        #[serde(default)]
        options: serde_json::Value,
    },
    Shout {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        bot_ids: Option<Vec<BotId>>,
        #[serde(default)]
        argument: serde_json::Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        task_id: Option<TaskId>,
    },
    RunScript {
        script: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        task_id: Option<TaskId>,
    },
    Remote {
        event: serde_json::Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        selector: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        task_id: Option<TaskId>,
    },
    Device {
        #[serde(default)]
        device: RemoteDevice,
        event: Box<Action>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        task_id: Option<TaskId>,
    },
    AsyncResult {
        task_id: TaskId,
        #[serde(default)]
        result: serde_json::Value,
        #[serde(default)]
        map_bots_in_result: bool,
    },
    AsyncError {
        task_id: TaskId,
        #[serde(default)]
        error: serde_json::Value,
    },
    DeviceResult {
        #[serde(default)]
        device: RemoteDevice,
        task_id: TaskId,
        #[serde(default)]
        result: serde_json::Value,
    },
    DeviceError {
        #[serde(default)]
        device: RemoteDevice,
        task_id: TaskId,
        #[serde(default)]
        error: serde_json::Value,
    },
    Reject {
        action: Box<Action>,
    },
    Custom {
        name: String,
        #[serde(default)]
        data: serde_json::Value,
    },
}

impl Action {
    /// Interpret an arbitrary JSON object as an action.
    ///
    /// Objects whose `type` does not name a known action (or whose fields do
    /// not fit it) become [`Action::Custom`] carrying the whole object.
    pub fn from_json(value: serde_json::Value) -> Action {
        match serde_json::from_value::<Action>(value.clone()) {
            Ok(action) => action,
            Err(_) => {
                let name = value
                    .get("type")
                    .and_then(|t| t.as_str())
                    .unwrap_or("custom")
                    .to_string();
                Action::Custom { name, data: value }
            }
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// Whether this action mutates bot state
    pub fn is_bot_mutation(&self) -> bool {
        matches!(
            self,
            Action::BotAdded { .. } | Action::BotRemoved { .. } | Action::BotUpdated { .. }
        )
    }

    /// The wire name of the action (`type` field)
    pub fn kind(&self) -> &str {
        match self {
            Action::BotAdded { .. } => "bot_added",
            Action::BotRemoved { .. } => "bot_removed",
            Action::BotUpdated { .. } => "bot_updated",
            Action::ShowToast { .. } => "show_toast",
            Action::ShowInput { .. } => "show_input",
            Action::Shout { .. } => "shout",
            Action::RunScript { .. } => "run_script",
            Action::Remote { .. } => "remote",
            Action::Device { .. } => "device",
            Action::AsyncResult { .. } => "async_result",
            Action::AsyncError { .. } => "async_error",
            Action::DeviceResult { .. } => "device_result",
            Action::DeviceError { .. } => "device_error",
            Action::Reject { .. } => "reject",
            Action::Custom { name, .. } => name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_known_action_parses() {
        let action = Action::from_json(json!({"type": "show_toast", "message": "hi"}));
        assert_eq!(
            action,
            Action::ShowToast {
                message: json!("hi")
            }
        );
    }

    #[test]
    fn test_unknown_action_becomes_custom() {
        let action = Action::from_json(json!({"type": "go_to_url", "url": "https://x"}));
        match action {
            Action::Custom { name, data } => {
                assert_eq!(name, "go_to_url");
                assert_eq!(data["url"], "https://x");
            }
            other => panic!("expected custom action, got {:?}", other),
        }
    }

    #[test]
    fn test_device_action_wraps_inner_event() {
        let action = Action::from_json(json!({
            "type": "device",
            "device": {"session_id": "s1"},
            "event": {"type": "run_script", "script": "return 1"},
        }));
        match action {
            Action::Device { device, event, .. } => {
                assert_eq!(device.session_id.as_deref(), Some("s1"));
                assert_eq!(event.kind(), "run_script");
            }
            other => panic!("expected device action, got {:?}", other),
        }
    }

    #[test]
    fn test_bot_updated_wire_format() {
        let mut tags = BotTags::new();
        tags.insert("value".to_string(), json!(123));
        let action = Action::BotUpdated {
            id: "a".to_string(),
            tags,
            masks: TagMasks::new(),
        };
        insta::assert_snapshot!(
            serde_json::to_string(&action).unwrap(),
            @r#"{"type":"bot_updated","id":"a","tags":{"value":123}}"#
        );
    }
}
