//! Tag and mask writes

use super::{value_to_raw, BotRuntime};
use crate::compiler::CompiledTag;
use crate::deps::{Change, FormulaKey};
use botrt_script::Value;
use botrt_types::{RealtimeEditMode, Space};
use tracing::debug;

/// Tags that no write path may change
fn is_protected(tag: &str) -> bool {
    tag == "id" || tag == "space"
}

impl BotRuntime {
    /// Write a tag on behalf of a script, through the edit-mode gate
    pub(super) fn set_tag(&mut self, id: &str, tag: &str, value: &Value) {
        if is_protected(tag) {
            return;
        }
        let Some(bot) = self.store.get(id) else {
            return;
        };
        let raw = value_to_raw(value);
        match self.gate.mode_for(&bot.space()) {
            RealtimeEditMode::None => {
                debug!(bot = id, tag, "write dropped by edit mode");
                return;
            }
            RealtimeEditMode::Delayed => {}
            RealtimeEditMode::Immediate => {
                if !self.apply_tag(id, tag, raw.clone()) {
                    return;
                }
                self.eval_counts.clear();
            }
        }
        if let Some(bot) = self.store.get_mut(id) {
            bot.changes.insert(tag.to_string(), raw);
        }
        self.touch(id);
    }

    /// Apply a raw tag value to the live store. A `null` deletes the tag.
    /// Returns false when the tag already held `raw`.
    pub(super) fn apply_tag(&mut self, id: &str, tag: &str, raw: serde_json::Value) -> bool {
        if is_protected(tag) {
            return false;
        }
        let compiler = self.compiler.clone();
        let Some(bot) = self.store.get_mut(id) else {
            return false;
        };
        let unchanged = match bot.raw.get(tag) {
            Some(old) => *old == raw,
            None => raw.is_null(),
        };
        if unchanged {
            return false;
        }

        let ordinal = bot.ordinal;
        let old_value = bot.mask_value(tag).or_else(|| bot.values.get(tag).cloned());
        if raw.is_null() {
            bot.remove_raw(tag);
        } else {
            bot.set_raw(tag, raw, &compiler);
        }
        let is_formula = bot.compiled.get(tag).is_some_and(CompiledTag::is_formula);
        let new_value = if is_formula {
            None
        } else {
            bot.mask_value(tag).or_else(|| bot.values.get(tag).cloned())
        };

        self.deps.remove(&FormulaKey::new(id, tag));
        if is_formula {
            self.dirty.insert((ordinal, tag.to_string()));
        } else {
            self.dirty.remove(&(ordinal, tag.to_string()));
            if let Some(report) = self.report.as_mut() {
                let json = new_value.as_ref().map(Value::to_json).unwrap_or_default();
                report.record(ordinal, id, tag, json);
            }
        }

        // A new formula notifies now with an unknown value and again once
        // it has been computed
        if is_formula || old_value != new_value {
            self.notify(Change::TagChanged {
                bot: id.to_string(),
                tag: tag.to_string(),
                old: old_value,
                new: new_value,
            });
        }
        true
    }

    /// Write a tag mask on behalf of a script. The gate is asked about the
    /// mask's space, not the bot's.
    pub(super) fn set_mask(&mut self, id: &str, tag: &str, value: &Value, space: &Space) {
        if is_protected(tag) || !self.store.contains(id) {
            return;
        }
        let raw = value_to_raw(value);
        match self.gate.mode_for(space) {
            RealtimeEditMode::None => {
                debug!(bot = id, tag, %space, "mask dropped by edit mode");
                return;
            }
            RealtimeEditMode::Delayed => {}
            RealtimeEditMode::Immediate => {
                if !self.apply_mask(id, tag, raw.clone(), space) {
                    return;
                }
                self.eval_counts.clear();
            }
        }
        if let Some(bot) = self.store.get_mut(id) {
            bot.mask_changes
                .entry(space.clone())
                .or_default()
                .insert(tag.to_string(), raw);
        }
        self.touch(id);
    }

    /// Apply a raw mask value to the live store. A `null` clears it.
    pub(super) fn apply_mask(&mut self, id: &str, tag: &str, raw: serde_json::Value, space: &Space) -> bool {
        if is_protected(tag) || !self.store.contains(id) {
            return false;
        }
        let old = self.peek_tag(id, tag);
        let Some(bot) = self.store.get_mut(id) else {
            return false;
        };
        let ordinal = bot.ordinal;
        if raw.is_null() {
            let Some(tags) = bot.masks.get_mut(space) else {
                return false;
            };
            if tags.remove(tag).is_none() {
                return false;
            }
            if tags.is_empty() {
                bot.masks.remove(space);
            }
        } else {
            bot.masks
                .entry(space.clone())
                .or_default()
                .insert(tag.to_string(), raw);
        }

        let new = self.peek_tag(id, tag);
        if old != new {
            if let Some(report) = self.report.as_mut() {
                report.record(ordinal, id, tag, new.to_json());
            }
            self.notify(Change::TagChanged {
                bot: id.to_string(),
                tag: tag.to_string(),
                old: Some(old),
                new: Some(new),
            });
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use botrt_types::{Action, Bot, TagMasks};
    use serde_json::json;

    fn mask_update(actions: &[Action]) -> Option<&TagMasks> {
        actions.iter().find_map(|a| match a {
            Action::BotUpdated { masks, .. } => Some(masks),
            _ => None,
        })
    }

    #[test]
    fn test_masks_follow_the_edit_mode_of_their_space() {
        let mut runtime = BotRuntime::default();
        runtime.add_bots(vec![Bot::new("a")
            .with_tag("color", "red")
            .with_tag("certify", "@setTagMask(this, 'color', 'blue', 'certified')")
            .with_tag("archive", "@setTagMask(this, 'color', 'green', 'history')")
            .with_tag("local", "@setTagMask(this, 'color', 'pink', 'tempLocal')")]);

        let result = runtime.shout("certify", json!(null)).unwrap();
        assert!(result.actions.is_empty());
        assert_eq!(runtime.bot("a").unwrap().tag("color"), Value::from("red"));

        let result = runtime.shout("archive", json!(null)).unwrap();
        let masks = mask_update(&result.actions).unwrap();
        assert_eq!(masks[&Space::new("history")]["color"], json!("green"));
        assert_eq!(runtime.bot("a").unwrap().tag("color"), Value::from("red"));

        let result = runtime.shout("local", json!(null)).unwrap();
        assert!(mask_update(&result.actions).is_some());
        assert_eq!(runtime.bot("a").unwrap().tag("color"), Value::from("pink"));
    }
}
