//! The runtime as a script environment

use super::recalc::compile_error;
use super::BotRuntime;
use crate::compiler::CompiledTag;
use crate::deps::Dependency;
use crate::tasks::Frame;
use botrt_script::{Bindings, RunOutcome, ScriptEnv, ScriptError, Value, ViewKind};
use botrt_types::{BotId, Space};

/// Members of a bot reference
const BOT_MEMBERS: [&str; 8] = [
    "id",
    "space",
    "tags",
    "raw",
    "masks",
    "listeners",
    "changes",
    "maskChanges",
];

impl BotRuntime {
    /// Bindings for a script living on `bot`'s tag `tag`
    pub(super) fn bindings(&mut self, bot: &str, tag: &str, that: Value) -> Result<Bindings, ScriptError> {
        let creator = self.linked_bot(bot, "creator");
        let config = self.linked_bot(bot, "configBot");
        let config_tag = match &config {
            Some(config_id) => self.read_tag(config_id, tag)?,
            None => Value::Undefined,
        };
        let view = |kind| Value::View {
            bot: bot.to_string(),
            kind,
        };
        Ok(Bindings {
            this: Value::Bot(bot.to_string()),
            tags: view(ViewKind::Tags),
            raw: view(ViewKind::Raw),
            masks: view(ViewKind::Masks),
            tag_name: Value::from(tag),
            creator: creator.map(Value::Bot).unwrap_or(Value::Null),
            config: config.map(Value::Bot).unwrap_or(Value::Null),
            config_tag,
            that,
        })
    }

    /// Bot named by one of `bot`'s tags, if it exists
    fn linked_bot(&mut self, bot: &str, tag: &str) -> Option<BotId> {
        self.track(Dependency::BotTag {
            bot: bot.to_string(),
            tag: tag.to_string(),
        });
        let id = self.raw_text(bot, tag)?;
        self.store.contains(&id).then_some(id)
    }

    /// Run one listener tag. Script failures are recorded and yield `None`;
    /// only energy exhaustion propagates.
    pub(super) fn run_listener(
        &mut self,
        bot: &str,
        tag: &str,
        that: Value,
    ) -> Result<Option<RunOutcome>, ScriptError> {
        let compiled = match self.store.get(bot).and_then(|b| b.compiled.get(tag)) {
            Some(CompiledTag::Listener(outcome)) => outcome.clone(),
            _ => return Ok(None),
        };
        let source = self.raw_text(bot, tag);
        let script = match compiled {
            Ok(script) => script,
            Err(err) => {
                self.record_error(&compile_error(&err), Some(bot), Some(tag), source.as_deref());
                return Ok(None);
            }
        };

        let bindings = self.bindings(bot, tag, that)?;
        self.frames
            .push(Frame::new(Some(bot.to_string()), Some(tag.to_string())));
        let result = script.run(self, bindings);
        self.frames.pop();

        match result {
            Ok(outcome) => Ok(Some(outcome)),
            Err(ScriptError::OutOfEnergy) => Err(ScriptError::OutOfEnergy),
            Err(err) => {
                self.record_error(&err, Some(bot), Some(tag), source.as_deref());
                Ok(None)
            }
        }
    }

    pub(super) fn has_listener(&self, bot: &str, tag: &str) -> bool {
        self.store
            .get(bot)
            .and_then(|b| b.compiled.get(tag))
            .is_some_and(CompiledTag::is_listener)
    }

    fn view_get(&mut self, bot: &str, kind: ViewKind, key: &str) -> Result<Value, ScriptError> {
        let Some(compiled_bot) = self.store.get(bot) else {
            return Ok(Value::Undefined);
        };
        let value = match kind {
            ViewKind::Tags => match key {
                "id" => Value::from(bot),
                "space" => Value::from(compiled_bot.space().to_string()),
                _ => return self.read_tag(bot, key),
            },
            ViewKind::Raw => {
                let raw = compiled_bot.raw.get(key).map(Value::from_json);
                self.track(Dependency::BotTag {
                    bot: bot.to_string(),
                    tag: key.to_string(),
                });
                raw.unwrap_or_default()
            }
            ViewKind::Masks => {
                let mask = compiled_bot.mask_value(key);
                self.track(Dependency::BotTag {
                    bot: bot.to_string(),
                    tag: key.to_string(),
                });
                mask.unwrap_or_default()
            }
            ViewKind::Listeners => {
                if self.has_listener(bot, key) {
                    Value::Listener {
                        bot: bot.to_string(),
                        tag: key.to_string(),
                    }
                } else {
                    Value::Undefined
                }
            }
            ViewKind::Changes => compiled_bot
                .changes
                .get(key)
                .map(Value::from_json)
                .unwrap_or_default(),
            ViewKind::MaskChanges => Space::MASK_PRIORITY
                .iter()
                .filter_map(|space| compiled_bot.mask_changes.get(&Space::new(*space)))
                .find_map(|tags| tags.get(key))
                .map(Value::from_json)
                .unwrap_or_default(),
        };
        Ok(value)
    }
}

impl ScriptEnv for BotRuntime {
    fn consume_energy(&mut self, amount: u64) -> Result<(), ScriptError> {
        self.energy.consume(amount)
    }

    fn get_member(&mut self, target: &Value, key: &str) -> Result<Value, ScriptError> {
        match target {
            Value::Bot(id) => {
                let kind = match key {
                    "id" => return Ok(Value::from(id.as_str())),
                    "space" => {
                        return Ok(self
                            .store
                            .get(id)
                            .map(|b| Value::from(b.space().to_string()))
                            .unwrap_or_default())
                    }
                    "tags" => ViewKind::Tags,
                    "raw" => ViewKind::Raw,
                    "masks" => ViewKind::Masks,
                    "listeners" => ViewKind::Listeners,
                    "changes" => ViewKind::Changes,
                    "maskChanges" => ViewKind::MaskChanges,
                    _ => return Ok(Value::Undefined),
                };
                Ok(Value::View {
                    bot: id.clone(),
                    kind,
                })
            }
            Value::View { bot, kind } => self.view_get(bot, *kind, key),
            Value::Listener { tag, .. } if key == "name" => Ok(Value::from(tag.as_str())),
            _ => Ok(Value::Undefined),
        }
    }

    fn set_member(&mut self, target: &Value, key: &str, value: Value) -> Result<(), ScriptError> {
        match target {
            Value::View {
                bot,
                kind: ViewKind::Tags | ViewKind::Raw,
            } => {
                self.set_tag(bot, key, &value);
                Ok(())
            }
            Value::View {
                bot,
                kind: ViewKind::Masks,
            } => {
                self.set_mask(bot, key, &value, &Space::temp_local());
                Ok(())
            }
            // Bot members and the remaining views are read-only
            _ => Ok(()),
        }
    }

    fn delete_member(&mut self, target: &Value, key: &str) -> Result<bool, ScriptError> {
        match target {
            Value::View {
                bot,
                kind: ViewKind::Tags | ViewKind::Raw,
            } => {
                self.set_tag(bot, key, &Value::Undefined);
                Ok(true)
            }
            Value::View {
                bot,
                kind: ViewKind::Masks,
            } => {
                self.set_mask(bot, key, &Value::Undefined, &Space::temp_local());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn keys(&mut self, target: &Value) -> Result<Vec<String>, ScriptError> {
        let (bot, kind) = match target {
            Value::Bot(_) => return Ok(BOT_MEMBERS.iter().map(|k| k.to_string()).collect()),
            Value::View { bot, kind } => (bot.clone(), *kind),
            _ => return Ok(Vec::new()),
        };
        self.track(Dependency::Id(bot.clone()));
        let Some(compiled_bot) = self.store.get(&bot) else {
            return Ok(Vec::new());
        };
        let keys = match kind {
            ViewKind::Tags | ViewKind::Raw => compiled_bot.raw.keys().cloned().collect(),
            ViewKind::Masks => {
                let mut keys: Vec<String> = compiled_bot
                    .masks
                    .values()
                    .flat_map(|tags| tags.keys().cloned())
                    .collect();
                keys.sort();
                keys.dedup();
                keys
            }
            ViewKind::Listeners => compiled_bot
                .compiled
                .iter()
                .filter(|(_, c)| c.is_listener())
                .map(|(tag, _)| tag.clone())
                .collect(),
            ViewKind::Changes => compiled_bot.changes.keys().cloned().collect(),
            ViewKind::MaskChanges => {
                let mut keys: Vec<String> = compiled_bot
                    .mask_changes
                    .values()
                    .flat_map(|tags| tags.keys().cloned())
                    .collect();
                keys.sort();
                keys.dedup();
                keys
            }
        };
        Ok(keys)
    }

    fn call_method(
        &mut self,
        target: &Value,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Option<Value>, ScriptError> {
        match (target, method) {
            (Value::Promise(promise), "then") => {
                let on_fulfilled = handler(args.first());
                let on_rejected = handler(args.get(1));
                let context = self.current_frame();
                let derived = self.promises.then(promise.id(), on_fulfilled, on_rejected, context);
                Ok(Some(self.promises.handle(derived)))
            }
            (Value::Promise(promise), "catch") => {
                let on_rejected = handler(args.first());
                let context = self.current_frame();
                let derived = self.promises.then(promise.id(), None, on_rejected, context);
                Ok(Some(self.promises.handle(derived)))
            }
            (Value::Bot(id), "toString") => Ok(Some(Value::from(format!("Bot({})", id)))),
            _ => Ok(None),
        }
    }

    fn call_value(&mut self, callee: &Value, args: Vec<Value>) -> Result<Value, ScriptError> {
        match callee {
            Value::Listener { bot, tag } => {
                let that = args.into_iter().next().unwrap_or_default();
                let outcome = self.run_listener(bot, tag, that)?;
                Ok(outcome.map(|o| o.value).unwrap_or_default())
            }
            Value::Function(func) => {
                let func = func.clone();
                func.call(self, args)
            }
            other => Err(ScriptError::type_error(format!("{} is not a function", other))),
        }
    }

    fn call_library(&mut self, name: &str, args: Vec<Value>) -> Result<Option<Value>, ScriptError> {
        self.library_call(name, args)
    }
}

/// A promise handler argument, if callable
fn handler(value: Option<&Value>) -> Option<Value> {
    match value {
        Some(v @ (Value::Function(_) | Value::Listener { .. })) => Some(v.clone()),
        _ => None,
    }
}
