//! `create` and `destroy`

use super::{value_to_raw, BotRuntime};
use botrt_script::{ScriptError, Value};
use botrt_types::{Action, Bot, BotId, BotTags, RealtimeEditMode, Space};
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

type Mod = BTreeMap<String, Value>;

impl BotRuntime {
    /// Create bots from mods. Array arguments multiply: `create({a: 1},
    /// [{b: 1}, {b: 2}])` creates two bots.
    pub(super) fn create_bots(&mut self, args: Vec<Value>) -> Result<Value, ScriptError> {
        let mut variants: Vec<Mod> = vec![Mod::new()];
        for arg in &args {
            let alternatives: Vec<Mod> = match arg {
                Value::Array(items) => items.iter().filter_map(|item| self.mod_of(item)).collect(),
                other => self.mod_of(other).into_iter().collect(),
            };
            if alternatives.is_empty() {
                continue;
            }
            variants = variants
                .iter()
                .flat_map(|base| {
                    alternatives.iter().map(move |alt| {
                        let mut merged = base.clone();
                        merged.extend(alt.iter().map(|(k, v)| (k.clone(), v.clone())));
                        merged
                    })
                })
                .collect();
        }

        let single = variants.len() == 1;
        let mut created: Vec<BotId> = Vec::new();
        for variant in variants {
            if let Some(id) = self.create_one(variant) {
                created.push(id);
            }
        }

        for id in &created {
            self.run_listener(id, "onCreate", Value::Undefined)?;
        }
        for id in &created {
            let arg = Value::object([("bot", Value::Bot(id.clone()))]);
            self.run_on_all("onAnyCreate", &arg)?;
        }

        let mut bots = created.into_iter().map(Value::Bot);
        Ok(if single {
            bots.next().unwrap_or(Value::Null)
        } else {
            Value::Array(bots.collect())
        })
    }

    /// Tags contributed by one `create` argument
    fn mod_of(&self, value: &Value) -> Option<Mod> {
        match value {
            Value::Object(map) => Some(map.clone()),
            Value::Bot(id) => self.store.get(id).map(|bot| {
                bot.raw
                    .iter()
                    .map(|(tag, raw)| (tag.clone(), Value::from_json(raw)))
                    .collect()
            }),
            _ => None,
        }
    }

    /// Returns the id when the bot was inserted into the live store
    fn create_one(&mut self, variant: Mod) -> Option<BotId> {
        let mut space: Option<Space> = None;
        let mut creator = self.current_bot();
        let mut tags = BotTags::new();
        for (tag, value) in variant {
            match tag.as_str() {
                "id" => {}
                "space" => space = value.as_str().map(Space::new),
                "creator" => {
                    creator = match &value {
                        Value::Bot(id) | Value::String(id) => Some(id.clone()),
                        _ => None,
                    }
                }
                _ => {
                    let raw = value_to_raw(&value);
                    if !raw.is_null() {
                        tags.insert(tag, raw);
                    }
                }
            }
        }

        let effective = space.clone().unwrap_or_default();
        let creator = creator.filter(|id| {
            self.store
                .get(id)
                .is_some_and(|parent| parent.space() == effective)
        });
        if let Some(creator) = creator {
            tags.insert("creator".to_string(), serde_json::Value::String(creator));
        }

        let id = self.ids.next_id();
        let bot = Bot {
            id: id.clone(),
            space,
            tags,
            masks: Default::default(),
        };
        match self.gate.mode_for(&effective) {
            RealtimeEditMode::Immediate => {
                debug!(bot = %id, "bot created");
                self.insert_bot(&bot);
                self.record_action(Action::BotAdded { id: id.clone(), bot });
                Some(id)
            }
            RealtimeEditMode::Delayed => {
                self.record_action(Action::BotAdded { id, bot });
                None
            }
            RealtimeEditMode::None => None,
        }
    }

    /// Destroy bots and, through `creator` links, their descendants
    pub(super) fn destroy_bots(&mut self, target: &Value) -> Result<(), ScriptError> {
        let roots = match target {
            Value::Bot(id) | Value::String(id) => vec![id.clone()],
            Value::View { bot, .. } => vec![bot.clone()],
            Value::Array(items) => items.iter().filter_map(|v| v.bot_id().or(v.as_str())).map(str::to_string).collect(),
            _ => Vec::new(),
        };

        let order = self.destroy_order(roots)?;
        for id in order {
            let Some(space) = self.store.get(&id).map(|bot| bot.space()) else {
                continue;
            };
            self.run_listener(&id, "onDestroy", Value::Undefined)?;
            match self.gate.mode_for(&space) {
                RealtimeEditMode::Immediate => {
                    debug!(bot = %id, "bot destroyed");
                    self.remove_bot(&id);
                    self.record_action(Action::BotRemoved { id });
                }
                RealtimeEditMode::Delayed => self.record_action(Action::BotRemoved { id }),
                RealtimeEditMode::None => {}
            }
        }
        Ok(())
    }

    /// Pre-order walk over `creator` links. Bots whose `destroyable` tag is
    /// `false` are skipped together with their descendants.
    fn destroy_order(&mut self, roots: Vec<BotId>) -> Result<Vec<BotId>, ScriptError> {
        let mut order = Vec::new();
        let mut visited = HashSet::new();
        let mut stack: Vec<BotId> = roots.into_iter().rev().collect();
        while let Some(id) = stack.pop() {
            if !visited.insert(id.clone()) || !self.store.contains(&id) {
                continue;
            }
            if self.fresh_value(&id, "destroyable")? == Value::Bool(false) {
                continue;
            }
            let children: Vec<BotId> = self
                .store
                .iter()
                .filter(|bot| bot.raw.get("creator").and_then(|c| c.as_str()) == Some(id.as_str()))
                .map(|bot| bot.id.clone())
                .collect();
            order.push(id);
            stack.extend(children.into_iter().rev());
        }
        Ok(order)
    }
}
