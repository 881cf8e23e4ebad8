//! Compiled bot store

use crate::compiler::{coerce_json, CompiledTag, TagCompiler};
use botrt_script::Value;
use botrt_types::{Bot, BotId, BotState, BotTags, Space, TagMasks};
use std::collections::{BTreeMap, HashMap};

/// Runtime-owned state of one live bot
#[derive(Debug, Clone)]
pub struct CompiledBot {
    pub id: BotId,
    /// Insertion position, stable across overwrites
    pub ordinal: u64,
    pub space: Option<Space>,
    pub raw: BotTags,
    pub compiled: BTreeMap<String, CompiledTag>,
    /// Memoised formula results and coerced literals
    pub values: BTreeMap<String, Value>,
    pub masks: TagMasks,
    /// Tags written during the current batch
    pub changes: BotTags,
    pub mask_changes: TagMasks,
}

impl CompiledBot {
    pub fn from_bot(bot: &Bot, ordinal: u64, compiler: &TagCompiler) -> Self {
        let mut compiled_bot = Self {
            id: bot.id.clone(),
            ordinal,
            space: bot.space.clone(),
            raw: BotTags::new(),
            compiled: BTreeMap::new(),
            values: BTreeMap::new(),
            masks: bot.masks.clone(),
            changes: BotTags::new(),
            mask_changes: TagMasks::new(),
        };
        for (tag, raw) in &bot.tags {
            compiled_bot.set_raw(tag, raw.clone(), compiler);
        }
        compiled_bot
    }

    /// The effective space, defaulting to shared
    pub fn space(&self) -> Space {
        self.space.clone().unwrap_or_default()
    }

    /// Replace a raw tag and recompile it. Formula values are left unset;
    /// the caller marks them dirty.
    pub fn set_raw(&mut self, tag: &str, raw: serde_json::Value, compiler: &TagCompiler) {
        let compiled = compiler.compile(&raw);
        self.values.remove(tag);
        match &compiled {
            CompiledTag::Literal(value) => {
                self.values.insert(tag.to_string(), value.clone());
            }
            CompiledTag::Listener(_) => {
                if let serde_json::Value::String(text) = &raw {
                    self.values.insert(tag.to_string(), Value::String(text.clone()));
                }
            }
            CompiledTag::Formula(_) | CompiledTag::FormulaArray(_) => {}
        }
        self.compiled.insert(tag.to_string(), compiled);
        self.raw.insert(tag.to_string(), raw);
    }

    pub fn remove_raw(&mut self, tag: &str) -> bool {
        self.values.remove(tag);
        self.compiled.remove(tag);
        self.raw.remove(tag).is_some()
    }

    /// Highest-priority mask for a tag, coerced
    pub fn mask_value(&self, tag: &str) -> Option<Value> {
        Space::MASK_PRIORITY
            .iter()
            .filter_map(|space| self.masks.get(&Space::new(*space)))
            .find_map(|tags| tags.get(tag))
            .map(coerce_json)
    }

    pub fn formula_tags(&self) -> Vec<String> {
        self.compiled
            .iter()
            .filter(|(_, c)| c.is_formula())
            .map(|(tag, _)| tag.clone())
            .collect()
    }

    /// Full state entry for a `StateUpdatedEvent`
    pub fn full_state(&self) -> BotState {
        BotState {
            space: self.space.clone(),
            tags: self.raw.clone(),
            values: self
                .values
                .iter()
                .map(|(tag, value)| (tag.clone(), value.to_json()))
                .collect(),
            masks: self.masks.clone(),
        }
    }
}

/// All live bots, keyed by id and ordered by insertion
#[derive(Debug, Default)]
pub struct BotStore {
    bots: HashMap<BotId, CompiledBot>,
    order: BTreeMap<u64, BotId>,
    next_ordinal: u64,
}

impl BotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ordinal for a new bot, or the existing one when `id` is live
    pub fn ordinal_for(&mut self, id: &str) -> u64 {
        if let Some(bot) = self.bots.get(id) {
            return bot.ordinal;
        }
        let ordinal = self.next_ordinal;
        self.next_ordinal += 1;
        ordinal
    }

    pub fn insert(&mut self, bot: CompiledBot) -> Option<CompiledBot> {
        self.order.insert(bot.ordinal, bot.id.clone());
        self.bots.insert(bot.id.clone(), bot)
    }

    pub fn remove(&mut self, id: &str) -> Option<CompiledBot> {
        let bot = self.bots.remove(id)?;
        self.order.remove(&bot.ordinal);
        Some(bot)
    }

    pub fn get(&self, id: &str) -> Option<&CompiledBot> {
        self.bots.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut CompiledBot> {
        self.bots.get_mut(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.bots.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.bots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bots.is_empty()
    }

    pub fn id_at(&self, ordinal: u64) -> Option<&BotId> {
        self.order.get(&ordinal)
    }

    pub fn ids_in_order(&self) -> Vec<BotId> {
        self.order.values().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CompiledBot> {
        self.order.values().filter_map(|id| self.bots.get(id))
    }
}
