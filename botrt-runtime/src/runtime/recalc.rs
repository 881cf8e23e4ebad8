//! Formula evaluation and dirty propagation

use super::BotRuntime;
use crate::compiler::{ArrayItem, CompileOutcome, CompiledTag};
use crate::deps::{Change, Dependency, FormulaKey};
use crate::store::CompiledBot;
use crate::tasks::Frame;
use botrt_script::{CompileError, Energy, ScriptError, Value};
use std::collections::BTreeMap;
use tracing::{debug, warn};

impl BotRuntime {
    /// Mark dirty every formula whose dependency record matches `change`
    pub(super) fn notify(&mut self, change: Change) {
        self.notify_except(change, None);
    }

    pub(super) fn notify_except(&mut self, change: Change, except: Option<&FormulaKey>) {
        for key in self.deps.affected(&change) {
            if Some(&key) == except {
                continue;
            }
            if let Some(bot) = self.store.get(&key.bot) {
                self.dirty.insert((bot.ordinal, key.tag));
            }
        }
    }

    pub(super) fn track(&mut self, dependency: Dependency) {
        if let Some(frame) = self.tracking.last_mut() {
            frame.push(dependency);
        }
    }

    /// Evaluate dirty formulas in (ordinal, tag) order until none remain.
    /// Each formula gets its own step budget; a formula that exhausts it
    /// stores an error value instead of failing the caller.
    pub(super) fn drain_dirty(&mut self) {
        while let Some((ordinal, tag)) = self.dirty.pop_first() {
            let Some(id) = self.store.id_at(ordinal).cloned() else {
                continue;
            };
            let key = FormulaKey::new(id, tag);
            let saved = std::mem::replace(&mut self.energy, Energy::new(self.config.energy));
            let result = self.evaluate_formula(&key);
            self.energy = saved;

            if let Err(err) = result {
                warn!(bot = %key.bot, tag = %key.tag, "formula ran out of energy");
                self.dirty.remove(&(ordinal, key.tag.clone()));
                let script = self.raw_text(&key.bot, &key.tag);
                self.record_error(&err, Some(&key.bot), Some(&key.tag), script.as_deref());
                self.store_formula_value(&key, err.into_error_value());
            }
        }
        self.eval_counts.clear();
    }

    /// Evaluate a formula if it is dirty or has never been computed
    pub(super) fn ensure_fresh(&mut self, bot: &str, tag: &str) -> Result<(), ScriptError> {
        let Some(compiled_bot) = self.store.get(bot) else {
            return Ok(());
        };
        let is_dirty = self.dirty.contains(&(compiled_bot.ordinal, tag.to_string()));
        let never_computed = compiled_bot
            .compiled
            .get(tag)
            .is_some_and(CompiledTag::is_formula)
            && !compiled_bot.values.contains_key(tag);
        if is_dirty || never_computed {
            self.evaluate_formula(&FormulaKey::new(bot, tag))?;
        }
        Ok(())
    }

    /// Current value of a tag with masks applied, without freshness checks
    pub(super) fn peek_tag(&self, bot: &str, tag: &str) -> Value {
        let Some(compiled_bot) = self.store.get(bot) else {
            return Value::Undefined;
        };
        compiled_bot
            .mask_value(tag)
            .or_else(|| compiled_bot.values.get(tag).cloned())
            .unwrap_or_default()
    }

    /// Up-to-date value of a tag, untracked
    pub(super) fn fresh_value(&mut self, bot: &str, tag: &str) -> Result<Value, ScriptError> {
        self.ensure_fresh(bot, tag)?;
        Ok(self.peek_tag(bot, tag))
    }

    /// Up-to-date value of a tag, recorded as a dependency of the formula
    /// being evaluated
    pub(super) fn read_tag(&mut self, bot: &str, tag: &str) -> Result<Value, ScriptError> {
        self.track(Dependency::BotTag {
            bot: bot.to_string(),
            tag: tag.to_string(),
        });
        self.fresh_value(bot, tag)
    }

    pub(super) fn raw_text(&self, bot: &str, tag: &str) -> Option<String> {
        self.store
            .get(bot)
            .and_then(|b| b.raw.get(tag))
            .and_then(|raw| raw.as_str())
            .map(str::to_string)
    }

    fn evaluate_formula(&mut self, key: &FormulaKey) -> Result<(), ScriptError> {
        let Some(compiled_bot) = self.store.get(&key.bot) else {
            return Ok(());
        };
        let ordinal = compiled_bot.ordinal;
        let Some(compiled) = compiled_bot.compiled.get(&key.tag).cloned() else {
            return Ok(());
        };
        self.dirty.remove(&(ordinal, key.tag.clone()));

        if !compiled.is_formula() || self.in_progress.contains(key) {
            return Ok(());
        }

        let count = self.eval_counts.entry(key.clone()).or_insert(0);
        *count += 1;
        if *count > self.config.max_recalculations {
            warn!(bot = %key.bot, tag = %key.tag, "recalculation limit reached, possible cycle");
            return Ok(());
        }

        self.in_progress.push(key.clone());
        self.tracking.push(Vec::new());
        self.frames
            .push(Frame::new(Some(key.bot.clone()), Some(key.tag.clone())));

        let result = self.compute_formula(key, &compiled);

        self.frames.pop();
        let dependencies = self.tracking.pop().unwrap_or_default();
        self.in_progress.pop();
        self.deps.set(key.clone(), dependencies);

        match result {
            Ok(value) => self.store_formula_value(key, value),
            Err(ScriptError::OutOfEnergy) => {
                self.dirty.insert((ordinal, key.tag.clone()));
                return Err(ScriptError::OutOfEnergy);
            }
            Err(err) => {
                let script = self.raw_text(&key.bot, &key.tag);
                self.record_error(&err, Some(&key.bot), Some(&key.tag), script.as_deref());
                self.store_formula_value(key, err.into_error_value());
            }
        }
        Ok(())
    }

    fn compute_formula(
        &mut self,
        key: &FormulaKey,
        compiled: &CompiledTag,
    ) -> Result<Value, ScriptError> {
        match compiled {
            CompiledTag::Formula(outcome) => self.run_formula(key, outcome),
            CompiledTag::FormulaArray(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(match item {
                        ArrayItem::Literal(value) => value.clone(),
                        ArrayItem::Formula(outcome) => self.run_formula(key, outcome)?,
                    });
                }
                Ok(Value::Array(values))
            }
            CompiledTag::Literal(value) => Ok(value.clone()),
            CompiledTag::Listener(_) => Ok(Value::Undefined),
        }
    }

    fn run_formula(&mut self, key: &FormulaKey, outcome: &CompileOutcome) -> Result<Value, ScriptError> {
        let script = outcome.as_ref().map_err(compile_error)?.clone();
        let bindings = self.bindings(&key.bot, &key.tag, Value::Undefined)?;
        Ok(script.run(self, bindings)?.value)
    }

    /// Store a computed value and invalidate dependents if it changed
    pub(super) fn store_formula_value(&mut self, key: &FormulaKey, value: Value) {
        let Some(compiled_bot) = self.store.get_mut(&key.bot) else {
            return;
        };
        let ordinal = compiled_bot.ordinal;
        let old = compiled_bot.values.insert(key.tag.clone(), value.clone());
        if old.as_ref() == Some(&value) {
            return;
        }
        debug!(bot = %key.bot, tag = %key.tag, "formula recalculated");
        if let Some(report) = self.report.as_mut() {
            report.record(ordinal, &key.bot, &key.tag, value.to_json());
        }
        self.notify_except(
            Change::TagChanged {
                bot: key.bot.clone(),
                tag: key.tag.clone(),
                old,
                new: Some(value),
            },
            Some(key),
        );
    }
}

/// Tag values of a bot as seen by tag filters, `None` for formulas that
/// have not been computed
pub(super) fn tag_snapshot(bot: &CompiledBot) -> BTreeMap<String, Option<Value>> {
    let mut snapshot: BTreeMap<String, Option<Value>> = bot
        .raw
        .keys()
        .map(|tag| {
            let value = bot.mask_value(tag).or_else(|| bot.values.get(tag).cloned());
            (tag.clone(), value)
        })
        .collect();
    for tags in bot.masks.values() {
        for tag in tags.keys() {
            snapshot
                .entry(tag.clone())
                .or_insert_with(|| bot.mask_value(tag));
        }
    }
    snapshot
}

/// A compile error as the script error reported when the tag runs
pub(super) fn compile_error(err: &CompileError) -> ScriptError {
    ScriptError::Thrown {
        value: Value::error("SyntaxError", err.message.clone()),
        line: Some(err.line),
        column: Some(err.column),
    }
}
