//! Typed live view of one bot

use super::{entry_result, Batch, BotRuntime};
use crate::compiler::CompiledTag;
use crate::error::RuntimeResult;
use crate::tasks::Frame;
use botrt_script::Value;
use botrt_types::{BotId, BotTags, Space, TagMasks};

/// A live bot borrowed from a [`BotRuntime`]
///
/// Reads see the current store, evaluating dirty formulas first. Writes go
/// through the edit-mode gate and run as one batch each, exactly as if a
/// script had made them. Writes to `id` and `space` are ignored.
pub struct RuntimeBot<'r> {
    runtime: &'r mut BotRuntime,
    id: BotId,
}

impl<'r> RuntimeBot<'r> {
    pub(super) fn new(runtime: &'r mut BotRuntime, id: BotId) -> Self {
        Self { runtime, id }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn space(&self) -> Space {
        self.runtime
            .store
            .get(&self.id)
            .map(|bot| bot.space())
            .unwrap_or_default()
    }

    /// Calculated value of a tag with masks applied. A formula that fails
    /// reads as its error value.
    pub fn tag(&mut self, name: &str) -> Value {
        match name {
            "id" => return Value::from(self.id.as_str()),
            "space" => return Value::from(self.space().to_string()),
            _ => {}
        }
        let id = self.id.clone();
        let (result, _) = self
            .runtime
            .entry(Frame::default(), |rt| rt.fresh_value(&id, name));
        result.unwrap_or_else(|err| err.into_error_value())
    }

    pub fn raw(&self, name: &str) -> Option<serde_json::Value> {
        self.runtime
            .store
            .get(&self.id)
            .and_then(|bot| bot.raw.get(name))
            .cloned()
    }

    /// Highest priority mask of a tag
    pub fn mask(&self, name: &str) -> Option<Value> {
        self.runtime
            .store
            .get(&self.id)
            .and_then(|bot| bot.mask_value(name))
    }

    pub fn set_tag(&mut self, name: &str, value: impl Into<serde_json::Value>) -> RuntimeResult<Batch> {
        let value = Value::from_json(&value.into());
        self.write(|rt, id| rt.set_tag(id, name, &value))
    }

    pub fn delete_tag(&mut self, name: &str) -> RuntimeResult<Batch> {
        self.write(|rt, id| rt.set_tag(id, name, &Value::Undefined))
    }

    pub fn set_mask(
        &mut self,
        name: &str,
        value: impl Into<serde_json::Value>,
        space: Space,
    ) -> RuntimeResult<Batch> {
        let value = Value::from_json(&value.into());
        self.write(|rt, id| rt.set_mask(id, name, &value, &space))
    }

    /// Read an array tag, let `mutate` change it, and write it back.
    /// A missing tag starts as an empty array, a scalar as a one-element one.
    pub fn update_array(&mut self, name: &str, mutate: impl FnOnce(&mut Vec<Value>)) -> RuntimeResult<Batch> {
        let mut items = match self.tag(name) {
            Value::Array(items) => items,
            value if value.is_nullish() => Vec::new(),
            value => vec![value],
        };
        mutate(&mut items);
        self.write(|rt, id| rt.set_tag(id, name, &Value::Array(items)))
    }

    /// Names of the tags holding listeners
    pub fn listeners(&self) -> Vec<String> {
        self.runtime
            .store
            .get(&self.id)
            .map(|bot| {
                bot.compiled
                    .iter()
                    .filter(|(_, tag)| tag.is_listener())
                    .map(|(name, _)| name.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Tags written in the batch in progress. Empty between entries.
    pub fn changes(&self) -> BotTags {
        self.runtime
            .store
            .get(&self.id)
            .map(|bot| bot.changes.clone())
            .unwrap_or_default()
    }

    pub fn mask_changes(&self) -> TagMasks {
        self.runtime
            .store
            .get(&self.id)
            .map(|bot| bot.mask_changes.clone())
            .unwrap_or_default()
    }

    pub fn is_formula(&self, name: &str) -> bool {
        self.runtime
            .store
            .get(&self.id)
            .and_then(|bot| bot.compiled.get(name))
            .is_some_and(CompiledTag::is_formula)
    }

    fn write(&mut self, body: impl FnOnce(&mut BotRuntime, &str)) -> RuntimeResult<Batch> {
        self.runtime.ensure_open()?;
        let id = self.id.clone();
        let (result, batch) = self.runtime.entry(Frame::default(), |rt| {
            body(rt, &id);
            Ok(())
        });
        entry_result(result)?;
        self.runtime.run_jobs();
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use botrt_types::{Action, Bot};
    use serde_json::json;

    #[test]
    fn test_reads_follow_writes() {
        let mut runtime = BotRuntime::default();
        runtime.add_bots(vec![Bot::new("a").with_tag("n", "2").with_tag("double", "=tags.n * 2")]);
        let mut bot = runtime.bot("a").unwrap();
        assert_eq!(bot.tag("double"), Value::Number(4.0));

        let batch = bot.set_tag("n", 5).unwrap();
        assert_eq!(bot.tag("double"), Value::Number(10.0));
        assert!(matches!(&batch.actions[0], Action::BotUpdated { tags, .. } if tags["n"] == json!(5)));
    }

    #[test]
    fn test_id_and_space_are_read_only() {
        let mut runtime = BotRuntime::default();
        runtime.add_bots(vec![Bot::new("a")]);
        let mut bot = runtime.bot("a").unwrap();
        let batch = bot.set_tag("id", "b").unwrap();
        assert!(batch.is_empty());
        bot.set_tag("space", "tempLocal").unwrap();
        assert_eq!(bot.id(), "a");
        assert_eq!(bot.space(), Space::shared());
    }

    #[test]
    fn test_mask_shadows_tag() {
        let mut runtime = BotRuntime::default();
        runtime.add_bots(vec![Bot::new("a").with_tag("color", "red")]);
        let mut bot = runtime.bot("a").unwrap();
        bot.set_mask("color", "blue", Space::temp_local()).unwrap();
        assert_eq!(bot.tag("color"), Value::from("blue"));
        assert_eq!(bot.raw("color"), Some(json!("red")));
        assert_eq!(bot.mask("color"), Some(Value::from("blue")));
    }

    #[test]
    fn test_update_array_commits() {
        let mut runtime = BotRuntime::default();
        runtime.add_bots(vec![Bot::new("a").with_tag("list", "[1,2,3]")]);
        let mut bot = runtime.bot("a").unwrap();
        bot.update_array("list", |items| items.push(Value::Number(4.0))).unwrap();
        assert_eq!(bot.raw("list"), Some(json!([1, 2, 3, 4])));
        assert_eq!(
            bot.tag("list"),
            Value::Array(vec![1.0, 2.0, 3.0, 4.0].into_iter().map(Value::Number).collect())
        );
    }

    #[test]
    fn test_listeners_and_delete() {
        let mut runtime = BotRuntime::default();
        runtime.add_bots(vec![Bot::new("a").with_tag("onClick", "@os.toast(1)").with_tag("n", "1")]);
        let mut bot = runtime.bot("a").unwrap();
        assert_eq!(bot.listeners(), vec!["onClick".to_string()]);
        bot.delete_tag("n").unwrap();
        assert_eq!(bot.raw("n"), None);
        assert!(bot.changes().is_empty());
    }
}
