//! The bot runtime
//!
//! [`BotRuntime`] owns the compiled store, the dependency graph, the
//! promise table and the timer scheduler. Every top-level entry (shout,
//! whisper, execute, process, a timer firing or a promise job) runs as one
//! batch: actions and errors recorded while it runs are emitted together,
//! with one `bot_updated` per touched bot appended at the end.
//!
//! The runtime is itself the [`botrt_script::ScriptEnv`] handed to running
//! scripts, so every read and write a script performs goes through the same
//! store, gate and dependency tracking as host calls.

mod async_ops;
mod bot_view;
mod dispatch;
mod env;
mod ingest;
mod library;
mod lifecycle;
mod mutation;
mod recalc;

pub use bot_view::RuntimeBot;

use crate::compiler::TagCompiler;
use crate::config::RuntimeConfig;
use crate::deps::{Dependency, DependencyGraph, FormulaKey};
use crate::edit_mode::{EditModeGate, EditModeMap, EditModeProvider};
use crate::error::{RuntimeError, RuntimeResult};
use crate::ids::{IdGenerator, UuidIds};
use crate::scheduler::Scheduler;
use crate::store::BotStore;
use crate::tasks::{Frame, PromiseTable, TaskBridge};
use botrt_script::{BotScriptHost, Energy, ScriptError, ScriptHost, Value};
use botrt_types::{Action, BotId, ScriptErrorRecord};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{debug, warn};

/// Actions and errors produced by one top-level entry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub actions: Vec<Action>,
    pub errors: Vec<ScriptErrorRecord>,
}

impl Batch {
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty() && self.errors.is_empty()
    }
}

/// Result of [`BotRuntime::shout`] and [`BotRuntime::whisper`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShoutResult {
    /// One entry per listener that completed, in listener order, as left
    /// by the `onListen` / `onAnyListen` hooks
    pub results: Vec<serde_json::Value>,
    pub actions: Vec<Action>,
    pub errors: Vec<ScriptErrorRecord>,
}

/// Result of [`BotRuntime::execute`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecuteResult {
    pub value: serde_json::Value,
    pub actions: Vec<Action>,
    pub errors: Vec<ScriptErrorRecord>,
}

/// Batch under construction
#[derive(Debug, Default)]
struct PendingBatch {
    actions: Vec<Action>,
    errors: Vec<ScriptErrorRecord>,
    /// Bots with pending `changes`, in first-touch order
    touched: Vec<BotId>,
}

/// An `onStoryAction` pass in progress
#[derive(Debug)]
struct FilterFrame {
    action: serde_json::Value,
    rejected: bool,
}

/// Values and bots that changed during one ingestion call
#[derive(Debug, Default)]
struct UpdateReport {
    /// Ordinal to id of bots whose values changed
    bots: BTreeMap<u64, BotId>,
    values: HashMap<BotId, BTreeMap<String, serde_json::Value>>,
}

impl UpdateReport {
    fn record(&mut self, ordinal: u64, bot: &str, tag: &str, value: serde_json::Value) {
        self.bots.insert(ordinal, bot.to_string());
        self.values
            .entry(bot.to_string())
            .or_default()
            .insert(tag.to_string(), value);
    }
}

pub struct BotRuntime {
    config: RuntimeConfig,
    compiler: TagCompiler,
    store: BotStore,
    deps: DependencyGraph,

    /// Formulas awaiting evaluation, keyed by (bot ordinal, tag)
    dirty: BTreeSet<(u64, String)>,
    in_progress: Vec<FormulaKey>,
    eval_counts: HashMap<FormulaKey, u32>,
    /// One dependency list per formula being evaluated
    tracking: Vec<Vec<Dependency>>,

    gate: EditModeGate,
    ids: Box<dyn IdGenerator>,
    energy: Energy,

    promises: PromiseTable,
    tasks: TaskBridge,
    scheduler: Scheduler,

    batch: PendingBatch,
    frames: Vec<Frame>,
    filters: Vec<FilterFrame>,
    report: Option<UpdateReport>,

    action_subscribers: Vec<UnboundedSender<Vec<Action>>>,
    error_subscribers: Vec<UnboundedSender<Vec<ScriptErrorRecord>>>,
    closed: bool,
}

impl BotRuntime {
    pub fn new(config: RuntimeConfig) -> Self {
        let gate = EditModeGate::new(Arc::new(EditModeMap::new(config.edit_modes.clone())));
        let energy = Energy::new(config.energy);
        Self {
            compiler: TagCompiler::new(Arc::new(BotScriptHost::new())),
            store: BotStore::new(),
            deps: DependencyGraph::new(),
            dirty: BTreeSet::new(),
            in_progress: Vec::new(),
            eval_counts: HashMap::new(),
            tracking: Vec::new(),
            gate,
            ids: Box::new(UuidIds),
            energy,
            promises: PromiseTable::new(),
            tasks: TaskBridge::new(),
            scheduler: Scheduler::new(),
            batch: PendingBatch::default(),
            frames: Vec::new(),
            filters: Vec::new(),
            report: None,
            action_subscribers: Vec::new(),
            error_subscribers: Vec::new(),
            closed: false,
            config,
        }
    }

    /// Build a runtime from a YAML config file
    pub fn from_config_file(path: impl AsRef<std::path::Path>) -> RuntimeResult<Self> {
        let config = RuntimeConfig::from_file(path)?;
        Ok(Self::new(config))
    }

    /// Replace the script host. Bots already in the store keep their
    /// compiled tags.
    pub fn with_script_host(mut self, host: Arc<dyn ScriptHost>) -> Self {
        self.compiler = TagCompiler::new(host);
        self
    }

    pub fn with_id_generator(mut self, ids: impl IdGenerator + 'static) -> Self {
        self.ids = Box::new(ids);
        self
    }

    pub fn with_edit_mode_provider(mut self, provider: Arc<dyn EditModeProvider>) -> Self {
        self.gate.set_provider(provider);
        self
    }

    pub fn set_edit_mode_provider(&mut self, provider: Arc<dyn EditModeProvider>) {
        self.gate.set_provider(provider);
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Receive every non-empty action batch
    pub fn subscribe_actions(&mut self) -> UnboundedReceiver<Vec<Action>> {
        let (tx, rx) = unbounded_channel();
        self.action_subscribers.push(tx);
        rx
    }

    /// Receive every non-empty error batch
    pub fn subscribe_errors(&mut self) -> UnboundedReceiver<Vec<ScriptErrorRecord>> {
        let (tx, rx) = unbounded_channel();
        self.error_subscribers.push(tx);
        rx
    }

    /// Stop the runtime: timers are cleared, subscribers dropped, later
    /// task resolutions ignored. Pending tasks stay unresolved.
    pub fn unsubscribe(&mut self) {
        debug!(pending_tasks = self.tasks.pending(), "runtime unsubscribed");
        self.closed = true;
        self.scheduler.clear();
        self.promises.clear();
        self.action_subscribers.clear();
        self.error_subscribers.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Live view of a bot
    pub fn bot(&mut self, id: &str) -> Option<RuntimeBot<'_>> {
        if self.store.contains(id) {
            Some(RuntimeBot::new(self, id.to_string()))
        } else {
            None
        }
    }

    pub fn bot_ids(&self) -> Vec<BotId> {
        self.store.ids_in_order()
    }

    pub fn bot_count(&self) -> usize {
        self.store.len()
    }

    /// Run every listener named `name` on every bot
    pub fn shout(&mut self, name: &str, arg: serde_json::Value) -> RuntimeResult<ShoutResult> {
        self.shout_entry(name, None, arg)
    }

    /// Run the listener named `name` on the given bots, in the given order
    pub fn whisper(
        &mut self,
        ids: &[BotId],
        name: &str,
        arg: serde_json::Value,
    ) -> RuntimeResult<ShoutResult> {
        self.shout_entry(name, Some(ids.to_vec()), arg)
    }

    fn shout_entry(
        &mut self,
        name: &str,
        targets: Option<Vec<BotId>>,
        arg: serde_json::Value,
    ) -> RuntimeResult<ShoutResult> {
        self.ensure_open()?;
        let that = Value::from_json(&arg);
        let (result, batch) =
            self.entry(Frame::default(), |rt| rt.dispatch_shout(name, targets, that));
        let results = entry_result(result)?;
        self.run_jobs();
        Ok(ShoutResult {
            results: results.iter().map(Value::to_json).collect(),
            actions: batch.actions,
            errors: batch.errors,
        })
    }

    /// Compile and run a script. `return` produces the value.
    pub fn execute(&mut self, script: &str) -> RuntimeResult<ExecuteResult> {
        self.ensure_open()?;
        let (result, batch) =
            self.entry(Frame::default(), |rt| rt.run_script(script, Value::Undefined));
        let value = entry_result(result)?;
        self.run_jobs();
        Ok(ExecuteResult {
            value: value.to_json(),
            actions: batch.actions,
            errors: batch.errors,
        })
    }

    /// Offer actions to `onStoryAction` and execute the survivors
    pub fn process(&mut self, actions: Vec<Action>) -> RuntimeResult<Batch> {
        self.ensure_open()?;
        let (result, batch) = self.entry(Frame::default(), |rt| {
            for action in actions {
                rt.process_action(action)?;
            }
            Ok(())
        });
        entry_result(result)?;
        self.run_jobs();
        Ok(batch)
    }

    fn ensure_open(&self) -> RuntimeResult<()> {
        if self.closed {
            Err(RuntimeError::Closed)
        } else {
            Ok(())
        }
    }

    /// Run `body` as one batch. The batch is emitted to subscribers whether
    /// or not the body succeeded.
    fn entry<T>(
        &mut self,
        frame: Frame,
        body: impl FnOnce(&mut Self) -> Result<T, ScriptError>,
    ) -> (Result<T, ScriptError>, Batch) {
        self.energy.refill();
        self.frames.push(frame);
        let result = body(self);
        self.frames.pop();
        if result.as_ref().is_err_and(ScriptError::is_out_of_energy) {
            warn!(energy = self.energy.max(), "entry ran out of energy");
        }
        self.drain_dirty();
        let batch = self.finish_batch();
        (result, batch)
    }

    /// Close the pending batch: append one `bot_updated` per touched bot and
    /// emit the batch if it carries anything
    fn finish_batch(&mut self) -> Batch {
        let pending = std::mem::take(&mut self.batch);
        let mut actions = pending.actions;
        for id in pending.touched {
            let Some(bot) = self.store.get_mut(&id) else {
                continue;
            };
            if bot.changes.is_empty() && bot.mask_changes.is_empty() {
                continue;
            }
            actions.push(Action::BotUpdated {
                id,
                tags: std::mem::take(&mut bot.changes),
                masks: std::mem::take(&mut bot.mask_changes),
            });
        }
        let batch = Batch {
            actions,
            errors: pending.errors,
        };
        self.emit(&batch);
        batch
    }

    fn emit(&mut self, batch: &Batch) {
        if !batch.actions.is_empty() {
            debug!(actions = batch.actions.len(), "emitting action batch");
            self.action_subscribers
                .retain(|tx| tx.send(batch.actions.clone()).is_ok());
        }
        if !batch.errors.is_empty() {
            debug!(errors = batch.errors.len(), "emitting error batch");
            self.error_subscribers
                .retain(|tx| tx.send(batch.errors.clone()).is_ok());
        }
    }

    fn record_action(&mut self, action: Action) {
        self.batch.actions.push(action);
    }

    fn touch(&mut self, id: &str) {
        if !self.batch.touched.iter().any(|t| t == id) {
            self.batch.touched.push(id.to_string());
        }
    }

    fn current_frame(&self) -> Frame {
        self.frames.last().cloned().unwrap_or_default()
    }

    fn current_bot(&self) -> Option<BotId> {
        self.frames.iter().rev().find_map(|f| f.bot.clone())
    }

    /// Record a script failure on the error channel
    fn record_error(
        &mut self,
        err: &ScriptError,
        bot: Option<&str>,
        tag: Option<&str>,
        script: Option<&str>,
    ) {
        let (error, line, column) = match err {
            ScriptError::Thrown {
                value,
                line,
                column,
            } => (value.to_string(), *line, *column),
            ScriptError::OutOfEnergy => ("Error: Ran out of energy".to_string(), None, None),
        };
        debug!(?bot, ?tag, %error, "script error");
        self.batch.errors.push(ScriptErrorRecord {
            error,
            name: err.name(),
            bot: bot.map(str::to_string),
            tag: tag.map(str::to_string),
            script: script.map(str::to_string),
            line,
            column,
        });
    }
}

impl Default for BotRuntime {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}

fn entry_result<T>(result: Result<T, ScriptError>) -> RuntimeResult<T> {
    match result {
        Ok(value) => Ok(value),
        Err(ScriptError::OutOfEnergy) => Err(RuntimeError::OutOfEnergy),
        Err(err) => Err(RuntimeError::Script(err.to_string())),
    }
}

/// Raw JSON form of a value written to a tag. `undefined` deletes.
fn value_to_raw(value: &Value) -> serde_json::Value {
    value.to_json()
}

/// Whether a tag value counts as present for tag filters
fn has_value(value: &Value) -> bool {
    !value.is_nullish() && value.as_str() != Some("")
}

#[cfg(test)]
mod tests {
    use super::*;
    use botrt_types::Bot;
    use serde_json::json;

    #[test]
    fn test_from_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, b"energy: 42\n").unwrap();
        let runtime = BotRuntime::from_config_file(file.path()).unwrap();
        assert_eq!(runtime.config().energy, 42);

        let err = BotRuntime::from_config_file("/definitely/not/here.yml").err().unwrap();
        assert!(matches!(err, RuntimeError::Config(_)));
    }

    #[test]
    fn test_shout_collects_results() {
        let mut runtime = BotRuntime::default();
        runtime.add_bots(vec![
            Bot::new("a").with_tag("ping", "@return 1"),
            Bot::new("b").with_tag("ping", "@return tags.n").with_tag("n", "2"),
            Bot::new("c"),
        ]);

        let result = runtime.shout("ping", json!(null)).unwrap();
        assert_eq!(result.results, vec![json!(1), json!(2)]);
        assert!(result.actions.is_empty());
    }

    #[test]
    fn test_batch_appends_bot_updated_last() {
        let mut runtime = BotRuntime::default();
        runtime.add_bots(vec![Bot::new("a").with_tag(
            "go",
            "@tags.count = 1; os.toast('hi'); tags.count = 2;",
        )]);

        let result = runtime.shout("go", json!(null)).unwrap();
        assert_eq!(result.actions.len(), 2);
        assert_eq!(result.actions[0], Action::ShowToast { message: json!("hi") });
        match &result.actions[1] {
            Action::BotUpdated { id, tags, .. } => {
                assert_eq!(id, "a");
                assert_eq!(tags["count"], json!(2));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_subscribers_receive_batches() {
        let mut runtime = BotRuntime::default();
        let mut actions = runtime.subscribe_actions();
        let mut errors = runtime.subscribe_errors();
        runtime.add_bots(vec![Bot::new("a")
            .with_tag("go", "@os.toast(1)")
            .with_tag("fail", "@throw new Error('boom')")]);

        runtime.shout("go", json!(null)).unwrap();
        runtime.shout("fail", json!(null)).unwrap();

        assert_eq!(actions.try_recv().unwrap().len(), 1);
        assert!(actions.try_recv().is_err());
        let batch = errors.try_recv().unwrap();
        assert_eq!(batch[0].error, "Error: boom");
        assert_eq!(batch[0].bot.as_deref(), Some("a"));
        assert_eq!(batch[0].tag.as_deref(), Some("fail"));
    }

    #[test]
    fn test_execute_returns_value() {
        let mut runtime = BotRuntime::default();
        runtime.add_bots(vec![Bot::new("a").with_tag("n", "4")]);
        let result = runtime.execute("return getBot('n').tags.n * 2").unwrap();
        assert_eq!(result.value, json!(8));
    }

    #[test]
    fn test_unsubscribe_closes_entries() {
        let mut runtime = BotRuntime::default();
        runtime.unsubscribe();
        assert!(matches!(runtime.shout("x", json!(null)), Err(RuntimeError::Closed)));
        assert!(matches!(runtime.execute("return 1"), Err(RuntimeError::Closed)));
        assert!(matches!(runtime.process(vec![]), Err(RuntimeError::Closed)));
    }
}
