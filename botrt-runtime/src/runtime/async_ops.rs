//! Promise jobs, task resolution and timers

use super::{Batch, BotRuntime};
use crate::scheduler::TimerCallback;
use crate::tasks::Job;
use botrt_script::{PromiseId, ScriptEnv, ScriptError, Value};
use botrt_types::{RemoteDevice, TaskId};
use tracing::debug;

impl BotRuntime {
    /// A pending promise bound to a fresh task id
    pub(super) fn create_task(&mut self) -> (PromiseId, TaskId) {
        let promise = self.promises.create();
        let task = self.tasks.create(promise);
        debug!(task, promise, "task created");
        (promise, task)
    }

    /// Settle the promise waiting on `task`. Unknown and already resolved
    /// tasks are ignored.
    pub(super) fn resolve_task(&mut self, task: TaskId, outcome: Result<Value, Value>) {
        match self.tasks.take(task) {
            Some(promise) => {
                debug!(task, ok = outcome.is_ok(), "task resolved");
                self.promises.settle(promise, outcome);
            }
            None => debug!(task, "resolution for unknown task ignored"),
        }
    }

    /// Script value of a task result. With `map_bots`, `{id, tags}` objects
    /// naming live bots become bot references.
    pub(super) fn task_value(&self, result: &serde_json::Value, map_bots: bool) -> Value {
        if !map_bots {
            return Value::from_json(result);
        }
        match result {
            serde_json::Value::Object(map) => {
                let live_id = map
                    .get("id")
                    .and_then(|id| id.as_str())
                    .filter(|id| map.get("tags").is_some_and(|t| t.is_object()) && self.store.contains(id));
                match live_id {
                    Some(id) => Value::Bot(id.to_string()),
                    None => Value::Object(
                        map.iter()
                            .map(|(k, v)| (k.clone(), self.task_value(v, true)))
                            .collect(),
                    ),
                }
            }
            serde_json::Value::Array(items) => {
                Value::Array(items.iter().map(|v| self.task_value(v, true)).collect())
            }
            other => Value::from_json(other),
        }
    }

    /// Run queued promise reactions, one batch each, until the queue is empty
    pub(super) fn run_jobs(&mut self) -> Vec<Batch> {
        let mut batches = Vec::new();
        while !self.closed {
            let Some(job) = self.promises.pop_job() else {
                break;
            };
            let derived = job.reaction.derived;
            let (result, batch) = self.entry(job.reaction.context.clone(), |rt| rt.run_job(job));
            if let Err(err) = result {
                self.promises.settle(derived, Err(err.into_error_value()));
            }
            if !batch.is_empty() {
                batches.push(batch);
            }
        }
        self.promises.sweep();
        batches
    }

    fn run_job(&mut self, job: Job) -> Result<(), ScriptError> {
        let Job { reaction, outcome } = job;
        let handler = match &outcome {
            Ok(_) => reaction.on_fulfilled,
            Err(_) => reaction.on_rejected,
        };
        let Some(handler) = handler else {
            self.promises.settle(reaction.derived, outcome);
            return Ok(());
        };
        let arg = match outcome {
            Ok(value) | Err(value) => value,
        };
        match self.call_value(&handler, vec![arg]) {
            Ok(Value::Promise(inner)) => {
                self.promises.forward(inner.id(), reaction.derived, reaction.context);
            }
            Ok(value) => {
                self.promises.settle(reaction.derived, Ok(value));
            }
            Err(ScriptError::OutOfEnergy) => return Err(ScriptError::OutOfEnergy),
            Err(err) => {
                let frame = reaction.context;
                self.record_error(&err, frame.bot.as_deref(), frame.tag.as_deref(), None);
                self.promises.settle(reaction.derived, Err(err.into_error_value()));
            }
        }
        Ok(())
    }

    /// Fulfil a task. Continuations run before this returns; their batches
    /// are returned in the order they ran.
    pub fn async_result(&mut self, task: TaskId, result: serde_json::Value, map_bots: bool) -> Vec<Batch> {
        if self.closed {
            debug!(task, "runtime closed, async result ignored");
            return Vec::new();
        }
        let value = self.task_value(&result, map_bots);
        self.resolve_task(task, Ok(value));
        self.run_jobs()
    }

    /// Reject a task
    pub fn async_error(&mut self, task: TaskId, error: serde_json::Value) -> Vec<Batch> {
        if self.closed {
            debug!(task, "runtime closed, async error ignored");
            return Vec::new();
        }
        self.resolve_task(task, Err(Value::from_json(&error)));
        self.run_jobs()
    }

    /// Fulfil a task with a result sent by another device
    pub fn device_result(&mut self, device: RemoteDevice, task: TaskId, result: serde_json::Value) -> Vec<Batch> {
        debug!(?device, task, "device result");
        self.async_result(task, result, false)
    }

    /// Reject a task with an error sent by another device
    pub fn device_error(&mut self, device: RemoteDevice, task: TaskId, error: serde_json::Value) -> Vec<Batch> {
        debug!(?device, task, "device error");
        self.async_error(task, error)
    }

    /// Move the virtual clock forward by `ms`, firing every timer that falls
    /// due on the way. Each firing and each continuation is its own batch.
    pub fn advance_time(&mut self, ms: u64) -> Vec<Batch> {
        let until = self.scheduler.now().saturating_add(ms);
        let mut batches = Vec::new();
        while !self.closed {
            let Some(timer) = self.scheduler.pop_due(until) else {
                break;
            };
            debug!(timer = timer.id, at = self.scheduler.now(), "timer fired");
            match timer.callback {
                TimerCallback::Resolve(promise) => {
                    self.promises.settle(promise, Ok(Value::Undefined));
                }
                TimerCallback::Function(callback) => {
                    let context = timer.context;
                    let frame = context.clone();
                    let (_, batch) = self.entry(context, |rt| match rt.call_value(&callback, Vec::new()) {
                        Ok(_) => Ok(()),
                        Err(ScriptError::OutOfEnergy) => Err(ScriptError::OutOfEnergy),
                        Err(err) => {
                            rt.record_error(&err, frame.bot.as_deref(), frame.tag.as_deref(), None);
                            Ok(())
                        }
                    });
                    if !batch.is_empty() {
                        batches.push(batch);
                    }
                }
            }
            batches.extend(self.run_jobs());
        }
        if !self.closed {
            self.scheduler.set_now(until);
        }
        batches
    }

    /// Virtual time of the earliest pending timer
    pub fn next_timer_due(&self) -> Option<u64> {
        self.scheduler.next_due()
    }

    /// Current virtual time in milliseconds
    pub fn now(&self) -> u64 {
        self.scheduler.now()
    }

    pub fn pending_tasks(&self) -> usize {
        self.tasks.pending()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use botrt_types::{Action, Bot};
    use serde_json::json;

    fn show_input_task(batch_actions: &[Action]) -> TaskId {
        batch_actions
            .iter()
            .find_map(|a| match a {
                Action::ShowInput { task_id, .. } => Some(*task_id),
                _ => None,
            })
            .unwrap()
    }

    #[test]
    fn test_continuation_runs_as_new_batch() {
        let mut runtime = BotRuntime::default();
        runtime.add_bots(vec![Bot::new("a").with_tag(
            "ask",
            "@os.showInput('name?').then(name => os.toast('hi ' + name))",
        )]);
        let result = runtime.shout("ask", json!(null)).unwrap();
        let task = show_input_task(&result.actions);

        let batches = runtime.async_result(task, json!("bob"), false);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].actions, vec![Action::ShowToast { message: json!("hi bob") }]);

        // resolving twice is ignored
        assert!(runtime.async_result(task, json!("again"), false).is_empty());
    }

    #[test]
    fn test_rejection_reaches_catch() {
        let mut runtime = BotRuntime::default();
        runtime.add_bots(vec![Bot::new("a").with_tag(
            "ask",
            "@os.showInput().catch(err => os.toast('failed: ' + err))",
        )]);
        let result = runtime.shout("ask", json!(null)).unwrap();
        let task = show_input_task(&result.actions);

        let batches = runtime.async_error(task, json!("cancelled"));
        assert_eq!(batches[0].actions, vec![Action::ShowToast { message: json!("failed: cancelled") }]);
    }

    #[test]
    fn test_map_bots_rehydrates_live_bots() {
        let mut runtime = BotRuntime::default();
        runtime.add_bots(vec![
            Bot::new("a").with_tag("ask", "@remote({type: 'lookup'}).then(b => os.toast(b.tags.color))"),
            Bot::new("b").with_tag("color", "green"),
        ]);
        let result = runtime.shout("ask", json!(null)).unwrap();
        let task = match &result.actions[0] {
            Action::Remote { task_id, .. } => task_id.unwrap(),
            other => panic!("unexpected {:?}", other),
        };
        let batches = runtime.async_result(task, json!({"id": "b", "tags": {}}), true);
        assert_eq!(batches[0].actions, vec![Action::ShowToast { message: json!("green") }]);
    }

    #[test]
    fn test_timers_fire_in_order() {
        let mut runtime = BotRuntime::default();
        runtime.add_bots(vec![Bot::new("a").with_tag(
            "go",
            "@setTimeout(() => os.toast('late'), 200); setTimeout(() => os.toast('early'), 100);",
        )]);
        runtime.shout("go", json!(null)).unwrap();
        assert_eq!(runtime.next_timer_due(), Some(100));

        let batches = runtime.advance_time(150);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].actions, vec![Action::ShowToast { message: json!("early") }]);
        assert_eq!(runtime.now(), 150);

        let batches = runtime.advance_time(100);
        assert_eq!(batches[0].actions, vec![Action::ShowToast { message: json!("late") }]);
        assert_eq!(runtime.next_timer_due(), None);
    }

    #[test]
    fn test_interval_until_cleared() {
        let mut runtime = BotRuntime::default();
        runtime.add_bots(vec![Bot::new("a")
            .with_tag("go", "@tags.timer = setInterval(() => { tags.ticks = (tags.ticks || 0) + 1 }, 10)")
            .with_tag("stop", "@clearInterval(tags.timer)")]);
        runtime.shout("go", json!(null)).unwrap();

        runtime.advance_time(35);
        assert_eq!(runtime.bot("a").unwrap().tag("ticks"), Value::Number(3.0));

        runtime.shout("stop", json!(null)).unwrap();
        assert!(runtime.advance_time(100).is_empty());
    }

    #[test]
    fn test_sleep_resolves_through_clock() {
        let mut runtime = BotRuntime::default();
        runtime.add_bots(vec![Bot::new("a").with_tag("go", "@os.sleep(50).then(() => os.toast('awake'))")]);
        runtime.shout("go", json!(null)).unwrap();
        assert!(runtime.advance_time(49).is_empty());
        let batches = runtime.advance_time(1);
        assert_eq!(batches[0].actions, vec![Action::ShowToast { message: json!("awake") }]);
    }

    #[test]
    fn test_unsubscribe_leaves_tasks_pending() {
        let mut runtime = BotRuntime::default();
        runtime.add_bots(vec![Bot::new("a").with_tag("ask", "@os.showInput().then(() => os.toast('x'))")]);
        let result = runtime.shout("ask", json!(null)).unwrap();
        let task = show_input_task(&result.actions);

        runtime.unsubscribe();
        assert!(runtime.async_result(task, json!(1), false).is_empty());
        assert_eq!(runtime.pending_tasks(), 1);
    }

    #[test]
    fn test_huge_delay_after_clock_moved() {
        let mut runtime = BotRuntime::default();
        runtime.add_bots(vec![Bot::new("a").with_tag("go", "@setTimeout(() => os.toast('x'), 1e20)")]);
        runtime.advance_time(5);
        runtime.shout("go", json!(null)).unwrap();

        assert_eq!(runtime.next_timer_due(), Some(u64::MAX));
        assert!(runtime.advance_time(1_000).is_empty());
    }

    #[test]
    fn test_settled_promises_are_dropped() {
        let mut runtime = BotRuntime::default();
        runtime.add_bots(vec![Bot::new("a")
            .with_tag("go", "@os.sleep(10).then(() => os.toast('x'))")
            .with_tag("wait", "=os.sleep(10)")]);
        for _ in 0..5 {
            runtime.shout("go", json!(null)).unwrap();
        }
        // five sleeps with their derived promises, plus the formula's sleep
        assert_eq!(runtime.promises.len(), 11);

        let batches = runtime.advance_time(10);
        assert_eq!(batches.len(), 5);
        // the formula value still refers to its promise
        assert_eq!(runtime.promises.len(), 1);
    }
}
