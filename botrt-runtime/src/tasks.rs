//! Promises and the task bridge
//!
//! Promises are owned by the runtime and referenced from scripts by id.
//! Settling a promise never runs script code directly: it queues one
//! [`Job`] per registered [`Reaction`], and the runtime drains the queue,
//! running each job as its own batch.
//!
//! Tasks, timers and reactions name pending promises by id. Scripts hold
//! [`PromiseHandle`]s instead, so a settled promise can be dropped from the
//! table once its last handle is gone.

use botrt_script::{PromiseHandle, PromiseId, Value};
use botrt_types::{BotId, TaskId};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};

/// The bot and tag a piece of script code was started from. Continuations
/// carry the frame of the code that registered them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    pub bot: Option<BotId>,
    pub tag: Option<String>,
}

impl Frame {
    pub fn new(bot: Option<BotId>, tag: Option<String>) -> Self {
        Self { bot, tag }
    }
}

/// A continuation registered with `.then` / `.catch`
#[derive(Debug, Clone)]
pub struct Reaction {
    pub on_fulfilled: Option<Value>,
    pub on_rejected: Option<Value>,
    /// Promise settled with the handler's result
    pub derived: PromiseId,
    pub context: Frame,
}

#[derive(Debug, Clone)]
pub enum PromiseState {
    Pending(Vec<Reaction>),
    Fulfilled(Value),
    Rejected(Value),
}

/// A reaction ready to run
#[derive(Debug, Clone)]
pub struct Job {
    pub reaction: Reaction,
    pub outcome: Result<Value, Value>,
}

#[derive(Debug)]
struct PromiseEntry {
    state: PromiseState,
    handles: Weak<()>,
}

impl PromiseEntry {
    fn is_collectable(&self) -> bool {
        !matches!(self.state, PromiseState::Pending(_)) && self.handles.strong_count() == 0
    }
}

#[derive(Debug, Default)]
pub struct PromiseTable {
    promises: HashMap<PromiseId, PromiseEntry>,
    jobs: VecDeque<Job>,
    next: PromiseId,
}

impl PromiseTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&mut self) -> PromiseId {
        self.next += 1;
        self.promises.insert(
            self.next,
            PromiseEntry {
                state: PromiseState::Pending(Vec::new()),
                handles: Weak::new(),
            },
        );
        self.next
    }

    /// Script value naming `id`. Handles to the same promise share a token.
    pub fn handle(&mut self, id: PromiseId) -> Value {
        let token = match self.promises.get_mut(&id) {
            Some(entry) => match entry.handles.upgrade() {
                Some(token) => token,
                None => {
                    let token = Arc::new(());
                    entry.handles = Arc::downgrade(&token);
                    token
                }
            },
            None => Arc::new(()),
        };
        Value::Promise(PromiseHandle::new(id, token))
    }

    /// Drop settled promises no script value refers to any more
    pub fn sweep(&mut self) {
        let before = self.promises.len();
        self.promises.retain(|_, entry| !entry.is_collectable());
        let dropped = before - self.promises.len();
        if dropped > 0 {
            tracing::debug!(dropped, live = self.promises.len(), "settled promises dropped");
        }
    }

    pub fn len(&self) -> usize {
        self.promises.len()
    }

    pub fn is_empty(&self) -> bool {
        self.promises.is_empty()
    }

    /// Register handlers and return the derived promise
    pub fn then(
        &mut self,
        id: PromiseId,
        on_fulfilled: Option<Value>,
        on_rejected: Option<Value>,
        context: Frame,
    ) -> PromiseId {
        let derived = self.create();
        self.react(
            id,
            Reaction {
                on_fulfilled,
                on_rejected,
                derived,
                context,
            },
        );
        derived
    }

    /// Settle `to` with whatever `from` settles with
    pub fn forward(&mut self, from: PromiseId, to: PromiseId, context: Frame) {
        self.react(
            from,
            Reaction {
                on_fulfilled: None,
                on_rejected: None,
                derived: to,
                context,
            },
        );
    }

    fn react(&mut self, id: PromiseId, reaction: Reaction) {
        match self.promises.get_mut(&id).map(|entry| &mut entry.state) {
            Some(PromiseState::Pending(reactions)) => reactions.push(reaction),
            Some(PromiseState::Fulfilled(value)) => {
                let outcome = Ok(value.clone());
                self.jobs.push_back(Job { reaction, outcome });
            }
            Some(PromiseState::Rejected(error)) => {
                let outcome = Err(error.clone());
                self.jobs.push_back(Job { reaction, outcome });
            }
            None => {
                tracing::debug!(promise = id, "reaction on unknown promise ignored");
            }
        }
    }

    /// Settle a pending promise. Returns false if it was already settled
    /// or does not exist.
    pub fn settle(&mut self, id: PromiseId, outcome: Result<Value, Value>) -> bool {
        let Some(state) = self.promises.get_mut(&id).map(|entry| &mut entry.state) else {
            return false;
        };
        let settled = match &outcome {
            Ok(value) => PromiseState::Fulfilled(value.clone()),
            Err(error) => PromiseState::Rejected(error.clone()),
        };
        let reactions = match std::mem::replace(state, settled) {
            PromiseState::Pending(reactions) => reactions,
            previous => {
                *state = previous;
                return false;
            }
        };
        for reaction in reactions {
            self.jobs.push_back(Job {
                reaction,
                outcome: outcome.clone(),
            });
        }
        true
    }

    pub fn pop_job(&mut self) -> Option<Job> {
        self.jobs.pop_front()
    }

    pub fn has_jobs(&self) -> bool {
        !self.jobs.is_empty()
    }

    pub fn clear(&mut self) {
        self.promises.clear();
        self.jobs.clear();
    }
}

/// Correlates external task ids with the promises waiting on them
#[derive(Debug)]
pub struct TaskBridge {
    pending: HashMap<TaskId, PromiseId>,
    next_task: TaskId,
}

impl TaskBridge {
    pub fn new() -> Self {
        Self {
            pending: HashMap::new(),
            next_task: 1,
        }
    }

    pub fn create(&mut self, promise: PromiseId) -> TaskId {
        let task = self.next_task;
        self.next_task += 1;
        self.pending.insert(task, promise);
        task
    }

    /// Remove a task, returning its promise. Resolving twice yields `None`.
    pub fn take(&mut self, task: TaskId) -> Option<PromiseId> {
        self.pending.remove(&task)
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, task: TaskId) -> bool {
        self.pending.contains_key(&task)
    }
}

impl Default for TaskBridge {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settle_queues_reactions_in_order() {
        let mut table = PromiseTable::new();
        let p = table.create();
        let d1 = table.then(p, Some(Value::from(1)), None, Frame::default());
        let d2 = table.then(p, None, Some(Value::from(2)), Frame::default());
        assert!(!table.has_jobs());

        assert!(table.settle(p, Ok(Value::from("done"))));
        assert!(!table.settle(p, Err(Value::from("late"))));

        let first = table.pop_job().unwrap();
        assert_eq!(first.reaction.derived, d1);
        assert_eq!(first.outcome, Ok(Value::from("done")));
        assert_eq!(table.pop_job().unwrap().reaction.derived, d2);
        assert!(table.pop_job().is_none());
    }

    #[test]
    fn test_then_on_settled_promise_queues_immediately() {
        let mut table = PromiseTable::new();
        let p = table.create();
        table.settle(p, Err(Value::from("bad")));
        table.then(p, None, None, Frame::default());

        let job = table.pop_job().unwrap();
        assert_eq!(job.outcome, Err(Value::from("bad")));
    }

    #[test]
    fn test_sweep_keeps_pending_and_referenced_promises() {
        let mut table = PromiseTable::new();
        let pending = table.create();
        let held = table.create();
        let dropped = table.create();

        let handle = table.handle(held);
        let again = table.handle(held);
        assert_eq!(handle, again);
        drop(table.handle(dropped));

        table.settle(held, Ok(Value::Null));
        table.settle(dropped, Ok(Value::Null));
        table.sweep();
        assert_eq!(table.len(), 2);
        assert!(!table.settle(dropped, Ok(Value::Null)));

        drop(handle);
        drop(again);
        table.sweep();
        assert_eq!(table.len(), 1);
        assert!(table.settle(pending, Ok(Value::Null)));
    }

    #[test]
    fn test_task_bridge() {
        let mut tasks = TaskBridge::new();
        let t = tasks.create(7);
        assert_eq!(t, 1);
        assert!(tasks.is_pending(t));
        assert_eq!(tasks.take(t), Some(7));
        assert_eq!(tasks.take(t), None);
        assert_eq!(tasks.pending(), 0);
    }
}
