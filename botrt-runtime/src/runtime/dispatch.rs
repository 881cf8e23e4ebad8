//! Shout dispatch and action processing

use super::recalc::compile_error;
use super::{BotRuntime, FilterFrame};
use botrt_script::{Bindings, ScriptError, ScriptKind, Value};
use botrt_types::{Action, BotId};
use tracing::debug;

const ON_LISTEN: &str = "onListen";
const ON_ANY_LISTEN: &str = "onAnyListen";
const ON_STORY_ACTION: &str = "onStoryAction";

impl BotRuntime {
    /// Run listener `name` on `targets` (every bot when `None`) and return
    /// the responses as left by the listen hooks
    pub(super) fn dispatch_shout(
        &mut self,
        name: &str,
        targets: Option<Vec<BotId>>,
        that: Value,
    ) -> Result<Vec<Value>, ScriptError> {
        let targets: Vec<BotId> = match targets {
            Some(ids) => ids.into_iter().filter(|id| self.store.contains(id)).collect(),
            None => self.store.ids_in_order(),
        };
        let listeners: Vec<BotId> = targets
            .iter()
            .filter(|id| self.has_listener(id, name))
            .cloned()
            .collect();
        debug!(name, targets = targets.len(), listeners = listeners.len(), "dispatching shout");

        let mut responses = Vec::with_capacity(listeners.len());
        for id in &listeners {
            if let Some(outcome) = self.run_listener(id, name, that.clone())? {
                responses.push(outcome.value);
            }
        }

        if name == ON_LISTEN || name == ON_ANY_LISTEN {
            return Ok(responses);
        }

        let bot_refs = |ids: &[BotId]| Value::Array(ids.iter().cloned().map(Value::Bot).collect());
        let mut hook_arg = Value::object([
            ("name", Value::from(name)),
            ("that", that),
            ("targets", bot_refs(&targets)),
            ("listeners", bot_refs(&listeners)),
            ("responses", Value::Array(responses)),
        ]);

        let any_listeners: Vec<BotId> = self
            .store
            .ids_in_order()
            .into_iter()
            .filter(|id| self.has_listener(id, ON_ANY_LISTEN))
            .collect();
        let hooks = listeners
            .iter()
            .filter(|id| self.has_listener(id, ON_LISTEN))
            .map(|id| (id.clone(), ON_LISTEN))
            .collect::<Vec<_>>()
            .into_iter()
            .chain(any_listeners.into_iter().map(|id| (id, ON_ANY_LISTEN)));

        for (id, hook) in hooks {
            if let Some(outcome) = self.run_listener(&id, hook, hook_arg.clone())? {
                if matches!(outcome.that, Value::Object(_)) {
                    hook_arg = outcome.that;
                }
            }
        }

        let responses = hook_arg
            .as_object()
            .and_then(|arg| arg.get("responses"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        Ok(responses)
    }

    /// Offer an action to `onStoryAction`, then execute it unless rejected
    pub(super) fn process_action(&mut self, action: Action) -> Result<(), ScriptError> {
        if self.filter_action(&action)? {
            self.execute_action(action)
        } else {
            debug!(kind = action.kind(), "action rejected");
            Ok(())
        }
    }

    /// Returns false if an `onStoryAction` listener rejected the action
    fn filter_action(&mut self, action: &Action) -> Result<bool, ScriptError> {
        let json = action.to_json();
        let arg = Value::object([("action", Value::from_json(&json))]);
        self.filters.push(FilterFrame {
            action: json,
            rejected: false,
        });
        let result = self.run_on_all(ON_STORY_ACTION, &arg);
        let frame = self.filters.pop();
        result?;
        Ok(!frame.is_some_and(|f| f.rejected))
    }

    /// Run listener `name` on every bot that has it
    pub(super) fn run_on_all(&mut self, name: &str, arg: &Value) -> Result<(), ScriptError> {
        let ids: Vec<BotId> = self
            .store
            .ids_in_order()
            .into_iter()
            .filter(|id| self.has_listener(id, name))
            .collect();
        for id in ids {
            self.run_listener(&id, name, arg.clone())?;
        }
        Ok(())
    }

    /// Execute an action that survived filtering
    pub(super) fn execute_action(&mut self, action: Action) -> Result<(), ScriptError> {
        match action {
            Action::Shout {
                name,
                bot_ids,
                argument,
                task_id,
            } => {
                let results = self.dispatch_shout(&name, bot_ids, Value::from_json(&argument))?;
                if let Some(task_id) = task_id {
                    self.record_action(Action::AsyncResult {
                        task_id,
                        result: Value::Array(results).to_json(),
                        map_bots_in_result: false,
                    });
                }
            }
            Action::RunScript { script, task_id } => {
                let value = self.run_script(&script, Value::Undefined)?;
                if let Some(task_id) = task_id {
                    self.record_action(Action::AsyncResult {
                        task_id,
                        result: value.to_json(),
                        map_bots_in_result: false,
                    });
                }
            }
            Action::Device { event, .. } => self.process_action(*event)?,
            Action::AsyncResult {
                task_id,
                result,
                map_bots_in_result,
            } => {
                let value = self.task_value(&result, map_bots_in_result);
                self.resolve_task(task_id, Ok(value));
            }
            Action::DeviceResult { task_id, result, .. } => {
                self.resolve_task(task_id, Ok(Value::from_json(&result)));
            }
            Action::AsyncError { task_id, error } | Action::DeviceError { task_id, error, .. } => {
                self.resolve_task(task_id, Err(Value::from_json(&error)));
            }
            other => self.record_action(other),
        }
        Ok(())
    }

    /// Compile and run a script outside any tag. Failures are recorded.
    pub(super) fn run_script(&mut self, source: &str, that: Value) -> Result<Value, ScriptError> {
        let bot = self.current_bot();
        let script = match self.compiler.compile_script(source, ScriptKind::Listener) {
            Ok(script) => script,
            Err(err) => {
                self.record_error(&compile_error(&err), bot.as_deref(), None, Some(source));
                return Ok(Value::Undefined);
            }
        };
        let bindings = Bindings {
            this: bot.clone().map(Value::Bot).unwrap_or(Value::Null),
            that,
            ..Bindings::default()
        };
        match script.run(self, bindings) {
            Ok(outcome) => Ok(outcome.value),
            Err(ScriptError::OutOfEnergy) => Err(ScriptError::OutOfEnergy),
            Err(err) => {
                self.record_error(&err, bot.as_deref(), None, Some(source));
                Ok(Value::Undefined)
            }
        }
    }

    /// `action.reject(a)`: inside an `onStoryAction` pass, rejects the
    /// action being filtered; otherwise records a `reject` action
    pub(super) fn reject_action(&mut self, arg: &Value) {
        let json = arg.to_json();
        if let Some(frame) = self.filters.last_mut() {
            if matches!(arg, Value::Undefined) || frame.action == json {
                frame.rejected = true;
                return;
            }
        }
        self.record_action(Action::Reject {
            action: Box::new(Action::from_json(json)),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use botrt_types::Bot;
    use serde_json::json;

    #[test]
    fn test_whisper_skips_unknown_ids() {
        let mut runtime = BotRuntime::default();
        runtime.add_bots(vec![
            Bot::new("a").with_tag("hi", "@return 'a'"),
            Bot::new("b").with_tag("hi", "@return 'b'"),
        ]);
        let result = runtime
            .whisper(&["b".to_string(), "ghost".to_string(), "a".to_string()], "hi", json!(null))
            .unwrap();
        assert_eq!(result.results, vec![json!("b"), json!("a")]);
    }

    #[test]
    fn test_failing_listener_contributes_nothing() {
        let mut runtime = BotRuntime::default();
        runtime.add_bots(vec![
            Bot::new("a").with_tag("hi", "@throw new Error('nope')"),
            Bot::new("b").with_tag("hi", "@return that + 1"),
        ]);
        let result = runtime.shout("hi", json!(1)).unwrap();
        assert_eq!(result.results, vec![json!(2)]);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].name, "Error");
    }

    #[test]
    fn test_story_action_can_reject() {
        let mut runtime = BotRuntime::default();
        runtime.add_bots(vec![Bot::new("guard").with_tag(
            "onStoryAction",
            "@if (that.action.type === 'show_toast' && that.action.message === 'no') { action.reject(that.action); }",
        )]);
        let batch = runtime
            .process(vec![
                Action::ShowToast { message: json!("no") },
                Action::ShowToast { message: json!("yes") },
            ])
            .unwrap();
        assert_eq!(batch.actions, vec![Action::ShowToast { message: json!("yes") }]);
    }

    #[test]
    fn test_run_script_with_task_emits_async_result() {
        let mut runtime = BotRuntime::default();
        let batch = runtime
            .process(vec![Action::RunScript {
                script: "return 6 * 7".to_string(),
                task_id: Some(9),
            }])
            .unwrap();
        assert_eq!(
            batch.actions,
            vec![Action::AsyncResult {
                task_id: 9,
                result: json!(42),
                map_bots_in_result: false,
            }]
        );
    }

    #[test]
    fn test_device_unwraps_inner_event() {
        let mut runtime = BotRuntime::default();
        runtime.add_bots(vec![Bot::new("a").with_tag("ping", "@os.toast('pong')")]);
        let batch = runtime
            .process(vec![Action::from_json(json!({
                "type": "device",
                "event": {"type": "shout", "name": "ping"},
            }))])
            .unwrap();
        assert_eq!(batch.actions, vec![Action::ShowToast { message: json!("pong") }]);
    }

    #[test]
    fn test_perform_inside_listener() {
        let mut runtime = BotRuntime::default();
        runtime.add_bots(vec![
            Bot::new("a").with_tag("go", "@action.perform({type: 'shout', name: 'ping'}); action.perform({type: 'open_url', url: 'x'})"),
            Bot::new("b").with_tag("ping", "@os.toast('pinged')"),
        ]);
        let result = runtime.shout("go", json!(null)).unwrap();
        assert_eq!(result.actions.len(), 2);
        assert_eq!(result.actions[0], Action::ShowToast { message: json!("pinged") });
        assert_eq!(result.actions[1].kind(), "open_url");
    }
}
