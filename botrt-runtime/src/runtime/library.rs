//! Library functions reachable from scripts (`getBots`, `os.toast`, ...)

use super::{has_value, BotRuntime};
use crate::deps::Dependency;
use crate::scheduler::TimerCallback;
use botrt_script::{ScriptEnv, ScriptError, ScriptFunction, Value};
use botrt_types::{Action, BotId, Space};
use std::any::Any;
use tracing::debug;

/// A bot filter produced by `byTag`, `byID`, `bySpace` or `byCreator`
///
/// Filters are ordinary functions to scripts, but `getBots` recognises them
/// and evaluates them natively so that only the query shape is recorded as a
/// dependency.
#[derive(Debug, Clone, PartialEq)]
pub enum BotFilter {
    Tag { tag: String, value: Option<Value> },
    Id(BotId),
    Space(String),
    Creator(BotId),
}

#[derive(Debug, Clone)]
pub struct FilterFunction {
    pub filter: BotFilter,
}

impl ScriptFunction for FilterFunction {
    fn call(&self, env: &mut dyn ScriptEnv, args: Vec<Value>) -> Result<Value, ScriptError> {
        let Some(bot) = args.first().filter(|b| b.bot_id().is_some()) else {
            return Ok(Value::Bool(false));
        };
        let matched = match &self.filter {
            BotFilter::Tag { tag, value: None } => has_value(&tag_of(env, bot, tag)?),
            BotFilter::Tag {
                tag,
                value: Some(expected),
            } => tag_of(env, bot, tag)? == *expected,
            BotFilter::Id(id) => bot.bot_id() == Some(id.as_str()),
            BotFilter::Space(space) => env.get_member(bot, "space")?.as_str() == Some(space.as_str()),
            BotFilter::Creator(creator) => {
                tag_of(env, bot, "creator")?.as_str() == Some(creator.as_str())
            }
        };
        Ok(Value::Bool(matched))
    }

    fn name(&self) -> &str {
        "filter"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn tag_of(env: &mut dyn ScriptEnv, bot: &Value, tag: &str) -> Result<Value, ScriptError> {
    let tags = env.get_member(bot, "tags")?;
    env.get_member(&tags, tag)
}

enum QueryFilter {
    Native(BotFilter),
    Predicate(Value),
}

fn arg(args: &[Value], index: usize) -> Value {
    args.get(index).cloned().unwrap_or_default()
}

fn string_arg(args: &[Value], index: usize) -> String {
    match args.get(index) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Undefined) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

/// Milliseconds from a script number, clamped to a non-negative integer
fn delay_arg(args: &[Value], index: usize) -> u64 {
    let ms = args.get(index).map(Value::to_number).unwrap_or(0.0);
    if ms.is_finite() && ms > 0.0 {
        ms as u64
    } else {
        0
    }
}

/// Ids referenced by a bot, id string, or array of either
fn bot_ids(value: &Value) -> Vec<BotId> {
    match value {
        Value::Bot(id) | Value::String(id) => vec![id.clone()],
        Value::View { bot, .. } => vec![bot.clone()],
        Value::Array(items) => items.iter().flat_map(bot_ids).collect(),
        _ => Vec::new(),
    }
}

fn filter_value(filter: BotFilter) -> Value {
    Value::Function(std::sync::Arc::new(FilterFunction { filter }))
}

impl BotRuntime {
    pub(super) fn library_call(&mut self, name: &str, args: Vec<Value>) -> Result<Option<Value>, ScriptError> {
        let value = match name {
            "getBots" => Value::Array(self.query_bots(&args)?.into_iter().map(Value::Bot).collect()),
            "getBot" => self
                .query_bots(&args)?
                .into_iter()
                .next()
                .map(Value::Bot)
                .unwrap_or(Value::Undefined),
            "byTag" => {
                let value = args.get(1).filter(|v| !matches!(v, Value::Undefined)).cloned();
                filter_value(tag_filter(string_arg(&args, 0), value))
            }
            "byID" => filter_value(BotFilter::Id(string_arg(&args, 0))),
            "bySpace" => filter_value(BotFilter::Space(string_arg(&args, 0))),
            "byCreator" => match bot_ids(&arg(&args, 0)).into_iter().next() {
                Some(id) => filter_value(BotFilter::Creator(id)),
                None => return Err(ScriptError::type_error("byCreator expects a bot")),
            },
            "getID" => match arg(&args, 0) {
                Value::Bot(id) | Value::String(id) => Value::String(id),
                Value::View { bot, .. } => Value::String(bot),
                _ => Value::Null,
            },
            "getTag" => match bot_ids(&arg(&args, 0)).into_iter().next() {
                Some(id) => self.read_tag(&id, &string_arg(&args, 1))?,
                None => Value::Undefined,
            },
            "setTag" => {
                let tag = string_arg(&args, 1);
                let value = arg(&args, 2);
                for id in bot_ids(&arg(&args, 0)) {
                    self.set_tag(&id, &tag, &value);
                }
                value
            }
            "setTagMask" => {
                let tag = string_arg(&args, 1);
                let value = arg(&args, 2);
                let space = match args.get(3) {
                    Some(Value::String(space)) => Space::new(space.as_str()),
                    _ => Space::temp_local(),
                };
                for id in bot_ids(&arg(&args, 0)) {
                    self.set_mask(&id, &tag, &value, &space);
                }
                value
            }
            "clearTagMasks" => {
                let only = match args.get(1) {
                    Some(Value::String(space)) => Some(Space::new(space.as_str())),
                    _ => None,
                };
                for id in bot_ids(&arg(&args, 0)) {
                    self.clear_masks(&id, only.as_ref());
                }
                Value::Undefined
            }
            "shout" => {
                let results = self.dispatch_shout(&string_arg(&args, 0), None, arg(&args, 1))?;
                Value::Array(results)
            }
            "whisper" => {
                let targets = bot_ids(&arg(&args, 0));
                let results = self.dispatch_shout(&string_arg(&args, 1), Some(targets), arg(&args, 2))?;
                Value::Array(results)
            }
            "create" => self.create_bots(args)?,
            "destroy" => {
                self.destroy_bots(&arg(&args, 0))?;
                Value::Undefined
            }
            "uuid" => Value::String(self.ids.next_id()),
            "os.toast" => {
                self.record_action(Action::ShowToast {
                    message: arg(&args, 0).to_json(),
                });
                Value::Undefined
            }
            "os.showInput" => {
                let (promise, task_id) = self.create_task();
                self.record_action(Action::ShowInput {
                    task_id,
                    current_value: arg(&args, 0).to_json(),
                    options: arg(&args, 1).to_json(),
                });
                self.promises.handle(promise)
            }
            "os.sleep" => {
                let promise = self.promises.create();
                let context = self.current_frame();
                self.scheduler
                    .schedule(delay_arg(&args, 0), TimerCallback::Resolve(promise), None, context);
                self.promises.handle(promise)
            }
            "os.version" => Value::from_json(&serde_json::to_value(&self.config.version).unwrap_or_default()),
            "os.device" => Value::from_json(&serde_json::to_value(&self.config.device).unwrap_or_default()),
            "remote" => {
                let (promise, task_id) = self.create_task();
                let selector = args.get(1).filter(|s| !s.is_nullish()).map(Value::to_json);
                self.record_action(Action::Remote {
                    event: arg(&args, 0).to_json(),
                    selector,
                    task_id: Some(task_id),
                });
                self.promises.handle(promise)
            }
            "action.perform" => {
                let action = Action::from_json(arg(&args, 0).to_json());
                self.execute_action(action)?;
                Value::Undefined
            }
            "action.reject" => {
                self.reject_action(&arg(&args, 0));
                Value::Undefined
            }
            "setTimeout" | "setInterval" => {
                let callback = arg(&args, 0);
                if !matches!(callback, Value::Function(_) | Value::Listener { .. }) {
                    return Err(ScriptError::type_error(format!("{} expects a function", name)));
                }
                let delay = delay_arg(&args, 1);
                let interval = (name == "setInterval").then_some(delay);
                let context = self.current_frame();
                let id = self
                    .scheduler
                    .schedule(delay, TimerCallback::Function(callback), interval, context);
                Value::Number(id as f64)
            }
            "clearTimeout" | "clearInterval" => {
                let id = arg(&args, 0).to_number();
                if id.is_finite() && id >= 0.0 {
                    self.scheduler.cancel(id as u64);
                }
                Value::Undefined
            }
            _ => return Ok(None),
        };
        Ok(Some(value))
    }

    /// Ids of bots matching every filter, in store order
    fn query_bots(&mut self, args: &[Value]) -> Result<Vec<BotId>, ScriptError> {
        let mut filters = Vec::new();
        if let Some(Value::String(tag)) = args.first() {
            let value = args.get(1).filter(|v| !matches!(v, Value::Undefined)).cloned();
            filters.push(QueryFilter::Native(tag_filter(tag.clone(), value)));
        } else {
            for filter in args {
                match filter {
                    Value::Function(func) => match func.as_any().downcast_ref::<FilterFunction>() {
                        Some(native) => filters.push(QueryFilter::Native(native.filter.clone())),
                        None => filters.push(QueryFilter::Predicate(filter.clone())),
                    },
                    Value::Listener { .. } => filters.push(QueryFilter::Predicate(filter.clone())),
                    _ => {}
                }
            }
        }

        if filters.is_empty() {
            self.track(Dependency::All);
        }
        for filter in &filters {
            let dependency = match filter {
                QueryFilter::Native(BotFilter::Tag { tag, value }) => Dependency::Tag {
                    tag: tag.clone(),
                    value: value.clone(),
                },
                QueryFilter::Native(BotFilter::Id(id)) => Dependency::Id(id.clone()),
                QueryFilter::Native(BotFilter::Creator(id)) => Dependency::Tag {
                    tag: "creator".to_string(),
                    value: Some(Value::String(id.clone())),
                },
                QueryFilter::Native(BotFilter::Space(_)) | QueryFilter::Predicate(_) => Dependency::All,
            };
            self.track(dependency);
        }

        let mut matches = Vec::new();
        for id in self.store.ids_in_order() {
            let mut keep = true;
            for filter in &filters {
                if !self.bot_matches(&id, filter)? {
                    keep = false;
                    break;
                }
            }
            if keep {
                matches.push(id);
            }
        }
        debug!(matches = matches.len(), "bot query");
        Ok(matches)
    }

    fn bot_matches(&mut self, id: &str, filter: &QueryFilter) -> Result<bool, ScriptError> {
        let matched = match filter {
            QueryFilter::Native(BotFilter::Tag { tag, value: None }) => has_value(&self.fresh_value(id, tag)?),
            QueryFilter::Native(BotFilter::Tag {
                tag,
                value: Some(expected),
            }) => self.fresh_value(id, tag)? == *expected,
            QueryFilter::Native(BotFilter::Id(expected)) => id == expected,
            QueryFilter::Native(BotFilter::Space(space)) => self
                .store
                .get(id)
                .is_some_and(|bot| bot.space().as_str() == space),
            QueryFilter::Native(BotFilter::Creator(creator)) => {
                self.raw_text(id, "creator").as_deref() == Some(creator.as_str())
            }
            QueryFilter::Predicate(predicate) => self
                .call_value(predicate, vec![Value::Bot(id.to_string())])?
                .is_truthy(),
        };
        Ok(matched)
    }

    fn clear_masks(&mut self, id: &str, only: Option<&Space>) {
        let Some(bot) = self.store.get(id) else {
            return;
        };
        let cleared: Vec<(Space, String)> = bot
            .masks
            .iter()
            .filter(|(space, _)| only.map_or(true, |s| s == *space))
            .flat_map(|(space, tags)| tags.keys().map(move |tag| (space.clone(), tag.clone())))
            .collect();
        for (space, tag) in cleared {
            self.set_mask(id, &tag, &Value::Undefined, &space);
        }
    }
}

/// `getBots("id", x)` is an id lookup, other tag names filter by tag
fn tag_filter(tag: String, value: Option<Value>) -> BotFilter {
    match (tag.as_str(), value) {
        ("id", Some(Value::String(id))) => BotFilter::Id(id),
        (_, value) => BotFilter::Tag { tag, value },
    }
}
