//! Script values
//!
//! Plain data has value semantics: assigning an array or object copies it.
//! Writes that must reach shared state go through places (variables or host
//! references) and are committed explicitly by the interpreter.

use crate::host::ScriptFunction;
use botrt_types::BotId;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Identifier of a promise owned by the environment
pub type PromiseId = u64;

/// Which live view of a bot a [`Value::View`] refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewKind {
    /// Computed tag values with masks applied
    Tags,
    /// Uncoerced tag text
    Raw,
    /// Tag masks, highest priority space first
    Masks,
    /// Callable listener tags
    Listeners,
    /// Tags written during the current batch
    Changes,
    /// Masks written during the current batch
    MaskChanges,
}

/// An error object (`new Error("x")`, or a formula failure surrogate)
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorValue {
    pub name: String,
    pub message: String,
}

impl ErrorValue {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            f.write_str(&self.name)
        } else {
            write!(f, "{}: {}", self.name, self.message)
        }
    }
}

/// Script-held reference to a runtime promise. Every clone shares one
/// token, so the runtime can tell when no script value names the promise.
#[derive(Clone)]
pub struct PromiseHandle {
    id: PromiseId,
    token: Arc<()>,
}

impl PromiseHandle {
    pub fn new(id: PromiseId, token: Arc<()>) -> Self {
        Self { id, token }
    }

    pub fn id(&self) -> PromiseId {
        self.id
    }

    pub fn token(&self) -> &Arc<()> {
        &self.token
    }
}

impl PartialEq for PromiseHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl fmt::Debug for PromiseHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Promise({})", self.id)
    }
}

#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
    /// Reference to a live bot
    Bot(BotId),
    /// Reference to one of a bot's tag views
    View { bot: BotId, kind: ViewKind },
    /// Reference to a bot's listener tag, callable
    Listener { bot: BotId, tag: String },
    Function(Arc<dyn ScriptFunction>),
    Promise(PromiseHandle),
    Error(Arc<ErrorValue>),
}

impl Value {
    pub fn error(name: impl Into<String>, message: impl Into<String>) -> Value {
        Value::Error(Arc::new(ErrorValue::new(name, message)))
    }

    pub fn object<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Value {
        Value::Object(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Array(items) => Value::Array(items.iter().map(Value::from_json).collect()),
            serde_json::Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Convert to JSON. Bots become their id, errors their display string,
    /// and other host references `null`.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Undefined | Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => number_to_json(*n),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Array(items) => serde_json::Value::Array(items.iter().map(Value::to_json).collect()),
            Value::Object(map) => serde_json::Value::Object(
                map.iter()
                    .filter(|(_, v)| !matches!(v, Value::Undefined))
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            Value::Bot(id) => serde_json::Value::String(id.clone()),
            Value::Error(err) => serde_json::Value::String(err.to_string()),
            Value::View { .. } | Value::Listener { .. } | Value::Function(_) | Value::Promise(_) => {
                serde_json::Value::Null
            }
        }
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            _ => true,
        }
    }

    pub fn type_of(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "object",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Function(_) | Value::Listener { .. } => "function",
            _ => "object",
        }
    }

    pub fn to_number(&self) -> f64 {
        match self {
            Value::Undefined => f64::NAN,
            Value::Null => 0.0,
            Value::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            Value::Number(n) => *n,
            Value::String(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    0.0
                } else {
                    trimmed.parse::<f64>().unwrap_or(f64::NAN)
                }
            }
            Value::Array(items) => match items.as_slice() {
                [] => 0.0,
                [single] => single.to_number(),
                _ => f64::NAN,
            },
            _ => f64::NAN,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Vec<Value>> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    /// The bot id referenced by this value, if it is a bot reference
    pub fn bot_id(&self) -> Option<&str> {
        match self {
            Value::Bot(id) => Some(id),
            Value::View { bot, .. } => Some(bot),
            _ => None,
        }
    }

    /// `===`
    pub fn strict_equals(&self, other: &Value) -> bool {
        self == other
    }

    /// `==`
    pub fn loose_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (a, b) if a.is_nullish() && b.is_nullish() => true,
            (a, b) if a.is_nullish() || b.is_nullish() => false,
            (Value::Number(_), Value::String(_))
            | (Value::String(_), Value::Number(_))
            | (Value::Bool(_), _)
            | (_, Value::Bool(_)) => self.to_number() == other.to_number(),
            (Value::Bot(id), Value::String(s)) | (Value::String(s), Value::Bot(id)) => id == s,
            _ => self == other,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            (Value::Bot(a), Value::Bot(b)) => a == b,
            (Value::View { bot: a, kind: ka }, Value::View { bot: b, kind: kb }) => a == b && ka == kb,
            (Value::Listener { bot: a, tag: ta }, Value::Listener { bot: b, tag: tb }) => a == b && ta == tb,
            (Value::Function(a), Value::Function(b)) => Arc::ptr_eq(a, b),
            (Value::Promise(a), Value::Promise(b)) => a == b,
            (Value::Error(a), Value::Error(b)) => Arc::ptr_eq(a, b) || a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => f.write_str("undefined"),
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => f.write_str(&number_to_string(*n)),
            Value::String(s) => write!(f, "{:?}", s),
            Value::Array(items) => f.debug_list().entries(items).finish(),
            Value::Object(map) => f.debug_map().entries(map).finish(),
            Value::Bot(id) => write!(f, "Bot({})", id),
            Value::View { bot, kind } => write!(f, "View({}, {:?})", bot, kind),
            Value::Listener { bot, tag } => write!(f, "Listener({}.{})", bot, tag),
            Value::Function(func) => write!(f, "Function({})", func.name()),
            Value::Promise(handle) => write!(f, "{:?}", handle),
            Value::Error(err) => write!(f, "{}", err),
        }
    }
}

/// JavaScript `String(value)` rendering
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => f.write_str("undefined"),
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => f.write_str(&number_to_string(*n)),
            Value::String(s) => f.write_str(s),
            Value::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    if !item.is_nullish() {
                        write!(f, "{}", item)?;
                    }
                }
                Ok(())
            }
            Value::Object(_) | Value::View { .. } => f.write_str("[object Object]"),
            Value::Bot(id) => f.write_str(id),
            Value::Listener { tag, .. } => write!(f, "function {}() {{ [listener] }}", tag),
            Value::Function(func) => write!(f, "function {}() {{ [code] }}", func.name()),
            Value::Promise(_) => f.write_str("[object Promise]"),
            Value::Error(err) => write!(f, "{}", err),
        }
    }
}

pub(crate) fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        let text = if n > 0.0 { "Infinity" } else { "-Infinity" };
        text.to_string()
    } else if n == n.trunc() && n.abs() < 9.0e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

fn number_to_json(n: f64) -> serde_json::Value {
    if !n.is_finite() {
        serde_json::Value::Null
    } else if n == n.trunc() && n.abs() < 9.0e15 {
        serde_json::Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_integral_numbers_serialize_as_integers() {
        assert_eq!(Value::Number(2.0).to_json(), json!(2));
        assert_eq!(Value::Number(123.145).to_json(), json!(123.145));
    }

    #[test]
    fn test_error_display() {
        let err = Value::error("Error", "boom");
        assert_eq!(err.to_string(), "Error: boom");
        assert_eq!(err.to_json(), json!("Error: boom"));
    }

    #[test]
    fn test_loose_equality() {
        assert!(Value::Null.loose_equals(&Value::Undefined));
        assert!(Value::from("1").loose_equals(&Value::from(1)));
        assert!(!Value::from("a").loose_equals(&Value::from(1)));
        assert!(!Value::from("1").strict_equals(&Value::from(1)));
    }

    #[test]
    fn test_array_display_joins_with_commas() {
        let arr = Value::Array(vec![Value::from(1), Value::Null, Value::from("x")]);
        assert_eq!(arr.to_string(), "1,,x");
    }

    #[test]
    fn test_json_round_trip_keeps_structure() {
        let json = json!({"a": [1, 2.5, "x"], "b": null, "c": true});
        assert_eq!(Value::from_json(&json).to_json(), json);
    }
}
