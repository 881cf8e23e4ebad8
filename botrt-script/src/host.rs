//! Host traits
//!
//! `ScriptHost` compiles, `CompiledScript` runs, `ScriptEnv` is the world a
//! running script sees. Implementations of `ScriptEnv` decide what host
//! references (`Value::Bot`, `Value::View`, ...) mean.

use crate::error::{CompileError, ScriptError};
use crate::value::Value;
use std::any::Any;
use std::sync::Arc;

/// Whether a script is a formula (`=` tag) or a listener (`@` tag)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptKind {
    /// The completion value of the last expression statement is the result
    Formula,
    /// Only an explicit `return` produces a result
    Listener,
}

/// Compiles script text
pub trait ScriptHost: Send + Sync {
    fn compile(&self, source: &str, kind: ScriptKind) -> Result<Arc<dyn CompiledScript>, CompileError>;
}

/// A compiled, reusable script
pub trait CompiledScript: Send + Sync {
    fn run(&self, env: &mut dyn ScriptEnv, bindings: Bindings) -> Result<RunOutcome, ScriptError>;

    /// The source text the script was compiled from
    fn source(&self) -> &str;
}

/// A callable value
pub trait ScriptFunction: Send + Sync {
    fn call(&self, env: &mut dyn ScriptEnv, args: Vec<Value>) -> Result<Value, ScriptError>;

    fn name(&self) -> &str {
        "anonymous"
    }

    /// Lets environments recognise their own function types
    fn as_any(&self) -> &dyn Any;
}

/// Names bound in every script's outermost scope
#[derive(Debug, Clone, Default)]
pub struct Bindings {
    /// `this` and `bot`
    pub this: Value,
    pub tags: Value,
    pub raw: Value,
    pub masks: Value,
    pub tag_name: Value,
    pub creator: Value,
    pub config: Value,
    pub config_tag: Value,
    /// `that` and `data`
    pub that: Value,
}

impl Bindings {
    /// Bindings as (name, value) pairs. `data` is resolved by hosts as an
    /// alias of `that`, so it is not listed separately.
    pub fn entries(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("this", self.this.clone()),
            ("bot", self.this.clone()),
            ("tags", self.tags.clone()),
            ("raw", self.raw.clone()),
            ("masks", self.masks.clone()),
            ("tagName", self.tag_name.clone()),
            ("creator", self.creator.clone()),
            ("config", self.config.clone()),
            ("configTag", self.config_tag.clone()),
            ("that", self.that.clone()),
        ]
    }
}

/// Result of running a script
#[derive(Debug, Clone, Default)]
pub struct RunOutcome {
    pub value: Value,
    /// Final value of the `that` binding, so callers can observe in-place
    /// edits to the argument (e.g. `that.responses.push(x)`)
    pub that: Value,
}

/// Capabilities granted to a running script
pub trait ScriptEnv {
    /// Spend `amount` steps of the current entry's budget
    fn consume_energy(&mut self, amount: u64) -> Result<(), ScriptError>;

    /// Read a property of a host reference
    fn get_member(&mut self, target: &Value, key: &str) -> Result<Value, ScriptError>;

    /// Write a property of a host reference
    fn set_member(&mut self, target: &Value, key: &str, value: Value) -> Result<(), ScriptError>;

    fn delete_member(&mut self, target: &Value, key: &str) -> Result<bool, ScriptError>;

    /// Enumerable keys of a host reference
    fn keys(&mut self, target: &Value) -> Result<Vec<String>, ScriptError>;

    /// Call a method on a host reference. `Ok(None)` means no such method.
    fn call_method(
        &mut self,
        target: &Value,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Option<Value>, ScriptError>;

    /// Call a host reference that is not a [`ScriptFunction`] (listeners)
    fn call_value(&mut self, callee: &Value, args: Vec<Value>) -> Result<Value, ScriptError>;

    /// Call a library function such as `getBots` or `os.toast`.
    /// `Ok(None)` means the name is not defined.
    fn call_library(&mut self, name: &str, args: Vec<Value>) -> Result<Option<Value>, ScriptError>;
}
