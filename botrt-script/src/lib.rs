//! Script execution contract for botrt
//!
//! The runtime never interprets script text itself. It talks to a
//! [`ScriptHost`] that turns tag text into [`CompiledScript`]s, and it hands
//! every running script a [`ScriptEnv`], the capability surface through which
//! scripts read and write bots, call library functions and spend energy.
//!
//! ## Architecture
//!
//! ```text
//!   tag text ──► ScriptHost::compile ──► CompiledScript
//!                                            │ run(env, bindings)
//!                                            ▼
//!                 ScriptEnv (implemented by the runtime)
//!                   ├─ consume_energy      step budget
//!                   ├─ get/set/delete      host references (bots, tag views)
//!                   ├─ call_method         promises
//!                   └─ call_library        getBots, shout, os.toast, ...
//! ```
//!
//! Values crossing the boundary are [`Value`]s. Plain data (numbers,
//! strings, arrays, objects) is copied; bots, tag views, listeners and
//! promises are opaque references resolved by the environment.
//!
//! The crate ships one host, [`BotScriptHost`], a small JavaScript-flavoured
//! language with statements, closures, arrow functions and the usual array
//! and string helpers.

mod botscript;
mod energy;
mod error;
mod host;
mod value;

pub use botscript::BotScriptHost;
pub use energy::{Energy, DEFAULT_ENERGY};
pub use error::{CompileError, ScriptError, ScriptResult};
pub use host::{
    Bindings, CompiledScript, RunOutcome, ScriptEnv, ScriptFunction, ScriptHost, ScriptKind,
};
pub use value::{ErrorValue, PromiseHandle, PromiseId, Value, ViewKind};
