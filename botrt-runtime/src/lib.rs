//! Reactive bot runtime
//!
//! This crate keeps a live, compiled copy of a set of bots and runs their
//! scripts. Tags prefixed with `=` are formulas whose values are memoised
//! and recalculated when something they read changes; tags prefixed with
//! `@` are listeners run by shouts, whispers and lifecycle events.
//!
//! # Architecture
//!
//! ```text
//! add/remove/update_bots ──► BotStore ──► DependencyGraph ──► dirty set
//!                               ▲                                 │
//!                               │ set_tag / set_mask              ▼
//!  shout / whisper / execute ──► BotRuntime (ScriptEnv) ◄── formula evaluation
//!  process(actions)                 │
//!                                   ├─► EditModeGate   immediate / delayed / none
//!                                   ├─► PromiseTable   .then / .catch jobs
//!                                   ├─► TaskBridge     async_result / async_error
//!                                   └─► Scheduler      setTimeout / os.sleep
//!                                   │
//!                                   ▼
//!                     Batch { actions, errors } ──► subscribers
//! ```
//!
//! Every top-level entry runs under one energy budget and produces one
//! [`Batch`]. Promise continuations and timer callbacks run later, each as
//! its own batch.
//!
//! # Example
//!
//! ```rust,ignore
//! use botrt_runtime::BotRuntime;
//! use botrt_types::Bot;
//!
//! let mut runtime = BotRuntime::default();
//! runtime.add_bots(vec![
//!     Bot::new("counter").with_tag("count", "1").with_tag("next", "=tags.count + 1"),
//! ]);
//! let result = runtime.execute("return getBot('id', 'counter').tags.next")?;
//! assert_eq!(result.value, serde_json::json!(2));
//! ```

pub mod compiler;
pub mod config;
pub mod deps;
pub mod edit_mode;
pub mod error;
pub mod ids;
pub mod runtime;
pub mod scheduler;
pub mod store;
pub mod tasks;

pub use compiler::{coerce_literal, CompiledTag, TagCompiler};
pub use config::{ConfigError, RuntimeConfig};
pub use deps::{Dependency, FormulaKey};
pub use edit_mode::{DefaultEditModes, EditModeMap, EditModeProvider, SharedEditModes};
pub use error::{RuntimeError, RuntimeResult};
pub use ids::{IdGenerator, SequentialIds, UuidIds};
pub use runtime::{Batch, BotRuntime, ExecuteResult, RuntimeBot, ShoutResult};
