//! Load a state file and report what the runtime computed.

use crate::state::load_bots;
use anyhow::Result;
use botrt_types::{ScriptErrorRecord, StateUpdatedEvent};
use serde::Serialize;
use std::path::Path;

#[derive(Serialize)]
struct CheckReport {
    bots: usize,
    state: StateUpdatedEvent,
    errors: Vec<ScriptErrorRecord>,
}

/// Add every bot in `state_path` and print the resulting state event with
/// any formula errors raised while computing it.
pub fn check(config_path: &Path, state_path: &Path) -> Result<()> {
    let mut runtime = super::load_runtime(config_path)?;
    let mut errors_rx = runtime.subscribe_errors();

    let bots = load_bots(state_path)?;
    let state = runtime.add_bots(bots);

    let mut errors = Vec::new();
    while let Ok(batch) = errors_rx.try_recv() {
        errors.extend(batch);
    }
    if !errors.is_empty() {
        tracing::warn!(errors = errors.len(), "formulas failed");
    }

    let report = CheckReport {
        bots: runtime.bot_count(),
        state,
        errors,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
