//! Run one entry (shout, whisper, execute or process) against a state file.

use crate::state::load_bots;
use anyhow::{Context, Result};
use botrt_runtime::{Batch, BotRuntime};
use botrt_types::Action;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// The entry to run after loading the bots
pub enum Entry {
    Shout {
        name: String,
        targets: Option<Vec<String>>,
        arg: Option<String>,
    },
    Execute(String),
    Process(PathBuf),
}

#[derive(Serialize)]
struct RunReport {
    /// Shout results or the script's return value
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<serde_json::Value>,
    /// The entry's own batch first, then continuation and timer batches
    batches: Vec<Batch>,
}

pub fn run(config_path: &Path, state_path: &Path, entry: Entry, advance: u64) -> Result<()> {
    let mut runtime = super::load_runtime(config_path)?;
    let bots = load_bots(state_path)?;
    let event = runtime.add_bots(bots);
    tracing::info!(bots = event.added_bots.len(), "state loaded");

    let report = run_entry(&mut runtime, entry, advance)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn run_entry(runtime: &mut BotRuntime, entry: Entry, advance: u64) -> Result<RunReport> {
    let (value, batch) = match entry {
        Entry::Shout { name, targets, arg } => {
            let arg = parse_arg(arg.as_deref())?;
            let result = match targets {
                Some(ids) => runtime.whisper(&ids, &name, arg),
                None => runtime.shout(&name, arg),
            }
            .with_context(|| format!("Shout '{}' failed", name))?;
            let batch = Batch {
                actions: result.actions,
                errors: result.errors,
            };
            (Some(serde_json::Value::Array(result.results)), batch)
        }
        Entry::Execute(script) => {
            let result = runtime.execute(&script).context("Script failed")?;
            let batch = Batch {
                actions: result.actions,
                errors: result.errors,
            };
            (Some(result.value), batch)
        }
        Entry::Process(path) => {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read actions file {}", path.display()))?;
            let raw: Vec<serde_json::Value> =
                serde_json::from_str(&contents).context("Actions file must hold a JSON array")?;
            let actions = raw.into_iter().map(Action::from_json).collect();
            (None, runtime.process(actions).context("Processing actions failed")?)
        }
    };

    let mut batches = vec![batch];
    if advance > 0 {
        batches.extend(runtime.advance_time(advance));
    }
    Ok(RunReport { value, batches })
}

fn parse_arg(arg: Option<&str>) -> Result<serde_json::Value> {
    match arg {
        Some(text) => serde_json::from_str(text).with_context(|| format!("Invalid JSON argument: {}", text)),
        None => Ok(serde_json::Value::Null),
    }
}
