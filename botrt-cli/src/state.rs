//! State files: the bots a run starts from

use anyhow::{Context, Result};
use botrt_types::Bot;
use serde::Deserialize;
use std::path::Path;

/// Either `{bots: [...]}` or a bare list of bots
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StateFile {
    Wrapped { bots: Vec<Bot> },
    Bare(Vec<Bot>),
}

/// Read the bots from a YAML (or JSON, which is valid YAML) state file
pub fn load_bots(path: &Path) -> Result<Vec<Bot>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read state file {}", path.display()))?;
    parse_bots(&contents).with_context(|| format!("Failed to parse state file {}", path.display()))
}

fn parse_bots(contents: &str) -> Result<Vec<Bot>> {
    if contents.trim().is_empty() {
        return Ok(Vec::new());
    }
    let bots = match serde_yaml::from_str::<StateFile>(contents)? {
        StateFile::Wrapped { bots } | StateFile::Bare(bots) => bots,
    };
    Ok(bots)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrapped_and_bare_lists() {
        let wrapped = parse_bots("bots:\n  - id: a\n    tags:\n      n: '1'\n").unwrap();
        assert_eq!(wrapped.len(), 1);
        assert_eq!(wrapped[0].tags["n"], serde_json::json!("1"));

        let bare = parse_bots("- id: a\n- id: b\n  space: tempLocal\n").unwrap();
        assert_eq!(bare.len(), 2);
        assert_eq!(bare[1].space().as_str(), "tempLocal");
    }

    #[test]
    fn test_empty_file_has_no_bots() {
        assert!(parse_bots("  \n").unwrap().is_empty());
    }
}
