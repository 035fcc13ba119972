// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::debug;

use crate::Config;

/// Ordered list of config file locations searched from lowest to highest
/// priority.  Later files override earlier ones.
fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    // 1. Home
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".opencode.json"));
    }

    // 2. XDG config
    if let Some(cfg) = dirs::config_dir() {
        paths.push(cfg.join("opencode/.opencode.json"));
    }

    // 3. Workspace-local
    paths.push(PathBuf::from(".opencode.json"));

    paths
}

/// Load configuration by merging all discovered JSON files.
pub fn load() -> anyhow::Result<Config> {
    load_layers(&config_search_paths())
}

/// Merge the given files in order (later wins) and deserialize.  Missing
/// files are skipped; a malformed file is an error — a broken config should
/// be fixed, not silently ignored.
pub fn load_layers(paths: &[PathBuf]) -> anyhow::Result<Config> {
    let mut merged = serde_json::Value::Object(serde_json::Map::new());

    for path in paths {
        if path.is_file() {
            debug!(path = %path.display(), "loading config layer");
            let layer = read_layer(path)?;
            merge_json(&mut merged, layer);
        }
    }

    let config: Config = if matches!(merged, serde_json::Value::Object(ref m) if m.is_empty()) {
        Config::default()
    } else {
        serde_json::from_value(merged).context("invalid configuration")?
    };
    Ok(config)
}

fn read_layer(path: &Path) -> anyhow::Result<serde_json::Value> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

/// Deep-merge `src` into `dst`; src wins on scalar conflicts.
fn merge_json(dst: &mut serde_json::Value, src: serde_json::Value) {
    match (dst, src) {
        (serde_json::Value::Object(d), serde_json::Value::Object(s)) => {
            for (k, v) in s {
                let entry = d
                    .entry(k)
                    .or_insert(serde_json::Value::Object(serde_json::Map::new()));
                merge_json(entry, v);
            }
        }
        (dst, src) => *dst = src,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn val(s: &str) -> serde_json::Value {
        serde_json::from_str(s).unwrap()
    }

    #[test]
    fn merge_scalar_src_wins() {
        let mut dst = val(r#"{"x": 1}"#);
        let src = val(r#"{"x": 2}"#);
        merge_json(&mut dst, src);
        assert_eq!(dst["x"].as_i64(), Some(2));
    }

    #[test]
    fn merge_preserves_keys_not_in_src() {
        let mut dst = val(r#"{"a": 1, "b": 2}"#);
        let src = val(r#"{"b": 99}"#);
        merge_json(&mut dst, src);
        assert_eq!(dst["a"].as_i64(), Some(1));
        assert_eq!(dst["b"].as_i64(), Some(99));
    }

    #[test]
    fn merge_nested_objects() {
        let mut dst = val(r#"{"agents": {"coder": {"model": "a"}, "title": {"model": "b"}}}"#);
        let src = val(r#"{"agents": {"coder": {"model": "c"}}}"#);
        merge_json(&mut dst, src);
        assert_eq!(dst["agents"]["coder"]["model"].as_str(), Some("c"));
        assert_eq!(dst["agents"]["title"]["model"].as_str(), Some("b"));
    }

    #[test]
    fn load_layers_later_file_overrides_earlier() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("base.json");
        let local = dir.path().join("local.json");
        std::fs::write(
            &base,
            r#"{"agents": {"coder": {"model": "base-model", "maxTokens": 1000}}}"#,
        )
        .unwrap();
        std::fs::write(&local, r#"{"agents": {"coder": {"model": "local-model"}}}"#).unwrap();

        let cfg = load_layers(&[base, local]).unwrap();
        assert_eq!(cfg.agents.coder.model.as_deref(), Some("local-model"));
        // maxTokens survives from the base layer.
        assert_eq!(cfg.agents.coder.max_tokens, Some(1000));
    }

    #[test]
    fn load_layers_missing_files_are_skipped() {
        let cfg = load_layers(&[PathBuf::from("/nonexistent/.opencode.json")]).unwrap();
        assert!(cfg.auto_compact);
    }

    #[test]
    fn load_layers_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, "{ not json").unwrap();
        assert!(load_layers(&[bad]).is_err());
    }
}
