// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! File history: every write/edit/patch records the old and new contents so
//! changes can be reviewed and undone.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use similar::TextDiff;

/// One recorded change to a file.
#[derive(Debug, Clone)]
pub struct FileVersion {
    pub path: String,
    pub old_content: String,
    pub new_content: String,
    /// Unified diff of old → new.
    pub diff: String,
    pub time: DateTime<Utc>,
}

/// Append-only change log shared by the mutating tools.
#[derive(Default)]
pub struct FileHistory {
    versions: Mutex<Vec<FileVersion>>,
}

impl FileHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one change and return its rendered diff.
    pub fn record(&self, path: &str, old_content: &str, new_content: &str) -> String {
        let diff = unified_diff(path, old_content, new_content);
        self.versions.lock().unwrap().push(FileVersion {
            path: path.to_string(),
            old_content: old_content.to_string(),
            new_content: new_content.to_string(),
            diff: diff.clone(),
            time: Utc::now(),
        });
        diff
    }

    /// All recorded versions of `path`, oldest first.
    pub fn versions_for(&self, path: &str) -> Vec<FileVersion> {
        self.versions
            .lock()
            .unwrap()
            .iter()
            .filter(|v| v.path == path)
            .cloned()
            .collect()
    }

    /// The most recent version of `path`, if any change was recorded.
    pub fn latest(&self, path: &str) -> Option<FileVersion> {
        self.versions
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|v| v.path == path)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.versions.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Render a unified diff between two contents.
pub fn unified_diff(path: &str, old: &str, new: &str) -> String {
    TextDiff::from_lines(old, new)
        .unified_diff()
        .context_radius(3)
        .header(&format!("a/{path}"), &format!("b/{path}"))
        .to_string()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_stores_old_and_new_contents() {
        let h = FileHistory::new();
        h.record("a.rs", "old\n", "new\n");
        let v = h.latest("a.rs").unwrap();
        assert_eq!(v.old_content, "old\n");
        assert_eq!(v.new_content, "new\n");
    }

    #[test]
    fn diff_marks_removed_and_added_lines() {
        let h = FileHistory::new();
        let diff = h.record("a.rs", "old\n", "new\n");
        assert!(diff.contains("-old"));
        assert!(diff.contains("+new"));
    }

    #[test]
    fn versions_accumulate_in_order() {
        let h = FileHistory::new();
        h.record("a.rs", "", "v1\n");
        h.record("a.rs", "v1\n", "v2\n");
        h.record("b.rs", "", "other\n");
        let versions = h.versions_for("a.rs");
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[1].new_content, "v2\n");
        assert_eq!(h.len(), 3);
    }

    #[test]
    fn latest_for_unknown_path_is_none() {
        let h = FileHistory::new();
        assert!(h.latest("missing.rs").is_none());
    }
}
