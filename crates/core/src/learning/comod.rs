//! Task-file co-modification index: which files tend to change together in
//! successful commits, used to hint the worker's context assembly.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::persistence::{load_or_default, save_atomic};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoModIndex {
    /// file -> (co-occurring file -> count)
    pub co_occurrences: HashMap<String, HashMap<String, u64>>,
}

impl CoModIndex {
    pub fn load(state_dir: &Path) -> Self {
        load_or_default(&state_dir.join("task-file-patterns.json"))
    }

    pub fn save(&self, state_dir: &Path) -> anyhow::Result<()> {
        save_atomic(&state_dir.join("task-file-patterns.json"), self)
    }

    /// Bumps every ordered pair in `committed_files` — symmetric, so a
    /// commit touching {a, b, c} increments a<->b, a<->c, b<->c.
    pub fn record_commit(&mut self, committed_files: &[String]) {
        for (i, file) in committed_files.iter().enumerate() {
            for other in committed_files.iter().enumerate().filter_map(|(j, f)| (j != i).then_some(f)) {
                *self
                    .co_occurrences
                    .entry(file.clone())
                    .or_default()
                    .entry(other.clone())
                    .or_insert(0) += 1;
            }
        }
    }

    pub fn hints_for(&self, target_files: &[String], top_k: usize) -> Vec<(String, u64)> {
        let mut combined: HashMap<String, u64> = HashMap::new();
        for file in target_files {
            if let Some(co) = self.co_occurrences.get(file) {
                for (other, count) in co {
                    if !target_files.contains(other) {
                        *combined.entry(other.clone()).or_insert(0) += count;
                    }
                }
            }
        }
        let mut ranked: Vec<(String, u64)> = combined.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(top_k);
        ranked
    }

    pub fn format_hints_for_prompt(&self, target_files: &[String]) -> String {
        let hints = self.hints_for(target_files, 5);
        if hints.is_empty() {
            return String::new();
        }
        let list: Vec<String> = hints
            .into_iter()
            .map(|(file, count)| format!("{file} (co-modified {count}x)"))
            .collect();
        format!("Files often changed together with your targets: {}", list.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_commit_bumps_symmetric_pairs() {
        let mut index = CoModIndex::default();
        index.record_commit(&["a.rs".into(), "b.rs".into()]);
        assert_eq!(index.co_occurrences["a.rs"]["b.rs"], 1);
        assert_eq!(index.co_occurrences["b.rs"]["a.rs"], 1);
    }

    #[test]
    fn hints_exclude_the_target_files_themselves() {
        let mut index = CoModIndex::default();
        index.record_commit(&["a.rs".into(), "b.rs".into(), "c.rs".into()]);
        let hints = index.hints_for(&["a.rs".to_string()], 5);
        assert!(hints.iter().all(|(f, _)| f != "a.rs"));
        assert_eq!(hints.len(), 2);
    }
}
