//! Lightweight transcript-based learning extraction, grounded on the
//! teacher's `memory.rs` topic-file index (here: one JSON store with a
//! keyword index instead of markdown files, since knowledge entries are
//! retrieved programmatically rather than browsed).

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::learning::ledger::extract_keywords;
use crate::persistence::{load_or_default, save_atomic};
use crate::types::now_iso8601;

const MARKERS: &[&str] = &[
    "i discovered",
    "the key insight",
    "turns out",
    "important:",
    "note:",
    "gotcha:",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub id: u64,
    pub text: String,
    pub keywords: Vec<String>,
    pub created_at: String,
    pub used_successfully: u32,
    pub used_unsuccessfully: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KnowledgeStore {
    pub entries: Vec<KnowledgeEntry>,
    next_id: u64,
}

impl KnowledgeStore {
    pub fn load(state_dir: &Path) -> Self {
        load_or_default(&state_dir.join("knowledge").join("storage.json"))
    }

    pub fn save(&self, state_dir: &Path) -> anyhow::Result<()> {
        save_atomic(&state_dir.join("knowledge").join("storage.json"), self)
    }

    /// Scans a transcript for marker phrases and records the surrounding
    /// sentence as a learning, keyed by its own action-keyword overlap.
    pub fn extract_from_transcript(&mut self, transcript: &str, objective_keywords: &[String]) -> Vec<u64> {
        let mut new_ids = Vec::new();
        let lower = transcript.to_lowercase();
        for marker in MARKERS {
            let mut start = 0;
            while let Some(pos) = lower[start..].find(marker) {
                let abs = start + pos;
                let sentence_end = transcript[abs..]
                    .find('.')
                    .map(|i| abs + i + 1)
                    .unwrap_or(transcript.len());
                let text = transcript[abs..sentence_end].trim().to_string();
                if !text.is_empty() {
                    let id = self.next_id;
                    self.next_id += 1;
                    let mut keywords = extract_keywords(&text);
                    keywords.extend(objective_keywords.iter().cloned());
                    keywords.sort();
                    keywords.dedup();
                    self.entries.push(KnowledgeEntry {
                        id,
                        text,
                        keywords,
                        created_at: now_iso8601(),
                        used_successfully: 0,
                        used_unsuccessfully: 0,
                    });
                    new_ids.push(id);
                }
                start = abs + marker.len();
            }
        }
        new_ids
    }

    /// Top-K entries ranked by keyword overlap with the objective.
    pub fn top_relevant(&self, objective: &str, k: usize) -> Vec<&KnowledgeEntry> {
        let objective_keywords = extract_keywords(objective);
        let mut scored: Vec<(&KnowledgeEntry, usize)> = self
            .entries
            .iter()
            .map(|e| {
                let overlap = e
                    .keywords
                    .iter()
                    .filter(|k| objective_keywords.contains(k))
                    .count();
                (e, overlap)
            })
            .filter(|(_, overlap)| *overlap > 0)
            .collect();
        scored.sort_by(|a, b| b.1.cmp(&a.1));
        scored.into_iter().take(k).map(|(e, _)| e).collect()
    }

    pub fn mark_outcome(&mut self, id: u64, success: bool) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.id == id) {
            if success {
                entry.used_successfully += 1;
            } else {
                entry.used_unsuccessfully += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_marked_sentences() {
        let mut store = KnowledgeStore::default();
        let ids = store.extract_from_transcript(
            "I ran the tests. I discovered that the cache was stale under load.",
            &["cache".to_string()],
        );
        assert_eq!(ids.len(), 1);
        assert!(store.entries[0].text.to_lowercase().contains("i discovered"));
    }

    #[test]
    fn top_relevant_ranks_by_keyword_overlap() {
        let mut store = KnowledgeStore::default();
        store.extract_from_transcript("Note: always validate input before parse.", &["validate".into()]);
        store.extract_from_transcript("Note: unrelated formatting detail.", &[]);
        let top = store.top_relevant("validate the input", 5);
        assert!(!top.is_empty());
    }
}
