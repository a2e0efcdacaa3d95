//! Structural fast path (§4.2.1 step 3): a handful of mechanical
//! objective shapes (typo fix, identifier rename) are handled by a plain
//! string transform, skipping the LLM entirely when it succeeds.

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

pub struct FastPathMatch {
    pub file: String,
    pub find: String,
    pub replace: String,
}

fn typo_fix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)fix\s+typo\s+(?:in\s+)?([^\s:]+)(?:[:,]?\s+(?:['"]?(\w+)['"]?\s*(?:->|to|→)\s*['"]?(\w+)['"]?))?"#)
            .expect("static regex")
    })
}

fn rename_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?i)rename\s+(\w+)\s+(?:to|->)\s+(\w+)\s+in\s+([^\s]+)"#).expect("static regex"))
}

/// Common typo corrections recognised without an explicit find/replace pair
/// in the objective text.
const KNOWN_TYPOS: &[(&str, &str)] = &[
    ("recieve", "receive"),
    ("seperate", "separate"),
    ("occured", "occurred"),
    ("definately", "definitely"),
    ("untill", "until"),
    ("wich", "which"),
    ("teh", "the"),
    ("lenght", "length"),
];

/// Matches the objective against the fixed fast-path pattern set. Returns
/// `None` when the objective needs a full LLM attempt.
pub async fn detect(objective: &str, project_root: &Path) -> Option<FastPathMatch> {
    if let Some(caps) = rename_re().captures(objective) {
        let find = caps.get(1)?.as_str().to_string();
        let replace = caps.get(2)?.as_str().to_string();
        let file = caps.get(3)?.as_str().to_string();
        if project_root.join(&file).exists() {
            return Some(FastPathMatch { file, find, replace });
        }
        return None;
    }

    if let Some(caps) = typo_fix_re().captures(objective) {
        let file = caps.get(1)?.as_str().to_string();
        let path = project_root.join(&file);
        if !path.exists() {
            return None;
        }
        if let (Some(find), Some(replace)) = (caps.get(2), caps.get(3)) {
            return Some(FastPathMatch {
                file,
                find: find.as_str().to_string(),
                replace: replace.as_str().to_string(),
            });
        }
        let content = tokio::fs::read_to_string(&path).await.ok()?;
        for (typo, fix) in KNOWN_TYPOS {
            if content.contains(typo) {
                return Some(FastPathMatch {
                    file,
                    find: typo.to_string(),
                    replace: fix.to_string(),
                });
            }
        }
    }

    None
}

/// Applies the matched transform in place. Returns `true` if a change was
/// made.
pub async fn apply(m: &FastPathMatch, project_root: &Path) -> anyhow::Result<bool> {
    let path = project_root.join(&m.file);
    let content = tokio::fs::read_to_string(&path).await?;
    if !content.contains(&m.find) {
        return Ok(false);
    }
    let updated = content.replace(&m.find, &m.replace);
    tokio::fs::write(&path, updated).await?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn detects_known_typo_in_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::create_dir(dir.path().join("src")).await.unwrap();
        tokio::fs::write(dir.path().join("src/utils.ts"), "function recieve() {}").await.unwrap();
        let m = detect("Fix typo in src/utils.ts", dir.path()).await.unwrap();
        assert_eq!(m.file, "src/utils.ts");
        assert_eq!(m.find, "recieve");
        assert_eq!(m.replace, "receive");
    }

    #[tokio::test]
    async fn returns_none_when_target_file_is_missing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(detect("Fix typo in missing.ts", dir.path()).await.is_none());
    }

    #[tokio::test]
    async fn apply_replaces_the_matched_text() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("a.ts"), "recieve data").await.unwrap();
        let m = FastPathMatch { file: "a.ts".into(), find: "recieve".into(), replace: "receive".into() };
        let changed = apply(&m, dir.path()).await.unwrap();
        assert!(changed);
        assert_eq!(tokio::fs::read_to_string(dir.path().join("a.ts")).await.unwrap(), "receive data");
    }
}
