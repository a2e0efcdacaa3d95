//! Anchored sentinel parsing (§9 "Dynamic parsing of LLM output"): the
//! three structured markers the worker watches for in both final and
//! streaming text, compiled once at first use.

use std::sync::OnceLock;

use regex::Regex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sentinel {
    AlreadyComplete(String),
    InvalidTarget(String),
    NeedsDecomposition(String),
}

fn already_complete_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^\s*TASK_ALREADY_COMPLETE:\s*(.+)$").expect("static regex"))
}

fn invalid_target_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^\s*INVALID_TARGET:\s*(.+)$").expect("static regex"))
}

fn needs_decomposition_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^\s*NEEDS_DECOMPOSITION:\s*(.+)$").expect("static regex"))
}

/// Scans `text` for the first matching sentinel. Checked in a fixed
/// priority order since a single response should never emit more than one.
pub fn scan(text: &str) -> Option<Sentinel> {
    if let Some(caps) = invalid_target_re().captures(text) {
        return Some(Sentinel::InvalidTarget(caps[1].trim().to_string()));
    }
    if let Some(caps) = needs_decomposition_re().captures(text) {
        return Some(Sentinel::NeedsDecomposition(caps[1].trim().to_string()));
    }
    if let Some(caps) = already_complete_re().captures(text) {
        return Some(Sentinel::AlreadyComplete(caps[1].trim().to_string()));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scans_already_complete_sentinel() {
        let text = "I checked the file and it already has this.\nTASK_ALREADY_COMPLETE: validator already covers this case";
        assert_eq!(
            scan(text),
            Some(Sentinel::AlreadyComplete("validator already covers this case".to_string()))
        );
    }

    #[test]
    fn scans_invalid_target_over_others() {
        let text = "INVALID_TARGET: no such file\nTASK_ALREADY_COMPLETE: also this";
        assert_eq!(scan(text), Some(Sentinel::InvalidTarget("no such file".to_string())));
    }

    #[test]
    fn returns_none_for_plain_text() {
        assert_eq!(scan("just doing some work here"), None);
    }
}
