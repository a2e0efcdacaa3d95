//! Context preparation (§4.2.1 step 1) and pre-flight validation (step 2).
//! Pulls from all four learning stores to assemble the worker's briefing;
//! grounded on the teacher's `context_briefing.rs` layout (section-by-
//! section prompt assembly with empty sections omitted).

use std::path::Path;

use regex::Regex;

use crate::git;
use crate::learning::{CoModIndex, ErrorPatternStore, KnowledgeStore};
use crate::worker::planning::Plan;

/// Keyword heuristic for "this task creates new files", used to exempt
/// nonexistent-target objectives from `INVALID_TARGET`.
const CREATE_KEYWORDS: &[&str] = &["create", "add a new", "new file", "scaffold", "generate"];

pub struct PreflightResult {
    pub invalid_target: Option<String>,
    pub recent_commit_hint: Option<String>,
}

fn looks_like_create_task(objective: &str) -> bool {
    let lower = objective.to_lowercase();
    CREATE_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

fn extract_file_paths(objective: &str) -> Vec<String> {
    static PATH_CHARS: &str = r"[A-Za-z0-9_./-]+\.[A-Za-z0-9]{1,8}";
    let re = Regex::new(PATH_CHARS).expect("static regex");
    re.find_iter(objective).map(|m| m.as_str().to_string()).collect()
}

/// Step 2: objectives naming a full file path that does not exist, for a
/// task that is not a "create" task, fail immediately.
pub fn preflight(objective: &str, project_root: &Path) -> PreflightResult {
    let mut invalid_target = None;
    if !looks_like_create_task(objective) {
        for path in extract_file_paths(objective) {
            if path.contains('/') && !project_root.join(&path).exists() {
                invalid_target = Some(format!("target file does not exist: {path}"));
                break;
            }
        }
    }

    let recent_commit_hint = scan_recent_commits(objective, project_root);

    PreflightResult { invalid_target, recent_commit_hint }
}

fn scan_recent_commits(objective: &str, project_root: &Path) -> Option<String> {
    let log = git::log_oneline(project_root, 20).ok()?;
    let objective_keywords = crate::learning::ledger::extract_keywords(objective);
    if objective_keywords.is_empty() {
        return None;
    }
    for line in &log {
        let lower = line.to_lowercase();
        let overlap = objective_keywords.iter().filter(|k| lower.contains(k.as_str())).count();
        if overlap >= 2 {
            return Some(format!(
                "a recent commit may have already addressed this: {}",
                line.trim()
            ));
        }
    }
    None
}

pub struct BriefingInputs<'a> {
    pub objective: &'a str,
    pub project_root: &'a Path,
    pub target_files: &'a [String],
    pub plan: Option<&'a Plan>,
    pub post_mortem: Option<&'a str>,
    pub preflight_hint: Option<&'a str>,
}

/// Assembles the full worker prompt from every §4.2.2(b) ingredient.
/// Sections with nothing to contribute are omitted rather than emitted
/// empty.
pub fn build_briefing(
    inputs: &BriefingInputs<'_>,
    knowledge: &KnowledgeStore,
    errors: &ErrorPatternStore,
    comod: &CoModIndex,
) -> String {
    let mut sections = Vec::new();

    sections.push(format!("## Objective\n{}", inputs.objective));

    let learnings = knowledge.top_relevant(inputs.objective, 5);
    if !learnings.is_empty() {
        let text = learnings.iter().map(|e| format!("- {}", e.text)).collect::<Vec<_>>().join("\n");
        sections.push(format!("## Relevant learnings from past tasks\n{text}"));
    }

    let warnings = errors.get_failure_warnings_for_task(inputs.target_files);
    if !warnings.is_empty() {
        sections.push(format!("## Past failure warnings\n{}", warnings.join("\n")));
    }

    let comod_hint = comod.format_hints_for_prompt(inputs.target_files);
    if !comod_hint.is_empty() {
        sections.push(format!("## Co-modification hints\n{comod_hint}"));
    }

    if let Some(hint) = inputs.preflight_hint {
        sections.push(format!("## Pre-flight note\n{hint}"));
    }

    if let Some(plan) = inputs.plan {
        let plan_json = serde_json::to_string_pretty(plan).unwrap_or_default();
        sections.push(format!("## Approved execution plan\n{plan_json}"));
    }

    if let Some(post_mortem) = inputs.post_mortem {
        sections.push(format!("## Post-mortem from previous tier (one-shot)\n{post_mortem}"));
    }

    sections.push(
        "## Rules\n\
         If the task is already complete, reply with `TASK_ALREADY_COMPLETE: <reason>` and make no changes.\n\
         If a named target does not exist, reply with `INVALID_TARGET: <reason>`.\n\
         If the objective is too vague to execute, reply with `NEEDS_DECOMPOSITION: <subtasks or reason>`."
            .to_string(),
    );

    sections.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_target_detected_for_nonexistent_path() {
        let dir = tempfile::tempdir().unwrap();
        let result = preflight("fix the bug in src/missing.rs", dir.path());
        assert!(result.invalid_target.is_some());
    }

    #[test]
    fn create_task_does_not_trip_invalid_target() {
        let dir = tempfile::tempdir().unwrap();
        let result = preflight("create src/new_module.rs with a hello function", dir.path());
        assert!(result.invalid_target.is_none());
    }

    #[test]
    fn existing_target_path_is_valid() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/utils.rs"), "").unwrap();
        let result = preflight("fix typo in src/utils.rs", dir.path());
        assert!(result.invalid_target.is_none());
    }
}
