//! Planner/critic pass (§4.2.1 step 4), grounded on the teacher's
//! `planning.rs` two-agent prompt pair, reshaped around the structured
//! `Plan` spec.md names explicitly instead of the teacher's free-text
//! markdown rounds.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlreadyComplete {
    pub likely: bool,
    #[serde(default)]
    pub why: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NeedsDecomposition {
    pub needed: bool,
    #[serde(default)]
    pub suggested_subtasks: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    #[serde(default)]
    pub files_to_read: Vec<String>,
    #[serde(default)]
    pub files_to_modify: Vec<String>,
    #[serde(default)]
    pub files_to_create: Vec<String>,
    #[serde(default)]
    pub steps: Vec<String>,
    #[serde(default)]
    pub risks: Vec<String>,
    #[serde(default)]
    pub expected_outcome: String,
    #[serde(default)]
    pub already_complete: Option<AlreadyComplete>,
    #[serde(default)]
    pub needs_decomposition: Option<NeedsDecomposition>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CriticOutcome {
    Approved,
    Rejected(String),
}

pub fn build_planner_prompt(objective: &str, briefing: &str) -> String {
    format!(
        "You are the planning stage for a coding task. Objective:\n{objective}\n\n\
         Project briefing:\n{briefing}\n\n\
         Respond with a JSON object matching this shape exactly: \
         {{\"filesToRead\": [], \"filesToModify\": [], \"filesToCreate\": [], \"steps\": [], \"risks\": [], \
         \"expectedOutcome\": \"\", \"alreadyComplete\": {{\"likely\": false, \"why\": \"\"}}, \
         \"needsDecomposition\": {{\"needed\": false, \"suggestedSubtasks\": []}}}}.\n\
         Set alreadyComplete.likely=true only if the briefing shows the work is already done. \
         Set needsDecomposition.needed=true only if the objective cannot be completed as one task."
    )
}

pub fn build_critic_prompt(objective: &str, plan: &Plan) -> String {
    let plan_json = serde_json::to_string_pretty(plan).unwrap_or_default();
    format!(
        "Review this plan for the objective \"{objective}\":\n\n{plan_json}\n\n\
         Reply with APPROVE if the plan is sound and addresses the objective, \
         or REJECT: <reason> if it is missing a requirement, targets the wrong files, \
         or is likely to fail verification."
    )
}

/// Parses the critic's free-text verdict. Anything not starting with
/// `APPROVE` is treated as a rejection, mirroring the conservative parsing
/// the worker applies to all LLM sentinels.
pub fn parse_critic_output(output: &str) -> CriticOutcome {
    let trimmed = output.trim();
    if trimmed.to_uppercase().starts_with("APPROVE") {
        CriticOutcome::Approved
    } else {
        let reason = trimmed
            .strip_prefix("REJECT:")
            .or_else(|| trimmed.strip_prefix("REJECT"))
            .unwrap_or(trimmed)
            .trim()
            .to_string();
        CriticOutcome::Rejected(if reason.is_empty() { "plan rejected".to_string() } else { reason })
    }
}

/// Best-effort extraction of a `Plan` from planner output: looks for the
/// first top-level JSON object in the text.
pub fn parse_plan(output: &str) -> Option<Plan> {
    let start = output.find('{')?;
    let end = output.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&output[start..=end]).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_critic_output_approves() {
        assert_eq!(parse_critic_output("APPROVE"), CriticOutcome::Approved);
    }

    #[test]
    fn parse_critic_output_rejects_with_reason() {
        match parse_critic_output("REJECT: missing test coverage") {
            CriticOutcome::Rejected(reason) => assert_eq!(reason, "missing test coverage"),
            _ => panic!("expected rejection"),
        }
    }

    #[test]
    fn parse_plan_extracts_embedded_json() {
        let text = "Here is my plan:\n{\"filesToRead\": [\"a.rs\"], \"filesToModify\": [], \
                     \"filesToCreate\": [], \"steps\": [\"do it\"], \"risks\": [], \
                     \"expectedOutcome\": \"done\"}\nThanks.";
        let plan = parse_plan(text).unwrap();
        assert_eq!(plan.files_to_read, vec!["a.rs".to_string()]);
        assert_eq!(plan.expected_outcome, "done");
    }
}
