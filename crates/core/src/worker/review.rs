//! Escalating review (§4.2.3): after verification passes, an optional
//! reviewer pass runs inside "verifying", escalating tiers up to
//! `maxReviewTier` until convergence or its pass budget is spent.

use undercity_provider::{ChatRequest, Message, MessageContent, Provider, Role, Tier};

pub struct ReviewTicket {
    pub description: String,
}

pub struct ReviewOutcome {
    pub converged: bool,
    pub unresolved: Vec<String>,
}

fn passes_budget(tier: Tier, max_review_passes_per_tier: u32, max_strong_review_passes: u32) -> u32 {
    match tier {
        Tier::Strong => max_strong_review_passes,
        _ => max_review_passes_per_tier,
    }
}

fn build_review_prompt(objective: &str, diff_summary: &str) -> String {
    format!(
        "Review the following change for the objective \"{objective}\":\n\n{diff_summary}\n\n\
         List any unresolved issues, one per line prefixed with `ISSUE:`. \
         If there are none, reply with CONVERGED."
    )
}

fn parse_review_response(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|l| l.trim().strip_prefix("ISSUE:"))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Runs the escalating review loop. `annealing` performs a single extra
/// multi-angle advisory pass at the strongest tier rather than blocking on
/// convergence.
pub async fn run_review(
    provider: &dyn Provider,
    objective: &str,
    diff_summary: &str,
    starting_tier: Tier,
    max_review_tier: Tier,
    max_review_passes_per_tier: u32,
    max_strong_review_passes: u32,
    annealing: bool,
) -> anyhow::Result<ReviewOutcome> {
    let mut tier = starting_tier;
    loop {
        let budget = passes_budget(tier, max_review_passes_per_tier, max_strong_review_passes);
        let mut issues = Vec::new();
        for _pass in 0..budget {
            let model = provider
                .model_for_tier(tier)
                .map(|m| m.id.clone())
                .unwrap_or_default();
            let request = ChatRequest {
                model,
                messages: vec![Message {
                    role: Role::User,
                    content: MessageContent::Text(build_review_prompt(objective, diff_summary)),
                }],
                tools: Vec::new(),
                max_tokens: None,
                temperature: None,
                system: Some("You are a terse code reviewer.".to_string()),
                stream: false,
                conversation_id: None,
            };
            let response = provider.chat(&request).await?;
            issues = parse_review_response(response.message.content.as_text());
            if issues.is_empty() {
                return Ok(ReviewOutcome { converged: true, unresolved: Vec::new() });
            }
        }

        if tier == max_review_tier {
            if annealing && tier == Tier::Strong {
                // Advisory-only pass: surface findings without blocking.
                return Ok(ReviewOutcome { converged: true, unresolved: issues });
            }
            return Ok(ReviewOutcome { converged: false, unresolved: issues });
        }
        tier = tier.next().unwrap_or(tier);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_review_response_extracts_issue_lines() {
        let text = "Looks mostly fine.\nISSUE: missing null check\nISSUE: rename variable\n";
        let issues = parse_review_response(text);
        assert_eq!(issues, vec!["missing null check", "rename variable"]);
    }

    #[test]
    fn converged_response_yields_no_issues() {
        assert!(parse_review_response("CONVERGED").is_empty());
    }
}
