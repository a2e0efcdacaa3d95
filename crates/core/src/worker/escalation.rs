//! Escalation policy (§4.2.4): after a failed attempt, decide between
//! retry-same-tier, escalate, or force-fail. The six rules are applied in
//! order and the first match wins.

use undercity_config::WorkerConfig;
use undercity_provider::Tier;

use crate::types::{EscalationReason, VerificationVerdict};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationDecision {
    RetrySameTier,
    Escalate(EscalationReason),
    ForceFail(EscalationReason),
}

pub struct EscalationInput<'a> {
    pub verdict: Option<&'a VerificationVerdict>,
    pub file_thrash: bool,
    pub zero_files_changed: bool,
    pub same_tier_retries: u32,
    pub current_tier: Tier,
    pub max_tier: Tier,
    pub is_test_writing_task: bool,
    pub config: &'a WorkerConfig,
}

pub fn decide(input: &EscalationInput<'_>) -> EscalationDecision {
    // Rule 1: file thrash always force-fails, no exceptions.
    if input.file_thrash {
        return EscalationDecision::ForceFail(EscalationReason::FileThrash);
    }

    // Rule 2: zero files changed never escalates -- the next tier does no
    // better on "no changes" failures.
    if input.zero_files_changed {
        if input.same_tier_retries < 2 {
            return EscalationDecision::RetrySameTier;
        }
        return EscalationDecision::ForceFail(EscalationReason::NoChanges);
    }

    // Rule 3: at the final reachable tier, retry locally until exhausted.
    if input.current_tier == input.max_tier {
        if input.same_tier_retries < input.config.max_strong_retries {
            return EscalationDecision::RetrySameTier;
        }
        return EscalationDecision::ForceFail(EscalationReason::FinalTierExhausted);
    }

    let is_trivial_only = input.verdict.map(|v| v.is_trivial_only()).unwrap_or(false);
    let is_serious = input.verdict.map(|v| v.is_serious()).unwrap_or(false);

    // Rule 4: lint/spell-only failures get the normal retry budget before
    // escalating.
    if is_trivial_only {
        if input.same_tier_retries < input.config.max_retries_per_tier {
            return EscalationDecision::RetrySameTier;
        }
        return EscalationDecision::Escalate(EscalationReason::TrivialRetriesExhausted);
    }

    // Rule 5: serious (typecheck/build/test) failures get a slightly
    // tighter budget, except test-writing tasks with test failures, which
    // get one extra retry since test development is iterative.
    if is_serious {
        let budget = if input.is_test_writing_task {
            input.config.max_retries_per_tier + 1
        } else {
            input.config.max_retries_per_tier.saturating_sub(1).max(2)
        };
        if input.same_tier_retries < budget {
            return EscalationDecision::RetrySameTier;
        }
        return EscalationDecision::Escalate(EscalationReason::SeriousRetriesExhausted);
    }

    // Rule 6: default budget.
    if input.same_tier_retries < input.config.max_retries_per_tier {
        EscalationDecision::RetrySameTier
    } else {
        EscalationDecision::Escalate(EscalationReason::Default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> WorkerConfig {
        WorkerConfig {
            max_attempts: 7,
            max_retries_per_tier: 3,
            max_strong_retries: 7,
            max_writes_per_file: 6,
            turn_cap_cheap: 10,
            turn_cap_mid: 15,
            turn_cap_strong: 25,
            enable_planning: false,
            enable_review: false,
            max_review_passes_per_tier: 2,
            max_strong_review_passes: 6,
            annealing: false,
            state_dir: ".undercity".to_string(),
        }
    }

    fn verdict(categories: Vec<crate::types::IssueCategory>) -> VerificationVerdict {
        VerificationVerdict {
            passed: false,
            has_warnings: false,
            files_changed: 1,
            issues: vec!["x".into()],
            feedback: "x".into(),
            categories,
        }
    }

    #[test]
    fn file_thrash_force_fails_regardless_of_retries_remaining() {
        let config = config();
        let input = EscalationInput {
            verdict: None,
            file_thrash: true,
            zero_files_changed: false,
            same_tier_retries: 0,
            current_tier: Tier::Cheap,
            max_tier: Tier::Strong,
            is_test_writing_task: false,
            config: &config,
        };
        assert_eq!(decide(&input), EscalationDecision::ForceFail(EscalationReason::FileThrash));
    }

    #[test]
    fn zero_changes_never_escalates() {
        let config = config();
        let input = EscalationInput {
            verdict: None,
            file_thrash: false,
            zero_files_changed: true,
            same_tier_retries: 2,
            current_tier: Tier::Cheap,
            max_tier: Tier::Strong,
            is_test_writing_task: false,
            config: &config,
        };
        assert_eq!(decide(&input), EscalationDecision::ForceFail(EscalationReason::NoChanges));
    }

    #[test]
    fn trivial_only_escalates_after_budget() {
        let config = config();
        let v = verdict(vec![crate::types::IssueCategory::Lint]);
        let input = EscalationInput {
            verdict: Some(&v),
            file_thrash: false,
            zero_files_changed: false,
            same_tier_retries: 3,
            current_tier: Tier::Cheap,
            max_tier: Tier::Strong,
            is_test_writing_task: false,
            config: &config,
        };
        assert_eq!(
            decide(&input),
            EscalationDecision::Escalate(EscalationReason::TrivialRetriesExhausted)
        );
    }

    #[test]
    fn test_writing_task_gets_extra_retry_on_test_failure() {
        let config = config();
        let v = verdict(vec![crate::types::IssueCategory::Test]);
        let input = EscalationInput {
            verdict: Some(&v),
            file_thrash: false,
            zero_files_changed: false,
            same_tier_retries: 3,
            current_tier: Tier::Cheap,
            max_tier: Tier::Strong,
            is_test_writing_task: true,
            config: &config,
        };
        assert_eq!(decide(&input), EscalationDecision::RetrySameTier);
    }

    #[test]
    fn final_tier_never_escalates_only_retries_or_force_fails() {
        let config = config();
        let input = EscalationInput {
            verdict: None,
            file_thrash: false,
            zero_files_changed: false,
            same_tier_retries: 7,
            current_tier: Tier::Strong,
            max_tier: Tier::Strong,
            is_test_writing_task: false,
            config: &config,
        };
        assert_eq!(
            decide(&input),
            EscalationDecision::ForceFail(EscalationReason::FinalTierExhausted)
        );
    }
}
