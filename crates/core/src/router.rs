//! Task Router (C1): picks a starting tier and review policy for an
//! objective. Grounded on the teacher's `routing.rs` keyword-scoring
//! classifier, generalized with the quantitative fallback, routing-profile
//! consultation, and capability-ledger recommendation spec.md §4.1 adds.

use std::path::Path;

use undercity_config::RoutingConfig;
use undercity_provider::Tier;

use crate::learning::profile;
use crate::learning::{CapabilityLedger, RoutingProfile};
use crate::types::ComplexityLevel;

const LOW_KEYWORDS: &[&str] = &[
    "typo", "rename", "format", "lint", "simple", "quick", "trivial", "minor", "comment",
    "readme", "docs", "log", "print",
];

const HIGH_KEYWORDS: &[&str] = &[
    "architect",
    "design",
    "refactor",
    "security",
    "complex",
    "migrate",
    "optimize",
    "performance",
    "debug",
    "investigate",
    "analyze",
    "review",
    "concurrent",
    "parallel",
    "distributed",
    "algorithm",
];

/// Per spec §9's open question, a plain keyword predicate is used for
/// "test-writing task" detection.
const TEST_WRITING_KEYWORDS: &[&str] = &["test", "tests", "spec", "coverage"];

pub fn is_test_writing_task(objective: &str) -> bool {
    let lower = objective.to_lowercase();
    TEST_WRITING_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

/// Quantitative signal about the files an objective targets, used when
/// known instead of the keyword heuristic (spec §4.1 step 1).
#[derive(Debug, Clone, Default)]
pub struct TargetFileMetrics {
    pub total_lines: u32,
    pub function_count: u32,
    pub crosses_packages: bool,
    pub code_health_score: f64,
    pub hotspot_hits: u32,
}

pub fn classify_complexity(
    objective: &str,
    config: &RoutingConfig,
    metrics: Option<&TargetFileMetrics>,
) -> ComplexityLevel {
    if let Some(m) = metrics {
        return classify_from_metrics(m);
    }
    classify_from_keywords(objective, config)
}

fn classify_from_metrics(m: &TargetFileMetrics) -> ComplexityLevel {
    let mut score: i32 = 0;
    if m.total_lines > 500 {
        score += 2;
    } else if m.total_lines > 150 {
        score += 1;
    }
    if m.function_count > 20 {
        score += 2;
    } else if m.function_count > 8 {
        score += 1;
    }
    if m.crosses_packages {
        score += 2;
    }
    if m.code_health_score < 0.5 {
        score += 1;
    }
    if m.hotspot_hits > 3 {
        score += 2;
    }

    match score {
        0 => ComplexityLevel::Trivial,
        1 => ComplexityLevel::Simple,
        2 | 3 => ComplexityLevel::Standard,
        4 | 5 => ComplexityLevel::Complex,
        _ => ComplexityLevel::Critical,
    }
}

fn classify_from_keywords(objective: &str, config: &RoutingConfig) -> ComplexityLevel {
    let lower = objective.to_lowercase();
    let word_count = lower.split_whitespace().count();

    let mut low_score = 0i32;
    let mut high_score = 0i32;

    for kw in LOW_KEYWORDS.iter().copied().chain(config.low_keywords.iter().map(String::as_str)) {
        if lower.contains(kw) {
            low_score += 1;
        }
    }
    for kw in HIGH_KEYWORDS.iter().copied().chain(config.high_keywords.iter().map(String::as_str)) {
        if lower.contains(kw) {
            high_score += 1;
        }
    }

    if word_count > 200 {
        high_score += 2;
    } else if word_count > 80 {
        high_score += 1;
    }

    match high_score - low_score {
        i if i >= 3 => ComplexityLevel::Critical,
        2 => ComplexityLevel::Complex,
        1 => ComplexityLevel::Standard,
        0 => ComplexityLevel::Simple,
        _ => ComplexityLevel::Trivial,
    }
}

fn default_tier_for(complexity: ComplexityLevel) -> Tier {
    match complexity {
        ComplexityLevel::Trivial | ComplexityLevel::Simple => Tier::Cheap,
        ComplexityLevel::Standard | ComplexityLevel::Complex => Tier::Mid,
        ComplexityLevel::Critical => Tier::Strong,
    }
}

#[derive(Debug, Clone)]
pub struct ReviewPolicy {
    pub enable: bool,
    pub annealing: bool,
    pub max_review_tier: Tier,
}

#[derive(Debug, Clone)]
pub struct RoutingDecision {
    pub starting_tier: Tier,
    pub review_policy: ReviewPolicy,
    pub cap_at_tier: Tier,
    pub complexity: ComplexityLevel,
}

pub struct RouterInput<'a> {
    pub objective: &'a str,
    pub config: &'a RoutingConfig,
    pub metrics: Option<&'a TargetFileMetrics>,
    pub max_tier: Tier,
    pub worker_review_enabled: bool,
    pub worker_annealing_enabled: bool,
}

/// Step 4/6 of spec §4.1: missing or corrupt profile/ledger degrade to
/// hard-coded defaults rather than erroring (the router's graceful
/// degradation requirement).
pub fn route(input: RouterInput<'_>, state_dir: &Path, learning: &undercity_config::LearningConfig) -> RoutingDecision {
    let complexity = classify_complexity(input.objective, input.config, input.metrics);
    let mut tier = default_tier_for(complexity);

    if is_test_writing_task(input.objective) && tier == Tier::Cheap {
        tier = Tier::Mid;
    }

    let profile = RoutingProfile::load(state_dir);
    tier = apply_profile(tier, complexity, &profile);

    if tier > input.max_tier {
        tier = input.max_tier;
    }

    let ledger = CapabilityLedger::load(state_dir);
    if let Some((recommended, _ev)) = ledger.recommend(input.objective, learning) {
        if recommended <= input.max_tier {
            tracing::debug!(objective = input.objective, tier = %recommended, "ledger recommendation applied");
            tier = recommended;
        }
    }

    let review_policy = build_review_policy(
        complexity,
        input.max_tier,
        input.worker_review_enabled,
        input.worker_annealing_enabled,
    );

    tracing::debug!(objective = input.objective, complexity = ?complexity, tier = %tier, "routing decision");

    RoutingDecision {
        starting_tier: tier,
        review_policy,
        cap_at_tier: input.max_tier,
        complexity,
    }
}

fn apply_profile(mut tier: Tier, complexity: ComplexityLevel, profile: &RoutingProfile) -> Tier {
    loop {
        let threshold = profile.threshold_for(tier, complexity);
        let observed_rate = profile.model_success_rates.get(&tier).copied().unwrap_or(1.0);
        let low_confidence_fail = observed_rate < threshold.min_success_rate
            && profile.task_count >= threshold.min_samples as u64;
        if (threshold.skip || low_confidence_fail) && tier.next().is_some() {
            tier = tier.next().unwrap();
            continue;
        }
        break;
    }
    tier
}

fn build_review_policy(
    complexity: ComplexityLevel,
    max_tier: Tier,
    enable: bool,
    annealing: bool,
) -> ReviewPolicy {
    match complexity {
        ComplexityLevel::Critical => ReviewPolicy {
            enable,
            annealing: annealing && max_tier == Tier::Strong,
            max_review_tier: max_tier,
        },
        _ => ReviewPolicy {
            enable,
            annealing: false,
            max_review_tier: Tier::Mid.min(max_tier),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trivial_objective_routes_cheap() {
        let config = RoutingConfig::default();
        let dir = tempfile::tempdir().unwrap();
        let learning = undercity_config::LearningConfig::default();
        let decision = route(
            RouterInput {
                objective: "Fix typo in README",
                config: &config,
                metrics: None,
                max_tier: Tier::Strong,
                worker_review_enabled: false,
                worker_annealing_enabled: false,
            },
            dir.path(),
            &learning,
        );
        assert_eq!(decision.starting_tier, Tier::Cheap);
    }

    #[test]
    fn router_never_exceeds_max_tier_cap() {
        let config = RoutingConfig::default();
        let dir = tempfile::tempdir().unwrap();
        let learning = undercity_config::LearningConfig::default();
        let decision = route(
            RouterInput {
                objective: "architect a distributed concurrent migration of the auth system",
                config: &config,
                metrics: None,
                max_tier: Tier::Cheap,
                worker_review_enabled: false,
                worker_annealing_enabled: false,
            },
            dir.path(),
            &learning,
        );
        assert_eq!(decision.starting_tier, Tier::Cheap);
    }

    #[test]
    fn profile_skip_flag_escalates_tier() {
        let config = RoutingConfig::default();
        let dir = tempfile::tempdir().unwrap();
        let learning = undercity_config::LearningConfig::default();
        let mut profile = RoutingProfile::load(dir.path());
        profile.thresholds.insert(
            super::profile_cell_key_for_test(),
            crate::types::Threshold {
                min_success_rate: 0.6,
                min_samples: 3,
                skip: true,
            },
        );
        profile.save(dir.path()).unwrap();

        let decision = route(
            RouterInput {
                objective: "fix typo",
                config: &config,
                metrics: None,
                max_tier: Tier::Strong,
                worker_review_enabled: false,
                worker_annealing_enabled: false,
            },
            dir.path(),
            &learning,
        );
        assert!(decision.starting_tier >= Tier::Mid);
    }

    #[test]
    fn test_writing_objective_never_routes_below_mid() {
        let config = RoutingConfig::default();
        let dir = tempfile::tempdir().unwrap();
        let learning = undercity_config::LearningConfig::default();
        let decision = route(
            RouterInput {
                objective: "add tests for the login module",
                config: &config,
                metrics: None,
                max_tier: Tier::Strong,
                worker_review_enabled: false,
                worker_annealing_enabled: false,
            },
            dir.path(),
            &learning,
        );
        assert!(decision.starting_tier >= Tier::Mid);
    }
}

#[cfg(test)]
fn profile_cell_key_for_test() -> String {
    profile::cell_key(Tier::Cheap, ComplexityLevel::Trivial)
}
