//! Routing profile: per-(tier, complexity) thresholds refreshed from
//! recent task outcomes using Wilson score-interval confidence, per
//! spec.md §4.4. Anchors picked per the open question in spec.md §9:
//! `minSamples` interpolates linearly from 5 samples (width anchor) to 20
//! samples (width anchor) as observed sample count goes 3 -> 10.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use undercity_provider::Tier;

use crate::persistence::{load_or_default, save_atomic};
use crate::types::{now_iso8601, ComplexityLevel, Threshold};

const Z_95: f64 = 1.96;

/// Wilson 95% score-interval half-width for `successes` out of `n` trials.
/// Returns a finite, non-negative width for every `n >= 1`; shrinks as `n`
/// grows (spec B4).
pub fn wilson_interval_width(successes: u64, n: u64) -> f64 {
    if n == 0 {
        return 1.0;
    }
    let n = n as f64;
    let p = successes as f64 / n;
    let z2 = Z_95 * Z_95;
    let denom = 1.0 + z2 / n;
    let margin = (Z_95 / denom) * ((p * (1.0 - p) / n) + z2 / (4.0 * n * n)).sqrt();
    2.0 * margin
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingProfile {
    pub version: u32,
    pub updated_at: String,
    pub task_count: u64,
    pub thresholds: HashMap<String, Threshold>,
    pub model_success_rates: HashMap<Tier, f64>,
    pub recommendations: Vec<String>,
}

impl Default for RoutingProfile {
    fn default() -> Self {
        Self {
            version: 1,
            updated_at: now_iso8601(),
            task_count: 0,
            thresholds: HashMap::new(),
            model_success_rates: HashMap::new(),
            recommendations: Vec::new(),
        }
    }
}

pub fn cell_key(tier: Tier, complexity: ComplexityLevel) -> String {
    format!("{tier}:{complexity:?}").to_lowercase()
}

/// One observed (tier, complexity) outcome sample feeding profile refresh.
#[derive(Debug, Clone, Copy)]
pub struct OutcomeSample {
    pub tier: Tier,
    pub complexity: ComplexityLevel,
    pub success: bool,
}

impl RoutingProfile {
    pub fn load(state_dir: &Path) -> Self {
        load_or_default(&state_dir.join("routing-profile.json"))
    }

    pub fn save(&self, state_dir: &Path) -> anyhow::Result<()> {
        save_atomic(&state_dir.join("routing-profile.json"), self)
    }

    pub fn threshold_for(&self, tier: Tier, complexity: ComplexityLevel) -> Threshold {
        self.thresholds
            .get(&cell_key(tier, complexity))
            .cloned()
            .unwrap_or_default()
    }

    /// Recompute thresholds and overall tier success rates deterministically
    /// from `samples` (spec R2: same inputs always produce the same
    /// profile). Only recomputes when `new_task_count - task_count >=
    /// min_new_tasks`; returns `false` if the refresh was skipped.
    pub fn refresh(
        &mut self,
        samples: &[OutcomeSample],
        new_task_count: u64,
        min_new_tasks: u32,
    ) -> bool {
        if new_task_count.saturating_sub(self.task_count) < min_new_tasks as u64 {
            return false;
        }

        let mut cells: HashMap<String, (u64, u64)> = HashMap::new();
        let mut tier_totals: HashMap<Tier, (u64, u64)> = HashMap::new();
        for sample in samples {
            let key = cell_key(sample.tier, sample.complexity);
            let entry = cells.entry(key).or_insert((0, 0));
            entry.0 += 1;
            if sample.success {
                entry.1 += 1;
            }
            let tier_entry = tier_totals.entry(sample.tier).or_insert((0, 0));
            tier_entry.0 += 1;
            if sample.success {
                tier_entry.1 += 1;
            }
        }

        for (key, (n, successes)) in &cells {
            if *n < 3 {
                continue;
            }
            let rate = *successes as f64 / *n as f64;
            let width = wilson_interval_width(*successes, *n);
            let mut threshold = self.thresholds.remove(key).unwrap_or_default();
            let before = threshold.min_success_rate;

            if rate > 0.85 {
                threshold.min_success_rate = (threshold.min_success_rate - width * 0.15).max(0.5);
            } else if rate < 0.55 {
                threshold.min_success_rate = (threshold.min_success_rate + width * 0.15).min(0.9);
            }

            let skip_before = threshold.skip;
            threshold.skip = rate < 0.4 && *n >= 5;

            // minSamples scales linearly from 5 (at n=3) to 20 (at n=10).
            let clamped_n = (*n as f64).clamp(3.0, 10.0);
            threshold.min_samples = (5.0 + (clamped_n - 3.0) * (15.0 / 7.0)).round() as u32;

            if (threshold.min_success_rate - before).abs() > 0.05 {
                tracing::info!(key, before, after = threshold.min_success_rate, "routing threshold shifted");
            }
            if threshold.skip != skip_before {
                tracing::info!(key, skip = threshold.skip, "routing skip flag flipped");
            }

            self.thresholds.insert(key.clone(), threshold);
        }

        self.model_success_rates = tier_totals
            .into_iter()
            .map(|(tier, (n, successes))| (tier, successes as f64 / n as f64))
            .collect();

        self.task_count = new_task_count;
        self.updated_at = now_iso8601();
        self.version += 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wilson_width_shrinks_as_n_grows() {
        let small = wilson_interval_width(5, 10);
        let large = wilson_interval_width(50, 100);
        assert!(large < small);
    }

    #[test]
    fn wilson_width_finite_at_full_success_rate() {
        let width = wilson_interval_width(20, 20);
        assert!(width.is_finite());
        assert!(width > 0.0);
    }

    #[test]
    fn thresholds_stay_in_valid_range_after_refresh() {
        let mut profile = RoutingProfile::default();
        let samples: Vec<OutcomeSample> = (0..6)
            .map(|i| OutcomeSample {
                tier: Tier::Cheap,
                complexity: ComplexityLevel::Trivial,
                success: i % 3 != 0,
            })
            .collect();
        profile.refresh(&samples, 5, 5);
        for t in profile.thresholds.values() {
            assert!(t.min_success_rate >= 0.0 && t.min_success_rate <= 1.0);
        }
    }

    #[test]
    fn refresh_skipped_before_min_new_tasks_reached() {
        let mut profile = RoutingProfile::default();
        let changed = profile.refresh(&[], 3, 5);
        assert!(!changed);
        assert_eq!(profile.task_count, 0);
    }

    #[test]
    fn refresh_is_deterministic_given_same_samples() {
        let samples: Vec<OutcomeSample> = (0..8)
            .map(|i| OutcomeSample {
                tier: Tier::Mid,
                complexity: ComplexityLevel::Standard,
                success: i % 2 == 0,
            })
            .collect();

        let mut a = RoutingProfile::default();
        a.refresh(&samples, 5, 5);
        let mut b = RoutingProfile::default();
        b.refresh(&samples, 5, 5);
        assert_eq!(a.thresholds.len(), b.thresholds.len());
        for (k, v) in &a.thresholds {
            let other = &b.thresholds[k];
            assert_eq!(v.min_success_rate, other.min_success_rate);
            assert_eq!(v.skip, other.skip);
        }
    }

    #[test]
    fn low_success_rate_sets_skip_flag() {
        let mut profile = RoutingProfile::default();
        let samples: Vec<OutcomeSample> = (0..5)
            .map(|_| OutcomeSample {
                tier: Tier::Cheap,
                complexity: ComplexityLevel::Complex,
                success: false,
            })
            .collect();
        profile.refresh(&samples, 5, 5);
        let threshold = profile.threshold_for(Tier::Cheap, ComplexityLevel::Complex);
        assert!(threshold.skip);
    }
}
