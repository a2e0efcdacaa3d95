use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use undercity_provider::Tier;

/// Monotonic task identifier, allocated under a flock'd highwatermark file
/// the same way the teacher allocates team-task ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub String);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A worker's request to escalate, with the specific rule that fired —
/// kept separate from the state machine so the escalation policy is
/// testable on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EscalationReason {
    FileThrash,
    NoChanges,
    FinalTierExhausted,
    TrivialRetriesExhausted,
    SeriousRetriesExhausted,
    Default,
}

/// Whether a conversation resumes or starts fresh, per the executor's
/// session-continuity rule.
#[derive(Debug, Clone, Default)]
pub struct SessionHandle {
    pub conversation_id: Option<String>,
    pub fresh: bool,
}

impl SessionHandle {
    pub fn fresh() -> Self {
        Self {
            conversation_id: None,
            fresh: true,
        }
    }

    pub fn resume(conversation_id: String) -> Self {
        Self {
            conversation_id: Some(conversation_id),
            fresh: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ComplexityLevel {
    Trivial,
    Simple,
    Standard,
    Complex,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Verifying,
    Complete,
    Failed,
    Escalated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskAttemptRecord {
    pub model: Tier,
    pub duration_ms: u64,
    pub success: bool,
    pub error_categories: Vec<String>,
    pub escalated_from: Option<Tier>,
    pub post_mortem_generated: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TokenUsage {
    pub attempts: Vec<u32>,
    pub total: u32,
}

impl TokenUsage {
    pub fn record(&mut self, tokens: u32) {
        self.attempts.push(tokens);
        self.total += tokens;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub objective: String,
    pub status: TaskStatus,
    pub model: Tier,
    pub attempts: u32,
    pub verification: Option<VerificationVerdict>,
    pub commit_sha: Option<String>,
    pub error: Option<String>,
    pub duration_ms: u64,
    pub token_usage: TokenUsage,
    pub unresolved_tickets: Vec<String>,
    pub task_already_complete: bool,
    pub needs_decomposition: Option<Vec<String>>,
}

impl TaskResult {
    pub fn new(objective: String, model: Tier) -> Self {
        Self {
            objective,
            status: TaskStatus::Pending,
            model,
            attempts: 0,
            verification: None,
            commit_sha: None,
            error: None,
            duration_ms: 0,
            token_usage: TokenUsage::default(),
            unresolved_tickets: Vec::new(),
            task_already_complete: false,
            needs_decomposition: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCategory {
    Lint,
    Typecheck,
    Build,
    Test,
    Spell,
    Security,
    NoChanges,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationVerdict {
    pub passed: bool,
    pub has_warnings: bool,
    pub files_changed: u32,
    pub issues: Vec<String>,
    pub feedback: String,
    pub categories: Vec<IssueCategory>,
}

impl VerificationVerdict {
    pub fn is_trivial_only(&self) -> bool {
        !self.categories.is_empty()
            && self
                .categories
                .iter()
                .all(|c| matches!(c, IssueCategory::Lint | IssueCategory::Spell))
    }

    pub fn is_serious(&self) -> bool {
        self.categories.iter().any(|c| {
            matches!(
                c,
                IssueCategory::Typecheck | IssueCategory::Build | IssueCategory::Test
            )
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerPhase {
    Starting,
    Context,
    Executing,
    Verifying,
    Reviewing,
    Committing,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastVerification {
    pub passed: bool,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerCheckpoint {
    pub phase: WorkerPhase,
    pub model: Tier,
    pub attempts: u32,
    pub saved_at: String,
    pub last_verification: Option<LastVerification>,
}

/// Per-tier outcome counters for one keyword pattern in the capability
/// ledger. Invariants I1: `successes <= attempts`, `escalations <= attempts`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TierStats {
    pub attempts: u64,
    pub successes: u64,
    pub escalations: u64,
    pub total_tokens: u64,
    pub total_duration_ms: u64,
    pub total_retries: u64,
}

impl TierStats {
    pub fn success_rate(&self) -> f64 {
        if self.attempts == 0 {
            0.0
        } else {
            self.successes as f64 / self.attempts as f64
        }
    }

    pub fn escalation_rate(&self) -> f64 {
        if self.attempts == 0 {
            0.0
        } else {
            self.escalations as f64 / self.attempts as f64
        }
    }

    pub fn retries_avg(&self) -> f64 {
        if self.attempts == 0 {
            0.0
        } else {
            self.total_retries as f64 / self.attempts as f64
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternStats {
    pub pattern: String,
    pub by_model: HashMap<Tier, TierStats>,
    pub last_seen: String,
}

impl PatternStats {
    pub fn new(pattern: String, last_seen: String) -> Self {
        let mut by_model = HashMap::new();
        for tier in Tier::ALL {
            by_model.insert(tier, TierStats::default());
        }
        Self {
            pattern,
            by_model,
            last_seen,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Threshold {
    pub min_success_rate: f64,
    pub min_samples: u32,
    pub skip: bool,
}

impl Default for Threshold {
    fn default() -> Self {
        Self {
            min_success_rate: 0.6,
            min_samples: 5,
            skip: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPattern {
    pub category: IssueCategory,
    pub message_prefix: String,
    pub fix_files: Vec<Vec<String>>,
    pub occurrences: u64,
    pub last_seen: String,
    pub permanent: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElevatorStatus {
    Pending,
    Rebasing,
    Testing,
    Merging,
    Pushing,
    Complete,
    Conflict,
    TestFailed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElevatorItem {
    pub branch: String,
    pub task_id: TaskId,
    pub agent_id: String,
    pub status: ElevatorStatus,
    pub queued_at: String,
    pub completed_at: Option<String>,
    pub error: Option<String>,
    pub strategy_used: Option<String>,
    pub conflict_files: Vec<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub last_failed_at: Option<String>,
    pub next_retry_after: Option<String>,
    pub original_error: Option<String>,
    pub is_retry: bool,
    pub modified_files: Vec<String>,
}

impl ElevatorItem {
    pub fn new(branch: String, task_id: TaskId, agent_id: String, max_retries: u32) -> Self {
        Self {
            branch,
            task_id,
            agent_id,
            status: ElevatorStatus::Pending,
            queued_at: now_iso8601(),
            completed_at: None,
            error: None,
            strategy_used: None,
            conflict_files: Vec::new(),
            retry_count: 0,
            max_retries,
            last_failed_at: None,
            next_retry_after: None,
            original_error: None,
            is_retry: false,
            modified_files: Vec::new(),
        }
    }

    pub fn retryable(&self) -> bool {
        matches!(self.status, ElevatorStatus::Conflict | ElevatorStatus::TestFailed)
            && self.retry_count < self.max_retries
    }
}

pub fn now_iso8601() -> String {
    chrono::Utc::now().to_rfc3339()
}
