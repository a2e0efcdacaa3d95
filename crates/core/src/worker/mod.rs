//! Task Worker (C2): the state machine that drives one task from
//! objective to commit or principled failure. States:
//! `starting -> context -> executing -> verifying -> (reviewing)? ->
//! committing -> done`, with failure edges to `retrying`, `escalating`,
//! and `failed`. Every transition writes a checkpoint (§4.2.1).

pub mod checkpoint;
pub mod context;
pub mod escalation;
pub mod executor;
pub mod fastpath;
pub mod planning;
pub mod review;
pub mod sentinels;

use std::path::{Path, PathBuf};
use std::time::Instant;

use thiserror::Error;
use undercity_config::{LearningConfig, VerifyConfig, WorkerConfig};
use undercity_provider::{ChatRequest, Message, MessageContent, Provider, Role, Tier};

use crate::git;
use crate::learning::errors::{RecordPermanentFailure, RecordSuccessfulFix};
use crate::learning::ledger::{extract_keywords, AttemptOutcome as LedgerAttemptOutcome};
use crate::learning::{CapabilityLedger, CoModIndex, ErrorPatternStore, KnowledgeStore};
use crate::router::is_test_writing_task;
use crate::types::{IssueCategory, TaskId, TaskResult, TaskStatus, WorkerPhase};
use crate::verify;
use executor::{run_attempt, AttemptInput, AttemptOutcome, TaskKind};
use planning::CriticOutcome;
use sentinels::Sentinel;

/// Surfaced error taxonomy (§7).
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("INVALID_TARGET: {0}")]
    InvalidTarget(String),
    #[error("NEEDS_DECOMPOSITION: {0:?}")]
    NeedsDecomposition(Vec<String>),
    #[error("PLAN_REJECTED: {0}")]
    PlanRejected(String),
    #[error("VAGUE_TASK")]
    VagueTask,
    #[error("NO_CHANGES")]
    NoChanges,
    #[error("VERIFICATION_FAILED: {0}")]
    VerificationFailed(String),
}

pub struct WorkerInput<'a> {
    pub task_id: TaskId,
    pub objective: String,
    pub project_root: PathBuf,
    pub state_dir: PathBuf,
    pub provider: &'a dyn Provider,
    pub starting_tier: Tier,
    pub max_tier: Tier,
    pub worker_config: &'a WorkerConfig,
    pub verify_config: &'a VerifyConfig,
    pub learning_config: &'a LearningConfig,
    pub task_kind: TaskKind,
    pub max_review_tier: Tier,
    pub review_enabled: bool,
    pub annealing: bool,
}

/// The four on-disk learning stores a task interacts with, loaded once at
/// the top of `run_task` and mutated in place as the task progresses.
struct Stores {
    knowledge: KnowledgeStore,
    errors: ErrorPatternStore,
    comod: CoModIndex,
    ledger: CapabilityLedger,
}

impl Stores {
    fn load(state_dir: &Path) -> Self {
        Self {
            knowledge: KnowledgeStore::load(state_dir),
            errors: ErrorPatternStore::load(state_dir),
            comod: CoModIndex::load(state_dir),
            ledger: CapabilityLedger::load(state_dir),
        }
    }

    fn save_all(&self, state_dir: &Path) {
        if let Err(e) = self.knowledge.save(state_dir) {
            tracing::warn!(error = %e, "failed to save knowledge store");
        }
        if let Err(e) = self.errors.save(state_dir) {
            tracing::warn!(error = %e, "failed to save error pattern store");
        }
        if let Err(e) = self.comod.save(state_dir) {
            tracing::warn!(error = %e, "failed to save co-modification index");
        }
        if let Err(e) = self.ledger.save(state_dir) {
            tracing::warn!(error = %e, "failed to save capability ledger");
        }
    }
}

struct TaskState {
    tier: Tier,
    attempts: u32,
    same_tier_retries: u32,
    session_conversation_id: Option<String>,
    post_mortem: Option<String>,
    auto_remediation_tried: bool,
    injected_knowledge_ids: Vec<u64>,
}

pub async fn run_task(input: WorkerInput<'_>) -> TaskResult {
    let start = Instant::now();
    let task_id = input.task_id.0.clone();
    let mut result = TaskResult::new(input.objective.clone(), input.starting_tier);

    checkpoint::write(&input.state_dir, &task_id, WorkerPhase::Starting, input.starting_tier, 0, None);

    if input.worker_config.max_attempts == 0 {
        result.status = TaskStatus::Failed;
        result.error = Some("max_attempts is zero, no attempt made".to_string());
        result.duration_ms = start.elapsed().as_millis() as u64;
        return result;
    }

    checkpoint::write(&input.state_dir, &task_id, WorkerPhase::Context, input.starting_tier, 0, None);

    let mut stores = Stores::load(&input.state_dir);

    let preflight = context::preflight(&input.objective, &input.project_root);
    if let Some(reason) = preflight.invalid_target {
        return finalize_failure(&input, &mut result, start, TaskError::InvalidTarget(reason), &mut stores, Vec::new());
    }

    // Fast path (§4.2.1 step 3): mechanical objectives skip the LLM entirely.
    if let Some(m) = fastpath::detect(&input.objective, &input.project_root).await {
        if fastpath::apply(&m, &input.project_root).await.unwrap_or(false) {
            let checks = verify::detect_checks(&input.project_root, input.verify_config);
            let evidence = verify::run_all_checks(&checks, &input.project_root, input.verify_config).await;
            let changed = git::diff_name_only(&input.project_root, None).unwrap_or_default();
            let verdict = verify::build_verdict(&evidence, changed.len() as u32);
            if verdict.passed {
                let sha = commit_changes(&input.project_root, &input.objective, &task_id, Tier::Cheap).ok();
                result.status = TaskStatus::Complete;
                result.attempts = 0;
                result.verification = Some(verdict);
                result.commit_sha = sha;
                result.duration_ms = start.elapsed().as_millis() as u64;
                record_success(&input, &mut stores, &changed, "", Tier::Cheap, false, &[], 0, result.duration_ms, 0);
                return result;
            }
            let _ = git::clean_working_tree(&input.project_root);
        }
    }

    let is_test_writing = is_test_writing_task(&input.objective);

    let mut plan = None;
    if input.worker_config.enable_planning {
        match run_planning_phase(&input, &stores, &preflight.recent_commit_hint).await {
            Ok(PlanPhaseOutcome::Proceed(p)) => plan = Some(p),
            Ok(PlanPhaseOutcome::AlreadyComplete) => {
                let checks = verify::detect_checks(&input.project_root, input.verify_config);
                let evidence = verify::run_all_checks(&checks, &input.project_root, input.verify_config).await;
                let changed = git::diff_name_only(&input.project_root, None).unwrap_or_default();
                // Zero changes is the expected signal here, not the
                // "no changes were made" failure build_verdict's
                // files_changed==0 rule flags -- judge the check evidence
                // on its own terms.
                if changed.is_empty() {
                    let verdict = verify::build_verdict(&evidence, 1);
                    if verdict.passed {
                        result.status = TaskStatus::Complete;
                        result.task_already_complete = true;
                        result.verification = Some(verdict);
                        result.duration_ms = start.elapsed().as_millis() as u64;
                        record_success(&input, &mut stores, &changed, "", input.starting_tier, false, &[], 0, result.duration_ms, 0);
                        return result;
                    }
                }
            }
            Err(TaskError::PlanRejected(reason)) => {
                return finalize_failure(&input, &mut result, start, TaskError::PlanRejected(reason), &mut stores, Vec::new());
            }
            Err(_) | Ok(_) => {}
        }
    }

    let mut state = TaskState {
        tier: input.starting_tier,
        attempts: 0,
        same_tier_retries: 0,
        session_conversation_id: None,
        post_mortem: None,
        auto_remediation_tried: false,
        injected_knowledge_ids: Vec::new(),
    };

    loop {
        if state.attempts >= input.worker_config.max_attempts {
            return finalize_failure(
                &input,
                &mut result,
                start,
                TaskError::VerificationFailed("max attempts exhausted".to_string()),
                &mut stores,
                Vec::new(),
            );
        }
        state.attempts += 1;
        result.attempts = state.attempts;
        checkpoint::write(&input.state_dir, &task_id, WorkerPhase::Executing, state.tier, state.attempts, None);

        let model = input
            .provider
            .model_for_tier(state.tier)
            .map(|m| m.id.clone())
            .unwrap_or_default();

        let relevant = stores.knowledge.top_relevant(&input.objective, 5);
        state.injected_knowledge_ids = relevant.iter().map(|e| e.id).collect();

        let briefing = context::build_briefing(
            &context::BriefingInputs {
                objective: &input.objective,
                project_root: &input.project_root,
                target_files: &[],
                plan: plan.as_ref(),
                post_mortem: state.post_mortem.as_deref(),
                preflight_hint: preflight.recent_commit_hint.as_deref(),
            },
            &stores.knowledge,
            &stores.errors,
            &stores.comod,
        );

        let session = match &state.session_conversation_id {
            Some(id) => crate::types::SessionHandle::resume(id.clone()),
            None => crate::types::SessionHandle::fresh(),
        };

        let attempt = run_attempt(&AttemptInput {
            provider: input.provider,
            model: &model,
            system_prompt: "You are an autonomous coding task worker.",
            briefing: &briefing,
            session: &session,
            tier: state.tier,
            task_kind: input.task_kind,
            project_root: &input.project_root,
            worker_config: input.worker_config,
        })
        .await;

        let attempt = match attempt {
            Ok(a) => a,
            Err(e) => {
                tracing::warn!(task_id = %task_id, error = %e, "attempt invocation failed");
                state.same_tier_retries += 1;
                continue;
            }
        };
        state.session_conversation_id = attempt.conversation_id.clone();
        result.token_usage.record(attempt.tokens_used);

        match attempt.outcome {
            AttemptOutcome::Sentinel(Sentinel::InvalidTarget(reason)) => {
                return finalize_failure(
                    &input,
                    &mut result,
                    start,
                    TaskError::InvalidTarget(reason),
                    &mut stores,
                    attempt.touched_files,
                );
            }
            AttemptOutcome::Sentinel(Sentinel::NeedsDecomposition(reason)) => {
                result.status = TaskStatus::Failed;
                result.needs_decomposition = Some(vec![reason]);
                result.duration_ms = start.elapsed().as_millis() as u64;
                let _ = git::clean_working_tree(&input.project_root);
                return result;
            }
            AttemptOutcome::VagueTask => {
                return finalize_failure(&input, &mut result, start, TaskError::VagueTask, &mut stores, attempt.touched_files);
            }
            AttemptOutcome::Sentinel(Sentinel::AlreadyComplete(_)) | AttemptOutcome::ReadyToVerify { .. } => {
                checkpoint::write(&input.state_dir, &task_id, WorkerPhase::Verifying, state.tier, state.attempts, None);
                let checks = verify::detect_checks(&input.project_root, input.verify_config);
                let evidence = verify::run_all_checks(&checks, &input.project_root, input.verify_config).await;
                let changed = git::diff_name_only(&input.project_root, None).unwrap_or_default();
                let untracked = git::ls_files_others(&input.project_root).unwrap_or_default();
                let files_changed = (changed.len() + untracked.len()) as u32;
                let claimed_complete = matches!(attempt.outcome, AttemptOutcome::Sentinel(Sentinel::AlreadyComplete(_)));

                // As in the planning phase's already-complete check: zero
                // changes is the expected signal here, so judge the check
                // evidence on its own terms rather than through
                // build_verdict's files_changed==0 failure rule.
                if claimed_complete && files_changed == 0 {
                    let verdict = verify::build_verdict(&evidence, 1);
                    if verdict.passed {
                        result.status = TaskStatus::Complete;
                        result.task_already_complete = true;
                        result.verification = Some(verdict);
                        result.duration_ms = start.elapsed().as_millis() as u64;
                        record_success(
                            &input,
                            &mut stores,
                            &changed,
                            &attempt.transcript,
                            state.tier,
                            state.tier != input.starting_tier,
                            &state.injected_knowledge_ids,
                            result.token_usage.total as u64,
                            result.duration_ms,
                            state.same_tier_retries as u64,
                        );
                        return result;
                    }
                }

                let verdict = verify::build_verdict(&evidence, files_changed);

                if verdict.passed {
                    checkpoint::write(&input.state_dir, &task_id, WorkerPhase::Reviewing, state.tier, state.attempts, Some(&verdict));
                    if input.review_enabled {
                        let diff_summary = changed.join(", ");
                        let review = review::run_review(
                            input.provider,
                            &input.objective,
                            &diff_summary,
                            state.tier,
                            input.max_review_tier,
                            input.worker_config.max_review_passes_per_tier,
                            input.worker_config.max_strong_review_passes,
                            input.annealing,
                        )
                        .await;
                        if let Ok(outcome) = review {
                            if !outcome.converged {
                                result.unresolved_tickets = outcome.unresolved;
                            }
                        }
                    }
                    checkpoint::write(&input.state_dir, &task_id, WorkerPhase::Committing, state.tier, state.attempts, Some(&verdict));
                    let sha = commit_changes(&input.project_root, &input.objective, &task_id, state.tier).ok();
                    result.status = TaskStatus::Complete;
                    result.verification = Some(verdict);
                    result.commit_sha = sha;
                    result.duration_ms = start.elapsed().as_millis() as u64;
                    record_success(
                        &input,
                        &mut stores,
                        &changed,
                        &attempt.transcript,
                        state.tier,
                        state.tier != input.starting_tier,
                        &state.injected_knowledge_ids,
                        result.token_usage.total as u64,
                        result.duration_ms,
                        state.same_tier_retries as u64,
                    );
                    return result;
                }

                // Verification failed: try auto-remediation once, else
                // record pending error and decide escalation.
                let primary_category = verdict.categories.first().copied().unwrap_or(IssueCategory::Unknown);
                if !state.auto_remediation_tried {
                    state.auto_remediation_tried = true;
                    let remediation = stores.errors.try_auto_remediate(primary_category, &verdict.feedback);
                    if remediation.applied {
                        continue;
                    }
                }

                stores.errors.record_pending_error(&task_id, primary_category, &verdict.feedback, changed.clone());
                for id in &state.injected_knowledge_ids {
                    stores.knowledge.mark_outcome(*id, false);
                }

                let decision = escalation::decide(&escalation::EscalationInput {
                    verdict: Some(&verdict),
                    file_thrash: attempt.file_thrash,
                    zero_files_changed: files_changed == 0,
                    same_tier_retries: state.same_tier_retries,
                    current_tier: state.tier,
                    max_tier: input.max_tier,
                    is_test_writing_task: is_test_writing,
                    config: input.worker_config,
                });

                match decision {
                    escalation::EscalationDecision::RetrySameTier => {
                        state.same_tier_retries += 1;
                        continue;
                    }
                    escalation::EscalationDecision::ForceFail(reason) => {
                        let err = match reason {
                            crate::types::EscalationReason::FileThrash => TaskError::VerificationFailed("file write cap exceeded".to_string()),
                            crate::types::EscalationReason::NoChanges => TaskError::NoChanges,
                            _ => TaskError::VerificationFailed(verdict.feedback.clone()),
                        };
                        return finalize_failure(&input, &mut result, start, err, &mut stores, changed);
                    }
                    escalation::EscalationDecision::Escalate(_) => {
                        state.post_mortem = request_post_mortem(input.provider, &input.objective, &verdict.feedback).await;
                        state.tier = state.tier.next().unwrap_or(state.tier);
                        state.same_tier_retries = 0;
                        state.session_conversation_id = None;
                        result.model = state.tier;
                        continue;
                    }
                }
            }
        }
    }
}

enum PlanPhaseOutcome {
    Proceed(planning::Plan),
    AlreadyComplete,
}

async fn run_planning_phase(
    input: &WorkerInput<'_>,
    stores: &Stores,
    hint: &Option<String>,
) -> Result<PlanPhaseOutcome, TaskError> {
    let briefing = context::build_briefing(
        &context::BriefingInputs {
            objective: &input.objective,
            project_root: &input.project_root,
            target_files: &[],
            plan: None,
            post_mortem: None,
            preflight_hint: hint.as_deref(),
        },
        &stores.knowledge,
        &stores.errors,
        &stores.comod,
    );

    let cheap_model = input.provider.model_for_tier(Tier::Cheap).map(|m| m.id.clone()).unwrap_or_default();
    let planner_prompt = planning::build_planner_prompt(&input.objective, &briefing);
    let planner_request = ChatRequest {
        model: cheap_model,
        messages: vec![Message { role: Role::User, content: MessageContent::Text(planner_prompt) }],
        tools: Vec::new(),
        max_tokens: None,
        temperature: None,
        system: Some("You are a planning agent.".to_string()),
        stream: false,
        conversation_id: None,
    };
    let planner_response = input
        .provider
        .chat(&planner_request)
        .await
        .map_err(|e| TaskError::PlanRejected(e.to_string()))?;
    let plan = planning::parse_plan(planner_response.message.content.as_text())
        .ok_or_else(|| TaskError::PlanRejected("planner produced no parseable plan".to_string()))?;

    let mid_model = input.provider.model_for_tier(Tier::Mid).map(|m| m.id.clone()).unwrap_or_default();
    let critic_prompt = planning::build_critic_prompt(&input.objective, &plan);
    let critic_request = ChatRequest {
        model: mid_model,
        messages: vec![Message { role: Role::User, content: MessageContent::Text(critic_prompt) }],
        tools: Vec::new(),
        max_tokens: None,
        temperature: None,
        system: Some("You are a plan critic.".to_string()),
        stream: false,
        conversation_id: None,
    };
    let critic_response = input
        .provider
        .chat(&critic_request)
        .await
        .map_err(|e| TaskError::PlanRejected(e.to_string()))?;

    match planning::parse_critic_output(critic_response.message.content.as_text()) {
        CriticOutcome::Rejected(reason) => Err(TaskError::PlanRejected(reason)),
        CriticOutcome::Approved => {
            if plan.already_complete.as_ref().is_some_and(|a| a.likely) {
                Ok(PlanPhaseOutcome::AlreadyComplete)
            } else {
                Ok(PlanPhaseOutcome::Proceed(plan))
            }
        }
    }
}

async fn request_post_mortem(provider: &dyn Provider, objective: &str, feedback: &str) -> Option<String> {
    let model = provider.model_for_tier(Tier::Cheap).map(|m| m.id.clone()).unwrap_or_default();
    let prompt = format!(
        "Your attempt at \"{objective}\" failed verification:\n{feedback}\n\n\
         In two or three sentences: what did you try, why did it fail, what should the next attempt try instead?"
    );
    let request = ChatRequest {
        model,
        messages: vec![Message { role: Role::User, content: MessageContent::Text(prompt) }],
        tools: Vec::new(),
        max_tokens: None,
        temperature: None,
        system: None,
        stream: false,
        conversation_id: None,
    };
    provider.chat(&request).await.ok().map(|r| r.message.content.as_text().to_string())
}

fn commit_changes(project_root: &Path, objective: &str, task_id: &str, tier: Tier) -> anyhow::Result<String> {
    git::add_update(project_root)?;
    let untracked = git::ls_files_others(project_root)?;
    git::add_paths(project_root, &untracked)?;
    if git::is_clean(project_root)? {
        return Ok(git::rev_parse_head(project_root)?);
    }
    let message = commit_message(objective, task_id, tier);
    Ok(git::commit(project_root, &message)?)
}

/// Builds the commit message per §4.2.6: a 72-column summary line derived
/// from the objective, followed by task/model trailers.
fn commit_message(objective: &str, task_id: &str, tier: Tier) -> String {
    format!("{}\n\nUndercity-Task: {task_id}\nUndercity-Model: {tier}", short_commit_message(objective))
}

fn short_commit_message(objective: &str) -> String {
    let trimmed = objective.trim();
    if trimmed.len() > 72 {
        format!("{}...", &trimmed[..69])
    } else {
        trimmed.to_string()
    }
}

fn record_success(
    input: &WorkerInput<'_>,
    stores: &mut Stores,
    changed_files: &[String],
    transcript: &str,
    tier: Tier,
    escalated: bool,
    injected_knowledge_ids: &[u64],
    tokens: u64,
    duration_ms: u64,
    retries: u64,
) {
    stores.ledger.record(
        &input.objective,
        LedgerAttemptOutcome { tier, success: true, escalated, tokens, duration_ms, retries },
    );

    if !changed_files.is_empty() {
        stores.errors.record_successful_fix(RecordSuccessfulFix {
            task_id: &input.task_id.0,
            files_changed: changed_files.to_vec(),
        });
        stores.comod.record_commit(changed_files);
    }

    for id in injected_knowledge_ids {
        stores.knowledge.mark_outcome(*id, true);
    }
    if !transcript.is_empty() {
        let objective_keywords = extract_keywords(&input.objective);
        stores.knowledge.extract_from_transcript(transcript, &objective_keywords);
    }

    stores.save_all(&input.state_dir);
}

fn finalize_failure(
    input: &WorkerInput<'_>,
    result: &mut TaskResult,
    start: Instant,
    err: TaskError,
    stores: &mut Stores,
    last_attempt_files: Vec<String>,
) -> TaskResult {
    stores.ledger.record(
        &input.objective,
        LedgerAttemptOutcome {
            tier: result.model,
            success: false,
            escalated: false,
            tokens: result.token_usage.total as u64,
            duration_ms: 0,
            retries: result.attempts as u64,
        },
    );

    let category = match &err {
        TaskError::NoChanges => IssueCategory::NoChanges,
        _ => IssueCategory::Unknown,
    };
    stores.errors.record_permanent_failure(RecordPermanentFailure {
        signature: crate::learning::errors::signature(category, &err.to_string()),
        category,
        message: &err.to_string(),
        fix_files: last_attempt_files,
    });

    stores.save_all(&input.state_dir);

    let _ = git::clean_working_tree(&input.project_root);

    result.status = TaskStatus::Failed;
    result.error = Some(err.to_string());
    result.duration_ms = start.elapsed().as_millis() as u64;
    if let TaskError::NeedsDecomposition(subtasks) = err {
        result.needs_decomposition = Some(subtasks);
    }
    result.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures::stream::BoxStream;
    use undercity_provider::{ChatResponse, ModelInfo, StreamEvent};

    struct PanicProvider;

    #[async_trait]
    impl Provider for PanicProvider {
        fn name(&self) -> &str {
            "panic"
        }

        fn supported_models(&self) -> &[ModelInfo] {
            &[]
        }

        async fn chat(&self, _request: &ChatRequest) -> anyhow::Result<ChatResponse> {
            panic!("B3: max_attempts=0 must never invoke the provider");
        }

        async fn chat_stream(&self, _request: &ChatRequest) -> anyhow::Result<BoxStream<'static, anyhow::Result<StreamEvent>>> {
            panic!("B3: max_attempts=0 must never invoke the provider");
        }
    }

    fn worker_config(max_attempts: u32) -> WorkerConfig {
        WorkerConfig {
            max_attempts,
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

    fn learning_config() -> LearningConfig {
        LearningConfig { min_samples_for_recommendation: 3, min_success_rate_for_recommendation: 0.60 }
    }

    fn init_repo(dir: &Path) {
        for args in [
            vec!["init", "-q"],
            vec!["config", "user.email", "t@example.com"],
            vec!["config", "user.name", "T"],
        ] {
            std::process::Command::new("git").args(&args).current_dir(dir).output().unwrap();
        }
        std::fs::write(dir.join("README.md"), "hello\n").unwrap();
        std::process::Command::new("git").args(["add", "."]).current_dir(dir).output().unwrap();
        std::process::Command::new("git").args(["commit", "-q", "-m", "init"]).current_dir(dir).output().unwrap();
    }

    #[tokio::test]
    async fn max_attempts_zero_fails_without_an_llm_call() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        let state_dir = dir.path().join(".undercity");
        let provider = PanicProvider;
        let config = worker_config(0);
        let verify_config = VerifyConfig::default();
        let learning = learning_config();

        let result = run_task(WorkerInput {
            task_id: TaskId("t1".into()),
            objective: "fix the thing".into(),
            project_root: dir.path().to_path_buf(),
            state_dir,
            provider: &provider,
            starting_tier: Tier::Cheap,
            max_tier: Tier::Strong,
            worker_config: &config,
            verify_config: &verify_config,
            learning_config: &learning,
            task_kind: TaskKind::Implementation,
            max_review_tier: Tier::Strong,
            review_enabled: false,
            annealing: false,
        })
        .await;

        assert_eq!(result.status, TaskStatus::Failed);
        assert_eq!(result.attempts, 0);
    }

    #[test]
    fn finalize_failure_leaves_the_working_tree_clean() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        std::fs::write(dir.path().join("scratch.txt"), "dirty\n").unwrap();
        assert!(!git::is_clean(dir.path()).unwrap());

        let state_dir = dir.path().join(".undercity");
        let worker_config = worker_config(7);
        let verify_config = VerifyConfig::default();
        let learning = learning_config();
        let input = WorkerInput {
            task_id: TaskId("t1".into()),
            objective: "fix the thing".into(),
            project_root: dir.path().to_path_buf(),
            state_dir: state_dir.clone(),
            provider: &PanicProvider,
            starting_tier: Tier::Cheap,
            max_tier: Tier::Strong,
            worker_config: &worker_config,
            verify_config: &verify_config,
            learning_config: &learning,
            task_kind: TaskKind::Implementation,
            max_review_tier: Tier::Strong,
            review_enabled: false,
            annealing: false,
        };
        let mut stores = Stores::load(&state_dir);
        let mut result = TaskResult::new(input.objective.clone(), input.starting_tier);

        finalize_failure(&input, &mut result, Instant::now(), TaskError::VagueTask, &mut stores, Vec::new());

        assert!(git::is_clean(dir.path()).unwrap());
    }

    #[test]
    fn short_commit_message_truncates_to_72_columns() {
        let long = "a".repeat(100);
        assert!(short_commit_message(&long).len() <= 72);
    }

    #[test]
    fn commit_message_carries_task_and_tier_trailers() {
        let msg = commit_message("fix the bug", "task-7", Tier::Mid);
        assert!(msg.contains("Undercity-Task: task-7"));
        assert!(msg.contains("Undercity-Model: mid"));
    }

    struct ScriptedProvider {
        calls: std::sync::atomic::AtomicUsize,
        responses: Vec<&'static str>,
    }

    impl ScriptedProvider {
        fn new(responses: Vec<&'static str>) -> Self {
            Self { calls: std::sync::atomic::AtomicUsize::new(0), responses }
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        fn supported_models(&self) -> &[ModelInfo] {
            &[]
        }

        async fn chat(&self, _request: &ChatRequest) -> anyhow::Result<ChatResponse> {
            let i = self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            let text = self.responses.get(i).copied().unwrap_or("APPROVE").to_string();
            Ok(ChatResponse {
                message: Message { role: Role::Assistant, content: MessageContent::Text(text) },
                usage: undercity_provider::Usage::default(),
                finish_reason: None,
                conversation_id: None,
                turns: 1,
            })
        }

        async fn chat_stream(&self, _request: &ChatRequest) -> anyhow::Result<BoxStream<'static, anyhow::Result<StreamEvent>>> {
            panic!("planning pass never needs the streaming path");
        }
    }

    /// S3: a planner that claims the objective is already satisfied, with
    /// an approving critic and a clean tree, completes without a commit.
    #[tokio::test]
    async fn planner_already_complete_short_circuits_without_a_commit() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        let state_dir = dir.path().join(".undercity");

        let planner_json = r#"{"filesToRead": [], "filesToModify": [], "filesToCreate": [],
            "steps": [], "risks": [], "expectedOutcome": "",
            "alreadyComplete": {"likely": true, "why": "validator already present"},
            "needsDecomposition": {"needed": false, "suggestedSubtasks": []}}"#;
        let provider = ScriptedProvider::new(vec![planner_json, "APPROVE"]);

        let mut config = worker_config(7);
        config.enable_planning = true;
        let verify_config = VerifyConfig::default();
        let learning = learning_config();
        let head_before = git::rev_parse_head(dir.path()).unwrap();

        let result = run_task(WorkerInput {
            task_id: TaskId("t1".into()),
            objective: "Add email validation to validator.ts".into(),
            project_root: dir.path().to_path_buf(),
            state_dir,
            provider: &provider,
            starting_tier: Tier::Cheap,
            max_tier: Tier::Strong,
            worker_config: &config,
            verify_config: &verify_config,
            learning_config: &learning,
            task_kind: TaskKind::Implementation,
            max_review_tier: Tier::Strong,
            review_enabled: false,
            annealing: false,
        })
        .await;

        assert_eq!(result.status, TaskStatus::Complete);
        assert!(result.task_already_complete);
        assert!(result.commit_sha.is_none());
        assert_eq!(git::rev_parse_head(dir.path()).unwrap(), head_before);
    }
}
