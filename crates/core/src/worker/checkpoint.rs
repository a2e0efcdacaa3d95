//! Per-task checkpoint file, written after every state transition so a
//! killed worker can be diagnosed (and, per spec.md §5, never resumed
//! mid-write of a learning store). Grounded on the teacher's
//! `checkpoint.rs`, simplified from its file-snapshot/restore machinery to
//! the flat phase record the worker state machine needs.

use std::io::Write;
use std::path::Path;

use serde::Serialize;
use undercity_provider::Tier;

use crate::persistence::save_atomic;
use crate::types::{now_iso8601, LastVerification, VerificationVerdict, WorkerCheckpoint, WorkerPhase};

fn checkpoint_path(state_dir: &Path, task_id: &str) -> std::path::PathBuf {
    state_dir.join(task_id).join("checkpoint.json")
}

pub fn load(state_dir: &Path, task_id: &str) -> Option<WorkerCheckpoint> {
    let path = checkpoint_path(state_dir, task_id);
    let raw = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&raw).ok()
}

#[derive(Serialize)]
struct MetricsEvent<'a> {
    task_id: &'a str,
    phase: WorkerPhase,
    model: Tier,
    attempts: u32,
    timestamp: String,
}

/// Appends one line to the project-wide telemetry stream so a session can
/// be reconstructed without replaying every task's checkpoint file.
/// Best-effort: a write failure here never fails the task.
fn append_metric(state_dir: &Path, task_id: &str, phase: WorkerPhase, model: Tier, attempts: u32) {
    let event = MetricsEvent { task_id, phase, model, attempts, timestamp: now_iso8601() };
    let Ok(line) = serde_json::to_string(&event) else { return };
    let path = state_dir.join("metrics.jsonl");
    if let Some(parent) = path.parent() {
        if std::fs::create_dir_all(parent).is_err() {
            return;
        }
    }
    match std::fs::OpenOptions::new().create(true).append(true).open(&path) {
        Ok(mut file) => {
            if let Err(err) = writeln!(file, "{line}") {
                tracing::warn!(task_id, error = %err, "failed to append telemetry event");
            }
        }
        Err(err) => tracing::warn!(task_id, error = %err, "failed to open telemetry stream"),
    }
}

pub fn write(state_dir: &Path, task_id: &str, phase: WorkerPhase, model: Tier, attempts: u32, verdict: Option<&VerificationVerdict>) {
    let checkpoint = WorkerCheckpoint {
        phase,
        model,
        attempts,
        saved_at: now_iso8601(),
        last_verification: verdict.map(|v| LastVerification {
            passed: v.passed,
            errors: v.issues.clone(),
        }),
    };
    // Per spec §7, checkpoint write failure is logged and skipped -- the
    // task proceeds regardless.
    if let Err(err) = save_atomic(&checkpoint_path(state_dir, task_id), &checkpoint) {
        tracing::warn!(task_id, phase = ?phase, error = %err, "failed to write checkpoint");
    }
    append_metric(state_dir, task_id, phase, model, attempts);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "t1", WorkerPhase::Executing, Tier::Cheap, 2, None);
        let loaded = load(dir.path(), "t1").unwrap();
        assert_eq!(loaded.phase, WorkerPhase::Executing);
        assert_eq!(loaded.attempts, 2);
    }

    #[test]
    fn missing_checkpoint_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load(dir.path(), "nope").is_none());
    }

    #[test]
    fn write_appends_one_telemetry_line_per_call() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "t1", WorkerPhase::Starting, Tier::Cheap, 0, None);
        write(dir.path(), "t1", WorkerPhase::Executing, Tier::Cheap, 1, None);
        let lines = std::fs::read_to_string(dir.path().join("metrics.jsonl")).unwrap();
        let lines: Vec<&str> = lines.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["task_id"], "t1");
        assert_eq!(first["phase"], "starting");
    }
}
