//! Verification Harness (C5): runs the project's own typecheck/test/lint/
//! build/spell/security checks and folds the raw evidence into a
//! [`VerificationVerdict`]. Grounded on the teacher's `verify.rs`
//! (`CheckKind`/`Evidence`/`detect_checks`/`run_check`), generalized to the
//! fuller check taxonomy and category-derived verdict spec.md §4.5 needs.
//! A non-zero exit from a check command is evidence, never an orchestrator
//! error: `run_check` always returns `Evidence`, never `Result`.

use std::path::Path;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use tokio::time::timeout;

use undercity_config::VerifyConfig;

use crate::types::{IssueCategory, VerificationVerdict};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckKind {
    Typecheck,
    Build,
    Test,
    Lint,
    Spell,
    Security,
}

impl std::fmt::Display for CheckKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CheckKind::Typecheck => "typecheck",
            CheckKind::Build => "build",
            CheckKind::Test => "test",
            CheckKind::Lint => "lint",
            CheckKind::Spell => "spell",
            CheckKind::Security => "security",
        };
        write!(f, "{s}")
    }
}

impl CheckKind {
    fn category(self) -> IssueCategory {
        match self {
            CheckKind::Typecheck => IssueCategory::Typecheck,
            CheckKind::Build => IssueCategory::Build,
            CheckKind::Test => IssueCategory::Test,
            CheckKind::Lint => IssueCategory::Lint,
            CheckKind::Spell => IssueCategory::Spell,
            CheckKind::Security => IssueCategory::Security,
        }
    }

    /// Whether a failure of this check can be skipped without counting
    /// toward the serious-vs-trivial escalation split.
    pub fn optional(self) -> bool {
        matches!(self, CheckKind::Spell | CheckKind::Security)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyCheck {
    pub kind: CheckKind,
    pub command: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
    pub kind: CheckKind,
    pub command: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub timestamp: u64,
    pub elapsed_ms: u64,
    pub timed_out: bool,
}

impl Evidence {
    pub fn passed(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }

    pub fn is_fresh(&self, max_age: Duration) -> bool {
        let now = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        now.saturating_sub(self.timestamp) < max_age.as_secs()
    }

    fn combined_output(&self) -> &str {
        if !self.stderr.is_empty() {
            &self.stderr
        } else {
            &self.stdout
        }
    }
}

pub fn detect_checks(project_root: &Path, config: &VerifyConfig) -> Vec<VerifyCheck> {
    let mut checks = vec![];

    if project_root.join("Cargo.toml").exists() {
        if config.run_typecheck {
            checks.push(VerifyCheck { kind: CheckKind::Typecheck, command: "cargo check --all-targets".into() });
        }
        if config.run_build {
            checks.push(VerifyCheck { kind: CheckKind::Build, command: "cargo build".into() });
        }
        if config.run_tests {
            checks.push(VerifyCheck { kind: CheckKind::Test, command: "cargo test".into() });
        }
        if config.run_lint {
            checks.push(VerifyCheck { kind: CheckKind::Lint, command: "cargo clippy -- -D warnings".into() });
        }
    } else if project_root.join("package.json").exists() {
        if config.run_typecheck && project_root.join("tsconfig.json").exists() {
            checks.push(VerifyCheck { kind: CheckKind::Typecheck, command: "npx tsc --noEmit".into() });
        }
        if config.run_build {
            checks.push(VerifyCheck { kind: CheckKind::Build, command: "npm run build".into() });
        }
        if config.run_tests {
            checks.push(VerifyCheck { kind: CheckKind::Test, command: "npm test".into() });
        }
        if config.run_lint && project_root.join("node_modules/.bin/eslint").exists() {
            checks.push(VerifyCheck { kind: CheckKind::Lint, command: "npx eslint .".into() });
        }
    } else if project_root.join("go.mod").exists() {
        if config.run_build {
            checks.push(VerifyCheck { kind: CheckKind::Build, command: "go build ./...".into() });
        }
        if config.run_tests {
            checks.push(VerifyCheck { kind: CheckKind::Test, command: "go test ./...".into() });
        }
        if config.run_lint {
            checks.push(VerifyCheck { kind: CheckKind::Lint, command: "go vet ./...".into() });
        }
    } else if project_root.join("pyproject.toml").exists() || project_root.join("setup.py").exists() {
        if config.run_tests {
            checks.push(VerifyCheck { kind: CheckKind::Test, command: "python -m pytest".into() });
        }
        if config.run_lint {
            checks.push(VerifyCheck { kind: CheckKind::Lint, command: "python -m ruff check .".into() });
        }
    }

    if config.run_spell && !config.skip_optional_checks {
        checks.push(VerifyCheck { kind: CheckKind::Spell, command: "codespell .".into() });
    }
    if config.run_security && !config.skip_optional_checks {
        if project_root.join("Cargo.toml").exists() {
            checks.push(VerifyCheck { kind: CheckKind::Security, command: "cargo audit".into() });
        } else if project_root.join("package.json").exists() {
            checks.push(VerifyCheck { kind: CheckKind::Security, command: "npm audit --audit-level=high".into() });
        }
    }

    checks
}

pub async fn run_check(check: &VerifyCheck, cwd: &Path, check_timeout: Duration) -> Evidence {
    let start = std::time::Instant::now();
    let ts = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();

    let run = tokio::process::Command::new("sh")
        .arg("-c")
        .arg(&check.command)
        .current_dir(cwd)
        .output();

    match timeout(check_timeout, run).await {
        Ok(Ok(output)) => Evidence {
            kind: check.kind,
            command: check.command.clone(),
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            timestamp: ts,
            elapsed_ms: start.elapsed().as_millis() as u64,
            timed_out: false,
        },
        Ok(Err(e)) => Evidence {
            kind: check.kind,
            command: check.command.clone(),
            exit_code: -1,
            stdout: String::new(),
            stderr: format!("failed to execute: {e}"),
            timestamp: ts,
            elapsed_ms: start.elapsed().as_millis() as u64,
            timed_out: false,
        },
        Err(_) => Evidence {
            kind: check.kind,
            command: check.command.clone(),
            exit_code: -1,
            stdout: String::new(),
            stderr: format!("timed out after {}s", check_timeout.as_secs()),
            timestamp: ts,
            elapsed_ms: start.elapsed().as_millis() as u64,
            timed_out: true,
        },
    }
}

pub async fn run_all_checks(checks: &[VerifyCheck], cwd: &Path, config: &VerifyConfig) -> Vec<Evidence> {
    let check_timeout = Duration::from_secs(config.check_timeout_secs);
    let mut evidence = Vec::with_capacity(checks.len());
    for check in checks {
        evidence.push(run_check(check, cwd, check_timeout).await);
    }
    evidence
}

/// Folds raw check evidence into a verdict: non-optional failures make the
/// task fail outright, optional (spell/security) failures only raise a
/// warning, matching spec §4.5's pass/fail/warn split.
pub fn build_verdict(evidence: &[Evidence], files_changed: u32) -> VerificationVerdict {
    let mut issues = Vec::new();
    let mut categories = Vec::new();
    let mut has_warnings = false;
    let mut passed = true;

    for e in evidence {
        if e.passed() {
            continue;
        }
        let snippet = tail(e.combined_output(), 500);
        issues.push(format!("{} ({}) failed: {}", e.kind, e.command, snippet));
        categories.push(e.kind.category());
        if e.kind.optional() {
            has_warnings = true;
        } else {
            passed = false;
        }
    }

    if files_changed == 0 && passed && issues.is_empty() {
        issues.push("no files were changed".to_string());
        categories.push(IssueCategory::NoChanges);
        passed = false;
    }

    let feedback = if issues.is_empty() {
        "all checks passed".to_string()
    } else {
        issues.join("\n")
    };

    VerificationVerdict {
        passed,
        has_warnings,
        files_changed,
        issues,
        feedback,
        categories,
    }
}

fn tail(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        format!("...{}", &s[s.len() - max..])
    }
}

pub fn summarize(evidence: &[Evidence]) -> String {
    let mut lines = Vec::new();
    for e in evidence {
        let icon = if e.passed() { "PASS" } else { "FAIL" };
        lines.push(format!(
            "[{icon}] {} ({}) - {:.1}s",
            e.kind,
            e.command,
            e.elapsed_ms as f64 / 1000.0
        ));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(kind: CheckKind, exit_code: i32) -> Evidence {
        Evidence {
            kind,
            command: "x".into(),
            exit_code,
            stdout: String::new(),
            stderr: "boom".into(),
            timestamp: 0,
            elapsed_ms: 1,
            timed_out: false,
        }
    }

    #[test]
    fn all_passing_checks_yield_passed_verdict() {
        let evidence = vec![ev(CheckKind::Build, 0), ev(CheckKind::Test, 0)];
        let verdict = build_verdict(&evidence, 3);
        assert!(verdict.passed);
        assert!(!verdict.has_warnings);
    }

    #[test]
    fn optional_check_failure_only_warns() {
        let evidence = vec![ev(CheckKind::Build, 0), ev(CheckKind::Spell, 1)];
        let verdict = build_verdict(&evidence, 2);
        assert!(verdict.passed);
        assert!(verdict.has_warnings);
        assert!(verdict.is_trivial_only());
    }

    #[test]
    fn required_check_failure_fails_verdict() {
        let evidence = vec![ev(CheckKind::Test, 1)];
        let verdict = build_verdict(&evidence, 2);
        assert!(!verdict.passed);
        assert!(verdict.is_serious());
    }

    #[test]
    fn zero_files_changed_with_passing_checks_is_a_failure() {
        let evidence = vec![ev(CheckKind::Build, 0)];
        let verdict = build_verdict(&evidence, 0);
        assert!(!verdict.passed);
        assert!(verdict.categories.contains(&IssueCategory::NoChanges));
    }

    #[test]
    fn detect_checks_finds_cargo_project() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Cargo.toml"), "[package]\nname=\"x\"").unwrap();
        let config = VerifyConfig::default();
        let checks = detect_checks(dir.path(), &config);
        assert!(checks.iter().any(|c| c.kind == CheckKind::Test));
    }
}
