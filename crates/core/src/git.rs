//! Thin git command wrapper: every function invokes `git` via an explicit
//! argv array (never a shell-interpolated string), per spec §6. Mirrors the
//! teacher's `worktree.rs` style of building `std::process::Command` calls
//! and interpreting `status.success()` / stderr directly.

use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GitError {
    #[error("git {args:?} failed: {stderr}")]
    CommandFailed { args: Vec<String>, stderr: String },
    #[error("failed to spawn git: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("rebase conflict: {0}")]
    RebaseConflict(String),
    #[error("merge conflict in files: {0:?}")]
    MergeConflict(Vec<String>),
}

type Result<T> = std::result::Result<T, GitError>;

fn run(cwd: &Path, args: &[&str]) -> Result<std::process::Output> {
    std::process::Command::new("git")
        .args(args)
        .current_dir(cwd)
        .output()
        .map_err(GitError::from)
}

fn run_ok(cwd: &Path, args: &[&str]) -> Result<String> {
    let output = run(cwd, args)?;
    if !output.status.success() {
        return Err(GitError::CommandFailed {
            args: args.iter().map(|s| s.to_string()).collect(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

pub fn status_porcelain(cwd: &Path) -> Result<String> {
    run_ok(cwd, &["status", "--porcelain"])
}

pub fn is_clean(cwd: &Path) -> Result<bool> {
    Ok(status_porcelain(cwd)?.trim().is_empty())
}

pub fn diff_name_only(cwd: &Path, base: Option<&str>) -> Result<Vec<String>> {
    let out = match base {
        Some(base) => run_ok(cwd, &["diff", "--name-only", base])?,
        None => run_ok(cwd, &["diff", "--name-only"])?,
    };
    Ok(out.lines().map(str::to_string).filter(|l| !l.is_empty()).collect())
}

pub fn ls_files_others(cwd: &Path) -> Result<Vec<String>> {
    let out = run_ok(cwd, &["ls-files", "--others", "--exclude-standard"])?;
    Ok(out.lines().map(str::to_string).filter(|l| !l.is_empty()).collect())
}

pub fn checkout(cwd: &Path, branch: &str) -> Result<()> {
    run_ok(cwd, &["checkout", branch]).map(|_| ())
}

pub fn checkout_new(cwd: &Path, branch: &str) -> Result<()> {
    run_ok(cwd, &["checkout", "-b", branch]).map(|_| ())
}

pub fn add_update(cwd: &Path) -> Result<()> {
    run_ok(cwd, &["add", "-u"]).map(|_| ())
}

pub fn add_paths(cwd: &Path, paths: &[String]) -> Result<()> {
    if paths.is_empty() {
        return Ok(());
    }
    let mut args: Vec<&str> = vec!["add"];
    args.extend(paths.iter().map(|s| s.as_str()));
    run_ok(cwd, &args).map(|_| ())
}

pub fn commit(cwd: &Path, message: &str) -> Result<String> {
    run_ok(cwd, &["commit", "--no-verify", "-m", message])?;
    run_ok(cwd, &["rev-parse", "HEAD"]).map(|s| s.trim().to_string())
}

pub fn rev_parse_head(cwd: &Path) -> Result<String> {
    run_ok(cwd, &["rev-parse", "HEAD"]).map(|s| s.trim().to_string())
}

/// Plain merge first; caller is responsible for deciding fallback strategy
/// when this fails (spec's cascading merge-strategy in the elevator).
pub fn merge(cwd: &Path, branch: &str, favor_ours: bool) -> Result<()> {
    let mut args = vec!["merge", "--no-ff", branch];
    if favor_ours {
        args.insert(1, "-X");
        args.insert(2, "ours");
    }
    run_ok(cwd, &args).map(|_| ())
}

pub fn merge_abort(cwd: &Path) -> Result<()> {
    let _ = run(cwd, &["merge", "--abort"]);
    Ok(())
}

pub fn rebase(cwd: &Path, onto: &str) -> Result<()> {
    match run_ok(cwd, &["rebase", onto]) {
        Ok(_) => Ok(()),
        Err(e) => {
            rebase_abort(cwd)?;
            Err(GitError::RebaseConflict(e.to_string()))
        }
    }
}

pub fn rebase_abort(cwd: &Path) -> Result<()> {
    let _ = run(cwd, &["rebase", "--abort"]);
    Ok(())
}

pub fn branch_delete(cwd: &Path, branch: &str, force: bool) -> Result<()> {
    let flag = if force { "-D" } else { "-d" };
    let _ = run(cwd, &["branch", flag, branch]);
    Ok(())
}

pub fn worktree_add(project_root: &Path, path: &Path, branch: &str) -> Result<()> {
    run_ok(
        project_root,
        &["worktree", "add", "-b", branch, &path.to_string_lossy()],
    )
    .map(|_| ())
}

pub fn worktree_remove(project_root: &Path, path: &Path, force: bool) -> Result<()> {
    let path_str = path.to_string_lossy().to_string();
    let mut args = vec!["worktree", "remove"];
    if force {
        args.push("--force");
    }
    args.push(&path_str);
    run_ok(project_root, &args).map(|_| ())
}

pub fn worktree_list_porcelain(project_root: &Path) -> Result<Vec<(PathBuf, String)>> {
    let out = run_ok(project_root, &["worktree", "list", "--porcelain"])?;
    let mut result = Vec::new();
    let mut current_path: Option<PathBuf> = None;
    for line in out.lines() {
        if let Some(rest) = line.strip_prefix("worktree ") {
            current_path = Some(PathBuf::from(rest));
        } else if let Some(rest) = line.strip_prefix("branch refs/heads/") {
            if let Some(path) = current_path.take() {
                result.push((path, rest.to_string()));
            }
        }
    }
    Ok(result)
}

pub fn push(cwd: &Path, remote: &str, branch: &str) -> Result<()> {
    run_ok(cwd, &["push", remote, branch]).map(|_| ())
}

pub fn log_oneline(cwd: &Path, count: u32) -> Result<Vec<String>> {
    let n = count.to_string();
    let out = run_ok(cwd, &["log", "--oneline", "-n", &n])?;
    Ok(out.lines().map(str::to_string).collect())
}

/// Revert unstaged changes and remove untracked files — the "clean working
/// tree" step after a failed attempt (spec §4.2.5).
pub fn clean_working_tree(cwd: &Path) -> Result<()> {
    run_ok(cwd, &["checkout", "--", "."]).ok();
    run_ok(cwd, &["clean", "-fd"]).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_repo(dir: &Path) {
        run_ok(dir, &["init", "-q"]).unwrap();
        run_ok(dir, &["config", "user.email", "test@example.com"]).unwrap();
        run_ok(dir, &["config", "user.name", "Test"]).unwrap();
    }

    #[test]
    fn status_porcelain_empty_on_fresh_repo() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        std::fs::write(dir.path().join("a.txt"), "hi").unwrap();
        add_paths(dir.path(), &["a.txt".to_string()]).unwrap();
        commit(dir.path(), "init").unwrap();
        assert!(is_clean(dir.path()).unwrap());
    }

    #[test]
    fn commit_returns_sha_and_dirties_then_cleans() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        std::fs::write(dir.path().join("a.txt"), "hi").unwrap();
        add_paths(dir.path(), &["a.txt".to_string()]).unwrap();
        let sha = commit(dir.path(), "init").unwrap();
        assert_eq!(sha.len(), 40);
        std::fs::write(dir.path().join("a.txt"), "changed").unwrap();
        assert!(!is_clean(dir.path()).unwrap());
        clean_working_tree(dir.path()).unwrap();
        assert!(is_clean(dir.path()).unwrap());
    }

    #[test]
    fn diff_name_only_lists_changed_paths() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        std::fs::write(dir.path().join("a.txt"), "hi").unwrap();
        add_paths(dir.path(), &["a.txt".to_string()]).unwrap();
        commit(dir.path(), "init").unwrap();
        std::fs::write(dir.path().join("a.txt"), "changed").unwrap();
        let changed = diff_name_only(dir.path(), None).unwrap();
        assert_eq!(changed, vec!["a.txt".to_string()]);
    }
}
