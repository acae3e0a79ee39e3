//! Worktree isolation: giving an agent its own checkout of the repository so
//! concurrent agents do not corrupt each other's working-directory state.

use std::path::{Path, PathBuf};

use chrono::Utc;
use git2::Repository;

use crate::config::Config;
use crate::{flog_debug, Result};

pub struct Workspace {
    repo_path: PathBuf,
}

impl Workspace {
    pub fn new(repo_path: &Path) -> Result<Self> {
        flog_debug!("Workspace::new path={}", repo_path.display());
        let _ = Repository::discover(repo_path)?;
        Ok(Self {
            repo_path: repo_path.to_path_buf(),
        })
    }

    fn repo(&self) -> Result<Repository> {
        Ok(Repository::discover(&self.repo_path)?)
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    /// Create an isolated checkout for one agent: a fresh branch from HEAD
    /// and a worktree under the configured worktrees directory. Returns the
    /// worktree path to use as the agent's working directory.
    pub fn create_isolated_checkout(&self, agent_label: &str) -> Result<PathBuf> {
        let sanitized = sanitize_name(agent_label);
        let timestamp = Utc::now().timestamp();
        let branch = format!("foreman/{}_{}", sanitized, timestamp);
        let worktree_path = Config::worktrees_dir()?.join(format!("{}_{}", sanitized, timestamp));

        flog_debug!(
            "Workspace::create_isolated_checkout branch={} path={}",
            branch,
            worktree_path.display()
        );

        let repo = self.repo()?;
        let head = repo.head()?;
        let commit = head.peel_to_commit()?;
        let branch_obj = repo.branch(&branch, &commit, false)?;
        let branch_ref = branch_obj.into_reference();
        let mut opts = git2::WorktreeAddOptions::new();
        opts.reference(Some(&branch_ref));
        // Use the folder name as the worktree name (the branch contains a slash).
        let worktree_name = worktree_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&sanitized);
        repo.worktree(worktree_name, &worktree_path, Some(&opts))?;
        Ok(worktree_path)
    }
}

fn sanitize_name(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect();
    let trimmed = sanitized.trim_matches('-').to_string();
    if trimmed.is_empty() {
        "agent".to_string()
    } else {
        trimmed
    }
}
