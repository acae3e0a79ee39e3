use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::{flog_debug, Error, Result};

/// Default command used to launch the agent runtime.
pub const DEFAULT_SERVER_COMMAND: &str = "codex app-server";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    pub server_command: Option<String>,
    pub worktree_dir: Option<String>,
    pub skills_dir: Option<String>,
}

impl Config {
    pub fn foreman_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".foreman"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::foreman_dir()?.join("foreman.toml"))
    }

    /// Directory holding per-agent logs and review artifacts.
    pub fn logs_dir() -> Result<PathBuf> {
        Ok(Self::foreman_dir()?.join("logs"))
    }

    pub fn worktrees_dir() -> Result<PathBuf> {
        let config = Self::load()?;
        match config.worktree_dir {
            Some(dir) => Ok(expand_tilde(&dir)),
            None => Ok(Self::foreman_dir()?.join("worktrees")),
        }
    }

    pub fn effective_server_command(&self) -> &str {
        self.server_command.as_deref().unwrap_or(DEFAULT_SERVER_COMMAND)
    }

    /// Skill lookup roots, in resolution order: the working directory's
    /// `skills/` folder, the configured directory, then `~/.foreman/skills`.
    pub fn skill_roots(&self, cwd: Option<&Path>) -> Vec<PathBuf> {
        let mut roots = Vec::new();
        if let Some(cwd) = cwd {
            roots.push(cwd.join("skills"));
        }
        if let Some(dir) = &self.skills_dir {
            roots.push(expand_tilde(dir));
        }
        if let Ok(dir) = Self::foreman_dir() {
            roots.push(dir.join("skills"));
        }
        roots
    }

    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        flog_debug!("Config::load path={}", path.display());
        if !path.exists() {
            flog_debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(&path)?)?;
        flog_debug!(
            "Config loaded: server_command={:?}, worktree_dir={:?}, skills_dir={:?}",
            config.server_command,
            config.worktree_dir,
            config.skills_dir
        );
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let dir = Self::foreman_dir()?;
        if !dir.exists() {
            fs::create_dir_all(&dir)?;
        }
        let path = Self::config_path()?;
        fs::write(&path, toml::to_string_pretty(self)?)?;
        flog_debug!("Config saved to {}", path.display());
        Ok(())
    }

    pub fn ensure_dirs() -> Result<()> {
        let foreman_dir = Self::foreman_dir()?;
        let logs_dir = Self::logs_dir()?;
        let worktrees_dir = Self::worktrees_dir()?;
        for dir in [&foreman_dir, &logs_dir, &worktrees_dir] {
            if !dir.exists() {
                flog_debug!("Creating directory: {}", dir.display());
                fs::create_dir_all(dir)?;
            }
        }
        Ok(())
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
