//! External hook script execution
//!
//! Scripts live in `<root>/<state>.d/` and are run in file name order with
//! the daemon's environment plus event specific variables. A failing script
//! is logged and the next one still runs.

use crate::error::ScriptError;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, error, info};

/// Scripts run after the manager state changes
pub const MANAGER_STATE_DIR: &str = "manager.d";

/// Scripts run after a link's routes and rules were (re)installed
pub const ROUTES_MODIFIED_DIR: &str = "routes-modified.d";

/// Directories created at startup
pub const STATE_DIRS: &[&str] = &[
    "no-carrier.d",
    "carrier.d",
    "degraded.d",
    "routable.d",
    "configured.d",
    MANAGER_STATE_DIR,
    ROUTES_MODIFIED_DIR,
];

/// Directory holding the scripts for an operational state
pub fn state_dir(state: &str) -> String {
    format!("{}.d", state)
}

/// Runs the scripts below one root directory
#[derive(Debug, Clone)]
pub struct ScriptRunner {
    root: PathBuf,
}

impl ScriptRunner {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create every state directory that does not exist yet
    pub async fn ensure_state_dirs(&self) -> Result<(), ScriptError> {
        for dir in STATE_DIRS {
            let path = self.root.join(dir);
            tokio::fs::create_dir_all(&path)
                .await
                .map_err(|e| ScriptError::CreateDir {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                })?;
        }

        Ok(())
    }

    /// Whether `dir` holds at least one script
    pub async fn has_scripts(&self, dir: &str) -> bool {
        matches!(self.list_scripts(dir).await, Ok(scripts) if !scripts.is_empty())
    }

    /// Regular files in `dir`, sorted by name
    pub async fn list_scripts(&self, dir: &str) -> Result<Vec<PathBuf>, ScriptError> {
        let path = self.root.join(dir);
        let read_dir_error = |e: std::io::Error| ScriptError::ReadDir {
            path: path.display().to_string(),
            reason: e.to_string(),
        };

        let mut entries = tokio::fs::read_dir(&path).await.map_err(read_dir_error)?;
        let mut scripts = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(read_dir_error)? {
            let file_type = entry.file_type().await.map_err(read_dir_error)?;
            if file_type.is_file() {
                scripts.push(entry.path());
            }
        }

        scripts.sort();
        Ok(scripts)
    }

    /// Run one script and wait for it
    pub async fn run_script(&self, script: &Path, env: &[(String, String)]) -> Result<(), ScriptError> {
        let status = Command::new(script)
            .envs(env.iter().map(|(k, v)| (k, v)))
            .status()
            .await
            .map_err(|e| ScriptError::Spawn {
                path: script.display().to_string(),
                reason: e.to_string(),
            })?;

        if !status.success() {
            return Err(ScriptError::Failed {
                path: script.display().to_string(),
                status: status.to_string(),
            });
        }

        Ok(())
    }

    /// Run every script in `dir`. Returns how many succeeded.
    pub async fn run_scripts(&self, dir: &str, env: &[(String, String)]) -> usize {
        let scripts = match self.list_scripts(dir).await {
            Ok(scripts) => scripts,
            Err(e) => {
                debug!("No scripts to run: {}", e);
                return 0;
            }
        };

        let mut succeeded = 0;
        for script in &scripts {
            debug!("Executing script '{}'", script.display());
            match self.run_script(script, env).await {
                Ok(()) => {
                    debug!("Successfully executed script '{}'", script.display());
                    succeeded += 1;
                }
                Err(e) => error!("{}", e),
            }
        }

        if !scripts.is_empty() {
            info!("Executed {}/{} script(s) in '{}'", succeeded, scripts.len(), dir);
        }
        succeeded
    }
}
