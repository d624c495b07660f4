//! Persisted bridge state.
//!
//! Small JSON file holding what must survive a restart: the active session
//! the operator selected, the poll cursor checkpoint, and the enabled flag.
//! Read once at startup; written on every mutation.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// On-disk state shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeState {
    /// Session that receives forwarded free-text prompts.
    #[serde(default)]
    pub active_session: Option<String>,
    /// Id of the last channel update processed, plus one.
    #[serde(default)]
    pub cursor: Option<i64>,
    /// Remote control master switch.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

const fn default_enabled() -> bool {
    true
}

impl Default for BridgeState {
    fn default() -> Self {
        Self {
            active_session: None,
            cursor: None,
            enabled: true,
        }
    }
}

/// Handle to the persisted state with an in-memory cache.
///
/// Clones share the cache; setters persist synchronously to `path`.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
    cache: Arc<RwLock<BridgeState>>,
}

impl StateStore {
    /// Load state from `path`, falling back to defaults when absent.
    pub fn load(path: &Path) -> Result<Self> {
        let state = if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|e| {
                Error::State(format!("Failed to read {}: {}", path.display(), e))
            })?;
            serde_json::from_str(&content).map_err(|e| {
                Error::State(format!("Failed to parse {}: {}", path.display(), e))
            })?
        } else {
            debug!(path = %path.display(), "No state file, starting fresh");
            BridgeState::default()
        };

        Ok(Self {
            path: path.to_path_buf(),
            cache: Arc::new(RwLock::new(state)),
        })
    }

    /// In-memory store for tests; persists to a throwaway path.
    pub fn ephemeral(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            cache: Arc::new(RwLock::new(BridgeState::default())),
        }
    }

    pub async fn active_session(&self) -> Option<String> {
        self.cache.read().await.active_session.clone()
    }

    pub async fn set_active_session(&self, session_id: Option<String>) -> Result<()> {
        let snapshot = {
            let mut state = self.cache.write().await;
            state.active_session = session_id;
            state.clone()
        };
        self.persist(&snapshot)
    }

    pub async fn cursor(&self) -> Option<i64> {
        self.cache.read().await.cursor
    }

    /// Checkpoint the poll cursor. Write failures are logged, not fatal:
    /// losing a checkpoint only means redelivery after a crash.
    pub async fn set_cursor(&self, cursor: i64) {
        let snapshot = {
            let mut state = self.cache.write().await;
            state.cursor = Some(cursor);
            state.clone()
        };
        if let Err(e) = self.persist(&snapshot) {
            warn!(error = %e, "Failed to checkpoint poll cursor");
        }
    }

    pub async fn enabled(&self) -> bool {
        self.cache.read().await.enabled
    }

    pub async fn set_enabled(&self, enabled: bool) -> Result<()> {
        let snapshot = {
            let mut state = self.cache.write().await;
            state.enabled = enabled;
            state.clone()
        };
        self.persist(&snapshot)
    }

    fn persist(&self, state: &BridgeState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::State(format!("Failed to create {}: {}", parent.display(), e)))?;
        }
        let content = serde_json::to_string_pretty(state)?;
        std::fs::write(&self.path, content)
            .map_err(|e| Error::State(format!("Failed to write {}: {}", self.path.display(), e)))?;
        debug!(path = %self.path.display(), "Persisted bridge state");
        Ok(())
    }
}
