//! Configuration resolution for Tether.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (~/.config/tether/settings.json)
//! 3. Environment variables (TETHER_*)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Lower bound on the permission-request timeout.
pub const MIN_PERMISSION_TIMEOUT_SECS: u64 = 10;
/// Upper bound on the permission-request timeout.
pub const MAX_PERMISSION_TIMEOUT_SECS: u64 = 3600;

/// Complete Tether configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub channel: ChannelConfig,
    #[serde(default)]
    pub permissions: PermissionConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
    #[serde(default)]
    pub host: HostConfig,
}

/// Which messaging backend carries the bridge traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    #[default]
    Telegram,
    Slack,
    Discord,
}

impl ChannelKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Telegram => "telegram",
            Self::Slack => "slack",
            Self::Discord => "discord",
        }
    }
}

/// Channel selection plus per-backend settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChannelConfig {
    #[serde(default)]
    pub kind: ChannelKind,
    #[serde(default)]
    pub telegram: TelegramConfig,
}

/// Telegram Bot API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    /// Bot token from @BotFather.
    pub bot_token: Option<String>,
    /// Chat the bridge talks to; traffic from other chats is dropped.
    pub chat_id: Option<i64>,
    /// Long-poll hold time for getUpdates (seconds).
    pub poll_timeout_secs: u64,
    /// API base URL, overridable for tests.
    pub api_base: String,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            chat_id: None,
            poll_timeout_secs: 30,
            api_base: "https://api.telegram.org".to_string(),
        }
    }
}

/// Permission relay configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PermissionConfig {
    /// Seconds to wait for a human decision before giving up.
    pub timeout_secs: u64,
}

impl Default for PermissionConfig {
    fn default() -> Self {
        Self { timeout_secs: 300 }
    }
}

impl PermissionConfig {
    /// Timeout clamped to the supported range.
    pub fn effective_timeout(&self) -> Duration {
        Duration::from_secs(
            self.timeout_secs
                .clamp(MIN_PERMISSION_TIMEOUT_SECS, MAX_PERMISSION_TIMEOUT_SECS),
        )
    }
}

/// Per-kind notification gates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub on_complete: bool,
    pub on_error: bool,
    pub on_idle: bool,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            on_complete: true,
            on_error: true,
            on_idle: false,
        }
    }
}

/// Host process integration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Path to the host CLI binary used for prompting sessions.
    pub claude_bin: PathBuf,
    /// Directory holding session transcripts (one `*.jsonl` per session).
    pub session_dir: Option<PathBuf>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            claude_bin: PathBuf::from("claude"),
            session_dir: None,
        }
    }
}

impl HostConfig {
    /// Session directory, falling back to `~/.claude/sessions`.
    pub fn session_dir(&self) -> Option<PathBuf> {
        self.session_dir.clone().or_else(|| {
            dirs::home_dir().map(|h| h.join(".claude").join("sessions"))
        })
    }
}

impl Config {
    /// Check for fatal misconfiguration before any partial operation.
    pub fn validate(&self) -> Result<()> {
        match self.channel.kind {
            ChannelKind::Telegram => {
                let tg = &self.channel.telegram;
                if tg.bot_token.as_deref().is_none_or(str::is_empty) {
                    return Err(Error::Config(
                        "channel.telegram.bot_token is required when the telegram channel is selected"
                            .to_string(),
                    ));
                }
                if tg.chat_id.is_none() {
                    return Err(Error::Config(
                        "channel.telegram.chat_id is required when the telegram channel is selected"
                            .to_string(),
                    ));
                }
                Ok(())
            }
            kind => Err(Error::Config(format!(
                "channel '{}' is not implemented",
                kind.as_str()
            ))),
        }
    }
}

/// Load configuration with hierarchical resolution.
pub fn load_config(path_override: Option<&Path>) -> Result<Config> {
    let mut config = Config::default();

    let global_path = path_override
        .map(Path::to_path_buf)
        .or_else(global_config_path);
    if let Some(path) = global_path {
        if path.exists() {
            let file = load_config_file(&path)?;
            merge_config(&mut config, file);
        } else if path_override.is_some() {
            return Err(Error::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
    }

    apply_env_overrides(&mut config);

    Ok(config)
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    config_dir().map(|p| p.join("settings.json"))
}

/// Default path for the persisted bridge state file.
pub fn default_state_path() -> Option<PathBuf> {
    config_dir().map(|p| p.join("state.json"))
}

fn config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .ok()
            .map(|h| PathBuf::from(h).join(".tether"))
    }
    #[cfg(target_os = "macos")]
    {
        std::env::var("HOME")
            .ok()
            .map(|h| PathBuf::from(h).join("Library/Application Support/tether"))
    }
    #[cfg(target_os = "linux")]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| std::env::var("HOME").ok().map(|h| PathBuf::from(h).join(".config")))
            .map(|p| p.join("tether"))
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
    {
        None
    }
}

fn load_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

fn merge_config(base: &mut Config, overlay: Config) {
    base.channel.kind = overlay.channel.kind;
    if overlay.channel.telegram.bot_token.is_some() {
        base.channel.telegram.bot_token = overlay.channel.telegram.bot_token;
    }
    if overlay.channel.telegram.chat_id.is_some() {
        base.channel.telegram.chat_id = overlay.channel.telegram.chat_id;
    }
    base.channel.telegram.poll_timeout_secs = overlay.channel.telegram.poll_timeout_secs;
    base.channel.telegram.api_base = overlay.channel.telegram.api_base;

    base.permissions = overlay.permissions;
    base.notifications = overlay.notifications;

    base.host.claude_bin = overlay.host.claude_bin;
    if overlay.host.session_dir.is_some() {
        base.host.session_dir = overlay.host.session_dir;
    }
}

fn apply_env_overrides(config: &mut Config) {
    if let Ok(val) = std::env::var("TETHER_BOT_TOKEN") {
        config.channel.telegram.bot_token = Some(val);
    }
    if let Ok(val) = std::env::var("TETHER_CHAT_ID") {
        if let Ok(n) = val.parse() {
            config.channel.telegram.chat_id = Some(n);
        }
    }
    if let Ok(val) = std::env::var("TETHER_PERMISSION_TIMEOUT_SECS") {
        if let Ok(n) = val.parse() {
            config.permissions.timeout_secs = n;
        }
    }
    if let Ok(val) = std::env::var("TETHER_CLAUDE_BIN") {
        config.host.claude_bin = PathBuf::from(val);
    }
    if let Ok(val) = std::env::var("TETHER_SESSION_DIR") {
        config.host.session_dir = Some(PathBuf::from(val));
    }
}
