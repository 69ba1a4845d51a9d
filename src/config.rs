//! Process-wide configuration.
//!
//! Loaded once at startup with priority: env var > default. A `.env` file is
//! honored via dotenvy. The core treats the result as read-only; turn flags
//! are resolved once per turn from these values.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Engine invocation settings.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Binary name or path for the Claude Code CLI.
    pub claude_binary: String,
    /// Working directory for sessions that don't override it.
    pub default_working_directory: PathBuf,
    /// Continue the engine's most recent conversation on a fresh session.
    pub continue_most_recent: bool,
    /// Skip all approval prompts inside the engine.
    pub skip_approvals: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            claude_binary: "claude".to_string(),
            default_working_directory: dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")),
            continue_most_recent: false,
            skip_approvals: false,
        }
    }
}

/// Output pacing for one turn.
#[derive(Debug, Clone)]
pub struct TurnConfig {
    /// Quiet period before buffered text is flushed as one event.
    pub debounce: Duration,
    /// Window in which consecutive tool descriptions coalesce into one event.
    pub tool_batch_window: Duration,
    /// Silence interval after which a heartbeat is emitted.
    pub heartbeat_interval: Duration,
    /// Whether heartbeats are emitted at all.
    pub heartbeat_enabled: bool,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(1200),
            tool_batch_window: Duration::from_millis(300),
            heartbeat_interval: Duration::from_secs(120),
            heartbeat_enabled: true,
        }
    }
}

/// Slack delivery settings. Posting is skipped entirely without a token.
#[derive(Debug, Clone, Default)]
pub struct SlackConfig {
    /// Bot token (`xoxb-...`) for chat.postMessage.
    pub bot_token: Option<SecretString>,
    /// Destination channel ID.
    pub channel: Option<String>,
}

/// Top-level configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub agent: AgentConfig,
    pub turn: TurnConfig,
    pub slack: SlackConfig,
    /// Minimum interval between deliveries to one destination.
    pub min_post_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            agent: AgentConfig::default(),
            turn: TurnConfig::default(),
            slack: SlackConfig::default(),
            min_post_interval: Duration::from_secs(1),
        }
    }
}

impl Config {
    /// Load configuration from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let mut config = Self::default();

        if let Some(binary) = optional_env("RELAYCLAW_CLAUDE_BINARY") {
            config.agent.claude_binary = binary;
        }
        if let Some(dir) = optional_env("RELAYCLAW_WORKING_DIR") {
            config.agent.default_working_directory = PathBuf::from(dir);
        }
        config.agent.continue_most_recent =
            parse_bool("RELAYCLAW_CONTINUE_MOST_RECENT", config.agent.continue_most_recent)?;
        config.agent.skip_approvals =
            parse_bool("RELAYCLAW_SKIP_APPROVALS", config.agent.skip_approvals)?;

        if let Some(ms) = parse_u64("RELAYCLAW_DEBOUNCE_MS")? {
            config.turn.debounce = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_u64("RELAYCLAW_TOOL_BATCH_MS")? {
            config.turn.tool_batch_window = Duration::from_millis(ms);
        }
        if let Some(secs) = parse_u64("RELAYCLAW_HEARTBEAT_SECS")? {
            if secs == 0 {
                config.turn.heartbeat_enabled = false;
            } else {
                config.turn.heartbeat_interval = Duration::from_secs(secs);
            }
        }
        if let Some(ms) = parse_u64("RELAYCLAW_MIN_POST_INTERVAL_MS")? {
            config.min_post_interval = Duration::from_millis(ms);
        }

        config.slack.bot_token = optional_env("SLACK_BOT_TOKEN").map(SecretString::from);
        config.slack.channel = optional_env("SLACK_CHANNEL");

        Ok(config)
    }
}

/// Read an env var, treating empty values as unset.
fn optional_env(key: &str) -> Option<String> {
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None,
    }
}

fn parse_bool(key: &str, default: bool) -> Result<bool, ConfigError> {
    match optional_env(key) {
        None => Ok(default),
        Some(v) => match v.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                reason: format!("expected a boolean, got {other:?}"),
            }),
        },
    }
}

fn parse_u64(key: &str) -> Result<Option<u64>, ConfigError> {
    match optional_env(key) {
        None => Ok(None),
        Some(v) => v.trim().parse::<u64>().map(Some).map_err(|e| {
            ConfigError::InvalidValue {
                key: key.to_string(),
                reason: e.to_string(),
            }
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.turn.debounce, Duration::from_millis(1200));
        assert_eq!(config.turn.heartbeat_interval, Duration::from_secs(120));
        assert!(config.turn.heartbeat_enabled);
        assert_eq!(config.min_post_interval, Duration::from_secs(1));
        assert_eq!(config.agent.claude_binary, "claude");
        assert!(!config.agent.continue_most_recent);
        assert!(!config.agent.skip_approvals);
    }

    #[test]
    fn parse_bool_accepts_common_spellings() {
        // Uses process env; pick a key unlikely to collide.
        unsafe { std::env::set_var("RELAYCLAW_TEST_BOOL", "yes") };
        assert!(parse_bool("RELAYCLAW_TEST_BOOL", false).unwrap());
        unsafe { std::env::set_var("RELAYCLAW_TEST_BOOL", "off") };
        assert!(!parse_bool("RELAYCLAW_TEST_BOOL", true).unwrap());
        unsafe { std::env::set_var("RELAYCLAW_TEST_BOOL", "maybe") };
        assert!(parse_bool("RELAYCLAW_TEST_BOOL", false).is_err());
        unsafe { std::env::remove_var("RELAYCLAW_TEST_BOOL") };
    }

    #[test]
    fn parse_bool_defaults_when_unset() {
        assert!(parse_bool("RELAYCLAW_TEST_BOOL_UNSET", true).unwrap());
        assert!(!parse_bool("RELAYCLAW_TEST_BOOL_UNSET", false).unwrap());
    }
}
