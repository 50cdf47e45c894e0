use std::env;
use std::path::PathBuf;

pub const DEFAULT_SERVICE_ACCOUNT_PATH: &str = "service-account.json";
pub const DEFAULT_INVITE_EXPIRE_MINUTES: i64 = 10;

/// Error raised while building [`BotConfig`]. Fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required configuration: {}", .0.join(", "))]
    MissingRequired(Vec<String>),
    #[error("invalid value for {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },
}

/// Process configuration, constructed once at startup and passed by
/// reference into the workflow and its collaborators.
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// Telegram Bot API token
    pub bot_token: String,
    /// Chat to invite admitted users into (negative for supergroups)
    pub group_chat_id: i64,
    /// Target Google Sheet identifier
    pub sheet_id: String,
    /// Path to the service account key file (keep out of source control)
    pub service_account_path: PathBuf,
    /// Invite link lifetime in minutes
    pub invite_expire_minutes: i64,
}

impl BotConfig {
    /// Read configuration from the environment. Every missing required
    /// value is collected so the startup error names them all at once.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut missing: Vec<String> = Vec::new();

        let bot_token = require(&mut missing, "BOT_TOKEN");
        let group_chat_id_raw = require(&mut missing, "GROUP_CHAT_ID");
        let sheet_id = require(&mut missing, "SHEET_ID");

        if !missing.is_empty() {
            return Err(ConfigError::MissingRequired(missing));
        }

        let group_chat_id =
            group_chat_id_raw
                .parse::<i64>()
                .map_err(|_| ConfigError::InvalidValue {
                    name: "GROUP_CHAT_ID",
                    value: group_chat_id_raw.clone(),
                })?;

        let service_account_path = env_var_non_empty("GOOGLE_SERVICE_ACCOUNT_JSON")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SERVICE_ACCOUNT_PATH));

        let invite_expire_minutes = match env_var_non_empty("INVITE_EXPIRE_MINUTES") {
            Some(raw) => raw
                .parse::<i64>()
                .ok()
                .filter(|value| *value > 0)
                .ok_or(ConfigError::InvalidValue {
                    name: "INVITE_EXPIRE_MINUTES",
                    value: raw,
                })?,
            None => DEFAULT_INVITE_EXPIRE_MINUTES,
        };

        Ok(Self {
            bot_token,
            group_chat_id,
            sheet_id,
            service_account_path,
            invite_expire_minutes,
        })
    }
}

fn require(missing: &mut Vec<String>, key: &str) -> String {
    match env_var_non_empty(key) {
        Some(value) => value,
        None => {
            missing.push(key.to_string());
            String::new()
        }
    }
}

fn env_var_non_empty(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
