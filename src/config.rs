//! Configuration types.

use chrono::FixedOffset;

use crate::error::ConfigError;

/// Bot configuration.
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// Telegram Bot API token.
    pub bot_token: String,
    /// Path to the local database file.
    pub db_path: String,
    /// Civil time zone used for user-entered schedule times and date reporting.
    pub reporting_zone: FixedOffset,
    /// Long-poll timeout passed to getUpdates, in seconds.
    pub poll_timeout_secs: u64,
    /// Telegram ids granted the super-operator role at startup.
    pub super_operators: Vec<i64>,
}

impl BotConfig {
    /// Build configuration from environment variables.
    ///
    /// `BOT_TOKEN` is required; everything else has a default.
    pub fn from_env() -> Result<Self, ConfigError> {
        let bot_token = std::env::var("BOT_TOKEN")
            .map_err(|_| ConfigError::MissingEnvVar("BOT_TOKEN".to_string()))?;

        let db_path =
            std::env::var("LEADBOT_DB_PATH").unwrap_or_else(|_| "./data/leadbot.db".to_string());

        let offset_hours: i32 = match std::env::var("LEADBOT_TZ_OFFSET_HOURS") {
            Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
                key: "LEADBOT_TZ_OFFSET_HOURS".to_string(),
                message: format!("expected a whole number of hours, got {raw:?}"),
            })?,
            Err(_) => 3, // UTC+3, the deployment's reporting zone
        };
        let reporting_zone =
            FixedOffset::east_opt(offset_hours * 3600).ok_or_else(|| ConfigError::InvalidValue {
                key: "LEADBOT_TZ_OFFSET_HOURS".to_string(),
                message: format!("{offset_hours} is out of range"),
            })?;

        let poll_timeout_secs = std::env::var("LEADBOT_POLL_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(30);

        let super_operators = match std::env::var("LEADBOT_SUPER_OPERATORS") {
            Ok(raw) => parse_id_list(&raw).ok_or_else(|| ConfigError::InvalidValue {
                key: "LEADBOT_SUPER_OPERATORS".to_string(),
                message: format!("expected comma-separated Telegram ids, got {raw:?}"),
            })?,
            Err(_) => Vec::new(),
        };

        Ok(Self {
            bot_token,
            db_path,
            reporting_zone,
            poll_timeout_secs,
            super_operators,
        })
    }
}

/// Parse a comma-separated id list, tolerating whitespace and empty entries.
fn parse_id_list(raw: &str) -> Option<Vec<i64>> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| part.parse().ok())
        .collect()
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            db_path: ":memory:".to_string(),
            reporting_zone: FixedOffset::east_opt(3 * 3600).unwrap(),
            poll_timeout_secs: 30,
            super_operators: Vec::new(),
        }
    }
}
