use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub telegram: TelegramConfig,
    pub google: GoogleConfig,
    #[serde(default = "default_poll_config")]
    pub poll: PollConfig,
    #[serde(default = "default_storage_config")]
    pub storage: StorageConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    /// Users allowed to issue commands. Empty means everyone.
    #[serde(default)]
    pub allowed_user_ids: Vec<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GoogleConfig {
    /// File holding a bearer token. Re-read on every request so an external
    /// refresher can rotate it without restarting the bot.
    #[serde(default)]
    pub access_token_file: Option<PathBuf>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default = "default_forms_base_url")]
    pub forms_base_url: String,
    #[serde(default = "default_drive_base_url")]
    pub drive_base_url: String,
    #[serde(default = "default_drive_view_base_url")]
    pub drive_view_base_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl GoogleConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PollConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_heartbeat_cron")]
    pub heartbeat_cron: String,
}

impl PollConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub database_path: PathBuf,
    /// Flat JSON array of already-sent response ids from older deployments.
    /// Seeds the delivered set of newly bound forms.
    #[serde(default = "default_legacy_sent_ids_path")]
    pub legacy_sent_ids_path: PathBuf,
}

fn default_forms_base_url() -> String {
    "https://forms.googleapis.com/v1".to_string()
}

fn default_drive_base_url() -> String {
    "https://www.googleapis.com/drive/v3".to_string()
}

fn default_drive_view_base_url() -> String {
    "https://drive.google.com/file/d".to_string()
}

fn default_request_timeout_secs() -> u64 {
    20
}

fn default_interval_secs() -> u64 {
    60
}

fn default_heartbeat_cron() -> String {
    "0 0 * * * *".to_string()
}

fn default_db_path() -> PathBuf {
    PathBuf::from("formbot.db")
}

fn default_legacy_sent_ids_path() -> PathBuf {
    PathBuf::from("response_ids.json")
}

fn default_poll_config() -> PollConfig {
    PollConfig {
        interval_secs: default_interval_secs(),
        heartbeat_cron: default_heartbeat_cron(),
    }
}

fn default_storage_config() -> StorageConfig {
    StorageConfig {
        database_path: default_db_path(),
        legacy_sent_ids_path: default_legacy_sent_ids_path(),
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config = Self::parse(&content)?;
        config.validate()?;
        Ok(config)
    }

    fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config file")
    }

    fn validate(&self) -> Result<()> {
        if self.telegram.bot_token.trim().is_empty() {
            anyhow::bail!("telegram.bot_token must not be empty");
        }
        if self.poll.interval_secs == 0 {
            anyhow::bail!("poll.interval_secs must be greater than zero");
        }
        if self.google.request_timeout_secs == 0 {
            anyhow::bail!("google.request_timeout_secs must be greater than zero");
        }
        if self.google.access_token_file.is_none() && self.google.access_token.is_none() {
            anyhow::bail!("google.access_token_file or google.access_token must be set");
        }
        Ok(())
    }

    /// Whether a Telegram user may issue commands.
    pub fn is_user_allowed(&self, user_id: u64) -> bool {
        self.telegram.allowed_user_ids.is_empty()
            || self.telegram.allowed_user_ids.contains(&user_id)
    }
}
