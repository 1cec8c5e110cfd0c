use serde::Deserialize;
use std::path::PathBuf;

/// Runtime configuration (TOML). The mutable plugin document
/// (subscribers, templates, last run date) lives in the YAML store.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub onebot: OneBotConfig,
    #[serde(default)]
    pub bot: BotConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub like: LikeConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OneBotConfig {
    /// Forward WebSocket endpoint, e.g. "ws://127.0.0.1:3001"
    pub ws_url: String,
    /// Optional HTTP API endpoint, e.g. "http://127.0.0.1:3000"
    #[serde(default)]
    pub http_url: Option<String>,
    /// Supports ${ENV_VAR} substitution
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct BotConfig {
    /// Accounts allowed to run privileged commands
    #[serde(default)]
    pub masters: Vec<i64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
    #[serde(default = "default_watch_interval")]
    pub watch_interval_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScheduleConfig {
    /// Local time of the daily sweep, "HH:MM"
    #[serde(default = "default_daily_at")]
    pub daily_at: String,
    /// Pause between subscribers during the sweep
    #[serde(default = "default_pacing_ms")]
    pub pacing_ms: u64,
    #[serde(default = "default_true")]
    pub catch_up_on_start: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LikeConfig {
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
}

fn default_request_timeout() -> u64 {
    30
}

fn default_store_path() -> PathBuf {
    PathBuf::from("config/config.yaml")
}

fn default_watch_interval() -> u64 {
    2
}

fn default_daily_at() -> String {
    "07:00".to_string()
}

fn default_pacing_ms() -> u64 {
    1000
}

fn default_true() -> bool {
    true
}

fn default_attempts() -> u32 {
    5
}

fn default_batch_size() -> u32 {
    10
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            watch_interval_secs: default_watch_interval(),
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            daily_at: default_daily_at(),
            pacing_ms: default_pacing_ms(),
            catch_up_on_start: true,
        }
    }
}

impl Default for LikeConfig {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            batch_size: default_batch_size(),
        }
    }
}

impl ScheduleConfig {
    /// Parsed `daily_at`
    pub fn fire_time(&self) -> anyhow::Result<chrono::NaiveTime> {
        chrono::NaiveTime::parse_from_str(self.daily_at.trim(), "%H:%M")
            .map_err(|e| anyhow::anyhow!("invalid schedule.daily_at {:?}: {e}", self.daily_at))
    }
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        // Expand environment variables like ${ONEBOT_TOKEN}
        let expanded = shellexpand::env(content)?;
        let config: Config = toml::from_str(&expanded)?;
        config.schedule.fire_time()?;
        if config.like.attempts == 0 || config.like.batch_size == 0 {
            anyhow::bail!("like.attempts and like.batch_size must be positive");
        }
        Ok(config)
    }

    /// Checks if an account may run privileged commands
    pub fn is_master(&self, user_id: i64) -> bool {
        self.bot.masters.contains(&user_id)
    }
}
