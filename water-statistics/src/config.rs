use rust_decimal::Decimal;
use serde::Deserialize;
use std::fs;
use chrono_tz::Tz;

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub uri: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Cookie header of an authenticated session.
    pub session_cookie: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MeterConfig {
    pub meter_id: String,
    #[serde(default = "default_price_per_unit")]
    pub default_price_per_unit: Decimal,
    /// Baseline used for backfills when the source reports no register value.
    #[serde(default)]
    pub baseline_offset: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_trigger_hours")]
    pub trigger_hours: Vec<u8>,
    /// IANA timezone the trigger hours and "today" are evaluated in.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_lag_days")]
    pub lag_days: i64,
    #[serde(default = "default_window_days")]
    pub window_days: i64,
    #[serde(default = "default_backfill_chunk_days")]
    pub backfill_chunk_days: i64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            trigger_hours: default_trigger_hours(),
            timezone: default_timezone(),
            lag_days: default_lag_days(),
            window_days: default_window_days(),
            backfill_chunk_days: default_backfill_chunk_days(),
        }
    }
}

impl ScheduleConfig {
    pub fn timezone(&self) -> anyhow::Result<Tz> {
        self.timezone
            .trim()
            .parse::<Tz>()
            .map_err(|e| anyhow::anyhow!("invalid schedule.timezone '{}': {e}", self.timezone))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SinkConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub bind_addr: String,
    #[serde(default)]
    pub auth_bearer_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub remote_api: RemoteApiConfig,
    pub meter: MeterConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub sink: SinkConfig,
    pub api: ApiConfig,
    pub metrics: Option<MetricsConfig>,
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        use std::env;

        let path = env::var("WATER_STATISTICS_CONFIG").unwrap_or_else(|_| "water-statistics.toml".to_string());
        let contents = fs::read_to_string(&path)?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> anyhow::Result<Self> {
        let cfg: AppConfig = toml::from_str(contents)?;
        cfg.schedule.timezone()?;
        if cfg.schedule.trigger_hours.iter().any(|h| *h > 23) {
            anyhow::bail!("schedule.trigger_hours must be within 0..=23");
        }
        if cfg.schedule.window_days < 1 || cfg.schedule.backfill_chunk_days < 1 || cfg.schedule.lag_days < 0 {
            anyhow::bail!("schedule day counts must be positive");
        }
        Ok(cfg)
    }
}

fn default_timezone() -> String {
    "Europe/London".to_string()
}

fn default_base_url() -> String {
    "https://myaccount.thameswater.co.uk".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_price_per_unit() -> Decimal {
    Decimal::new(27346, 4)
}

fn default_trigger_hours() -> Vec<u8> {
    vec![0, 12]
}

fn default_lag_days() -> i64 {
    3
}

fn default_window_days() -> i64 {
    3
}

fn default_backfill_chunk_days() -> i64 {
    7
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    500
}
