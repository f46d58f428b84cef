use std::env;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Postgres (single source of truth: state, queue, counters)
    pub database_url: String,

    // Blob store for raw scrape snapshots
    pub blob_dir: std::path::PathBuf,

    // LLM (OpenAI-compatible chat completion endpoint)
    pub llm_api_key: String,
    pub llm_base_url: Option<String>,
    pub llm_model: String,
    pub llm_timeout_ms: u64,

    // Telegram
    pub telegram_bot_token: String,
    pub telegram_channel: String,

    // Security
    pub phone_hash_salt: String,

    // Delivery tuning
    pub channel_posts_per_hour: u32,
    pub diversity_window_hours: i64,
    pub diversity_cap_per_model: i64,

    // Approval gate
    pub score_threshold: f64,
    pub sample_threshold: i64,
    pub confidence_threshold: f64,

    // Alerts
    pub free_alert_delay_min: i64,

    // Worker tuning
    pub worker_fanout: usize,
    pub per_source_concurrency: usize,
    pub stage_deadline_secs: u64,
    pub llm_deadline_secs: u64,
}

impl Config {
    /// Load configuration from environment variables.
    /// Panics with a clear message if required vars are missing.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        Self {
            database_url: required_env("DATABASE_URL"),
            blob_dir: std::path::PathBuf::from(
                env::var("BLOB_DIR").unwrap_or_else(|_| "data/blobs".to_string()),
            ),
            llm_api_key: env::var("LLM_API_KEY").unwrap_or_default(),
            llm_base_url: env::var("LLM_BASE_URL").ok(),
            llm_model: env::var("LLM_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            llm_timeout_ms: parsed_env("LLM_TIMEOUT_MS", 20_000),
            telegram_bot_token: env::var("TELEGRAM_BOT_TOKEN").unwrap_or_default(),
            telegram_channel: env::var("TELEGRAM_CHANNEL").unwrap_or_default(),
            phone_hash_salt: required_env("PHONE_HASH_SALT"),
            channel_posts_per_hour: parsed_env("CHANNEL_POSTS_PER_HOUR", 20),
            diversity_window_hours: parsed_env("DIVERSITY_WINDOW_HOURS", 6),
            diversity_cap_per_model: parsed_env("DIVERSITY_CAP_PER_MODEL", 2),
            score_threshold: parsed_env("SCORE_THRESHOLD", 7.5),
            sample_threshold: parsed_env("SAMPLE_THRESHOLD", 30),
            confidence_threshold: parsed_env("CONFIDENCE_THRESHOLD", 0.6),
            free_alert_delay_min: parsed_env("FREE_ALERT_DELAY_MIN", 30),
            worker_fanout: parsed_env("WORKER_FANOUT", 8),
            per_source_concurrency: parsed_env("PER_SOURCE_CONCURRENCY", 2),
            stage_deadline_secs: parsed_env("STAGE_DEADLINE_SECS", 60),
            llm_deadline_secs: parsed_env("LLM_DEADLINE_SECS", 20),
        }
    }

    /// Log the shape of each sensitive env var for debugging, never the value.
    pub fn log_redacted(&self) {
        let vars = [
            ("DATABASE_URL", &self.database_url),
            ("LLM_API_KEY", &self.llm_api_key),
            ("TELEGRAM_BOT_TOKEN", &self.telegram_bot_token),
            ("PHONE_HASH_SALT", &self.phone_hash_salt),
        ];
        for (name, value) in vars {
            if value.is_empty() {
                tracing::info!("{name} = (empty)");
            } else {
                tracing::info!("{name} = ({} chars)", value.len());
            }
        }
    }

    /// True when the LLM escalation path is configured at all.
    pub fn llm_enabled(&self) -> bool {
        !self.llm_api_key.is_empty()
    }
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}

fn parsed_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
