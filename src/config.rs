use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, str::FromStr, time::Duration};

use crate::{audio::session::SessionLimits, sources::RetryPolicy};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub application_id: u64,
    pub guild_id: Option<u64>, // Para comandos de desarrollo

    // Sesiones
    pub default_volume: f32,
    pub max_queue_size: usize,
    pub max_history_size: usize,

    // Dashboard
    pub dashboard_enabled: bool,
    pub sync_interval_secs: u64,
    pub snapshot_drift_secs: u64,
    pub observer_buffer: usize,

    // Binarios externos
    pub ytdlp_path: PathBuf,
    pub ffmpeg_path: PathBuf,
    pub cookies_path: Option<PathBuf>,

    // Resolución y pipeline
    pub resolve_attempts: u32,
    pub resolve_timeout_secs: u64,
    pub resolve_backoff_min_ms: u64,
    pub resolve_backoff_max_ms: u64,
    pub pipeline_start_attempts: u32,

    // Paths
    pub data_dir: PathBuf,
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(val) if !val.trim().is_empty() => Ok(val.trim().parse()?),
        _ => Ok(default),
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        let config = Self {
            // Discord
            discord_token: std::env::var("DISCORD_TOKEN")?,
            application_id: std::env::var("APPLICATION_ID")?.parse()?,
            guild_id: std::env::var("GUILD_ID").ok().and_then(|s| s.parse().ok()),

            default_volume: env_or("DEFAULT_VOLUME", defaults.default_volume)?,
            max_queue_size: env_or("MAX_QUEUE_SIZE", defaults.max_queue_size)?,
            max_history_size: env_or("MAX_HISTORY_SIZE", defaults.max_history_size)?,

            dashboard_enabled: env_or("DASHBOARD_ENABLED", defaults.dashboard_enabled)?,
            sync_interval_secs: env_or("SYNC_INTERVAL_SECS", defaults.sync_interval_secs)?,
            snapshot_drift_secs: env_or("SNAPSHOT_DRIFT_SECS", defaults.snapshot_drift_secs)?,
            observer_buffer: env_or("OBSERVER_BUFFER", defaults.observer_buffer)?,

            ytdlp_path: env_or("YTDLP_PATH", defaults.ytdlp_path)?,
            ffmpeg_path: env_or("FFMPEG_PATH", defaults.ffmpeg_path)?,
            cookies_path: std::env::var("COOKIES_PATH")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),

            resolve_attempts: env_or("RESOLVE_ATTEMPTS", defaults.resolve_attempts)?,
            resolve_timeout_secs: env_or("RESOLVE_TIMEOUT_SECS", defaults.resolve_timeout_secs)?,
            resolve_backoff_min_ms: env_or("RESOLVE_BACKOFF_MIN_MS", defaults.resolve_backoff_min_ms)?,
            resolve_backoff_max_ms: env_or("RESOLVE_BACKOFF_MAX_MS", defaults.resolve_backoff_max_ms)?,
            pipeline_start_attempts: env_or("PIPELINE_START_ATTEMPTS", defaults.pipeline_start_attempts)?,

            data_dir: env_or("DATA_DIR", defaults.data_dir)?,
        };

        // Validate configuration before returning
        config.validate()?;

        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - Volume must be between 0.0 and 2.0
    /// - Queue and history capacities must be > 0
    /// - Sync interval and resolve attempts must be > 0
    /// - Backoff minimum cannot exceed the maximum
    /// - Pipeline start attempts must be 1 or 2 (at most one retry)
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=2.0).contains(&self.default_volume) {
            anyhow::bail!("Default volume must be between 0.0 and 2.0, got: {}", self.default_volume);
        }

        if self.max_queue_size == 0 {
            anyhow::bail!("Max queue size must be greater than 0");
        }

        if self.max_history_size == 0 {
            anyhow::bail!("Max history size must be greater than 0");
        }

        if self.sync_interval_secs == 0 {
            anyhow::bail!("Sync interval must be greater than 0");
        }

        if self.resolve_attempts == 0 {
            anyhow::bail!("Resolve attempts must be greater than 0");
        }

        if self.resolve_backoff_min_ms > self.resolve_backoff_max_ms {
            anyhow::bail!(
                "Resolve backoff min ({}ms) exceeds max ({}ms)",
                self.resolve_backoff_min_ms,
                self.resolve_backoff_max_ms
            );
        }

        if !(1..=2).contains(&self.pipeline_start_attempts) {
            anyhow::bail!(
                "Pipeline start attempts must be 1 or 2, got: {}",
                self.pipeline_start_attempts
            );
        }

        Ok(())
    }

    pub fn session_limits(&self) -> SessionLimits {
        SessionLimits {
            queue_capacity: self.max_queue_size,
            history_capacity: self.max_history_size,
            default_volume: self.default_volume,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.resolve_attempts,
            attempt_timeout: Duration::from_secs(self.resolve_timeout_secs),
            backoff_min: Duration::from_millis(self.resolve_backoff_min_ms),
            backoff_max: Duration::from_millis(self.resolve_backoff_max_ms),
        }
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// Excludes the Discord token.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Discord: App ID {} (Guild: {})\n  \
            Sessions: {}% vol, {} queue, {} history\n  \
            Dashboard: enabled={}, sync {}s, drift {}s, buffer {}\n  \
            Resolver: {} attempts, {}s timeout, {}-{}ms backoff, cookies={}\n  \
            Data: {}",
            self.application_id,
            self.guild_id.map_or("global".to_string(), |id| id.to_string()),
            (self.default_volume * 100.0) as u32,
            self.max_queue_size,
            self.max_history_size,
            self.dashboard_enabled,
            self.sync_interval_secs,
            self.snapshot_drift_secs,
            self.observer_buffer,
            self.resolve_attempts,
            self.resolve_timeout_secs,
            self.resolve_backoff_min_ms,
            self.resolve_backoff_max_ms,
            self.cookies_path.is_some(),
            self.data_dir.display()
        )
    }
}

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Discord (no defaults - must be provided)
            discord_token: String::new(),
            application_id: 0,
            guild_id: None,

            default_volume: 1.0,
            max_queue_size: 100,
            max_history_size: 20,

            dashboard_enabled: true,
            sync_interval_secs: 3,
            snapshot_drift_secs: 2,
            observer_buffer: 32,

            ytdlp_path: "yt-dlp".into(),
            ffmpeg_path: "ffmpeg".into(),
            cookies_path: None,

            resolve_attempts: 3,
            resolve_timeout_secs: 30,
            resolve_backoff_min_ms: 1000,
            resolve_backoff_max_ms: 3000,
            pipeline_start_attempts: 2,

            data_dir: "./data".into(),
        }
    }
}
