//! Engine configuration loader.
//!
//! Reads `config.toml` from the data directory (`~/.taskloom/` in production)
//! and deserializes it into [`EngineConfig`]. Falls back to defaults when the
//! file is missing or malformed.

use std::path::{Path, PathBuf};
use std::time::Duration;

use taskloom_types::config::EngineConfig;

/// Floor for the breakpoint poll interval.
const MIN_POLL_MS: u64 = 10;

/// Load engine configuration from `{data_dir}/config.toml`.
///
/// - Missing file: [`EngineConfig::default()`].
/// - Unreadable or unparsable file: logs a warning and returns the default.
pub async fn load_engine_config(data_dir: &Path) -> EngineConfig {
    let config_path = data_dir.join("config.toml");

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", config_path.display());
            return EngineConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return EngineConfig::default();
        }
    };

    match toml::from_str::<EngineConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!("Failed to parse {}: {err}, using defaults", config_path.display());
            EngineConfig::default()
        }
    }
}

/// Record root: the configured directory, relative paths resolved against
/// `data_dir`, or `{data_dir}/records`.
pub fn resolve_records_dir(config: &EngineConfig, data_dir: &Path) -> PathBuf {
    match &config.records_dir {
        Some(dir) if dir.is_absolute() => dir.clone(),
        Some(dir) => data_dir.join(dir),
        None => crate::filesystem::records_dir(data_dir),
    }
}

pub fn breakpoint_poll_interval(config: &EngineConfig) -> Duration {
    Duration::from_millis(config.breakpoint_poll_ms.max(MIN_POLL_MS))
}

pub fn agent_timeout(config: &EngineConfig) -> Option<Duration> {
    config.agent_timeout_secs.filter(|s| *s > 0).map(Duration::from_secs)
}
