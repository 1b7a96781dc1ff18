//! Process-wide configuration, built once in `main` and passed explicitly
//! into the subsystems that need it (lifecycle controller, scheduler,
//! shutdown handler) rather than read ad hoc.

use std::time::Duration;

/// Target accelerator memory-occupancy fraction. Also governs initial batch
/// sizing and input-truncation headroom: operators tuning one
/// knob move all three together.
pub const MEMORY_OCCUPANCY_FRACTION: f64 = 0.7;

/// Lower/upper clamp on characters-per-token-derived truncation budget.
pub const MIN_TRUNCATION_CHARS: usize = 1000;
pub const MAX_TRUNCATION_CHARS: usize = 12000;
pub const CHARS_PER_TOKEN: usize = 3;

/// Batch size clamp enforced by the memory governor.
pub const MIN_BATCH_SIZE: usize = 1;
pub const MAX_BATCH_SIZE: usize = 32;

/// Cap on OOM halving retries per batch.
pub const MAX_OOM_RETRIES: u32 = 3;

/// Worker-wide configuration derived from environment variables, with
/// operator-tunable defaults for timing and registry location.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// `CRAWLING_PAUSE_SECONDS`, default 60s.
    pub crawling_pause: Duration,
    /// `KEEP_ALIVE_SECONDS`, default 60 minutes.
    pub idle_unload_timeout: Duration,
    /// `SHUTDOWN_GRACE_PERIOD_SECONDS`, default 5s, clamped against the
    /// caller-supplied timeout at the shutdown handler.
    pub shutdown_grace_period: Duration,
    /// Path to the curated-models registry JSON file, `EMBEDDING_MODEL_REGISTRY`.
    pub model_registry_path: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            crawling_pause: Duration::from_secs(60),
            idle_unload_timeout: Duration::from_secs(60 * 60),
            shutdown_grace_period: Duration::from_secs(5),
            model_registry_path: "config/curated-models.json".to_string(),
        }
    }
}

impl WorkerConfig {
    /// Build configuration from the process environment, falling back to
    /// defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            crawling_pause: env_duration_secs("CRAWLING_PAUSE_SECONDS", defaults.crawling_pause),
            idle_unload_timeout: env_duration_secs(
                "KEEP_ALIVE_SECONDS",
                defaults.idle_unload_timeout,
            ),
            shutdown_grace_period: env_duration_secs(
                "SHUTDOWN_GRACE_PERIOD_SECONDS",
                defaults.shutdown_grace_period,
            ),
            model_registry_path: std::env::var("EMBEDDING_MODEL_REGISTRY")
                .unwrap_or(defaults.model_registry_path),
        }
    }
}

fn env_duration_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_have_expected_values() {
        let cfg = WorkerConfig::default();
        assert_eq!(cfg.crawling_pause, Duration::from_secs(60));
        assert_eq!(cfg.idle_unload_timeout, Duration::from_secs(3600));
        assert_eq!(cfg.shutdown_grace_period, Duration::from_secs(5));
    }

    #[test]
    fn env_override_parses() {
        std::env::set_var("CRAWLING_PAUSE_SECONDS", "15");
        let cfg = WorkerConfig::from_env();
        assert_eq!(cfg.crawling_pause, Duration::from_secs(15));
        std::env::remove_var("CRAWLING_PAUSE_SECONDS");
    }

    #[test]
    fn malformed_env_falls_back_to_default() {
        std::env::set_var("KEEP_ALIVE_SECONDS", "not-a-number");
        let cfg = WorkerConfig::from_env();
        assert_eq!(cfg.idle_unload_timeout, Duration::from_secs(3600));
        std::env::remove_var("KEEP_ALIVE_SECONDS");
    }
}
