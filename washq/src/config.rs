//! Configuration management for washQ.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::env;
use std::time::Duration;

/// Default latency between requesting a wash and the machine running.
pub const DEFAULT_START_WASH_LATENCY: Duration = Duration::from_millis(2000);

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Delay applied by `start_wash` before the machine switches to `running`
    /// (`WASHQ_START_WASH_LATENCY_MS`, default 2000).
    pub start_wash_latency: Duration,
    /// Base URL encoded into machine QR codes (`WASHQ_QR_BASE_URL`).
    pub qr_base_url: String,
    /// Interval between wash timer ticks (`WASHQ_TIMER_TICK_SECS`, default 60).
    pub timer_tick: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Unset or unparsable values fall back to their defaults.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            start_wash_latency: env::var("WASHQ_START_WASH_LATENCY_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map_or(DEFAULT_START_WASH_LATENCY, Duration::from_millis),
            qr_base_url: env::var("WASHQ_QR_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:5173".to_string()),
            timer_tick: Duration::from_secs(
                env::var("WASHQ_TIMER_TICK_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(60),
            ),
        }
    }

    /// Set the start-wash latency.
    #[must_use]
    pub const fn with_start_wash_latency(mut self, latency: Duration) -> Self {
        self.start_wash_latency = latency;
        self
    }

    /// Set the QR base URL.
    #[must_use]
    pub fn with_qr_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.qr_base_url = base_url.into();
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            start_wash_latency: DEFAULT_START_WASH_LATENCY,
            qr_base_url: "http://localhost:5173".to_string(),
            timer_tick: Duration::from_secs(60),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.start_wash_latency, Duration::from_secs(2));
        assert_eq!(config.timer_tick, Duration::from_secs(60));
        assert_eq!(config.qr_base_url, "http://localhost:5173");
    }

    #[test]
    fn builders_override() {
        let config = Config::default()
            .with_start_wash_latency(Duration::from_millis(5))
            .with_qr_base_url("https://washq.example");
        assert_eq!(config.start_wash_latency, Duration::from_millis(5));
        assert_eq!(config.qr_base_url, "https://washq.example");
    }
}
