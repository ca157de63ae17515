//! Run-scoped configuration for the migrator.

use std::path::Path;
use std::time::Duration;

use migrator_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Timing parameters for one orchestration run.
///
/// All values are required when loaded from a file and must be positive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MigratorConfig {
    /// Overall deadline for the run, in milliseconds.
    pub timeout_ms: u64,

    /// Deadline for each lock release, in milliseconds.
    pub lock_release_timeout_ms: u64,

    /// Interval between migration lock renewals, in milliseconds.
    pub heartbeat_interval_ms: u64,

    /// Consecutive heartbeat failures tolerated before the run is aborted.
    pub heartbeat_retries: u32,
}

impl Default for MigratorConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 1_800_000,
            lock_release_timeout_ms: 10_000,
            heartbeat_interval_ms: 5_000,
            heartbeat_retries: 3,
        }
    }
}

impl MigratorConfig {
    /// Set the overall deadline.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = millis(timeout);
        self
    }

    /// Set the lock-release deadline.
    #[must_use]
    pub fn with_lock_release_timeout(mut self, timeout: Duration) -> Self {
        self.lock_release_timeout_ms = millis(timeout);
        self
    }

    /// Set the heartbeat interval.
    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval_ms = millis(interval);
        self
    }

    /// Set the heartbeat retry budget.
    #[must_use]
    pub const fn with_heartbeat_retries(mut self, retries: u32) -> Self {
        self.heartbeat_retries = retries;
        self
    }

    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    #[must_use]
    pub const fn lock_release_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_release_timeout_ms)
    }

    #[must_use]
    pub const fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Check every field.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("timeout_ms", self.timeout_ms),
            ("lock_release_timeout_ms", self.lock_release_timeout_ms),
            ("heartbeat_interval_ms", self.heartbeat_interval_ms),
            ("heartbeat_retries", u64::from(self.heartbeat_retries)),
        ];

        if let Some((field, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(Error::invalid_config(format!("{field} must be positive")));
        }

        if self.lock_release_timeout_ms > self.timeout_ms {
            return Err(Error::invalid_config(format!(
                "lock_release_timeout_ms ({}) must not exceed timeout_ms ({})",
                self.lock_release_timeout_ms, self.timeout_ms
            )));
        }

        Ok(())
    }

    /// Parse and validate a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the document is malformed, a
    /// field is missing or unknown, or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)
            .map_err(|e| Error::invalid_config(format!("TOML parse error: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the file cannot be read or its
    /// contents are invalid.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::invalid_config(format!("failed to read '{}': {e}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    /// Layer `MIGRATOR_*` environment variables over this config.
    ///
    /// Recognized: `MIGRATOR_TIMEOUT_MS`, `MIGRATOR_LOCK_RELEASE_TIMEOUT_MS`,
    /// `MIGRATOR_HEARTBEAT_INTERVAL_MS`, `MIGRATOR_HEARTBEAT_RETRIES`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if a variable is set but is not a
    /// number, or the layered config fails validation.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(value) = parse_var(&lookup, "MIGRATOR_TIMEOUT_MS")? {
            self.timeout_ms = value;
        }
        if let Some(value) = parse_var(&lookup, "MIGRATOR_LOCK_RELEASE_TIMEOUT_MS")? {
            self.lock_release_timeout_ms = value;
        }
        if let Some(value) = parse_var(&lookup, "MIGRATOR_HEARTBEAT_INTERVAL_MS")? {
            self.heartbeat_interval_ms = value;
        }
        if let Some(value) = parse_var(&lookup, "MIGRATOR_HEARTBEAT_RETRIES")? {
            self.heartbeat_retries = value;
        }
        self.validate()?;
        Ok(self)
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>> {
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|_| Error::invalid_config(format!("{key} must be a positive integer, got '{raw}'")))
        })
        .transpose()
}

fn millis(duration: Duration) -> u64 {
    migrator_core::duration_ms(duration)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]
    #![allow(clippy::panic)]

    use std::collections::HashMap;
    use std::io::Write;

    use super::*;

    const VALID: &str = r"
        timeout_ms = 60000
        lock_release_timeout_ms = 5000
        heartbeat_interval_ms = 1000
        heartbeat_retries = 3
    ";

    #[test]
    fn test_default_config_is_valid() {
        assert!(MigratorConfig::default().validate().is_ok());
    }

    #[test]
    fn test_from_toml_str_parses_all_fields() {
        let config = MigratorConfig::from_toml_str(VALID).unwrap();
        assert_eq!(config.timeout(), Duration::from_secs(60));
        assert_eq!(config.lock_release_timeout(), Duration::from_secs(5));
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(1));
        assert_eq!(config.heartbeat_retries, 3);
    }

    #[test]
    fn test_missing_field_is_rejected() {
        let result = MigratorConfig::from_toml_str("timeout_ms = 1000");
        assert!(matches!(result, Err(Error::InvalidConfig { .. })));
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let raw = format!("{VALID}\nretries = 4\n");
        assert!(MigratorConfig::from_toml_str(&raw).is_err());
    }

    #[test]
    fn test_zero_values_are_rejected() {
        let config = MigratorConfig::default().with_heartbeat_retries(0);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("heartbeat_retries must be positive"));

        let config = MigratorConfig::default().with_heartbeat_interval(Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_release_timeout_longer_than_run_is_rejected() {
        let config = MigratorConfig::default()
            .with_timeout(Duration::from_secs(1))
            .with_lock_release_timeout(Duration::from_secs(2));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_overrides_layer_over_base() {
        let vars: HashMap<&str, &str> = [
            ("MIGRATOR_HEARTBEAT_RETRIES", "9"),
            ("MIGRATOR_TIMEOUT_MS", " 120000 "),
        ]
        .into_iter()
        .collect();

        let config = MigratorConfig::default()
            .with_overrides(|key| vars.get(key).map(ToString::to_string))
            .unwrap();

        assert_eq!(config.heartbeat_retries, 9);
        assert_eq!(config.timeout_ms, 120_000);
        assert_eq!(config.heartbeat_interval_ms, 5_000);
    }

    #[test]
    fn test_non_numeric_override_is_rejected() {
        let result = MigratorConfig::default().with_overrides(|key| {
            (key == "MIGRATOR_HEARTBEAT_INTERVAL_MS").then(|| "soon".to_string())
        });
        assert!(matches!(result, Err(Error::InvalidConfig { .. })));
    }

    #[test]
    fn test_from_file_reads_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(VALID.as_bytes()).unwrap();

        let config = MigratorConfig::from_file(file.path()).unwrap();
        assert_eq!(config.heartbeat_interval_ms, 1000);
    }

    #[test]
    fn test_from_file_missing_path() {
        let result = MigratorConfig::from_file("/definitely/not/here.toml");
        assert!(matches!(result, Err(Error::InvalidConfig { .. })));
    }
}
