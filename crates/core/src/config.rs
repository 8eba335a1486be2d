use std::env;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ScanError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

/// Prefix for environment overrides: `SITESCAN_MAX_CONCURRENT` etc.
const ENV_PREFIX: &str = "SITESCAN_";

// ── Priority patterns ─────────────────────────────────────────

/// A `(pattern, priority)` rule. A URL matches when it contains `pattern`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityPattern {
    pub pattern: String,
    pub priority: i32,
}

impl PriorityPattern {
    pub fn new(pattern: impl Into<String>, priority: i32) -> Self {
        Self {
            pattern: pattern.into(),
            priority,
        }
    }

    pub fn matches(&self, url: &str) -> bool {
        url.contains(self.pattern.as_str())
    }
}

// ── Retry backoff ─────────────────────────────────────────────

/// How the delay before a retry grows with the attempt count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryBackoff {
    /// Constant `retry_delay` for every retry.
    #[default]
    Fixed,
    /// `retry_delay * 2^(attempts - 1)`, capped at `max_retry_delay`.
    Exponential,
}

impl std::str::FromStr for RetryBackoff {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fixed" => Ok(RetryBackoff::Fixed),
            "exponential" => Ok(RetryBackoff::Exponential),
            other => Err(ScanError::InvalidConfig(format!(
                "unknown retry backoff '{other}', expected 'fixed' or 'exponential'"
            ))),
        }
    }
}

// ── Scheduler config ──────────────────────────────────────────

/// Scheduler configuration, typically parsed from TOML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Upper bound on concurrently running probes.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Retries after the first attempt; a task is tried at most `max_retries + 1` times.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default)]
    pub retry_backoff: RetryBackoff,
    /// Cap for exponential backoff. Ignored for fixed delays.
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,
    /// Ordered rules, first match wins.
    #[serde(default)]
    pub priority_patterns: Vec<PriorityPattern>,
    #[serde(default = "default_priority")]
    pub default_priority: i32,
    #[serde(default = "default_progress_update_interval_ms")]
    pub progress_update_interval_ms: u64,
    #[serde(default = "default_status_update_interval_ms")]
    pub status_update_interval_ms: u64,
    #[serde(default = "default_true")]
    pub enable_short_status: bool,
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    /// Upper bound on how long an idle worker sleeps before re-checking the queue.
    #[serde(default = "default_idle_wait_ms")]
    pub idle_wait_ms: u64,
    #[serde(default = "default_true")]
    pub sample_resources: bool,
}

fn default_max_concurrent() -> usize {
    3
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_max_retry_delay_ms() -> u64 {
    30_000
}

fn default_priority() -> i32 {
    1
}

fn default_progress_update_interval_ms() -> u64 {
    1000
}

fn default_status_update_interval_ms() -> u64 {
    2000
}

fn default_true() -> bool {
    true
}

fn default_probe_timeout_ms() -> u64 {
    30_000
}

fn default_idle_wait_ms() -> u64 {
    250
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            retry_backoff: RetryBackoff::default(),
            max_retry_delay_ms: default_max_retry_delay_ms(),
            priority_patterns: Vec::new(),
            default_priority: default_priority(),
            progress_update_interval_ms: default_progress_update_interval_ms(),
            status_update_interval_ms: default_status_update_interval_ms(),
            enable_short_status: true,
            probe_timeout_ms: default_probe_timeout_ms(),
            idle_wait_ms: default_idle_wait_ms(),
            sample_resources: true,
        }
    }
}

impl SchedulerConfig {
    /// Parse config from a TOML string, apply `SITESCAN_*` env overrides, then validate.
    pub fn from_toml(toml_str: &str) -> Result<Self, ScanError> {
        let mut config: Self = toml::from_str(toml_str)?;
        config.apply_env_overrides(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ScanError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Defaults plus `SITESCAN_*` env overrides (call `load_dotenv()` first).
    pub fn from_env() -> Result<Self, ScanError> {
        let mut config = Self::default();
        config.apply_env_overrides(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    // ── Builder-style setters ────────────────────────────────

    pub fn with_max_concurrent(mut self, n: usize) -> Self {
        self.max_concurrent = n;
        self
    }

    pub fn with_max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: RetryBackoff) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn with_priority_pattern(mut self, pattern: impl Into<String>, priority: i32) -> Self {
        self.priority_patterns.push(PriorityPattern::new(pattern, priority));
        self
    }

    pub fn with_progress_update_interval(mut self, interval: Duration) -> Self {
        self.progress_update_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_status_update_interval(mut self, interval: Duration) -> Self {
        self.status_update_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_short_status(mut self, enabled: bool) -> Self {
        self.enable_short_status = enabled;
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_idle_wait(mut self, wait: Duration) -> Self {
        self.idle_wait_ms = wait.as_millis() as u64;
        self
    }

    pub fn with_resource_sampling(mut self, enabled: bool) -> Self {
        self.sample_resources = enabled;
        self
    }

    // ── Derived values ───────────────────────────────────────

    /// Priority for a URL: first matching pattern wins, else `default_priority`.
    pub fn priority_for(&self, url: &str) -> i32 {
        self.priority_patterns
            .iter()
            .find(|p| p.matches(url))
            .map(|p| p.priority)
            .unwrap_or(self.default_priority)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn max_retry_delay(&self) -> Duration {
        Duration::from_millis(self.max_retry_delay_ms)
    }

    pub fn progress_update_interval(&self) -> Duration {
        Duration::from_millis(self.progress_update_interval_ms)
    }

    pub fn status_update_interval(&self) -> Duration {
        Duration::from_millis(self.status_update_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn idle_wait(&self) -> Duration {
        Duration::from_millis(self.idle_wait_ms)
    }

    // ── Validation ───────────────────────────────────────────

    /// Reject settings the scheduler cannot honour.
    pub fn validate(&self) -> Result<(), ScanError> {
        if self.max_concurrent < 1 {
            return Err(ScanError::InvalidConfig(
                "max_concurrent must be at least 1".into(),
            ));
        }
        if self.progress_update_interval_ms == 0 || self.status_update_interval_ms == 0 {
            return Err(ScanError::InvalidConfig(
                "update intervals must be greater than zero".into(),
            ));
        }
        if self.probe_timeout_ms == 0 {
            return Err(ScanError::InvalidConfig(
                "probe_timeout_ms must be greater than zero".into(),
            ));
        }
        if self.idle_wait_ms == 0 {
            return Err(ScanError::InvalidConfig(
                "idle_wait_ms must be greater than zero".into(),
            ));
        }
        if let Some(p) = self.priority_patterns.iter().find(|p| p.pattern.is_empty()) {
            return Err(ScanError::InvalidConfig(format!(
                "priority pattern with priority {} has an empty pattern",
                p.priority
            )));
        }
        Ok(())
    }

    // ── Environment variable overrides ───────────────────────

    /// Apply overrides from `lookup`.
    ///
    /// Convention: `SITESCAN_<FIELD>` overrides `<field>`, e.g.
    /// `SITESCAN_MAX_CONCURRENT` -> `max_concurrent`. Unparseable values are
    /// rejected rather than ignored.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ScanError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(&format!("{ENV_PREFIX}{key}")).filter(|v| !v.is_empty());

        if let Some(v) = get("MAX_CONCURRENT") {
            self.max_concurrent = parse_env("MAX_CONCURRENT", &v)?;
        }
        if let Some(v) = get("MAX_RETRIES") {
            self.max_retries = parse_env("MAX_RETRIES", &v)?;
        }
        if let Some(v) = get("RETRY_DELAY_MS") {
            self.retry_delay_ms = parse_env("RETRY_DELAY_MS", &v)?;
        }
        if let Some(v) = get("RETRY_BACKOFF") {
            self.retry_backoff = v.parse()?;
        }
        if let Some(v) = get("MAX_RETRY_DELAY_MS") {
            self.max_retry_delay_ms = parse_env("MAX_RETRY_DELAY_MS", &v)?;
        }
        if let Some(v) = get("DEFAULT_PRIORITY") {
            self.default_priority = parse_env("DEFAULT_PRIORITY", &v)?;
        }
        if let Some(v) = get("PROGRESS_UPDATE_INTERVAL_MS") {
            self.progress_update_interval_ms = parse_env("PROGRESS_UPDATE_INTERVAL_MS", &v)?;
        }
        if let Some(v) = get("STATUS_UPDATE_INTERVAL_MS") {
            self.status_update_interval_ms = parse_env("STATUS_UPDATE_INTERVAL_MS", &v)?;
        }
        if let Some(v) = get("ENABLE_SHORT_STATUS") {
            self.enable_short_status = parse_env("ENABLE_SHORT_STATUS", &v)?;
        }
        if let Some(v) = get("PROBE_TIMEOUT_MS") {
            self.probe_timeout_ms = parse_env("PROBE_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = get("IDLE_WAIT_MS") {
            self.idle_wait_ms = parse_env("IDLE_WAIT_MS", &v)?;
        }
        if let Some(v) = get("SAMPLE_RESOURCES") {
            self.sample_resources = parse_env("SAMPLE_RESOURCES", &v)?;
        }
        Ok(())
    }

    /// Print a one-line summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!(
            max_concurrent = self.max_concurrent,
            max_retries = self.max_retries,
            retry_delay_ms = self.retry_delay_ms,
            retry_backoff = ?self.retry_backoff,
            patterns = self.priority_patterns.len(),
            probe_timeout_ms = self.probe_timeout_ms,
            "scheduler config loaded"
        );
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ScanError> {
    value.trim().parse().map_err(|_| {
        ScanError::InvalidConfig(format!("{ENV_PREFIX}{key}: cannot parse '{value}'"))
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = SchedulerConfig::default();
        assert_eq!(config.max_concurrent, 3);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_delay(), Duration::from_millis(1000));
        assert_eq!(config.retry_backoff, RetryBackoff::Fixed);
        assert_eq!(config.default_priority, 1);
        assert_eq!(config.progress_update_interval(), Duration::from_secs(1));
        assert_eq!(config.status_update_interval(), Duration::from_secs(2));
        assert!(config.enable_short_status);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parse_minimal_toml() {
        let config: SchedulerConfig = toml::from_str("max_concurrent = 2\n").unwrap();
        assert_eq!(config.max_concurrent, 2);
        assert_eq!(config.max_retries, 3);
        assert!(config.priority_patterns.is_empty());
    }

    #[test]
    fn parse_full_toml() {
        let toml = r#"
max_concurrent = 4
max_retries = 1
retry_delay_ms = 50
retry_backoff = "exponential"
max_retry_delay_ms = 400
default_priority = 0
enable_short_status = false

[[priority_patterns]]
pattern = "/home"
priority = 10

[[priority_patterns]]
pattern = "/blog"
priority = 5
"#;
        let config: SchedulerConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.max_concurrent, 4);
        assert_eq!(config.retry_backoff, RetryBackoff::Exponential);
        assert_eq!(config.priority_patterns.len(), 2);
        assert_eq!(config.priority_patterns[0], PriorityPattern::new("/home", 10));
        assert!(!config.enable_short_status);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn from_file_reads_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sitescan.toml");
        std::fs::write(&path, "max_concurrent = 5\nmax_retries = 0\n").unwrap();

        let config = SchedulerConfig::from_file(&path).unwrap();
        assert_eq!(config.max_concurrent, 5);
        assert_eq!(config.max_retries, 0);
    }

    #[test]
    fn from_file_missing_is_io_error() {
        let err = SchedulerConfig::from_file("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, ScanError::ConfigIo(_)));
    }

    #[test]
    fn bad_toml_is_parse_error() {
        let err = SchedulerConfig::from_toml("max_concurrent = \"many\"").unwrap_err();
        assert!(matches!(err, ScanError::ConfigParse(_)));
    }

    #[test]
    fn first_matching_pattern_wins() {
        let config = SchedulerConfig::default()
            .with_priority_pattern("/home", 10)
            .with_priority_pattern("/ho", 7);
        assert_eq!(config.priority_for("https://site.test/home"), 10);
        assert_eq!(config.priority_for("https://site.test/hot"), 7);
        assert_eq!(config.priority_for("https://site.test/about"), 1);
    }

    #[test]
    fn rejects_zero_concurrency() {
        let err = SchedulerConfig::default()
            .with_max_concurrent(0)
            .validate()
            .unwrap_err();
        assert!(matches!(err, ScanError::InvalidConfig(_)));
        assert!(err.is_misuse());
    }

    #[test]
    fn rejects_empty_pattern() {
        let err = SchedulerConfig::default()
            .with_priority_pattern("", 3)
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("empty pattern"));
    }

    #[test]
    fn rejects_zero_intervals() {
        let config = SchedulerConfig::default().with_status_update_interval(Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = SchedulerConfig::default();
        config
            .apply_env_overrides(lookup_from(&[
                ("SITESCAN_MAX_CONCURRENT", "8"),
                ("SITESCAN_RETRY_BACKOFF", "Exponential"),
                ("SITESCAN_ENABLE_SHORT_STATUS", "false"),
                ("SITESCAN_RETRY_DELAY_MS", ""),
            ]))
            .unwrap();
        assert_eq!(config.max_concurrent, 8);
        assert_eq!(config.retry_backoff, RetryBackoff::Exponential);
        assert!(!config.enable_short_status);
        // Empty values are treated as unset.
        assert_eq!(config.retry_delay_ms, 1000);
    }

    #[test]
    fn env_override_rejects_garbage() {
        let mut config = SchedulerConfig::default();
        let err = config
            .apply_env_overrides(lookup_from(&[("SITESCAN_MAX_RETRIES", "lots")]))
            .unwrap_err();
        assert!(err.to_string().contains("SITESCAN_MAX_RETRIES"));
    }

    #[test]
    fn builder_setters() {
        let config = SchedulerConfig::default()
            .with_max_concurrent(2)
            .with_max_retries(1)
            .with_retry_delay(Duration::from_millis(50))
            .with_probe_timeout(Duration::from_secs(5))
            .with_resource_sampling(false);
        assert_eq!(config.max_concurrent, 2);
        assert_eq!(config.max_retries, 1);
        assert_eq!(config.retry_delay_ms, 50);
        assert_eq!(config.probe_timeout(), Duration::from_secs(5));
        assert!(!config.sample_resources);
    }
}
