use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

/// Mover process monitoring settings.
#[derive(Debug, Clone)]
pub struct MonitoringConfig {
    /// Path to the mover PID file.
    pub pid_file: PathBuf,

    /// PID file polling interval.
    pub pid_check_interval: Duration,

    /// Disk usage sampling interval.
    pub sampling_interval: Duration,

    /// Timeout for process detection.
    pub process_timeout: Duration,

    /// Filesystem roots whose usage is tracked. Must be non-empty.
    pub monitored_paths: Vec<PathBuf>,

    /// Subtrees excluded from usage totals.
    pub exclusion_paths: Vec<PathBuf>,
}

/// Notification delivery behavior.
#[derive(Debug, Clone)]
pub struct NotificationsConfig {
    /// Progress percentages at which a notification fires, once per cycle.
    pub thresholds: Vec<f64>,

    /// Whether to send the completion notification.
    pub completion_enabled: bool,

    /// HTTP retry attempts on top of the initial webhook request.
    pub retry_attempts: u32,
}

/// Provider enablement.
#[derive(Debug, Clone)]
pub struct ProvidersConfig {
    /// Enabled provider identifiers, in dispatch order. Must be non-empty.
    pub enabled: Vec<String>,
}

/// Application-level settings.
#[derive(Debug, Clone)]
pub struct ApplicationConfig {
    /// One of DEBUG, INFO, WARNING, ERROR, CRITICAL.
    pub log_level: String,

    /// Log notifications without sending them.
    pub dry_run: bool,

    /// Check for a newer release on startup.
    pub version_check: bool,

    /// Emit JSON logs for a local syslog/log shipper.
    pub syslog_enabled: bool,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub monitoring: MonitoringConfig,
    pub notifications: NotificationsConfig,
    pub providers: ProvidersConfig,
    pub application: ApplicationConfig,
}

pub const DEFAULT_THRESHOLDS: [f64; 5] = [0.0, 25.0, 50.0, 75.0, 100.0];

const LOG_LEVELS: [&str; 5] = ["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL"];

impl AppConfig {
    /// Resolve every section from environment variables and validate the
    /// result. Fails fast with an error naming the offending section and
    /// field.
    pub fn from_env() -> Result<Self> {
        let config = Self {
            monitoring: MonitoringConfig {
                pid_file: PathBuf::from(require_env("MOVER_PID_FILE")?),
                pid_check_interval: env_duration_secs("PID_CHECK_INTERVAL_SECS", 1)?,
                sampling_interval: env_duration_secs("SAMPLING_INTERVAL_SECS", 60)?,
                process_timeout: env_duration_secs("PROCESS_TIMEOUT_SECS", 300)?,
                monitored_paths: parse_paths(&require_env("MONITORED_PATHS")?),
                exclusion_paths: parse_paths(
                    &std::env::var("EXCLUSION_PATHS").unwrap_or_default(),
                ),
            },
            notifications: NotificationsConfig {
                thresholds: match std::env::var("NOTIFICATION_THRESHOLDS") {
                    Ok(raw) => parse_thresholds(&raw)?,
                    Err(_) => DEFAULT_THRESHOLDS.to_vec(),
                },
                completion_enabled: env_bool("COMPLETION_ENABLED", true),
                retry_attempts: env_u32("RETRY_ATTEMPTS", 5)?,
            },
            providers: ProvidersConfig {
                enabled: parse_list(&require_env("PROVIDERS_ENABLED")?),
            },
            application: ApplicationConfig {
                log_level: std::env::var("LOG_LEVEL")
                    .map(|v| v.to_ascii_uppercase())
                    .unwrap_or_else(|_| "INFO".to_string()),
                dry_run: env_bool("DRY_RUN", false),
                version_check: env_bool("VERSION_CHECK", true),
                syslog_enabled: env_bool("SYSLOG_ENABLED", false),
            },
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let pid_parent = self
            .monitoring
            .pid_file
            .parent()
            .unwrap_or(std::path::Path::new("/"));
        if !pid_parent.exists() {
            return Err(Error::ConfigurationInvalid {
                section: "monitoring",
                field: "pid_file",
                reason: format!("parent directory does not exist: {}", pid_parent.display()),
            });
        }
        if self.monitoring.pid_check_interval.is_zero() {
            return Err(Error::ConfigurationInvalid {
                section: "monitoring",
                field: "pid_check_interval",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.monitoring.sampling_interval.is_zero() {
            return Err(Error::ConfigurationInvalid {
                section: "monitoring",
                field: "sampling_interval",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.monitoring.process_timeout.is_zero() {
            return Err(Error::ConfigurationInvalid {
                section: "monitoring",
                field: "process_timeout",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.monitoring.monitored_paths.is_empty() {
            return Err(Error::ConfigurationInvalid {
                section: "monitoring",
                field: "monitored_paths",
                reason: "at least one monitored path is required".to_string(),
            });
        }
        for threshold in &self.notifications.thresholds {
            if !(0.0..=100.0).contains(threshold) {
                return Err(Error::ConfigurationInvalid {
                    section: "notifications",
                    field: "thresholds",
                    reason: format!("threshold must be within [0, 100], got {threshold}"),
                });
            }
        }
        if self.providers.enabled.is_empty() {
            return Err(Error::ConfigurationInvalid {
                section: "providers",
                field: "enabled",
                reason: "at least one notification provider must be enabled".to_string(),
            });
        }
        if !LOG_LEVELS.contains(&self.application.log_level.as_str()) {
            return Err(Error::ConfigurationInvalid {
                section: "application",
                field: "log_level",
                reason: format!(
                    "must be one of {}, got {}",
                    LOG_LEVELS.join(", "),
                    self.application.log_level
                ),
            });
        }
        Ok(())
    }

    /// Tracing filter directive for the configured log level.
    pub fn tracing_directive(&self) -> &'static str {
        match self.application.log_level.as_str() {
            "DEBUG" => "mover_status=debug",
            "WARNING" => "mover_status=warn",
            "ERROR" | "CRITICAL" => "mover_status=error",
            _ => "mover_status=info",
        }
    }
}

fn require_env(name: &'static str) -> Result<String> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(Error::EnvironmentMissing(name.to_string())),
    }
}

fn env_duration_secs(name: &'static str, default_secs: u64) -> Result<Duration> {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse::<u64>().map(Duration::from_secs).map_err(|_| {
            Error::invalid_argument(format!(
                "{name} must be an integer number of seconds, got {raw:?}"
            ))
        }),
        Err(_) => Ok(Duration::from_secs(default_secs)),
    }
}

fn env_u32(name: &'static str, default: u32) -> Result<u32> {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse::<u32>().map_err(|_| {
            Error::invalid_argument(format!(
                "{name} must be a non-negative integer, got {raw:?}"
            ))
        }),
        Err(_) => Ok(default),
    }
}

fn env_bool(name: &str, default: bool) -> bool {
    std::env::var(name)
        .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
        .unwrap_or(default)
}

/// Split a comma-separated list, trimming entries and dropping empties.
pub(crate) fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

pub(crate) fn parse_paths(raw: &str) -> Vec<PathBuf> {
    parse_list(raw).into_iter().map(PathBuf::from).collect()
}

pub(crate) fn parse_thresholds(raw: &str) -> Result<Vec<f64>> {
    let mut thresholds = Vec::new();
    for part in parse_list(raw) {
        let value: f64 = part
            .parse()
            .ok()
            .filter(|v: &f64| v.is_finite())
            .ok_or_else(|| Error::ConfigurationInvalid {
                section: "notifications",
                field: "thresholds",
                reason: format!("not a number: {part:?}"),
            })?;
        thresholds.push(value);
    }
    thresholds.sort_by(|a, b| a.partial_cmp(b).expect("thresholds are finite"));
    Ok(thresholds)
}
