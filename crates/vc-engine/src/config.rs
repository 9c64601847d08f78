//! Environment configuration: parsed once at startup, validated, frozen.
//!
//! Every variable has a default and a legal range; an out-of-range or
//! unparseable value fails startup with an error naming the variable.

use thiserror::Error;

/// Startup rejection of an environment variable.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid configuration: {var}: {reason}")]
pub struct ConfigError {
    pub var: &'static str,
    pub reason: String,
}

impl ConfigError {
    fn new(var: &'static str, reason: impl Into<String>) -> Self {
        Self {
            var,
            reason: reason.into(),
        }
    }
}

/// Which events the retention cleanup deletes first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupStrategy {
    OldestFirst,
    OldestNonCritical,
}

/// Frozen engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Days to retain agent events (`VC_EVENT_RETENTION_DAYS`, 1..=365).
    pub event_retention_days: u32,
    /// Days to retain critical events (`VC_EVENT_RETENTION_CRITICAL_DAYS`,
    /// 1..=730, must be >= the base retention).
    pub event_retention_critical_days: u32,
    /// Per-issue event cap (`VC_EVENT_PER_ISSUE_LIMIT`, 0 = unlimited or
    /// 100..=10000).
    pub event_per_issue_limit: u32,
    /// Global event cap (`VC_EVENT_GLOBAL_LIMIT`, 1000..=1000000).
    pub event_global_limit: u32,
    /// Hours between cleanup passes (`VC_EVENT_CLEANUP_INTERVAL_HOURS`,
    /// 1..=168).
    pub event_cleanup_interval_hours: u32,
    /// Events deleted per cleanup batch (`VC_EVENT_CLEANUP_BATCH_SIZE`,
    /// 100..=10000).
    pub event_cleanup_batch_size: u32,
    /// Whether retention cleanup runs at all (`VC_EVENT_CLEANUP_ENABLED`).
    pub event_cleanup_enabled: bool,
    /// Deletion order (`VC_EVENT_CLEANUP_STRATEGY`).
    pub event_cleanup_strategy: CleanupStrategy,
    /// Vacuum the store after cleanup (`VC_EVENT_CLEANUP_VACUUM`).
    pub event_cleanup_vacuum: bool,
    /// Age before stale executor instances are reaped
    /// (`VC_INSTANCE_CLEANUP_AGE_HOURS`, 0 disables, 0..=720).
    pub instance_cleanup_age_hours: u32,
    /// Most-recent instances always kept (`VC_INSTANCE_CLEANUP_KEEP`,
    /// 0..=1000).
    pub instance_cleanup_keep: u32,
    /// Log the full prompt before each agent spawn (`VC_DEBUG_PROMPTS`,
    /// set to anything to enable).
    pub debug_prompts: bool,
    /// Actor name used for claims and comments (`VC_ACTOR`).
    pub actor: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            event_retention_days: 30,
            event_retention_critical_days: 90,
            event_per_issue_limit: 1000,
            event_global_limit: 100_000,
            event_cleanup_interval_hours: 24,
            event_cleanup_batch_size: 1000,
            event_cleanup_enabled: true,
            event_cleanup_strategy: CleanupStrategy::OldestNonCritical,
            event_cleanup_vacuum: false,
            instance_cleanup_age_hours: 24,
            instance_cleanup_keep: 10,
            debug_prompts: false,
            actor: "vc".into(),
        }
    }
}

fn int_var(var: &'static str, default: u32, min: u32, max: u32) -> Result<u32, ConfigError> {
    let Ok(raw) = std::env::var(var) else {
        return Ok(default);
    };
    let value: u32 = raw
        .trim()
        .parse()
        .map_err(|_| ConfigError::new(var, format!("not an integer: {raw:?}")))?;
    if value < min || value > max {
        return Err(ConfigError::new(
            var,
            format!("{value} out of range [{min}, {max}]"),
        ));
    }
    Ok(value)
}

fn bool_var(var: &'static str, default: bool) -> Result<bool, ConfigError> {
    let Ok(raw) = std::env::var(var) else {
        return Ok(default);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::new(var, format!("not a boolean: {other:?}"))),
    }
}

impl EngineConfig {
    /// Parse and validate the `VC_*` environment. Called once at startup;
    /// any violation aborts with a diagnostic naming the variable.
    pub fn from_env() -> Result<Self, ConfigError> {
        let event_retention_days = int_var("VC_EVENT_RETENTION_DAYS", 30, 1, 365)?;
        let event_retention_critical_days =
            int_var("VC_EVENT_RETENTION_CRITICAL_DAYS", 90, 1, 730)?;
        if event_retention_critical_days < event_retention_days {
            return Err(ConfigError::new(
                "VC_EVENT_RETENTION_CRITICAL_DAYS",
                format!(
                    "{event_retention_critical_days} must be >= VC_EVENT_RETENTION_DAYS ({event_retention_days})"
                ),
            ));
        }

        // 0 disables the per-issue cap; non-zero values have a floor.
        let event_per_issue_limit = match int_var("VC_EVENT_PER_ISSUE_LIMIT", 1000, 0, 10_000)? {
            0 => 0,
            v if v < 100 => {
                return Err(ConfigError::new(
                    "VC_EVENT_PER_ISSUE_LIMIT",
                    format!("{v} out of range (0 or [100, 10000])"),
                ))
            }
            v => v,
        };

        let event_cleanup_strategy = match std::env::var("VC_EVENT_CLEANUP_STRATEGY") {
            Err(_) => CleanupStrategy::OldestNonCritical,
            Ok(raw) => match raw.trim() {
                "oldest_first" => CleanupStrategy::OldestFirst,
                "oldest_non_critical" => CleanupStrategy::OldestNonCritical,
                other => {
                    return Err(ConfigError::new(
                        "VC_EVENT_CLEANUP_STRATEGY",
                        format!(
                            "unknown strategy {other:?} (expected oldest_first or oldest_non_critical)"
                        ),
                    ))
                }
            },
        };

        Ok(Self {
            event_retention_days,
            event_retention_critical_days,
            event_per_issue_limit,
            event_global_limit: int_var("VC_EVENT_GLOBAL_LIMIT", 100_000, 1000, 1_000_000)?,
            event_cleanup_interval_hours: int_var("VC_EVENT_CLEANUP_INTERVAL_HOURS", 24, 1, 168)?,
            event_cleanup_batch_size: int_var("VC_EVENT_CLEANUP_BATCH_SIZE", 1000, 100, 10_000)?,
            event_cleanup_enabled: bool_var("VC_EVENT_CLEANUP_ENABLED", true)?,
            event_cleanup_strategy,
            event_cleanup_vacuum: bool_var("VC_EVENT_CLEANUP_VACUUM", false)?,
            instance_cleanup_age_hours: int_var("VC_INSTANCE_CLEANUP_AGE_HOURS", 24, 0, 720)?,
            instance_cleanup_keep: int_var("VC_INSTANCE_CLEANUP_KEEP", 10, 0, 1000)?,
            debug_prompts: std::env::var("VC_DEBUG_PROMPTS").is_ok(),
            actor: std::env::var("VC_ACTOR").unwrap_or_else(|_| "vc".into()),
        })
    }
}
