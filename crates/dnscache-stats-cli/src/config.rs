// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use dnscache_stats::constants;
use dnscache_stats::pipeline::PipelineConfig;
use dnscache_stats::sampler::SamplingMode;
use dnscache_stats::template::NameTemplate;

use crate::error::CliError;

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Configuration of the `dnscache-stats` process
#[derive(Debug, Clone)]
pub struct Config {
    /// Window length
    pub interval: Duration,
    /// Metric naming
    pub name_template: NameTemplate,
    /// Followed instead of stdin when set
    pub input_file: Option<PathBuf>,
    /// Input lines carry TAI64N labels that drive the windows
    pub tai64: bool,
    /// Copy input lines to stdout
    pub echo: bool,
    /// Log level (e.g., trace, debug, info, warn, error)
    pub log_level: String,
    /// Pending-query capacity
    pub query_limit: usize,
    /// Delivery channel capacity
    pub buffer: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interval: constants::DEFAULT_INTERVAL,
            name_template: NameTemplate::default(),
            input_file: None,
            tai64: false,
            echo: true,
            log_level: "info".to_string(),
            query_limit: constants::QUERY_TRACKING_LIMIT,
            buffer: constants::METRICS_BUFFER_MAX,
        }
    }
}

impl Config {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, CliError> {
        let defaults = Self::default();

        let interval = match env::var("DNSCACHE_STATS_INTERVAL") {
            Ok(val) => parse_duration(&val)?,
            Err(_) => defaults.interval,
        };
        let name_template = match env::var("DNSCACHE_STATS_NAME_TEMPLATE") {
            Ok(val) => NameTemplate::parse(&val).map_err(|e| {
                CliError::InvalidConfig(format!("DNSCACHE_STATS_NAME_TEMPLATE: {e}"))
            })?,
            Err(_) => defaults.name_template,
        };
        let input_file = env::var("DNSCACHE_STATS_INPUT_FILE")
            .ok()
            .filter(|val| !val.trim().is_empty())
            .map(PathBuf::from);
        let tai64 = env::var("DNSCACHE_STATS_TAI64")
            .map(|val| val.to_lowercase() == "true")
            .unwrap_or(false);
        let echo = env::var("DNSCACHE_STATS_ECHO")
            .map(|val| val.to_lowercase() != "false")
            .unwrap_or(true);
        let query_limit = parse_count("DNSCACHE_STATS_QUERY_LIMIT", defaults.query_limit)?;
        let buffer = parse_count("DNSCACHE_STATS_BUFFER", defaults.buffer)?;

        let config = Self {
            interval,
            name_template,
            input_file,
            tai64,
            echo,
            log_level: log_level_from_env(),
            query_limit,
            buffer,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), CliError> {
        if self.interval.is_zero() {
            return Err(CliError::InvalidConfig(
                "DNSCACHE_STATS_INTERVAL must be greater than 0".to_string(),
            ));
        }
        if self.query_limit == 0 {
            return Err(CliError::InvalidConfig(
                "DNSCACHE_STATS_QUERY_LIMIT must be greater than 0".to_string(),
            ));
        }
        if self.buffer == 0 {
            return Err(CliError::InvalidConfig(
                "DNSCACHE_STATS_BUFFER must be greater than 0".to_string(),
            ));
        }
        validate_log_level(&self.log_level)
    }

    #[must_use]
    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            interval: self.interval,
            mode: if self.tai64 {
                SamplingMode::Replay
            } else {
                SamplingMode::Live
            },
            query_tracking_limit: self.query_limit,
        }
    }
}

/// Configuration of the `dnscache-slowlogs` process
#[derive(Debug, Clone)]
pub struct SlowLogsConfig {
    /// Answers slower than this are reported
    pub threshold: Duration,
    pub log_level: String,
}

impl Default for SlowLogsConfig {
    fn default() -> Self {
        Self {
            threshold: constants::DEFAULT_SLOW_THRESHOLD,
            log_level: "info".to_string(),
        }
    }
}

impl SlowLogsConfig {
    pub fn from_env() -> Result<Self, CliError> {
        let threshold = match env::var("DNSCACHE_SLOWLOGS_THRESHOLD") {
            Ok(val) => parse_duration(&val)?,
            Err(_) => constants::DEFAULT_SLOW_THRESHOLD,
        };
        let config = Self {
            threshold,
            log_level: log_level_from_env(),
        };
        validate_log_level(&config.log_level)?;
        Ok(config)
    }
}

/// Log level requested through `DNSCACHE_STATS_LOG_LEVEL`, lowercased.
#[must_use]
pub fn log_level_from_env() -> String {
    env::var("DNSCACHE_STATS_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or_else(|_| "info".to_string())
}

fn validate_log_level(level: &str) -> Result<(), CliError> {
    if !VALID_LOG_LEVELS.contains(&level) {
        return Err(CliError::InvalidConfig(format!(
            "Invalid log level '{level}'. Must be one of: trace, debug, info, warn, error"
        )));
    }
    Ok(())
}

fn parse_count(var: &str, default: usize) -> Result<usize, CliError> {
    match env::var(var) {
        Ok(val) => val
            .trim()
            .parse()
            .map_err(|_| CliError::InvalidConfig(format!("{var} is not a count: '{val}'"))),
        Err(_) => Ok(default),
    }
}

/// Parses `500ms`, `30s`, `5m`, `1h` or a bare number of seconds.
pub fn parse_duration(val: &str) -> Result<Duration, CliError> {
    let val = val.trim();
    let invalid = || CliError::InvalidConfig(format!("Invalid duration '{val}'"));

    let split = val
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(val.len());
    let (digits, unit) = val.split_at(split);
    let amount: u64 = digits.parse().map_err(|_| invalid())?;

    match unit {
        "ms" => Ok(Duration::from_millis(amount)),
        "" | "s" => Ok(Duration::from_secs(amount)),
        "m" => amount
            .checked_mul(60)
            .map(Duration::from_secs)
            .ok_or_else(invalid),
        "h" => amount
            .checked_mul(3_600)
            .map(Duration::from_secs)
            .ok_or_else(invalid),
        _ => Err(invalid()),
    }
}

/// The single positional argument of `dnscache-stats`.
pub fn destination_arg<I: IntoIterator<Item = String>>(args: I) -> Result<String, CliError> {
    let mut args = args.into_iter();
    match (args.next(), args.next()) {
        (Some(dest), None) if !dest.starts_with('-') => Ok(dest),
        _ => Err(CliError::Usage(
            "dnscache-stats <destination>  (a ./path, /path, or graphite host[:port])",
        )),
    }
}

/// The optional input file of `dnscache-slowlogs`; stdin when absent.
pub fn input_arg<I: IntoIterator<Item = String>>(args: I) -> Result<Option<PathBuf>, CliError> {
    let mut args = args.into_iter();
    match (args.next(), args.next()) {
        (None, _) => Ok(None),
        (Some(path), None) if !path.starts_with('-') => Ok(Some(PathBuf::from(path))),
        _ => Err(CliError::Usage("dnscache-slowlogs [log-file]")),
    }
}
