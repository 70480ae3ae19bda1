//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing or any
//! value is malformed. The database URL is wrapped in `secrecy::SecretString`
//! to prevent log leaks.

use crate::engine::{ClassSettings, PollSettings, RetryPolicy, SweepSettings};
use crate::error::{Error, Result};
use crate::renderer::RendererKind;
use secrecy::SecretString;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(Error::Config(format!(
                "LOG_FORMAT must be text or json, got {other:?}"
            ))),
        }
    }
}

/// Poll cadence and parallelism for one job class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassConfig {
    pub poll_interval: Duration,
    pub parallel_limit: usize,
}

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    pub renderer_url: String,
    pub renderer_kind: RendererKind,
    pub uploads_dir: PathBuf,
    pub convert: ClassConfig,
    pub batch: ClassConfig,
    pub sweep_interval: Duration,
    /// How long rendered output is kept after a job finished.
    pub sweep_threshold: Duration,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup`, which returns a variable's value
    /// or `None` when it is unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let duration = |name: &str, default_secs| duration_var(name, var(name), default_secs);
        let limit = |name: &str| limit_var(name, var(name));

        let database_url = var("DATABASE_URL").ok_or_else(|| {
            Error::Config("required environment variable DATABASE_URL is not set".to_string())
        })?;

        let config = Self {
            database_url: SecretString::from(database_url),
            renderer_url: var("RENDERER_URL")
                .unwrap_or_else(|| "http://localhost:8090".to_string()),
            renderer_kind: parse_or(var("RENDERER_KIND"), RendererKind::Gotenberg)?,
            uploads_dir: var("UPLOADS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./uploads")),
            convert: ClassConfig {
                poll_interval: duration("POLL_CONVERT_INTERVAL", 5)?,
                parallel_limit: limit("PARALLEL_CONVERT_LIMIT")?,
            },
            batch: ClassConfig {
                poll_interval: duration("POLL_BATCH_INTERVAL", 5)?,
                parallel_limit: limit("PARALLEL_BATCH_LIMIT")?,
            },
            sweep_interval: duration("SWEEP_INTERVAL", 30)?,
            sweep_threshold: duration("SWEEP_THRESHOLD", 60)?,
            otel_endpoint: var("OTEL_ENDPOINT"),
            log_level: var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            log_format: parse_or(var("LOG_FORMAT"), LogFormat::Text)?,
        };

        // Surfaces a short threshold now rather than when the sweeper starts.
        config.sweep_settings()?;
        Ok(config)
    }

    pub fn convert_settings(&self) -> ClassSettings {
        ClassSettings {
            parallel_limit: self.convert.parallel_limit,
            poll: PollSettings::new(self.convert.poll_interval, RetryPolicy::CONVERSION),
        }
    }

    /// Batches are not retried: a failed batch is resubmitted by the client.
    pub fn batch_settings(&self) -> ClassSettings {
        ClassSettings {
            parallel_limit: self.batch.parallel_limit,
            poll: PollSettings::new(self.batch.poll_interval, RetryPolicy::none()),
        }
    }

    pub fn sweep_settings(&self) -> Result<SweepSettings> {
        SweepSettings::new(self.sweep_interval, self.sweep_threshold)
    }

    /// Log the effective configuration. The database URL is never printed.
    pub fn log_summary(&self) {
        info!(
            renderer_url = %self.renderer_url,
            renderer_kind = %self.renderer_kind,
            uploads_dir = %self.uploads_dir.display(),
            convert_interval = ?self.convert.poll_interval,
            convert_limit = self.convert.parallel_limit,
            batch_interval = ?self.batch.poll_interval,
            batch_limit = self.batch.parallel_limit,
            sweep_interval = ?self.sweep_interval,
            sweep_threshold = ?self.sweep_threshold,
            otel = self.otel_endpoint.is_some(),
            "configuration loaded"
        );
    }
}

fn parse_or<T: FromStr<Err = Error>>(value: Option<String>, default: T) -> Result<T> {
    value.map_or(Ok(default), |v| v.trim().parse())
}

fn duration_var(name: &str, value: Option<String>, default_secs: u64) -> Result<Duration> {
    let duration = match value {
        Some(v) => parse_duration(&v).map_err(|e| Error::Config(format!("{name}: {e}")))?,
        None => Duration::from_secs(default_secs),
    };
    if duration.is_zero() {
        return Err(Error::Config(format!("{name} must be greater than zero")));
    }
    Ok(duration)
}

fn limit_var(name: &str, value: Option<String>) -> Result<usize> {
    let limit = match value {
        Some(v) => v
            .trim()
            .parse::<usize>()
            .map_err(|e| Error::Config(format!("{name}: {e}")))?,
        None => 15,
    };
    if limit == 0 {
        return Err(Error::Config(format!("{name} must be greater than zero")));
    }
    Ok(limit)
}

/// Parse `250ms`, `5s`, `2m`, `1h`, or a bare number of seconds.
pub fn parse_duration(input: &str) -> std::result::Result<Duration, String> {
    let input = input.trim();
    let split = input
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(input.len());
    let (digits, unit) = input.split_at(split);
    let n: u64 = digits
        .parse()
        .map_err(|_| format!("invalid duration {input:?}"))?;

    let secs = match unit {
        "ms" => return Ok(Duration::from_millis(n)),
        "" | "s" => Some(n),
        "m" => n.checked_mul(60),
        "h" => n.checked_mul(3600),
        other => return Err(format!("unknown duration unit {other:?} in {input:?}")),
    };
    secs.map(Duration::from_secs)
        .ok_or_else(|| format!("duration {input:?} is too large"))
}
