//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::{str::FromStr, time::Duration};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::application::fetch::RetryPolicy;
use crate::cache::{CacheConfig, RealtimeConfig};

pub use cli::{
    CliArgs, Command, GetArgs, GlobalOverrides, OperationArg, QueryArgs, WatchArgs,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "storeops";
const ENV_PREFIX: &str = "STOREOPS";
const DEFAULT_API_BASE_URL: &str = "http://127.0.0.1:3000";
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_EVENTS_PATH: &str = "/api/events";

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub api: ApiSettings,
    pub cache: CacheConfig,
    pub retry: RetryPolicy,
    pub realtime: RealtimeConfig,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub base_url: Url,
    pub token: Option<String>,
    pub request_timeout: Duration,
    pub events_path: String,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_overrides(&cli.overrides);

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    api: RawApiSettings,
    cache: CacheConfig,
    retry: RetryPolicy,
    realtime: RealtimeConfig,
    logging: RawLoggingSettings,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawApiSettings {
    base_url: Option<String>,
    token: Option<String>,
    request_timeout_ms: Option<u64>,
    events_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &GlobalOverrides) {
        if let Some(url) = overrides.api_base_url.as_ref() {
            self.api.base_url = Some(url.clone());
        }
        if let Some(token) = overrides.api_token.as_ref() {
            self.api.token = Some(token.clone());
        }
        if let Some(timeout) = overrides.api_timeout_ms {
            self.api.request_timeout_ms = Some(timeout);
        }
        if overrides.no_cache {
            self.cache.enabled = false;
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            api,
            cache,
            retry,
            realtime,
            logging,
        } = raw;

        Ok(Self {
            api: build_api_settings(api)?,
            cache: validate_cache(cache)?,
            retry: validate_retry(retry)?,
            realtime: validate_realtime(realtime)?,
            logging: build_logging_settings(logging)?,
        })
    }
}

fn build_api_settings(api: RawApiSettings) -> Result<ApiSettings, LoadError> {
    let raw_url = api
        .base_url
        .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string());
    let base_url = Url::parse(raw_url.trim())
        .map_err(|err| LoadError::invalid("api.base_url", format!("failed to parse: {err}")))?;
    if !matches!(base_url.scheme(), "http" | "https") {
        return Err(LoadError::invalid(
            "api.base_url",
            format!("unsupported scheme `{}`", base_url.scheme()),
        ));
    }

    let timeout_ms = api.request_timeout_ms.unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS);
    if timeout_ms == 0 {
        return Err(LoadError::invalid(
            "api.request_timeout_ms",
            "must be greater than zero",
        ));
    }

    let events_path = api
        .events_path
        .map(|path| path.trim().to_string())
        .unwrap_or_else(|| DEFAULT_EVENTS_PATH.to_string());
    if events_path.is_empty() {
        return Err(LoadError::invalid("api.events_path", "must not be empty"));
    }

    let token = api.token.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });

    Ok(ApiSettings {
        base_url,
        token,
        request_timeout: Duration::from_millis(timeout_ms),
        events_path,
    })
}

fn validate_cache(cache: CacheConfig) -> Result<CacheConfig, LoadError> {
    if cache.namespace.trim().is_empty() {
        return Err(LoadError::invalid("cache.namespace", "must not be empty"));
    }
    if cache.maintenance_interval_ms == 0 {
        return Err(LoadError::invalid(
            "cache.maintenance_interval_ms",
            "must be greater than zero",
        ));
    }
    if cache.consume_batch_limit == 0 {
        return Err(LoadError::invalid(
            "cache.consume_batch_limit",
            "must be greater than zero",
        ));
    }
    if cache.event_queue_limit == 0 {
        return Err(LoadError::invalid(
            "cache.event_queue_limit",
            "must be greater than zero",
        ));
    }
    Ok(cache)
}

fn validate_retry(retry: RetryPolicy) -> Result<RetryPolicy, LoadError> {
    if retry.max_attempts == 0 {
        return Err(LoadError::invalid(
            "retry.max_attempts",
            "must be greater than zero",
        ));
    }
    if retry.base_delay_ms > retry.max_delay_ms {
        return Err(LoadError::invalid(
            "retry.base_delay_ms",
            "must not exceed retry.max_delay_ms",
        ));
    }
    Ok(retry)
}

fn validate_realtime(realtime: RealtimeConfig) -> Result<RealtimeConfig, LoadError> {
    if realtime.reconnect_interval_ms == 0 {
        return Err(LoadError::invalid(
            "realtime.reconnect_interval_ms",
            "must be greater than zero",
        ));
    }
    if realtime.heartbeat_interval_secs == 0 {
        return Err(LoadError::invalid(
            "realtime.heartbeat_interval_secs",
            "must be greater than zero",
        ));
    }
    if realtime.session_ceiling_secs == 0 {
        return Err(LoadError::invalid(
            "realtime.session_ceiling_secs",
            "must be greater than zero",
        ));
    }
    Ok(realtime)
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}
