use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::crm::{FieldMapping, OutcomeFieldCodes};

/// Upper bound for a bounded dispatch channel.
pub const MAX_QUEUE_CAPACITY: usize = 1_000_000;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub platform: PlatformConfig,
    pub queue: QueueConfig,
    pub fields: FieldMapping,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

/// Platform credentials. Missing values are not a startup error: the token
/// refresh or the API request that needs them fails instead.
#[derive(Clone, Debug, Default)]
pub struct PlatformConfig {
    pub domain: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<SecretString>,
    pub refresh_token: Option<SecretString>,
    pub timeout_secs: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueueConfig {
    pub capacity: Option<usize>,
    pub overflow: OverflowPolicy,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    Reject,
    Wait,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub port: Option<u16>,
    pub log_level: Option<String>,
    pub platform_domain: Option<String>,
    pub platform_client_id: Option<String>,
    pub platform_client_secret: Option<String>,
    pub platform_refresh_token: Option<String>,
    pub queue_capacity: Option<usize>,
    pub queue_overflow: Option<OverflowPolicy>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                bind_address: "0.0.0.0".to_string(),
                port: 3000,
                graceful_shutdown_secs: 15,
            },
            platform: PlatformConfig::default(),
            queue: QueueConfig::default(),
            fields: FieldMapping::default(),
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { capacity: None, overflow: OverflowPolicy::Reject }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for OverflowPolicy {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "reject" => Ok(Self::Reject),
            "wait" => Ok(Self::Wait),
            other => Err(ConfigError::Validation(format!(
                "unsupported queue overflow policy `{other}` (expected reject|wait)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl PlatformConfig {
    /// Domain without a trailing slash, ready for path concatenation.
    pub fn base_url(&self) -> Option<&str> {
        self.domain.as_deref().map(|domain| domain.trim().trim_end_matches('/'))
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("callsync.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(platform) = patch.platform {
            if let Some(domain) = platform.domain {
                self.platform.domain = Some(domain);
            }
            if let Some(client_id) = platform.client_id {
                self.platform.client_id = Some(client_id);
            }
            if let Some(client_secret_value) = platform.client_secret {
                self.platform.client_secret = Some(secret_value(client_secret_value));
            }
            if let Some(refresh_token_value) = platform.refresh_token {
                self.platform.refresh_token = Some(secret_value(refresh_token_value));
            }
            if let Some(timeout_secs) = platform.timeout_secs {
                self.platform.timeout_secs = Some(timeout_secs);
            }
        }

        if let Some(queue) = patch.queue {
            if let Some(capacity) = queue.capacity {
                self.queue.capacity = Some(capacity);
            }
            if let Some(overflow) = queue.overflow {
                self.queue.overflow = overflow;
            }
        }

        if let Some(fields) = patch.fields {
            if let Some(deal) = fields.deal {
                deal.apply_to(&mut self.fields.deal);
            }
            if let Some(contact) = fields.contact {
                contact.apply_to(&mut self.fields.contact);
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("CALLSYNC_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some((key, value)) = read_env_with_alias("CALLSYNC_SERVER_PORT", "PORT") {
            self.server.port = parse_u16(key, &value)?;
        }
        if let Some(value) = read_env("CALLSYNC_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("CALLSYNC_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some((_, value)) = read_env_with_alias("CALLSYNC_PLATFORM_DOMAIN", "BITRIX_DOMAIN") {
            self.platform.domain = Some(value);
        }
        if let Some((_, value)) =
            read_env_with_alias("CALLSYNC_PLATFORM_CLIENT_ID", "BITRIX_CLIENT_ID")
        {
            self.platform.client_id = Some(value);
        }
        if let Some((_, value)) =
            read_env_with_alias("CALLSYNC_PLATFORM_CLIENT_SECRET", "BITRIX_CLIENT_SECRET")
        {
            self.platform.client_secret = Some(secret_value(value));
        }
        if let Some((_, value)) =
            read_env_with_alias("CALLSYNC_PLATFORM_REFRESH_TOKEN", "BITRIX_REFRESH_TOKEN")
        {
            self.platform.refresh_token = Some(secret_value(value));
        }
        if let Some(value) = read_env("CALLSYNC_PLATFORM_TIMEOUT_SECS") {
            self.platform.timeout_secs = Some(parse_u64("CALLSYNC_PLATFORM_TIMEOUT_SECS", &value)?);
        }

        if let Some(value) = read_env("CALLSYNC_QUEUE_CAPACITY") {
            self.queue.capacity = Some(parse_usize("CALLSYNC_QUEUE_CAPACITY", &value)?);
        }
        if let Some(value) = read_env("CALLSYNC_QUEUE_OVERFLOW") {
            self.queue.overflow = value.parse()?;
        }

        let log_level =
            read_env("CALLSYNC_LOGGING_LEVEL").or_else(|| read_env("CALLSYNC_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("CALLSYNC_LOGGING_FORMAT").or_else(|| read_env("CALLSYNC_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(domain) = overrides.platform_domain {
            self.platform.domain = Some(domain);
        }
        if let Some(client_id) = overrides.platform_client_id {
            self.platform.client_id = Some(client_id);
        }
        if let Some(client_secret) = overrides.platform_client_secret {
            self.platform.client_secret = Some(secret_value(client_secret));
        }
        if let Some(refresh_token) = overrides.platform_refresh_token {
            self.platform.refresh_token = Some(secret_value(refresh_token));
        }
        if let Some(capacity) = overrides.queue_capacity {
            self.queue.capacity = Some(capacity);
        }
        if let Some(overflow) = overrides.queue_overflow {
            self.queue.overflow = overflow;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_server(&self.server)?;
        validate_platform(&self.platform)?;
        validate_queue(&self.queue)?;
        validate_fields(&self.fields)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("callsync.toml"), PathBuf::from("config/callsync.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_platform(platform: &PlatformConfig) -> Result<(), ConfigError> {
    if let Some(domain) = &platform.domain {
        let domain = domain.trim();
        if !domain.starts_with("http://") && !domain.starts_with("https://") {
            return Err(ConfigError::Validation(
                "platform.domain must start with http:// or https:// (e.g. https://example.bitrix24.com)"
                    .to_string(),
            ));
        }
    }

    if let Some(timeout_secs) = platform.timeout_secs {
        if timeout_secs == 0 || timeout_secs > 300 {
            return Err(ConfigError::Validation(
                "platform.timeout_secs must be in range 1..=300".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_queue(queue: &QueueConfig) -> Result<(), ConfigError> {
    match queue.capacity {
        Some(0) => Err(ConfigError::Validation(
            "queue.capacity must be greater than zero; omit it for an unbounded queue".to_string(),
        )),
        Some(capacity) if capacity > MAX_QUEUE_CAPACITY => Err(ConfigError::Validation(format!(
            "queue.capacity must be at most {MAX_QUEUE_CAPACITY}; omit it for an unbounded queue"
        ))),
        _ => Ok(()),
    }
}

fn validate_fields(fields: &FieldMapping) -> Result<(), ConfigError> {
    for (record, codes) in [("deal", &fields.deal), ("contact", &fields.contact)] {
        let entries = [
            ("failure_reason", &codes.failure_reason),
            ("duration", &codes.duration),
            ("start_date", &codes.start_date),
        ];
        for (name, code) in entries {
            if code.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "fields.{record}.{name} must name a CRM field code"
                )));
            }
        }
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

/// The prefixed key wins over the platform's conventional variable name.
fn read_env_with_alias(
    key: &'static str,
    alias: &'static str,
) -> Option<(&'static str, String)> {
    read_env(key).map(|value| (key, value)).or_else(|| read_env(alias).map(|value| (alias, value)))
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.trim().parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.trim().parse::<usize>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    server: Option<ServerPatch>,
    platform: Option<PlatformPatch>,
    queue: Option<QueuePatch>,
    fields: Option<FieldsPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct PlatformPatch {
    domain: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
    refresh_token: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct QueuePatch {
    capacity: Option<usize>,
    overflow: Option<OverflowPolicy>,
}

#[derive(Debug, Default, Deserialize)]
struct FieldsPatch {
    deal: Option<FieldCodesPatch>,
    contact: Option<FieldCodesPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct FieldCodesPatch {
    failure_reason: Option<String>,
    duration: Option<String>,
    start_date: Option<String>,
}

impl FieldCodesPatch {
    fn apply_to(self, codes: &mut OutcomeFieldCodes) {
        if let Some(failure_reason) = self.failure_reason {
            codes.failure_reason = failure_reason;
        }
        if let Some(duration) = self.duration {
            codes.duration = duration;
        }
        if let Some(start_date) = self.start_date {
            codes.start_date = start_date;
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
