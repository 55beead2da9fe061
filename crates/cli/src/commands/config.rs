use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use callsync_core::config::{AppConfig, LoadOptions};
use callsync_core::OutcomeFieldCodes;
use secrecy::{ExposeSecret, SecretString};
use toml::Value;

use super::CommandResult;

pub fn run() -> CommandResult {
    run_with(LoadOptions::default())
}

pub fn run_with(options: LoadOptions) -> CommandResult {
    let config_file_path = detect_config_path(options.config_path.as_deref());
    let config = match AppConfig::load(options) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "config",
                "config_validation",
                format!("config validation failed: {error}"),
                2,
            )
        }
    };

    let sources = Sources {
        doc: load_config_file_doc(config_file_path.as_deref()),
        path: config_file_path,
    };
    let mut lines = vec![
        "effective config (source precedence: overrides > env > file > default):".to_string(),
    ];

    let server = &config.server;
    lines.push(sources.line(
        "server.bind_address",
        &server.bind_address,
        &["CALLSYNC_SERVER_BIND_ADDRESS"],
    ));
    lines.push(sources.line(
        "server.port",
        &server.port.to_string(),
        &["CALLSYNC_SERVER_PORT", "PORT"],
    ));
    lines.push(sources.line(
        "server.graceful_shutdown_secs",
        &server.graceful_shutdown_secs.to_string(),
        &["CALLSYNC_SERVER_GRACEFUL_SHUTDOWN_SECS"],
    ));

    let platform = &config.platform;
    lines.push(sources.line(
        "platform.domain",
        platform.domain.as_deref().unwrap_or("<unset>"),
        &["CALLSYNC_PLATFORM_DOMAIN", "BITRIX_DOMAIN"],
    ));
    lines.push(sources.line(
        "platform.client_id",
        platform.client_id.as_deref().unwrap_or("<unset>"),
        &["CALLSYNC_PLATFORM_CLIENT_ID", "BITRIX_CLIENT_ID"],
    ));
    lines.push(sources.line(
        "platform.client_secret",
        &redact_secret(platform.client_secret.as_ref()),
        &["CALLSYNC_PLATFORM_CLIENT_SECRET", "BITRIX_CLIENT_SECRET"],
    ));
    lines.push(sources.line(
        "platform.refresh_token",
        &redact_secret(platform.refresh_token.as_ref()),
        &["CALLSYNC_PLATFORM_REFRESH_TOKEN", "BITRIX_REFRESH_TOKEN"],
    ));
    lines.push(sources.line(
        "platform.timeout_secs",
        &platform.timeout_secs.map_or_else(|| "<unset>".to_string(), |secs| secs.to_string()),
        &["CALLSYNC_PLATFORM_TIMEOUT_SECS"],
    ));

    lines.push(sources.line(
        "queue.capacity",
        &config.queue.capacity.map_or_else(|| "unbounded".to_string(), |cap| cap.to_string()),
        &["CALLSYNC_QUEUE_CAPACITY"],
    ));
    lines.push(sources.line(
        "queue.overflow",
        &format!("{:?}", config.queue.overflow),
        &["CALLSYNC_QUEUE_OVERFLOW"],
    ));

    push_field_codes(&mut lines, &sources, "fields.deal", &config.fields.deal);
    push_field_codes(&mut lines, &sources, "fields.contact", &config.fields.contact);

    lines.push(sources.line(
        "logging.level",
        &config.logging.level,
        &["CALLSYNC_LOGGING_LEVEL", "CALLSYNC_LOG_LEVEL"],
    ));
    lines.push(sources.line(
        "logging.format",
        &format!("{:?}", config.logging.format),
        &["CALLSYNC_LOGGING_FORMAT", "CALLSYNC_LOG_FORMAT"],
    ));

    CommandResult::text(lines.join("\n"))
}

struct Sources {
    doc: Option<Value>,
    path: Option<PathBuf>,
}

impl Sources {
    fn line(&self, key_path: &str, value: &str, env_keys: &[&str]) -> String {
        render_line(key_path, value, self.field_source(key_path, env_keys))
    }

    fn field_source(&self, key_path: &str, env_keys: &[&str]) -> String {
        if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
            return format!("env ({env_key})");
        }

        if let Some(doc) = &self.doc {
            if contains_path(doc, key_path) {
                let file_path = self
                    .path
                    .as_ref()
                    .map(|path| path.display().to_string())
                    .unwrap_or_else(|| "config file".to_string());
                return format!("file ({file_path})");
            }
        }

        "default".to_string()
    }
}

fn push_field_codes(
    lines: &mut Vec<String>,
    sources: &Sources,
    prefix: &str,
    codes: &OutcomeFieldCodes,
) {
    for (name, code) in [
        ("failure_reason", &codes.failure_reason),
        ("duration", &codes.duration),
        ("start_date", &codes.start_date),
    ] {
        lines.push(sources.line(&format!("{prefix}.{name}"), code, &[]));
    }
}

fn detect_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return path.exists().then(|| path.to_path_buf());
    }

    let root = PathBuf::from("callsync.toml");
    if root.exists() {
        return Some(root);
    }

    let nested = PathBuf::from("config/callsync.toml");
    if nested.exists() {
        return Some(nested);
    }

    None
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

/// Shows only the last four characters of long secrets.
fn redact_secret(secret: Option<&SecretString>) -> String {
    let Some(secret) = secret else {
        return "<unset>".to_string();
    };
    let trimmed = secret.expose_secret().trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    let chars: Vec<char> = trimmed.chars().collect();
    if chars.len() < 16 {
        return "<redacted>".to_string();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("***{tail}")
}
