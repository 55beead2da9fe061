use std::env;
use std::fs;
use std::sync::{Mutex, OnceLock};

use callsync_cli::commands::{config, doctor};
use callsync_core::config::LoadOptions;
use serde_json::{json, Value};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const FULL_CREDENTIALS: &[(&str, &str)] = &[
    ("BITRIX_DOMAIN", "https://acme.bitrix24.com"),
    ("BITRIX_CLIENT_ID", "local.app"),
    ("BITRIX_CLIENT_SECRET", "client-secret-value-0042"),
    ("BITRIX_REFRESH_TOKEN", "refresh-seed"),
];

#[test]
fn config_redacts_secrets_and_attributes_env_sources() {
    with_env(FULL_CREDENTIALS, || {
        let result = config::run_with(no_file());
        assert_eq!(result.exit_code, 0, "expected config to render");

        let output = result.output;
        assert!(output.contains(
            "- platform.domain = https://acme.bitrix24.com (source: env (BITRIX_DOMAIN))"
        ));
        assert!(output.contains("- platform.client_secret = ***0042"));
        assert!(output.contains("- platform.refresh_token = <redacted>"));
        assert!(!output.contains("client-secret-value"), "secret leaked: {output}");
        assert!(!output.contains("refresh-seed"), "refresh token leaked: {output}");
        assert!(output.contains("- server.port = 3000 (source: default)"));
        assert!(output.contains("- queue.capacity = unbounded (source: default)"));
    });
}

#[test]
fn config_attributes_file_sources() {
    with_env(&[], || {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("callsync.toml");
        fs::write(
            &path,
            "[queue]\ncapacity = 5\noverflow = \"wait\"\n\n[fields.deal]\nduration = \"UF_CRM_CUSTOM\"\n",
        )
        .expect("config file should be written");

        let result = config::run_with(LoadOptions {
            config_path: Some(path.clone()),
            ..LoadOptions::default()
        });
        assert_eq!(result.exit_code, 0);

        let file_source = format!("(source: file ({}))", path.display());
        assert!(result.output.contains(&format!("- queue.capacity = 5 {file_source}")));
        assert!(result.output.contains(&format!("- queue.overflow = Wait {file_source}")));
        assert!(result
            .output
            .contains(&format!("- fields.deal.duration = UF_CRM_CUSTOM {file_source}")));
        assert!(result
            .output
            .contains("- fields.contact.duration = UF_CRM_66CBE81B02C06 (source: default)"));
    });
}

#[test]
fn config_returns_structured_validation_failure() {
    with_env(&[("CALLSYNC_QUEUE_CAPACITY", "0")], || {
        let result = config::run_with(no_file());
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "config");
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn doctor_flags_missing_platform_credentials() {
    with_env(&[("BITRIX_DOMAIN", "https://acme.bitrix24.com")], || {
        let result = doctor::run_with(no_file(), true, true);
        assert_eq!(result.exit_code, 1);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["overall_status"], "fail");
        assert_eq!(check(&payload, "config_validation")["status"], "pass");

        let credentials = check(&payload, "platform_credentials");
        assert_eq!(credentials["status"], "fail");
        let details = credentials["details"].as_str().unwrap_or_default();
        assert!(details.contains("platform.client_id"));
        assert!(details.contains("platform.refresh_token"));
        assert!(!details.contains("platform.domain"));

        assert_eq!(check(&payload, "token_refresh")["status"], "skipped");
    });
}

#[test]
fn doctor_leaves_refresh_token_alone_without_flag() {
    with_env(FULL_CREDENTIALS, || {
        let result = doctor::run_with(no_file(), true, false);
        assert_eq!(result.exit_code, 0);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["overall_status"], "pass");
        assert_eq!(check(&payload, "platform_credentials")["status"], "pass");
        assert_eq!(check(&payload, "token_refresh")["status"], "skipped");
    });
}

#[test]
fn doctor_exchanges_refresh_token_against_platform() {
    let runtime = tokio::runtime::Runtime::new().expect("runtime");
    let server = runtime.block_on(async {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/oauth/token/"))
            .and(query_param("grant_type", "refresh_token"))
            .and(query_param("refresh_token", "refresh-seed"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "acc-1",
                "refresh_token": "refresh-next"
            })))
            .expect(1)
            .mount(&server)
            .await;
        server
    });

    let domain = server.uri();
    let mut vars = FULL_CREDENTIALS.to_vec();
    vars[0] = ("BITRIX_DOMAIN", domain.as_str());

    with_env(&vars, || {
        let result = doctor::run_with(no_file(), false, true);
        assert_eq!(result.exit_code, 0, "unexpected report: {}", result.output);
        assert!(result.output.contains("- [ok] token_refresh: access token issued"));
        assert!(result.output.contains("rotated the refresh token"));
    });

    runtime.block_on(server.verify());
}

#[test]
fn doctor_reports_rejected_refresh_token() {
    let runtime = tokio::runtime::Runtime::new().expect("runtime");
    let server = runtime.block_on(async {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/oauth/token/"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "invalid_grant",
                "error_description": "Refresh token has expired"
            })))
            .mount(&server)
            .await;
        server
    });

    let domain = server.uri();
    let mut vars = FULL_CREDENTIALS.to_vec();
    vars[0] = ("BITRIX_DOMAIN", domain.as_str());

    with_env(&vars, || {
        let result = doctor::run_with(no_file(), true, true);
        assert_eq!(result.exit_code, 1);

        let payload = parse_payload(&result.output);
        let refresh = check(&payload, "token_refresh");
        assert_eq!(refresh["status"], "fail");
        assert!(refresh["details"]
            .as_str()
            .unwrap_or_default()
            .contains("Refresh token has expired"));
    });
}

fn no_file() -> LoadOptions {
    LoadOptions {
        config_path: Some("/nonexistent/callsync.toml".into()),
        ..LoadOptions::default()
    }
}

fn check<'a>(payload: &'a Value, name: &str) -> &'a Value {
    payload["checks"]
        .as_array()
        .and_then(|checks| checks.iter().find(|check| check["name"] == name))
        .unwrap_or_else(|| panic!("check `{name}` should be reported"))
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "CALLSYNC_SERVER_BIND_ADDRESS",
        "CALLSYNC_SERVER_PORT",
        "CALLSYNC_SERVER_GRACEFUL_SHUTDOWN_SECS",
        "CALLSYNC_PLATFORM_DOMAIN",
        "CALLSYNC_PLATFORM_CLIENT_ID",
        "CALLSYNC_PLATFORM_CLIENT_SECRET",
        "CALLSYNC_PLATFORM_REFRESH_TOKEN",
        "CALLSYNC_PLATFORM_TIMEOUT_SECS",
        "CALLSYNC_QUEUE_CAPACITY",
        "CALLSYNC_QUEUE_OVERFLOW",
        "CALLSYNC_LOGGING_LEVEL",
        "CALLSYNC_LOGGING_FORMAT",
        "CALLSYNC_LOG_LEVEL",
        "CALLSYNC_LOG_FORMAT",
        "BITRIX_DOMAIN",
        "BITRIX_CLIENT_ID",
        "BITRIX_CLIENT_SECRET",
        "BITRIX_REFRESH_TOKEN",
        "PORT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
