use callsync_core::config::{AppConfig, LoadOptions};
use callsync_core::TokenRefresher;
use callsync_server::oauth::OAuthRefresher;
use callsync_server::platform::build_http_client;
use secrecy::ExposeSecret;
use serde::Serialize;

use super::CommandResult;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool, exercise_refresh: bool) -> CommandResult {
    run_with(LoadOptions::default(), json_output, exercise_refresh)
}

pub fn run_with(options: LoadOptions, json_output: bool, exercise_refresh: bool) -> CommandResult {
    let report = build_report(options, exercise_refresh);
    let exit_code = if report.overall_status == CheckStatus::Fail { 1 } else { 0 };

    if json_output {
        let output = serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
        return CommandResult { exit_code, output };
    }

    CommandResult { exit_code, output: render_human(&report) }
}

fn build_report(options: LoadOptions, exercise_refresh: bool) -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(options) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            let credentials = check_platform_credentials(&config);
            let credentials_ready = credentials.status == CheckStatus::Pass;
            checks.push(credentials);
            checks.push(if !credentials_ready {
                skipped("token_refresh", "skipped because platform credentials are incomplete")
            } else if !exercise_refresh {
                skipped(
                    "token_refresh",
                    "skipped; pass --refresh to exchange the refresh token (it may be rotated)",
                )
            } else {
                check_token_refresh(&config)
            });
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            checks.push(skipped(
                "platform_credentials",
                "skipped because configuration did not load",
            ));
            checks.push(skipped("token_refresh", "skipped because configuration did not load"));
        }
    }

    let any_fail = checks.iter().any(|check| check.status == CheckStatus::Fail);
    let overall_status = if any_fail { CheckStatus::Fail } else { CheckStatus::Pass };
    let summary = if any_fail {
        "doctor: one or more readiness checks failed".to_string()
    } else {
        "doctor: no readiness check failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn skipped(name: &'static str, details: &str) -> DoctorCheck {
    DoctorCheck { name, status: CheckStatus::Skipped, details: details.to_string() }
}

fn check_platform_credentials(config: &AppConfig) -> DoctorCheck {
    let platform = &config.platform;
    let present = |value: Option<&str>| value.is_some_and(|value| !value.trim().is_empty());

    let missing: Vec<&str> = [
        ("platform.domain", present(platform.domain.as_deref())),
        ("platform.client_id", present(platform.client_id.as_deref())),
        (
            "platform.client_secret",
            present(platform.client_secret.as_ref().map(|secret| secret.expose_secret())),
        ),
        (
            "platform.refresh_token",
            present(platform.refresh_token.as_ref().map(|secret| secret.expose_secret())),
        ),
    ]
    .into_iter()
    .filter_map(|(key, is_present)| (!is_present).then_some(key))
    .collect();

    if missing.is_empty() {
        DoctorCheck {
            name: "platform_credentials",
            status: CheckStatus::Pass,
            details: "domain, client credentials and refresh token are configured".to_string(),
        }
    } else {
        DoctorCheck {
            name: "platform_credentials",
            status: CheckStatus::Fail,
            details: format!("missing: {}", missing.join(", ")),
        }
    }
}

fn check_token_refresh(config: &AppConfig) -> DoctorCheck {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return DoctorCheck {
                name: "token_refresh",
                status: CheckStatus::Fail,
                details: format!("failed to initialize async runtime: {error}"),
            };
        }
    };

    let result = runtime.block_on(async {
        let refresh_token = config
            .platform
            .refresh_token
            .as_ref()
            .ok_or_else(|| "no refresh token configured".to_string())?;
        let http = build_http_client(&config.platform)
            .map_err(|error| format!("failed to build http client: {error}"))?;
        let pair = OAuthRefresher::new(http, &config.platform)
            .refresh(refresh_token)
            .await
            .map_err(|error| error.to_string())?;

        Ok::<bool, String>(pair.refresh_token.expose_secret() != refresh_token.expose_secret())
    });

    match result {
        Ok(rotated) => DoctorCheck {
            name: "token_refresh",
            status: CheckStatus::Pass,
            details: if rotated {
                "access token issued; the platform rotated the refresh token, update the configured value"
                    .to_string()
            } else {
                "access token issued".to_string()
            },
        },
        Err(error) => DoctorCheck { name: "token_refresh", status: CheckStatus::Fail, details: error },
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
