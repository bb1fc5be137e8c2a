use std::path::Path;
use std::time::Duration;

use serde::Serialize;
use slotline_core::config::{AppConfig, LoadOptions};

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

const DEPENDENT_CHECKS: [&str; 4] =
    ["provider_credentials", "calendar_event_type", "business_rules", "http_client"];

pub fn run(config_path: Option<&Path>, json_output: bool) -> String {
    let report = build_report(config_path);

    if json_output {
        return serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
    }

    render_human(&report)
}

fn build_report(config_path: Option<&Path>) -> DoctorReport {
    let mut checks = Vec::new();

    // Structure first, so a missing credential does not hide other problems.
    let options = LoadOptions {
        config_path: config_path.map(Path::to_path_buf),
        skip_credential_checks: true,
        ..LoadOptions::default()
    };
    match AppConfig::load(options) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_credentials(&config));
            checks.push(check_event_type(&config));
            checks.push(check_business_rules(&config));
            checks.push(check_http_client(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            for name in DEPENDENT_CHECKS {
                checks.push(DoctorCheck {
                    name,
                    status: CheckStatus::Skipped,
                    details: "skipped because configuration did not load".to_string(),
                });
            }
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_credentials(config: &AppConfig) -> DoctorCheck {
    match config.validate_credentials() {
        Ok(()) => DoctorCheck {
            name: "provider_credentials",
            status: CheckStatus::Pass,
            details: "model, SMS and calendar credentials present".to_string(),
        },
        Err(error) => DoctorCheck {
            name: "provider_credentials",
            status: CheckStatus::Fail,
            details: error.to_string(),
        },
    }
}

fn check_event_type(config: &AppConfig) -> DoctorCheck {
    let calendly = &config.calendly;
    match (&calendly.event_type_uri, &calendly.user_uri) {
        (Some(uri), _) => DoctorCheck {
            name: "calendar_event_type",
            status: CheckStatus::Pass,
            details: format!("pinned to `{uri}`"),
        },
        (None, Some(user)) => DoctorCheck {
            name: "calendar_event_type",
            status: CheckStatus::Pass,
            details: format!(
                "event type #{} of `{user}` resolved on first use",
                calendly.event_type_index
            ),
        },
        (None, None) => DoctorCheck {
            name: "calendar_event_type",
            status: CheckStatus::Fail,
            details: "set calendly.event_type_uri or calendly.user_uri".to_string(),
        },
    }
}

fn check_business_rules(config: &AppConfig) -> DoctorCheck {
    match config.scheduling.business_rules() {
        Ok(rules) => DoctorCheck {
            name: "business_rules",
            status: CheckStatus::Pass,
            details: format!(
                "weekdays {:02}:00-{:02}:00 {}, up to {} days ahead",
                rules.open_hour, rules.close_hour, rules.timezone, rules.max_days_ahead
            ),
        },
        Err(error) => DoctorCheck {
            name: "business_rules",
            status: CheckStatus::Fail,
            details: error.to_string(),
        },
    }
}

fn check_http_client(config: &AppConfig) -> DoctorCheck {
    match slotline_gateway::http_client(Duration::from_secs(config.llm.timeout_secs)) {
        Ok(_) => DoctorCheck {
            name: "http_client",
            status: CheckStatus::Pass,
            details: format!("TLS client ready ({}s timeout)", config.llm.timeout_secs),
        },
        Err(error) => DoctorCheck {
            name: "http_client",
            status: CheckStatus::Fail,
            details: error.to_string(),
        },
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
