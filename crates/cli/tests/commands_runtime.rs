use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use serde_json::Value;
use slotline_cli::commands::{config, doctor, simulate};
use tempfile::TempDir;

const CREDENTIALS: [(&str, &str); 6] = [
    ("SLOTLINE_LLM_API_KEY", "gsk_test"),
    ("SLOTLINE_TWILIO_ACCOUNT_SID", "AC0123456789"),
    ("SLOTLINE_TWILIO_AUTH_TOKEN", "twilio-secret"),
    ("SLOTLINE_TWILIO_FROM_NUMBER", "+15550001111"),
    ("SLOTLINE_CALENDLY_API_TOKEN", "calendly-secret"),
    ("SLOTLINE_CALENDLY_USER_URI", "https://api.calendly.com/users/U1"),
];

#[test]
fn config_attributes_sources_and_redacts_secrets() {
    let dir = TempDir::new().expect("temp dir");
    let path = write_file(
        &dir,
        "slotline.toml",
        "[llm]\napi_key = \"gsk_supersecret\"\nmodel = \"llama-3.1-8b-instant\"\n",
    );

    with_env(&[("SLOTLINE_SERVER_PORT", "9000")], || {
        let output = config::run(Some(&path));

        assert!(output.starts_with("effective config"), "unexpected output: {output}");
        assert!(output.contains("- llm.api_key = gsk_*** (source: file ("));
        assert!(output.contains("- llm.model = llama-3.1-8b-instant (source: file ("));
        assert!(output.contains("- server.port = 9000 (source: env (SLOTLINE_SERVER_PORT))"));
        assert!(output.contains("- scheduling.timezone = America/New_York (source: default)"));
        assert!(!output.contains("supersecret"));
    });
}

#[test]
fn config_reports_invalid_environment() {
    with_env(&[("SLOTLINE_SERVER_PORT", "not-a-port")], || {
        let output = config::run(Some(&missing_path()));
        assert!(output.starts_with("config validation failed"), "unexpected output: {output}");
        assert!(output.contains("SLOTLINE_SERVER_PORT"));
    });
}

#[test]
fn doctor_fails_without_credentials_but_checks_structure() {
    with_env(&[], || {
        let payload = parse_payload(&doctor::run(Some(&missing_path()), true));

        assert_eq!(payload["overall_status"], "fail");
        assert_eq!(check(&payload, "config_validation")["status"], "pass");
        assert_eq!(check(&payload, "provider_credentials")["status"], "fail");
        assert_eq!(check(&payload, "calendar_event_type")["status"], "fail");
        assert_eq!(check(&payload, "business_rules")["status"], "pass");
    });
}

#[test]
fn doctor_passes_with_complete_environment() {
    with_env(&CREDENTIALS, || {
        let payload = parse_payload(&doctor::run(Some(&missing_path()), true));

        assert_eq!(payload["overall_status"], "pass", "report: {payload}");
        assert_eq!(payload["checks"].as_array().map(Vec::len), Some(5));
    });
}

#[test]
fn doctor_skips_dependent_checks_when_config_is_invalid() {
    with_env(&[("SLOTLINE_SCHEDULING_TIMEZONE", "Mars/Olympus_Mons")], || {
        let payload = parse_payload(&doctor::run(Some(&missing_path()), true));

        assert_eq!(payload["overall_status"], "fail");
        assert_eq!(check(&payload, "config_validation")["status"], "fail");
        for name in ["provider_credentials", "calendar_event_type", "business_rules", "http_client"]
        {
            assert_eq!(check(&payload, name)["status"], "skipped", "check {name}");
        }
    });
}

#[test]
fn doctor_human_output_marks_each_check() {
    with_env(&[], || {
        let output = doctor::run(Some(&missing_path()), false);

        assert!(output.starts_with("doctor: one or more readiness checks failed"));
        assert!(output.contains("- [ok] config_validation:"));
        assert!(output.contains("- [fail] provider_credentials:"));
    });
}

#[test]
fn simulate_demo_books_then_handles_clash_and_weekend() {
    with_env(&[], || {
        let result = simulate::run(Some(&missing_path()), None, false);
        assert_eq!(result.exit_code, 0, "output: {}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "simulate");
        assert_eq!(payload["status"], "ok");

        let transcript = payload["message"].as_str().unwrap_or_default();
        let outcomes: Vec<&str> = transcript
            .lines()
            .filter_map(|line| line.trim_start().strip_prefix('['))
            .filter_map(|rest| rest.split(']').next())
            .collect();
        assert_eq!(
            outcomes,
            vec!["needs_more_info", "booked", "slot_unavailable", "datetime_rejected"]
        );
        assert!(transcript.contains("Your appointment is confirmed!"));
        assert!(transcript.contains("How about these alternatives:"));
        assert!(transcript.ends_with("bookings: 1"));

        let details = &payload["details"];
        assert_eq!(details["phone"], "+15552345678");
        assert_eq!(details["bookings"], 1);
        let labels: Vec<&str> = details["turns"]
            .as_array()
            .map(|turns| turns.iter().filter_map(|turn| turn["outcome"].as_str()).collect())
            .unwrap_or_default();
        assert_eq!(labels, outcomes);
        assert_eq!(details["turns"][1]["state"], "completed");
        assert!(details["messages_sent"].as_u64().is_some_and(|sent| sent >= 5));
    });
}

#[test]
fn simulate_replays_script_file() {
    let dir = TempDir::new().expect("temp dir");
    let script = write_file(
        &dir,
        "script.toml",
        "phone = \"call me maybe\"\n\n[[turns]]\nuser = \"hello\"\n",
    );

    with_env(&[], || {
        let result = simulate::run(Some(&missing_path()), Some(&script), false);
        assert_eq!(result.exit_code, 0, "output: {}", result.output);

        let payload = parse_payload(&result.output);
        let transcript = payload["message"].as_str().unwrap_or_default();
        assert!(transcript.contains("[phone_rejected] state=- (model not consulted)"));
        assert!(transcript.ends_with("bookings: 0"));
        assert_eq!(payload["details"]["turns"][0]["state"], Value::Null);
        assert_eq!(payload["details"]["turns"][0]["model_consulted"], false);
    });
}

#[test]
fn simulate_reports_unreadable_script() {
    with_env(&[], || {
        let result = simulate::run(Some(&missing_path()), Some(&missing_path()), false);
        assert_eq!(result.exit_code, 3);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "script");
        assert!(payload.get("details").is_none());
    });
}

#[test]
fn simulate_returns_config_failure_code() {
    with_env(&[("SLOTLINE_PIPELINE_WORKERS", "many")], || {
        let result = simulate::run(Some(&missing_path()), None, false);
        assert_eq!(result.exit_code, 2);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["error_class"], "config_validation");
    });
}

fn check<'a>(payload: &'a Value, name: &str) -> &'a Value {
    payload["checks"]
        .as_array()
        .and_then(|checks| checks.iter().find(|check| check["name"] == name))
        .unwrap_or_else(|| panic!("missing check {name} in {payload}"))
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn write_file(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, contents).expect("write file");
    path
}

/// An explicit path that does not exist keeps a stray `slotline.toml` in the
/// working directory out of the test.
fn missing_path() -> PathBuf {
    Path::new(env!("CARGO_TARGET_TMPDIR")).join("slotline-missing.toml")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard = match ENV_LOCK.get_or_init(|| Mutex::new(())).lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };

    let keys = [
        "GROQ_API_KEY",
        "SLOTLINE_LLM_BASE_URL",
        "SLOTLINE_LLM_API_KEY",
        "SLOTLINE_LLM_MODEL",
        "SLOTLINE_LLM_TEMPERATURE",
        "SLOTLINE_LLM_MAX_TOKENS",
        "SLOTLINE_LLM_TIMEOUT_SECS",
        "SLOTLINE_TWILIO_ACCOUNT_SID",
        "SLOTLINE_TWILIO_AUTH_TOKEN",
        "SLOTLINE_TWILIO_FROM_NUMBER",
        "SLOTLINE_TWILIO_BASE_URL",
        "SLOTLINE_CALENDLY_API_TOKEN",
        "SLOTLINE_CALENDLY_USER_URI",
        "SLOTLINE_CALENDLY_EVENT_TYPE_URI",
        "SLOTLINE_CALENDLY_EVENT_TYPE_INDEX",
        "SLOTLINE_CALENDLY_BASE_URL",
        "SLOTLINE_SCHEDULING_TIMEZONE",
        "SLOTLINE_SCHEDULING_OPEN_HOUR",
        "SLOTLINE_SCHEDULING_CLOSE_HOUR",
        "SLOTLINE_SCHEDULING_MAX_DAYS_AHEAD",
        "SLOTLINE_SCHEDULING_APPOINTMENT_MINUTES",
        "SLOTLINE_PIPELINE_STAGE_TIMEOUT_SECS",
        "SLOTLINE_PIPELINE_HISTORY_TURNS",
        "SLOTLINE_PIPELINE_WORKERS",
        "SLOTLINE_PIPELINE_QUEUE_CAPACITY",
        "SLOTLINE_SESSIONS_TTL_SECS",
        "SLOTLINE_SESSIONS_EVICTION_INTERVAL_SECS",
        "SLOTLINE_SERVER_BIND_ADDRESS",
        "SLOTLINE_SERVER_PORT",
        "SLOTLINE_SERVER_GRACEFUL_SHUTDOWN_SECS",
        "SLOTLINE_LOGGING_LEVEL",
        "SLOTLINE_LOGGING_FORMAT",
        "SLOTLINE_LOG_LEVEL",
        "SLOTLINE_LOG_FORMAT",
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
