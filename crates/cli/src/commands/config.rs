use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::ExposeSecret;
use slotline_core::config::{AppConfig, LoadOptions};
use toml::Value;

struct Field {
    key: &'static str,
    value: String,
    env_keys: &'static [&'static str],
}

fn field(key: &'static str, value: impl Into<String>, env_keys: &'static [&'static str]) -> Field {
    Field { key, value: value.into(), env_keys }
}

pub fn run(config_path: Option<&Path>) -> String {
    let options = LoadOptions {
        config_path: config_path.map(Path::to_path_buf),
        skip_credential_checks: true,
        ..LoadOptions::default()
    };
    let config = match AppConfig::load(options) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path(config_path);
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in fields(&config) {
        let source = field_source(
            field.key,
            field.env_keys,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(field.key, &field.value, source));
    }

    lines.join("\n")
}

fn fields(config: &AppConfig) -> Vec<Field> {
    vec![
        field("llm.base_url", &config.llm.base_url, &["SLOTLINE_LLM_BASE_URL"]),
        field(
            "llm.api_key",
            redact_token(config.llm.api_key.expose_secret()),
            &["SLOTLINE_LLM_API_KEY", "GROQ_API_KEY"],
        ),
        field("llm.model", &config.llm.model, &["SLOTLINE_LLM_MODEL"]),
        field("llm.temperature", config.llm.temperature.to_string(), &["SLOTLINE_LLM_TEMPERATURE"]),
        field("llm.max_tokens", config.llm.max_tokens.to_string(), &["SLOTLINE_LLM_MAX_TOKENS"]),
        field(
            "llm.timeout_secs",
            config.llm.timeout_secs.to_string(),
            &["SLOTLINE_LLM_TIMEOUT_SECS"],
        ),
        field("twilio.account_sid", &config.twilio.account_sid, &["SLOTLINE_TWILIO_ACCOUNT_SID"]),
        field(
            "twilio.auth_token",
            redact_token(config.twilio.auth_token.expose_secret()),
            &["SLOTLINE_TWILIO_AUTH_TOKEN"],
        ),
        field("twilio.from_number", &config.twilio.from_number, &["SLOTLINE_TWILIO_FROM_NUMBER"]),
        field("twilio.base_url", &config.twilio.base_url, &["SLOTLINE_TWILIO_BASE_URL"]),
        field(
            "calendly.api_token",
            redact_token(config.calendly.api_token.expose_secret()),
            &["SLOTLINE_CALENDLY_API_TOKEN"],
        ),
        field(
            "calendly.user_uri",
            config.calendly.user_uri.as_deref().unwrap_or("<unset>"),
            &["SLOTLINE_CALENDLY_USER_URI"],
        ),
        field(
            "calendly.event_type_uri",
            config.calendly.event_type_uri.as_deref().unwrap_or("<unset>"),
            &["SLOTLINE_CALENDLY_EVENT_TYPE_URI"],
        ),
        field(
            "calendly.event_type_index",
            config.calendly.event_type_index.to_string(),
            &["SLOTLINE_CALENDLY_EVENT_TYPE_INDEX"],
        ),
        field("calendly.base_url", &config.calendly.base_url, &["SLOTLINE_CALENDLY_BASE_URL"]),
        field(
            "scheduling.timezone",
            &config.scheduling.timezone,
            &["SLOTLINE_SCHEDULING_TIMEZONE"],
        ),
        field(
            "scheduling.open_hour",
            config.scheduling.open_hour.to_string(),
            &["SLOTLINE_SCHEDULING_OPEN_HOUR"],
        ),
        field(
            "scheduling.close_hour",
            config.scheduling.close_hour.to_string(),
            &["SLOTLINE_SCHEDULING_CLOSE_HOUR"],
        ),
        field(
            "scheduling.max_days_ahead",
            config.scheduling.max_days_ahead.to_string(),
            &["SLOTLINE_SCHEDULING_MAX_DAYS_AHEAD"],
        ),
        field(
            "scheduling.appointment_minutes",
            config.scheduling.appointment_minutes.to_string(),
            &["SLOTLINE_SCHEDULING_APPOINTMENT_MINUTES"],
        ),
        field(
            "pipeline.stage_timeout_secs",
            config.pipeline.stage_timeout_secs.to_string(),
            &["SLOTLINE_PIPELINE_STAGE_TIMEOUT_SECS"],
        ),
        field(
            "pipeline.history_turns",
            config.pipeline.history_turns.to_string(),
            &["SLOTLINE_PIPELINE_HISTORY_TURNS"],
        ),
        field(
            "pipeline.workers",
            config.pipeline.workers.to_string(),
            &["SLOTLINE_PIPELINE_WORKERS"],
        ),
        field(
            "pipeline.queue_capacity",
            config.pipeline.queue_capacity.to_string(),
            &["SLOTLINE_PIPELINE_QUEUE_CAPACITY"],
        ),
        field(
            "sessions.ttl_secs",
            config.sessions.ttl_secs.to_string(),
            &["SLOTLINE_SESSIONS_TTL_SECS"],
        ),
        field(
            "sessions.eviction_interval_secs",
            config.sessions.eviction_interval_secs.to_string(),
            &["SLOTLINE_SESSIONS_EVICTION_INTERVAL_SECS"],
        ),
        field(
            "server.bind_address",
            &config.server.bind_address,
            &["SLOTLINE_SERVER_BIND_ADDRESS"],
        ),
        field("server.port", config.server.port.to_string(), &["SLOTLINE_SERVER_PORT"]),
        field(
            "server.graceful_shutdown_secs",
            config.server.graceful_shutdown_secs.to_string(),
            &["SLOTLINE_SERVER_GRACEFUL_SHUTDOWN_SECS"],
        ),
        field(
            "logging.level",
            &config.logging.level,
            &["SLOTLINE_LOGGING_LEVEL", "SLOTLINE_LOG_LEVEL"],
        ),
        field(
            "logging.format",
            format!("{:?}", config.logging.format),
            &["SLOTLINE_LOGGING_FORMAT", "SLOTLINE_LOG_FORMAT"],
        ),
    ]
}

fn detect_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return path.exists().then(|| path.to_path_buf());
    }

    let root = PathBuf::from("slotline.toml");
    if root.exists() {
        return Some(root);
    }

    let nested = PathBuf::from("config/slotline.toml");
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

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
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

/// Keeps a recognisable key prefix (`gsk_`, `sk-`) and hides the rest.
fn redact_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some(index) = trimmed.find(|ch: char| ch == '_' || ch == '-') {
        if index <= 4 {
            return format!("{}***", &trimmed[..=index]);
        }
    }

    "<redacted>".to_string()
}
