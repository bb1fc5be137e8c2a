use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use chrono_tz::Tz;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::scheduling::BusinessRules;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub twilio: TwilioConfig,
    pub calendly: CalendlyConfig,
    pub scheduling: SchedulingConfig,
    pub pipeline: PipelineConfig,
    pub sessions: SessionsConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: SecretString,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: SecretString,
    pub from_number: String,
    pub base_url: String,
}

#[derive(Clone, Debug)]
pub struct CalendlyConfig {
    pub api_token: SecretString,
    pub user_uri: Option<String>,
    /// Pins a specific event type; when unset, `event_type_index` picks one
    /// from the user's active event types.
    pub event_type_uri: Option<String>,
    pub event_type_index: usize,
    pub base_url: String,
}

#[derive(Clone, Debug)]
pub struct SchedulingConfig {
    pub timezone: String,
    pub open_hour: u32,
    pub close_hour: u32,
    pub max_days_ahead: i64,
    pub appointment_minutes: u32,
}

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub stage_timeout_secs: u64,
    pub history_turns: usize,
    pub workers: usize,
    pub queue_capacity: usize,
}

#[derive(Clone, Debug)]
pub struct SessionsConfig {
    pub ttl_secs: u64,
    pub eviction_interval_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
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
    pub log_level: Option<String>,
    pub log_format: Option<LogFormat>,
    pub llm_model: Option<String>,
    pub llm_api_key: Option<String>,
    pub twilio_auth_token: Option<String>,
    pub calendly_api_token: Option<String>,
    pub timezone: Option<String>,
    pub server_port: Option<u16>,
    pub stage_timeout_secs: Option<u64>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    /// Offline commands run against in-process doubles and need no provider
    /// credentials.
    pub skip_credential_checks: bool,
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
            llm: LlmConfig {
                base_url: "https://api.groq.com/openai/v1".to_string(),
                api_key: String::new().into(),
                model: "llama-3.1-70b-versatile".to_string(),
                temperature: 0.3,
                max_tokens: 1024,
                timeout_secs: 10,
            },
            twilio: TwilioConfig {
                account_sid: String::new(),
                auth_token: String::new().into(),
                from_number: String::new(),
                base_url: "https://api.twilio.com".to_string(),
            },
            calendly: CalendlyConfig {
                api_token: String::new().into(),
                user_uri: None,
                event_type_uri: None,
                event_type_index: 0,
                base_url: "https://api.calendly.com".to_string(),
            },
            scheduling: SchedulingConfig {
                timezone: "America/New_York".to_string(),
                open_hour: 9,
                close_hour: 18,
                max_days_ahead: 180,
                appointment_minutes: 30,
            },
            pipeline: PipelineConfig {
                stage_timeout_secs: 10,
                history_turns: 3,
                workers: 8,
                queue_capacity: 256,
            },
            sessions: SessionsConfig { ttl_secs: 86_400, eviction_interval_secs: 300 },
            server: ServerConfig {
                bind_address: "0.0.0.0".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
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

impl SchedulingConfig {
    pub fn business_rules(&self) -> Result<BusinessRules, ConfigError> {
        let timezone = self.timezone.trim().parse::<Tz>().map_err(|_| {
            ConfigError::Validation(format!(
                "scheduling.timezone `{}` is not an IANA timezone name (e.g. America/New_York)",
                self.timezone
            ))
        })?;
        Ok(BusinessRules {
            timezone,
            open_hour: self.open_hour,
            close_hour: self.close_hour,
            max_days_ahead: self.max_days_ahead,
        })
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
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("slotline.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;
        if !options.skip_credential_checks {
            config.validate_credentials()?;
        }

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(llm) = patch.llm {
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = base_url;
            }
            if let Some(api_key) = llm.api_key {
                self.llm.api_key = api_key.into();
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(temperature) = llm.temperature {
                self.llm.temperature = temperature;
            }
            if let Some(max_tokens) = llm.max_tokens {
                self.llm.max_tokens = max_tokens;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
        }

        if let Some(twilio) = patch.twilio {
            if let Some(account_sid) = twilio.account_sid {
                self.twilio.account_sid = account_sid;
            }
            if let Some(auth_token) = twilio.auth_token {
                self.twilio.auth_token = auth_token.into();
            }
            if let Some(from_number) = twilio.from_number {
                self.twilio.from_number = from_number;
            }
            if let Some(base_url) = twilio.base_url {
                self.twilio.base_url = base_url;
            }
        }

        if let Some(calendly) = patch.calendly {
            if let Some(api_token) = calendly.api_token {
                self.calendly.api_token = api_token.into();
            }
            if let Some(user_uri) = calendly.user_uri {
                self.calendly.user_uri = Some(user_uri);
            }
            if let Some(event_type_uri) = calendly.event_type_uri {
                self.calendly.event_type_uri = Some(event_type_uri);
            }
            if let Some(event_type_index) = calendly.event_type_index {
                self.calendly.event_type_index = event_type_index;
            }
            if let Some(base_url) = calendly.base_url {
                self.calendly.base_url = base_url;
            }
        }

        if let Some(scheduling) = patch.scheduling {
            if let Some(timezone) = scheduling.timezone {
                self.scheduling.timezone = timezone;
            }
            if let Some(open_hour) = scheduling.open_hour {
                self.scheduling.open_hour = open_hour;
            }
            if let Some(close_hour) = scheduling.close_hour {
                self.scheduling.close_hour = close_hour;
            }
            if let Some(max_days_ahead) = scheduling.max_days_ahead {
                self.scheduling.max_days_ahead = max_days_ahead;
            }
            if let Some(appointment_minutes) = scheduling.appointment_minutes {
                self.scheduling.appointment_minutes = appointment_minutes;
            }
        }

        if let Some(pipeline) = patch.pipeline {
            if let Some(stage_timeout_secs) = pipeline.stage_timeout_secs {
                self.pipeline.stage_timeout_secs = stage_timeout_secs;
            }
            if let Some(history_turns) = pipeline.history_turns {
                self.pipeline.history_turns = history_turns;
            }
            if let Some(workers) = pipeline.workers {
                self.pipeline.workers = workers;
            }
            if let Some(queue_capacity) = pipeline.queue_capacity {
                self.pipeline.queue_capacity = queue_capacity;
            }
        }

        if let Some(sessions) = patch.sessions {
            if let Some(ttl_secs) = sessions.ttl_secs {
                self.sessions.ttl_secs = ttl_secs;
            }
            if let Some(eviction_interval_secs) = sessions.eviction_interval_secs {
                self.sessions.eviction_interval_secs = eviction_interval_secs;
            }
        }

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
        if let Some(value) = read_env("SLOTLINE_LLM_BASE_URL") {
            self.llm.base_url = value;
        }
        // The bare provider variable is what most deployments already export.
        if let Some(value) = read_env("SLOTLINE_LLM_API_KEY").or_else(|| read_env("GROQ_API_KEY")) {
            self.llm.api_key = value.into();
        }
        if let Some(value) = read_env("SLOTLINE_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("SLOTLINE_LLM_TEMPERATURE") {
            self.llm.temperature = parse_f32("SLOTLINE_LLM_TEMPERATURE", &value)?;
        }
        if let Some(value) = read_env("SLOTLINE_LLM_MAX_TOKENS") {
            self.llm.max_tokens = parse_u32("SLOTLINE_LLM_MAX_TOKENS", &value)?;
        }
        if let Some(value) = read_env("SLOTLINE_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("SLOTLINE_LLM_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("SLOTLINE_TWILIO_ACCOUNT_SID") {
            self.twilio.account_sid = value;
        }
        if let Some(value) = read_env("SLOTLINE_TWILIO_AUTH_TOKEN") {
            self.twilio.auth_token = value.into();
        }
        if let Some(value) = read_env("SLOTLINE_TWILIO_FROM_NUMBER") {
            self.twilio.from_number = value;
        }
        if let Some(value) = read_env("SLOTLINE_TWILIO_BASE_URL") {
            self.twilio.base_url = value;
        }

        if let Some(value) = read_env("SLOTLINE_CALENDLY_API_TOKEN") {
            self.calendly.api_token = value.into();
        }
        if let Some(value) = read_env("SLOTLINE_CALENDLY_USER_URI") {
            self.calendly.user_uri = Some(value);
        }
        if let Some(value) = read_env("SLOTLINE_CALENDLY_EVENT_TYPE_URI") {
            self.calendly.event_type_uri = Some(value);
        }
        if let Some(value) = read_env("SLOTLINE_CALENDLY_EVENT_TYPE_INDEX") {
            self.calendly.event_type_index =
                parse_usize("SLOTLINE_CALENDLY_EVENT_TYPE_INDEX", &value)?;
        }
        if let Some(value) = read_env("SLOTLINE_CALENDLY_BASE_URL") {
            self.calendly.base_url = value;
        }

        if let Some(value) = read_env("SLOTLINE_SCHEDULING_TIMEZONE") {
            self.scheduling.timezone = value;
        }
        if let Some(value) = read_env("SLOTLINE_SCHEDULING_OPEN_HOUR") {
            self.scheduling.open_hour = parse_u32("SLOTLINE_SCHEDULING_OPEN_HOUR", &value)?;
        }
        if let Some(value) = read_env("SLOTLINE_SCHEDULING_CLOSE_HOUR") {
            self.scheduling.close_hour = parse_u32("SLOTLINE_SCHEDULING_CLOSE_HOUR", &value)?;
        }
        if let Some(value) = read_env("SLOTLINE_SCHEDULING_MAX_DAYS_AHEAD") {
            self.scheduling.max_days_ahead =
                parse_i64("SLOTLINE_SCHEDULING_MAX_DAYS_AHEAD", &value)?;
        }
        if let Some(value) = read_env("SLOTLINE_SCHEDULING_APPOINTMENT_MINUTES") {
            self.scheduling.appointment_minutes =
                parse_u32("SLOTLINE_SCHEDULING_APPOINTMENT_MINUTES", &value)?;
        }

        if let Some(value) = read_env("SLOTLINE_PIPELINE_STAGE_TIMEOUT_SECS") {
            self.pipeline.stage_timeout_secs =
                parse_u64("SLOTLINE_PIPELINE_STAGE_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("SLOTLINE_PIPELINE_HISTORY_TURNS") {
            self.pipeline.history_turns = parse_usize("SLOTLINE_PIPELINE_HISTORY_TURNS", &value)?;
        }
        if let Some(value) = read_env("SLOTLINE_PIPELINE_WORKERS") {
            self.pipeline.workers = parse_usize("SLOTLINE_PIPELINE_WORKERS", &value)?;
        }
        if let Some(value) = read_env("SLOTLINE_PIPELINE_QUEUE_CAPACITY") {
            self.pipeline.queue_capacity =
                parse_usize("SLOTLINE_PIPELINE_QUEUE_CAPACITY", &value)?;
        }

        if let Some(value) = read_env("SLOTLINE_SESSIONS_TTL_SECS") {
            self.sessions.ttl_secs = parse_u64("SLOTLINE_SESSIONS_TTL_SECS", &value)?;
        }
        if let Some(value) = read_env("SLOTLINE_SESSIONS_EVICTION_INTERVAL_SECS") {
            self.sessions.eviction_interval_secs =
                parse_u64("SLOTLINE_SESSIONS_EVICTION_INTERVAL_SECS", &value)?;
        }

        if let Some(value) = read_env("SLOTLINE_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("SLOTLINE_SERVER_PORT") {
            self.server.port = parse_u16("SLOTLINE_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("SLOTLINE_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("SLOTLINE_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level =
            read_env("SLOTLINE_LOGGING_LEVEL").or_else(|| read_env("SLOTLINE_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("SLOTLINE_LOGGING_FORMAT").or_else(|| read_env("SLOTLINE_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(log_format) = overrides.log_format {
            self.logging.format = log_format;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(llm_api_key) = overrides.llm_api_key {
            self.llm.api_key = llm_api_key.into();
        }
        if let Some(twilio_auth_token) = overrides.twilio_auth_token {
            self.twilio.auth_token = twilio_auth_token.into();
        }
        if let Some(calendly_api_token) = overrides.calendly_api_token {
            self.calendly.api_token = calendly_api_token.into();
        }
        if let Some(timezone) = overrides.timezone {
            self.scheduling.timezone = timezone;
        }
        if let Some(server_port) = overrides.server_port {
            self.server.port = server_port;
        }
        if let Some(stage_timeout_secs) = overrides.stage_timeout_secs {
            self.pipeline.stage_timeout_secs = stage_timeout_secs;
        }
    }

    /// Structural checks that hold regardless of which providers are wired in.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_llm(&self.llm)?;
        validate_scheduling(&self.scheduling)?;
        validate_pipeline(&self.pipeline)?;
        validate_sessions(&self.sessions)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }

    /// Provider credentials needed to talk to the real model, SMS and calendar
    /// services.
    pub fn validate_credentials(&self) -> Result<(), ConfigError> {
        if self.llm.api_key.expose_secret().trim().is_empty() {
            return Err(ConfigError::Validation(
                "llm.api_key is required (set SLOTLINE_LLM_API_KEY or GROQ_API_KEY)".to_string(),
            ));
        }

        let sid = self.twilio.account_sid.trim();
        if sid.is_empty() {
            return Err(ConfigError::Validation(
                "twilio.account_sid is required. Find it on the Twilio console dashboard"
                    .to_string(),
            ));
        }
        if !sid.starts_with("AC") {
            return Err(ConfigError::Validation(
                "twilio.account_sid must start with `AC`".to_string(),
            ));
        }
        if self.twilio.auth_token.expose_secret().trim().is_empty() {
            return Err(ConfigError::Validation("twilio.auth_token is required".to_string()));
        }
        if !self.twilio.from_number.trim().starts_with('+') {
            return Err(ConfigError::Validation(
                "twilio.from_number must be an E.164 number such as +15551234567".to_string(),
            ));
        }

        if self.calendly.api_token.expose_secret().trim().is_empty() {
            return Err(ConfigError::Validation(
                "calendly.api_token is required. Create a personal access token under Calendly > Integrations > API & Webhooks".to_string(),
            ));
        }

        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("slotline.toml"), PathBuf::from("config/slotline.toml")]
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

fn validate_http_url(field: &str, value: &str) -> Result<(), ConfigError> {
    if value.starts_with("http://") || value.starts_with("https://") {
        Ok(())
    } else {
        Err(ConfigError::Validation(format!("{field} must start with http:// or https://")))
    }
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    validate_http_url("llm.base_url", &llm.base_url)?;
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }
    if !(0.0..=2.0).contains(&llm.temperature) {
        return Err(ConfigError::Validation(
            "llm.temperature must be in range 0.0..=2.0".to_string(),
        ));
    }
    if llm.max_tokens == 0 {
        return Err(ConfigError::Validation(
            "llm.max_tokens must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

const MAX_DAYS_AHEAD: i64 = 3_650;
const MAX_WORKERS: usize = 1_024;
const MAX_QUEUE_CAPACITY: usize = 100_000;
const MAX_SESSION_TTL_SECS: u64 = 31_536_000;

fn validate_scheduling(scheduling: &SchedulingConfig) -> Result<(), ConfigError> {
    scheduling.business_rules()?;
    if scheduling.open_hour >= scheduling.close_hour || scheduling.close_hour > 24 {
        return Err(ConfigError::Validation(
            "scheduling.open_hour must be before scheduling.close_hour (both within 0..=24)"
                .to_string(),
        ));
    }
    if scheduling.max_days_ahead <= 0 || scheduling.max_days_ahead > MAX_DAYS_AHEAD {
        return Err(ConfigError::Validation(format!(
            "scheduling.max_days_ahead must be in range 1..={MAX_DAYS_AHEAD}"
        )));
    }
    if scheduling.appointment_minutes == 0 {
        return Err(ConfigError::Validation(
            "scheduling.appointment_minutes must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

fn validate_pipeline(pipeline: &PipelineConfig) -> Result<(), ConfigError> {
    if pipeline.stage_timeout_secs == 0 || pipeline.stage_timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "pipeline.stage_timeout_secs must be in range 1..=300".to_string(),
        ));
    }
    if pipeline.workers == 0 || pipeline.workers > MAX_WORKERS {
        return Err(ConfigError::Validation(format!(
            "pipeline.workers must be in range 1..={MAX_WORKERS}"
        )));
    }
    if pipeline.queue_capacity == 0 || pipeline.queue_capacity > MAX_QUEUE_CAPACITY {
        return Err(ConfigError::Validation(format!(
            "pipeline.queue_capacity must be in range 1..={MAX_QUEUE_CAPACITY}"
        )));
    }
    Ok(())
}

fn validate_sessions(sessions: &SessionsConfig) -> Result<(), ConfigError> {
    if sessions.ttl_secs == 0 || sessions.ttl_secs > MAX_SESSION_TTL_SECS {
        return Err(ConfigError::Validation(format!(
            "sessions.ttl_secs must be in range 1..={MAX_SESSION_TTL_SECS}"
        )));
    }
    if sessions.eviction_interval_secs == 0 {
        return Err(ConfigError::Validation(
            "sessions.eviction_interval_secs must be greater than zero".to_string(),
        ));
    }
    Ok(())
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

fn invalid_override(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() }
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| invalid_override(key, value))
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| invalid_override(key, value))
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| invalid_override(key, value))
}

fn parse_i64(key: &str, value: &str) -> Result<i64, ConfigError> {
    value.parse::<i64>().map_err(|_| invalid_override(key, value))
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.parse::<usize>().map_err(|_| invalid_override(key, value))
}

fn parse_f32(key: &str, value: &str) -> Result<f32, ConfigError> {
    value.parse::<f32>().map_err(|_| invalid_override(key, value))
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    llm: Option<LlmPatch>,
    twilio: Option<TwilioPatch>,
    calendly: Option<CalendlyPatch>,
    scheduling: Option<SchedulingPatch>,
    pipeline: Option<PipelinePatch>,
    sessions: Option<SessionsPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    base_url: Option<String>,
    api_key: Option<String>,
    model: Option<String>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct TwilioPatch {
    account_sid: Option<String>,
    auth_token: Option<String>,
    from_number: Option<String>,
    base_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct CalendlyPatch {
    api_token: Option<String>,
    user_uri: Option<String>,
    event_type_uri: Option<String>,
    event_type_index: Option<usize>,
    base_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct SchedulingPatch {
    timezone: Option<String>,
    open_hour: Option<u32>,
    close_hour: Option<u32>,
    max_days_ahead: Option<i64>,
    appointment_minutes: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct PipelinePatch {
    stage_timeout_secs: Option<u64>,
    history_turns: Option<usize>,
    workers: Option<usize>,
    queue_capacity: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct SessionsPatch {
    ttl_secs: Option<u64>,
    eviction_interval_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
