use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub channel: ChannelConfig,
    pub engagement: EngagementConfig,
    pub scheduler: SchedulerConfig,
    pub crm: CrmConfig,
    pub calendar: CalendarConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ChannelConfig {
    /// Inbound content matching this sentinel resets the conversation.
    pub reset_command: String,
    /// Outbound delivery endpoint; when unset, sends are no-ops.
    pub gateway_url: Option<String>,
    pub api_token: Option<SecretString>,
}

#[derive(Clone, Debug)]
pub struct EngagementConfig {
    /// Debounce window W: a message arriving within W of the previous one
    /// postpones the batch flush.
    pub debounce_window_ms: u64,
    /// Age after which an in-flight per-lead claim counts as abandoned.
    pub flight_ttl_secs: u64,
    /// Minimum monthly bill for qualification.
    pub min_bill_value: i64,
}

#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    pub tick_interval_secs: u64,
    pub batch_limit: u32,
    /// Executing tasks whose claim is older than this are reclaimed.
    pub worker_claim_ttl_secs: u64,
    pub max_attempts: u32,
    pub retry_base_delay_secs: u64,
    pub retry_backoff_multiplier: u32,
    pub retry_max_delay_secs: u64,
}

#[derive(Clone, Debug)]
pub struct CrmConfig {
    pub enabled: bool,
    pub base_url: Option<String>,
    pub api_token: Option<SecretString>,
    pub webhook_secret: Option<SecretString>,
    /// External pipeline stage meaning "a human owns this lead now".
    pub human_attended_stage: String,
    pub handoff_pause_hours: u64,
    pub max_sync_attempts: u32,
    pub base_retry_delay_secs: u64,
    pub max_retry_delay_secs: u64,
}

#[derive(Clone, Debug)]
pub struct CalendarConfig {
    pub enabled: bool,
    pub base_url: Option<String>,
    pub api_token: Option<SecretString>,
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
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub channel_gateway_url: Option<String>,
    pub channel_api_token: Option<String>,
    pub crm_enabled: Option<bool>,
    pub crm_base_url: Option<String>,
    pub crm_api_token: Option<String>,
    pub crm_webhook_secret: Option<String>,
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
            database: DatabaseConfig {
                url: "sqlite://nurture.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            channel: ChannelConfig {
                reset_command: "#clear".to_string(),
                gateway_url: None,
                api_token: None,
            },
            engagement: EngagementConfig {
                debounce_window_ms: 10_000,
                flight_ttl_secs: 120,
                min_bill_value: 2000,
            },
            scheduler: SchedulerConfig {
                tick_interval_secs: 10,
                batch_limit: 25,
                worker_claim_ttl_secs: 300,
                max_attempts: 3,
                retry_base_delay_secs: 60,
                retry_backoff_multiplier: 2,
                retry_max_delay_secs: 3600,
            },
            crm: CrmConfig {
                enabled: false,
                base_url: None,
                api_token: None,
                webhook_secret: None,
                human_attended_stage: "human_attended".to_string(),
                handoff_pause_hours: 24,
                max_sync_attempts: 5,
                base_retry_delay_secs: 30,
                max_retry_delay_secs: 3600,
            },
            calendar: CalendarConfig { enabled: false, base_url: None, api_token: None },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
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

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("nurture.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
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

        if let Some(channel) = patch.channel {
            if let Some(reset_command) = channel.reset_command {
                self.channel.reset_command = reset_command;
            }
            if let Some(gateway_url) = channel.gateway_url {
                self.channel.gateway_url = Some(gateway_url);
            }
            if let Some(channel_api_token_value) = channel.api_token {
                self.channel.api_token = Some(secret_value(channel_api_token_value));
            }
        }

        if let Some(engagement) = patch.engagement {
            if let Some(debounce_window_ms) = engagement.debounce_window_ms {
                self.engagement.debounce_window_ms = debounce_window_ms;
            }
            if let Some(flight_ttl_secs) = engagement.flight_ttl_secs {
                self.engagement.flight_ttl_secs = flight_ttl_secs;
            }
            if let Some(min_bill_value) = engagement.min_bill_value {
                self.engagement.min_bill_value = min_bill_value;
            }
        }

        if let Some(scheduler) = patch.scheduler {
            if let Some(tick_interval_secs) = scheduler.tick_interval_secs {
                self.scheduler.tick_interval_secs = tick_interval_secs;
            }
            if let Some(batch_limit) = scheduler.batch_limit {
                self.scheduler.batch_limit = batch_limit;
            }
            if let Some(worker_claim_ttl_secs) = scheduler.worker_claim_ttl_secs {
                self.scheduler.worker_claim_ttl_secs = worker_claim_ttl_secs;
            }
            if let Some(max_attempts) = scheduler.max_attempts {
                self.scheduler.max_attempts = max_attempts;
            }
            if let Some(retry_base_delay_secs) = scheduler.retry_base_delay_secs {
                self.scheduler.retry_base_delay_secs = retry_base_delay_secs;
            }
            if let Some(retry_backoff_multiplier) = scheduler.retry_backoff_multiplier {
                self.scheduler.retry_backoff_multiplier = retry_backoff_multiplier;
            }
            if let Some(retry_max_delay_secs) = scheduler.retry_max_delay_secs {
                self.scheduler.retry_max_delay_secs = retry_max_delay_secs;
            }
        }

        if let Some(crm) = patch.crm {
            if let Some(enabled) = crm.enabled {
                self.crm.enabled = enabled;
            }
            if let Some(base_url) = crm.base_url {
                self.crm.base_url = Some(base_url);
            }
            if let Some(crm_api_token_value) = crm.api_token {
                self.crm.api_token = Some(secret_value(crm_api_token_value));
            }
            if let Some(crm_webhook_secret_value) = crm.webhook_secret {
                self.crm.webhook_secret = Some(secret_value(crm_webhook_secret_value));
            }
            if let Some(human_attended_stage) = crm.human_attended_stage {
                self.crm.human_attended_stage = human_attended_stage;
            }
            if let Some(handoff_pause_hours) = crm.handoff_pause_hours {
                self.crm.handoff_pause_hours = handoff_pause_hours;
            }
            if let Some(max_sync_attempts) = crm.max_sync_attempts {
                self.crm.max_sync_attempts = max_sync_attempts;
            }
            if let Some(base_retry_delay_secs) = crm.base_retry_delay_secs {
                self.crm.base_retry_delay_secs = base_retry_delay_secs;
            }
            if let Some(max_retry_delay_secs) = crm.max_retry_delay_secs {
                self.crm.max_retry_delay_secs = max_retry_delay_secs;
            }
        }

        if let Some(calendar) = patch.calendar {
            if let Some(enabled) = calendar.enabled {
                self.calendar.enabled = enabled;
            }
            if let Some(base_url) = calendar.base_url {
                self.calendar.base_url = Some(base_url);
            }
            if let Some(calendar_api_token_value) = calendar.api_token {
                self.calendar.api_token = Some(secret_value(calendar_api_token_value));
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
        if let Some(value) = read_env("NURTURE_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("NURTURE_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("NURTURE_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("NURTURE_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("NURTURE_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("NURTURE_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("NURTURE_SERVER_PORT") {
            self.server.port = parse_u16("NURTURE_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("NURTURE_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("NURTURE_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("NURTURE_CHANNEL_RESET_COMMAND") {
            self.channel.reset_command = value;
        }
        if let Some(value) = read_env("NURTURE_CHANNEL_GATEWAY_URL") {
            self.channel.gateway_url = Some(value);
        }
        if let Some(value) = read_env("NURTURE_CHANNEL_API_TOKEN") {
            self.channel.api_token = Some(secret_value(value));
        }

        if let Some(value) = read_env("NURTURE_ENGAGEMENT_DEBOUNCE_WINDOW_MS") {
            self.engagement.debounce_window_ms =
                parse_u64("NURTURE_ENGAGEMENT_DEBOUNCE_WINDOW_MS", &value)?;
        }
        if let Some(value) = read_env("NURTURE_ENGAGEMENT_FLIGHT_TTL_SECS") {
            self.engagement.flight_ttl_secs =
                parse_u64("NURTURE_ENGAGEMENT_FLIGHT_TTL_SECS", &value)?;
        }
        if let Some(value) = read_env("NURTURE_ENGAGEMENT_MIN_BILL_VALUE") {
            self.engagement.min_bill_value =
                parse_i64("NURTURE_ENGAGEMENT_MIN_BILL_VALUE", &value)?;
        }

        if let Some(value) = read_env("NURTURE_SCHEDULER_TICK_INTERVAL_SECS") {
            self.scheduler.tick_interval_secs =
                parse_u64("NURTURE_SCHEDULER_TICK_INTERVAL_SECS", &value)?;
        }
        if let Some(value) = read_env("NURTURE_SCHEDULER_BATCH_LIMIT") {
            self.scheduler.batch_limit = parse_u32("NURTURE_SCHEDULER_BATCH_LIMIT", &value)?;
        }
        if let Some(value) = read_env("NURTURE_SCHEDULER_WORKER_CLAIM_TTL_SECS") {
            self.scheduler.worker_claim_ttl_secs =
                parse_u64("NURTURE_SCHEDULER_WORKER_CLAIM_TTL_SECS", &value)?;
        }
        if let Some(value) = read_env("NURTURE_SCHEDULER_MAX_ATTEMPTS") {
            self.scheduler.max_attempts = parse_u32("NURTURE_SCHEDULER_MAX_ATTEMPTS", &value)?;
        }
        if let Some(value) = read_env("NURTURE_SCHEDULER_RETRY_BASE_DELAY_SECS") {
            self.scheduler.retry_base_delay_secs =
                parse_u64("NURTURE_SCHEDULER_RETRY_BASE_DELAY_SECS", &value)?;
        }
        if let Some(value) = read_env("NURTURE_SCHEDULER_RETRY_BACKOFF_MULTIPLIER") {
            self.scheduler.retry_backoff_multiplier =
                parse_u32("NURTURE_SCHEDULER_RETRY_BACKOFF_MULTIPLIER", &value)?;
        }
        if let Some(value) = read_env("NURTURE_SCHEDULER_RETRY_MAX_DELAY_SECS") {
            self.scheduler.retry_max_delay_secs =
                parse_u64("NURTURE_SCHEDULER_RETRY_MAX_DELAY_SECS", &value)?;
        }

        if let Some(value) = read_env("NURTURE_CRM_ENABLED") {
            self.crm.enabled = parse_bool("NURTURE_CRM_ENABLED", &value)?;
        }
        if let Some(value) = read_env("NURTURE_CRM_BASE_URL") {
            self.crm.base_url = Some(value);
        }
        if let Some(value) = read_env("NURTURE_CRM_API_TOKEN") {
            self.crm.api_token = Some(secret_value(value));
        }
        if let Some(value) = read_env("NURTURE_CRM_WEBHOOK_SECRET") {
            self.crm.webhook_secret = Some(secret_value(value));
        }
        if let Some(value) = read_env("NURTURE_CRM_HUMAN_ATTENDED_STAGE") {
            self.crm.human_attended_stage = value;
        }
        if let Some(value) = read_env("NURTURE_CRM_HANDOFF_PAUSE_HOURS") {
            self.crm.handoff_pause_hours = parse_u64("NURTURE_CRM_HANDOFF_PAUSE_HOURS", &value)?;
        }
        if let Some(value) = read_env("NURTURE_CRM_MAX_SYNC_ATTEMPTS") {
            self.crm.max_sync_attempts = parse_u32("NURTURE_CRM_MAX_SYNC_ATTEMPTS", &value)?;
        }
        if let Some(value) = read_env("NURTURE_CRM_BASE_RETRY_DELAY_SECS") {
            self.crm.base_retry_delay_secs =
                parse_u64("NURTURE_CRM_BASE_RETRY_DELAY_SECS", &value)?;
        }
        if let Some(value) = read_env("NURTURE_CRM_MAX_RETRY_DELAY_SECS") {
            self.crm.max_retry_delay_secs =
                parse_u64("NURTURE_CRM_MAX_RETRY_DELAY_SECS", &value)?;
        }

        if let Some(value) = read_env("NURTURE_CALENDAR_ENABLED") {
            self.calendar.enabled = parse_bool("NURTURE_CALENDAR_ENABLED", &value)?;
        }
        if let Some(value) = read_env("NURTURE_CALENDAR_BASE_URL") {
            self.calendar.base_url = Some(value);
        }
        if let Some(value) = read_env("NURTURE_CALENDAR_API_TOKEN") {
            self.calendar.api_token = Some(secret_value(value));
        }

        let log_level =
            read_env("NURTURE_LOGGING_LEVEL").or_else(|| read_env("NURTURE_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("NURTURE_LOGGING_FORMAT").or_else(|| read_env("NURTURE_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(gateway_url) = overrides.channel_gateway_url {
            self.channel.gateway_url = Some(gateway_url);
        }
        if let Some(channel_api_token) = overrides.channel_api_token {
            self.channel.api_token = Some(secret_value(channel_api_token));
        }
        if let Some(enabled) = overrides.crm_enabled {
            self.crm.enabled = enabled;
        }
        if let Some(base_url) = overrides.crm_base_url {
            self.crm.base_url = Some(base_url);
        }
        if let Some(crm_api_token) = overrides.crm_api_token {
            self.crm.api_token = Some(secret_value(crm_api_token));
        }
        if let Some(crm_webhook_secret) = overrides.crm_webhook_secret {
            self.crm.webhook_secret = Some(secret_value(crm_webhook_secret));
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_server(&self.server)?;
        validate_channel(&self.channel)?;
        validate_engagement(&self.engagement)?;
        validate_scheduler(&self.scheduler)?;
        validate_crm(&self.crm)?;
        validate_calendar(&self.calendar)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    if let Some(value) = read_env("NURTURE_CONFIG_PATH") {
        let path = PathBuf::from(value);
        return path.exists().then_some(path);
    }

    [PathBuf::from("nurture.toml"), PathBuf::from("config/nurture.toml")]
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

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
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

fn validate_channel(channel: &ChannelConfig) -> Result<(), ConfigError> {
    let reset = channel.reset_command.trim();
    if reset.is_empty() {
        return Err(ConfigError::Validation("channel.reset_command must not be empty".to_string()));
    }
    if reset.contains(char::is_whitespace) {
        return Err(ConfigError::Validation(
            "channel.reset_command must be a single token (no whitespace)".to_string(),
        ));
    }

    if let Some(gateway_url) = &channel.gateway_url {
        if !gateway_url.starts_with("http://") && !gateway_url.starts_with("https://") {
            return Err(ConfigError::Validation(
                "channel.gateway_url must start with http:// or https://".to_string(),
            ));
        }

        let missing_token = channel
            .api_token
            .as_ref()
            .map(|value| value.expose_secret().trim().is_empty())
            .unwrap_or(true);
        if missing_token {
            return Err(ConfigError::Validation(
                "channel.api_token is required when channel.gateway_url is set".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_engagement(engagement: &EngagementConfig) -> Result<(), ConfigError> {
    if engagement.debounce_window_ms < 100 || engagement.debounce_window_ms > 120_000 {
        return Err(ConfigError::Validation(
            "engagement.debounce_window_ms must be in range 100..=120000".to_string(),
        ));
    }

    if engagement.flight_ttl_secs == 0 || engagement.flight_ttl_secs > 3600 {
        return Err(ConfigError::Validation(
            "engagement.flight_ttl_secs must be in range 1..=3600".to_string(),
        ));
    }

    if engagement.min_bill_value < 0 {
        return Err(ConfigError::Validation(
            "engagement.min_bill_value must not be negative".to_string(),
        ));
    }

    Ok(())
}

fn validate_scheduler(scheduler: &SchedulerConfig) -> Result<(), ConfigError> {
    if scheduler.tick_interval_secs == 0 || scheduler.tick_interval_secs > 300 {
        return Err(ConfigError::Validation(
            "scheduler.tick_interval_secs must be in range 1..=300".to_string(),
        ));
    }

    if scheduler.batch_limit == 0 || scheduler.batch_limit > 500 {
        return Err(ConfigError::Validation(
            "scheduler.batch_limit must be in range 1..=500".to_string(),
        ));
    }

    if scheduler.worker_claim_ttl_secs == 0 || scheduler.worker_claim_ttl_secs > 3600 {
        return Err(ConfigError::Validation(
            "scheduler.worker_claim_ttl_secs must be in range 1..=3600".to_string(),
        ));
    }

    if scheduler.max_attempts == 0 || scheduler.max_attempts > 10 {
        return Err(ConfigError::Validation(
            "scheduler.max_attempts must be in range 1..=10".to_string(),
        ));
    }

    if scheduler.retry_base_delay_secs == 0 {
        return Err(ConfigError::Validation(
            "scheduler.retry_base_delay_secs must be greater than zero".to_string(),
        ));
    }

    if scheduler.retry_backoff_multiplier == 0 || scheduler.retry_backoff_multiplier > 10 {
        return Err(ConfigError::Validation(
            "scheduler.retry_backoff_multiplier must be in range 1..=10".to_string(),
        ));
    }

    if scheduler.retry_max_delay_secs < scheduler.retry_base_delay_secs {
        return Err(ConfigError::Validation(
            "scheduler.retry_max_delay_secs must be >= scheduler.retry_base_delay_secs"
                .to_string(),
        ));
    }

    Ok(())
}

fn validate_crm(crm: &CrmConfig) -> Result<(), ConfigError> {
    if crm.enabled {
        let missing_url =
            crm.base_url.as_ref().map(|value| value.trim().is_empty()).unwrap_or(true);
        if missing_url {
            return Err(ConfigError::Validation(
                "crm.base_url is required when crm.enabled is true".to_string(),
            ));
        }

        let missing_token = crm
            .api_token
            .as_ref()
            .map(|value| value.expose_secret().trim().is_empty())
            .unwrap_or(true);
        if missing_token {
            return Err(ConfigError::Validation(
                "crm.api_token is required when crm.enabled is true".to_string(),
            ));
        }
    }

    if let Some(base_url) = &crm.base_url {
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ConfigError::Validation(
                "crm.base_url must start with http:// or https://".to_string(),
            ));
        }
    }

    if crm.human_attended_stage.trim().is_empty() {
        return Err(ConfigError::Validation(
            "crm.human_attended_stage must not be empty".to_string(),
        ));
    }

    if crm.handoff_pause_hours == 0 || crm.handoff_pause_hours > 168 {
        return Err(ConfigError::Validation(
            "crm.handoff_pause_hours must be in range 1..=168".to_string(),
        ));
    }

    if crm.max_sync_attempts == 0 || crm.max_sync_attempts > 20 {
        return Err(ConfigError::Validation(
            "crm.max_sync_attempts must be in range 1..=20".to_string(),
        ));
    }

    if crm.base_retry_delay_secs == 0 {
        return Err(ConfigError::Validation(
            "crm.base_retry_delay_secs must be greater than zero".to_string(),
        ));
    }

    if crm.max_retry_delay_secs < crm.base_retry_delay_secs {
        return Err(ConfigError::Validation(
            "crm.max_retry_delay_secs must be >= crm.base_retry_delay_secs".to_string(),
        ));
    }

    Ok(())
}

fn validate_calendar(calendar: &CalendarConfig) -> Result<(), ConfigError> {
    if calendar.enabled {
        let missing_url =
            calendar.base_url.as_ref().map(|value| value.trim().is_empty()).unwrap_or(true);
        if missing_url {
            return Err(ConfigError::Validation(
                "calendar.base_url is required when calendar.enabled is true".to_string(),
            ));
        }
    }

    if let Some(base_url) = &calendar.base_url {
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ConfigError::Validation(
                "calendar.base_url must start with http:// or https://".to_string(),
            ));
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

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_i64(key: &str, value: &str) -> Result<i64, ConfigError> {
    value.parse::<i64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    server: Option<ServerPatch>,
    channel: Option<ChannelPatch>,
    engagement: Option<EngagementPatch>,
    scheduler: Option<SchedulerPatch>,
    crm: Option<CrmPatch>,
    calendar: Option<CalendarPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ChannelPatch {
    reset_command: Option<String>,
    gateway_url: Option<String>,
    api_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct EngagementPatch {
    debounce_window_ms: Option<u64>,
    flight_ttl_secs: Option<u64>,
    min_bill_value: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct SchedulerPatch {
    tick_interval_secs: Option<u64>,
    batch_limit: Option<u32>,
    worker_claim_ttl_secs: Option<u64>,
    max_attempts: Option<u32>,
    retry_base_delay_secs: Option<u64>,
    retry_backoff_multiplier: Option<u32>,
    retry_max_delay_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct CrmPatch {
    enabled: Option<bool>,
    base_url: Option<String>,
    api_token: Option<String>,
    webhook_secret: Option<String>,
    human_attended_stage: Option<String>,
    handoff_pause_hours: Option<u64>,
    max_sync_attempts: Option<u32>,
    base_retry_delay_secs: Option<u64>,
    max_retry_delay_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct CalendarPatch {
    enabled: Option<bool>,
    base_url: Option<String>,
    api_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
