use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use nurture_core::config::{AppConfig, LoadOptions};
use secrecy::{ExposeSecret, SecretString};
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let source = |key_path: &str, env_key: &str| {
        field_source(key_path, env_key, config_file_doc.as_ref(), config_file_path.as_deref())
    };

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];

    lines.push(render_line(
        "database.url",
        &config.database.url,
        source("database.url", "NURTURE_DATABASE_URL"),
    ));
    lines.push(render_line(
        "database.max_connections",
        &config.database.max_connections.to_string(),
        source("database.max_connections", "NURTURE_DATABASE_MAX_CONNECTIONS"),
    ));
    lines.push(render_line(
        "database.timeout_secs",
        &config.database.timeout_secs.to_string(),
        source("database.timeout_secs", "NURTURE_DATABASE_TIMEOUT_SECS"),
    ));

    lines.push(render_line(
        "server.bind_address",
        &config.server.bind_address,
        source("server.bind_address", "NURTURE_SERVER_BIND_ADDRESS"),
    ));
    lines.push(render_line(
        "server.port",
        &config.server.port.to_string(),
        source("server.port", "NURTURE_SERVER_PORT"),
    ));

    lines.push(render_line(
        "channel.reset_command",
        &config.channel.reset_command,
        source("channel.reset_command", "NURTURE_CHANNEL_RESET_COMMAND"),
    ));
    lines.push(render_line(
        "channel.gateway_url",
        config.channel.gateway_url.as_deref().unwrap_or("<unset>"),
        source("channel.gateway_url", "NURTURE_CHANNEL_GATEWAY_URL"),
    ));
    lines.push(render_line(
        "channel.api_token",
        &redact_secret(config.channel.api_token.as_ref()),
        source("channel.api_token", "NURTURE_CHANNEL_API_TOKEN"),
    ));

    lines.push(render_line(
        "engagement.debounce_window_ms",
        &config.engagement.debounce_window_ms.to_string(),
        source("engagement.debounce_window_ms", "NURTURE_ENGAGEMENT_DEBOUNCE_WINDOW_MS"),
    ));
    lines.push(render_line(
        "engagement.flight_ttl_secs",
        &config.engagement.flight_ttl_secs.to_string(),
        source("engagement.flight_ttl_secs", "NURTURE_ENGAGEMENT_FLIGHT_TTL_SECS"),
    ));
    lines.push(render_line(
        "engagement.min_bill_value",
        &config.engagement.min_bill_value.to_string(),
        source("engagement.min_bill_value", "NURTURE_ENGAGEMENT_MIN_BILL_VALUE"),
    ));

    lines.push(render_line(
        "scheduler.tick_interval_secs",
        &config.scheduler.tick_interval_secs.to_string(),
        source("scheduler.tick_interval_secs", "NURTURE_SCHEDULER_TICK_INTERVAL_SECS"),
    ));
    lines.push(render_line(
        "scheduler.batch_limit",
        &config.scheduler.batch_limit.to_string(),
        source("scheduler.batch_limit", "NURTURE_SCHEDULER_BATCH_LIMIT"),
    ));
    lines.push(render_line(
        "scheduler.max_attempts",
        &config.scheduler.max_attempts.to_string(),
        source("scheduler.max_attempts", "NURTURE_SCHEDULER_MAX_ATTEMPTS"),
    ));

    lines.push(render_line(
        "crm.enabled",
        &config.crm.enabled.to_string(),
        source("crm.enabled", "NURTURE_CRM_ENABLED"),
    ));
    lines.push(render_line(
        "crm.base_url",
        config.crm.base_url.as_deref().unwrap_or("<unset>"),
        source("crm.base_url", "NURTURE_CRM_BASE_URL"),
    ));
    lines.push(render_line(
        "crm.api_token",
        &redact_secret(config.crm.api_token.as_ref()),
        source("crm.api_token", "NURTURE_CRM_API_TOKEN"),
    ));
    lines.push(render_line(
        "crm.webhook_secret",
        if config.crm.webhook_secret.is_some() { "<redacted>" } else { "<unset>" },
        source("crm.webhook_secret", "NURTURE_CRM_WEBHOOK_SECRET"),
    ));
    lines.push(render_line(
        "crm.human_attended_stage",
        &config.crm.human_attended_stage,
        source("crm.human_attended_stage", "NURTURE_CRM_HUMAN_ATTENDED_STAGE"),
    ));

    lines.push(render_line(
        "calendar.enabled",
        &config.calendar.enabled.to_string(),
        source("calendar.enabled", "NURTURE_CALENDAR_ENABLED"),
    ));
    lines.push(render_line(
        "calendar.base_url",
        config.calendar.base_url.as_deref().unwrap_or("<unset>"),
        source("calendar.base_url", "NURTURE_CALENDAR_BASE_URL"),
    ));
    lines.push(render_line(
        "calendar.api_token",
        &redact_secret(config.calendar.api_token.as_ref()),
        source("calendar.api_token", "NURTURE_CALENDAR_API_TOKEN"),
    ));

    lines.push(render_line(
        "logging.level",
        &config.logging.level,
        source("logging.level", "NURTURE_LOGGING_LEVEL"),
    ));
    lines.push(render_line(
        "logging.format",
        &format!("{:?}", config.logging.format),
        source("logging.format", "NURTURE_LOGGING_FORMAT"),
    ));

    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    let root = PathBuf::from("nurture.toml");
    if root.exists() {
        return Some(root);
    }

    let nested = PathBuf::from("config/nurture.toml");
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
    env_key: &str,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if env::var_os(env_key).is_some() {
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

/// Shows only the token's namespace prefix, never the credential itself.
fn redact_secret(secret: Option<&SecretString>) -> String {
    let Some(secret) = secret else {
        return "<unset>".to_string();
    };

    let trimmed = secret.expose_secret().trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((prefix, _)) = trimmed.split_once('-') {
        return format!("{prefix}-***");
    }

    "<redacted>".to_string()
}
