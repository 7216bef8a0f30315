use std::env;
use std::sync::{Mutex, OnceLock};

use nurture_cli::commands::{config, doctor, migrate, seed};
use serde_json::Value;

#[test]
fn migrate_returns_success_with_valid_env() {
    with_env(&[("NURTURE_DATABASE_URL", "sqlite::memory:")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "expected successful migrate run");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
    });
}

#[test]
fn migrate_returns_config_failure_when_crm_is_half_configured() {
    with_env(
        &[("NURTURE_DATABASE_URL", "sqlite::memory:"), ("NURTURE_CRM_ENABLED", "true")],
        || {
            let result = migrate::run();
            assert_eq!(result.exit_code, 2, "expected config validation failure code");

            let payload = parse_payload(&result.output);
            assert_eq!(payload["command"], "migrate");
            assert_eq!(payload["status"], "error");
            assert_eq!(payload["error_class"], "config_validation");
        },
    );
}

#[test]
fn seed_loads_and_verifies_the_demo_dataset() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let url = file_db_url(&dir, "nurture-seed.db");

    with_env(&[("NURTURE_DATABASE_URL", &url)], || {
        let result = seed::run();
        assert_eq!(result.exit_code, 0, "expected seed success: {}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "seed");
        assert_eq!(payload["status"], "ok");

        let message = payload["message"].as_str().unwrap_or("");
        assert!(message.contains("lead-demo-disco (+5511990000101)"));
        assert!(message.contains("lead-demo-qual (+5511990000102)"));
        assert!(message.contains("lead-demo-lost (+5511990000103)"));
    });
}

#[test]
fn seed_is_idempotent_across_runs() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let url = file_db_url(&dir, "nurture-reseed.db");

    with_env(&[("NURTURE_DATABASE_URL", &url)], || {
        let first = seed::run();
        assert_eq!(first.exit_code, 0, "expected first seed invocation success");
        let first_payload = parse_payload(&first.output);
        assert_eq!(first_payload["status"], "ok");

        let second = seed::run();
        assert_eq!(second.exit_code, 0, "expected second seed invocation success");
        let second_payload = parse_payload(&second.output);
        assert_eq!(second_payload["status"], "ok");

        assert_eq!(first_payload["message"], second_payload["message"]);
    });
}

#[test]
fn doctor_flags_a_missing_schema_and_passes_after_migrate() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let url = file_db_url(&dir, "nurture-doctor.db");

    with_env(&[("NURTURE_DATABASE_URL", &url)], || {
        let before = parse_payload(&doctor::run(true));
        assert_eq!(before["overall_status"], "fail");
        assert_eq!(check_status(&before, "config_validation"), "pass");
        assert_eq!(check_status(&before, "database_connectivity"), "pass");
        assert_eq!(check_status(&before, "schema_tables"), "fail");

        let migrated = migrate::run();
        assert_eq!(migrated.exit_code, 0, "expected migrate success: {}", migrated.output);

        let after = parse_payload(&doctor::run(true));
        assert_eq!(after["overall_status"], "pass");
        assert_eq!(check_status(&after, "schema_tables"), "pass");
        assert_eq!(check_status(&after, "channel_readiness"), "pass");
    });
}

#[test]
fn doctor_fails_channel_readiness_for_a_gateway_without_a_token() {
    with_env(
        &[
            ("NURTURE_DATABASE_URL", "sqlite::memory:"),
            ("NURTURE_CHANNEL_GATEWAY_URL", "https://gateway.example.test"),
        ],
        || {
            let report = parse_payload(&doctor::run(true));
            assert_eq!(report["overall_status"], "fail");
            assert_eq!(check_status(&report, "channel_readiness"), "fail");
        },
    );
}

#[test]
fn config_redacts_tokens_and_attributes_env_sources() {
    with_env(
        &[
            ("NURTURE_DATABASE_URL", "sqlite::memory:"),
            ("NURTURE_CHANNEL_GATEWAY_URL", "https://gateway.example.test"),
            ("NURTURE_CHANNEL_API_TOKEN", "chn-live-9a8b7c6d"),
        ],
        || {
            let output = config::run();

            assert!(output.contains("channel.api_token = chn-*** (source: env (NURTURE_CHANNEL_API_TOKEN))"));
            assert!(!output.contains("9a8b7c6d"), "raw token leaked: {output}");
            assert!(output
                .contains("database.url = sqlite::memory: (source: env (NURTURE_DATABASE_URL))"));
            assert!(output.contains("crm.enabled = false (source: default)"));
        },
    );
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn check_status<'a>(report: &'a Value, name: &str) -> &'a str {
    report["checks"]
        .as_array()
        .and_then(|checks| checks.iter().find(|check| check["name"] == name))
        .and_then(|check| check["status"].as_str())
        .unwrap_or_else(|| panic!("check `{name}` missing from report: {report}"))
}

fn file_db_url(dir: &tempfile::TempDir, file_name: &str) -> String {
    format!("sqlite://{}?mode=rwc", dir.path().join(file_name).display())
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "NURTURE_CONFIG_PATH",
        "NURTURE_DATABASE_URL",
        "NURTURE_DATABASE_MAX_CONNECTIONS",
        "NURTURE_DATABASE_TIMEOUT_SECS",
        "NURTURE_SERVER_BIND_ADDRESS",
        "NURTURE_SERVER_PORT",
        "NURTURE_SERVER_GRACEFUL_SHUTDOWN_SECS",
        "NURTURE_CHANNEL_RESET_COMMAND",
        "NURTURE_CHANNEL_GATEWAY_URL",
        "NURTURE_CHANNEL_API_TOKEN",
        "NURTURE_ENGAGEMENT_DEBOUNCE_WINDOW_MS",
        "NURTURE_ENGAGEMENT_FLIGHT_TTL_SECS",
        "NURTURE_ENGAGEMENT_MIN_BILL_VALUE",
        "NURTURE_SCHEDULER_TICK_INTERVAL_SECS",
        "NURTURE_SCHEDULER_BATCH_LIMIT",
        "NURTURE_SCHEDULER_WORKER_CLAIM_TTL_SECS",
        "NURTURE_SCHEDULER_MAX_ATTEMPTS",
        "NURTURE_SCHEDULER_RETRY_BASE_DELAY_SECS",
        "NURTURE_SCHEDULER_RETRY_BACKOFF_MULTIPLIER",
        "NURTURE_SCHEDULER_RETRY_MAX_DELAY_SECS",
        "NURTURE_CRM_ENABLED",
        "NURTURE_CRM_BASE_URL",
        "NURTURE_CRM_API_TOKEN",
        "NURTURE_CRM_WEBHOOK_SECRET",
        "NURTURE_CRM_HUMAN_ATTENDED_STAGE",
        "NURTURE_CRM_HANDOFF_PAUSE_HOURS",
        "NURTURE_CRM_MAX_SYNC_ATTEMPTS",
        "NURTURE_CRM_BASE_RETRY_DELAY_SECS",
        "NURTURE_CRM_MAX_RETRY_DELAY_SECS",
        "NURTURE_CALENDAR_ENABLED",
        "NURTURE_CALENDAR_BASE_URL",
        "NURTURE_CALENDAR_API_TOKEN",
        "NURTURE_LOGGING_LEVEL",
        "NURTURE_LOGGING_FORMAT",
        "NURTURE_LOG_LEVEL",
        "NURTURE_LOG_FORMAT",
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
