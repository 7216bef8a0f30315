use nurture_core::config::{AppConfig, LoadOptions};
use nurture_db::connect_with_settings;
use serde::Serialize;

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

const ENGAGEMENT_TABLES: &[&str] =
    &["leads", "conversations", "messages", "follow_up_tasks", "calendar_events", "stage_mirror"];

pub fn run(json_output: bool) -> String {
    let report = build_report();

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

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_channel_readiness(&config));
            checks.extend(database_checks(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            for name in ["channel_readiness", "database_connectivity", "schema_tables"] {
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

fn check_channel_readiness(config: &AppConfig) -> DoctorCheck {
    match (&config.channel.gateway_url, &config.channel.api_token) {
        (Some(url), Some(_)) => DoctorCheck {
            name: "channel_readiness",
            status: CheckStatus::Pass,
            details: format!("outbound gateway configured at `{url}`"),
        },
        (Some(_), None) => DoctorCheck {
            name: "channel_readiness",
            status: CheckStatus::Fail,
            details: "channel.gateway_url is set but channel.api_token is missing; \
                      outbound sends would be rejected"
                .to_string(),
        },
        _ => DoctorCheck {
            name: "channel_readiness",
            status: CheckStatus::Pass,
            details: "no outbound gateway configured; sends are no-ops".to_string(),
        },
    }
}

fn database_checks(config: &AppConfig) -> Vec<DoctorCheck> {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return vec![DoctorCheck {
                name: "database_connectivity",
                status: CheckStatus::Fail,
                details: format!("failed to initialize async runtime: {error}"),
            }];
        }
    };

    runtime.block_on(async {
        let mut checks = Vec::new();

        let pool = match connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        {
            Ok(pool) => pool,
            Err(error) => {
                checks.push(DoctorCheck {
                    name: "database_connectivity",
                    status: CheckStatus::Fail,
                    details: format!("failed to connect to database: {error}"),
                });
                checks.push(DoctorCheck {
                    name: "schema_tables",
                    status: CheckStatus::Skipped,
                    details: "skipped because the database is unreachable".to_string(),
                });
                return checks;
            }
        };

        checks.push(DoctorCheck {
            name: "database_connectivity",
            status: CheckStatus::Pass,
            details: format!("connected using `{}`", config.database.url),
        });
        checks.push(check_schema_tables(&pool).await);

        pool.close().await;
        checks
    })
}

async fn check_schema_tables(pool: &nurture_db::DbPool) -> DoctorCheck {
    let placeholders = vec!["?"; ENGAGEMENT_TABLES.len()].join(", ");
    let query = format!(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ({placeholders})"
    );
    let mut count_query = sqlx::query_scalar::<_, i64>(&query);
    for table in ENGAGEMENT_TABLES {
        count_query = count_query.bind(*table);
    }

    match count_query.fetch_one(pool).await {
        Ok(count) if count == ENGAGEMENT_TABLES.len() as i64 => DoctorCheck {
            name: "schema_tables",
            status: CheckStatus::Pass,
            details: format!("all {} engagement tables present", ENGAGEMENT_TABLES.len()),
        },
        Ok(count) => DoctorCheck {
            name: "schema_tables",
            status: CheckStatus::Fail,
            details: format!(
                "{count} of {} engagement tables present; run `nurture migrate`",
                ENGAGEMENT_TABLES.len()
            ),
        },
        Err(error) => DoctorCheck {
            name: "schema_tables",
            status: CheckStatus::Fail,
            details: format!("schema inspection failed: {error}"),
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
