use nurture_core::config::{AppConfig, ConfigError, LoadOptions};
use nurture_db::{connect_with_settings, migrations, DbPool};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

/// Startup path once configuration is settled: connect, migrate, hand the
/// pool back. Logging is assumed to be initialized by the caller.
pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    Ok(Application { config, db_pool })
}

#[cfg(test)]
mod tests {
    use nurture_core::config::{ConfigOverrides, LoadOptions};
    use nurture_core::{initial_stage, transition, ConversationSignal, ConversationStage};

    use crate::bootstrap::bootstrap;

    #[tokio::test]
    async fn bootstrap_fails_fast_on_invalid_crm_config() {
        let result = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:".to_string()),
                crm_enabled: Some(true),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await;

        assert!(result.is_err());
        let message = result.err().expect("error").to_string();
        assert!(message.contains("crm.base_url"));
    }

    #[tokio::test]
    async fn integration_smoke_boots_storage_and_walks_the_funnel() {
        let app = bootstrap(valid_overrides("sqlite::memory:?cache=shared"))
            .await
            .expect("bootstrap should succeed with valid overrides");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN ('leads', 'conversations', 'messages', \
             'follow_up_tasks', 'calendar_events', 'stage_mirror')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("expected engagement tables to be available after bootstrap");
        assert_eq!(table_count, 6, "bootstrap should expose the engagement storage tables");

        let mut stage = initial_stage();
        for signal in [
            ConversationSignal::Greeted,
            ConversationSignal::IdentityProvided,
            ConversationSignal::NeedsDescribed,
        ] {
            stage = transition(stage, signal)
                .expect("funnel walk should accept the scripted signal")
                .to;
        }
        assert_eq!(stage, ConversationStage::Qualification);

        let scheduling = transition(stage, ConversationSignal::SchedulingRequested)
            .expect("qualification -> scheduling should succeed");
        assert_eq!(scheduling.to, ConversationStage::Scheduling);
        assert!(
            !scheduling.actions.is_empty(),
            "a scheduling request should ask for an availability check"
        );

        app.db_pool.close().await;
    }

    fn valid_overrides(database_url: &str) -> LoadOptions {
        LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some(database_url.to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }
}
