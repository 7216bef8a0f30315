use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{sqlite::SqliteRow, Row};
use uuid::Uuid;

use nurture_core::domain::lead::{Lead, LeadId, QualificationFlags};
use nurture_core::qualification::QualificationStatus;

use super::{LeadRepository, RepositoryError};
use crate::DbPool;

const LEAD_COLUMNS: &str = "id,
                external_id,
                display_name,
                bill_value,
                is_decision_maker,
                has_existing_system,
                wants_new_system,
                has_active_competing_contract,
                explicit_interest,
                qualification_status,
                crm_ref,
                human_pause_until,
                human_attended,
                last_interaction_at,
                created_at,
                updated_at";

pub struct SqlLeadRepository {
    pool: DbPool,
}

impl SqlLeadRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl LeadRepository for SqlLeadRepository {
    async fn resolve_or_create(
        &self,
        external_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Lead, RepositoryError> {
        // Single statement so the identity race never surfaces: the loser of
        // a concurrent insert takes the DO UPDATE path and gets the same row.
        let row = sqlx::query(&format!(
            "INSERT INTO leads (id, external_id, last_interaction_at, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(external_id) DO UPDATE SET
                last_interaction_at = excluded.last_interaction_at,
                updated_at = excluded.updated_at
             RETURNING {LEAD_COLUMNS}"
        ))
        .bind(Uuid::new_v4().to_string())
        .bind(external_id)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .fetch_one(&self.pool)
        .await?;

        lead_from_row(row)
    }

    async fn find_by_id(&self, id: &LeadId) -> Result<Option<Lead>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {LEAD_COLUMNS} FROM leads WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(lead_from_row).transpose()
    }

    async fn find_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<Lead>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {LEAD_COLUMNS} FROM leads WHERE external_id = ?"))
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(lead_from_row).transpose()
    }

    async fn find_by_crm_ref(&self, crm_ref: &str) -> Result<Option<Lead>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {LEAD_COLUMNS} FROM leads WHERE crm_ref = ?"))
            .bind(crm_ref)
            .fetch_optional(&self.pool)
            .await?;

        row.map(lead_from_row).transpose()
    }

    async fn update_profile(
        &self,
        id: &LeadId,
        display_name: Option<&str>,
        flags: &QualificationFlags,
        qualification: QualificationStatus,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "UPDATE leads SET
                display_name = COALESCE(?, display_name),
                bill_value = ?,
                is_decision_maker = ?,
                has_existing_system = ?,
                wants_new_system = ?,
                has_active_competing_contract = ?,
                explicit_interest = ?,
                qualification_status = ?,
                updated_at = ?
             WHERE id = ?",
        )
        .bind(display_name)
        .bind(flags.bill_value.map(|value| value.to_string()))
        .bind(flags.is_decision_maker)
        .bind(flags.has_existing_system)
        .bind(flags.wants_new_system)
        .bind(flags.has_active_competing_contract)
        .bind(flags.explicit_interest)
        .bind(qualification.as_str())
        .bind(now.to_rfc3339())
        .bind(&id.0)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn set_crm_ref(
        &self,
        id: &LeadId,
        crm_ref: &str,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE leads SET crm_ref = ?, updated_at = ? WHERE id = ?")
            .bind(crm_ref)
            .bind(now.to_rfc3339())
            .bind(&id.0)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn set_human_pause(
        &self,
        id: &LeadId,
        pause_until: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE leads SET human_pause_until = ?, updated_at = ? WHERE id = ?")
            .bind(pause_until.map(|value| value.to_rfc3339()))
            .bind(now.to_rfc3339())
            .bind(&id.0)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn set_human_attended(
        &self,
        id: &LeadId,
        attended: bool,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE leads SET human_attended = ?, updated_at = ? WHERE id = ?")
            .bind(attended)
            .bind(now.to_rfc3339())
            .bind(&id.0)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn reset_engagement(
        &self,
        id: &LeadId,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "UPDATE leads SET
                bill_value = NULL,
                is_decision_maker = NULL,
                has_existing_system = NULL,
                wants_new_system = NULL,
                has_active_competing_contract = NULL,
                explicit_interest = NULL,
                qualification_status = ?,
                updated_at = ?
             WHERE id = ?",
        )
        .bind(QualificationStatus::Pending.as_str())
        .bind(now.to_rfc3339())
        .bind(&id.0)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn lead_from_row(row: SqliteRow) -> Result<Lead, RepositoryError> {
    let qualification_raw = row.try_get::<String, _>("qualification_status")?;
    let qualification = QualificationStatus::parse(&qualification_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown qualification status `{qualification_raw}`"))
    })?;

    let flags = QualificationFlags {
        bill_value: parse_optional_decimal("bill_value", row.try_get("bill_value")?)?,
        is_decision_maker: row.try_get("is_decision_maker")?,
        has_existing_system: row.try_get("has_existing_system")?,
        wants_new_system: row.try_get("wants_new_system")?,
        has_active_competing_contract: row.try_get("has_active_competing_contract")?,
        explicit_interest: row.try_get("explicit_interest")?,
    };

    Ok(Lead {
        id: LeadId(row.try_get("id")?),
        external_id: row.try_get("external_id")?,
        display_name: row.try_get("display_name")?,
        flags,
        qualification,
        crm_ref: row.try_get("crm_ref")?,
        human_pause_until: parse_optional_timestamp(
            "human_pause_until",
            row.try_get("human_pause_until")?,
        )?,
        human_attended: row.try_get("human_attended")?,
        last_interaction_at: parse_timestamp(
            "last_interaction_at",
            row.try_get("last_interaction_at")?,
        )?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn parse_optional_decimal(
    column: &str,
    value: Option<String>,
) -> Result<Option<Decimal>, RepositoryError> {
    value
        .map(|raw| {
            Decimal::from_str(&raw).map_err(|error| {
                RepositoryError::Decode(format!("invalid decimal in `{column}`: `{raw}` ({error})"))
            })
        })
        .transpose()
}

fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|timestamp| parse_timestamp(column, timestamp)).transpose()
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};
    use rust_decimal::Decimal;

    use nurture_core::domain::lead::QualificationFlags;
    use nurture_core::qualification::QualificationStatus;

    use super::SqlLeadRepository;
    use crate::migrations;
    use crate::repositories::LeadRepository;
    use crate::{connect_with_settings, DbPool};

    #[tokio::test]
    async fn resolve_or_create_inserts_once_and_returns_the_row() {
        let pool = setup_pool().await;
        let repo = SqlLeadRepository::new(pool.clone());
        let now = parse_ts("2026-03-01T09:00:00Z");

        let first = repo.resolve_or_create("+5511977770001", now).await.expect("first resolve");
        let later = parse_ts("2026-03-01T09:05:00Z");
        let second = repo.resolve_or_create("+5511977770001", later).await.expect("second resolve");

        assert_eq!(first.id, second.id);
        assert_eq!(second.last_interaction_at, later);

        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM leads WHERE external_id = '+5511977770001'")
                .fetch_one(&pool)
                .await
                .expect("count leads");
        assert_eq!(count, 1);

        pool.close().await;
    }

    #[tokio::test]
    async fn concurrent_resolve_or_create_converges_on_one_row() {
        let pool = setup_pool().await;
        let repo = SqlLeadRepository::new(pool.clone());
        let now = parse_ts("2026-03-01T10:00:00Z");

        let (a, b, c) = tokio::join!(
            repo.resolve_or_create("+5511977770002", now),
            repo.resolve_or_create("+5511977770002", now),
            repo.resolve_or_create("+5511977770002", now),
        );

        let a = a.expect("resolve a");
        let b = b.expect("resolve b");
        let c = c.expect("resolve c");
        assert_eq!(a.id, b.id);
        assert_eq!(b.id, c.id);

        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM leads WHERE external_id = '+5511977770002'")
                .fetch_one(&pool)
                .await
                .expect("count leads");
        assert_eq!(count, 1);

        pool.close().await;
    }

    #[tokio::test]
    async fn update_profile_persists_flags_and_verdict() {
        let pool = setup_pool().await;
        let repo = SqlLeadRepository::new(pool.clone());
        let now = parse_ts("2026-03-01T11:00:00Z");

        let lead = repo.resolve_or_create("+5511977770003", now).await.expect("resolve");
        let flags = QualificationFlags {
            bill_value: Some(Decimal::new(600_000, 2)),
            is_decision_maker: Some(true),
            has_existing_system: Some(false),
            wants_new_system: None,
            has_active_competing_contract: Some(false),
            explicit_interest: Some(true),
        };

        repo.update_profile(&lead.id, Some("Ana"), &flags, QualificationStatus::Qualified, now)
            .await
            .expect("update profile");

        let stored = repo.find_by_id(&lead.id).await.expect("find").expect("lead exists");
        assert_eq!(stored.display_name.as_deref(), Some("Ana"));
        assert_eq!(stored.flags, flags);
        assert_eq!(stored.qualification, QualificationStatus::Qualified);

        // Absent name must not erase the stored one.
        repo.update_profile(&lead.id, None, &flags, QualificationStatus::Qualified, now)
            .await
            .expect("update profile again");
        let stored = repo.find_by_id(&lead.id).await.expect("find").expect("lead exists");
        assert_eq!(stored.display_name.as_deref(), Some("Ana"));

        pool.close().await;
    }

    #[tokio::test]
    async fn reset_engagement_clears_facts_and_verdict() {
        let pool = setup_pool().await;
        let repo = SqlLeadRepository::new(pool.clone());
        let now = parse_ts("2026-03-01T12:00:00Z");

        let lead = repo.resolve_or_create("+5511977770004", now).await.expect("resolve");
        let flags = QualificationFlags {
            bill_value: Some(Decimal::new(250_000, 2)),
            is_decision_maker: Some(false),
            ..QualificationFlags::default()
        };
        repo.update_profile(&lead.id, None, &flags, QualificationStatus::NotQualified, now)
            .await
            .expect("update profile");

        repo.reset_engagement(&lead.id, now).await.expect("reset");

        let stored = repo.find_by_id(&lead.id).await.expect("find").expect("lead exists");
        assert_eq!(stored.flags, QualificationFlags::default());
        assert_eq!(stored.qualification, QualificationStatus::Pending);

        pool.close().await;
    }

    #[tokio::test]
    async fn suppression_fields_round_trip() {
        let pool = setup_pool().await;
        let repo = SqlLeadRepository::new(pool.clone());
        let now = parse_ts("2026-03-01T13:00:00Z");

        let lead = repo.resolve_or_create("+5511977770005", now).await.expect("resolve");
        let pause_until = parse_ts("2026-03-02T13:00:00Z");

        repo.set_crm_ref(&lead.id, "card-8841", now).await.expect("set crm ref");
        repo.set_human_pause(&lead.id, Some(pause_until), now).await.expect("set pause");
        repo.set_human_attended(&lead.id, true, now).await.expect("set attended");

        let stored =
            repo.find_by_crm_ref("card-8841").await.expect("find by crm ref").expect("lead exists");
        assert_eq!(stored.id, lead.id);
        assert_eq!(stored.human_pause_until, Some(pause_until));
        assert!(stored.human_attended);

        repo.set_human_pause(&lead.id, None, now).await.expect("clear pause");
        repo.set_human_attended(&lead.id, false, now).await.expect("clear attended");

        let stored = repo.find_by_id(&lead.id).await.expect("find").expect("lead exists");
        assert_eq!(stored.human_pause_until, None);
        assert!(!stored.human_attended);

        pool.close().await;
    }

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:?cache=shared", 1, 30)
            .await
            .expect("connect test pool");
        migrations::run_pending(&pool).await.expect("run migrations");
        pool
    }

    fn parse_ts(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value).expect("valid rfc3339").with_timezone(&Utc)
    }
}
