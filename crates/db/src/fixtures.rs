use sqlx::Executor;

use crate::connection::DbPool;
use crate::repositories::RepositoryError;

/// Canonical demo seeds and verification contract, one lead per
/// characteristic funnel position.
const SEED_LEADS: &[SeedLeadContract] = &[
    SeedLeadContract {
        lead_id: "lead-demo-disco",
        external_id: "+5511990000101",
        stage: "discovery",
        qualification_status: "pending",
        message_count: 4,
        pending_task_types: &["reengagement_30m"],
        has_meeting: false,
        mirror_status: "synced",
        description: "Mid-funnel discovery chat with a reengagement nudge armed",
    },
    SeedLeadContract {
        lead_id: "lead-demo-qual",
        external_id: "+5511990000102",
        stage: "meeting_confirmed",
        qualification_status: "qualified",
        message_count: 3,
        pending_task_types: &["meeting_reminder_24h", "meeting_reminder_2h"],
        has_meeting: true,
        mirror_status: "pending",
        description: "Qualified lead with a booked meeting and both reminders owed",
    },
    SeedLeadContract {
        lead_id: "lead-demo-lost",
        external_id: "+5511990000103",
        stage: "not_interested",
        qualification_status: "pending",
        message_count: 2,
        pending_task_types: &[],
        has_meeting: false,
        mirror_status: "synced",
        description: "Polite decline with the pending nudge cancelled",
    },
];

const SEED_LEAD_IDS: &[&str] = &["lead-demo-disco", "lead-demo-qual", "lead-demo-lost"];

/// Deterministic demo dataset for local runs and end-to-end checks.
pub struct DemoSeedDataset;

impl DemoSeedDataset {
    /// SQL fixture content for the demo seed data.
    pub const SQL: &str = include_str!("../../../config/fixtures/demo_seed_data.sql");

    /// Load the demo dataset into the database. Idempotent.
    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let mut tx = pool.begin().await?;

        tx.execute(sqlx::query(Self::SQL)).await?;
        tx.commit().await?;

        let leads_seeded = SEED_LEADS
            .iter()
            .map(|lead| SeedLeadInfo {
                lead_id: lead.lead_id,
                external_id: lead.external_id,
                description: lead.description,
            })
            .collect::<Vec<_>>();

        Ok(SeedResult { leads_seeded })
    }

    /// Verify that the seed data exists and matches the contract.
    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::new();

        for lead in SEED_LEADS {
            let lead_exists: i64 = sqlx::query_scalar(
                "SELECT EXISTS(
                    SELECT 1 FROM leads
                    WHERE id = ?1 AND external_id = ?2 AND qualification_status = ?3
                 )",
            )
            .bind(lead.lead_id)
            .bind(lead.external_id)
            .bind(lead.qualification_status)
            .fetch_one(pool)
            .await?;
            checks.push((lead.lead_label(), lead_exists == 1));

            let stage_ok: i64 = sqlx::query_scalar(
                "SELECT EXISTS(
                    SELECT 1 FROM conversations
                    WHERE lead_id = ?1 AND active = 1 AND stage = ?2
                 )",
            )
            .bind(lead.lead_id)
            .bind(lead.stage)
            .fetch_one(pool)
            .await?;
            checks.push((lead.stage_label(), stage_ok == 1));

            let message_count: i64 =
                sqlx::query_scalar("SELECT COUNT(1) FROM messages WHERE lead_id = ?1")
                    .bind(lead.lead_id)
                    .fetch_one(pool)
                    .await?;
            checks.push((lead.message_label(), message_count == lead.message_count));

            checks.push((lead.task_label(), Self::verify_pending_tasks(pool, lead).await?));

            let meeting_count: i64 =
                sqlx::query_scalar("SELECT COUNT(1) FROM calendar_events WHERE lead_id = ?1")
                    .bind(lead.lead_id)
                    .fetch_one(pool)
                    .await?;
            let expected_meetings = i64::from(lead.has_meeting);
            checks.push((lead.meeting_label(), meeting_count == expected_meetings));

            let mirror_ok: i64 = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM stage_mirror WHERE lead_id = ?1 AND status = ?2)",
            )
            .bind(lead.lead_id)
            .bind(lead.mirror_status)
            .fetch_one(pool)
            .await?;
            checks.push((lead.mirror_label(), mirror_ok == 1));
        }

        let all_present = checks.iter().all(|(_, exists)| *exists);
        Ok(VerificationResult { all_present, checks })
    }

    async fn verify_pending_tasks(
        pool: &DbPool,
        lead: &SeedLeadContract,
    ) -> Result<bool, RepositoryError> {
        let pending_types: Vec<String> = sqlx::query_scalar(
            "SELECT task_type FROM follow_up_tasks
             WHERE lead_id = ?1 AND status = 'pending'
             ORDER BY task_type ASC",
        )
        .bind(lead.lead_id)
        .fetch_all(pool)
        .await?;

        let mut expected: Vec<&str> = lead.pending_task_types.to_vec();
        expected.sort_unstable();

        Ok(pending_types.len() == expected.len()
            && pending_types.iter().zip(&expected).all(|(actual, wanted)| actual == wanted))
    }

    /// Remove the seeded fixtures, child rows first.
    pub async fn clean(pool: &DbPool) -> Result<(), RepositoryError> {
        let mut tx = pool.begin().await?;

        let quoted_leads = sql_array_from_ids(SEED_LEAD_IDS);
        for table in ["stage_mirror", "calendar_events", "follow_up_tasks", "messages", "conversations"]
        {
            sqlx::query(&format!("DELETE FROM {table} WHERE lead_id IN {quoted_leads}"))
                .execute(&mut *tx)
                .await?;
        }
        sqlx::query(&format!("DELETE FROM leads WHERE id IN {quoted_leads}"))
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct SeedLeadContract {
    lead_id: &'static str,
    external_id: &'static str,
    stage: &'static str,
    qualification_status: &'static str,
    message_count: i64,
    pending_task_types: &'static [&'static str],
    has_meeting: bool,
    mirror_status: &'static str,
    description: &'static str,
}

impl SeedLeadContract {
    fn lead_label(&self) -> &'static str {
        match self.lead_id {
            "lead-demo-disco" => "lead-disco",
            "lead-demo-qual" => "lead-qual",
            _ => "lead-lost",
        }
    }

    fn stage_label(&self) -> &'static str {
        match self.lead_id {
            "lead-demo-disco" => "lead-disco-stage",
            "lead-demo-qual" => "lead-qual-stage",
            _ => "lead-lost-stage",
        }
    }

    fn message_label(&self) -> &'static str {
        match self.lead_id {
            "lead-demo-disco" => "lead-disco-messages",
            "lead-demo-qual" => "lead-qual-messages",
            _ => "lead-lost-messages",
        }
    }

    fn task_label(&self) -> &'static str {
        match self.lead_id {
            "lead-demo-disco" => "lead-disco-pending-tasks",
            "lead-demo-qual" => "lead-qual-pending-tasks",
            _ => "lead-lost-pending-tasks",
        }
    }

    fn meeting_label(&self) -> &'static str {
        match self.lead_id {
            "lead-demo-disco" => "lead-disco-meeting",
            "lead-demo-qual" => "lead-qual-meeting",
            _ => "lead-lost-meeting",
        }
    }

    fn mirror_label(&self) -> &'static str {
        match self.lead_id {
            "lead-demo-disco" => "lead-disco-mirror",
            "lead-demo-qual" => "lead-qual-mirror",
            _ => "lead-lost-mirror",
        }
    }
}

fn sql_array_from_ids(ids: &[&str]) -> String {
    let quoted = ids.iter().map(|id| format!("'{}'", id)).collect::<Vec<_>>().join(",");
    format!("({quoted})")
}

#[derive(Debug)]
pub struct SeedResult {
    pub leads_seeded: Vec<SeedLeadInfo>,
}

#[derive(Debug)]
pub struct SeedLeadInfo {
    pub lead_id: &'static str,
    pub external_id: &'static str,
    pub description: &'static str,
}

#[derive(Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}
