use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::qualification::QualificationStatus;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeadId(pub String);

/// Answers collected during discovery and qualification. Every field is
/// tri-state: `None` means the lead has not answered yet, which is distinct
/// from a decisive yes or no.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualificationFlags {
    pub bill_value: Option<Decimal>,
    pub is_decision_maker: Option<bool>,
    pub has_existing_system: Option<bool>,
    pub wants_new_system: Option<bool>,
    pub has_active_competing_contract: Option<bool>,
    pub explicit_interest: Option<bool>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lead {
    pub id: LeadId,
    /// Channel address (e.g. phone number), unique per lead.
    pub external_id: String,
    pub display_name: Option<String>,
    pub flags: QualificationFlags,
    pub qualification: QualificationStatus,
    /// Identifier of the lead's card in the external CRM, once known.
    pub crm_ref: Option<String>,
    /// Expiring pause set when a human annotates the lead's CRM card.
    pub human_pause_until: Option<DateTime<Utc>>,
    /// Non-expiring suppression set while the CRM shows the lead in the
    /// human-attended pipeline stage.
    pub human_attended: bool,
    pub last_interaction_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Lead {
    /// True while the assistant must stay silent for this lead: either the
    /// annotation pause has not expired or the CRM holds the lead in the
    /// human-attended stage.
    pub fn is_suppressed(&self, now: DateTime<Utc>) -> bool {
        if self.human_attended {
            return true;
        }
        self.human_pause_until.is_some_and(|until| now < until)
    }
}
