use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::normalize_phone;

/// Sale record delivered by an external sales feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExternalSale {
    pub external_id: String,
    pub value: Decimal,
    #[serde(default)]
    pub cancelled: bool,
    pub occurred_at: DateTime<Utc>,
    pub client: ExternalClient,
    /// Phone of the referral partner credited on this sale
    #[serde(default)]
    pub partner_phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ExternalClient {
    pub name: String,
    pub phone: String,
    #[serde(default)]
    pub document: Option<String>,
}

impl ExternalSale {
    /// A sale counts when it is not cancelled and has a positive value
    pub fn is_valid(&self) -> bool {
        !self.cancelled && self.value > Decimal::ZERO
    }

    /// Reason the record cannot be imported at all, if any
    pub fn rejection(&self) -> Option<&'static str> {
        if self.external_id.trim().is_empty() {
            Some("missing external id")
        } else if self.value < Decimal::ZERO {
            Some("negative value")
        } else if normalize_phone(&self.client.phone).is_empty() {
            Some("missing client phone")
        } else {
            None
        }
    }
}

/// Body of the manual import endpoint
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct ImportRequest {
    pub sales: Vec<ExternalSale>,
}

/// What one import batch did
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    pub organization_id: Uuid,
    pub received: usize,
    /// Sales seen for the first time
    pub imported: usize,
    /// Previously invalid sales that became valid
    pub revalidated: usize,
    /// Previously valid sales that were cancelled
    pub reversed: usize,
    /// Known sales whose fields changed without ledger effect
    pub updated: usize,
    /// Re-delivered sales identical to what is stored
    pub unchanged: usize,
    /// Records rejected before processing
    pub skipped: usize,
    pub clients_created: usize,
    pub cashback_accrued: Decimal,
    pub cashback_reversed: Decimal,
    pub campaigns_fired: usize,
    pub dispatched: usize,
}

impl ImportSummary {
    pub fn new(organization_id: Uuid, received: usize) -> Self {
        Self {
            organization_id,
            received,
            ..Self::default()
        }
    }
}
