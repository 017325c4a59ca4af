use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::campaigns::types::{CampaignCashback, Period, Recurrence, TimeBlock, TriggerType};

/// Campaign trigger definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    pub trigger: TriggerType,
    pub min_sale_value: Option<Decimal>,
    pub min_new_cashback: Option<Decimal>,
    pub min_total_cashback: Option<Decimal>,
    pub min_purchase_count: Option<i32>,
    pub min_purchase_value: Option<Decimal>,
    /// Delay before the outreach goes out; `None` or zero means immediately
    pub schedule_offset: Option<Period>,
    pub recurrence: Recurrence,
    /// RFM segment titles this campaign targets
    pub segments: Vec<String>,
    pub cashback: Option<CampaignCashback>,
    pub template_id: Option<String>,
}

impl Campaign {
    /// Whether the client's segment is one of the campaign targets
    pub fn targets_segment(&self, segment: Option<&str>) -> bool {
        segment.map_or(false, |s| self.segments.iter().any(|t| t == s))
    }

    /// Empty segmentation means every segment
    pub fn targets_segment_or_all(&self, segment: Option<&str>) -> bool {
        self.segments.is_empty() || self.targets_segment(segment)
    }

    pub fn is_immediate(&self) -> bool {
        self.schedule_offset.map_or(true, |offset| offset.is_zero())
    }
}

/// Outreach scheduled for one client by one campaign firing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Interaction {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub client_id: Uuid,
    pub campaign_id: Uuid,
    pub sale_id: Option<Uuid>,
    pub scheduled_for: DateTime<Utc>,
    pub time_block: TimeBlock,
    pub dispatched_immediately: bool,
    pub created_at: DateTime<Utc>,
}

/// Interaction to be inserted
#[derive(Debug, Clone, PartialEq)]
pub struct NewInteraction {
    pub organization_id: Uuid,
    pub client_id: Uuid,
    pub campaign_id: Uuid,
    pub sale_id: Option<Uuid>,
    pub scheduled_for: DateTime<Utc>,
    pub time_block: TimeBlock,
    pub dispatched_immediately: bool,
}
