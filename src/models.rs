use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::cashback::SaleSource;

/// RFM segment title given to clients created by a sale
pub const NEW_CLIENTS_SEGMENT: &str = "NEW_CLIENTS";

/// Tenant organization
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    /// Outbound messaging channel; `None` means no channel is available
    pub messaging_channel_id: Option<String>,
    pub messaging_auth_token: Option<String>,
    /// External sales feed; when present the point of sale is not the system of record
    pub integration_feed_url: Option<String>,
    pub integration_token: Option<String>,
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl Organization {
    /// Whether sales are owned by an external integration
    pub fn has_integration(&self) -> bool {
        self.integration_feed_url.is_some()
    }

    /// Channel and token used for outreach, when both are configured
    pub fn outbound_channel(&self) -> Option<(&str, &str)> {
        match (&self.messaging_channel_id, &self.messaging_auth_token) {
            (Some(channel), Some(token)) => Some((channel.as_str(), token.as_str())),
            _ => None,
        }
    }
}

/// Point-of-sale operator identified by an organization-scoped PIN
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Operator {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    pub membership_active: bool,
}

/// Hash an operator PIN with SHA-256, scoped to its organization
pub fn hash_operator_pin(organization_id: Uuid, pin: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(organization_id.as_bytes());
    hasher.update(b":");
    hasher.update(pin.trim().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Reduce a phone number to its national digits
///
/// Non-digits are dropped and a leading 55 country code is removed from
/// 12 and 13 digit numbers.
pub fn normalize_phone(raw: &str) -> String {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if (digits.len() == 12 || digits.len() == 13) && digits.starts_with("55") {
        digits[2..].to_string()
    } else {
        digits
    }
}

/// Customer of an organization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Client {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    pub phone: String,
    pub document: Option<String>,
    pub rfm_segment: Option<String>,
    pub purchase_count: i32,
    pub purchase_value: Decimal,
    pub first_sale_id: Option<Uuid>,
    pub first_purchase_at: Option<DateTime<Utc>>,
    pub last_sale_id: Option<Uuid>,
    pub last_purchase_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Client {
    /// Counters after recording one more valid sale
    pub fn record_purchase(&mut self, sale_id: Uuid, value: Decimal, at: DateTime<Utc>) {
        if self.first_sale_id.is_none() {
            self.first_sale_id = Some(sale_id);
            self.first_purchase_at = Some(at);
        }
        self.purchase_count += 1;
        self.purchase_value += value;
        self.last_sale_id = Some(sale_id);
        self.last_purchase_at = Some(at);
    }

    /// Counters after a counted sale was cancelled; purchase pointers are kept
    pub fn remove_purchase(&mut self, value: Decimal) {
        self.purchase_count = (self.purchase_count - 1).max(0);
        self.purchase_value = (self.purchase_value - value).max(Decimal::ZERO);
    }
}

/// Client to be created
#[derive(Debug, Clone, PartialEq)]
pub struct NewClient {
    pub organization_id: Uuid,
    pub name: String,
    pub phone: String,
    pub document: Option<String>,
    pub rfm_segment: Option<String>,
}

/// Sale captured at the point of sale or imported from a feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Sale {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub client_id: Uuid,
    pub operator_id: Option<Uuid>,
    pub external_id: Option<String>,
    pub value: Decimal,
    pub cashback_redeemed: Decimal,
    pub is_valid: bool,
    pub source: SaleSource,
    pub occurred_at: DateTime<Utc>,
}

/// Sale to be inserted
#[derive(Debug, Clone, PartialEq)]
pub struct NewSale {
    pub organization_id: Uuid,
    pub client_id: Uuid,
    pub operator_id: Option<Uuid>,
    pub external_id: Option<String>,
    pub value: Decimal,
    pub cashback_redeemed: Decimal,
    pub is_valid: bool,
    pub source: SaleSource,
    pub occurred_at: DateTime<Utc>,
}
