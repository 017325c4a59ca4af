// Storage seam for the cashback engine
//
// Every ledger mutation runs inside a `UnitOfWork`: all writes become visible on
// `commit`, and a unit of work dropped without committing leaves no trace.

pub mod postgres;

#[cfg(test)]
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::campaigns::{Campaign, Interaction, NewInteraction, TriggerType};
use crate::cashback::{
    CashbackBalance, CashbackProgram, EntryTransition, LedgerEntry, NewDiscrepancy, NewLedgerEntry,
};
use crate::models::{Client, NewClient, NewSale, Operator, Organization, Sale};

pub use postgres::PgStore;

/// Errors raised by the persistence layer
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A write that must return a row returned none
    #[error("Persistence returned no {0}")]
    MissingRow(&'static str),

    /// A persisted row could not be turned into a domain value
    #[error("Invalid stored {entity}: {reason}")]
    InvalidRow { entity: &'static str, reason: String },
}

/// Result type alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Entry point to the persisted state
#[async_trait]
pub trait CashbackStore: Send + Sync {
    /// Open a new atomic unit of work
    async fn begin(&self) -> StoreResult<Box<dyn UnitOfWork>>;

    /// Organizations whose sales come from an external feed
    async fn integrated_organizations(&self) -> StoreResult<Vec<Organization>>;

    /// Organizations that run a cashback program
    async fn program_organizations(&self) -> StoreResult<Vec<Organization>>;
}

/// Reads and writes that commit or roll back together
#[async_trait]
pub trait UnitOfWork: Send {
    async fn find_organization(&mut self, organization_id: Uuid) -> StoreResult<Option<Organization>>;

    async fn find_operator_by_pin_hash(
        &mut self,
        organization_id: Uuid,
        pin_hash: &str,
    ) -> StoreResult<Option<Operator>>;

    async fn find_program(&mut self, organization_id: Uuid) -> StoreResult<Option<CashbackProgram>>;

    /// Load a client and hold it until the unit of work ends
    async fn find_client(&mut self, organization_id: Uuid, client_id: Uuid) -> StoreResult<Option<Client>>;

    /// Same lock as `find_client`, by normalized phone
    async fn find_client_by_phone(
        &mut self,
        organization_id: Uuid,
        phone: &str,
    ) -> StoreResult<Option<Client>>;

    async fn insert_client(&mut self, client: &NewClient) -> StoreResult<Client>;

    /// Persist lifetime counters and first/last purchase pointers
    async fn update_client_purchases(&mut self, client: &Client) -> StoreResult<()>;

    /// Load a balance and hold it against concurrent writers until the unit of work ends
    async fn lock_balance(&mut self, client_id: Uuid, program_id: Uuid) -> StoreResult<Option<CashbackBalance>>;

    async fn insert_balance(&mut self, balance: &CashbackBalance) -> StoreResult<CashbackBalance>;

    async fn update_balance(&mut self, balance: &CashbackBalance) -> StoreResult<()>;

    async fn append_entry(&mut self, entry: &NewLedgerEntry) -> StoreResult<LedgerEntry>;

    async fn transition_entry(&mut self, transition: &EntryTransition) -> StoreResult<()>;

    async fn link_entries_to_sale(&mut self, entry_ids: &[Uuid], sale_id: Uuid) -> StoreResult<()>;

    /// ACTIVE accrual grants with something left to redeem
    async fn active_grants(&mut self, client_id: Uuid, program_id: Uuid) -> StoreResult<Vec<LedgerEntry>>;

    /// Accrual and redemption entries linked to a sale that no cancellation has
    /// compensated yet, including grants already consumed by redemptions.
    /// Expired grants are excluded.
    async fn reversible_entries_for_sale(&mut self, sale_id: Uuid) -> StoreResult<Vec<LedgerEntry>>;

    /// ACTIVE grants of an organization whose expiration date has passed
    async fn due_grants(&mut self, organization_id: Uuid, now: DateTime<Utc>) -> StoreResult<Vec<LedgerEntry>>;

    /// Every entry of a client, in sequence order
    async fn client_ledger(&mut self, client_id: Uuid, program_id: Uuid) -> StoreResult<Vec<LedgerEntry>>;

    async fn record_discrepancy(&mut self, discrepancy: &NewDiscrepancy) -> StoreResult<()>;

    async fn find_sale_by_external_id(
        &mut self,
        organization_id: Uuid,
        external_id: &str,
    ) -> StoreResult<Option<Sale>>;

    async fn insert_sale(&mut self, sale: &NewSale) -> StoreResult<Sale>;

    async fn update_sale(&mut self, sale: &Sale) -> StoreResult<()>;

    async fn active_campaigns(
        &mut self,
        organization_id: Uuid,
        trigger: TriggerType,
    ) -> StoreResult<Vec<Campaign>>;

    async fn last_interaction_at(
        &mut self,
        client_id: Uuid,
        campaign_id: Uuid,
    ) -> StoreResult<Option<DateTime<Utc>>>;

    async fn insert_interaction(&mut self, interaction: &NewInteraction) -> StoreResult<Interaction>;

    /// Advance the external feed cursor
    async fn mark_synced(&mut self, organization_id: Uuid, at: DateTime<Utc>) -> StoreResult<()>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;
}
