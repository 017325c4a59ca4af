// In-memory store used by the test suite
//
// A unit of work holds the store lock for its whole life and mutates a cloned
// working copy; commit swaps the copy in, drop discards it.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::campaigns::{Campaign, Interaction, NewInteraction, TriggerType};
use crate::cashback::{
    CashbackBalance, CashbackProgram, EntryTransition, LedgerEntry, NewDiscrepancy, NewLedgerEntry,
    SaleSource, StatusReason, TransactionStatus, TransactionType,
};
use crate::models::{
    hash_operator_pin, Client, NewClient, NewSale, Operator, Organization, Sale, NEW_CLIENTS_SEGMENT,
};
use crate::store::{CashbackStore, StoreError, StoreResult, UnitOfWork};

/// Whole persisted state
#[derive(Debug, Clone, Default)]
pub struct MemoryState {
    pub organizations: HashMap<Uuid, Organization>,
    /// Operators with their PIN hash
    pub operators: Vec<(String, Operator)>,
    /// Programs keyed by organization
    pub programs: HashMap<Uuid, CashbackProgram>,
    pub clients: HashMap<Uuid, Client>,
    pub balances: HashMap<(Uuid, Uuid), CashbackBalance>,
    pub entries: Vec<LedgerEntry>,
    pub discrepancies: Vec<NewDiscrepancy>,
    pub sales: HashMap<Uuid, Sale>,
    pub campaigns: Vec<Campaign>,
    pub interactions: Vec<Interaction>,
    next_sequence: i64,
}

impl MemoryState {
    pub fn balance_of(&self, client_id: Uuid, program_id: Uuid) -> Option<&CashbackBalance> {
        self.balances.get(&(client_id, program_id))
    }

    /// Ledger entries of a client in sequence order
    pub fn entries_of(&self, client_id: Uuid) -> Vec<&LedgerEntry> {
        let mut entries: Vec<&LedgerEntry> =
            self.entries.iter().filter(|e| e.client_id == client_id).collect();
        entries.sort_by_key(|e| e.sequence);
        entries
    }

    pub fn client_by_phone(&self, organization_id: Uuid, phone: &str) -> Option<&Client> {
        self.clients
            .values()
            .find(|c| c.organization_id == organization_id && c.phone == phone)
    }

    pub fn sale_by_external_id(&self, organization_id: Uuid, external_id: &str) -> Option<&Sale> {
        self.sales
            .values()
            .find(|s| s.organization_id == organization_id && s.external_id.as_deref() == Some(external_id))
    }

    fn next_sequence(&mut self) -> i64 {
        self.next_sequence += 1;
        self.next_sequence
    }

    fn push_entry(&mut self, entry: &NewLedgerEntry) -> LedgerEntry {
        let stored = LedgerEntry {
            id: Uuid::new_v4(),
            sequence: self.next_sequence(),
            organization_id: entry.organization_id,
            client_id: entry.client_id,
            program_id: entry.program_id,
            transaction_type: entry.transaction_type,
            status: TransactionStatus::Active,
            status_reason: None,
            amount: entry.amount,
            remaining: entry.remaining,
            balance_before: entry.balance_before,
            balance_after: entry.balance_after,
            sale_id: entry.sale_id,
            campaign_id: entry.campaign_id,
            reverses_transaction_id: entry.reverses_transaction_id,
            operator_id: entry.operator_id,
            expires_at: entry.expires_at,
            created_at: Utc::now(),
        };
        self.entries.push(stored.clone());
        stored
    }
}

/// Store keeping everything behind one async mutex
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the committed state
    pub async fn snapshot(&self) -> MemoryState {
        self.state.lock().await.clone()
    }

    /// Organization with an outbound channel and no external integration
    pub async fn seed_organization(&self, name: &str) -> Organization {
        let organization = Organization {
            id: Uuid::new_v4(),
            name: name.to_string(),
            messaging_channel_id: Some("channel-1".to_string()),
            messaging_auth_token: Some("token-1".to_string()),
            integration_feed_url: None,
            integration_token: None,
            last_synced_at: None,
        };
        self.put_organization(organization.clone()).await;
        organization
    }

    pub async fn put_organization(&self, organization: Organization) {
        self.state
            .lock()
            .await
            .organizations
            .insert(organization.id, organization);
    }

    pub async fn seed_operator(&self, organization_id: Uuid, pin: &str, active: bool) -> Operator {
        let operator = Operator {
            id: Uuid::new_v4(),
            organization_id,
            name: "Caixa 1".to_string(),
            membership_active: active,
        };
        self.state
            .lock()
            .await
            .operators
            .push((hash_operator_pin(organization_id, pin), operator.clone()));
        operator
    }

    pub async fn put_program(&self, program: CashbackProgram) {
        self.state
            .lock()
            .await
            .programs
            .insert(program.organization_id, program);
    }

    pub async fn put_campaign(&self, campaign: Campaign) {
        self.state.lock().await.campaigns.push(campaign);
    }

    pub async fn put_interaction(&self, interaction: Interaction) {
        self.state.lock().await.interactions.push(interaction);
    }

    /// Existing client with no purchases yet
    pub async fn seed_client(&self, organization_id: Uuid, name: &str, phone: &str, segment: Option<&str>) -> Client {
        let client = Client {
            id: Uuid::new_v4(),
            organization_id,
            name: name.to_string(),
            phone: phone.to_string(),
            document: None,
            rfm_segment: segment.map(str::to_string),
            purchase_count: 0,
            purchase_value: Decimal::ZERO,
            first_sale_id: None,
            first_purchase_at: None,
            last_sale_id: None,
            last_purchase_at: None,
            created_at: Utc::now(),
        };
        self.state.lock().await.clients.insert(client.id, client.clone());
        client
    }

    pub async fn put_client(&self, client: Client) {
        self.state.lock().await.clients.insert(client.id, client);
    }

    /// Credit an accrual grant directly, keeping balance and ledger in step
    pub async fn seed_accrual(
        &self,
        program: &CashbackProgram,
        client_id: Uuid,
        amount: Decimal,
        sale_id: Option<Uuid>,
        expires_at: Option<DateTime<Utc>>,
    ) -> LedgerEntry {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let mut balance = state
            .balances
            .get(&(client_id, program.id))
            .cloned()
            .unwrap_or_else(|| CashbackBalance::zero(program.organization_id, client_id, program.id, now));

        let before = balance.available;
        balance.available += amount;
        balance.accumulated_total += amount;
        state.balances.insert((client_id, program.id), balance.clone());

        state.push_entry(&NewLedgerEntry {
            organization_id: program.organization_id,
            client_id,
            program_id: program.id,
            transaction_type: TransactionType::Accrual,
            amount,
            remaining: Some(amount),
            balance_before: before,
            balance_after: balance.available,
            sale_id,
            campaign_id: None,
            reverses_transaction_id: None,
            operator_id: None,
            expires_at,
        })
    }

    /// Persisted sale, valid by default
    pub async fn seed_sale(&self, organization_id: Uuid, client_id: Uuid, external_id: &str, value: Decimal) -> Sale {
        let sale = Sale {
            id: Uuid::new_v4(),
            organization_id,
            client_id,
            operator_id: None,
            external_id: Some(external_id.to_string()),
            value,
            cashback_redeemed: Decimal::ZERO,
            is_valid: true,
            source: SaleSource::Integration,
            occurred_at: Utc::now(),
        };
        self.state.lock().await.sales.insert(sale.id, sale.clone());
        sale
    }
}

#[async_trait]
impl CashbackStore for MemoryStore {
    async fn begin(&self) -> StoreResult<Box<dyn UnitOfWork>> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryUnitOfWork { guard, working }))
    }

    async fn integrated_organizations(&self) -> StoreResult<Vec<Organization>> {
        let state = self.state.lock().await;
        let mut organizations: Vec<Organization> = state
            .organizations
            .values()
            .filter(|o| o.has_integration())
            .cloned()
            .collect();
        organizations.sort_by_key(|o| o.id);
        Ok(organizations)
    }

    async fn program_organizations(&self) -> StoreResult<Vec<Organization>> {
        let state = self.state.lock().await;
        let mut organizations: Vec<Organization> = state
            .organizations
            .values()
            .filter(|o| state.programs.contains_key(&o.id))
            .cloned()
            .collect();
        organizations.sort_by_key(|o| o.id);
        Ok(organizations)
    }
}

pub struct MemoryUnitOfWork {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn find_organization(&mut self, organization_id: Uuid) -> StoreResult<Option<Organization>> {
        Ok(self.working.organizations.get(&organization_id).cloned())
    }

    async fn find_operator_by_pin_hash(
        &mut self,
        organization_id: Uuid,
        pin_hash: &str,
    ) -> StoreResult<Option<Operator>> {
        Ok(self
            .working
            .operators
            .iter()
            .find(|(hash, op)| op.organization_id == organization_id && hash == pin_hash)
            .map(|(_, op)| op.clone()))
    }

    async fn find_program(&mut self, organization_id: Uuid) -> StoreResult<Option<CashbackProgram>> {
        Ok(self.working.programs.get(&organization_id).cloned())
    }

    async fn find_client(&mut self, organization_id: Uuid, client_id: Uuid) -> StoreResult<Option<Client>> {
        Ok(self
            .working
            .clients
            .get(&client_id)
            .filter(|c| c.organization_id == organization_id)
            .cloned())
    }

    async fn find_client_by_phone(
        &mut self,
        organization_id: Uuid,
        phone: &str,
    ) -> StoreResult<Option<Client>> {
        Ok(self.working.client_by_phone(organization_id, phone).cloned())
    }

    async fn insert_client(&mut self, client: &NewClient) -> StoreResult<Client> {
        if self.working.client_by_phone(client.organization_id, &client.phone).is_some() {
            return Err(StoreError::InvalidRow {
                entity: "client",
                reason: format!("duplicate phone {}", client.phone),
            });
        }

        let stored = Client {
            id: Uuid::new_v4(),
            organization_id: client.organization_id,
            name: client.name.clone(),
            phone: client.phone.clone(),
            document: client.document.clone(),
            rfm_segment: client.rfm_segment.clone(),
            purchase_count: 0,
            purchase_value: Decimal::ZERO,
            first_sale_id: None,
            first_purchase_at: None,
            last_sale_id: None,
            last_purchase_at: None,
            created_at: Utc::now(),
        };
        self.working.clients.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn update_client_purchases(&mut self, client: &Client) -> StoreResult<()> {
        let stored = self
            .working
            .clients
            .get_mut(&client.id)
            .ok_or(StoreError::MissingRow("client"))?;
        stored.purchase_count = client.purchase_count;
        stored.purchase_value = client.purchase_value;
        stored.first_sale_id = client.first_sale_id;
        stored.first_purchase_at = client.first_purchase_at;
        stored.last_sale_id = client.last_sale_id;
        stored.last_purchase_at = client.last_purchase_at;
        Ok(())
    }

    async fn lock_balance(&mut self, client_id: Uuid, program_id: Uuid) -> StoreResult<Option<CashbackBalance>> {
        Ok(self.working.balances.get(&(client_id, program_id)).cloned())
    }

    async fn insert_balance(&mut self, balance: &CashbackBalance) -> StoreResult<CashbackBalance> {
        let stored = self
            .working
            .balances
            .entry((balance.client_id, balance.program_id))
            .or_insert_with(|| balance.clone());
        Ok(stored.clone())
    }

    async fn update_balance(&mut self, balance: &CashbackBalance) -> StoreResult<()> {
        let stored = self
            .working
            .balances
            .get_mut(&(balance.client_id, balance.program_id))
            .filter(|b| b.id == balance.id)
            .ok_or(StoreError::MissingRow("cashback balance"))?;
        *stored = balance.clone();
        Ok(())
    }

    async fn append_entry(&mut self, entry: &NewLedgerEntry) -> StoreResult<LedgerEntry> {
        Ok(self.working.push_entry(entry))
    }

    async fn transition_entry(&mut self, transition: &EntryTransition) -> StoreResult<()> {
        let entry = self
            .working
            .entries
            .iter_mut()
            .find(|e| e.id == transition.entry_id)
            .ok_or(StoreError::MissingRow("ledger entry"))?;
        entry.status = transition.status;
        entry.status_reason = transition.status_reason;
        entry.remaining = transition.remaining;
        Ok(())
    }

    async fn link_entries_to_sale(&mut self, entry_ids: &[Uuid], sale_id: Uuid) -> StoreResult<()> {
        for entry in self.working.entries.iter_mut().filter(|e| entry_ids.contains(&e.id)) {
            entry.sale_id = Some(sale_id);
        }
        Ok(())
    }

    async fn active_grants(&mut self, client_id: Uuid, program_id: Uuid) -> StoreResult<Vec<LedgerEntry>> {
        let mut grants: Vec<LedgerEntry> = self
            .working
            .entries
            .iter()
            .filter(|e| {
                e.client_id == client_id
                    && e.program_id == program_id
                    && e.transaction_type == TransactionType::Accrual
                    && e.status == TransactionStatus::Active
                    && e.remaining.unwrap_or(e.amount) > Decimal::ZERO
            })
            .cloned()
            .collect();
        grants.sort_by_key(|g| (g.expires_at.is_none(), g.expires_at, g.sequence));
        Ok(grants)
    }

    async fn reversible_entries_for_sale(&mut self, sale_id: Uuid) -> StoreResult<Vec<LedgerEntry>> {
        let mut entries: Vec<LedgerEntry> = self
            .working
            .entries
            .iter()
            .filter(|e| {
                e.sale_id == Some(sale_id)
                    && e.status != TransactionStatus::Expired
                    && e.status_reason != Some(StatusReason::Cancellation)
                    && matches!(e.transaction_type, TransactionType::Accrual | TransactionType::Redemption)
            })
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.sequence);
        Ok(entries)
    }

    async fn due_grants(&mut self, organization_id: Uuid, now: DateTime<Utc>) -> StoreResult<Vec<LedgerEntry>> {
        let mut grants: Vec<LedgerEntry> = self
            .working
            .entries
            .iter()
            .filter(|e| {
                e.organization_id == organization_id
                    && e.transaction_type == TransactionType::Accrual
                    && e.status == TransactionStatus::Active
                    && e.expires_at.map_or(false, |at| at <= now)
            })
            .cloned()
            .collect();
        grants.sort_by_key(|g| (g.client_id, g.expires_at, g.sequence));
        Ok(grants)
    }

    async fn client_ledger(&mut self, client_id: Uuid, program_id: Uuid) -> StoreResult<Vec<LedgerEntry>> {
        Ok(self
            .working
            .entries_of(client_id)
            .into_iter()
            .filter(|e| e.program_id == program_id)
            .cloned()
            .collect())
    }

    async fn record_discrepancy(&mut self, discrepancy: &NewDiscrepancy) -> StoreResult<()> {
        self.working.discrepancies.push(discrepancy.clone());
        Ok(())
    }

    async fn find_sale_by_external_id(
        &mut self,
        organization_id: Uuid,
        external_id: &str,
    ) -> StoreResult<Option<Sale>> {
        Ok(self.working.sale_by_external_id(organization_id, external_id).cloned())
    }

    async fn insert_sale(&mut self, sale: &NewSale) -> StoreResult<Sale> {
        if let Some(external_id) = sale.external_id.as_deref() {
            if self.working.sale_by_external_id(sale.organization_id, external_id).is_some() {
                return Err(StoreError::InvalidRow {
                    entity: "sale",
                    reason: format!("duplicate external id {}", external_id),
                });
            }
        }

        let stored = Sale {
            id: Uuid::new_v4(),
            organization_id: sale.organization_id,
            client_id: sale.client_id,
            operator_id: sale.operator_id,
            external_id: sale.external_id.clone(),
            value: sale.value,
            cashback_redeemed: sale.cashback_redeemed,
            is_valid: sale.is_valid,
            source: sale.source,
            occurred_at: sale.occurred_at,
        };
        self.working.sales.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn update_sale(&mut self, sale: &Sale) -> StoreResult<()> {
        let stored = self
            .working
            .sales
            .get_mut(&sale.id)
            .ok_or(StoreError::MissingRow("sale"))?;
        *stored = sale.clone();
        Ok(())
    }

    async fn active_campaigns(
        &mut self,
        organization_id: Uuid,
        trigger: TriggerType,
    ) -> StoreResult<Vec<Campaign>> {
        Ok(self
            .working
            .campaigns
            .iter()
            .filter(|c| c.organization_id == organization_id && c.trigger == trigger)
            .cloned()
            .collect())
    }

    async fn last_interaction_at(
        &mut self,
        client_id: Uuid,
        campaign_id: Uuid,
    ) -> StoreResult<Option<DateTime<Utc>>> {
        Ok(self
            .working
            .interactions
            .iter()
            .filter(|i| i.client_id == client_id && i.campaign_id == campaign_id)
            .map(|i| i.created_at)
            .max())
    }

    async fn insert_interaction(&mut self, interaction: &NewInteraction) -> StoreResult<Interaction> {
        let stored = Interaction {
            id: Uuid::new_v4(),
            organization_id: interaction.organization_id,
            client_id: interaction.client_id,
            campaign_id: interaction.campaign_id,
            sale_id: interaction.sale_id,
            scheduled_for: interaction.scheduled_for,
            time_block: interaction.time_block,
            dispatched_immediately: interaction.dispatched_immediately,
            created_at: Utc::now(),
        };
        self.working.interactions.push(stored.clone());
        Ok(stored)
    }

    async fn mark_synced(&mut self, organization_id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        let organization = self
            .working
            .organizations
            .get_mut(&organization_id)
            .ok_or(StoreError::MissingRow("organization"))?;
        organization.last_synced_at = Some(at);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let MemoryUnitOfWork { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_dropped_unit_of_work_leaves_no_trace() {
        let store = MemoryStore::new();
        let org = store.seed_organization("Loja").await;

        {
            let mut uow = store.begin().await.unwrap();
            uow.insert_client(&NewClient {
                organization_id: org.id,
                name: "Ana".to_string(),
                phone: "11987654321".to_string(),
                document: None,
                rfm_segment: None,
            })
            .await
            .unwrap();
        }

        assert!(store.snapshot().await.clients.is_empty());
    }

    #[tokio::test]
    async fn test_commit_publishes_writes() {
        let store = MemoryStore::new();
        let org = store.seed_organization("Loja").await;

        let mut uow = store.begin().await.unwrap();
        let client = uow
            .insert_client(&NewClient {
                organization_id: org.id,
                name: "Ana".to_string(),
                phone: "11987654321".to_string(),
                document: None,
                rfm_segment: Some(NEW_CLIENTS_SEGMENT.to_string()),
            })
            .await
            .unwrap();
        uow.commit().await.unwrap();

        let state = store.snapshot().await;
        assert_eq!(state.clients.len(), 1);
        assert_eq!(state.clients[&client.id].rfm_segment.as_deref(), Some(NEW_CLIENTS_SEGMENT));
    }

    #[tokio::test]
    async fn test_sequences_increase() {
        let store = MemoryStore::new();
        let program = crate::cashback::test_support::program(crate::cashback::AccrualRule::Fixed(dec!(1)), dec!(0));
        let client_id = Uuid::new_v4();

        let first = store.seed_accrual(&program, client_id, dec!(5), None, None).await;
        let second = store.seed_accrual(&program, client_id, dec!(5), None, None).await;

        assert!(second.sequence > first.sequence);
        assert_eq!(second.balance_before, dec!(5));
        assert_eq!(store.snapshot().await.balance_of(client_id, program.id).unwrap().available, dec!(10));
    }
}
