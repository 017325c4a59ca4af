// PostgreSQL implementation of the storage seam
//
// A unit of work wraps one database transaction. Balance rows are read with
// FOR UPDATE so two point-of-sale operators serving the same client serialize
// on the row instead of losing an update. Client rows are locked the same way
// when resolved, before any balance, so lifetime counters never go stale.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::campaigns::{
    Campaign, CampaignCashback, Interaction, NewInteraction, Period, Recurrence, TriggerType,
};
use crate::cashback::{
    AccrualRule, CashbackBalance, CashbackProgram, EntryTransition, LedgerEntry, NewDiscrepancy,
    NewLedgerEntry, RedemptionLimit,
};
use crate::models::{Client, NewClient, NewSale, Operator, Organization, Sale};
use crate::store::{CashbackStore, StoreError, StoreResult, UnitOfWork};

const ORGANIZATION_COLUMNS: &str = "id, name, messaging_channel_id, messaging_auth_token, \
    integration_feed_url, integration_token, last_synced_at";

const CLIENT_COLUMNS: &str = "id, organization_id, name, phone, document, rfm_segment, purchase_count, \
    purchase_value, first_sale_id, first_purchase_at, last_sale_id, last_purchase_at, created_at";

const BALANCE_COLUMNS: &str = "id, organization_id, client_id, program_id, available, accumulated_total, \
    redeemed_total, expired_total, created_at, updated_at";

const LEDGER_COLUMNS: &str = "id, sequence, organization_id, client_id, program_id, transaction_type, \
    status, status_reason, amount, remaining, balance_before, balance_after, sale_id, campaign_id, \
    reverses_transaction_id, operator_id, expires_at, created_at";

const SALE_COLUMNS: &str = "id, organization_id, client_id, operator_id, external_id, value, \
    cashback_redeemed, is_valid, source, occurred_at";

const INTERACTION_COLUMNS: &str = "id, organization_id, client_id, campaign_id, sale_id, scheduled_for, \
    time_block, dispatched_immediately, created_at";

/// Client lookup holding the row until the transaction ends
///
/// Purchase counters are written back from the loaded row.
fn locked_client_query(filter: &str) -> String {
    format!("SELECT {CLIENT_COLUMNS} FROM clients WHERE organization_id = $1 AND {filter} FOR UPDATE")
}

/// Program row as stored; rule columns are validated into typed variants
#[derive(Debug, FromRow)]
struct ProgramRow {
    id: Uuid,
    organization_id: Uuid,
    active: bool,
    accrual_type: String,
    accrual_value: Decimal,
    partner_accrual_value: Option<Decimal>,
    min_sale_value: Decimal,
    accrue_via_integration: bool,
    accrue_via_point_of_interaction: bool,
    expiration_days: Option<i32>,
    redemption_limit_type: Option<String>,
    redemption_limit_value: Option<Decimal>,
    discount_mode_enabled: bool,
    reward_mode_enabled: bool,
}

impl From<ProgramRow> for CashbackProgram {
    fn from(row: ProgramRow) -> Self {
        Self {
            id: row.id,
            organization_id: row.organization_id,
            active: row.active,
            accrual: AccrualRule::from_columns(&row.accrual_type, row.accrual_value),
            partner_accrual_rate: row.partner_accrual_value,
            min_sale_value: row.min_sale_value,
            accrue_via_integration: row.accrue_via_integration,
            accrue_via_point_of_interaction: row.accrue_via_point_of_interaction,
            expiration_days: row.expiration_days,
            redemption_limit: RedemptionLimit::from_columns(
                row.redemption_limit_type.as_deref(),
                row.redemption_limit_value,
            ),
            discount_mode_enabled: row.discount_mode_enabled,
            reward_mode_enabled: row.reward_mode_enabled,
        }
    }
}

/// Campaign row as stored
#[derive(Debug, FromRow)]
struct CampaignRow {
    id: Uuid,
    organization_id: Uuid,
    name: String,
    trigger_type: String,
    min_sale_value: Option<Decimal>,
    min_new_cashback: Option<Decimal>,
    min_total_cashback: Option<Decimal>,
    min_purchase_count: Option<i32>,
    min_purchase_value: Option<Decimal>,
    schedule_offset_value: Option<i32>,
    schedule_offset_unit: Option<String>,
    allow_recurrence: bool,
    recurrence_interval_value: Option<i32>,
    recurrence_interval_unit: Option<String>,
    segments: Vec<String>,
    cashback_type: Option<String>,
    cashback_value: Option<Decimal>,
    cashback_expiration_days: Option<i32>,
    template_id: Option<String>,
}

impl TryFrom<CampaignRow> for Campaign {
    type Error = StoreError;

    fn try_from(row: CampaignRow) -> Result<Self, Self::Error> {
        let trigger = row
            .trigger_type
            .parse::<TriggerType>()
            .map_err(|reason| StoreError::InvalidRow {
                entity: "campaign",
                reason,
            })?;

        let recurrence = if !row.allow_recurrence {
            Recurrence::Never
        } else {
            match Period::from_columns(row.recurrence_interval_value, row.recurrence_interval_unit.as_deref()) {
                Some(interval) if !interval.is_zero() => Recurrence::Every(interval),
                _ => Recurrence::Unrestricted,
            }
        };

        let cashback = match (row.cashback_type.as_deref(), row.cashback_value) {
            (Some(kind), Some(value)) if value > Decimal::ZERO => Some(CampaignCashback {
                rule: AccrualRule::from_columns(kind, value),
                expiration_days: row.cashback_expiration_days,
            }),
            _ => None,
        };

        Ok(Self {
            id: row.id,
            organization_id: row.organization_id,
            name: row.name,
            trigger,
            min_sale_value: row.min_sale_value,
            min_new_cashback: row.min_new_cashback,
            min_total_cashback: row.min_total_cashback,
            min_purchase_count: row.min_purchase_count,
            min_purchase_value: row.min_purchase_value,
            schedule_offset: Period::from_columns(row.schedule_offset_value, row.schedule_offset_unit.as_deref()),
            recurrence,
            segments: row.segments,
            cashback,
            template_id: row.template_id,
        })
    }
}

/// Store backed by a PostgreSQL pool
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CashbackStore for PgStore {
    async fn begin(&self) -> StoreResult<Box<dyn UnitOfWork>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgUnitOfWork { tx }))
    }

    async fn integrated_organizations(&self) -> StoreResult<Vec<Organization>> {
        let organizations = sqlx::query_as::<_, Organization>(&format!(
            "SELECT {ORGANIZATION_COLUMNS} FROM organizations WHERE integration_feed_url IS NOT NULL ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(organizations)
    }

    async fn program_organizations(&self) -> StoreResult<Vec<Organization>> {
        let organizations = sqlx::query_as::<_, Organization>(&format!(
            "SELECT {ORGANIZATION_COLUMNS} FROM organizations o \
             WHERE EXISTS (SELECT 1 FROM cashback_programs p WHERE p.organization_id = o.id) ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(organizations)
    }
}

/// One PostgreSQL transaction
pub struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn find_organization(&mut self, organization_id: Uuid) -> StoreResult<Option<Organization>> {
        let organization = sqlx::query_as::<_, Organization>(&format!(
            "SELECT {ORGANIZATION_COLUMNS} FROM organizations WHERE id = $1"
        ))
        .bind(organization_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(organization)
    }

    async fn find_operator_by_pin_hash(
        &mut self,
        organization_id: Uuid,
        pin_hash: &str,
    ) -> StoreResult<Option<Operator>> {
        let operator = sqlx::query_as::<_, Operator>(
            r#"
            SELECT id, organization_id, name, membership_active
            FROM operators
            WHERE organization_id = $1 AND pin_hash = $2
            "#,
        )
        .bind(organization_id)
        .bind(pin_hash)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(operator)
    }

    async fn find_program(&mut self, organization_id: Uuid) -> StoreResult<Option<CashbackProgram>> {
        let row = sqlx::query_as::<_, ProgramRow>(
            r#"
            SELECT id, organization_id, active, accrual_type, accrual_value, partner_accrual_value,
                   min_sale_value, accrue_via_integration, accrue_via_point_of_interaction,
                   expiration_days, redemption_limit_type, redemption_limit_value,
                   discount_mode_enabled, reward_mode_enabled
            FROM cashback_programs
            WHERE organization_id = $1
            "#,
        )
        .bind(organization_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(row.map(CashbackProgram::from))
    }

    async fn find_client(&mut self, organization_id: Uuid, client_id: Uuid) -> StoreResult<Option<Client>> {
        let client = sqlx::query_as::<_, Client>(&locked_client_query("id = $2"))
        .bind(organization_id)
        .bind(client_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(client)
    }

    async fn find_client_by_phone(
        &mut self,
        organization_id: Uuid,
        phone: &str,
    ) -> StoreResult<Option<Client>> {
        let client = sqlx::query_as::<_, Client>(&locked_client_query("phone = $2"))
        .bind(organization_id)
        .bind(phone)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(client)
    }

    async fn insert_client(&mut self, client: &NewClient) -> StoreResult<Client> {
        sqlx::query_as::<_, Client>(&format!(
            r#"
            INSERT INTO clients (organization_id, name, phone, document, rfm_segment)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {CLIENT_COLUMNS}
            "#
        ))
        .bind(client.organization_id)
        .bind(&client.name)
        .bind(&client.phone)
        .bind(&client.document)
        .bind(&client.rfm_segment)
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or(StoreError::MissingRow("client"))
    }

    async fn update_client_purchases(&mut self, client: &Client) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE clients
            SET purchase_count = $1,
                purchase_value = $2,
                first_sale_id = $3,
                first_purchase_at = $4,
                last_sale_id = $5,
                last_purchase_at = $6,
                updated_at = NOW()
            WHERE id = $7
            "#,
        )
        .bind(client.purchase_count)
        .bind(client.purchase_value)
        .bind(client.first_sale_id)
        .bind(client.first_purchase_at)
        .bind(client.last_sale_id)
        .bind(client.last_purchase_at)
        .bind(client.id)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn lock_balance(&mut self, client_id: Uuid, program_id: Uuid) -> StoreResult<Option<CashbackBalance>> {
        let balance = sqlx::query_as::<_, CashbackBalance>(&format!(
            "SELECT {BALANCE_COLUMNS} FROM cashback_balances WHERE client_id = $1 AND program_id = $2 FOR UPDATE"
        ))
        .bind(client_id)
        .bind(program_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(balance)
    }

    async fn insert_balance(&mut self, balance: &CashbackBalance) -> StoreResult<CashbackBalance> {
        let inserted = sqlx::query_as::<_, CashbackBalance>(&format!(
            r#"
            INSERT INTO cashback_balances
                (id, organization_id, client_id, program_id, available, accumulated_total,
                 redeemed_total, expired_total)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (client_id, program_id) DO NOTHING
            RETURNING {BALANCE_COLUMNS}
            "#
        ))
        .bind(balance.id)
        .bind(balance.organization_id)
        .bind(balance.client_id)
        .bind(balance.program_id)
        .bind(balance.available)
        .bind(balance.accumulated_total)
        .bind(balance.redeemed_total)
        .bind(balance.expired_total)
        .fetch_optional(&mut *self.tx)
        .await?;

        match inserted {
            Some(row) => Ok(row),
            // A concurrent transaction created it first; wait for its lock instead
            None => self
                .lock_balance(balance.client_id, balance.program_id)
                .await?
                .ok_or(StoreError::MissingRow("cashback balance")),
        }
    }

    async fn update_balance(&mut self, balance: &CashbackBalance) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE cashback_balances
            SET available = $1,
                accumulated_total = $2,
                redeemed_total = $3,
                expired_total = $4,
                updated_at = NOW()
            WHERE id = $5
            "#,
        )
        .bind(balance.available)
        .bind(balance.accumulated_total)
        .bind(balance.redeemed_total)
        .bind(balance.expired_total)
        .bind(balance.id)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::MissingRow("cashback balance"));
        }

        Ok(())
    }

    async fn append_entry(&mut self, entry: &NewLedgerEntry) -> StoreResult<LedgerEntry> {
        sqlx::query_as::<_, LedgerEntry>(&format!(
            r#"
            INSERT INTO cashback_transactions
                (organization_id, client_id, program_id, transaction_type, status, amount, remaining,
                 balance_before, balance_after, sale_id, campaign_id, reverses_transaction_id,
                 operator_id, expires_at)
            VALUES ($1, $2, $3, $4, 'ACTIVE', $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING {LEDGER_COLUMNS}
            "#
        ))
        .bind(entry.organization_id)
        .bind(entry.client_id)
        .bind(entry.program_id)
        .bind(entry.transaction_type)
        .bind(entry.amount)
        .bind(entry.remaining)
        .bind(entry.balance_before)
        .bind(entry.balance_after)
        .bind(entry.sale_id)
        .bind(entry.campaign_id)
        .bind(entry.reverses_transaction_id)
        .bind(entry.operator_id)
        .bind(entry.expires_at)
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or(StoreError::MissingRow("ledger entry"))
    }

    async fn transition_entry(&mut self, transition: &EntryTransition) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE cashback_transactions
            SET status = $1, status_reason = $2, remaining = $3
            WHERE id = $4
            "#,
        )
        .bind(transition.status)
        .bind(transition.status_reason)
        .bind(transition.remaining)
        .bind(transition.entry_id)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn link_entries_to_sale(&mut self, entry_ids: &[Uuid], sale_id: Uuid) -> StoreResult<()> {
        if entry_ids.is_empty() {
            return Ok(());
        }

        sqlx::query("UPDATE cashback_transactions SET sale_id = $1 WHERE id = ANY($2)")
            .bind(sale_id)
            .bind(entry_ids)
            .execute(&mut *self.tx)
            .await?;

        Ok(())
    }

    async fn active_grants(&mut self, client_id: Uuid, program_id: Uuid) -> StoreResult<Vec<LedgerEntry>> {
        let grants = sqlx::query_as::<_, LedgerEntry>(&format!(
            r#"
            SELECT {LEDGER_COLUMNS}
            FROM cashback_transactions
            WHERE client_id = $1 AND program_id = $2
              AND transaction_type = 'ACCRUAL' AND status = 'ACTIVE'
              AND COALESCE(remaining, amount) > 0
            ORDER BY expires_at ASC NULLS LAST, sequence ASC
            FOR UPDATE
            "#
        ))
        .bind(client_id)
        .bind(program_id)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(grants)
    }

    async fn reversible_entries_for_sale(&mut self, sale_id: Uuid) -> StoreResult<Vec<LedgerEntry>> {
        let entries = sqlx::query_as::<_, LedgerEntry>(&format!(
            r#"
            SELECT {LEDGER_COLUMNS}
            FROM cashback_transactions
            WHERE sale_id = $1
              AND transaction_type IN ('ACCRUAL', 'REDEMPTION')
              AND status <> 'EXPIRED'
              AND status_reason IS DISTINCT FROM 'CANCELLATION'
            ORDER BY sequence ASC
            FOR UPDATE
            "#
        ))
        .bind(sale_id)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(entries)
    }

    async fn due_grants(&mut self, organization_id: Uuid, now: DateTime<Utc>) -> StoreResult<Vec<LedgerEntry>> {
        let grants = sqlx::query_as::<_, LedgerEntry>(&format!(
            r#"
            SELECT {LEDGER_COLUMNS}
            FROM cashback_transactions
            WHERE organization_id = $1
              AND transaction_type = 'ACCRUAL' AND status = 'ACTIVE'
              AND expires_at IS NOT NULL AND expires_at <= $2
            ORDER BY client_id, expires_at ASC, sequence ASC
            FOR UPDATE
            "#
        ))
        .bind(organization_id)
        .bind(now)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(grants)
    }

    async fn client_ledger(&mut self, client_id: Uuid, program_id: Uuid) -> StoreResult<Vec<LedgerEntry>> {
        let entries = sqlx::query_as::<_, LedgerEntry>(&format!(
            "SELECT {LEDGER_COLUMNS} FROM cashback_transactions \
             WHERE client_id = $1 AND program_id = $2 ORDER BY sequence ASC"
        ))
        .bind(client_id)
        .bind(program_id)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(entries)
    }

    async fn record_discrepancy(&mut self, discrepancy: &NewDiscrepancy) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO ledger_discrepancies
                (organization_id, client_id, sale_id, transaction_id, shortfall, reason)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(discrepancy.organization_id)
        .bind(discrepancy.client_id)
        .bind(discrepancy.sale_id)
        .bind(discrepancy.transaction_id)
        .bind(discrepancy.shortfall)
        .bind(discrepancy.reason)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn find_sale_by_external_id(
        &mut self,
        organization_id: Uuid,
        external_id: &str,
    ) -> StoreResult<Option<Sale>> {
        let sale = sqlx::query_as::<_, Sale>(&format!(
            "SELECT {SALE_COLUMNS} FROM sales WHERE organization_id = $1 AND external_id = $2 FOR UPDATE"
        ))
        .bind(organization_id)
        .bind(external_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(sale)
    }

    async fn insert_sale(&mut self, sale: &NewSale) -> StoreResult<Sale> {
        sqlx::query_as::<_, Sale>(&format!(
            r#"
            INSERT INTO sales
                (organization_id, client_id, operator_id, external_id, value, cashback_redeemed,
                 is_valid, source, occurred_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {SALE_COLUMNS}
            "#
        ))
        .bind(sale.organization_id)
        .bind(sale.client_id)
        .bind(sale.operator_id)
        .bind(&sale.external_id)
        .bind(sale.value)
        .bind(sale.cashback_redeemed)
        .bind(sale.is_valid)
        .bind(sale.source)
        .bind(sale.occurred_at)
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or(StoreError::MissingRow("sale"))
    }

    async fn update_sale(&mut self, sale: &Sale) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE sales
            SET client_id = $1,
                value = $2,
                cashback_redeemed = $3,
                is_valid = $4,
                occurred_at = $5,
                updated_at = NOW()
            WHERE id = $6
            "#,
        )
        .bind(sale.client_id)
        .bind(sale.value)
        .bind(sale.cashback_redeemed)
        .bind(sale.is_valid)
        .bind(sale.occurred_at)
        .bind(sale.id)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn active_campaigns(
        &mut self,
        organization_id: Uuid,
        trigger: TriggerType,
    ) -> StoreResult<Vec<Campaign>> {
        let rows = sqlx::query_as::<_, CampaignRow>(
            r#"
            SELECT id, organization_id, name, trigger_type, min_sale_value, min_new_cashback,
                   min_total_cashback, min_purchase_count, min_purchase_value,
                   schedule_offset_value, schedule_offset_unit, allow_recurrence,
                   recurrence_interval_value, recurrence_interval_unit, segments,
                   cashback_type, cashback_value, cashback_expiration_days, template_id
            FROM campaigns
            WHERE organization_id = $1 AND trigger_type = $2 AND active
            ORDER BY created_at ASC
            "#,
        )
        .bind(organization_id)
        .bind(trigger.as_str())
        .fetch_all(&mut *self.tx)
        .await?;

        // A misconfigured campaign is skipped, never fatal to the sale
        let campaigns = rows
            .into_iter()
            .filter_map(|row| {
                let id = row.id;
                match Campaign::try_from(row) {
                    Ok(campaign) => Some(campaign),
                    Err(e) => {
                        tracing::warn!(campaign_id = %id, error = %e, "Skipping invalid campaign");
                        None
                    }
                }
            })
            .collect();

        Ok(campaigns)
    }

    async fn last_interaction_at(
        &mut self,
        client_id: Uuid,
        campaign_id: Uuid,
    ) -> StoreResult<Option<DateTime<Utc>>> {
        let last: Option<DateTime<Utc>> = sqlx::query_scalar(
            "SELECT MAX(created_at) FROM interactions WHERE client_id = $1 AND campaign_id = $2",
        )
        .bind(client_id)
        .bind(campaign_id)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(last)
    }

    async fn insert_interaction(&mut self, interaction: &NewInteraction) -> StoreResult<Interaction> {
        sqlx::query_as::<_, Interaction>(&format!(
            r#"
            INSERT INTO interactions
                (organization_id, client_id, campaign_id, sale_id, scheduled_for, time_block,
                 dispatched_immediately)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {INTERACTION_COLUMNS}
            "#
        ))
        .bind(interaction.organization_id)
        .bind(interaction.client_id)
        .bind(interaction.campaign_id)
        .bind(interaction.sale_id)
        .bind(interaction.scheduled_for)
        .bind(interaction.time_block)
        .bind(interaction.dispatched_immediately)
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or(StoreError::MissingRow("interaction"))
    }

    async fn mark_synced(&mut self, organization_id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        sqlx::query("UPDATE organizations SET last_synced_at = $1 WHERE id = $2")
            .bind(at)
            .bind(organization_id)
            .execute(&mut *self.tx)
            .await?;

        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
