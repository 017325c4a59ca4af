// Batch import of external sales
//
// One unit of work per organization and batch. Sales are applied in order and
// share one balance cache, so a client appearing twice in the same batch sees
// its own earlier accrual. Records are matched by external id:
//   known valid   + incoming cancelled -> reversal, sale marked invalid and
//                                         taken out of the client counters
//   known invalid + incoming valid     -> processed like a new valid sale
//   anything else known                -> updated in place, no ledger effect
//   unknown                            -> client resolved by phone, sale inserted

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

use crate::campaigns::{CampaignEngine, FiringContext, TriggerFacts, TriggerType};
use crate::cashback::{
    BalanceCache, CashbackCalculator, CashbackLedger, CashbackProgram, Credit, ReversalHandler,
    SaleSource,
};
use crate::dispatch::{DispatchQueue, Dispatcher};
use crate::imports::error::{ImportError, ImportResult};
use crate::imports::models::{ExternalSale, ImportSummary};
use crate::metrics::LedgerMetrics;
use crate::models::{normalize_phone, Client, NewClient, NewSale, Organization, Sale, NEW_CLIENTS_SEGMENT};
use crate::store::{CashbackStore, StoreError, UnitOfWork};

/// Every category is evaluated for an imported sale
const IMPORT_TRIGGERS: [TriggerType; 5] = [
    TriggerType::CashbackAccumulated,
    TriggerType::FirstPurchase,
    TriggerType::NewPurchase,
    TriggerType::TotalPurchaseCount,
    TriggerType::TotalPurchaseValue,
];

/// Service for importing external sales
#[derive(Clone)]
pub struct ImportService {
    store: Arc<dyn CashbackStore>,
    dispatcher: Dispatcher,
    metrics: LedgerMetrics,
}

/// State shared by the sales of one batch
struct Batch {
    organization: Organization,
    program: Option<CashbackProgram>,
    cache: Option<BalanceCache>,
    queue: DispatchQueue,
    summary: ImportSummary,
}

impl ImportService {
    pub fn new(store: Arc<dyn CashbackStore>, dispatcher: Dispatcher, metrics: LedgerMetrics) -> Self {
        Self {
            store,
            dispatcher,
            metrics,
        }
    }

    /// Apply a batch of external sales to one organization atomically
    pub async fn import_batch(
        &self,
        organization_id: Uuid,
        sales: Vec<ExternalSale>,
        now: DateTime<Utc>,
    ) -> ImportResult<ImportSummary> {
        let _timer = self.metrics.start_import_batch();
        let mut uow = self.store.begin().await?;

        let organization = uow
            .find_organization(organization_id)
            .await?
            .ok_or(ImportError::OrganizationNotFound(organization_id))?;
        if !organization.has_integration() {
            return Err(ImportError::NotIntegrated(organization_id));
        }

        let program = uow.find_program(organization_id).await?;
        if program.is_none() {
            tracing::warn!(organization_id = %organization_id, "Importing sales without a cashback program");
        }

        let mut batch = Batch {
            cache: program.as_ref().map(BalanceCache::new),
            program,
            organization,
            queue: DispatchQueue::new(),
            summary: ImportSummary::new(organization_id, sales.len()),
        };

        for sale in &sales {
            if let Some(reason) = sale.rejection() {
                tracing::warn!(
                    organization_id = %organization_id,
                    external_id = %sale.external_id,
                    reason,
                    "Skipping invalid feed record"
                );
                batch.summary.skipped += 1;
                continue;
            }

            match uow.find_sale_by_external_id(organization_id, &sale.external_id).await? {
                Some(existing) => Self::apply_known(uow.as_mut(), &mut batch, existing, sale, now).await?,
                None => Self::apply_new(uow.as_mut(), &mut batch, sale, now).await?,
            }
        }

        uow.mark_synced(organization_id, now).await?;
        uow.commit().await?;

        let Batch { queue, mut summary, .. } = batch;
        summary.dispatched = self.dispatcher.submit(queue).await;

        self.metrics
            .record_sales_imported((summary.imported + summary.revalidated) as u64);
        self.metrics.record_sales_skipped(summary.skipped as u64);
        self.metrics.record_campaigns_fired(summary.campaigns_fired as u64);
        for _ in 0..summary.reversed {
            self.metrics.record_reversal();
        }

        tracing::info!(
            organization_id = %organization_id,
            received = summary.received,
            imported = summary.imported,
            revalidated = summary.revalidated,
            reversed = summary.reversed,
            updated = summary.updated,
            skipped = summary.skipped,
            accrued = %summary.cashback_accrued,
            dispatched = summary.dispatched,
            "Sales batch imported"
        );

        Ok(summary)
    }

    async fn apply_known(
        uow: &mut dyn UnitOfWork,
        batch: &mut Batch,
        mut existing: Sale,
        incoming: &ExternalSale,
        now: DateTime<Utc>,
    ) -> ImportResult<()> {
        let was_valid = existing.is_valid;
        let is_valid = incoming.is_valid();

        if was_valid && !is_valid {
            // Client row before balance rows, same order as the point of sale
            let mut client = Self::sale_client(uow, batch, &existing).await?;
            if let Some(cache) = batch.cache.as_mut() {
                let outcome = ReversalHandler::reverse_sale(uow, cache, &existing, now).await?;
                batch.summary.cashback_reversed += outcome.accruals_reversed;
            }

            client.remove_purchase(existing.value);
            uow.update_client_purchases(&client).await?;

            existing.is_valid = false;
            existing.value = incoming.value;
            uow.update_sale(&existing).await?;
            batch.summary.reversed += 1;

            tracing::info!(
                sale_id = %existing.id,
                external_id = %incoming.external_id,
                "Imported sale cancelled, ledger reversed"
            );
            return Ok(());
        }

        if !was_valid && is_valid {
            existing.is_valid = true;
            existing.value = incoming.value;
            existing.occurred_at = incoming.occurred_at;
            uow.update_sale(&existing).await?;

            let client = Self::sale_client(uow, batch, &existing).await?;
            Self::process_valid_sale(uow, batch, &existing, client, false, incoming, now).await?;
            batch.summary.revalidated += 1;
            return Ok(());
        }

        if existing.value == incoming.value && existing.occurred_at == incoming.occurred_at {
            batch.summary.unchanged += 1;
            return Ok(());
        }

        if existing.is_valid && existing.value != incoming.value {
            let mut client = Self::sale_client(uow, batch, &existing).await?;
            client.purchase_value = (client.purchase_value + incoming.value - existing.value).max(Decimal::ZERO);
            uow.update_client_purchases(&client).await?;
        }

        existing.value = incoming.value;
        existing.occurred_at = incoming.occurred_at;
        uow.update_sale(&existing).await?;
        batch.summary.updated += 1;
        tracing::debug!(sale_id = %existing.id, "Imported sale updated without ledger effect");
        Ok(())
    }

    async fn sale_client(uow: &mut dyn UnitOfWork, batch: &Batch, sale: &Sale) -> ImportResult<Client> {
        let client = uow
            .find_client(batch.organization.id, sale.client_id)
            .await?
            .ok_or(StoreError::MissingRow("client"))?;
        Ok(client)
    }

    async fn apply_new(
        uow: &mut dyn UnitOfWork,
        batch: &mut Batch,
        incoming: &ExternalSale,
        now: DateTime<Utc>,
    ) -> ImportResult<()> {
        let (client, client_created) = Self::resolve_client(uow, batch.organization.id, incoming).await?;
        if client_created {
            batch.summary.clients_created += 1;
        }

        let sale = uow
            .insert_sale(&NewSale {
                organization_id: batch.organization.id,
                client_id: client.id,
                operator_id: None,
                external_id: Some(incoming.external_id.clone()),
                value: incoming.value,
                cashback_redeemed: Decimal::ZERO,
                is_valid: incoming.is_valid(),
                source: SaleSource::Integration,
                occurred_at: incoming.occurred_at,
            })
            .await?;
        batch.summary.imported += 1;

        if sale.is_valid {
            Self::process_valid_sale(uow, batch, &sale, client, client_created, incoming, now).await?;
        }
        Ok(())
    }

    async fn resolve_client(
        uow: &mut dyn UnitOfWork,
        organization_id: Uuid,
        incoming: &ExternalSale,
    ) -> ImportResult<(Client, bool)> {
        let phone = normalize_phone(&incoming.client.phone);
        if let Some(client) = uow.find_client_by_phone(organization_id, &phone).await? {
            return Ok((client, false));
        }

        let name = incoming.client.name.trim();
        let client = uow
            .insert_client(&NewClient {
                organization_id,
                name: if name.is_empty() { phone.clone() } else { name.to_string() },
                phone,
                document: incoming
                    .client
                    .document
                    .as_deref()
                    .map(|d| d.chars().filter(|c| c.is_ascii_digit()).collect::<String>())
                    .filter(|d| !d.is_empty()),
                rfm_segment: Some(NEW_CLIENTS_SEGMENT.to_string()),
            })
            .await?;

        tracing::debug!(client_id = %client.id, "Client created from imported sale");
        Ok((client, true))
    }

    /// Accrual, partner credit, client counters and campaigns for a valid sale
    async fn process_valid_sale(
        uow: &mut dyn UnitOfWork,
        batch: &mut Batch,
        sale: &Sale,
        mut client: Client,
        client_created: bool,
        incoming: &ExternalSale,
        now: DateTime<Utc>,
    ) -> ImportResult<()> {
        let mut accrued = Decimal::ZERO;

        if let (Some(program), Some(cache)) = (batch.program.as_ref(), batch.cache.as_mut()) {
            if program.active && program.accrue_via_integration {
                let amount = CashbackCalculator::compute_accrual(sale.value, program);
                if amount > Decimal::ZERO {
                    let posting = CashbackLedger::accrue(
                        uow,
                        cache,
                        Credit {
                            client_id: client.id,
                            amount,
                            sale_id: Some(sale.id),
                            campaign_id: None,
                            operator_id: None,
                            expires_at: program.grant_expiration(now),
                        },
                        now,
                    )
                    .await?;
                    accrued = posting.entry.amount;
                }

                if let Some(partner_phone) = incoming.partner_phone.as_deref() {
                    Self::accrue_partner(uow, program, cache, &client, sale, partner_phone, now).await?;
                }
            }
        }
        batch.summary.cashback_accrued += accrued;

        let count_before = client.purchase_count;
        let value_before = client.purchase_value;
        let first_valid_sale = client.first_sale_id.is_none();
        client.record_purchase(sale.id, sale.value, sale.occurred_at);
        uow.update_client_purchases(&client).await?;

        let available_after = batch
            .cache
            .as_ref()
            .and_then(|c| c.get(client.id))
            .map(|b| b.available)
            .unwrap_or(Decimal::ZERO);
        let facts = TriggerFacts {
            segment: client.rfm_segment.clone(),
            sale_value: sale.value,
            client_created,
            first_valid_sale,
            purchase_count_before: count_before,
            purchase_count_after: client.purchase_count,
            purchase_value_before: value_before,
            purchase_value_after: client.purchase_value,
            accrued,
            available_after,
        };
        let ctx = FiringContext {
            organization: &batch.organization,
            client: &client,
            sale_id: Some(sale.id),
            operator_id: None,
            now,
        };
        let fired = CampaignEngine::evaluate(
            uow,
            batch.cache.as_mut(),
            &mut batch.queue,
            &ctx,
            &IMPORT_TRIGGERS,
            &facts,
        )
        .await?;
        batch.summary.campaigns_fired += fired.len();

        Ok(())
    }

    async fn accrue_partner(
        uow: &mut dyn UnitOfWork,
        program: &CashbackProgram,
        cache: &mut BalanceCache,
        client: &Client,
        sale: &Sale,
        partner_phone: &str,
        now: DateTime<Utc>,
    ) -> ImportResult<()> {
        let phone = normalize_phone(partner_phone);
        let partner = match uow.find_client_by_phone(client.organization_id, &phone).await? {
            Some(partner) if partner.id != client.id => partner,
            Some(_) => {
                tracing::warn!(client_id = %client.id, "Client cannot be its own referral partner, skipping");
                return Ok(());
            }
            None => {
                tracing::warn!(sale_id = %sale.id, "Referral partner not found, skipping");
                return Ok(());
            }
        };

        let amount = CashbackCalculator::compute_partner_accrual(sale.value, program);
        if amount > Decimal::ZERO {
            CashbackLedger::accrue(
                uow,
                cache,
                Credit {
                    client_id: partner.id,
                    amount,
                    sale_id: Some(sale.id),
                    campaign_id: None,
                    operator_id: None,
                    expires_at: program.grant_expiration(now),
                },
                now,
            )
            .await?;
        }
        Ok(())
    }
}
