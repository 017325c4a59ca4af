// Point-of-sale transaction flow
//
// One request runs as a single unit of work:
// operator -> client -> redemption -> accrual -> sale -> client counters ->
// purchase campaigns -> commit. Any error drops the unit of work and nothing
// is persisted. Outreach collected on the way is handed to the dispatcher
// only after commit.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::campaigns::{CampaignEngine, FiringContext, TriggerFacts, TriggerType};
use crate::cashback::{
    BalanceCache, CashbackCalculator, CashbackLedger, CashbackProgram, Credit, Debit, SaleSource,
};
use crate::dispatch::{DispatchQueue, Dispatcher};
use crate::metrics::LedgerMetrics;
use crate::models::{
    hash_operator_pin, normalize_phone, Client, NewClient, NewSale, Operator, Organization,
    NEW_CLIENTS_SEGMENT,
};
use crate::store::{CashbackStore, UnitOfWork};
use crate::transactions::error::TransactionError;
use crate::transactions::models::{format_brl, PosClient, PosTransactionRequest, PosTransactionResponse};

const DEFAULT_CLIENT_NAME: &str = "Cliente";

/// Step of the point-of-sale flow, reported when a transaction fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    ResolveOperator,
    ResolveClient,
    Redemption,
    Accrual,
    SalePersistence,
    ClientMetadataUpdate,
    CampaignEvaluation,
    Commit,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::ResolveOperator => "RESOLVE_OPERATOR",
            Stage::ResolveClient => "RESOLVE_CLIENT",
            Stage::Redemption => "REDEMPTION",
            Stage::Accrual => "ACCRUAL",
            Stage::SalePersistence => "SALE_PERSISTENCE",
            Stage::ClientMetadataUpdate => "CLIENT_METADATA_UPDATE",
            Stage::CampaignEvaluation => "CAMPAIGN_EVALUATION",
            Stage::Commit => "COMMIT",
        };
        write!(f, "{}", name)
    }
}

/// Result of a committed point-of-sale transaction
#[derive(Debug, Clone)]
pub struct PosTransactionOutcome {
    pub client_id: Uuid,
    pub client_created: bool,
    pub sale_id: Option<Uuid>,
    pub redeemed: Decimal,
    /// Program cashback credited to the buyer by this sale
    pub accrued: Decimal,
    pub available_after: Decimal,
    pub campaigns_fired: usize,
    /// Outreach items accepted by the dispatcher
    pub dispatched: usize,
}

impl From<PosTransactionOutcome> for PosTransactionResponse {
    fn from(outcome: PosTransactionOutcome) -> Self {
        Self {
            message: "Transaction processed successfully".to_string(),
            client_id: outcome.client_id,
            sale_id: outcome.sale_id,
            client_accumulated_cashback_value: outcome.accrued,
            client_new_overall_available_balance: outcome.available_after,
            visual_client_accumulated_cashback_value: format_brl(outcome.accrued),
            visual_client_new_overall_available_balance: format_brl(outcome.available_after),
        }
    }
}

/// Service for point-of-sale transactions
#[derive(Clone)]
pub struct PosTransactionService {
    store: Arc<dyn CashbackStore>,
    dispatcher: Dispatcher,
    metrics: LedgerMetrics,
}

/// State carried between stages
struct Flow {
    organization: Organization,
    program: CashbackProgram,
    operator: Operator,
    client: Client,
    client_created: bool,
    cache: BalanceCache,
    queue: DispatchQueue,
    entry_ids: Vec<Uuid>,
    redeemed: Decimal,
    accrued: Decimal,
    sale_id: Option<Uuid>,
    campaigns_fired: usize,
}

impl PosTransactionService {
    pub fn new(store: Arc<dyn CashbackStore>, dispatcher: Dispatcher, metrics: LedgerMetrics) -> Self {
        Self {
            store,
            dispatcher,
            metrics,
        }
    }

    /// Process one point-of-sale transaction atomically
    pub async fn process(
        &self,
        request: PosTransactionRequest,
        now: DateTime<Utc>,
    ) -> Result<PosTransactionOutcome, TransactionError> {
        request.validate()?;

        let _timer = self.metrics.start_pos_transaction();
        let mut stage = Stage::ResolveOperator;

        match self.run(&request, now, &mut stage).await {
            Ok((outcome, queue)) => {
                let dispatched = self.dispatcher.submit(queue).await;
                self.metrics.record_campaigns_fired(outcome.campaigns_fired as u64);

                tracing::info!(
                    organization_id = %request.org_id,
                    client_id = %outcome.client_id,
                    sale_id = ?outcome.sale_id,
                    redeemed = %outcome.redeemed,
                    accrued = %outcome.accrued,
                    available = %outcome.available_after,
                    dispatched,
                    "Point-of-sale transaction committed"
                );

                Ok(PosTransactionOutcome { dispatched, ..outcome })
            }
            Err(e) => {
                self.metrics.record_pos_failure();
                tracing::warn!(
                    organization_id = %request.org_id,
                    stage = %stage,
                    error = %e,
                    "Point-of-sale transaction rolled back"
                );
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        request: &PosTransactionRequest,
        now: DateTime<Utc>,
        stage: &mut Stage,
    ) -> Result<(PosTransactionOutcome, DispatchQueue), TransactionError> {
        let mut uow = self.store.begin().await?;

        let organization = uow
            .find_organization(request.org_id)
            .await?
            .ok_or(TransactionError::OrganizationNotFound(request.org_id))?;
        let program = uow
            .find_program(organization.id)
            .await?
            .ok_or(TransactionError::ProgramNotFound(organization.id))?;

        let operator = Self::resolve_operator(uow.as_mut(), organization.id, &request.operator_identifier).await?;

        *stage = Stage::ResolveClient;
        let (client, client_created) = Self::resolve_client(uow.as_mut(), organization.id, &request.client).await?;
        let mut cache = BalanceCache::new(&program);
        cache.ensure_entry(uow.as_mut(), client.id, now).await?;

        let mut flow = Flow {
            organization,
            program,
            operator,
            client,
            client_created,
            cache,
            queue: DispatchQueue::new(),
            entry_ids: Vec::new(),
            redeemed: Decimal::ZERO,
            accrued: Decimal::ZERO,
            sale_id: None,
            campaigns_fired: 0,
        };

        let sale_value = request.sale.value;

        if let Some(amount) = request.sale.cashback.requested() {
            *stage = Stage::Redemption;
            Self::redeem(uow.as_mut(), &mut flow, amount, sale_value, now).await?;
        }

        *stage = Stage::Accrual;
        Self::accrue(uow.as_mut(), &mut flow, sale_value, request.sale.partner_id, now).await?;

        if flow.organization.has_integration() {
            tracing::debug!(
                organization_id = %flow.organization.id,
                "Organization sales come from an integration, sale not persisted"
            );
        } else {
            *stage = Stage::SalePersistence;
            Self::persist_sale(uow.as_mut(), &mut flow, sale_value, stage, now).await?;
        }

        *stage = Stage::Commit;
        uow.commit().await?;

        let available_after = flow
            .cache
            .get(flow.client.id)
            .map(|b| b.available)
            .unwrap_or(Decimal::ZERO);

        let outcome = PosTransactionOutcome {
            client_id: flow.client.id,
            client_created: flow.client_created,
            sale_id: flow.sale_id,
            redeemed: flow.redeemed,
            accrued: flow.accrued,
            available_after,
            campaigns_fired: flow.campaigns_fired,
            dispatched: 0,
        };

        Ok((outcome, flow.queue))
    }

    async fn resolve_operator(
        uow: &mut dyn UnitOfWork,
        organization_id: Uuid,
        pin: &str,
    ) -> Result<Operator, TransactionError> {
        let pin_hash = hash_operator_pin(organization_id, pin);
        match uow.find_operator_by_pin_hash(organization_id, &pin_hash).await? {
            Some(operator) if operator.membership_active => Ok(operator),
            Some(operator) => {
                tracing::warn!(operator_id = %operator.id, "Operator membership is inactive");
                Err(TransactionError::Unauthorized)
            }
            None => Err(TransactionError::Unauthorized),
        }
    }

    /// Load the identified client, or register a new one by phone
    async fn resolve_client(
        uow: &mut dyn UnitOfWork,
        organization_id: Uuid,
        input: &PosClient,
    ) -> Result<(Client, bool), TransactionError> {
        if let Some(client_id) = input.id {
            let client = uow
                .find_client(organization_id, client_id)
                .await?
                .ok_or(TransactionError::ClientNotFound(client_id))?;
            return Ok((client, false));
        }

        let phone = input
            .phone
            .as_deref()
            .map(normalize_phone)
            .filter(|p| !p.is_empty())
            .ok_or(TransactionError::MissingClientPhone)?;

        if uow.find_client_by_phone(organization_id, &phone).await?.is_some() {
            return Err(TransactionError::DuplicateClient(phone));
        }

        let name = input
            .name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(DEFAULT_CLIENT_NAME);
        let document = input
            .document
            .as_deref()
            .map(|d| d.chars().filter(|c| c.is_ascii_digit()).collect::<String>())
            .filter(|d| !d.is_empty());

        let client = uow
            .insert_client(&NewClient {
                organization_id,
                name: name.to_string(),
                phone,
                document,
                rfm_segment: Some(NEW_CLIENTS_SEGMENT.to_string()),
            })
            .await?;

        tracing::info!(client_id = %client.id, "Client registered at point of sale");
        Ok((client, true))
    }

    async fn redeem(
        uow: &mut dyn UnitOfWork,
        flow: &mut Flow,
        amount: Decimal,
        sale_value: Decimal,
        now: DateTime<Utc>,
    ) -> Result<(), TransactionError> {
        let posting = CashbackLedger::redeem(
            uow,
            &mut flow.cache,
            &flow.program,
            Debit {
                client_id: flow.client.id,
                amount,
                sale_value,
                operator_id: Some(flow.operator.id),
            },
            now,
        )
        .await?;

        flow.redeemed = posting.entry.amount;
        flow.entry_ids.push(posting.entry.id);
        Ok(())
    }

    /// Program accrual for the buyer, CASHBACK_ACCUMULATED campaigns and the partner credit
    async fn accrue(
        uow: &mut dyn UnitOfWork,
        flow: &mut Flow,
        sale_value: Decimal,
        partner_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<(), TransactionError> {
        if !flow.program.active || !flow.program.accrue_via_point_of_interaction {
            tracing::debug!(program_id = %flow.program.id, "Point-of-sale accrual disabled");
            return Ok(());
        }

        let amount = CashbackCalculator::compute_accrual(sale_value, &flow.program);
        if amount > Decimal::ZERO {
            let posting = CashbackLedger::accrue(
                uow,
                &mut flow.cache,
                Credit {
                    client_id: flow.client.id,
                    amount,
                    sale_id: None,
                    campaign_id: None,
                    operator_id: Some(flow.operator.id),
                    expires_at: flow.program.grant_expiration(now),
                },
                now,
            )
            .await?;

            flow.accrued = posting.entry.amount;
            flow.entry_ids.push(posting.entry.id);

            let facts = TriggerFacts {
                segment: flow.client.rfm_segment.clone(),
                sale_value,
                client_created: flow.client_created,
                accrued: posting.entry.amount,
                available_after: posting.balance.available,
                ..TriggerFacts::default()
            };
            let ctx = FiringContext {
                organization: &flow.organization,
                client: &flow.client,
                sale_id: None,
                operator_id: Some(flow.operator.id),
                now,
            };
            let fired = CampaignEngine::evaluate(
                uow,
                Some(&mut flow.cache),
                &mut flow.queue,
                &ctx,
                &[TriggerType::CashbackAccumulated],
                &facts,
            )
            .await?;
            flow.campaigns_fired += fired.len();
        }

        if let Some(partner_id) = partner_id {
            Self::accrue_partner(uow, flow, partner_id, sale_value, now).await?;
        }

        Ok(())
    }

    async fn accrue_partner(
        uow: &mut dyn UnitOfWork,
        flow: &mut Flow,
        partner_id: Uuid,
        sale_value: Decimal,
        now: DateTime<Utc>,
    ) -> Result<(), TransactionError> {
        if partner_id == flow.client.id {
            tracing::warn!(client_id = %partner_id, "Client cannot be its own referral partner, skipping");
            return Ok(());
        }

        let Some(partner) = uow.find_client(flow.organization.id, partner_id).await? else {
            tracing::warn!(partner_id = %partner_id, "Referral partner not found, skipping");
            return Ok(());
        };

        let amount = CashbackCalculator::compute_partner_accrual(sale_value, &flow.program);
        if amount <= Decimal::ZERO {
            return Ok(());
        }

        let posting = CashbackLedger::accrue(
            uow,
            &mut flow.cache,
            Credit {
                client_id: partner.id,
                amount,
                sale_id: None,
                campaign_id: None,
                operator_id: Some(flow.operator.id),
                expires_at: flow.program.grant_expiration(now),
            },
            now,
        )
        .await?;

        flow.entry_ids.push(posting.entry.id);
        tracing::debug!(partner_id = %partner.id, amount = %posting.entry.amount, "Referral partner credited");
        Ok(())
    }

    /// Insert the sale, link its entries, bump the client counters and fire purchase campaigns
    async fn persist_sale(
        uow: &mut dyn UnitOfWork,
        flow: &mut Flow,
        sale_value: Decimal,
        stage: &mut Stage,
        now: DateTime<Utc>,
    ) -> Result<(), TransactionError> {
        let sale = uow
            .insert_sale(&NewSale {
                organization_id: flow.organization.id,
                client_id: flow.client.id,
                operator_id: Some(flow.operator.id),
                external_id: None,
                value: sale_value,
                cashback_redeemed: flow.redeemed,
                is_valid: true,
                source: SaleSource::PointOfInteraction,
                occurred_at: now,
            })
            .await?;
        uow.link_entries_to_sale(&flow.entry_ids, sale.id).await?;
        flow.sale_id = Some(sale.id);

        *stage = Stage::ClientMetadataUpdate;
        let count_before = flow.client.purchase_count;
        let value_before = flow.client.purchase_value;
        let first_valid_sale = flow.client.first_sale_id.is_none();
        flow.client.record_purchase(sale.id, sale_value, now);
        uow.update_client_purchases(&flow.client).await?;

        *stage = Stage::CampaignEvaluation;
        let facts = TriggerFacts {
            segment: flow.client.rfm_segment.clone(),
            sale_value,
            client_created: flow.client_created,
            first_valid_sale,
            purchase_count_before: count_before,
            purchase_count_after: flow.client.purchase_count,
            purchase_value_before: value_before,
            purchase_value_after: flow.client.purchase_value,
            accrued: flow.accrued,
            available_after: flow
                .cache
                .get(flow.client.id)
                .map(|b| b.available)
                .unwrap_or(Decimal::ZERO),
        };
        let ctx = FiringContext {
            organization: &flow.organization,
            client: &flow.client,
            sale_id: Some(sale.id),
            operator_id: Some(flow.operator.id),
            now,
        };
        let fired = CampaignEngine::evaluate(
            uow,
            Some(&mut flow.cache),
            &mut flow.queue,
            &ctx,
            &TriggerType::PURCHASE_TRIGGERS,
            &facts,
        )
        .await?;
        flow.campaigns_fired += fired.len();

        Ok(())
    }
}
