// Campaign firing
//
// Loads the active campaigns of the evaluated categories, keeps the eligible
// ones that pass the frequency cap, and fires them: one interaction each, an
// immediate dispatch when possible and the campaign cashback when configured.
// Problems with a single campaign are logged and skipped; only storage
// failures abort the surrounding unit of work.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::campaigns::evaluator::{TriggerEvaluator, TriggerFacts};
use crate::campaigns::models::{Campaign, Interaction, NewInteraction};
use crate::campaigns::types::{TimeBlock, TriggerType};
use crate::cashback::{BalanceCache, CashbackLedger, Credit, LedgerError, LedgerResult};
use crate::dispatch::{DispatchCampaign, DispatchClient, DispatchItem, DispatchQueue};
use crate::models::{Client, Organization};
use crate::store::UnitOfWork;

/// Who and what a firing is about
pub struct FiringContext<'a> {
    pub organization: &'a Organization,
    pub client: &'a Client,
    pub sale_id: Option<Uuid>,
    pub operator_id: Option<Uuid>,
    pub now: DateTime<Utc>,
}

pub struct CampaignEngine;

impl CampaignEngine {
    /// Evaluate the given categories once and fire the winners
    pub async fn evaluate(
        uow: &mut dyn UnitOfWork,
        mut cache: Option<&mut BalanceCache>,
        queue: &mut DispatchQueue,
        ctx: &FiringContext<'_>,
        triggers: &[TriggerType],
        facts: &TriggerFacts,
    ) -> LedgerResult<Vec<Interaction>> {
        let mut candidates = Vec::new();
        for trigger in triggers {
            let campaigns = uow.active_campaigns(ctx.organization.id, *trigger).await?;
            candidates.extend(
                campaigns
                    .into_iter()
                    .filter(|c| TriggerEvaluator::is_eligible(c, facts)),
            );
        }

        let candidates = TriggerEvaluator::apply_precedence(candidates, facts.client_created);
        let mut fired = Vec::new();

        for campaign in candidates {
            let last = uow.last_interaction_at(ctx.client.id, campaign.id).await?;
            if !TriggerEvaluator::can_schedule(last, &campaign, ctx.now) {
                tracing::debug!(
                    campaign_id = %campaign.id,
                    client_id = %ctx.client.id,
                    "Campaign frequency cap reached, skipping"
                );
                continue;
            }

            if let Some(interaction) =
                Self::fire(uow, cache.as_deref_mut(), queue, ctx, &campaign, facts.sale_value).await?
            {
                fired.push(interaction);
            }
        }

        Ok(fired)
    }

    async fn fire(
        uow: &mut dyn UnitOfWork,
        cache: Option<&mut BalanceCache>,
        queue: &mut DispatchQueue,
        ctx: &FiringContext<'_>,
        campaign: &Campaign,
        sale_value: Decimal,
    ) -> LedgerResult<Option<Interaction>> {
        let Some(scheduled_for) = TriggerEvaluator::schedule_for(campaign, ctx.now) else {
            tracing::warn!(campaign_id = %campaign.id, "Campaign schedule offset out of range, skipping");
            return Ok(None);
        };

        let outbound = ctx.organization.outbound_channel();
        let immediate = campaign.is_immediate() && campaign.template_id.is_some() && outbound.is_some();

        if campaign.is_immediate() && !immediate {
            tracing::warn!(
                campaign_id = %campaign.id,
                has_template = campaign.template_id.is_some(),
                has_channel = outbound.is_some(),
                "Immediate campaign cannot be dispatched, interaction only"
            );
        }

        let interaction = uow
            .insert_interaction(&NewInteraction {
                organization_id: ctx.organization.id,
                client_id: ctx.client.id,
                campaign_id: campaign.id,
                sale_id: ctx.sale_id,
                scheduled_for,
                time_block: TimeBlock::of(scheduled_for),
                dispatched_immediately: immediate,
            })
            .await?;

        if let (true, Some(template_id), Some((channel_id, token))) =
            (immediate, campaign.template_id.as_ref(), outbound)
        {
            queue.push(DispatchItem {
                interaction_id: interaction.id,
                organization_id: ctx.organization.id,
                client: DispatchClient {
                    id: ctx.client.id,
                    name: ctx.client.name.clone(),
                    phone: ctx.client.phone.clone(),
                },
                campaign: DispatchCampaign {
                    id: campaign.id,
                    template_id: template_id.clone(),
                    channel_id: channel_id.to_string(),
                },
                auth_token: token.to_string(),
            });
        }

        Self::grant_cashback(uow, cache, ctx, campaign, sale_value).await?;

        tracing::info!(
            campaign_id = %campaign.id,
            trigger = %campaign.trigger,
            client_id = %ctx.client.id,
            immediate,
            "Campaign fired"
        );

        Ok(Some(interaction))
    }

    async fn grant_cashback(
        uow: &mut dyn UnitOfWork,
        cache: Option<&mut BalanceCache>,
        ctx: &FiringContext<'_>,
        campaign: &Campaign,
        sale_value: Decimal,
    ) -> LedgerResult<()> {
        let Some(config) = campaign.cashback else {
            return Ok(());
        };

        let Some(cache) = cache else {
            tracing::warn!(campaign_id = %campaign.id, "Campaign cashback skipped, organization has no program");
            return Ok(());
        };

        let amount = TriggerEvaluator::campaign_cashback(campaign, sale_value);
        if amount <= Decimal::ZERO {
            tracing::debug!(campaign_id = %campaign.id, "Campaign cashback is zero, skipping");
            return Ok(());
        }

        let expires_at = config
            .expiration_days
            .filter(|days| *days > 0)
            .map(|days| ctx.now + Duration::days(days as i64));

        let credit = Credit {
            client_id: ctx.client.id,
            amount,
            sale_id: ctx.sale_id,
            campaign_id: Some(campaign.id),
            operator_id: ctx.operator_id,
            expires_at,
        };

        match CashbackLedger::accrue(uow, cache, credit, ctx.now).await {
            Ok(_) => Ok(()),
            Err(LedgerError::Store(e)) => Err(LedgerError::Store(e)),
            Err(e) => {
                tracing::warn!(campaign_id = %campaign.id, error = %e, "Campaign cashback skipped");
                Ok(())
            }
        }
    }
}
