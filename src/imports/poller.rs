// Sales feed poller
//
// Every interval: pull each integrated organization's feed from its last
// cursor and import the batch, then expire due grants for every organization
// with a program. A failing organization is logged and the loop moves on.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::cashback::ExpirationSweep;
use crate::imports::feed::SalesFeed;
use crate::imports::service::ImportService;
use crate::metrics::LedgerMetrics;
use crate::store::CashbackStore;

/// Totals of one polling round
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PollReport {
    pub organizations_polled: usize,
    pub organizations_failed: usize,
    pub sales_imported: usize,
    pub grants_expired: usize,
}

pub struct SalesPoller {
    store: Arc<dyn CashbackStore>,
    feed: Arc<dyn SalesFeed>,
    imports: ImportService,
    metrics: LedgerMetrics,
    interval: Duration,
}

impl SalesPoller {
    pub fn new(
        store: Arc<dyn CashbackStore>,
        feed: Arc<dyn SalesFeed>,
        imports: ImportService,
        metrics: LedgerMetrics,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            feed,
            imports,
            metrics,
            interval,
        }
    }

    /// Run polling rounds forever on a background task
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!(interval_secs = self.interval.as_secs(), "Sales feed poller started");
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let report = self.poll_once(Utc::now()).await;
                tracing::info!(
                    organizations = report.organizations_polled,
                    failed = report.organizations_failed,
                    sales_imported = report.sales_imported,
                    grants_expired = report.grants_expired,
                    "Polling round finished"
                );
                self.metrics.log_summary();
            }
        })
    }

    /// One polling round
    pub async fn poll_once(&self, now: DateTime<Utc>) -> PollReport {
        let mut report = PollReport::default();

        match self.store.integrated_organizations().await {
            Ok(organizations) => {
                for organization in organizations {
                    report.organizations_polled += 1;

                    let sales = match self.feed.fetch(&organization, organization.last_synced_at).await {
                        Ok(sales) => sales,
                        Err(e) => {
                            report.organizations_failed += 1;
                            tracing::warn!(organization_id = %organization.id, error = %e, "Sales feed fetch failed");
                            continue;
                        }
                    };

                    match self.imports.import_batch(organization.id, sales, now).await {
                        Ok(summary) => report.sales_imported += summary.imported + summary.revalidated,
                        Err(e) => {
                            report.organizations_failed += 1;
                            tracing::error!(organization_id = %organization.id, error = %e, "Sales import failed");
                        }
                    }
                }
            }
            Err(e) => tracing::error!(error = %e, "Failed to list integrated organizations"),
        }

        match self.store.program_organizations().await {
            Ok(organizations) => {
                for organization in organizations {
                    match ExpirationSweep::expire_organization(self.store.as_ref(), organization.id, now).await {
                        Ok(summary) => report.grants_expired += summary.expired_grants,
                        Err(e) => {
                            tracing::error!(organization_id = %organization.id, error = %e, "Expiration sweep failed")
                        }
                    }
                }
            }
            Err(e) => tracing::error!(error = %e, "Failed to list organizations with programs"),
        }

        report
    }
}
