use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use std::time::Duration;

use crate::imports::error::{ImportError, ImportResult};
use crate::imports::models::ExternalSale;
use crate::models::Organization;

/// Source of an organization's external sales
#[async_trait]
pub trait SalesFeed: Send + Sync {
    /// Sales recorded since the given cursor; everything when `None`
    async fn fetch(
        &self,
        organization: &Organization,
        since: Option<DateTime<Utc>>,
    ) -> ImportResult<Vec<ExternalSale>>;
}

/// Sales feed reached over HTTP
///
/// Issues `GET {integration_feed_url}?since={rfc3339}` with the organization's
/// integration token as bearer credential.
pub struct HttpSalesFeed {
    client: Client,
}

impl HttpSalesFeed {
    pub fn new(timeout: Duration) -> ImportResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl SalesFeed for HttpSalesFeed {
    async fn fetch(
        &self,
        organization: &Organization,
        since: Option<DateTime<Utc>>,
    ) -> ImportResult<Vec<ExternalSale>> {
        let Some(url) = organization.integration_feed_url.as_deref() else {
            return Err(ImportError::NotIntegrated(organization.id));
        };

        let mut request = self.client.get(url);
        if let Some(since) = since {
            request = request.query(&[("since", since.to_rfc3339())]);
        }
        if let Some(token) = organization.integration_token.as_deref() {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ImportError::FeedRejected {
                organization_id: organization.id,
                status: status.as_u16(),
            });
        }

        let sales: Vec<ExternalSale> = response.json().await?;
        tracing::debug!(
            organization_id = %organization.id,
            count = sales.len(),
            "Fetched sales from feed"
        );
        Ok(sales)
    }
}
