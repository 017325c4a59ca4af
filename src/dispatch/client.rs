use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use crate::dispatch::error::{DispatchError, DispatchResult};
use crate::dispatch::queue::DispatchItem;

/// Outbound messaging service
#[async_trait]
pub trait MessagingClient: Send + Sync {
    async fn send(&self, item: &DispatchItem) -> DispatchResult<()>;
}

/// Messaging service reached over HTTP
///
/// Posts each item as JSON to `{base_url}/messages` with the organization
/// token as bearer credential.
pub struct HttpMessagingClient {
    client: Client,
    endpoint: String,
}

impl HttpMessagingClient {
    pub fn new(base_url: &str, timeout: Duration) -> DispatchResult<Self> {
        let base_url = base_url.trim_end_matches('/');
        if base_url.is_empty() {
            return Err(DispatchError::Config("messaging base URL is empty".to_string()));
        }

        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            endpoint: format!("{}/messages", base_url),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl MessagingClient for HttpMessagingClient {
    async fn send(&self, item: &DispatchItem) -> DispatchResult<()> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&item.auth_token)
            .json(item)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(DispatchError::Rejected {
                interaction_id: item.interaction_id,
                status: status.as_u16(),
            });
        }

        tracing::debug!(
            interaction_id = %item.interaction_id,
            template_id = %item.campaign.template_id,
            "Outreach delivered to messaging service"
        );
        Ok(())
    }
}
