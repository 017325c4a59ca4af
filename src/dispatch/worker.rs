// Dispatch worker
//
// Committed queues are sent over an mpsc channel to a single worker task that
// delivers items one by one, pausing between deliveries. Delivery failures are
// logged and counted; they never reach the request that produced the item.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::dispatch::client::MessagingClient;
use crate::dispatch::queue::{DispatchItem, DispatchQueue};
use crate::metrics::LedgerMetrics;

const CHANNEL_CAPACITY: usize = 1024;

/// Handle used to submit committed queues
#[derive(Clone)]
pub struct Dispatcher {
    sender: Option<mpsc::Sender<DispatchItem>>,
}

impl Dispatcher {
    /// Spawn the worker task and return its handle
    pub fn spawn(
        client: Arc<dyn MessagingClient>,
        delay: Duration,
        metrics: LedgerMetrics,
    ) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(CHANNEL_CAPACITY);
        let handle = tokio::spawn(run_worker(receiver, client, delay, metrics));
        (Self { sender: Some(sender) }, handle)
    }

    /// Dispatcher that drops everything it is given
    pub fn disabled() -> Self {
        Self { sender: None }
    }

    /// Hand a committed queue to the worker; returns how many items were accepted
    pub async fn submit(&self, queue: DispatchQueue) -> usize {
        if queue.is_empty() {
            return 0;
        }

        let Some(sender) = &self.sender else {
            tracing::warn!(items = queue.len(), "Outbound messaging disabled, dropping dispatch queue");
            return 0;
        };

        let mut accepted = 0;
        for item in queue.into_items() {
            let interaction_id = item.interaction_id;
            if sender.send(item).await.is_err() {
                tracing::warn!(interaction_id = %interaction_id, "Dispatch worker stopped, item dropped");
                break;
            }
            accepted += 1;
        }
        accepted
    }
}

async fn run_worker(
    mut receiver: mpsc::Receiver<DispatchItem>,
    client: Arc<dyn MessagingClient>,
    delay: Duration,
    metrics: LedgerMetrics,
) {
    tracing::info!(delay_ms = delay.as_millis() as u64, "Dispatch worker started");

    while let Some(item) = receiver.recv().await {
        match client.send(&item).await {
            Ok(()) => metrics.record_dispatch(true),
            Err(e) => {
                metrics.record_dispatch(false);
                tracing::warn!(
                    interaction_id = %item.interaction_id,
                    organization_id = %item.organization_id,
                    error = %e,
                    "Failed to dispatch outreach"
                );
            }
        }

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    tracing::info!("Dispatch worker stopped");
}
