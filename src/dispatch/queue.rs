// Immediate-dispatch outbox
//
// Items are collected while the unit of work runs and only handed to the
// dispatcher after commit. A queue dropped with a rolled back unit of work
// never reaches the messaging service.

use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchClient {
    pub id: Uuid,
    pub name: String,
    pub phone: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchCampaign {
    pub id: Uuid,
    pub template_id: String,
    pub channel_id: String,
}

/// One outreach message ready to go out
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchItem {
    pub interaction_id: Uuid,
    pub organization_id: Uuid,
    pub client: DispatchClient,
    pub campaign: DispatchCampaign,
    /// Organization credential for the messaging channel, sent as a header
    #[serde(skip)]
    pub auth_token: String,
}

#[derive(Debug, Default)]
pub struct DispatchQueue {
    items: Vec<DispatchItem>,
}

impl DispatchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, item: DispatchItem) {
        self.items.push(item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[DispatchItem] {
        &self.items
    }

    pub fn into_items(self) -> Vec<DispatchItem> {
        self.items
    }
}

#[cfg(test)]
pub(crate) fn sample_item() -> DispatchItem {
    DispatchItem {
        interaction_id: Uuid::new_v4(),
        organization_id: Uuid::new_v4(),
        client: DispatchClient {
            id: Uuid::new_v4(),
            name: "Ana".to_string(),
            phone: "11987654321".to_string(),
        },
        campaign: DispatchCampaign {
            id: Uuid::new_v4(),
            template_id: "welcome".to_string(),
            channel_id: "channel-1".to_string(),
        },
        auth_token: "secret".to_string(),
    }
}
