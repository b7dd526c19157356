use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{ListQuery, PersistentStore};
use crate::error::Result;
use crate::models::{DeliveryStatus, NewMessage, PersistedMessage, Profile};

/// In-process store. Used when no store URL is configured, and by tests.
#[derive(Default)]
pub struct MemoryStore {
    conversations: RwLock<HashMap<String, Vec<PersistedMessage>>>,
    profiles: RwLock<HashMap<String, Profile>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_profile(&self, profile: Profile) {
        self.profiles.write().await.insert(profile.user_id.clone(), profile);
    }

    /// Insert a document directly, as another client would have.
    pub async fn insert(&self, message: PersistedMessage) {
        let mut conversations = self.conversations.write().await;
        let docs = conversations.entry(message.conversation_key.clone()).or_default();
        if let Some(existing) = docs.iter_mut().find(|d| d.id == message.id) {
            *existing = message;
            return;
        }
        let position = docs.partition_point(|d| d.created_at <= message.created_at);
        docs.insert(position, message);
    }

    pub async fn count(&self, conversation_key: &str) -> usize {
        self.conversations
            .read()
            .await
            .get(conversation_key)
            .map(|docs| docs.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl PersistentStore for MemoryStore {
    async fn create_message(&self, conversation_key: &str, payload: NewMessage) -> Result<PersistedMessage> {
        let doc = PersistedMessage {
            id: payload.id,
            conversation_key: conversation_key.to_string(),
            sender_id: payload.sender_id,
            body: payload.body,
            created_at: payload.created_at,
            delivery_status: Some(payload.delivery_status),
        };
        self.insert(doc.clone()).await;
        Ok(doc)
    }

    async fn list_messages(&self, conversation_key: &str, query: ListQuery) -> Result<Vec<PersistedMessage>> {
        let conversations = self.conversations.read().await;
        let docs = match conversations.get(conversation_key) {
            Some(docs) => docs,
            None => return Ok(Vec::new()),
        };
        Ok(docs
            .iter()
            .filter(|d| query.since.map_or(true, |since| d.created_at >= since))
            .skip(query.offset)
            .take(query.limit)
            .cloned()
            .collect())
    }

    async fn get_user_profile(&self, user_id: &str) -> Result<Option<Profile>> {
        Ok(self.profiles.read().await.get(user_id).cloned())
    }

    async fn update_delivery_status(
        &self,
        conversation_key: &str,
        message_id: &str,
        status: DeliveryStatus,
    ) -> Result<()> {
        let mut conversations = self.conversations.write().await;
        if let Some(doc) = conversations
            .get_mut(conversation_key)
            .and_then(|docs| docs.iter_mut().find(|d| d.id == message_id))
        {
            doc.delivery_status = Some(status);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn doc(id: &str, secs: i64) -> PersistedMessage {
        PersistedMessage {
            id: id.to_string(),
            conversation_key: "R1".to_string(),
            sender_id: "bob".to_string(),
            body: id.to_string(),
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(secs),
            delivery_status: None,
        }
    }

    #[tokio::test]
    async fn lists_ascending_with_inclusive_since_and_paging() {
        let store = MemoryStore::new();
        for (id, secs) in [("c", 3), ("a", 1), ("b", 2), ("d", 4)] {
            store.insert(doc(id, secs)).await;
        }

        let all = store.list_messages("R1", ListQuery::new(10)).await.unwrap();
        let ids: Vec<_> = all.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c", "d"]);

        let since = store
            .list_messages("R1", ListQuery::new(10).with_since(doc("b", 2).created_at))
            .await
            .unwrap();
        assert_eq!(since.first().map(|d| d.id.as_str()), Some("b"));

        let page = store
            .list_messages("R1", ListQuery::new(2).with_offset(1))
            .await
            .unwrap();
        let ids: Vec<_> = page.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);

        assert!(store.list_messages("other", ListQuery::new(10)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn same_id_overwrites_instead_of_duplicating() {
        let store = MemoryStore::new();
        store.insert(doc("a", 1)).await;
        store.insert(doc("a", 1)).await;
        assert_eq!(store.count("R1").await, 1);

        store.update_delivery_status("R1", "a", DeliveryStatus::Read).await.unwrap();
        let docs = store.list_messages("R1", ListQuery::new(1)).await.unwrap();
        assert_eq!(docs[0].delivery_status, Some(DeliveryStatus::Read));
    }
}
