// Narrow interface to the durable document store.
// The store's own persistence and replication are out of our hands; history
// and the polling fallback only rely on the queries below.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{DeliveryStatus, NewMessage, PersistedMessage, Profile};

pub mod http;
pub mod memory;

pub use http::HttpStore;
pub use memory::MemoryStore;

/// Query for `list_messages`. Results are ascending by `created_at`.
#[derive(Debug, Clone, PartialEq)]
pub struct ListQuery {
    /// Inclusive lower bound on `created_at`.
    pub since: Option<DateTime<Utc>>,
    pub limit: usize,
    pub offset: usize,
}

impl ListQuery {
    pub fn new(limit: usize) -> Self {
        ListQuery {
            since: None,
            limit,
            offset: 0,
        }
    }

    pub fn with_since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }
}

#[async_trait]
pub trait PersistentStore: Send + Sync {
    async fn create_message(&self, conversation_key: &str, payload: NewMessage) -> Result<PersistedMessage>;

    async fn list_messages(&self, conversation_key: &str, query: ListQuery) -> Result<Vec<PersistedMessage>>;

    async fn get_user_profile(&self, user_id: &str) -> Result<Option<Profile>>;

    async fn update_delivery_status(
        &self,
        conversation_key: &str,
        message_id: &str,
        status: DeliveryStatus,
    ) -> Result<()>;
}
