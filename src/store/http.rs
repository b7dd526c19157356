// REST adapter for the durable document store.
//
// POST   {base}/collections/{messages}/documents
// GET    {base}/collections/{messages}/documents?conversationKey=..&orderBy=createdAt&order=asc&limit=..&offset=..
// PATCH  {base}/collections/{messages}/documents/{id}
// GET    {base}/collections/{profiles}/documents/{userId}

use async_trait::async_trait;
use log::{debug, error};
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{ListQuery, PersistentStore};
use crate::config::StoreConfig;
use crate::error::{ChatError, Result};
use crate::models::{DeliveryStatus, NewMessage, PersistedMessage, Profile};

const API_KEY_HEADER: &str = "X-Api-Key";

#[derive(Deserialize)]
struct DocumentList {
    documents: Vec<PersistedMessage>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusPatch {
    delivery_status: DeliveryStatus,
}

pub struct HttpStore {
    client: Client,
    base_url: Url,
    messages_collection: String,
    profiles_collection: String,
    api_key: Option<String>,
}

impl HttpStore {
    pub fn new(config: &StoreConfig) -> Result<Self> {
        let base = config
            .base_url
            .as_deref()
            .ok_or_else(|| ChatError::Config("store.base_url is not set".into()))?;
        let base_url = Url::parse(base)
            .map_err(|e| ChatError::Config(format!("Invalid store URL '{}': {}", base, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(ChatError::Config(format!("Store URL '{}' cannot be a base", base)));
        }
        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| ChatError::Config(format!("Cannot build HTTP client: {}", e)))?;

        Ok(HttpStore {
            client,
            base_url,
            messages_collection: config.messages_collection.clone(),
            profiles_collection: config.profiles_collection.clone(),
            api_key: config.api_key.clone(),
        })
    }

    fn documents_url(&self, collection: &str, document_id: Option<&str>) -> Result<Url> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| ChatError::Config("Store URL cannot be a base".into()))?;
            segments.pop_if_empty().extend(["collections", collection, "documents"]);
            if let Some(id) = document_id {
                segments.push(id);
            }
        }
        Ok(url)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.header(API_KEY_HEADER, key),
            None => request,
        }
    }
}

async fn check(response: reqwest::Response, what: &str) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    error!("Store request '{}' failed with {}: {}", what, status, body);
    Err(ChatError::PersistenceFailed(format!("{} returned {}", what, status)))
}

#[async_trait]
impl PersistentStore for HttpStore {
    async fn create_message(&self, conversation_key: &str, payload: NewMessage) -> Result<PersistedMessage> {
        let doc = PersistedMessage {
            id: payload.id,
            conversation_key: conversation_key.to_string(),
            sender_id: payload.sender_id,
            body: payload.body,
            created_at: payload.created_at,
            delivery_status: Some(payload.delivery_status),
        };
        let url = self.documents_url(&self.messages_collection, None)?;
        debug!("Creating message {} in {}", doc.id, conversation_key);

        let response = self.authorize(self.client.post(url).json(&doc)).send().await?;
        let stored = check(response, "create message").await?.json::<PersistedMessage>().await?;
        Ok(stored)
    }

    async fn list_messages(&self, conversation_key: &str, query: ListQuery) -> Result<Vec<PersistedMessage>> {
        let url = self.documents_url(&self.messages_collection, None)?;
        let mut params: Vec<(&str, String)> = vec![
            ("conversationKey", conversation_key.to_string()),
            ("orderBy", "createdAt".to_string()),
            ("order", "asc".to_string()),
            ("limit", query.limit.to_string()),
            ("offset", query.offset.to_string()),
        ];
        if let Some(since) = query.since {
            params.push(("createdAtGte", since.to_rfc3339()));
        }

        let response = self.authorize(self.client.get(url).query(&params)).send().await?;
        let list = check(response, "list messages").await?.json::<DocumentList>().await?;
        debug!("Listed {} messages for {}", list.documents.len(), conversation_key);
        Ok(list.documents)
    }

    async fn get_user_profile(&self, user_id: &str) -> Result<Option<Profile>> {
        let url = self.documents_url(&self.profiles_collection, Some(user_id))?;
        let response = self.authorize(self.client.get(url)).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let profile = check(response, "get profile").await?.json::<Profile>().await?;
        Ok(Some(profile))
    }

    async fn update_delivery_status(
        &self,
        conversation_key: &str,
        message_id: &str,
        status: DeliveryStatus,
    ) -> Result<()> {
        let url = self.documents_url(&self.messages_collection, Some(message_id))?;
        debug!("Marking {} in {} as {}", message_id, conversation_key, status.as_str());
        let response = self
            .authorize(self.client.patch(url).json(&StatusPatch { delivery_status: status }))
            .send()
            .await?;
        check(response, "update status").await?;
        Ok(())
    }
}
