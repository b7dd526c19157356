// Per-conversation, id-deduplicated, timestamp-sorted message store.
// Ordering is best-effort by timestamp; messages from senders with clock skew
// may appear in either relative order.

use std::collections::HashSet;

use crate::models::{DeliveryStatus, Message};

#[derive(Debug, Default)]
pub struct MessageCache {
    entries: Vec<Message>,
    ids: HashSet<String>,
}

impl MessageCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert keeping ascending timestamp order. Returns false (and changes nothing)
    /// when the id is already present. Equal timestamps keep arrival order.
    pub fn put(&mut self, message: Message) -> bool {
        if self.ids.contains(&message.id) {
            return false;
        }
        let position = self
            .entries
            .partition_point(|existing| existing.timestamp <= message.timestamp);
        self.ids.insert(message.id.clone());
        self.entries.insert(position, message);
        true
    }

    /// Snapshot of every message, oldest first.
    pub fn all(&self) -> Vec<Message> {
        self.entries.clone()
    }

    pub fn get(&self, id: &str) -> Option<&Message> {
        if !self.ids.contains(id) {
            return None;
        }
        self.entries.iter().find(|m| m.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// Apply a delivery status transition. Returns the updated message, or None
    /// when the id is unknown or the transition is not allowed.
    pub fn update_status(&mut self, id: &str, status: DeliveryStatus) -> Option<Message> {
        let entry = self.entries.iter_mut().find(|m| m.id == id)?;
        if !entry.delivery_status.can_transition_to(status) {
            return None;
        }
        entry.delivery_status = status;
        Some(entry.clone())
    }

    pub fn latest_timestamp(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.entries.last().map(|m| m.timestamp)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.ids.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MessageOrigin;
    use chrono::{Duration, TimeZone, Utc};

    fn message(id: &str, offset_secs: i64) -> Message {
        Message {
            id: id.to_string(),
            conversation_key: "R1".to_string(),
            sender_id: "alice".to_string(),
            body: format!("body {}", id),
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() + Duration::seconds(offset_secs),
            origin: MessageOrigin::Live,
            delivery_status: DeliveryStatus::Sent,
        }
    }

    #[test]
    fn put_is_idempotent() {
        let mut cache = MessageCache::new();
        assert!(cache.put(message("a", 0)));
        let before = cache.all();

        let mut echo = message("a", 30);
        echo.body = "different body".into();
        assert!(!cache.put(echo));

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.all(), before);
    }

    #[test]
    fn out_of_order_inserts_come_out_sorted() {
        let mut cache = MessageCache::new();
        for (id, offset) in [("c", 30), ("a", 10), ("d", 40), ("b", 20)] {
            cache.put(message(id, offset));
        }
        let ids: Vec<String> = cache.all().into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn equal_timestamps_keep_arrival_order() {
        let mut cache = MessageCache::new();
        cache.put(message("first", 5));
        cache.put(message("second", 5));
        cache.put(message("early", 1));
        let ids: Vec<String> = cache.all().into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["early", "first", "second"]);
    }

    #[test]
    fn status_updates_follow_allowed_transitions() {
        let mut cache = MessageCache::new();
        cache.put(message("a", 0));

        let read = cache.update_status("a", DeliveryStatus::Read).unwrap();
        assert_eq!(read.delivery_status, DeliveryStatus::Read);
        assert!(cache.update_status("a", DeliveryStatus::Failed).is_none());
        assert!(cache.update_status("missing", DeliveryStatus::Read).is_none());
        assert_eq!(cache.get("a").unwrap().delivery_status, DeliveryStatus::Read);
    }

    #[test]
    fn snapshot_is_detached_from_cache() {
        let mut cache = MessageCache::new();
        cache.put(message("a", 0));
        let mut snapshot = cache.all();
        snapshot[0].body.push_str(" edited");
        snapshot.clear();
        assert_eq!(cache.get("a").unwrap().body, "body a");
        assert_eq!(cache.latest_timestamp(), Some(message("a", 0).timestamp));
    }
}
