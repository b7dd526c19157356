// Timer-driven pull of new messages from the durable store, used while the
// live channel is unavailable.

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::Result;
use crate::models::PersistedMessage;
use crate::store::{ListQuery, PersistentStore};

/// Receives every document a refresh fetches. The receiver deduplicates.
pub type MessageSink = Arc<dyn Fn(PersistedMessage) + Send + Sync>;

// Upper bound on pages fetched by one refresh.
const MAX_PAGES_PER_REFRESH: usize = 20;

pub struct PollingFallback {
    store: Arc<dyn PersistentStore>,
    conversation_key: String,
    page_limit: usize,
    sink: MessageSink,
    cursor: Mutex<Option<DateTime<Utc>>>,
    timer: Mutex<Option<JoinHandle<()>>>,
    activations: AtomicUsize,
}

impl PollingFallback {
    pub fn new(
        store: Arc<dyn PersistentStore>,
        conversation_key: &str,
        page_limit: usize,
        sink: MessageSink,
    ) -> Self {
        PollingFallback {
            store,
            conversation_key: conversation_key.to_string(),
            page_limit: page_limit.max(1),
            sink,
            cursor: Mutex::new(None),
            timer: Mutex::new(None),
            activations: AtomicUsize::new(0),
        }
    }

    /// Schedule `refresh()` every `interval`, first run one interval from now.
    /// Returns false if already running.
    pub fn start(self: &Arc<Self>, interval: Duration) -> bool {
        let mut timer = self.timer_slot();
        if timer.is_some() {
            debug!("Polling for {} already running", self.conversation_key);
            return false;
        }
        self.activations.fetch_add(1, Ordering::SeqCst);
        info!(
            "Starting polling fallback for {} every {:?}",
            self.conversation_key, interval
        );

        let weak = Arc::downgrade(self);
        *timer = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(polling) = weak.upgrade() else {
                    break;
                };
                if let Err(e) = polling.refresh().await {
                    warn!("Polling refresh for {} failed: {}", polling.conversation_key, e);
                }
            }
        }));
        true
    }

    /// Cancel the timer. Returns false if it was not running.
    pub fn stop(&self) -> bool {
        match self.timer_slot().take() {
            Some(handle) => {
                handle.abort();
                info!("Stopped polling fallback for {}", self.conversation_key);
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.timer_slot().is_some()
    }

    /// How many times `start` actually started the timer.
    pub fn activation_count(&self) -> usize {
        self.activations.load(Ordering::SeqCst)
    }

    pub fn cursor(&self) -> Option<DateTime<Utc>> {
        *self.cursor_slot()
    }

    /// Move the cursor forward; never backwards.
    pub fn advance_cursor(&self, timestamp: DateTime<Utc>) {
        let mut cursor = self.cursor_slot();
        if cursor.map_or(true, |current| timestamp > current) {
            *cursor = Some(timestamp);
        }
    }

    /// Fetch messages with `created_at >= cursor`, feed them to the sink and advance
    /// the cursor to the newest timestamp seen. The bound is inclusive so that ties
    /// at the cursor are re-fetched (and deduplicated) rather than missed.
    pub async fn refresh(&self) -> Result<usize> {
        let since = self.cursor();
        let mut fetched = 0;
        let mut offset = 0;

        for _ in 0..MAX_PAGES_PER_REFRESH {
            let mut query = ListQuery::new(self.page_limit).with_offset(offset);
            if let Some(since) = since {
                query = query.with_since(since);
            }
            let page = self.store.list_messages(&self.conversation_key, query).await?;
            let page_len = page.len();

            for doc in page {
                self.advance_cursor(doc.created_at);
                (self.sink)(doc);
            }
            fetched += page_len;
            offset += page_len;

            if page_len < self.page_limit {
                break;
            }
        }

        debug!("Polling fetched {} messages for {}", fetched, self.conversation_key);
        Ok(fetched)
    }

    fn timer_slot(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.timer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn cursor_slot(&self) -> std::sync::MutexGuard<'_, Option<DateTime<Utc>>> {
        self.cursor.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for PollingFallback {
    fn drop(&mut self) {
        if let Some(handle) = self.timer_slot().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::{Duration as ChronoDuration, TimeZone};

    fn doc(id: &str, secs: i64) -> PersistedMessage {
        PersistedMessage {
            id: id.to_string(),
            conversation_key: "R1".to_string(),
            sender_id: "bob".to_string(),
            body: id.to_string(),
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + ChronoDuration::seconds(secs),
            delivery_status: None,
        }
    }

    fn collecting() -> (MessageSink, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = seen.clone();
        let sink: MessageSink = Arc::new(move |doc: PersistedMessage| sink_seen.lock().unwrap().push(doc.id));
        (sink, seen)
    }

    #[tokio::test]
    async fn refresh_is_inclusive_and_advances_to_max() {
        let store = Arc::new(MemoryStore::new());
        store.insert(doc("a", 1)).await;
        store.insert(doc("b", 2)).await;
        let (sink, seen) = collecting();
        let polling = PollingFallback::new(store.clone(), "R1", 10, sink);

        assert_eq!(polling.refresh().await.unwrap(), 2);
        assert_eq!(polling.cursor(), Some(doc("b", 2).created_at));

        store.insert(doc("c", 2)).await;
        store.insert(doc("d", 3)).await;
        polling.refresh().await.unwrap();

        let seen = seen.lock().unwrap().clone();
        // "b" sits on the cursor and is fetched again; "c" ties with it and is not missed
        assert_eq!(seen, vec!["a", "b", "b", "c", "d"]);
        assert_eq!(polling.cursor(), Some(doc("d", 3).created_at));
    }

    #[tokio::test]
    async fn refresh_pages_through_full_pages() {
        let store = Arc::new(MemoryStore::new());
        for i in 0..5 {
            store.insert(doc(&format!("m{}", i), i)).await;
        }
        let (sink, seen) = collecting();
        let polling = PollingFallback::new(store, "R1", 2, sink);
        assert_eq!(polling.refresh().await.unwrap(), 5);
        assert_eq!(seen.lock().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn cursor_never_moves_backwards() {
        let (sink, _) = collecting();
        let polling = PollingFallback::new(Arc::new(MemoryStore::new()), "R1", 10, sink);
        polling.advance_cursor(doc("x", 10).created_at);
        polling.advance_cursor(doc("y", 5).created_at);
        assert_eq!(polling.cursor(), Some(doc("x", 10).created_at));
    }

    #[tokio::test(start_paused = true)]
    async fn timer_refreshes_until_stopped() {
        let store = Arc::new(MemoryStore::new());
        let (sink, seen) = collecting();
        let polling = Arc::new(PollingFallback::new(store.clone(), "R1", 10, sink));

        assert!(polling.start(Duration::from_millis(2000)));
        assert!(!polling.start(Duration::from_millis(2000)));
        assert_eq!(polling.activation_count(), 1);

        store.insert(doc("a", 1)).await;
        tokio::time::sleep(Duration::from_millis(1900)).await;
        assert!(seen.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(seen.lock().unwrap().clone(), vec!["a"]);

        assert!(polling.stop());
        assert!(!polling.is_running());
        store.insert(doc("b", 2)).await;
        tokio::time::sleep(Duration::from_millis(5000)).await;
        assert_eq!(seen.lock().unwrap().len(), 1);
        assert!(!polling.stop());
    }
}
