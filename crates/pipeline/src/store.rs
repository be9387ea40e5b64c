use crate::message::Message;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};

/// Persistence of inbound logical messages and of the per-user LRU
/// `ProcessedSet` used for webhook dedup. `store`/`retrieve`/`remove` are a
/// durability/audit log independent of the live `UserBuffer` the scheduler
/// drains from; `has_processed`/`mark_processed` are the dedup gate and
/// must be linearisable per `(user_id, message_id)`.
#[async_trait]
pub trait MessageStore: Send + Sync + std::fmt::Debug {
    async fn store(&self, user_id: &str, message: Message);
    async fn retrieve(&self, user_id: &str) -> Vec<Message>;
    async fn remove(&self, user_id: &str);
    async fn has_processed(&self, user_id: &str, message_id: &str) -> bool;
    /// Idempotent: marking an already-processed ID is a no-op.
    async fn mark_processed(&self, user_id: &str, message_id: &str);
}

/// Interface for a durable `MessageStore` implementation (e.g. backed by
/// `wabridge-persistence`). No implementation ships here; the pipeline only
/// needs the trait object to swap one in.
pub trait DurableMessageStore: MessageStore {}

#[derive(Debug)]
struct ProcessedLru {
    capacity: usize,
    order: VecDeque<String>,
    members: HashSet<String>,
}

impl ProcessedLru {
    fn new(capacity: usize) -> Self {
        Self { capacity, order: VecDeque::new(), members: HashSet::new() }
    }

    fn contains(&self, id: &str) -> bool {
        self.members.contains(id)
    }

    /// Insertion-order eviction: the least-recently-*inserted* ID is
    /// dropped, not the least-recently-*accessed* one (spec §4.1).
    fn insert(&mut self, id: String) {
        if self.members.contains(&id) {
            return;
        }
        if self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.members.remove(&oldest);
            }
        }
        self.members.insert(id.clone());
        self.order.push_back(id);
    }
}

#[derive(Debug)]
pub struct InMemoryMessageStore {
    max_processed_ids: usize,
    messages: Mutex<HashMap<String, VecDeque<Message>>>,
    processed: Mutex<HashMap<String, ProcessedLru>>,
}

impl InMemoryMessageStore {
    pub fn new(max_processed_ids: usize) -> Self {
        Self {
            max_processed_ids,
            messages: Mutex::new(HashMap::new()),
            processed: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn store(&self, user_id: &str, message: Message) {
        self.messages.lock().entry(user_id.to_string()).or_default().push_back(message);
    }

    async fn retrieve(&self, user_id: &str) -> Vec<Message> {
        self.messages.lock().get(user_id).map(|q| q.iter().cloned().collect()).unwrap_or_default()
    }

    async fn remove(&self, user_id: &str) {
        self.messages.lock().remove(user_id);
    }

    async fn has_processed(&self, user_id: &str, message_id: &str) -> bool {
        self.processed.lock().get(user_id).map(|set| set.contains(message_id)).unwrap_or(false)
    }

    async fn mark_processed(&self, user_id: &str, message_id: &str) {
        let capacity = self.max_processed_ids;
        self.processed
            .lock()
            .entry(user_id.to_string())
            .or_insert_with(|| ProcessedLru::new(capacity))
            .insert(message_id.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dedup_is_per_user() {
        let store = InMemoryMessageStore::new(10);
        store.mark_processed("u1", "m1").await;
        assert!(store.has_processed("u1", "m1").await);
        assert!(!store.has_processed("u2", "m1").await);
    }

    #[tokio::test]
    async fn mark_processed_is_idempotent() {
        let store = InMemoryMessageStore::new(2);
        store.mark_processed("u1", "m1").await;
        store.mark_processed("u1", "m1").await;
        store.mark_processed("u1", "m2").await;
        assert!(store.has_processed("u1", "m1").await);
        assert!(store.has_processed("u1", "m2").await);
    }

    #[tokio::test]
    async fn evicts_least_recently_inserted() {
        let store = InMemoryMessageStore::new(2);
        store.mark_processed("u1", "m1").await;
        store.mark_processed("u1", "m2").await;
        store.mark_processed("u1", "m3").await;
        assert!(!store.has_processed("u1", "m1").await);
        assert!(store.has_processed("u1", "m2").await);
        assert!(store.has_processed("u1", "m3").await);
    }

    #[tokio::test]
    async fn store_and_retrieve_do_not_leak_across_users() {
        let store = InMemoryMessageStore::new(10);
        store.store("u1", Message::new("m1", "u1", "hi", 0)).await;
        store.store("u2", Message::new("m2", "u2", "yo", 0)).await;
        assert_eq!(store.retrieve("u1").await.len(), 1);
        assert_eq!(store.retrieve("u2").await.len(), 1);
    }
}
