use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

use crate::model::AlertEvent;

pub const ALERT_LOG_CAPACITY: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub target_id: String,
    pub url: String,
}

impl DedupKey {
    pub fn new(target_id: &str, url: &str) -> Self {
        Self {
            target_id: target_id.to_owned(),
            url: url.to_owned(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// First in-stock observation since the key was last out of stock.
    Alert,
    /// Still in stock and already alerted.
    Suppressed,
    /// Out of stock; the key is re-armed.
    Cleared,
}

/// Tracks which (target, URL) pairs have already alerted.
///
/// A key is in the set exactly when its latest admitted snapshot was in stock.
#[derive(Debug, Default)]
pub struct Deduplicator {
    alerted: Mutex<HashSet<DedupKey>>,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&self, key: DedupKey, in_stock: bool) -> Decision {
        let mut alerted = self
            .alerted
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !in_stock {
            alerted.remove(&key);
            return Decision::Cleared;
        }
        if alerted.insert(key) {
            Decision::Alert
        } else {
            Decision::Suppressed
        }
    }

    pub fn is_alerted(&self, key: &DedupKey) -> bool {
        self.alerted
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(key)
    }

    /// Forgets every key belonging to `target_id`.
    pub fn forget_target(&self, target_id: &str) {
        self.alerted
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .retain(|key| key.target_id != target_id);
    }
}

/// Newest-first alert history, truncated by insertion order.
#[derive(Debug)]
pub struct AlertLog {
    capacity: usize,
    events: Mutex<VecDeque<AlertEvent>>,
}

impl Default for AlertLog {
    fn default() -> Self {
        Self::with_capacity(ALERT_LOG_CAPACITY)
    }
}

impl AlertLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            events: Mutex::new(VecDeque::new()),
        }
    }

    pub fn push(&self, event: AlertEvent) {
        let mut events = self
            .events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        events.push_front(event);
        events.truncate(self.capacity);
    }

    pub fn snapshot(&self) -> Vec<AlertEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }
}
