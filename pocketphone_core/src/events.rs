//! Typed publish/subscribe used by every stateful service.
//!
//! Each service owns its own `Broadcaster` and publishes full snapshots after
//! a mutation. Subscribers receive payloads on a `flume` channel; dropped
//! receivers are pruned on the next publish.

use flume::{Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::integration::IntegrationSettings;
use crate::navigation::NavState;
use crate::records::Record;

pub struct Broadcaster<T> {
    subscribers: Mutex<Vec<Sender<T>>>,
}

impl<T: Clone> Broadcaster<T> {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe(&self) -> Receiver<T> {
        let (tx, rx) = flume::unbounded();
        match self.subscribers.lock() {
            Ok(mut subscribers) => subscribers.push(tx),
            Err(e) => e.into_inner().push(tx),
        }
        rx
    }

    /// Deliver `payload` to every live subscriber. Returns how many received it.
    pub fn publish(&self, payload: &T) -> usize {
        let mut subscribers = match self.subscribers.lock() {
            Ok(guard) => guard,
            Err(e) => e.into_inner(),
        };
        subscribers.retain(|tx| tx.send(payload.clone()).is_ok());
        subscribers.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map(|s| s.len()).unwrap_or(0)
    }
}

impl<T: Clone> Default for Broadcaster<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// `unread-updated` payload: always the full picture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnreadSnapshot {
    pub counts: BTreeMap<String, u64>,
    pub total: u64,
    pub timestamp: i64,
}

/// `content-generated` payload: only the records added by this attach.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentGenerated {
    pub message_index: usize,
    pub records: Vec<Record>,
}

/// `settings-updated` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingsUpdated {
    pub settings: IntegrationSettings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationChanged {
    pub state: NavState,
    pub depth: usize,
}
