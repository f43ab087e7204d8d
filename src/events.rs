//! In-Process Event Bus
//!
//! Publish/subscribe log feeding live run/step status streams:
//! - Bounded replay history (ring buffer)
//! - Non-blocking fan-out to subscriber queues
//! - Late subscribers can replay the most recent events

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::{mpsc, Mutex};

/// Per-subscriber queue capacity. A subscriber that falls further behind
/// than this starts losing events rather than blocking publishers.
const SUBSCRIBER_QUEUE_CAPACITY: usize = 256;

/// A single published event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusEvent {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub event_type: String,
    pub source: String,
    pub data: serde_json::Value,
}

/// Handle returned by [`EventBus::subscribe`]
pub struct Subscription {
    pub id: u64,
    pub rx: mpsc::Receiver<BusEvent>,
}

struct BusState {
    history: VecDeque<BusEvent>,
    subscribers: Vec<(u64, mpsc::Sender<BusEvent>)>,
    next_id: u64,
}

/// Bounded-history publish/subscribe bus
pub struct EventBus {
    history_size: usize,
    state: Mutex<BusState>,
}

impl EventBus {
    /// Create a bus with the given replay-history capacity
    pub fn new(history_size: usize) -> Self {
        Self {
            history_size: history_size.max(1),
            state: Mutex::new(BusState {
                history: VecDeque::new(),
                subscribers: Vec::new(),
                next_id: 0,
            }),
        }
    }

    /// Publish an event to the history buffer and every live subscriber.
    ///
    /// Subscribers are best-effort streams: a full or dropped queue loses
    /// the event and never fails the publisher.
    pub async fn publish(&self, event_type: &str, source: &str, data: serde_json::Value) {
        let event = BusEvent {
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            source: source.to_string(),
            data,
        };

        let senders: Vec<mpsc::Sender<BusEvent>> = {
            let mut state = self.state.lock().await;
            state.history.push_back(event.clone());
            while state.history.len() > self.history_size {
                state.history.pop_front();
            }
            state.subscribers.retain(|(_, tx)| !tx.is_closed());
            state.subscribers.iter().map(|(_, tx)| tx.clone()).collect()
        };

        for tx in senders {
            let _ = tx.try_send(event.clone());
        }
    }

    /// Subscribe to future events, replaying up to `replay_last` buffered
    /// events into the fresh queue first.
    pub async fn subscribe(&self, replay_last: usize) -> Subscription {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE_CAPACITY);

        let (id, replay) = {
            let mut state = self.state.lock().await;
            let id = state.next_id;
            state.next_id += 1;
            state.subscribers.push((id, tx.clone()));

            let skip = state.history.len().saturating_sub(replay_last);
            let replay: Vec<BusEvent> = state.history.iter().skip(skip).cloned().collect();
            (id, replay)
        };

        for event in replay {
            let _ = tx.try_send(event);
        }

        Subscription { id, rx }
    }

    /// Stop delivery to a subscriber
    pub async fn unsubscribe(&self, id: u64) {
        let mut state = self.state.lock().await;
        state.subscribers.retain(|(sub_id, _)| *sub_id != id);
    }

    /// Snapshot of the current history buffer
    pub async fn history(&self) -> Vec<BusEvent> {
        let state = self.state.lock().await;
        state.history.iter().cloned().collect()
    }
}
