//! Event Bus — in-process typed pub/sub fanning lifecycle events to observers.
//!
//! Generalizes the per-feature broadcast channels already used around the
//! codebase (`DeliveryStore`, `TaskStore`, `RunStore`) into one topic-routed
//! bus: publishers never block, slow subscribers lose their oldest
//! undelivered event rather than stall the publisher, and a handler that
//! errors is dropped from the subscriber table instead of poisoning the bus.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Topics and events
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    Connected,
    UserMessage,
    LlmRequest,
    LlmResponse,
    ToolCall,
    ToolResult,
    AgentResponse,
    SystemEvent,
    ContextPressure,
    ProactiveAlerts,
    TaskEnqueued,
    TaskLeased,
    TaskCompleted,
    TaskFailed,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::UserMessage => "user_message",
            Self::LlmRequest => "llm_request",
            Self::LlmResponse => "llm_response",
            Self::ToolCall => "tool_call",
            Self::ToolResult => "tool_result",
            Self::AgentResponse => "agent_response",
            Self::SystemEvent => "system_event",
            Self::ContextPressure => "context_pressure",
            Self::ProactiveAlerts => "proactive_alerts",
            Self::TaskEnqueued => "task_enqueued",
            Self::TaskLeased => "task_leased",
            Self::TaskCompleted => "task_completed",
            Self::TaskFailed => "task_failed",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BusEvent {
    pub topic: Topic,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub payload: serde_json::Value,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Subscriber queue — bounded, drop-oldest
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct SubscriberQueue {
    id: u64,
    topic: Topic,
    session_filter: Option<String>,
    capacity: usize,
    buf: Mutex<VecDeque<BusEvent>>,
    dropped: AtomicU64,
    notify: Notify,
}

impl SubscriberQueue {
    fn accepts(&self, ev: &BusEvent) -> bool {
        match (&self.session_filter, &ev.session_id) {
            (Some(want), Some(got)) => want == got,
            (Some(_), None) => false,
            (None, _) => true,
        }
    }

    fn push(&self, ev: BusEvent) {
        let mut buf = self.buf.lock();
        if buf.len() >= self.capacity {
            buf.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        buf.push_back(ev);
        drop(buf);
        self.notify.notify_one();
    }

    async fn recv(&self) -> BusEvent {
        loop {
            if let Some(ev) = self.buf.lock().pop_front() {
                return ev;
            }
            self.notify.notified().await;
        }
    }
}

/// A handle to a live subscription. Dropping it does not unsubscribe —
/// call [`EventBus::unsubscribe`] explicitly, or let the bus prune it once
/// the handler task observes an error.
pub struct Subscription {
    id: u64,
    topic: Topic,
    queue: Arc<SubscriberQueue>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn dropped_count(&self) -> u64 {
        self.queue.dropped.load(Ordering::Relaxed)
    }

    /// Pull the next event, waiting if the queue is currently empty.
    pub async fn recv(&self) -> BusEvent {
        self.queue.recv().await
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Event bus
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct EventBus {
    subscribers: RwLock<HashMap<Topic, Vec<Arc<SubscriberQueue>>>>,
    default_capacity: usize,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new(default_capacity: usize) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            default_capacity: default_capacity.max(1),
            next_id: AtomicU64::new(1),
        }
    }

    /// Fire-and-forget publish. Never blocks; slow subscribers drop their
    /// oldest undelivered event instead.
    pub fn publish(&self, topic: Topic, session_id: Option<String>, payload: serde_json::Value) {
        let ev = BusEvent {
            topic,
            session_id,
            payload,
        };
        let subs = self.subscribers.read();
        if let Some(list) = subs.get(&topic) {
            for q in list {
                if q.accepts(&ev) {
                    q.push(ev.clone());
                }
            }
        }
    }

    /// Register a pull-based subscription. The caller drives `recv()` in a
    /// loop (e.g. the SSE bridge). Filtering by `session_id` is optional.
    pub fn subscribe(&self, topic: Topic, session_filter: Option<String>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let queue = Arc::new(SubscriberQueue {
            id,
            topic,
            session_filter,
            capacity: self.default_capacity,
            buf: Mutex::new(VecDeque::new()),
            dropped: AtomicU64::new(0),
            notify: Notify::new(),
        });
        self.subscribers
            .write()
            .entry(topic)
            .or_default()
            .push(queue.clone());
        Subscription { id, topic, queue }
    }

    pub fn unsubscribe(&self, sub: &Subscription) {
        self.remove(sub.topic, sub.id);
    }

    fn remove(&self, topic: Topic, id: u64) {
        let mut subs = self.subscribers.write();
        if let Some(list) = subs.get_mut(&topic) {
            list.retain(|q| q.id != id);
        }
    }

    /// Register a push-based handler that runs independently of the
    /// publisher. If `handler` returns `Err`, the error is logged and the
    /// handler's subscription is removed from the table for that topic.
    pub fn subscribe_handler<F, Fut>(
        self: &Arc<Self>,
        topic: Topic,
        session_filter: Option<String>,
        mut handler: F,
    ) where
        F: FnMut(BusEvent) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), String>> + Send,
    {
        let sub = self.subscribe(topic, session_filter);
        let bus = self.clone();
        tokio::spawn(async move {
            loop {
                let ev = sub.recv().await;
                if let Err(err) = handler(ev).await {
                    tracing::warn!(
                        topic = topic.as_str(),
                        subscriber_id = sub.id,
                        error = %err,
                        "event bus handler failed, removing subscriber"
                    );
                    bus.unsubscribe(&sub);
                    break;
                }
            }
        });
    }

    /// Total pending-undelivered drop count across all subscribers of a topic.
    pub fn dropped_for_topic(&self, topic: Topic) -> u64 {
        self.subscribers
            .read()
            .get(&topic)
            .map(|list| list.iter().map(|q| q.dropped.load(Ordering::Relaxed)).sum())
            .unwrap_or(0)
    }

    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.subscribers
            .read()
            .get(&topic)
            .map(|l| l.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(n: i32) -> serde_json::Value {
        serde_json::json!({ "n": n })
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_noop() {
        let bus = EventBus::new(8);
        bus.publish(Topic::SystemEvent, None, payload(1));
    }

    #[tokio::test]
    async fn subscriber_receives_in_order() {
        let bus = EventBus::new(8);
        let sub = bus.subscribe(Topic::LlmRequest, None);
        bus.publish(Topic::LlmRequest, None, payload(1));
        bus.publish(Topic::LlmRequest, None, payload(2));
        let a = sub.recv().await;
        let b = sub.recv().await;
        assert_eq!(a.payload, payload(1));
        assert_eq!(b.payload, payload(2));
    }

    #[tokio::test]
    async fn session_filter_excludes_other_sessions() {
        let bus = EventBus::new(8);
        let sub = bus.subscribe(Topic::ToolCall, Some("s1".into()));
        bus.publish(Topic::ToolCall, Some("s2".into()), payload(1));
        bus.publish(Topic::ToolCall, Some("s1".into()), payload(2));
        let ev = sub.recv().await;
        assert_eq!(ev.session_id.as_deref(), Some("s1"));
    }

    #[tokio::test]
    async fn overflow_drops_oldest_and_counts() {
        let bus = EventBus::new(2);
        let sub = bus.subscribe(Topic::SystemEvent, None);
        bus.publish(Topic::SystemEvent, None, payload(1));
        bus.publish(Topic::SystemEvent, None, payload(2));
        bus.publish(Topic::SystemEvent, None, payload(3));
        assert_eq!(sub.dropped_count(), 1);
        let first = sub.recv().await;
        assert_eq!(first.payload, payload(2));
        let second = sub.recv().await;
        assert_eq!(second.payload, payload(3));
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let bus = EventBus::new(8);
        let sub = bus.subscribe(Topic::SystemEvent, None);
        bus.unsubscribe(&sub);
        assert_eq!(bus.subscriber_count(Topic::SystemEvent), 0);
        bus.publish(Topic::SystemEvent, None, payload(1));
    }

    #[tokio::test]
    async fn erroring_handler_is_removed() {
        let bus = Arc::new(EventBus::new(8));
        bus.subscribe_handler(Topic::SystemEvent, None, |_ev| async move {
            Err("boom".to_string())
        });
        bus.publish(Topic::SystemEvent, None, payload(1));
        // Give the spawned task a chance to run and unsubscribe.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(bus.subscriber_count(Topic::SystemEvent), 0);
    }
}
