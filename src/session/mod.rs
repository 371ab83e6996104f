//! Session state: priority classes, bounded event queues, lane accounting.
//!
//! Everything here is plain data plus small mutation primitives. Policy (who
//! runs, when, at what cost) lives in the scheduler.

pub mod registry;

pub use registry::{Candidate, RegistryStats, SessionRegistry};

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::config::{DropPolicy, QueueConfig};
use crate::event::AgentEvent;

/// Ring capacity for per-session turn summaries.
const RECENT_BUFFER_CAPACITY: usize = 32;

/// Priority class a session belongs to. Each class has its own lane budget
/// and turn cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityClass {
    Interactive,
    Operational,
    Maintenance,
}

impl PriorityClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            PriorityClass::Interactive => "interactive",
            PriorityClass::Operational => "operational",
            PriorityClass::Maintenance => "maintenance",
        }
    }

    pub fn all() -> [PriorityClass; 3] {
        [
            PriorityClass::Interactive,
            PriorityClass::Operational,
            PriorityClass::Maintenance,
        ]
    }
}

impl fmt::Display for PriorityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Predicate over event type strings, letting a session opt in or out of
/// events regardless of its class default.
#[derive(Clone)]
pub struct SubscriptionFilter(Arc<dyn Fn(&str) -> bool + Send + Sync>);

impl SubscriptionFilter {
    pub fn new(f: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn accepts(&self, event_type: &str) -> bool {
        (self.0)(event_type)
    }
}

impl fmt::Debug for SubscriptionFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SubscriptionFilter(..)")
    }
}

/// An event waiting in a session's queue. Immutable once enqueued.
#[derive(Debug, Clone)]
pub struct QueuedEvent {
    pub event: AgentEvent,
    pub enqueued_at: DateTime<Utc>,
}

/// What happened when an event was pushed into a bounded queue.
#[derive(Debug)]
pub enum EnqueueOutcome {
    /// Accepted without eviction.
    Enqueued,
    /// Accepted; the oldest entry was evicted to make room.
    EvictedOldest(QueuedEvent),
    /// Refused; the queue was full and the policy drops new entries.
    Rejected,
}

/// Bounded FIFO of pending events for one session.
#[derive(Debug, Clone)]
pub struct EventQueue {
    entries: VecDeque<QueuedEvent>,
    capacity: usize,
    policy: DropPolicy,
}

impl EventQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            entries: VecDeque::with_capacity(config.max_per_session.min(64)),
            capacity: config.max_per_session,
            policy: config.drop_policy,
        }
    }

    /// Push an event, applying the overflow policy when full.
    pub fn push(&mut self, event: AgentEvent) -> EnqueueOutcome {
        let queued = QueuedEvent {
            event,
            enqueued_at: Utc::now(),
        };

        if self.entries.len() >= self.capacity {
            match self.policy {
                DropPolicy::DropOldest => {
                    // Evict exactly one entry, then push.
                    let evicted = self.entries.pop_front();
                    self.entries.push_back(queued);
                    match evicted {
                        Some(old) => return EnqueueOutcome::EvictedOldest(old),
                        None => return EnqueueOutcome::Enqueued,
                    }
                }
                DropPolicy::DropNewest => return EnqueueOutcome::Rejected,
            }
        }

        self.entries.push_back(queued);
        EnqueueOutcome::Enqueued
    }

    pub fn pop_front(&mut self) -> Option<QueuedEvent> {
        self.entries.pop_front()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Outcome record of one finished turn, kept for context building.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnSummary {
    pub event_type: String,
    pub success: bool,
    pub finished_at: DateTime<Utc>,
}

/// Turn/tool counters for one lane, reset lazily once the window elapses.
#[derive(Debug, Clone)]
pub struct LaneUsage {
    pub turns: u32,
    pub tool_calls: u32,
    pub window_start: Instant,
}

impl LaneUsage {
    pub fn new() -> Self {
        Self {
            turns: 0,
            tool_calls: 0,
            window_start: Instant::now(),
        }
    }

    /// Zero the counters if the window has elapsed. Called on access, never
    /// from a timer.
    pub fn reset_if_stale(&mut self, window: Duration) {
        if self.window_start.elapsed() >= window {
            self.turns = 0;
            self.tool_calls = 0;
            self.window_start = Instant::now();
        }
    }
}

impl Default for LaneUsage {
    fn default() -> Self {
        Self::new()
    }
}

/// Optional attributes for a new session.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub persona: Option<String>,
    pub attention_focus: Option<String>,
    pub tool_permissions: Vec<String>,
    pub subscription_filter: Option<SubscriptionFilter>,
}

/// One conversational/task session.
///
/// Owned by the registry; mutated only through registry primitives driven by
/// the scheduler. The turn executor receives clones and never writes back.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub owner_id: String,
    pub priority_class: PriorityClass,
    pub credits: f64,
    pub queue: EventQueue,
    pub last_turn_at: Option<DateTime<Utc>>,
    pub recent_buffer: VecDeque<TurnSummary>,
    pub tool_permissions: HashSet<String>,
    pub persona: Option<String>,
    pub attention_focus: Option<String>,
    pub subscription_filter: Option<SubscriptionFilter>,
}

impl Session {
    /// Create a session with full credits and an empty queue.
    pub fn new(
        id: impl Into<String>,
        owner_id: impl Into<String>,
        priority_class: PriorityClass,
        max_credits: f64,
        queue_config: QueueConfig,
        options: SessionOptions,
    ) -> Self {
        Self {
            id: id.into(),
            owner_id: owner_id.into(),
            priority_class,
            credits: max_credits,
            queue: EventQueue::new(queue_config),
            last_turn_at: None,
            recent_buffer: VecDeque::with_capacity(RECENT_BUFFER_CAPACITY),
            tool_permissions: options.tool_permissions.into_iter().collect(),
            persona: options.persona,
            attention_focus: options.attention_focus,
            subscription_filter: options.subscription_filter,
        }
    }

    /// Whether this session wants an event: the explicit filter decides when
    /// present, otherwise the event's default lane must match the class.
    pub fn wants(&self, event_type: &str, default_lane: PriorityClass) -> bool {
        match &self.subscription_filter {
            Some(filter) => filter.accepts(event_type),
            None => self.priority_class == default_lane,
        }
    }

    /// Record a finished turn, evicting the oldest summary when full.
    pub fn push_summary(&mut self, summary: TurnSummary) {
        if self.recent_buffer.len() >= RECENT_BUFFER_CAPACITY {
            self.recent_buffer.pop_front();
        }
        self.recent_buffer.push_back(summary);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventKind, MessagePayload};
    use pretty_assertions::assert_eq;

    fn message(content: &str) -> AgentEvent {
        AgentEvent::new(EventKind::MessageCreated(MessagePayload {
            channel_id: "c".to_string(),
            author_id: "u".to_string(),
            author_is_bot: false,
            content: content.to_string(),
        }))
    }

    fn queue(capacity: usize, policy: DropPolicy) -> EventQueue {
        EventQueue::new(QueueConfig {
            max_per_session: capacity,
            drop_policy: policy,
        })
    }

    fn queued_contents(q: &EventQueue) -> Vec<String> {
        q.entries
            .iter()
            .map(|e| match &e.event.kind {
                EventKind::MessageCreated(m) => m.content.clone(),
                other => other.event_type().to_string(),
            })
            .collect()
    }

    #[test]
    fn test_queue_never_exceeds_capacity() {
        let mut q = queue(2, DropPolicy::DropOldest);
        for i in 0..10 {
            q.push(message(&format!("m{i}")));
            assert!(q.len() <= 2);
        }
    }

    #[test]
    fn test_drop_oldest_eviction_order() {
        // Enqueuing A, B, C into a capacity-2 queue yields [B, C].
        let mut q = queue(2, DropPolicy::DropOldest);
        q.push(message("A"));
        q.push(message("B"));
        let outcome = q.push(message("C"));

        assert!(matches!(outcome, EnqueueOutcome::EvictedOldest(_)));
        assert_eq!(queued_contents(&q), vec!["B", "C"]);
    }

    #[test]
    fn test_drop_newest_rejects() {
        let mut q = queue(2, DropPolicy::DropNewest);
        q.push(message("A"));
        q.push(message("B"));
        let outcome = q.push(message("C"));

        assert!(matches!(outcome, EnqueueOutcome::Rejected));
        assert_eq!(queued_contents(&q), vec!["A", "B"]);
    }

    #[test]
    fn test_fifo_order() {
        let mut q = queue(10, DropPolicy::DropOldest);
        q.push(message("first"));
        q.push(message("second"));

        let head = q.pop_front().unwrap();
        match head.event.kind {
            EventKind::MessageCreated(m) => assert_eq!(m.content, "first"),
            _ => panic!("wrong kind"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_lane_usage_lazy_reset() {
        let mut lane = LaneUsage::new();
        lane.turns = 5;
        lane.tool_calls = 9;

        // Within the window nothing resets.
        lane.reset_if_stale(Duration::from_secs(60));
        assert_eq!(lane.turns, 5);

        tokio::time::advance(Duration::from_secs(61)).await;
        lane.reset_if_stale(Duration::from_secs(60));
        assert_eq!(lane.turns, 0);
        assert_eq!(lane.tool_calls, 0);
    }

    #[test]
    fn test_subscription_filter_overrides_class() {
        let opts = SessionOptions {
            subscription_filter: Some(SubscriptionFilter::new(|t| t == "system.tick")),
            ..Default::default()
        };
        let session = Session::new(
            "s1",
            "owner",
            PriorityClass::Maintenance,
            30.0,
            QueueConfig::default(),
            opts,
        );

        // Filter accepts ticks even though maintenance is not the tick lane.
        assert!(session.wants("system.tick", PriorityClass::Operational));
        // Filter rejects messages even if the class matched.
        assert!(!session.wants("channel.message.created", PriorityClass::Maintenance));
    }

    #[test]
    fn test_recent_buffer_is_bounded() {
        let mut session = Session::new(
            "s1",
            "owner",
            PriorityClass::Interactive,
            30.0,
            QueueConfig::default(),
            SessionOptions::default(),
        );
        for i in 0..100 {
            session.push_summary(TurnSummary {
                event_type: format!("t{i}"),
                success: true,
                finished_at: Utc::now(),
            });
        }
        assert_eq!(session.recent_buffer.len(), RECENT_BUFFER_CAPACITY);
        assert_eq!(session.recent_buffer.back().unwrap().event_type, "t99");
    }
}
