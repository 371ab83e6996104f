//! Owns every session and the shared lane counters.
//!
//! All state lives behind one `std::sync::Mutex` and every method is a short
//! synchronous critical section with no awaits, so the scheduler can call in
//! from async context without ordering hazards. Admission is a single atomic
//! primitive: [`SessionRegistry::begin_turn`] checks credits, lane budget and
//! queue depth and commits the deduction in one lock hold.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;
use serde::Serialize;

use crate::config::SchedulerConfig;
use crate::error::SchedulerError;
use crate::event::AgentEvent;
use crate::session::{
    EnqueueOutcome, LaneUsage, PriorityClass, QueuedEvent, Session, SessionOptions, TurnSummary,
};

/// Read-only view of one session used for scheduling decisions.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub session_id: String,
    pub priority_class: PriorityClass,
    pub credits: f64,
    /// Seconds since the session last started a turn. Sessions that never ran
    /// report a large value so they are not starved at startup.
    pub staleness_secs: f64,
    pub queue_depth: usize,
}

/// Point-in-time counters for logging.
#[derive(Debug, Clone, Serialize)]
pub struct RegistryStats {
    pub sessions: usize,
    pub queued_events: usize,
    pub lane_turns: HashMap<String, u32>,
    pub lane_tool_calls: HashMap<String, u32>,
}

struct RegistryState {
    sessions: HashMap<String, Session>,
    /// Insertion order, for deterministic iteration and tie-breaking.
    order: Vec<String>,
    lanes: HashMap<PriorityClass, LaneUsage>,
}

/// Session storage and mutation primitives. Policy lives in the scheduler.
pub struct SessionRegistry {
    config: SchedulerConfig,
    state: Mutex<RegistryState>,
}

impl SessionRegistry {
    pub fn new(config: SchedulerConfig) -> Self {
        let lanes = PriorityClass::all()
            .into_iter()
            .map(|c| (c, LaneUsage::new()))
            .collect();
        Self {
            config,
            state: Mutex::new(RegistryState {
                sessions: HashMap::new(),
                order: Vec::new(),
                lanes,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RegistryState> {
        self.state.lock().expect("registry lock poisoned")
    }

    /// Register a new session with full credits. Duplicate ids are an error,
    /// never an overwrite.
    pub fn insert(
        &self,
        id: &str,
        owner_id: &str,
        priority_class: PriorityClass,
        options: SessionOptions,
    ) -> Result<(), SchedulerError> {
        let mut state = self.lock();
        if state.sessions.contains_key(id) {
            return Err(SchedulerError::SessionExists(id.to_string()));
        }
        let session = Session::new(
            id,
            owner_id,
            priority_class,
            self.config.credits.max,
            self.config.queue,
            options,
        );
        state.sessions.insert(id.to_string(), session);
        state.order.push(id.to_string());
        Ok(())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().sessions.contains_key(id)
    }

    /// All session ids, in registration order.
    pub fn session_ids(&self) -> Vec<String> {
        self.lock().order.clone()
    }

    /// Sessions whose subscription filter (or class default) accepts an event
    /// type, in registration order.
    pub fn matching_sessions(
        &self,
        event_type: &str,
        default_lane: PriorityClass,
    ) -> Vec<String> {
        let state = self.lock();
        state
            .order
            .iter()
            .filter_map(|id| state.sessions.get(id))
            .filter(|s| s.wants(event_type, default_lane))
            .map(|s| s.id.clone())
            .collect()
    }

    /// Push an event onto a session's queue, applying the overflow policy.
    pub fn enqueue(&self, id: &str, event: AgentEvent) -> Result<EnqueueOutcome, SchedulerError> {
        let mut state = self.lock();
        let session = state
            .sessions
            .get_mut(id)
            .ok_or_else(|| SchedulerError::UnknownSession(id.to_string()))?;
        Ok(session.queue.push(event))
    }

    /// Sessions with queued work, in registration order. The caller scores and
    /// sorts; registration order is the stable tie-break.
    pub fn candidates(&self) -> Vec<Candidate> {
        let state = self.lock();
        let now = Utc::now();
        state
            .order
            .iter()
            .filter_map(|id| state.sessions.get(id))
            .filter(|s| !s.queue.is_empty())
            .map(|s| Candidate {
                session_id: s.id.clone(),
                priority_class: s.priority_class,
                credits: s.credits,
                staleness_secs: match s.last_turn_at {
                    Some(t) => (now - t).num_milliseconds().max(0) as f64 / 1000.0,
                    None => f64::MAX,
                },
                queue_depth: s.queue.len(),
            })
            .collect()
    }

    /// Atomically admit one turn: verify credits and lane budget, deduct the
    /// turn cost, bump the lane counter, and dequeue the head event. Returns
    /// `None` when any check fails, leaving all state untouched.
    pub fn begin_turn(&self, id: &str) -> Option<QueuedEvent> {
        let mut state = self.lock();

        let (class, cost) = {
            let session = state.sessions.get(id)?;
            if session.queue.is_empty() {
                return None;
            }
            let cost = self.config.credits.cost(session.priority_class);
            if session.credits < cost {
                return None;
            }
            (session.priority_class, cost)
        };

        let budget = self.config.lanes.budget(class);
        let lane = state.lanes.entry(class).or_default();
        lane.reset_if_stale(self.config.lane_window);
        if lane.turns >= budget.turns {
            return None;
        }
        lane.turns += 1;

        let session = state.sessions.get_mut(id)?;
        session.credits -= cost;
        session.last_turn_at = Some(Utc::now());
        session.queue.pop_front()
    }

    /// Add credits to every session, saturating at the configured maximum.
    pub fn refill_all(&self, amount: f64) {
        let max = self.config.credits.max;
        let mut state = self.lock();
        for session in state.sessions.values_mut() {
            session.credits = (session.credits + amount).min(max);
        }
    }

    /// Count one tool call against a session's lane.
    pub fn note_tool_call(&self, id: &str) {
        let mut state = self.lock();
        let Some(class) = state.sessions.get(id).map(|s| s.priority_class) else {
            return;
        };
        let window = self.config.lane_window;
        let lane = state.lanes.entry(class).or_default();
        lane.reset_if_stale(window);
        lane.tool_calls += 1;
    }

    /// Append a turn summary to a session's bounded recent buffer.
    pub fn push_summary(&self, id: &str, summary: TurnSummary) {
        let mut state = self.lock();
        if let Some(session) = state.sessions.get_mut(id) {
            session.push_summary(summary);
        }
    }

    /// Clone of a session's current state, for turn execution.
    pub fn snapshot(&self, id: &str) -> Option<Session> {
        self.lock().sessions.get(id).cloned()
    }

    pub fn stats(&self) -> RegistryStats {
        let mut state = self.lock();
        let window = self.config.lane_window;
        for lane in state.lanes.values_mut() {
            lane.reset_if_stale(window);
        }
        RegistryStats {
            sessions: state.sessions.len(),
            queued_events: state.sessions.values().map(|s| s.queue.len()).sum(),
            lane_turns: state
                .lanes
                .iter()
                .map(|(c, l)| (c.as_str().to_string(), l.turns))
                .collect(),
            lane_tool_calls: state
                .lanes
                .iter()
                .map(|(c, l)| (c.as_str().to_string(), l.tool_calls))
                .collect(),
        }
    }
}
