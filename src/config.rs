//! Runtime configuration.
//!
//! The runtime consumes configuration, it does not own it: an embedding
//! application deserializes these structs from wherever it keeps settings and
//! hands them over at construction time. Defaults match a small single-host
//! deployment.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::session::PriorityClass;

/// Per-lane budget for one priority class, per window.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LaneBudget {
    /// Maximum turns started in one window.
    pub turns: u32,
    /// Maximum tool calls counted in one window.
    pub tool_calls: u32,
}

/// Budgets for all three lanes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LaneConfig {
    pub interactive: LaneBudget,
    pub operational: LaneBudget,
    pub maintenance: LaneBudget,
}

impl LaneConfig {
    /// Budget for a priority class.
    pub fn budget(&self, class: PriorityClass) -> LaneBudget {
        match class {
            PriorityClass::Interactive => self.interactive,
            PriorityClass::Operational => self.operational,
            PriorityClass::Maintenance => self.maintenance,
        }
    }
}

impl Default for LaneConfig {
    fn default() -> Self {
        Self {
            interactive: LaneBudget {
                turns: 60,
                tool_calls: 120,
            },
            operational: LaneBudget {
                turns: 30,
                tool_calls: 60,
            },
            maintenance: LaneBudget {
                turns: 10,
                tool_calls: 20,
            },
        }
    }
}

/// Credit economy: how often a session may start a turn.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CreditConfig {
    /// Upper bound for any session's balance.
    pub max: f64,
    /// Credits added per refill invocation (the runtime refills once a second).
    pub refill_per_second: f64,
    /// Cost of starting one turn, per priority class.
    pub cost_interactive: f64,
    pub cost_operational: f64,
    pub cost_maintenance: f64,
}

impl CreditConfig {
    /// Cost of one turn for a priority class.
    pub fn cost(&self, class: PriorityClass) -> f64 {
        match class {
            PriorityClass::Interactive => self.cost_interactive,
            PriorityClass::Operational => self.cost_operational,
            PriorityClass::Maintenance => self.cost_maintenance,
        }
    }
}

impl Default for CreditConfig {
    fn default() -> Self {
        Self {
            max: 30.0,
            refill_per_second: 1.0,
            cost_interactive: 2.0,
            cost_operational: 1.0,
            cost_maintenance: 1.0,
        }
    }
}

/// What to do when a session's queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropPolicy {
    /// Evict the single oldest entry, then push the new one.
    DropOldest,
    /// Refuse the new entry.
    DropNewest,
}

/// Bounded per-session event queue settings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QueueConfig {
    pub max_per_session: usize,
    pub drop_policy: DropPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_per_session: 100,
            drop_policy: DropPolicy::DropOldest,
        }
    }
}

/// Scheduler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Maximum turns running at once, across all sessions.
    pub concurrency: usize,
    pub lanes: LaneConfig,
    pub credits: CreditConfig,
    pub queue: QueueConfig,
    /// How long a turn may run before it is force-failed.
    #[serde(with = "duration_secs")]
    pub turn_timeout: Duration,
    /// Lane counters reset once this window elapses (checked lazily).
    #[serde(with = "duration_secs")]
    pub lane_window: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            lanes: LaneConfig::default(),
            credits: CreditConfig::default(),
            queue: QueueConfig::default(),
            turn_timeout: Duration::from_secs(5 * 60),
            lane_window: Duration::from_secs(60),
        }
    }
}

impl SchedulerConfig {
    /// Set the turn timeout.
    pub fn with_turn_timeout(mut self, timeout: Duration) -> Self {
        self.turn_timeout = timeout;
        self
    }

    /// Set the concurrency limit.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }
}

/// One proactive task in the round-robin list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProactiveTask {
    pub id: String,
    /// Human-readable purpose; doubles as the content of a context nudge.
    pub description: String,
    /// Direct tool invocation. When absent the task is a context nudge routed
    /// through the ordinary event pipeline.
    pub tool_call: Option<ProactiveToolCall>,
}

/// Tool name and arguments for a direct proactive invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProactiveToolCall {
    pub name: String,
    pub args: serde_json::Value,
}

/// Proactive loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProactiveConfig {
    /// Ordered task list, cycled one task per iteration.
    pub tasks: Vec<ProactiveTask>,
    /// Pause between iterations in milliseconds. A 250ms floor is enforced at
    /// runtime regardless of this value.
    pub pause_ms: u64,
    /// Session that receives the synthetic events.
    pub session_id: String,
    /// Route successful tool results back into the pipeline as events.
    pub emit_tool_results_as_events: bool,
}

impl Default for ProactiveConfig {
    fn default() -> Self {
        Self {
            tasks: Vec::new(),
            pause_ms: 10_000,
            session_id: String::new(),
            emit_tool_results_as_events: true,
        }
    }
}

/// Synthetic tick emitter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickConfig {
    pub enabled: bool,
    #[serde(with = "duration_secs")]
    pub interval: Duration,
    /// Session the ticks are addressed to.
    pub session_id: String,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: Duration::from_secs(15),
            session_id: String::new(),
        }
    }
}

/// Top-level runtime configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub scheduler: SchedulerConfig,
    pub proactive: ProactiveConfig,
    pub tick: TickConfig,
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}
