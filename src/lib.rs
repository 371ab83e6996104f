//! Turnstile: the runtime core of a multi-session autonomous agent.
//!
//! Inbound events are validated at the wire boundary, routed to per-session
//! bounded queues, and admitted as turns by a priority-weighted scheduler
//! that enforces per-session mutual exclusion, a global concurrency cap and
//! a credit/lane economy. Admitted turns run a bounded LLM/tool loop; a
//! deadline timer recovers sessions whose turns never report back; a
//! proactive loop injects synthetic work so the agent acts without being
//! spoken to.
//!
//! The crate is transport- and model-agnostic: embedders supply the
//! [`llm::LlmProvider`], [`tools::ToolExecutor`], [`memory::MemoryStore`] and
//! [`context::ContextAssembler`] implementations and drive the whole thing
//! through [`runtime::Runtime`].

pub mod config;
pub mod context;
pub mod error;
pub mod event;
pub mod llm;
pub mod memory;
pub mod proactive;
pub mod runtime;
pub mod scheduler;
pub mod session;
pub mod tools;
pub mod turn;

pub use config::{RuntimeConfig, SchedulerConfig};
pub use error::{EventError, SchedulerError, TurnError};
pub use event::{AgentEvent, EventBus, EventKind, InMemoryEventBus, WireEvent};
pub use runtime::Runtime;
pub use scheduler::Scheduler;
pub use session::{PriorityClass, Session, SessionOptions};
