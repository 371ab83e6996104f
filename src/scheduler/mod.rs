//! Turn scheduler: routing, admission and turn lifetime accounting.
//!
//! The scheduler decides which session runs next and enforces the three
//! admission gates: per-session mutual exclusion, the global concurrency cap,
//! and the credit/lane economy. It never executes turns itself; admission is
//! announced on the bus and whoever subscribes to `session.turn.started` does
//! the work. A deadline timer force-fails turns that never report back, so a
//! wedged executor cannot leak a concurrency slot.

pub mod score;

pub use score::{ScoreFn, default_score, default_score_fn};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use crate::config::SchedulerConfig;
use crate::error::SchedulerError;
use crate::event::{AgentEvent, EventBus, EventKind, topics};
use crate::session::{
    EnqueueOutcome, PriorityClass, QueuedEvent, RegistryStats, SessionOptions, SessionRegistry,
    TurnSummary,
};

/// Accounting entry for one in-flight turn.
struct PendingTurn {
    event_type: &'static str,
    started_at: tokio::time::Instant,
    cancel: CancellationToken,
}

/// Counters exposed for periodic stats logging.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SchedulerStats {
    pub running_turns: usize,
    #[serde(flatten)]
    pub registry: RegistryStats,
}

pub struct Scheduler {
    config: SchedulerConfig,
    registry: Arc<SessionRegistry>,
    bus: Arc<dyn EventBus>,
    score: ScoreFn,
    /// Single-flight guard: concurrent `schedule` calls collapse into one pass.
    scheduling: AtomicBool,
    /// In-flight turns keyed by session id. Presence here is what enforces
    /// per-session mutual exclusion and the concurrency cap.
    pending: Arc<Mutex<HashMap<String, PendingTurn>>>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, bus: Arc<dyn EventBus>) -> Self {
        let registry = Arc::new(SessionRegistry::new(config.clone()));
        Self {
            config,
            registry,
            bus,
            score: default_score_fn(),
            scheduling: AtomicBool::new(false),
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Replace the admission scoring function.
    pub fn with_score_fn(mut self, score: ScoreFn) -> Self {
        self.score = score;
        self
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Register a new session. Fails on duplicate ids.
    pub fn create_session(
        &self,
        id: &str,
        owner_id: &str,
        priority_class: PriorityClass,
        options: SessionOptions,
    ) -> Result<(), SchedulerError> {
        self.registry.insert(id, owner_id, priority_class, options)?;
        tracing::info!(
            session_id = %id,
            owner_id = %owner_id,
            class = %priority_class,
            "session created"
        );
        Ok(())
    }

    /// Route a validated event to session queues, then run a scheduling pass.
    ///
    /// Resolution order: an explicit `session_id` wins; admin commands
    /// broadcast to every session; everything else fans out by subscription
    /// filter, falling back to the event's default lane. An event that
    /// matches no session is dropped. Returns how many queues accepted it.
    pub async fn route_event(&self, event: AgentEvent) -> usize {
        let event_type = event.event_type();

        let targets: Vec<String> = if let Some(sid) = &event.session_id {
            if self.registry.contains(sid) {
                vec![sid.clone()]
            } else {
                tracing::debug!(
                    session_id = %sid,
                    event_type,
                    "event addressed to unknown session, dropping"
                );
                Vec::new()
            }
        } else if matches!(event.kind, EventKind::AdminCommand(_)) {
            self.registry.session_ids()
        } else {
            self.registry
                .matching_sessions(event_type, event.kind.default_lane())
        };

        if targets.is_empty() {
            tracing::debug!(event_type, "event matched no session, dropping");
            return 0;
        }

        let mut delivered = 0;
        for sid in &targets {
            match self.registry.enqueue(sid, event.clone()) {
                Ok(EnqueueOutcome::Enqueued) => delivered += 1,
                Ok(EnqueueOutcome::EvictedOldest(old)) => {
                    delivered += 1;
                    tracing::warn!(
                        session_id = %sid,
                        event_type,
                        evicted = old.event.event_type(),
                        "queue full, evicted oldest event"
                    );
                }
                Ok(EnqueueOutcome::Rejected) => {
                    tracing::warn!(session_id = %sid, event_type, "queue full, event rejected");
                }
                Err(e) => {
                    // Session disappeared between matching and enqueue.
                    tracing::debug!(session_id = %sid, error = %e, "enqueue failed");
                }
            }
        }

        self.schedule().await;
        delivered
    }

    /// Run one scheduling pass: score all eligible sessions and admit from
    /// the top until the concurrency cap is reached or the gates refuse.
    ///
    /// Re-entrant calls are collapsed; the pass already running covers them.
    pub async fn schedule(&self) {
        if self.scheduling.swap(true, Ordering::SeqCst) {
            return;
        }

        let admitted = self.admit_pass();

        for (session_id, queued) in &admitted {
            tracing::info!(
                session_id = %session_id,
                event_type = queued.event.event_type(),
                "turn started"
            );
            self.bus
                .publish(
                    topics::TURN_STARTED,
                    serde_json::json!({
                        "session_id": session_id,
                        "event": queued.event,
                        "timestamp": chrono::Utc::now(),
                    }),
                )
                .await;
        }

        self.scheduling.store(false, Ordering::SeqCst);
    }

    /// Admission under the pending lock. Scoring is a snapshot; `begin_turn`
    /// re-checks the gates atomically so a stale score can only cost a pass,
    /// never overspend.
    fn admit_pass(&self) -> Vec<(String, QueuedEvent)> {
        let mut pending = self.pending.lock().expect("pending lock poisoned");

        let mut candidates: Vec<_> = self
            .registry
            .candidates()
            .into_iter()
            .filter(|c| !pending.contains_key(&c.session_id))
            .map(|c| {
                let score = (self.score)(&c);
                (c, score)
            })
            .collect();
        // Stable sort keeps registration order as the tie-break.
        candidates.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let mut admitted = Vec::new();
        for (candidate, _score) in candidates {
            if pending.len() >= self.config.concurrency {
                break;
            }
            let Some(queued) = self.registry.begin_turn(&candidate.session_id) else {
                continue;
            };

            let cancel = CancellationToken::new();
            pending.insert(
                candidate.session_id.clone(),
                PendingTurn {
                    event_type: queued.event.event_type(),
                    started_at: tokio::time::Instant::now(),
                    cancel: cancel.clone(),
                },
            );
            self.spawn_deadline_timer(candidate.session_id.clone(), queued.event.event_type(), cancel);
            admitted.push((candidate.session_id, queued));
        }
        admitted
    }

    /// Force-fail the turn if nothing reports back within the timeout. The
    /// timer frees the session itself and publishes the terminal error, so a
    /// wedged executor cannot hold its slot forever.
    fn spawn_deadline_timer(
        &self,
        session_id: String,
        event_type: &'static str,
        cancel: CancellationToken,
    ) {
        let pending = Arc::clone(&self.pending);
        let registry = Arc::clone(&self.registry);
        let bus = Arc::clone(&self.bus);
        let timeout = self.config.turn_timeout;

        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {
                    let removed = pending
                        .lock()
                        .expect("pending lock poisoned")
                        .remove(&session_id)
                        .is_some();
                    if removed {
                        // Signal the executor to abandon the turn quietly.
                        cancel.cancel();
                        tracing::warn!(
                            session_id = %session_id,
                            event_type,
                            timeout_secs = timeout.as_secs(),
                            "turn deadline exceeded, forcing error"
                        );
                        // The timer is this turn's terminal report, so the
                        // summary is recorded here; the runtime's finisher
                        // only records executor-reported terminals.
                        registry.push_summary(
                            &session_id,
                            TurnSummary {
                                event_type: event_type.to_string(),
                                success: false,
                                finished_at: chrono::Utc::now(),
                            },
                        );
                        bus.publish(
                            topics::TURN_ERROR,
                            serde_json::json!({
                                "session_id": session_id,
                                "event_type": event_type,
                                "error": format!(
                                    "turn exceeded deadline of {}s",
                                    timeout.as_secs()
                                ),
                                "timestamp": chrono::Utc::now(),
                            }),
                        )
                        .await;
                    }
                }
            }
        });
    }

    /// Mark a turn finished and free its session. Idempotent: reports for
    /// turns already freed (typically after a deadline force-fail) are
    /// discarded. Returns whether this report was the one that freed the turn.
    pub async fn complete_turn(&self, session_id: &str) -> bool {
        let freed = {
            let mut pending = self.pending.lock().expect("pending lock poisoned");
            match pending.remove(session_id) {
                Some(turn) => {
                    turn.cancel.cancel();
                    tracing::debug!(
                        session_id,
                        event_type = turn.event_type,
                        elapsed_ms = turn.started_at.elapsed().as_millis() as u64,
                        "turn completed"
                    );
                    true
                }
                None => {
                    tracing::debug!(session_id, "late turn report discarded");
                    false
                }
            }
        };

        // Freed capacity or not, queued work may be admissible now.
        self.schedule().await;
        freed
    }

    /// Cancellation token for a session's in-flight turn, if any. Executors
    /// poll this to abandon work the deadline timer already failed.
    pub fn turn_token(&self, session_id: &str) -> Option<CancellationToken> {
        self.pending
            .lock()
            .expect("pending lock poisoned")
            .get(session_id)
            .map(|t| t.cancel.clone())
    }

    /// Add one refill increment of credits to every session.
    pub fn refill_credits(&self) {
        self.registry.refill_all(self.config.credits.refill_per_second);
    }

    /// Count one tool call against the session's lane.
    pub fn note_tool_call(&self, session_id: &str) {
        self.registry.note_tool_call(session_id);
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            running_turns: self.pending.lock().expect("pending lock poisoned").len(),
            registry: self.registry.stats(),
        }
    }
}
