//! Runtime assembly: wires scheduler, executor and proactive loop together
//! over the bus and owns the background timers.
//!
//! Lifecycle: [`Runtime::start`] subscribes the internal handlers and spawns
//! the refill, tick and stats tasks; [`Runtime::shutdown`] stops the tasks,
//! stops the proactive loop and releases every subscription. The runtime
//! never touches a model or tool directly; it only moves events.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::RuntimeConfig;
use crate::context::ContextAssembler;
use crate::error::{EventError, SchedulerError};
use crate::event::{
    AgentEvent, EventBus, EventKind, SubscriptionHandle, TickPayload, WireEvent, handler, topics,
};
use crate::llm::LlmProvider;
use crate::memory::MemoryStore;
use crate::proactive::ProactiveLoop;
use crate::scheduler::{Scheduler, SchedulerStats};
use crate::session::{PriorityClass, SessionOptions, TurnSummary};
use crate::tools::ToolExecutor;
use crate::turn::TurnExecutor;

/// How often credits are refilled.
const REFILL_INTERVAL: Duration = Duration::from_secs(1);

/// How often runtime stats are logged.
const STATS_INTERVAL: Duration = Duration::from_secs(30);

struct RuntimeState {
    subscriptions: Vec<SubscriptionHandle>,
    tasks: Vec<JoinHandle<()>>,
}

pub struct Runtime {
    config: RuntimeConfig,
    bus: Arc<dyn EventBus>,
    scheduler: Arc<Scheduler>,
    executor: Arc<TurnExecutor>,
    proactive: Arc<ProactiveLoop>,
    shutdown: CancellationToken,
    state: Mutex<RuntimeState>,
}

impl Runtime {
    pub fn new(
        config: RuntimeConfig,
        bus: Arc<dyn EventBus>,
        llm: Arc<dyn LlmProvider>,
        tools: Arc<dyn ToolExecutor>,
        memory: Arc<dyn MemoryStore>,
        context: Arc<dyn ContextAssembler>,
    ) -> Self {
        let scheduler = Arc::new(Scheduler::new(config.scheduler.clone(), Arc::clone(&bus)));
        let executor = Arc::new(TurnExecutor::new(
            Arc::clone(&bus),
            llm,
            Arc::clone(&tools),
            memory,
            context,
        ));
        let proactive = Arc::new(ProactiveLoop::new(
            config.proactive.clone(),
            Arc::clone(&scheduler),
            Arc::clone(&bus),
            tools,
        ));
        Self {
            config,
            bus,
            scheduler,
            executor,
            proactive,
            shutdown: CancellationToken::new(),
            state: Mutex::new(RuntimeState {
                subscriptions: Vec::new(),
                tasks: Vec::new(),
            }),
        }
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Register a session. Valid before or after `start`.
    pub fn create_session(
        &self,
        id: &str,
        owner_id: &str,
        priority_class: PriorityClass,
        options: SessionOptions,
    ) -> Result<(), SchedulerError> {
        self.scheduler.create_session(id, owner_id, priority_class, options)
    }

    /// Validate and route one wire event.
    pub async fn route_wire(&self, wire: WireEvent) -> Result<usize, EventError> {
        let event = wire.validate()?;
        Ok(self.scheduler.route_event(event).await)
    }

    /// Route an already-typed event.
    pub async fn route(&self, event: AgentEvent) -> usize {
        self.scheduler.route_event(event).await
    }

    pub fn stats(&self) -> SchedulerStats {
        self.scheduler.stats()
    }

    /// Subscribe the internal handlers and spawn the background tasks.
    pub async fn start(&self) {
        let mut subscriptions = Vec::new();
        subscriptions.push(self.subscribe_turn_starter().await);
        subscriptions.push(self.subscribe_turn_finisher(topics::TURN_COMPLETED, true).await);
        subscriptions.push(self.subscribe_turn_finisher(topics::TURN_ERROR, false).await);
        subscriptions.push(self.subscribe_tool_counter().await);

        let mut tasks = vec![self.spawn_refill_task(), self.spawn_stats_task()];
        if self.config.tick.enabled {
            tasks.push(self.spawn_tick_task());
        }

        {
            let mut state = self.state.lock().expect("runtime lock poisoned");
            state.subscriptions.extend(subscriptions);
            state.tasks.extend(tasks);
        }

        if !self.config.proactive.tasks.is_empty() {
            self.proactive.start();
        }

        tracing::info!(
            concurrency = self.config.scheduler.concurrency,
            tick_enabled = self.config.tick.enabled,
            proactive_tasks = self.config.proactive.tasks.len(),
            "runtime started"
        );
    }

    /// Stop background tasks, the proactive loop, and all subscriptions.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.proactive.stop().await;

        let (subscriptions, tasks) = {
            let mut state = self.state.lock().expect("runtime lock poisoned");
            (
                std::mem::take(&mut state.subscriptions),
                std::mem::take(&mut state.tasks),
            )
        };
        for task in tasks {
            if task.await.is_err() {
                tracing::warn!("runtime task panicked before shutdown");
            }
        }
        for sub in subscriptions {
            sub.release().await;
        }
        tracing::info!("runtime stopped");
    }

    /// `session.turn.started` drives the executor: snapshot the session, pick
    /// up the turn's cancellation token and run the loop.
    async fn subscribe_turn_starter(&self) -> SubscriptionHandle {
        let scheduler = Arc::clone(&self.scheduler);
        let executor = Arc::clone(&self.executor);
        self.bus
            .subscribe(
                topics::TURN_STARTED,
                "runtime.turn-starter",
                handler(move |event| {
                    let scheduler = Arc::clone(&scheduler);
                    let executor = Arc::clone(&executor);
                    async move {
                        let Some(sid) = event.payload["session_id"].as_str() else {
                            return;
                        };
                        let agent_event: AgentEvent =
                            match serde_json::from_value(event.payload["event"].clone()) {
                                Ok(e) => e,
                                Err(err) => {
                                    tracing::debug!(
                                        session_id = sid,
                                        error = %err,
                                        "unparseable turn start payload"
                                    );
                                    return;
                                }
                            };
                        let Some(session) = scheduler.registry().snapshot(sid) else {
                            return;
                        };
                        let cancel = scheduler.turn_token(sid).unwrap_or_default();
                        executor.process_turn(session, agent_event, cancel).await;
                    }
                }),
            )
            .await
    }

    /// Terminal events free the session and, when this report is the one
    /// that freed it, record a turn summary.
    async fn subscribe_turn_finisher(&self, topic: &str, success: bool) -> SubscriptionHandle {
        let scheduler = Arc::clone(&self.scheduler);
        self.bus
            .subscribe(
                topic,
                "runtime.turn-finisher",
                handler(move |event| {
                    let scheduler = Arc::clone(&scheduler);
                    async move {
                        let Some(sid) = event.payload["session_id"].as_str() else {
                            return;
                        };
                        let event_type = event.payload["event_type"]
                            .as_str()
                            .unwrap_or("unknown")
                            .to_string();
                        if scheduler.complete_turn(sid).await {
                            scheduler.registry().push_summary(
                                sid,
                                TurnSummary {
                                    event_type,
                                    success,
                                    finished_at: Utc::now(),
                                },
                            );
                        }
                    }
                }),
            )
            .await
    }

    /// Tool results count against the session's lane budget.
    async fn subscribe_tool_counter(&self) -> SubscriptionHandle {
        let scheduler = Arc::clone(&self.scheduler);
        self.bus
            .subscribe(
                topics::TOOL_RESULT,
                "runtime.tool-counter",
                handler(move |event| {
                    let scheduler = Arc::clone(&scheduler);
                    async move {
                        if let Some(sid) = event.payload["session_id"].as_str() {
                            scheduler.note_tool_call(sid);
                        }
                    }
                }),
            )
            .await
    }

    /// Refill credits once a second, then run a scheduling pass so sessions
    /// that were starved pick up their queued work without waiting for the
    /// next inbound event.
    fn spawn_refill_task(&self) -> JoinHandle<()> {
        let scheduler = Arc::clone(&self.scheduler);
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(REFILL_INTERVAL) => {
                        scheduler.refill_credits();
                        scheduler.schedule().await;
                    }
                }
            }
        })
    }

    /// Emit synthetic ticks for the configured session, skipping intervals
    /// where its previous turn is still in flight.
    fn spawn_tick_task(&self) -> JoinHandle<()> {
        let scheduler = Arc::clone(&self.scheduler);
        let shutdown = self.shutdown.clone();
        let interval = self.config.tick.interval;
        let session_id = self.config.tick.session_id.clone();
        tokio::spawn(async move {
            let mut tick_number = 0u64;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        if scheduler.turn_token(&session_id).is_some() {
                            tracing::debug!(
                                session_id = %session_id,
                                "tick skipped, turn in flight"
                            );
                            continue;
                        }
                        tick_number += 1;
                        let event = AgentEvent::new(EventKind::Tick(TickPayload {
                            interval_ms: interval.as_millis() as u64,
                            tick_number,
                            prompt: None,
                        }))
                        .for_session(session_id.clone());
                        scheduler.route_event(event).await;
                    }
                }
            }
        })
    }

    fn spawn_stats_task(&self) -> JoinHandle<()> {
        let scheduler = Arc::clone(&self.scheduler);
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(STATS_INTERVAL) => {
                        let stats = scheduler.stats();
                        tracing::info!(
                            running_turns = stats.running_turns,
                            sessions = stats.registry.sessions,
                            queued_events = stats.registry.queued_events,
                            "runtime stats"
                        );
                    }
                }
            }
        })
    }
}
