//! Proactive behavior: synthetic work injected on a cadence.
//!
//! The loop cycles through a configured task list. A task either invokes a
//! tool directly (with its own timeout, outside any turn) or nudges the
//! target session with a synthetic event that flows through the ordinary
//! routing and admission pipeline. Dispatches are sequential; the pause
//! between iterations is the throttle.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::{ProactiveConfig, ProactiveTask};
use crate::event::{AgentEvent, EventBus, EventKind, ProactivePayload, topics};
use crate::scheduler::Scheduler;
use crate::tools::{ToolExecutor, ToolInvocation};

/// Floor on the pause between iterations. Guards against a config value that
/// would turn the loop into a busy spin.
const MIN_PAUSE_MS: u64 = 250;

/// How long a direct tool invocation may run.
const TOOL_TIMEOUT: Duration = Duration::from_secs(30);

/// Synthetic author stamped on events the loop injects.
const PROACTIVE_AUTHOR: &str = "proactive";

struct LoopState {
    cancel: Option<CancellationToken>,
    handle: Option<JoinHandle<()>>,
}

pub struct ProactiveLoop {
    config: ProactiveConfig,
    scheduler: Arc<Scheduler>,
    bus: Arc<dyn EventBus>,
    tools: Arc<dyn ToolExecutor>,
    state: Mutex<LoopState>,
}

impl ProactiveLoop {
    pub fn new(
        config: ProactiveConfig,
        scheduler: Arc<Scheduler>,
        bus: Arc<dyn EventBus>,
        tools: Arc<dyn ToolExecutor>,
    ) -> Self {
        Self {
            config,
            scheduler,
            bus,
            tools,
            state: Mutex::new(LoopState {
                cancel: None,
                handle: None,
            }),
        }
    }

    /// Start the loop. Refuses (with a log, not an error) when the config is
    /// unusable or the loop is already running. Returns whether it started.
    pub fn start(&self) -> bool {
        if self.config.tasks.is_empty() {
            tracing::warn!("proactive loop not started: no tasks configured");
            return false;
        }
        if self.config.session_id.is_empty() {
            tracing::warn!("proactive loop not started: no target session configured");
            return false;
        }
        if !self.scheduler.registry().contains(&self.config.session_id) {
            tracing::warn!(
                session_id = %self.config.session_id,
                "proactive loop not started: target session not registered"
            );
            return false;
        }

        let mut state = self.state.lock().expect("proactive lock poisoned");
        if state.handle.as_ref().is_some_and(|h| !h.is_finished()) {
            tracing::debug!("proactive loop already running");
            return false;
        }

        let cancel = CancellationToken::new();
        let worker = Worker {
            config: self.config.clone(),
            scheduler: Arc::clone(&self.scheduler),
            bus: Arc::clone(&self.bus),
            tools: Arc::clone(&self.tools),
            cancel: cancel.clone(),
        };
        state.cancel = Some(cancel);
        state.handle = Some(tokio::spawn(worker.run()));
        tracing::info!(
            session_id = %self.config.session_id,
            tasks = self.config.tasks.len(),
            pause_ms = self.config.pause_ms.max(MIN_PAUSE_MS),
            "proactive loop started"
        );
        true
    }

    /// Stop the loop and wait for the in-flight dispatch to settle.
    /// Idempotent; the loop can be started again afterwards.
    pub async fn stop(&self) {
        let (cancel, handle) = {
            let mut state = self.state.lock().expect("proactive lock poisoned");
            (state.cancel.take(), state.handle.take())
        };
        if let Some(cancel) = cancel {
            cancel.cancel();
        }
        if let Some(handle) = handle {
            if handle.await.is_err() {
                tracing::warn!("proactive worker panicked before stop");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.state
            .lock()
            .expect("proactive lock poisoned")
            .handle
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }
}

/// Owns everything the loop task needs, detached from the handle object.
struct Worker {
    config: ProactiveConfig,
    scheduler: Arc<Scheduler>,
    bus: Arc<dyn EventBus>,
    tools: Arc<dyn ToolExecutor>,
    cancel: CancellationToken,
}

impl Worker {
    async fn run(self) {
        let pause = Duration::from_millis(self.config.pause_ms.max(MIN_PAUSE_MS));
        let mut index = 0usize;

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            let task = &self.config.tasks[index % self.config.tasks.len()];
            index = index.wrapping_add(1);
            self.dispatch(task).await;

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }
        tracing::info!("proactive loop stopped");
    }

    async fn dispatch(&self, task: &ProactiveTask) {
        match &task.tool_call {
            Some(call) => self.dispatch_tool(task, call).await,
            None => self.nudge(&task.description).await,
        }
    }

    /// Direct tool invocation, raced against the stop signal and a timeout.
    async fn dispatch_tool(&self, task: &ProactiveTask, call: &crate::config::ProactiveToolCall) {
        let invocation = ToolInvocation {
            call_id: format!("proactive-{}-{}", task.id, Uuid::new_v4()),
            name: call.name.clone(),
            arguments: call.args.clone(),
            session_id: self.config.session_id.clone(),
        };

        let outcome = tokio::select! {
            _ = self.cancel.cancelled() => return,
            _ = tokio::time::sleep(TOOL_TIMEOUT) => {
                Err(anyhow::anyhow!(
                    "timed out after {}s",
                    TOOL_TIMEOUT.as_secs()
                ))
            }
            result = self.tools.execute(invocation) => result,
        };

        match outcome {
            Ok(result) if result.success => {
                self.bus
                    .publish(
                        topics::PROACTIVE_TOOL_RESULT,
                        serde_json::json!({
                            "task_id": task.id,
                            "tool": call.name,
                            "result": result.result,
                        }),
                    )
                    .await;
                if self.config.emit_tool_results_as_events {
                    self.nudge(&result.result.to_string()).await;
                }
            }
            Ok(result) => {
                self.publish_tool_error(
                    task,
                    &call.name,
                    result.error.as_deref().unwrap_or("tool reported failure"),
                )
                .await;
            }
            Err(err) => {
                self.publish_tool_error(task, &call.name, &err.to_string()).await;
            }
        }
    }

    async fn publish_tool_error(&self, task: &ProactiveTask, tool: &str, error: &str) {
        tracing::warn!(task_id = %task.id, tool, error, "proactive tool failed");
        self.bus
            .publish(
                topics::PROACTIVE_TOOL_ERROR,
                serde_json::json!({
                    "task_id": task.id,
                    "tool": tool,
                    "error": error,
                }),
            )
            .await;
    }

    /// Inject a synthetic event for the target session through the ordinary
    /// pipeline, so proactive work competes for admission like everything
    /// else.
    async fn nudge(&self, content: &str) {
        let event = AgentEvent::new(EventKind::Proactive(ProactivePayload {
            channel_id: PROACTIVE_AUTHOR.to_string(),
            content: content.to_string(),
            author_id: PROACTIVE_AUTHOR.to_string(),
            author_is_bot: true,
        }))
        .for_session(self.config.session_id.clone());

        self.scheduler.route_event(event).await;
    }
}
