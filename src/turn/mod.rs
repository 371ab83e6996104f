//! Turn execution: the bounded LLM/tool loop.
//!
//! A turn takes a session snapshot and one triggering event, assembles
//! context, and alternates model completions with tool execution until the
//! model stops calling tools or the iteration bound is hit. The executor owns
//! the terminal-event boundary: every turn it is handed ends in exactly one
//! `session.turn.completed` or `session.turn.error` publish, unless the
//! scheduler's deadline already failed the turn, in which case the executor
//! abandons it silently.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::context::ContextAssembler;
use crate::error::TurnError;
use crate::event::{AgentEvent, EventBus, EventKind, topics};
use crate::llm::{ChatMessage, LlmProvider, ToolDefinition};
use crate::memory::MemoryStore;
use crate::session::Session;
use crate::tools::{ToolExecutor as ToolExecutorTrait, ToolInvocation, ToolOutcome};

/// Hard cap on completion rounds within one turn.
const MAX_TOOL_ITERATIONS: usize = 10;

/// What a finished turn produced.
struct TurnOutput {
    content: String,
    iterations: usize,
}

pub struct TurnExecutor {
    bus: Arc<dyn EventBus>,
    llm: Arc<dyn LlmProvider>,
    tools: Arc<dyn ToolExecutorTrait>,
    memory: Arc<dyn MemoryStore>,
    context: Arc<dyn ContextAssembler>,
}

impl TurnExecutor {
    pub fn new(
        bus: Arc<dyn EventBus>,
        llm: Arc<dyn LlmProvider>,
        tools: Arc<dyn ToolExecutorTrait>,
        memory: Arc<dyn MemoryStore>,
        context: Arc<dyn ContextAssembler>,
    ) -> Self {
        Self {
            bus,
            llm,
            tools,
            memory,
            context,
        }
    }

    /// Run one turn to its terminal event. Never returns an error; failures
    /// inside the turn become a `session.turn.error` publish.
    pub async fn process_turn(
        &self,
        session: Session,
        event: AgentEvent,
        cancel: CancellationToken,
    ) {
        let session_id = session.id.clone();
        let event_type = event.event_type();

        let result = self.run(&session, &event, &cancel).await;

        // The deadline may have fired while an await was in flight. Once it
        // has, the scheduler already published the terminal error; reporting
        // ours too would make the turn terminate twice.
        if cancel.is_cancelled() {
            tracing::debug!(session_id = %session_id, event_type, "turn abandoned");
            return;
        }

        match result {
            Ok(Some(output)) => {
                tracing::info!(
                    session_id = %session_id,
                    event_type,
                    iterations = output.iterations,
                    "turn finished"
                );
                self.bus
                    .publish(
                        topics::TURN_COMPLETED,
                        serde_json::json!({
                            "session_id": session_id,
                            "event_type": event_type,
                            "content": output.content,
                            "iterations": output.iterations,
                            "timestamp": chrono::Utc::now(),
                        }),
                    )
                    .await;
            }
            Ok(None) => {
                // Deadline fired mid-turn; the scheduler already published
                // the terminal error for us.
                tracing::debug!(session_id = %session_id, event_type, "turn abandoned");
            }
            Err(err) => {
                tracing::error!(
                    session_id = %session_id,
                    event_type,
                    error = %err,
                    "turn failed"
                );
                self.bus
                    .publish(
                        topics::TURN_ERROR,
                        serde_json::json!({
                            "session_id": session_id,
                            "event_type": event_type,
                            "error": err.to_string(),
                            "timestamp": chrono::Utc::now(),
                        }),
                    )
                    .await;
            }
        }
    }

    /// The turn body. `Ok(None)` means the turn was cancelled underneath us.
    async fn run(
        &self,
        session: &Session,
        event: &AgentEvent,
        cancel: &CancellationToken,
    ) -> Result<Option<TurnOutput>, TurnError> {
        self.memory
            .record_inbound(&session.id, &inbound_content(event))
            .await
            .map_err(TurnError::Memory)?;

        let tools = self.permitted_tools(session).await?;
        let mut messages = self
            .context
            .assemble(session, event)
            .await
            .map_err(TurnError::ContextAssembly)?;

        let mut last_content = String::new();
        for iteration in 1..=MAX_TOOL_ITERATIONS {
            if cancel.is_cancelled() {
                return Ok(None);
            }

            let completion = self
                .llm
                .complete(&messages, &tools)
                .await
                .map_err(TurnError::Llm)?;
            if cancel.is_cancelled() {
                return Ok(None);
            }

            if completion.is_final() {
                self.memory
                    .record_response(&session.id, &completion.content)
                    .await
                    .map_err(TurnError::Memory)?;
                return Ok(Some(TurnOutput {
                    content: completion.content,
                    iterations: iteration,
                }));
            }

            last_content = completion.content.clone();
            messages.push(ChatMessage::assistant_with_calls(
                completion.content,
                completion.tool_calls.clone(),
            ));

            for call in completion.tool_calls {
                if cancel.is_cancelled() {
                    return Ok(None);
                }

                let outcome = self.execute_tool(&session.id, &call).await;
                self.bus
                    .publish(
                        topics::TOOL_RESULT,
                        serde_json::json!({
                            "session_id": session.id,
                            "call_id": call.id,
                            "tool": call.name,
                            "success": outcome.success,
                            "result": outcome.result,
                            "error": outcome.error,
                        }),
                    )
                    .await;
                self.memory
                    .record_tool_exchange(&session.id, &call, &outcome)
                    .await
                    .map_err(TurnError::Memory)?;
                messages.push(ChatMessage::tool_result(
                    call.id.clone(),
                    outcome.as_message_content(),
                ));
            }
        }

        // Bound hit: close the turn with whatever the model last said rather
        // than looping forever.
        tracing::warn!(
            session_id = %session.id,
            max_iterations = MAX_TOOL_ITERATIONS,
            "tool iteration bound reached, closing turn"
        );
        self.memory
            .record_response(&session.id, &last_content)
            .await
            .map_err(TurnError::Memory)?;
        Ok(Some(TurnOutput {
            content: last_content,
            iterations: MAX_TOOL_ITERATIONS,
        }))
    }

    /// Tool definitions for this session, filtered by its permission list.
    /// An empty permission list means unrestricted.
    async fn permitted_tools(&self, session: &Session) -> Result<Vec<ToolDefinition>, TurnError> {
        let mut tools = self
            .tools
            .definitions(&session.id)
            .await
            .map_err(TurnError::ToolDefinitions)?;
        if !session.tool_permissions.is_empty() {
            tools.retain(|t| session.tool_permissions.contains(&t.name));
        }
        Ok(tools)
    }

    /// Execute one tool call. Infrastructure faults are folded into a failed
    /// outcome so the model hears about them and the turn continues.
    async fn execute_tool(&self, session_id: &str, call: &crate::llm::ToolCall) -> ToolOutcome {
        let invocation = ToolInvocation {
            call_id: call.id.clone(),
            name: call.name.clone(),
            arguments: call.arguments.clone(),
            session_id: session_id.to_string(),
        };
        match self.tools.execute(invocation).await {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::warn!(
                    session_id,
                    tool = %call.name,
                    error = %err,
                    "tool executor fault"
                );
                ToolOutcome::failed(err.to_string())
            }
        }
    }
}

/// The user-visible content a turn is about.
fn inbound_content(event: &AgentEvent) -> String {
    match &event.kind {
        EventKind::MessageCreated(m) => m.content.clone(),
        EventKind::Tick(t) => t
            .prompt
            .clone()
            .unwrap_or_else(|| format!("scheduled tick #{}", t.tick_number)),
        EventKind::AdminCommand(a) => format!("admin command: {} {}", a.command, a.args),
        EventKind::Proactive(p) => p.content.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueConfig;
    use crate::event::{BusEvent, InMemoryEventBus, MessagePayload, handler};
    use crate::llm::{CompletionOutcome, Role, ToolCall};
    use crate::session::{PriorityClass, SessionOptions};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    struct ScriptedLlm {
        script: Mutex<VecDeque<anyhow::Result<CompletionOutcome>>>,
        seen_tools: Mutex<Vec<Vec<String>>>,
        seen_messages: Mutex<Vec<Vec<ChatMessage>>>,
        calls: Mutex<usize>,
        delay: Option<std::time::Duration>,
    }

    impl ScriptedLlm {
        fn new(script: Vec<anyhow::Result<CompletionOutcome>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                seen_tools: Mutex::new(Vec::new()),
                seen_messages: Mutex::new(Vec::new()),
                calls: Mutex::new(0),
                delay: None,
            })
        }

        fn delayed(
            script: Vec<anyhow::Result<CompletionOutcome>>,
            delay: std::time::Duration,
        ) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                seen_tools: Mutex::new(Vec::new()),
                seen_messages: Mutex::new(Vec::new()),
                calls: Mutex::new(0),
                delay: Some(delay),
            })
        }

        fn final_reply(content: &str) -> anyhow::Result<CompletionOutcome> {
            Ok(CompletionOutcome {
                content: content.to_string(),
                tool_calls: Vec::new(),
            })
        }

        fn tool_reply(content: &str, tool: &str) -> anyhow::Result<CompletionOutcome> {
            Ok(CompletionOutcome {
                content: content.to_string(),
                tool_calls: vec![ToolCall {
                    id: "call-1".to_string(),
                    name: tool.to_string(),
                    arguments: serde_json::json!({"q": 1}),
                }],
            })
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedLlm {
        async fn complete(
            &self,
            messages: &[ChatMessage],
            tools: &[ToolDefinition],
        ) -> anyhow::Result<CompletionOutcome> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            *self.calls.lock().unwrap() += 1;
            self.seen_tools
                .lock()
                .unwrap()
                .push(tools.iter().map(|t| t.name.clone()).collect());
            self.seen_messages.lock().unwrap().push(messages.to_vec());
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Self::final_reply("exhausted"))
        }
    }

    #[derive(Default)]
    struct FakeTools {
        executed: Mutex<Vec<ToolInvocation>>,
        fail_execution: bool,
        infra_fault: bool,
    }

    #[async_trait]
    impl ToolExecutorTrait for FakeTools {
        async fn definitions(&self, _session_id: &str) -> anyhow::Result<Vec<ToolDefinition>> {
            Ok(vec![
                ToolDefinition {
                    name: "search".to_string(),
                    description: "search".to_string(),
                    parameters: serde_json::json!({}),
                },
                ToolDefinition {
                    name: "shell".to_string(),
                    description: "shell".to_string(),
                    parameters: serde_json::json!({}),
                },
            ])
        }

        async fn execute(&self, invocation: ToolInvocation) -> anyhow::Result<ToolOutcome> {
            self.executed.lock().unwrap().push(invocation);
            if self.infra_fault {
                anyhow::bail!("executor crashed");
            }
            if self.fail_execution {
                Ok(ToolOutcome::failed("tool blew up"))
            } else {
                Ok(ToolOutcome::ok(serde_json::json!({"hits": 3})))
            }
        }
    }

    #[derive(Default)]
    struct RecordingMemory {
        log: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl MemoryStore for RecordingMemory {
        async fn record_inbound(&self, _session_id: &str, content: &str) -> anyhow::Result<()> {
            if self.fail {
                anyhow::bail!("store offline");
            }
            self.log.lock().unwrap().push(format!("in:{content}"));
            Ok(())
        }

        async fn record_tool_exchange(
            &self,
            _session_id: &str,
            call: &ToolCall,
            outcome: &ToolOutcome,
        ) -> anyhow::Result<()> {
            self.log
                .lock()
                .unwrap()
                .push(format!("tool:{}:{}", call.name, outcome.success));
            Ok(())
        }

        async fn record_response(&self, _session_id: &str, content: &str) -> anyhow::Result<()> {
            self.log.lock().unwrap().push(format!("out:{content}"));
            Ok(())
        }
    }

    struct StaticContext;

    #[async_trait]
    impl ContextAssembler for StaticContext {
        async fn assemble(
            &self,
            session: &Session,
            _event: &AgentEvent,
        ) -> anyhow::Result<Vec<ChatMessage>> {
            Ok(vec![
                ChatMessage::system(format!("session {}", session.id)),
                ChatMessage::user("hello"),
            ])
        }
    }

    fn session(options: SessionOptions) -> Session {
        Session::new(
            "s1",
            "owner",
            PriorityClass::Interactive,
            30.0,
            QueueConfig::default(),
            options,
        )
    }

    fn message_event() -> AgentEvent {
        AgentEvent::new(EventKind::MessageCreated(MessagePayload {
            channel_id: "c".to_string(),
            author_id: "u".to_string(),
            author_is_bot: false,
            content: "hello".to_string(),
        }))
        .for_session("s1")
    }

    async fn record(bus: &InMemoryEventBus, topic: &str) -> Arc<Mutex<Vec<BusEvent>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handle = bus
            .subscribe(
                topic,
                "test-recorder",
                handler(move |event| {
                    let sink = Arc::clone(&sink);
                    async move {
                        sink.lock().unwrap().push(event);
                    }
                }),
            )
            .await;
        std::mem::forget(handle);
        seen
    }

    async fn flush() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    struct Harness {
        bus: InMemoryEventBus,
        executor: TurnExecutor,
        llm: Arc<ScriptedLlm>,
        tools: Arc<FakeTools>,
        memory: Arc<RecordingMemory>,
    }

    fn harness_with(
        llm: Arc<ScriptedLlm>,
        tools: Arc<FakeTools>,
        memory: Arc<RecordingMemory>,
    ) -> Harness {
        let bus = InMemoryEventBus::new();
        let executor = TurnExecutor::new(
            Arc::new(bus.clone()),
            llm.clone(),
            tools.clone(),
            memory.clone(),
            Arc::new(StaticContext),
        );
        Harness {
            bus,
            executor,
            llm,
            tools,
            memory,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_plain_turn_completes() {
        let h = harness_with(
            ScriptedLlm::new(vec![ScriptedLlm::final_reply("hi there")]),
            Arc::new(FakeTools::default()),
            Arc::new(RecordingMemory::default()),
        );
        let completed = record(&h.bus, topics::TURN_COMPLETED).await;

        h.executor
            .process_turn(
                session(SessionOptions::default()),
                message_event(),
                CancellationToken::new(),
            )
            .await;
        flush().await;

        let completed = completed.lock().unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].payload["content"], "hi there");
        assert_eq!(completed[0].payload["iterations"], 1);
        assert!(completed[0].payload["timestamp"].is_string());
        drop(completed);

        let log = h.memory.log.lock().unwrap();
        assert_eq!(*log, vec!["in:hello", "out:hi there"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tool_loop_executes_and_reports() {
        let h = harness_with(
            ScriptedLlm::new(vec![
                ScriptedLlm::tool_reply("searching", "search"),
                ScriptedLlm::final_reply("found it"),
            ]),
            Arc::new(FakeTools::default()),
            Arc::new(RecordingMemory::default()),
        );
        let tool_results = record(&h.bus, topics::TOOL_RESULT).await;
        let completed = record(&h.bus, topics::TURN_COMPLETED).await;

        h.executor
            .process_turn(
                session(SessionOptions::default()),
                message_event(),
                CancellationToken::new(),
            )
            .await;
        flush().await;

        let executed = h.tools.executed.lock().unwrap();
        assert_eq!(executed.len(), 1);
        assert_eq!(executed[0].name, "search");
        assert_eq!(executed[0].session_id, "s1");
        drop(executed);

        let tool_results = tool_results.lock().unwrap();
        assert_eq!(tool_results.len(), 1);
        assert_eq!(tool_results[0].payload["tool"], "search");
        assert_eq!(tool_results[0].payload["success"], true);
        drop(tool_results);

        let completed = completed.lock().unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].payload["iterations"], 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_tool_keeps_turn_alive() {
        let tools = Arc::new(FakeTools {
            fail_execution: true,
            ..Default::default()
        });
        let h = harness_with(
            ScriptedLlm::new(vec![
                ScriptedLlm::tool_reply("trying", "search"),
                ScriptedLlm::final_reply("gave up gracefully"),
            ]),
            tools,
            Arc::new(RecordingMemory::default()),
        );
        let completed = record(&h.bus, topics::TURN_COMPLETED).await;
        let errors = record(&h.bus, topics::TURN_ERROR).await;

        h.executor
            .process_turn(
                session(SessionOptions::default()),
                message_event(),
                CancellationToken::new(),
            )
            .await;
        flush().await;

        // The failure is fed back to the model, not escalated.
        assert_eq!(completed.lock().unwrap().len(), 1);
        assert!(errors.lock().unwrap().is_empty());

        let log = h.memory.log.lock().unwrap();
        assert!(log.contains(&"tool:search:false".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_executor_fault_becomes_failed_result() {
        let tools = Arc::new(FakeTools {
            infra_fault: true,
            ..Default::default()
        });
        let h = harness_with(
            ScriptedLlm::new(vec![
                ScriptedLlm::tool_reply("trying", "shell"),
                ScriptedLlm::final_reply("noted"),
            ]),
            tools,
            Arc::new(RecordingMemory::default()),
        );
        let tool_results = record(&h.bus, topics::TOOL_RESULT).await;

        h.executor
            .process_turn(
                session(SessionOptions::default()),
                message_event(),
                CancellationToken::new(),
            )
            .await;
        flush().await;

        let tool_results = tool_results.lock().unwrap();
        assert_eq!(tool_results.len(), 1);
        assert_eq!(tool_results[0].payload["success"], false);
        assert!(
            tool_results[0].payload["error"]
                .as_str()
                .unwrap()
                .contains("executor crashed")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_iteration_bound_closes_turn() {
        // The model never stops calling tools.
        let script: Vec<_> = (0..20)
            .map(|i| ScriptedLlm::tool_reply(&format!("step {i}"), "search"))
            .collect();
        let h = harness_with(
            ScriptedLlm::new(script),
            Arc::new(FakeTools::default()),
            Arc::new(RecordingMemory::default()),
        );
        let completed = record(&h.bus, topics::TURN_COMPLETED).await;

        h.executor
            .process_turn(
                session(SessionOptions::default()),
                message_event(),
                CancellationToken::new(),
            )
            .await;
        flush().await;

        assert_eq!(*h.llm.calls.lock().unwrap(), MAX_TOOL_ITERATIONS);

        let completed = completed.lock().unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(
            completed[0].payload["iterations"],
            MAX_TOOL_ITERATIONS as u64
        );
        // Closed with the model's last partial content.
        assert_eq!(completed[0].payload["content"], "step 9");
    }

    #[tokio::test(start_paused = true)]
    async fn test_llm_failure_publishes_single_error() {
        let h = harness_with(
            ScriptedLlm::new(vec![Err(anyhow::anyhow!("rate limited"))]),
            Arc::new(FakeTools::default()),
            Arc::new(RecordingMemory::default()),
        );
        let completed = record(&h.bus, topics::TURN_COMPLETED).await;
        let errors = record(&h.bus, topics::TURN_ERROR).await;

        h.executor
            .process_turn(
                session(SessionOptions::default()),
                message_event(),
                CancellationToken::new(),
            )
            .await;
        flush().await;

        assert!(completed.lock().unwrap().is_empty());
        let errors = errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert!(
            errors[0].payload["error"]
                .as_str()
                .unwrap()
                .contains("rate limited")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_memory_failure_publishes_error() {
        let memory = Arc::new(RecordingMemory {
            fail: true,
            ..Default::default()
        });
        let h = harness_with(
            ScriptedLlm::new(vec![ScriptedLlm::final_reply("unused")]),
            Arc::new(FakeTools::default()),
            memory,
        );
        let errors = record(&h.bus, topics::TURN_ERROR).await;

        h.executor
            .process_turn(
                session(SessionOptions::default()),
                message_event(),
                CancellationToken::new(),
            )
            .await;
        flush().await;

        let errors = errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert!(
            errors[0].payload["error"]
                .as_str()
                .unwrap()
                .contains("memory store failed")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_permission_list_filters_tools() {
        let h = harness_with(
            ScriptedLlm::new(vec![ScriptedLlm::final_reply("done")]),
            Arc::new(FakeTools::default()),
            Arc::new(RecordingMemory::default()),
        );

        let options = SessionOptions {
            tool_permissions: vec!["search".to_string()],
            ..Default::default()
        };
        h.executor
            .process_turn(session(options), message_event(), CancellationToken::new())
            .await;

        let seen = h.llm.seen_tools.lock().unwrap();
        assert_eq!(seen[0], vec!["search"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_history_carries_requested_tool_calls() {
        let h = harness_with(
            ScriptedLlm::new(vec![
                ScriptedLlm::tool_reply("searching", "search"),
                ScriptedLlm::final_reply("found it"),
            ]),
            Arc::new(FakeTools::default()),
            Arc::new(RecordingMemory::default()),
        );

        h.executor
            .process_turn(
                session(SessionOptions::default()),
                message_event(),
                CancellationToken::new(),
            )
            .await;

        // The second completion sees the assistant message that asked for the
        // tool, with the call the following tool message answers.
        let seen = h.llm.seen_messages.lock().unwrap();
        assert_eq!(seen.len(), 2);
        let history = &seen[1];
        let assistant = history.iter().find(|m| m.role == Role::Assistant).unwrap();
        assert_eq!(assistant.content, "searching");
        assert_eq!(assistant.tool_calls.len(), 1);
        assert_eq!(assistant.tool_calls[0].id, "call-1");
        assert_eq!(assistant.tool_calls[0].name, "search");
        let tool_msg = history.iter().find(|m| m.role == Role::Tool).unwrap();
        assert_eq!(tool_msg.tool_call_id.as_deref(), Some("call-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_completion_racing_cancellation_is_abandoned() {
        // Cancellation lands while the model call is still in flight. The
        // completion that arrives afterwards must not become a terminal
        // event; whoever cancelled already published one.
        let h = harness_with(
            ScriptedLlm::delayed(
                vec![ScriptedLlm::final_reply("too late")],
                Duration::from_millis(200),
            ),
            Arc::new(FakeTools::default()),
            Arc::new(RecordingMemory::default()),
        );
        let completed = record(&h.bus, topics::TURN_COMPLETED).await;
        let errors = record(&h.bus, topics::TURN_ERROR).await;

        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::join!(
            h.executor
                .process_turn(session(SessionOptions::default()), message_event(), cancel),
            async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                canceller.cancel();
            },
        );
        flush().await;

        assert_eq!(*h.llm.calls.lock().unwrap(), 1);
        assert!(completed.lock().unwrap().is_empty());
        assert!(errors.lock().unwrap().is_empty());

        // The abandoned reply is not recorded as a response either.
        let log = h.memory.log.lock().unwrap();
        assert!(!log.iter().any(|entry| entry.starts_with("out:")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_turn_publishes_no_terminal() {
        let h = harness_with(
            ScriptedLlm::new(vec![ScriptedLlm::final_reply("unused")]),
            Arc::new(FakeTools::default()),
            Arc::new(RecordingMemory::default()),
        );
        let completed = record(&h.bus, topics::TURN_COMPLETED).await;
        let errors = record(&h.bus, topics::TURN_ERROR).await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        h.executor
            .process_turn(session(SessionOptions::default()), message_event(), cancel)
            .await;
        flush().await;

        assert!(completed.lock().unwrap().is_empty());
        assert!(errors.lock().unwrap().is_empty());
    }

    #[test]
    fn test_inbound_content_per_kind() {
        let tick = AgentEvent::new(EventKind::Tick(crate::event::TickPayload {
            interval_ms: 15_000,
            tick_number: 7,
            prompt: None,
        }));
        assert_eq!(inbound_content(&tick), "scheduled tick #7");

        let msg = message_event();
        assert_eq!(inbound_content(&msg), "hello");
    }

    #[test]
    fn test_tool_message_roles() {
        let msg = ChatMessage::tool_result("call-9", "ok");
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("call-9"));
    }
}
