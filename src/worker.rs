//! Agent worker runtime (§C8): the per-instance event loop that owns a
//! single agent's scratchpad and conversation log and turns user/agent
//! messages into reasoner-driven turns.
//!
//! Grounded on the teacher's single-connection-per-request control loop
//! (the same `read one request, dispatch, reply` shape as `control.rs`),
//! with the turn loop itself modeled on spec §4.8's state machine rather
//! than on anything in the teacher (the teacher has no equivalent).

use crate::config::{DEFAULT_MAX_CONV, DEFAULT_MAX_SCRATCH, DEFAULT_PROMPT_HISTORY, DEFAULT_REASONER_PARSE_RETRIES, DEFAULT_TURN_LIMIT};
use crate::error::{AgoError, AgoResult};
use crate::framing::{self, DecodeOutcome};
use crate::protocol::{Event, EventKind, Frame, Op, Request, Response};
use crate::reasoner::{PromptContext, Reasoner, ReasonerResult};
use crate::router::{ConversationEntry, MessageRole};
use crate::templates::Template;
use crate::tools::ToolInvoker;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, Mutex, RwLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Initialising,
    Ready,
    Thinking,
    Observing,
    Stopping,
    Stopped,
}

struct QueuedInbound {
    from: String,
    payload: String,
    role: MessageRole,
}

/// Owns everything a worker needs for its own lifetime: its template, its
/// reasoner/tool adapters, its scratchpad, and its conversation log. Shared
/// behind an `Arc` between the connection-accept loop and the background
/// queue-drain task.
pub struct WorkerRuntime {
    instance_id: String,
    template: Template,
    reasoner: Arc<dyn Reasoner>,
    tools: Arc<dyn ToolInvoker>,
    state: RwLock<WorkerState>,
    scratchpad: Mutex<String>,
    conversation: Mutex<VecDeque<ConversationEntry>>,
    turn_lock: Mutex<()>,
    next_message_id: AtomicU64,
    max_scratch: usize,
    max_conv: usize,
    turn_limit: usize,
    prompt_history: usize,
}

impl WorkerRuntime {
    pub fn new(instance_id: String, template: Template, reasoner: Arc<dyn Reasoner>, tools: Arc<dyn ToolInvoker>) -> Arc<Self> {
        Arc::new(WorkerRuntime {
            instance_id,
            template,
            reasoner,
            tools,
            state: RwLock::new(WorkerState::Initialising),
            scratchpad: Mutex::new(String::new()),
            conversation: Mutex::new(VecDeque::new()),
            turn_lock: Mutex::new(()),
            next_message_id: AtomicU64::new(1),
            max_scratch: DEFAULT_MAX_SCRATCH,
            max_conv: DEFAULT_MAX_CONV,
            turn_limit: DEFAULT_TURN_LIMIT,
            prompt_history: DEFAULT_PROMPT_HISTORY,
        })
    }

    pub async fn state(&self) -> WorkerState {
        *self.state.read().await
    }

    async fn set_state(&self, s: WorkerState) {
        *self.state.write().await = s;
    }

    fn next_id(&self) -> u64 {
        self.next_message_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn append_conversation(&self, role: MessageRole, content: String) {
        let entry = ConversationEntry {
            message_id: self.next_id(),
            role,
            content,
            timestamp_unix_secs: now_unix(),
        };
        let mut log = self.conversation.lock().await;
        log.push_back(entry);
        while log.len() > self.max_conv {
            log.pop_front();
        }
    }

    async fn recent_conversation_text(&self) -> String {
        let log = self.conversation.lock().await;
        log.iter()
            .rev()
            .take(self.prompt_history)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .map(|e| format!("[{:?}] {}", e.role, e.content))
            .collect::<Vec<_>>()
            .join("\n")
    }

    async fn append_scratchpad(&self, text: &str) {
        let mut pad = self.scratchpad.lock().await;
        pad.push_str(text);
        pad.push('\n');
        if pad.len() > self.max_scratch {
            let cut = pad.len() - self.max_scratch;
            let truncated = pad[cut..].to_string();
            *pad = truncated;
        }
    }

    async fn clear_scratchpad(&self) {
        self.scratchpad.lock().await.clear();
    }

    fn available_tools_text(&self) -> String {
        if self.template.tools.is_empty() {
            "none".to_string()
        } else {
            self.template.tools.join(", ")
        }
    }

    /// Run one full turn (the prepare/decide/observe loop of §4.8) for
    /// `user_message`, emitting events as they're produced. Returns once the
    /// turn reaches `turn-complete` or `turn-truncated`.
    async fn execute_turn(&self, user_message: String, events: &mpsc::UnboundedSender<Event>) -> AgoResult<()> {
        let _guard = self.turn_lock.lock().await;
        self.set_state(WorkerState::Thinking).await;
        let _ = events.send(Event::new(EventKind::TurnStarted));

        self.append_conversation(MessageRole::User, user_message.clone()).await;

        let mut latest_observation = Some(user_message);
        let mut parse_failures = 0usize;

        for _iteration in 0..self.turn_limit {
            let history = self.recent_conversation_text().await;
            let scratchpad = self.scratchpad.lock().await.clone();

            let ctx = PromptContext {
                role_identity: format!("You are agent {}.\n{}", self.instance_id, self.template.prompt),
                custom_section: format!(
                    "Available tools: {{AVAILABLE_TOOLS}}\nKnown agents: {{AGENT_NETWORK}}\n\nRecent conversation:\n{history}",
                ),
                scratchpad,
                latest_observation: latest_observation.take(),
            };

            let mut data = HashMap::new();
            data.insert("AVAILABLE_TOOLS".to_string(), self.available_tools_text());
            data.insert("AGENT_NETWORK".to_string(), "none known".to_string());
            let ctx = PromptContext {
                custom_section: crate::reasoner::compile_custom_section(&ctx.custom_section, &data),
                ..ctx
            };

            self.set_state(WorkerState::Observing).await;
            let decision = match self.reasoner.reason(ctx).await {
                Ok(decision) => decision,
                Err(AgoError::ReasonerParseError(detail)) => {
                    parse_failures += 1;
                    if parse_failures > DEFAULT_REASONER_PARSE_RETRIES {
                        ReasonerResult::FinalAnswer { text: "I could not form a valid step".to_string() }
                    } else {
                        latest_observation = Some(format!("Your previous reply failed to parse: {detail}. Reply using the required JSON grammar."));
                        self.set_state(WorkerState::Thinking).await;
                        continue;
                    }
                }
                Err(e) => return Err(e),
            };
            self.set_state(WorkerState::Thinking).await;

            match decision {
                ReasonerResult::FinalAnswer { text } => {
                    self.append_conversation(MessageRole::Agent, text.clone()).await;
                    let _ = events.send(Event::new(EventKind::TurnComplete).with_field("text", text));
                    self.clear_scratchpad().await;
                    self.set_state(WorkerState::Ready).await;
                    return Ok(());
                }
                ReasonerResult::ToolCall { name, params } => {
                    let params_desc = format!("{params:?}");
                    let _ = events.send(
                        Event::new(EventKind::ToolCall).with_field("name", name.clone()).with_field("params", params_desc.clone()),
                    );
                    self.append_scratchpad(&format!("called tool {name} with {params_desc}")).await;

                    let observation = match self.tools.invoke(&name, params).await {
                        Ok(result) => result.text,
                        Err(AgoError::ToolTimeout { tool, deadline_ms }) => {
                            format!("tool {tool} timed out after {deadline_ms}ms")
                        }
                        Err(e) => format!("tool {name} failed: {e}"),
                    };
                    let _ = events.send(Event::new(EventKind::Observation).with_field("text", observation.clone()));
                    self.append_scratchpad(&format!("observed: {observation}")).await;
                    latest_observation = Some(observation);
                }
            }
        }

        let _ = events.send(Event::new(EventKind::TurnTruncated));
        self.clear_scratchpad().await;
        self.set_state(WorkerState::Ready).await;
        Ok(())
    }

    pub async fn conversation_snapshot(&self) -> Vec<ConversationEntry> {
        self.conversation.lock().await.iter().cloned().collect()
    }
}

fn now_unix() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

/// Background task: drains inter-agent messages delivered via the router's
/// `Send` op and runs each one as its own autonomous turn. Events produced
/// by these turns have no client listening; they're dropped once produced
/// (the resulting `turn-complete` text is still captured in the
/// conversation log via `execute_turn`).
async fn queue_drain_loop(worker: Arc<WorkerRuntime>, mut inbox: mpsc::UnboundedReceiver<QueuedInbound>) {
    while let Some(message) = inbox.recv().await {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tokio::spawn(async move { while rx.recv().await.is_some() {} });
        let prefixed = format!("[message from {}] {}", message.from, message.payload);
        if let Err(e) = worker.execute_turn(prefixed, &tx).await {
            tracing::warn!(error = %e, "autonomous turn failed");
        }
    }
}

/// Serve the worker's own control socket: `Ping`, `Send`, `Chat`, `Shutdown`.
pub async fn serve(worker: Arc<WorkerRuntime>, listener: UnixListener, shutdown: Arc<tokio::sync::Notify>) -> AgoResult<()> {
    let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
    tokio::spawn(queue_drain_loop(worker.clone(), inbox_rx));

    worker.set_state(WorkerState::Ready).await;

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, _addr) = accepted.map_err(AgoError::Io)?;
                let worker = worker.clone();
                let inbox_tx = inbox_tx.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(worker, stream, inbox_tx).await {
                        tracing::debug!(error = %e, "worker connection ended with an error");
                    }
                });
            }
            _ = shutdown.notified() => {
                worker.set_state(WorkerState::Stopping).await;
                worker.set_state(WorkerState::Stopped).await;
                return Ok(());
            }
        }
    }
}

async fn handle_connection(worker: Arc<WorkerRuntime>, mut stream: UnixStream, inbox_tx: mpsc::UnboundedSender<QueuedInbound>) -> AgoResult<()> {
    let request = match framing::read_frame(&mut stream).await? {
        DecodeOutcome::Frame(Frame::Request(request)) => request,
        DecodeOutcome::Frame(_) | DecodeOutcome::Eof => return Ok(()),
    };

    match request.op {
        Op::Ping => {
            let response = if worker.state().await == WorkerState::Ready {
                Response::ok(HashMap::new())
            } else {
                Response::error("NotRunning", "worker is not yet ready")
            };
            framing::write_frame(&mut stream, &Frame::Response(response)).await
        }
        Op::Send => {
            let from = request.arg("from").unwrap_or("unknown").to_string();
            let payload = request.arg("payload").unwrap_or("").to_string();
            let role = match request.arg("role") {
                Some("user") => MessageRole::User,
                Some("system") => MessageRole::System,
                _ => MessageRole::Agent,
            };
            let _ = inbox_tx.send(QueuedInbound { from, payload, role });
            framing::write_frame(&mut stream, &Frame::Response(Response::ok(HashMap::new()))).await
        }
        Op::Chat => {
            let payload = request.arg("payload").unwrap_or("").to_string();
            let (tx, mut rx) = mpsc::unbounded_channel();
            let worker_for_turn = worker.clone();
            let turn = tokio::spawn(async move { worker_for_turn.execute_turn(payload, &tx).await });

            while let Some(event) = rx.recv().await {
                framing::write_frame(&mut stream, &Frame::Event(event)).await?;
            }

            match turn.await {
                Ok(Ok(())) => {
                    framing::write_frame(&mut stream, &Frame::Response(Response::ok(HashMap::new()))).await
                }
                Ok(Err(e)) => {
                    framing::write_frame(&mut stream, &Frame::Response(Response::error(e.kind_name(), e.to_string()))).await
                }
                Err(_) => {
                    framing::write_frame(
                        &mut stream,
                        &Frame::Response(Response::error("ChildCrashed", "turn task panicked")),
                    )
                    .await
                }
            }
        }
        Op::Shutdown => {
            worker.set_state(WorkerState::Stopping).await;
            framing::write_frame(&mut stream, &Frame::Response(Response::ok(HashMap::new()))).await
        }
        _ => {
            framing::write_frame(
                &mut stream,
                &Frame::Response(Response::error("NoSuchAgent", "operation not supported on a worker socket")),
            )
            .await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::NullToolInvoker;
    use async_trait::async_trait;

    struct StubReasoner;

    #[async_trait]
    impl Reasoner for StubReasoner {
        async fn reason(&self, _ctx: PromptContext) -> AgoResult<ReasonerResult> {
            Ok(ReasonerResult::FinalAnswer { text: "42".to_string() })
        }
    }

    fn template() -> Template {
        Template {
            name: "researcher".to_string(),
            version: "1".to_string(),
            description: "".to_string(),
            author: "".to_string(),
            model: "gpt-4o-mini".to_string(),
            temperature: 0.7,
            tools: vec![],
            prompt: "Answer questions.".to_string(),
            metadata: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn a_final_answer_completes_the_turn_and_clears_scratchpad() {
        let worker = WorkerRuntime::new(
            "researcher-aaaaaaaa".to_string(),
            template(),
            Arc::new(StubReasoner),
            Arc::new(NullToolInvoker),
        );
        worker.append_scratchpad("leftover from a previous turn").await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        worker.execute_turn("what is the answer?".to_string(), &tx).await.unwrap();
        drop(tx);

        let mut saw_complete = false;
        while let Some(event) = rx.recv().await {
            if matches!(event.kind, EventKind::TurnComplete) {
                saw_complete = true;
                assert_eq!(event.payload.get("text"), Some(&"42".to_string()));
            }
        }
        assert!(saw_complete);
        assert_eq!(worker.scratchpad.lock().await.as_str(), "");
        assert_eq!(worker.state().await, WorkerState::Ready);
    }

    struct LoopingToolReasoner;

    #[async_trait]
    impl Reasoner for LoopingToolReasoner {
        async fn reason(&self, _ctx: PromptContext) -> AgoResult<ReasonerResult> {
            Ok(ReasonerResult::ToolCall { name: "search".to_string(), params: HashMap::new() })
        }
    }

    #[tokio::test]
    async fn exceeding_the_turn_limit_emits_truncated() {
        let worker = WorkerRuntime::new(
            "researcher-bbbbbbbb".to_string(),
            template(),
            Arc::new(LoopingToolReasoner),
            Arc::new(NullToolInvoker),
        );
        let (tx, mut rx) = mpsc::unbounded_channel();
        worker.execute_turn("go".to_string(), &tx).await.unwrap();
        drop(tx);

        let mut saw_truncated = false;
        while let Some(event) = rx.recv().await {
            if matches!(event.kind, EventKind::TurnTruncated) {
                saw_truncated = true;
            }
        }
        assert!(saw_truncated);
    }
}
