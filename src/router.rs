//! Message router (§C7): bounded per-instance queues and background,
//! retrying delivery between the control server, agents, and other agents.
//!
//! Grounded on the request/response exchange already defined by
//! `protocol`/`framing` (the router is simply a client of a destination
//! worker's socket, the same way the process manager's `Ping` probe is) and
//! on the teacher's `spawn_copy` pattern of a detached tokio task draining
//! one end of a channel for as long as the owning instance lives.

use crate::config::{DEFAULT_MAX_CONV, DEFAULT_QUEUE_CAPACITY};
use crate::error::{AgoError, AgoResult};
use crate::framing::{self, DecodeOutcome};
use crate::protocol::{Frame, Op, Request};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::net::UnixStream;
use tokio::sync::{mpsc, Mutex};

const RETRY_BASE: Duration = Duration::from_millis(100);
const RETRY_CAP: Duration = Duration::from_secs(2);
const RETRY_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Agent,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationEntry {
    pub message_id: u64,
    pub role: MessageRole,
    pub content: String,
    pub timestamp_unix_secs: u64,
}

struct QueuedMessage {
    message_id: u64,
    from: String,
    payload: String,
    role: MessageRole,
}

/// Connects the control server, worker sockets, and each other: owns one
/// bounded inbound queue and one conversation-log ring per live instance.
///
/// `ring` is independently `Arc`-shared (rather than reached through the
/// owning `Router`) so the background `delivery_loop` can append the
/// recipient-side entry for a message it just handed off, without needing
/// a handle back to the `Router` itself.
struct LogState {
    ring: Arc<Mutex<VecDeque<ConversationEntry>>>,
    broadcast: tokio::sync::broadcast::Sender<ConversationEntry>,
}

pub struct Router {
    queues: DashMap<String, mpsc::Sender<QueuedMessage>>,
    logs: DashMap<String, LogState>,
    sockets: DashMap<String, PathBuf>,
    dead_letter_path: PathBuf,
    next_id: AtomicU64,
    max_conv: usize,
}

impl Router {
    pub fn new(base_dir: PathBuf) -> Self {
        Router {
            queues: DashMap::new(),
            logs: DashMap::new(),
            sockets: DashMap::new(),
            dead_letter_path: base_dir.join("logs").join("dead-letter.log"),
            next_id: AtomicU64::new(1),
            max_conv: DEFAULT_MAX_CONV,
        }
    }

    /// Register a newly spawned instance: opens its bounded queue and spawns
    /// the background delivery task that drains it for as long as the
    /// sender side (held by [`Self::unregister`]) is alive.
    pub fn register(&self, instance_id: &str, socket_path: PathBuf) {
        let (tx, rx) = mpsc::channel(DEFAULT_QUEUE_CAPACITY);
        self.queues.insert(instance_id.to_string(), tx);
        let (broadcast_tx, _) = tokio::sync::broadcast::channel(256);
        let ring = Arc::new(Mutex::new(VecDeque::new()));
        self.logs.insert(instance_id.to_string(), LogState { ring: ring.clone(), broadcast: broadcast_tx.clone() });
        self.sockets.insert(instance_id.to_string(), socket_path.clone());

        let instance_id = instance_id.to_string();
        let dead_letter_path = self.dead_letter_path.clone();
        let max_conv = self.max_conv;
        tokio::spawn(delivery_loop(instance_id, socket_path, rx, dead_letter_path, ring, broadcast_tx, max_conv));
    }

    /// Drop the destination's queue sender, which ends its delivery task
    /// once drained, and discard its conversation log ring.
    pub fn unregister(&self, instance_id: &str) {
        self.queues.remove(instance_id);
        self.logs.remove(instance_id);
        self.sockets.remove(instance_id);
    }

    pub fn is_registered(&self, instance_id: &str) -> bool {
        self.queues.contains_key(instance_id)
    }

    /// Subscribe to new conversation-log entries as they're appended, for
    /// `logs --follow`. Entries that arrived before subscription are not
    /// replayed here — callers should read [`Self::conversation_log`] first.
    pub fn subscribe_log(&self, instance_id: &str) -> AgoResult<tokio::sync::broadcast::Receiver<ConversationEntry>> {
        self.logs
            .get(instance_id)
            .map(|state| state.broadcast.subscribe())
            .ok_or_else(|| AgoError::NoSuchAgent(instance_id.to_string()))
    }

    /// Enqueue a message for `to`, fire-and-forget from the sender's point
    /// of view, and mirror it into `from`'s own conversation log as an
    /// outgoing record.
    pub async fn send(&self, from: &str, to: &str, payload: String, role: MessageRole) -> AgoResult<u64> {
        let sender = self
            .queues
            .get(to)
            .ok_or_else(|| AgoError::NoSuchAgent(to.to_string()))?
            .clone();

        let message_id = self.next_id.fetch_add(1, Ordering::Relaxed);

        sender
            .try_send(QueuedMessage { message_id, from: from.to_string(), payload: payload.clone(), role })
            .map_err(|_| AgoError::QueueFull(to.to_string()))?;

        self.append_log(from, ConversationEntry {
            message_id,
            role,
            content: payload,
            timestamp_unix_secs: now_unix(),
        }).await;

        Ok(message_id)
    }

    pub async fn conversation_log(&self, instance_id: &str) -> AgoResult<Vec<ConversationEntry>> {
        let log = self
            .logs
            .get(instance_id)
            .ok_or_else(|| AgoError::NoSuchAgent(instance_id.to_string()))?;
        let entries = log.ring.lock().await;
        Ok(entries.iter().cloned().collect())
    }

    /// Append an entry directly (used by the control server when relaying a
    /// worker's own streamed `turn-complete` text into its log) and notify
    /// any `logs --follow` subscribers.
    pub async fn append_log(&self, instance_id: &str, entry: ConversationEntry) {
        if let Some(log) = self.logs.get(instance_id) {
            {
                let mut entries = log.ring.lock().await;
                push_bounded(&mut entries, entry.clone(), self.max_conv);
            }
            let _ = log.broadcast.send(entry);
        }
    }

    pub fn queue_depth(&self, instance_id: &str) -> Option<usize> {
        self.queues.get(instance_id).map(|s| DEFAULT_QUEUE_CAPACITY - s.capacity())
    }

    pub fn live_instance_ids(&self) -> Vec<String> {
        self.queues.iter().map(|e| e.key().clone()).collect()
    }
}

fn push_bounded(ring: &mut VecDeque<ConversationEntry>, entry: ConversationEntry, max: usize) {
    ring.push_back(entry);
    while ring.len() > max {
        ring.pop_front();
    }
}

fn now_unix() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

/// Drains one instance's inbound queue for as long as it lives, handing
/// each message to its worker socket and, on success, appending the
/// recipient-side entry into the same conversation log `logs`/`logs
/// --follow` read from — the daemon never learns this happened except
/// through this ring, since the worker's own copy (§C8) lives in a
/// different process.
#[allow(clippy::too_many_arguments)]
async fn delivery_loop(
    instance_id: String,
    socket_path: PathBuf,
    mut rx: mpsc::Receiver<QueuedMessage>,
    dead_letter_path: PathBuf,
    ring: Arc<Mutex<VecDeque<ConversationEntry>>>,
    broadcast: tokio::sync::broadcast::Sender<ConversationEntry>,
    max_conv: usize,
) {
    while let Some(message) = rx.recv().await {
        if deliver_with_retry(&socket_path, &message).await {
            tracing::debug!(instance = %instance_id, message_id = message.message_id, "message delivered");
            let entry = ConversationEntry {
                message_id: message.message_id,
                role: message.role,
                content: message.payload.clone(),
                timestamp_unix_secs: now_unix(),
            };
            {
                let mut entries = ring.lock().await;
                push_bounded(&mut entries, entry.clone(), max_conv);
            }
            let _ = broadcast.send(entry);
        } else {
            tracing::warn!(instance = %instance_id, message_id = message.message_id, "message dead-lettered");
            dead_letter(&dead_letter_path, &instance_id, &message).await;
        }
    }
}

async fn deliver_with_retry(socket_path: &PathBuf, message: &QueuedMessage) -> bool {
    let mut delay = RETRY_BASE;
    for attempt in 0..RETRY_ATTEMPTS {
        if attempt > 0 {
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(RETRY_CAP);
        }
        if try_deliver_once(socket_path, message).await.is_ok() {
            return true;
        }
    }
    false
}

async fn try_deliver_once(socket_path: &PathBuf, message: &QueuedMessage) -> AgoResult<()> {
    let mut stream = UnixStream::connect(socket_path)
        .await
        .map_err(|source| AgoError::SocketIO { path: socket_path.clone(), source })?;

    let request = Request::new(Op::Send)
        .with_arg("from", message.from.clone())
        .with_arg("payload", message.payload.clone())
        .with_arg("role", role_name(message.role));

    framing::write_frame(&mut stream, &Frame::Request(request)).await?;
    match framing::read_frame(&mut stream).await? {
        DecodeOutcome::Frame(Frame::Response(resp)) if resp.is_ok() => Ok(()),
        DecodeOutcome::Frame(Frame::Response(resp)) => Err(AgoError::ChildCrashed(
            resp.message.unwrap_or_else(|| "delivery rejected".to_string()),
        )),
        _ => Err(AgoError::SocketIO {
            path: socket_path.clone(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, "unexpected reply to send"),
        }),
    }
}

fn role_name(role: MessageRole) -> &'static str {
    match role {
        MessageRole::User => "user",
        MessageRole::Agent => "agent",
        MessageRole::System => "system",
    }
}

async fn dead_letter(path: &PathBuf, to: &str, message: &QueuedMessage) {
    use tokio::io::AsyncWriteExt;
    if let Some(parent) = path.parent() {
        let _ = tokio::fs::create_dir_all(parent).await;
    }
    let line = format!(
        "{} to={} from={} message_id={} payload={:?}\n",
        now_unix(), to, message.from, message.message_id, message.payload
    );
    if let Ok(mut file) = tokio::fs::OpenOptions::new().create(true).append(true).open(path).await {
        let _ = file.write_all(line.as_bytes()).await;
    }
}
