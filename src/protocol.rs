//! Wire records exchanged over the framing codec (§C1): a closed,
//! statically-dispatched tagged union rather than open polymorphism, since
//! the operation set is small and stable.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The operations the control server's dispatch table understands.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Op {
    Create,
    Run,
    Ps,
    Inspect,
    Chat,
    Send,
    Logs,
    Stop,
    Queues,
    Templates,
    Pull,
    ConfigGet,
    ConfigSet,
    ConfigShow,
    RegistryAdd,
    RegistryRemove,
    Shutdown,
    /// Sent by the process manager to an instance socket, not by a client.
    Ping,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Request {
    pub op: Op,
    pub args: HashMap<String, String>,
}

impl Request {
    pub fn new(op: Op) -> Self {
        Request { op, args: HashMap::new() }
    }

    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }

    pub fn arg(&self, key: &str) -> Option<&str> {
        self.args.get(key).map(|s| s.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Status {
    Ok,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Response {
    pub status: Status,
    pub payload: HashMap<String, String>,
    /// Populated only when `status == Error`; names the error kind from the
    /// error-handling design (`NoSuchAgent`, `QueueFull`, ...).
    pub error_kind: Option<String>,
    pub message: Option<String>,
}

impl Response {
    pub fn ok(payload: HashMap<String, String>) -> Self {
        Response { status: Status::Ok, payload, error_kind: None, message: None }
    }

    pub fn error(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Response {
            status: Status::Error,
            payload: HashMap::new(),
            error_kind: Some(kind.into()),
            message: Some(message.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self.status, Status::Ok)
    }
}

/// Kinds of out-of-band events streamed during an upgraded (chat / logs /
/// queues --follow) connection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EventKind {
    TurnStarted,
    ToolCall,
    Observation,
    TurnComplete,
    TurnTruncated,
    LogEntry,
    QueueUpdate,
    Ready,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Event {
    pub kind: EventKind,
    pub payload: HashMap<String, String>,
}

impl Event {
    pub fn new(kind: EventKind) -> Self {
        Event { kind, payload: HashMap::new() }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }
}

/// The one envelope type that actually crosses the wire; `Request` /
/// `Response` / `Event` are never framed bare.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Frame {
    Request(Request),
    Response(Response),
    Event(Event),
}
