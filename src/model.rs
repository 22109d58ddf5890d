use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Opaque per-user identity handed in by the (out-of-scope) auth collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerId(pub String);

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque function identity handed in by the (out-of-scope) function CRUD collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FunctionId(pub String);

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Request handed to the engine by a validated collaborator. `source_code`
/// is assumed already bounded to <= 1 MiB upstream; the engine never
/// re-validates it.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub function_id: FunctionId,
    pub owner_id: OwnerId,
    pub source_code: String,
    pub input: Option<serde_json::Value>,
}

/// Status of a terminated invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Success,
    Error,
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionStatus::Success => write!(f, "success"),
            ExecutionStatus::Error => write!(f, "error"),
        }
    }
}

/// The structured result returned to the caller. `status == Success` implies
/// `error` is `None`; `status == Error` implies `output` is `None`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    pub output: Option<String>,
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

impl ExecutionResult {
    pub fn success(output: String, elapsed_ms: u64) -> Self {
        Self {
            status: ExecutionStatus::Success,
            output: Some(output),
            error: None,
            elapsed_ms,
        }
    }

    pub fn error(message: impl Into<String>, elapsed_ms: u64) -> Self {
        Self {
            status: ExecutionStatus::Error,
            output: None,
            error: Some(message.into()),
            elapsed_ms,
        }
    }
}

/// Per-user durable quota row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quota {
    pub owner_id: OwnerId,
    pub cpu_time_used_ms: i64,
    pub concurrent_count: i32,
    pub last_reset_at: DateTime<Utc>,
}

impl Quota {
    pub fn fresh(owner_id: OwnerId, now: DateTime<Utc>) -> Self {
        Self {
            owner_id,
            cpu_time_used_ms: 0,
            concurrent_count: 0,
            last_reset_at: now,
        }
    }
}

/// A parsed HTTP-response envelope extracted from sandbox stdout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HttpEnvelope {
    pub status_code: u16,
    pub headers: HashMap<String, String>,
    pub body: EnvelopeBody,
}

/// The body of an `HttpEnvelope`. The wire shape always carries a string,
/// but if that string is itself JSON it is promoted to a structured value
/// so callers don't have to double-decode.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum EnvelopeBody {
    Structured(serde_json::Value),
    Text(String),
}

impl EnvelopeBody {
    pub fn as_text(&self) -> String {
        match self {
            EnvelopeBody::Structured(v) => v.to_string(),
            EnvelopeBody::Text(s) => s.clone(),
        }
    }
}

/// What Capture produced from a sandbox's stdout. Deliberately two explicit
/// variants — the Orchestrator never has to guess which mode the caller
/// wanted (§9 open question, resolved).
#[derive(Debug, Clone)]
pub enum CaptureOutcome {
    Envelope(HttpEnvelope),
    Raw(String),
}

/// A deployed function as read from the (out-of-scope-owned) function store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Function {
    pub id: FunctionId,
    pub owner_id: OwnerId,
    pub source_code: String,
    pub enabled: bool,
}

/// One append-only row in the Execution Log.
#[derive(Debug, Clone)]
pub struct ExecutionLogRecord {
    pub function_id: FunctionId,
    pub owner_id: OwnerId,
    pub status: ExecutionStatus,
    pub output: Option<String>,
    pub error: Option<String>,
    pub elapsed_ms: u64,
}
