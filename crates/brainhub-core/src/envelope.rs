//! Hub→worker wire envelopes.
//!
//! Every message the hub pushes over a session is a type-tagged JSON object.
//! Only the envelopes the hub itself produces are modelled here; user-supplied
//! broadcast payloads (e.g. `play-audio`) pass through the broadcast engine as
//! opaque `serde_json::Value` and never touch this enum.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::descriptor::ClientDescriptor;

/// Nearest-neighbour hint carried in `client-list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NearestMatch {
    /// The nearest neighbour's descriptor.
    pub peer: ClientDescriptor,
    /// Distance between the two vectors.
    pub distance: f64,
}

/// Messages the hub delivers to worker sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Envelope {
    /// Registry snapshot sent once to a freshly joined client.
    #[serde(rename_all = "camelCase")]
    ClientList {
        /// All registered descriptors, insertion order.
        clients: Vec<ClientDescriptor>,
        /// Nearest-neighbour hint, if any other client is registered.
        #[serde(rename = "match")]
        nearest: Option<NearestMatch>,
        /// Supported command verbs.
        commands: Vec<String>,
    },

    /// A new client joined.
    #[serde(rename_all = "camelCase")]
    ClientJoined {
        /// The joiner's descriptor.
        client: ClientDescriptor,
        /// Registry size after the join.
        total: usize,
    },

    /// A client left (disconnect or dead-session eviction).
    #[serde(rename_all = "camelCase")]
    ClientLeft {
        /// The departed client's descriptor.
        client: ClientDescriptor,
        /// Registry size after the removal.
        total: usize,
    },

    /// Sent to the nearest neighbour of a freshly joined client.
    #[serde(rename_all = "camelCase")]
    ClientMatch {
        /// The joiner's descriptor.
        client: ClientDescriptor,
        /// Distance between the two vectors.
        distance: f64,
        /// Always `"hello"`.
        message: String,
    },

    /// A broadcast user message.
    #[serde(rename_all = "camelCase")]
    UserMessage {
        /// Sender's client id.
        from: String,
        /// Message body.
        message: String,
        /// ISO-8601 send time.
        timestamp: String,
    },

    /// Fan-out of a benchmark round.
    #[serde(rename_all = "camelCase")]
    BenchmarkRequest {
        /// Round id.
        request_id: String,
        /// Client that started the round.
        requester_id: String,
        /// Iterations each worker should run.
        iterations: u64,
        /// Round timeout in milliseconds.
        timeout_ms: u64,
        /// ISO-8601 dispatch time.
        started_at: String,
    },

    /// One map-reduce task assignment.
    #[serde(rename_all = "camelCase")]
    MapreduceTask {
        /// Request id of the owning map-reduce.
        request_id: String,
        /// Task id within the request.
        task_id: String,
        /// Opaque task payload.
        payload: Value,
        /// Optional task metadata.
        metadata: Option<Value>,
        /// Canonical reducer name.
        reducer: String,
        /// Number of tasks in the request.
        total_tasks: usize,
        /// Request timeout in milliseconds.
        timeout_ms: u64,
        /// Dispatch attempts for this task so far, including this one.
        attempts: u32,
    },

    /// Low-rate liveness broadcast.
    #[serde(rename_all = "camelCase")]
    Heartbeat {
        /// ISO-8601 server wall-clock time.
        server_time: String,
        /// Current registry size.
        clients: usize,
    },
}

impl Envelope {
    /// Serialize into the JSON value handed to session delivery.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
