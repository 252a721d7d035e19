//! Benchmark coordinator.
//!
//! One pending record per round, keyed by a random request id. The record
//! owns the expected-set, the ordered results, the oneshot resolver the
//! starting command awaits, and the timeout timer. The timer is aborted
//! before the resolver fires so a resolution never races a late timeout.
//!
//! While the initial fan-out is in flight the record is flagged
//! `dispatching`: reports and departures still mutate it, but the
//! completion check is deferred to the dispatcher so a round whose every
//! delivery fails resolves as "could not reach any clients" rather than
//! "completed".

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use brainhub_core::{Delivery, Envelope};

use crate::hub::Hub;

/// Default benchmark iterations.
pub const DEFAULT_ITERATIONS: u64 = 50_000;

/// Default benchmark timeout in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 5_000;

/// Parsed `benchmark` command arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BenchmarkArgs {
    /// Iterations each worker should run.
    pub iterations: u64,
    /// Round timeout in milliseconds.
    pub timeout_ms: u64,
}

impl Default for BenchmarkArgs {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_ITERATIONS,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

impl BenchmarkArgs {
    /// Parse the token tail of a `benchmark` command: a positional integer
    /// sets iterations; `key=value` pairs accept `timeout`, `timeoutms`,
    /// `iterations` and `loops`, case-insensitive.
    pub fn parse(tokens: &[&str]) -> Result<Self, String> {
        let mut args = Self::default();
        for token in tokens {
            if let Some((key, value)) = token.split_once('=') {
                let parsed: u64 = value
                    .parse()
                    .map_err(|_| format!("Invalid value for {key}: {value}"))?;
                match key.to_ascii_lowercase().as_str() {
                    "timeout" | "timeoutms" => args.timeout_ms = parsed,
                    "iterations" | "loops" => args.iterations = parsed,
                    other => return Err(format!("Unknown option: {other}")),
                }
            } else {
                args.iterations = token
                    .parse()
                    .map_err(|_| format!("Invalid iterations: {token}"))?;
            }
        }
        // Recorded results promise at least one iteration.
        args.iterations = args.iterations.max(1);
        Ok(args)
    }
}

/// One recorded timing report.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BenchmarkResult {
    /// Reporting client.
    pub client_id: String,
    /// Reported wall time, milliseconds.
    pub duration_ms: f64,
    /// Iterations the round asked for.
    pub iterations: u64,
    /// Derived throughput, absent when the duration is zero.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ops_per_second: Option<f64>,
    /// ISO-8601 receipt time.
    pub received_at: String,
    /// Free-form details from the reporter.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Request-scoped state for one pending round.
pub(crate) struct PendingBenchmark {
    request_id: String,
    requester_id: String,
    created_at: chrono::DateTime<chrono::Utc>,
    iterations: u64,
    timeout_ms: u64,
    participants: usize,
    expected: Vec<String>,
    results: Vec<BenchmarkResult>,
    resolver: Option<oneshot::Sender<Value>>,
    timer: Option<JoinHandle<()>>,
    dispatching: bool,
}

impl PendingBenchmark {
    fn summary(&self, message: &str) -> Value {
        let completed_at = chrono::Utc::now();
        json!({
            "command": "benchmark",
            "requestId": &self.request_id,
            "requesterId": &self.requester_id,
            "iterations": self.iterations,
            "timeoutMs": self.timeout_ms,
            "startedAt": self.created_at.to_rfc3339(),
            "completedAt": completed_at.to_rfc3339(),
            "durationMs": (completed_at - self.created_at).num_milliseconds(),
            "participants": self.participants,
            "responded": self.results.len(),
            "pending": &self.expected,
            "results": &self.results,
            "message": message,
        })
    }
}

impl Hub {
    /// Run one benchmark round and wait for its summary.
    ///
    /// Never raises: every outcome, including `NoClients` and timeouts, is
    /// a structured JSON response.
    pub async fn start_benchmark(
        self: &Arc<Self>,
        requester_id: &str,
        args: BenchmarkArgs,
    ) -> Value {
        let snapshot = self.registry.snapshot().await;
        if snapshot.is_empty() {
            return json!({
                "command": "benchmark",
                "error": "No clients connected",
            });
        }

        let request_id = uuid::Uuid::new_v4().to_string();
        let started = chrono::Utc::now();
        let (resolver, resolved) = oneshot::channel();
        let pending = PendingBenchmark {
            request_id: request_id.clone(),
            requester_id: requester_id.to_string(),
            created_at: started,
            iterations: args.iterations,
            timeout_ms: args.timeout_ms,
            participants: snapshot.len(),
            expected: snapshot
                .iter()
                .map(|entry| entry.descriptor.id.clone())
                .collect(),
            results: Vec::new(),
            resolver: Some(resolver),
            timer: None,
            dispatching: true,
        };
        self.benchmarks
            .lock()
            .await
            .insert(request_id.clone(), pending);
        info!(%request_id, participants = snapshot.len(), "Benchmark started");

        let timer = {
            let hub = Arc::clone(self);
            let request_id = request_id.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(args.timeout_ms)).await;
                hub.finish_benchmark(&request_id, "timed out").await;
            })
        };
        if let Some(pending) = self.benchmarks.lock().await.get_mut(&request_id) {
            pending.timer = Some(timer);
        } else {
            timer.abort();
        }

        let request = Envelope::BenchmarkRequest {
            request_id: request_id.clone(),
            requester_id: requester_id.to_string(),
            iterations: args.iterations,
            timeout_ms: args.timeout_ms,
            started_at: started.to_rfc3339(),
        }
        .to_value();
        let deliveries = snapshot.iter().map(|entry| {
            let request = request.clone();
            async move { entry.session.deliver(request).await }
        });
        let outcomes = futures::future::join_all(deliveries).await;
        for (entry, outcome) in snapshot.iter().zip(outcomes) {
            match outcome {
                Delivery::Ok => {},
                Delivery::Transient(reason) => {
                    warn!(client = %entry.descriptor.id, %reason, "Benchmark request delivery failed");
                    self.drop_expected(&request_id, &entry.descriptor.id).await;
                },
                Delivery::Dead(reason) => {
                    info!(client = %entry.descriptor.id, %reason, "Evicting dead session during benchmark dispatch");
                    self.handle_departure(entry.session.id()).await;
                },
            }
        }

        // Dispatch finished: run the deferred completion check.
        let resolution = {
            let mut pendings = self.benchmarks.lock().await;
            match pendings.get_mut(&request_id) {
                Some(pending) => {
                    pending.dispatching = false;
                    if pending.expected.is_empty() {
                        if pending.results.is_empty() {
                            Some("could not reach any clients")
                        } else {
                            Some("completed")
                        }
                    } else {
                        None
                    }
                },
                // Already resolved (timer fired during dispatch).
                None => None,
            }
        };
        if let Some(message) = resolution {
            self.finish_benchmark(&request_id, message).await;
        }

        match resolved.await {
            Ok(summary) => summary,
            Err(_) => json!({
                "command": "benchmark",
                "requestId": request_id,
                "error": "benchmark was dropped before resolving",
            }),
        }
    }

    /// Record one timing report. First report per client wins.
    pub async fn report_benchmark(
        self: &Arc<Self>,
        request_id: &str,
        client_id: &str,
        duration_ms: f64,
        details: Option<String>,
    ) -> Value {
        let (response, completed) = {
            let mut pendings = self.benchmarks.lock().await;
            let Some(pending) = pendings.get_mut(request_id) else {
                return json!({
                    "command": "benchmark report",
                    "accepted": false,
                    "requestId": request_id,
                    "error": "Unknown benchmark request",
                });
            };
            if pending
                .results
                .iter()
                .any(|result| result.client_id == client_id)
            {
                return json!({
                    "command": "benchmark report",
                    "accepted": false,
                    "requestId": request_id,
                    "error": "already reported",
                });
            }
            let ops_per_second = (duration_ms > 0.0)
                .then(|| pending.iterations as f64 / (duration_ms / 1000.0));
            pending.results.push(BenchmarkResult {
                client_id: client_id.to_string(),
                duration_ms,
                iterations: pending.iterations,
                ops_per_second,
                received_at: chrono::Utc::now().to_rfc3339(),
                details,
            });
            pending.expected.retain(|id| id != client_id);
            let remaining = pending.expected.len();
            let response = json!({
                "command": "benchmark report",
                "accepted": true,
                "requestId": request_id,
                "remaining": remaining,
            });
            (response, remaining == 0 && !pending.dispatching)
        };
        if completed {
            self.finish_benchmark(request_id, "completed").await;
        }
        response
    }

    /// Drop a departed client from every expected-set; rounds drained by
    /// the departure resolve.
    pub(crate) async fn on_benchmark_departure(self: &Arc<Self>, client_id: &str) {
        let drained: Vec<String> = {
            let mut pendings = self.benchmarks.lock().await;
            pendings
                .iter_mut()
                .filter_map(|(request_id, pending)| {
                    let before = pending.expected.len();
                    pending.expected.retain(|id| id != client_id);
                    (before > pending.expected.len()
                        && pending.expected.is_empty()
                        && !pending.dispatching)
                        .then(|| request_id.clone())
                })
                .collect()
        };
        for request_id in drained {
            self.finish_benchmark(&request_id, "completed").await;
        }
    }

    /// Drop one client from one round's expected-set after a failed
    /// delivery. Completion is checked unless the round is mid-dispatch.
    async fn drop_expected(self: &Arc<Self>, request_id: &str, client_id: &str) {
        let completed = {
            let mut pendings = self.benchmarks.lock().await;
            let Some(pending) = pendings.get_mut(request_id) else {
                return;
            };
            pending.expected.retain(|id| id != client_id);
            pending.expected.is_empty() && !pending.dispatching
        };
        if completed {
            self.finish_benchmark(request_id, "completed").await;
        }
    }

    /// Resolve one round: abort the timer, build the summary, fire the
    /// resolver. Whoever removes the pending record runs this exactly once.
    pub(crate) async fn finish_benchmark(&self, request_id: &str, message: &str) {
        let Some(mut pending) = self.benchmarks.lock().await.remove(request_id) else {
            return;
        };
        if let Some(timer) = pending.timer.take() {
            timer.abort();
        }
        let summary = pending.summary(message);
        info!(request_id, message, responded = pending.results.len(), "Benchmark resolved");
        if let Some(resolver) = pending.resolver.take() {
            let _ = resolver.send(summary);
        }
    }
}
