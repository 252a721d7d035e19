//! Map-reduce coordinator.
//!
//! A request parses its task set, dispatches tasks round-robin across the
//! registry, collects per-task reports, reassigns tasks orphaned by
//! departures, and reduces the successful results through one of a closed
//! set of reducers. Like the benchmark coordinator, each request is a
//! pending record owning its resolver and timeout timer, flagged
//! `dispatching` while the initial fan-out is in flight.
//!
//! Reassignment is deferred: the departure path clears the orphaned
//! assignment under the lock, then enqueues the re-dispatch on the
//! executor, so it never re-enters the departure handler.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value, json};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use brainhub_core::{Delivery, Envelope};

use crate::hub::Hub;
use crate::payload::decode_payload;

/// Default map-reduce timeout in milliseconds.
pub const DEFAULT_MAPREDUCE_TIMEOUT_MS: u64 = 30_000;

/// Closed set of result aggregations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reducer {
    /// All successful results, task order.
    Collect,
    /// Numeric sum; non-numeric results are dropped.
    Sum,
    /// Numeric mean; `0` when nothing is numeric.
    Average,
    /// Stringified concatenation, task order.
    Concat,
    /// Number of successful results.
    Count,
    /// Left-to-right shallow merge of object results.
    Merge,
}

impl Reducer {
    /// Parse a reducer name or alias, case-insensitive.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "collect" => Some(Self::Collect),
            "sum" | "add" | "total" => Some(Self::Sum),
            "average" | "avg" | "mean" => Some(Self::Average),
            "concat" | "join" | "string" => Some(Self::Concat),
            "count" | "len" | "length" => Some(Self::Count),
            "merge" | "object" | "combine" => Some(Self::Merge),
            _ => None,
        }
    }

    /// Canonical name (the first name of each alias group).
    #[must_use]
    pub fn canonical(self) -> &'static str {
        match self {
            Self::Collect => "collect",
            Self::Sum => "sum",
            Self::Average => "average",
            Self::Concat => "concat",
            Self::Count => "count",
            Self::Merge => "merge",
        }
    }

    /// Reduce successful task results, task order.
    #[must_use]
    pub fn reduce(self, results: &[Value]) -> Value {
        match self {
            Self::Collect => Value::Array(results.to_vec()),
            Self::Sum => number_value(numeric_results(results).sum()),
            Self::Average => {
                let numbers: Vec<f64> = numeric_results(results).collect();
                if numbers.is_empty() {
                    json!(0)
                } else {
                    number_value(numbers.iter().sum::<f64>() / numbers.len() as f64)
                }
            },
            Self::Concat => Value::String(results.iter().map(stringify).collect()),
            Self::Count => json!(results.len()),
            Self::Merge => {
                let mut merged = Map::new();
                for result in results {
                    if let Value::Object(map) = result {
                        merged.extend(map.clone());
                    }
                }
                Value::Object(merged)
            },
        }
    }
}

/// Numbers plus finite-parseable strings; everything else drops out.
fn numeric_results(results: &[Value]) -> impl Iterator<Item = f64> + '_ {
    results.iter().filter_map(|value| match value {
        Value::Number(n) => n.as_f64().filter(|f| f.is_finite()),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    })
}

fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

/// Emit integral floats as JSON integers so sums of integers stay integers.
fn number_value(value: f64) -> Value {
    if value.fract() == 0.0 && value.abs() < 9_007_199_254_740_992.0 {
        json!(value as i64)
    } else {
        json!(value)
    }
}

/// State of one distributed task.
#[derive(Debug, Clone)]
pub(crate) struct TaskState {
    task_id: String,
    payload: Value,
    metadata: Option<Value>,
    assigned_to: Option<String>,
    assigned_at: Option<i64>,
    attempts: u32,
    completed_at: Option<i64>,
    result: Option<Value>,
    error: Option<String>,
    result_metadata: Option<Value>,
}

impl TaskState {
    fn new(task_id: String, payload: Value, metadata: Option<Value>) -> Self {
        Self {
            task_id,
            payload,
            metadata,
            assigned_to: None,
            assigned_at: None,
            attempts: 0,
            completed_at: None,
            result: None,
            error: None,
            result_metadata: None,
        }
    }

    fn is_complete(&self) -> bool {
        self.completed_at.is_some()
    }

    fn fail(&mut self, error: &str) {
        self.error = Some(error.to_string());
        self.completed_at = Some(now_ms());
    }

    fn result_entry(&self) -> Value {
        let mut entry = Map::new();
        entry.insert("taskId".into(), json!(&self.task_id));
        if let Some(assigned_to) = &self.assigned_to {
            entry.insert("assignedTo".into(), json!(assigned_to));
        }
        entry.insert("attempts".into(), json!(self.attempts));
        if let (Some(done), Some(started)) = (self.completed_at, self.assigned_at) {
            entry.insert("durationMs".into(), json!(done - started));
        }
        if let Some(result) = &self.result {
            entry.insert("result".into(), result.clone());
        }
        if let Some(error) = &self.error {
            entry.insert("error".into(), json!(error));
        }
        if let Some(metadata) = self.result_metadata.as_ref().or(self.metadata.as_ref()) {
            entry.insert("metadata".into(), metadata.clone());
        }
        Value::Object(entry)
    }
}

/// Normalize a payload token into a task list.
pub(crate) fn parse_tasks(input: &str) -> Result<Vec<TaskState>, String> {
    let value = decode_payload(input);
    let mut tasks = Vec::new();
    collect_tasks(&value, &mut tasks);
    if tasks.is_empty() {
        Err("No tasks parsed from payload".into())
    } else {
        Ok(tasks)
    }
}

fn collect_tasks(value: &Value, out: &mut Vec<TaskState>) {
    match value {
        Value::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                out.push(task_from_element(item, index));
            }
        },
        Value::Object(map) => {
            if let Some(nested) = map.get("tasks") {
                collect_tasks(nested, out);
                return;
            }
            for (key, value) in map {
                if key == "metadata" || key == "config" {
                    continue;
                }
                out.push(TaskState::new(key.clone(), value.clone(), None));
            }
        },
        _ => {},
    }
}

fn task_from_element(item: &Value, index: usize) -> TaskState {
    let default_id = || format!("task-{}", index + 1);
    if let Value::Object(map) = item {
        let explicit = ["taskId", "id", "payload", "value", "data", "metadata"]
            .iter()
            .any(|key| map.contains_key(*key));
        if explicit {
            let task_id = map
                .get("taskId")
                .or_else(|| map.get("id"))
                .and_then(id_string)
                .unwrap_or_else(default_id);
            let payload = map
                .get("payload")
                .or_else(|| map.get("value"))
                .or_else(|| map.get("data"))
                .cloned()
                .unwrap_or(Value::Null);
            return TaskState::new(task_id, payload, map.get("metadata").cloned());
        }
    }
    TaskState::new(default_id(), item.clone(), None)
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Request-scoped state for one pending map-reduce.
pub(crate) struct PendingMapReduce {
    request_id: String,
    requester_id: String,
    created_at: chrono::DateTime<chrono::Utc>,
    timeout_ms: u64,
    reducer: Reducer,
    tasks: Vec<TaskState>,
    resolver: Option<oneshot::Sender<Value>>,
    timer: Option<JoinHandle<()>>,
    cursor: usize,
    dispatching: bool,
}

impl PendingMapReduce {
    fn all_complete(&self) -> bool {
        self.tasks.iter().all(TaskState::is_complete)
    }

    fn summary(&self, message: &str) -> Value {
        let completed_at = chrono::Utc::now();
        let completed = self.tasks.iter().filter(|t| t.is_complete()).count();
        let failed = self
            .tasks
            .iter()
            .filter(|t| t.is_complete() && t.error.is_some())
            .count();
        let successes: Vec<Value> = self
            .tasks
            .iter()
            .filter(|t| t.is_complete() && t.error.is_none())
            .map(|t| t.result.clone().unwrap_or(Value::Null))
            .collect();
        json!({
            "command": "mapreduce",
            "requestId": &self.request_id,
            "requesterId": &self.requester_id,
            "reducer": self.reducer.canonical(),
            "totalTasks": self.tasks.len(),
            "completedTasks": completed,
            "failedTasks": failed,
            "pendingTasks": self.tasks.len() - completed,
            "startedAt": self.created_at.to_rfc3339(),
            "completedAt": completed_at.to_rfc3339(),
            "durationMs": (completed_at - self.created_at).num_milliseconds(),
            "timeoutMs": self.timeout_ms,
            "results": self.tasks.iter().map(TaskState::result_entry).collect::<Vec<_>>(),
            "reducedValue": self.reducer.reduce(&successes),
            "message": message,
        })
    }
}

impl Hub {
    /// Parse, dispatch and await one map-reduce request.
    pub async fn start_mapreduce(
        self: &Arc<Self>,
        requester_id: &str,
        tasks_input: &str,
        reducer: Reducer,
        timeout_ms: u64,
    ) -> Value {
        let tasks = match parse_tasks(tasks_input) {
            Ok(tasks) => tasks,
            Err(error) => {
                return json!({
                    "command": "mapreduce",
                    "error": error,
                    "example": "mapreduce start tasks=[1,2,3] reducer=sum",
                });
            },
        };
        if self.registry.is_empty().await {
            return json!({
                "command": "mapreduce",
                "error": "No clients connected",
            });
        }

        let request_id = uuid::Uuid::new_v4().to_string();
        let total_tasks = tasks.len();
        let (resolver, resolved) = oneshot::channel();
        let pending = PendingMapReduce {
            request_id: request_id.clone(),
            requester_id: requester_id.to_string(),
            created_at: chrono::Utc::now(),
            timeout_ms,
            reducer,
            tasks,
            resolver: Some(resolver),
            timer: None,
            cursor: 0,
            dispatching: true,
        };
        self.mapreduces
            .lock()
            .await
            .insert(request_id.clone(), pending);
        info!(%request_id, total_tasks, reducer = reducer.canonical(), "Map-reduce started");

        let timer = {
            let hub = Arc::clone(self);
            let request_id = request_id.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(timeout_ms)).await;
                hub.on_mapreduce_timeout(&request_id).await;
            })
        };
        if let Some(pending) = self.mapreduces.lock().await.get_mut(&request_id) {
            pending.timer = Some(timer);
        } else {
            timer.abort();
        }

        for index in 0..total_tasks {
            self.dispatch_task(&request_id, index, false).await;
        }

        let done = {
            let mut pendings = self.mapreduces.lock().await;
            match pendings.get_mut(&request_id) {
                Some(pending) => {
                    pending.dispatching = false;
                    pending.all_complete()
                },
                None => false,
            }
        };
        if done {
            self.finish_mapreduce(&request_id, "completed").await;
        }

        match resolved.await {
            Ok(summary) => summary,
            Err(_) => json!({
                "command": "mapreduce",
                "requestId": request_id,
                "error": "map-reduce was dropped before resolving",
            }),
        }
    }

    /// Assign one task to the next registry slot, trying each candidate at
    /// most once. Dead candidates are evicted; when nobody accepts, the
    /// task completes with a dispatch error.
    pub(crate) fn dispatch_task<'a>(
        self: &'a Arc<Self>,
        request_id: &'a str,
        index: usize,
        reassign: bool,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
        let snapshot = self.registry.snapshot().await;
        let mut tried = 0usize;
        loop {
            let prepared = {
                let mut pendings = self.mapreduces.lock().await;
                let Some(pending) = pendings.get_mut(request_id) else {
                    return;
                };
                let total_tasks = pending.tasks.len();
                let Some(task) = pending.tasks.get_mut(index) else {
                    return;
                };
                if task.is_complete() {
                    return;
                }
                if tried >= snapshot.len() {
                    task.fail(if reassign {
                        "Failed to reassign after client departure"
                    } else {
                        "Failed to dispatch task to any client"
                    });
                    warn!(request_id, task = %task.task_id, reassign, "Task failed: no reachable client");
                    None
                } else {
                    let slot = pending.cursor % snapshot.len();
                    let entry = snapshot[slot].clone();
                    task.attempts += 1;
                    task.assigned_to = Some(entry.descriptor.id.clone());
                    task.assigned_at = Some(now_ms());
                    let message = Envelope::MapreduceTask {
                        request_id: request_id.to_string(),
                        task_id: task.task_id.clone(),
                        payload: task.payload.clone(),
                        metadata: task.metadata.clone(),
                        reducer: pending.reducer.canonical().to_string(),
                        total_tasks,
                        timeout_ms: pending.timeout_ms,
                        attempts: task.attempts,
                    }
                    .to_value();
                    Some((slot, entry, message))
                }
            };

            let Some((slot, entry, message)) = prepared else {
                self.check_mapreduce_completion(request_id).await;
                return;
            };

            match entry.session.deliver(message).await {
                Delivery::Ok => {
                    let mut pendings = self.mapreduces.lock().await;
                    if let Some(pending) = pendings.get_mut(request_id) {
                        pending.cursor = slot + 1;
                    }
                    return;
                },
                outcome => {
                    // Roll the assignment back before any eviction so the
                    // departure path does not schedule a second dispatch.
                    {
                        let mut pendings = self.mapreduces.lock().await;
                        if let Some(pending) = pendings.get_mut(request_id) {
                            if let Some(task) = pending.tasks.get_mut(index) {
                                if !task.is_complete() {
                                    task.assigned_to = None;
                                    task.assigned_at = None;
                                }
                            }
                            pending.cursor = slot + 1;
                        }
                    }
                    if let Delivery::Dead(reason) = outcome {
                        info!(client = %entry.descriptor.id, %reason, "Evicting dead session during task dispatch");
                        self.handle_departure(entry.session.id()).await;
                    } else if let Delivery::Transient(reason) = outcome {
                        warn!(client = %entry.descriptor.id, %reason, "Task delivery failed, trying next candidate");
                    }
                    tried += 1;
                },
            }
        }
        })
    }

    /// Record one task report. First report per task wins; reports from a
    /// client other than the assignee are logged and accepted.
    pub async fn report_mapreduce(
        self: &Arc<Self>,
        request_id: &str,
        task_id: &str,
        result: Option<Value>,
        error: Option<String>,
        metadata: Option<Value>,
        reporter: &str,
    ) -> Value {
        let (response, done) = {
            let mut pendings = self.mapreduces.lock().await;
            let Some(pending) = pendings.get_mut(request_id) else {
                return json!({
                    "command": "mapreduce report",
                    "accepted": false,
                    "requestId": request_id,
                    "error": "Unknown mapreduce request",
                });
            };
            let Some(task) = pending.tasks.iter_mut().find(|t| t.task_id == task_id) else {
                return json!({
                    "command": "mapreduce report",
                    "accepted": false,
                    "requestId": request_id,
                    "error": format!("Unknown task: {task_id}"),
                });
            };
            if task.is_complete() {
                return json!({
                    "command": "mapreduce report",
                    "accepted": false,
                    "requestId": request_id,
                    "taskId": task_id,
                    "error": "already reported",
                });
            }
            if task.assigned_to.as_deref() != Some(reporter) {
                warn!(
                    request_id,
                    task = task_id,
                    reporter,
                    assignee = ?task.assigned_to,
                    "Report from a client other than the assignee"
                );
            }
            task.completed_at = Some(now_ms());
            if let Some(error) = error {
                task.error = Some(error);
            } else {
                task.result = Some(result.unwrap_or(Value::Null));
            }
            task.result_metadata = metadata;
            let remaining = pending.tasks.iter().filter(|t| !t.is_complete()).count();
            let response = json!({
                "command": "mapreduce report",
                "accepted": true,
                "requestId": request_id,
                "taskId": task_id,
                "remaining": remaining,
            });
            (response, remaining == 0 && !pending.dispatching)
        };
        if done {
            self.finish_mapreduce(request_id, "completed").await;
        }
        response
    }

    /// Current snapshot of a pending request.
    pub async fn mapreduce_status(&self, request_id: &str) -> Value {
        let pendings = self.mapreduces.lock().await;
        match pendings.get(request_id) {
            Some(pending) => {
                let mut summary = pending.summary("in progress");
                summary["command"] = json!("mapreduce status");
                summary
            },
            None => json!({
                "command": "mapreduce status",
                "requestId": request_id,
                "error": "Unknown mapreduce request",
            }),
        }
    }

    /// Cancel a pending request; the starter receives the cancelled
    /// summary.
    pub async fn cancel_mapreduce(&self, request_id: &str) -> Value {
        if !self.mapreduces.lock().await.contains_key(request_id) {
            return json!({
                "command": "mapreduce cancel",
                "requestId": request_id,
                "error": "Unknown mapreduce request",
            });
        }
        self.finish_mapreduce(request_id, "cancelled").await;
        json!({
            "command": "mapreduce cancel",
            "requestId": request_id,
            "cancelled": true,
        })
    }

    /// Clear assignments orphaned by a departure and enqueue re-dispatch.
    pub(crate) async fn on_mapreduce_departure(self: &Arc<Self>, client_id: &str) {
        let orphaned: Vec<(String, usize)> = {
            let mut pendings = self.mapreduces.lock().await;
            let mut orphaned = Vec::new();
            for (request_id, pending) in pendings.iter_mut() {
                for (index, task) in pending.tasks.iter_mut().enumerate() {
                    if !task.is_complete() && task.assigned_to.as_deref() == Some(client_id) {
                        task.assigned_to = None;
                        task.assigned_at = None;
                        orphaned.push((request_id.clone(), index));
                    }
                }
            }
            orphaned
        };
        // Deferred on purpose: re-dispatch runs after the departure commit,
        // never re-entrantly inside it.
        for (request_id, index) in orphaned {
            let hub = Arc::clone(self);
            tokio::spawn(async move {
                hub.dispatch_task(&request_id, index, true).await;
            });
        }
    }

    async fn on_mapreduce_timeout(self: &Arc<Self>, request_id: &str) {
        {
            let mut pendings = self.mapreduces.lock().await;
            let Some(pending) = pendings.get_mut(request_id) else {
                return;
            };
            for task in &mut pending.tasks {
                if !task.is_complete() {
                    task.fail("No response received");
                }
            }
        }
        self.finish_mapreduce(request_id, "timed out").await;
    }

    pub(crate) async fn check_mapreduce_completion(self: &Arc<Self>, request_id: &str) {
        let done = {
            let pendings = self.mapreduces.lock().await;
            pendings
                .get(request_id)
                .is_some_and(|pending| !pending.dispatching && pending.all_complete())
        };
        if done {
            self.finish_mapreduce(request_id, "completed").await;
        }
    }

    /// Resolve one request: abort the timer, build the summary, fire the
    /// resolver. Runs exactly once per request.
    pub(crate) async fn finish_mapreduce(&self, request_id: &str, message: &str) {
        let Some(mut pending) = self.mapreduces.lock().await.remove(request_id) else {
            return;
        };
        if let Some(timer) = pending.timer.take() {
            timer.abort();
        }
        let summary = pending.summary(message);
        info!(
            request_id,
            message,
            completed = summary["completedTasks"].as_u64(),
            failed = summary["failedTasks"].as_u64(),
            "Map-reduce resolved"
        );
        if let Some(resolver) = pending.resolver.take() {
            let _ = resolver.send(summary);
        }
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine as _;

    #[test]
    fn reducer_aliases() {
        assert_eq!(Reducer::parse("SUM"), Some(Reducer::Sum));
        assert_eq!(Reducer::parse("add"), Some(Reducer::Sum));
        assert_eq!(Reducer::parse("mean"), Some(Reducer::Average));
        assert_eq!(Reducer::parse("join"), Some(Reducer::Concat));
        assert_eq!(Reducer::parse("length"), Some(Reducer::Count));
        assert_eq!(Reducer::parse("combine"), Some(Reducer::Merge));
        assert_eq!(Reducer::parse("collect"), Some(Reducer::Collect));
        assert_eq!(Reducer::parse("bogus"), None);
        assert_eq!(Reducer::Sum.canonical(), "sum");
    }

    #[test]
    fn sum_coerces_numeric_strings_and_drops_junk() {
        let results = vec![json!(1), json!("2.5"), json!("nope"), json!(null), json!(true)];
        assert_eq!(Reducer::Sum.reduce(&results), json!(3.5));
        let ints = vec![json!(1), json!(2), json!(3), json!(4)];
        assert_eq!(Reducer::Sum.reduce(&ints), json!(10));
    }

    #[test]
    fn average_of_nothing_is_zero() {
        assert_eq!(Reducer::Average.reduce(&[json!("x")]), json!(0));
        assert_eq!(Reducer::Average.reduce(&[json!(2), json!(3)]), json!(2.5));
    }

    #[test]
    fn concat_stringifies_in_order() {
        let results = vec![json!("a"), json!(1), json!(null), json!(true), json!([2])];
        assert_eq!(Reducer::Concat.reduce(&results), json!("a1true[2]"));
    }

    #[test]
    fn count_counts() {
        assert_eq!(Reducer::Count.reduce(&[json!(1), json!("x")]), json!(2));
    }

    #[test]
    fn merge_is_left_to_right_and_skips_non_objects() {
        let results = vec![
            json!({"a": 1, "b": 1}),
            json!([1, 2]),
            json!({"b": 2, "c": 3}),
            json!("ignored"),
        ];
        assert_eq!(
            Reducer::Merge.reduce(&results),
            json!({"a": 1, "b": 2, "c": 3})
        );
    }

    #[test]
    fn parse_tasks_list_of_scalars() {
        let tasks = parse_tasks("[1,2,3]").unwrap();
        assert_eq!(tasks.len(), 3);
        assert_eq!(tasks[0].task_id, "task-1");
        assert_eq!(tasks[2].task_id, "task-3");
        assert_eq!(tasks[1].payload, json!(2));
    }

    #[test]
    fn parse_tasks_explicit_objects() {
        let tasks =
            parse_tasks(r#"[{"taskId":"a","payload":1},{"id":"b","value":2,"metadata":{"m":1}}]"#)
                .unwrap();
        assert_eq!(tasks[0].task_id, "a");
        assert_eq!(tasks[0].payload, json!(1));
        assert_eq!(tasks[1].task_id, "b");
        assert_eq!(tasks[1].payload, json!(2));
        assert_eq!(tasks[1].metadata, Some(json!({"m": 1})));
    }

    #[test]
    fn parse_tasks_plain_object_element_is_wrapped() {
        let tasks = parse_tasks(r#"[{"city":"Oslo"}]"#).unwrap();
        assert_eq!(tasks[0].task_id, "task-1");
        assert_eq!(tasks[0].payload, json!({"city": "Oslo"}));
    }

    #[test]
    fn parse_tasks_object_form_keys_become_ids() {
        let tasks = parse_tasks(r#"{"x":1,"metadata":{"skip":true},"y":2,"config":{}}"#).unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].task_id, "x");
        assert_eq!(tasks[1].task_id, "y");
    }

    #[test]
    fn parse_tasks_nested_tasks_key_recurses() {
        let tasks = parse_tasks(r#"{"tasks":[5,6]}"#).unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[1].payload, json!(6));
    }

    #[test]
    fn parse_tasks_base64_payload() {
        let encoded = base64::engine::general_purpose::STANDARD.encode("[7,8]");
        let tasks = parse_tasks(&encoded).unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].payload, json!(7));
    }

    #[test]
    fn parse_tasks_rejects_empty() {
        assert!(parse_tasks("[]").is_err());
        assert!(parse_tasks("17").is_err());
        assert!(parse_tasks("just words").is_err());
    }

    #[test]
    fn result_entry_shape() {
        let mut task = TaskState::new("t1".into(), json!(1), None);
        task.attempts = 2;
        task.assigned_to = Some("w".into());
        task.assigned_at = Some(100);
        task.completed_at = Some(150);
        task.result = Some(json!(9));
        let entry = task.result_entry();
        assert_eq!(entry["taskId"], "t1");
        assert_eq!(entry["assignedTo"], "w");
        assert_eq!(entry["attempts"], 2);
        assert_eq!(entry["durationMs"], 50);
        assert_eq!(entry["result"], 9);
        assert!(entry.get("error").is_none());
    }
}
