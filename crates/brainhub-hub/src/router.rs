//! Command router.
//!
//! Worker-initiated traffic is textual: a verb plus whitespace-tokenized
//! arguments. Every command resolves to a JSON response carrying at least
//! `command`; malformed input answers `{error, example?}` and an unknown
//! verb answers `{error, available}`. Nothing in here raises to the caller.

use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use serde_json::{Value, json};

use brainhub_core::Envelope;
use brainhub_storage::content_type_for;

use crate::benchmark::BenchmarkArgs;
use crate::hub::Hub;
use crate::mapreduce::{DEFAULT_MAPREDUCE_TIMEOUT_MS, Reducer};
use crate::payload::{decode_base64_bytes, decode_payload};

/// Verb table, dispatch order. The usage strings double as the `help`
/// output and the `example` field of malformed-argument errors.
const COMMANDS: &[(&str, &str)] = &[
    ("help", "help"),
    ("storage", "storage"),
    ("put", "put <key> <value> [ttlSeconds]"),
    ("get", "get <key>"),
    ("delete", "delete <key>"),
    ("keys", "keys"),
    ("expire", "expire <key> <seconds>"),
    ("ttl", "ttl <key>"),
    ("peers", "peers"),
    ("whoami", "whoami"),
    (
        "benchmark",
        "benchmark [iterations] [timeout=ms] | benchmark report <requestId> <durationMs> [details]",
    ),
    ("broadcast", "broadcast <message...>"),
    (
        "audio",
        "audio list | audio get <filename> | audio upload <filename> <base64>",
    ),
    (
        "mapreduce",
        "mapreduce start tasks=<payload> [reducer=<name>] [timeout=<ms>] | \
         mapreduce report <requestId> <taskId> [<result>|result=<v>] [error=<m>] [metadata=<json>] | \
         mapreduce status <requestId> | mapreduce cancel <requestId>",
    ),
];

/// Supported verb names, dispatch order. Embedded in `client-list`.
pub(crate) fn command_names() -> Vec<String> {
    COMMANDS.iter().map(|(name, _)| (*name).to_string()).collect()
}

fn usage(verb: &str) -> &'static str {
    COMMANDS
        .iter()
        .find(|(name, _)| *name == verb)
        .map_or("help", |(_, usage)| usage)
}

fn bad_args(command: &str, error: impl Into<String>) -> Value {
    json!({
        "command": command,
        "error": error.into(),
        "example": usage(command.split_whitespace().next().unwrap_or(command)),
    })
}

/// Tail of the command line after the verb, original spacing preserved.
fn tail_after_verb(line: &str) -> Option<&str> {
    line.trim()
        .split_once(char::is_whitespace)
        .map(|(_, tail)| tail.trim_start())
        .filter(|tail| !tail.is_empty())
}

impl Hub {
    /// Route one textual command to a structured JSON response.
    pub async fn handle_command(self: &Arc<Self>, line: &str, caller: Option<&str>) -> Value {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some(verb) = tokens.first() else {
            return json!({"error": "Empty command", "available": command_names()});
        };
        let verb = verb.to_ascii_lowercase();
        let args = &tokens[1..];
        let caller_id = caller.unwrap_or("anonymous");

        match verb.as_str() {
            "help" => cmd_help(),
            "storage" => self.cmd_storage().await,
            "put" => self.cmd_put(args).await,
            "get" => self.cmd_get(args).await,
            "delete" => self.cmd_delete(args).await,
            "keys" => self.cmd_keys().await,
            "expire" => self.cmd_expire(args).await,
            "ttl" => self.cmd_ttl(args).await,
            "peers" => self.cmd_peers(caller_id).await,
            "whoami" => self.cmd_whoami(caller_id).await,
            "benchmark" => self.cmd_benchmark(args, caller_id).await,
            "broadcast" => self.cmd_broadcast(tail_after_verb(line), caller_id).await,
            "audio" => self.cmd_audio(args).await,
            "mapreduce" => self.cmd_mapreduce(args, caller_id).await,
            other => json!({
                "error": format!("Unknown command: {other}"),
                "available": command_names(),
            }),
        }
    }

    async fn cmd_storage(self: &Arc<Self>) -> Value {
        match self.kv.list().await {
            Ok(listing) => json!({
                "command": "storage",
                "keys": listing.keys,
                "count": listing.count,
                "size": listing.size,
                "alarmAt": self.kv.alarm_deadline().await,
            }),
            Err(e) => json!({"command": "storage", "error": e.to_string()}),
        }
    }

    async fn cmd_put(self: &Arc<Self>, args: &[&str]) -> Value {
        let (Some(key), Some(raw)) = (args.first(), args.get(1)) else {
            return bad_args("put", "Usage: put <key> <value> [ttlSeconds]");
        };
        let ttl = match args.get(2) {
            None => None,
            Some(token) => match token.parse::<u64>() {
                Ok(secs) => Some(secs),
                Err(_) => return bad_args("put", format!("Invalid ttl: {token}")),
            },
        };
        // A value token that parses as JSON is stored as-is; anything else
        // is stored as a string.
        let value: Value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String((*raw).to_string()));
        match self.kv.put(key, value, ttl).await {
            Ok(()) => json!({
                "command": "put",
                "key": key,
                "stored": true,
                "ttlSeconds": ttl,
            }),
            Err(e) => json!({"command": "put", "key": key, "error": e.to_string()}),
        }
    }

    async fn cmd_get(self: &Arc<Self>, args: &[&str]) -> Value {
        let Some(key) = args.first() else {
            return bad_args("get", "Usage: get <key>");
        };
        match self.kv.get(key).await {
            Ok(outcome) => json!({
                "command": "get",
                "key": key,
                "value": outcome.value,
                "expired": outcome.expired,
            }),
            Err(e) => json!({"command": "get", "key": key, "error": e.to_string()}),
        }
    }

    async fn cmd_delete(self: &Arc<Self>, args: &[&str]) -> Value {
        let Some(key) = args.first() else {
            return bad_args("delete", "Usage: delete <key>");
        };
        match self.kv.delete(key).await {
            Ok(deleted) => json!({"command": "delete", "key": key, "deleted": deleted}),
            Err(e) => json!({"command": "delete", "key": key, "error": e.to_string()}),
        }
    }

    async fn cmd_keys(self: &Arc<Self>) -> Value {
        match self.kv.list().await {
            Ok(listing) => json!({
                "command": "keys",
                "keys": listing.keys,
                "count": listing.count,
                "size": listing.size,
            }),
            Err(e) => json!({"command": "keys", "error": e.to_string()}),
        }
    }

    async fn cmd_expire(self: &Arc<Self>, args: &[&str]) -> Value {
        let (Some(key), Some(raw)) = (args.first(), args.get(1)) else {
            return bad_args("expire", "Usage: expire <key> <seconds>");
        };
        let seconds = match raw.parse::<u64>() {
            Ok(secs) if secs > 0 => secs,
            _ => return bad_args("expire", format!("Seconds must be a positive integer, got: {raw}")),
        };
        match self.kv.expire(key, seconds).await {
            Ok(true) => json!({"command": "expire", "key": key, "ok": true, "ttlSeconds": seconds}),
            Ok(false) => json!({"command": "expire", "key": key, "error": "not found"}),
            Err(e) => json!({"command": "expire", "key": key, "error": e.to_string()}),
        }
    }

    async fn cmd_ttl(self: &Arc<Self>, args: &[&str]) -> Value {
        let Some(key) = args.first() else {
            return bad_args("ttl", "Usage: ttl <key>");
        };
        match self.kv.ttl(key).await {
            Ok(ttl) => json!({"command": "ttl", "key": key, "ttl": ttl}),
            Err(e) => json!({"command": "ttl", "key": key, "error": e.to_string()}),
        }
    }

    async fn cmd_peers(self: &Arc<Self>, caller_id: &str) -> Value {
        let peers: Vec<Value> = self
            .registry
            .snapshot()
            .await
            .iter()
            .map(|entry| {
                json!({
                    "id": &entry.descriptor.id,
                    "joinedAt": &entry.descriptor.joined_at,
                    "vector": &entry.descriptor.vector,
                    "isMe": entry.descriptor.id == caller_id,
                })
            })
            .collect();
        json!({"command": "peers", "count": peers.len(), "peers": peers})
    }

    async fn cmd_whoami(self: &Arc<Self>, caller_id: &str) -> Value {
        let client = self
            .registry
            .snapshot()
            .await
            .iter()
            .find(|entry| entry.descriptor.id == caller_id)
            .map(|entry| serde_json::to_value(&entry.descriptor).unwrap_or(Value::Null));
        let kv_keys = self.kv.list().await.map(|listing| listing.size).unwrap_or(0);
        json!({
            "command": "whoami",
            "client": client,
            "serverTime": chrono::Utc::now().to_rfc3339(),
            "totalPeers": self.registry.len().await,
            "kvKeys": kv_keys,
            "backend": "memory",
        })
    }

    async fn cmd_benchmark(self: &Arc<Self>, args: &[&str], caller_id: &str) -> Value {
        if args.first().is_some_and(|sub| sub.eq_ignore_ascii_case("report")) {
            let (Some(request_id), Some(raw)) = (args.get(1), args.get(2)) else {
                return bad_args(
                    "benchmark report",
                    "Usage: benchmark report <requestId> <durationMs> [details]",
                );
            };
            let duration_ms = match raw.parse::<f64>() {
                Ok(ms) if ms.is_finite() && ms >= 0.0 => ms,
                _ => return bad_args("benchmark report", format!("Invalid durationMs: {raw}")),
            };
            let details = (args.len() > 3).then(|| args[3..].join(" "));
            return self
                .report_benchmark(request_id, caller_id, duration_ms, details)
                .await;
        }
        match BenchmarkArgs::parse(args) {
            Ok(parsed) => self.start_benchmark(caller_id, parsed).await,
            Err(error) => bad_args("benchmark", error),
        }
    }

    async fn cmd_broadcast(self: &Arc<Self>, tail: Option<&str>, caller_id: &str) -> Value {
        let Some(message) = tail else {
            return bad_args("broadcast", "Nothing to broadcast");
        };
        let envelope = Envelope::UserMessage {
            from: caller_id.to_string(),
            message: message.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };
        let recipients = self.broadcast(&envelope.to_value()).await;
        json!({
            "command": "broadcast",
            "recipients": recipients,
            "message": message,
        })
    }

    async fn cmd_audio(self: &Arc<Self>, args: &[&str]) -> Value {
        match args.first().map(|sub| sub.to_ascii_lowercase()).as_deref() {
            Some("list") => match self.objects.list().await {
                Ok(files) => json!({
                    "command": "audio list",
                    "count": files.len(),
                    "files": files,
                }),
                Err(e) => json!({"command": "audio list", "error": e.to_string()}),
            },
            Some("get") => {
                let Some(name) = args.get(1) else {
                    return bad_args("audio get", "Usage: audio get <filename>");
                };
                match self.objects.get(name).await {
                    Ok(Some(object)) => json!({
                        "command": "audio get",
                        "name": name,
                        "size": object.size,
                        "contentType": object.content_type,
                        "body": BASE64_STANDARD.encode(&object.body),
                    }),
                    Ok(None) => json!({"command": "audio get", "name": name, "error": "not found"}),
                    Err(e) => json!({"command": "audio get", "name": name, "error": e.to_string()}),
                }
            },
            Some("upload") => {
                let (Some(name), Some(encoded)) = (args.get(1), args.get(2)) else {
                    return bad_args("audio upload", "Usage: audio upload <filename> <base64>");
                };
                let Some(bytes) = decode_base64_bytes(encoded) else {
                    return bad_args("audio upload", "Body is not valid base64");
                };
                let content_type = content_type_for(name);
                let size = bytes.len();
                match self.objects.put(name, bytes, content_type).await {
                    Ok(()) => json!({
                        "command": "audio upload",
                        "name": name,
                        "size": size,
                        "contentType": content_type,
                    }),
                    Err(e) => json!({"command": "audio upload", "name": name, "error": e.to_string()}),
                }
            },
            Some(other) => bad_args("audio", format!("Unknown audio subcommand: {other}")),
            None => bad_args("audio", "Missing audio subcommand"),
        }
    }

    async fn cmd_mapreduce(self: &Arc<Self>, args: &[&str], caller_id: &str) -> Value {
        match args.first().map(|sub| sub.to_ascii_lowercase()).as_deref() {
            Some("start" | "run") => {
                let mut tasks: Option<&str> = None;
                let mut reducer = Reducer::Collect;
                let mut timeout_ms = DEFAULT_MAPREDUCE_TIMEOUT_MS;
                for token in &args[1..] {
                    if let Some(value) = token.strip_prefix("tasks=") {
                        tasks = Some(value);
                    } else if let Some(value) = token.strip_prefix("reducer=") {
                        match Reducer::parse(value) {
                            Some(parsed) => reducer = parsed,
                            None => {
                                return bad_args(
                                    "mapreduce",
                                    format!(
                                        "Unknown reducer: {value} (expected collect, sum, average, concat, count or merge)"
                                    ),
                                );
                            },
                        }
                    } else if let Some(value) = token.strip_prefix("timeout=") {
                        match value.parse::<u64>() {
                            Ok(ms) => timeout_ms = ms,
                            Err(_) => return bad_args("mapreduce", format!("Invalid timeout: {value}")),
                        }
                    } else {
                        return bad_args("mapreduce", format!("Unknown option: {token}"));
                    }
                }
                let Some(tasks) = tasks else {
                    return bad_args("mapreduce", "Missing tasks=<payload>");
                };
                self.start_mapreduce(caller_id, tasks, reducer, timeout_ms).await
            },
            Some("report") => {
                let (Some(request_id), Some(task_id)) = (args.get(1), args.get(2)) else {
                    return bad_args(
                        "mapreduce report",
                        "Usage: mapreduce report <requestId> <taskId> [<result>|result=<v>] [error=<m>] [metadata=<json>]",
                    );
                };
                let mut result: Option<Value> = None;
                let mut error: Option<String> = None;
                let mut metadata: Option<Value> = None;
                for token in &args[3..] {
                    if let Some(value) = token.strip_prefix("result=") {
                        result = Some(decode_payload(value));
                    } else if let Some(value) = token.strip_prefix("error=") {
                        error = Some(value.to_string());
                    } else if let Some(value) = token.strip_prefix("metadata=") {
                        match serde_json::from_str(value) {
                            Ok(parsed) => metadata = Some(parsed),
                            Err(_) => {
                                return bad_args("mapreduce report", format!("Invalid metadata JSON: {value}"));
                            },
                        }
                    } else if result.is_none() && error.is_none() {
                        result = Some(decode_payload(token));
                    }
                }
                self.report_mapreduce(request_id, task_id, result, error, metadata, caller_id)
                    .await
            },
            Some("status") => match args.get(1) {
                Some(request_id) => self.mapreduce_status(request_id).await,
                None => bad_args("mapreduce status", "Usage: mapreduce status <requestId>"),
            },
            Some("cancel") => match args.get(1) {
                Some(request_id) => self.cancel_mapreduce(request_id).await,
                None => bad_args("mapreduce cancel", "Usage: mapreduce cancel <requestId>"),
            },
            Some(other) => bad_args("mapreduce", format!("Unknown mapreduce subcommand: {other}")),
            None => bad_args("mapreduce", "Missing mapreduce subcommand"),
        }
    }
}

fn cmd_help() -> Value {
    let commands: Vec<Value> = COMMANDS
        .iter()
        .map(|(name, usage)| json!({"name": name, "usage": usage}))
        .collect();
    json!({"command": "help", "commands": commands})
}
