//! Structured call tracing with redaction.
//!
//! A trace covers one agent turn; spans cover individual async operations
//! inside it (LLM calls, tool executions, memory lookups). The active trace
//! is a task-local value, so concurrent turns never share state. Trace
//! production writes to the `axon_trace` log target only — it is not in the
//! data path and never mutates domain state.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

/// Sensitive key fragments; any matching field is replaced wholesale.
const SENSITIVE_KEYS: [&str; 5] = ["password", "token", "secret", "apikey", "authorization"];
/// Arrays longer than this are truncated in trace output.
const MAX_ARRAY_ELEMENTS: usize = 100;
/// Redaction recursion stops at this depth.
const MAX_DEPTH: usize = 5;
/// Strings longer than this are clipped in trace output.
const MAX_STRING_CHARS: usize = 2000;

tokio::task_local! {
    static TRACE: TraceScope;
}

#[derive(Clone)]
struct TraceScope {
    trace_id: Arc<str>,
    depth: usize,
}

/// Run a future inside a fresh trace scope.
///
/// Every `trace_async` call inside `fut` shares the same trace id; nested
/// calls record increasing depth.
pub async fn with_trace<F: Future>(fut: F) -> F::Output {
    let scope = TraceScope {
        trace_id: short_id().into(),
        depth: 0,
    };
    TRACE.scope(scope, fut).await
}

/// Trace id of the active scope, if any.
pub fn current_trace_id() -> Option<String> {
    TRACE.try_with(|t| t.trace_id.to_string()).ok()
}

/// Wrap an async operation with span recording.
///
/// Records start/end, duration, success or failure, and redacted input and
/// output. Works outside a trace scope too (each call becomes its own
/// single-span trace).
pub async fn trace_async<T, E, F>(
    file: &str,
    method: &str,
    input: &Value,
    fut: F,
) -> Result<T, E>
where
    T: Serialize,
    E: std::fmt::Display,
    F: Future<Output = Result<T, E>>,
{
    let (trace_id, depth) = TRACE
        .try_with(|t| (t.trace_id.clone(), t.depth))
        .unwrap_or_else(|_| (Arc::from(short_id()), 0));
    let span_id = short_id();
    let start = Instant::now();

    tracing::debug!(
        target: "axon_trace",
        trace = %trace_id,
        span = %span_id,
        depth,
        file,
        method,
        input = %redact_value(input),
        "span start"
    );

    let nested = TraceScope {
        trace_id: trace_id.clone(),
        depth: depth + 1,
    };
    let result = TRACE.scope(nested, fut).await;

    let duration_ms = start.elapsed().as_millis() as u64;
    match &result {
        Ok(out) => {
            let rendered = serde_json::to_value(out)
                .map(|v| redact_value(&v))
                .unwrap_or(Value::Null);
            tracing::debug!(
                target: "axon_trace",
                trace = %trace_id,
                span = %span_id,
                depth,
                file,
                method,
                duration_ms,
                success = true,
                output = %rendered,
                "span end"
            );
        }
        Err(e) => {
            tracing::debug!(
                target: "axon_trace",
                trace = %trace_id,
                span = %span_id,
                depth,
                file,
                method,
                duration_ms,
                success = false,
                error = %e,
                "span end"
            );
        }
    }

    result
}

/// Redact a JSON value for trace output.
///
/// Sensitive keys become `***REDACTED***`; long numeric arrays collapse to
/// `[buffer]`; other arrays are truncated at [`MAX_ARRAY_ELEMENTS`]; strings
/// are clipped; recursion stops at [`MAX_DEPTH`].
pub fn redact_value(value: &Value) -> Value {
    redact_at(value, 0)
}

fn redact_at(value: &Value, depth: usize) -> Value {
    if depth >= MAX_DEPTH {
        return Value::String("[depth limit]".into());
    }
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                if is_sensitive(k) {
                    out.insert(k.clone(), Value::String("***REDACTED***".into()));
                } else {
                    out.insert(k.clone(), redact_at(v, depth + 1));
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => {
            if items.len() > MAX_ARRAY_ELEMENTS && items.iter().all(Value::is_number) {
                return Value::String("[buffer]".into());
            }
            let mut out: Vec<Value> = items
                .iter()
                .take(MAX_ARRAY_ELEMENTS)
                .map(|v| redact_at(v, depth + 1))
                .collect();
            if items.len() > MAX_ARRAY_ELEMENTS {
                out.push(Value::String(format!(
                    "…+{} more",
                    items.len() - MAX_ARRAY_ELEMENTS
                )));
            }
            Value::Array(out)
        }
        Value::String(s) if s.chars().count() > MAX_STRING_CHARS => {
            let clipped: String = s.chars().take(MAX_STRING_CHARS).collect();
            Value::String(format!("{clipped}…"))
        }
        other => other.clone(),
    }
}

fn is_sensitive(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    SENSITIVE_KEYS.iter().any(|s| lower.contains(s))
}

fn short_id() -> String {
    Uuid::new_v4().simple().to_string()[..12].to_string()
}
