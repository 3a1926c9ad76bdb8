//! Detection of runaway tool-calling: repeated identical calls, A/B
//! ping-pong patterns, and a global circuit breaker on total call count.
//!
//! Detection is deterministic: arguments are canonicalized (object keys
//! sorted recursively, compact separators) so identical payloads always
//! produce byte-identical records.

use std::collections::HashMap;

use serde_json::Value;

/// Thresholds for one detector instance.
#[derive(Debug, Clone)]
pub struct LoopThresholds {
    /// Identical-call count that logs a warning.
    pub warning: u32,
    /// Identical-call count that terminates the turn.
    pub critical: u32,
    /// Total recorded calls that trip the breaker.
    pub circuit_breaker: u32,
}

impl Default for LoopThresholds {
    fn default() -> Self {
        Self {
            warning: 3,
            critical: 5,
            circuit_breaker: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopSeverity {
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopKind {
    /// The same (tool, arguments) pair keeps recurring.
    Repetition { tool: String, count: u32 },
    /// The last four calls alternate between two tools (ABAB).
    PingPong { first: String, second: String },
    /// Too many tool calls in one turn overall.
    CircuitBreaker { total: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopSignal {
    pub kind: LoopKind,
    pub severity: LoopSeverity,
    pub detail: String,
}

/// Per-turn tool-call tracker.
pub struct LoopDetector {
    thresholds: LoopThresholds,
    /// (tool, canonical arguments) in call order.
    calls: Vec<(String, String)>,
    counts: HashMap<(String, String), u32>,
}

impl LoopDetector {
    pub fn new(thresholds: LoopThresholds) -> Self {
        Self {
            thresholds,
            calls: Vec::new(),
            counts: HashMap::new(),
        }
    }

    /// Record one tool call.
    pub fn record_call(&mut self, tool: &str, args: &Value) {
        let canon = canonicalize(args);
        let key = (tool.to_string(), canon.clone());
        *self.counts.entry(key).or_insert(0) += 1;
        self.calls.push((tool.to_string(), canon));
    }

    /// Evaluate the recorded history. Checks run in a fixed order:
    /// repetition, ping-pong, circuit breaker — the first hit wins.
    pub fn detect(&self) -> Option<LoopSignal> {
        // Scan in call order so ties resolve the same way every time.
        if let Some(((tool, _), count)) = self
            .calls
            .iter()
            .map(|key| (key, self.counts[key]))
            .filter(|(_, c)| *c >= self.thresholds.warning)
            .max_by_key(|(_, c)| *c)
        {
            let severity = if count >= self.thresholds.critical {
                LoopSeverity::Critical
            } else {
                LoopSeverity::Warning
            };
            return Some(LoopSignal {
                kind: LoopKind::Repetition {
                    tool: tool.clone(),
                    count,
                },
                severity,
                detail: format!("tool '{tool}' called {count} times with identical arguments"),
            });
        }

        if self.calls.len() >= 4 {
            let tail: Vec<&str> = self.calls[self.calls.len() - 4..]
                .iter()
                .map(|(name, _)| name.as_str())
                .collect();
            if tail[0] == tail[2] && tail[1] == tail[3] && tail[0] != tail[1] {
                return Some(LoopSignal {
                    kind: LoopKind::PingPong {
                        first: tail[0].to_string(),
                        second: tail[1].to_string(),
                    },
                    severity: LoopSeverity::Warning,
                    detail: format!("alternating calls between '{}' and '{}'", tail[0], tail[1]),
                });
            }
        }

        let total = self.calls.len() as u32;
        if total >= self.thresholds.circuit_breaker {
            return Some(LoopSignal {
                kind: LoopKind::CircuitBreaker { total },
                severity: LoopSeverity::Critical,
                detail: format!("{total} tool calls in one turn"),
            });
        }

        None
    }

    pub fn total_calls(&self) -> usize {
        self.calls.len()
    }
}

/// Compact JSON with recursively sorted object keys.
///
/// Identical payloads canonicalize to byte-identical strings regardless of
/// original key order.
pub fn canonicalize(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        leaf => out.push_str(&leaf.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn detector() -> LoopDetector {
        LoopDetector::new(LoopThresholds::default())
    }

    #[test]
    fn canonicalize_sorts_keys_recursively() {
        let a = json!({"b": 1, "a": {"z": true, "y": [3, 2]}});
        let b = json!({"a": {"y": [3, 2], "z": true}, "b": 1});
        assert_eq!(canonicalize(&a), canonicalize(&b));
        assert_eq!(canonicalize(&a), r#"{"a":{"y":[3,2],"z":true},"b":1}"#);
    }

    #[test]
    fn repetition_warning_then_critical() {
        let mut d = detector();
        let args = json!({"path": "/tmp/x"});
        d.record_call("read_file", &args);
        d.record_call("read_file", &args);
        assert!(d.detect().is_none());

        d.record_call("read_file", &args);
        let signal = d.detect().unwrap();
        assert_eq!(signal.severity, LoopSeverity::Warning);

        d.record_call("read_file", &args);
        d.record_call("read_file", &args);
        let signal = d.detect().unwrap();
        assert_eq!(signal.severity, LoopSeverity::Critical);
        assert!(matches!(signal.kind, LoopKind::Repetition { count: 5, .. }));
    }

    #[test]
    fn different_arguments_do_not_count_together() {
        let mut d = detector();
        for i in 0..10 {
            d.record_call("read_file", &json!({"path": format!("/tmp/{i}")}));
        }
        // No repetition; circuit breaker has not tripped either (10 < 30).
        assert!(d.detect().is_none());
    }

    #[test]
    fn key_order_does_not_defeat_repetition_detection() {
        let mut d = detector();
        for _ in 0..3 {
            d.record_call("f", &json!({"a": 1, "b": 2}));
        }
        d.record_call("f", &json!({"b": 2, "a": 1}));
        d.record_call("f", &json!({"b": 2, "a": 1}));
        let signal = d.detect().unwrap();
        assert_eq!(signal.severity, LoopSeverity::Critical);
    }

    #[test]
    fn ping_pong_is_a_warning() {
        let mut d = detector();
        d.record_call("a", &json!({"n": 1}));
        d.record_call("b", &json!({"n": 2}));
        d.record_call("a", &json!({"n": 3}));
        d.record_call("b", &json!({"n": 4}));
        let signal = d.detect().unwrap();
        assert_eq!(signal.severity, LoopSeverity::Warning);
        assert!(matches!(signal.kind, LoopKind::PingPong { .. }));
    }

    #[test]
    fn aabb_is_not_ping_pong() {
        let mut d = detector();
        d.record_call("a", &json!({"n": 1}));
        d.record_call("a", &json!({"n": 2}));
        d.record_call("b", &json!({"n": 3}));
        d.record_call("b", &json!({"n": 4}));
        assert!(d.detect().is_none());
    }

    #[test]
    fn circuit_breaker_trips_on_total() {
        let mut d = LoopDetector::new(LoopThresholds {
            warning: 100,
            critical: 200,
            circuit_breaker: 6,
        });
        for i in 0..6 {
            d.record_call(&format!("tool{i}"), &json!({}));
        }
        let signal = d.detect().unwrap();
        assert_eq!(signal.severity, LoopSeverity::Critical);
        assert!(matches!(signal.kind, LoopKind::CircuitBreaker { total: 6 }));
    }

    #[test]
    fn detection_is_deterministic() {
        let build = || {
            let mut d = detector();
            d.record_call("x", &json!({"k": [1, 2]}));
            d.record_call("y", &json!({}));
            d.record_call("x", &json!({"k": [1, 2]}));
            d.record_call("y", &json!({}));
            d
        };
        assert_eq!(build().detect(), build().detect());
    }
}
