//! Classifier for the agent's line-delimited JSON output.
//!
//! [`StreamParser`] is fed one stdout line at a time and returns the
//! canonical events the line produced. It holds the FIFO of tool calls
//! still awaiting a result, the running response text, and the usage block
//! of the most recent assistant message.

use std::collections::VecDeque;

use serde_json::{json, Map, Value};
use tracing::debug;

use conduit_core::EventKind;

/// Context window assumed when the result carries no model usage.
pub const DEFAULT_CONTEXT_WINDOW: f64 = 200_000.0;

/// Characters of file content kept in a `read_result` event.
pub const READ_PREVIEW_CHARS: usize = 500;

/// Something a single stdout line produced.
#[derive(Clone, Debug, PartialEq)]
pub enum ParsedItem {
    Event { kind: EventKind, data: Value },
    /// The agent's final `result` line. Not logged verbatim; the
    /// orchestrator re-expresses it as the canonical `result` event.
    Finished { text: String, usage_percent: f64 },
}

#[derive(Clone, Debug, Default, PartialEq)]
struct PendingTool {
    id: String,
    name: String,
    input: Value,
}

#[derive(Debug, Default)]
pub struct StreamParser {
    pending: VecDeque<PendingTool>,
    full_response: String,
    last_assistant_usage: Option<Value>,
}

impl StreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest complete response text seen so far.
    pub fn full_response(&self) -> &str {
        &self.full_response
    }

    pub fn pending_tool_calls(&self) -> usize {
        self.pending.len()
    }

    /// Classify one line. Blank and malformed lines produce nothing.
    pub fn feed(&mut self, line: &str) -> Vec<ParsedItem> {
        let line = line.trim();
        if line.is_empty() {
            return Vec::new();
        }
        let msg: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                debug!(error = %e, "skipping malformed agent line");
                return Vec::new();
            }
        };

        match msg.get("type").and_then(Value::as_str).unwrap_or_default() {
            "system" => vec![ParsedItem::Event {
                kind: EventKind::Init,
                data: json!({ "sessionId": str_field(&msg, "session_id") }),
            }],
            "assistant" => self.on_assistant(&msg),
            "user" => self.on_user(&msg),
            "result" => vec![self.on_result(&msg)],
            _ => Vec::new(),
        }
    }

    fn on_assistant(&mut self, msg: &Value) -> Vec<ParsedItem> {
        let Some(message) = msg.get("message") else {
            return Vec::new();
        };
        if let Some(usage) = message.get("usage").filter(|u| is_truthy(u)) {
            self.last_assistant_usage = Some(usage.clone());
        }

        let mut out = Vec::new();
        let items = message.get("content").and_then(Value::as_array);
        for item in items.into_iter().flatten() {
            match item.get("type").and_then(Value::as_str) {
                Some("text") => {
                    let text = str_field(item, "text");
                    if text.is_empty() {
                        continue;
                    }
                    self.full_response = text.to_string();
                    out.push(ParsedItem::Event {
                        kind: EventKind::Text,
                        data: json!({ "text": text }),
                    });
                }
                Some("tool_use") => {
                    let tool = PendingTool {
                        id: str_field(item, "id").to_string(),
                        name: str_field(item, "name").to_string(),
                        input: item.get("input").cloned().unwrap_or_else(|| json!({})),
                    };
                    out.push(ParsedItem::Event {
                        kind: EventKind::ToolUse,
                        data: json!({
                            "toolCallId": tool.id,
                            "name": tool.name,
                            "input": tool.input,
                        }),
                    });
                    self.pending.push_back(tool);
                }
                _ => {}
            }
        }
        out
    }

    fn on_user(&mut self, msg: &Value) -> Vec<ParsedItem> {
        let Some(result) = msg.get("tool_use_result").filter(|r| is_truthy(r)) else {
            return Vec::new();
        };
        let tool = self.pending.pop_front().unwrap_or_default();
        classify_tool_result(result, &tool.id, &tool.name, &tool.input)
            .map(|(kind, data)| vec![ParsedItem::Event { kind, data }])
            .unwrap_or_default()
    }

    fn on_result(&mut self, msg: &Value) -> ParsedItem {
        let text = str_field(msg, "result");
        if !text.is_empty() {
            self.full_response = text.to_string();
        }
        ParsedItem::Finished {
            text: self.full_response.clone(),
            usage_percent: context_usage_percent(msg, self.last_assistant_usage.as_ref()),
        }
    }
}

/// Map a tool result payload to exactly one event, or none when the shape
/// is not recognised.
pub fn classify_tool_result(
    result: &Value,
    tool_call_id: &str,
    tool_name: &str,
    tool_input: &Value,
) -> Option<(EventKind, Value)> {
    let obj = match result {
        Value::String(s) => {
            return Some((
                EventKind::ToolOutput,
                json!({ "toolCallId": tool_call_id, "output": s }),
            ))
        }
        Value::Object(obj) => obj,
        _ => return None,
    };

    if let Some(patch) = obj.get("structuredPatch") {
        if tool_name == "Write" {
            return Some((
                EventKind::ToolOutput,
                json!({ "toolCallId": tool_call_id, "output": "File created" }),
            ));
        }
        return Some((
            EventKind::EditResult,
            json!({
                "toolCallId": tool_call_id,
                "filePath": obj_str(obj, "filePath"),
                "patch": patch,
            }),
        ));
    }

    if let Some(file) = obj.get("file") {
        let content: String = str_field(file, "content").chars().take(READ_PREVIEW_CHARS).collect();
        return Some((
            EventKind::ReadResult,
            json!({
                "toolCallId": tool_call_id,
                "filePath": str_field(file, "filePath"),
                "content": content,
            }),
        ));
    }

    if obj.contains_key("stdout") || obj.contains_key("stderr") {
        let command = if tool_name == "Bash" {
            str_field(tool_input, "command")
        } else {
            ""
        };
        return Some((
            EventKind::BashResult,
            json!({
                "toolCallId": tool_call_id,
                "command": command,
                "stdout": obj_str(obj, "stdout"),
                "stderr": obj_str(obj, "stderr"),
                "exitCode": obj.get("exitCode").cloned().unwrap_or(json!(0)),
            }),
        ));
    }

    Some((
        EventKind::ToolOutput,
        json!({ "toolCallId": tool_call_id, "output": generic_output(obj) }),
    ))
}

/// `content` or `result`, unwrapping one level of JSON-encoded object.
fn generic_output(obj: &Map<String, Value>) -> String {
    let raw = [obj.get("content"), obj.get("result")]
        .into_iter()
        .flatten()
        .find(|v| is_truthy(v))
        .cloned()
        .unwrap_or_else(|| Value::String(String::new()));

    match raw {
        Value::String(s) => match serde_json::from_str::<Value>(&s) {
            Ok(Value::Object(inner)) => [inner.get("result"), inner.get("content")]
                .into_iter()
                .flatten()
                .find(|v| is_truthy(v))
                .map(value_to_text)
                .unwrap_or(s),
            _ => s,
        },
        other => value_to_text(&other),
    }
}

/// Context usage as a percentage of the model's window, one decimal place.
///
/// Prefers the last assistant turn's input + cache tokens; cumulative
/// `modelUsage` totals overcount once tools run, so they are only used when
/// no assistant usage was seen.
pub fn context_usage_percent(result: &Value, last_assistant_usage: Option<&Value>) -> f64 {
    let first_model = result
        .get("modelUsage")
        .and_then(Value::as_object)
        .and_then(|m| m.values().next());

    let window = first_model
        .and_then(|m| m.get("contextWindow"))
        .and_then(Value::as_f64)
        .filter(|w| *w > 0.0)
        .unwrap_or(DEFAULT_CONTEXT_WINDOW);

    let used = if let Some(usage) = last_assistant_usage {
        ["input_tokens", "cache_read_input_tokens", "cache_creation_input_tokens"]
            .iter()
            .map(|k| num_field(usage, k))
            .sum::<f64>()
    } else if let Some(model) = first_model {
        [
            "inputTokens",
            "outputTokens",
            "cacheReadInputTokens",
            "cacheCreationInputTokens",
        ]
        .iter()
        .map(|k| num_field(model, k))
        .sum::<f64>()
    } else {
        return 0.0;
    };

    (used / window * 1000.0).round() / 10.0
}

fn str_field<'a>(v: &'a Value, key: &str) -> &'a str {
    v.get(key).and_then(Value::as_str).unwrap_or_default()
}

fn obj_str<'a>(obj: &'a Map<String, Value>, key: &str) -> &'a str {
    obj.get(key).and_then(Value::as_str).unwrap_or_default()
}

fn num_field(v: &Value, key: &str) -> f64 {
    v.get(key).and_then(Value::as_f64).unwrap_or(0.0)
}

fn value_to_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Empty strings, arrays, objects, zero, false and null count as absent.
fn is_truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}
