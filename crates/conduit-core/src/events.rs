use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Closed set of progress events a generation run can record.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Init,
    Text,
    ToolUse,
    EditResult,
    ReadResult,
    BashResult,
    ToolOutput,
    Result,
}

impl EventKind {
    pub const ALL: [EventKind; 8] = [
        Self::Init,
        Self::Text,
        Self::ToolUse,
        Self::EditResult,
        Self::ReadResult,
        Self::BashResult,
        Self::ToolOutput,
        Self::Result,
    ];

    /// Wire name, also used as the SSE event name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Text => "text",
            Self::ToolUse => "tool_use",
            Self::EditResult => "edit_result",
            Self::ReadResult => "read_result",
            Self::BashResult => "bash_result",
            Self::ToolOutput => "tool_output",
            Self::Result => "result",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == s)
    }
}

/// One entry of a response's event log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub data: Value,
    pub index: usize,
}

impl Event {
    pub fn new(kind: EventKind, data: Value, index: usize) -> Self {
        Self { kind, data, index }
    }

    /// Payload sent to stream observers: the data object plus `_idx`.
    /// Non-object data is wrapped under `value`.
    pub fn wire_payload(&self) -> Value {
        let mut map = match &self.data {
            Value::Object(m) => m.clone(),
            Value::Null => Map::new(),
            other => {
                let mut m = Map::new();
                m.insert("value".into(), other.clone());
                m
            }
        };
        map.insert("_idx".into(), Value::from(self.index));
        Value::Object(map)
    }
}

/// Lifecycle of a response. Transitions only move forward.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Pending,
    Running,
    Completed,
    Error,
}

impl ResponseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Running => 1,
            Self::Completed | Self::Error => 2,
        }
    }

    /// Whether moving from `self` to `next` keeps the lifecycle monotonic.
    /// Terminal states never change once reached.
    pub fn can_transition_to(&self, next: ResponseStatus) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_kind_wire_names() {
        for kind in EventKind::ALL {
            let json = serde_json::to_value(kind).unwrap();
            assert_eq!(json, Value::String(kind.as_str().into()));
            assert_eq!(EventKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(EventKind::parse("thinking"), None);
    }

    #[test]
    fn event_serializes_type_field() {
        let e = Event::new(EventKind::ToolUse, json!({"name": "Bash"}), 3);
        let v = serde_json::to_value(&e).unwrap();
        assert_eq!(v["type"], "tool_use");
        assert_eq!(v["index"], 3);
    }

    #[test]
    fn wire_payload_merges_index() {
        let e = Event::new(EventKind::Text, json!({"text": "hi"}), 7);
        assert_eq!(e.wire_payload(), json!({"text": "hi", "_idx": 7}));
    }

    #[test]
    fn wire_payload_wraps_scalars() {
        let e = Event::new(EventKind::Text, json!("hi"), 0);
        assert_eq!(e.wire_payload(), json!({"value": "hi", "_idx": 0}));
    }

    #[test]
    fn status_is_monotonic() {
        use ResponseStatus::*;
        assert!(Pending.can_transition_to(Running));
        assert!(Pending.can_transition_to(Completed));
        assert!(Running.can_transition_to(Error));
        assert!(!Running.can_transition_to(Pending));
        assert!(!Running.can_transition_to(Running));
        assert!(!Completed.can_transition_to(Error));
        assert!(!Error.can_transition_to(Completed));
    }
}
