use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Role of a single conversation turn in the chat protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    /// A serialized tool result fed back to the model.
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

/// A tool invocation requested by the model.
///
/// Arguments come straight from model output and are untrusted: keys may be
/// missing, numbers may arrive as strings, and the whole map may have been
/// emitted as a string-encoded JSON payload. Use [`ToolCall::from_raw_arguments`]
/// and the accessor helpers instead of indexing directly.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self { name: name.into(), arguments }
    }

    /// Build a call from a raw argument value as emitted by the model.
    ///
    /// Accepts an object directly, or a string-encoded object which is parsed
    /// leniently: a payload that fails to parse becomes an empty argument map,
    /// never a hard failure.
    pub fn from_raw_arguments(name: impl Into<String>, raw: Value) -> Self {
        let arguments = match raw {
            Value::Object(map) => map,
            Value::String(encoded) => match serde_json::from_str::<Value>(&encoded) {
                Ok(Value::Object(map)) => map,
                _ => Map::new(),
            },
            _ => Map::new(),
        };
        Self { name: name.into(), arguments }
    }

    /// String argument, trimmed; `None` when absent, non-string, or empty.
    pub fn arg_str(&self, key: &str) -> Option<String> {
        let value = self.arguments.get(key)?.as_str()?.trim();
        if value.is_empty() { None } else { Some(value.to_string()) }
    }

    /// Integer argument with a safe fallback.
    ///
    /// The model sometimes sends numbers as strings or sends zero where a
    /// positive count is expected; anything unparsable or below `min` falls
    /// back to `default`.
    pub fn arg_i64_or(&self, key: &str, default: i64, min: i64) -> i64 {
        let parsed = match self.arguments.get(key) {
            Some(Value::Number(n)) => n.as_i64(),
            Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
            _ => None,
        };
        match parsed {
            Some(value) if value >= min => value,
            _ => default,
        }
    }

    /// Required integer argument; `None` when missing or unparsable.
    pub fn arg_i64(&self, key: &str) -> Option<i64> {
        match self.arguments.get(key) {
            Some(Value::Number(n)) => n.as_i64(),
            Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
            _ => None,
        }
    }

    pub fn arg_bool(&self, key: &str) -> bool {
        match self.arguments.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
            _ => false,
        }
    }

    /// Date-range start, tolerating the key variants the model actually sends.
    pub fn arg_date_from(&self) -> Option<String> {
        ["date_from", "start_date", "from_date", "from"]
            .iter()
            .find_map(|key| self.arg_str(key))
    }

    /// Date-range end, tolerating the key variants the model actually sends.
    pub fn arg_date_to(&self) -> Option<String> {
        ["date_to", "end_date", "to_date", "to"].iter().find_map(|key| self.arg_str(key))
    }
}

/// One turn of the conversation window handed to the orchestrator.
///
/// Turns already sent to the model are treated as immutable: the orchestrator
/// only ever appends.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
}

impl ConversationTurn {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into(), tool_calls: Vec::new() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into(), tool_calls: Vec::new() }
    }

    pub fn assistant(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self { role: Role::Assistant, content: content.into(), tool_calls }
    }

    pub fn tool(content: impl Into<String>) -> Self {
        Self { role: Role::Tool, content: content.into(), tool_calls: Vec::new() }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::ToolCall;

    #[test]
    fn string_encoded_arguments_are_parsed() {
        let call = ToolCall::from_raw_arguments(
            "search_partners",
            Value::String(r#"{"search":"acme","limit":"5"}"#.to_string()),
        );
        assert_eq!(call.arg_str("search").as_deref(), Some("acme"));
        assert_eq!(call.arg_i64_or("limit", 20, 1), 5);
    }

    #[test]
    fn unparsable_argument_payload_becomes_empty_map() {
        let call =
            ToolCall::from_raw_arguments("search_partners", Value::String("not json".to_string()));
        assert!(call.arguments.is_empty());
    }

    #[test]
    fn numeric_coercion_falls_back_on_garbage() {
        let call = ToolCall::from_raw_arguments(
            "list_projects",
            json!({"limit": "many", "offset": 0}),
        );
        assert_eq!(call.arg_i64_or("limit", 20, 1), 20);
        assert_eq!(call.arg_i64_or("offset", 7, 1), 7);
    }

    #[test]
    fn date_keys_tolerate_model_variants() {
        let call = ToolCall::from_raw_arguments(
            "search_orders",
            json!({"start_date": "2026-01-01", "to": "2026-02-01"}),
        );
        assert_eq!(call.arg_date_from().as_deref(), Some("2026-01-01"));
        assert_eq!(call.arg_date_to().as_deref(), Some("2026-02-01"));
    }
}
