use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::action::PendingAction;

/// How many data rows survive truncation when a serialized result exceeds
/// the context ceiling.
pub const TRUNCATED_ROW_COUNT: usize = 10;

/// The only value that crosses from a tool execution back into the
/// conversation. Always serializable; failures are carried in `error`, never
/// raised.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub needs_confirmation: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_action: Option<PendingAction>,
}

impl ToolResult {
    pub fn ok(data: Value) -> Self {
        Self { success: true, data: Some(data), ..Self::default() }
    }

    pub fn rows(rows: Vec<Value>) -> Self {
        let count = rows.len();
        Self { success: true, data: Some(Value::Array(rows)), count: Some(count), ..Self::default() }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self { success: false, error: Some(error.into()), ..Self::default() }
    }

    pub fn staged(action: PendingAction) -> Self {
        Self {
            success: true,
            needs_confirmation: true,
            pending_action: Some(action),
            ..Self::default()
        }
    }

    /// Serialize for re-submission to the model, bounded by `ceiling` chars.
    ///
    /// An oversized `data` list is cut to [`TRUNCATED_ROW_COUNT`] entries with
    /// `_truncated = true` and `_total` preserving the original count, so the
    /// model knows it is looking at a sample. Non-list data that is still too
    /// large after that falls back to a summary stub rather than blowing the
    /// context window.
    pub fn serialize_bounded(&self, ceiling: usize) -> String {
        let full = serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"success":false,"error":"unserializable tool result"}"#.to_string()
        });
        if full.len() <= ceiling {
            return full;
        }

        let mut value = serde_json::to_value(self).unwrap_or(Value::Null);
        let total = self
            .count
            .or_else(|| self.data.as_ref().and_then(Value::as_array).map(Vec::len))
            .unwrap_or(0);
        if let Some(object) = value.as_object_mut() {
            if let Some(Value::Array(rows)) = object.get_mut("data") {
                rows.truncate(TRUNCATED_ROW_COUNT);
            }
            object.insert("_truncated".to_string(), Value::Bool(true));
            object.insert("_total".to_string(), Value::from(total));
        }

        let truncated = serde_json::to_string(&value)
            .unwrap_or_else(|_| r#"{"success":false,"error":"unserializable tool result"}"#.into());
        if truncated.len() <= ceiling {
            return truncated;
        }

        serde_json::json!({
            "success": self.success,
            "error": self.error,
            "_truncated": true,
            "_total": total,
            "note": "result too large for context; refine the query",
        })
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::{ToolResult, TRUNCATED_ROW_COUNT};

    #[test]
    fn small_result_serializes_untouched() {
        let result = ToolResult::rows(vec![json!({"id": 1})]);
        let serialized = result.serialize_bounded(4000);
        assert!(!serialized.contains("_truncated"));
        assert!(serialized.contains("\"count\":1"));
    }

    #[test]
    fn oversized_list_truncates_to_ten_and_preserves_total() {
        let rows: Vec<Value> =
            (0..1000).map(|i| json!({"id": i, "name": format!("partner-{i}")})).collect();
        let result = ToolResult::rows(rows);

        let serialized = result.serialize_bounded(4000);
        assert!(serialized.len() <= 4000);

        let parsed: Value = serde_json::from_str(&serialized).unwrap();
        assert_eq!(parsed["_truncated"], json!(true));
        assert_eq!(parsed["_total"], json!(1000));
        assert_eq!(parsed["data"].as_array().unwrap().len(), TRUNCATED_ROW_COUNT);
    }

    #[test]
    fn failure_round_trips() {
        let result = ToolResult::failure("unknown tool: frobnicate");
        let parsed: ToolResult =
            serde_json::from_str(&result.serialize_bounded(4000)).unwrap();
        assert!(!parsed.success);
        assert_eq!(parsed.error.as_deref(), Some("unknown tool: frobnicate"));
    }
}
