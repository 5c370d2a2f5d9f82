use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Emitted by the gateway when an LLM request is sent.
///
/// Token counts here are estimates made before the provider answered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestEvent {
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub organization_id: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub character_count: i64,
    #[serde(default)]
    pub token_count: i64,
    /// `stream` or `non-stream`
    #[serde(default)]
    pub request_type: String,
    #[serde(default)]
    pub tool_count: i64,
    #[serde(default)]
    pub message_count: i64,
    #[serde(default)]
    pub temperature: f64,
    #[serde(default)]
    pub max_tokens: i64,
    #[serde(default)]
    pub top_p: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assistant_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

/// Emitted by the gateway when the provider's response completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEvent {
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub organization_id: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub response: String,
    #[serde(default)]
    pub character_count: i64,
    /// Estimated completion tokens.
    #[serde(default)]
    pub token_count: i64,
    #[serde(default)]
    pub finish_reason: String,
    /// Provider-reported counts, authoritative when present.
    #[serde(default)]
    pub usage: Option<TokenUsage>,
    #[serde(default)]
    pub response_time_ms: i64,
    #[serde(default)]
    pub has_tool_calls: bool,
    #[serde(default)]
    pub tool_call_count: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assistant_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    #[serde(default)]
    pub prompt_tokens: i64,
    #[serde(default)]
    pub completion_tokens: i64,
    #[serde(default)]
    pub total_tokens: i64,
}
