use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How much of a request/response pair was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UsageStatus {
    #[serde(rename = "complete")]
    Complete,
    #[serde(rename = "request-only")]
    RequestOnly,
    #[serde(rename = "response-only")]
    ResponseOnly,
    #[serde(rename = "error")]
    Error,
}

impl UsageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UsageStatus::Complete => "complete",
            UsageStatus::RequestOnly => "request-only",
            UsageStatus::ResponseOnly => "response-only",
            UsageStatus::Error => "error",
        }
    }
}

impl fmt::Display for UsageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UsageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "complete" => Ok(UsageStatus::Complete),
            "request-only" => Ok(UsageStatus::RequestOnly),
            "response-only" => Ok(UsageStatus::ResponseOnly),
            "error" => Ok(UsageStatus::Error),
            other => Err(format!("unknown usage status: {other}")),
        }
    }
}

/// Canonical usage record for one LLM request, written once per request id.
///
/// Costs are in microcents (1/1,000,000 of a dollar).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub request_id: String,
    /// Response time when a response was seen, otherwise the request time.
    pub timestamp: DateTime<Utc>,
    pub user_id: String,
    pub org_id: String,
    pub assistant_type: String,
    pub document_id: String,
    pub conversation_id: String,
    /// Document id if set, else conversation id.
    pub project_id: String,
    pub model: String,

    pub request: Option<RequestMetrics>,
    pub response: Option<ResponseMetrics>,

    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
    pub cost_microcents: i64,
    pub status: UsageStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestMetrics {
    pub timestamp: DateTime<Utc>,
    pub character_count: i64,
    pub estimated_tokens: i64,
    pub request_type: String,
    pub tool_count: i64,
    pub message_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseMetrics {
    pub timestamp: DateTime<Utc>,
    pub character_count: i64,
    pub estimated_tokens: i64,
    pub finish_reason: String,
    pub response_time_ms: i64,
    pub has_tool_calls: bool,
    pub tool_call_count: i64,
}

/// Usage summed over one (org, assistant, user, project) combination.
///
/// The aggregation queries return these; services fold them into per-org
/// totals and breakdowns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageGroup {
    pub org_id: String,
    pub assistant_type: String,
    pub user_id: String,
    pub project_id: String,
    pub total_tokens: i64,
    pub cost_microcents: i64,
    pub request_count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            UsageStatus::Complete,
            UsageStatus::RequestOnly,
            UsageStatus::ResponseOnly,
            UsageStatus::Error,
        ] {
            assert_eq!(status.as_str().parse::<UsageStatus>(), Ok(status));
        }
        assert!("partial".parse::<UsageStatus>().is_err());
    }

    #[test]
    fn test_status_serializes_hyphenated() {
        assert_eq!(
            serde_json::to_string(&UsageStatus::RequestOnly).unwrap(),
            "\"request-only\""
        );
    }
}
