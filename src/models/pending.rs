use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A request event still waiting for its response, kept durably so it can be
/// reconciled on its own once it expires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingRequest {
    pub request_id: String,
    pub org_id: String,
    /// The request event as received.
    pub payload: String,
    pub expires_at: DateTime<Utc>,
}
