mod billing;
mod organizations;
mod pending_requests;
mod rollups;
mod top_ups;
mod usage;

pub use billing::*;
use chrono::{DateTime, Utc};
pub use organizations::*;
pub use pending_requests::*;
pub use rollups::*;
pub use top_ups::*;
pub use usage::*;

/// Half-open time window `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }
}
