//! Usage event ingestion.
//!
//! The gateway emits one event when a request is sent upstream and another
//! when the response completes. [`UsageMatcher`] pairs them through the
//! cache, [`StreamWorker`] drives one stream into the matcher, and
//! [`RequestSweeper`] turns requests whose response never came into
//! request-only records.

mod matcher;
mod sweeper;
mod worker;

use thiserror::Error;

pub use matcher::UsageMatcher;
pub use sweeper::{RequestSweeper, SweepResult};
pub use worker::{StreamKind, StreamWorker};

use crate::{cache::CacheError, db::DbError, services::ReconcileError, streams::StreamError};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Failed to decode event: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    #[error("Reconciliation failed: {0}")]
    Reconcile(#[from] ReconcileError),

    #[error("Database error: {0}")]
    Db(#[from] DbError),
}

impl IngestError {
    /// Whether the message should be acknowledged despite the failure.
    ///
    /// A payload that cannot be decoded will never decode, so redelivering
    /// it only blocks the stream. Everything else is transient.
    pub fn should_ack(&self) -> bool {
        matches!(
            self,
            IngestError::Decode(_) | IngestError::Reconcile(ReconcileError::NoEvents)
        )
    }
}

pub type IngestResult<T> = Result<T, IngestError>;
