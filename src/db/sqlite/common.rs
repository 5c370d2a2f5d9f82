use std::str::FromStr;

use uuid::Uuid;

use crate::db::error::{DbError, DbResult};

/// Parse a UUID string from the database, returning a DbError on failure
pub fn parse_uuid(s: &str) -> DbResult<Uuid> {
    Uuid::parse_str(s).map_err(|e| DbError::Internal(format!("Invalid UUID in database: {}", e)))
}

/// Parse a stored enum label, returning a DbError on failure
pub fn parse_label<T: FromStr<Err = String>>(s: &str) -> DbResult<T> {
    s.parse()
        .map_err(|e: String| DbError::Internal(format!("Invalid value in database: {}", e)))
}
