use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    db::error::DbResult,
    models::{CreateOrganization, Organization},
};

#[async_trait]
pub trait OrganizationRepo: Send + Sync {
    async fn create(&self, input: CreateOrganization) -> DbResult<Organization>;

    async fn get(&self, org_id: &str) -> DbResult<Option<Organization>>;

    /// Active organizations with auto-top-up enabled whose balance is below
    /// their threshold.
    async fn list_auto_top_up_candidates(
        &self,
        pending_since: DateTime<Utc>,
    ) -> DbResult<Vec<Organization>>;
}
