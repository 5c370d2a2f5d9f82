mod billing;
mod common;
mod organizations;
mod pending_requests;
mod rollups;
mod top_ups;
mod usage;

pub use billing::SqliteBillingRepo;
pub use organizations::SqliteOrganizationRepo;
pub use pending_requests::SqlitePendingRequestRepo;
pub use rollups::SqliteRollupRepo;
pub use top_ups::SqliteTopUpRepo;
pub use usage::SqliteUsageRepo;
