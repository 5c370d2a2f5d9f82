mod billing;
mod organizations;
mod pending_requests;
mod rollups;
mod top_ups;
mod usage;

pub use billing::PostgresBillingRepo;
pub use organizations::PostgresOrganizationRepo;
pub use pending_requests::PostgresPendingRequestRepo;
pub use rollups::PostgresRollupRepo;
pub use top_ups::PostgresTopUpRepo;
pub use usage::PostgresUsageRepo;
