mod error;
#[cfg(feature = "database-postgres")]
pub mod postgres;
pub mod repos;
#[cfg(feature = "database-sqlite")]
pub mod sqlite;

#[cfg(all(test, any(feature = "database-sqlite", feature = "database-postgres")))]
pub mod tests;

use std::sync::Arc;

pub use error::{DbError, DbResult};
pub use repos::*;

use crate::config::DatabaseConfig;

/// PostgreSQL pool configuration with optional read replica.
#[cfg(feature = "database-postgres")]
pub struct PgPoolPair {
    /// Primary pool for writes.
    pub write: sqlx::PgPool,
    /// Optional read replica pool. If None, reads use the write pool.
    pub read: Option<sqlx::PgPool>,
}

/// Cached repository trait objects, created once at startup.
struct CachedRepos {
    organizations: Arc<dyn OrganizationRepo>,
    usage: Arc<dyn UsageRepo>,
    billing: Arc<dyn BillingRepo>,
    rollups: Arc<dyn RollupRepo>,
    top_ups: Arc<dyn TopUpRepo>,
    pending_requests: Arc<dyn PendingRequestRepo>,
}

enum PoolStorage {
    #[cfg(feature = "database-sqlite")]
    Sqlite(sqlx::SqlitePool),
    #[cfg(feature = "database-postgres")]
    Postgres(PgPoolPair),
    #[cfg(not(any(feature = "database-sqlite", feature = "database-postgres")))]
    _None(std::convert::Infallible),
}

/// Database pool supporting both SQLite and PostgreSQL.
///
/// Repositories are cached at construction time to avoid allocation on each access.
pub struct DbPool {
    inner: PoolStorage,
    repos: CachedRepos,
}

impl DbPool {
    /// Create a DbPool from an existing SQLite pool.
    /// Primarily useful for testing.
    #[cfg(feature = "database-sqlite")]
    pub fn from_sqlite(pool: sqlx::SqlitePool) -> Self {
        let repos = CachedRepos {
            organizations: Arc::new(sqlite::SqliteOrganizationRepo::new(pool.clone())),
            usage: Arc::new(sqlite::SqliteUsageRepo::new(pool.clone())),
            billing: Arc::new(sqlite::SqliteBillingRepo::new(pool.clone())),
            rollups: Arc::new(sqlite::SqliteRollupRepo::new(pool.clone())),
            top_ups: Arc::new(sqlite::SqliteTopUpRepo::new(pool.clone())),
            pending_requests: Arc::new(sqlite::SqlitePendingRequestRepo::new(pool.clone())),
        };
        DbPool {
            inner: PoolStorage::Sqlite(pool),
            repos,
        }
    }

    /// Create a DbPool from existing PostgreSQL pools.
    /// Primarily useful for testing.
    #[cfg(feature = "database-postgres")]
    pub fn from_postgres(write_pool: sqlx::PgPool, read_pool: Option<sqlx::PgPool>) -> Self {
        let repos = CachedRepos {
            organizations: Arc::new(postgres::PostgresOrganizationRepo::new(
                write_pool.clone(),
                read_pool.clone(),
            )),
            usage: Arc::new(postgres::PostgresUsageRepo::new(
                write_pool.clone(),
                read_pool.clone(),
            )),
            billing: Arc::new(postgres::PostgresBillingRepo::new(
                write_pool.clone(),
                read_pool.clone(),
            )),
            rollups: Arc::new(postgres::PostgresRollupRepo::new(
                write_pool.clone(),
                read_pool.clone(),
            )),
            top_ups: Arc::new(postgres::PostgresTopUpRepo::new(
                write_pool.clone(),
                read_pool.clone(),
            )),
            pending_requests: Arc::new(postgres::PostgresPendingRequestRepo::new(
                write_pool.clone(),
                read_pool.clone(),
            )),
        };
        DbPool {
            inner: PoolStorage::Postgres(PgPoolPair {
                write: write_pool,
                read: read_pool,
            }),
            repos,
        }
    }

    /// Create a database pool from configuration
    pub async fn from_config(config: &DatabaseConfig) -> DbResult<Self> {
        match config {
            DatabaseConfig::None => Err(DbError::NotConfigured),
            #[cfg(feature = "database-sqlite")]
            DatabaseConfig::Sqlite(cfg) => {
                let pool = sqlx::sqlite::SqlitePoolOptions::new()
                    .max_connections(cfg.max_connections)
                    .connect_with(
                        sqlx::sqlite::SqliteConnectOptions::new()
                            .filename(&cfg.path)
                            .create_if_missing(cfg.create_if_missing)
                            .journal_mode(if cfg.wal_mode {
                                sqlx::sqlite::SqliteJournalMode::Wal
                            } else {
                                sqlx::sqlite::SqliteJournalMode::Delete
                            })
                            .busy_timeout(std::time::Duration::from_millis(cfg.busy_timeout_ms)),
                    )
                    .await?;

                Ok(Self::from_sqlite(pool))
            }
            #[cfg(feature = "database-postgres")]
            DatabaseConfig::Postgres(cfg) => {
                let options = || {
                    sqlx::postgres::PgPoolOptions::new()
                        .min_connections(cfg.min_connections)
                        .max_connections(cfg.max_connections)
                        .acquire_timeout(std::time::Duration::from_secs(cfg.connect_timeout_secs))
                        .idle_timeout(std::time::Duration::from_secs(cfg.idle_timeout_secs))
                };

                let write_pool = options().connect(&cfg.url).await?;

                let read_pool = if let Some(read_url) = &cfg.read_url {
                    tracing::info!("Configuring read replica pool");
                    Some(options().connect(read_url).await?)
                } else {
                    None
                };

                Ok(Self::from_postgres(write_pool, read_pool))
            }
        }
    }

    /// Run database migrations using sqlx's migration runner
    /// This automatically creates and manages a _sqlx_migrations table
    /// Migrations always run on the primary (write) pool.
    pub async fn run_migrations(&self) -> DbResult<()> {
        match &self.inner {
            #[cfg(feature = "database-sqlite")]
            PoolStorage::Sqlite(pool) => {
                tracing::info!("Running SQLite migrations");
                sqlx::migrate!("./migrations_sqlx/sqlite").run(pool).await?;
                tracing::info!("SQLite migrations completed successfully");
                Ok(())
            }
            #[cfg(feature = "database-postgres")]
            PoolStorage::Postgres(pools) => {
                tracing::info!("Running PostgreSQL migrations");
                sqlx::migrate!("./migrations_sqlx/postgres")
                    .run(&pools.write)
                    .await?;
                tracing::info!("PostgreSQL migrations completed successfully");
                Ok(())
            }
            #[cfg(not(any(feature = "database-sqlite", feature = "database-postgres")))]
            PoolStorage::_None(infallible) => match *infallible {},
        }
    }

    pub fn organizations(&self) -> Arc<dyn OrganizationRepo> {
        Arc::clone(&self.repos.organizations)
    }

    pub fn usage(&self) -> Arc<dyn UsageRepo> {
        Arc::clone(&self.repos.usage)
    }

    pub fn billing(&self) -> Arc<dyn BillingRepo> {
        Arc::clone(&self.repos.billing)
    }

    pub fn rollups(&self) -> Arc<dyn RollupRepo> {
        Arc::clone(&self.repos.rollups)
    }

    pub fn top_ups(&self) -> Arc<dyn TopUpRepo> {
        Arc::clone(&self.repos.top_ups)
    }

    pub fn pending_requests(&self) -> Arc<dyn PendingRequestRepo> {
        Arc::clone(&self.repos.pending_requests)
    }

    /// Health check for database connectivity
    pub async fn health_check(&self) -> DbResult<()> {
        match &self.inner {
            #[cfg(feature = "database-sqlite")]
            PoolStorage::Sqlite(pool) => {
                sqlx::query("SELECT 1").execute(pool).await?;
                Ok(())
            }
            #[cfg(feature = "database-postgres")]
            PoolStorage::Postgres(pools) => {
                // Check both write and read pools
                sqlx::query("SELECT 1").execute(&pools.write).await?;
                if let Some(read) = &pools.read {
                    sqlx::query("SELECT 1").execute(read).await?;
                }
                Ok(())
            }
            #[cfg(not(any(feature = "database-sqlite", feature = "database-postgres")))]
            PoolStorage::_None(infallible) => match *infallible {},
        }
    }
}
