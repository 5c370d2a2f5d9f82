use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};

use crate::{
    db::{
        error::{DbError, DbResult},
        repos::OrganizationRepo,
    },
    models::{
        AutoTopUpSettings, ConsumptionLimits, CreateOrganization, Organization,
        OrganizationStatus,
    },
};

const ORGANIZATION_COLUMNS: &str = "\
    org_id, name, contact_email, billing_email, wallet_balance, credit_limit, \
    auto_top_up_enabled, auto_top_up_threshold, auto_top_up_amount, \
    payment_method_id, payment_customer_id, \
    monthly_limit, daily_limit, per_user_limit, status, version, created_at, updated_at";

/// Balances are read for compare-and-swap, so every query goes to the
/// primary.
pub struct PostgresOrganizationRepo {
    write_pool: PgPool,
}

impl PostgresOrganizationRepo {
    pub fn new(write_pool: PgPool, _read_pool: Option<PgPool>) -> Self {
        Self { write_pool }
    }

    fn organization_from_row(row: &PgRow) -> DbResult<Organization> {
        let status: String = row.get("status");
        Ok(Organization {
            org_id: row.get("org_id"),
            name: row.get("name"),
            contact_email: row.get("contact_email"),
            billing_email: row.get("billing_email"),
            wallet_balance: row.get("wallet_balance"),
            credit_limit: row.get("credit_limit"),
            auto_top_up: AutoTopUpSettings {
                enabled: row.get("auto_top_up_enabled"),
                threshold: row.get("auto_top_up_threshold"),
                amount: row.get("auto_top_up_amount"),
                payment_method_id: row.get("payment_method_id"),
                customer_id: row.get("payment_customer_id"),
            },
            consumption_limits: ConsumptionLimits {
                monthly: row.get("monthly_limit"),
                daily: row.get("daily_limit"),
                per_user: row.get("per_user_limit"),
            },
            status: status
                .parse::<OrganizationStatus>()
                .map_err(DbError::Internal)?,
            version: row.get("version"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

#[async_trait]
impl OrganizationRepo for PostgresOrganizationRepo {
    async fn create(&self, input: CreateOrganization) -> DbResult<Organization> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO organizations (
                org_id, name, contact_email, billing_email, wallet_balance, credit_limit,
                auto_top_up_enabled, auto_top_up_threshold, auto_top_up_amount,
                payment_method_id, payment_customer_id,
                monthly_limit, daily_limit, per_user_limit
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            RETURNING {ORGANIZATION_COLUMNS}
            "#
        ))
        .bind(&input.org_id)
        .bind(&input.name)
        .bind(&input.contact_email)
        .bind(&input.billing_email)
        .bind(input.wallet_balance)
        .bind(input.credit_limit)
        .bind(input.auto_top_up.enabled)
        .bind(input.auto_top_up.threshold)
        .bind(input.auto_top_up.amount)
        .bind(&input.auto_top_up.payment_method_id)
        .bind(&input.auto_top_up.customer_id)
        .bind(input.consumption_limits.monthly)
        .bind(input.consumption_limits.daily)
        .bind(input.consumption_limits.per_user)
        .fetch_one(&self.write_pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => DbError::Conflict(
                format!("Organization '{}' already exists", input.org_id),
            ),
            _ => DbError::from(e),
        })?;

        Self::organization_from_row(&row)
    }

    async fn get(&self, org_id: &str) -> DbResult<Option<Organization>> {
        // Wallet reads feed compare-and-swap updates, so they go to the primary
        let row = sqlx::query(&format!(
            "SELECT {ORGANIZATION_COLUMNS} FROM organizations WHERE org_id = $1"
        ))
        .bind(org_id)
        .fetch_optional(&self.write_pool)
        .await?;

        row.as_ref().map(Self::organization_from_row).transpose()
    }

    async fn list_auto_top_up_candidates(
        &self,
        pending_since: DateTime<Utc>,
    ) -> DbResult<Vec<Organization>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {ORGANIZATION_COLUMNS}
            FROM organizations
            WHERE auto_top_up_enabled
              AND status = 'active'
              AND wallet_balance < auto_top_up_threshold
              AND NOT EXISTS (
                  SELECT 1 FROM top_up_transactions t
                  WHERE t.org_id = organizations.org_id
                    AND t.source = 'auto_top_up'
                    AND t.status = 'pending'
                    AND t.created_at >= $1
              )
            ORDER BY org_id
            "#
        ))
        .bind(pending_since)
        .fetch_all(&self.write_pool)
        .await?;

        rows.iter().map(Self::organization_from_row).collect()
    }
}
