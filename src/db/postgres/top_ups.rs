use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    db::{
        error::{DbError, DbResult},
        repos::{CreditOutcome, CreditTarget, NewTopUp, TopUpRepo},
    },
    models::{TopUpSource, TopUpStatus, TopUpTransaction},
};

const TOP_UP_COLUMNS: &str = "\
    id, org_id, amount, payment_reference, source, status, failure_reason, \
    created_at, completed_at";

pub struct PostgresTopUpRepo {
    write_pool: PgPool,
    read_pool: PgPool,
}

impl PostgresTopUpRepo {
    pub fn new(write_pool: PgPool, read_pool: Option<PgPool>) -> Self {
        let read_pool = read_pool.unwrap_or_else(|| write_pool.clone());
        Self {
            write_pool,
            read_pool,
        }
    }

    fn transaction_from_row(row: &PgRow) -> DbResult<TopUpTransaction> {
        let source: String = row.get("source");
        let status: String = row.get("status");
        Ok(TopUpTransaction {
            id: row.get("id"),
            org_id: row.get("org_id"),
            amount: row.get("amount"),
            payment_reference: row.get("payment_reference"),
            source: source.parse::<TopUpSource>().map_err(DbError::Internal)?,
            status: status.parse::<TopUpStatus>().map_err(DbError::Internal)?,
            failure_reason: row.get("failure_reason"),
            created_at: row.get("created_at"),
            completed_at: row.get("completed_at"),
        })
    }

    /// Settle the target transaction as succeeded inside `tx`.
    ///
    /// Returns `None` when it had already succeeded.
    async fn settle_target(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        org_id: &str,
        amount: i64,
        target: &CreditTarget,
        now: DateTime<Utc>,
    ) -> DbResult<Option<Uuid>> {
        match target {
            CreditTarget::Existing {
                id,
                payment_reference,
            } => {
                let updated = sqlx::query(
                    r#"
                    UPDATE top_up_transactions
                    SET status = 'succeeded',
                        failure_reason = NULL,
                        completed_at = $1,
                        payment_reference = COALESCE($2, payment_reference)
                    WHERE id = $3 AND org_id = $4 AND status <> 'succeeded'
                    "#,
                )
                .bind(now)
                .bind(payment_reference.as_deref())
                .bind(id)
                .bind(org_id)
                .execute(&mut **tx)
                .await?;

                if updated.rows_affected() > 0 {
                    return Ok(Some(*id));
                }

                let exists = sqlx::query(
                    "SELECT status FROM top_up_transactions WHERE id = $1 AND org_id = $2",
                )
                .bind(id)
                .bind(org_id)
                .fetch_optional(&mut **tx)
                .await?;
                match exists {
                    Some(_) => Ok(None),
                    None => Err(DbError::NotFound),
                }
            }
            CreditTarget::New {
                source,
                payment_reference,
            } => {
                if let Some(reference) = payment_reference {
                    let existing = sqlx::query(
                        r#"
                        SELECT id, status FROM top_up_transactions
                        WHERE payment_reference = $1
                        FOR UPDATE
                        "#,
                    )
                    .bind(reference)
                    .fetch_optional(&mut **tx)
                    .await?;

                    if let Some(row) = existing {
                        let id: Uuid = row.get("id");
                        let status: String = row.get("status");
                        if status == TopUpStatus::Succeeded.as_str() {
                            return Ok(None);
                        }
                        sqlx::query(
                            r#"
                            UPDATE top_up_transactions
                            SET status = 'succeeded', failure_reason = NULL,
                                amount = $1, completed_at = $2
                            WHERE id = $3
                            "#,
                        )
                        .bind(amount)
                        .bind(now)
                        .bind(id)
                        .execute(&mut **tx)
                        .await?;
                        return Ok(Some(id));
                    }
                }

                let id = Uuid::new_v4();
                let inserted = sqlx::query(&format!(
                    r#"
                    INSERT INTO top_up_transactions ({TOP_UP_COLUMNS})
                    VALUES ($1, $2, $3, $4, $5, 'succeeded', NULL, $6, $6)
                    "#
                ))
                .bind(id)
                .bind(org_id)
                .bind(amount)
                .bind(payment_reference.as_deref())
                .bind(source.as_str())
                .bind(now)
                .execute(&mut **tx)
                .await;

                match inserted {
                    Ok(_) => Ok(Some(id)),
                    Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => Ok(None),
                    Err(e) => Err(DbError::from(e)),
                }
            }
        }
    }
}

#[async_trait]
impl TopUpRepo for PostgresTopUpRepo {
    async fn create_pending(&self, input: NewTopUp) -> DbResult<TopUpTransaction> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO top_up_transactions ({TOP_UP_COLUMNS})
            VALUES ($1, $2, $3, NULL, $4, 'pending', NULL, $5, NULL)
            RETURNING {TOP_UP_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&input.org_id)
        .bind(input.amount)
        .bind(input.source.as_str())
        .bind(input.created_at)
        .fetch_one(&self.write_pool)
        .await?;

        Self::transaction_from_row(&row)
    }

    async fn get(&self, id: Uuid) -> DbResult<Option<TopUpTransaction>> {
        let row = sqlx::query(&format!(
            "SELECT {TOP_UP_COLUMNS} FROM top_up_transactions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.read_pool)
        .await?;

        row.as_ref().map(Self::transaction_from_row).transpose()
    }

    async fn find_by_reference(&self, reference: &str) -> DbResult<Option<TopUpTransaction>> {
        let row = sqlx::query(&format!(
            "SELECT {TOP_UP_COLUMNS} FROM top_up_transactions WHERE payment_reference = $1"
        ))
        .bind(reference)
        .fetch_optional(&self.read_pool)
        .await?;

        row.as_ref().map(Self::transaction_from_row).transpose()
    }

    async fn mark_failed(&self, id: Uuid, reason: &str, now: DateTime<Utc>) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE top_up_transactions
            SET status = 'failed', failure_reason = $1, completed_at = $2
            WHERE id = $3 AND status = 'pending'
            "#,
        )
        .bind(reason)
        .bind(now)
        .bind(id)
        .execute(&self.write_pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_failed_by_reference(
        &self,
        reference: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE top_up_transactions
            SET status = 'failed', failure_reason = $1, completed_at = $2
            WHERE payment_reference = $3 AND status = 'pending'
            "#,
        )
        .bind(reason)
        .bind(now)
        .bind(reference)
        .execute(&self.write_pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn apply_credit(
        &self,
        org_id: &str,
        amount: i64,
        target: &CreditTarget,
        expected_version: i64,
        now: DateTime<Utc>,
    ) -> DbResult<CreditOutcome> {
        let mut tx = self.write_pool.begin().await?;

        let Some(transaction_id) = Self::settle_target(&mut tx, org_id, amount, target, now).await?
        else {
            tx.rollback().await?;
            return Ok(CreditOutcome::AlreadyApplied);
        };

        let updated = sqlx::query(
            r#"
            UPDATE organizations
            SET wallet_balance = wallet_balance + $1, version = version + 1, updated_at = $2
            WHERE org_id = $3 AND version = $4
            "#,
        )
        .bind(amount)
        .bind(now)
        .bind(org_id)
        .bind(expected_version)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(CreditOutcome::VersionConflict);
        }

        tx.commit().await?;
        Ok(CreditOutcome::Applied { transaction_id })
    }
}
