use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};

use crate::{
    db::{
        error::{DbError, DbResult},
        repos::{TimeRange, UsageRepo},
    },
    models::{RequestMetrics, ResponseMetrics, UsageGroup, UsageRecord, UsageStatus},
};

const USAGE_COLUMNS: &str = "\
    request_id, timestamp, user_id, org_id, assistant_type, document_id, \
    conversation_id, project_id, model, \
    request_timestamp, request_character_count, request_estimated_tokens, \
    request_type, request_tool_count, request_message_count, \
    response_timestamp, response_character_count, response_estimated_tokens, \
    finish_reason, response_time_ms, has_tool_calls, tool_call_count, \
    prompt_tokens, completion_tokens, total_tokens, cost_microcents, status, created_at";

pub struct PostgresUsageRepo {
    write_pool: PgPool,
    read_pool: PgPool,
}

impl PostgresUsageRepo {
    pub fn new(write_pool: PgPool, read_pool: Option<PgPool>) -> Self {
        let read_pool = read_pool.unwrap_or_else(|| write_pool.clone());
        Self {
            write_pool,
            read_pool,
        }
    }

    fn record_from_row(row: &PgRow) -> DbResult<UsageRecord> {
        let request = row
            .get::<Option<DateTime<Utc>>, _>("request_timestamp")
            .map(|timestamp| RequestMetrics {
                timestamp,
                character_count: row.get::<Option<i64>, _>("request_character_count").unwrap_or(0),
                estimated_tokens: row
                    .get::<Option<i64>, _>("request_estimated_tokens")
                    .unwrap_or(0),
                request_type: row.get::<Option<String>, _>("request_type").unwrap_or_default(),
                tool_count: row.get::<Option<i64>, _>("request_tool_count").unwrap_or(0),
                message_count: row.get::<Option<i64>, _>("request_message_count").unwrap_or(0),
            });

        let response = row
            .get::<Option<DateTime<Utc>>, _>("response_timestamp")
            .map(|timestamp| ResponseMetrics {
                timestamp,
                character_count: row
                    .get::<Option<i64>, _>("response_character_count")
                    .unwrap_or(0),
                estimated_tokens: row
                    .get::<Option<i64>, _>("response_estimated_tokens")
                    .unwrap_or(0),
                finish_reason: row.get::<Option<String>, _>("finish_reason").unwrap_or_default(),
                response_time_ms: row.get::<Option<i64>, _>("response_time_ms").unwrap_or(0),
                has_tool_calls: row.get::<Option<bool>, _>("has_tool_calls").unwrap_or(false),
                tool_call_count: row.get::<Option<i64>, _>("tool_call_count").unwrap_or(0),
            });

        let status: String = row.get("status");
        Ok(UsageRecord {
            request_id: row.get("request_id"),
            timestamp: row.get("timestamp"),
            user_id: row.get("user_id"),
            org_id: row.get("org_id"),
            assistant_type: row.get("assistant_type"),
            document_id: row.get("document_id"),
            conversation_id: row.get("conversation_id"),
            project_id: row.get("project_id"),
            model: row.get("model"),
            request,
            response,
            prompt_tokens: row.get("prompt_tokens"),
            completion_tokens: row.get("completion_tokens"),
            total_tokens: row.get("total_tokens"),
            cost_microcents: row.get("cost_microcents"),
            status: status
                .parse::<UsageStatus>()
                .map_err(DbError::Internal)?,
            created_at: row.get("created_at"),
        })
    }
}

#[async_trait]
impl UsageRepo for PostgresUsageRepo {
    async fn insert_once(&self, record: &UsageRecord) -> DbResult<bool> {
        let request = record.request.as_ref();
        let response = record.response.as_ref();

        let result = sqlx::query(&format!(
            r#"
            INSERT INTO usage_records ({USAGE_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                    $15, $16, $17, $18, $19, $20, $21, $22, $23, $24, $25, $26, $27, $28)
            ON CONFLICT (request_id) DO NOTHING
            "#
        ))
        .bind(&record.request_id)
        .bind(record.timestamp)
        .bind(&record.user_id)
        .bind(&record.org_id)
        .bind(&record.assistant_type)
        .bind(&record.document_id)
        .bind(&record.conversation_id)
        .bind(&record.project_id)
        .bind(&record.model)
        .bind(request.map(|r| r.timestamp))
        .bind(request.map(|r| r.character_count))
        .bind(request.map(|r| r.estimated_tokens))
        .bind(request.map(|r| r.request_type.as_str()))
        .bind(request.map(|r| r.tool_count))
        .bind(request.map(|r| r.message_count))
        .bind(response.map(|r| r.timestamp))
        .bind(response.map(|r| r.character_count))
        .bind(response.map(|r| r.estimated_tokens))
        .bind(response.map(|r| r.finish_reason.as_str()))
        .bind(response.map(|r| r.response_time_ms))
        .bind(response.map(|r| r.has_tool_calls))
        .bind(response.map(|r| r.tool_call_count))
        .bind(record.prompt_tokens)
        .bind(record.completion_tokens)
        .bind(record.total_tokens)
        .bind(record.cost_microcents)
        .bind(record.status.as_str())
        .bind(record.created_at)
        .execute(&self.write_pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn get(&self, request_id: &str) -> DbResult<Option<UsageRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {USAGE_COLUMNS} FROM usage_records WHERE request_id = $1"
        ))
        .bind(request_id)
        .fetch_optional(&self.read_pool)
        .await?;

        row.as_ref().map(Self::record_from_row).transpose()
    }

    // Billing and limit checks read from the primary; a lagging replica
    // would under-bill.
    async fn usage_groups(
        &self,
        range: TimeRange,
        billable_only: bool,
    ) -> DbResult<Vec<UsageGroup>> {
        let rows = sqlx::query(
            r#"
            SELECT
                org_id, assistant_type, user_id, project_id,
                COALESCE(SUM(total_tokens), 0)::BIGINT as total_tokens,
                COALESCE(SUM(cost_microcents), 0)::BIGINT as cost_microcents,
                COUNT(*) as request_count
            FROM usage_records
            WHERE timestamp >= $1 AND timestamp < $2
              AND status = 'complete'
              AND (NOT $3 OR total_tokens > 0)
            GROUP BY org_id, assistant_type, user_id, project_id
            ORDER BY org_id, assistant_type, user_id, project_id
            "#,
        )
        .bind(range.start)
        .bind(range.end)
        .bind(billable_only)
        .fetch_all(&self.write_pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| UsageGroup {
                org_id: row.get("org_id"),
                assistant_type: row.get("assistant_type"),
                user_id: row.get("user_id"),
                project_id: row.get("project_id"),
                total_tokens: row.get("total_tokens"),
                cost_microcents: row.get("cost_microcents"),
                request_count: row.get("request_count"),
            })
            .collect())
    }

    async fn sum_tokens(
        &self,
        org_id: &str,
        user_id: Option<&str>,
        range: TimeRange,
    ) -> DbResult<i64> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(total_tokens), 0)::BIGINT as tokens
            FROM usage_records
            WHERE org_id = $1
              AND ($2::TEXT IS NULL OR user_id = $2)
              AND timestamp >= $3 AND timestamp < $4
              AND status = 'complete'
            "#,
        )
        .bind(org_id)
        .bind(user_id)
        .bind(range.start)
        .bind(range.end)
        .fetch_one(&self.write_pool)
        .await?;

        Ok(row.get("tokens"))
    }
}
