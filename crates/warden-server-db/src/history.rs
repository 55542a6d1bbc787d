// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Persistent history: the `history_records` sink and its read side.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{sqlite::SqlitePool, FromRow};
use uuid::Uuid;
use warden_server_audit::{AuditSink, AuditSinkError, HistoryFilter};
use warden_server_auth::{HistoryOperation, HistoryRecord};

use crate::error::{is_transient_error, DbError, DbResult};

pub struct SqliteAuditSink {
	pool: SqlitePool,
	filter: HistoryFilter,
	name: String,
}

impl SqliteAuditSink {
	pub fn new(pool: SqlitePool, filter: HistoryFilter) -> Self {
		Self {
			pool,
			filter,
			name: "sqlite".to_string(),
		}
	}
}

#[async_trait]
impl AuditSink for SqliteAuditSink {
	fn name(&self) -> &str {
		&self.name
	}

	fn filter(&self) -> &HistoryFilter {
		&self.filter
	}

	async fn publish(&self, record: Arc<HistoryRecord>) -> Result<(), AuditSinkError> {
		let detail_json = serde_json::to_string(&record.detail)
			.map_err(|e| AuditSinkError::Permanent(format!("failed to serialize detail: {e}")))?;

		sqlx::query(
			r#"
			INSERT INTO history_records (
				id, timestamp, resource_type, resource_name, operator, operation, detail, created_at
			) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
			"#,
		)
		.bind(record.id.to_string())
		.bind(record.timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true))
		.bind(&record.resource_type)
		.bind(&record.resource_name)
		.bind(&record.operator)
		.bind(record.operation.to_string())
		.bind(&detail_json)
		.bind(Utc::now().to_rfc3339())
		.execute(&self.pool)
		.await
		.map_err(|e| {
			if is_transient_error(&e) {
				AuditSinkError::Transient(format!("database error: {e}"))
			} else {
				AuditSinkError::Permanent(format!("database error: {e}"))
			}
		})?;

		Ok(())
	}

	async fn health_check(&self) -> Result<(), AuditSinkError> {
		sqlx::query("SELECT 1")
			.execute(&self.pool)
			.await
			.map_err(|e| AuditSinkError::Transient(format!("health check failed: {e}")))?;
		Ok(())
	}
}

#[derive(FromRow)]
struct HistoryRow {
	id: String,
	timestamp: String,
	resource_type: String,
	resource_name: String,
	operator: String,
	operation: String,
	detail: String,
}

impl TryFrom<HistoryRow> for HistoryRecord {
	type Error = DbError;

	fn try_from(row: HistoryRow) -> DbResult<Self> {
		let id = Uuid::parse_str(&row.id)
			.map_err(|e| DbError::Internal(format!("invalid history id {}: {e}", row.id)))?;
		let timestamp = DateTime::parse_from_rfc3339(&row.timestamp)
			.map(|dt| dt.with_timezone(&Utc))
			.map_err(|e| DbError::Internal(format!("invalid history timestamp: {e}")))?;
		let operation: HistoryOperation =
			serde_json::from_value(serde_json::Value::String(row.operation))?;
		Ok(HistoryRecord {
			id,
			timestamp,
			resource_type: row.resource_type,
			resource_name: row.resource_name,
			operator: row.operator,
			operation,
			detail: serde_json::from_str(&row.detail)?,
		})
	}
}

#[derive(Clone)]
pub struct HistoryRepository {
	pool: SqlitePool,
}

impl HistoryRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	/// Most recent records first.
	#[tracing::instrument(skip(self))]
	pub async fn recent(
		&self,
		resource_type: Option<&str>,
		limit: i64,
	) -> DbResult<Vec<HistoryRecord>> {
		let limit = limit.clamp(1, 1000);
		let rows: Vec<HistoryRow> = match resource_type {
			Some(resource_type) => {
				sqlx::query_as(
					"SELECT id, timestamp, resource_type, resource_name, operator, operation, detail \
					 FROM history_records WHERE resource_type = ? ORDER BY timestamp DESC LIMIT ?",
				)
				.bind(resource_type)
				.bind(limit)
				.fetch_all(&self.pool)
				.await?
			}
			None => {
				sqlx::query_as(
					"SELECT id, timestamp, resource_type, resource_name, operator, operation, detail \
					 FROM history_records ORDER BY timestamp DESC LIMIT ?",
				)
				.bind(limit)
				.fetch_all(&self.pool)
				.await?
			}
		};

		rows.into_iter().map(HistoryRecord::try_from).collect()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::create_test_pool;
	use warden_server_auth::history::STRATEGY_RESOURCE_TYPE;

	#[tokio::test]
	async fn publish_then_read_back() {
		let pool = create_test_pool().await;
		let sink = SqliteAuditSink::new(pool.clone(), HistoryFilter::default());
		let record = HistoryRecord::builder(HistoryOperation::Create)
			.resource_type(STRATEGY_RESOURCE_TYPE)
			.resource_name("readers")
			.actor("system")
			.detail(&serde_json::json!({ "effect": "allow" }))
			.build();

		sink.publish(Arc::new(record.clone())).await.unwrap();

		let records = HistoryRepository::new(pool)
			.recent(Some(STRATEGY_RESOURCE_TYPE), 10)
			.await
			.unwrap();
		assert_eq!(records.len(), 1);
		assert_eq!(records[0].id, record.id);
		assert_eq!(records[0].operation, HistoryOperation::Create);
		assert_eq!(records[0].operator, "system");
		assert_eq!(records[0].detail["effect"], "allow");
	}

	#[tokio::test]
	async fn health_check_succeeds_on_open_pool() {
		let sink = SqliteAuditSink::new(create_test_pool().await, HistoryFilter::default());
		assert!(sink.health_check().await.is_ok());
	}
}
