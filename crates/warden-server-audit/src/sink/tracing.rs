// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;

use async_trait::async_trait;
use warden_server_auth::HistoryRecord;

use crate::error::AuditSinkError;
use crate::filter::HistoryFilter;
use crate::sink::AuditSink;

/// Emits every record as a structured `tracing` event on the `history` target.
pub struct TracingAuditSink {
	filter: HistoryFilter,
}

impl TracingAuditSink {
	pub fn new(filter: HistoryFilter) -> Self {
		Self { filter }
	}
}

impl Default for TracingAuditSink {
	fn default() -> Self {
		Self::new(HistoryFilter::default())
	}
}

#[async_trait]
impl AuditSink for TracingAuditSink {
	fn name(&self) -> &str {
		"tracing"
	}

	fn filter(&self) -> &HistoryFilter {
		&self.filter
	}

	async fn publish(&self, record: Arc<HistoryRecord>) -> Result<(), AuditSinkError> {
		let detail = serde_json::to_string(&record.detail)
			.map_err(|e| AuditSinkError::Permanent(format!("failed to serialize detail: {e}")))?;
		::tracing::info!(
			target: "history",
			id = %record.id,
			timestamp = %record.timestamp.to_rfc3339(),
			resource_type = %record.resource_type,
			resource_name = %record.resource_name,
			operator = %record.operator,
			operation = %record.operation,
			detail = %detail,
			"history record"
		);
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use warden_server_auth::HistoryOperation;

	#[tokio::test]
	async fn publishes_without_error() {
		let sink = TracingAuditSink::default();
		let record = HistoryRecord::builder(HistoryOperation::Update)
			.resource_name("readers")
			.build();
		assert!(sink.publish(Arc::new(record)).await.is_ok());
		assert_eq!(sink.name(), "tracing");
	}
}
