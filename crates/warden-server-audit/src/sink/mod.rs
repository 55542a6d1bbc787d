// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

#[cfg(feature = "sink-tracing")]
pub mod tracing;

use std::sync::Arc;

use async_trait::async_trait;
use warden_server_auth::HistoryRecord;

use crate::error::AuditSinkError;
use crate::filter::HistoryFilter;

/// Destination for history records.
#[async_trait]
pub trait AuditSink: Send + Sync {
	fn name(&self) -> &str;

	fn filter(&self) -> &HistoryFilter;

	async fn publish(&self, record: Arc<HistoryRecord>) -> Result<(), AuditSinkError>;

	async fn health_check(&self) -> Result<(), AuditSinkError> {
		Ok(())
	}
}
