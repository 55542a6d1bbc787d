// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! History records for successful mutating operations.
//!
//! Records are handed to a [`HistorySink`] fire-and-forget; delivery failures
//! never fail the operation that produced them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::principal::Operator;

/// Resource type recorded for strategy mutations.
pub const STRATEGY_RESOURCE_TYPE: &str = "auth_strategy";

/// Resource type recorded for default-strategy link maintenance.
pub const RESOURCE_LINK_RESOURCE_TYPE: &str = "auth_resource_link";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryOperation {
	Create,
	Update,
	Delete,
	LinkResources,
	PurgeResources,
}

impl std::fmt::Display for HistoryOperation {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let s = match self {
			HistoryOperation::Create => "create",
			HistoryOperation::Update => "update",
			HistoryOperation::Delete => "delete",
			HistoryOperation::LinkResources => "link_resources",
			HistoryOperation::PurgeResources => "purge_resources",
		};
		write!(f, "{s}")
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
	pub id: Uuid,
	pub timestamp: DateTime<Utc>,
	pub resource_type: String,
	pub resource_name: String,
	/// Display form of the acting principal, `anonymous` when unknown.
	pub operator: String,
	pub operation: HistoryOperation,
	pub detail: serde_json::Value,
}

impl HistoryRecord {
	pub fn builder(operation: HistoryOperation) -> HistoryRecordBuilder {
		HistoryRecordBuilder::new(operation)
	}
}

pub struct HistoryRecordBuilder {
	operation: HistoryOperation,
	resource_type: String,
	resource_name: String,
	operator: String,
	detail: serde_json::Value,
}

impl HistoryRecordBuilder {
	fn new(operation: HistoryOperation) -> Self {
		Self {
			operation,
			resource_type: STRATEGY_RESOURCE_TYPE.to_string(),
			resource_name: String::new(),
			operator: "anonymous".to_string(),
			detail: serde_json::Value::Null,
		}
	}

	pub fn resource_type(mut self, resource_type: impl Into<String>) -> Self {
		self.resource_type = resource_type.into();
		self
	}

	pub fn resource_name(mut self, name: impl Into<String>) -> Self {
		self.resource_name = name.into();
		self
	}

	pub fn operator(mut self, operator: &Operator) -> Self {
		if !operator.anonymous {
			self.operator = operator.principal.to_string();
		}
		self
	}

	/// Records a non-principal actor such as `system`.
	pub fn actor(mut self, actor: impl Into<String>) -> Self {
		self.operator = actor.into();
		self
	}

	/// Serializes `detail`; a value that fails to serialize is recorded as null.
	pub fn detail<T: Serialize>(mut self, detail: &T) -> Self {
		self.detail = serde_json::to_value(detail).unwrap_or(serde_json::Value::Null);
		self
	}

	pub fn build(self) -> HistoryRecord {
		HistoryRecord {
			id: Uuid::new_v4(),
			timestamp: Utc::now(),
			resource_type: self.resource_type,
			resource_name: self.resource_name,
			operator: self.operator,
			operation: self.operation,
			detail: self.detail,
		}
	}
}

/// Fire-and-forget receiver of history records.
pub trait HistorySink: Send + Sync {
	fn record(&self, record: HistoryRecord);
}

/// Discards every record. Used when history is disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHistorySink;

impl HistorySink for NoopHistorySink {
	fn record(&self, _record: HistoryRecord) {}
}
