// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use warden_server_auth::{HistoryOperation, HistoryRecord};

/// Selects which history records a sink receives.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryFilter {
	/// Only these operations, when set.
	pub include_operations: Option<Vec<HistoryOperation>>,
	/// Never these resource types.
	pub exclude_resource_types: Vec<String>,
}

impl HistoryFilter {
	pub fn allows(&self, record: &HistoryRecord) -> bool {
		if let Some(include) = &self.include_operations {
			if !include.contains(&record.operation) {
				return false;
			}
		}
		!self
			.exclude_resource_types
			.iter()
			.any(|t| t == &record.resource_type)
	}
}
