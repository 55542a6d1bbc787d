// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;

use tokio::sync::mpsc::{self, error::SendError};
use tracing::{info, instrument, warn};
use warden_server_auth::{HistoryRecord, HistorySink, NoopHistorySink};
use warden_server_config::{AuditConfig, QueueOverflowPolicy};

use crate::filter::HistoryFilter;
use crate::sink::AuditSink;

pub struct AuditService {
	tx: mpsc::Sender<HistoryRecord>,
	overflow_policy: QueueOverflowPolicy,
}

impl AuditService {
	/// Starts the background fan-out task. Must be called inside a tokio runtime.
	pub fn new(
		global_filter: HistoryFilter,
		queue_capacity: usize,
		overflow_policy: QueueOverflowPolicy,
		sinks: Vec<Arc<dyn AuditSink>>,
	) -> Self {
		let (tx, rx) = mpsc::channel(queue_capacity.max(1));

		tokio::spawn(Self::background_task(rx, global_filter, sinks));

		Self {
			tx,
			overflow_policy,
		}
	}

	/// Starts the pipeline described by `config`, or returns `None` when
	/// history is disabled.
	pub fn from_config(config: &AuditConfig, sinks: Vec<Arc<dyn AuditSink>>) -> Option<Self> {
		if !config.enabled {
			info!("history pipeline disabled");
			return None;
		}
		Some(Self::new(
			HistoryFilter::default(),
			config.queue_capacity,
			config.queue_overflow_policy,
			sinks,
		))
	}

	async fn background_task(
		mut rx: mpsc::Receiver<HistoryRecord>,
		global_filter: HistoryFilter,
		sinks: Vec<Arc<dyn AuditSink>>,
	) {
		while let Some(record) = rx.recv().await {
			if !global_filter.allows(&record) {
				continue;
			}

			let record = Arc::new(record);

			for sink in &sinks {
				if !sink.filter().allows(&record) {
					continue;
				}

				let sink = Arc::clone(sink);
				let record = Arc::clone(&record);

				tokio::spawn(async move {
					if let Err(e) = sink.publish(record).await {
						warn!(sink = sink.name(), error = %e, "history sink publish failed");
					}
				});
			}
		}
	}

	/// Queues a record for processing.
	///
	/// Returns `true` if the record was queued, `false` if dropped.
	///
	/// - `Block`: spawns a task that waits for queue space (the caller never waits)
	/// - `DropNewest`: uses `try_send`, dropping the new record when the queue is full
	#[instrument(skip(self, record), fields(operation = %record.operation, resource = %record.resource_name))]
	pub fn log(&self, record: HistoryRecord) -> bool {
		match self.overflow_policy {
			QueueOverflowPolicy::Block => {
				let tx = self.tx.clone();
				tokio::spawn(async move {
					let _ = tx.send(record).await;
				});
				true
			}
			QueueOverflowPolicy::DropNewest => self.tx.try_send(record).is_ok(),
		}
	}

	pub async fn log_blocking(
		&self,
		record: HistoryRecord,
	) -> Result<(), SendError<HistoryRecord>> {
		self.tx.send(record).await
	}
}

/// The history sink for the authorization core: the pipeline when history is
/// enabled, a sink that discards records otherwise.
pub fn history_sink(config: &AuditConfig, sinks: Vec<Arc<dyn AuditSink>>) -> Arc<dyn HistorySink> {
	match AuditService::from_config(config, sinks) {
		Some(service) => Arc::new(service),
		None => Arc::new(NoopHistorySink),
	}
}

impl HistorySink for AuditService {
	fn record(&self, record: HistoryRecord) {
		if !self.log(record) {
			warn!("history queue full, record dropped");
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::error::AuditSinkError;
	use async_trait::async_trait;
	use std::sync::atomic::{AtomicUsize, Ordering};
	use tokio::time::{sleep, Duration};
	use warden_server_auth::HistoryOperation;

	struct TestSink {
		name: String,
		filter: HistoryFilter,
		publish_count: Arc<AtomicUsize>,
	}

	impl TestSink {
		fn new(name: &str) -> Self {
			Self {
				name: name.to_string(),
				filter: HistoryFilter::default(),
				publish_count: Arc::new(AtomicUsize::new(0)),
			}
		}

		fn count(&self) -> usize {
			self.publish_count.load(Ordering::SeqCst)
		}
	}

	#[async_trait]
	impl AuditSink for TestSink {
		fn name(&self) -> &str {
			&self.name
		}

		fn filter(&self) -> &HistoryFilter {
			&self.filter
		}

		async fn publish(&self, _record: Arc<HistoryRecord>) -> Result<(), AuditSinkError> {
			self.publish_count.fetch_add(1, Ordering::SeqCst);
			Ok(())
		}
	}

	struct FailingSink {
		filter: HistoryFilter,
	}

	#[async_trait]
	impl AuditSink for FailingSink {
		fn name(&self) -> &str {
			"failing"
		}

		fn filter(&self) -> &HistoryFilter {
			&self.filter
		}

		async fn publish(&self, _record: Arc<HistoryRecord>) -> Result<(), AuditSinkError> {
			Err(AuditSinkError::Transient("test error".to_string()))
		}
	}

	fn record(operation: HistoryOperation) -> HistoryRecord {
		HistoryRecord::builder(operation).resource_name("readers").build()
	}

	#[tokio::test]
	async fn test_log_sends_to_sink() {
		let sink = Arc::new(TestSink::new("test"));
		let service = AuditService::new(
			HistoryFilter::default(),
			10000,
			QueueOverflowPolicy::DropNewest,
			vec![sink.clone()],
		);

		assert!(service.log(record(HistoryOperation::Create)));

		sleep(Duration::from_millis(50)).await;
		assert_eq!(sink.count(), 1);
	}

	#[tokio::test]
	async fn test_history_sink_trait_queues_records() {
		let sink = Arc::new(TestSink::new("test"));
		let service = AuditService::new(
			HistoryFilter::default(),
			10000,
			QueueOverflowPolicy::Block,
			vec![sink.clone()],
		);
		let history: &dyn HistorySink = &service;

		history.record(record(HistoryOperation::Update));
		history.record(record(HistoryOperation::Delete));

		sleep(Duration::from_millis(50)).await;
		assert_eq!(sink.count(), 2);
	}

	#[tokio::test]
	async fn test_global_filter_blocks_records() {
		let sink = Arc::new(TestSink::new("test"));
		let filter = HistoryFilter {
			include_operations: Some(vec![HistoryOperation::Delete]),
			exclude_resource_types: Vec::new(),
		};
		let service = AuditService::new(
			filter,
			10000,
			QueueOverflowPolicy::DropNewest,
			vec![sink.clone()],
		);

		service.log_blocking(record(HistoryOperation::Create)).await.unwrap();
		service.log_blocking(record(HistoryOperation::Delete)).await.unwrap();

		sleep(Duration::from_millis(50)).await;
		assert_eq!(sink.count(), 1);
	}

	#[tokio::test]
	async fn test_failing_sink_does_not_block_others() {
		let sink = Arc::new(TestSink::new("test"));
		let failing = Arc::new(FailingSink {
			filter: HistoryFilter::default(),
		});
		let service = AuditService::new(
			HistoryFilter::default(),
			10000,
			QueueOverflowPolicy::DropNewest,
			vec![failing, sink.clone()],
		);

		service.log_blocking(record(HistoryOperation::Create)).await.unwrap();

		sleep(Duration::from_millis(50)).await;
		assert_eq!(sink.count(), 1);
	}

	#[tokio::test(flavor = "current_thread")]
	async fn test_drop_newest_when_full() {
		let sink = Arc::new(TestSink::new("test"));
		let service = AuditService::new(
			HistoryFilter::default(),
			1,
			QueueOverflowPolicy::DropNewest,
			vec![sink.clone()],
		);

		// The background task cannot run until this task yields.
		assert!(service.log(record(HistoryOperation::Create)));
		assert!(!service.log(record(HistoryOperation::Create)));
	}

	#[tokio::test]
	async fn test_disabled_config_starts_no_pipeline() {
		let sink = Arc::new(TestSink::new("test"));
		let config = AuditConfig {
			enabled: false,
			..Default::default()
		};
		assert!(AuditService::from_config(&config, vec![sink.clone()]).is_none());

		let history = history_sink(&config, vec![sink.clone()]);
		history.record(record(HistoryOperation::Delete));
		sleep(Duration::from_millis(50)).await;
		assert_eq!(sink.count(), 0);
	}

	#[tokio::test]
	async fn test_enabled_config_delivers_to_sinks() {
		let sink = Arc::new(TestSink::new("test"));
		let history = history_sink(&AuditConfig::default(), vec![sink.clone()]);
		history.record(record(HistoryOperation::Create));
		sleep(Duration::from_millis(50)).await;
		assert_eq!(sink.count(), 1);
	}
}
