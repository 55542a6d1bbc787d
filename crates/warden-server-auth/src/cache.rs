// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Strategy snapshot cache.
//!
//! Readers clone an `Arc` of the current [`StrategySnapshot`]; a refresh
//! rebuilds a new snapshot off to the side and swaps it in, so readers never
//! wait on a rebuild.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};

use crate::error::StoreError;
use crate::index::PrincipalResourceIndex;
use crate::store::StrategySource;
use crate::strategy::Strategy;
use crate::types::{Effect, PrincipalRef, StrategyId};

/// Immutable view of every strategy plus the derived resource index.
#[derive(Debug, Default)]
pub struct StrategySnapshot {
	revision: u64,
	strategies: HashMap<StrategyId, Arc<Strategy>>,
	by_principal: HashMap<PrincipalRef, Vec<StrategyId>>,
	index: PrincipalResourceIndex,
}

impl StrategySnapshot {
	pub fn build(strategies: Vec<Strategy>, revision: u64) -> Self {
		let index = PrincipalResourceIndex::from_strategies(strategies.iter());
		let mut by_principal: HashMap<PrincipalRef, Vec<StrategyId>> = HashMap::new();
		let mut by_id = HashMap::with_capacity(strategies.len());
		for strategy in strategies {
			for principal in &strategy.principals {
				by_principal.entry(*principal).or_default().push(strategy.id);
			}
			by_id.insert(strategy.id, Arc::new(strategy));
		}
		Self {
			revision,
			strategies: by_id,
			by_principal,
			index,
		}
	}

	pub fn revision(&self) -> u64 {
		self.revision
	}

	pub fn len(&self) -> usize {
		self.strategies.len()
	}

	pub fn is_empty(&self) -> bool {
		self.strategies.is_empty()
	}

	pub fn get(&self, id: StrategyId) -> Option<Arc<Strategy>> {
		self.strategies.get(&id).cloned()
	}

	pub fn index(&self) -> &PrincipalResourceIndex {
		&self.index
	}

	/// Strategies of the given effect that list `principal`.
	pub fn strategies_of(&self, principal: &PrincipalRef, effect: Effect) -> Vec<Arc<Strategy>> {
		self
			.by_principal
			.get(principal)
			.into_iter()
			.flatten()
			.filter_map(|id| self.strategies.get(id))
			.filter(|s| s.effect == effect)
			.cloned()
			.collect()
	}
}

/// Supplies the current snapshot and a synchronous resync.
#[async_trait]
pub trait SnapshotProvider: Send + Sync {
	async fn snapshot(&self) -> Arc<StrategySnapshot>;

	/// Reloads from the backing store and waits for the new snapshot.
	async fn force_sync(&self) -> Result<(), StoreError>;
}

pub struct StrategyCache {
	source: Arc<dyn StrategySource>,
	current: RwLock<Arc<StrategySnapshot>>,
	sync_lock: Mutex<()>,
	revision: AtomicU64,
}

impl StrategyCache {
	/// Creates an empty cache. Call [`refresh`](Self::refresh) to load it.
	pub fn new(source: Arc<dyn StrategySource>) -> Self {
		Self {
			source,
			current: RwLock::new(Arc::new(StrategySnapshot::default())),
			sync_lock: Mutex::new(()),
			revision: AtomicU64::new(0),
		}
	}

	/// Loads every strategy and swaps in a fresh snapshot.
	#[tracing::instrument(skip(self))]
	pub async fn refresh(&self) -> Result<(), StoreError> {
		let _guard = self.sync_lock.lock().await;
		let strategies = self.source.load_strategies().await?;
		let revision = self.revision.fetch_add(1, Ordering::SeqCst) + 1;
		let snapshot = Arc::new(StrategySnapshot::build(strategies, revision));
		tracing::debug!(revision, strategies = snapshot.len(), "strategy snapshot rebuilt");
		*self.current.write().await = snapshot;
		Ok(())
	}
}

#[async_trait]
impl SnapshotProvider for StrategyCache {
	async fn snapshot(&self) -> Arc<StrategySnapshot> {
		self.current.read().await.clone()
	}

	async fn force_sync(&self) -> Result<(), StoreError> {
		tracing::info!("forcing strategy resync");
		self.refresh().await
	}
}
