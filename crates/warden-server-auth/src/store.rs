// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Collaborator traits for the backing store and the resource catalog.

use std::collections::HashSet;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::strategy::{Strategy, StrategyFilter, StrategyResource, UpdateStrategyRequest};
use crate::types::{PrincipalRef, ResourceType, StrategyId, UserId};

/// Full-snapshot read access, consumed by the strategy cache.
#[async_trait]
pub trait StrategySource: Send + Sync {
	async fn load_strategies(&self) -> Result<Vec<Strategy>, StoreError>;
}

/// Changes to default-strategy resource links made by the post-resource hook.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceLinkChange {
	/// Principals whose default strategy gains the resources.
	pub grant_to: Vec<PrincipalRef>,
	/// Principals whose default strategy loses the resources.
	pub revoke_from: Vec<PrincipalRef>,
	pub resources: Vec<StrategyResource>,
	/// Remove the resources from every strategy, default or not.
	pub purge: bool,
}

impl ResourceLinkChange {
	pub fn purge(resources: Vec<StrategyResource>) -> Self {
		Self {
			resources,
			purge: true,
			..Default::default()
		}
	}

	pub fn is_noop(&self) -> bool {
		self.resources.is_empty()
			|| (!self.purge && self.grant_to.is_empty() && self.revoke_from.is_empty())
	}
}

/// Transactional strategy persistence.
///
/// Every mutating method is applied atomically: on error nothing is written.
#[async_trait]
pub trait StrategyStore: StrategySource {
	async fn create_strategy(&self, strategy: &Strategy) -> Result<(), StoreError>;

	/// Applies `req` with [`UpdateStrategyRequest::apply_to`] to the stored
	/// strategy inside one write transaction and returns the result, or `None`
	/// when the strategy does not exist.
	async fn update_strategy(
		&self,
		req: &UpdateStrategyRequest,
	) -> Result<Option<Strategy>, StoreError>;

	async fn delete_strategy(&self, id: StrategyId) -> Result<bool, StoreError>;

	async fn get_strategy(&self, id: StrategyId) -> Result<Option<Strategy>, StoreError>;

	async fn find_strategy_by_name(
		&self,
		owner: UserId,
		name: &str,
	) -> Result<Option<Strategy>, StoreError>;

	async fn default_strategy_of(
		&self,
		principal: PrincipalRef,
	) -> Result<Option<Strategy>, StoreError>;

	/// Returns the requested page and the total number of matches.
	async fn list_strategies(
		&self,
		filter: &StrategyFilter,
	) -> Result<(Vec<Strategy>, u64), StoreError>;

	async fn apply_resource_links(&self, change: &ResourceLinkChange) -> Result<(), StoreError>;

	/// Deletes the principal's default strategy, removes the principal from
	/// every other strategy and drops resource references to it.
	async fn remove_principal(&self, principal: PrincipalRef) -> Result<(), StoreError>;
}

/// Existence checks for resources owned by other subsystems.
#[async_trait]
pub trait ResourceCatalog: Send + Sync {
	async fn exists(&self, resource_type: ResourceType, id: &str) -> bool;
}

/// In-process catalog backed by a set.
#[derive(Default)]
pub struct MemoryCatalog {
	resources: RwLock<HashSet<(ResourceType, String)>>,
}

impl MemoryCatalog {
	pub fn new() -> Self {
		Self::default()
	}

	pub async fn insert(&self, resource_type: ResourceType, id: impl Into<String>) {
		self.resources.write().await.insert((resource_type, id.into()));
	}

	pub async fn remove(&self, resource_type: ResourceType, id: &str) -> bool {
		self
			.resources
			.write()
			.await
			.remove(&(resource_type, id.to_string()))
	}
}

#[async_trait]
impl ResourceCatalog for MemoryCatalog {
	async fn exists(&self, resource_type: ResourceType, id: &str) -> bool {
		self
			.resources
			.read()
			.await
			.contains(&(resource_type, id.to_string()))
	}
}
