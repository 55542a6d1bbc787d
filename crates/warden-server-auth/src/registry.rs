// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Process-wide wiring of the authorization components.

use std::sync::Arc;

use warden_server_config::AuthConfig;

use crate::cache::{SnapshotProvider, StrategyCache};
use crate::chain::{strategy_chain, StrategyOperations};
use crate::checker::AuthChecker;
use crate::error::AuthResult;
use crate::history::HistorySink;
use crate::principal::PrincipalDirectory;
use crate::server::StrategyServer;
use crate::store::{ResourceCatalog, StrategyStore};

/// Built once at startup and shared by reference with the transport layer.
pub struct AuthRegistry {
	cache: Arc<StrategyCache>,
	checker: Arc<AuthChecker>,
	server: Arc<StrategyServer>,
	strategies: Arc<dyn StrategyOperations>,
}

impl AuthRegistry {
	/// Wires every component and loads the first strategy snapshot.
	#[tracing::instrument(skip_all)]
	pub async fn initialize<S>(
		config: AuthConfig,
		store: Arc<S>,
		directory: Arc<dyn PrincipalDirectory>,
		catalog: Arc<dyn ResourceCatalog>,
		history: Arc<dyn HistorySink>,
	) -> AuthResult<Self>
	where
		S: StrategyStore + 'static,
	{
		let cache = Arc::new(StrategyCache::new(store.clone()));
		cache.refresh().await?;

		let checker = Arc::new(AuthChecker::new(
			config.clone(),
			Arc::clone(&directory),
			cache.clone(),
		)?);
		let server = Arc::new(StrategyServer::new(
			config,
			store,
			directory,
			catalog,
			history,
		));
		let strategies = strategy_chain(Arc::clone(&server), Arc::clone(&checker));

		tracing::info!(
			strategies = cache.snapshot().await.len(),
			"authorization components initialized"
		);
		Ok(Self {
			cache,
			checker,
			server,
			strategies,
		})
	}

	/// Entry point for permission checks and list filtering.
	pub fn checker(&self) -> &Arc<AuthChecker> {
		&self.checker
	}

	/// Strategy CRUD behind the permission and parameter checks.
	pub fn strategies(&self) -> &Arc<dyn StrategyOperations> {
		&self.strategies
	}

	/// Post-resource and principal lifecycle hooks.
	pub fn hooks(&self) -> &Arc<StrategyServer> {
		&self.server
	}

	/// The cache refreshed by the external cache manager.
	pub fn cache(&self) -> &Arc<StrategyCache> {
		&self.cache
	}
}
