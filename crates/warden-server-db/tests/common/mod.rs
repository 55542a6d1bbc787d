// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use warden_server_auth::{
	AuthContext, AuthContextBuilder, AuthRegistry, Group, GroupId, HistoryRecord, HistorySink,
	MemoryCatalog, MemoryDirectory, Module, Operation, PrincipalRef, ResourceEntry, ResourceType,
	StrategyStore, User, UserId, UserRole,
};
use warden_server_config::AuthConfig;
use warden_server_db::testing::create_test_pool;
use warden_server_db::StrategyRepository;
use zeroize::Zeroizing;

pub const KEY: &str = "0123456789abcdef0123456789abcdef";

pub fn config(strict: bool) -> AuthConfig {
	AuthConfig {
		console_open: true,
		client_open: true,
		console_strict: strict,
		client_strict: strict,
		token_key: Zeroizing::new(KEY.to_string()),
		..Default::default()
	}
}

#[derive(Default)]
pub struct RecordingHistory {
	records: Mutex<Vec<HistoryRecord>>,
}

impl RecordingHistory {
	pub fn records(&self) -> Vec<HistoryRecord> {
		self.records.lock().unwrap().clone()
	}
}

impl HistorySink for RecordingHistory {
	fn record(&self, record: HistoryRecord) {
		self.records.lock().unwrap().push(record);
	}
}

pub struct Harness {
	pub registry: AuthRegistry,
	pub repo: Arc<StrategyRepository>,
	pub directory: Arc<MemoryDirectory>,
	pub catalog: Arc<MemoryCatalog>,
	pub history: Arc<RecordingHistory>,
}

impl Harness {
	pub async fn new(config: AuthConfig) -> Self {
		let history = Arc::new(RecordingHistory::default());
		Self::with_history(config, history.clone(), history).await
	}

	pub async fn with_history(
		config: AuthConfig,
		sink: Arc<dyn HistorySink>,
		history: Arc<RecordingHistory>,
	) -> Self {
		Self::build(config, sink, history, |repo| repo).await
	}

	/// Like [`Harness::new`], but the registry talks to `wrap(repo)`.
	pub async fn wrapping<S, F>(config: AuthConfig, wrap: F) -> Self
	where
		S: StrategyStore + 'static,
		F: FnOnce(Arc<StrategyRepository>) -> Arc<S>,
	{
		let history = Arc::new(RecordingHistory::default());
		Self::build(config, history.clone(), history, wrap).await
	}

	async fn build<S, F>(
		config: AuthConfig,
		sink: Arc<dyn HistorySink>,
		history: Arc<RecordingHistory>,
		wrap: F,
	) -> Self
	where
		S: StrategyStore + 'static,
		F: FnOnce(Arc<StrategyRepository>) -> Arc<S>,
	{
		let repo = Arc::new(StrategyRepository::new(create_test_pool().await));
		let directory = Arc::new(MemoryDirectory::new());
		let catalog = Arc::new(MemoryCatalog::new());
		let registry = AuthRegistry::initialize(
			config,
			wrap(repo.clone()),
			directory.clone(),
			catalog.clone(),
			sink,
		)
		.await
		.unwrap();
		Self {
			registry,
			repo,
			directory,
			catalog,
			history,
		}
	}

	/// Inserts a user into the directory and creates its default strategy.
	pub async fn user(&self, role: UserRole, owner: Option<UserId>) -> User {
		let id = UserId::generate();
		let user = User {
			id,
			name: format!("user-{id}"),
			role,
			owner,
			token: self
				.registry
				.checker()
				.codec()
				.encode(Some(id), None)
				.unwrap(),
			token_enabled: true,
		};
		self.directory.insert_user(user.clone()).await;
		self
			.registry
			.hooks()
			.on_principal_created(PrincipalRef::User(id), owner.unwrap_or(id))
			.await
			.unwrap();
		user
	}

	pub async fn owner(&self) -> User {
		self.user(UserRole::Owner, None).await
	}

	pub async fn sub_account(&self, owner: &User) -> User {
		self.user(UserRole::SubAccount, Some(owner.id)).await
	}

	pub async fn group(&self, owner: &User, members: &[UserId]) -> Group {
		let id = GroupId::generate();
		let group = Group {
			id,
			name: format!("group-{id}"),
			owner: owner.id,
			members: members.iter().copied().collect::<BTreeSet<_>>(),
			token: self
				.registry
				.checker()
				.codec()
				.encode(None, Some(id))
				.unwrap(),
			token_enabled: true,
		};
		self.directory.insert_group(group.clone()).await;
		self
			.registry
			.hooks()
			.on_principal_created(PrincipalRef::Group(id), owner.id)
			.await
			.unwrap();
		group
	}

	pub async fn service(&self, name: &str) {
		self.catalog.insert(ResourceType::Service, name).await;
	}

	pub async fn sync(&self) {
		self.registry.cache().refresh().await.unwrap();
	}
}

/// A console call by `user` against the auth module.
pub fn auth_ctx(user: &User) -> AuthContext {
	AuthContext::builder().token(user.token.clone()).build()
}

/// A console call by `user` touching one service.
pub fn service_ctx(user: &User, operation: Operation, service: &str) -> AuthContextBuilder {
	AuthContext::builder()
		.operation(operation)
		.module(Module::Discover)
		.method("UpdateService")
		.token(user.token.clone())
		.resource(ResourceType::Service, ResourceEntry::new(service))
}
