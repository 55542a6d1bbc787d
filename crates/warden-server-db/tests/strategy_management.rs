// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Strategy CRUD, lifecycle hooks and history through the full request chain.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use common::{auth_ctx, config, service_ctx, Harness, RecordingHistory};
use tokio_util::sync::CancellationToken;
use warden_server_audit::{AuditService, HistoryFilter, QueueOverflowPolicy};
use warden_server_auth::{
	default_strategy_name, AuthContext, AuthError, CreateStrategyRequest, Effect,
	HistoryOperation, Operation, PrincipalRef, ResourceLinkChange, ResourceType, RoleId,
	StoreError, Strategy, StrategyFilter, StrategyId, StrategyQuery, StrategyResource,
	StrategySource, StrategyStore, UpdateStrategyRequest, UserId, UserRole,
};
use warden_server_db::{HistoryRepository, SqliteAuditSink, StrategyRepository};

fn request(name: &str, principals: Vec<PrincipalRef>) -> CreateStrategyRequest {
	CreateStrategyRequest {
		name: name.to_string(),
		comment: String::new(),
		effect: Effect::Allow,
		access: Default::default(),
		principals,
		resources: Vec::new(),
		functions: vec!["*".to_string()],
		conditions: Vec::new(),
	}
}

#[tokio::test]
async fn principal_creation_persists_default_strategy_once() {
	let h = Harness::new(config(false)).await;
	let owner = h.owner().await;
	let principal = PrincipalRef::User(owner.id);

	let again = h
		.registry
		.hooks()
		.on_principal_created(principal, owner.id)
		.await
		.unwrap();
	let stored = h.repo.default_strategy_of(principal).await.unwrap().unwrap();

	assert_eq!(again.id, stored.id);
	assert_eq!(stored.name, default_strategy_name(&principal));
	assert!(stored.is_default);
	assert_eq!(stored.principals, vec![principal]);
	assert!(stored.resources.is_empty());
}

#[tokio::test]
async fn creator_is_granted_then_purged_with_the_resource() {
	let h = Harness::new(config(false)).await;
	let owner = h.owner().await;
	let sub = h.sub_account(&owner).await;
	let teammate = h.sub_account(&owner).await;
	h.service("orders").await;

	let mut create = service_ctx(&sub, Operation::Create, "orders")
		.linked_users([teammate.id])
		.build();
	h.registry
		.checker()
		.check_console_permission(&mut create)
		.await
		.unwrap();
	h.registry
		.hooks()
		.after_resource_operation(&create)
		.await
		.unwrap();

	for user in [&sub, &teammate] {
		let resources = h
			.registry
			.strategies()
			.get_principal_resources(&mut auth_ctx(&owner), PrincipalRef::User(user.id))
			.await
			.unwrap();
		assert!(resources
			.get(&ResourceType::Service)
			.is_some_and(|ids| ids.contains("orders")));
	}

	// A manual strategy naming the service is purged as well.
	let mut manual = request("orders-readers", vec![PrincipalRef::User(teammate.id)]);
	manual.resources = vec![StrategyResource::new(ResourceType::Service, "orders")];
	let manual = h
		.registry
		.strategies()
		.create_strategy(&mut auth_ctx(&owner), manual)
		.await
		.unwrap();

	let mut delete = service_ctx(&sub, Operation::Delete, "orders").build();
	h.registry
		.checker()
		.check_console_permission(&mut delete)
		.await
		.unwrap();
	h.registry
		.hooks()
		.after_resource_operation(&delete)
		.await
		.unwrap();

	let resources = h
		.registry
		.strategies()
		.get_principal_resources(&mut auth_ctx(&owner), PrincipalRef::User(sub.id))
		.await
		.unwrap();
	assert!(resources.is_empty());
	let manual = h.repo.get_strategy(manual.id).await.unwrap().unwrap();
	assert!(manual.resources.is_empty());

	let operations: Vec<HistoryOperation> = h.history.records().iter().map(|r| r.operation).collect();
	assert!(operations.contains(&HistoryOperation::LinkResources));
	assert!(operations.contains(&HistoryOperation::PurgeResources));
}

#[tokio::test]
async fn modify_hook_moves_resource_between_defaults() {
	let h = Harness::new(config(false)).await;
	let owner = h.owner().await;
	let old = h.sub_account(&owner).await;
	let new = h.sub_account(&owner).await;
	h.service("payments").await;

	let mut create = service_ctx(&old, Operation::Create, "payments").build();
	h.registry
		.checker()
		.check_console_permission(&mut create)
		.await
		.unwrap();
	h.registry
		.hooks()
		.after_resource_operation(&create)
		.await
		.unwrap();

	let mut modify = service_ctx(&old, Operation::Modify, "payments")
		.linked_users([new.id])
		.removed_users([old.id])
		.build();
	h.registry
		.checker()
		.check_console_permission(&mut modify)
		.await
		.unwrap();
	h.registry
		.hooks()
		.after_resource_operation(&modify)
		.await
		.unwrap();

	let old_default = h
		.repo
		.default_strategy_of(PrincipalRef::User(old.id))
		.await
		.unwrap()
		.unwrap();
	let new_default = h
		.repo
		.default_strategy_of(PrincipalRef::User(new.id))
		.await
		.unwrap()
		.unwrap();
	assert!(old_default.resources.is_empty());
	assert_eq!(
		new_default.resources,
		vec![StrategyResource::new(ResourceType::Service, "payments")]
	);
}

#[tokio::test]
async fn hook_is_skipped_when_default_policy_maintenance_is_off() {
	let mut cfg = config(false);
	cfg.open_principal_default_policy = false;
	let h = Harness::new(cfg).await;
	let owner = h.owner().await;
	h.service("quiet").await;

	let mut create = service_ctx(&owner, Operation::Create, "quiet").build();
	h.registry
		.checker()
		.check_console_permission(&mut create)
		.await
		.unwrap();
	h.registry
		.hooks()
		.after_resource_operation(&create)
		.await
		.unwrap();

	let default = h
		.repo
		.default_strategy_of(PrincipalRef::User(owner.id))
		.await
		.unwrap()
		.unwrap();
	assert!(default.resources.is_empty());
}

#[tokio::test]
async fn default_strategies_keep_their_principals() {
	let h = Harness::new(config(false)).await;
	let owner = h.owner().await;
	let sub = h.sub_account(&owner).await;
	let group = h.group(&owner, &[sub.id]).await;
	let role = PrincipalRef::Role(RoleId::generate());
	h.registry
		.hooks()
		.on_principal_created(role, owner.id)
		.await
		.unwrap();
	h.service("inventory").await;

	for principal in [PrincipalRef::User(sub.id), PrincipalRef::Group(group.id), role] {
		let default = h.repo.default_strategy_of(principal).await.unwrap().unwrap();

		let mut add = UpdateStrategyRequest::new(default.id);
		add.add_principals = vec![PrincipalRef::User(owner.id)];
		let err = h
			.registry
			.strategies()
			.update_strategy(&mut auth_ctx(&owner), add)
			.await
			.unwrap_err();
		assert!(
			matches!(err, AuthError::DefaultPolicyPrincipalImmutable),
			"{principal}: {err}"
		);

		let mut remove = UpdateStrategyRequest::new(default.id);
		remove.remove_principals = vec![principal];
		let err = h
			.registry
			.strategies()
			.update_strategy(&mut auth_ctx(&owner), remove)
			.await
			.unwrap_err();
		assert!(matches!(err, AuthError::DefaultPolicyPrincipalImmutable));

		// Resources stay editable.
		let mut grant = UpdateStrategyRequest::new(default.id);
		grant.add_resources = vec![StrategyResource::new(ResourceType::Service, "inventory")];
		let updated = h
			.registry
			.strategies()
			.update_strategy(&mut auth_ctx(&owner), grant)
			.await
			.unwrap();
		assert_eq!(updated.principals, vec![principal]);
		assert_eq!(updated.resources.len(), 1);
	}
}

#[tokio::test]
async fn owner_default_strategy_is_read_only() {
	let h = Harness::new(config(false)).await;
	let owner = h.owner().await;
	h.service("core").await;
	let default = h
		.repo
		.default_strategy_of(PrincipalRef::User(owner.id))
		.await
		.unwrap()
		.unwrap();

	let mut grant = UpdateStrategyRequest::new(default.id);
	grant.add_resources = vec![StrategyResource::new(ResourceType::Service, "core")];
	let err = h
		.registry
		.strategies()
		.update_strategy(&mut auth_ctx(&owner), grant)
		.await
		.unwrap_err();
	assert!(matches!(err, AuthError::OwnerDefaultPolicyImmutable));

	let err = h
		.registry
		.strategies()
		.delete_strategy(&mut auth_ctx(&owner), default.id)
		.await
		.unwrap_err();
	assert!(matches!(err, AuthError::NotAllowedAccess(_)));
}

#[tokio::test]
async fn duplicate_names_are_rejected_per_account() {
	let h = Harness::new(config(false)).await;
	let owner = h.owner().await;
	let other = h.owner().await;

	h.registry
		.strategies()
		.create_strategy(
			&mut auth_ctx(&owner),
			request("shared", vec![PrincipalRef::User(owner.id)]),
		)
		.await
		.unwrap();

	let err = h
		.registry
		.strategies()
		.create_strategy(
			&mut auth_ctx(&owner),
			request("shared", vec![PrincipalRef::User(owner.id)]),
		)
		.await
		.unwrap_err();
	assert!(matches!(err, AuthError::PolicyNameExists(name) if name == "shared"));

	h.registry
		.strategies()
		.create_strategy(
			&mut auth_ctx(&other),
			request("shared", vec![PrincipalRef::User(other.id)]),
		)
		.await
		.unwrap();
}

#[tokio::test]
async fn visibility_follows_account_and_membership() {
	let h = Harness::new(config(false)).await;
	let owner = h.owner().await;
	let sub = h.sub_account(&owner).await;
	let peer = h.sub_account(&owner).await;
	let group = h.group(&owner, &[sub.id]).await;
	let stranger = h.owner().await;
	let admin = h.user(UserRole::Admin, None).await;

	let for_group = h
		.registry
		.strategies()
		.create_strategy(
			&mut auth_ctx(&owner),
			request("team", vec![PrincipalRef::Group(group.id)]),
		)
		.await
		.unwrap();
	let for_peer = h
		.registry
		.strategies()
		.create_strategy(
			&mut auth_ctx(&owner),
			request("peer-only", vec![PrincipalRef::User(peer.id)]),
		)
		.await
		.unwrap();

	// Owner: own default, three principal defaults and both strategies.
	let page = h
		.registry
		.strategies()
		.list_strategies(&mut auth_ctx(&owner), StrategyQuery::default())
		.await
		.unwrap();
	assert_eq!(page.total, 6);

	// Sub account: its default, its group's default and the group strategy.
	let page = h
		.registry
		.strategies()
		.list_strategies(&mut auth_ctx(&sub), StrategyQuery::default())
		.await
		.unwrap();
	assert_eq!(page.total, 3);
	assert!(page.strategies.iter().any(|s| s.id == for_group.id));
	assert!(page.strategies.iter().all(|s| s.id != for_peer.id));

	let err = h
		.registry
		.strategies()
		.get_strategy(&mut auth_ctx(&sub), for_peer.id)
		.await
		.unwrap_err();
	assert!(matches!(err, AuthError::NotAllowedAccess(_)));

	// A foreign principal filter yields nothing for a sub account.
	let page = h
		.registry
		.strategies()
		.list_strategies(
			&mut auth_ctx(&sub),
			StrategyQuery {
				principal: Some(PrincipalRef::User(peer.id)),
				..Default::default()
			},
		)
		.await
		.unwrap();
	assert_eq!(page.total, 0);

	let page = h
		.registry
		.strategies()
		.list_strategies(&mut auth_ctx(&stranger), StrategyQuery::default())
		.await
		.unwrap();
	assert_eq!(page.total, 1);

	let page = h
		.registry
		.strategies()
		.list_strategies(&mut auth_ctx(&admin), StrategyQuery::default())
		.await
		.unwrap();
	assert_eq!(page.total, 8);

	let err = h
		.registry
		.strategies()
		.get_principal_resources(&mut auth_ctx(&stranger), PrincipalRef::User(sub.id))
		.await
		.unwrap_err();
	assert!(matches!(err, AuthError::NotAllowedAccess(_)));
}

#[tokio::test]
async fn foreign_principals_cannot_be_referenced() {
	let h = Harness::new(config(false)).await;
	let owner = h.owner().await;
	let stranger = h.owner().await;

	let err = h
		.registry
		.strategies()
		.create_strategy(
			&mut auth_ctx(&owner),
			request("reach", vec![PrincipalRef::User(stranger.id)]),
		)
		.await
		.unwrap_err();
	assert!(matches!(err, AuthError::NotAllowedAccess(_)));
}

#[tokio::test]
async fn unknown_resources_are_rejected() {
	let h = Harness::new(config(false)).await;
	let owner = h.owner().await;
	let mut req = request("ghost", vec![PrincipalRef::User(owner.id)]);
	req.resources = vec![StrategyResource::new(ResourceType::Service, "missing")];

	let err = h
		.registry
		.strategies()
		.create_strategy(&mut auth_ctx(&owner), req)
		.await
		.unwrap_err();
	assert!(matches!(err, AuthError::NotFoundResource(_)));
	assert!(h
		.repo
		.find_strategy_by_name(owner.id, "ghost")
		.await
		.unwrap()
		.is_none());
}

#[tokio::test]
async fn wildcard_collapses_resource_list() {
	let h = Harness::new(config(false)).await;
	let owner = h.owner().await;
	h.service("a").await;
	let mut req = request("everything", vec![PrincipalRef::User(owner.id)]);
	req.resources = vec![
		StrategyResource::new(ResourceType::Service, "a"),
		StrategyResource::wildcard(ResourceType::Service),
	];

	let created = h
		.registry
		.strategies()
		.create_strategy(&mut auth_ctx(&owner), req)
		.await
		.unwrap();
	let stored = h.repo.get_strategy(created.id).await.unwrap().unwrap();
	assert_eq!(
		stored.resources,
		vec![StrategyResource::wildcard(ResourceType::Service)]
	);
}

#[tokio::test]
async fn invalid_parameters_never_reach_the_store() {
	let h = Harness::new(config(false)).await;
	let owner = h.owner().await;

	let err = h
		.registry
		.strategies()
		.create_strategy(
			&mut auth_ctx(&owner),
			request("has space", vec![PrincipalRef::User(owner.id)]),
		)
		.await
		.unwrap_err();
	assert!(matches!(err, AuthError::InvalidArgument(_)));

	let err = h
		.registry
		.strategies()
		.create_strategy(&mut auth_ctx(&owner), request("nobody", Vec::new()))
		.await
		.unwrap_err();
	assert!(matches!(err, AuthError::InvalidArgument(_)));

	assert_eq!(h.repo.load_all().await.unwrap().len(), 1);
}

#[tokio::test]
async fn anonymous_callers_cannot_manage_strategies() {
	let h = Harness::new(config(false)).await;
	let mut ctx = AuthContext::builder().allow_anonymous(true).build();

	let err = h
		.registry
		.strategies()
		.list_strategies(&mut ctx, StrategyQuery::default())
		.await
		.unwrap_err();
	assert!(matches!(err, AuthError::TokenInvalid));
}

#[tokio::test]
async fn cancelled_request_writes_nothing() {
	let h = Harness::new(config(false)).await;
	let owner = h.owner().await;
	let token = CancellationToken::new();
	token.cancel();
	let mut ctx = AuthContext::builder()
		.token(owner.token.clone())
		.cancellation(token)
		.build();

	let err = h
		.registry
		.strategies()
		.create_strategy(
			&mut ctx,
			request("late", vec![PrincipalRef::User(owner.id)]),
		)
		.await
		.unwrap_err();
	assert!(matches!(err, AuthError::Cancelled));
	assert!(h
		.repo
		.find_strategy_by_name(owner.id, "late")
		.await
		.unwrap()
		.is_none());
}

#[tokio::test]
async fn only_the_owner_deletes() {
	let h = Harness::new(config(false)).await;
	let owner = h.owner().await;
	let sub = h.sub_account(&owner).await;
	let created = h
		.registry
		.strategies()
		.create_strategy(
			&mut auth_ctx(&owner),
			request("temp", vec![PrincipalRef::User(sub.id)]),
		)
		.await
		.unwrap();

	let err = h
		.registry
		.strategies()
		.delete_strategy(&mut auth_ctx(&sub), created.id)
		.await
		.unwrap_err();
	assert!(matches!(err, AuthError::NotAllowedAccess(_)));

	h.registry
		.strategies()
		.delete_strategy(&mut auth_ctx(&owner), created.id)
		.await
		.unwrap();
	let err = h
		.registry
		.strategies()
		.get_strategy(&mut auth_ctx(&owner), created.id)
		.await
		.unwrap_err();
	assert!(matches!(err, AuthError::NotFoundPolicy(id) if id == created.id));
}

#[tokio::test]
async fn principal_deletion_sweeps_links() {
	let h = Harness::new(config(false)).await;
	let owner = h.owner().await;
	let sub = h.sub_account(&owner).await;
	let peer = h.sub_account(&owner).await;

	let mut req = request(
		"pair",
		vec![PrincipalRef::User(sub.id), PrincipalRef::User(peer.id)],
	);
	req.resources = vec![StrategyResource::new(ResourceType::User, sub.id.to_string())];
	let pair = h
		.registry
		.strategies()
		.create_strategy(&mut auth_ctx(&owner), req)
		.await
		.unwrap();

	h.registry
		.hooks()
		.on_principal_deleted(PrincipalRef::User(sub.id))
		.await
		.unwrap();

	assert!(h
		.repo
		.default_strategy_of(PrincipalRef::User(sub.id))
		.await
		.unwrap()
		.is_none());
	let pair = h.repo.get_strategy(pair.id).await.unwrap().unwrap();
	assert_eq!(pair.principals, vec![PrincipalRef::User(peer.id)]);
	assert!(pair.resources.is_empty());
}

#[tokio::test]
async fn history_reaches_sqlite_through_the_pipeline() {
	let pool = warden_server_db::testing::create_test_pool().await;
	let service = Arc::new(AuditService::new(
		HistoryFilter::default(),
		64,
		QueueOverflowPolicy::DropNewest,
		vec![Arc::new(SqliteAuditSink::new(pool.clone(), HistoryFilter::default()))],
	));
	let h = Harness::with_history(config(false), service, Arc::new(RecordingHistory::default())).await;
	let owner = h.owner().await;

	h.registry
		.strategies()
		.create_strategy(
			&mut auth_ctx(&owner),
			request("audited", vec![PrincipalRef::User(owner.id)]),
		)
		.await
		.unwrap();

	tokio::time::sleep(Duration::from_millis(100)).await;
	let records = HistoryRepository::new(pool).recent(None, 10).await.unwrap();
	assert!(records.iter().any(|r| r.resource_name == "audited"
		&& r.operation == HistoryOperation::Create
		&& r.operator == PrincipalRef::User(owner.id).to_string()));
}

#[tokio::test]
async fn sub_account_strategies_belong_to_the_account() {
	let h = Harness::new(config(false)).await;
	let owner = h.owner().await;
	let sub = h.sub_account(&owner).await;

	let created = h
		.registry
		.strategies()
		.create_strategy(
			&mut auth_ctx(&sub),
			request("sub-made", vec![PrincipalRef::User(sub.id)]),
		)
		.await
		.unwrap();
	assert_eq!(created.owner, owner.id);

	let page = h
		.registry
		.strategies()
		.list_strategies(
			&mut auth_ctx(&owner),
			StrategyQuery {
				is_default: Some(false),
				..Default::default()
			},
		)
		.await
		.unwrap();
	assert_eq!(page.total, 1);
	assert_eq!(page.strategies[0].id, created.id);

	// Names are unique per account, not per creator.
	let err = h
		.registry
		.strategies()
		.create_strategy(
			&mut auth_ctx(&owner),
			request("sub-made", vec![PrincipalRef::User(owner.id)]),
		)
		.await
		.unwrap_err();
	assert!(matches!(err, AuthError::PolicyNameExists(_)));

	let mut edit = UpdateStrategyRequest::new(created.id);
	edit.comment = Some("reviewed".to_string());
	let updated = h
		.registry
		.strategies()
		.update_strategy(&mut auth_ctx(&owner), edit)
		.await
		.unwrap();
	assert_eq!(updated.comment, "reviewed");

	h.registry
		.strategies()
		.delete_strategy(&mut auth_ctx(&owner), created.id)
		.await
		.unwrap();
	assert!(h.repo.get_strategy(created.id).await.unwrap().is_none());
}

/// Store that commits a pending link change right after a strategy is read,
/// standing in for a resource hook running between read and write.
struct InterleavingStore {
	inner: Arc<StrategyRepository>,
	pending: Mutex<Option<ResourceLinkChange>>,
}

impl InterleavingStore {
	fn new(inner: Arc<StrategyRepository>) -> Self {
		Self {
			inner,
			pending: Mutex::new(None),
		}
	}

	fn after_next_read(&self, change: ResourceLinkChange) {
		*self.pending.lock().unwrap() = Some(change);
	}
}

#[async_trait]
impl StrategySource for InterleavingStore {
	async fn load_strategies(&self) -> Result<Vec<Strategy>, StoreError> {
		self.inner.load_strategies().await
	}
}

#[async_trait]
impl StrategyStore for InterleavingStore {
	async fn create_strategy(&self, strategy: &Strategy) -> Result<(), StoreError> {
		self.inner.create_strategy(strategy).await
	}

	async fn update_strategy(
		&self,
		req: &UpdateStrategyRequest,
	) -> Result<Option<Strategy>, StoreError> {
		self.inner.update_strategy(req).await
	}

	async fn delete_strategy(&self, id: StrategyId) -> Result<bool, StoreError> {
		self.inner.delete_strategy(id).await
	}

	async fn get_strategy(&self, id: StrategyId) -> Result<Option<Strategy>, StoreError> {
		let found = self.inner.get_strategy(id).await?;
		let pending = self.pending.lock().unwrap().take();
		if let Some(change) = pending {
			self.inner.apply_resource_links(&change).await?;
		}
		Ok(found)
	}

	async fn find_strategy_by_name(
		&self,
		owner: UserId,
		name: &str,
	) -> Result<Option<Strategy>, StoreError> {
		self.inner.find_strategy_by_name(owner, name).await
	}

	async fn default_strategy_of(
		&self,
		principal: PrincipalRef,
	) -> Result<Option<Strategy>, StoreError> {
		self.inner.default_strategy_of(principal).await
	}

	async fn list_strategies(
		&self,
		filter: &StrategyFilter,
	) -> Result<(Vec<Strategy>, u64), StoreError> {
		self.inner.list_strategies(filter).await
	}

	async fn apply_resource_links(&self, change: &ResourceLinkChange) -> Result<(), StoreError> {
		self.inner.apply_resource_links(change).await
	}

	async fn remove_principal(&self, principal: PrincipalRef) -> Result<(), StoreError> {
		self.inner.remove_principal(principal).await
	}
}

#[tokio::test]
async fn update_keeps_links_granted_while_it_was_in_flight() {
	let store = Arc::new(Mutex::new(None::<Arc<InterleavingStore>>));
	let slot = store.clone();
	let h = Harness::wrapping(config(false), move |repo| {
		let wrapped = Arc::new(InterleavingStore::new(repo));
		*slot.lock().unwrap() = Some(wrapped.clone());
		wrapped
	})
	.await;
	let interleaving = store.lock().unwrap().clone().unwrap();

	let owner = h.owner().await;
	let sub = h.sub_account(&owner).await;
	h.service("a").await;
	h.service("b").await;
	let default = h
		.repo
		.default_strategy_of(PrincipalRef::User(sub.id))
		.await
		.unwrap()
		.unwrap();

	interleaving.after_next_read(ResourceLinkChange {
		grant_to: vec![PrincipalRef::User(sub.id)],
		resources: vec![StrategyResource::new(ResourceType::Service, "b")],
		..Default::default()
	});
	let mut edit = UpdateStrategyRequest::new(default.id);
	edit.add_resources = vec![StrategyResource::new(ResourceType::Service, "a")];
	let updated = h
		.registry
		.strategies()
		.update_strategy(&mut auth_ctx(&owner), edit)
		.await
		.unwrap();

	let expected = vec![
		StrategyResource::new(ResourceType::Service, "a"),
		StrategyResource::new(ResourceType::Service, "b"),
	];
	assert_eq!(updated.resources, expected);
	let stored = h.repo.get_strategy(default.id).await.unwrap().unwrap();
	assert_eq!(stored.resources, expected);
}
