// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Strategy management.
//!
//! [`StrategyServer`] owns the mutation rules for strategies (ownership,
//! default-strategy immutability, reference validation), visibility filtering
//! for reads, the post-resource hook that keeps default strategies linked to
//! the resources their principals create, and the principal lifecycle hooks.
//!
//! Callers reach it through the [`StrategyOperations`](crate::chain::StrategyOperations)
//! chain, which runs the permission and parameter checks first.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{info, instrument};
use warden_server_config::AuthConfig;

use crate::context::AuthContext;
use crate::error::{AuthError, AuthResult, StoreError};
use crate::history::{
	HistoryOperation, HistoryRecord, HistorySink, RESOURCE_LINK_RESOURCE_TYPE,
};
use crate::principal::{Operator, PrincipalDirectory};
use crate::store::{ResourceCatalog, ResourceLinkChange, StrategyStore};
use crate::strategy::{
	normalize_resources, CreateStrategyRequest, PrincipalResources, Strategy, StrategyFilter,
	StrategyPage, StrategyQuery, StrategyResource, UpdateStrategyRequest, DEFAULT_LIST_LIMIT,
	MAX_LIST_LIMIT, WILDCARD_FUNCTION,
};
use crate::types::{Effect, GroupId, Operation, PrincipalRef, ResourceType, StrategyId, UserId};

pub struct StrategyServer {
	config: AuthConfig,
	store: Arc<dyn StrategyStore>,
	directory: Arc<dyn PrincipalDirectory>,
	catalog: Arc<dyn ResourceCatalog>,
	history: Arc<dyn HistorySink>,
}

impl StrategyServer {
	pub fn new(
		config: AuthConfig,
		store: Arc<dyn StrategyStore>,
		directory: Arc<dyn PrincipalDirectory>,
		catalog: Arc<dyn ResourceCatalog>,
		history: Arc<dyn HistorySink>,
	) -> Self {
		Self {
			config,
			store,
			directory,
			catalog,
			history,
		}
	}

	#[instrument(skip(self, ctx, req), fields(name = %req.name))]
	pub async fn create_strategy(
		&self,
		ctx: &AuthContext,
		req: CreateStrategyRequest,
	) -> AuthResult<Strategy> {
		let operator = require_operator(ctx)?;
		let owner = owning_account(&operator)?;

		if self
			.store
			.find_strategy_by_name(owner, &req.name)
			.await?
			.is_some()
		{
			return Err(AuthError::PolicyNameExists(req.name));
		}

		let account = scope_of(&operator);
		for principal in &req.principals {
			self.ensure_principal(principal, account).await?;
		}
		for resource in &req.resources {
			self.ensure_resource(resource).await?;
		}

		let now = Utc::now();
		let functions = if req.functions.is_empty() {
			vec![WILDCARD_FUNCTION.to_string()]
		} else {
			req.functions
		};
		let strategy = Strategy {
			id: StrategyId::generate(),
			name: req.name,
			comment: req.comment,
			effect: req.effect,
			access: req.access,
			owner,
			is_default: false,
			principals: dedup(req.principals),
			resources: normalize_resources(req.resources),
			functions,
			conditions: req.conditions,
			created_at: now,
			updated_at: now,
		};

		check_cancelled(ctx)?;
		self
			.store
			.create_strategy(&strategy)
			.await
			.map_err(|e| match e {
				StoreError::Conflict(_) => AuthError::PolicyNameExists(strategy.name.clone()),
				other => other.into(),
			})?;

		info!(strategy_id = %strategy.id, owner = %owner, "strategy created");
		self.history.record(
			HistoryRecord::builder(HistoryOperation::Create)
				.resource_name(&strategy.name)
				.operator(&operator)
				.detail(&strategy)
				.build(),
		);
		Ok(strategy)
	}

	#[instrument(skip(self, ctx, req), fields(strategy_id = %req.id))]
	pub async fn update_strategy(
		&self,
		ctx: &AuthContext,
		req: UpdateStrategyRequest,
	) -> AuthResult<Strategy> {
		let operator = require_operator(ctx)?;
		let current = self
			.store
			.get_strategy(req.id)
			.await?
			.ok_or(AuthError::NotFoundPolicy(req.id))?;

		// Owner and default flag never change, so these checks hold for the
		// state the store edits below.
		if !operator.is_admin() && operator.user_id() != Some(current.owner) {
			return Err(AuthError::NotAllowedAccess(format!(
				"strategy {} belongs to another account",
				current.id
			)));
		}
		if current.is_default {
			if req.touches_principals() {
				return Err(AuthError::DefaultPolicyPrincipalImmutable);
			}
			if current.is_owner_default() {
				return Err(AuthError::OwnerDefaultPolicyImmutable);
			}
		}

		let account = scope_of(&operator);
		for principal in &req.add_principals {
			self.ensure_principal(principal, account).await?;
		}
		for resource in &req.add_resources {
			self.ensure_resource(resource).await?;
		}

		check_cancelled(ctx)?;
		let strategy = self
			.store
			.update_strategy(&req)
			.await
			.map_err(|e| match e {
				StoreError::Rejected(msg) => AuthError::InvalidArgument(msg),
				other => other.into(),
			})?
			.ok_or(AuthError::NotFoundPolicy(req.id))?;

		info!(strategy_id = %strategy.id, "strategy updated");
		self.history.record(
			HistoryRecord::builder(HistoryOperation::Update)
				.resource_name(&strategy.name)
				.operator(&operator)
				.detail(&req)
				.build(),
		);
		Ok(strategy)
	}

	#[instrument(skip(self, ctx))]
	pub async fn delete_strategy(&self, ctx: &AuthContext, id: StrategyId) -> AuthResult<()> {
		let operator = require_operator(ctx)?;
		let strategy = self
			.store
			.get_strategy(id)
			.await?
			.ok_or(AuthError::NotFoundPolicy(id))?;

		if strategy.is_default {
			return Err(AuthError::NotAllowedAccess(
				"default strategies cannot be deleted".to_string(),
			));
		}
		if operator.user_id() != Some(strategy.owner) {
			return Err(AuthError::NotAllowedAccess(format!(
				"strategy {id} can only be deleted by its owner"
			)));
		}

		check_cancelled(ctx)?;
		if !self.store.delete_strategy(id).await? {
			return Err(AuthError::NotFoundPolicy(id));
		}

		info!(strategy_id = %id, "strategy deleted");
		self.history.record(
			HistoryRecord::builder(HistoryOperation::Delete)
				.resource_name(&strategy.name)
				.operator(&operator)
				.detail(&json!({ "id": id }))
				.build(),
		);
		Ok(())
	}

	#[instrument(skip(self, ctx))]
	pub async fn get_strategy(&self, ctx: &AuthContext, id: StrategyId) -> AuthResult<Strategy> {
		let operator = require_operator(ctx)?;
		let strategy = self
			.store
			.get_strategy(id)
			.await?
			.ok_or(AuthError::NotFoundPolicy(id))?;

		let visible = if operator.is_admin() {
			true
		} else if operator.is_top_level() {
			operator.user_id() == Some(strategy.owner)
		} else {
			let own = self.own_principals(&operator).await;
			strategy.principals.iter().any(|p| own.contains(p))
		};
		if !visible {
			return Err(AuthError::NotAllowedAccess(format!(
				"strategy {id} is not visible to {}",
				operator.principal
			)));
		}
		Ok(strategy)
	}

	#[instrument(skip(self, ctx, query))]
	pub async fn list_strategies(
		&self,
		ctx: &AuthContext,
		query: StrategyQuery,
	) -> AuthResult<StrategyPage> {
		let operator = require_operator(ctx)?;
		let mut filter = StrategyFilter {
			owner: None,
			principals: query.principal.map(|p| vec![p]),
			resource: query.resource.clone(),
			name: query.name.clone(),
			is_default: query.is_default,
			offset: query.offset,
			limit: query
				.limit
				.unwrap_or(DEFAULT_LIST_LIMIT)
				.clamp(1, MAX_LIST_LIMIT),
		};

		if operator.is_admin() {
			// Admins see every strategy.
		} else if operator.is_top_level() {
			filter.owner = operator.user_id();
		} else if query.resource.is_some() {
			// Resource queries skip principal filtering but stay inside the account.
			filter.owner = operator.account_id();
		} else {
			let own = self.own_principals(&operator).await;
			filter.principals = match query.principal {
				Some(p) if own.contains(&p) => Some(vec![p]),
				Some(_) => return Ok(StrategyPage::default()),
				None => Some(own),
			};
		}

		let (strategies, total) = self.store.list_strategies(&filter).await?;
		Ok(StrategyPage { total, strategies })
	}

	/// Resources granted to `principal` by allow strategies, including those
	/// granted to the groups it belongs to.
	#[instrument(skip(self, ctx), fields(principal = %principal))]
	pub async fn get_principal_resources(
		&self,
		ctx: &AuthContext,
		principal: PrincipalRef,
	) -> AuthResult<PrincipalResources> {
		let operator = require_operator(ctx)?;
		if !operator.is_admin() && operator.principal != principal {
			let account = self.account_of(&principal).await?;
			if !operator.is_top_level() || account.is_none() || account != operator.user_id() {
				return Err(AuthError::NotAllowedAccess(format!(
					"resources of {principal} are not visible"
				)));
			}
		}

		let mut principals = vec![principal];
		if let PrincipalRef::User(id) = principal {
			principals.extend(
				self
					.directory
					.groups_of(id)
					.await
					.into_iter()
					.map(PrincipalRef::Group),
			);
		}
		let filter = StrategyFilter {
			principals: Some(principals),
			limit: usize::MAX,
			..Default::default()
		};
		let (strategies, _) = self.store.list_strategies(&filter).await?;

		let mut out = PrincipalResources::new();
		for strategy in strategies.iter().filter(|s| s.effect == Effect::Allow) {
			for resource in &strategy.resources {
				out
					.entry(resource.resource_type)
					.or_default()
					.insert(resource.id.clone());
			}
		}
		Ok(out)
	}

	/// Keeps default strategies in step with resources created, modified or
	/// deleted elsewhere.
	///
	/// On create the acting operator is linked in addition to the explicitly
	/// linked principals; on delete the resources are purged from every
	/// strategy.
	#[instrument(skip(self, ctx), fields(operation = %ctx.operation()))]
	pub async fn after_resource_operation(&self, ctx: &AuthContext) -> AuthResult<()> {
		let (open, _) = self.config.channel(ctx.is_from_client());
		if !open || !self.config.open_principal_default_policy {
			return Ok(());
		}

		let resources: Vec<StrategyResource> = ctx
			.resource_refs()
			.into_iter()
			.filter(|r| !r.is_wildcard())
			.collect();
		if resources.is_empty() {
			return Ok(());
		}

		let (change, operation) = match ctx.operation() {
			Operation::Read => return Ok(()),
			Operation::Delete => (
				ResourceLinkChange::purge(resources),
				HistoryOperation::PurgeResources,
			),
			op @ (Operation::Create | Operation::Modify) => {
				let attachments = ctx.attachments();
				let mut grant_to: Vec<PrincipalRef> = attachments
					.linked_users
					.iter()
					.map(|id| PrincipalRef::User(*id))
					.chain(attachments.linked_groups.iter().map(|id| PrincipalRef::Group(*id)))
					.collect();
				if op == Operation::Create {
					if let Some(operator) = ctx.operator().filter(|o| !o.anonymous) {
						grant_to.push(operator.principal);
					}
				}
				let revoke_from: Vec<PrincipalRef> = attachments
					.removed_users
					.iter()
					.map(|id| PrincipalRef::User(*id))
					.chain(attachments.removed_groups.iter().map(|id| PrincipalRef::Group(*id)))
					.collect();
				(
					ResourceLinkChange {
						grant_to: dedup(grant_to),
						revoke_from: dedup(revoke_from),
						resources,
						purge: false,
					},
					HistoryOperation::LinkResources,
				)
			}
		};
		if change.is_noop() {
			return Ok(());
		}

		check_cancelled(ctx)?;
		self.store.apply_resource_links(&change).await?;

		let names: Vec<String> = change
			.resources
			.iter()
			.map(|r| format!("{}/{}", r.resource_type, r.id))
			.collect();
		let mut record = HistoryRecord::builder(operation)
			.resource_type(RESOURCE_LINK_RESOURCE_TYPE)
			.resource_name(names.join(","))
			.detail(&json!({
				"grant_to": change.grant_to,
				"revoke_from": change.revoke_from,
				"resources": change.resources,
			}));
		if let Some(operator) = ctx.operator() {
			record = record.operator(operator);
		}
		self.history.record(record.build());
		Ok(())
	}

	/// Creates the default strategy of a new principal. Idempotent.
	#[instrument(skip(self), fields(principal = %principal))]
	pub async fn on_principal_created(
		&self,
		principal: PrincipalRef,
		owner: UserId,
	) -> AuthResult<Strategy> {
		if let Some(existing) = self.store.default_strategy_of(principal).await? {
			return Ok(existing);
		}
		let strategy = Strategy::default_for(principal, owner);
		self.store.create_strategy(&strategy).await?;

		info!(strategy_id = %strategy.id, "default strategy created");
		self.history.record(
			HistoryRecord::builder(HistoryOperation::Create)
				.resource_name(&strategy.name)
				.actor("system")
				.detail(&strategy)
				.build(),
		);
		Ok(strategy)
	}

	/// Sweeps the principal's default strategy and its links everywhere else.
	#[instrument(skip(self), fields(principal = %principal))]
	pub async fn on_principal_deleted(&self, principal: PrincipalRef) -> AuthResult<()> {
		self.store.remove_principal(principal).await?;

		info!("principal removed from strategies");
		self.history.record(
			HistoryRecord::builder(HistoryOperation::Delete)
				.resource_name(principal.to_string())
				.actor("system")
				.detail(&json!({ "principal": principal }))
				.build(),
		);
		Ok(())
	}

	/// The principals a non-admin operator acts as: itself and its groups.
	async fn own_principals(&self, operator: &Operator) -> Vec<PrincipalRef> {
		let mut own = vec![operator.principal];
		if let PrincipalRef::User(id) = operator.principal {
			own.extend(
				self
					.directory
					.groups_of(id)
					.await
					.into_iter()
					.map(PrincipalRef::Group),
			);
		}
		own
	}

	/// The top-level account owning `principal`.
	async fn account_of(&self, principal: &PrincipalRef) -> AuthResult<Option<UserId>> {
		match *principal {
			PrincipalRef::User(id) => {
				let user = self
					.directory
					.get_user(id)
					.await
					.ok_or(AuthError::NotFoundPrincipal(*principal))?;
				Ok(Some(user.owner.unwrap_or(user.id)))
			}
			PrincipalRef::Group(id) => {
				let group = self
					.directory
					.get_group(id)
					.await
					.ok_or(AuthError::NotFoundPrincipal(*principal))?;
				Ok(Some(group.owner))
			}
			PrincipalRef::Role(_) => Ok(None),
		}
	}

	/// Checks a principal reference exists and, when `account` is set, that it
	/// belongs to that account. Roles are not validated.
	async fn ensure_principal(
		&self,
		principal: &PrincipalRef,
		account: Option<UserId>,
	) -> AuthResult<()> {
		let Some(owner) = self.account_of(principal).await? else {
			return Ok(());
		};
		match account {
			Some(account) if account != owner => Err(AuthError::NotAllowedAccess(format!(
				"principal {principal} belongs to another account"
			))),
			_ => Ok(()),
		}
	}

	async fn ensure_resource(&self, resource: &StrategyResource) -> AuthResult<()> {
		if resource.is_wildcard() {
			return Ok(());
		}
		let exists = match resource.resource_type {
			ResourceType::User => match resource.id.parse::<UserId>() {
				Ok(id) => self.directory.get_user(id).await.is_some(),
				Err(_) => false,
			},
			ResourceType::Group => match resource.id.parse::<GroupId>() {
				Ok(id) => self.directory.get_group(id).await.is_some(),
				Err(_) => false,
			},
			other => self.catalog.exists(other, &resource.id).await,
		};
		if exists {
			Ok(())
		} else {
			Err(AuthError::NotFoundResource(format!(
				"{}/{}",
				resource.resource_type, resource.id
			)))
		}
	}
}

fn require_operator(ctx: &AuthContext) -> AuthResult<Operator> {
	ctx
		.operator()
		.filter(|op| !op.anonymous)
		.cloned()
		.ok_or_else(|| {
			AuthError::NotAllowedAccess(
				"strategy management requires an authenticated principal".to_string(),
			)
		})
}

/// The top-level account that owns strategies created by `operator`.
fn owning_account(operator: &Operator) -> AuthResult<UserId> {
	operator.account_id().ok_or_else(|| {
		AuthError::NotAllowedAccess("strategies can only be owned by user accounts".to_string())
	})
}

/// Account the operator may reference principals from; `None` for admins.
fn scope_of(operator: &Operator) -> Option<UserId> {
	if operator.is_admin() {
		None
	} else {
		operator.account_id()
	}
}

fn check_cancelled(ctx: &AuthContext) -> AuthResult<()> {
	if ctx.is_cancelled() {
		Err(AuthError::Cancelled)
	} else {
		Ok(())
	}
}

fn dedup<T: PartialEq>(items: Vec<T>) -> Vec<T> {
	let mut out: Vec<T> = Vec::with_capacity(items.len());
	for item in items {
		if !out.contains(&item) {
			out.push(item);
		}
	}
	out
}
