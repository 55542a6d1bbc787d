// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Request-handling chain for strategy operations.
//!
//! The chain is `AuthCheckedServer -> ParamCheckedServer -> StrategyServer`.
//! Each stage only calls the next one when its own checks pass.

use std::sync::Arc;

use async_trait::async_trait;

use crate::checker::AuthChecker;
use crate::context::AuthContext;
use crate::error::{AuthError, AuthResult};
use crate::server::StrategyServer;
use crate::strategy::{
	CreateStrategyRequest, PrincipalResources, Strategy, StrategyPage, StrategyQuery,
	UpdateStrategyRequest, DEFAULT_LIST_LIMIT, MAX_LIST_LIMIT,
};
use crate::types::{Module, Operation, PrincipalRef, StrategyId};

pub const MAX_NAME_LEN: usize = 128;
pub const MAX_COMMENT_LEN: usize = 1024;
const RESERVED_NAME_PREFIX: &str = "__default__";

#[async_trait]
pub trait StrategyOperations: Send + Sync {
	async fn create_strategy(
		&self,
		ctx: &mut AuthContext,
		req: CreateStrategyRequest,
	) -> AuthResult<Strategy>;

	async fn update_strategy(
		&self,
		ctx: &mut AuthContext,
		req: UpdateStrategyRequest,
	) -> AuthResult<Strategy>;

	async fn delete_strategy(&self, ctx: &mut AuthContext, id: StrategyId) -> AuthResult<()>;

	async fn get_strategy(&self, ctx: &mut AuthContext, id: StrategyId) -> AuthResult<Strategy>;

	async fn list_strategies(
		&self,
		ctx: &mut AuthContext,
		query: StrategyQuery,
	) -> AuthResult<StrategyPage>;

	async fn get_principal_resources(
		&self,
		ctx: &mut AuthContext,
		principal: PrincipalRef,
	) -> AuthResult<PrincipalResources>;
}

#[async_trait]
impl StrategyOperations for StrategyServer {
	async fn create_strategy(
		&self,
		ctx: &mut AuthContext,
		req: CreateStrategyRequest,
	) -> AuthResult<Strategy> {
		StrategyServer::create_strategy(self, ctx, req).await
	}

	async fn update_strategy(
		&self,
		ctx: &mut AuthContext,
		req: UpdateStrategyRequest,
	) -> AuthResult<Strategy> {
		StrategyServer::update_strategy(self, ctx, req).await
	}

	async fn delete_strategy(&self, ctx: &mut AuthContext, id: StrategyId) -> AuthResult<()> {
		StrategyServer::delete_strategy(self, ctx, id).await
	}

	async fn get_strategy(&self, ctx: &mut AuthContext, id: StrategyId) -> AuthResult<Strategy> {
		StrategyServer::get_strategy(self, ctx, id).await
	}

	async fn list_strategies(
		&self,
		ctx: &mut AuthContext,
		query: StrategyQuery,
	) -> AuthResult<StrategyPage> {
		StrategyServer::list_strategies(self, ctx, query).await
	}

	async fn get_principal_resources(
		&self,
		ctx: &mut AuthContext,
		principal: PrincipalRef,
	) -> AuthResult<PrincipalResources> {
		StrategyServer::get_principal_resources(self, ctx, principal).await
	}
}

/// Validates request parameters before delegating.
pub struct ParamCheckedServer {
	inner: Arc<dyn StrategyOperations>,
}

impl ParamCheckedServer {
	pub fn new(inner: Arc<dyn StrategyOperations>) -> Self {
		Self { inner }
	}
}

pub fn validate_name(name: &str) -> AuthResult<()> {
	if name.is_empty() || name.chars().count() > MAX_NAME_LEN {
		return Err(AuthError::InvalidArgument(format!(
			"strategy name must be 1 to {MAX_NAME_LEN} characters"
		)));
	}
	if !name
		.chars()
		.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
	{
		return Err(AuthError::InvalidArgument(format!(
			"strategy name {name:?} may only contain letters, digits, '_', '.' and '-'"
		)));
	}
	if name.starts_with(RESERVED_NAME_PREFIX) {
		return Err(AuthError::InvalidArgument(format!(
			"strategy names starting with {RESERVED_NAME_PREFIX} are reserved"
		)));
	}
	Ok(())
}

fn validate_comment(comment: &str) -> AuthResult<()> {
	if comment.chars().count() > MAX_COMMENT_LEN {
		return Err(AuthError::InvalidArgument(format!(
			"comment must be at most {MAX_COMMENT_LEN} characters"
		)));
	}
	Ok(())
}

#[async_trait]
impl StrategyOperations for ParamCheckedServer {
	async fn create_strategy(
		&self,
		ctx: &mut AuthContext,
		req: CreateStrategyRequest,
	) -> AuthResult<Strategy> {
		validate_name(&req.name)?;
		validate_comment(&req.comment)?;
		if req.principals.is_empty() {
			return Err(AuthError::InvalidArgument(
				"a strategy needs at least one principal".to_string(),
			));
		}
		if req.functions.iter().any(|f| f.trim().is_empty()) {
			return Err(AuthError::InvalidArgument(
				"function names must not be empty".to_string(),
			));
		}
		if req.resources.iter().any(|r| r.id.is_empty()) {
			return Err(AuthError::InvalidArgument(
				"resource ids must not be empty".to_string(),
			));
		}
		if req.conditions.iter().any(|c| c.key.is_empty()) {
			return Err(AuthError::InvalidArgument(
				"condition keys must not be empty".to_string(),
			));
		}
		self.inner.create_strategy(ctx, req).await
	}

	async fn update_strategy(
		&self,
		ctx: &mut AuthContext,
		req: UpdateStrategyRequest,
	) -> AuthResult<Strategy> {
		if let Some(comment) = &req.comment {
			validate_comment(comment)?;
		}
		if req.add_resources.iter().any(|r| r.id.is_empty()) {
			return Err(AuthError::InvalidArgument(
				"resource ids must not be empty".to_string(),
			));
		}
		self.inner.update_strategy(ctx, req).await
	}

	async fn delete_strategy(&self, ctx: &mut AuthContext, id: StrategyId) -> AuthResult<()> {
		self.inner.delete_strategy(ctx, id).await
	}

	async fn get_strategy(&self, ctx: &mut AuthContext, id: StrategyId) -> AuthResult<Strategy> {
		self.inner.get_strategy(ctx, id).await
	}

	async fn list_strategies(
		&self,
		ctx: &mut AuthContext,
		mut query: StrategyQuery,
	) -> AuthResult<StrategyPage> {
		if query.name.as_ref().is_some_and(|n| n.chars().count() > MAX_NAME_LEN) {
			return Err(AuthError::InvalidArgument(format!(
				"name filter must be at most {MAX_NAME_LEN} characters"
			)));
		}
		query.limit = Some(
			query
				.limit
				.unwrap_or(DEFAULT_LIST_LIMIT)
				.clamp(1, MAX_LIST_LIMIT),
		);
		self.inner.list_strategies(ctx, query).await
	}

	async fn get_principal_resources(
		&self,
		ctx: &mut AuthContext,
		principal: PrincipalRef,
	) -> AuthResult<PrincipalResources> {
		self.inner.get_principal_resources(ctx, principal).await
	}
}

/// Resolves the caller and checks console permissions before delegating.
pub struct AuthCheckedServer {
	inner: Arc<dyn StrategyOperations>,
	checker: Arc<AuthChecker>,
}

impl AuthCheckedServer {
	pub fn new(inner: Arc<dyn StrategyOperations>, checker: Arc<AuthChecker>) -> Self {
		Self { inner, checker }
	}

	async fn authorize(
		&self,
		ctx: &mut AuthContext,
		operation: Operation,
		method: &'static str,
	) -> AuthResult<()> {
		ctx.set_target(operation, Module::Auth, method);
		self.checker.check_console_permission(ctx).await?;
		Ok(())
	}
}

#[async_trait]
impl StrategyOperations for AuthCheckedServer {
	async fn create_strategy(
		&self,
		ctx: &mut AuthContext,
		req: CreateStrategyRequest,
	) -> AuthResult<Strategy> {
		self.authorize(ctx, Operation::Create, "CreateStrategy").await?;
		self.inner.create_strategy(ctx, req).await
	}

	async fn update_strategy(
		&self,
		ctx: &mut AuthContext,
		req: UpdateStrategyRequest,
	) -> AuthResult<Strategy> {
		self.authorize(ctx, Operation::Modify, "UpdateStrategy").await?;
		self.inner.update_strategy(ctx, req).await
	}

	async fn delete_strategy(&self, ctx: &mut AuthContext, id: StrategyId) -> AuthResult<()> {
		self.authorize(ctx, Operation::Delete, "DeleteStrategy").await?;
		self.inner.delete_strategy(ctx, id).await
	}

	async fn get_strategy(&self, ctx: &mut AuthContext, id: StrategyId) -> AuthResult<Strategy> {
		self.authorize(ctx, Operation::Read, "GetStrategy").await?;
		self.inner.get_strategy(ctx, id).await
	}

	async fn list_strategies(
		&self,
		ctx: &mut AuthContext,
		query: StrategyQuery,
	) -> AuthResult<StrategyPage> {
		self.authorize(ctx, Operation::Read, "ListStrategies").await?;
		self.inner.list_strategies(ctx, query).await
	}

	async fn get_principal_resources(
		&self,
		ctx: &mut AuthContext,
		principal: PrincipalRef,
	) -> AuthResult<PrincipalResources> {
		self
			.authorize(ctx, Operation::Read, "GetPrincipalResources")
			.await?;
		self.inner.get_principal_resources(ctx, principal).await
	}
}

/// Composes the full chain around `core`.
pub fn strategy_chain(
	core: Arc<StrategyServer>,
	checker: Arc<AuthChecker>,
) -> Arc<dyn StrategyOperations> {
	let params: Arc<dyn StrategyOperations> = Arc::new(ParamCheckedServer::new(core));
	Arc::new(AuthCheckedServer::new(params, checker))
}
