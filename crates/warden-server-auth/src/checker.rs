// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Permission checker.
//!
//! Per request the checker resolves the credential, applies the maintenance
//! rules or the credible-header bypass, and otherwise evaluates strategies:
//! deny strategies first, then admin, then allow strategies, then (outside
//! strict mode) resources no strategy binds. A denial triggers one forced
//! resync of the strategy snapshot and a full re-evaluation.

use std::collections::BTreeMap;
use std::sync::Arc;

use http::HeaderMap;
use warden_server_config::AuthConfig;

use crate::cache::{SnapshotProvider, StrategySnapshot};
use crate::context::{AuthContext, ResourceEntry};
use crate::error::{AuthError, AuthResult};
use crate::index::PrincipalResourceIndex;
use crate::principal::{Operator, PrincipalDirectory, TokenHolder};
use crate::token::TokenCodec;
use crate::types::{Effect, Module, Operation, PrincipalRef, ResourceType, StrategyId};

/// Why a request was allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
	/// Authorization is not enforced on this channel.
	Unenforced,
	CredibleBypass,
	Maintenance,
	/// The request targets no resources.
	NoResources,
	Admin,
	Policy(StrategyId),
	/// Non-strict mode and no requested resource is bound by any strategy.
	Unbound,
}

enum Verdict {
	Allow(Decision),
	Deny(String),
}

pub struct AuthChecker {
	config: AuthConfig,
	codec: TokenCodec,
	directory: Arc<dyn PrincipalDirectory>,
	cache: Arc<dyn SnapshotProvider>,
}

impl AuthChecker {
	pub fn new(
		config: AuthConfig,
		directory: Arc<dyn PrincipalDirectory>,
		cache: Arc<dyn SnapshotProvider>,
	) -> AuthResult<Self> {
		let codec = TokenCodec::new(config.token_key.as_bytes())?;
		Ok(Self {
			config,
			codec,
			directory,
			cache,
		})
	}

	pub fn config(&self) -> &AuthConfig {
		&self.config
	}

	pub fn codec(&self) -> &TokenCodec {
		&self.codec
	}

	pub fn directory(&self) -> &Arc<dyn PrincipalDirectory> {
		&self.directory
	}

	/// Checks a console request against the console channel settings.
	#[tracing::instrument(skip(self, ctx), fields(method = %ctx.method(), module = %ctx.module(), operation = %ctx.operation()))]
	pub async fn check_console_permission(&self, ctx: &mut AuthContext) -> AuthResult<Decision> {
		self.check(ctx, false).await
	}

	/// Checks a client (SDK) request against the client channel settings.
	#[tracing::instrument(skip(self, ctx), fields(method = %ctx.method(), module = %ctx.module(), operation = %ctx.operation()))]
	pub async fn check_client_permission(&self, ctx: &mut AuthContext) -> AuthResult<Decision> {
		self.check(ctx, true).await
	}

	/// Dispatches on the context's source flag.
	pub async fn check_permission(&self, ctx: &mut AuthContext) -> AuthResult<Decision> {
		if ctx.is_from_client() {
			self.check_client_permission(ctx).await
		} else {
			self.check_console_permission(ctx).await
		}
	}

	async fn check(&self, ctx: &mut AuthContext, from_client: bool) -> AuthResult<Decision> {
		let (open, strict) = self.config.channel(from_client);
		if !open {
			let operator = match self.resolve_operator(ctx.token()).await {
				Ok(operator) => operator,
				Err(_) => Operator::anonymous(),
			};
			ctx.set_operator(operator);
			return Ok(Decision::Unenforced);
		}

		let credible = self.is_credible(ctx.headers());
		let operator = match self.verify_credential(ctx, strict).await {
			Ok(operator) => operator,
			Err(err) if credible && ctx.module() != Module::Maintain => {
				tracing::debug!(error = %err, "credential rejected, continuing as credible caller");
				Operator::anonymous()
			}
			Err(err) => {
				tracing::debug!(error = %err, "credential rejected");
				return Err(err);
			}
		};
		ctx.set_operator(operator.clone());

		if ctx.module() == Module::Maintain {
			return check_maintenance(ctx.operation(), &operator);
		}
		if credible {
			tracing::debug!("credible headers matched, skipping evaluation");
			return Ok(Decision::CredibleBypass);
		}
		if !ctx.has_resources() {
			return Ok(Decision::NoResources);
		}

		if let Verdict::Allow(decision) = self.evaluate(ctx, &operator, strict).await {
			tracing::debug!(?decision, "allowed");
			return Ok(decision);
		}

		if ctx.is_cancelled() {
			return Err(AuthError::Cancelled);
		}
		self.cache.force_sync().await?;

		match self.evaluate(ctx, &operator, strict).await {
			Verdict::Allow(decision) => {
				tracing::debug!(?decision, "allowed after resync");
				Ok(decision)
			}
			Verdict::Deny(reason) => {
				tracing::debug!(%reason, principal = %operator.principal, "denied");
				Err(AuthError::NotAllowedAccess(reason))
			}
		}
	}

	/// Resolves the operator and applies the disabled and anonymous rules.
	pub async fn verify_credential(&self, ctx: &AuthContext, strict: bool) -> AuthResult<Operator> {
		let result = self.resolve_operator(ctx.token()).await.and_then(|operator| {
			let maintenance_read = ctx.module() == Module::Maintain && ctx.operation().is_read();
			if operator.disabled && !maintenance_read {
				Err(AuthError::TokenDisabled)
			} else {
				Ok(operator)
			}
		});

		match result {
			Err(err) if may_downgrade(ctx, strict, &err) => {
				tracing::debug!(error = %err, "downgrading to anonymous operator");
				Ok(Operator::anonymous())
			}
			other => other,
		}
	}

	/// Decodes the token and looks up its holder, refreshing the directory
	/// once if the holder is not visible yet.
	async fn resolve_operator(&self, token: &str) -> AuthResult<Operator> {
		match self.codec.decode(token)? {
			PrincipalRef::User(id) => {
				let user = match self.directory.get_user(id).await {
					Some(user) => user,
					None => {
						self.directory.refresh().await?;
						self
							.directory
							.get_user(id)
							.await
							.ok_or(AuthError::NoSuchPrincipal(id))?
					}
				};
				holder_operator(&user, token)
			}
			PrincipalRef::Group(id) => {
				let group = match self.directory.get_group(id).await {
					Some(group) => group,
					None => {
						self.directory.refresh().await?;
						self
							.directory
							.get_group(id)
							.await
							.ok_or(AuthError::NoSuchGroup(id))?
					}
				};
				holder_operator(&group, token)
			}
			PrincipalRef::Role(_) => Err(AuthError::TokenInvalid),
		}
	}

	/// True when credible headers are configured and all of them match.
	pub fn is_credible(&self, headers: &HeaderMap) -> bool {
		!self.config.credible_headers.is_empty()
			&& self.config.credible_headers.iter().all(|(name, expected)| {
				headers
					.get(name.as_str())
					.and_then(|value| value.to_str().ok())
					.is_some_and(|value| value == expected)
			})
	}

	/// Filters list responses item by item.
	pub async fn resource_predicate(
		&self,
		ctx: &AuthContext,
		resource_type: ResourceType,
		entry: &ResourceEntry,
	) -> bool {
		let (open, strict) = self.config.channel(ctx.is_from_client());
		if !open || self.is_credible(ctx.headers()) {
			return true;
		}
		let Some(operator) = ctx.operator() else {
			return false;
		};

		let snapshot = self.cache.snapshot().await;
		let index = snapshot.index();
		let principals = self.effective_principals(operator).await;
		let hints: Vec<Option<Effect>> = principals
			.iter()
			.map(|p| index.hint(p, resource_type, &entry.id))
			.collect();

		if hints.contains(&Some(Effect::Deny)) {
			return false;
		}
		if operator.is_admin() || hints.contains(&Some(Effect::Allow)) {
			return true;
		}
		!strict && !index.is_bound(resource_type, &entry.id)
	}

	/// The operator's own principal plus every group it belongs to.
	async fn effective_principals(&self, operator: &Operator) -> Vec<PrincipalRef> {
		if operator.anonymous {
			return Vec::new();
		}
		let mut principals = vec![operator.principal];
		if let PrincipalRef::User(id) = operator.principal {
			principals.extend(
				self
					.directory
					.groups_of(id)
					.await
					.into_iter()
					.map(PrincipalRef::Group),
			);
		}
		principals
	}

	async fn evaluate(&self, ctx: &AuthContext, operator: &Operator, strict: bool) -> Verdict {
		let snapshot = self.cache.snapshot().await;
		let principals = self.effective_principals(operator).await;
		evaluate_snapshot(&snapshot, &principals, operator, ctx, strict)
	}
}

fn holder_operator(holder: &dyn TokenHolder, token: &str) -> AuthResult<Operator> {
	if holder.token() != token {
		return Err(AuthError::TokenNotFound);
	}
	Ok(Operator::from_holder(holder))
}

fn may_downgrade(ctx: &AuthContext, strict: bool, err: &AuthError) -> bool {
	ctx.allow_anonymous()
		&& !strict
		&& err.is_anonymous_eligible()
		&& !matches!(ctx.module(), Module::Auth | Module::Maintain)
}

fn check_maintenance(operation: Operation, operator: &Operator) -> AuthResult<Decision> {
	if operation.is_read() {
		return Ok(Decision::Maintenance);
	}
	if operator.anonymous || !operator.is_user_token() {
		return Err(AuthError::NotAllowedAccess(
			"maintenance writes require a user token".to_string(),
		));
	}
	if operator.disabled {
		return Err(AuthError::TokenDisabled);
	}
	if !operator.role.is_top_level() {
		return Err(AuthError::RoleMismatch);
	}
	Ok(Decision::Maintenance)
}

fn evaluate_snapshot(
	snapshot: &StrategySnapshot,
	principals: &[PrincipalRef],
	operator: &Operator,
	ctx: &AuthContext,
	strict: bool,
) -> Verdict {
	let index = snapshot.index();
	let resources = ctx.resources();
	let applicable = move |effect: Effect| {
		principals.iter().flat_map(move |principal| {
			snapshot
				.strategies_of(principal, effect)
				.into_iter()
				.filter(move |s| s.applies_to(ctx.operation(), ctx.method(), ctx.attributes()))
				.map(move |s| (principal, s))
		})
	};

	for (principal, strategy) in applicable(Effect::Deny) {
		if deny_matches(index, principal, strategy.id, resources) {
			return Verdict::Deny(format!("denied by strategy {}", strategy.name));
		}
	}

	if operator.is_admin() {
		return Verdict::Allow(Decision::Admin);
	}

	for (principal, strategy) in applicable(Effect::Allow) {
		if allow_matches(index, principal, strategy.id, resources) {
			return Verdict::Allow(Decision::Policy(strategy.id));
		}
	}

	let unbound = resources.iter().all(|(resource_type, entries)| {
		entries
			.iter()
			.all(|entry| !index.is_bound(*resource_type, &entry.id))
	});
	if !strict && unbound {
		return Verdict::Allow(Decision::Unbound);
	}

	Verdict::Deny("no matching strategy".to_string())
}

/// Any requested resource covered by the deny strategy.
fn deny_matches(
	index: &PrincipalResourceIndex,
	principal: &PrincipalRef,
	strategy: StrategyId,
	resources: &BTreeMap<ResourceType, Vec<ResourceEntry>>,
) -> bool {
	resources.iter().any(|(resource_type, entries)| {
		entries
			.iter()
			.any(|entry| index.covers(principal, Effect::Deny, strategy, *resource_type, &entry.id))
	})
}

/// Every non-namespace type fully covered; the first type that is not falls
/// back to the namespace entries of the request.
fn allow_matches(
	index: &PrincipalResourceIndex,
	principal: &PrincipalRef,
	strategy: StrategyId,
	resources: &BTreeMap<ResourceType, Vec<ResourceEntry>>,
) -> bool {
	let covered = |resource_type: ResourceType, entries: &[ResourceEntry]| {
		entries
			.iter()
			.all(|entry| index.covers(principal, Effect::Allow, strategy, resource_type, &entry.id))
	};
	let namespace_covered = || {
		resources
			.get(&ResourceType::Namespace)
			.is_some_and(|entries| !entries.is_empty() && covered(ResourceType::Namespace, entries))
	};

	let mut checked_other = false;
	for (resource_type, entries) in resources {
		if *resource_type == ResourceType::Namespace || entries.is_empty() {
			continue;
		}
		checked_other = true;
		if !covered(*resource_type, entries) {
			return namespace_covered();
		}
	}
	checked_other || namespace_covered()
}
