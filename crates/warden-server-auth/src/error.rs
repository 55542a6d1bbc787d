// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for authorization.

use thiserror::Error;

use crate::types::{GroupId, PrincipalRef, StrategyId, UserId};

/// Errors surfaced by the checker and the strategy server.
///
/// The transport layer maps these to user-visible status codes.
#[derive(Debug, Error)]
pub enum AuthError {
	#[error("token invalid")]
	TokenInvalid,

	#[error("token not found")]
	TokenNotFound,

	#[error("token disabled")]
	TokenDisabled,

	#[error("no such principal: {0}")]
	NoSuchPrincipal(UserId),

	#[error("no such group: {0}")]
	NoSuchGroup(GroupId),

	#[error("access not allowed: {0}")]
	NotAllowedAccess(String),

	#[error("strategy not found: {0}")]
	NotFoundPolicy(StrategyId),

	#[error("principals of a default strategy cannot be changed")]
	DefaultPolicyPrincipalImmutable,

	#[error("the default strategy of a top-level account cannot be changed")]
	OwnerDefaultPolicyImmutable,

	#[error("operation requires an owner role")]
	RoleMismatch,

	#[error("invalid argument: {0}")]
	InvalidArgument(String),

	#[error("strategy name already exists: {0}")]
	PolicyNameExists(String),

	#[error("principal not found: {0}")]
	NotFoundPrincipal(PrincipalRef),

	#[error("resource not found: {0}")]
	NotFoundResource(String),

	#[error("request cancelled")]
	Cancelled,

	#[error("store error: {0}")]
	Store(#[from] StoreError),

	#[error("crypto error: {0}")]
	Crypto(String),
}

impl AuthError {
	/// Credential failures that may be downgraded to an anonymous operator.
	pub fn is_anonymous_eligible(&self) -> bool {
		matches!(self, Self::TokenInvalid | Self::TokenNotFound)
	}

	pub fn is_denial(&self) -> bool {
		matches!(self, Self::NotAllowedAccess(_))
	}
}

/// Errors reported by the backing store and directory collaborators.
#[derive(Debug, Error)]
pub enum StoreError {
	#[error("backend unavailable: {0}")]
	Unavailable(String),

	#[error("conflict: {0}")]
	Conflict(String),

	#[error("corrupt record: {0}")]
	Corrupt(String),

	/// The requested change would leave the record invalid.
	#[error("rejected: {0}")]
	Rejected(String),

	#[error("store error: {0}")]
	Internal(String),
}

pub type AuthResult<T> = Result<T, AuthError>;
