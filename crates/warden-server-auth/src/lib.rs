// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Authorization core for Warden.
//!
//! Decides for every console and client call whether the calling principal
//! may perform an operation on a set of resources, and manages the strategy
//! (policy) objects those decisions are made from.
//!
//! - [`token`]: opaque bearer tokens bound to one user or group
//! - [`context`]: the per-request [`AuthContext`]
//! - [`index`]: reference-counted allow/deny resource index
//! - [`cache`]: snapshot of all strategies plus the index, with forced resync
//! - [`checker`]: the [`AuthChecker`] decision pipeline
//! - [`server`] and [`chain`]: strategy management behind auth and param checks

pub mod cache;
pub mod chain;
pub mod checker;
pub mod context;
pub mod error;
pub mod history;
pub mod index;
pub mod principal;
pub mod registry;
pub mod server;
pub mod store;
pub mod strategy;
pub mod token;
pub mod types;

pub use cache::{SnapshotProvider, StrategyCache, StrategySnapshot};
pub use chain::{strategy_chain, AuthCheckedServer, ParamCheckedServer, StrategyOperations};
pub use checker::{AuthChecker, Decision};
pub use context::{Attachments, AuthContext, AuthContextBuilder, ResourceEntry};
pub use error::{AuthError, AuthResult, StoreError};
pub use history::{HistoryOperation, HistoryRecord, HistorySink, NoopHistorySink};
pub use index::PrincipalResourceIndex;
pub use principal::{Group, MemoryDirectory, Operator, PrincipalDirectory, TokenHolder, User};
pub use registry::AuthRegistry;
pub use server::StrategyServer;
pub use store::{MemoryCatalog, ResourceCatalog, ResourceLinkChange, StrategySource, StrategyStore};
pub use strategy::{
	default_strategy_name, normalize_resources, Condition, ConditionOperator, CreateStrategyRequest,
	PrincipalResources, Strategy, StrategyFilter, StrategyPage, StrategyQuery, StrategyResource,
	UpdateStrategyRequest, WILDCARD_RESOURCE_ID,
};
pub use token::{decode_token, encode_token, TokenCodec};
pub use types::{
	AccessLevel, Effect, GroupId, Module, Operation, PrincipalKind, PrincipalRef, ResourceType,
	RoleId, StrategyId, UserId, UserRole,
};
