// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Request-scoped authorization context.
//!
//! One [`AuthContext`] is built per request by the transport layer and handed
//! by `&mut` through the pipeline stages. Stages communicate derived facts via
//! the typed [`Attachments`] instead of re-querying collaborators.

use std::collections::BTreeMap;

use http::HeaderMap;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use zeroize::Zeroizing;

use crate::principal::Operator;
use crate::strategy::StrategyResource;
use crate::types::{GroupId, Module, Operation, ResourceType, UserId};

/// One addressable object targeted by a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceEntry {
	pub id: String,
	pub owner: Option<UserId>,
	#[serde(default)]
	pub metadata: BTreeMap<String, String>,
}

impl ResourceEntry {
	pub fn new(id: impl Into<String>) -> Self {
		Self {
			id: id.into(),
			owner: None,
			metadata: BTreeMap::new(),
		}
	}

	pub fn with_owner(mut self, owner: UserId) -> Self {
		self.owner = Some(owner);
		self
	}
}

/// Facts derived by one stage for later stages.
#[derive(Debug, Clone, Default)]
pub struct Attachments {
	/// Set by the checker once the credential is resolved.
	pub operator: Option<Operator>,
	/// Principals to link to the touched resources (post-resource hook).
	pub linked_users: Vec<UserId>,
	pub linked_groups: Vec<GroupId>,
	/// Principals whose default strategies should drop the touched resources.
	pub removed_users: Vec<UserId>,
	pub removed_groups: Vec<GroupId>,
}

pub struct AuthContext {
	operation: Operation,
	module: Module,
	method: String,
	resources: BTreeMap<ResourceType, Vec<ResourceEntry>>,
	attachments: Attachments,
	from_client: bool,
	allow_anonymous: bool,
	token: Zeroizing<String>,
	headers: HeaderMap,
	attributes: BTreeMap<String, String>,
	cancellation: CancellationToken,
}

impl std::fmt::Debug for AuthContext {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("AuthContext")
			.field("operation", &self.operation)
			.field("module", &self.module)
			.field("method", &self.method)
			.field("resources", &self.resources)
			.field("attachments", &self.attachments)
			.field("from_client", &self.from_client)
			.field("allow_anonymous", &self.allow_anonymous)
			.field("token", &"[REDACTED]")
			.finish_non_exhaustive()
	}
}

impl AuthContext {
	pub fn builder() -> AuthContextBuilder {
		AuthContextBuilder::default()
	}

	pub fn operation(&self) -> Operation {
		self.operation
	}

	pub fn module(&self) -> Module {
		self.module
	}

	pub fn method(&self) -> &str {
		&self.method
	}

	pub fn resources(&self) -> &BTreeMap<ResourceType, Vec<ResourceEntry>> {
		&self.resources
	}

	pub fn has_resources(&self) -> bool {
		self.resources.values().any(|entries| !entries.is_empty())
	}

	/// Every requested resource as a strategy reference.
	pub fn resource_refs(&self) -> Vec<StrategyResource> {
		self
			.resources
			.iter()
			.flat_map(|(resource_type, entries)| {
				entries
					.iter()
					.map(|entry| StrategyResource::new(*resource_type, entry.id.clone()))
			})
			.collect()
	}

	pub fn attachments(&self) -> &Attachments {
		&self.attachments
	}

	pub fn attachments_mut(&mut self) -> &mut Attachments {
		&mut self.attachments
	}

	pub fn operator(&self) -> Option<&Operator> {
		self.attachments.operator.as_ref()
	}

	pub fn set_operator(&mut self, operator: Operator) {
		self.attachments.operator = Some(operator);
	}

	pub fn is_from_client(&self) -> bool {
		self.from_client
	}

	pub fn allow_anonymous(&self) -> bool {
		self.allow_anonymous
	}

	pub fn token(&self) -> &str {
		&self.token
	}

	pub fn headers(&self) -> &HeaderMap {
		&self.headers
	}

	pub fn attributes(&self) -> &BTreeMap<String, String> {
		&self.attributes
	}

	pub fn cancellation(&self) -> &CancellationToken {
		&self.cancellation
	}

	pub fn is_cancelled(&self) -> bool {
		self.cancellation.is_cancelled()
	}

	/// Re-targets the context, used by wrappers that know the exact call.
	pub fn set_target(&mut self, operation: Operation, module: Module, method: impl Into<String>) {
		self.operation = operation;
		self.module = module;
		self.method = method.into();
	}

	pub fn add_resource(&mut self, resource_type: ResourceType, entry: ResourceEntry) {
		self.resources.entry(resource_type).or_default().push(entry);
	}
}

/// Builder for [`AuthContext`]. Defaults to a console read in the core module.
pub struct AuthContextBuilder {
	operation: Operation,
	module: Module,
	method: String,
	resources: BTreeMap<ResourceType, Vec<ResourceEntry>>,
	attachments: Attachments,
	from_client: bool,
	allow_anonymous: bool,
	token: Zeroizing<String>,
	headers: HeaderMap,
	attributes: BTreeMap<String, String>,
	cancellation: Option<CancellationToken>,
}

impl Default for AuthContextBuilder {
	fn default() -> Self {
		Self {
			operation: Operation::Read,
			module: Module::Core,
			method: String::new(),
			resources: BTreeMap::new(),
			attachments: Attachments::default(),
			from_client: false,
			allow_anonymous: false,
			token: Zeroizing::new(String::new()),
			headers: HeaderMap::new(),
			attributes: BTreeMap::new(),
			cancellation: None,
		}
	}
}

impl AuthContextBuilder {
	pub fn operation(mut self, operation: Operation) -> Self {
		self.operation = operation;
		self
	}

	pub fn module(mut self, module: Module) -> Self {
		self.module = module;
		self
	}

	pub fn method(mut self, method: impl Into<String>) -> Self {
		self.method = method.into();
		self
	}

	pub fn resource(mut self, resource_type: ResourceType, entry: ResourceEntry) -> Self {
		self.resources.entry(resource_type).or_default().push(entry);
		self
	}

	pub fn resources(
		mut self,
		resource_type: ResourceType,
		entries: impl IntoIterator<Item = ResourceEntry>,
	) -> Self {
		self.resources.entry(resource_type).or_default().extend(entries);
		self
	}

	pub fn from_client(mut self, from_client: bool) -> Self {
		self.from_client = from_client;
		self
	}

	pub fn allow_anonymous(mut self, allow: bool) -> Self {
		self.allow_anonymous = allow;
		self
	}

	pub fn token(mut self, token: impl Into<String>) -> Self {
		self.token = Zeroizing::new(token.into());
		self
	}

	pub fn headers(mut self, headers: HeaderMap) -> Self {
		self.headers = headers;
		self
	}

	pub fn attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.attributes.insert(key.into(), value.into());
		self
	}

	pub fn linked_users(mut self, users: impl IntoIterator<Item = UserId>) -> Self {
		self.attachments.linked_users.extend(users);
		self
	}

	pub fn linked_groups(mut self, groups: impl IntoIterator<Item = GroupId>) -> Self {
		self.attachments.linked_groups.extend(groups);
		self
	}

	pub fn removed_users(mut self, users: impl IntoIterator<Item = UserId>) -> Self {
		self.attachments.removed_users.extend(users);
		self
	}

	pub fn removed_groups(mut self, groups: impl IntoIterator<Item = GroupId>) -> Self {
		self.attachments.removed_groups.extend(groups);
		self
	}

	pub fn cancellation(mut self, token: CancellationToken) -> Self {
		self.cancellation = Some(token);
		self
	}

	pub fn build(self) -> AuthContext {
		AuthContext {
			operation: self.operation,
			module: self.module,
			method: self.method,
			resources: self.resources,
			attachments: self.attachments,
			from_client: self.from_client,
			allow_anonymous: self.allow_anonymous,
			token: self.token,
			headers: self.headers,
			attributes: self.attributes,
			cancellation: self.cancellation.unwrap_or_default(),
		}
	}
}
