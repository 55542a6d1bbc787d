// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Strategy (policy) objects and the requests that mutate them.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::types::{AccessLevel, Effect, Operation, PrincipalRef, ResourceType, StrategyId, UserId};

/// Resource id matching every resource of its type.
pub const WILDCARD_RESOURCE_ID: &str = "*";

/// Function name matching every method.
pub const WILDCARD_FUNCTION: &str = "*";

/// A resource referenced by a strategy.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StrategyResource {
	pub resource_type: ResourceType,
	pub id: String,
}

impl StrategyResource {
	pub fn new(resource_type: ResourceType, id: impl Into<String>) -> Self {
		Self {
			resource_type,
			id: id.into(),
		}
	}

	pub fn wildcard(resource_type: ResourceType) -> Self {
		Self::new(resource_type, WILDCARD_RESOURCE_ID)
	}

	pub fn is_wildcard(&self) -> bool {
		self.id == WILDCARD_RESOURCE_ID
	}
}

/// Collapses a resource list: a wildcard entry replaces every other entry of
/// its type, duplicates are dropped and the result is sorted.
pub fn normalize_resources(resources: impl IntoIterator<Item = StrategyResource>) -> Vec<StrategyResource> {
	let mut by_type: BTreeMap<ResourceType, BTreeSet<String>> = BTreeMap::new();
	for resource in resources {
		by_type
			.entry(resource.resource_type)
			.or_default()
			.insert(resource.id);
	}
	by_type
		.into_iter()
		.flat_map(|(resource_type, ids)| {
			let ids: Vec<String> = if ids.contains(WILDCARD_RESOURCE_ID) {
				vec![WILDCARD_RESOURCE_ID.to_string()]
			} else {
				ids.into_iter().collect()
			};
			ids
				.into_iter()
				.map(move |id| StrategyResource { resource_type, id })
		})
		.collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
	StringEqual,
	StringNotEqual,
	/// `value` is a comma separated list; matches if the attribute equals any item.
	ForAnyValue,
}

/// A fixed-operator test against the request attribute map.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Condition {
	pub key: String,
	pub value: String,
	pub operator: ConditionOperator,
}

impl Condition {
	pub fn matches(&self, attributes: &BTreeMap<String, String>) -> bool {
		let actual = attributes.get(&self.key).map(String::as_str);
		match self.operator {
			ConditionOperator::StringEqual => actual == Some(self.value.as_str()),
			ConditionOperator::StringNotEqual => actual != Some(self.value.as_str()),
			ConditionOperator::ForAnyValue => actual.is_some_and(|actual| {
				self.value.split(',').any(|candidate| candidate.trim() == actual)
			}),
		}
	}
}

/// A named allow or deny rule binding principals to resources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Strategy {
	pub id: StrategyId,
	pub name: String,
	pub comment: String,
	pub effect: Effect,
	pub access: AccessLevel,
	pub owner: UserId,
	pub is_default: bool,
	pub principals: Vec<PrincipalRef>,
	pub resources: Vec<StrategyResource>,
	pub functions: Vec<String>,
	pub conditions: Vec<Condition>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

impl Strategy {
	/// The default strategy auto-created alongside `principal`.
	pub fn default_for(principal: PrincipalRef, owner: UserId) -> Self {
		let now = Utc::now();
		Self {
			id: StrategyId::generate(),
			name: default_strategy_name(&principal),
			comment: format!("default strategy for {principal}"),
			effect: Effect::Allow,
			access: AccessLevel::ReadWrite,
			owner,
			is_default: true,
			principals: vec![principal],
			resources: Vec::new(),
			functions: vec![WILDCARD_FUNCTION.to_string()],
			conditions: Vec::new(),
			created_at: now,
			updated_at: now,
		}
	}

	/// The principal a default strategy belongs to.
	pub fn default_principal(&self) -> Option<PrincipalRef> {
		if self.is_default {
			self.principals.first().copied()
		} else {
			None
		}
	}

	/// True for the default strategy of a top-level account.
	pub fn is_owner_default(&self) -> bool {
		self.default_principal() == Some(PrincipalRef::User(self.owner))
	}

	pub fn has_principal(&self, principal: &PrincipalRef) -> bool {
		self.principals.contains(principal)
	}

	/// Whether the strategy's access level, functions and conditions admit the
	/// request. Resource coverage is checked separately against the index.
	pub fn applies_to(
		&self,
		operation: Operation,
		method: &str,
		attributes: &BTreeMap<String, String>,
	) -> bool {
		// Deny strategies block regardless of their access level.
		let access_ok = self.effect == Effect::Deny || self.access.covers(operation);
		let function_ok = self
			.functions
			.iter()
			.any(|f| f == WILDCARD_FUNCTION || f == method);
		access_ok && function_ok && self.conditions.iter().all(|c| c.matches(attributes))
	}
}

pub fn default_strategy_name(principal: &PrincipalRef) -> String {
	format!("__default__{}_{}", principal.kind(), principal.uuid())
}

/// Input for creating a non-default strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateStrategyRequest {
	pub name: String,
	#[serde(default)]
	pub comment: String,
	pub effect: Effect,
	#[serde(default)]
	pub access: AccessLevel,
	pub principals: Vec<PrincipalRef>,
	#[serde(default)]
	pub resources: Vec<StrategyResource>,
	#[serde(default = "default_functions")]
	pub functions: Vec<String>,
	#[serde(default)]
	pub conditions: Vec<Condition>,
}

fn default_functions() -> Vec<String> {
	vec![WILDCARD_FUNCTION.to_string()]
}

/// Incremental change to an existing strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateStrategyRequest {
	pub id: StrategyId,
	#[serde(default)]
	pub comment: Option<String>,
	#[serde(default)]
	pub add_principals: Vec<PrincipalRef>,
	#[serde(default)]
	pub remove_principals: Vec<PrincipalRef>,
	#[serde(default)]
	pub add_resources: Vec<StrategyResource>,
	#[serde(default)]
	pub remove_resources: Vec<StrategyResource>,
}

impl UpdateStrategyRequest {
	pub fn new(id: StrategyId) -> Self {
		Self {
			id,
			comment: None,
			add_principals: Vec::new(),
			remove_principals: Vec::new(),
			add_resources: Vec::new(),
			remove_resources: Vec::new(),
		}
	}

	pub fn touches_principals(&self) -> bool {
		!self.add_principals.is_empty() || !self.remove_principals.is_empty()
	}

	/// Applies the edit to the current state of `strategy`.
	///
	/// Stores call this on the copy read inside their write transaction, so
	/// links written by other requests since the caller last read the
	/// strategy survive.
	pub fn apply_to(&self, strategy: &mut Strategy, now: DateTime<Utc>) -> Result<(), StoreError> {
		if let Some(comment) = &self.comment {
			strategy.comment = comment.clone();
		}
		for principal in &self.add_principals {
			if !strategy.principals.contains(principal) {
				strategy.principals.push(*principal);
			}
		}
		strategy
			.principals
			.retain(|p| !self.remove_principals.contains(p));
		if strategy.principals.is_empty() {
			return Err(StoreError::Rejected(
				"a strategy needs at least one principal".to_string(),
			));
		}

		let mut resources = std::mem::take(&mut strategy.resources);
		resources.extend(self.add_resources.iter().cloned());
		strategy.resources = normalize_resources(resources)
			.into_iter()
			.filter(|r| !self.remove_resources.contains(r))
			.collect();
		strategy.updated_at = now;
		Ok(())
	}
}

pub const DEFAULT_LIST_LIMIT: usize = 20;
pub const MAX_LIST_LIMIT: usize = 100;

/// Caller-facing list query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyQuery {
	pub principal: Option<PrincipalRef>,
	pub resource: Option<StrategyResource>,
	/// Substring match on the strategy name.
	pub name: Option<String>,
	pub is_default: Option<bool>,
	#[serde(default)]
	pub offset: usize,
	pub limit: Option<usize>,
}

/// Store-level filter produced from a query after visibility rules.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StrategyFilter {
	pub owner: Option<UserId>,
	/// Strategies containing any of these principals.
	pub principals: Option<Vec<PrincipalRef>>,
	pub resource: Option<StrategyResource>,
	pub name: Option<String>,
	pub is_default: Option<bool>,
	pub offset: usize,
	pub limit: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyPage {
	pub total: u64,
	pub strategies: Vec<Strategy>,
}

/// Resources reachable by a principal through its allow strategies.
pub type PrincipalResources = BTreeMap<ResourceType, BTreeSet<String>>;

#[cfg(test)]
mod tests {
	use super::*;

	fn attrs(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
		pairs
			.iter()
			.map(|(k, v)| (k.to_string(), v.to_string()))
			.collect()
	}

	#[test]
	fn wildcard_collapses_its_type_only() {
		let resources = normalize_resources(vec![
			StrategyResource::new(ResourceType::Service, "a"),
			StrategyResource::wildcard(ResourceType::Service),
			StrategyResource::new(ResourceType::Service, "b"),
			StrategyResource::new(ResourceType::Namespace, "prod"),
			StrategyResource::new(ResourceType::Namespace, "prod"),
		]);
		assert_eq!(
			resources,
			vec![
				StrategyResource::new(ResourceType::Namespace, "prod"),
				StrategyResource::wildcard(ResourceType::Service),
			]
		);
	}

	#[test]
	fn conditions_match_attributes() {
		let eq = Condition {
			key: "region".into(),
			value: "east".into(),
			operator: ConditionOperator::StringEqual,
		};
		let ne = Condition {
			operator: ConditionOperator::StringNotEqual,
			..eq.clone()
		};
		let any = Condition {
			value: "west, east".into(),
			operator: ConditionOperator::ForAnyValue,
			..eq.clone()
		};
		let east = attrs(&[("region", "east")]);
		let none = attrs(&[]);
		assert!(eq.matches(&east));
		assert!(!eq.matches(&none));
		assert!(!ne.matches(&east));
		assert!(ne.matches(&none));
		assert!(any.matches(&east));
		assert!(!any.matches(&attrs(&[("region", "north")])));
	}

	#[test]
	fn read_only_strategy_does_not_apply_to_writes() {
		let mut strategy = Strategy::default_for(PrincipalRef::User(UserId::generate()), UserId::generate());
		strategy.access = AccessLevel::ReadOnly;
		assert!(strategy.applies_to(Operation::Read, "GetService", &BTreeMap::new()));
		assert!(!strategy.applies_to(Operation::Modify, "UpdateService", &BTreeMap::new()));

		strategy.effect = Effect::Deny;
		assert!(strategy.applies_to(Operation::Modify, "UpdateService", &BTreeMap::new()));
	}

	#[test]
	fn functions_restrict_methods() {
		let mut strategy = Strategy::default_for(PrincipalRef::User(UserId::generate()), UserId::generate());
		strategy.functions = vec!["GetService".into()];
		assert!(strategy.applies_to(Operation::Read, "GetService", &BTreeMap::new()));
		assert!(!strategy.applies_to(Operation::Read, "ListServices", &BTreeMap::new()));
	}

	#[test]
	fn update_keeps_resources_it_does_not_name() {
		let user = UserId::generate();
		let mut strategy = Strategy::default_for(PrincipalRef::User(user), user);
		strategy.resources = vec![
			StrategyResource::new(ResourceType::Service, "granted-meanwhile"),
			StrategyResource::new(ResourceType::Service, "old"),
		];
		let mut req = UpdateStrategyRequest::new(strategy.id);
		req.add_resources = vec![StrategyResource::new(ResourceType::Service, "new")];
		req.remove_resources = vec![StrategyResource::new(ResourceType::Service, "old")];

		let now = Utc::now();
		req.apply_to(&mut strategy, now).unwrap();
		assert_eq!(
			strategy.resources,
			vec![
				StrategyResource::new(ResourceType::Service, "granted-meanwhile"),
				StrategyResource::new(ResourceType::Service, "new"),
			]
		);
		assert_eq!(strategy.updated_at, now);
	}

	#[test]
	fn update_cannot_remove_the_last_principal() {
		let user = UserId::generate();
		let mut strategy = Strategy::default_for(PrincipalRef::User(user), user);
		let mut req = UpdateStrategyRequest::new(strategy.id);
		req.remove_principals = vec![PrincipalRef::User(user)];

		let err = req.apply_to(&mut strategy, Utc::now()).unwrap_err();
		assert!(matches!(err, StoreError::Rejected(_)));
	}

	#[test]
	fn owner_default_is_detected() {
		let owner = UserId::generate();
		let own = Strategy::default_for(PrincipalRef::User(owner), owner);
		assert!(own.is_owner_default());
		let sub = Strategy::default_for(PrincipalRef::User(UserId::generate()), owner);
		assert!(!sub.is_owner_default());
		assert!(sub.name.starts_with("__default__user_"));
	}
}
