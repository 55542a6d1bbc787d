// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Principal resource index.
//!
//! For every principal and effect the index maps `(resource type, resource id)`
//! to the set of strategies referencing it. Membership is counted per strategy
//! so removing one strategy's grant leaves another strategy's grant of the same
//! resource intact. A `*` id covers every id of its type.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::strategy::{PrincipalResources, Strategy, StrategyResource, WILDCARD_RESOURCE_ID};
use crate::types::{Effect, PrincipalRef, ResourceType, StrategyId};

type Referrers = HashSet<StrategyId>;

#[derive(Debug, Default, Clone)]
struct ResourceRefs {
	by_type: HashMap<ResourceType, HashMap<String, Referrers>>,
}

impl ResourceRefs {
	fn save(&mut self, resource_type: ResourceType, id: &str, strategy: StrategyId) {
		self
			.by_type
			.entry(resource_type)
			.or_default()
			.entry(id.to_string())
			.or_default()
			.insert(strategy);
	}

	fn del(&mut self, resource_type: ResourceType, id: &str, strategy: StrategyId) {
		let Some(ids) = self.by_type.get_mut(&resource_type) else {
			return;
		};
		if let Some(referrers) = ids.get_mut(id) {
			referrers.remove(&strategy);
			if referrers.is_empty() {
				ids.remove(id);
			}
		}
		if ids.is_empty() {
			self.by_type.remove(&resource_type);
		}
	}

	fn referrers(&self, resource_type: ResourceType, id: &str) -> Option<&Referrers> {
		self.by_type.get(&resource_type)?.get(id)
	}

	/// Exact id or wildcard hit by any strategy.
	fn hit(&self, resource_type: ResourceType, id: &str) -> bool {
		self.referrers(resource_type, id).is_some()
			|| self.referrers(resource_type, WILDCARD_RESOURCE_ID).is_some()
	}

	/// Exact id or wildcard hit by `strategy`.
	fn covers(&self, resource_type: ResourceType, id: &str, strategy: StrategyId) -> bool {
		[id, WILDCARD_RESOURCE_ID].iter().any(|candidate| {
			self
				.referrers(resource_type, candidate)
				.is_some_and(|referrers| referrers.contains(&strategy))
		})
	}

	fn is_empty(&self) -> bool {
		self.by_type.is_empty()
	}
}

#[derive(Debug, Default, Clone)]
struct PrincipalEntry {
	allow: ResourceRefs,
	deny: ResourceRefs,
}

impl PrincipalEntry {
	fn refs(&self, effect: Effect) -> &ResourceRefs {
		match effect {
			Effect::Allow => &self.allow,
			Effect::Deny => &self.deny,
		}
	}

	fn refs_mut(&mut self, effect: Effect) -> &mut ResourceRefs {
		match effect {
			Effect::Allow => &mut self.allow,
			Effect::Deny => &mut self.deny,
		}
	}
}

#[derive(Debug, Default, Clone)]
pub struct PrincipalResourceIndex {
	principals: HashMap<PrincipalRef, PrincipalEntry>,
	/// Explicit (non-wildcard) ids referenced by any strategy, per binding.
	bound: HashMap<(ResourceType, String), HashSet<(StrategyId, PrincipalRef)>>,
}

impl PrincipalResourceIndex {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn from_strategies<'a>(strategies: impl IntoIterator<Item = &'a Strategy>) -> Self {
		let mut index = Self::new();
		for strategy in strategies {
			index.insert_strategy(strategy);
		}
		index
	}

	pub fn save_resource(
		&mut self,
		principal: PrincipalRef,
		effect: Effect,
		resource: &StrategyResource,
		strategy: StrategyId,
	) {
		self
			.principals
			.entry(principal)
			.or_default()
			.refs_mut(effect)
			.save(resource.resource_type, &resource.id, strategy);
		if !resource.is_wildcard() {
			self
				.bound
				.entry((resource.resource_type, resource.id.clone()))
				.or_default()
				.insert((strategy, principal));
		}
	}

	pub fn del_resource(
		&mut self,
		principal: PrincipalRef,
		effect: Effect,
		resource: &StrategyResource,
		strategy: StrategyId,
	) {
		if let Some(entry) = self.principals.get_mut(&principal) {
			entry
				.refs_mut(effect)
				.del(resource.resource_type, &resource.id, strategy);
			if entry.allow.is_empty() && entry.deny.is_empty() {
				self.principals.remove(&principal);
			}
		}
		let key = (resource.resource_type, resource.id.clone());
		if let Some(bindings) = self.bound.get_mut(&key) {
			bindings.remove(&(strategy, principal));
			if bindings.is_empty() {
				self.bound.remove(&key);
			}
		}
	}

	pub fn insert_strategy(&mut self, strategy: &Strategy) {
		for principal in &strategy.principals {
			for resource in &strategy.resources {
				self.save_resource(*principal, strategy.effect, resource, strategy.id);
			}
		}
	}

	pub fn remove_strategy(&mut self, strategy: &Strategy) {
		for principal in &strategy.principals {
			for resource in &strategy.resources {
				self.del_resource(*principal, strategy.effect, resource, strategy.id);
			}
		}
	}

	/// Deny first, then allow, else no opinion.
	pub fn hint(&self, principal: &PrincipalRef, resource_type: ResourceType, id: &str) -> Option<Effect> {
		let entry = self.principals.get(principal)?;
		if entry.deny.hit(resource_type, id) {
			Some(Effect::Deny)
		} else if entry.allow.hit(resource_type, id) {
			Some(Effect::Allow)
		} else {
			None
		}
	}

	/// Whether `strategy` grants (or denies) `principal` the resource.
	pub fn covers(
		&self,
		principal: &PrincipalRef,
		effect: Effect,
		strategy: StrategyId,
		resource_type: ResourceType,
		id: &str,
	) -> bool {
		self
			.principals
			.get(principal)
			.is_some_and(|entry| entry.refs(effect).covers(resource_type, id, strategy))
	}

	/// Whether any strategy references this exact id. Wildcards do not bind.
	pub fn is_bound(&self, resource_type: ResourceType, id: &str) -> bool {
		self.bound.contains_key(&(resource_type, id.to_string()))
	}

	/// Number of strategies referencing the exact resource for the principal.
	pub fn ref_count(
		&self,
		principal: &PrincipalRef,
		effect: Effect,
		resource_type: ResourceType,
		id: &str,
	) -> usize {
		self
			.principals
			.get(principal)
			.and_then(|entry| entry.refs(effect).referrers(resource_type, id))
			.map_or(0, HashSet::len)
	}

	pub fn resources_of(&self, principal: &PrincipalRef, effect: Effect) -> PrincipalResources {
		let mut out: PrincipalResources = BTreeMap::new();
		if let Some(entry) = self.principals.get(principal) {
			for (resource_type, ids) in &entry.refs(effect).by_type {
				out
					.entry(*resource_type)
					.or_insert_with(BTreeSet::new)
					.extend(ids.keys().cloned());
			}
		}
		out
	}
}
