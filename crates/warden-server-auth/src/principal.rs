// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Principals, token holders and the directory they are resolved from.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::StoreError;
use crate::types::{GroupId, PrincipalRef, UserId, UserRole};

/// A user account as recorded in the principal directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
	pub id: UserId,
	pub name: String,
	pub role: UserRole,
	/// Owning top-level account. `None` for owners and admins.
	pub owner: Option<UserId>,
	pub token: String,
	pub token_enabled: bool,
}

/// A user group. Groups always belong to a top-level account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
	pub id: GroupId,
	pub name: String,
	pub owner: UserId,
	pub members: BTreeSet<UserId>,
	pub token: String,
	pub token_enabled: bool,
}

/// Capabilities shared by every principal that can hold a bearer token.
pub trait TokenHolder {
	/// The token currently issued to this principal.
	fn token(&self) -> &str;
	fn is_disabled(&self) -> bool;
	/// The top-level account this principal belongs to, if any.
	fn owner_id(&self) -> Option<UserId>;
	fn self_id(&self) -> PrincipalRef;
	fn role(&self) -> UserRole;
}

impl TokenHolder for User {
	fn token(&self) -> &str {
		&self.token
	}

	fn is_disabled(&self) -> bool {
		!self.token_enabled
	}

	fn owner_id(&self) -> Option<UserId> {
		self.owner
	}

	fn self_id(&self) -> PrincipalRef {
		PrincipalRef::User(self.id)
	}

	fn role(&self) -> UserRole {
		self.role
	}
}

impl TokenHolder for Group {
	fn token(&self) -> &str {
		&self.token
	}

	fn is_disabled(&self) -> bool {
		!self.token_enabled
	}

	fn owner_id(&self) -> Option<UserId> {
		Some(self.owner)
	}

	fn self_id(&self) -> PrincipalRef {
		PrincipalRef::Group(self.id)
	}

	fn role(&self) -> UserRole {
		UserRole::SubAccount
	}
}

/// The live identity behind a request. Derived per request, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operator {
	pub principal: PrincipalRef,
	pub role: UserRole,
	pub owner_id: Option<UserId>,
	pub disabled: bool,
	pub anonymous: bool,
}

impl Operator {
	pub fn from_holder(holder: &dyn TokenHolder) -> Self {
		Self {
			principal: holder.self_id(),
			role: holder.role(),
			owner_id: holder.owner_id(),
			disabled: holder.is_disabled(),
			anonymous: false,
		}
	}

	/// The identity used when a missing or unusable token is downgraded.
	pub fn anonymous() -> Self {
		Self {
			principal: PrincipalRef::User(UserId::new(Uuid::nil())),
			role: UserRole::SubAccount,
			owner_id: None,
			disabled: false,
			anonymous: true,
		}
	}

	pub fn is_user_token(&self) -> bool {
		matches!(self.principal, PrincipalRef::User(_))
	}

	pub fn user_id(&self) -> Option<UserId> {
		match self.principal {
			PrincipalRef::User(id) if !self.anonymous => Some(id),
			_ => None,
		}
	}

	pub fn is_admin(&self) -> bool {
		!self.anonymous && self.role == UserRole::Admin
	}

	/// A non-anonymous owner or admin user.
	pub fn is_top_level(&self) -> bool {
		!self.anonymous && self.is_user_token() && self.role.is_top_level()
	}

	/// The top-level account the operator acts within.
	pub fn account_id(&self) -> Option<UserId> {
		if self.is_top_level() {
			self.user_id()
		} else {
			self.owner_id
		}
	}
}

/// Read-only view of users and groups, owned by the identity subsystem.
#[async_trait]
pub trait PrincipalDirectory: Send + Sync {
	async fn get_user(&self, id: UserId) -> Option<User>;

	async fn get_group(&self, id: GroupId) -> Option<Group>;

	async fn is_user_in_group(&self, user: UserId, group: GroupId) -> bool;

	async fn groups_of(&self, user: UserId) -> Vec<GroupId>;

	/// Reloads the directory from its source of truth.
	async fn refresh(&self) -> Result<(), StoreError>;
}

#[derive(Default)]
struct DirectoryState {
	users: HashMap<UserId, User>,
	groups: HashMap<GroupId, Group>,
}

/// In-process directory.
///
/// Records added with `stage_*` only become visible after [`refresh`], which
/// mirrors a cache that lags its backing store.
///
/// [`refresh`]: PrincipalDirectory::refresh
#[derive(Default)]
pub struct MemoryDirectory {
	visible: RwLock<DirectoryState>,
	staged: RwLock<DirectoryState>,
	refreshes: AtomicUsize,
}

impl MemoryDirectory {
	pub fn new() -> Self {
		Self::default()
	}

	pub async fn insert_user(&self, user: User) {
		self.visible.write().await.users.insert(user.id, user);
	}

	pub async fn insert_group(&self, group: Group) {
		self.visible.write().await.groups.insert(group.id, group);
	}

	pub async fn stage_user(&self, user: User) {
		self.staged.write().await.users.insert(user.id, user);
	}

	pub async fn stage_group(&self, group: Group) {
		self.staged.write().await.groups.insert(group.id, group);
	}

	pub async fn remove_user(&self, id: UserId) -> Option<User> {
		let mut state = self.visible.write().await;
		for group in state.groups.values_mut() {
			group.members.remove(&id);
		}
		state.users.remove(&id)
	}

	pub async fn remove_group(&self, id: GroupId) -> Option<Group> {
		self.visible.write().await.groups.remove(&id)
	}

	pub async fn add_member(&self, group: GroupId, user: UserId) -> bool {
		match self.visible.write().await.groups.get_mut(&group) {
			Some(g) => g.members.insert(user),
			None => false,
		}
	}

	/// Number of times [`PrincipalDirectory::refresh`] has run.
	pub fn refresh_count(&self) -> usize {
		self.refreshes.load(Ordering::Relaxed)
	}
}

#[async_trait]
impl PrincipalDirectory for MemoryDirectory {
	async fn get_user(&self, id: UserId) -> Option<User> {
		self.visible.read().await.users.get(&id).cloned()
	}

	async fn get_group(&self, id: GroupId) -> Option<Group> {
		self.visible.read().await.groups.get(&id).cloned()
	}

	async fn is_user_in_group(&self, user: UserId, group: GroupId) -> bool {
		self
			.visible
			.read()
			.await
			.groups
			.get(&group)
			.is_some_and(|g| g.members.contains(&user))
	}

	async fn groups_of(&self, user: UserId) -> Vec<GroupId> {
		let state = self.visible.read().await;
		let mut groups: Vec<GroupId> = state
			.groups
			.values()
			.filter(|g| g.members.contains(&user))
			.map(|g| g.id)
			.collect();
		groups.sort();
		groups
	}

	async fn refresh(&self) -> Result<(), StoreError> {
		self.refreshes.fetch_add(1, Ordering::Relaxed);
		let staged = std::mem::take(&mut *self.staged.write().await);
		let mut visible = self.visible.write().await;
		visible.users.extend(staged.users);
		visible.groups.extend(staged.groups);
		Ok(())
	}
}
