// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Core type definitions for authorization.
//!
//! - **ID newtypes**: type-safe wrappers around UUIDs ([`UserId`], [`GroupId`],
//!   [`RoleId`], [`StrategyId`]) preventing accidental mixing
//! - **Principals**: [`PrincipalRef`] names the subject of a strategy
//! - **Request vocabulary**: [`ResourceType`], [`Operation`], [`Module`]
//! - **Strategy vocabulary**: [`Effect`] and [`AccessLevel`]
//!
//! All ID types implement transparent serde serialization (as UUID strings) and
//! provide conversion to/from [`uuid::Uuid`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// =============================================================================
// ID Newtypes
// =============================================================================

macro_rules! define_id_type {
	($name:ident, $doc:expr) => {
		#[doc = $doc]
		#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
		#[serde(transparent)]
		pub struct $name(Uuid);

		impl $name {
			/// Create a new ID from a UUID.
			pub fn new(id: Uuid) -> Self {
				Self(id)
			}

			/// Generate a new random ID.
			pub fn generate() -> Self {
				Self(Uuid::new_v4())
			}

			/// Get the inner UUID value.
			pub fn into_inner(self) -> Uuid {
				self.0
			}

			/// Get a reference to the inner UUID.
			pub fn as_uuid(&self) -> &Uuid {
				&self.0
			}
		}

		impl fmt::Display for $name {
			fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
				write!(f, "{}", self.0)
			}
		}

		impl FromStr for $name {
			type Err = uuid::Error;

			fn from_str(s: &str) -> Result<Self, Self::Err> {
				Uuid::parse_str(s).map(Self)
			}
		}

		impl From<Uuid> for $name {
			fn from(id: Uuid) -> Self {
				Self(id)
			}
		}

		impl From<$name> for Uuid {
			fn from(id: $name) -> Self {
				id.0
			}
		}
	};
}

define_id_type!(UserId, "Unique identifier for a user account.");
define_id_type!(GroupId, "Unique identifier for a user group.");
define_id_type!(RoleId, "Unique identifier for a role.");
define_id_type!(StrategyId, "Unique identifier for an authorization strategy.");

/// Error returned when parsing one of the string-backed enums below.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {value}")]
pub struct ParseEnumError {
	pub kind: &'static str,
	pub value: String,
}

impl ParseEnumError {
	fn new(kind: &'static str, value: &str) -> Self {
		Self {
			kind,
			value: value.to_string(),
		}
	}
}

/// Implements `as_str`, `Display` and `FromStr` for a unit-only enum.
macro_rules! string_enum {
	($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
		impl $name {
			pub fn as_str(&self) -> &'static str {
				match self {
					$(Self::$variant => $text,)+
				}
			}
		}

		impl fmt::Display for $name {
			fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
				f.write_str(self.as_str())
			}
		}

		impl FromStr for $name {
			type Err = ParseEnumError;

			fn from_str(s: &str) -> Result<Self, Self::Err> {
				match s {
					$($text => Ok(Self::$variant),)+
					other => Err(ParseEnumError::new($kind, other)),
				}
			}
		}
	};
}

// =============================================================================
// Principals
// =============================================================================

/// The kind of a principal. Immutable after the principal is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrincipalKind {
	User,
	Group,
	Role,
}

string_enum!(PrincipalKind, "principal kind", {
	User => "user",
	Group => "group",
	Role => "role",
});

/// Reference to the subject of a strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum PrincipalRef {
	User(UserId),
	Group(GroupId),
	Role(RoleId),
}

impl PrincipalRef {
	pub fn kind(&self) -> PrincipalKind {
		match self {
			Self::User(_) => PrincipalKind::User,
			Self::Group(_) => PrincipalKind::Group,
			Self::Role(_) => PrincipalKind::Role,
		}
	}

	pub fn uuid(&self) -> Uuid {
		match self {
			Self::User(id) => id.into_inner(),
			Self::Group(id) => id.into_inner(),
			Self::Role(id) => id.into_inner(),
		}
	}

	/// Rebuilds a reference from its stored `(kind, id)` pair.
	pub fn from_parts(kind: PrincipalKind, id: Uuid) -> Self {
		match kind {
			PrincipalKind::User => Self::User(UserId::new(id)),
			PrincipalKind::Group => Self::Group(GroupId::new(id)),
			PrincipalKind::Role => Self::Role(RoleId::new(id)),
		}
	}
}

impl fmt::Display for PrincipalRef {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}/{}", self.kind(), self.uuid())
	}
}

/// Role of a user account.
///
/// Admins and owners are top-level accounts with no owning account; sub
/// accounts always belong to exactly one owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
	Admin,
	Owner,
	SubAccount,
}

string_enum!(UserRole, "user role", {
	Admin => "admin",
	Owner => "owner",
	SubAccount => "sub_account",
});

impl UserRole {
	pub fn is_top_level(&self) -> bool {
		matches!(self, Self::Admin | Self::Owner)
	}
}

// =============================================================================
// Request vocabulary
// =============================================================================

/// Addressable resource types under access control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
	Namespace,
	Service,
	ConfigGroup,
	User,
	Group,
}

string_enum!(ResourceType, "resource type", {
	Namespace => "namespace",
	Service => "service",
	ConfigGroup => "config_group",
	User => "user",
	Group => "group",
});

impl ResourceType {
	pub const ALL: [ResourceType; 5] = [
		ResourceType::Namespace,
		ResourceType::Service,
		ResourceType::ConfigGroup,
		ResourceType::User,
		ResourceType::Group,
	];
}

/// The operation a request attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
	Read,
	Create,
	Modify,
	Delete,
}

string_enum!(Operation, "operation", {
	Read => "read",
	Create => "create",
	Modify => "modify",
	Delete => "delete",
});

impl Operation {
	pub fn is_read(&self) -> bool {
		matches!(self, Self::Read)
	}
}

/// The API module a request belongs to.
///
/// `Auth` is the identity module (users, groups, strategies); `Maintain` is the
/// maintenance module with its own fixed rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Module {
	Core,
	Discover,
	Config,
	Auth,
	Maintain,
}

string_enum!(Module, "module", {
	Core => "core",
	Discover => "discover",
	Config => "config",
	Auth => "auth",
	Maintain => "maintain",
});

// =============================================================================
// Strategy vocabulary
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Effect {
	Allow,
	Deny,
}

string_enum!(Effect, "effect", {
	Allow => "allow",
	Deny => "deny",
});

/// Which operations a strategy covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessLevel {
	ReadOnly,
	#[default]
	ReadWrite,
}

string_enum!(AccessLevel, "access level", {
	ReadOnly => "read_only",
	ReadWrite => "read_write",
});

impl AccessLevel {
	pub fn covers(&self, operation: Operation) -> bool {
		match self {
			Self::ReadOnly => operation.is_read(),
			Self::ReadWrite => true,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn principal_ref_serializes_tagged() {
		let id = UserId::generate();
		let json = serde_json::to_value(PrincipalRef::User(id)).unwrap();
		assert_eq!(json["kind"], "user");
		assert_eq!(json["id"], id.to_string());
		let back: PrincipalRef = serde_json::from_value(json).unwrap();
		assert_eq!(back, PrincipalRef::User(id));
	}

	#[test]
	fn principal_ref_from_parts_keeps_kind() {
		let uuid = Uuid::new_v4();
		for kind in [PrincipalKind::User, PrincipalKind::Group, PrincipalKind::Role] {
			let principal = PrincipalRef::from_parts(kind, uuid);
			assert_eq!(principal.kind(), kind);
			assert_eq!(principal.uuid(), uuid);
		}
	}

	#[test]
	fn string_enums_parse_their_display() {
		for t in ResourceType::ALL {
			assert_eq!(t.to_string().parse::<ResourceType>().unwrap(), t);
		}
		assert_eq!("read_only".parse::<AccessLevel>().unwrap(), AccessLevel::ReadOnly);
		assert_eq!("sub_account".parse::<UserRole>().unwrap(), UserRole::SubAccount);
		let err = "bucket".parse::<ResourceType>().unwrap_err();
		assert_eq!(err.to_string(), "unknown resource type: bucket");
	}

	#[test]
	fn read_only_covers_reads_only() {
		assert!(AccessLevel::ReadOnly.covers(Operation::Read));
		assert!(!AccessLevel::ReadOnly.covers(Operation::Modify));
		assert!(AccessLevel::ReadWrite.covers(Operation::Delete));
	}

	#[test]
	fn top_level_roles() {
		assert!(UserRole::Admin.is_top_level());
		assert!(UserRole::Owner.is_top_level());
		assert!(!UserRole::SubAccount.is_top_level());
	}
}
