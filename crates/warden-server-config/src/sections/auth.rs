// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Authorization configuration section.
//!
//! Console and client traffic are configured independently: `*_open` decides
//! whether authorization is enforced at all on that channel, `*_strict`
//! decides whether anonymous callers are rejected before policy evaluation.

use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use zeroize::Zeroizing;

/// Key used when no token key is configured. Deployments must override it.
pub const DEFAULT_TOKEN_KEY: &str = "warden-token-key";

/// Authorization configuration (runtime, fully resolved).
#[derive(Clone)]
pub struct AuthConfig {
	pub console_open: bool,
	pub client_open: bool,
	pub console_strict: bool,
	pub client_strict: bool,
	/// Header name to expected value. Every pair must match for the bypass.
	pub credible_headers: BTreeMap<String, String>,
	pub open_principal_default_policy: bool,
	/// Symmetric key for the bearer token codec (16, 24 or 32 bytes).
	pub token_key: Zeroizing<String>,
}

impl Default for AuthConfig {
	fn default() -> Self {
		Self {
			console_open: true,
			client_open: false,
			console_strict: false,
			client_strict: false,
			credible_headers: BTreeMap::new(),
			open_principal_default_policy: true,
			token_key: Zeroizing::new(DEFAULT_TOKEN_KEY.to_string()),
		}
	}
}

impl fmt::Debug for AuthConfig {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("AuthConfig")
			.field("console_open", &self.console_open)
			.field("client_open", &self.client_open)
			.field("console_strict", &self.console_strict)
			.field("client_strict", &self.client_strict)
			.field(
				"credible_headers",
				&self.credible_headers.keys().collect::<Vec<_>>(),
			)
			.field(
				"open_principal_default_policy",
				&self.open_principal_default_policy,
			)
			.field("token_key", &"[REDACTED]")
			.finish()
	}
}

impl AuthConfig {
	/// Returns `(open, strict)` for the given channel.
	pub fn channel(&self, from_client: bool) -> (bool, bool) {
		if from_client {
			(self.client_open, self.client_strict)
		} else {
			(self.console_open, self.console_strict)
		}
	}
}

/// Authorization configuration layer (partial, for merging).
#[derive(Clone, Default, Deserialize)]
pub struct AuthConfigLayer {
	#[serde(default)]
	pub console_open: Option<bool>,
	#[serde(default)]
	pub client_open: Option<bool>,
	#[serde(default)]
	pub console_strict: Option<bool>,
	#[serde(default)]
	pub client_strict: Option<bool>,
	#[serde(default)]
	pub credible_headers: Option<BTreeMap<String, String>>,
	#[serde(default)]
	pub open_principal_default_policy: Option<bool>,
	#[serde(default)]
	pub token_key: Option<String>,
}

impl fmt::Debug for AuthConfigLayer {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("AuthConfigLayer")
			.field("console_open", &self.console_open)
			.field("client_open", &self.client_open)
			.field("console_strict", &self.console_strict)
			.field("client_strict", &self.client_strict)
			.field("token_key", &self.token_key.as_ref().map(|_| "[REDACTED]"))
			.finish_non_exhaustive()
	}
}

impl AuthConfigLayer {
	pub fn merge(&mut self, other: AuthConfigLayer) {
		if other.console_open.is_some() {
			self.console_open = other.console_open;
		}
		if other.client_open.is_some() {
			self.client_open = other.client_open;
		}
		if other.console_strict.is_some() {
			self.console_strict = other.console_strict;
		}
		if other.client_strict.is_some() {
			self.client_strict = other.client_strict;
		}
		if other.credible_headers.is_some() {
			self.credible_headers = other.credible_headers;
		}
		if other.open_principal_default_policy.is_some() {
			self.open_principal_default_policy = other.open_principal_default_policy;
		}
		if other.token_key.is_some() {
			self.token_key = other.token_key;
		}
	}

	pub fn finalize(self) -> AuthConfig {
		let defaults = AuthConfig::default();
		AuthConfig {
			console_open: self.console_open.unwrap_or(defaults.console_open),
			client_open: self.client_open.unwrap_or(defaults.client_open),
			console_strict: self.console_strict.unwrap_or(defaults.console_strict),
			client_strict: self.client_strict.unwrap_or(defaults.client_strict),
			credible_headers: self.credible_headers.unwrap_or_default(),
			open_principal_default_policy: self
				.open_principal_default_policy
				.unwrap_or(defaults.open_principal_default_policy),
			token_key: self
				.token_key
				.map(Zeroizing::new)
				.unwrap_or(defaults.token_key),
		}
	}
}

/// Parses `name=value,name2=value2` into a header map.
///
/// Entries without `=` or with an empty name are ignored.
pub fn parse_header_pairs(raw: &str) -> BTreeMap<String, String> {
	raw
		.split(',')
		.filter_map(|pair| {
			let (name, value) = pair.split_once('=')?;
			let name = name.trim();
			if name.is_empty() {
				return None;
			}
			Some((name.to_ascii_lowercase(), value.trim().to_string()))
		})
		.collect()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults_enforce_console_only() {
		let config = AuthConfigLayer::default().finalize();
		assert!(config.console_open);
		assert!(!config.client_open);
		assert!(!config.console_strict);
		assert!(config.open_principal_default_policy);
		assert_eq!(config.token_key.as_str(), DEFAULT_TOKEN_KEY);
	}

	#[test]
	fn merge_overrides_only_present_fields() {
		let mut base = AuthConfigLayer {
			console_strict: Some(true),
			client_open: Some(true),
			..Default::default()
		};
		base.merge(AuthConfigLayer {
			client_open: Some(false),
			..Default::default()
		});
		let config = base.finalize();
		assert!(config.console_strict);
		assert!(!config.client_open);
	}

	#[test]
	fn channel_selects_flags() {
		let config = AuthConfig {
			console_open: true,
			console_strict: true,
			client_open: false,
			client_strict: false,
			..Default::default()
		};
		assert_eq!(config.channel(false), (true, true));
		assert_eq!(config.channel(true), (false, false));
	}

	#[test]
	fn debug_redacts_token_key() {
		let config = AuthConfig {
			token_key: Zeroizing::new("0123456789abcdef".to_string()),
			..Default::default()
		};
		let rendered = format!("{config:?}");
		assert!(!rendered.contains("0123456789abcdef"));
		assert!(rendered.contains("[REDACTED]"));
	}

	#[test]
	fn parse_header_pairs_skips_malformed_entries() {
		let headers = parse_header_pairs("X-Sidecar=true, broken ,=nope,x-mesh = east");
		assert_eq!(headers.len(), 2);
		assert_eq!(headers.get("x-sidecar").map(String::as_str), Some("true"));
		assert_eq!(headers.get("x-mesh").map(String::as_str), Some("east"));
	}
}
