// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sources: environment variables and TOML files.

use std::path::PathBuf;

use tracing::{debug, trace};

use crate::error::ConfigError;
use crate::layer::ServerConfigLayer;
use crate::sections::{
	parse_header_pairs, AuditConfigLayer, AuthConfigLayer, DatabaseConfigLayer, LogFormat,
	LoggingConfigLayer, QueueOverflowPolicy,
};

/// Source precedence levels (higher = overrides lower).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
	Defaults = 10,
	ConfigFile = 20,
	Environment = 50,
}

/// Trait for configuration sources.
pub trait ConfigSource: Send + Sync {
	fn name(&self) -> &'static str;
	fn precedence(&self) -> Precedence;
	fn load(&self) -> Result<ServerConfigLayer, ConfigError>;
}

/// Built-in defaults source.
pub struct DefaultsSource;

impl ConfigSource for DefaultsSource {
	fn name(&self) -> &'static str {
		"defaults"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Defaults
	}

	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		debug!("loading defaults");
		Ok(ServerConfigLayer::default())
	}
}

/// TOML file configuration source.
pub struct TomlSource {
	path: PathBuf,
}

impl TomlSource {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	pub fn system() -> Self {
		Self::new("/etc/warden/server.toml")
	}
}

impl ConfigSource for TomlSource {
	fn name(&self) -> &'static str {
		"toml-config"
	}

	fn precedence(&self) -> Precedence {
		Precedence::ConfigFile
	}

	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		if !self.path.exists() {
			debug!(path = %self.path.display(), "config file not found, skipping");
			return Ok(ServerConfigLayer::default());
		}

		debug!(path = %self.path.display(), "loading config file");
		let content = std::fs::read_to_string(&self.path).map_err(|e| ConfigError::FileRead {
			path: self.path.clone(),
			source: e,
		})?;

		let layer: ServerConfigLayer =
			toml::from_str(&content).map_err(|e| ConfigError::TomlParse {
				path: self.path.clone(),
				source: e,
			})?;

		trace!("parsed config layer from TOML");
		Ok(layer)
	}
}

/// Environment variable source.
///
/// Convention: WARDEN_SERVER_<SECTION>_<FIELD>
pub struct EnvSource;

impl ConfigSource for EnvSource {
	fn name(&self) -> &'static str {
		"environment"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Environment
	}

	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		debug!("loading environment variables");
		Ok(ServerConfigLayer {
			auth: Some(load_auth_from_env()),
			database: Some(load_database_from_env()),
			logging: Some(load_logging_from_env()?),
			audit: Some(load_audit_from_env()?),
		})
	}
}

fn env_var(name: &str) -> Option<String> {
	std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_bool(name: &str) -> Option<bool> {
	env_var(name).map(|v| v.eq_ignore_ascii_case("true") || v == "1")
}

fn env_usize(name: &str) -> Result<Option<usize>, ConfigError> {
	match env_var(name) {
		Some(v) => v.parse().map(Some).map_err(|_| ConfigError::InvalidValue {
			key: name.to_string(),
			message: format!("invalid usize value '{v}'"),
		}),
		None => Ok(None),
	}
}

fn load_auth_from_env() -> AuthConfigLayer {
	AuthConfigLayer {
		console_open: env_bool("WARDEN_SERVER_AUTH_CONSOLE_OPEN"),
		client_open: env_bool("WARDEN_SERVER_AUTH_CLIENT_OPEN"),
		console_strict: env_bool("WARDEN_SERVER_AUTH_CONSOLE_STRICT"),
		client_strict: env_bool("WARDEN_SERVER_AUTH_CLIENT_STRICT"),
		credible_headers: env_var("WARDEN_SERVER_AUTH_CREDIBLE_HEADERS")
			.map(|raw| parse_header_pairs(&raw)),
		open_principal_default_policy: env_bool("WARDEN_SERVER_AUTH_OPEN_PRINCIPAL_DEFAULT_POLICY"),
		token_key: env_var("WARDEN_SERVER_AUTH_TOKEN_KEY"),
	}
}

fn load_database_from_env() -> DatabaseConfigLayer {
	DatabaseConfigLayer {
		url: env_var("WARDEN_SERVER_DATABASE_URL"),
	}
}

fn load_logging_from_env() -> Result<LoggingConfigLayer, ConfigError> {
	let format = match env_var("WARDEN_SERVER_LOG_FORMAT") {
		Some(v) => Some(parse_log_format(&v).ok_or_else(|| ConfigError::InvalidValue {
			key: "WARDEN_SERVER_LOG_FORMAT".to_string(),
			message: format!("expected 'pretty' or 'json', got '{v}'"),
		})?),
		None => None,
	};

	Ok(LoggingConfigLayer {
		level: env_var("WARDEN_SERVER_LOG_LEVEL"),
		format,
	})
}

fn load_audit_from_env() -> Result<AuditConfigLayer, ConfigError> {
	let queue_overflow_policy =
		env_var("WARDEN_SERVER_AUDIT_QUEUE_OVERFLOW_POLICY").map(|v| {
			match v.to_lowercase().as_str() {
				"block" => QueueOverflowPolicy::Block,
				_ => QueueOverflowPolicy::DropNewest,
			}
		});

	Ok(AuditConfigLayer {
		enabled: env_bool("WARDEN_SERVER_AUDIT_ENABLED"),
		queue_capacity: env_usize("WARDEN_SERVER_AUDIT_QUEUE_CAPACITY")?,
		queue_overflow_policy,
	})
}

fn parse_log_format(raw: &str) -> Option<LogFormat> {
	match raw.to_lowercase().as_str() {
		"pretty" | "text" => Some(LogFormat::Pretty),
		"json" => Some(LogFormat::Json),
		_ => None,
	}
}
