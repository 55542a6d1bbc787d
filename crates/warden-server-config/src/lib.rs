// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Layered configuration for the Warden authorization core.
//!
//! This crate provides:
//! - Layered configuration from multiple sources (defaults, TOML file, environment)
//! - Type-safe configuration with validation
//! - Consistent environment variable naming (`WARDEN_SERVER_*`)
//! - Tracing subscriber bootstrap ([`init_logging`])

pub mod error;
pub mod layer;
pub mod sections;
pub mod sources;
mod subscriber;

pub use error::ConfigError;
pub use layer::ServerConfigLayer;
pub use sections::*;
pub use sources::{ConfigSource, DefaultsSource, EnvSource, Precedence, TomlSource};
pub use subscriber::init_logging;

use tracing::{debug, info, warn};

/// Token key lengths accepted by the codec (AES-128/192/256).
pub const VALID_TOKEN_KEY_LENGTHS: [usize; 3] = [16, 24, 32];

/// Fully resolved server configuration.
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
	pub auth: AuthConfig,
	pub database: DatabaseConfig,
	pub logging: LoggingConfig,
	pub audit: AuditConfig,
}

/// Load configuration from all sources with standard precedence.
///
/// Precedence (highest to lowest):
/// 1. Environment variables (`WARDEN_SERVER_*`)
/// 2. Config file (`/etc/warden/server.toml`)
/// 3. Built-in defaults
pub fn load_config() -> Result<ServerConfig, ConfigError> {
	load_from_sources(vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::system()),
		Box::new(EnvSource),
	])
}

/// Load configuration from environment only (for testing or simple deployments).
pub fn load_config_from_env() -> Result<ServerConfig, ConfigError> {
	load_from_sources(vec![Box::new(EnvSource)])
}

/// Load configuration with a custom config file path.
pub fn load_config_with_file(
	config_path: impl Into<std::path::PathBuf>,
) -> Result<ServerConfig, ConfigError> {
	load_from_sources(vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::new(config_path)),
		Box::new(EnvSource),
	])
}

fn load_from_sources(mut sources: Vec<Box<dyn ConfigSource>>) -> Result<ServerConfig, ConfigError> {
	sources.sort_by_key(|s| s.precedence());

	let mut merged = ServerConfigLayer::default();
	for source in sources {
		debug!(source = source.name(), "loading configuration source");
		let layer = source.load()?;
		merged.merge(layer);
	}

	finalize(merged)
}

/// Finalize configuration layer into resolved config.
pub fn finalize(layer: ServerConfigLayer) -> Result<ServerConfig, ConfigError> {
	let auth = layer.auth.unwrap_or_default().finalize();
	let database = layer.database.unwrap_or_default().finalize();
	let logging = layer.logging.unwrap_or_default().finalize();
	let audit = layer.audit.unwrap_or_default().finalize();

	validate_config(&auth)?;

	if auth.token_key.as_str() == DEFAULT_TOKEN_KEY {
		warn!("token key is the built-in default; set WARDEN_SERVER_AUTH_TOKEN_KEY");
	}

	info!(
		console_open = auth.console_open,
		console_strict = auth.console_strict,
		client_open = auth.client_open,
		client_strict = auth.client_strict,
		credible_headers = auth.credible_headers.len(),
		database = %database.url,
		audit_enabled = audit.enabled,
		"configuration loaded"
	);

	Ok(ServerConfig {
		auth,
		database,
		logging,
		audit,
	})
}

/// Validate cross-field configuration rules.
fn validate_config(auth: &AuthConfig) -> Result<(), ConfigError> {
	let key_len = auth.token_key.len();
	if !VALID_TOKEN_KEY_LENGTHS.contains(&key_len) {
		return Err(ConfigError::Validation(format!(
			"auth.token_key must be 16, 24 or 32 bytes long, got {key_len}"
		)));
	}

	if auth.credible_headers.keys().any(|name| name.trim().is_empty()) {
		return Err(ConfigError::Validation(
			"auth.credible_headers contains an empty header name".to_string(),
		));
	}

	Ok(())
}
