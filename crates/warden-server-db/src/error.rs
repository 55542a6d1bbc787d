// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use warden_server_auth::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum DbError {
	#[error("Database error: {0}")]
	Sqlx(#[from] sqlx::Error),

	#[error("Not found: {0}")]
	NotFound(String),

	#[error("Conflict: {0}")]
	Conflict(String),

	#[error("Internal: {0}")]
	Internal(String),

	#[error("Rejected: {0}")]
	Rejected(String),

	#[error("Serialization error: {0}")]
	Serialization(#[from] serde_json::Error),
}

pub type DbResult<T> = std::result::Result<T, DbError>;

impl From<DbError> for StoreError {
	fn from(err: DbError) -> Self {
		match err {
			DbError::Sqlx(e) if is_unique_violation(&e) => StoreError::Conflict(e.to_string()),
			DbError::Sqlx(e) if is_transient_error(&e) => StoreError::Unavailable(e.to_string()),
			DbError::Sqlx(e) => StoreError::Internal(e.to_string()),
			DbError::Conflict(msg) => StoreError::Conflict(msg),
			DbError::Rejected(msg) => StoreError::Rejected(msg),
			DbError::Serialization(e) => StoreError::Corrupt(e.to_string()),
			DbError::NotFound(msg) | DbError::Internal(msg) => StoreError::Internal(msg),
		}
	}
}

pub(crate) fn is_unique_violation(e: &sqlx::Error) -> bool {
	match e {
		sqlx::Error::Database(db_err) => db_err.is_unique_violation(),
		_ => false,
	}
}

pub(crate) fn is_transient_error(e: &sqlx::Error) -> bool {
	match e {
		sqlx::Error::Io(_) => true,
		sqlx::Error::PoolTimedOut => true,
		sqlx::Error::PoolClosed => true,
		sqlx::Error::Database(db_err) => {
			let msg = db_err.message().to_lowercase();
			msg.contains("busy") || msg.contains("locked") || msg.contains("timeout")
		}
		_ => false,
	}
}
