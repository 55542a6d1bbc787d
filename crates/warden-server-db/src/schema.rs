// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Table definitions. Statements are idempotent and run in order.

use sqlx::sqlite::SqlitePool;

use crate::error::DbError;

const MIGRATIONS: &[&str] = &[
	r#"
	CREATE TABLE IF NOT EXISTS strategies (
		id TEXT PRIMARY KEY,
		name TEXT NOT NULL,
		comment TEXT NOT NULL DEFAULT '',
		effect TEXT NOT NULL,
		access TEXT NOT NULL,
		owner TEXT NOT NULL,
		is_default INTEGER NOT NULL DEFAULT 0,
		functions TEXT NOT NULL,
		conditions TEXT NOT NULL,
		created_at TEXT NOT NULL,
		updated_at TEXT NOT NULL,
		UNIQUE(owner, name)
	)
	"#,
	r#"
	CREATE TABLE IF NOT EXISTS strategy_principals (
		strategy_id TEXT NOT NULL REFERENCES strategies(id) ON DELETE CASCADE,
		principal_kind TEXT NOT NULL,
		principal_id TEXT NOT NULL,
		position INTEGER NOT NULL,
		PRIMARY KEY (strategy_id, principal_kind, principal_id)
	)
	"#,
	"CREATE INDEX IF NOT EXISTS idx_strategy_principals_principal \
	 ON strategy_principals (principal_kind, principal_id)",
	r#"
	CREATE TABLE IF NOT EXISTS strategy_resources (
		strategy_id TEXT NOT NULL REFERENCES strategies(id) ON DELETE CASCADE,
		resource_type TEXT NOT NULL,
		resource_id TEXT NOT NULL,
		PRIMARY KEY (strategy_id, resource_type, resource_id)
	)
	"#,
	"CREATE INDEX IF NOT EXISTS idx_strategy_resources_resource \
	 ON strategy_resources (resource_type, resource_id)",
	r#"
	CREATE TABLE IF NOT EXISTS history_records (
		id TEXT PRIMARY KEY,
		timestamp TEXT NOT NULL,
		resource_type TEXT NOT NULL,
		resource_name TEXT NOT NULL,
		operator TEXT NOT NULL,
		operation TEXT NOT NULL,
		detail TEXT NOT NULL,
		created_at TEXT NOT NULL
	)
	"#,
	"CREATE INDEX IF NOT EXISTS idx_history_records_resource \
	 ON history_records (resource_type, timestamp)",
];

#[tracing::instrument(skip(pool))]
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), DbError> {
	let mut tx = pool.begin().await?;
	for statement in MIGRATIONS {
		sqlx::query(statement).execute(&mut *tx).await?;
	}
	tx.commit().await?;
	tracing::debug!(statements = MIGRATIONS.len(), "schema up to date");
	Ok(())
}
