// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Strategy repository.
//!
//! A strategy is one row in `strategies` plus its rows in
//! `strategy_principals` and `strategy_resources`. Every mutation touches those
//! tables inside a single transaction.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnection, SqlitePool};
use sqlx::FromRow;
use uuid::Uuid;
use warden_server_auth::{
	AccessLevel, Condition, Effect, PrincipalKind, PrincipalRef, ResourceLinkChange, ResourceType,
	StoreError, Strategy, StrategyFilter, StrategyId, StrategyResource, StrategySource,
	StrategyStore, UpdateStrategyRequest, UserId, WILDCARD_RESOURCE_ID,
};

use crate::error::{DbError, DbResult};

const STRATEGY_COLUMNS: &str = "id, name, comment, effect, access, owner, is_default, \
	functions, conditions, created_at, updated_at";

#[derive(Debug, FromRow)]
struct StrategyRow {
	id: String,
	name: String,
	comment: String,
	effect: String,
	access: String,
	owner: String,
	is_default: bool,
	functions: String,
	conditions: String,
	created_at: String,
	updated_at: String,
}

impl StrategyRow {
	fn into_strategy(
		self,
		principals: Vec<PrincipalRef>,
		mut resources: Vec<StrategyResource>,
	) -> DbResult<Strategy> {
		resources.sort();
		let functions: Vec<String> = serde_json::from_str(&self.functions)?;
		let conditions: Vec<Condition> = serde_json::from_str(&self.conditions)?;
		Ok(Strategy {
			id: StrategyId::new(parse_uuid(&self.id)?),
			name: self.name,
			comment: self.comment,
			effect: self.effect.parse::<Effect>().map_err(corrupt)?,
			access: self.access.parse::<AccessLevel>().map_err(corrupt)?,
			owner: UserId::new(parse_uuid(&self.owner)?),
			is_default: self.is_default,
			principals,
			resources,
			functions,
			conditions,
			created_at: parse_timestamp(&self.created_at)?,
			updated_at: parse_timestamp(&self.updated_at)?,
		})
	}
}

fn corrupt(e: impl std::fmt::Display) -> DbError {
	DbError::Internal(format!("corrupt strategy row: {e}"))
}

fn parse_uuid(s: &str) -> DbResult<Uuid> {
	Uuid::parse_str(s).map_err(corrupt)
}

fn parse_timestamp(s: &str) -> DbResult<DateTime<Utc>> {
	DateTime::parse_from_rfc3339(s)
		.map(|dt| dt.with_timezone(&Utc))
		.map_err(corrupt)
}

/// Fixed-width so that text ordering matches time ordering.
fn format_timestamp(ts: &DateTime<Utc>) -> String {
	ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_principal(kind: &str, id: &str) -> DbResult<PrincipalRef> {
	let kind = kind.parse::<PrincipalKind>().map_err(corrupt)?;
	Ok(PrincipalRef::from_parts(kind, parse_uuid(id)?))
}

fn parse_resource(resource_type: &str, id: String) -> DbResult<StrategyResource> {
	let resource_type = resource_type.parse::<ResourceType>().map_err(corrupt)?;
	Ok(StrategyResource::new(resource_type, id))
}

fn to_sql_limit(n: usize) -> i64 {
	i64::try_from(n).unwrap_or(i64::MAX)
}

#[derive(Clone)]
pub struct StrategyRepository {
	pool: SqlitePool,
}

impl StrategyRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	pub fn pool(&self) -> &SqlitePool {
		&self.pool
	}

	#[tracing::instrument(skip(self))]
	pub async fn load_all(&self) -> DbResult<Vec<Strategy>> {
		let mut conn = self.pool.acquire().await?;

		let rows: Vec<StrategyRow> = sqlx::query_as(&format!(
			"SELECT {STRATEGY_COLUMNS} FROM strategies ORDER BY created_at, id"
		))
		.fetch_all(&mut *conn)
		.await?;

		let principal_rows: Vec<(String, String, String)> = sqlx::query_as(
			"SELECT strategy_id, principal_kind, principal_id FROM strategy_principals \
			 ORDER BY strategy_id, position",
		)
		.fetch_all(&mut *conn)
		.await?;

		let resource_rows: Vec<(String, String, String)> = sqlx::query_as(
			"SELECT strategy_id, resource_type, resource_id FROM strategy_resources",
		)
		.fetch_all(&mut *conn)
		.await?;

		let mut principals: HashMap<String, Vec<PrincipalRef>> = HashMap::new();
		for (strategy_id, kind, id) in principal_rows {
			principals
				.entry(strategy_id)
				.or_default()
				.push(parse_principal(&kind, &id)?);
		}

		let mut resources: HashMap<String, Vec<StrategyResource>> = HashMap::new();
		for (strategy_id, resource_type, id) in resource_rows {
			resources
				.entry(strategy_id)
				.or_default()
				.push(parse_resource(&resource_type, id)?);
		}

		let strategies = rows
			.into_iter()
			.map(|row| {
				let p = principals.remove(&row.id).unwrap_or_default();
				let r = resources.remove(&row.id).unwrap_or_default();
				row.into_strategy(p, r)
			})
			.collect::<DbResult<Vec<_>>>()?;

		tracing::debug!(count = strategies.len(), "loaded strategies");
		Ok(strategies)
	}

	#[tracing::instrument(skip(self, strategy), fields(strategy_id = %strategy.id, name = %strategy.name))]
	pub async fn insert(&self, strategy: &Strategy) -> DbResult<()> {
		let mut tx = self.pool.begin().await?;

		let result = sqlx::query(
			r#"
			INSERT INTO strategies (
				id, name, comment, effect, access, owner, is_default,
				functions, conditions, created_at, updated_at
			) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
			"#,
		)
		.bind(strategy.id.to_string())
		.bind(&strategy.name)
		.bind(&strategy.comment)
		.bind(strategy.effect.as_str())
		.bind(strategy.access.as_str())
		.bind(strategy.owner.to_string())
		.bind(strategy.is_default)
		.bind(serde_json::to_string(&strategy.functions)?)
		.bind(serde_json::to_string(&strategy.conditions)?)
		.bind(format_timestamp(&strategy.created_at))
		.bind(format_timestamp(&strategy.updated_at))
		.execute(&mut *tx)
		.await;

		if let Err(e) = result {
			if crate::error::is_unique_violation(&e) {
				return Err(DbError::Conflict(format!(
					"strategy {} already exists for owner {}",
					strategy.name, strategy.owner
				)));
			}
			return Err(e.into());
		}

		write_links(&mut tx, strategy).await?;

		tx.commit().await?;
		tracing::debug!("strategy inserted");
		Ok(())
	}

	/// Applies `req` to the strategy as currently stored.
	///
	/// The write lock is taken before the strategy is read, so links committed
	/// by other writers in the meantime are part of what gets rewritten.
	/// Returns `None` when the strategy does not exist.
	#[tracing::instrument(skip(self, req), fields(strategy_id = %req.id))]
	pub async fn update(&self, req: &UpdateStrategyRequest) -> DbResult<Option<Strategy>> {
		let mut tx = self.pool.begin().await?;
		let id = req.id.to_string();

		// A no-op write upgrades the deferred transaction to a writer before the read.
		let locked = sqlx::query("UPDATE strategies SET updated_at = updated_at WHERE id = ?")
			.bind(&id)
			.execute(&mut *tx)
			.await?;
		if locked.rows_affected() == 0 {
			return Ok(None);
		}

		let row: StrategyRow = sqlx::query_as(&format!(
			"SELECT {STRATEGY_COLUMNS} FROM strategies WHERE id = ?"
		))
		.bind(&id)
		.fetch_one(&mut *tx)
		.await?;
		let mut strategy = hydrate(&mut tx, row).await?;

		req
			.apply_to(&mut strategy, Utc::now())
			.map_err(|e| match e {
				StoreError::Rejected(msg) => DbError::Rejected(msg),
				other => DbError::Internal(other.to_string()),
			})?;

		sqlx::query("UPDATE strategies SET comment = ?, updated_at = ? WHERE id = ?")
			.bind(&strategy.comment)
			.bind(format_timestamp(&strategy.updated_at))
			.bind(&id)
			.execute(&mut *tx)
			.await?;
		clear_links(&mut tx, &id).await?;
		write_links(&mut tx, &strategy).await?;

		tx.commit().await?;
		tracing::debug!(
			principals = strategy.principals.len(),
			resources = strategy.resources.len(),
			"strategy updated"
		);
		Ok(Some(strategy))
	}

	#[tracing::instrument(skip(self), fields(strategy_id = %id))]
	pub async fn delete(&self, id: StrategyId) -> DbResult<bool> {
		let mut tx = self.pool.begin().await?;
		let id = id.to_string();

		clear_links(&mut tx, &id).await?;
		let result = sqlx::query("DELETE FROM strategies WHERE id = ?")
			.bind(&id)
			.execute(&mut *tx)
			.await?;

		tx.commit().await?;
		Ok(result.rows_affected() > 0)
	}

	#[tracing::instrument(skip(self), fields(strategy_id = %id))]
	pub async fn get(&self, id: StrategyId) -> DbResult<Option<Strategy>> {
		let mut conn = self.pool.acquire().await?;
		let row: Option<StrategyRow> = sqlx::query_as(&format!(
			"SELECT {STRATEGY_COLUMNS} FROM strategies WHERE id = ?"
		))
		.bind(id.to_string())
		.fetch_optional(&mut *conn)
		.await?;

		match row {
			Some(row) => Ok(Some(hydrate(&mut conn, row).await?)),
			None => Ok(None),
		}
	}

	#[tracing::instrument(skip(self, name), fields(owner = %owner))]
	pub async fn find_by_name(&self, owner: UserId, name: &str) -> DbResult<Option<Strategy>> {
		let mut conn = self.pool.acquire().await?;
		let row: Option<StrategyRow> = sqlx::query_as(&format!(
			"SELECT {STRATEGY_COLUMNS} FROM strategies WHERE owner = ? AND name = ?"
		))
		.bind(owner.to_string())
		.bind(name)
		.fetch_optional(&mut *conn)
		.await?;

		match row {
			Some(row) => Ok(Some(hydrate(&mut conn, row).await?)),
			None => Ok(None),
		}
	}

	#[tracing::instrument(skip(self), fields(principal = %principal))]
	pub async fn find_default(&self, principal: PrincipalRef) -> DbResult<Option<Strategy>> {
		let mut conn = self.pool.acquire().await?;
		let Some(id) = default_strategy_id(&mut conn, principal).await? else {
			return Ok(None);
		};

		let row: Option<StrategyRow> = sqlx::query_as(&format!(
			"SELECT {STRATEGY_COLUMNS} FROM strategies WHERE id = ?"
		))
		.bind(&id)
		.fetch_optional(&mut *conn)
		.await?;

		match row {
			Some(row) => Ok(Some(hydrate(&mut conn, row).await?)),
			None => Ok(None),
		}
	}

	/// Runs `filter` and returns the requested page plus the total match count.
	///
	/// A resource filter matches strategies naming that resource explicitly or
	/// through a wildcard of its type.
	#[tracing::instrument(skip(self, filter))]
	pub async fn list(&self, filter: &StrategyFilter) -> DbResult<(Vec<Strategy>, u64)> {
		let mut conditions = vec!["1=1".to_string()];
		let mut args: Vec<String> = Vec::new();

		if let Some(owner) = filter.owner {
			conditions.push("owner = ?".to_string());
			args.push(owner.to_string());
		}

		if let Some(principals) = &filter.principals {
			if principals.is_empty() {
				return Ok((Vec::new(), 0));
			}
			let clauses = vec!["(principal_kind = ? AND principal_id = ?)"; principals.len()];
			conditions.push(format!(
				"id IN (SELECT strategy_id FROM strategy_principals WHERE {})",
				clauses.join(" OR ")
			));
			for principal in principals {
				args.push(principal.kind().to_string());
				args.push(principal.uuid().to_string());
			}
		}

		if let Some(resource) = &filter.resource {
			conditions.push(
				"id IN (SELECT strategy_id FROM strategy_resources \
				 WHERE resource_type = ? AND resource_id IN (?, ?))"
					.to_string(),
			);
			args.push(resource.resource_type.to_string());
			args.push(resource.id.clone());
			args.push(WILDCARD_RESOURCE_ID.to_string());
		}

		if let Some(name) = &filter.name {
			conditions.push("instr(name, ?) > 0".to_string());
			args.push(name.clone());
		}

		if let Some(is_default) = filter.is_default {
			conditions.push(format!("is_default = {}", i64::from(is_default)));
		}

		let where_clause = conditions.join(" AND ");
		let mut conn = self.pool.acquire().await?;

		let count_sql = format!("SELECT COUNT(*) FROM strategies WHERE {where_clause}");
		let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
		for arg in &args {
			count_query = count_query.bind(arg);
		}
		let total = count_query.fetch_one(&mut *conn).await?;

		let data_sql = format!(
			"SELECT {STRATEGY_COLUMNS} FROM strategies WHERE {where_clause} \
			 ORDER BY created_at, id LIMIT ? OFFSET ?"
		);
		let mut data_query = sqlx::query_as::<_, StrategyRow>(&data_sql);
		for arg in &args {
			data_query = data_query.bind(arg);
		}
		let rows = data_query
			.bind(to_sql_limit(filter.limit))
			.bind(to_sql_limit(filter.offset))
			.fetch_all(&mut *conn)
			.await?;

		let mut strategies = Vec::with_capacity(rows.len());
		for row in rows {
			strategies.push(hydrate(&mut conn, row).await?);
		}

		Ok((strategies, u64::try_from(total).unwrap_or_default()))
	}

	#[tracing::instrument(skip(self, change), fields(resources = change.resources.len(), purge = change.purge))]
	pub async fn link_resources(&self, change: &ResourceLinkChange) -> DbResult<()> {
		let mut tx = self.pool.begin().await?;
		let now = format_timestamp(&Utc::now());

		if change.purge {
			for resource in &change.resources {
				let result = sqlx::query(
					"DELETE FROM strategy_resources WHERE resource_type = ? AND resource_id = ?",
				)
				.bind(resource.resource_type.as_str())
				.bind(&resource.id)
				.execute(&mut *tx)
				.await?;
				tracing::debug!(
					resource_type = %resource.resource_type,
					resource_id = %resource.id,
					removed = result.rows_affected(),
					"purged resource links"
				);
			}
			tx.commit().await?;
			return Ok(());
		}

		for principal in &change.grant_to {
			let Some(strategy_id) = default_strategy_id(&mut tx, *principal).await? else {
				tracing::warn!(principal = %principal, "no default strategy, grant skipped");
				continue;
			};
			for resource in &change.resources {
				// A wildcard already on the default strategy covers the resource.
				sqlx::query(
					r#"
					INSERT OR IGNORE INTO strategy_resources (strategy_id, resource_type, resource_id)
					SELECT ?1, ?2, ?3
					WHERE NOT EXISTS (
						SELECT 1 FROM strategy_resources
						WHERE strategy_id = ?1 AND resource_type = ?2 AND resource_id = ?4
					)
					"#,
				)
				.bind(&strategy_id)
				.bind(resource.resource_type.as_str())
				.bind(&resource.id)
				.bind(WILDCARD_RESOURCE_ID)
				.execute(&mut *tx)
				.await?;
			}
			touch(&mut tx, &strategy_id, &now).await?;
		}

		for principal in &change.revoke_from {
			let Some(strategy_id) = default_strategy_id(&mut tx, *principal).await? else {
				continue;
			};
			for resource in &change.resources {
				sqlx::query(
					"DELETE FROM strategy_resources \
					 WHERE strategy_id = ? AND resource_type = ? AND resource_id = ?",
				)
				.bind(&strategy_id)
				.bind(resource.resource_type.as_str())
				.bind(&resource.id)
				.execute(&mut *tx)
				.await?;
			}
			touch(&mut tx, &strategy_id, &now).await?;
		}

		tx.commit().await?;
		Ok(())
	}

	#[tracing::instrument(skip(self), fields(principal = %principal))]
	pub async fn purge_principal(&self, principal: PrincipalRef) -> DbResult<()> {
		let mut tx = self.pool.begin().await?;
		let kind = principal.kind().to_string();
		let id = principal.uuid().to_string();

		if let Some(strategy_id) = default_strategy_id(&mut tx, principal).await? {
			clear_links(&mut tx, &strategy_id).await?;
			sqlx::query("DELETE FROM strategies WHERE id = ?")
				.bind(&strategy_id)
				.execute(&mut *tx)
				.await?;
		}

		let unlinked = sqlx::query(
			"DELETE FROM strategy_principals WHERE principal_kind = ? AND principal_id = ?",
		)
		.bind(&kind)
		.bind(&id)
		.execute(&mut *tx)
		.await?
		.rows_affected();

		let as_resource = match principal {
			PrincipalRef::User(_) => Some(ResourceType::User),
			PrincipalRef::Group(_) => Some(ResourceType::Group),
			PrincipalRef::Role(_) => None,
		};
		if let Some(resource_type) = as_resource {
			sqlx::query("DELETE FROM strategy_resources WHERE resource_type = ? AND resource_id = ?")
				.bind(resource_type.as_str())
				.bind(&id)
				.execute(&mut *tx)
				.await?;
		}

		tx.commit().await?;
		tracing::debug!(unlinked, "principal removed from strategies");
		Ok(())
	}
}

async fn hydrate(conn: &mut SqliteConnection, row: StrategyRow) -> DbResult<Strategy> {
	let principal_rows: Vec<(String, String)> = sqlx::query_as(
		"SELECT principal_kind, principal_id FROM strategy_principals \
		 WHERE strategy_id = ? ORDER BY position",
	)
	.bind(&row.id)
	.fetch_all(&mut *conn)
	.await?;

	let resource_rows: Vec<(String, String)> = sqlx::query_as(
		"SELECT resource_type, resource_id FROM strategy_resources WHERE strategy_id = ?",
	)
	.bind(&row.id)
	.fetch_all(&mut *conn)
	.await?;

	let principals = principal_rows
		.iter()
		.map(|(kind, id)| parse_principal(kind, id))
		.collect::<DbResult<Vec<_>>>()?;
	let resources = resource_rows
		.into_iter()
		.map(|(resource_type, id)| parse_resource(&resource_type, id))
		.collect::<DbResult<Vec<_>>>()?;

	row.into_strategy(principals, resources)
}

async fn default_strategy_id(
	conn: &mut SqliteConnection,
	principal: PrincipalRef,
) -> DbResult<Option<String>> {
	let id: Option<String> = sqlx::query_scalar(
		r#"
		SELECT s.id FROM strategies s
		JOIN strategy_principals p ON p.strategy_id = s.id
		WHERE s.is_default = 1 AND p.principal_kind = ? AND p.principal_id = ?
		LIMIT 1
		"#,
	)
	.bind(principal.kind().as_str())
	.bind(principal.uuid().to_string())
	.fetch_optional(&mut *conn)
	.await?;
	Ok(id)
}

async fn clear_links(conn: &mut SqliteConnection, strategy_id: &str) -> DbResult<()> {
	sqlx::query("DELETE FROM strategy_principals WHERE strategy_id = ?")
		.bind(strategy_id)
		.execute(&mut *conn)
		.await?;
	sqlx::query("DELETE FROM strategy_resources WHERE strategy_id = ?")
		.bind(strategy_id)
		.execute(&mut *conn)
		.await?;
	Ok(())
}

async fn write_links(conn: &mut SqliteConnection, strategy: &Strategy) -> DbResult<()> {
	let strategy_id = strategy.id.to_string();

	for (position, principal) in strategy.principals.iter().enumerate() {
		sqlx::query(
			"INSERT INTO strategy_principals (strategy_id, principal_kind, principal_id, position) \
			 VALUES (?, ?, ?, ?)",
		)
		.bind(&strategy_id)
		.bind(principal.kind().as_str())
		.bind(principal.uuid().to_string())
		.bind(to_sql_limit(position))
		.execute(&mut *conn)
		.await?;
	}

	for resource in &strategy.resources {
		sqlx::query(
			"INSERT INTO strategy_resources (strategy_id, resource_type, resource_id) VALUES (?, ?, ?)",
		)
		.bind(&strategy_id)
		.bind(resource.resource_type.as_str())
		.bind(&resource.id)
		.execute(&mut *conn)
		.await?;
	}

	Ok(())
}

async fn touch(conn: &mut SqliteConnection, strategy_id: &str, now: &str) -> DbResult<()> {
	sqlx::query("UPDATE strategies SET updated_at = ? WHERE id = ?")
		.bind(now)
		.bind(strategy_id)
		.execute(&mut *conn)
		.await?;
	Ok(())
}

#[async_trait]
impl StrategySource for StrategyRepository {
	async fn load_strategies(&self) -> Result<Vec<Strategy>, StoreError> {
		Ok(self.load_all().await?)
	}
}

#[async_trait]
impl StrategyStore for StrategyRepository {
	async fn create_strategy(&self, strategy: &Strategy) -> Result<(), StoreError> {
		Ok(self.insert(strategy).await?)
	}

	async fn update_strategy(
		&self,
		req: &UpdateStrategyRequest,
	) -> Result<Option<Strategy>, StoreError> {
		Ok(self.update(req).await?)
	}

	async fn delete_strategy(&self, id: StrategyId) -> Result<bool, StoreError> {
		Ok(self.delete(id).await?)
	}

	async fn get_strategy(&self, id: StrategyId) -> Result<Option<Strategy>, StoreError> {
		Ok(self.get(id).await?)
	}

	async fn find_strategy_by_name(
		&self,
		owner: UserId,
		name: &str,
	) -> Result<Option<Strategy>, StoreError> {
		Ok(self.find_by_name(owner, name).await?)
	}

	async fn default_strategy_of(
		&self,
		principal: PrincipalRef,
	) -> Result<Option<Strategy>, StoreError> {
		Ok(self.find_default(principal).await?)
	}

	async fn list_strategies(
		&self,
		filter: &StrategyFilter,
	) -> Result<(Vec<Strategy>, u64), StoreError> {
		Ok(self.list(filter).await?)
	}

	async fn apply_resource_links(&self, change: &ResourceLinkChange) -> Result<(), StoreError> {
		Ok(self.link_resources(change).await?)
	}

	async fn remove_principal(&self, principal: PrincipalRef) -> Result<(), StoreError> {
		Ok(self.purge_principal(principal).await?)
	}
}
