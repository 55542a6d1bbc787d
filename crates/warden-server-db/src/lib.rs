// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! SQLite persistence for Warden.
//!
//! [`StrategyRepository`] is the transactional backing store behind the
//! strategy server and the strategy cache. [`SqliteAuditSink`] writes the
//! history pipeline's records to `history_records`.

pub mod error;
pub mod history;
pub mod pool;
pub mod schema;
pub mod strategy;
pub mod testing;

pub use error::{DbError, DbResult};
pub use history::{HistoryRepository, SqliteAuditSink};
pub use pool::{connect, create_pool};
pub use schema::run_migrations;
pub use strategy::StrategyRepository;
