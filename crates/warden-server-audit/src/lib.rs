// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! History pipeline for strategy mutations.
//!
//! [`AuditService`] implements the auth crate's [`HistorySink`]: records are
//! queued without blocking the caller and fanned out to every [`AuditSink`]
//! on a background task.
//!
//! [`HistorySink`]: warden_server_auth::HistorySink

pub mod error;
pub mod filter;
pub mod pipeline;
pub mod sink;

pub use error::{AuditError, AuditResult, AuditSinkError};
pub use filter::HistoryFilter;
pub use pipeline::{history_sink, AuditService};
pub use sink::AuditSink;

pub use warden_server_config::{AuditConfig, QueueOverflowPolicy};

#[cfg(feature = "sink-tracing")]
pub use sink::tracing::TracingAuditSink;
