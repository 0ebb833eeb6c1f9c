// Copyright 2025 Verdict Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! # Verdict Storage
//!
//! Tenant-scoped durable persistence for experiments, logs, metrics,
//! scorers, and arena comparisons, plus the ephemeral job-status mirror.
//!
//! Records live in one append-only JSON-lines log per tenant with an
//! in-memory index rebuilt (and the log compacted) on open. All reads and
//! writes are filtered by tenant; API keys are scrubbed before anything
//! reaches disk.

use thiserror::Error;

mod job_status;
mod store;

pub use job_status::JobStatusStore;
pub use store::{EvalStore, MetricAggregate};

/// Errors from the persistence adapter.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    /// Uniqueness violation, e.g. a duplicate scorer metric_key within a
    /// tenant/project.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A write attempted to move a completed/failed record back to a
    /// non-terminal status.
    #[error("status is terminal: {0}")]
    TerminalStatus(String),

    /// Empty tenant. Every caller must supply one.
    #[error("missing tenant")]
    MissingTenant,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
