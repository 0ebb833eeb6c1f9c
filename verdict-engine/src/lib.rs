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

//! # Verdict Engine
//!
//! The experiment orchestrator: owns the `pending → running →
//! completed | failed` lifecycle, threads per-run credentials instead of
//! mutating process env, and drives dataset loading, test-case
//! construction, metric dispatch, custom scorers, log merges, and result
//! aggregation in order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

mod gatekeeper;
mod orchestrator;

pub use gatekeeper::evaluate_gate;
pub use orchestrator::Orchestrator;

/// Cooperative cancellation checked between samples. Cancelling mid-run
/// finalizes the experiment as `failed` with `error_message="cancelled"`.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{0}")]
    Config(String),

    #[error("{0}")]
    Dataset(String),

    #[error("cancelled")]
    Cancelled,

    #[error("provider error: {0}")]
    Provider(#[from] verdict_providers::ProviderError),

    #[error("store error: {0}")]
    Store(#[from] verdict_storage::StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_flag() {
        let flag = CancellationFlag::new();
        assert!(!flag.is_cancelled());
        let clone = flag.clone();
        clone.cancel();
        assert!(flag.is_cancelled());
    }
}
