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

//! In-memory background-job status store.
//!
//! Progress mirror only; the durable store stays authoritative.

use dashmap::DashMap;
use verdict_core::JobStatus;

#[derive(Debug, Default)]
pub struct JobStatusStore {
    jobs: DashMap<String, JobStatus>,
}

impl JobStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_job_status(&self, job_id: &str, status: JobStatus) {
        self.jobs.insert(job_id.to_string(), status);
    }

    pub fn get_job_status(&self, job_id: &str) -> Option<JobStatus> {
        self.jobs.get(job_id).map(|s| s.clone())
    }

    pub fn delete_job_status(&self, job_id: &str) {
        self.jobs.remove(job_id);
    }
}
