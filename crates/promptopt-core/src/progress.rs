/*
Copyright 2024, Zep Software, Inc.

Licensed under the Apache License, Version 2.0 (the "License");
you may not use this file except in compliance with the License.
You may obtain a copy of the License at

    http://www.apache.org/licenses/LICENSE-2.0

Unless required by applicable law or agreed to in writing, software
distributed under the License is distributed on an "AS IS" BASIS,
WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
See the License for the specific language governing permissions and
limitations under the License.
*/

//! Live status of running optimizations, keyed by config id. One store,
//! one mutex: operations are tiny next to LLM latency.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Waiting,
    Running,
    Completed,
    Error,
}

/// Snapshot of one optimization run's state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub status: RunStatus,
    pub current_iteration: u32,
    pub max_iterations: u32,
    pub current_score: Option<f64>,
    pub best_score: Option<f64>,
    pub message: String,
    pub new_prompt_id: Option<i64>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProgressRecord {
    fn new() -> Self {
        let now = Utc::now();
        Self {
            status: RunStatus::Running,
            current_iteration: 0,
            max_iterations: 0,
            current_score: None,
            best_score: None,
            message: String::new(),
            new_prompt_id: None,
            started_at: now,
            updated_at: now,
        }
    }
}

/// Partial update merged into a progress record. Unset fields keep their
/// current values.
#[derive(Debug, Clone, Default)]
pub struct ProgressUpdate {
    pub status: Option<RunStatus>,
    pub current_iteration: Option<u32>,
    pub max_iterations: Option<u32>,
    pub current_score: Option<f64>,
    pub best_score: Option<f64>,
    pub message: Option<String>,
    pub new_prompt_id: Option<i64>,
}

impl ProgressUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: RunStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn current_iteration(mut self, iteration: u32) -> Self {
        self.current_iteration = Some(iteration);
        self
    }

    pub fn max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = Some(max);
        self
    }

    pub fn current_score(mut self, score: f64) -> Self {
        self.current_score = Some(score);
        self
    }

    pub fn best_score(mut self, score: f64) -> Self {
        self.best_score = Some(score);
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

fn merge(record: &mut ProgressRecord, update: ProgressUpdate) {
    if let Some(status) = update.status {
        record.status = status;
    }
    if let Some(iteration) = update.current_iteration {
        record.current_iteration = iteration;
    }
    if let Some(max) = update.max_iterations {
        record.max_iterations = max;
    }
    if let Some(score) = update.current_score {
        record.current_score = Some(score);
    }
    if let Some(score) = update.best_score {
        record.best_score = Some(score);
    }
    if let Some(message) = update.message {
        record.message = message;
    }
    if let Some(id) = update.new_prompt_id {
        record.new_prompt_id = Some(id);
    }
    record.updated_at = Utc::now();
}

/// Shared, injectable progress store. Cloning hands out another handle
/// to the same underlying map.
#[derive(Clone, Default)]
pub struct ProgressTracker {
    records: Arc<Mutex<HashMap<i64, ProgressRecord>>>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge an update into the record for `config_id`, creating it with
    /// defaults if absent, and stamp the update time.
    pub fn update(&self, config_id: i64, update: ProgressUpdate) {
        let mut records = self.records.lock().expect("progress lock poisoned");
        let record = records.entry(config_id).or_insert_with(ProgressRecord::new);
        merge(record, update);
    }

    /// Atomically claim `config_id` for a new run. Checks for a live
    /// record and replaces it with a fresh `running` one under a single
    /// lock acquisition, so two concurrent starts cannot both succeed.
    pub fn try_begin(&self, config_id: i64) -> bool {
        let mut records = self.records.lock().expect("progress lock poisoned");
        if let Some(record) = records.get(&config_id) {
            if matches!(record.status, RunStatus::Running | RunStatus::Waiting) {
                return false;
            }
        }
        records.insert(config_id, ProgressRecord::new());
        true
    }

    /// Replace any existing record with a fresh one and merge `update`
    /// into it, under a single lock acquisition. Unlike `clear` followed
    /// by `update`, no reader can observe the record missing in between.
    pub fn reset(&self, config_id: i64, update: ProgressUpdate) {
        let mut records = self.records.lock().expect("progress lock poisoned");
        let mut record = ProgressRecord::new();
        merge(&mut record, update);
        records.insert(config_id, record);
    }

    pub fn get(&self, config_id: i64) -> Option<ProgressRecord> {
        self.records
            .lock()
            .expect("progress lock poisoned")
            .get(&config_id)
            .cloned()
    }

    pub fn clear(&self, config_id: i64) {
        self.records
            .lock()
            .expect("progress lock poisoned")
            .remove(&config_id);
    }

    pub fn is_running(&self, config_id: i64) -> bool {
        matches!(
            self.get(config_id),
            Some(ProgressRecord {
                status: RunStatus::Running | RunStatus::Waiting,
                ..
            })
        )
    }

    pub fn set_complete(
        &self,
        config_id: i64,
        final_score: f64,
        message: impl Into<String>,
        new_prompt_id: Option<i64>,
    ) {
        self.update(
            config_id,
            ProgressUpdate {
                status: Some(RunStatus::Completed),
                best_score: Some(final_score),
                message: Some(message.into()),
                new_prompt_id,
                ..Default::default()
            },
        );
    }

    pub fn set_error(&self, config_id: i64, error_message: impl Into<String>) {
        self.update(
            config_id,
            ProgressUpdate::new()
                .status(RunStatus::Error)
                .message(error_message),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_creates_then_merges() {
        let tracker = ProgressTracker::new();
        assert!(tracker.get(1).is_none());

        tracker.update(
            1,
            ProgressUpdate::new()
                .status(RunStatus::Running)
                .max_iterations(10)
                .message("starting"),
        );
        tracker.update(1, ProgressUpdate::new().current_iteration(3));

        let record = tracker.get(1).unwrap();
        assert_eq!(record.status, RunStatus::Running);
        assert_eq!(record.max_iterations, 10);
        assert_eq!(record.current_iteration, 3);
        assert_eq!(record.message, "starting");
    }

    #[test]
    fn test_is_running_tracks_terminal_states() {
        let tracker = ProgressTracker::new();
        tracker.update(7, ProgressUpdate::new().status(RunStatus::Running));
        assert!(tracker.is_running(7));

        tracker.set_complete(7, 0.8, "done", Some(42));
        assert!(!tracker.is_running(7));
        let record = tracker.get(7).unwrap();
        assert_eq!(record.status, RunStatus::Completed);
        assert_eq!(record.best_score, Some(0.8));
        assert_eq!(record.new_prompt_id, Some(42));

        tracker.set_error(8, "boom");
        assert!(!tracker.is_running(8));
        assert_eq!(tracker.get(8).unwrap().message, "boom");
    }

    #[test]
    fn test_clear_removes_record() {
        let tracker = ProgressTracker::new();
        tracker.update(1, ProgressUpdate::new());
        tracker.clear(1);
        assert!(tracker.get(1).is_none());
        assert!(!tracker.is_running(1));
    }

    #[test]
    fn test_handles_share_state() {
        let tracker = ProgressTracker::new();
        let other = tracker.clone();
        tracker.update(5, ProgressUpdate::new().message("shared"));
        assert_eq!(other.get(5).unwrap().message, "shared");
    }

    #[test]
    fn test_try_begin_claims_exactly_once() {
        let tracker = ProgressTracker::new();

        assert!(tracker.try_begin(3));
        assert_eq!(tracker.get(3).unwrap().status, RunStatus::Running);

        // Claimed: a second start must be rejected.
        assert!(!tracker.try_begin(3));

        tracker.set_error(3, "boom");
        assert!(tracker.try_begin(3));
        let record = tracker.get(3).unwrap();
        assert_eq!(record.status, RunStatus::Running);
        assert_eq!(record.message, "");

        tracker.set_complete(3, 0.5, "done", None);
        assert!(tracker.try_begin(3));

        tracker.clear(3);
        assert!(tracker.try_begin(3));
    }

    #[test]
    fn test_reset_discards_prior_run_state() {
        let tracker = ProgressTracker::new();
        tracker.set_complete(4, 0.9, "done", Some(17));

        tracker.reset(
            4,
            ProgressUpdate::new()
                .status(RunStatus::Running)
                .max_iterations(12)
                .message("restarting"),
        );

        let record = tracker.get(4).unwrap();
        assert_eq!(record.status, RunStatus::Running);
        assert_eq!(record.max_iterations, 12);
        assert_eq!(record.message, "restarting");
        assert_eq!(record.best_score, None);
        assert_eq!(record.new_prompt_id, None);
    }
}
