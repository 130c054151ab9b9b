//! Execution history log
//!
//! An append-only, capacity-bounded log of past runs kept in a
//! `KeyValueStore`. History is auxiliary: a missing or corrupt log reads
//! as empty, and storage failures are logged rather than returned.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::constants::{defaults, storage_keys};
use crate::ids::{Clock, IdGenerator, SystemClock, UuidGenerator};
use crate::storage::KeyValueStore;
use crate::types::{NodeId, PipelineEdge, PipelineGraph, PipelineNode};

/// Lifecycle status of a recorded run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RecordStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RecordStatus::Running)
    }
}

/// Audit entry for one pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
    /// Snapshot of the nodes at run start
    pub nodes: Vec<PipelineNode>,
    /// Snapshot of the edges at run start
    pub edges: Vec<PipelineEdge>,
    pub file_count: usize,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// Run length in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    pub status: RecordStatus,
    pub successful_nodes: usize,
    pub total_nodes: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_node_id: Option<NodeId>,
}

/// Partial update applied by [`HistoryManager::update_record`]
#[derive(Debug, Clone, Default)]
pub struct ExecutionRecordUpdate {
    pub workflow_name: Option<String>,
    pub workflow_id: Option<String>,
    pub file_count: Option<usize>,
    pub successful_nodes: Option<usize>,
    pub error_message: Option<String>,
    pub failed_node_id: Option<NodeId>,
}

impl ExecutionRecordUpdate {
    fn apply(self, record: &mut ExecutionRecord) {
        if let Some(name) = self.workflow_name {
            record.workflow_name = Some(name);
        }
        if let Some(id) = self.workflow_id {
            record.workflow_id = Some(id);
        }
        if let Some(count) = self.file_count {
            record.file_count = count;
        }
        if let Some(successful) = self.successful_nodes {
            record.successful_nodes = successful;
        }
        if let Some(message) = self.error_message {
            record.error_message = Some(message);
        }
        if let Some(node_id) = self.failed_node_id {
            record.failed_node_id = Some(node_id);
        }
    }
}

/// Aggregates over the whole log
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStatistics {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Mean duration in milliseconds of completed runs
    pub avg_duration: f64,
    /// Completed runs as a percentage of all runs
    pub success_rate: f64,
}

/// Bounded, persisted log of execution records
pub struct HistoryManager {
    store: Arc<dyn KeyValueStore>,
    key: String,
    max_records: usize,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
    /// Serializes read-modify-write cycles against the store
    write_lock: Mutex<()>,
}

impl HistoryManager {
    /// Create a manager with default capacity and key
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            key: storage_keys::EXECUTION_HISTORY.to_string(),
            max_records: defaults::MAX_RECORDS,
            ids: Arc::new(UuidGenerator::default()),
            clock: Arc::new(SystemClock),
            write_lock: Mutex::new(()),
        }
    }

    /// Create a manager using the capacity and key from `config`
    pub fn with_config(store: Arc<dyn KeyValueStore>, config: &EngineConfig) -> Self {
        Self::new(store)
            .with_key(config.history_key.clone())
            .with_max_records(config.max_records)
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    pub fn with_max_records(mut self, max_records: usize) -> Self {
        self.max_records = max_records.max(1);
        self
    }

    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn max_records(&self) -> usize {
        self.max_records
    }

    /// Current time according to the injected clock
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Start a record for a run of `graph`.
    ///
    /// Nodes and edges are copied so later edits to the graph never change the record.
    pub fn create_record(
        &self,
        graph: &PipelineGraph,
        file_count: usize,
        workflow_name: Option<String>,
        workflow_id: Option<String>,
    ) -> ExecutionRecord {
        ExecutionRecord {
            id: self.ids.next_id(),
            workflow_name,
            workflow_id,
            nodes: graph.nodes.clone(),
            edges: graph.edges.clone(),
            file_count,
            start_time: self.clock.now(),
            end_time: None,
            duration: None,
            status: RecordStatus::Running,
            successful_nodes: 0,
            total_nodes: graph.nodes.len(),
            error_message: None,
            failed_node_id: None,
        }
    }

    /// Append a record, evicting the oldest beyond capacity
    pub fn add_record(&self, record: ExecutionRecord) {
        let _guard = self.write_lock.lock();
        let mut records = self.load();
        records.push(record);
        if records.len() > self.max_records {
            let excess = records.len() - self.max_records;
            records.drain(..excess);
            log::debug!("Evicted {} execution record(s) from history", excess);
        }
        self.save(&records);
    }

    /// Merge `update` into a running record.
    ///
    /// Returns false if the record is missing or already closed.
    pub fn update_record(&self, id: &str, update: ExecutionRecordUpdate) -> bool {
        let _guard = self.write_lock.lock();
        let mut records = self.load();
        let Some(record) = records.iter_mut().find(|r| r.id == id) else {
            log::warn!("Cannot update unknown execution record '{}'", id);
            return false;
        };
        if record.status.is_terminal() {
            log::warn!("Execution record '{}' is closed; update ignored", id);
            return false;
        }
        update.apply(record);
        self.save(&records);
        true
    }

    /// Close out a record with its terminal status.
    ///
    /// Sets end time and duration. A record is closed at most once; later
    /// calls are ignored and return false.
    pub fn complete_record(
        &self,
        id: &str,
        status: RecordStatus,
        successful_nodes: usize,
        error_message: Option<String>,
        failed_node_id: Option<NodeId>,
    ) -> bool {
        if !status.is_terminal() {
            log::warn!("Refusing to complete execution record '{}' with status running", id);
            return false;
        }

        let _guard = self.write_lock.lock();
        let mut records = self.load();
        let Some(record) = records.iter_mut().find(|r| r.id == id) else {
            log::warn!("Cannot complete unknown execution record '{}'", id);
            return false;
        };
        if record.status.is_terminal() {
            log::warn!("Execution record '{}' already completed as {:?}", id, record.status);
            return false;
        }

        let end_time = self.clock.now();
        let duration = (end_time - record.start_time).num_milliseconds().max(0) as u64;
        record.end_time = Some(end_time);
        record.duration = Some(duration);
        record.status = status;
        record.successful_nodes = successful_nodes;
        record.error_message = error_message;
        record.failed_node_id = failed_node_id;

        log::info!(
            "Execution '{}' finished as {:?} ({}/{} nodes, {} ms)",
            id,
            status,
            successful_nodes,
            record.total_nodes,
            duration
        );
        self.save(&records);
        true
    }

    /// All records, oldest first
    pub fn records(&self) -> Vec<ExecutionRecord> {
        self.load()
    }

    /// Look up a record by id
    pub fn get_record(&self, id: &str) -> Option<ExecutionRecord> {
        self.load().into_iter().find(|r| r.id == id)
    }

    /// Remove every record
    pub fn clear(&self) {
        let _guard = self.write_lock.lock();
        if let Err(e) = self.store.remove(&self.key) {
            log::error!("Failed to clear execution history: {}", e);
        }
    }

    /// Derive aggregate statistics from the full log
    pub fn statistics(&self) -> ExecutionStatistics {
        compute_statistics(&self.load())
    }

    fn load(&self) -> Vec<ExecutionRecord> {
        match self.store.get(&self.key) {
            Ok(Some(blob)) => match serde_json::from_str(&blob) {
                Ok(records) => records,
                Err(e) => {
                    log::warn!("Execution history is corrupt, treating as empty: {}", e);
                    Vec::new()
                }
            },
            Ok(None) => Vec::new(),
            Err(e) => {
                log::warn!("Failed to read execution history, treating as empty: {}", e);
                Vec::new()
            }
        }
    }

    fn save(&self, records: &[ExecutionRecord]) {
        let blob = match serde_json::to_string(records) {
            Ok(blob) => blob,
            Err(e) => {
                log::error!("Failed to serialize execution history: {}", e);
                return;
            }
        };
        if let Err(e) = self.store.set(&self.key, &blob) {
            log::error!("Failed to write execution history: {}", e);
        }
    }
}

/// Statistics over a set of records
pub fn compute_statistics(records: &[ExecutionRecord]) -> ExecutionStatistics {
    let total = records.len();
    let count = |status: RecordStatus| records.iter().filter(|r| r.status == status).count();
    let completed = count(RecordStatus::Completed);

    let durations: Vec<u64> = records
        .iter()
        .filter(|r| r.status == RecordStatus::Completed)
        .filter_map(|r| r.duration)
        .collect();
    let avg_duration = if durations.is_empty() {
        0.0
    } else {
        durations.iter().sum::<u64>() as f64 / durations.len() as f64
    };

    let success_rate = if total == 0 {
        0.0
    } else {
        completed as f64 * 100.0 / total as f64
    };

    ExecutionStatistics {
        total,
        completed,
        failed: count(RecordStatus::Failed),
        cancelled: count(RecordStatus::Cancelled),
        avg_duration,
        success_rate,
    }
}
