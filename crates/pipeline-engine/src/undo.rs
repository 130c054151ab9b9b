//! Undo/redo for graph editing, using compressed snapshots
//!
//! Every committed edit pushes a zstd-compressed JSON copy of the graph.
//! Undo and redo move an index over those snapshots; pushing from the
//! middle of the stack discards the redo tail (linear undo).
//!
//! Re-applying a snapshot returned by `undo`/`redo` normally triggers the
//! caller's "graph changed" hook, which would push it again. The stack
//! suppresses exactly one push after each successful undo or redo so that
//! round trip does not create a new entry.

use std::collections::VecDeque;

use crate::config::EngineConfig;
use crate::constants::defaults;
use crate::error::{PipelineError, Result};
use crate::types::PipelineGraph;

/// Undo/redo stack for graph edits
pub struct EditHistory {
    /// Compressed graph states (zstd)
    snapshots: VecDeque<Vec<u8>>,
    /// Current position in the stack; meaningless while empty
    current: usize,
    /// Maximum number of snapshots to keep
    max_snapshots: usize,
    /// zstd compression level
    level: i32,
    /// Skip the next push (set by undo/redo)
    suppress_next_push: bool,
}

impl EditHistory {
    /// Create a new stack with the specified maximum size
    pub fn new(max_snapshots: usize) -> Self {
        Self {
            snapshots: VecDeque::new(),
            current: 0,
            max_snapshots: max_snapshots.max(1),
            level: defaults::SNAPSHOT_COMPRESSION_LEVEL,
            suppress_next_push: false,
        }
    }

    /// Create a stack sized from the engine configuration
    pub fn with_config(config: &EngineConfig) -> Self {
        let mut history = Self::new(config.max_history_size);
        history.level = config.snapshot_compression_level;
        history
    }

    /// Snapshot the graph after an edit.
    ///
    /// Truncates any redo history. When the stack is full the oldest snapshot
    /// is dropped; the index stays on the newest entry either way. Failures
    /// are logged and leave the stack unchanged.
    pub fn push(&mut self, graph: &PipelineGraph) {
        if self.suppress_next_push {
            self.suppress_next_push = false;
            log::trace!("Skipping snapshot push that follows undo/redo");
            return;
        }

        let compressed = match self.compress(graph) {
            Ok(compressed) => compressed,
            Err(e) => {
                log::error!("Failed to snapshot graph for undo: {}", e);
                return;
            }
        };

        // Truncate any redo history
        if !self.snapshots.is_empty() {
            self.snapshots.truncate(self.current + 1);
        }

        self.snapshots.push_back(compressed);
        if self.snapshots.len() > self.max_snapshots {
            // Stack did not grow, so the index does not move
            self.snapshots.pop_front();
        } else {
            self.current = self.snapshots.len() - 1;
        }
    }

    /// Undo: move back one snapshot
    ///
    /// Returns the previous graph state, or None if at the beginning.
    pub fn undo(&mut self) -> Option<PipelineGraph> {
        if !self.can_undo() {
            return None;
        }
        self.current -= 1;
        self.restore(self.current)
    }

    /// Redo: move forward one snapshot
    ///
    /// Returns the next graph state, or None if at the end.
    pub fn redo(&mut self) -> Option<PipelineGraph> {
        if !self.can_redo() {
            return None;
        }
        self.current += 1;
        self.restore(self.current)
    }

    /// Get the current graph state without modifying the stack
    pub fn current(&self) -> Option<PipelineGraph> {
        if self.snapshots.is_empty() {
            return None;
        }
        self.decompress(self.current)
            .map_err(|e| log::error!("Failed to read undo snapshot: {}", e))
            .ok()
    }

    /// Check if undo is available
    pub fn can_undo(&self) -> bool {
        !self.snapshots.is_empty() && self.current > 0
    }

    /// Check if redo is available
    pub fn can_redo(&self) -> bool {
        self.current + 1 < self.snapshots.len()
    }

    /// Get the number of snapshots
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    /// Check if the stack is empty
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Position of the current snapshot, if any
    pub fn index(&self) -> Option<usize> {
        (!self.snapshots.is_empty()).then_some(self.current)
    }

    /// Clear all snapshots
    pub fn clear(&mut self) {
        self.snapshots.clear();
        self.current = 0;
        self.suppress_next_push = false;
    }

    /// Get the total compressed size of all snapshots
    pub fn compressed_size(&self) -> usize {
        self.snapshots.iter().map(|s| s.len()).sum()
    }

    fn restore(&mut self, index: usize) -> Option<PipelineGraph> {
        match self.decompress(index) {
            Ok(graph) => {
                self.suppress_next_push = true;
                Some(graph)
            }
            Err(e) => {
                log::error!("Undo history is unreadable, discarding it: {}", e);
                self.clear();
                None
            }
        }
    }

    fn compress(&self, graph: &PipelineGraph) -> Result<Vec<u8>> {
        let json = serde_json::to_vec(graph)?;
        zstd::encode_all(&json[..], self.level)
            .map_err(|e| PipelineError::Compression(e.to_string()))
    }

    /// Decompress a snapshot at the given index
    fn decompress(&self, index: usize) -> Result<PipelineGraph> {
        let compressed = self
            .snapshots
            .get(index)
            .ok_or_else(|| PipelineError::Compression(format!("No snapshot at index {}", index)))?;
        let json = zstd::decode_all(&compressed[..])
            .map_err(|e| PipelineError::Compression(e.to_string()))?;
        let graph: PipelineGraph = serde_json::from_slice(&json)?;
        Ok(graph)
    }
}

impl Default for EditHistory {
    fn default() -> Self {
        Self::new(defaults::MAX_HISTORY_SIZE)
    }
}
