//! Engine-wide constants
//!
//! Single source of truth for capacities, storage keys and other defaults.

/// Default values for engine configuration
pub mod defaults {
    /// Maximum number of execution records kept in the history log
    pub const MAX_RECORDS: usize = 50;
    /// Maximum number of snapshots kept on the undo/redo stack
    pub const MAX_HISTORY_SIZE: usize = 50;
    /// Worker count for batch operations (one node applied to many files)
    pub const BATCH_CONCURRENCY: usize = 2;
    /// zstd level used for undo snapshots
    pub const SNAPSHOT_COMPRESSION_LEVEL: i32 = 3;
}

/// Keys used with the key-value store
pub mod storage_keys {
    /// Key holding the serialized execution history log
    pub const EXECUTION_HISTORY: &str = "pipeline-execution-history";
    /// Prefix for saved pipeline definitions
    pub const LIBRARY_PREFIX: &str = "pipeline-definition:";
    /// Key holding the index of saved pipeline names
    pub const LIBRARY_INDEX: &str = "pipeline-definition-index";
}

/// Separator optionally leading a format tag (".pdf" vs "pdf")
pub const FORMAT_SEPARATOR: char = '.';
