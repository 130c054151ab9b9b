//! Named pipeline definitions kept in a `KeyValueStore`.
//!
//! Each definition is stored under `<prefix><name>`, and a separate index
//! key lists the saved names so they can be enumerated without scanning.
//! Definitions are saved without run state.

use std::sync::Arc;

use crate::config::EngineConfig;
use crate::constants::storage_keys;
use crate::error::{PipelineError, Result};
use crate::storage::KeyValueStore;
use crate::types::PipelineGraph;

/// Store of saved pipeline definitions
pub struct PipelineLibrary {
    store: Arc<dyn KeyValueStore>,
    prefix: String,
    index_key: String,
}

impl PipelineLibrary {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            prefix: storage_keys::LIBRARY_PREFIX.to_string(),
            index_key: storage_keys::LIBRARY_INDEX.to_string(),
        }
    }

    pub fn with_config(store: Arc<dyn KeyValueStore>, config: &EngineConfig) -> Self {
        Self {
            prefix: config.library_prefix.clone(),
            ..Self::new(store)
        }
    }

    /// Save `graph` under `name`, replacing any previous definition
    pub fn save(&self, name: &str, graph: &PipelineGraph) -> Result<()> {
        let name = Self::check_name(name)?;

        let mut definition = graph.clone();
        definition.reset_run_state();
        let json = serde_json::to_string_pretty(&definition)?;
        self.store.set(&self.key_for(name), &json)?;

        let mut names = self.list()?;
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
            names.sort();
            self.write_index(&names)?;
        }

        log::info!("Saved pipeline definition '{}' ({} nodes)", name, graph.nodes.len());
        Ok(())
    }

    /// Load the definition saved under `name`
    pub fn load(&self, name: &str) -> Result<Option<PipelineGraph>> {
        let name = Self::check_name(name)?;
        match self.store.get(&self.key_for(name))? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Names of all saved definitions, sorted
    pub fn list(&self) -> Result<Vec<String>> {
        match self.store.get(&self.index_key)? {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(Vec::new()),
        }
    }

    /// Delete the definition saved under `name`.
    ///
    /// Returns whether it existed.
    pub fn delete(&self, name: &str) -> Result<bool> {
        let name = Self::check_name(name)?;
        let mut names = self.list()?;
        let before = names.len();
        names.retain(|n| n != name);
        let existed = names.len() != before;

        self.store.remove(&self.key_for(name))?;
        if existed {
            self.write_index(&names)?;
            log::info!("Deleted pipeline definition '{}'", name);
        }
        Ok(existed)
    }

    fn key_for(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    fn write_index(&self, names: &[String]) -> Result<()> {
        let json = serde_json::to_string(names)?;
        self.store.set(&self.index_key, &json)
    }

    fn check_name(name: &str) -> Result<&str> {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(PipelineError::Storage("Pipeline name must not be empty".to_string()));
        }
        Ok(trimmed)
    }
}
