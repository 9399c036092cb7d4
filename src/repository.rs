//! Storage contract consumed by the execution core.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use crate::errors::RepoError;
use crate::storage::{ChainDefinition, CommandRecord};

pub type RepoResult<T> = std::result::Result<T, RepoError>;

pub trait Repository {
    /// Fetch one record; `RepoError::NotFound` when absent.
    fn get(&self, id: &str) -> RepoResult<CommandRecord>;
    /// Insert or replace one record.
    fn put(&self, record: &CommandRecord) -> RepoResult<()>;
    fn delete(&self, id: &str) -> RepoResult<()>;
    fn search_by_tag(&self, tag: &str) -> RepoResult<Vec<CommandRecord>>;
    fn search_by_status(&self, success: bool) -> RepoResult<Vec<CommandRecord>>;
    /// All records, newest first.
    fn get_all_commands(&self) -> RepoResult<Vec<CommandRecord>>;

    fn get_chain(&self, name: &str) -> RepoResult<ChainDefinition>;
    fn put_chain(&self, chain: &ChainDefinition) -> RepoResult<()>;
    fn delete_chain(&self, name: &str) -> RepoResult<()>;
    /// All chains, ordered by name.
    fn list_chains(&self) -> RepoResult<Vec<ChainDefinition>>;
}

/// Repository kept entirely in memory.
#[derive(Default)]
pub struct MemoryRepository {
    commands: Mutex<BTreeMap<String, CommandRecord>>,
    chains: Mutex<BTreeMap<String, ChainDefinition>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn commands(&self) -> MutexGuard<'_, BTreeMap<String, CommandRecord>> {
        self.commands.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn chains(&self) -> MutexGuard<'_, BTreeMap<String, ChainDefinition>> {
        self.chains.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn filtered<F>(&self, keep: F) -> Vec<CommandRecord>
    where
        F: Fn(&CommandRecord) -> bool,
    {
        let mut records: Vec<CommandRecord> =
            self.commands().values().filter(|&r| keep(r)).cloned().collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records
    }
}

impl Repository for MemoryRepository {
    fn get(&self, id: &str) -> RepoResult<CommandRecord> {
        self.commands()
            .get(id)
            .cloned()
            .ok_or_else(|| RepoError::NotFound(id.to_string()))
    }

    fn put(&self, record: &CommandRecord) -> RepoResult<()> {
        self.commands().insert(record.id.clone(), record.clone());
        Ok(())
    }

    fn delete(&self, id: &str) -> RepoResult<()> {
        self.commands()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| RepoError::NotFound(id.to_string()))
    }

    fn search_by_tag(&self, tag: &str) -> RepoResult<Vec<CommandRecord>> {
        Ok(self.filtered(|r| r.tags.iter().any(|t| t == tag)))
    }

    fn search_by_status(&self, success: bool) -> RepoResult<Vec<CommandRecord>> {
        Ok(self.filtered(|r| r.success == success))
    }

    fn get_all_commands(&self) -> RepoResult<Vec<CommandRecord>> {
        Ok(self.filtered(|_| true))
    }

    fn get_chain(&self, name: &str) -> RepoResult<ChainDefinition> {
        self.chains()
            .get(name)
            .cloned()
            .ok_or_else(|| RepoError::NotFound(name.to_string()))
    }

    fn put_chain(&self, chain: &ChainDefinition) -> RepoResult<()> {
        self.chains().insert(chain.name.clone(), chain.clone());
        Ok(())
    }

    fn delete_chain(&self, name: &str) -> RepoResult<()> {
        self.chains()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| RepoError::NotFound(name.to_string()))
    }

    fn list_chains(&self) -> RepoResult<Vec<ChainDefinition>> {
        Ok(self.chains().values().cloned().collect())
    }
}
