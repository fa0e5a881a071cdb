//! Storage Module
//!
//! Directory-backed heap-file storage with a minimal transaction layer:
//! - `StorageManager` opens named heap files under a base directory
//! - base-table reads run under a statement's main transaction
//! - sort runs and join partitions live under a dedicated temp transaction
//!   whose end deletes every file created under it that an operator has not
//!   already cleaned up itself
//!
//! The transaction layer exists for lifecycle bookkeeping only; there is no
//! concurrency control or crash recovery for temp state (discarded with the
//! temp transaction).

mod error;
mod heap;

pub use error::{StorageError, StorageResult};
pub use heap::{HeapFile, HeapFileScan};

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::value::DataType;

/// A transaction handle issued by a `StorageManager`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Transaction {
    id: u64,
}

impl Transaction {
    pub fn id(&self) -> u64 {
        self.id
    }
}

#[derive(Debug, Default)]
struct TxInfo {
    /// Whether files created under this transaction are temporary and should
    /// be removed when the transaction ends.
    temp: bool,
    created_files: HashSet<String>,
}

#[derive(Debug, Default)]
struct ManagerState {
    next_tx_id: u64,
    transactions: HashMap<u64, TxInfo>,
}

/// Opens, creates, and deletes named heap files under a base directory.
#[derive(Debug)]
pub struct StorageManager {
    base_dir: PathBuf,
    state: Mutex<ManagerState>,
}

impl StorageManager {
    /// Create a manager over `base_dir`, creating the directory if needed.
    pub fn new(base_dir: impl Into<PathBuf>) -> StorageResult<Self> {
        let base_dir = base_dir.into();
        fs::create_dir_all(&base_dir)?;
        Ok(StorageManager {
            base_dir,
            state: Mutex::new(ManagerState::default()),
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Begin a transaction for base-table access.
    pub fn begin_transaction(&self) -> Transaction {
        self.begin(false)
    }

    /// Begin a transaction for temp files; files created under it are deleted
    /// when it ends.
    pub fn begin_temp_transaction(&self) -> Transaction {
        self.begin(true)
    }

    fn begin(&self, temp: bool) -> Transaction {
        let mut state = self.state.lock();
        let id = state.next_tx_id;
        state.next_tx_id += 1;
        state.transactions.insert(
            id,
            TxInfo {
                temp,
                created_files: HashSet::new(),
            },
        );
        Transaction { id }
    }

    fn file_path(&self, name: &str) -> PathBuf {
        self.base_dir.join(name)
    }

    /// Open (or create) a heap file under a transaction.
    pub fn heap_file(
        &self,
        tx: Transaction,
        name: &str,
        schema: Vec<DataType>,
        create_if_not_exists: bool,
    ) -> StorageResult<HeapFile> {
        let path = self.file_path(name);
        if !path.exists() {
            if !create_if_not_exists {
                return Err(StorageError::FileNotFound(name.to_string()));
            }
            OpenOptions::new().create_new(true).write(true).open(&path)?;
            let mut state = self.state.lock();
            let info = state
                .transactions
                .get_mut(&tx.id)
                .ok_or(StorageError::UnknownTransaction(tx.id))?;
            if info.temp {
                info.created_files.insert(name.to_string());
            }
        }
        Ok(HeapFile::new(name.to_string(), path, schema))
    }

    /// Remove a heap file and its transaction bookkeeping.
    pub fn delete_heap_file(&self, tx: Transaction, name: &str) -> StorageResult<()> {
        let path = self.file_path(name);
        if path.exists() {
            fs::remove_file(&path)?;
        }
        let mut state = self.state.lock();
        if let Some(info) = state.transactions.get_mut(&tx.id) {
            info.created_files.remove(name);
        }
        Ok(())
    }

    /// End a transaction. For a temp transaction, any files still registered
    /// to it are deleted.
    pub fn end_transaction(&self, tx: Transaction) -> StorageResult<()> {
        let info = {
            let mut state = self.state.lock();
            state
                .transactions
                .remove(&tx.id)
                .ok_or(StorageError::UnknownTransaction(tx.id))?
        };
        if info.temp {
            for name in &info.created_files {
                debug!(file = %name, "removing leftover temp file at transaction end");
                let path = self.file_path(name);
                if path.exists() {
                    fs::remove_file(&path)?;
                }
            }
        }
        Ok(())
    }

    /// Names of temp files currently registered under a transaction.
    /// Empty for non-temp transactions and after operators clean up.
    pub fn live_temp_files(&self, tx: Transaction) -> Vec<String> {
        let state = self.state.lock();
        state
            .transactions
            .get(&tx.id)
            .map(|info| {
                let mut names: Vec<String> = info.created_files.iter().cloned().collect();
                names.sort();
                names
            })
            .unwrap_or_default()
    }
}
