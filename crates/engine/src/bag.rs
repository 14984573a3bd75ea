//! The workflow bag: typed values shared between stages.
//!
//! An ART keyed by well-known strings. Values are owned by the bag and
//! dropped at teardown with the orchestrator invocation that created it.
//! The cancel flag rides alongside so stages can observe cooperative
//! cancellation without a bag lookup.

use crate::error::EngineError;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use vault_catalogue::BackupInfo;
use vault_core::Lsn;
use vault_primitives::{Art, JsonDocument};

// Well-known keys.
pub const NODE_SERVER_ID: &str = "server_id";
pub const NODE_LABEL: &str = "label";
pub const NODE_KIND: &str = "kind";
pub const NODE_PARENT_LABEL: &str = "parent_label";
pub const NODE_DIRECTORY: &str = "directory";
pub const NODE_SOURCE_DIRECTORY: &str = "source_directory";
pub const NODE_TARGET_DIRECTORY: &str = "target_directory";
pub const NODE_TARFILE: &str = "tarfile";
pub const NODE_OUTPUT: &str = "output";
pub const NODE_BACKUPS: &str = "backups";
pub const NODE_WAL_START: &str = "wal_start";
pub const NODE_WAL_STOP: &str = "wal_stop";
pub const NODE_SYSTEM_ID: &str = "system_id";
pub const NODE_ENDPOINT: &str = "endpoint";
pub const NODE_FAILURES: &str = "failures";

/// Heterogeneous bag value.
#[derive(Debug, Clone)]
pub enum BagValue {
    Bool(bool),
    I64(i64),
    U64(u64),
    Str(String),
    Path(PathBuf),
    Lsn(Lsn),
    Json(JsonDocument),
    Backups(Vec<BackupInfo>),
    StrList(Vec<String>),
}

/// Shared key/value state for one orchestrator invocation.
pub struct Bag {
    values: Art<BagValue>,
    cancel: Arc<AtomicBool>,
}

impl Bag {
    /// Fresh bag with its own cancel flag.
    pub fn new() -> Self {
        Bag {
            values: Art::new(),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Bag observing an external cancel flag.
    pub fn with_cancel(cancel: Arc<AtomicBool>) -> Self {
        Bag {
            values: Art::new(),
            cancel,
        }
    }

    /// Insert, replacing any previous value; ownership transfers to the bag.
    pub fn set(&mut self, key: &str, value: BagValue) {
        self.values.insert(key.as_bytes(), value);
    }

    /// Raw lookup.
    pub fn get(&self, key: &str) -> Option<&BagValue> {
        self.values.get(key.as_bytes())
    }

    /// Remove and take ownership back.
    pub fn take(&mut self, key: &str) -> Option<BagValue> {
        self.values.remove(key.as_bytes())
    }

    /// Keys currently present, in order.
    pub fn keys(&self) -> Vec<String> {
        self.values
            .keys()
            .into_iter()
            .map(|k| String::from_utf8_lossy(&k).into_owned())
            .collect()
    }

    /// String value or [`EngineError::MissingBagEntry`].
    pub fn require_str(&self, key: &'static str) -> Result<&str, EngineError> {
        match self.get(key) {
            Some(BagValue::Str(s)) => Ok(s),
            _ => Err(EngineError::MissingBagEntry(key)),
        }
    }

    /// Path value or [`EngineError::MissingBagEntry`].
    pub fn require_path(&self, key: &'static str) -> Result<&PathBuf, EngineError> {
        match self.get(key) {
            Some(BagValue::Path(p)) => Ok(p),
            _ => Err(EngineError::MissingBagEntry(key)),
        }
    }

    /// Optional string value.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.get(key) {
            Some(BagValue::Str(s)) => Some(s),
            _ => None,
        }
    }

    /// Optional path value.
    pub fn get_path(&self, key: &str) -> Option<&PathBuf> {
        match self.get(key) {
            Some(BagValue::Path(p)) => Some(p),
            _ => None,
        }
    }

    /// Optional bool value.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.get(key) {
            Some(BagValue::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    /// Optional u64 value.
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        match self.get(key) {
            Some(BagValue::U64(v)) => Some(*v),
            _ => None,
        }
    }

    /// Optional LSN value.
    pub fn get_lsn(&self, key: &str) -> Option<Lsn> {
        match self.get(key) {
            Some(BagValue::Lsn(lsn)) => Some(*lsn),
            _ => None,
        }
    }

    /// Optional backup-list value.
    pub fn get_backups(&self, key: &str) -> Option<&Vec<BackupInfo>> {
        match self.get(key) {
            Some(BagValue::Backups(backups)) => Some(backups),
            _ => None,
        }
    }

    /// Handle to the cancel flag, for wiring into signal handlers.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Request cooperative cancellation.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }
}

impl Default for Bag {
    fn default() -> Self {
        Bag::new()
    }
}
