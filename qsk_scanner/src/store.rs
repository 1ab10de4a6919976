//! Persistence of the scan cursor, recent local headers and the unscanned
//! retry log.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use qsk_common::{BlockHeader, UnscanRecord};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// How many recent headers each symbol keeps for fork rewind.
const LOCAL_HEADER_WINDOW: usize = 100;

/// Storage consulted and written by the scanner. All operations are
/// idempotent; the scanner sequences writes such that a crash leaves the
/// cursor pointing at a height already fully emitted.
pub trait ScanStore: Send + Sync {
    /// The persisted cursor, `(0, "")` when the symbol was never scanned.
    fn cursor(&self, symbol: &str) -> Result<(u64, String), Error>;

    fn save_cursor(&self, symbol: &str, height: u64, hash: &str) -> Result<(), Error>;

    /// Keep a recently scanned header for fork rewind. Implementations may
    /// prune headers well below the cursor.
    fn save_local_header(&self, header: &BlockHeader) -> Result<(), Error>;

    fn local_header(&self, symbol: &str, height: u64) -> Result<Option<BlockHeader>, Error>;

    fn unscan_records(&self, symbol: &str) -> Result<Vec<UnscanRecord>, Error>;

    /// Insert a new record or replace the one with the same
    /// `(symbol, height, tx_id)` key.
    fn save_unscan(&self, record: &UnscanRecord) -> Result<(), Error>;

    fn delete_unscan_by_height(&self, symbol: &str, height: u64) -> Result<(), Error>;

    fn delete_unscan_by_id(&self, symbol: &str, id: &str) -> Result<(), Error>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SymbolState {
    cursor_height: u64,
    cursor_hash: String,
    headers: BTreeMap<u64, BlockHeader>,
    unscan: Vec<UnscanRecord>,
}

impl SymbolState {
    fn save_header(&mut self, header: &BlockHeader) {
        self.headers.insert(header.height, header.clone());
        while self.headers.len() > LOCAL_HEADER_WINDOW {
            let oldest = match self.headers.keys().next() {
                Some(height) => *height,
                None => break,
            };
            self.headers.remove(&oldest);
        }
    }

    fn save_unscan(&mut self, record: &UnscanRecord) {
        match self.unscan.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => *existing = record.clone(),
            None => self.unscan.push(record.clone()),
        }
    }
}

/// An in-memory store for tests and embedders that persist elsewhere.
#[derive(Debug, Default)]
pub struct MemoryStore {
    symbols: Mutex<HashMap<String, SymbolState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, symbol: &str, f: impl FnOnce(&mut SymbolState) -> T) -> T {
        let mut symbols = self.symbols.lock().expect("store poisoned");
        f(symbols.entry(symbol.to_string()).or_default())
    }
}

impl ScanStore for MemoryStore {
    fn cursor(&self, symbol: &str) -> Result<(u64, String), Error> {
        Ok(self.with_state(symbol, |state| {
            (state.cursor_height, state.cursor_hash.clone())
        }))
    }

    fn save_cursor(&self, symbol: &str, height: u64, hash: &str) -> Result<(), Error> {
        self.with_state(symbol, |state| {
            state.cursor_height = height;
            state.cursor_hash = hash.to_string();
        });
        Ok(())
    }

    fn save_local_header(&self, header: &BlockHeader) -> Result<(), Error> {
        self.with_state(&header.symbol, |state| state.save_header(header));
        Ok(())
    }

    fn local_header(&self, symbol: &str, height: u64) -> Result<Option<BlockHeader>, Error> {
        Ok(self.with_state(symbol, |state| state.headers.get(&height).cloned()))
    }

    fn unscan_records(&self, symbol: &str) -> Result<Vec<UnscanRecord>, Error> {
        Ok(self.with_state(symbol, |state| state.unscan.clone()))
    }

    fn save_unscan(&self, record: &UnscanRecord) -> Result<(), Error> {
        self.with_state(&record.symbol, |state| state.save_unscan(record));
        Ok(())
    }

    fn delete_unscan_by_height(&self, symbol: &str, height: u64) -> Result<(), Error> {
        self.with_state(symbol, |state| {
            state.unscan.retain(|r| r.block_height != height)
        });
        Ok(())
    }

    fn delete_unscan_by_id(&self, symbol: &str, id: &str) -> Result<(), Error> {
        self.with_state(symbol, |state| state.unscan.retain(|r| r.id != id));
        Ok(())
    }
}

/// A store keeping one JSON document per symbol under a directory, replaced
/// atomically on every write.
#[derive(Debug)]
pub struct FsStore {
    dir: PathBuf,
    // Serializes the read-modify-write cycle.
    lock: Mutex<()>,
}

impl FsStore {
    /// Open (and create if needed) a store under `dir`.
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self, Error> {
        std::fs::create_dir_all(dir.as_ref())?;
        Ok(FsStore {
            dir: dir.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        })
    }

    fn path(&self, symbol: &str) -> PathBuf {
        self.dir.join(format!("{symbol}.json"))
    }

    fn load(&self, symbol: &str) -> Result<SymbolState, Error> {
        let path = self.path(symbol);
        if !path.exists() {
            return Ok(SymbolState::default());
        }
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn save(&self, symbol: &str, state: &SymbolState) -> Result<(), Error> {
        let path = self.path(symbol);
        let tmp = self.dir.join(format!("{symbol}.json.tmp"));
        std::fs::write(&tmp, serde_json::to_vec(state)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn update<T>(
        &self,
        symbol: &str,
        f: impl FnOnce(&mut SymbolState) -> T,
    ) -> Result<T, Error> {
        let _guard = self.lock.lock().expect("store poisoned");
        let mut state = self.load(symbol)?;
        let result = f(&mut state);
        self.save(symbol, &state)?;
        Ok(result)
    }

    fn read<T>(&self, symbol: &str, f: impl FnOnce(&SymbolState) -> T) -> Result<T, Error> {
        let _guard = self.lock.lock().expect("store poisoned");
        let state = self.load(symbol)?;
        Ok(f(&state))
    }
}

impl ScanStore for FsStore {
    fn cursor(&self, symbol: &str) -> Result<(u64, String), Error> {
        self.read(symbol, |state| {
            (state.cursor_height, state.cursor_hash.clone())
        })
    }

    fn save_cursor(&self, symbol: &str, height: u64, hash: &str) -> Result<(), Error> {
        self.update(symbol, |state| {
            state.cursor_height = height;
            state.cursor_hash = hash.to_string();
        })
    }

    fn save_local_header(&self, header: &BlockHeader) -> Result<(), Error> {
        self.update(&header.symbol, |state| state.save_header(header))
    }

    fn local_header(&self, symbol: &str, height: u64) -> Result<Option<BlockHeader>, Error> {
        self.read(symbol, |state| state.headers.get(&height).cloned())
    }

    fn unscan_records(&self, symbol: &str) -> Result<Vec<UnscanRecord>, Error> {
        self.read(symbol, |state| state.unscan.clone())
    }

    fn save_unscan(&self, record: &UnscanRecord) -> Result<(), Error> {
        self.update(&record.symbol, |state| state.save_unscan(record))
    }

    fn delete_unscan_by_height(&self, symbol: &str, height: u64) -> Result<(), Error> {
        self.update(symbol, |state| {
            state.unscan.retain(|r| r.block_height != height)
        })
    }

    fn delete_unscan_by_id(&self, symbol: &str, id: &str) -> Result<(), Error> {
        self.update(symbol, |state| state.unscan.retain(|r| r.id != id))
    }
}
