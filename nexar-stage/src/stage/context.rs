//! Address-keyed record of live staging operations.
//!
//! Entries are keyed by the start of the staging buffer, which no two live
//! transfers share. The store maps that address back to what is needed to
//! finish or abort the staging operation. Every context is inserted once at
//! stage time and removed once at unstage or cancel time.

use crate::datatype::DatatypeHandle;
use crate::error::{Result, StageError};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// How to finish a staged transfer.
#[derive(Debug, Clone)]
pub enum StageContext {
    /// Outgoing data was packed into the buffer at stage time.
    Send {
        /// True lower bound the returned address was shifted by.
        true_lb: isize,
    },
    /// Incoming data must be unpacked into `dst` once delivered.
    Recv {
        dst: u64,
        count: usize,
        datatype: DatatypeHandle,
    },
}

impl StageContext {
    pub fn is_send(&self) -> bool {
        matches!(self, StageContext::Send { .. })
    }
}

/// Map from staging buffer start to [`StageContext`].
///
/// One lock around the whole map: every operation is O(1) and sits outside
/// the data-copy path.
#[derive(Debug, Default)]
pub struct StageContextStore {
    map: Mutex<HashMap<u64, StageContext>>,
}

impl StageContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<u64, StageContext>>> {
        self.map
            .lock()
            .map_err(|_| StageError::LockPoisoned("stage context store"))
    }

    /// Record `ctx` under `addr`. Fails if `addr` is already live.
    pub fn put(&self, addr: u64, ctx: StageContext) -> Result<()> {
        let mut map = self.lock()?;
        if map.contains_key(&addr) {
            return Err(StageError::DuplicateStage { addr });
        }
        map.insert(addr, ctx);
        Ok(())
    }

    /// Copy of the context recorded under `addr`.
    pub fn get(&self, addr: u64) -> Result<StageContext> {
        self.lock()?
            .get(&addr)
            .cloned()
            .ok_or(StageError::UnknownStage { addr })
    }

    /// Remove and return the context recorded under `addr`.
    pub fn erase(&self, addr: u64) -> Result<StageContext> {
        self.lock()?
            .remove(&addr)
            .ok_or(StageError::UnknownStage { addr })
    }

    pub fn contains(&self, addr: u64) -> bool {
        self.lock().map(|m| m.contains_key(&addr)).unwrap_or(false)
    }

    /// Number of live contexts.
    pub fn len(&self) -> usize {
        match self.map.lock() {
            Ok(m) => m.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
