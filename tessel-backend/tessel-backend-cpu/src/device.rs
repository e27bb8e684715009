use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tessel_core::{DeviceBuffer, Result, TesselError};

#[derive(Debug, Default)]
struct LedgerState {
    next_id: u64,
    live: HashSet<u64>,
    released: Vec<u64>,
}

/// Bookkeeping for simulated device allocations.
///
/// Clones share the same state, so a test can keep one handle while the
/// engine hands buffers out through another.
#[derive(Debug, Clone, Default)]
pub struct DeviceLedger {
    state: Arc<Mutex<LedgerState>>,
}

impl DeviceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&self, len: usize) -> Result<CpuDeviceBuffer> {
        let mut state = self.lock();
        state.next_id += 1;
        let id = state.next_id;
        state.live.insert(id);
        Ok(CpuDeviceBuffer {
            id,
            len,
            ledger: self.clone(),
        })
    }

    /// Number of allocations not yet released.
    pub fn live(&self) -> usize {
        self.lock().live.len()
    }

    pub fn allocated(&self) -> u64 {
        self.lock().next_id
    }

    pub fn is_released(&self, id: u64) -> bool {
        self.lock().released.contains(&id)
    }

    pub fn released_ids(&self) -> Vec<u64> {
        self.lock().released.clone()
    }

    fn release(&self, id: u64) -> Result<()> {
        let mut state = self.lock();
        if !state.live.remove(&id) {
            return Err(TesselError::Engine(format!(
                "device buffer {id} released twice or never allocated"
            )));
        }
        state.released.push(id);
        Ok(())
    }

    // Every update is a single insert/remove, so a poisoned state is still consistent.
    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A simulated device allocation tracked by a [`DeviceLedger`].
#[derive(Debug)]
pub struct CpuDeviceBuffer {
    id: u64,
    len: usize,
    ledger: DeviceLedger,
}

impl DeviceBuffer for CpuDeviceBuffer {
    fn id(&self) -> u64 {
        self.id
    }

    fn len(&self) -> usize {
        self.len
    }

    fn release(&self) -> Result<()> {
        self.ledger.release(self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_double_release_is_error() {
        let ledger = DeviceLedger::new();
        let buf = ledger.allocate(16).unwrap();
        buf.release().unwrap();
        assert!(buf.release().is_err());
        assert_eq!(ledger.released_ids(), vec![buf.id()]);
    }

    #[test]
    fn test_counts_survive_poisoned_lock() {
        let ledger = DeviceLedger::new();
        let buf = ledger.allocate(16).unwrap();

        let shared = ledger.clone();
        let result = std::thread::spawn(move || {
            let _guard = shared.state.lock().unwrap();
            panic!("panic while holding the ledger lock");
        })
        .join();
        assert!(result.is_err());
        assert!(ledger.state.is_poisoned());

        assert_eq!(ledger.live(), 1);
        assert_eq!(ledger.allocated(), 1);
        assert!(!ledger.is_released(buf.id()));

        buf.release().unwrap();
        assert_eq!(ledger.live(), 0);
        assert!(ledger.is_released(buf.id()));
    }
}
