//! Shared port pool.
//!
//! Ports are drawn from a fixed inclusive range with a monotonic cursor that
//! wraps to the range start, skipping ports that are still held. A full scan
//! without a free port reports [`ControlPlaneError::ResourceExhausted`].

use crate::error::{ControlPlaneError, Result};
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// First port of the default range.
pub const DEFAULT_PORT_RANGE_START: u16 = 8080;

/// Last port of the default range (inclusive).
pub const DEFAULT_PORT_RANGE_END: u16 = 9000;

struct PoolState {
    cursor: u16,
    allocated: HashSet<u16>,
}

/// Thread-safe pool of integer ports.
///
/// The cursor and the allocated set live behind one mutex, so two callers
/// can never both observe the same free port. The allocator knows nothing
/// about platforms or instances.
pub struct PortAllocator {
    start: u16,
    end: u16,
    state: Mutex<PoolState>,
}

impl PortAllocator {
    /// Create an allocator over the inclusive range `start..=end`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if `start > end`.
    pub fn new(start: u16, end: u16) -> Result<Self> {
        if start > end {
            return Err(ControlPlaneError::InvalidConfig(format!(
                "port range start {start} is greater than end {end}"
            )));
        }
        Ok(Self {
            start,
            end,
            state: Mutex::new(PoolState {
                cursor: start,
                allocated: HashSet::new(),
            }),
        })
    }

    /// Hand out the next free port.
    ///
    /// # Errors
    ///
    /// Returns `ResourceExhausted` when every port in the range is held.
    pub fn allocate(&self) -> Result<u16> {
        let mut state = self.lock();
        for _ in 0..self.capacity() {
            let candidate = state.cursor;
            state.cursor = if candidate >= self.end {
                self.start
            } else {
                candidate + 1
            };
            if state.allocated.insert(candidate) {
                tracing::debug!(port = candidate, "Port allocated");
                return Ok(candidate);
            }
        }
        tracing::warn!(start = self.start, end = self.end, "Port range exhausted");
        Err(ControlPlaneError::ResourceExhausted {
            start: self.start,
            end: self.end,
        })
    }

    /// Mark a specific port as held, e.g. one recorded before a restart.
    ///
    /// Returns `false` if the port is outside the range or already held.
    pub fn reserve(&self, port: u16) -> bool {
        if !(self.start..=self.end).contains(&port) {
            return false;
        }
        let reserved = self.lock().allocated.insert(port);
        if reserved {
            tracing::debug!(port, "Port reserved");
        }
        reserved
    }

    /// Return a port to the pool. Releasing a free port is a no-op.
    pub fn release(&self, port: u16) {
        if self.lock().allocated.remove(&port) {
            tracing::debug!(port, "Port released");
        }
    }

    /// Check whether a port is currently held.
    pub fn is_allocated(&self, port: u16) -> bool {
        self.lock().allocated.contains(&port)
    }

    /// Number of ports currently held.
    pub fn allocated_count(&self) -> usize {
        self.lock().allocated.len()
    }

    /// Total number of ports in the range.
    pub fn capacity(&self) -> usize {
        usize::from(self.end - self.start) + 1
    }

    /// The inclusive port range.
    pub fn range(&self) -> (u16, u16) {
        (self.start, self.end)
    }

    // The state is a plain set plus cursor and stays consistent even if a
    // holder panicked, so a poisoned lock is recovered rather than propagated.
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self {
            start: DEFAULT_PORT_RANGE_START,
            end: DEFAULT_PORT_RANGE_END,
            state: Mutex::new(PoolState {
                cursor: DEFAULT_PORT_RANGE_START,
                allocated: HashSet::new(),
            }),
        }
    }
}

impl std::fmt::Debug for PortAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortAllocator")
            .field("start", &self.start)
            .field("end", &self.end)
            .field("allocated", &self.allocated_count())
            .finish()
    }
}
