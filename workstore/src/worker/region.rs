//! Fixed-size reply region used by blocking calls.
//!
//! Layout: bytes `0..4` are the semaphore cell, a little-endian `i32` that
//! stays zero until the worker answers. A positive value is the length of a
//! success payload, a negative value the length of an error payload. The
//! payload starts right after the cell.
//!
//! The waiter parks its thread on a condition variable while the cell is
//! zero; it never spins or yields cooperatively.

use crate::core::{Result, StoreError};
use parking_lot::{Condvar, Mutex, MutexGuard};

/// Size of the semaphore cell at offset 0
pub const HEADER_LEN: usize = std::mem::size_of::<i32>();

/// Smallest region accepted, large enough for any encoded error object
pub const MIN_REGION_BYTES: usize = 1024;

/// One-shot shared reply buffer for a single blocking call
pub struct SharedRegion {
    cells: Mutex<Box<[u8]>>,
    signal: Condvar,
}

impl SharedRegion {
    /// Allocate a zeroed region of `capacity` bytes (cell included)
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity < MIN_REGION_BYTES || capacity > i32::MAX as usize {
            return Err(StoreError::Config(format!(
                "region capacity must be between {} and {} bytes, got {}",
                MIN_REGION_BYTES,
                i32::MAX,
                capacity
            )));
        }

        Ok(Self {
            cells: Mutex::new(vec![0u8; capacity].into_boxed_slice()),
            signal: Condvar::new(),
        })
    }

    /// Total size of the region including the cell
    pub fn capacity(&self) -> usize {
        self.cells.lock().len()
    }

    /// Largest payload that fits after the cell
    pub fn payload_capacity(&self) -> usize {
        self.capacity() - HEADER_LEN
    }

    /// Whether the worker already stored a reply
    pub fn is_signaled(&self) -> bool {
        read_cell(&self.cells.lock()) != 0
    }

    /// Write a reply and wake the waiter.
    ///
    /// Fails without touching the region if the payload does not fit or a
    /// reply was already written.
    pub fn write(&self, payload: &[u8], failed: bool) -> Result<()> {
        let mut cells = self.cells.lock();

        if read_cell(&cells) != 0 {
            return Err(StoreError::WorkerFault(
                "reply region already signaled".to_string(),
            ));
        }

        let room = cells.len() - HEADER_LEN;
        if payload.is_empty() || payload.len() > room {
            return Err(StoreError::OversizedResponse(format!(
                "response of {} bytes does not fit in a {} byte region",
                payload.len(),
                room
            )));
        }

        cells[HEADER_LEN..HEADER_LEN + payload.len()].copy_from_slice(payload);

        // Fits in i32: capacity is capped at i32::MAX
        let len = payload.len() as i32;
        let cell = if failed { -len } else { len };
        cells[..HEADER_LEN].copy_from_slice(&cell.to_le_bytes());

        self.signal.notify_all();
        Ok(())
    }

    /// Block the current thread until a reply is written
    pub fn wait(&self) -> RegionReply<'_> {
        let mut cells = self.cells.lock();
        while read_cell(&cells) == 0 {
            self.signal.wait(&mut cells);
        }
        RegionReply { cells }
    }
}

/// Reply read back from a signaled region; borrows the region while alive
pub struct RegionReply<'a> {
    cells: MutexGuard<'a, Box<[u8]>>,
}

impl RegionReply<'_> {
    /// True when the worker stored an error object
    pub fn failed(&self) -> bool {
        read_cell(&self.cells) < 0
    }

    /// Exactly the payload bytes announced by the cell
    pub fn payload(&self) -> &[u8] {
        let len = read_cell(&self.cells).unsigned_abs() as usize;
        &self.cells[HEADER_LEN..HEADER_LEN + len]
    }
}

fn read_cell(cells: &[u8]) -> i32 {
    let mut header = [0u8; HEADER_LEN];
    header.copy_from_slice(&cells[..HEADER_LEN]);
    i32::from_le_bytes(header)
}
