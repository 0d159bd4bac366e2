//! Masked register access
//!
//! Translates an (address, mask) pair into word loads and stores on a
//! [`WordSpace`]. Reads extract the masked field and shift it down to bit 0;
//! writes to a partial mask are read-modify-write.
//!
//! The backend sits behind a mutex and the whole read-modify-write runs under
//! one lock acquisition, so two writers updating different fields of the same
//! word (say the UDP bridge process and a remote RPC client) cannot lose each
//! other's update.

use crate::backend::{BackendType, WordSpace};
use crate::error::Result;
use hermes_regs::register::{self, FULL_MASK};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Masked register reads and writes
///
/// Implemented by local hardware access and by the RPC client, so callers
/// need not know whether the board is in this process or behind a socket.
pub trait RegisterBus: Send + Sync {
    /// Read the field selected by `mask` from the word at `addr`
    ///
    /// # Errors
    ///
    /// Returns error if the word cannot be read.
    fn read(&self, addr: u32, mask: u32) -> Result<u32>;

    /// Write `value` into the field selected by `mask` of the word at `addr`
    ///
    /// # Errors
    ///
    /// Returns error if the word cannot be read or written.
    fn write(&self, addr: u32, mask: u32, value: u32) -> Result<()>;
}

impl<B: RegisterBus + ?Sized> RegisterBus for &B {
    fn read(&self, addr: u32, mask: u32) -> Result<u32> {
        (**self).read(addr, mask)
    }

    fn write(&self, addr: u32, mask: u32, value: u32) -> Result<()> {
        (**self).write(addr, mask, value)
    }
}

impl<B: RegisterBus + ?Sized> RegisterBus for Arc<B> {
    fn read(&self, addr: u32, mask: u32) -> Result<u32> {
        (**self).read(addr, mask)
    }

    fn write(&self, addr: u32, mask: u32, value: u32) -> Result<()> {
        (**self).write(addr, mask, value)
    }
}

/// Local register access over a word space
#[derive(Debug)]
pub struct RegisterAccess<S> {
    space: Mutex<S>,
}

impl<S: WordSpace> RegisterAccess<S> {
    /// Take ownership of a backend
    pub fn new(space: S) -> Self {
        Self {
            space: Mutex::new(space),
        }
    }

    /// Give the backend back
    pub fn into_inner(self) -> S {
        self.space.into_inner().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lock the backend for a sequence of raw accesses
    ///
    /// A panic in another holder leaves the words as the hardware has them,
    /// so a poisoned lock is simply taken over.
    pub fn lock(&self) -> MutexGuard<'_, S> {
        self.space.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Window length in words
    pub fn len_words(&self) -> usize {
        self.lock().len_words()
    }

    /// Backend type for diagnostics
    pub fn backend_type(&self) -> BackendType {
        self.lock().backend_type()
    }

    /// Read `(word & mask) >> shift`, or the raw word for a full mask
    ///
    /// # Errors
    ///
    /// Returns [`HalError::OutOfRange`](crate::HalError::OutOfRange) if `addr`
    /// is outside the window.
    pub fn read(&self, addr: u32, mask: u32) -> Result<u32> {
        let word = self.lock().read_word(addr)?;
        let value = register::extract(word, mask);
        tracing::trace!("read {addr:#x} mask {mask:#x} -> {value:#x}");
        Ok(value)
    }

    /// Write a field; partial masks are read-modify-write under the lock
    ///
    /// # Errors
    ///
    /// Returns [`HalError::OutOfRange`](crate::HalError::OutOfRange) if `addr`
    /// is outside the window.
    pub fn write(&self, addr: u32, mask: u32, value: u32) -> Result<()> {
        let mut space = self.lock();
        if mask == FULL_MASK {
            tracing::trace!("write {addr:#x} = {value:#x}");
            return space.write_word(addr, value);
        }

        let current = space.read_word(addr)?;
        let updated = register::insert(current, mask, value);
        tracing::trace!(
            "write {addr:#x} mask {mask:#x} value {value:#x}: {current:#x} -> {updated:#x}"
        );
        space.write_word(addr, updated)
    }

    /// Read one raw word
    ///
    /// # Errors
    ///
    /// Returns error if `addr` is outside the window.
    pub fn read_word(&self, addr: u32) -> Result<u32> {
        self.lock().read_word(addr)
    }

    /// Write one raw word
    ///
    /// # Errors
    ///
    /// Returns error if `addr` is outside the window.
    pub fn write_word(&self, addr: u32, value: u32) -> Result<()> {
        self.lock().write_word(addr, value)
    }

    /// Read `count` consecutive words as one locked group
    ///
    /// # Errors
    ///
    /// Returns error if the block is not entirely inside the window.
    pub fn read_block(&self, addr: u32, count: usize) -> Result<Vec<u32>> {
        let mut out = vec![0; count];
        self.lock().read_block(addr, &mut out)?;
        Ok(out)
    }

    /// Write consecutive words as one locked group
    ///
    /// # Errors
    ///
    /// Returns error if the block is not entirely inside the window.
    pub fn write_block(&self, addr: u32, data: &[u32]) -> Result<()> {
        self.lock().write_block(addr, data)
    }
}

impl<S: WordSpace> RegisterBus for RegisterAccess<S> {
    fn read(&self, addr: u32, mask: u32) -> Result<u32> {
        Self::read(self, addr, mask)
    }

    fn write(&self, addr: u32, mask: u32, value: u32) -> Result<()> {
        Self::write(self, addr, mask, value)
    }
}
