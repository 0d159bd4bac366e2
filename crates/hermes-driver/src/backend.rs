//! Word-space abstraction for register backends
//!
//! A backend is a flat array of 32-bit words addressed by word index. Real
//! hardware is reached through an mmap of `/dev/mem`; tests and dry runs use an
//! in-memory array. Every access is bounds-checked against the window length.

use crate::error::{HalError, Result};
use hermes_regs::window;
use std::fmt::Debug;

/// Flat 32-bit word address space
pub trait WordSpace: Debug + Send {
    /// Window length in words
    fn len_words(&self) -> usize;

    /// Read one word
    ///
    /// # Errors
    ///
    /// Returns [`HalError::OutOfRange`] if `addr` lies outside the window.
    fn read_word(&self, addr: u32) -> Result<u32>;

    /// Write one word
    ///
    /// # Errors
    ///
    /// Returns [`HalError::OutOfRange`] if `addr` lies outside the window.
    fn write_word(&mut self, addr: u32, value: u32) -> Result<()>;

    /// Read consecutive words starting at `addr`
    ///
    /// # Errors
    ///
    /// Returns [`HalError::OutOfRange`] if any word lies outside the window;
    /// nothing is read in that case.
    fn read_block(&self, addr: u32, out: &mut [u32]) -> Result<()> {
        check_range(addr, out.len(), self.len_words())?;
        for (word, a) in out.iter_mut().zip(addr..) {
            *word = self.read_word(a)?;
        }
        Ok(())
    }

    /// Write consecutive words starting at `addr`
    ///
    /// # Errors
    ///
    /// Returns [`HalError::OutOfRange`] if any word lies outside the window;
    /// nothing is written in that case.
    fn write_block(&mut self, addr: u32, data: &[u32]) -> Result<()> {
        check_range(addr, data.len(), self.len_words())?;
        for (&word, a) in data.iter().zip(addr..) {
            self.write_word(a, word)?;
        }
        Ok(())
    }

    /// Backend type for diagnostics
    fn backend_type(&self) -> BackendType;
}

impl<T: WordSpace + ?Sized> WordSpace for Box<T> {
    fn len_words(&self) -> usize {
        (**self).len_words()
    }

    fn read_word(&self, addr: u32) -> Result<u32> {
        (**self).read_word(addr)
    }

    fn write_word(&mut self, addr: u32, value: u32) -> Result<()> {
        (**self).write_word(addr, value)
    }

    fn read_block(&self, addr: u32, out: &mut [u32]) -> Result<()> {
        (**self).read_block(addr, out)
    }

    fn write_block(&mut self, addr: u32, data: &[u32]) -> Result<()> {
        (**self).write_block(addr, data)
    }

    fn backend_type(&self) -> BackendType {
        (**self).backend_type()
    }
}

/// Check that `count` words starting at `addr` fit in a window of `limit` words.
///
/// Returns the starting index as `usize`.
///
/// # Errors
///
/// Returns [`HalError::OutOfRange`] otherwise.
pub fn check_range(addr: u32, count: usize, limit: usize) -> Result<usize> {
    let start = addr as usize;
    match start.checked_add(count) {
        Some(end) if end <= limit && (count > 0 || start < limit) => Ok(start),
        _ => Err(HalError::out_of_range(u64::from(addr), count, limit)),
    }
}

/// Backend type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    /// `/dev/mem` mapping of the AXI window
    Mmap,

    /// In-memory word array, no hardware required
    Software,
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Mmap => write!(f, "mmap (/dev/mem)"),
            Self::Software => write!(f, "Software"),
        }
    }
}

/// Physical placement of the AXI window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryWindow {
    /// Physical base address
    pub base: u64,
    /// Window length in 32-bit words
    pub len_words: usize,
}

impl Default for MemoryWindow {
    fn default() -> Self {
        Self {
            base: window::DEFAULT_BASE,
            len_words: window::DEFAULT_LEN_WORDS,
        }
    }
}

impl MemoryWindow {
    /// Window length in bytes
    pub const fn len_bytes(&self) -> usize {
        self.len_words * window::WORD_BYTES
    }
}

/// Backend selection strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendSelection {
    /// Map the window through `/dev/mem`
    Mmap,

    /// Zero-filled in-memory window of the same length
    Software,
}

/// Open a backend for `window`
///
/// # Errors
///
/// Returns error if the window cannot be mapped.
pub fn open_backend(selection: BackendSelection, window: MemoryWindow) -> Result<Box<dyn WordSpace>> {
    use crate::backends::{MmapBackend, SoftwareBackend};

    match selection {
        BackendSelection::Mmap => {
            MmapBackend::open(window).map(|b| Box::new(b) as Box<dyn WordSpace>)
        }
        BackendSelection::Software => {
            tracing::info!(
                "Using software backend ({} words) in place of {:#x}",
                window.len_words,
                window.base
            );
            Ok(Box::new(SoftwareBackend::new(window.len_words)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_check_accepts_last_word() {
        assert_eq!(check_range(15, 1, 16).unwrap(), 15);
        assert_eq!(check_range(12, 4, 16).unwrap(), 12);
    }

    #[test]
    fn range_check_rejects_overrun() {
        assert!(matches!(
            check_range(16, 1, 16),
            Err(HalError::OutOfRange { addr: 16, count: 1, limit: 16 })
        ));
        assert!(check_range(13, 4, 16).is_err());
        assert!(check_range(16, 0, 16).is_err());
    }

    #[test]
    fn default_window_matches_reference_board() {
        let w = MemoryWindow::default();
        assert_eq!(w.base, 0x8000_0000);
        assert_eq!(w.len_bytes(), 0x10_0000);
    }
}
