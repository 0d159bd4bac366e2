//! Software (in-memory) word space
//!
//! Stands in for the board wherever `/dev/mem` is unavailable: unit tests,
//! CI, and `--software` dry runs of the bridge and register server. It has
//! no firmware behind it, so nothing changes unless software writes it.

use crate::backend::{check_range, BackendType, WordSpace};
use crate::error::Result;

/// Zero-initialised array of 32-bit words
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoftwareBackend {
    words: Vec<u32>,
}

impl SoftwareBackend {
    /// Create a zero-filled window of `len_words` words
    pub fn new(len_words: usize) -> Self {
        Self {
            words: vec![0; len_words],
        }
    }

    /// Wrap an existing word image
    pub fn from_words(words: Vec<u32>) -> Self {
        Self { words }
    }

    /// Current contents
    pub fn words(&self) -> &[u32] {
        &self.words
    }
}

impl WordSpace for SoftwareBackend {
    fn len_words(&self) -> usize {
        self.words.len()
    }

    fn read_word(&self, addr: u32) -> Result<u32> {
        let index = check_range(addr, 1, self.words.len())?;
        Ok(self.words[index])
    }

    fn write_word(&mut self, addr: u32, value: u32) -> Result<()> {
        let index = check_range(addr, 1, self.words.len())?;
        self.words[index] = value;
        Ok(())
    }

    fn read_block(&self, addr: u32, out: &mut [u32]) -> Result<()> {
        let start = check_range(addr, out.len(), self.words.len())?;
        out.copy_from_slice(&self.words[start..start + out.len()]);
        Ok(())
    }

    fn write_block(&mut self, addr: u32, data: &[u32]) -> Result<()> {
        let start = check_range(addr, data.len(), self.words.len())?;
        self.words[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn backend_type(&self) -> BackendType {
        BackendType::Software
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HalError;

    #[test]
    fn starts_zeroed() {
        let b = SoftwareBackend::new(8);
        assert_eq!(b.len_words(), 8);
        assert!(b.words().iter().all(|&w| w == 0));
    }

    #[test]
    fn block_write_then_read() {
        let mut b = SoftwareBackend::new(8);
        b.write_block(2, &[1, 2, 3]).unwrap();
        let mut out = [0u32; 4];
        b.read_block(1, &mut out).unwrap();
        assert_eq!(out, [0, 1, 2, 3]);
    }

    #[test]
    fn out_of_range_block_writes_nothing() {
        let mut b = SoftwareBackend::new(4);
        let err = b.write_block(2, &[7, 7, 7]).unwrap_err();
        assert!(matches!(err, HalError::OutOfRange { addr: 2, count: 3, limit: 4 }));
        assert_eq!(b.words(), &[0, 0, 0, 0]);
    }
}
