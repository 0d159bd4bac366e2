//! Word-space backend implementations
//!
//! Two backends available:
//! - **Mmap**: `/dev/mem` mapping of the board's AXI window (requires root)
//! - **Software**: zero-filled in-memory window (tests, dry runs)

pub mod mmap;
pub mod software;

pub use mmap::MmapBackend;
pub use software::SoftwareBackend;
