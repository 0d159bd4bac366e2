//! `/dev/mem` mapping of the AXI window
//!
//! The window is mapped once, `MAP_SHARED`, from a file opened with `O_SYNC`
//! so that the kernel hands out an uncached mapping of device memory. All
//! word accesses are volatile and bounds-checked.

use crate::backend::{check_range, BackendType, MemoryWindow, WordSpace};
use crate::error::{HalError, Result};
use rustix::fs::OFlags;
use rustix::mm::{mmap, munmap, MapFlags, ProtFlags};
use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsFd;
use std::path::Path;
use std::ptr::NonNull;

/// Physical memory device
pub const DEV_MEM: &str = "/dev/mem";

/// Memory-mapped AXI window
///
/// Provides bounds-checked volatile access to board registers.
#[derive(Debug)]
pub struct MmapBackend {
    ptr: NonNull<u32>,
    window: MemoryWindow,
    _file: File,
}

impl MmapBackend {
    /// Map `window` from `/dev/mem`
    ///
    /// # Errors
    ///
    /// Returns error if `/dev/mem` cannot be opened or the mapping fails
    /// (missing privileges, unaligned base, zero length).
    pub fn open(window: MemoryWindow) -> Result<Self> {
        Self::open_path(DEV_MEM, window)
    }

    /// Map `window` from an arbitrary memory device file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be opened or the mapping fails.
    pub fn open_path(path: impl AsRef<Path>, window: MemoryWindow) -> Result<Self> {
        let path = path.as_ref();

        if window.len_words == 0 {
            return Err(HalError::mapping_failed("window length is 0"));
        }

        tracing::debug!(
            "Mapping {} at {:#x} ({:#x} bytes)",
            path.display(),
            window.base,
            window.len_bytes()
        );

        // OFlags::SYNC.bits() is a small positive flag value
        #[allow(clippy::cast_possible_wrap)]
        let sync_flag = OFlags::SYNC.bits() as i32;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(sync_flag)
            .open(path)
            .map_err(|e| {
                HalError::mapping_failed(format!("Cannot open {}: {e}", path.display()))
            })?;

        // SAFETY: mmap of device memory. Preconditions:
        // - file descriptor is valid (just opened) and kept alive in `_file`
        // - length is non-zero (checked above)
        // - PROT_READ|PROT_WRITE with MAP_SHARED gives a view of the device,
        //   not a private copy
        // - the returned pointer is only dereferenced within `len_bytes`
        // - the mapping is released exactly once in Drop
        let addr = unsafe {
            mmap(
                std::ptr::null_mut(),
                window.len_bytes(),
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                file.as_fd(),
                window.base,
            )
            .map_err(|e| HalError::mapping_failed(format!("mmap at {:#x} failed: {e}", window.base)))?
        };

        let ptr = NonNull::new(addr.cast::<u32>())
            .ok_or_else(|| HalError::mapping_failed("mmap returned a null pointer"))?;

        tracing::info!(
            "Mapped {:#x} words at physical {:#x} ({ptr:p})",
            window.len_words,
            window.base
        );

        Ok(Self {
            ptr,
            window,
            _file: file,
        })
    }

    /// Mapped window
    pub const fn window(&self) -> MemoryWindow {
        self.window
    }
}

impl WordSpace for MmapBackend {
    fn len_words(&self) -> usize {
        self.window.len_words
    }

    fn read_word(&self, addr: u32) -> Result<u32> {
        let index = check_range(addr, 1, self.window.len_words)?;

        // SAFETY: volatile read of a mapped device word.
        // - index < len_words (checked above), so the pointer stays inside the
        //   mapping created in open_path
        // - the mapping is page aligned, hence u32 aligned
        // - volatile: the firmware changes these words behind our back
        let value = unsafe { self.ptr.as_ptr().add(index).read_volatile() };

        tracing::trace!("Read word @ {addr:#x} = {value:#x}");
        Ok(value)
    }

    fn write_word(&mut self, addr: u32, value: u32) -> Result<()> {
        let index = check_range(addr, 1, self.window.len_words)?;

        tracing::trace!("Write word @ {addr:#x} = {value:#x}");

        // SAFETY: volatile write to a mapped device word.
        // - index < len_words (checked above)
        // - u32 aligned (page aligned mapping)
        // - volatile: writes have side effects in the firmware and must not be
        //   merged or reordered by the compiler
        unsafe {
            self.ptr.as_ptr().add(index).write_volatile(value);
        }
        Ok(())
    }

    fn backend_type(&self) -> BackendType {
        BackendType::Mmap
    }
}

impl Drop for MmapBackend {
    fn drop(&mut self) {
        tracing::debug!("Unmapping window at {:#x}", self.window.base);

        // SAFETY: ptr and length are exactly those returned by / passed to
        // mmap in open_path, and Drop runs once.
        unsafe {
            if let Err(e) = munmap(self.ptr.as_ptr().cast(), self.window.len_bytes()) {
                tracing::error!("munmap failed during drop: {e}");
            }
        }
    }
}

// SAFETY: MmapBackend owns its mapping exclusively; moving it to another
// thread does not invalidate the mapping (mmap'd memory is process-wide).
unsafe impl Send for MmapBackend {}

// SAFETY: writes require &mut self; reads through &self are bounds-checked
// volatile loads, which are safe to issue concurrently.
unsafe impl Sync for MmapBackend {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_length_window_is_rejected() {
        let window = MemoryWindow {
            base: 0,
            len_words: 0,
        };
        assert!(matches!(
            MmapBackend::open_path("/dev/null", window),
            Err(HalError::MappingFailed { .. })
        ));
    }

    #[test]
    fn missing_device_file_is_reported() {
        let err = MmapBackend::open_path("/nonexistent/mem", MemoryWindow::default()).unwrap_err();
        assert!(matches!(err, HalError::MappingFailed { .. }));
    }

    #[test]
    fn file_backed_window_reads_and_writes_words() {
        let file = tempfile::NamedTempFile::new().unwrap();
        file.as_file().set_len(4096).unwrap();
        let window = MemoryWindow {
            base: 0,
            len_words: 16,
        };

        {
            let mut backend = MmapBackend::open_path(file.path(), window).unwrap();
            assert_eq!(backend.window(), window);
            assert_eq!(backend.backend_type(), BackendType::Mmap);
            backend.write_word(1, 0xdead_beef).unwrap();
            backend.write_block(14, &[7, 8]).unwrap();
            assert_eq!(backend.read_word(1).unwrap(), 0xdead_beef);
            assert!(matches!(
                backend.write_word(16, 0),
                Err(HalError::OutOfRange { .. })
            ));
        }

        let bytes = std::fs::read(file.path()).unwrap();
        assert_eq!(bytes[4..8], 0xdead_beef_u32.to_le_bytes());
        assert_eq!(bytes[56..60], 7u32.to_le_bytes());
    }

    #[test]
    #[ignore] // Requires root and a board with a live AXI window
    fn test_read_first_word() {
        let backend = MmapBackend::open(MemoryWindow::default()).expect("map /dev/mem");
        let word = backend.read_word(0).expect("read word 0");
        println!("word 0 = {word:#010x}");
        assert!(backend.read_word(u32::MAX).is_err());
    }
}
