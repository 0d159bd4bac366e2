//! Register access and mailbox plumbing for Hermes readout boards.
//!
//! The board's firmware exposes a window of 32-bit registers on the AXI bus.
//! This crate maps that window into the process, applies masked reads and
//! writes to it, forwards UDP datagrams to the firmware's page mailbox, and
//! serves register access to other processes over a small JSON protocol.
//!
//! # Layers
//!
//! ```text
//! WordSpace        — raw word memory: /dev/mem mapping or in-process buffer
//! RegisterAccess   — masked read / write / read-modify-write, serialised
//! Registers        — the same, addressed by name through a RegisterMap
//! MailboxBridge    — UDP datagram ⇄ mailbox page transaction
//! RegisterServer   — RegisterAccess over TCP
//! RegisterClient   — RegisterBus backed by a remote RegisterServer
//! ```
//!
//! # Quick start
//!
//! ```no_run
//! use hermes_driver::prelude::*;
//! use std::sync::Arc;
//!
//! # fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
//! let space = open_backend(BackendSelection::Mmap, MemoryWindow::default())?;
//! let hw = Arc::new(RegisterAccess::new(space));
//!
//! let map = RegisterMap::load("address_table.json")?;
//! let regs = Registers::new(map, Arc::clone(&hw));
//! regs.write_named("ctrl.enable", 1)?;
//! println!("link up: {}", regs.read_named("status.link")?);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]

mod access;
mod backend;
pub mod backends;
mod error;
pub mod mailbox;
mod map;
pub mod rpc;

pub use access::{RegisterAccess, RegisterBus};
pub use backend::{check_range, open_backend, BackendSelection, BackendType, MemoryWindow, WordSpace};
pub use backends::{MmapBackend, SoftwareBackend};
pub use error::{ErrorKind, HalError, Result};
pub use mailbox::{BridgeConfig, BridgeStats, MailboxBridge};
pub use map::{RegisterMap, Registers};
pub use rpc::{ClientConfig, RegisterClient, RegisterServer, ServerConfig};

/// Register layout types (re-exported from hermes-regs).
pub mod regs {
    pub use hermes_regs::{MailboxLayout, MailboxStatus, Register, FULL_MASK, PAGE_FLAG};
}

/// Commonly used types.
pub mod prelude {
    pub use crate::{
        open_backend, BackendSelection, BridgeConfig, ClientConfig, ErrorKind, HalError,
        MailboxBridge, MemoryWindow, RegisterAccess, RegisterBus, RegisterClient, RegisterMap,
        RegisterServer, Registers, Result, ServerConfig, WordSpace,
    };
}
