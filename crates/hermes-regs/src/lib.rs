//! Layout model for Hermes FPGA transmit/receive boards.
//!
//! This crate has **no dependencies** and **no hardware access**: it is a pure
//! model of how software sees the board through its AXI memory window.
//!
//! # Crate organisation
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`register`] | Masked register descriptor, bitfield extract / insert |
//! | [`mailbox`] | Mailbox status block, page addressing, length header |
//! | [`window`] | Default AXI window placement |

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod mailbox;
pub mod register;
pub mod window;

pub use mailbox::{MailboxLayout, MailboxStatus, PAGE_FLAG};
pub use register::{Register, FULL_MASK};
