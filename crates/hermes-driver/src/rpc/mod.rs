//! Register RPC
//!
//! Lets a process without access to `/dev/mem` perform masked register reads
//! and writes on a board that another process has mapped.
//!
//! # Wire protocol
//!
//! One JSON object per line over TCP, strict request/reply per connection:
//!
//! ```text
//! → {"cmd":"read","addr":"0x10","mask":"0xff"}
//! ← {"read_val":"0xab"}
//! → {"cmd":"write","addr":"0x10","mask":"0xff","val":"0x1"}
//! ← {"write_done":true}
//! → {"cmd":"frobnicate"}
//! ← {"error":"InvalidMessage"}
//! ```
//!
//! Numbers go out as hex strings; the server also accepts decimal strings
//! and JSON integers.

pub mod client;
pub mod server;
pub mod wire;

pub use client::{ClientConfig, RegisterClient};
pub use server::{RegisterServer, ServerConfig};
pub use wire::{Hex, Request, Response};
