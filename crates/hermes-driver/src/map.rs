//! Symbolic register names
//!
//! The address table is configuration, loaded once at startup and read-only
//! afterwards. On disk it is a JSON object keyed by register name:
//!
//! ```json
//! {
//!   "tx.ctrl.enable": { "addr": "0x10", "mask": "0x1" },
//!   "tx.ctrl.rate":   { "addr": "0x10", "mask": "0xff00" }
//! }
//! ```
//!
//! `addr` and `mask` may be strings in `0x`/`0o`/`0b`/decimal notation or
//! plain JSON integers.

use crate::access::RegisterBus;
use crate::error::{HalError, Result};
use crate::rpc::wire::word_from_value;
use hermes_regs::Register;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Name to (address, mask) table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegisterMap {
    regs: BTreeMap<String, Register>,
}

impl RegisterMap {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a register
    pub fn insert(&mut self, name: impl Into<String>, reg: Register) {
        self.regs.insert(name.into(), reg);
    }

    /// Load an address table file
    ///
    /// # Errors
    ///
    /// Returns [`HalError::InvalidAddressTable`] if the file cannot be read or
    /// parsed, or [`HalError::InvalidRegister`] for an entry with an empty mask.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| HalError::invalid_address_table(path, e.to_string()))?;
        let map = Self::parse(&text, path)?;
        tracing::info!("Loaded {} registers from {}", map.len(), path.display());
        Ok(map)
    }

    /// Parse an address table from JSON text
    ///
    /// # Errors
    ///
    /// Same as [`RegisterMap::load`].
    pub fn from_json_str(text: &str) -> Result<Self> {
        Self::parse(text, Path::new("<inline>"))
    }

    fn parse(text: &str, source: &Path) -> Result<Self> {
        let table: BTreeMap<String, Value> = serde_json::from_str(text)
            .map_err(|e| HalError::invalid_address_table(source, e.to_string()))?;

        let mut regs = BTreeMap::new();
        for (name, entry) in table {
            let field = |key: &str| {
                entry.get(key).and_then(word_from_value).ok_or_else(|| {
                    HalError::invalid_address_table(
                        source,
                        format!("{name}: missing or invalid '{key}'"),
                    )
                })
            };
            let addr = field("addr")?;
            let mask = field("mask")?;
            let reg = Register::new(addr, mask)
                .ok_or_else(|| HalError::InvalidRegister { name: name.clone() })?;
            regs.insert(name, reg);
        }
        Ok(Self { regs })
    }

    /// Look a register up by name
    ///
    /// # Errors
    ///
    /// Returns [`HalError::UnknownRegister`] if the name is absent.
    pub fn resolve(&self, name: &str) -> Result<Register> {
        self.regs
            .get(name)
            .copied()
            .ok_or_else(|| HalError::unknown_register(name))
    }

    /// Number of registers
    pub fn len(&self) -> usize {
        self.regs.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.regs.is_empty()
    }

    /// All names, sorted
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.regs.keys().map(String::as_str)
    }

    /// Names under a dotted prefix, sorted
    pub fn names_with_prefix<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = &'a str> {
        self.names().filter(move |n| n.starts_with(prefix))
    }
}

impl FromIterator<(String, Register)> for RegisterMap {
    fn from_iter<I: IntoIterator<Item = (String, Register)>>(iter: I) -> Self {
        Self {
            regs: iter.into_iter().collect(),
        }
    }
}

/// Named register access over any [`RegisterBus`]
///
/// The same code drives a board mapped into this process and one reached
/// through a [`RegisterClient`](crate::rpc::RegisterClient).
#[derive(Debug, Clone)]
pub struct Registers<B> {
    map: Arc<RegisterMap>,
    bus: B,
}

impl<B: RegisterBus> Registers<B> {
    /// Bind an address table to a bus
    pub fn new(map: impl Into<Arc<RegisterMap>>, bus: B) -> Self {
        Self {
            map: map.into(),
            bus,
        }
    }

    /// Address table
    pub fn map(&self) -> &RegisterMap {
        &self.map
    }

    /// Underlying bus
    pub fn bus(&self) -> &B {
        &self.bus
    }

    /// Look a register up by name
    ///
    /// # Errors
    ///
    /// Returns [`HalError::UnknownRegister`] if the name is absent.
    pub fn resolve(&self, name: &str) -> Result<Register> {
        self.map.resolve(name)
    }

    /// Read a register by name
    ///
    /// # Errors
    ///
    /// Returns [`HalError::UnknownRegister`] or the bus error.
    pub fn read_named(&self, name: &str) -> Result<u32> {
        let reg = self.resolve(name)?;
        tracing::debug!("{name}: read {:#x} mask {:#x}", reg.address(), reg.mask());
        self.bus.read(reg.address(), reg.mask())
    }

    /// Write a register by name
    ///
    /// # Errors
    ///
    /// Returns [`HalError::UnknownRegister`] or the bus error.
    pub fn write_named(&self, name: &str, value: u32) -> Result<()> {
        let reg = self.resolve(name)?;
        tracing::debug!(
            "{name}: write {value:#x} to {:#x} mask {:#x}",
            reg.address(),
            reg.mask()
        );
        self.bus.write(reg.address(), reg.mask(), value)
    }

    /// Read every register under a prefix
    ///
    /// # Errors
    ///
    /// Stops at the first bus error.
    pub fn read_prefix(&self, prefix: &str) -> Result<Vec<(String, u32)>> {
        self.map
            .names_with_prefix(prefix)
            .map(|name| self.read_named(name).map(|v| (name.to_string(), v)))
            .collect()
    }
}
