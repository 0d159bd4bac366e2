//! RPC message encoding and framing

use crate::error::{ErrorKind, HalError, Result};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::io::{self, BufRead, Read, Write};

/// Default TCP port of the register server
pub const DEFAULT_PORT: u16 = 5556;

/// Longest accepted frame, newline included
pub const MAX_FRAME: usize = 64 * 1024;

const FIELDS: [&str; 4] = ["cmd", "addr", "mask", "val"];

/// 32-bit word carried as a `"0x..."` string
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hex(pub u32);

impl Serialize for Hex {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(&format_args!("{:#x}", self.0))
    }
}

impl<'de> Deserialize<'de> for Hex {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        word_from_value(&value)
            .map(Hex)
            .ok_or_else(|| D::Error::custom(format!("not a 32-bit word: {value}")))
    }
}

/// Parse an integer literal the way address tables write them
///
/// Accepts `0x`/`0o`/`0b` prefixes (either case) and plain decimal.
pub fn parse_int_literal(text: &str) -> Option<u64> {
    let text = text.trim();
    let (digits, radix) = match text.get(..2) {
        Some("0x" | "0X") => (&text[2..], 16),
        Some("0o" | "0O") => (&text[2..], 8),
        Some("0b" | "0B") => (&text[2..], 2),
        _ => (text, 10),
    };
    if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
        return None;
    }
    u64::from_str_radix(digits, radix).ok()
}

/// A JSON integer or integer string in `[0, 0xFFFFFFFF]`
pub fn word_from_value(value: &Value) -> Option<u32> {
    let wide = match value {
        Value::Number(n) => n.as_u64()?,
        Value::String(s) => parse_int_literal(s)?,
        _ => return None,
    };
    u32::try_from(wide).ok()
}

/// Decoded request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    /// Masked read
    Read {
        /// Word address
        addr: u32,
        /// Field mask
        mask: u32,
    },
    /// Masked write
    Write {
        /// Word address
        addr: u32,
        /// Field mask
        mask: u32,
        /// Field value
        val: u32,
    },
}

#[derive(Serialize)]
struct WireRequest {
    cmd: &'static str,
    addr: Hex,
    mask: Hex,
    #[serde(skip_serializing_if = "Option::is_none")]
    val: Option<Hex>,
}

impl Request {
    /// Encode as one JSON line (without the newline)
    pub fn to_json(&self) -> String {
        let wire = match *self {
            Self::Read { addr, mask } => WireRequest {
                cmd: "read",
                addr: Hex(addr),
                mask: Hex(mask),
                val: None,
            },
            Self::Write { addr, mask, val } => WireRequest {
                cmd: "write",
                addr: Hex(addr),
                mask: Hex(mask),
                val: Some(Hex(val)),
            },
        };
        // A struct of strings cannot fail to serialize.
        serde_json::to_string(&wire).unwrap_or_default()
    }

    /// Decode and validate one request
    ///
    /// # Errors
    ///
    /// In order of checking:
    /// - [`HalError::InvalidEncoding`]: not a JSON object
    /// - [`HalError::InvalidMessage`]: unknown field, or `cmd`/`addr`/`mask` missing
    /// - [`HalError::InvalidAddress`]: `addr` or `mask` not in `[0, 0xFFFFFFFF]`
    /// - [`HalError::InvalidCommand`]: `cmd` other than `read`/`write`
    /// - [`HalError::InvalidMessage`]: `write` without a valid `val`
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| HalError::invalid_encoding(e.to_string()))?;
        let Value::Object(fields) = value else {
            return Err(HalError::invalid_encoding("request is not a JSON object"));
        };

        check_fields(&fields)?;

        let cmd = fields
            .get("cmd")
            .and_then(Value::as_str)
            .ok_or_else(|| HalError::invalid_message("'cmd' is not a string"))?;
        let addr = word_field(&fields, "addr")?;
        let mask = word_field(&fields, "mask")?;

        match cmd {
            "read" => Ok(Self::Read { addr, mask }),
            "write" => {
                let val = fields
                    .get("val")
                    .and_then(word_from_value)
                    .ok_or_else(|| HalError::invalid_message("write needs a 32-bit 'val'"))?;
                Ok(Self::Write { addr, mask, val })
            }
            other => Err(HalError::InvalidCommand {
                cmd: other.to_string(),
            }),
        }
    }
}

fn check_fields(fields: &Map<String, Value>) -> Result<()> {
    if let Some(unknown) = fields.keys().find(|k| !FIELDS.contains(&k.as_str())) {
        return Err(HalError::invalid_message(format!("unknown field '{unknown}'")));
    }
    for required in &FIELDS[..3] {
        if !fields.contains_key(*required) {
            return Err(HalError::invalid_message(format!("missing field '{required}'")));
        }
    }
    Ok(())
}

fn word_field(fields: &Map<String, Value>, name: &'static str) -> Result<u32> {
    let value = &fields[name];
    word_from_value(value).ok_or_else(|| HalError::invalid_address(name, value))
}

/// Server reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Response {
    /// Result of a read
    ReadVal {
        /// Field value
        read_val: Hex,
    },
    /// Acknowledgement of a write
    WriteDone {
        /// Always `true`
        write_done: bool,
    },
    /// Request failed
    Error {
        /// What went wrong
        #[serde(alias = "err")]
        error: ErrorKind,
    },
}

impl Response {
    /// Error reply for a failed request
    pub fn from_error(err: &HalError) -> Self {
        Self::Error {
            error: err.kind().unwrap_or(ErrorKind::Internal),
        }
    }

    /// Encode as one JSON line (without the newline)
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Write one frame: the text followed by a newline
///
/// # Errors
///
/// Returns the socket error.
pub fn write_frame(writer: &mut impl Write, text: &str) -> io::Result<()> {
    writer.write_all(text.as_bytes())?;
    writer.write_all(b"\n")?;
    writer.flush()
}

/// One newline-delimited frame as received
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Frame text without its line ending
    Text(String),
    /// Frame that cannot be a message; the reader is already past it
    Malformed(String),
}

/// Read one frame
///
/// Returns `Ok(None)` on a clean end of stream. A frame longer than
/// [`MAX_FRAME`] is skipped up to its newline and a frame that is not UTF-8
/// is consumed whole, so either way the next call starts on a frame boundary.
///
/// # Errors
///
/// Returns the socket error.
pub fn read_frame(reader: &mut impl BufRead) -> io::Result<Option<Frame>> {
    let mut line = Vec::new();
    let limit = u64::try_from(MAX_FRAME).unwrap_or(u64::MAX);
    let n = reader.by_ref().take(limit).read_until(b'\n', &mut line)?;
    if n == 0 {
        return Ok(None);
    }

    if line.last() == Some(&b'\n') {
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
    } else if n >= MAX_FRAME {
        skip_line(reader)?;
        return Ok(Some(Frame::Malformed(format!(
            "frame longer than {MAX_FRAME} bytes"
        ))));
    }
    // Otherwise: last frame of the stream without a trailing newline.

    Ok(Some(match String::from_utf8(line) {
        Ok(text) => Frame::Text(text),
        Err(e) => Frame::Malformed(format!("frame is not UTF-8: {e}")),
    }))
}

/// Discard input up to and including the next newline
fn skip_line(reader: &mut impl BufRead) -> io::Result<()> {
    loop {
        let buf = reader.fill_buf()?;
        if buf.is_empty() {
            return Ok(());
        }
        if let Some(i) = buf.iter().position(|&b| b == b'\n') {
            reader.consume(i + 1);
            return Ok(());
        }
        let len = buf.len();
        reader.consume(len);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn kind_of(text: &str) -> Option<ErrorKind> {
        Request::parse(text).err().and_then(|e| e.kind())
    }

    #[test]
    fn literal_notations() {
        assert_eq!(parse_int_literal("0x10"), Some(16));
        assert_eq!(parse_int_literal("0XfF"), Some(255));
        assert_eq!(parse_int_literal("0o17"), Some(15));
        assert_eq!(parse_int_literal("0b101"), Some(5));
        assert_eq!(parse_int_literal(" 42 "), Some(42));
        assert_eq!(parse_int_literal("-1"), None);
        assert_eq!(parse_int_literal("0x"), None);
        assert_eq!(parse_int_literal("ten"), None);
    }

    #[test]
    fn word_range_is_enforced() {
        assert_eq!(word_from_value(&Value::from("0xffffffff")), Some(u32::MAX));
        assert_eq!(word_from_value(&Value::from("0x100000000")), None);
        assert_eq!(word_from_value(&Value::from(-1)), None);
        assert_eq!(word_from_value(&Value::from(17)), Some(17));
        assert_eq!(word_from_value(&Value::Null), None);
    }

    #[test]
    fn parses_read_and_write() {
        assert_eq!(
            Request::parse(r#"{"cmd":"read","addr":"0x10","mask":"0xff"}"#).unwrap(),
            Request::Read { addr: 0x10, mask: 0xff }
        );
        assert_eq!(
            Request::parse(r#"{"cmd":"write","addr":16,"mask":"0xffffffff","val":"0x5"}"#).unwrap(),
            Request::Write { addr: 0x10, mask: u32::MAX, val: 5 }
        );
    }

    #[test]
    fn classifies_malformed_requests() {
        assert_eq!(kind_of("{not json"), Some(ErrorKind::InvalidEncoding));
        assert_eq!(kind_of("[1,2]"), Some(ErrorKind::InvalidEncoding));
        assert_eq!(kind_of(r#"{"cmd":"frobnicate"}"#), Some(ErrorKind::InvalidMessage));
        assert_eq!(
            kind_of(r#"{"cmd":"read","addr":"0x1","mask":"0x1","extra":1}"#),
            Some(ErrorKind::InvalidMessage)
        );
        assert_eq!(
            kind_of(r#"{"cmd":"read","addr":"0x100000000","mask":"0x1"}"#),
            Some(ErrorKind::InvalidAddress)
        );
        assert_eq!(
            kind_of(r#"{"cmd":"read","addr":"0x1","mask":-3}"#),
            Some(ErrorKind::InvalidAddress)
        );
        assert_eq!(
            kind_of(r#"{"cmd":"poke","addr":"0x1","mask":"0x1"}"#),
            Some(ErrorKind::InvalidCommand)
        );
        assert_eq!(
            kind_of(r#"{"cmd":"write","addr":"0x1","mask":"0x1"}"#),
            Some(ErrorKind::InvalidMessage)
        );
    }

    #[test]
    fn request_encoding_uses_hex_strings() {
        let read = Request::Read { addr: 0x10, mask: 0xff };
        assert_eq!(read.to_json(), r#"{"cmd":"read","addr":"0x10","mask":"0xff"}"#);
        let write = Request::Write { addr: 0, mask: 1, val: 0 };
        assert_eq!(
            write.to_json(),
            r#"{"cmd":"write","addr":"0x0","mask":"0x1","val":"0x0"}"#
        );
        assert_eq!(Request::parse(&write.to_json()).unwrap(), write);
    }

    #[test]
    fn response_shapes() {
        assert_eq!(Response::ReadVal { read_val: Hex(0xab) }.to_json(), r#"{"read_val":"0xab"}"#);
        assert_eq!(Response::WriteDone { write_done: true }.to_json(), r#"{"write_done":true}"#);
        assert_eq!(
            Response::Error { error: ErrorKind::InvalidMessage }.to_json(),
            r#"{"error":"InvalidMessage"}"#
        );
    }

    #[test]
    fn response_decoding_accepts_legacy_shapes() {
        let parse = |s: &str| serde_json::from_str::<Response>(s).unwrap();
        assert_eq!(parse(r#"{"read_val":"0xab"}"#), Response::ReadVal { read_val: Hex(0xab) });
        assert_eq!(parse(r#"{"read_val":171}"#), Response::ReadVal { read_val: Hex(0xab) });
        assert_eq!(
            parse(r#"{"err":"InvalidAddress"}"#),
            Response::Error { error: ErrorKind::InvalidAddress }
        );
        assert!(serde_json::from_str::<Response>(r#"{"bogus":1}"#).is_err());
    }

    #[test]
    fn frames_are_newline_delimited() {
        let mut out = Vec::new();
        write_frame(&mut out, "{}").unwrap();
        write_frame(&mut out, r#"{"a":1}"#).unwrap();
        out.extend_from_slice(b"{\"b\":2}\r\n{}");
        let mut input = Cursor::new(out);
        assert_eq!(read_frame(&mut input).unwrap(), Some(Frame::Text("{}".into())));
        assert_eq!(read_frame(&mut input).unwrap(), Some(Frame::Text(r#"{"a":1}"#.into())));
        assert_eq!(read_frame(&mut input).unwrap(), Some(Frame::Text(r#"{"b":2}"#.into())));
        assert_eq!(read_frame(&mut input).unwrap(), Some(Frame::Text("{}".into())));
        assert_eq!(read_frame(&mut input).unwrap(), None);
    }

    #[test]
    fn oversized_frame_is_skipped_to_next_line() {
        let mut bytes = vec![b'x'; MAX_FRAME * 2 + 10];
        bytes.extend_from_slice(b"\n{}\n");
        let mut input = Cursor::new(bytes);
        assert!(matches!(read_frame(&mut input).unwrap(), Some(Frame::Malformed(_))));
        assert_eq!(read_frame(&mut input).unwrap(), Some(Frame::Text("{}".into())));
        assert_eq!(read_frame(&mut input).unwrap(), None);
    }

    #[test]
    fn non_utf8_frame_keeps_framing() {
        let mut input = Cursor::new(b"{\"cmd\":\"\xff\"}\n{}\n".to_vec());
        assert!(matches!(read_frame(&mut input).unwrap(), Some(Frame::Malformed(_))));
        assert_eq!(read_frame(&mut input).unwrap(), Some(Frame::Text("{}".into())));
    }
}
