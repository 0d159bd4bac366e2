//! Register RPC client

use super::wire::{read_frame, write_frame, Frame, Request, Response, DEFAULT_PORT};
use crate::access::RegisterBus;
use crate::error::{HalError, Result};
use std::io::{self, BufReader};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server address as `host:port`
    pub server: String,
    /// How long to wait for a reply (also the connect timeout)
    pub reply_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: format!("localhost:{DEFAULT_PORT}"),
            reply_timeout: Duration::from_millis(1000),
        }
    }
}

impl ClientConfig {
    /// Client for `host:port` with the default timeout
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            ..Self::default()
        }
    }
}

struct Connection {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl Connection {
    fn open(config: &ClientConfig) -> Result<Self> {
        let mut last = None;
        for addr in config.server.to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, config.reply_timeout) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(config.reply_timeout))?;
                    stream.set_nodelay(true)?;
                    debug!("Connected to register server at {addr}");
                    return Ok(Self {
                        writer: stream.try_clone()?,
                        reader: BufReader::new(stream),
                    });
                }
                Err(e) => last = Some(e),
            }
        }
        Err(last
            .unwrap_or_else(|| {
                io::Error::new(io::ErrorKind::NotFound, "server address did not resolve")
            })
            .into())
    }
}

/// Remote register access through a [`RegisterServer`](super::RegisterServer)
///
/// Connects on first use. A reply timeout drops the connection so that a
/// late answer is never mistaken for the reply to the next request; the
/// next call reconnects. Requests are never retried.
pub struct RegisterClient {
    config: ClientConfig,
    conn: Mutex<Option<Connection>>,
}

impl std::fmt::Debug for RegisterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisterClient")
            .field("server", &self.config.server)
            .field("connected", &self.lock().is_some())
            .finish()
    }
}

impl RegisterClient {
    /// Create a client; no connection is made yet
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            conn: Mutex::new(None),
        }
    }

    /// Create a client and connect immediately
    ///
    /// # Errors
    ///
    /// Returns the connection error.
    pub fn connect(config: ClientConfig) -> Result<Self> {
        let conn = Connection::open(&config)?;
        Ok(Self {
            config,
            conn: Mutex::new(Some(conn)),
        })
    }

    /// Client configuration
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Close the connection, if any
    pub fn disconnect(&self) {
        self.lock().take();
    }

    fn lock(&self) -> MutexGuard<'_, Option<Connection>> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn call(&self, request: &Request) -> Result<Response> {
        let mut guard = self.lock();
        let mut conn = match guard.take() {
            Some(conn) => conn,
            None => Connection::open(&self.config)?,
        };

        // The connection goes back only after a clean exchange.
        let exchanged = write_frame(&mut conn.writer, &request.to_json())
            .and_then(|()| read_frame(&mut conn.reader));
        let line = match exchanged {
            Ok(Some(Frame::Text(line))) => line,
            Ok(Some(Frame::Malformed(reason))) => {
                *guard = Some(conn);
                return Err(HalError::invalid_encoding(reason));
            }
            Ok(None) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "register server closed the connection",
                )
                .into());
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                let duration_ms = u64::try_from(self.config.reply_timeout.as_millis())
                    .unwrap_or(u64::MAX);
                warn!("No reply to {request:?} within {duration_ms}ms");
                return Err(HalError::ServerReplyTimeout { duration_ms });
            }
            Err(e) => return Err(e.into()),
        };
        *guard = Some(conn);

        serde_json::from_str(&line).map_err(|e| HalError::invalid_encoding(e.to_string()))
    }

    /// Masked read of one word on the remote board
    ///
    /// # Errors
    ///
    /// [`HalError::Remote`] carries the server's error kind;
    /// [`HalError::ServerReplyTimeout`] if no reply arrived in time.
    pub fn read(&self, addr: u32, mask: u32) -> Result<u32> {
        match self.call(&Request::Read { addr, mask })? {
            Response::ReadVal { read_val } => Ok(read_val.0),
            Response::Error { error } => Err(HalError::Remote { kind: error }),
            other => Err(HalError::invalid_message(format!(
                "unexpected reply to read: {other:?}"
            ))),
        }
    }

    /// Masked write of one word on the remote board
    ///
    /// # Errors
    ///
    /// Same as [`read`](Self::read).
    pub fn write(&self, addr: u32, mask: u32, val: u32) -> Result<()> {
        match self.call(&Request::Write { addr, mask, val })? {
            Response::WriteDone { write_done: true } => Ok(()),
            Response::Error { error } => Err(HalError::Remote { kind: error }),
            other => Err(HalError::invalid_message(format!(
                "unexpected reply to write: {other:?}"
            ))),
        }
    }
}

impl RegisterBus for RegisterClient {
    fn read(&self, addr: u32, mask: u32) -> Result<u32> {
        RegisterClient::read(self, addr, mask)
    }

    fn write(&self, addr: u32, mask: u32, value: u32) -> Result<()> {
        RegisterClient::write(self, addr, mask, value)
    }
}
