//! Register RPC server

use super::wire::{read_frame, write_frame, Frame, Hex, Request, Response, DEFAULT_PORT};
use crate::access::RegisterBus;
use crate::error::{HalError, Result};
use std::io::BufReader;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use tracing::{debug, info, warn};

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen address
    pub bind: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
        }
    }
}

/// Serves masked register access to remote clients
///
/// Each connection is a strict request/reply session on its own thread.
/// All sessions share one bus, so concurrent read-modify-writes from
/// different clients cannot interleave.
pub struct RegisterServer<B> {
    bus: Arc<B>,
}

impl<B> Clone for RegisterServer<B> {
    fn clone(&self) -> Self {
        Self {
            bus: Arc::clone(&self.bus),
        }
    }
}

impl<B: RegisterBus + 'static> RegisterServer<B> {
    /// Create a server over a shared bus
    pub fn new(bus: Arc<B>) -> Self {
        Self { bus }
    }

    /// Bus this server forwards to
    pub fn bus(&self) -> &Arc<B> {
        &self.bus
    }

    /// Handle one request line
    ///
    /// Never fails: every outcome, including malformed input, becomes a
    /// reply.
    pub fn respond(&self, line: &str) -> Response {
        let request = match Request::parse(line) {
            Ok(request) => request,
            Err(e) => {
                warn!("Rejected request: {e}");
                return Response::from_error(&e);
            }
        };
        match self.dispatch(request) {
            Ok(response) => response,
            Err(e) => {
                warn!("Request {request:?} failed: {e}");
                Response::from_error(&e)
            }
        }
    }

    fn dispatch(&self, request: Request) -> Result<Response> {
        match request {
            Request::Read { addr, mask } => {
                let val = self.bus.read(addr, mask)?;
                info!("Read {val:#x} at {addr:#x} with mask {mask:#x}");
                Ok(Response::ReadVal { read_val: Hex(val) })
            }
            Request::Write { addr, mask, val } => {
                self.bus.write(addr, mask, val)?;
                info!("Wrote {val:#x} at {addr:#x} with mask {mask:#x}");
                Ok(Response::WriteDone { write_done: true })
            }
        }
    }

    /// Run one client session until it disconnects
    ///
    /// # Errors
    ///
    /// Returns socket errors. Bad requests, including frames that are too
    /// long or not UTF-8, are answered and the session carries on.
    pub fn serve_connection(&self, stream: TcpStream) -> Result<()> {
        let peer = stream.peer_addr().ok();
        let mut writer = stream.try_clone()?;
        let mut reader = BufReader::new(stream);
        debug!("Session opened: {peer:?}");

        while let Some(frame) = read_frame(&mut reader)? {
            let reply = match frame {
                Frame::Text(line) if line.trim().is_empty() => continue,
                Frame::Text(line) => self.respond(&line),
                Frame::Malformed(reason) => {
                    let err = HalError::invalid_encoding(reason);
                    warn!("Rejected request: {err}");
                    Response::from_error(&err)
                }
            };
            write_frame(&mut writer, &reply.to_json())?;
        }

        debug!("Session closed: {peer:?}");
        Ok(())
    }

    /// Accept clients forever, one thread per session
    ///
    /// # Errors
    ///
    /// Returns only if the listener itself fails to report its address.
    pub fn run(&self, listener: &TcpListener) -> Result<()> {
        info!("Register server listening on {}", listener.local_addr()?);
        for stream in listener.incoming() {
            let stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("Accept failed: {e}");
                    continue;
                }
            };
            let server = self.clone();
            let spawned = thread::Builder::new()
                .name("hermes-rpc".into())
                .spawn(move || {
                    if let Err(e) = server.serve_connection(stream) {
                        warn!("Session ended with error: {e}");
                    }
                });
            if let Err(e) = spawned {
                warn!("Could not start session thread: {e}");
            }
        }
        Ok(())
    }
}

/// Bind a listener and serve forever
///
/// # Errors
///
/// Returns the bind error.
pub fn serve<B: RegisterBus + 'static>(bus: Arc<B>, config: &ServerConfig) -> Result<()> {
    let listener = TcpListener::bind(config.bind)?;
    RegisterServer::new(bus).run(&listener)
}
