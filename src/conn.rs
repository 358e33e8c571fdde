//! Per-connection state and readiness handlers.

use crate::parse::RequestParser;
use crate::{ClientId, Error};
use mio::net::TcpStream;
use mio::{Interest, Registry, Token};
use std::io::{self, Read, Write};

/// Size of the fixed per-connection receive buffer, allocated once at
/// accept and reused for every read.
pub(crate) const RECV_BUF_SIZE: usize = 16_384;

/// Response bytes mid-flush: the buffer plus how far into it the socket
/// has accepted data.
struct Outbound {
    data: Vec<u8>,
    pos: usize,
}

/// State for one accepted connection. Owned exclusively by the loop
/// thread's connection registry; dropped on close.
pub(crate) struct Connection {
    id: ClientId,
    token: Token,
    stream: TcpStream,
    recv_buf: Box<[u8]>,
    parser: RequestParser,
    pending: Option<Outbound>,
}

impl Connection {
    pub(crate) fn new(id: ClientId, token: Token, stream: TcpStream) -> Connection {
        Connection {
            id,
            token,
            stream,
            recv_buf: vec![0; RECV_BUF_SIZE].into_boxed_slice(),
            parser: RequestParser::new(),
            pending: None,
        }
    }

    pub(crate) fn register(&mut self, registry: &Registry) -> io::Result<()> {
        registry.register(&mut self.stream, self.token, Interest::READABLE)
    }

    /// Add WRITABLE interest so a blocked flush can resume.
    pub(crate) fn rearm_writable(&mut self, registry: &Registry) -> io::Result<()> {
        registry.reregister(
            &mut self.stream,
            self.token,
            Interest::READABLE | Interest::WRITABLE,
        )
    }

    pub(crate) fn deregister(&mut self, registry: &Registry) {
        if let Err(e) = registry.deregister(&mut self.stream) {
            trace!("client({}) deregister failed: {}", self.id, e);
        }
    }

    /// Drain the socket, feeding every chunk to the parser. Requests
    /// completed along the way are pushed onto `out` — the caller delivers
    /// them even when the connection is closed by the same event.
    ///
    /// Returns `Ok(true)` to keep the connection, `Ok(false)` on a clean
    /// close (EOF or reset) and `Err` on a parse or transport failure.
    pub(crate) fn handle_readable(
        &mut self,
        out: &mut Vec<http::Request<Vec<u8>>>,
    ) -> Result<bool, Error> {
        loop {
            match self.stream.read(&mut self.recv_buf) {
                Ok(0) => {
                    debug!("client({}) close (EOF)", self.id);
                    return Ok(false);
                }

                Ok(n) => {
                    trace!("client({}) read {} bytes", self.id, n);
                    // an upgraded parser swallows the bytes; keep draining
                    // either way so the poll stays quiet
                    self.parser.advance(&self.recv_buf[..n], out)?;
                }

                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(true);
                }

                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}

                Err(e) if e.kind() == io::ErrorKind::ConnectionReset => {
                    debug!("client({}) close (connection reset)", self.id);
                    return Ok(false);
                }

                Err(e) => {
                    return Err(Error::Io(e));
                }
            }
        }
    }

    /// Queue response bytes. A buffer already mid-flush grows instead of
    /// being raced; the connection closes once everything has flushed.
    pub(crate) fn queue_write(&mut self, data: Vec<u8>) {
        match &mut self.pending {
            Some(out) => out.data.extend_from_slice(&data),
            None => self.pending = Some(Outbound { data, pos: 0 }),
        }
    }

    /// Write pending bytes until done or the socket pushes back.
    ///
    /// Returns `Ok(true)` once everything (possibly nothing) has been
    /// flushed — the connection's write is complete and it should be
    /// closed — and `Ok(false)` when the socket would block.
    pub(crate) fn flush(&mut self) -> Result<bool, Error> {
        let out = match &mut self.pending {
            Some(out) => out,
            None => return Ok(true),
        };

        while out.pos < out.data.len() {
            match self.stream.write(&out.data[out.pos..]) {
                Ok(0) => {
                    return Err(Error::Write(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "connection write accepted no bytes",
                    )));
                }

                Ok(n) => {
                    trace!("client({}) wrote {} bytes", self.id, n);
                    out.pos += n;
                }

                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    trace!(
                        "client({}) write blocked, {} bytes left",
                        self.id,
                        out.data.len() - out.pos
                    );
                    return Ok(false);
                }

                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}

                Err(e) => {
                    return Err(Error::Write(e));
                }
            }
        }

        self.pending = None;
        Ok(true)
    }
}
