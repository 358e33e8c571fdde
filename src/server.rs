//! Server lifecycle and the event loop.
//!
//! # Example
//!
//! ```rust,no_run
//! use h1serv::HttpServer;
//!
//! # fn main() -> Result<(), h1serv::Error> {
//! let mut server = HttpServer::initialize()?;
//! let sender = server.sender();
//!
//! // Runs on the loop thread for every fully parsed request. Must not
//! // block; responding is fire-and-forget from any thread.
//! server.set_receive_callback(move |client_id, req| {
//!     println!(
//!         "client {}: {} {} ({} body bytes)",
//!         client_id,
//!         req.method(),
//!         req.uri(),
//!         req.body().len()
//!     );
//!     let _ = sender.send(client_id, b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\n\r\n");
//! });
//!
//! server.start("127.0.0.1", 3000)?;
//!
//! // ... later:
//! server.close();
//! server.join()?;
//! # Ok(())
//! # }
//! ```

use crate::conn::Connection;
use crate::queue::{SendQueue, WriteRequest};
use crate::{ClientId, Error};
use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token, Waker};
use socket2::{Domain, Protocol, Socket, Type};
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Token of the listening socket.
const LISTENER: Token = Token(0);

/// Token of the cross-thread wakeup handle.
const WAKER: Token = Token(1);

/// Client tokens sit above the reserved ones: `Token(id + TOKEN_OFFSET)`.
const TOKEN_OFFSET: usize = 2;

/// Pending-connection backlog passed to listen(2).
const LISTEN_BACKLOG: i32 = 128;

/// Readiness events processed per poll round.
const EVENTS_CAPACITY: usize = 256;

/// Callback invoked synchronously on the loop thread for every fully
/// parsed request. Partial or failed requests never reach it. It must not
/// block; respond via [`Sender::send`] from any thread.
pub type RecvCallback = Box<dyn FnMut(ClientId, http::Request<Vec<u8>>) + Send + 'static>;

/// State shared between the loop thread and producer threads: the
/// outbound queue, the wakeup handle and the stop flag. This is the whole
/// cross-thread surface; everything else belongs to the loop thread.
struct Shared {
    queue: SendQueue,
    waker: Waker,
    stop: AtomicBool,
}

/// A single-event-loop HTTP/1.x server.
///
/// See the [module level doc](index.html) for an example.
pub struct HttpServer {
    shared: Arc<Shared>,
    poll: Option<Poll>,
    callback: Option<RecvCallback>,
    thread: Option<JoinHandle<Result<(), Error>>>,
    local_addr: Option<SocketAddr>,
}

/// Cloneable handle for queueing response bytes from any thread,
/// including from inside the receive callback.
pub struct Sender {
    shared: Arc<Shared>,
}

impl HttpServer {
    /// Construct the event loop, the outbound queue and the wakeup handle.
    pub fn initialize() -> Result<HttpServer, Error> {
        let poll = Poll::new().map_err(Error::Init)?;
        let waker = Waker::new(poll.registry(), WAKER).map_err(Error::Init)?;

        Ok(HttpServer {
            shared: Arc::new(Shared {
                queue: SendQueue::new(),
                waker,
                stop: AtomicBool::new(false),
            }),
            poll: Some(poll),
            callback: None,
            thread: None,
            local_addr: None,
        })
    }

    /// Register the application callback. Must be called before [`start`];
    /// once the loop is running, further calls are ignored.
    ///
    /// [`start`]: HttpServer::start
    pub fn set_receive_callback<F>(&mut self, callback: F)
    where
        F: FnMut(ClientId, http::Request<Vec<u8>>) + Send + 'static,
    {
        if self.thread.is_some() {
            warn!("receive callback ignored: server already started");
            return;
        }
        self.callback = Some(Box::new(callback));
    }

    /// Bind and listen on `ip:port` (IPv4, backlog 128), then spawn the
    /// loop thread. Bind and listen failures are returned, never just
    /// logged; an occupied port is distinguished as [`Error::PortInUse`].
    pub fn start(&mut self, ip: &str, port: u16) -> Result<(), Error> {
        if self.thread.is_some() || self.poll.is_none() {
            return Err(Error::User("server already started".into()));
        }

        let ip: Ipv4Addr = ip
            .parse()
            .map_err(|_| Error::User(format!("invalid listen address: {}", ip)))?;
        let addr = SocketAddr::from((ip, port));

        let mut listener = TcpListener::from_std(bind_listener(addr)?);
        let local_addr = listener.local_addr().map_err(Error::Bind)?;

        // taken only after the fallible setup, so a failed start can be
        // retried with a corrected address
        let poll = match self.poll.take() {
            Some(poll) => poll,
            None => return Err(Error::User("server already started".into())),
        };

        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)
            .map_err(Error::Init)?;

        let mut event_loop = EventLoop {
            poll,
            listener,
            shared: self.shared.clone(),
            connections: HashMap::new(),
            next_id: 1,
            callback: self.callback.take(),
        };

        let handle = thread::Builder::new()
            .name("h1serv-loop".into())
            .spawn(move || event_loop.run())
            .map_err(Error::Thread)?;

        info!("listening on {}", local_addr);
        self.local_addr = Some(local_addr);
        self.thread = Some(handle);
        Ok(())
    }

    /// The bound listen address, once [`start`] has succeeded. Useful when
    /// binding port 0.
    ///
    /// [`start`]: HttpServer::start
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// A cloneable send handle detached from the server's lifetime
    /// borrows.
    pub fn sender(&self) -> Sender {
        Sender {
            shared: self.shared.clone(),
        }
    }

    /// Queue `data` for delivery to `client_id`. See [`Sender::send`].
    pub fn send(&self, client_id: ClientId, data: &[u8]) -> Result<(), Error> {
        self.sender().send(client_id, data)
    }

    /// Stop the loop. Sets the stop flag, then signals the wakeup handle
    /// once more — that wakeup is what lets the blocked wait observe the
    /// stop and tear every live handle down before the loop exits.
    pub fn close(&self) {
        if self.shared.stop.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.shared.waker.wake() {
            debug!("close wakeup failed: {}", e);
        }
    }

    /// Block until the loop thread has exited, propagating its exit
    /// status.
    pub fn join(&mut self) -> Result<(), Error> {
        match self.thread.take() {
            Some(handle) => match handle.join() {
                Ok(result) => result,
                Err(_) => Err(Error::Thread(io::Error::new(
                    io::ErrorKind::Other,
                    "loop thread panicked",
                ))),
            },
            None => Ok(()),
        }
    }
}

impl Drop for HttpServer {
    /// Backstop for a server dropped without an explicit shutdown: stop
    /// the loop and wait for it, which releases every still-open
    /// connection and still-queued write request exactly once.
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.close();
            if let Err(e) = self.join() {
                debug!("loop exit on drop: {}", e);
            }
        }
    }
}

impl Sender {
    /// Queue `data` for delivery to `client_id` and wake the loop.
    ///
    /// Fire-and-forget: `Ok` only means accepted-for-send. Data for an
    /// unknown or already-closed client id is silently dropped at drain
    /// time. Zero-length data is accepted; the connection flushes nothing
    /// and is then closed like any completed write. Callable from any
    /// number of threads concurrently.
    pub fn send(&self, client_id: ClientId, data: &[u8]) -> Result<(), Error> {
        if self.shared.stop.load(Ordering::SeqCst) {
            trace!(
                "send after close: dropping {} bytes for client({})",
                data.len(),
                client_id
            );
            return Ok(());
        }

        self.shared.queue.push(WriteRequest {
            client_id,
            data: data.to_vec(),
        });

        if let Err(e) = self.shared.waker.wake() {
            debug!("send wakeup failed: {}", e);
        }
        Ok(())
    }
}

impl Clone for Sender {
    fn clone(&self) -> Self {
        Sender {
            shared: self.shared.clone(),
        }
    }
}

/// Builds the listening socket: reuse-addr, explicit backlog,
/// non-blocking, ready for the poll.
fn bind_listener(addr: SocketAddr) -> Result<std::net::TcpListener, Error> {
    let socket =
        Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP)).map_err(Error::Init)?;
    socket.set_reuse_address(true).map_err(Error::Init)?;
    socket.bind(&addr.into()).map_err(|e| bind_error(addr, e))?;
    socket
        .listen(LISTEN_BACKLOG)
        .map_err(|e| bind_error(addr, e))?;
    socket.set_nonblocking(true).map_err(Error::Init)?;
    Ok(socket.into())
}

fn bind_error(addr: SocketAddr, e: io::Error) -> Error {
    if e.kind() == io::ErrorKind::AddrInUse {
        Error::PortInUse(addr)
    } else {
        Error::Bind(e)
    }
}

/// Everything the loop thread owns. No lock guards any of it: the
/// connection registry is mutated by exactly one thread for the server's
/// whole life, and that must stay true.
struct EventLoop {
    poll: Poll,
    listener: TcpListener,
    shared: Arc<Shared>,
    connections: HashMap<ClientId, Connection>,
    next_id: ClientId,
    callback: Option<RecvCallback>,
}

impl EventLoop {
    fn run(&mut self) -> Result<(), Error> {
        trace!("event loop running");
        let mut events = Events::with_capacity(EVENTS_CAPACITY);

        loop {
            if let Err(e) = self.poll.poll(&mut events, None) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                error!("event loop wait failed: {}", e);
                self.teardown();
                return Err(Error::Io(e));
            }

            for event in events.iter() {
                match event.token() {
                    LISTENER => self.accept_ready(),

                    WAKER => {
                        if self.shared.stop.load(Ordering::SeqCst) {
                            debug!("stop observed, tearing down");
                            self.teardown();
                            return Ok(());
                        }
                        self.drain();
                    }

                    token => {
                        self.connection_ready(token, event.is_readable(), event.is_writable())
                    }
                }
            }
        }
    }

    /// Accept until the listener is drained. A single failed accept is
    /// logged and discarded; the listener itself stays up.
    fn accept_ready(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    if let Err(e) = self.accept_one(stream, peer) {
                        warn!("{}", e);
                    }
                }

                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,

                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}

                Err(e) => {
                    warn!("{}", Error::Accept(e));
                    return;
                }
            }
        }
    }

    fn accept_one(&mut self, stream: mio::net::TcpStream, peer: SocketAddr) -> Result<(), Error> {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("set_nodelay failed for {}: {}", peer, e);
        }

        let id = self.next_id;
        self.next_id += 1;

        let mut conn = Connection::new(id, Token(id as usize + TOKEN_OFFSET), stream);
        conn.register(self.poll.registry()).map_err(Error::Accept)?;

        debug!("client({}) connected from {}", id, peer);
        self.connections.insert(id, conn);
        Ok(())
    }

    fn connection_ready(&mut self, token: Token, readable: bool, writable: bool) {
        let id = (token.0 - TOKEN_OFFSET) as ClientId;

        // the connection may be gone already: closes earlier in this event
        // batch race spurious readiness for the same token
        if !self.connections.contains_key(&id) {
            trace!("event for closed client({})", id);
            return;
        }

        if readable {
            self.read_ready(id);
        }
        if writable && self.connections.contains_key(&id) {
            self.write_ready(id);
        }
    }

    fn read_ready(&mut self, id: ClientId) {
        let mut completed = Vec::new();

        let keep = match self.connections.get_mut(&id) {
            Some(conn) => conn.handle_readable(&mut completed),
            None => return,
        };

        // deliver every fully parsed request before acting on any close:
        // a request completed by the same chunk that hit EOF still counts
        for req in completed {
            match self.callback.as_mut() {
                Some(callback) => callback(id, req),
                None => debug!("request from client({}) dropped: no receive callback", id),
            }
        }

        match keep {
            Ok(true) => {}
            Ok(false) => self.close_connection(id),
            Err(e) => {
                warn!("client({}): {}", id, e);
                self.close_connection(id);
            }
        }
    }

    fn write_ready(&mut self, id: ClientId) {
        let outcome = match self.connections.get_mut(&id) {
            Some(conn) => conn.flush(),
            None => return,
        };
        self.after_flush(id, outcome);
    }

    /// Drain the outbound queue. Pops under the lock, writes outside it;
    /// one slow connection never blocks delivery to the others.
    fn drain(&mut self) {
        loop {
            let req = match self.shared.queue.pop() {
                Some(req) => req,
                None => break,
            };
            let id = req.client_id;

            let outcome = match self.connections.get_mut(&id) {
                Some(conn) => {
                    conn.queue_write(req.data);
                    conn.flush()
                }
                None => {
                    // the peer is simply gone; not an error
                    trace!("client({}) gone, dropping queued write", id);
                    continue;
                }
            };

            self.after_flush(id, outcome);
        }
    }

    /// One write per connection: a completed flush closes it, success or
    /// failure alike. A blocked flush re-arms for writability.
    fn after_flush(&mut self, id: ClientId, outcome: Result<bool, Error>) {
        match outcome {
            Ok(true) => self.close_connection(id),

            Ok(false) => {
                let registry = self.poll.registry();
                if let Some(conn) = self.connections.get_mut(&id) {
                    if let Err(e) = conn.rearm_writable(registry) {
                        warn!("client({}): {}", id, Error::Write(e));
                        self.close_connection(id);
                    }
                }
            }

            Err(e) => {
                warn!("client({}): {}", id, e);
                self.close_connection(id);
            }
        }
    }

    /// Remove and drop a connection. Every close funnels through here;
    /// a missing id is a tolerated double close, not an error.
    fn close_connection(&mut self, id: ClientId) {
        if let Some(mut conn) = self.connections.remove(&id) {
            conn.deregister(self.poll.registry());
            debug!("client({}) closed", id);
        }
    }

    /// Close every live handle and drop whatever is still queued. Runs
    /// exactly once, right before the loop exits.
    fn teardown(&mut self) {
        let open: Vec<ClientId> = self.connections.keys().copied().collect();
        if !open.is_empty() {
            debug!("closing {} open connection(s)", open.len());
        }
        for id in open {
            self.close_connection(id);
        }

        let dropped = self.shared.queue.clear();
        if dropped > 0 {
            debug!("dropped {} undelivered write request(s)", dropped);
        }

        if let Err(e) = self.poll.registry().deregister(&mut self.listener) {
            trace!("listener deregister failed: {}", e);
        }
    }
}

impl fmt::Debug for HttpServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HttpServer")
    }
}

impl fmt::Debug for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sender")
    }
}
