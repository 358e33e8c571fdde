#![warn(missing_docs, missing_debug_implementations)]
#![warn(clippy::all)]

//! A single-event-loop HTTP/1.x server.
//!
//! This library accepts TCP connections, incrementally parses HTTP/1.x
//! requests off the wire and hands every completed request to an
//! application callback. Responses are queued as raw bytes from any thread
//! and flushed asynchronously by the loop thread; a connection is closed
//! once its response has been written. There is no keep-alive: one
//! response ends a connection's life.
//!
//! All connection state lives on a single loop thread driven by a
//! [`mio::Poll`]. The only cross-thread structure is the outbound queue: a
//! locked FIFO that producer threads push into before signalling the
//! loop's [`mio::Waker`]. Everything else — accepting, parsing, the
//! connection registry, write issuance, teardown — happens on the loop
//! thread, so none of it needs a lock.
//!
//! ## In scope
//!
//! * HTTP/1.x request framing as parsed by the `httparse` crate.
//! * `Content-Length` delineated request bodies.
//! * Fire-and-forget response delivery addressed by client id.
//!
//! ## Out of scope
//!
//! * HTTP/2, TLS, routing, response construction helpers.
//! * Keep-alive and pipelined responses (the connection closes after one
//!   write).
//! * `Transfer-Encoding: chunked` request bodies (rejected).
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
//! server.set_receive_callback(move |client_id, req| {
//!     println!("{} {} from client {}", req.method(), req.uri(), client_id);
//!     let _ = sender.send(client_id, b"HTTP/1.1 200 OK\r\n\r\n");
//! });
//!
//! server.start("127.0.0.1", 3000)?;
//! server.join()?;
//! # Ok(())
//! # }
//! ```

#[macro_use]
extern crate log;

mod conn;
mod error;

#[doc(hidden)]
pub mod parse;

#[doc(hidden)]
pub mod queue;

pub mod server;

pub use error::Error;
pub use server::{HttpServer, RecvCallback, Sender};

/// Per-connection integer handle used to address a connection from outside
/// the loop thread. Assigned at accept time, starting at 1, never reused.
pub type ClientId = u64;
