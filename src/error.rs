use std::fmt;
use std::io;
use std::net::SocketAddr;

/// Possible errors from this crate.
#[derive(Debug)]
pub enum Error {
    /// Constructing the event loop or its wakeup handle failed.
    Init(io::Error),
    /// Binding or listening on the requested address failed.
    Bind(io::Error),
    /// The requested listen address is already in use.
    PortInUse(SocketAddr),
    /// Spawning the loop thread failed.
    Thread(io::Error),
    /// Accepting or registering an inbound connection failed. Local to the
    /// attempted connection; the listener stays up.
    Accept(io::Error),
    /// Writing queued response data to a connection failed. Local to that
    /// connection, which is closed without retry.
    Write(io::Error),
    /// A user/usage problem such as passing an unparseable listen address.
    User(String),
    /// HTTP/1.x parse errors from the `httparse` crate.
    Parse(httparse::Error),
    /// A well-formed request this server refuses to process, such as one
    /// exceeding the head/body size caps or using chunked transfer.
    Unsupported(&'static str),
    /// Http errors from the `http` crate.
    Http(http::Error),
    /// A wrapped std::io::Error from the underlying transport (socket).
    Io(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Init(v) => write!(f, "event loop init: {}", v),
            Error::Bind(v) => write!(f, "bind: {}", v),
            Error::PortInUse(v) => write!(f, "address already in use: {}", v),
            Error::Thread(v) => write!(f, "loop thread: {}", v),
            Error::Accept(v) => write!(f, "accept: {}", v),
            Error::Write(v) => write!(f, "write: {}", v),
            Error::User(v) => write!(f, "{}", v),
            Error::Parse(v) => write!(f, "http11 parser: {}", v),
            Error::Unsupported(v) => write!(f, "unsupported request: {}", v),
            Error::Http(v) => write!(f, "http api: {}", v),
            Error::Io(v) => fmt::Display::fmt(v, f),
        }
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<httparse::Error> for Error {
    fn from(e: httparse::Error) -> Self {
        Error::Parse(e)
    }
}

impl From<http::Error> for Error {
    fn from(e: http::Error) -> Self {
        Error::Http(e)
    }
}
