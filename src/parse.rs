//! Incremental HTTP/1.x request parsing.
//!
//! [`RequestParser`] accumulates raw read chunks, parses the request head
//! with the `httparse` crate once the header terminator arrives, then
//! consumes a `Content-Length` delineated body. Completed requests come out
//! as [`http::Request`] values; the parser resets itself and immediately
//! continues with whatever bytes follow, so several requests arriving in
//! one chunk each surface exactly once, in order.

use crate::Error;
use std::mem;

/// Maximum size of an accumulated request head (request line + headers).
pub const MAX_HEAD_SIZE: usize = 32 * 1024;

/// Number of header slots offered to `httparse`. A request with more
/// headers is rejected as a parse error.
pub const MAX_HEADERS: usize = 32;

/// Maximum `Content-Length` accepted for a request body.
pub const MAX_BODY_SIZE: usize = 1024 * 1024;

/// Where the parser stands after consuming a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// More input is needed for the message in progress.
    Incomplete,
    /// The connection switched protocols; no further bytes are parsed.
    Upgraded,
}

#[derive(Debug, Clone, Copy)]
enum State {
    /// Accumulating the request head.
    Head,
    /// Accumulating the request body.
    Body { remaining: usize },
    /// Terminal: an upgrade request was delivered.
    Upgraded,
}

/// Incremental parser state for one connection. Reset happens implicitly
/// whenever a message completes.
#[derive(Debug)]
pub struct RequestParser {
    state: State,
    head: Vec<u8>,
    partial: Option<http::request::Parts>,
    body: Vec<u8>,
}

impl RequestParser {
    /// A parser awaiting the first byte of a request.
    pub fn new() -> RequestParser {
        RequestParser {
            state: State::Head,
            head: Vec::new(),
            partial: None,
            body: Vec::new(),
        }
    }

    /// Feed one read chunk. Every request completed by this chunk is pushed
    /// onto `out`. A parse failure poisons the connection; the caller is
    /// expected to close it and never call `advance` again.
    pub fn advance(
        &mut self,
        chunk: &[u8],
        out: &mut Vec<http::Request<Vec<u8>>>,
    ) -> Result<Status, Error> {
        let mut input = chunk.to_vec();

        loop {
            if let State::Upgraded = self.state {
                if !input.is_empty() {
                    trace!("ignoring {} bytes after upgrade", input.len());
                }
                return Ok(Status::Upgraded);
            }
            if input.is_empty() {
                return Ok(Status::Incomplete);
            }

            match self.state {
                State::Head => {
                    // the terminator may span the previous chunk boundary
                    let scan_from = self.head.len().saturating_sub(3);
                    self.head.append(&mut input);

                    let pos = match find_crlfcrlf(&self.head[scan_from..]) {
                        Some(pos) => scan_from + pos,
                        None => {
                            if self.head.len() > MAX_HEAD_SIZE {
                                return Err(Error::Unsupported("request head too large"));
                            }
                            continue;
                        }
                    };
                    let head_len = pos + 4;
                    if head_len > MAX_HEAD_SIZE {
                        return Err(Error::Unsupported("request head too large"));
                    }

                    // bytes past the terminator are body or the next message
                    input = self.head.split_off(head_len);
                    let head = mem::take(&mut self.head);

                    // invariant: the terminator is in `head`, so the parse
                    // cannot come back partial.
                    let req = try_parse_head(&head)?.expect("terminator without complete head");

                    if is_upgrade(&req) {
                        trace!("upgrade request, parsing stops");
                        let (parts, _) = req.into_parts();
                        out.push(http::Request::from_parts(parts, Vec::new()));
                        self.state = State::Upgraded;
                        continue;
                    }

                    let len = body_len(&req)?;
                    if len > MAX_BODY_SIZE {
                        return Err(Error::Unsupported("request body too large"));
                    }

                    let (parts, _) = req.into_parts();
                    if len == 0 {
                        out.push(http::Request::from_parts(parts, Vec::new()));
                    } else {
                        self.partial = Some(parts);
                        self.body.reserve(len);
                        self.state = State::Body { remaining: len };
                    }
                }

                State::Body { remaining } => {
                    let take = remaining.min(input.len());
                    self.body.extend_from_slice(&input[..take]);
                    input.drain(..take);

                    let remaining = remaining - take;
                    if remaining == 0 {
                        let parts = self.partial.take().expect("body bytes without a head");
                        let body = mem::take(&mut self.body);
                        out.push(http::Request::from_parts(parts, body));
                        self.state = State::Head;
                    } else {
                        self.state = State::Body { remaining };
                    }
                }

                State::Upgraded => unreachable!("handled above"),
            }
        }
    }
}

impl Default for RequestParser {
    fn default() -> Self {
        RequestParser::new()
    }
}

/// Find the index where the end-of-header sequence `\r\n\r\n` starts.
pub fn find_crlfcrlf(buf: &[u8]) -> Option<usize> {
    const END_OF_HEADER: &[u8] = &[b'\r', b'\n', b'\r', b'\n'];
    let mut end_index = 0;

    for (i, b) in buf.iter().enumerate() {
        if *b == END_OF_HEADER[end_index] {
            end_index += 1;
            if end_index == END_OF_HEADER.len() {
                return Some(i + 1 - END_OF_HEADER.len());
            }
        } else {
            // a mismatched \r can still start a new terminator
            end_index = if *b == b'\r' { 1 } else { 0 };
        }
    }

    None
}

/// Attempt to parse an http/1.x request head.
fn try_parse_head(buf: &[u8]) -> Result<Option<http::Request<()>>, Error> {
    trace!("try_parse_head: {:?}", String::from_utf8_lossy(buf));

    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut parser = httparse::Request::new(&mut headers);

    let status = parser.parse(buf)?;

    if status.is_partial() {
        return Ok(None);
    }

    let mut uri = http::Uri::builder();

    if let Some(path) = parser.path {
        uri = uri.path_and_query(path);
    }

    let mut bld = http::Request::builder().version(if parser.version == Some(1) {
        http::Version::HTTP_11
    } else {
        http::Version::HTTP_10
    });

    bld = bld.uri(uri.build()?);

    if let Some(method) = parser.method {
        bld = bld.method(method);
    }

    for head in parser.headers.iter() {
        let name = http::header::HeaderName::from_bytes(head.name.as_bytes());
        let value = http::header::HeaderValue::from_bytes(head.value);
        match (name, value) {
            (Ok(name), Ok(value)) => bld = bld.header(name, value),
            (Err(e), _) => {
                debug!("Dropping bad header name: {}", e);
            }
            (Ok(name), Err(e)) => {
                debug!("Dropping bad header value ({}): {}", name, e);
            }
        }
    }

    let built = bld.body(())?;

    debug!("try_parse_head success: {:?}", built);

    Ok(Some(built))
}

/// Body length promised by the head, from `Content-Length`.
fn body_len(req: &http::Request<()>) -> Result<usize, Error> {
    if let Some(te) = req.headers().get(http::header::TRANSFER_ENCODING) {
        let chunked = te
            .to_str()
            .map(|v| v.to_ascii_lowercase().contains("chunked"))
            .unwrap_or(false);
        if chunked {
            return Err(Error::Unsupported("chunked transfer encoding"));
        }
    }

    let header = match req.headers().get(http::header::CONTENT_LENGTH) {
        Some(v) => v,
        None => return Ok(0),
    };

    header
        .to_str()
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .ok_or(Error::Unsupported("invalid content-length"))
}

fn is_upgrade(req: &http::Request<()>) -> bool {
    req.headers().contains_key(http::header::UPGRADE)
}
