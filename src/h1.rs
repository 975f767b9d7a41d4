//! HTTP/1.1 session binding.
//!
//! A [`Http1Session`] serializes request heads, chunked or length-delimited
//! bodies and trailers into a single outgoing byte buffer. HTTP/1.1 allows
//! no interleaving, so only the request at the head of the queue writes to
//! the wire; later requests buffer privately and are promoted in order as
//! their predecessors finish. A request parked on its write gate therefore
//! blocks everything behind it, which is exactly what the protocol requires.
//!
//! [`ResponseReader`] is the inbound half: it parses response heads off the
//! connection and routes them to handlers by arrival order, since HTTP/1.1
//! responses carry no stream identifier.

use std::collections::VecDeque;

use http::{header, HeaderMap, Request, Response, StatusCode};

use crate::decoder::ResponseRouter;
use crate::session::{Session, StreamKey};
use crate::Error;

const MAX_RESPONSE_HEADERS: usize = 128;

enum Framing {
    Unset,
    Length { remaining: u64 },
    Chunked,
}

struct H1Stream {
    key: u32,
    buf: Vec<u8>,
    framing: Framing,
    sent_end: bool,
}

/// One HTTP/1.1 connection's send side.
pub struct Http1Session {
    wire: Vec<u8>,
    streams: VecDeque<H1Stream>,
    next_ordinal: u32,
    closed: bool,
}

impl Http1Session {
    /// A fresh, open connection.
    pub fn new() -> Self {
        Http1Session {
            wire: Vec::new(),
            streams: VecDeque::new(),
            next_ordinal: 1,
            closed: false,
        }
    }

    /// Bytes ready to go on the wire.
    pub fn wire(&self) -> &[u8] {
        &self.wire
    }

    /// Drain the bytes ready to go on the wire.
    pub fn take_wire(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.wire)
    }

    /// Tell if the connection has been torn down.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Mark the connection closed, e.g. after the peer hung up. Subsequent
    /// opens and writes fail with [`Error::Transport`].
    pub fn close_connection(&mut self) {
        debug!("h1 connection closed");
        self.closed = true;
        self.streams.clear();
    }

    fn ensure_open(&self) -> Result<(), Error> {
        if self.closed {
            Err(Error::Transport("connection closed".into()))
        } else {
            Ok(())
        }
    }

    fn index_of(&self, stream: StreamKey) -> Result<usize, Error> {
        self.streams
            .iter()
            .position(|s| s.key == stream.0)
            .ok_or_else(|| Error::Transport("unknown stream".into()))
    }

    /// Append serialized bytes for `key`: directly to the wire when the
    /// stream is at the head of the queue, otherwise to its private buffer.
    fn append(&mut self, key: u32, bytes: &[u8]) {
        let at_front = self.streams.front().map(|s| s.key == key).unwrap_or(false);
        if at_front {
            self.wire.extend_from_slice(bytes);
        } else if let Some(s) = self.streams.iter_mut().find(|s| s.key == key) {
            s.buf.extend_from_slice(bytes);
        }
    }

    /// Pop finished requests off the front and splice the next request's
    /// buffered bytes onto the wire.
    fn promote(&mut self) {
        while self.streams.front().map(|s| s.sent_end).unwrap_or(false) {
            self.streams.pop_front();
            if let Some(next) = self.streams.front_mut() {
                self.wire.append(&mut next.buf);
            }
        }
    }
}

impl Default for Http1Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session for Http1Session {
    fn open_stream(&mut self) -> Result<StreamKey, Error> {
        self.ensure_open()?;
        let key = self.next_ordinal;
        self.next_ordinal += 1;
        self.streams.push_back(H1Stream {
            key,
            buf: Vec::new(),
            framing: Framing::Unset,
            sent_end: false,
        });
        trace!("h1 open stream {}", key);
        Ok(StreamKey(key))
    }

    fn is_multiplexed(&self) -> bool {
        false
    }

    fn write_headers(
        &mut self,
        stream: StreamKey,
        head: &Request<()>,
        end_stream: bool,
    ) -> Result<(), Error> {
        self.ensure_open()?;
        let i = self.index_of(stream)?;

        if !matches!(self.streams[i].framing, Framing::Unset) {
            return Err(Error::Transport("headers already written".into()));
        }

        let framing = detect_framing(head.headers(), end_stream)?;
        let add_chunked = matches!(framing, Framing::Chunked)
            && !head.headers().contains_key(header::TRANSFER_ENCODING);

        let path = head
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");

        let mut bytes = Vec::with_capacity(256);
        bytes.extend_from_slice(head.method().as_str().as_bytes());
        bytes.push(b' ');
        bytes.extend_from_slice(path.as_bytes());
        bytes.extend_from_slice(b" HTTP/1.1\r\n");

        for (name, value) in head.headers() {
            bytes.extend_from_slice(name.as_str().as_bytes());
            bytes.extend_from_slice(b": ");
            bytes.extend_from_slice(value.as_bytes());
            bytes.extend_from_slice(b"\r\n");
        }
        if add_chunked {
            bytes.extend_from_slice(b"transfer-encoding: chunked\r\n");
        }
        bytes.extend_from_slice(b"\r\n");

        self.streams[i].framing = framing;
        self.streams[i].sent_end = end_stream;

        self.append(stream.0, &bytes);
        self.promote();
        Ok(())
    }

    fn write_data(&mut self, stream: StreamKey, data: &[u8], end_stream: bool) -> Result<(), Error> {
        self.ensure_open()?;
        let i = self.index_of(stream)?;

        if self.streams[i].sent_end {
            return Err(Error::Transport("body data after end of stream".into()));
        }

        let mut bytes = Vec::with_capacity(data.len() + 16);
        match &mut self.streams[i].framing {
            Framing::Unset => {
                return Err(Error::Transport("body data before headers".into()));
            }
            Framing::Length { remaining } => {
                let len = data.len() as u64;
                if len > *remaining {
                    return Err(Error::BodyLargerThanContentLength);
                }
                *remaining -= len;
                if end_stream && *remaining > 0 {
                    return Err(Error::Transport("content-length not satisfied".into()));
                }
                bytes.extend_from_slice(data);
            }
            Framing::Chunked => {
                if !data.is_empty() {
                    bytes.extend_from_slice(format!("{:x}\r\n", data.len()).as_bytes());
                    bytes.extend_from_slice(data);
                    bytes.extend_from_slice(b"\r\n");
                }
                if end_stream {
                    bytes.extend_from_slice(b"0\r\n\r\n");
                }
            }
        }

        self.streams[i].sent_end = end_stream;
        self.append(stream.0, &bytes);
        if end_stream {
            self.promote();
        }
        Ok(())
    }

    fn write_trailers(&mut self, stream: StreamKey, trailers: &HeaderMap) -> Result<(), Error> {
        self.ensure_open()?;
        let i = self.index_of(stream)?;

        if self.streams[i].sent_end {
            return Err(Error::Transport("trailers after end of stream".into()));
        }
        if !matches!(self.streams[i].framing, Framing::Chunked) {
            return Err(Error::TrailersRequireChunked);
        }

        let mut bytes = Vec::with_capacity(64);
        bytes.extend_from_slice(b"0\r\n");
        for (name, value) in trailers {
            bytes.extend_from_slice(name.as_str().as_bytes());
            bytes.extend_from_slice(b": ");
            bytes.extend_from_slice(value.as_bytes());
            bytes.extend_from_slice(b"\r\n");
        }
        bytes.extend_from_slice(b"\r\n");

        self.streams[i].sent_end = true;
        self.append(stream.0, &bytes);
        self.promote();
        Ok(())
    }

    fn flush(&mut self) {
        trace!("h1 flush ({} bytes pending)", self.wire.len());
    }

    fn finish(&mut self, stream: StreamKey) {
        // Close the send side without emitting an end-of-body marker. Used
        // when the advertised framing was never started, e.g. a rejected
        // expectation whose body was never sent.
        if let Ok(i) = self.index_of(stream) {
            self.streams[i].sent_end = true;
            self.promote();
        }
    }

    fn abort(&mut self, stream: StreamKey) {
        // HTTP/1.1 has no per-request cancel; an aborted request with
        // incomplete framing poisons the connection.
        debug!("h1 abort stream {}, closing connection", stream.0);
        self.close_connection();
    }
}

fn detect_framing(headers: &HeaderMap, end_stream: bool) -> Result<Framing, Error> {
    if let Some(te) = headers.get(header::TRANSFER_ENCODING) {
        let chunked = te
            .to_str()
            .map(|v| v.split(',').any(|t| t.trim().eq_ignore_ascii_case("chunked")))
            .unwrap_or(false);
        if !chunked {
            return Err(Error::InvalidRequest(
                "transfer-encoding without chunked".into(),
            ));
        }
        return Ok(Framing::Chunked);
    }

    if let Some(cl) = headers.get(header::CONTENT_LENGTH) {
        let remaining = cl
            .to_str()
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
            .ok_or_else(|| Error::InvalidRequest("content-length not a number".into()))?;
        return Ok(Framing::Length { remaining });
    }

    if end_stream {
        Ok(Framing::Length { remaining: 0 })
    } else {
        Ok(Framing::Chunked)
    }
}

/// Parse one response head. `Ok(None)` means more input is needed.
pub fn parse_response_head(input: &[u8]) -> Result<Option<(usize, Response<()>)>, Error> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_RESPONSE_HEADERS];
    let mut parsed = httparse::Response::new(&mut headers);

    let n = match parsed.parse(input) {
        Ok(httparse::Status::Complete(n)) => n,
        Ok(httparse::Status::Partial) => return Ok(None),
        Err(httparse::Error::TooManyHeaders) => return Err(Error::HttpParseTooManyHeaders),
        Err(e) => return Err(e.into()),
    };

    let code = parsed
        .code
        .ok_or_else(|| Error::HttpParseFail("missing status code".into()))?;
    let status =
        StatusCode::from_u16(code).map_err(|e| Error::HttpParseFail(e.to_string()))?;

    let mut builder = Response::builder().status(status);
    for h in parsed.headers.iter() {
        builder = builder.header(h.name, h.value);
    }
    let response = builder
        .body(())
        .map_err(|e| Error::HttpParseFail(e.to_string()))?;

    Ok(Some((n, response)))
}

/// Inbound response-head reader for one HTTP/1.1 connection.
///
/// Responses arrive in request order, so heads are routed by a running
/// ordinal matching the keys [`Http1Session::open_stream`] hands out.
/// Interim heads route to the current ordinal without advancing it; a final
/// head advances to the next in-flight request. Response bodies are framed
/// outside this type.
pub struct ResponseReader {
    slot: u32,
}

impl ResponseReader {
    /// A reader expecting the response to the first request.
    pub fn new() -> Self {
        ResponseReader { slot: 1 }
    }

    /// Parse as many complete response heads out of `input` as possible and
    /// route each to its handler. Returns the number of bytes consumed.
    pub fn feed(&mut self, input: &[u8], router: &ResponseRouter) -> Result<usize, Error> {
        let mut used = 0;

        loop {
            let rest = &input[used..];
            if rest.is_empty() {
                return Ok(used);
            }

            let Some((n, head)) = parse_response_head(rest)? else {
                return Ok(used);
            };
            used += n;

            let status = head.status();
            trace!("h1 response {} routed to request {}", status, self.slot);
            router.on_response(StreamKey(self.slot), status);

            let interim =
                status.is_informational() && status != StatusCode::SWITCHING_PROTOCOLS;
            if !interim {
                self.slot += 1;
            }
        }
    }
}

impl Default for ResponseReader {
    fn default() -> Self {
        Self::new()
    }
}
