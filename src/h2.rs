//! HTTP/2 session binding.
//!
//! Requests run on independent client-initiated streams, so a request
//! parked on its write gate never blocks another. This binding stops at the
//! frame level: it produces [`Frame`] values for an HPACK/framing layer to
//! serialize, and routes nothing inbound since HTTP/2 responses already
//! carry their stream id.

use http::{HeaderMap, Method, Request};

use crate::session::{Session, StreamKey};
use crate::Error;

/// Pseudo-headers of a request head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pseudo {
    /// `:method`
    pub method: Method,
    /// `:path`
    pub path: String,
    /// `:scheme`, when the URI carries one.
    pub scheme: Option<String>,
    /// `:authority`, when the URI carries one.
    pub authority: Option<String>,
}

impl Pseudo {
    fn from_head(head: &Request<()>) -> Pseudo {
        Pseudo {
            method: head.method().clone(),
            path: head
                .uri()
                .path_and_query()
                .map(|pq| pq.as_str().to_owned())
                .unwrap_or_else(|| "/".to_owned()),
            scheme: head.uri().scheme_str().map(str::to_owned),
            authority: head.uri().authority().map(|a| a.as_str().to_owned()),
        }
    }

    fn list_size(&self) -> usize {
        // SETTINGS_MAX_HEADER_LIST_SIZE accounting: name + value + 32 per
        // entry (RFC 9113 section 6.5.2).
        const OVERHEAD: usize = 32;
        let mut size = ":method".len() + self.method.as_str().len() + OVERHEAD;
        size += ":path".len() + self.path.len() + OVERHEAD;
        if let Some(s) = &self.scheme {
            size += ":scheme".len() + s.len() + OVERHEAD;
        }
        if let Some(a) = &self.authority {
            size += ":authority".len() + a.len() + OVERHEAD;
        }
        size
    }
}

/// One outgoing frame, pre-HPACK.
#[derive(Debug)]
#[allow(missing_docs)]
pub enum Frame {
    /// Request head.
    Headers {
        stream: u32,
        pseudo: Pseudo,
        headers: HeaderMap,
        end_stream: bool,
    },
    /// Body data.
    Data {
        stream: u32,
        payload: Vec<u8>,
        end_stream: bool,
    },
    /// Trailing HEADERS; always ends the stream.
    Trailers { stream: u32, headers: HeaderMap },
    /// RST_STREAM with CANCEL.
    Reset { stream: u32 },
}

impl Frame {
    /// The stream this frame belongs to.
    pub fn stream(&self) -> u32 {
        match self {
            Frame::Headers { stream, .. } => *stream,
            Frame::Data { stream, .. } => *stream,
            Frame::Trailers { stream, .. } => *stream,
            Frame::Reset { stream } => *stream,
        }
    }
}

/// One HTTP/2 connection's send side.
pub struct Http2Session {
    frames: Vec<Frame>,
    next_stream: u32,
    max_header_list_size: Option<usize>,
    closed: bool,
}

impl Http2Session {
    /// A fresh connection with no stream limit overrides.
    pub fn new() -> Self {
        Http2Session {
            frames: Vec::new(),
            // Client streams are odd; 1 is reserved for a prior-knowledge
            // upgrade request.
            next_stream: 3,
            max_header_list_size: None,
            closed: false,
        }
    }

    /// Honor the peer's SETTINGS_MAX_HEADER_LIST_SIZE. Heads exceeding it
    /// fail synchronously with [`Error::HeaderListTooLarge`].
    pub fn with_max_header_list_size(mut self, size: usize) -> Self {
        self.max_header_list_size = Some(size);
        self
    }

    /// Frames produced so far.
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// Drain the produced frames.
    pub fn take_frames(&mut self) -> Vec<Frame> {
        std::mem::take(&mut self.frames)
    }

    /// Mark the connection closed, e.g. after a GOAWAY. Subsequent opens
    /// and writes fail with [`Error::Transport`].
    pub fn close_connection(&mut self) {
        debug!("h2 connection closed");
        self.closed = true;
    }

    fn ensure_open(&self) -> Result<(), Error> {
        if self.closed {
            Err(Error::Transport("connection closed".into()))
        } else {
            Ok(())
        }
    }
}

impl Default for Http2Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session for Http2Session {
    fn open_stream(&mut self) -> Result<StreamKey, Error> {
        self.ensure_open()?;
        let id = self.next_stream;
        self.next_stream += 2;
        trace!("h2 open stream {}", id);
        Ok(StreamKey(id))
    }

    fn is_multiplexed(&self) -> bool {
        true
    }

    fn write_headers(
        &mut self,
        stream: StreamKey,
        head: &Request<()>,
        end_stream: bool,
    ) -> Result<(), Error> {
        self.ensure_open()?;

        let pseudo = Pseudo::from_head(head);

        if let Some(max) = self.max_header_list_size {
            let size = pseudo.list_size()
                + head
                    .headers()
                    .iter()
                    .map(|(n, v)| n.as_str().len() + v.len() + 32)
                    .sum::<usize>();
            if size > max {
                return Err(Error::HeaderListTooLarge);
            }
        }

        self.frames.push(Frame::Headers {
            stream: stream.0,
            pseudo,
            headers: head.headers().clone(),
            end_stream,
        });
        Ok(())
    }

    fn write_data(&mut self, stream: StreamKey, data: &[u8], end_stream: bool) -> Result<(), Error> {
        self.ensure_open()?;
        self.frames.push(Frame::Data {
            stream: stream.0,
            payload: data.to_vec(),
            end_stream,
        });
        Ok(())
    }

    fn write_trailers(&mut self, stream: StreamKey, trailers: &HeaderMap) -> Result<(), Error> {
        self.ensure_open()?;
        self.frames.push(Frame::Trailers {
            stream: stream.0,
            headers: trailers.clone(),
        });
        Ok(())
    }

    fn flush(&mut self) {
        trace!("h2 flush ({} frames pending)", self.frames.len());
    }

    fn finish(&mut self, stream: StreamKey) {
        // Nothing to emit. The peer answered the stream; the framing layer
        // treats it as half-closed once the response completes.
        trace!("h2 finish stream {}", stream.0);
    }

    fn abort(&mut self, stream: StreamKey) {
        debug!("h2 reset stream {}", stream.0);
        self.frames.push(Frame::Reset { stream: stream.0 });
    }
}
