use http::{HeaderMap, Request};

use crate::Error;

/// Identifies a request on a connection: the stream id on HTTP/2, or the
/// connection ordinal ("next response slot") on HTTP/1.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamKey(pub u32);

/// The send half of a connection, as seen by a request handler.
///
/// Implementations frame writes for their protocol: the HTTP/1.1 binding
/// serializes heads and bodies into an outgoing byte buffer, the HTTP/2
/// binding produces frames for the framing layer. Each write may fail with
/// a transport error, surfaced synchronously.
pub trait Session {
    /// Allocate a fresh stream (HTTP/2) or claim a send slot (HTTP/1.1).
    fn open_stream(&mut self) -> Result<StreamKey, Error>;

    /// Whether requests on this connection run on independent streams.
    ///
    /// `true` for HTTP/2, `false` for HTTP/1.1.
    fn is_multiplexed(&self) -> bool;

    /// Emit the request head.
    fn write_headers(
        &mut self,
        stream: StreamKey,
        head: &Request<()>,
        end_stream: bool,
    ) -> Result<(), Error>;

    /// Emit body data. An empty `data` with `end_stream = true` is the
    /// explicit end-of-stream marker for requests with neither body nor
    /// trailers.
    fn write_data(&mut self, stream: StreamKey, data: &[u8], end_stream: bool)
        -> Result<(), Error>;

    /// Emit trailers. Trailers always end the stream.
    fn write_trailers(&mut self, stream: StreamKey, trailers: &HeaderMap) -> Result<(), Error>;

    /// Flush buffered writes towards the peer.
    fn flush(&mut self);

    /// Close the request's send side without an end-of-stream marker.
    ///
    /// Used after a 417 rejection, where the peer has already answered the
    /// request and no body will follow. Frees the send half for the next
    /// request on HTTP/1.1.
    fn finish(&mut self, stream: StreamKey);

    /// Abort the stream with the protocol-appropriate cancellation:
    /// RST_STREAM with CANCEL on HTTP/2, connection close on HTTP/1.1.
    fn abort(&mut self, stream: StreamKey);
}
