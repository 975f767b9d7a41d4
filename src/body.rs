use http::HeaderMap;

/// A fully materialized request body with optional trailers.
///
/// Owned by an aggregated request handler. The handler consumes the
/// content at most once and calls [`close()`][AggregatedBody::close]
/// exactly once on any terminal transition. The content is retained until
/// the write gate leaves `Held`, because a 417 rejection replays the same
/// body on a fresh stream.
pub struct AggregatedBody {
    content: Vec<u8>,
    trailers: HeaderMap,
    closed: bool,
    #[cfg(test)]
    close_probe: Option<std::rc::Rc<std::cell::Cell<u32>>>,
}

impl AggregatedBody {
    /// A body with the given content and no trailers.
    pub fn new(content: impl Into<Vec<u8>>) -> Self {
        AggregatedBody {
            content: content.into(),
            trailers: HeaderMap::new(),
            closed: false,
            #[cfg(test)]
            close_probe: None,
        }
    }

    /// An empty body.
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Attach trailers to emit after the last body chunk.
    pub fn with_trailers(mut self, trailers: HeaderMap) -> Self {
        self.trailers = trailers;
        self
    }

    /// Tell if the content is empty.
    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    /// The body content.
    pub fn content(&self) -> &[u8] {
        &self.content
    }

    /// Trailers to emit after the content. May be empty.
    pub fn trailers(&self) -> &HeaderMap {
        &self.trailers
    }

    /// Release the body. Idempotent.
    pub fn close(&mut self) {
        #[cfg(test)]
        if let Some(probe) = &self.close_probe {
            probe.set(probe.get() + 1);
        }
        if !self.closed {
            self.closed = true;
            self.content = Vec::new();
        }
    }

    /// Tell if the body has been released.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    #[cfg(test)]
    pub(crate) fn with_close_probe(
        mut self,
        probe: std::rc::Rc<std::cell::Cell<u32>>,
    ) -> Self {
        self.close_probe = Some(probe);
        self
    }
}

/// One poll of a streaming request body.
pub enum PollChunk {
    /// A chunk of body data.
    Chunk(Vec<u8>),

    /// The body is finished. Trailers, when non-empty, are emitted after
    /// the last chunk.
    End(HeaderMap),

    /// No chunk available yet. The producer signals the handler via
    /// `StreamingHandler::chunks_available` when more data arrives.
    Pending,
}

/// A lazily produced, finite, non-restartable request body.
///
/// The owning handler polls chunks as the transport can accept them and
/// calls [`close()`][ChunkSource::close] exactly once on any terminal
/// transition.
pub trait ChunkSource {
    /// Poll the next chunk.
    fn poll_chunk(&mut self) -> PollChunk;

    /// Release the source. Idempotent.
    fn close(&mut self);
}
