use std::cell::RefCell;
use std::rc::{Rc, Weak};

use http::{HeaderMap, Request, StatusCode};

use crate::body::{ChunkSource, PollChunk};
use crate::decoder::{ResponseObserver, ResponseRouter};
use crate::ext::HeaderIterExt;
use crate::reactor::Reactor;
use crate::session::{Session, StreamKey};
use crate::Error;

use super::{merged_head, HandlerCore, HandlerState, RequestOptions, ResponseHandle};

/// Send-side handler for a request whose body is produced lazily.
///
/// The expectation header is forwarded to the peer unmodified, but this
/// handler never parks on the write gate: chunks flow to the transport as
/// the source produces them. The peer's 417, should one arrive before the
/// body finished, aborts the in-flight stream instead of triggering a
/// resend, because a chunk source cannot be restarted.
pub struct StreamingHandler {
    core: HandlerCore,
    head: Request<()>,
    source: Option<Box<dyn ChunkSource>>,
    defaults: HeaderMap,
    stashed: Option<Vec<u8>>,
    sent_end: bool,
    expects_continue: bool,
    self_ref: Weak<RefCell<StreamingHandler>>,
}

impl StreamingHandler {
    /// Create a handler for a dispatched request.
    pub fn new(
        session: Rc<RefCell<dyn Session>>,
        router: Rc<ResponseRouter>,
        reactor: Rc<dyn Reactor>,
        request: Request<()>,
        source: Box<dyn ChunkSource>,
        options: RequestOptions,
    ) -> Rc<RefCell<StreamingHandler>> {
        Rc::new_cyclic(|weak| {
            RefCell::new(StreamingHandler {
                core: HandlerCore::new(session, router, reactor, options.timeout),
                head: request,
                source: Some(source),
                defaults: options.defaults,
                stashed: None,
                sent_end: false,
                expects_continue: false,
                self_ref: weak.clone(),
            })
        })
    }

    /// Submit the request.
    ///
    /// Safe to call from any thread: when not on the owning worker, the
    /// submission is trampolined onto it and this returns immediately.
    pub fn submit(this: &Rc<RefCell<StreamingHandler>>) {
        let reactor = this.borrow().core.reactor.clone();
        if reactor.in_reactor() {
            this.borrow_mut().submit_now();
        } else {
            let this = this.clone();
            reactor.execute(Box::new(move || this.borrow_mut().submit_now()));
        }
    }

    /// Signal that the source has more chunks after it returned
    /// [`PollChunk::Pending`]. Trampolined like [`submit`][Self::submit].
    pub fn chunks_available(this: &Rc<RefCell<StreamingHandler>>) {
        let reactor = this.borrow().core.reactor.clone();
        if reactor.in_reactor() {
            this.borrow_mut().pump_now();
        } else {
            let this = this.clone();
            reactor.execute(Box::new(move || this.borrow_mut().pump_now()));
        }
    }

    /// Cancel the request. Idempotent; trampolined like [`submit`][Self::submit].
    pub fn cancel(this: &Rc<RefCell<StreamingHandler>>) {
        let reactor = this.borrow().core.reactor.clone();
        if reactor.in_reactor() {
            this.borrow_mut().cancel_now();
        } else {
            let this = this.clone();
            reactor.execute(Box::new(move || this.borrow_mut().cancel_now()));
        }
    }

    /// The caller-visible completion for this request.
    pub fn response(&self) -> ResponseHandle {
        self.core.response.clone()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> HandlerState {
        self.core.state
    }

    /// The stream this request currently occupies, once initialized.
    pub fn stream(&self) -> Option<StreamKey> {
        self.core.stream
    }

    fn submit_now(&mut self) {
        if self.core.state.is_terminal() {
            return;
        }

        let head = match self.effective_head() {
            Ok(v) => v,
            Err(e) => {
                self.close_source();
                self.core.fail(e);
                return;
            }
        };

        self.expects_continue = head.headers().iter().has_expect_100();

        if self.expects_continue {
            // Probe the source once: an already ended, chunk-less source
            // is an empty body, which the expectation disallows. Trailers
            // do not rescue it.
            match self.poll_source() {
                PollChunk::End(_) => {
                    self.close_source();
                    self.core.fail(Error::InvalidRequest(
                        "empty content is not allowed with Expect: 100-continue header".into(),
                    ));
                    return;
                }
                PollChunk::Chunk(c) => self.stashed = Some(c),
                PollChunk::Pending => {}
            }
        }

        let opened = self.core.session.borrow_mut().open_stream();
        let stream = match opened {
            Ok(v) => v,
            Err(e) => {
                self.close_source();
                self.core.fail(e);
                return;
            }
        };
        self.core.stream = Some(stream);

        let observer: Weak<RefCell<dyn ResponseObserver>> = self.self_ref.clone();
        self.core.router.register(stream, observer);

        if let Some(delay) = self.core.timeout_delay {
            let weak = self.self_ref.clone();
            self.core.timeout.arm(
                delay,
                Box::new(move || {
                    if let Some(h) = weak.upgrade() {
                        h.borrow_mut().on_timeout();
                    }
                }),
            );
        }

        let wrote = self
            .core
            .session
            .borrow_mut()
            .write_headers(stream, &head, false);
        if let Err(e) = wrote {
            self.close_source();
            self.core.deregister();
            self.core.fail(e);
            return;
        }
        self.core.transition(HandlerState::HeadersSent);

        if self.core.cancelled {
            self.close_source();
            self.core.deregister();
            return;
        }

        self.pump();
        if !self.core.state.is_terminal() {
            self.core.session.borrow_mut().flush();
        }
    }

    fn effective_head(&self) -> Result<Request<()>, Error> {
        let multiplexed = self.core.session.borrow().is_multiplexed();
        merged_head(&self.head, &self.defaults, !multiplexed)
    }

    fn pump_now(&mut self) {
        if self.core.state.is_terminal() || self.sent_end || self.core.stream.is_none() {
            return;
        }
        self.pump();
        if !self.core.state.is_terminal() {
            self.core.session.borrow_mut().flush();
        }
    }

    /// Drain the source into the transport until it reports end or pending.
    fn pump(&mut self) {
        let Some(stream) = self.core.stream else {
            return;
        };
        if self.sent_end {
            return;
        }

        loop {
            let next = match self.stashed.take() {
                Some(c) if c.is_empty() => continue,
                Some(c) => PollChunk::Chunk(c),
                None => self.poll_source(),
            };

            match next {
                PollChunk::Chunk(c) => {
                    if c.is_empty() {
                        continue;
                    }
                    let wrote = self.core.session.borrow_mut().write_data(stream, &c, false);
                    if let Err(e) = wrote {
                        self.fail_transport(e);
                        return;
                    }
                }
                PollChunk::End(trailers) => {
                    let result = if trailers.is_empty() {
                        self.core.session.borrow_mut().write_data(stream, &[], true)
                    } else {
                        self.core.session.borrow_mut().write_trailers(stream, &trailers)
                    };
                    if let Err(e) = result {
                        self.fail_transport(e);
                        return;
                    }
                    self.sent_end = true;
                    self.core.transition(HandlerState::BodySent);
                    return;
                }
                PollChunk::Pending => return,
            }
        }
    }

    fn poll_source(&mut self) -> PollChunk {
        match self.source.as_mut() {
            Some(source) => source.poll_chunk(),
            None => PollChunk::End(HeaderMap::new()),
        }
    }

    fn fail_transport(&mut self, error: Error) {
        self.close_source();
        self.core.deregister();
        self.core.abort_stream();
        self.core.fail(error);
    }

    fn cancel_now(&mut self) {
        if self.core.cancelled {
            return;
        }
        self.core.cancelled = true;

        if self.core.state.is_terminal() {
            return;
        }

        debug!("cancelling streaming request in {:?}", self.core.state);
        self.close_source();
        self.core.deregister();
        self.core.abort_stream();
        self.core.fail(Error::Cancelled);
    }

    fn on_timeout(&mut self) {
        if self.core.state.is_terminal() {
            return;
        }

        debug!("streaming request timeout fired in {:?}", self.core.state);
        self.close_source();
        self.core.deregister();
        self.core.abort_stream();
        self.core.fail(Error::Timeout);
    }

    fn close_source(&mut self) {
        if let Some(source) = self.source.as_mut() {
            source.close();
        }
    }
}

impl ResponseObserver for StreamingHandler {
    fn on_interim(&mut self, status: StatusCode) {
        // Writes were never gated; interim responses are informational only.
        debug!("interim {} on a streaming request, ignored", status);
    }

    fn on_final(&mut self, status: StatusCode) {
        if self.core.state.is_terminal() {
            return;
        }

        if status == StatusCode::EXPECTATION_FAILED && self.expects_continue && !self.sent_end {
            // The body is already partially on the wire and the source is
            // not restartable, so a resend is impossible. Abort the stream.
            debug!("expectation rejected mid-stream, aborting");
            self.close_source();
            self.core.abort_stream();
            let multiplexed = self.core.session.borrow().is_multiplexed();
            if multiplexed {
                // The reset is scoped to this stream; the 417 stands as
                // the final response.
                self.core.complete(status);
            } else {
                // Aborting tears down the whole connection mid-request.
                self.core.fail(Error::AbortedStream);
            }
            return;
        }

        self.close_source();
        if !self.sent_end {
            // Final response before the body finished; stop producing.
            debug!("final {} before the request body completed", status);
            self.core.abort_stream();
        }
        self.core.complete(status);
    }
}
