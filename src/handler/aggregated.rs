use std::cell::RefCell;
use std::rc::{Rc, Weak};

use http::{header, HeaderMap, HeaderValue, Request, StatusCode};

use crate::body::AggregatedBody;
use crate::decoder::{ResponseObserver, ResponseRouter};
use crate::ext::HeaderIterExt;
use crate::gate::{GateState, WriteGate};
use crate::reactor::Reactor;
use crate::session::{Session, StreamKey};
use crate::Error;

use super::{merged_head, HandlerCore, HandlerState, RequestOptions, ResponseHandle};

/// Send-side handler for a request whose body is fully known before
/// transmission.
///
/// When the merged headers carry `expect: 100-continue` and the body is
/// non-empty, the handler emits the head with end-of-stream unset and parks
/// on its write gate. The response side releases the gate on an interim
/// response, or rejects it on 417, in which case the same request is
/// replayed without the expectation header on a fresh stream of the same
/// connection.
///
/// The body is retained until the gate leaves `Held`, precisely so that a
/// rejection can resend it.
pub struct AggregatedHandler {
    core: HandlerCore,
    head: Request<()>,
    body: Option<AggregatedBody>,
    defaults: HeaderMap,
    expect_removed: bool,
    self_ref: Weak<RefCell<AggregatedHandler>>,
}

impl AggregatedHandler {
    /// Create a handler for a dispatched request.
    pub fn new(
        session: Rc<RefCell<dyn Session>>,
        router: Rc<ResponseRouter>,
        reactor: Rc<dyn Reactor>,
        request: Request<()>,
        body: AggregatedBody,
        options: RequestOptions,
    ) -> Rc<RefCell<AggregatedHandler>> {
        Rc::new_cyclic(|weak| {
            RefCell::new(AggregatedHandler {
                core: HandlerCore::new(session, router, reactor, options.timeout),
                head: request,
                body: Some(body),
                defaults: options.defaults,
                expect_removed: false,
                self_ref: weak.clone(),
            })
        })
    }

    /// Submit the request.
    ///
    /// Safe to call from any thread: when not on the owning worker, the
    /// submission is trampolined onto it and this returns immediately.
    pub fn submit(this: &Rc<RefCell<AggregatedHandler>>) {
        let reactor = this.borrow().core.reactor.clone();
        if reactor.in_reactor() {
            this.borrow_mut().submit_now();
        } else {
            let this = this.clone();
            reactor.execute(Box::new(move || this.borrow_mut().submit_now()));
        }
    }

    /// Cancel the request. Idempotent; trampolined like [`submit`][Self::submit].
    pub fn cancel(this: &Rc<RefCell<AggregatedHandler>>) {
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

    /// Current write gate state.
    pub fn gate_state(&self) -> GateState {
        self.core.gate.state()
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
                self.close_body();
                self.core.fail(e);
                return;
            }
        };

        let negotiate = head.headers().iter().has_expect_100();
        let body_empty = self.body.as_ref().map(|b| b.is_empty()).unwrap_or(true);

        if negotiate && body_empty {
            self.close_body();
            self.core.fail(Error::InvalidRequest(
                "empty content is not allowed with Expect: 100-continue header".into(),
            ));
            return;
        }

        let opened = self.core.session.borrow_mut().open_stream();
        let stream = match opened {
            Ok(v) => v,
            Err(e) => {
                self.close_body();
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
            // Synchronous header failure, e.g. the header list exceeds the
            // transport limit. No body is emitted.
            self.close_body();
            self.core.deregister();
            self.core.fail(e);
            return;
        }
        self.core.transition(HandlerState::HeadersSent);

        if self.core.cancelled {
            // Cancelled during initialization. Emit no body frames.
            self.close_body();
            self.core.deregister();
            return;
        }

        if negotiate {
            self.core.gate = WriteGate::held();
            self.core.transition(HandlerState::AwaitingContinue);
        } else if let Err(e) = self.write_body_and_trailers() {
            self.close_body();
            self.core.deregister();
            self.core.abort_stream();
            self.core.fail(e);
            return;
        }

        self.core.session.borrow_mut().flush();
    }

    /// The head as it goes on the wire: defaults merged, `host` synthesized
    /// on HTTP/1.1, `content-length` synthesized when the framing is
    /// unambiguous, and the expectation stripped after a rejection.
    fn effective_head(&self) -> Result<Request<()>, Error> {
        let multiplexed = self.core.session.borrow().is_multiplexed();
        let mut head = merged_head(&self.head, &self.defaults, !multiplexed)?;

        if self.expect_removed {
            head.headers_mut().remove(header::EXPECT);
        }

        if let Some(body) = self.body.as_ref() {
            // Trailers force chunked framing on HTTP/1.1, so only a
            // trailer-less body gets a synthesized content-length.
            let headers = head.headers_mut();
            if body.trailers().is_empty()
                && !headers.contains_key(header::CONTENT_LENGTH)
                && !headers.contains_key(header::TRANSFER_ENCODING)
            {
                let len = HeaderValue::from(body.content().len() as u64);
                headers.insert(header::CONTENT_LENGTH, len);
            }
        }

        Ok(head)
    }

    /// Emit body and trailers. The last frame carries end-of-stream; a
    /// request with neither body nor trailers emits an explicit empty
    /// end-of-stream marker.
    fn write_body_and_trailers(&mut self) -> Result<(), Error> {
        let Some(stream) = self.core.stream else {
            return Ok(());
        };
        let Some(body) = self.body.as_ref() else {
            return Ok(());
        };

        let content_empty = body.is_empty();
        let trailers_empty = body.trailers().is_empty();

        {
            let mut session = self.core.session.borrow_mut();
            if !content_empty {
                session.write_data(stream, body.content(), trailers_empty)?;
            }
            if !trailers_empty {
                session.write_trailers(stream, body.trailers())?;
            }
            if content_empty && trailers_empty {
                session.write_data(stream, &[], true)?;
            }
        }

        self.core.transition(HandlerState::BodySent);
        Ok(())
    }

    /// Replay the request without the expectation header on a fresh stream
    /// of the same connection. Failure to initiate the resend surfaces the
    /// 417 to the caller as the final response.
    fn resend(&mut self) {
        self.expect_removed = true;

        // The rejected attempt is answered; close its send side cleanly.
        if let Some(stream) = self.core.stream {
            self.core.session.borrow_mut().finish(stream);
        }

        let head = match self.effective_head() {
            Ok(v) => v,
            Err(_) => {
                self.close_body();
                self.core.complete(StatusCode::EXPECTATION_FAILED);
                return;
            }
        };

        let opened = self.core.session.borrow_mut().open_stream();
        let stream = match opened {
            Ok(v) => v,
            Err(e) => {
                debug!("resend after 417 failed: {}", e);
                self.close_body();
                self.core.complete(StatusCode::EXPECTATION_FAILED);
                return;
            }
        };
        self.core.stream = Some(stream);

        let observer: Weak<RefCell<dyn ResponseObserver>> = self.self_ref.clone();
        self.core.router.register(stream, observer);

        self.core.transition(HandlerState::New);

        let wrote = self
            .core
            .session
            .borrow_mut()
            .write_headers(stream, &head, false);
        if let Err(e) = wrote {
            self.close_body();
            self.core.deregister();
            self.core.fail(e);
            return;
        }
        self.core.transition(HandlerState::HeadersSent);

        if let Err(e) = self.write_body_and_trailers() {
            self.close_body();
            self.core.deregister();
            self.core.abort_stream();
            self.core.fail(e);
            return;
        }

        self.core.session.borrow_mut().flush();
    }

    fn cancel_now(&mut self) {
        if self.core.cancelled {
            return;
        }
        self.core.cancelled = true;

        if self.core.state.is_terminal() {
            return;
        }

        debug!("cancelling request in {:?}", self.core.state);
        self.close_body();
        self.core.deregister();
        self.core.abort_stream();
        self.core.fail(Error::Cancelled);
    }

    fn on_timeout(&mut self) {
        if self.core.state.is_terminal() {
            return;
        }

        debug!("request timeout fired in {:?}", self.core.state);
        self.close_body();
        self.core.deregister();
        self.core.abort_stream();
        self.core.fail(Error::Timeout);
    }

    fn close_body(&mut self) {
        if let Some(body) = self.body.as_mut() {
            body.close();
        }
    }
}

impl ResponseObserver for AggregatedHandler {
    fn on_interim(&mut self, status: StatusCode) {
        if self.core.state != HandlerState::AwaitingContinue {
            debug!("interim {} outside negotiation, ignored", status);
            return;
        }

        if !self.core.gate.release() {
            // A later 1xx on an already released gate.
            return;
        }
        debug!("write gate released by {}", status);

        if self.core.cancelled {
            return;
        }

        match self.write_body_and_trailers() {
            Ok(()) => self.core.session.borrow_mut().flush(),
            Err(e) => {
                self.close_body();
                self.core.deregister();
                self.core.abort_stream();
                self.core.fail(e);
            }
        }
    }

    fn on_final(&mut self, status: StatusCode) {
        if self.core.state.is_terminal() {
            return;
        }

        if self.core.state == HandlerState::AwaitingContinue {
            if status == StatusCode::EXPECTATION_FAILED {
                self.core.gate.reject();
                debug!("expectation rejected, resending without expect header");
                self.resend();
                return;
            }

            // The peer decided without sending 100. Release the gate for
            // cleanup, but discard the body instead of sending it. The
            // advertised request framing was never completed, so the
            // stream cannot be finished normally.
            self.core.gate.release();
            debug!("final {} while gate held, discarding request body", status);
            self.close_body();
            self.core.abort_stream();
            self.core.complete(status);
            return;
        }

        self.close_body();
        self.core.complete(status);
    }
}
