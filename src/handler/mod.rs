//! Send-side request handlers.
//!
//! A handler is created when a request is dispatched to a connection and
//! owns the request body and the write gate for that request. The response
//! decoder holds a back-reference to it through the
//! [`ResponseRouter`][crate::decoder::ResponseRouter].

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use http::uri::Scheme;
use http::{header, HeaderMap, HeaderValue, Request, StatusCode};

use crate::decoder::ResponseRouter;
use crate::gate::WriteGate;
use crate::reactor::Reactor;
use crate::session::{Session, StreamKey};
use crate::timeout::TimeoutCoordinator;
use crate::Error;

mod aggregated;
mod streaming;

pub use aggregated::AggregatedHandler;
pub use streaming::StreamingHandler;

/// Lifecycle state of a request handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerState {
    /// Created, nothing written.
    New,

    /// The request head is on the wire (end-of-stream not set).
    HeadersSent,

    /// Parked on the write gate, waiting for the response side. Entered
    /// only when the expectation predicate returned true and the body is
    /// non-empty.
    AwaitingContinue,

    /// The body (and trailers, if any) have been written.
    BodySent,

    /// The response completed normally.
    Completed,

    /// The caller cancelled before completion.
    Cancelled,

    /// A terminal error occurred.
    Failed,
}

impl HandlerState {
    /// Tell if no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            HandlerState::Completed | HandlerState::Cancelled | HandlerState::Failed
        )
    }
}

/// Per-request submission options.
#[derive(Debug, Default, Clone)]
pub struct RequestOptions {
    /// Default headers merged into the request head. User headers win.
    pub defaults: HeaderMap,

    /// Response deadline. The timer arms at submit and disarms when the
    /// response completes; firing fails the request with
    /// [`Error::Timeout`].
    pub timeout: Option<Duration>,
}

/// Caller-visible completion of a request.
///
/// Resolves exactly once, with the final response status or a single
/// terminal error. Interim responses are invisible to the caller.
#[derive(Clone, Default)]
pub struct ResponseHandle {
    cell: Rc<RefCell<Option<Result<StatusCode, Error>>>>,
}

impl ResponseHandle {
    /// Take the completion, if resolved.
    pub fn try_take(&self) -> Option<Result<StatusCode, Error>> {
        self.cell.borrow_mut().take()
    }

    /// Tell if the request has completed.
    pub fn is_done(&self) -> bool {
        self.cell.borrow().is_some()
    }

    fn complete(&self, result: Result<StatusCode, Error>) {
        let mut cell = self.cell.borrow_mut();
        if cell.is_some() {
            debug!("request already completed, dropping {:?}", result);
            return;
        }
        *cell = Some(result);
    }
}

impl fmt::Debug for ResponseHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResponseHandle<done={}>", self.is_done())
    }
}

/// State shared between the aggregated and streaming handlers.
pub(crate) struct HandlerCore {
    pub session: Rc<RefCell<dyn Session>>,
    pub router: Rc<ResponseRouter>,
    pub reactor: Rc<dyn Reactor>,
    pub stream: Option<StreamKey>,
    pub state: HandlerState,
    pub gate: WriteGate,
    pub timeout: TimeoutCoordinator,
    pub timeout_delay: Option<Duration>,
    pub response: ResponseHandle,
    pub cancelled: bool,
}

impl HandlerCore {
    pub fn new(
        session: Rc<RefCell<dyn Session>>,
        router: Rc<ResponseRouter>,
        reactor: Rc<dyn Reactor>,
        timeout_delay: Option<Duration>,
    ) -> Self {
        HandlerCore {
            session,
            router,
            reactor: reactor.clone(),
            stream: None,
            state: HandlerState::New,
            gate: WriteGate::released(),
            timeout: TimeoutCoordinator::new(reactor),
            timeout_delay,
            response: ResponseHandle::default(),
            cancelled: false,
        }
    }

    pub fn transition(&mut self, next: HandlerState) {
        debug!("handler {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    pub fn deregister(&self) {
        if let Some(stream) = self.stream {
            self.router.deregister(stream);
        }
    }

    pub fn abort_stream(&self) {
        if let Some(stream) = self.stream {
            self.session.borrow_mut().abort(stream);
        }
    }

    /// Terminate with the final response status.
    pub fn complete(&mut self, status: StatusCode) {
        self.timeout.disarm();
        self.transition(HandlerState::Completed);
        self.response.complete(Ok(status));
    }

    /// Terminate with an error.
    pub fn fail(&mut self, error: Error) {
        self.timeout.disarm();
        let next = if error == Error::Cancelled {
            HandlerState::Cancelled
        } else {
            HandlerState::Failed
        };
        self.transition(next);
        self.response.complete(Err(error));
    }
}

/// Compute the effective request head: defaults merged under user headers,
/// plus a synthesized `host` header on non-multiplexed transports.
pub(crate) fn merged_head(
    head: &Request<()>,
    defaults: &HeaderMap,
    add_host: bool,
) -> Result<Request<()>, Error> {
    let mut headers = head.headers().clone();

    for (name, value) in defaults {
        if !headers.contains_key(name) {
            headers.append(name.clone(), value.clone());
        }
    }

    if add_host && !headers.contains_key(header::HOST) {
        if let Some(host) = head.uri().host() {
            headers.insert(header::HOST, host_value(host, head.uri())?);
        }
    }

    let mut merged = Request::new(());
    *merged.method_mut() = head.method().clone();
    *merged.uri_mut() = head.uri().clone();
    *merged.version_mut() = head.version();
    *merged.headers_mut() = headers;

    Ok(merged)
}

fn host_value(host: &str, uri: &http::Uri) -> Result<HeaderValue, Error> {
    fn from_str(src: &str) -> Result<HeaderValue, Error> {
        HeaderValue::from_str(src).map_err(|e| Error::InvalidRequest(e.to_string()))
    }

    if let Some(port) = uri.port_u16() {
        let scheme = uri.scheme().unwrap_or(&Scheme::HTTP);
        let default = if *scheme == Scheme::HTTPS { 443 } else { 80 };
        if port != default {
            // This allocates, so we only do it if we absolutely have to.
            return from_str(&format!("{}:{}", host, port));
        }
    }

    from_str(host)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_do_not_override_user_headers() {
        let req = Request::post("http://f.test/page")
            .header("user-agent", "mine/1.0")
            .body(())
            .unwrap();

        let mut defaults = HeaderMap::new();
        defaults.insert("user-agent", HeaderValue::from_static("default/0.1"));
        defaults.insert("accept", HeaderValue::from_static("*/*"));

        let merged = merged_head(&req, &defaults, false).unwrap();
        assert_eq!(merged.headers().get("user-agent").unwrap(), "mine/1.0");
        assert_eq!(merged.headers().get("accept").unwrap(), "*/*");
    }

    #[test]
    fn host_from_uri() {
        let req = Request::post("http://f.test/page").body(()).unwrap();
        let merged = merged_head(&req, &HeaderMap::new(), true).unwrap();
        assert_eq!(merged.headers().get("host").unwrap(), "f.test");
    }

    #[test]
    fn host_with_non_default_port() {
        let req = Request::post("http://f.test:8080/page").body(()).unwrap();
        let merged = merged_head(&req, &HeaderMap::new(), true).unwrap();
        assert_eq!(merged.headers().get("host").unwrap(), "f.test:8080");
    }

    #[test]
    fn host_with_default_port() {
        let req = Request::post("http://f.test:80/page").body(()).unwrap();
        let merged = merged_head(&req, &HeaderMap::new(), true).unwrap();
        assert_eq!(merged.headers().get("host").unwrap(), "f.test");
    }

    #[test]
    fn no_host_on_multiplexed() {
        let req = Request::post("http://f.test/page").body(()).unwrap();
        let merged = merged_head(&req, &HeaderMap::new(), false).unwrap();
        assert!(merged.headers().get("host").is_none());
    }
}
