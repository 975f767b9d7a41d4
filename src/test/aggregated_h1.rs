use std::cell::Cell;
use std::rc::Rc;

use http::{HeaderMap, HeaderValue, StatusCode};

use crate::body::AggregatedBody;
use crate::gate::GateState;
use crate::handler::{AggregatedHandler, HandlerState, RequestOptions};
use crate::Error;

use super::scenario::{post, H1Scenario};

fn probed_body(content: &str) -> (AggregatedBody, Rc<Cell<u32>>) {
    let probe = Rc::new(Cell::new(0));
    let body = AggregatedBody::new(content).with_close_probe(probe.clone());
    (body, probe)
}

#[test]
fn body_parks_until_continue() {
    let s = H1Scenario::new();
    let (body, probe) = probed_body("foo\n");
    let (h, response) = s.submit_aggregated(post(true), body);

    let head = s.take_wire();
    assert!(head.starts_with("POST /page HTTP/1.1\r\n"));
    assert!(head.ends_with("\r\n\r\n"));
    assert!(head.contains("expect: 100-continue\r\n"));
    assert!(head.contains("content-length: 4\r\n"));
    assert!(head.contains("host: f.test\r\n"));
    assert!(!head.contains("foo"));
    assert_eq!(h.borrow().state(), HandlerState::AwaitingContinue);
    assert_eq!(h.borrow().gate_state(), GateState::Held);

    s.respond(b"HTTP/1.1 100 Continue\r\n\r\n");
    assert_eq!(s.take_wire(), "foo\n");
    assert_eq!(h.borrow().state(), HandlerState::BodySent);
    assert!(!response.is_done());

    s.respond(b"HTTP/1.1 201 Created\r\ncontent-length: 0\r\n\r\n");
    assert_eq!(response.try_take().unwrap().unwrap(), StatusCode::CREATED);
    assert_eq!(h.borrow().state(), HandlerState::Completed);
    assert_eq!(probe.get(), 1);
    assert!(s.router.is_empty());
}

#[test]
fn rejection_resends_without_expectation() {
    let s = H1Scenario::new();
    let (body, probe) = probed_body("foo\n");
    let (h, response) = s.submit_aggregated(post(true), body);
    s.take_wire();

    s.respond(b"HTTP/1.1 417 Expectation Failed\r\ncontent-length: 0\r\n\r\n");
    assert_eq!(h.borrow().gate_state(), GateState::Rejected);
    assert!(!response.is_done());

    let resent = s.take_wire();
    assert!(resent.starts_with("POST /page HTTP/1.1\r\n"));
    assert!(!resent.contains("expect"));
    assert!(resent.ends_with("\r\n\r\nfoo\n"));
    assert_eq!(h.borrow().state(), HandlerState::BodySent);

    s.respond(b"HTTP/1.1 201 Created\r\ncontent-length: 0\r\n\r\n");
    assert_eq!(response.try_take().unwrap().unwrap(), StatusCode::CREATED);
    assert_eq!(probe.get(), 1);
    assert!(s.router.is_empty());
}

#[test]
fn empty_body_with_expectation_is_refused() {
    let s = H1Scenario::new();
    let probe = Rc::new(Cell::new(0));
    let body = AggregatedBody::empty().with_close_probe(probe.clone());
    let (h, response) = s.submit_aggregated(post(true), body);

    assert_eq!(s.take_wire(), "");
    assert_eq!(
        response.try_take().unwrap().unwrap_err(),
        Error::InvalidRequest(
            "empty content is not allowed with Expect: 100-continue header".into()
        )
    );
    assert_eq!(h.borrow().state(), HandlerState::Failed);
    assert_eq!(probe.get(), 1);
}

#[test]
fn final_without_continue_discards_body() {
    let s = H1Scenario::new();
    let (body, probe) = probed_body("foo\n");
    let (h, response) = s.submit_aggregated(post(true), body);
    s.take_wire();

    s.respond(b"HTTP/1.1 403 Forbidden\r\ncontent-length: 0\r\n\r\n");
    assert_eq!(response.try_take().unwrap().unwrap(), StatusCode::FORBIDDEN);
    assert_eq!(h.borrow().gate_state(), GateState::Released);

    // No body bytes went out; the half-written request poisons the
    // connection, which is torn down instead.
    assert_eq!(s.take_wire(), "");
    assert!(s.session.borrow().is_closed());
    assert_eq!(probe.get(), 1);
}

#[test]
fn any_interim_releases_the_gate() {
    let s = H1Scenario::new();
    let (body, _) = probed_body("foo\n");
    let (h, response) = s.submit_aggregated(post(true), body);
    s.take_wire();

    s.respond(b"HTTP/1.1 103 Early Hints\r\n\r\n");
    assert_eq!(s.take_wire(), "foo\n");
    assert_eq!(h.borrow().gate_state(), GateState::Released);

    s.respond(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\n\r\n");
    assert_eq!(response.try_take().unwrap().unwrap(), StatusCode::OK);
}

#[test]
fn repeated_interim_writes_the_body_once() {
    let s = H1Scenario::new();
    let (body, probe) = probed_body("foo\n");
    let (_h, response) = s.submit_aggregated(post(true), body);
    s.take_wire();

    s.respond(b"HTTP/1.1 102 Processing\r\n\r\n");
    s.respond(b"HTTP/1.1 100 Continue\r\n\r\n");
    assert_eq!(s.take_wire(), "foo\n");

    s.respond(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\n\r\n");
    assert_eq!(response.try_take().unwrap().unwrap(), StatusCode::OK);
    assert_eq!(probe.get(), 1);
}

#[test]
fn pending_negotiation_blocks_later_requests() {
    let s = H1Scenario::new();
    let (_a, ra) = s.submit_aggregated(post(true), AggregatedBody::new("foo\n"));
    let (_b, rb) = s.submit_aggregated(post(false), AggregatedBody::new("bar!"));

    // Only the first head may be on the wire while its gate is held.
    let head = s.take_wire();
    assert!(head.contains("expect: 100-continue\r\n"));
    assert!(!head.contains("bar"));

    s.respond(b"HTTP/1.1 100 Continue\r\n\r\n");
    let rest = s.take_wire();
    let first_body = rest.find("foo\n").unwrap();
    let second_head = rest.find("POST /page").unwrap();
    assert!(first_body < second_head);
    assert!(rest.ends_with("bar!"));

    s.respond(b"HTTP/1.1 201 Created\r\ncontent-length: 0\r\n\r\n");
    assert_eq!(ra.try_take().unwrap().unwrap(), StatusCode::CREATED);

    s.respond(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\n\r\n");
    assert_eq!(rb.try_take().unwrap().unwrap(), StatusCode::OK);
}

#[test]
fn cancel_while_awaiting_continue() {
    let s = H1Scenario::new();
    let (body, probe) = probed_body("foo\n");
    let (h, response) = s.submit_aggregated(post(true), body);
    s.take_wire();

    AggregatedHandler::cancel(&h);
    assert_eq!(h.borrow().state(), HandlerState::Cancelled);
    assert_eq!(response.try_take().unwrap().unwrap_err(), Error::Cancelled);
    assert_eq!(s.take_wire(), "");
    assert!(s.session.borrow().is_closed());
    assert!(s.router.is_empty());
    assert_eq!(probe.get(), 1);

    AggregatedHandler::cancel(&h);
    assert_eq!(probe.get(), 1);
}

#[test]
fn non_negotiated_request_writes_body_immediately() {
    let s = H1Scenario::new();
    let (h, response) = s.submit_aggregated(post(false), AggregatedBody::new("data"));

    let wire = s.take_wire();
    assert!(!wire.contains("expect"));
    assert!(wire.ends_with("\r\n\r\ndata"));
    assert_eq!(h.borrow().state(), HandlerState::BodySent);

    s.respond(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\n\r\n");
    assert_eq!(response.try_take().unwrap().unwrap(), StatusCode::OK);
}

#[test]
fn default_headers_merge_under_user_headers() {
    let s = H1Scenario::new();
    let mut defaults = HeaderMap::new();
    defaults.insert("user-agent", HeaderValue::from_static("t/1"));

    let options = RequestOptions {
        defaults,
        timeout: None,
    };
    let (_h, _r) = s.submit_aggregated_with(post(true), AggregatedBody::new("x"), options);

    let head = s.take_wire();
    assert!(head.contains("user-agent: t/1\r\n"));
}

#[test]
fn trailers_ride_the_chunked_terminator() {
    let s = H1Scenario::new();
    let mut trailers = HeaderMap::new();
    trailers.insert("x-check", HeaderValue::from_static("ok"));
    let body = AggregatedBody::new("foo\n").with_trailers(trailers);

    let (_h, response) = s.submit_aggregated(post(true), body);
    let head = s.take_wire();
    // Trailers force chunked framing; no content-length is synthesized.
    assert!(head.contains("transfer-encoding: chunked\r\n"));
    assert!(!head.contains("content-length"));

    s.respond(b"HTTP/1.1 100 Continue\r\n\r\n");
    assert_eq!(s.take_wire(), "4\r\nfoo\n\r\n0\r\nx-check: ok\r\n\r\n");

    s.respond(b"HTTP/1.1 201 Created\r\ncontent-length: 0\r\n\r\n");
    assert_eq!(response.try_take().unwrap().unwrap(), StatusCode::CREATED);
}
