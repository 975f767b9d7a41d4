use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use http::{HeaderMap, StatusCode};

use crate::body::AggregatedBody;
use crate::handler::{AggregatedHandler, HandlerState, RequestOptions};
use crate::Error;

use super::scenario::{post, H1Scenario};

fn with_timeout() -> RequestOptions {
    RequestOptions {
        defaults: HeaderMap::new(),
        timeout: Some(Duration::from_secs(5)),
    }
}

#[test]
fn timeout_fails_a_parked_request() {
    let s = H1Scenario::new();
    let probe = Rc::new(Cell::new(0));
    let body = AggregatedBody::new("foo\n").with_close_probe(probe.clone());
    let (h, response) = s.submit_aggregated_with(post(true), body, with_timeout());
    s.take_wire();
    assert_eq!(s.reactor.timer_count(), 1);

    assert!(s.reactor.fire_next_timer());
    assert_eq!(response.try_take().unwrap().unwrap_err(), Error::Timeout);
    assert_eq!(h.borrow().state(), HandlerState::Failed);
    assert!(s.session.borrow().is_closed());
    assert!(s.router.is_empty());
    assert_eq!(probe.get(), 1);
}

#[test]
fn completion_disarms_the_timer() {
    let s = H1Scenario::new();
    let (_h, response) =
        s.submit_aggregated_with(post(true), AggregatedBody::new("foo\n"), with_timeout());
    assert_eq!(s.reactor.timer_count(), 1);

    s.respond(b"HTTP/1.1 100 Continue\r\n\r\n");
    assert_eq!(s.reactor.timer_count(), 1);

    s.respond(b"HTTP/1.1 201 Created\r\ncontent-length: 0\r\n\r\n");
    assert_eq!(response.try_take().unwrap().unwrap(), StatusCode::CREATED);
    assert_eq!(s.reactor.timer_count(), 0);
}

#[test]
fn one_timer_spans_the_rejection_resend() {
    let s = H1Scenario::new();
    let (_h, response) =
        s.submit_aggregated_with(post(true), AggregatedBody::new("foo\n"), with_timeout());
    assert_eq!(s.reactor.timer_count(), 1);

    // The resend continues under the original deadline.
    s.respond(b"HTTP/1.1 417 Expectation Failed\r\ncontent-length: 0\r\n\r\n");
    assert_eq!(s.reactor.timer_count(), 1);

    s.respond(b"HTTP/1.1 201 Created\r\ncontent-length: 0\r\n\r\n");
    assert_eq!(response.try_take().unwrap().unwrap(), StatusCode::CREATED);
    assert_eq!(s.reactor.timer_count(), 0);
}

#[test]
fn submit_off_worker_trampolines() {
    let s = H1Scenario::new();
    s.reactor.set_in_reactor(false);

    let (_h, _r) = s.submit_aggregated(post(false), AggregatedBody::new("x"));
    assert_eq!(s.take_wire(), "");
    assert_eq!(s.reactor.pending_tasks(), 1);

    s.reactor.run_tasks();
    assert!(s.take_wire().ends_with("x"));
}

#[test]
fn cancel_off_worker_trampolines() {
    let s = H1Scenario::new();
    let probe = Rc::new(Cell::new(0));
    let body = AggregatedBody::new("foo\n").with_close_probe(probe.clone());
    let (h, response) = s.submit_aggregated(post(true), body);
    s.take_wire();

    s.reactor.set_in_reactor(false);
    AggregatedHandler::cancel(&h);
    assert!(!response.is_done());
    assert_eq!(s.reactor.pending_tasks(), 1);

    s.reactor.run_tasks();
    assert_eq!(response.try_take().unwrap().unwrap_err(), Error::Cancelled);
    assert_eq!(probe.get(), 1);
}

#[test]
fn responses_after_cancel_are_ignored() {
    let s = H1Scenario::new();
    let (h, response) = s.submit_aggregated(post(true), AggregatedBody::new("foo\n"));
    s.take_wire();

    AggregatedHandler::cancel(&h);
    assert_eq!(response.try_take().unwrap().unwrap_err(), Error::Cancelled);

    // The record is gone; a late grant must not resurrect the request.
    s.respond(b"HTTP/1.1 100 Continue\r\n\r\n");
    assert_eq!(s.take_wire(), "");
    assert!(response.try_take().is_none());
    assert_eq!(h.borrow().state(), HandlerState::Cancelled);
}
