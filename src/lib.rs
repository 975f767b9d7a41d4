//! Client-side `Expect: 100-continue` negotiation, transport agnostic.
//!
//! When a request advertises `expect: 100-continue`, the head goes on the
//! wire with end-of-stream unset and the body parks behind a write gate.
//! The response side releases the gate on any interim (1xx) response, or
//! rejects it on 417, in which case an aggregated request is replayed
//! without the expectation on a fresh stream of the same connection.
//!
//! ```text
//!        New
//!         |
//!         v
//!    HeadersSent
//!     |        |
//!     |        v
//!     |   AwaitingContinue --------+-----------+
//!     |        |                   |           |
//!     v        v (1xx)       (417) |   (other) |
//!    BodySent <---- resend --------+           |
//!         |                                    |
//!         v                                    v
//!     Completed / Cancelled / Failed       Completed
//! ```
//!
//! The crate is sans-transport: [`Session`] is the seam towards a concrete
//! connection, with an HTTP/1.1 byte-serializing binding in [`h1`] and a
//! frame-producing HTTP/2 binding in [`h2`]. All per-connection state is
//! confined to one worker; callers on other threads are trampolined onto it
//! through the [`Reactor`] seam.
//!
//! # Example
//!
//! ```
//! use std::cell::RefCell;
//! use std::rc::Rc;
//! use std::time::Duration;
//!
//! use expect_proto::h1::{Http1Session, ResponseReader};
//! use expect_proto::{
//!     AggregatedBody, AggregatedHandler, Reactor, RequestOptions, ResponseRouter,
//!     Task, TimerKey,
//! };
//!
//! // A reactor that runs everything inline, for a single-threaded caller.
//! struct Inline;
//!
//! impl Reactor for Inline {
//!     fn in_reactor(&self) -> bool {
//!         true
//!     }
//!     fn execute(&self, task: Task) {
//!         task()
//!     }
//!     fn schedule(&self, _delay: Duration, _task: Task) -> TimerKey {
//!         TimerKey(0)
//!     }
//!     fn cancel_timer(&self, _key: TimerKey) {}
//! }
//!
//! let session = Rc::new(RefCell::new(Http1Session::new()));
//! let router = Rc::new(ResponseRouter::new());
//!
//! let request = http::Request::post("http://example.test/upload")
//!     .header("expect", "100-continue")
//!     .body(())
//!     .unwrap();
//!
//! let handler = AggregatedHandler::new(
//!     session.clone(),
//!     router.clone(),
//!     Rc::new(Inline),
//!     request,
//!     AggregatedBody::new("hello"),
//!     RequestOptions::default(),
//! );
//! let response = handler.borrow().response();
//! AggregatedHandler::submit(&handler);
//!
//! // The head is on the wire; the body is parked behind the write gate.
//! let head = String::from_utf8(session.borrow_mut().take_wire()).unwrap();
//! assert!(head.contains("expect: 100-continue\r\n"));
//! assert!(!head.contains("hello"));
//!
//! // The peer grants the expectation, then answers.
//! let mut reader = ResponseReader::new();
//! reader.feed(b"HTTP/1.1 100 Continue\r\n\r\n", &router).unwrap();
//! assert_eq!(session.borrow().wire(), b"hello");
//!
//! reader
//!     .feed(b"HTTP/1.1 201 Created\r\ncontent-length: 0\r\n\r\n", &router)
//!     .unwrap();
//! assert_eq!(
//!     response.try_take().unwrap().unwrap(),
//!     http::StatusCode::CREATED
//! );
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::uninlined_format_args)]

#[macro_use]
extern crate log;

mod error;
pub use error::Error;

mod ext;

pub mod body;
pub mod decoder;
pub mod gate;
pub mod h1;
pub mod h2;
pub mod handler;
pub mod reactor;
pub mod session;

mod timeout;

pub use body::{AggregatedBody, ChunkSource, PollChunk};
pub use decoder::{ResponseObserver, ResponseRouter};
pub use gate::{GateState, WriteGate};
pub use handler::{
    AggregatedHandler, HandlerState, RequestOptions, ResponseHandle, StreamingHandler,
};
pub use reactor::{Reactor, Task, TimerKey};
pub use session::{Session, StreamKey};

#[cfg(test)]
mod test;
