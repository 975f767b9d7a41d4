use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Weak;

use http::StatusCode;

use crate::session::StreamKey;

/// Callbacks invoked by the response decoder on a send-side handler.
///
/// The decoder holds a non-owning reference to the handler; it invokes,
/// never owns. Both callbacks run on the connection's owning worker.
pub trait ResponseObserver {
    /// An interim (1xx) response arrived for this request. Does not
    /// terminate the request.
    fn on_interim(&mut self, status: StatusCode);

    /// The final (>= 200) response head arrived for this request.
    fn on_final(&mut self, status: StatusCode);
}

/// Decoder-side table linking response streams back to send-side handlers.
///
/// One record per in-flight request, keyed by [`StreamKey`]. Records are
/// inserted and removed on the owning worker only; no external
/// synchronization is needed.
pub struct ResponseRouter {
    records: RefCell<HashMap<u32, Weak<RefCell<dyn ResponseObserver>>>>,
}

impl ResponseRouter {
    /// Create an empty router.
    pub fn new() -> Self {
        ResponseRouter {
            records: RefCell::new(HashMap::new()),
        }
    }

    /// Register a handler for responses on `stream`.
    pub fn register(&self, stream: StreamKey, handler: Weak<RefCell<dyn ResponseObserver>>) {
        trace!("register response record for {:?}", stream);
        self.records.borrow_mut().insert(stream.0, handler);
    }

    /// Remove the record for `stream`, if any. Idempotent.
    pub fn deregister(&self, stream: StreamKey) {
        trace!("deregister response record for {:?}", stream);
        self.records.borrow_mut().remove(&stream.0);
    }

    /// Number of outstanding records.
    pub fn len(&self) -> usize {
        self.records.borrow().len()
    }

    /// Tell if no records are outstanding.
    pub fn is_empty(&self) -> bool {
        self.records.borrow().is_empty()
    }

    /// Route a decoded response head to the owning handler.
    ///
    /// A 1xx status other than 101 is an interim response: the handler is
    /// signalled and the record stays until the final response. Any other
    /// status (including 101 and 417) removes the record before the handler
    /// is invoked, so a late 1xx arriving after the final response finds no
    /// record and is a no-op.
    pub fn on_response(&self, stream: StreamKey, status: StatusCode) {
        let interim =
            status.is_informational() && status != StatusCode::SWITCHING_PROTOCOLS;

        // Drop the map borrow before invoking the handler. The handler may
        // re-enter the router (deregister, or register a resend stream).
        let record = {
            let mut records = self.records.borrow_mut();
            if interim {
                records.get(&stream.0).cloned()
            } else {
                records.remove(&stream.0)
            }
        };

        let Some(handler) = record.and_then(|w| w.upgrade()) else {
            debug!("response {} on {:?} without a live record", status, stream);
            return;
        };

        if interim {
            handler.borrow_mut().on_interim(status);
        } else {
            handler.borrow_mut().on_final(status);
        }
    }
}

impl Default for ResponseRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default)]
    struct Probe {
        interim: Vec<StatusCode>,
        finals: Vec<StatusCode>,
    }

    impl ResponseObserver for Probe {
        fn on_interim(&mut self, status: StatusCode) {
            self.interim.push(status);
        }
        fn on_final(&mut self, status: StatusCode) {
            self.finals.push(status);
        }
    }

    fn probe() -> Rc<RefCell<Probe>> {
        Rc::new(RefCell::new(Probe::default()))
    }

    #[test]
    fn interim_keeps_record_final_removes() {
        let router = ResponseRouter::new();
        let p = probe();
        let rc: Rc<RefCell<dyn ResponseObserver>> = p.clone();
        router.register(StreamKey(1), Rc::downgrade(&rc));

        router.on_response(StreamKey(1), StatusCode::CONTINUE);
        assert_eq!(router.len(), 1);

        router.on_response(StreamKey(1), StatusCode::CREATED);
        assert!(router.is_empty());

        assert_eq!(p.borrow().interim, vec![StatusCode::CONTINUE]);
        assert_eq!(p.borrow().finals, vec![StatusCode::CREATED]);
    }

    #[test]
    fn late_interim_after_final_is_noop() {
        let router = ResponseRouter::new();
        let p = probe();
        let rc: Rc<RefCell<dyn ResponseObserver>> = p.clone();
        router.register(StreamKey(1), Rc::downgrade(&rc));

        router.on_response(StreamKey(1), StatusCode::OK);
        router.on_response(StreamKey(1), StatusCode::CONTINUE);

        assert!(p.borrow().interim.is_empty());
        assert_eq!(p.borrow().finals, vec![StatusCode::OK]);
    }

    #[test]
    fn switching_protocols_is_final() {
        let router = ResponseRouter::new();
        let p = probe();
        let rc: Rc<RefCell<dyn ResponseObserver>> = p.clone();
        router.register(StreamKey(1), Rc::downgrade(&rc));

        router.on_response(StreamKey(1), StatusCode::SWITCHING_PROTOCOLS);

        assert!(router.is_empty());
        assert_eq!(p.borrow().finals, vec![StatusCode::SWITCHING_PROTOCOLS]);
    }

    #[test]
    fn dropped_handler_is_ignored() {
        let router = ResponseRouter::new();
        let weak = {
            let p: Rc<RefCell<dyn ResponseObserver>> = probe();
            Rc::downgrade(&p)
        };
        router.register(StreamKey(7), weak);

        // Must not panic.
        router.on_response(StreamKey(7), StatusCode::OK);
        assert!(router.is_empty());
    }
}
