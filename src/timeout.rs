use std::rc::Rc;
use std::time::Duration;

use crate::reactor::{Reactor, Task, TimerKey};

/// A single one-shot timer per request.
///
/// Armed when the request is submitted, disarmed when the response
/// completes. Firing aborts the in-flight request via the task supplied at
/// arm time.
pub(crate) struct TimeoutCoordinator {
    reactor: Rc<dyn Reactor>,
    key: Option<TimerKey>,
}

impl TimeoutCoordinator {
    pub fn new(reactor: Rc<dyn Reactor>) -> Self {
        TimeoutCoordinator { reactor, key: None }
    }

    /// Arm the timer. A request has exactly one timer; re-arming (such as
    /// across a rejection resend) is a no-op.
    pub fn arm(&mut self, delay: Duration, task: Task) {
        if self.key.is_some() {
            return;
        }
        let key = self.reactor.schedule(delay, task);
        debug!("armed request timeout {:?} ({:?})", key, delay);
        self.key = Some(key);
    }

    /// Disarm the timer. Idempotent; no-op when never armed.
    pub fn disarm(&mut self) {
        if let Some(key) = self.key.take() {
            debug!("disarmed request timeout {:?}", key);
            self.reactor.cancel_timer(key);
        }
    }
}
