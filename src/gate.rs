use std::fmt;

/// State of the per-request write gate.
///
/// The gate is single-shot: once it leaves `Held` it never transitions
/// again for the same request instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    /// The body is withheld, awaiting a signal from the response side.
    Held,

    /// The peer authorized (or implicitly allowed) body transmission.
    Released,

    /// The peer rejected the expectation with 417.
    Rejected,
}

/// A single-shot signal controlling whether the request body may be
/// emitted.
///
/// Owned by a request handler; the response side signals it through the
/// handler's callbacks. Transitions are monotonic: `Held -> Released` or
/// `Held -> Rejected`, at most once.
pub struct WriteGate {
    state: GateState,
}

impl WriteGate {
    /// A gate that starts out holding the body back.
    pub fn held() -> Self {
        WriteGate {
            state: GateState::Held,
        }
    }

    /// A gate that never held anything back (no negotiation requested).
    pub fn released() -> Self {
        WriteGate {
            state: GateState::Released,
        }
    }

    /// Current gate state.
    pub fn state(&self) -> GateState {
        self.state
    }

    /// Tell if the body is still withheld.
    pub fn is_held(&self) -> bool {
        self.state == GateState::Held
    }

    /// Transition `Held -> Released`.
    ///
    /// Returns `true` if this call performed the transition. Signals on a
    /// gate that already left `Held` are no-ops and return `false`.
    pub fn release(&mut self) -> bool {
        if self.state == GateState::Held {
            self.state = GateState::Released;
            true
        } else {
            false
        }
    }

    /// Transition `Held -> Rejected`.
    ///
    /// Returns `true` if this call performed the transition.
    pub fn reject(&mut self) -> bool {
        if self.state == GateState::Held {
            self.state = GateState::Rejected;
            true
        } else {
            false
        }
    }
}

impl fmt::Debug for WriteGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WriteGate<{:?}>", self.state)
    }
}
