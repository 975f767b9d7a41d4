use std::time::Duration;

/// A task queued onto the owning worker.
pub type Task = Box<dyn FnOnce()>;

/// Key identifying a scheduled one-shot timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerKey(pub u64);

/// Binding to the single-threaded I/O worker that owns a connection.
///
/// All state transitions for a handler, and all response-decoder callbacks
/// affecting it, occur on this worker. Externally-entered methods
/// (`submit`, `cancel`, chunk-availability signals) first check
/// [`in_reactor()`][Reactor::in_reactor] and, when called from elsewhere,
/// trampoline themselves through [`execute()`][Reactor::execute] instead of
/// touching any state.
///
/// The binding is responsible for marshalling tasks onto the worker; this
/// crate never synchronizes with locks.
pub trait Reactor {
    /// Tell if the caller is currently on the owning worker.
    fn in_reactor(&self) -> bool;

    /// Enqueue a task to run on the owning worker.
    fn execute(&self, task: Task);

    /// Schedule a one-shot timer on the owning worker.
    fn schedule(&self, delay: Duration, task: Task) -> TimerKey;

    /// Cancel a scheduled timer. No-op if the timer already fired.
    fn cancel_timer(&self, key: TimerKey);
}
