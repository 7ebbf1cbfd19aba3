//! Terminators for interrupting long-running solves.
//!
//! A [`Terminator`] is polled between iterations and maps an external
//! condition onto an abort status. [`InterruptTerminator`] additionally
//! wires Ctrl-C (SIGINT) onto a solver's [`AbortHandle`], so a running
//! [`crate::Solver`] stops cooperatively at the next iteration boundary.
//!
//! # Note
//! [`InterruptTerminator`] installs a global signal handler and can only
//! be constructed once per process; creating a second one panics.

use std::time::Instant;

use crate::callback::AbortHandle;
use crate::Status;

pub trait Terminator {
    fn initialize(&mut self) {}

    /// Returns the abort status once the terminating condition holds.
    fn terminate(&mut self) -> Option<Status>;
}

/// Maps Ctrl-C (SIGINT) and programmatic interrupts onto an abort handle.
pub struct InterruptTerminator {
    handle: AbortHandle,
}

impl InterruptTerminator {
    /// Installs the signal handler, forwarding interrupts to `handle`.
    /// Pass [`crate::Solver::abort_handle`] to stop a running solve.
    pub fn new(handle: AbortHandle) -> Self {
        ctrlc::set_handler({
            let handle = handle.clone();
            move || handle.abort()
        })
        .expect("failed to install the interrupt handler");

        Self { handle }
    }

    /// Triggers the interrupt programmatically.
    pub fn interrupt(&self) {
        self.handle.abort();
    }
}

impl Terminator for InterruptTerminator {
    fn terminate(&mut self) -> Option<Status> {
        self.handle.aborted().then_some(Status::AbortManual)
    }
}

/// Triggers after a wall-clock limit in seconds.
pub struct TimeOutTerminator {
    max_seconds: f64,
    start: Instant,
}

impl TimeOutTerminator {
    pub fn new(max_seconds: f64) -> Self {
        Self {
            max_seconds,
            start: Instant::now(),
        }
    }
}

impl Terminator for TimeOutTerminator {
    fn initialize(&mut self) {
        self.start = Instant::now();
    }

    fn terminate(&mut self) -> Option<Status> {
        (self.start.elapsed().as_secs_f64() >= self.max_seconds).then_some(Status::AbortTime)
    }
}

/// Combines terminators; the first one to trigger wins.
pub struct MultipleTerminators {
    terminators: Vec<Box<dyn Terminator>>,
}

impl MultipleTerminators {
    pub fn new(terminators: Vec<Box<dyn Terminator>>) -> Self {
        Self { terminators }
    }
}

impl Terminator for MultipleTerminators {
    fn initialize(&mut self) {
        for terminator in &mut self.terminators {
            terminator.initialize();
        }
    }

    fn terminate(&mut self) -> Option<Status> {
        self.terminators
            .iter_mut()
            .find_map(|terminator| terminator.terminate())
    }
}
