//! Solver event callbacks.
//!
//! Callbacks are appended per event and invoked with a read-only view of
//! the solver state plus an abort handle; aborting is the only permitted
//! mutation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::iterate::Iterate;
use crate::{E, I, Status};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverEvent {
    AcceptedIterate,
    PerformedIteration,
    Finished,
}

pub const NUM_SOLVER_EVENTS: usize = 3;

/// Cooperative abort flag, polled between iterations.
#[derive(Clone, Default)]
pub struct AbortHandle {
    flag: Arc<AtomicBool>,
}

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn aborted(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// View of the solver handed to callbacks.
pub struct CallbackContext<'a> {
    pub iterate: &'a Iterate,
    pub iteration: I,
    pub status: Status,
    pub penalty: E,
    pub trust_radius: E,
    pub lp_trust_radius: E,
    pub abort: AbortHandle,
}

pub type Callback = Box<dyn FnMut(&CallbackContext<'_>)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallbackId {
    event: usize,
    id: usize,
}

/// Append-only list of callbacks per solver event.
#[derive(Default)]
pub struct CallbackHandler {
    next_id: usize,
    handlers: [Vec<(usize, Callback)>; NUM_SOLVER_EVENTS],
}

impl std::fmt::Debug for CallbackHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackHandler")
            .field("next_id", &self.next_id)
            .finish_non_exhaustive()
    }
}

impl CallbackHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, event: SolverEvent, callback: Callback) -> CallbackId {
        let event_index = event as usize;
        let id = self.next_id;

        self.next_id += 1;
        self.handlers[event_index].push((id, callback));

        CallbackId {
            event: event_index,
            id,
        }
    }

    pub fn remove(&mut self, callback_id: CallbackId) -> bool {
        let handlers = &mut self.handlers[callback_id.event];

        let before = handlers.len();
        handlers.retain(|(id, _)| *id != callback_id.id);

        handlers.len() != before
    }

    pub fn execute(&mut self, event: SolverEvent, context: &CallbackContext<'_>) {
        for (_, callback) in &mut self.handlers[event as usize] {
            callback(context);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn test_add_execute_remove() {
        let mut handler = CallbackHandler::new();

        let count = Rc::new(Cell::new(0));

        let id = {
            let count = count.clone();
            handler.add(
                SolverEvent::PerformedIteration,
                Box::new(move |_| count.set(count.get() + 1)),
            )
        };

        let problem = {
            use crate::func::ClosureFunc;
            use faer::Col;

            let func = ClosureFunc::new(
                1,
                0,
                |x| x[0],
                |_| Col::from_fn(1, |_| 1.),
                None,
                None,
                |_, _, _, _| Col::zeros(1),
            )
            .into_shared();

            crate::problem::Problem::new_simple(
                func,
                Col::zeros(1),
                Col::from_fn(1, |_| 1.),
                Col::zeros(0),
                Col::zeros(0),
            )
            .unwrap()
        };

        let iterate = Iterate::new(&problem, faer::Col::zeros(1));

        let context = CallbackContext {
            iterate: &iterate,
            iteration: 0,
            status: Status::Running,
            penalty: 10.,
            trust_radius: 1.,
            lp_trust_radius: 1.,
            abort: AbortHandle::new(),
        };

        handler.execute(SolverEvent::PerformedIteration, &context);
        handler.execute(SolverEvent::AcceptedIterate, &context);

        assert_eq!(count.get(), 1);

        assert!(handler.remove(id));
        assert!(!handler.remove(id));

        handler.execute(SolverEvent::PerformedIteration, &context);
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn test_abort_handle() {
        let handle = AbortHandle::new();

        assert!(!handle.aborted());

        handle.abort();
        assert!(handle.aborted());

        handle.reset();
        assert!(!handle.aborted());
    }
}
