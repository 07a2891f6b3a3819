//! A single-threaded event loop for callback-driven engines.
//!
//! Engines never fire events from inside the call that started an
//! operation. They schedule a task on the loop instead, so that the caller
//! has a chance to install handlers first. [`EventLoop::block_on`] drives a
//! future to completion by alternating between polling it and running one
//! scheduled task.

use futures::task::{waker, ArcWake};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::pin;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use thiserror::Error;

type Task = Box<dyn FnOnce()>;

/// A future was still pending when no events were left to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("event loop stalled: future pending with no scheduled events")]
pub struct Stalled;

/// A FIFO queue of scheduled tasks.
///
/// Cloning yields another handle to the same queue.
#[derive(Clone, Default)]
pub struct EventLoop {
    queue: Rc<RefCell<VecDeque<Task>>>,
}

impl EventLoop {
    /// Creates an empty loop.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules `task` to run after everything already queued.
    pub fn schedule(&self, task: impl FnOnce() + 'static) {
        self.queue.borrow_mut().push_back(Box::new(task));
    }

    /// Returns the number of queued tasks.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.borrow().len()
    }

    /// Runs the oldest queued task. Returns false if the queue was empty.
    pub fn run_next(&self) -> bool {
        // Pop before running: the task may schedule more work.
        let task = self.queue.borrow_mut().pop_front();
        match task {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    /// Runs tasks until the queue is empty. Returns how many ran.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        while self.run_next() {
            ran += 1;
        }
        ran
    }

    /// Drives `future` to completion, running scheduled tasks in between.
    ///
    /// # Errors
    ///
    /// Returns [`Stalled`] if the future is pending, has not been woken, and
    /// the queue is empty. Nothing could ever complete it at that point.
    pub fn block_on<F: Future>(&self, future: F) -> Result<F::Output, Stalled> {
        let flag = Arc::new(WakeFlag(AtomicBool::new(true)));
        let waker = waker(Arc::clone(&flag));
        let mut cx = Context::from_waker(&waker);
        let mut future = pin!(future);

        loop {
            if flag.0.swap(false, Ordering::AcqRel) {
                if let Poll::Ready(output) = future.as_mut().poll(&mut cx) {
                    return Ok(output);
                }
                continue;
            }
            if !self.run_next() {
                return Err(Stalled);
            }
        }
    }
}

impl std::fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLoop")
            .field("pending", &self.pending())
            .finish()
    }
}

struct WakeFlag(AtomicBool);

impl ArcWake for WakeFlag {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.0.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::oneshot;
    use std::cell::Cell;

    #[test]
    fn tasks_run_in_order() {
        let event_loop = EventLoop::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        for i in 0..3 {
            let log = Rc::clone(&log);
            event_loop.schedule(move || log.borrow_mut().push(i));
        }

        assert_eq!(event_loop.pending(), 3);
        assert_eq!(event_loop.run_until_idle(), 3);
        assert_eq!(*log.borrow(), vec![0, 1, 2]);
    }

    #[test]
    fn nested_scheduling_runs_later() {
        let event_loop = EventLoop::new();
        let hits = Rc::new(Cell::new(0));

        let inner_loop = event_loop.clone();
        let inner_hits = Rc::clone(&hits);
        event_loop.schedule(move || {
            inner_hits.set(inner_hits.get() + 1);
            let hits = Rc::clone(&inner_hits);
            inner_loop.schedule(move || hits.set(hits.get() + 10));
        });

        assert!(event_loop.run_next());
        assert_eq!(hits.get(), 1);
        assert!(event_loop.run_next());
        assert_eq!(hits.get(), 11);
        assert!(!event_loop.run_next());
    }

    #[test]
    fn block_on_runs_events_until_ready() {
        let event_loop = EventLoop::new();
        let (tx, rx) = oneshot::channel();
        event_loop.schedule(move || {
            let _ = tx.send(42);
        });

        assert_eq!(event_loop.block_on(rx).unwrap(), Ok(42));
    }

    #[test]
    fn block_on_reports_stall() {
        let event_loop = EventLoop::new();
        let (_tx, rx) = oneshot::channel::<u32>();
        assert_eq!(event_loop.block_on(rx), Err(Stalled));
    }
}
