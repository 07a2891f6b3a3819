//! Turning native requests into futures.
//!
//! A native [`Request`] reports its result by firing events. The functions
//! here install handlers on a request and hand back a future that settles
//! from those handlers. Every future settles at most once: the sending half
//! of its channel is consumed by the first terminal event, and later events
//! find it gone.

use crate::error::{describe, CoreError, CoreResult};
use futures::channel::{mpsc, oneshot};
use futures::future::LocalBoxFuture;
use futures::FutureExt;
use kvbridge_engine::{NativeError, Outcome, ReadyState, Request, WeakRequest};
use std::cell::RefCell;
use std::rc::Rc;

/// Message used when an error arrives while the request still claims to be
/// pending. Some engines report errors this way when a request is torn down
/// mid-flight.
pub const OPERATION_PENDING: &str = "Error: Operation pending";

/// Future returned by every asynchronous core operation.
pub type CoreFuture<T> = LocalBoxFuture<'static, CoreResult<T>>;

/// The settling half of a future.
///
/// Cloning shares the same slot; whichever clone settles first wins and the
/// rest become no-ops.
pub struct Deferred<T> {
    sender: Rc<RefCell<Option<oneshot::Sender<CoreResult<T>>>>>,
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Self {
            sender: Rc::clone(&self.sender),
        }
    }
}

impl<T: 'static> Deferred<T> {
    /// Creates a deferred and the future it settles.
    #[must_use]
    pub fn new() -> (Self, CoreFuture<T>) {
        let (sender, receiver) = oneshot::channel();
        let future = receiver
            .map(|settled| {
                settled.unwrap_or_else(|_| {
                    Err(CoreError::request("The request was dropped before it settled."))
                })
            })
            .boxed_local();
        (
            Self {
                sender: Rc::new(RefCell::new(Some(sender))),
            },
            future,
        )
    }

    /// Settles with `result`. Returns false if already settled.
    pub fn settle(&self, result: CoreResult<T>) -> bool {
        let sender = self.sender.borrow_mut().take();
        match sender {
            // The receiver may be gone if the caller dropped the future.
            Some(sender) => {
                let _ = sender.send(result);
                true
            }
            None => false,
        }
    }

    /// Resolves with `value`.
    pub fn resolve(&self, value: T) -> bool {
        self.settle(Ok(value))
    }

    /// Rejects with `error`.
    pub fn reject(&self, error: CoreError) -> bool {
        self.settle(Err(error))
    }

    /// Returns true once settled.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.sender.borrow().is_none()
    }
}

/// Builds the rejection message for an error fired at `request`.
#[must_use]
pub fn error_message(request: Option<&Request>, error: &NativeError) -> String {
    match request {
        Some(request) if request.ready_state() == ReadyState::Pending => {
            OPERATION_PENDING.to_string()
        }
        _ => describe(error),
    }
}

fn message_for(request: &WeakRequest, error: &NativeError) -> String {
    error_message(request.upgrade().as_ref(), error)
}

/// Wraps `request` in a future that resolves with `map(outcome)`.
///
/// `error` events reject with [`CoreError::Request`]; `blocked` events
/// reject with [`CoreError::ConnectionBlocked`].
pub fn resolve_with<T, F>(request: &Request, map: F) -> CoreFuture<T>
where
    T: 'static,
    F: FnOnce(Outcome) -> CoreResult<T> + 'static,
{
    let (deferred, future) = Deferred::new();
    let map = RefCell::new(Some(map));

    let on_success = deferred.clone();
    request.on_success(move |outcome| {
        if let Some(map) = map.borrow_mut().take() {
            on_success.settle(map(outcome));
        }
    });

    let on_error = deferred.clone();
    let weak = request.downgrade();
    request.on_error(move |error| {
        on_error.reject(CoreError::request(message_for(&weak, &error)));
    });

    let weak = request.downgrade();
    request.on_blocked(move |change| {
        let message = weak
            .upgrade()
            .and_then(|request| request.error())
            .map(|error| describe(&error))
            .unwrap_or_else(|| {
                format!(
                    "blocked upgrading from version {} to {}",
                    change.old_version, change.new_version
                )
            });
        deferred.reject(CoreError::blocked(message));
    });

    future
}

/// Wraps `request` in a future that resolves with the raw outcome.
pub fn resolve(request: &Request) -> CoreFuture<Outcome> {
    resolve_with(request, Ok)
}

/// Forwards the request's intermediate progress events.
///
/// The stream ends when the request is dropped.
pub fn notify_with(request: &Request) -> mpsc::UnboundedReceiver<Outcome> {
    let (sender, receiver) = mpsc::unbounded();
    request.on_progress(move |outcome| {
        let _ = sender.unbounded_send(outcome);
    });
    receiver
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;
    use futures::StreamExt;
    use kvbridge_engine::{Key, VersionChange};

    #[test]
    fn resolves_with_mapped_outcome() {
        let request = Request::new();
        let future = resolve_with(&request, |outcome| match outcome {
            Outcome::Key(key) => Ok(key),
            other => Err(CoreError::request(format!("unexpected {other:?}"))),
        });
        request.succeed(Outcome::Key(Key::from(3)));
        assert_eq!(block_on(future), Ok(Key::from(3)));
    }

    #[test]
    fn rejects_with_native_message() {
        let request = Request::new();
        let future = resolve(&request);
        request.fail(NativeError::constraint("Key already exists in the object store."));
        assert_eq!(
            block_on(future).unwrap_err(),
            CoreError::request("Key already exists in the object store.")
        );
    }

    #[test]
    fn pending_request_error_is_operation_pending() {
        let request = Request::new();
        let future = resolve(&request);
        request.emit_error(NativeError::abort("torn down"));
        assert_eq!(block_on(future).unwrap_err(), CoreError::request(OPERATION_PENDING));
    }

    #[test]
    fn blocked_rejects() {
        let request = Request::new();
        let future = resolve(&request);
        request.block(VersionChange {
            old_version: 1,
            new_version: 2,
        });
        assert!(matches!(
            block_on(future),
            Err(CoreError::ConnectionBlocked { .. })
        ));
    }

    #[test]
    fn settles_only_once() {
        let request = Request::new();
        let future = resolve(&request);
        request.succeed(Outcome::Count(1));
        request.fail(NativeError::abort("late"));
        request.succeed(Outcome::Count(2));
        assert!(matches!(block_on(future), Ok(Outcome::Count(1))));
    }

    #[test]
    fn deferred_reports_settlement() {
        let (deferred, future) = Deferred::<u32>::new();
        assert!(!deferred.is_settled());
        assert!(deferred.resolve(1));
        assert!(!deferred.reject(CoreError::request("x")));
        assert_eq!(block_on(future), Ok(1));
    }

    #[test]
    fn dropped_deferred_rejects() {
        let (deferred, future) = Deferred::<u32>::new();
        drop(deferred);
        assert!(block_on(future).is_err());
    }

    #[test]
    fn progress_is_forwarded() {
        let request = Request::new();
        let progress = notify_with(&request);
        request.progress(Outcome::Count(1));
        request.progress(Outcome::Count(2));
        drop(request);

        let seen: Vec<u64> = block_on(progress.collect::<Vec<_>>())
            .into_iter()
            .filter_map(|outcome| match outcome {
                Outcome::Count(n) => Some(n),
                _ => None,
            })
            .collect();
        assert_eq!(seen, vec![1, 2]);
    }
}
