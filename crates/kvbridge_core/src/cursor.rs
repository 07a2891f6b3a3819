//! Draining native cursors.

use crate::bridge::{error_message, Deferred};
use crate::error::{CoreError, CoreResult};
use futures::channel::mpsc;
use futures::future::LocalBoxFuture;
use futures::FutureExt;
use kvbridge_engine::{Key, NativeCursor, Outcome, Request, Value};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// A result set that is also delivered item by item.
///
/// Awaiting a `Progressive` yields every item once the cursor is exhausted.
/// [`notifications`](Self::notifications) yields each item as soon as the
/// cursor reaches it, in cursor order.
pub struct Progressive<T> {
    result: LocalBoxFuture<'static, CoreResult<Vec<T>>>,
    notifications: mpsc::UnboundedReceiver<T>,
}

impl<T: 'static> Progressive<T> {
    /// A progressive result that has already settled with no notifications.
    pub(crate) fn settled(result: CoreResult<Vec<T>>) -> Self {
        let (_, notifications) = mpsc::unbounded();
        Self {
            result: futures::future::ready(result).boxed_local(),
            notifications,
        }
    }
}

impl<T> Progressive<T> {
    /// Per-item notifications. The stream ends after the last item.
    pub fn notifications(&mut self) -> &mut mpsc::UnboundedReceiver<T> {
        &mut self.notifications
    }

    /// Splits into the final result and the notification stream.
    pub fn into_parts(
        self,
    ) -> (
        LocalBoxFuture<'static, CoreResult<Vec<T>>>,
        mpsc::UnboundedReceiver<T>,
    ) {
        (self.result, self.notifications)
    }
}

impl<T> Future for Progressive<T> {
    type Output = CoreResult<Vec<T>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.result.as_mut().poll(cx)
    }
}

/// What a drain collects from each cursor position.
pub trait Projection: 'static {
    /// Item type.
    type Item: Clone + 'static;

    /// Reads the item at the cursor's current position.
    fn project(&self, cursor: &dyn NativeCursor) -> CoreResult<Self::Item>;
}

/// Collects record values.
#[derive(Debug, Clone, Copy)]
pub struct Values;

impl Projection for Values {
    type Item = Value;

    fn project(&self, cursor: &dyn NativeCursor) -> CoreResult<Value> {
        cursor
            .value()
            .ok_or_else(|| CoreError::request("The cursor did not expose a value."))
    }
}

/// Collects primary keys.
#[derive(Debug, Clone, Copy)]
pub struct PrimaryKeys;

impl Projection for PrimaryKeys {
    type Item = Key;

    fn project(&self, cursor: &dyn NativeCursor) -> CoreResult<Key> {
        Ok(cursor.primary_key())
    }
}

/// Advances the cursor opened by `request` until it is exhausted.
///
/// Each position is projected, sent as a notification, and kept for the
/// final result. Any native error, at open or at any advance, rejects.
pub fn drain<P: Projection>(request: &Request, projection: P) -> Progressive<P::Item> {
    let (deferred, result) = Deferred::new();
    let (sender, notifications) = mpsc::unbounded();

    let on_success = deferred.clone();
    let mut items = Vec::new();
    let mut sender = Some(sender);
    request.on_success(move |outcome| {
        if on_success.is_settled() {
            return;
        }
        match outcome {
            Outcome::Cursor(Some(cursor)) => {
                let item = match projection.project(cursor.as_ref()) {
                    Ok(item) => item,
                    Err(error) => {
                        sender.take();
                        on_success.reject(error);
                        return;
                    }
                };
                if let Some(sender) = &sender {
                    let _ = sender.unbounded_send(item.clone());
                }
                items.push(item);
                if let Err(error) = cursor.continue_() {
                    sender.take();
                    on_success.reject(error.into());
                }
            }
            Outcome::Cursor(None) => {
                sender.take();
                on_success.resolve(std::mem::take(&mut items));
            }
            other => {
                sender.take();
                on_success.reject(CoreError::request(format!(
                    "expected a cursor, got {other:?}"
                )));
            }
        }
    });

    let weak = request.downgrade();
    request.on_error(move |error| {
        deferred.reject(CoreError::request(error_message(
            weak.upgrade().as_ref(),
            &error,
        )));
    });

    Progressive {
        result,
        notifications,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;
    use futures::StreamExt;
    use kvbridge_engine::{NativeError, NativeResult};
    use serde_json::json;
    use std::cell::Cell;
    use std::rc::Rc;

    /// A cursor over a fixed list. Advancing only records the request;
    /// the test fires the next position, like an engine's next event.
    struct ListCursor {
        items: Vec<Value>,
        at: Cell<usize>,
        advanced: Cell<bool>,
    }

    impl ListCursor {
        fn run(request: &Request, items: Vec<Value>) {
            let cursor = Rc::new(Self {
                items,
                at: Cell::new(0),
                advanced: Cell::new(false),
            });
            loop {
                if cursor.at.get() < cursor.items.len() {
                    let handle = Rc::clone(&cursor) as Rc<dyn NativeCursor>;
                    request.succeed(Outcome::Cursor(Some(handle)));
                } else {
                    request.succeed(Outcome::Cursor(None));
                    break;
                }
                if !cursor.advanced.replace(false) {
                    break;
                }
                cursor.at.set(cursor.at.get() + 1);
            }
        }
    }

    impl NativeCursor for ListCursor {
        fn key(&self) -> Key {
            Key::from(self.at.get() as u64)
        }

        fn primary_key(&self) -> Key {
            Key::from(self.at.get() as u64 + 1)
        }

        fn value(&self) -> Option<Value> {
            self.items.get(self.at.get()).cloned()
        }

        fn continue_(&self) -> NativeResult<()> {
            self.advanced.set(true);
            Ok(())
        }
    }

    #[test]
    fn collects_values_in_order_and_notifies() {
        let request = Request::new();
        let progressive = drain(&request, Values);
        ListCursor::run(&request, vec![json!("a"), json!("b"), json!("c")]);

        let (result, notifications) = progressive.into_parts();
        assert_eq!(
            block_on(result).unwrap(),
            vec![json!("a"), json!("b"), json!("c")]
        );
        assert_eq!(
            block_on(notifications.collect::<Vec<_>>()),
            vec![json!("a"), json!("b"), json!("c")]
        );
    }

    #[test]
    fn collects_primary_keys() {
        let request = Request::new();
        let progressive = drain(&request, PrimaryKeys);
        ListCursor::run(&request, vec![json!(0), json!(0)]);
        assert_eq!(block_on(progressive).unwrap(), vec![Key::from(1), Key::from(2)]);
    }

    #[test]
    fn empty_cursor_resolves_empty() {
        let request = Request::new();
        let progressive = drain(&request, PrimaryKeys);
        request.succeed(Outcome::Cursor(None));
        assert_eq!(block_on(progressive).unwrap(), Vec::<Key>::new());
    }

    #[test]
    fn error_rejects() {
        let request = Request::new();
        let progressive = drain(&request, Values);
        request.fail(NativeError::abort("The transaction was aborted."));
        assert_eq!(
            block_on(progressive).unwrap_err(),
            CoreError::request("The transaction was aborted.")
        );
    }

    #[test]
    fn non_cursor_outcome_rejects() {
        let request = Request::new();
        let progressive = drain(&request, Values);
        request.succeed(Outcome::Count(3));
        assert!(block_on(progressive).is_err());
    }

    #[test]
    fn settled_has_no_notifications() {
        let mut progressive = Progressive::<u32>::settled(Ok(vec![1]));
        assert!(block_on(progressive.notifications().next()).is_none());
        assert_eq!(block_on(progressive).unwrap(), vec![1]);
    }
}
