//! Event targets: requests and transaction event sets.
//!
//! Native engines report results by firing events at objects the caller
//! holds. A [`Request`] stands for one pending operation: the engine fires
//! `success`, `error`, `blocked` or `upgradeneeded` at it, and the caller
//! listens by installing handlers. [`TransactionEvents`] does the same for a
//! transaction's `complete`, `abort` and `error` events.
//!
//! Handlers are `FnMut` because some requests fire more than once: a cursor
//! request fires `success` once per position.

use crate::error::NativeError;
use crate::key::Key;
use crate::native::{NativeCursor, NativeDatabase, NativeTransaction};
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

type Handler<T> = Box<dyn FnMut(T)>;

/// A single event handler slot.
///
/// Firing takes the handler out of the slot while it runs, so a handler may
/// safely replace itself; the old handler is only put back if the slot is
/// still empty afterwards.
pub struct EventSlot<T> {
    handler: RefCell<Option<Handler<T>>>,
}

impl<T> EventSlot<T> {
    /// Creates an empty slot.
    #[must_use]
    pub fn new() -> Self {
        Self {
            handler: RefCell::new(None),
        }
    }

    /// Installs a handler, replacing any previous one.
    pub fn set(&self, handler: impl FnMut(T) + 'static) {
        *self.handler.borrow_mut() = Some(Box::new(handler));
    }

    /// Removes the handler.
    pub fn clear(&self) {
        self.handler.borrow_mut().take();
    }

    /// Returns true if a handler is installed.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.handler.borrow().is_some()
    }

    /// Fires the event. Returns false if no handler was installed.
    pub fn fire(&self, event: T) -> bool {
        let taken = self.handler.borrow_mut().take();
        match taken {
            Some(mut handler) => {
                handler(event);
                let mut slot = self.handler.borrow_mut();
                if slot.is_none() {
                    *slot = Some(handler);
                }
                true
            }
            None => false,
        }
    }
}

impl<T> Default for EventSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether a request has produced its result yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    /// The operation has not completed.
    Pending,
    /// A result or error is available.
    Done,
}

/// The old and new versions of a version change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionChange {
    /// Version stored before the change (0 for a new database).
    pub old_version: u64,
    /// Version requested (0 for a deletion).
    pub new_version: u64,
}

/// Payload of an `upgradeneeded` event.
#[derive(Clone)]
pub struct UpgradeNeeded {
    /// Versions involved.
    pub change: VersionChange,
    /// The connection being upgraded.
    pub database: Rc<dyn NativeDatabase>,
    /// The version-change transaction all schema changes run in.
    pub transaction: Rc<dyn NativeTransaction>,
}

impl fmt::Debug for UpgradeNeeded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpgradeNeeded")
            .field("change", &self.change)
            .finish_non_exhaustive()
    }
}

/// The result carried by a `success` event.
#[derive(Clone)]
pub enum Outcome {
    /// The operation has no result value (delete, clear, a missing `get`).
    Undefined,
    /// A single key (add, put).
    Key(Key),
    /// A single record.
    Value(Value),
    /// A list of keys.
    Keys(Vec<Key>),
    /// A list of records.
    Values(Vec<Value>),
    /// A record count.
    Count(u64),
    /// The cursor at its next position, or `None` once exhausted.
    Cursor(Option<Rc<dyn NativeCursor>>),
    /// An open connection.
    Database(Rc<dyn NativeDatabase>),
}

impl Outcome {
    /// Returns true for [`Outcome::Undefined`].
    #[must_use]
    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Key(_) => "key",
            Self::Value(_) => "value",
            Self::Keys(_) => "keys",
            Self::Values(_) => "values",
            Self::Count(_) => "count",
            Self::Cursor(_) => "cursor",
            Self::Database(_) => "database",
        }
    }
}

impl fmt::Debug for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key(key) => f.debug_tuple("Key").field(key).finish(),
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::Keys(keys) => f.debug_tuple("Keys").field(keys).finish(),
            Self::Values(values) => f.debug_tuple("Values").field(values).finish(),
            Self::Count(count) => f.debug_tuple("Count").field(count).finish(),
            other => f.write_str(other.kind()),
        }
    }
}

struct RequestInner {
    ready_state: Cell<ReadyState>,
    error: RefCell<Option<NativeError>>,
    success: EventSlot<Outcome>,
    failure: EventSlot<NativeError>,
    blocked: EventSlot<VersionChange>,
    upgrade_needed: EventSlot<UpgradeNeeded>,
    progress: EventSlot<Outcome>,
}

/// A pending native operation.
///
/// Engines create requests and fire events at them; callers install
/// handlers. Cloning yields another handle to the same request.
#[derive(Clone)]
pub struct Request {
    inner: Rc<RequestInner>,
}

impl Request {
    /// Creates a pending request with no handlers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RequestInner {
                ready_state: Cell::new(ReadyState::Pending),
                error: RefCell::new(None),
                success: EventSlot::new(),
                failure: EventSlot::new(),
                blocked: EventSlot::new(),
                upgrade_needed: EventSlot::new(),
                progress: EventSlot::new(),
            }),
        }
    }

    /// Returns the request's ready state.
    #[must_use]
    pub fn ready_state(&self) -> ReadyState {
        self.inner.ready_state.get()
    }

    /// Returns a handle that does not keep the request alive.
    ///
    /// Handlers that need to look at their own request hold one of these;
    /// a strong handle would keep the request and its handlers alive forever.
    #[must_use]
    pub fn downgrade(&self) -> WeakRequest {
        WeakRequest {
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// Returns the error the request failed with, if any.
    #[must_use]
    pub fn error(&self) -> Option<NativeError> {
        self.inner.error.borrow().clone()
    }

    /// Installs the `success` handler.
    pub fn on_success(&self, handler: impl FnMut(Outcome) + 'static) {
        self.inner.success.set(handler);
    }

    /// Installs the `error` handler.
    pub fn on_error(&self, handler: impl FnMut(NativeError) + 'static) {
        self.inner.failure.set(handler);
    }

    /// Installs the `blocked` handler.
    pub fn on_blocked(&self, handler: impl FnMut(VersionChange) + 'static) {
        self.inner.blocked.set(handler);
    }

    /// Installs the `upgradeneeded` handler.
    pub fn on_upgrade_needed(&self, handler: impl FnMut(UpgradeNeeded) + 'static) {
        self.inner.upgrade_needed.set(handler);
    }

    /// Installs the handler for intermediate progress events.
    pub fn on_progress(&self, handler: impl FnMut(Outcome) + 'static) {
        self.inner.progress.set(handler);
    }

    /// Engine side: marks the request pending again (a cursor continuing).
    pub fn reset(&self) {
        self.inner.ready_state.set(ReadyState::Pending);
    }

    /// Engine side: overrides the ready state reported to handlers.
    pub fn set_ready_state(&self, state: ReadyState) {
        self.inner.ready_state.set(state);
    }

    /// Engine side: completes the request and fires `success`.
    pub fn succeed(&self, outcome: Outcome) {
        self.inner.ready_state.set(ReadyState::Done);
        self.inner.success.fire(outcome);
    }

    /// Engine side: completes the request with an error and fires `error`.
    pub fn fail(&self, error: NativeError) {
        self.inner.ready_state.set(ReadyState::Done);
        self.emit_error(error);
    }

    /// Engine side: fires `error` without touching the ready state.
    ///
    /// Used by adapters whose underlying request object owns its state.
    pub fn emit_error(&self, error: NativeError) {
        *self.inner.error.borrow_mut() = Some(error.clone());
        self.inner.failure.fire(error);
    }

    /// Engine side: fires `blocked`.
    pub fn block(&self, change: VersionChange) {
        self.inner.blocked.fire(change);
    }

    /// Engine side: fires `upgradeneeded`.
    pub fn upgrade_needed(&self, event: UpgradeNeeded) {
        self.inner.upgrade_needed.fire(event);
    }

    /// Engine side: fires an intermediate progress event.
    pub fn progress(&self, outcome: Outcome) {
        self.inner.progress.fire(outcome);
    }
}

impl Default for Request {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("ready_state", &self.ready_state())
            .field("error", &self.error())
            .finish_non_exhaustive()
    }
}

/// A non-owning handle to a [`Request`].
#[derive(Clone)]
pub struct WeakRequest {
    inner: Weak<RequestInner>,
}

impl WeakRequest {
    /// Returns the request if it is still alive.
    #[must_use]
    pub fn upgrade(&self) -> Option<Request> {
        self.inner.upgrade().map(|inner| Request { inner })
    }
}

/// The `complete`, `abort` and `error` events of a transaction.
#[derive(Default)]
pub struct TransactionEvents {
    complete: EventSlot<()>,
    abort: EventSlot<NativeError>,
    error: EventSlot<NativeError>,
}

impl TransactionEvents {
    /// Creates an event set with no handlers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the `complete` handler.
    pub fn on_complete(&self, handler: impl FnMut(()) + 'static) {
        self.complete.set(handler);
    }

    /// Installs the `abort` handler.
    pub fn on_abort(&self, handler: impl FnMut(NativeError) + 'static) {
        self.abort.set(handler);
    }

    /// Installs the `error` handler.
    pub fn on_error(&self, handler: impl FnMut(NativeError) + 'static) {
        self.error.set(handler);
    }

    /// Engine side: fires `complete`.
    pub fn fire_complete(&self) {
        self.complete.fire(());
    }

    /// Engine side: fires `abort`.
    pub fn fire_abort(&self, error: NativeError) {
        self.abort.fire(error);
    }

    /// Engine side: fires `error`.
    pub fn fire_error(&self, error: NativeError) {
        self.error.fire(error);
    }
}
