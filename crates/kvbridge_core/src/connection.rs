//! Connection lifecycle.
//!
//! The [`ConnectionManager`] owns at most one connection. It opens lazily,
//! shares one open attempt between concurrent callers, runs the upgrade
//! migrations when the engine asks for them, and forgets failed attempts
//! so the next caller retries.
//!
//! ```text
//! Unopened --open()--> Opening --success--> Open
//!    ^                    |                   |
//!    +--error / blocked---+                   |
//!    +-------------------close()--------------+
//! ```

use crate::bridge::{error_message, resolve_with, CoreFuture, Deferred};
use crate::config::Config;
use crate::error::{describe, CoreError};
use crate::migration::UpgradeContext;
use futures::future::{self, Shared};
use futures::FutureExt;
use kvbridge_engine::{NativeDatabase, NativeFactory, Outcome};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

type Attempt = Shared<CoreFuture<Rc<dyn NativeDatabase>>>;

enum State {
    Unopened,
    Opening {
        generation: u64,
        attempt: Attempt,
    },
    Open {
        generation: u64,
        database: Rc<dyn NativeDatabase>,
    },
}

impl State {
    fn generation(&self) -> Option<u64> {
        match self {
            Self::Unopened => None,
            Self::Opening { generation, .. } | Self::Open { generation, .. } => Some(*generation),
        }
    }
}

struct Inner {
    factory: Rc<dyn NativeFactory>,
    config: RefCell<Config>,
    state: RefCell<State>,
    generations: Cell<u64>,
}

impl Inner {
    fn is_current(&self, generation: u64) -> bool {
        self.state.borrow().generation() == Some(generation)
    }

    /// Forgets attempt `generation` if it is still the current one.
    fn forget(&self, generation: u64) {
        if self.is_current(generation) {
            *self.state.borrow_mut() = State::Unopened;
        }
    }
}

/// Owns the connection to one database.
///
/// Clones share the same connection.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Rc<Inner>,
}

impl ConnectionManager {
    /// Creates a manager; nothing is opened until [`open`](Self::open).
    #[must_use]
    pub fn new(factory: Rc<dyn NativeFactory>, config: Config) -> Self {
        Self {
            inner: Rc::new(Inner {
                factory,
                config: RefCell::new(config),
                state: RefCell::new(State::Unopened),
                generations: Cell::new(0),
            }),
        }
    }

    /// Current configuration.
    #[must_use]
    pub fn config(&self) -> Config {
        self.inner.config.borrow().clone()
    }

    /// Returns true once a connection is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(*self.inner.state.borrow(), State::Open { .. })
    }

    /// Returns true while an open attempt is in flight.
    #[must_use]
    pub fn is_opening(&self) -> bool {
        matches!(*self.inner.state.borrow(), State::Opening { .. })
    }

    /// The open connection, if any.
    #[must_use]
    pub fn database(&self) -> Option<Rc<dyn NativeDatabase>> {
        match &*self.inner.state.borrow() {
            State::Open { database, .. } => Some(Rc::clone(database)),
            _ => None,
        }
    }

    /// Opens the database, or returns the connection or attempt in hand.
    ///
    /// Migrations run before the future resolves. A blocked or failed open
    /// rejects every waiter and is forgotten, so the next call starts over.
    pub fn open(&self) -> CoreFuture<Rc<dyn NativeDatabase>> {
        match &*self.inner.state.borrow() {
            State::Open { database, .. } => return future::ok(Rc::clone(database)).boxed_local(),
            State::Opening { attempt, .. } => return attempt.clone().boxed_local(),
            State::Unopened => {}
        }

        let config = self.config();
        let request = match self.inner.factory.open(config.name(), config.version()) {
            Ok(request) => request,
            Err(error) => return future::err(CoreError::open_failed(describe(&error))).boxed_local(),
        };

        let generation = self.inner.generations.get() + 1;
        self.inner.generations.set(generation);
        let (deferred, future) = Deferred::new();
        let attempt = future.shared();
        *self.inner.state.borrow_mut() = State::Opening {
            generation,
            attempt: attempt.clone(),
        };
        tracing::debug!(database = config.name(), version = config.version(), "opening database");

        // Set by the upgrade handler when a migration fails, reported by the
        // error that the aborted upgrade produces.
        let failure: Rc<RefCell<Option<CoreError>>> = Rc::new(RefCell::new(None));

        let upgrade_failure = Rc::clone(&failure);
        let migrations = config.migrations().clone();
        let name = config.name().to_string();
        request.on_upgrade_needed(move |event| {
            tracing::debug!(
                "Upgrading database '{}' from version {} to version {}",
                name,
                event.change.old_version,
                event.change.new_version
            );
            let ctx = UpgradeContext::new(&event);
            if let Err(error) = migrations.run(&ctx) {
                tracing::warn!(database = %name, error = %error, "upgrade failed");
                *upgrade_failure.borrow_mut() = Some(error);
                let _ = event.transaction.abort();
            }
        });

        let weak: Weak<Inner> = Rc::downgrade(&self.inner);
        let on_success = deferred.clone();
        request.on_success(move |outcome| {
            let database = match outcome {
                Outcome::Database(database) => database,
                other => {
                    on_success.reject(CoreError::open_failed(format!(
                        "expected a database, got {other:?}"
                    )));
                    return;
                }
            };
            let Some(inner) = weak.upgrade().filter(|inner| inner.is_current(generation)) else {
                // The attempt was given up on; nobody will ever use this one.
                tracing::debug!(database = %database.name(), "closing late connection");
                database.close();
                on_success.reject(CoreError::open_failed(
                    "The connection was closed before it opened.",
                ));
                return;
            };
            tracing::debug!(
                database = %database.name(),
                version = database.version(),
                "database opened"
            );
            *inner.state.borrow_mut() = State::Open {
                generation,
                database: Rc::clone(&database),
            };
            on_success.resolve(database);
        });

        let weak: Weak<Inner> = Rc::downgrade(&self.inner);
        let on_error = deferred.clone();
        let pending = request.downgrade();
        request.on_error(move |error| {
            if let Some(inner) = weak.upgrade() {
                inner.forget(generation);
            }
            let reason = failure.borrow_mut().take().unwrap_or_else(|| {
                CoreError::open_failed(error_message(pending.upgrade().as_ref(), &error))
            });
            on_error.reject(reason);
        });

        let weak: Weak<Inner> = Rc::downgrade(&self.inner);
        request.on_blocked(move |change| {
            if let Some(inner) = weak.upgrade() {
                inner.forget(generation);
            }
            tracing::debug!(
                old_version = change.old_version,
                new_version = change.new_version,
                "open blocked"
            );
            deferred.reject(CoreError::blocked(format!(
                "another connection is open; cannot upgrade from version {} to {}",
                change.old_version, change.new_version
            )));
        });

        attempt.boxed_local()
    }

    /// Closes the connection and forgets it.
    ///
    /// An open in flight is waited for first; if it succeeds the
    /// connection is closed as soon as it arrives and the attempt's waiters
    /// reject. Resolves right away when nothing is open.
    pub fn close(&self) -> CoreFuture<()> {
        let previous = std::mem::replace(&mut *self.inner.state.borrow_mut(), State::Unopened);
        match previous {
            State::Unopened => future::ok(()).boxed_local(),
            State::Open { database, .. } => {
                database.close();
                tracing::debug!(database = %database.name(), "database closed");
                future::ok(()).boxed_local()
            }
            // The attempt is no longer current, so its success handler
            // closes the connection.
            State::Opening { attempt, .. } => attempt.map(|_| Ok(())).boxed_local(),
        }
    }

    /// Closes the connection, then deletes the database.
    ///
    /// A `database deleted` event is traced however the delete settles. A
    /// delete blocked by another connection rejects with
    /// [`CoreError::DeleteFailed`].
    pub fn delete_database(&self) -> CoreFuture<()> {
        let closed = self.close();
        let factory = Rc::clone(&self.inner.factory);
        let name = self.inner.config.borrow().name().to_string();
        async move {
            closed.await?;
            let result = match factory.delete_database(&name) {
                Ok(request) => resolve_with(&request, |_| Ok(())).await.map_err(|error| match error {
                    CoreError::Request { message } => CoreError::delete_failed(message),
                    CoreError::ConnectionBlocked { .. } => {
                        CoreError::delete_failed("delete blocked by an open connection")
                    }
                    other => other,
                }),
                Err(error) => Err(CoreError::delete_failed(describe(&error))),
            };
            tracing::debug!(database = %name, ok = result.is_ok(), "database deleted");
            result
        }
        .boxed_local()
    }

    /// Closes the current connection and adopts `config`; the next open
    /// uses the new name, version and migrations.
    pub fn switch_database(&self, config: Config) -> CoreFuture<()> {
        let closed = self.close();
        tracing::debug!(database = config.name(), version = config.version(), "switching database");
        *self.inner.config.borrow_mut() = config;
        closed
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.inner.state.borrow() {
            State::Unopened => "unopened",
            State::Opening { .. } => "opening",
            State::Open { .. } => "open",
        };
        f.debug_struct("ConnectionManager")
            .field("database", &self.inner.config.borrow().name())
            .field("state", &state)
            .finish()
    }
}
