//! Outstanding-work ledger.
//!
//! Every transaction registers its completion future here when it begins and
//! is removed when it settles, whatever the outcome. [`Ledger::flush`] waits
//! for everything registered at the time of the call.

use crate::error::{CoreError, CoreResult};
use crate::transaction::{Committed, Completion};
use futures::future::{join_all, LocalBoxFuture};
use futures::FutureExt;
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;

/// How a transaction settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionOutcome {
    /// Committed.
    Completed,
    /// Aborted, explicitly or by the engine.
    Aborted(String),
    /// Failed with a transaction-level error.
    Failed(String),
}

impl From<&CoreResult<Committed>> for TransactionOutcome {
    fn from(result: &CoreResult<Committed>) -> Self {
        match result {
            Ok(_) => Self::Completed,
            Err(CoreError::TransactionAborted { message }) => Self::Aborted(message.clone()),
            Err(CoreError::TransactionFailed { message }) => Self::Failed(message.clone()),
            Err(other) => Self::Failed(other.to_string()),
        }
    }
}

#[derive(Default)]
struct LedgerInner {
    entries: RefCell<BTreeMap<u64, Completion>>,
    next_id: Cell<u64>,
}

/// Tracks in-flight transactions.
///
/// Clones share the same ledger.
#[derive(Clone, Default)]
pub struct Ledger {
    inner: Rc<LedgerInner>,
}

impl Ledger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Issues the next transaction id. Ids increase monotonically.
    pub fn next_id(&self) -> u64 {
        let id = self.inner.next_id.get() + 1;
        self.inner.next_id.set(id);
        id
    }

    pub(crate) fn register(&self, id: u64, completion: Completion) {
        self.inner.entries.borrow_mut().insert(id, completion);
    }

    pub(crate) fn settle(&self, id: u64) {
        self.inner.entries.borrow_mut().remove(&id);
    }

    /// Number of transactions still in flight.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.entries.borrow().len()
    }

    /// Returns true if nothing is in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.entries.borrow().is_empty()
    }

    /// Ids of the transactions still in flight, ascending.
    #[must_use]
    pub fn pending_ids(&self) -> Vec<u64> {
        self.inner.entries.borrow().keys().copied().collect()
    }

    /// Waits for every transaction registered now to settle.
    ///
    /// Resolves with one outcome per transaction, in creation order; an
    /// empty ledger resolves right away with no outcomes. Transactions that
    /// begin after the call are not waited for.
    pub fn flush(&self) -> LocalBoxFuture<'static, Vec<TransactionOutcome>> {
        // Snapshot first: settling removes entries while we wait.
        let pending: Vec<Completion> = self.inner.entries.borrow().values().cloned().collect();
        if pending.is_empty() {
            return futures::future::ready(Vec::new()).boxed_local();
        }
        join_all(pending)
            .map(|results| results.iter().map(TransactionOutcome::from).collect())
            .boxed_local()
    }
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("pending", &self.pending_ids())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::Deferred;
    use futures::executor::block_on;

    fn completion() -> (Deferred<Committed>, Completion) {
        let (deferred, future) = Deferred::new();
        (deferred, future.shared())
    }

    #[test]
    fn ids_are_monotonic() {
        let ledger = Ledger::new();
        let a = ledger.next_id();
        let b = ledger.clone().next_id();
        assert!(b > a);
    }

    #[test]
    fn empty_flush_resolves_immediately() {
        let ledger = Ledger::new();
        assert_eq!(ledger.flush().now_or_never(), Some(Vec::new()));
    }

    #[test]
    fn flush_waits_for_registered_work() {
        let ledger = Ledger::new();
        let (first, first_completion) = completion();
        let (second, second_completion) = completion();
        ledger.register(1, first_completion);
        ledger.register(2, second_completion);

        let mut flushed = ledger.flush();
        assert!((&mut flushed).now_or_never().is_none());

        first.resolve(Committed);
        ledger.settle(1);
        second.reject(CoreError::aborted("user abort"));
        ledger.settle(2);

        assert_eq!(
            block_on(flushed),
            vec![
                TransactionOutcome::Completed,
                TransactionOutcome::Aborted("user abort".to_string())
            ]
        );
        assert!(ledger.is_empty());
    }

    #[test]
    fn outcome_from_other_errors() {
        let failed: CoreResult<Committed> = Err(CoreError::failed("boom"));
        assert_eq!(
            TransactionOutcome::from(&failed),
            TransactionOutcome::Failed("boom".to_string())
        );
        let other: CoreResult<Committed> = Err(CoreError::request("x"));
        assert_eq!(
            TransactionOutcome::from(&other),
            TransactionOutcome::Failed("x".to_string())
        );
    }
}
