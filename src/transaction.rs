//! Ambient transactions with XA two-phase commit.
//!
//! A [`Transaction`] is carried by the current Tokio task through a
//! task-local slot installed by [`TransactionManager::run`]. Code running
//! inside that scope reads it with [`Transaction::current`] and enlists
//! [`XaResource`]s into it. When the scoped future finishes the manager
//! decides the outcome:
//!
//! - `Ok` and not marked rollback-only: commit. A single enlisted resource
//!   is committed in one phase; several are prepared first and committed
//!   only if every one votes to commit.
//! - `Err`, rollback-only, or a failed prepare: every enlisted resource is
//!   rolled back.
//!
//! If the future returned by [`TransactionManager::run`] is dropped before
//! the work finishes, the enlisted resources are rolled back on a spawned
//! task.
//!
//! The ambient slot is not propagated to spawned tasks.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::error::{TransactionError, XaError};

tokio::task_local! {
    static CURRENT: Transaction;
}

/// Global transaction identifier shared by every branch of one transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Xid(String);

impl Xid {
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Xid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vote {
    Commit,
    /// The branch did no work; it is finished and takes no part in phase two.
    ReadOnly,
}

/// The resource side of the two-phase commit protocol.
///
/// `start` associates work with a branch, `end` dissociates it, and the
/// transaction manager drives `prepare`/`commit`/`rollback`. A prepare
/// that returns `Err` is a vote to roll back.
#[async_trait]
pub trait XaResource: Send + Sync {
    fn resource_name(&self) -> &str;
    async fn start(&self, xid: &Xid) -> Result<(), XaError>;
    async fn end(&self, xid: &Xid) -> Result<(), XaError>;
    async fn prepare(&self, xid: &Xid) -> Result<Vote, XaError>;
    async fn commit(&self, xid: &Xid, one_phase: bool) -> Result<(), XaError>;
    async fn rollback(&self, xid: &Xid) -> Result<(), XaError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Active,
    MarkedRollback,
    Completing,
    Committed,
    RolledBack,
}

impl Status {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::MarkedRollback => "marked rollback-only",
            Self::Completing => "completing",
            Self::Committed => "committed",
            Self::RolledBack => "rolled back",
        }
    }
}

struct State {
    status: Status,
    resources: Vec<Arc<dyn XaResource>>,
}

struct Inner {
    xid: Xid,
    state: Mutex<State>,
}

/// Handle to one transaction. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Transaction {
    inner: Arc<Inner>,
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("xid", &self.inner.xid)
            .field("status", &self.status())
            .finish()
    }
}

impl Transaction {
    fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                xid: Xid::generate(),
                state: Mutex::new(State {
                    status: Status::Active,
                    resources: Vec::new(),
                }),
            }),
        }
    }

    /// The transaction bound to the current task, if any.
    #[must_use]
    pub fn current() -> Option<Self> {
        CURRENT.try_with(Self::clone).ok()
    }

    #[must_use]
    pub fn xid(&self) -> &Xid {
        &self.inner.xid
    }

    #[must_use]
    pub fn status(&self) -> Status {
        self.lock().status
    }

    /// Force the transaction to roll back when it completes.
    pub fn set_rollback_only(&self) {
        let mut state = self.lock();
        if state.status == Status::Active {
            state.status = Status::MarkedRollback;
        }
    }

    /// Register `resource` with this transaction and start its branch.
    ///
    /// Enlisting a resource that is already enlisted re-joins its branch;
    /// it is still prepared and committed once.
    pub async fn enlist(&self, resource: Arc<dyn XaResource>) -> Result<(), TransactionError> {
        self.ensure_active()?;

        resource
            .start(self.xid())
            .await
            .map_err(|source| TransactionError::Enlist {
                resource: resource.resource_name().to_string(),
                source,
            })?;

        let rejected = {
            let mut state = self.lock();
            if state.status != Status::Active {
                Some(state.status)
            } else {
                if !state.resources.iter().any(|r| Arc::ptr_eq(r, &resource)) {
                    tracing::debug!(
                        xid = %self.xid(),
                        resource = resource.resource_name(),
                        "resource enlisted"
                    );
                    state.resources.push(Arc::clone(&resource));
                }
                None
            }
        };

        if let Some(status) = rejected {
            let _ = resource.rollback(self.xid()).await;
            return Err(self.not_active(status));
        }
        Ok(())
    }

    fn ensure_active(&self) -> Result<(), TransactionError> {
        match self.status() {
            Status::Active => Ok(()),
            other => Err(self.not_active(other)),
        }
    }

    fn not_active(&self, status: Status) -> TransactionError {
        TransactionError::NotActive {
            xid: self.xid().to_string(),
            status: status.as_str(),
        }
    }

    /// Move to `Completing` and hand back the enlisted resources.
    fn begin_completion(&self) -> Result<(Status, Vec<Arc<dyn XaResource>>), TransactionError> {
        let mut state = self.lock();
        match state.status {
            status @ (Status::Active | Status::MarkedRollback) => {
                state.status = Status::Completing;
                Ok((status, std::mem::take(&mut state.resources)))
            }
            other => Err(self.not_active(other)),
        }
    }

    fn finish(&self, status: Status) {
        self.lock().status = status;
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug, Clone, Default)]
pub struct TransactionManager;

impl TransactionManager {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Start a transaction that is not yet bound to any task.
    #[must_use]
    pub fn begin(&self) -> Transaction {
        Transaction::new()
    }

    /// Run `work` with a fresh transaction bound to the current task, then
    /// commit on `Ok` or roll back on `Err`.
    ///
    /// A commit failure replaces the work's result with the commit error.
    /// Nested calls start an independent transaction.
    pub async fn run<F, T, E>(&self, work: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: From<TransactionError>,
    {
        let tx = self.begin();
        tracing::debug!(xid = %tx.xid(), "transaction started");

        let mut guard = AbandonGuard(Some(tx.clone()));
        let outcome = CURRENT.scope(tx.clone(), work).await;
        guard.0 = None;

        match outcome {
            Ok(value) => {
                self.commit(&tx).await?;
                Ok(value)
            }
            Err(e) => {
                self.rollback(&tx).await;
                Err(e)
            }
        }
    }

    pub async fn commit(&self, tx: &Transaction) -> Result<(), TransactionError> {
        let (status, resources) = tx.begin_completion()?;
        let xid = tx.xid();

        let mut rollback_reason = (status == Status::MarkedRollback)
            .then(|| "transaction was marked rollback-only".to_string());

        for resource in &resources {
            if let Err(e) = resource.end(xid).await {
                rollback_reason.get_or_insert_with(|| {
                    format!("{} failed to end its branch: {e}", resource.resource_name())
                });
            }
        }

        if let Some(reason) = rollback_reason {
            rollback_all(xid, &resources).await;
            tx.finish(Status::RolledBack);
            tracing::info!(xid = %xid, reason = %reason, "transaction rolled back");
            return Err(TransactionError::RolledBack {
                xid: xid.to_string(),
                reason,
            });
        }

        if let [only] = resources.as_slice() {
            if let Err(e) = only.commit(xid, true).await {
                tx.finish(Status::RolledBack);
                tracing::warn!(xid = %xid, resource = only.resource_name(), error = %e, "one-phase commit failed");
                return Err(TransactionError::RolledBack {
                    xid: xid.to_string(),
                    reason: e.to_string(),
                });
            }
            tx.finish(Status::Committed);
            tracing::debug!(xid = %xid, "transaction committed (one phase)");
            return Ok(());
        }

        let mut prepared = Vec::with_capacity(resources.len());
        for resource in &resources {
            match resource.prepare(xid).await {
                Ok(Vote::Commit) => prepared.push(Arc::clone(resource)),
                Ok(Vote::ReadOnly) => {}
                Err(e) => {
                    let reason = format!("{} voted to roll back: {e}", resource.resource_name());
                    rollback_all(xid, &resources).await;
                    tx.finish(Status::RolledBack);
                    tracing::info!(xid = %xid, reason = %reason, "transaction rolled back");
                    return Err(TransactionError::RolledBack {
                        xid: xid.to_string(),
                        reason,
                    });
                }
            }
        }

        let mut failures = 0;
        for resource in &prepared {
            if let Err(e) = resource.commit(xid, false).await {
                failures += 1;
                tracing::error!(
                    xid = %xid,
                    resource = resource.resource_name(),
                    error = %e,
                    "prepared branch failed to commit"
                );
            }
        }

        tx.finish(Status::Committed);
        if failures > 0 {
            return Err(TransactionError::Heuristic {
                xid: xid.to_string(),
                failures,
            });
        }
        tracing::debug!(xid = %xid, resources = prepared.len(), "transaction committed (two phase)");
        Ok(())
    }

    /// Roll back every enlisted resource. Resource failures are logged, not
    /// returned: the transaction is over either way.
    pub async fn rollback(&self, tx: &Transaction) {
        let Ok((_, resources)) = tx.begin_completion() else {
            return;
        };
        roll_back(tx, &resources).await;
    }
}

/// Rolls the transaction back if `run` is dropped mid-work.
struct AbandonGuard(Option<Transaction>);

impl Drop for AbandonGuard {
    fn drop(&mut self) {
        let Some(tx) = self.0.take() else {
            return;
        };
        let Ok((_, resources)) = tx.begin_completion() else {
            return;
        };
        tracing::warn!(
            xid = %tx.xid(),
            resources = resources.len(),
            "transaction abandoned before completion"
        );
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { roll_back(&tx, &resources).await });
            }
            Err(_) => {
                tx.finish(Status::RolledBack);
                tracing::error!(xid = %tx.xid(), "no runtime to roll back abandoned transaction");
            }
        }
    }
}

async fn roll_back(tx: &Transaction, resources: &[Arc<dyn XaResource>]) {
    let xid = tx.xid();
    for resource in resources {
        let _ = resource.end(xid).await;
    }
    rollback_all(xid, resources).await;
    tx.finish(Status::RolledBack);
    tracing::debug!(xid = %xid, "transaction rolled back");
}

async fn rollback_all(xid: &Xid, resources: &[Arc<dyn XaResource>]) {
    for resource in resources {
        if let Err(e) = resource.rollback(xid).await {
            tracing::warn!(
                xid = %xid,
                resource = resource.resource_name(),
                error = %e,
                "branch rollback failed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[derive(Default)]
    struct RecordingResource {
        name: &'static str,
        fail_prepare: bool,
        read_only: bool,
        calls: Mutex<Vec<String>>,
    }

    impl RecordingResource {
        fn named(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                ..Self::default()
            })
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: &str) {
            self.calls.lock().unwrap().push(call.to_string());
        }
    }

    #[async_trait]
    impl XaResource for RecordingResource {
        fn resource_name(&self) -> &str {
            self.name
        }

        async fn start(&self, _xid: &Xid) -> Result<(), XaError> {
            self.record("start");
            Ok(())
        }

        async fn end(&self, _xid: &Xid) -> Result<(), XaError> {
            self.record("end");
            Ok(())
        }

        async fn prepare(&self, _xid: &Xid) -> Result<Vote, XaError> {
            self.record("prepare");
            if self.fail_prepare {
                Err(XaError::ResourceUnavailable("disk full".into()))
            } else if self.read_only {
                Ok(Vote::ReadOnly)
            } else {
                Ok(Vote::Commit)
            }
        }

        async fn commit(&self, _xid: &Xid, one_phase: bool) -> Result<(), XaError> {
            self.record(if one_phase { "commit-1pc" } else { "commit-2pc" });
            Ok(())
        }

        async fn rollback(&self, _xid: &Xid) -> Result<(), XaError> {
            self.record("rollback");
            Ok(())
        }
    }

    async fn enlist_current(resource: Arc<RecordingResource>) -> Result<(), TransactionError> {
        let tx = Transaction::current().expect("ambient transaction");
        tx.enlist(resource).await
    }

    #[tokio::test]
    async fn no_transaction_outside_scope() {
        assert!(Transaction::current().is_none());
    }

    #[tokio::test]
    async fn scope_exposes_current_transaction() {
        let tm = TransactionManager::new();
        let seen = tm
            .run(async { Ok::<_, TransactionError>(Transaction::current().map(|t| t.status())) })
            .await
            .unwrap();
        assert_eq!(seen, Some(Status::Active));
        assert!(Transaction::current().is_none());
    }

    #[tokio::test]
    async fn single_resource_commits_in_one_phase() {
        let tm = TransactionManager::new();
        let a = RecordingResource::named("a");

        tm.run(enlist_current(a.clone())).await.unwrap();

        assert_eq!(a.calls(), vec!["start", "end", "commit-1pc"]);
    }

    #[tokio::test]
    async fn two_resources_are_prepared_before_commit() {
        let tm = TransactionManager::new();
        let a = RecordingResource::named("a");
        let b = RecordingResource::named("b");

        tm.run(async {
            enlist_current(a.clone()).await?;
            enlist_current(b.clone()).await
        })
        .await
        .unwrap();

        assert_eq!(a.calls(), vec!["start", "end", "prepare", "commit-2pc"]);
        assert_eq!(b.calls(), vec!["start", "end", "prepare", "commit-2pc"]);
    }

    #[tokio::test]
    async fn failed_prepare_rolls_back_every_branch() {
        let tm = TransactionManager::new();
        let a = RecordingResource::named("a");
        let b = Arc::new(RecordingResource {
            name: "b",
            fail_prepare: true,
            ..RecordingResource::default()
        });

        let err = tm
            .run(async {
                enlist_current(a.clone()).await?;
                enlist_current(b.clone()).await
            })
            .await
            .unwrap_err();

        assert!(matches!(err, TransactionError::RolledBack { .. }));
        assert!(a.calls().contains(&"rollback".to_string()));
        assert!(!a.calls().iter().any(|c| c.starts_with("commit")));
        assert!(b.calls().contains(&"rollback".to_string()));
    }

    #[tokio::test]
    async fn read_only_branch_skips_phase_two() {
        let tm = TransactionManager::new();
        let a = RecordingResource::named("a");
        let b = Arc::new(RecordingResource {
            name: "b",
            read_only: true,
            ..RecordingResource::default()
        });

        tm.run(async {
            enlist_current(a.clone()).await?;
            enlist_current(b.clone()).await
        })
        .await
        .unwrap();

        assert_eq!(b.calls(), vec!["start", "end", "prepare"]);
        assert_eq!(a.calls().last().map(String::as_str), Some("commit-2pc"));
    }

    #[tokio::test]
    async fn failing_work_rolls_back() {
        let tm = TransactionManager::new();
        let a = RecordingResource::named("a");

        let err = tm
            .run(async {
                enlist_current(a.clone()).await?;
                Err::<(), _>(TransactionError::RolledBack {
                    xid: "n/a".into(),
                    reason: "caller failed".into(),
                })
            })
            .await
            .unwrap_err();

        assert!(matches!(err, TransactionError::RolledBack { .. }));
        assert_eq!(a.calls(), vec!["start", "end", "rollback"]);
    }

    #[tokio::test]
    async fn rollback_only_is_honoured_on_commit() {
        let tm = TransactionManager::new();
        let a = RecordingResource::named("a");

        let err = tm
            .run(async {
                enlist_current(a.clone()).await?;
                Transaction::current().unwrap().set_rollback_only();
                Ok::<_, TransactionError>(())
            })
            .await
            .unwrap_err();

        assert!(matches!(err, TransactionError::RolledBack { ref reason, .. } if reason.contains("rollback-only")));
        assert_eq!(a.calls(), vec!["start", "end", "rollback"]);
    }

    #[tokio::test]
    async fn enlisting_twice_commits_once() {
        let tm = TransactionManager::new();
        let a = RecordingResource::named("a");

        tm.run(async {
            enlist_current(a.clone()).await?;
            enlist_current(a.clone()).await
        })
        .await
        .unwrap();

        assert_eq!(a.calls(), vec!["start", "start", "end", "commit-1pc"]);
    }

    #[tokio::test]
    async fn dropped_run_rolls_back_enlisted_resources() {
        let tm = TransactionManager::new();
        let a = RecordingResource::named("a");
        let seen = Arc::new(Mutex::new(None));

        let work = tm.run(async {
            let tx = Transaction::current().expect("ambient transaction");
            *seen.lock().unwrap() = Some(tx.clone());
            tx.enlist(a.clone()).await?;
            std::future::pending::<Result<(), TransactionError>>().await
        });
        assert!(tokio::time::timeout(Duration::from_millis(20), work)
            .await
            .is_err());

        let tx = seen.lock().unwrap().clone().unwrap();
        for _ in 0..100 {
            if tx.status() == Status::RolledBack {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(tx.status(), Status::RolledBack);
        assert_eq!(a.calls(), vec!["start", "end", "rollback"]);
    }

    #[tokio::test]
    async fn completed_run_is_not_rolled_back_again() {
        let tm = TransactionManager::new();
        let a = RecordingResource::named("a");

        tm.run(enlist_current(a.clone())).await.unwrap();
        tokio::task::yield_now().await;

        assert_eq!(a.calls(), vec!["start", "end", "commit-1pc"]);
    }

    #[tokio::test]
    async fn completed_transaction_rejects_enlistment() {
        let tm = TransactionManager::new();
        let tx = tm.begin();
        tm.commit(&tx).await.unwrap();
        assert_eq!(tx.status(), Status::Committed);

        let err = tx.enlist(RecordingResource::named("late")).await.unwrap_err();
        assert!(matches!(err, TransactionError::NotActive { status: "committed", .. }));
    }
}
