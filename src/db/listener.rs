//! Transaction boundary listeners.
//!
//! Listeners observe commits, rollbacks and auto-commit changes on a
//! [`ConnectionWrapper`]. They never own the connection. A failing listener is
//! logged and skipped; it cannot abort the transaction it observed.

use crate::db::driver::DriverConnection;
use crate::db::wrapper::ConnectionWrapper;
use async_trait::async_trait;
use std::sync::{Arc, PoisonError, RwLock};

/// Error type returned by listener hooks.
pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

pub type ListenerResult = Result<(), ListenerError>;

/// Observer of transaction boundaries on a wrapped connection.
///
/// Every hook defaults to a no-op. Hooks receive the wrapper itself, so a
/// `before_commit` hook may still run statements inside the transaction.
#[async_trait]
pub trait ConnectionListener<C: DriverConnection>: Send + Sync {
    /// Name used when logging a failed hook.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    async fn before_commit(&self, _conn: &ConnectionWrapper<C>) -> ListenerResult {
        Ok(())
    }

    async fn after_commit(&self, _conn: &ConnectionWrapper<C>) -> ListenerResult {
        Ok(())
    }

    async fn before_rollback(&self, _conn: &ConnectionWrapper<C>) -> ListenerResult {
        Ok(())
    }

    async fn after_rollback(&self, _conn: &ConnectionWrapper<C>) -> ListenerResult {
        Ok(())
    }

    async fn auto_commit_changed(
        &self,
        _auto_commit: bool,
        _conn: &ConnectionWrapper<C>,
    ) -> ListenerResult {
        Ok(())
    }
}

/// Points at which listeners are notified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerEvent {
    BeforeCommit,
    AfterCommit,
    BeforeRollback,
    AfterRollback,
    AutoCommitChanged(bool),
}

impl ListenerEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BeforeCommit => "before_commit",
            Self::AfterCommit => "after_commit",
            Self::BeforeRollback => "before_rollback",
            Self::AfterRollback => "after_rollback",
            Self::AutoCommitChanged(_) => "auto_commit_changed",
        }
    }

    /// Invoke the hook matching this event.
    pub(crate) async fn dispatch<C: DriverConnection>(
        self,
        listener: &dyn ConnectionListener<C>,
        conn: &ConnectionWrapper<C>,
    ) -> ListenerResult {
        match self {
            Self::BeforeCommit => listener.before_commit(conn).await,
            Self::AfterCommit => listener.after_commit(conn).await,
            Self::BeforeRollback => listener.before_rollback(conn).await,
            Self::AfterRollback => listener.after_rollback(conn).await,
            Self::AutoCommitChanged(value) => listener.auto_commit_changed(value, conn).await,
        }
    }
}

/// An ordered, duplicate-tolerant list of listeners.
///
/// Cloning shares the underlying list, so one registry can be handed to every
/// wrapper as the process-wide "general" listeners.
pub struct ListenerRegistry<C: DriverConnection> {
    listeners: Arc<RwLock<Vec<Arc<dyn ConnectionListener<C>>>>>,
}

impl<C: DriverConnection> ListenerRegistry<C> {
    pub fn new() -> Self {
        Self {
            listeners: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub fn add(&self, listener: Arc<dyn ConnectionListener<C>>) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    /// Remove the first registration of `listener` (compared by identity).
    /// Returns false if it was not registered.
    pub fn remove(&self, listener: &Arc<dyn ConnectionListener<C>>) -> bool {
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        match listeners.iter().position(|l| Arc::ptr_eq(l, listener)) {
            Some(idx) => {
                listeners.remove(idx);
                true
            }
            None => false,
        }
    }

    pub fn clear(&self) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn len(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the current registrations, in order. Hooks run against the
    /// snapshot so the lock is never held across an await.
    pub fn snapshot(&self) -> Vec<Arc<dyn ConnectionListener<C>>> {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl<C: DriverConnection> Clone for ListenerRegistry<C> {
    fn clone(&self) -> Self {
        Self {
            listeners: Arc::clone(&self.listeners),
        }
    }
}

impl<C: DriverConnection> Default for ListenerRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}
