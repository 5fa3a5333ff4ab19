//! Named upgrade listeners and the registry holding them.
//!
//! A [`ListenerRegistry`] is the connection-upgrade event source of a
//! process server. Every registered listener sees every upgrade event, in
//! registration order, with no short-circuiting: whoever wants the
//! connection must claim it on the [`UpgradeSocket`].

use super::socket::UpgradeSocket;
use crate::error::ListenerError;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// The raw incoming request of an upgrade event (headers only).
pub type UpgradeRequest = http::Request<()>;

/// Callback attached to the upgrade event source.
pub type UpgradeListener = Arc<dyn Fn(&UpgradeRequest, &UpgradeSocket) + Send + Sync>;

/// Wrap a closure as an [`UpgradeListener`].
pub fn listener<F>(f: F) -> UpgradeListener
where
    F: Fn(&UpgradeRequest, &UpgradeSocket) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Registry-assigned listener identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One registered listener.
#[derive(Clone)]
pub struct ListenerEntry {
    pub id: ListenerId,
    pub name: String,
    pub listener: UpgradeListener,
}

impl fmt::Debug for ListenerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerEntry")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Ordered set of upgrade listeners.
#[derive(Default)]
pub struct ListenerRegistry {
    entries: Mutex<Vec<ListenerEntry>>,
    next_id: AtomicU64,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a listener; it runs after every listener already registered.
    pub fn add(&self, listener: UpgradeListener, name: impl Into<String>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let name = name.into();
        tracing::trace!(%id, name = %name, "upgrade listener added");
        self.entries.lock().push(ListenerEntry { id, name, listener });
        id
    }

    /// Remove a listener, returning its callback.
    pub fn remove(&self, id: ListenerId) -> Result<UpgradeListener, ListenerError> {
        let mut entries = self.entries.lock();
        let pos = entries
            .iter()
            .position(|e| e.id == id)
            .ok_or(ListenerError::NotFound(id))?;
        let entry = entries.remove(pos);
        tracing::trace!(%id, name = %entry.name, "upgrade listener removed");
        Ok(entry.listener)
    }

    /// Swap the callback of listener `id` in place. Id, name and position
    /// are kept. Returns the previous callback.
    pub fn replace<F>(&self, id: ListenerId, wrap: F) -> Result<UpgradeListener, ListenerError>
    where
        F: FnOnce(UpgradeListener) -> UpgradeListener,
    {
        let mut entries = self.entries.lock();
        let entry = entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or(ListenerError::NotFound(id))?;
        let previous = Arc::clone(&entry.listener);
        entry.listener = wrap(Arc::clone(&previous));
        tracing::trace!(%id, name = %entry.name, "upgrade listener replaced");
        Ok(previous)
    }

    /// Snapshot of the registered listeners, in invocation order.
    pub fn list(&self) -> Vec<ListenerEntry> {
        self.entries.lock().clone()
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.lock().iter().map(|e| e.name.clone()).collect()
    }

    pub fn contains(&self, id: ListenerId) -> bool {
        self.entries.lock().iter().any(|e| e.id == id)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Dispatch one upgrade event to every listener.
    ///
    /// Listeners run over a snapshot taken before the first call, so a
    /// listener may add or remove listeners without deadlocking. Returns the
    /// number of listeners invoked.
    pub fn emit(&self, request: &UpgradeRequest, socket: &UpgradeSocket) -> usize {
        let snapshot = self.list();
        for entry in &snapshot {
            (entry.listener)(request, socket);
        }
        snapshot.len()
    }
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.list()).finish()
    }
}
