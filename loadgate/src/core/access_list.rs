//! Allow/deny list snapshots
//!
//! A list is an immutable [`ListSnapshot`] behind an `Arc`. Refreshing builds
//! a complete new snapshot and swaps the pointer, so readers see either the
//! old list or the new one, never a mix.

use super::ConfigError;
use super::source::{ListSource, SourceError};
use super::task::BackgroundTask;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[cfg(feature = "ahash")]
use ahash::AHashSet as HashSet;
#[cfg(not(feature = "ahash"))]
use std::collections::HashSet;

/// How a list is applied to incoming identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListKind {
    /// Only listed identifiers are admitted
    Allow,
    /// Listed identifiers are always rejected
    Deny,
}

impl ListKind {
    /// Whether an identifier with the given membership passes this list
    pub fn permits(self, listed: bool) -> bool {
        match self {
            ListKind::Allow => listed,
            ListKind::Deny => !listed,
        }
    }
}

impl fmt::Display for ListKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListKind::Allow => write!(f, "allow-list"),
            ListKind::Deny => write!(f, "deny-list"),
        }
    }
}

/// Immutable set of client identifiers
#[derive(Debug, Default)]
pub struct ListSnapshot {
    entries: HashSet<String>,
}

impl ListSnapshot {
    pub fn new<I: IntoIterator<Item = String>>(entries: I) -> Self {
        ListSnapshot {
            entries: entries.into_iter().collect(),
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A list of one kind with its current snapshot
pub struct AccessList {
    kind: ListKind,
    snapshot: RwLock<Arc<ListSnapshot>>,
    refreshes: AtomicU64,
    failures: AtomicU64,
}

impl AccessList {
    pub fn new(kind: ListKind, entries: Vec<String>) -> Self {
        AccessList {
            kind,
            snapshot: RwLock::new(Arc::new(ListSnapshot::new(entries))),
            refreshes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    pub fn kind(&self) -> ListKind {
        self.kind
    }

    /// Whether `id` passes this list
    pub fn permits(&self, id: &str) -> bool {
        self.kind.permits(self.snapshot.read().contains(id))
    }

    /// The snapshot currently in effect
    pub fn snapshot(&self) -> Arc<ListSnapshot> {
        Arc::clone(&self.snapshot.read())
    }

    /// Swap in a new snapshot built from `entries`
    pub fn replace(&self, entries: Vec<String>) {
        let next = Arc::new(ListSnapshot::new(entries));
        *self.snapshot.write() = next;
    }

    /// Fetch from `source` and, only on success, replace the snapshot
    ///
    /// Returns the size of the new snapshot.
    pub async fn refresh_from(&self, source: &dyn ListSource) -> Result<usize, SourceError> {
        match source.fetch().await {
            Ok(entries) => {
                self.replace(entries);
                self.refreshes.fetch_add(1, Ordering::Relaxed);
                Ok(self.snapshot.read().len())
            }
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    /// Successful refreshes since creation
    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::Relaxed)
    }

    /// Failed refreshes since creation
    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Start re-fetching the list from `source` every `period`
    ///
    /// A failed fetch is logged and counted; the previous snapshot stays in
    /// effect and the loop keeps going.
    pub(crate) fn start_refresh(
        self: &Arc<Self>,
        source: Arc<dyn ListSource>,
        period: Duration,
    ) -> Result<BackgroundTask, ConfigError> {
        let list = Arc::clone(self);
        let name = match self.kind {
            ListKind::Allow => "allow-list refresh",
            ListKind::Deny => "deny-list refresh",
        };

        BackgroundTask::spawn(name, move |mut stop| async move {
            loop {
                tokio::select! {
                    biased;
                    _ = &mut stop => break,
                    _ = refresh_cycle(&list, source.as_ref(), period) => {}
                }
            }
            tracing::debug!(list = %list.kind, "refresh loop stopped");
        })
    }
}

async fn refresh_cycle(list: &AccessList, source: &dyn ListSource, period: Duration) {
    tokio::time::sleep(period).await;
    match list.refresh_from(source).await {
        Ok(len) => tracing::debug!(list = %list.kind, entries = len, "list refreshed"),
        Err(e) => tracing::warn!(
            list = %list.kind,
            source = %source.describe(),
            "list refresh failed, keeping previous snapshot: {}",
            e
        ),
    }
}
