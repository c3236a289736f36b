//! Row identity resolution.
//!
//! The host never exposes a row's thread id. Rows are fingerprinted by their visible
//! metadata and the fingerprint is looked up in a process-wide cache; when that is not
//! conclusive the row is probed: the host is made to reveal the row's navigation URL,
//! and the previous cursor position is restored afterwards.
//!
//! A fingerprint that ever maps to two different threads is marked ambiguous for good.
//! Rows with an ambiguous fingerprint are probed every time they are resolved.

mod fingerprint;
mod navigation;

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::host::{Host, NodeRef};

pub use self::fingerprint::Fingerprint;
pub use self::navigation::thread_id_from_url;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadId(String);

impl ThreadId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ThreadId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// One entry of the host's own thread list data.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadMetadata {
    pub subject: String,
    pub time_label: String,
    pub participants: String,
    pub thread_id: ThreadId,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum CacheEntry {
    Resolved {
        thread_id: ThreadId,
        /// Last row that resolved through this entry.
        source: Option<NodeRef>,
    },
    Ambiguous,
}

enum Lookup {
    Hit(ThreadId),
    Probe,
}

/// Marks a probe in flight; probes must never overlap.
struct ProbeGuard {
    active: Rc<Cell<bool>>,
}

impl ProbeGuard {
    fn enter(active: &Rc<Cell<bool>>) -> Option<Self> {
        if active.replace(true) {
            return None;
        }
        Some(Self {
            active: Rc::clone(active),
        })
    }
}

impl Drop for ProbeGuard {
    fn drop(&mut self) {
        self.active.set(false);
    }
}

pub struct IdentityResolver {
    host: Rc<dyn Host>,
    diagnostics: Diagnostics,
    cache: RefCell<HashMap<Fingerprint, CacheEntry>>,
    probing: Rc<Cell<bool>>,
    probes: Cell<usize>,
}

impl IdentityResolver {
    pub fn new(host: Rc<dyn Host>, diagnostics: Diagnostics) -> Self {
        Self {
            host,
            diagnostics,
            cache: RefCell::new(HashMap::new()),
            probing: Rc::new(Cell::new(false)),
            probes: Cell::new(0),
        }
    }

    /// Thread id of `row`, probing the host when the cache is not conclusive.
    ///
    /// `None` means "not known yet" and is not an error; callers poll again later.
    pub fn resolve(&self, row: NodeRef) -> Option<ThreadId> {
        let fingerprint = match self.host.metadata(row) {
            Ok(metadata) => Fingerprint::from_metadata(&metadata),
            Err(error) => {
                self.diagnostics
                    .report_async(Diagnostic::ExtractionFailed(error));
                return None;
            }
        };
        if let Lookup::Hit(thread_id) = self.lookup(&fingerprint, row, true) {
            return Some(thread_id);
        }
        let thread_id = self.probe(row)?;
        self.store(fingerprint, thread_id.clone(), Some(row));
        Some(thread_id)
    }

    /// Fast path only: never probes and never touches the host beyond reading markup.
    pub fn cached(&self, row: NodeRef) -> Option<ThreadId> {
        let metadata = self.host.metadata(row).ok()?;
        match self.lookup(&Fingerprint::from_metadata(&metadata), row, false) {
            Lookup::Hit(thread_id) => Some(thread_id),
            Lookup::Probe => None,
        }
    }

    fn lookup(&self, fingerprint: &Fingerprint, row: NodeRef, adopt: bool) -> Lookup {
        let (thread_id, source) = match self.cache.borrow().get(fingerprint) {
            Some(CacheEntry::Resolved { thread_id, source }) => (thread_id.clone(), *source),
            Some(CacheEntry::Ambiguous) | None => return Lookup::Probe,
        };
        if let Some(source) = source {
            // Two live rows sharing a fingerprint: the cache cannot tell them apart.
            if source != row && self.host.is_connected(source) && self.host.is_row(source) {
                return Lookup::Probe;
            }
        }
        if adopt {
            if let Some(CacheEntry::Resolved { source, .. }) =
                self.cache.borrow_mut().get_mut(fingerprint)
            {
                *source = Some(row);
            }
        }
        Lookup::Hit(thread_id)
    }

    /// Snapshot the cursor, probe `row`, then put the cursor back. The restore step runs
    /// even when the probe revealed nothing.
    fn probe(&self, row: NodeRef) -> Option<ThreadId> {
        let Some(_guard) = ProbeGuard::enter(&self.probing) else {
            log::debug!("probe of {row:?} skipped, another probe is in flight");
            return None;
        };
        let snapshot = self.host.current_selection(row);
        let url = self.host.probe_navigation(row);
        if let Some(previous) = snapshot {
            self.host.probe_navigation(previous);
        }
        self.probes.set(self.probes.get() + 1);
        let thread_id = url.as_deref().and_then(thread_id_from_url);
        if thread_id.is_none() {
            log::debug!("probe of {row:?} revealed no thread id (url: {url:?})");
        }
        thread_id.map(ThreadId::new)
    }

    fn store(&self, fingerprint: Fingerprint, thread_id: ThreadId, source: Option<NodeRef>) {
        let mut cache = self.cache.borrow_mut();
        let conflicting = match cache.get(&fingerprint) {
            None => None,
            Some(CacheEntry::Resolved { thread_id: known, .. }) if *known != thread_id => {
                Some(known.clone())
            }
            Some(_) => return,
        };
        match conflicting {
            None => {
                cache.insert(fingerprint, CacheEntry::Resolved { thread_id, source });
            }
            Some(known) => {
                log::debug!(
                    "fingerprint {fingerprint} maps to {known} and {thread_id}, marking ambiguous"
                );
                cache.insert(fingerprint, CacheEntry::Ambiguous);
            }
        }
    }

    /// Learn an identity from the host's own thread list data.
    pub fn record_thread(&self, thread: ThreadMetadata) {
        let fingerprint =
            Fingerprint::new(&thread.subject, &thread.time_label, &thread.participants);
        self.store(fingerprint, thread.thread_id, None);
    }

    pub fn ingest(&self, threads: impl IntoIterator<Item = ThreadMetadata>) {
        for thread in threads {
            self.record_thread(thread);
        }
    }

    pub fn is_ambiguous(&self, fingerprint: &Fingerprint) -> bool {
        matches!(
            self.cache.borrow().get(fingerprint),
            Some(CacheEntry::Ambiguous)
        )
    }

    pub fn cached_len(&self) -> usize {
        self.cache.borrow().len()
    }

    /// Number of completed probes (a restore is part of its probe).
    pub fn probe_count(&self) -> usize {
        self.probes.get()
    }
}
