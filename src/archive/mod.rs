//! Shared record/replay archive.
//!
//! # Data Flow
//! ```text
//! pipeline: lookup_or_insert(request)
//!     → Ready(bytes)      serve from the archive
//!     → Pending(index)    wait_for_response(index) on that entry's condvar
//!     → Inserted(index)   forward to origin ... add_response(bytes, index)
//! ```
//!
//! # Design Decisions
//! - Append-only: an index stays valid for the life of the process
//! - One coarse lock over the sequence for appends and scans
//! - One mutex + condvar per entry, used only for Pending → Ready;
//!   the sequence lock is never held while waiting
//! - Requests are matched with the strict policy
//! - An entry whose forwarding connection died is abandoned: it wakes its
//!   waiters and no longer matches, so the next identical request is
//!   forwarded afresh

pub mod record;

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;

use crate::http::message::HttpMessage;
use crate::matching::{MatchOutcome, MatchPolicy};
use crate::observability::metrics;

pub use record::{ArchivedRecord, RecordStore};

/// Contract violations and bounded-wait expiry.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive entry {index} already has a response")]
    AlreadyResolved { index: usize },

    #[error("no archive entry at index {index}")]
    UnknownIndex { index: usize },

    #[error("no stored response matches the request")]
    NoResponse,

    #[error("archive entry {index} still pending after {waited:?}")]
    WaitTimeout { index: usize, waited: Duration },

    #[error("archive entry {index} was abandoned before its response arrived")]
    Abandoned { index: usize },
}

/// Response state of an entry. Leaves Pending once, for Ready or Abandoned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseSlot {
    Pending,
    Ready(Bytes),
    /// The forwarding connection ended without a response.
    Abandoned,
}

impl ResponseSlot {
    pub fn is_pending(&self) -> bool {
        matches!(self, ResponseSlot::Pending)
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, ResponseSlot::Ready(_))
    }
}

/// Classification of a request against the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// A stored response exists.
    Ready(Bytes),
    /// An identical request is in flight at this index.
    Pending(usize),
    /// Novel request, appended at this index with a pending slot.
    Inserted(usize),
}

#[derive(Debug)]
struct Entry {
    request: HttpMessage,
    slot: Mutex<ResponseSlot>,
    resolved: Condvar,
}

impl Entry {
    fn new(request: HttpMessage) -> Self {
        Self {
            request,
            slot: Mutex::new(ResponseSlot::Pending),
            resolved: Condvar::new(),
        }
    }

    fn slot(&self) -> MutexGuard<'_, ResponseSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Process-wide store of (request, response-or-pending) entries.
///
/// Built once by the server and shared into every connection via `Arc`.
#[derive(Debug, Default)]
pub struct Archive {
    entries: Mutex<Vec<Arc<Entry>>>,
}

impl Archive {
    pub fn new() -> Self {
        Self::default()
    }

    // Entries are only ever appended whole, so a poisoned lock still
    // guards a consistent sequence.
    fn entries(&self) -> MutexGuard<'_, Vec<Arc<Entry>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn entry(&self, index: usize) -> Result<Arc<Entry>, ArchiveError> {
        self.entries()
            .get(index)
            .cloned()
            .ok_or(ArchiveError::UnknownIndex { index })
    }

    fn matches(entry: &Entry, request: &HttpMessage) -> bool {
        MatchPolicy::Strict.compare(request, &entry.request) == MatchOutcome::Exact
    }

    /// Ready beats Pending; abandoned entries are skipped.
    fn find(entries: &[Arc<Entry>], request: &HttpMessage) -> Option<Lookup> {
        let mut pending = None;
        for (index, entry) in entries.iter().enumerate() {
            if !Self::matches(entry, request) {
                continue;
            }
            match &*entry.slot() {
                ResponseSlot::Ready(bytes) => return Some(Lookup::Ready(bytes.clone())),
                ResponseSlot::Pending => {
                    pending.get_or_insert(index);
                }
                ResponseSlot::Abandoned => {}
            }
        }
        pending.map(Lookup::Pending)
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Append a request with a pending slot and return its index.
    pub fn add_request(&self, request: HttpMessage) -> usize {
        let mut entries = self.entries();
        entries.push(Arc::new(Entry::new(request)));
        metrics::record_archive_size(entries.len());
        entries.len() - 1
    }

    /// Resolve the slot at `index` and wake everyone waiting on it.
    pub fn add_response(&self, response: Bytes, index: usize) -> Result<(), ArchiveError> {
        let entry = self.entry(index)?;
        {
            let mut slot = entry.slot();
            match *slot {
                ResponseSlot::Pending => *slot = ResponseSlot::Ready(response),
                ResponseSlot::Ready(_) => return Err(ArchiveError::AlreadyResolved { index }),
                ResponseSlot::Abandoned => return Err(ArchiveError::Abandoned { index }),
            }
        }
        entry.resolved.notify_all();
        Ok(())
    }

    /// Is an identical request still waiting for its response?
    pub fn request_pending(&self, request: &HttpMessage) -> bool {
        self.entries()
            .iter()
            .any(|e| Self::matches(e, request) && e.slot().is_pending())
    }

    /// Is a response stored for an identical request?
    pub fn have_response(&self, request: &HttpMessage) -> bool {
        self.entries()
            .iter()
            .any(|e| Self::matches(e, request) && e.slot().is_ready())
    }

    /// Stored response for an identical request. Call after `have_response`.
    pub fn corresponding_response(&self, request: &HttpMessage) -> Result<Bytes, ArchiveError> {
        self.entries()
            .iter()
            .filter(|e| Self::matches(e, request))
            .find_map(|e| match &*e.slot() {
                ResponseSlot::Ready(bytes) => Some(bytes.clone()),
                _ => None,
            })
            .ok_or(ArchiveError::NoResponse)
    }

    /// Index of the first identical request.
    pub fn get_index(&self, request: &HttpMessage) -> Option<usize> {
        self.entries().iter().position(|e| Self::matches(e, request))
    }

    /// Classify `request` and append it if novel, under one sequence lock.
    pub fn lookup_or_insert(&self, request: &HttpMessage) -> Lookup {
        let mut entries = self.entries();
        if let Some(found) = Self::find(&entries, request) {
            return found;
        }
        entries.push(Arc::new(Entry::new(request.clone())));
        metrics::record_archive_size(entries.len());
        Lookup::Inserted(entries.len() - 1)
    }

    /// Classify `request` without appending it: `None` if it is novel.
    pub fn lookup(&self, request: &HttpMessage) -> Option<Lookup> {
        Self::find(&self.entries(), request)
    }

    /// Give up on a pending entry: waiters wake with `Abandoned` and the
    /// entry stops matching. Returns false if the slot was not pending.
    pub fn abandon(&self, index: usize) -> Result<bool, ArchiveError> {
        let entry = self.entry(index)?;
        {
            let mut slot = entry.slot();
            if !slot.is_pending() {
                return Ok(false);
            }
            *slot = ResponseSlot::Abandoned;
        }
        entry.resolved.notify_all();
        Ok(true)
    }

    /// Current state of the slot at `index`.
    pub fn response(&self, index: usize) -> Result<ResponseSlot, ArchiveError> {
        Ok(self.entry(index)?.slot().clone())
    }

    /// Block until the slot at `index` is ready, for at most `timeout`.
    ///
    /// Only the entry's own lock is held while blocked.
    pub fn wait_for_response(&self, index: usize, timeout: Duration) -> Result<Bytes, ArchiveError> {
        let entry = self.entry(index)?;
        let slot = entry.slot();
        let (slot, _) = entry
            .resolved
            .wait_timeout_while(slot, timeout, |s| s.is_pending())
            .unwrap_or_else(PoisonError::into_inner);
        match &*slot {
            ResponseSlot::Ready(bytes) => Ok(bytes.clone()),
            ResponseSlot::Pending => Err(ArchiveError::WaitTimeout {
                index,
                waited: timeout,
            }),
            ResponseSlot::Abandoned => Err(ArchiveError::Abandoned { index }),
        }
    }

    /// Wake every thread waiting on `index`.
    pub fn signal(&self, index: usize) -> Result<(), ArchiveError> {
        self.entry(index)?.resolved.notify_all();
        Ok(())
    }

    pub fn first_response_ready(&self) -> bool {
        self.entries()
            .first()
            .is_some_and(|e| e.slot().is_ready())
    }

    pub fn first_response(&self) -> Result<Bytes, ArchiveError> {
        match self.response(0)? {
            ResponseSlot::Ready(bytes) => Ok(bytes),
            _ => Err(ArchiveError::NoResponse),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::message::Header;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Instant;

    fn get(target: &str) -> HttpMessage {
        HttpMessage::new(format!("GET {target} HTTP/1.1"), vec![Header::new("Host", "x")], vec![])
    }

    #[test]
    fn pending_until_response_added() {
        let archive = Archive::new();
        let req = get("/a");
        assert!(!archive.request_pending(&req));

        let index = archive.add_request(req.clone());
        assert!(archive.request_pending(&req));
        assert!(!archive.have_response(&req));
        assert_eq!(archive.get_index(&req), Some(index));

        archive.add_response(Bytes::from_static(b"resp"), index).unwrap();
        assert!(!archive.request_pending(&req));
        assert!(archive.have_response(&req));
        assert_eq!(archive.corresponding_response(&req).unwrap(), "resp");
    }

    #[test]
    fn response_set_at_most_once() {
        let archive = Archive::new();
        let index = archive.add_request(get("/a"));
        archive.add_response(Bytes::from_static(b"one"), index).unwrap();

        let err = archive.add_response(Bytes::from_static(b"two"), index).unwrap_err();
        assert!(matches!(err, ArchiveError::AlreadyResolved { index: 0 }));
        assert_eq!(archive.corresponding_response(&get("/a")).unwrap(), "one");
    }

    #[test]
    fn contract_violations() {
        let archive = Archive::new();
        assert!(matches!(
            archive.add_response(Bytes::new(), 3),
            Err(ArchiveError::UnknownIndex { index: 3 })
        ));
        assert!(matches!(
            archive.corresponding_response(&get("/missing")),
            Err(ArchiveError::NoResponse)
        ));
        assert!(archive.first_response().is_err());
        assert!(!archive.first_response_ready());
    }

    #[test]
    fn lookup_or_insert_classifies() {
        let archive = Archive::new();
        let req = get("/a");
        assert_eq!(archive.lookup_or_insert(&req), Lookup::Inserted(0));
        assert_eq!(archive.lookup_or_insert(&req), Lookup::Pending(0));
        archive.add_response(Bytes::from_static(b"r"), 0).unwrap();
        assert_eq!(archive.lookup_or_insert(&req), Lookup::Ready(Bytes::from_static(b"r")));
        assert_eq!(archive.len(), 1);
        assert!(archive.first_response_ready());
        assert_eq!(archive.first_response().unwrap(), "r");
    }

    #[test]
    fn waiter_wakes_on_response() {
        let archive = Arc::new(Archive::new());
        let req = get("/slow");
        let index = archive.add_request(req.clone());

        let waiter = {
            let archive = Arc::clone(&archive);
            let req = req.clone();
            thread::spawn(move || {
                let bytes = archive.wait_for_response(index, Duration::from_secs(10)).unwrap();
                (bytes, archive.have_response(&req), archive.corresponding_response(&req).unwrap())
            })
        };

        thread::sleep(Duration::from_millis(50));
        archive.add_response(Bytes::from_static(b"done"), index).unwrap();

        let (bytes, have, stored) = waiter.join().unwrap();
        assert_eq!(bytes, "done");
        assert!(have);
        assert_eq!(stored, "done");
    }

    #[test]
    fn wait_is_bounded() {
        let archive = Archive::new();
        let index = archive.add_request(get("/never"));
        let start = Instant::now();
        let err = archive.wait_for_response(index, Duration::from_millis(50)).unwrap_err();
        assert!(matches!(err, ArchiveError::WaitTimeout { index: 0, .. }));
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn blocked_waiter_does_not_stall_other_entries() {
        let archive = Arc::new(Archive::new());
        let blocked = archive.add_request(get("/blocked"));

        let waiter = {
            let archive = Arc::clone(&archive);
            thread::spawn(move || archive.wait_for_response(blocked, Duration::from_secs(10)))
        };
        thread::sleep(Duration::from_millis(20));

        let (tx, rx) = mpsc::channel();
        {
            let archive = Arc::clone(&archive);
            thread::spawn(move || {
                let index = archive.add_request(get("/other"));
                archive.add_response(Bytes::from_static(b"other"), index).unwrap();
                let have = archive.have_response(&get("/other"));
                tx.send(have).unwrap();
            });
        }
        assert!(rx.recv_timeout(Duration::from_secs(2)).unwrap());

        archive.add_response(Bytes::from_static(b"late"), blocked).unwrap();
        assert_eq!(waiter.join().unwrap().unwrap(), "late");
    }

    #[test]
    fn abandoned_entry_wakes_waiters_and_stops_matching() {
        let archive = Arc::new(Archive::new());
        let req = get("/lost");
        let Lookup::Inserted(index) = archive.lookup_or_insert(&req) else {
            panic!("expected a fresh entry");
        };

        let waiter = {
            let archive = Arc::clone(&archive);
            thread::spawn(move || archive.wait_for_response(index, Duration::from_secs(10)))
        };
        thread::sleep(Duration::from_millis(20));

        assert!(archive.abandon(index).unwrap());
        assert!(!archive.abandon(index).unwrap());
        assert!(matches!(
            waiter.join().unwrap(),
            Err(ArchiveError::Abandoned { index: 0 })
        ));

        assert!(!archive.request_pending(&req));
        assert!(!archive.have_response(&req));
        assert_eq!(archive.lookup(&req), None);
        assert_eq!(archive.lookup_or_insert(&req), Lookup::Inserted(1));
        assert!(matches!(
            archive.add_response(Bytes::from_static(b"late"), index),
            Err(ArchiveError::Abandoned { index: 0 })
        ));
    }

    #[test]
    fn abandon_leaves_answered_entries_alone() {
        let archive = Archive::new();
        let index = archive.add_request(get("/a"));
        archive.add_response(Bytes::from_static(b"r"), index).unwrap();
        assert!(!archive.abandon(index).unwrap());
        assert_eq!(archive.lookup(&get("/a")), Some(Lookup::Ready(Bytes::from_static(b"r"))));
    }
}
