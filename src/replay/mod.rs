//! Offline replay: answer one request from a directory of recordings.
//!
//! # Data Flow
//! ```text
//! RequestContext (env)
//!     → RecordStore::list (sorted file names)
//!     → MatchPolicy::Fuzzy, file by file
//!     → first Exact, else first Possible
//!     → stored response bytes
//! ```
//!
//! # Design Decisions
//! - Files are scanned in name order so a replay is reproducible
//! - Loading stops at the first exact match
//! - An undecodable file is skipped with a warning; an unreadable one
//!   fails the replay
//! - A fallback answer is a success, reported as ambiguous

pub mod context;

use thiserror::Error;

use crate::archive::record::{ArchivedRecord, RecordStore, StoreError};
use crate::matching::{select, MatchPolicy, Selection};

pub use context::RequestContext;

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("environment variable {0} is not set")]
    MissingVariable(&'static str),

    #[error("environment variable {name} has an unusable value {value:?}")]
    InvalidVariable { name: &'static str, value: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("can't find: {method} {uri}")]
    NoMatch { method: String, uri: String },
}

/// How the answer was chosen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayOutcome {
    Exact(ArchivedRecord),
    /// Fallback: same resource, different query string.
    Ambiguous(ArchivedRecord),
}

impl ReplayOutcome {
    pub fn record(&self) -> &ArchivedRecord {
        match self {
            ReplayOutcome::Exact(record) | ReplayOutcome::Ambiguous(record) => record,
        }
    }

    pub fn is_ambiguous(&self) -> bool {
        matches!(self, ReplayOutcome::Ambiguous(_))
    }

    /// The stored response, byte for byte.
    pub fn response_bytes(&self) -> Vec<u8> {
        self.record().response.to_bytes()
    }
}

/// Find the recorded exchange that answers `context`.
pub fn run(
    context: &RequestContext,
    store: &RecordStore,
    policy: &MatchPolicy,
) -> Result<ReplayOutcome, ReplayError> {
    let incoming = context.to_message();
    let files = store.list()?;
    tracing::debug!(
        dir = %store.dir().display(),
        files = files.len(),
        request = %incoming.first_line(),
        "Scanning recordings"
    );

    let mut failure = None;
    let records = files
        .iter()
        .map_while(|path| match RecordStore::load(path) {
            Ok(record) => Some(Some(record)),
            Err(e @ StoreError::Decode { .. }) => {
                tracing::warn!(error = %e, "Skipping unreadable recording");
                Some(None)
            }
            Err(e) => {
                failure = Some(e);
                None
            }
        })
        .flatten();
    let selection = select(
        policy,
        &incoming,
        Some(context.resource()),
        records,
        |record| &record.request,
    );
    if let Some(e) = failure {
        return Err(e.into());
    }

    match selection {
        Selection::Exact(record) => Ok(ReplayOutcome::Exact(record)),
        Selection::Possible(record) => {
            tracing::warn!(
                uri = %context.uri,
                chosen = %record.request.first_line(),
                "No exact match, answering with a recording of the same resource"
            );
            Ok(ReplayOutcome::Ambiguous(record))
        }
        Selection::None => Err(ReplayError::NoMatch {
            method: context.method.clone(),
            uri: context.uri.clone(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::message::{Header, HttpMessage};

    fn record(target: &str, host: &str, body: &str) -> ArchivedRecord {
        ArchivedRecord {
            request: HttpMessage::new(
                format!("GET {target} HTTP/1.1"),
                vec![Header::new("Host", host)],
                vec![],
            ),
            response: HttpMessage::new(
                "HTTP/1.1 200 OK",
                vec![Header::new("Content-Length", body.len().to_string())],
                body.as_bytes().to_vec(),
            ),
        }
    }

    fn context(uri: &str, host: &str) -> RequestContext {
        RequestContext::from_vars([
            ("REQUEST_METHOD", "GET"),
            ("REQUEST_URI", uri),
            ("SERVER_PROTOCOL", "HTTP/1.1"),
            ("HTTP_HOST", host),
        ])
        .unwrap()
    }

    #[test]
    fn exact_match_wins_over_earlier_possible() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::new(dir.path());
        store.save(&record("/page?v=1", "a.com", "query")).unwrap();
        store.save(&record("/page", "a.com", "plain")).unwrap();

        let outcome = run(&context("/page", "a.com"), &store, &MatchPolicy::fuzzy()).unwrap();
        assert!(!outcome.is_ambiguous());
        assert_eq!(outcome.record().response.body(), b"plain");
    }

    #[test]
    fn disagreeing_host_is_not_a_match() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::new(dir.path());
        store.save(&record("/page", "b.com", "other")).unwrap();

        let err = run(&context("/page", "a.com"), &store, &MatchPolicy::fuzzy()).unwrap_err();
        assert!(matches!(err, ReplayError::NoMatch { ref uri, .. } if uri == "/page"));
        assert_eq!(err.to_string(), "can't find: GET /page");
    }

    #[test]
    fn undecodable_recording_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("0-broken.json"), b"{").unwrap();
        let store = RecordStore::new(dir.path());
        store.save(&record("/page", "a.com", "plain")).unwrap();

        let outcome = run(&context("/page", "a.com"), &store, &MatchPolicy::fuzzy()).unwrap();
        assert_eq!(outcome.record().response.body(), b"plain");

        let err = run(&context("/other", "a.com"), &store, &MatchPolicy::fuzzy()).unwrap_err();
        assert!(matches!(err, ReplayError::NoMatch { .. }));
    }

    #[test]
    fn response_bytes_are_verbatim() {
        let outcome = ReplayOutcome::Exact(record("/", "a.com", "hi"));
        assert_eq!(
            outcome.response_bytes(),
            b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nhi"
        );
    }
}
