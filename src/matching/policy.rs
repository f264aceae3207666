//! Request comparison presets.
//!
//! # Responsibilities
//! - Strict: exact wire equality, used by the live archive
//! - Fuzzy: request line, query-string tolerance and header allow-list,
//!   used by offline replay
//!
//! # Design Decisions
//! - One primitive (`compare`) shared by both presets
//! - Pure functions over two messages; no state, no I/O

use crate::http::message::{HttpMessage, RequestLine};
use crate::matching::headers::HeaderAllowList;

/// Result of comparing an incoming request with an archived one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOutcome {
    /// Definite match.
    Exact,
    /// Same resource modulo query string; usable only as a fallback.
    Possible,
    /// Not a match.
    No,
}

/// Which comparison to apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchPolicy {
    /// Byte-identical serialized requests.
    Strict,
    /// Heuristic comparison for replaying against recorded traffic.
    Fuzzy(HeaderAllowList),
}

impl MatchPolicy {
    /// Fuzzy preset with the shipped header allow-list.
    pub fn fuzzy() -> Self {
        MatchPolicy::Fuzzy(HeaderAllowList::default())
    }

    pub fn compare(&self, incoming: &HttpMessage, archived: &HttpMessage) -> MatchOutcome {
        self.compare_resource(incoming, None, archived)
    }

    /// Like `compare`, with `resource` standing in for the query-less
    /// incoming target when checking for a query-string-only difference.
    pub fn compare_resource(
        &self,
        incoming: &HttpMessage,
        resource: Option<&str>,
        archived: &HttpMessage,
    ) -> MatchOutcome {
        match self {
            MatchPolicy::Strict => strict(incoming, archived),
            MatchPolicy::Fuzzy(allow) => fuzzy(allow, incoming, resource, archived),
        }
    }
}

fn strict(incoming: &HttpMessage, archived: &HttpMessage) -> MatchOutcome {
    // "name: value" lines are unambiguous (names cannot contain ':'), so
    // field equality is equivalent to equality of the serialized bytes.
    if incoming.first_line() == archived.first_line()
        && incoming.headers() == archived.headers()
        && incoming.body() == archived.body()
    {
        MatchOutcome::Exact
    } else {
        MatchOutcome::No
    }
}

fn fuzzy(
    allow: &HeaderAllowList,
    incoming: &HttpMessage,
    resource: Option<&str>,
    archived: &HttpMessage,
) -> MatchOutcome {
    let (Some(ours), Some(theirs)) = (incoming.request_line(), archived.request_line()) else {
        return MatchOutcome::No;
    };

    if ours == theirs {
        return if headers_agree(allow, incoming, archived) {
            MatchOutcome::Exact
        } else {
            MatchOutcome::No
        };
    }

    if differs_only_by_query(&ours, resource.unwrap_or(ours.path()), &theirs) {
        MatchOutcome::Possible
    } else {
        MatchOutcome::No
    }
}

/// Exactly one side carries a query string and dropping it equalizes the lines.
fn differs_only_by_query(ours: &RequestLine<'_>, our_path: &str, theirs: &RequestLine<'_>) -> bool {
    ours.method == theirs.method
        && ours.protocol == theirs.protocol
        && ours.has_query() != theirs.has_query()
        && our_path == theirs.path()
}

fn trim_terminator(value: &str) -> &str {
    value.trim_end_matches(['\r', '\n'])
}

/// Every allow-listed header present on both sides must carry the same value.
fn headers_agree(allow: &HeaderAllowList, incoming: &HttpMessage, archived: &HttpMessage) -> bool {
    allow.names().iter().all(|name| {
        match (incoming.header(name), archived.header(name)) {
            (Some(ours), Some(theirs)) => trim_terminator(ours) == trim_terminator(theirs),
            _ => true,
        }
    })
}

/// Winner of a scan over archived candidates.
#[derive(Debug, PartialEq, Eq)]
pub enum Selection<T> {
    Exact(T),
    /// Fallback chosen by heuristic; the first `Possible` in scan order.
    Possible(T),
    None,
}

/// Scan candidates in order: the first `Exact` stops the scan, otherwise
/// the first `Possible` wins. `resource` is passed to `compare_resource`.
pub fn select<T, I, F>(
    policy: &MatchPolicy,
    incoming: &HttpMessage,
    resource: Option<&str>,
    candidates: I,
    request_of: F,
) -> Selection<T>
where
    I: IntoIterator<Item = T>,
    F: Fn(&T) -> &HttpMessage,
{
    let mut fallback = None;
    for candidate in candidates {
        match policy.compare_resource(incoming, resource, request_of(&candidate)) {
            MatchOutcome::Exact => return Selection::Exact(candidate),
            MatchOutcome::Possible if fallback.is_none() => fallback = Some(candidate),
            _ => {}
        }
    }
    fallback.map_or(Selection::None, Selection::Possible)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::message::Header;

    fn request(line: &str, headers: &[(&str, &str)]) -> HttpMessage {
        HttpMessage::new(
            line,
            headers.iter().map(|(n, v)| Header::new(*n, *v)).collect(),
            Vec::new(),
        )
    }

    #[test]
    fn strict_is_reflexive() {
        let a = request("GET /a HTTP/1.1", &[("Host", "x")]);
        assert_eq!(MatchPolicy::Strict.compare(&a, &a.clone()), MatchOutcome::Exact);
    }

    #[test]
    fn strict_rejects_any_difference() {
        let a = request("GET /a HTTP/1.1", &[("Host", "x"), ("Accept", "*/*")]);
        let value = request("GET /a HTTP/1.1", &[("Host", "y"), ("Accept", "*/*")]);
        let order = request("GET /a HTTP/1.1", &[("Accept", "*/*"), ("Host", "x")]);
        let body = HttpMessage::new("GET /a HTTP/1.1", a.headers().to_vec(), b"!".to_vec());
        for other in [value, order, body] {
            assert_eq!(MatchPolicy::Strict.compare(&a, &other), MatchOutcome::No);
        }
    }

    #[test]
    fn strict_never_possible() {
        let a = request("GET /x?y=1 HTTP/1.1", &[]);
        let b = request("GET /x HTTP/1.1", &[]);
        assert_eq!(MatchPolicy::Strict.compare(&a, &b), MatchOutcome::No);
    }

    #[test]
    fn fuzzy_query_string_is_possible() {
        let policy = MatchPolicy::fuzzy();
        let incoming = request("GET /x?y=1 HTTP/1.1", &[]);
        let archived = request("GET /x HTTP/1.1", &[]);
        assert_eq!(policy.compare(&incoming, &archived), MatchOutcome::Possible);
        assert_eq!(policy.compare(&archived, &incoming), MatchOutcome::Possible);

        let other_path = request("GET /z HTTP/1.1", &[]);
        assert_eq!(policy.compare(&incoming, &other_path), MatchOutcome::No);
        let other_query = request("GET /x?y=2 HTTP/1.1", &[]);
        assert_eq!(policy.compare(&incoming, &other_query), MatchOutcome::No);
    }

    #[test]
    fn resource_replaces_incoming_path_for_query_fallback() {
        let policy = MatchPolicy::fuzzy();
        let incoming = request("GET /index.php HTTP/1.1", &[]);
        let archived = request("GET /news?id=4 HTTP/1.1", &[]);
        assert_eq!(policy.compare(&incoming, &archived), MatchOutcome::No);
        assert_eq!(
            policy.compare_resource(&incoming, Some("/news"), &archived),
            MatchOutcome::Possible
        );

        // the exact comparison is never affected by the resource
        let same = request("GET /index.php HTTP/1.1", &[]);
        assert_eq!(
            policy.compare_resource(&incoming, Some("/cgi-bin/replay"), &same),
            MatchOutcome::Exact
        );
    }

    #[test]
    fn fuzzy_header_validation() {
        let policy = MatchPolicy::fuzzy();
        let archived = request("GET / HTTP/1.1", &[("Host", "a.com\r\n"), ("User-Agent", "x")]);

        let same_host = request("GET / HTTP/1.1", &[("host", "a.com"), ("User-Agent", "y")]);
        assert_eq!(policy.compare(&same_host, &archived), MatchOutcome::Exact);

        let other_host = request("GET / HTTP/1.1", &[("Host", "b.com")]);
        assert_eq!(policy.compare(&other_host, &archived), MatchOutcome::No);

        let missing = request("GET / HTTP/1.1", &[("Referer", "r")]);
        assert_eq!(policy.compare(&missing, &archived), MatchOutcome::Exact);
    }

    #[test]
    fn exact_beats_possible_regardless_of_order() {
        let policy = MatchPolicy::fuzzy();
        let incoming = request("GET /x?y=1 HTTP/1.1", &[]);
        let candidates = vec![
            request("GET /x HTTP/1.1", &[]),
            request("GET /x?y=1 HTTP/1.1", &[]),
            request("GET /x HTTP/1.0", &[]),
        ];
        let picked = select(&policy, &incoming, None, candidates.iter(), |c| *c);
        assert_eq!(picked, Selection::Exact(&candidates[1]));

        let reversed: Vec<_> = candidates.iter().rev().collect();
        let picked = select(&policy, &incoming, None, reversed, |c| *c);
        assert_eq!(picked, Selection::Exact(&candidates[1]));
    }

    #[test]
    fn first_possible_is_the_fallback() {
        let policy = MatchPolicy::fuzzy();
        let incoming = request("GET /x?y=1 HTTP/1.1", &[]);
        let candidates = vec![
            request("POST /x HTTP/1.1", &[]),
            request("GET /x HTTP/1.1", &[("Host", "first")]),
            request("GET /x HTTP/1.1", &[("Host", "second")]),
        ];
        match select(&policy, &incoming, None, candidates.iter(), |c| *c) {
            Selection::Possible(c) => assert_eq!(c.header("Host"), Some("first")),
            other => panic!("unexpected selection {other:?}"),
        }
        let none = select(&policy, &request("GET /nothing HTTP/1.1", &[]), None, candidates.iter(), |c| *c);
        assert_eq!(none, Selection::None);
    }
}
