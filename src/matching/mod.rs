//! Request matching subsystem.
//!
//! # Data Flow
//! ```text
//! live proxy:      incoming request → MatchPolicy::Strict → Archive scan
//! offline replay:  RequestContext → MatchPolicy::Fuzzy → select() over recorded files
//! ```
//!
//! # Design Decisions
//! - The strict preset never reports `Possible`
//! - The fuzzy header allow-list is configuration, not code

pub mod headers;
pub mod policy;

pub use headers::HeaderAllowList;
pub use policy::{select, MatchOutcome, MatchPolicy, Selection};
