//! # External collaborators
//!
//! The document store and the presence-check key/value client are
//! external collaborators, only their interfaces are fixed here.
//! [`mongo`](crate::mongo) and [`presence`](crate::presence) provide the
//! concrete implementations this workspace ships; tests use hand-rolled
//! stand-ins.

use crate::error::ResolverResult;

/// Reads a single document by primary key, projected to the requested
/// top-level / dotted field paths, narrowed to the one query shape the
/// resolver needs.
pub trait DocumentStore: Send + Sync {
    fn query_one(&self, uid: &str, projection: &[String]) -> ResolverResult<Option<serde_json::Value>>;
}

/// Result of a presence probe against the blocking key/value client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Present,
    Absent,
}

/// The blocking key/value client used only to check whether `uid` exists
/// before paying for a document-store round trip.
pub trait PresenceCheck: Send + Sync {
    fn exists(&self, uid: &str) -> ResolverResult<Presence>;
}
