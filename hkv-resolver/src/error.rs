//! Error kinds for the resolver subsystem: document-store failures,
//! presence-probe failures, and schema decode failures. Every variant
//! here is logged and swallowed by the resolver loop; none of them
//! propagate to a client.

use thiserror::Error;

pub type ResolverResult<T> = Result<T, ResolverError>;

#[derive(Debug, Error)]
pub enum ResolverError {
    #[error("malformed miss task key: {0}")]
    InvalidKey(String),

    #[error("document store query failed: {0}")]
    DocumentStore(String),

    #[error("presence probe failed: {0}")]
    Presence(String),

    #[error("document failed schema checks: {0}")]
    SchemaViolation(String),
}
