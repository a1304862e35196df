//! # hkv-resolver
//!
//! The asynchronous miss-resolution subsystem: a process-wide
//! single-flight filter, a fixed pool of resolver threads each draining a
//! bounded queue of [`MissTask`]s, a tolerant document-schema decoder, and
//! the JSON projection builder that installs results back into the cache.
//!
//! This crate is deliberately decoupled from the wire protocol, it depends
//! on `hkv-engine` to install results and on two small collaborator traits
//! ([`DocumentStore`], [`PresenceCheck`]) for the external document store
//! and presence-check systems.

pub mod collaborators;
pub mod error;
pub mod filter;
pub mod mongo;
pub mod pool;
pub mod presence;
pub mod schema;
pub mod task;

pub use collaborators::{DocumentStore, Presence, PresenceCheck};
pub use error::{ResolverError, ResolverResult};
pub use filter::SingleFlightFilter;
pub use mongo::MongoDocumentStore;
pub use pool::{PushOutcome, ResolverPool, ResolverPoolConfig};
pub use presence::ClientPresenceCheck;
pub use task::{MissTask, TaskKey, TaskType};
