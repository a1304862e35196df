//! # hkv-common
//!
//! Shared types for the cache server: the cache value model, the RESP2
//! wire codec, slot/hash-tag computation, the command table, and runtime
//! configuration. Every other crate in the workspace (including the
//! standalone client) depends on this one so the wire format and the data
//! model stay in one place.

pub mod command;
pub mod config;
pub mod crc16;
pub mod error;
pub mod resp;
pub mod value;

pub use command::{CommandFlags, CommandSpec, lookup_command};
pub use config::Config;
pub use crc16::{crc16, key_hash_slot, ADMIN_SLOT, NUM_SLOTS};
pub use error::{HkvError, HkvResult};
pub use resp::{Reply, RespParser, RespError};
pub use value::{Encoding, HashValue, Value, ValueKind};
