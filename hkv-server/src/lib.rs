//! # hkv-server
//!
//! Wires the RESP2 wire codec, the sharded store, and the async miss
//! resolver into a running cache server: a listener thread that only
//! accepts, a fixed pool of worker threads each running their own
//! single-threaded Tokio runtime, and a per-connection state machine that
//! parses, dispatches, and replies.

pub mod connection;
pub mod dispatch;
pub mod listener;
pub mod metrics;
pub mod worker;
