//! # Runtime configuration
//!
//! A single immutable `Config`, built once at startup and shared as
//! `Arc<Config>` by every thread, listener, workers, rehasher, resolvers.
//! There is no mutable global configuration object and no live `CONFIG SET`;
//! `Config::from_env()` is the only constructor, reading `HKV_*` environment
//! variables with the same defaults the original server compiles in.

use std::env;

use crate::value::{DEFAULT_HASH_MAX_ENTRIES, DEFAULT_HASH_MAX_VALUE_LEN};

/// Default listener bind address.
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:7890";

/// Default worker thread count, one readiness loop per thread.
pub const DEFAULT_WORKER_THREADS: usize = 4;

/// Default resolver thread count servicing the async miss path.
pub const DEFAULT_RESOLVER_THREADS: usize = 2;

/// Default cap on a single client's query buffer, matching the original's
/// 512 MiB `proto-max-bulk-len`-derived limit.
pub const DEFAULT_MAX_QUERY_BUF_BYTES: usize = 512 * 1024 * 1024;

/// Default per-resolver ring queue depth.
pub const DEFAULT_RESOLVER_QUEUE_DEPTH: usize = 256;

/// Default backfill TTL installed on a resolved miss, in seconds (7 days).
pub const DEFAULT_BACKFILL_TTL_SECS: u64 = 7 * 24 * 60 * 60;

/// Default rehasher tick interval, in milliseconds.
pub const DEFAULT_REHASH_TICK_MS: u64 = 2_000;

/// Default per-shard migration time budget per rehasher tick, in
/// microseconds (1ms).
pub const DEFAULT_REHASH_BUDGET_US: u64 = 1_000;

/// Server-wide configuration, resolved once at startup and never mutated.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the listener thread binds and accepts on.
    pub bind_addr: String,
    /// Number of worker threads, each running its own readiness loop.
    pub worker_threads: usize,
    /// Number of resolver threads servicing asynchronous miss resolution.
    pub resolver_threads: usize,
    /// Maximum bytes a single client's query buffer may grow to before the
    /// connection is closed with a protocol error.
    pub max_query_buf_bytes: usize,
    /// Depth of each resolver's bounded task ring queue.
    pub resolver_queue_depth: usize,
    /// TTL installed on a key once a resolved document is backfilled.
    pub backfill_ttl_secs: u64,
    /// How often the background rehasher thread wakes to migrate buckets.
    pub rehash_tick_ms: u64,
    /// Upper bound on migration work performed per shard per tick.
    pub rehash_budget_us: u64,
    /// Entry-count threshold above which a hash value converts from compact
    /// to table encoding.
    pub hash_max_entries: usize,
    /// Per-value byte-length threshold above which a hash value converts to
    /// table encoding.
    pub hash_max_value_len: usize,
    /// Hard memory ceiling in bytes; write commands flagged `deny_oom` are
    /// rejected once it is exceeded. `0` disables the check.
    pub max_memory_bytes: u64,
    /// Connection string for the document store backing asynchronous misses.
    pub mongo_uri: String,
    /// Database name queried by the resolver pool.
    pub mongo_database: String,
    /// Collection name holding source documents.
    pub mongo_collection: String,
    /// Address of the blocking key/value client used for the presence
    /// check ahead of a document-store round trip.
    pub presence_addr: String,
    /// Timeout for a single presence-check round trip.
    pub presence_timeout_ms: u64,
    /// Self-identifier reported in `CLUSTER SLOTS`' node entry.
    pub node_id: String,
    /// Self IP reported in `CLUSTER SLOTS`' node entry.
    pub advertise_ip: String,
    /// Self port reported in `CLUSTER SLOTS`' node entry.
    pub advertise_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            worker_threads: DEFAULT_WORKER_THREADS,
            resolver_threads: DEFAULT_RESOLVER_THREADS,
            max_query_buf_bytes: DEFAULT_MAX_QUERY_BUF_BYTES,
            resolver_queue_depth: DEFAULT_RESOLVER_QUEUE_DEPTH,
            backfill_ttl_secs: DEFAULT_BACKFILL_TTL_SECS,
            rehash_tick_ms: DEFAULT_REHASH_TICK_MS,
            rehash_budget_us: DEFAULT_REHASH_BUDGET_US,
            hash_max_entries: DEFAULT_HASH_MAX_ENTRIES,
            hash_max_value_len: DEFAULT_HASH_MAX_VALUE_LEN,
            max_memory_bytes: 0,
            mongo_uri: "mongodb://127.0.0.1:27017".to_string(),
            mongo_database: "icache".to_string(),
            mongo_collection: "profiles".to_string(),
            presence_addr: "127.0.0.1:7890".to_string(),
            presence_timeout_ms: 100,
            node_id: "icache-1".to_string(),
            advertise_ip: "127.0.0.1".to_string(),
            advertise_port: 7890,
        }
    }
}

impl Config {
    /// Builds a `Config` from `HKV_*` environment variables, falling back to
    /// the compiled-in defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Config::default();
        Config {
            bind_addr: env::var("HKV_BIND_ADDR").unwrap_or(defaults.bind_addr),
            worker_threads: parse_env("HKV_WORKER_THREADS", defaults.worker_threads),
            resolver_threads: parse_env("HKV_RESOLVER_THREADS", defaults.resolver_threads),
            max_query_buf_bytes: parse_env(
                "HKV_MAX_QUERY_BUF_BYTES",
                defaults.max_query_buf_bytes,
            ),
            resolver_queue_depth: parse_env(
                "HKV_RESOLVER_QUEUE_DEPTH",
                defaults.resolver_queue_depth,
            ),
            backfill_ttl_secs: parse_env("HKV_BACKFILL_TTL_SECS", defaults.backfill_ttl_secs),
            rehash_tick_ms: parse_env("HKV_REHASH_TICK_MS", defaults.rehash_tick_ms),
            rehash_budget_us: parse_env("HKV_REHASH_BUDGET_US", defaults.rehash_budget_us),
            hash_max_entries: parse_env("HKV_HASH_MAX_ENTRIES", defaults.hash_max_entries),
            hash_max_value_len: parse_env("HKV_HASH_MAX_VALUE_LEN", defaults.hash_max_value_len),
            max_memory_bytes: parse_env("HKV_MAX_MEMORY_BYTES", defaults.max_memory_bytes),
            mongo_uri: env::var("HKV_MONGO_URI").unwrap_or(defaults.mongo_uri),
            mongo_database: env::var("HKV_MONGO_DATABASE").unwrap_or(defaults.mongo_database),
            mongo_collection: env::var("HKV_MONGO_COLLECTION").unwrap_or(defaults.mongo_collection),
            presence_addr: env::var("HKV_PRESENCE_ADDR").unwrap_or(defaults.presence_addr),
            presence_timeout_ms: parse_env("HKV_PRESENCE_TIMEOUT_MS", defaults.presence_timeout_ms),
            node_id: env::var("HKV_NODE_ID").unwrap_or(defaults.node_id),
            advertise_ip: env::var("HKV_ADVERTISE_IP").unwrap_or(defaults.advertise_ip),
            advertise_port: parse_env("HKV_ADVERTISE_PORT", defaults.advertise_port),
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, fallback: T) -> T {
    env::var(key).ok().and_then(|raw| raw.parse().ok()).unwrap_or(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_compiled_in_constants() {
        let config = Config::default();
        assert_eq!(config.bind_addr, DEFAULT_BIND_ADDR);
        assert_eq!(config.worker_threads, DEFAULT_WORKER_THREADS);
        assert_eq!(config.max_memory_bytes, 0);
    }

    #[test]
    fn env_override_takes_precedence() {
        env::set_var("HKV_WORKER_THREADS", "9");
        let config = Config::from_env();
        assert_eq!(config.worker_threads, 9);
        env::remove_var("HKV_WORKER_THREADS");
    }

    #[test]
    fn unparsable_env_falls_back_to_default() {
        env::set_var("HKV_WORKER_THREADS", "not-a-number");
        let config = Config::from_env();
        assert_eq!(config.worker_threads, DEFAULT_WORKER_THREADS);
        env::remove_var("HKV_WORKER_THREADS");
    }
}
