//! # Command dispatch
//!
//! Looks up a command, validates arity, extracts the key set from argv,
//! rejects cross-slot multi-key requests, and routes to the owning shard.
//! No handler here ever holds a shard lock across I/O, each call into
//! `hkv-engine` acquires and releases its own lock before this function
//! composes the reply.

use bytes::Bytes;

use hkv_common::{lookup_command, CommandFlags, Config, Encoding, HkvError, Reply};
use hkv_engine::{ShardStore, TtlStatus};
use hkv_resolver::{ResolverPool, TaskKey};

/// Result of dispatching one request: the reply to send, and whether the
/// connection should close once it has been written (`QUIT`).
pub struct DispatchOutcome {
    pub reply: Reply,
    pub close_after_reply: bool,
}

impl DispatchOutcome {
    fn reply(reply: Reply) -> Self {
        DispatchOutcome { reply, close_after_reply: false }
    }
}

pub fn dispatch(
    argv: &[Bytes],
    store: &ShardStore,
    resolver: &ResolverPool,
    config: &Config,
) -> DispatchOutcome {
    let Some(name) = argv.first() else {
        return DispatchOutcome::reply(Reply::Error(
            HkvError::Protocol("empty request".into()).resp_message(),
        ));
    };

    if name.eq_ignore_ascii_case(b"quit") {
        return DispatchOutcome { reply: Reply::ok(), close_after_reply: true };
    }

    let Some(command) = lookup_command(name) else {
        let name = String::from_utf8_lossy(name).to_string();
        return DispatchOutcome::reply(Reply::Error(HkvError::UnknownCommand(name).resp_message()));
    };

    if !command.arity_ok(argv.len()) {
        return DispatchOutcome::reply(Reply::Error(
            HkvError::WrongArity(command.name.to_string()).resp_message(),
        ));
    }

    let slot = match resolve_slot(command.flags, &command.key_positions(argv.len()), argv, store) {
        Ok(slot) => slot,
        Err(err) => return DispatchOutcome::reply(Reply::Error(err.resp_message())),
    };

    if command.flags.deny_oom
        && config.max_memory_bytes > 0
        && store.approx_memory_bytes() >= config.max_memory_bytes
    {
        return DispatchOutcome::reply(Reply::Error(HkvError::OutOfMemory.resp_message()));
    }

    let shard = store.shard(slot);
    let reply = match command.name {
        "get" => handlers::get(shard, resolver, &argv[1]),
        "set" => handlers::set(store, shard, argv),
        "setnx" => handlers::setnx(store, shard, &argv[1], &argv[2]),
        "setex" => handlers::setex(store, shard, argv),
        "append" => handlers::append(store, shard, &argv[1], &argv[2]),
        "strlen" => handlers::strlen(shard, &argv[1]),
        "del" => handlers::del(shard, &argv[1..]),
        "exists" => handlers::exists(shard, &argv[1..]),
        "hset" => handlers::hset(store, shard, argv, config),
        "hsetnx" => handlers::hsetnx(store, shard, argv, config),
        "hget" => handlers::hget(shard, &argv[1], &argv[2]),
        "hmset" => handlers::hmset(store, shard, argv, config),
        "hmget" => handlers::hmget(shard, &argv[1], &argv[2..]),
        "hdel" => handlers::hdel(shard, &argv[1], &argv[2..]),
        "hlen" => handlers::hlen(shard, &argv[1]),
        "hstrlen" => handlers::hstrlen(shard, &argv[1], &argv[2]),
        "hkeys" => handlers::hkeys(shard, &argv[1]),
        "hvals" => handlers::hvals(shard, &argv[1]),
        "hgetall" => handlers::hgetall(shard, &argv[1]),
        "hexists" => handlers::hexists(shard, &argv[1], &argv[2]),
        "ttl" => handlers::ttl(shard, &argv[1]),
        "expire" => handlers::expire(shard, &argv[1], &argv[2]),
        "cluster" => handlers::cluster(argv, config),
        "ping" => handlers::ping(argv),
        "info" => handlers::info(config),
        _ => Reply::Error(HkvError::UnknownCommand(command.name.to_string()).resp_message()),
    };

    DispatchOutcome::reply(reply)
}

/// Computes the single slot every key in this command must share, or an
/// admin route for commands with no keys. `CrossSlot` carries `-2` per the
/// wire contract's "n = -2 when keys disagree".
fn resolve_slot(
    flags: CommandFlags,
    key_positions: &[usize],
    argv: &[Bytes],
    store: &ShardStore,
) -> Result<u16, HkvError> {
    if flags.admin || key_positions.is_empty() {
        return Ok(hkv_common::ADMIN_SLOT);
    }

    let mut slots = key_positions.iter().map(|&pos| ShardStore::slot_for_key(&argv[pos]));
    let first = slots.next().expect("key_positions is non-empty");
    if slots.all(|slot| slot == first) {
        Ok(first)
    } else {
        Err(HkvError::CrossSlot(-2))
    }
}

mod handlers {
    use super::*;

    pub fn get(shard: &hkv_engine::Shard, resolver: &ResolverPool, key: &Bytes) -> Reply {
        match shard.get(key) {
            Ok(Some(value)) => Reply::Bulk(Some(value)),
            Ok(None) => {
                if TaskKey::parse(key).is_ok() {
                    resolver.push_task(key.clone());
                }
                Reply::nil()
            }
            Err(err) => Reply::Error(err.resp_message()),
        }
    }

    pub fn set(store: &ShardStore, shard: &hkv_engine::Shard, argv: &[Bytes]) -> Reply {
        let key = argv[1].clone();
        let value = argv[2].clone();
        let ttl_ms = match parse_ttl_options(&argv[3..]) {
            Ok(ttl) => ttl,
            Err(err) => return Reply::Error(err.resp_message()),
        };
        store.add_approx_bytes((key.len() + value.len()) as u64);
        match shard.set(key, value, ttl_ms) {
            Ok(()) => Reply::ok(),
            Err(err) => Reply::Error(err.resp_message()),
        }
    }

    fn parse_ttl_options(opts: &[Bytes]) -> Result<Option<i64>, HkvError> {
        match opts {
            [] => Ok(None),
            [flag, value] if flag.eq_ignore_ascii_case(b"ex") => {
                let secs = parse_u64(value)?;
                Ok(Some(secs as i64 * 1000))
            }
            [flag, value] if flag.eq_ignore_ascii_case(b"px") => {
                let ms = parse_u64(value)?;
                Ok(Some(ms as i64))
            }
            _ => Err(HkvError::Protocol("syntax error".into())),
        }
    }

    fn parse_u64(bytes: &[u8]) -> Result<u64, HkvError> {
        std::str::from_utf8(bytes)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or(HkvError::NotAnInteger)
    }

    pub fn setnx(store: &ShardStore, shard: &hkv_engine::Shard, key: &Bytes, value: &Bytes) -> Reply {
        store.add_approx_bytes((key.len() + value.len()) as u64);
        match shard.setnx(key.clone(), value.clone()) {
            Ok(true) => Reply::Integer(1),
            Ok(false) => Reply::Integer(0),
            Err(err) => Reply::Error(err.resp_message()),
        }
    }

    pub fn setex(store: &ShardStore, shard: &hkv_engine::Shard, argv: &[Bytes]) -> Reply {
        let secs = match parse_u64(&argv[2]) {
            Ok(secs) => secs,
            Err(err) => return Reply::Error(err.resp_message()),
        };
        let key = argv[1].clone();
        let value = argv[3].clone();
        store.add_approx_bytes((key.len() + value.len()) as u64);
        match shard.set(key, value, Some(secs as i64 * 1000)) {
            Ok(()) => Reply::ok(),
            Err(err) => Reply::Error(err.resp_message()),
        }
    }

    pub fn append(store: &ShardStore, shard: &hkv_engine::Shard, key: &Bytes, suffix: &Bytes) -> Reply {
        store.add_approx_bytes(suffix.len() as u64);
        match shard.append(key.clone(), suffix.clone()) {
            Ok(len) => Reply::Integer(len as i64),
            Err(err) => Reply::Error(err.resp_message()),
        }
    }

    pub fn strlen(shard: &hkv_engine::Shard, key: &[u8]) -> Reply {
        match shard.strlen(key) {
            Ok(len) => Reply::Integer(len as i64),
            Err(err) => Reply::Error(err.resp_message()),
        }
    }

    pub fn del(shard: &hkv_engine::Shard, keys: &[Bytes]) -> Reply {
        Reply::Integer(shard.del(keys))
    }

    pub fn exists(shard: &hkv_engine::Shard, keys: &[Bytes]) -> Reply {
        Reply::Integer(shard.exists(keys))
    }

    pub fn hset(store: &ShardStore, shard: &hkv_engine::Shard, argv: &[Bytes], config: &Config) -> Reply {
        store.add_approx_bytes((argv[2].len() + argv[3].len()) as u64);
        match shard.hset(
            argv[1].clone(),
            argv[2].clone(),
            argv[3].clone(),
            config.hash_max_entries,
            config.hash_max_value_len,
        ) {
            Ok(true) => Reply::Integer(1),
            Ok(false) => Reply::Integer(0),
            Err(err) => Reply::Error(err.resp_message()),
        }
    }

    pub fn hsetnx(store: &ShardStore, shard: &hkv_engine::Shard, argv: &[Bytes], config: &Config) -> Reply {
        store.add_approx_bytes((argv[2].len() + argv[3].len()) as u64);
        match shard.hsetnx(
            argv[1].clone(),
            argv[2].clone(),
            argv[3].clone(),
            config.hash_max_entries,
            config.hash_max_value_len,
        ) {
            Ok(true) => Reply::Integer(1),
            Ok(false) => Reply::Integer(0),
            Err(err) => Reply::Error(err.resp_message()),
        }
    }

    pub fn hmset(store: &ShardStore, shard: &hkv_engine::Shard, argv: &[Bytes], config: &Config) -> Reply {
        let pairs = &argv[2..];
        if pairs.len() % 2 != 0 {
            return Reply::Error(HkvError::Protocol("wrong number of arguments for HMSET".into()).resp_message());
        }
        let mut chunks = pairs.chunks_exact(2);
        for chunk in &mut chunks {
            let (field, value) = (&chunk[0], &chunk[1]);
            store.add_approx_bytes((field.len() + value.len()) as u64);
            if let Err(err) = shard.hset(
                argv[1].clone(),
                field.clone(),
                value.clone(),
                config.hash_max_entries,
                config.hash_max_value_len,
            ) {
                return Reply::Error(err.resp_message());
            }
        }
        Reply::ok()
    }

    pub fn hget(shard: &hkv_engine::Shard, key: &[u8], field: &[u8]) -> Reply {
        match shard.hget(key, field) {
            Ok(value) => Reply::Bulk(value),
            Err(err) => Reply::Error(err.resp_message()),
        }
    }

    pub fn hmget(shard: &hkv_engine::Shard, key: &[u8], fields: &[Bytes]) -> Reply {
        match shard.hmget(key, fields) {
            Ok(values) => Reply::Multi(values.into_iter().map(Reply::Bulk).collect()),
            Err(err) => Reply::Error(err.resp_message()),
        }
    }

    pub fn hdel(shard: &hkv_engine::Shard, key: &[u8], fields: &[Bytes]) -> Reply {
        match shard.hdel(key, fields) {
            Ok(count) => Reply::Integer(count),
            Err(err) => Reply::Error(err.resp_message()),
        }
    }

    pub fn hlen(shard: &hkv_engine::Shard, key: &[u8]) -> Reply {
        match shard.hlen(key) {
            Ok(len) => Reply::Integer(len),
            Err(err) => Reply::Error(err.resp_message()),
        }
    }

    pub fn hstrlen(shard: &hkv_engine::Shard, key: &[u8], field: &[u8]) -> Reply {
        match shard.hstrlen(key, field) {
            Ok(len) => Reply::Integer(len),
            Err(err) => Reply::Error(err.resp_message()),
        }
    }

    pub fn hkeys(shard: &hkv_engine::Shard, key: &[u8]) -> Reply {
        match shard.hkeys(key) {
            Ok(keys) => Reply::Multi(keys.into_iter().map(|k| Reply::Bulk(Some(k))).collect()),
            Err(err) => Reply::Error(err.resp_message()),
        }
    }

    pub fn hvals(shard: &hkv_engine::Shard, key: &[u8]) -> Reply {
        match shard.hvals(key) {
            Ok(values) => Reply::Multi(values.into_iter().map(|v| Reply::Bulk(Some(v))).collect()),
            Err(err) => Reply::Error(err.resp_message()),
        }
    }

    pub fn hgetall(shard: &hkv_engine::Shard, key: &[u8]) -> Reply {
        match shard.hgetall(key) {
            Ok(pairs) => Reply::Multi(
                pairs
                    .into_iter()
                    .flat_map(|(f, v)| [Reply::Bulk(Some(f)), Reply::Bulk(Some(v))])
                    .collect(),
            ),
            Err(err) => Reply::Error(err.resp_message()),
        }
    }

    pub fn hexists(shard: &hkv_engine::Shard, key: &[u8], field: &[u8]) -> Reply {
        match shard.hexists(key, field) {
            Ok(true) => Reply::Integer(1),
            Ok(false) => Reply::Integer(0),
            Err(err) => Reply::Error(err.resp_message()),
        }
    }

    pub fn ttl(shard: &hkv_engine::Shard, key: &[u8]) -> Reply {
        match shard.ttl(key) {
            TtlStatus::Missing => Reply::Integer(-2),
            TtlStatus::NoExpiry => Reply::Integer(-1),
            TtlStatus::ExpiresIn(d) => Reply::Integer(d.as_secs() as i64),
        }
    }

    pub fn expire(shard: &hkv_engine::Shard, key: &[u8], secs: &[u8]) -> Reply {
        match parse_u64(secs) {
            Ok(secs) => Reply::Integer(if shard.expire_secs(key, secs) { 1 } else { 0 }),
            Err(err) => Reply::Error(err.resp_message()),
        }
    }

    pub fn cluster(argv: &[Bytes], config: &Config) -> Reply {
        if argv.len() < 2 || !argv[1].eq_ignore_ascii_case(b"slots") {
            return Reply::Error(
                HkvError::Protocol("CLUSTER only supports SLOTS in this core".into()).resp_message(),
            );
        }
        let node = Reply::Multi(vec![
            Reply::Bulk(Some(Bytes::from(config.advertise_ip.clone()))),
            Reply::Integer(config.advertise_port as i64),
            Reply::Bulk(Some(Bytes::from(config.node_id.clone()))),
        ]);
        let slot_range = Reply::Multi(vec![
            Reply::Integer(0),
            Reply::Integer(hkv_common::NUM_SLOTS as i64),
            node,
        ]);
        Reply::Multi(vec![slot_range])
    }

    pub fn ping(argv: &[Bytes]) -> Reply {
        match argv.get(1) {
            Some(payload) => Reply::Bulk(Some(payload.clone())),
            None => Reply::Status("PONG".to_string()),
        }
    }

    pub fn info(config: &Config) -> Reply {
        let body = format!(
            "# Server\r\nnode_id:{}\r\nbind_addr:{}\r\nworker_threads:{}\r\nresolver_threads:{}\r\n",
            config.node_id, config.bind_addr, config.worker_threads, config.resolver_threads,
        );
        Reply::Bulk(Some(Bytes::from(body)))
    }

    #[allow(dead_code)]
    pub fn encoding_of(shard: &hkv_engine::Shard, key: &[u8]) -> Option<Encoding> {
        shard.encoding(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn argv(parts: &[&str]) -> Vec<Bytes> {
        parts.iter().map(|p| Bytes::copy_from_slice(p.as_bytes())).collect()
    }

    fn test_resolver(store: Arc<ShardStore>) -> ResolverPool {
        struct NoDocs;
        impl hkv_resolver::DocumentStore for NoDocs {
            fn query_one(
                &self,
                _uid: &str,
                _projection: &[String],
            ) -> hkv_resolver::ResolverResult<Option<serde_json::Value>> {
                Ok(None)
            }
        }
        struct NeverPresent;
        impl hkv_resolver::PresenceCheck for NeverPresent {
            fn exists(&self, _uid: &str) -> hkv_resolver::ResolverResult<hkv_resolver::Presence> {
                Ok(hkv_resolver::Presence::Absent)
            }
        }
        ResolverPool::spawn(
            hkv_resolver::ResolverPoolConfig { num_resolvers: 1, queue_depth: 4, backfill_ttl_ms: 1000 },
            store,
            Arc::new(NoDocs),
            Arc::new(NeverPresent),
        )
    }

    #[test]
    fn set_then_get_round_trips() {
        let store = Arc::new(ShardStore::new());
        let resolver = test_resolver(store.clone());
        let config = Config::default();

        let outcome = dispatch(&argv(&["SET", "foo", "bar"]), &store, &resolver, &config);
        assert!(matches!(outcome.reply, Reply::Status(s) if s == "OK"));

        let outcome = dispatch(&argv(&["GET", "foo"]), &store, &resolver, &config);
        assert!(matches!(outcome.reply, Reply::Bulk(Some(b)) if b == Bytes::from_static(b"bar")));

        resolver.stop();
    }

    #[test]
    fn unknown_command_reports_verbatim_error() {
        let store = Arc::new(ShardStore::new());
        let resolver = test_resolver(store.clone());
        let config = Config::default();

        let outcome = dispatch(&argv(&["BOGUS"]), &store, &resolver, &config);
        match outcome.reply {
            Reply::Error(msg) => assert_eq!(msg, "ERR unknown command 'BOGUS'"),
            other => panic!("unexpected {other:?}"),
        }
        resolver.stop();
    }

    #[test]
    fn wrong_arity_reports_verbatim_error() {
        let store = Arc::new(ShardStore::new());
        let resolver = test_resolver(store.clone());
        let config = Config::default();

        let outcome = dispatch(&argv(&["GET"]), &store, &resolver, &config);
        match outcome.reply {
            Reply::Error(msg) => assert_eq!(msg, "ERR wrong number of arguments for 'get' command"),
            other => panic!("unexpected {other:?}"),
        }
        resolver.stop();
    }

    #[test]
    fn cross_slot_multi_key_command_is_rejected() {
        let store = Arc::new(ShardStore::new());
        let resolver = test_resolver(store.clone());
        let config = Config::default();

        let outcome = dispatch(&argv(&["DEL", "a", "totally-different-key"]), &store, &resolver, &config);
        match outcome.reply {
            Reply::Error(msg) => assert_eq!(msg, "ERR unknown operate db '-2'"),
            other => panic!("unexpected {other:?}"),
        }
        resolver.stop();
    }

    #[test]
    fn quit_closes_after_reply() {
        let store = Arc::new(ShardStore::new());
        let resolver = test_resolver(store.clone());
        let config = Config::default();

        let outcome = dispatch(&argv(&["QUIT"]), &store, &resolver, &config);
        assert!(outcome.close_after_reply);
        resolver.stop();
    }

    #[test]
    fn cluster_slots_reports_full_range() {
        let store = Arc::new(ShardStore::new());
        let resolver = test_resolver(store.clone());
        let config = Config::default();

        let outcome = dispatch(&argv(&["CLUSTER", "SLOTS"]), &store, &resolver, &config);
        match outcome.reply {
            Reply::Multi(items) => assert_eq!(items.len(), 1),
            other => panic!("unexpected {other:?}"),
        }
        resolver.stop();
    }

    #[test]
    fn hash_round_trip() {
        let store = Arc::new(ShardStore::new());
        let resolver = test_resolver(store.clone());
        let config = Config::default();

        dispatch(&argv(&["HSET", "h", "f1", "v1"]), &store, &resolver, &config);
        let outcome = dispatch(&argv(&["HGET", "h", "f1"]), &store, &resolver, &config);
        assert!(matches!(outcome.reply, Reply::Bulk(Some(b)) if b == Bytes::from_static(b"v1")));

        resolver.stop();
    }
}
