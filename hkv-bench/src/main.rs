//! # Engine benchmark harness
//!
//! Purpose: provide a dependency-free, repeatable benchmark driver for the
//! sharded store so baseline throughput and incremental-rehash behavior can
//! be compared over time.
//!
//! ## Design principles
//! 1. **Deterministic workload**: a fixed PRNG seed keeps runs comparable.
//! 2. **Allocation control**: keys/values are pre-built to keep setup costs
//!    off the timed hot path.
//! 3. **Direct dispatch**: calls `ShardStore`/`Shard` directly, no dynamic
//!    dispatch or network round trip.

use std::env;
use std::hint::black_box;
use std::time::Instant;

use bytes::Bytes;
use hkv_common::HkvResult;
use hkv_engine::ShardStore;

const DEFAULT_KEY_COUNT: usize = 1 << 16;
const DEFAULT_OP_COUNT: usize = 1_000_000;
const DEFAULT_KEY_SIZE: usize = 16;
const DEFAULT_VALUE_SIZE: usize = 128;

struct BenchConfig {
    requested_keys: usize,
    key_count: usize,
    key_mask: usize,
    op_count: usize,
    key_size: usize,
    value_size: usize,
}

impl BenchConfig {
    fn from_args() -> Self {
        let mut args = env::args().skip(1);
        let requested_keys = parse_usize(args.next(), DEFAULT_KEY_COUNT);
        let op_count = parse_usize(args.next(), DEFAULT_OP_COUNT);
        let key_size = parse_usize(args.next(), DEFAULT_KEY_SIZE);
        let value_size = parse_usize(args.next(), DEFAULT_VALUE_SIZE);

        let key_count = normalize_power_of_two(requested_keys);
        let key_mask = key_count - 1;

        BenchConfig { requested_keys, key_count, key_mask, op_count, key_size, value_size }
    }
}

fn parse_usize(value: Option<String>, fallback: usize) -> usize {
    value.and_then(|raw| raw.parse().ok()).unwrap_or(fallback)
}

fn normalize_power_of_two(value: usize) -> usize {
    let value = value.max(1);
    if value.is_power_of_two() {
        value
    } else {
        value.next_power_of_two()
    }
}

/// Tiny deterministic PRNG used to avoid an external dependency.
struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    #[inline]
    fn next_index(&mut self, mask: usize) -> usize {
        (self.next_u64() as usize) & mask
    }
}

fn write_u64_le(value: u64, buffer: &mut [u8]) {
    let bytes = value.to_le_bytes();
    let copy_len = buffer.len().min(bytes.len());
    buffer[..copy_len].copy_from_slice(&bytes[..copy_len]);
}

fn build_buffers(count: usize, size: usize, seed: u64) -> Vec<Bytes> {
    let mut buffers = Vec::with_capacity(count);
    for i in 0..count {
        let mut buffer = vec![0u8; size];
        write_u64_le(seed ^ (i as u64), &mut buffer);
        buffers.push(Bytes::from(buffer));
    }
    buffers
}

fn report(label: &str, ops: usize, elapsed: std::time::Duration) {
    let secs = elapsed.as_secs_f64();
    let ops_per_sec = (ops as f64) / secs;
    let nanos_per_op = (secs * 1e9) / (ops as f64);
    println!("{label}: {ops} ops in {secs:.3}s ({ops_per_sec:.0} ops/s, {nanos_per_op:.1} ns/op)");
}

fn main() {
    if let Err(err) = run() {
        eprintln!("hkv-bench failed: {err}");
        std::process::exit(1);
    }
}

fn run() -> HkvResult<()> {
    let config = BenchConfig::from_args();
    let store = ShardStore::new();

    let keys = build_buffers(config.key_count, config.key_size, 0xA5A5_A5A5_A5A5_A5A5);
    let values = build_buffers(config.key_count, config.value_size, 0x5A5A_5A5A_5A5A_5A5A);

    for idx in 0..config.key_count {
        let slot = ShardStore::slot_for_key(&keys[idx]);
        store.shard(slot).set(keys[idx].clone(), values[idx].clone(), None)?;
    }

    println!(
        "keys: requested={}, actual={}, ops={}, key_size={}, value_size={}",
        config.requested_keys, config.key_count, config.op_count, config.key_size, config.value_size,
    );

    let mut rng = XorShift64::new(0x1234_5678_9ABC_DEF0);
    let start = Instant::now();
    for _ in 0..config.op_count {
        let idx = rng.next_index(config.key_mask);
        let slot = ShardStore::slot_for_key(&keys[idx]);
        let value = store.shard(slot).get(&keys[idx])?;
        black_box(value);
    }
    report("GET", config.op_count, start.elapsed());

    let mut rng = XorShift64::new(0x0FED_CBA9_8765_4321);
    let start = Instant::now();
    for _ in 0..config.op_count {
        let idx = rng.next_index(config.key_mask);
        let mut value = values[idx].to_vec();
        if let Some(first) = value.get_mut(0) {
            *first ^= 0xFF;
        }
        let slot = ShardStore::slot_for_key(&keys[idx]);
        store.shard(slot).set(keys[idx].clone(), Bytes::from(value), None)?;
    }
    report("SET", config.op_count, start.elapsed());

    bench_rehash_growth(config.key_size, config.value_size);

    Ok(())
}

/// Exercises incremental rehashing directly: floods one shard's table past
/// its growth threshold and times how long the migration-step loop takes to
/// finish draining the old table, one bounded step at a time.
fn bench_rehash_growth(key_size: usize, value_size: usize) {
    use hkv_engine::hashtable::RehashingTable;

    const FLOOD_COUNT: usize = 200_000;
    let keys = build_buffers(FLOOD_COUNT, key_size, 0x1111_2222_3333_4444);
    let values = build_buffers(FLOOD_COUNT, value_size, 0x5555_6666_7777_8888);

    let mut table: RehashingTable<Bytes> = RehashingTable::new();
    let start = Instant::now();
    for idx in 0..FLOOD_COUNT {
        table.insert(keys[idx].clone(), values[idx].clone());
    }
    let insert_elapsed = start.elapsed();

    table.maybe_start_resize();

    let mut steps = 0usize;
    let start = Instant::now();
    while table.is_rehashing() {
        table.migrate_step(256);
        steps += 1;
    }
    let drain_elapsed = start.elapsed();

    println!(
        "REHASH: {FLOOD_COUNT} inserts in {:.3}s, drained remaining migration in {:.3}s over {steps} steps",
        insert_elapsed.as_secs_f64(),
        drain_elapsed.as_secs_f64(),
    );
}
