//! # Connection state machine
//!
//! One async task per accepted socket, running entirely on the worker's
//! single-threaded runtime. Each connection cycles through reading into a
//! growable query buffer, parsing as many complete requests as the buffer
//! holds, dispatching each one, and writing the reply before going back to
//! reading. There is no multiplexing inside a connection: a pipelined batch
//! of requests is drained and answered in order before the next `read()`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use hkv_common::resp::{parse_request, Reply, RespError};
use hkv_common::Config;
use hkv_engine::ShardStore;
use hkv_resolver::ResolverPool;

use crate::dispatch::dispatch;
use crate::metrics::Metrics;

const INITIAL_QUERY_BUF: usize = 16 * 1024;
const READ_CHUNK: usize = 16 * 1024;
/// Buffers larger than this are considered "big", eligible for shrinking
/// back down once drained rather than being kept around for the next
/// request.
const BIG_ARG_THRESHOLD: usize = 32 * 1024;
const IDLE_COMPACT_AFTER: Duration = Duration::from_secs(2);

/// Runs one connection to completion. Returns once the peer closes the
/// socket, a protocol error forces a disconnect, or a `QUIT` is processed.
pub async fn handle_connection(
    mut stream: TcpStream,
    store: Arc<ShardStore>,
    resolver: Arc<ResolverPool>,
    config: Arc<Config>,
    metrics: Arc<Metrics>,
) {
    let peer = stream.peer_addr().ok();
    let mut buf = BytesMut::with_capacity(INITIAL_QUERY_BUF);
    let mut peak_len = INITIAL_QUERY_BUF;
    let mut last_activity = Instant::now();

    loop {
        match read_requests(&mut stream, &mut buf, config.max_query_buf_bytes).await {
            Ok(true) => {}
            Ok(false) => break,
            Err(err) => {
                let _ = write_reply(&mut stream, &Reply::Error(format!("ERR {err}"))).await;
                break;
            }
        }
        last_activity = Instant::now();

        loop {
            match parse_request(&mut buf, config.max_query_buf_bytes) {
                Ok(Some(argv)) if argv.is_empty() => continue,
                Ok(Some(argv)) => {
                    metrics.record_request_start();
                    let start = Instant::now();
                    let outcome = dispatch(&argv, &store, &resolver, &config);
                    if matches!(outcome.reply, Reply::Error(_)) {
                        metrics.record_error();
                    }
                    metrics.record_request_end(start.elapsed());

                    if write_reply(&mut stream, &outcome.reply).await.is_err() {
                        return;
                    }
                    if outcome.close_after_reply {
                        let _ = stream.shutdown().await;
                        return;
                    }
                }
                Ok(None) => break,
                Err(RespError::Protocol(msg)) => {
                    let _ = write_reply(&mut stream, &Reply::Error(format!("ERR Protocol error: {msg}"))).await;
                    return;
                }
                Err(RespError::BufferLimitExceeded) => {
                    let _ = write_reply(&mut stream, &Reply::Error("ERR Protocol error: invalid bulk length".into())).await;
                    return;
                }
            }
        }

        peak_len = peak_len.max(buf.capacity());
        maybe_compact(&mut buf, &mut peak_len, last_activity);
    }

    tracing::debug!(?peer, "connection closed");
}

/// Reads one chunk into `buf`. Returns `Ok(true)` if bytes arrived,
/// `Ok(false)` on a clean EOF, `Err` if the buffer would exceed its limit.
async fn read_requests(
    stream: &mut TcpStream,
    buf: &mut BytesMut,
    max_bytes: usize,
) -> Result<bool, RespError> {
    if buf.len() >= max_bytes {
        return Err(RespError::BufferLimitExceeded);
    }
    buf.reserve(READ_CHUNK);
    let n = stream.read_buf(buf).await.unwrap_or(0);
    Ok(n > 0)
}

async fn write_reply(stream: &mut TcpStream, reply: &Reply) -> std::io::Result<()> {
    let mut writer = hkv_common::resp::ReplyWriter::new();
    writer.push(reply);
    stream.write_all(&writer.into_bytes()).await
}

/// Shrinks the query buffer back to its initial size once it has grown past
/// the "big argument" threshold and is either more than double its recent
/// peak usage or has sat idle for a while with data still allocated.
fn maybe_compact(buf: &mut BytesMut, peak_len: &mut usize, last_activity: Instant) {
    let capacity = buf.capacity();
    if capacity <= BIG_ARG_THRESHOLD {
        return;
    }
    let over_double_peak = capacity > *peak_len * 2;
    let idle_and_nontrivial = last_activity.elapsed() > IDLE_COMPACT_AFTER && capacity > 1024;
    if over_double_peak || idle_and_nontrivial {
        let mut fresh = BytesMut::with_capacity(INITIAL_QUERY_BUF);
        fresh.extend_from_slice(buf);
        *buf = fresh;
        *peak_len = INITIAL_QUERY_BUF;
    }
}
