//! # Listener thread
//!
//! Owns the bound socket and does nothing but accept. A burst of up to 32
//! accepts is drained per wakeup before handing each connection off to the
//! worker pool, so a thundering herd of simultaneous connects doesn't starve
//! the accept loop behind one-at-a-time scheduling.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use socket2::{Domain, Socket, Type};

use crate::worker::{Accepted, WorkerPool};

const LISTEN_BACKLOG: i32 = 32;
const ACCEPT_BURST: usize = 32;
const POLL_INTERVAL: Duration = Duration::from_millis(50);

pub struct ListenerHandle {
    local_addr: SocketAddr,
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ListenerHandle {
    /// The address actually bound, useful when `addr`'s port was `0`.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stop(mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

/// Binds `addr` with `SO_REUSEADDR` and a fixed backlog, then spawns the
/// accept-loop thread. Returns an error if the bind itself fails; accept
/// errors after that are logged and retried rather than propagated.
pub fn spawn_listener(addr: SocketAddr, workers: Arc<WorkerPool>) -> std::io::Result<ListenerHandle> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, None)?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;
    socket.set_nonblocking(true)?;
    let listener: std::net::TcpListener = socket.into();
    let local_addr = listener.local_addr()?;

    let stop = Arc::new(AtomicBool::new(false));
    let stop_thread = Arc::clone(&stop);

    let join = std::thread::Builder::new()
        .name("hkv-listener".into())
        .spawn(move || accept_loop(listener, workers, stop_thread))
        .expect("spawn listener thread");

    Ok(ListenerHandle { local_addr, stop, join: Some(join) })
}

fn accept_loop(listener: std::net::TcpListener, workers: Arc<WorkerPool>, stop: Arc<AtomicBool>) {
    while !stop.load(Ordering::Acquire) {
        let mut accepted_any = false;
        for _ in 0..ACCEPT_BURST {
            match listener.accept() {
                Ok((stream, peer)) => {
                    accepted_any = true;
                    tracing::debug!(%peer, "accepted connection");
                    workers.dispatch(Accepted { stream });
                }
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    tracing::warn!(%err, "accept failed");
                    break;
                }
            }
        }
        if !accepted_any {
            std::thread::sleep(POLL_INTERVAL);
        }
    }
}
