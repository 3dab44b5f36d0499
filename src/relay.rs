//! The relay pair: one local socket, one remote socket, two forwarding loops.
//!
//! ```text
//!                    +--------------------------------+
//!   local client --->| upstream:   read <= 1500 B,    |---> remote server
//!                    |             wrap, write        |
//!   local client <---| downstream: read one record,   |<--- remote server
//!                    |             peel, write        |
//!                    +--------------------------------+
//! ```
//!
//! Each direction runs in its own task. The first one to fail closes the
//! shared [`Teardown`] latch; the other one observes it at its next
//! suspension point and stops too. Each loop shuts down the write half it
//! owns on exit, and once both tasks are gone every half is dropped, which
//! closes both sockets.
//!
//! The optional idle timeout belongs to the pair, not to a direction: a
//! one-way transfer keeps the whole pair alive.
use core::{
    fmt::{Display, Formatter},
    time::Duration,
};
use std::{
    io::{self, ErrorKind},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    sync::Notify,
    task::{JoinError, JoinHandle},
    time::{Instant, sleep_until},
};
use tracing::{Instrument, debug, warn};

use crate::{
    codec::{add_record_layer, peel_record_layer, read_record},
    specification::{APPLICATION_DATA, RELAY_BUF_LEN, TLS12},
};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Direction {
    Upstream,
    Downstream,
}

impl Display for Direction {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            Direction::Upstream => write!(f, "local->remote"),
            Direction::Downstream => write!(f, "remote->local"),
        }
    }
}

/// One-way latch shared by the two loops of a pair.
#[derive(Debug, Default)]
struct Teardown {
    closed: AtomicBool,
    notify: Notify,
}

impl Teardown {
    /// Returns `true` for the call that actually closed the latch.
    fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.notify.notify_waiters();
        true
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    async fn closed(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking the flag so a close in between is not lost.
            notified.as_mut().enable();
            if self.is_closed() {
                return;
            }
            notified.await;
        }
    }
}

/// Last time either direction of a pair forwarded a chunk.
#[derive(Debug)]
struct Activity {
    epoch: Instant,
    /// Milliseconds since `epoch`.
    last: AtomicU64,
}

impl Activity {
    fn new() -> Self {
        Self {
            epoch: Instant::now(),
            last: AtomicU64::new(0),
        }
    }

    fn touch(&self) {
        let elapsed = self.epoch.elapsed().as_millis() as u64;
        self.last.fetch_max(elapsed, Ordering::Relaxed);
    }

    fn last(&self) -> Instant {
        self.epoch + Duration::from_millis(self.last.load(Ordering::Relaxed))
    }

    /// Resolves once neither direction has moved data for `limit`. Never
    /// resolves without a limit.
    async fn idle_for(&self, limit: Option<Duration>) {
        let Some(limit) = limit else {
            return core::future::pending().await;
        };
        loop {
            let deadline = self.last() + limit;
            if Instant::now() >= deadline {
                return;
            }
            sleep_until(deadline).await;
        }
    }
}

/// State shared by the two loops of one pair.
#[derive(Debug)]
struct Shared {
    teardown: Teardown,
    activity: Activity,
    idle_timeout: Option<Duration>,
}

#[derive(Debug)]
struct LoopOutcome {
    forwarded: u64,
    cause: Option<io::Error>,
}

/// A bound local/remote socket pair.
///
/// A pair is only built after a successful handshake, and is consumed by
/// [`spawn`](RelayPair::spawn): it cannot be restarted.
#[derive(Debug)]
pub struct RelayPair<L, R> {
    local: L,
    remote: R,
    idle_timeout: Option<Duration>,
}

impl<L, R> RelayPair<L, R>
where
    L: AsyncRead + AsyncWrite + Send + 'static,
    R: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Binds `local` and `remote`. No timeout is applied by default.
    pub fn new(local: L, remote: R) -> Self {
        Self {
            local,
            remote,
            idle_timeout: None,
        }
    }

    /// Tears the pair down once neither direction has forwarded anything
    /// for `idle_timeout`.
    pub fn with_idle_timeout(mut self, idle_timeout: Option<Duration>) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Starts both forwarding loops on the current tokio runtime.
    pub fn spawn(self) -> RelayHandle {
        let shared = Arc::new(Shared {
            teardown: Teardown::default(),
            activity: Activity::new(),
            idle_timeout: self.idle_timeout,
        });
        let (local_rd, local_wr) = tokio::io::split(self.local);
        let (remote_rd, remote_wr) = tokio::io::split(self.remote);

        let upstream =
            tokio::spawn(local_to_remote(local_rd, remote_wr, shared.clone()).in_current_span());
        let downstream =
            tokio::spawn(remote_to_local(remote_rd, local_wr, shared.clone()).in_current_span());
        RelayHandle {
            upstream,
            downstream,
            shared,
        }
    }
}

/// Handle to a running relay pair.
#[derive(Debug)]
pub struct RelayHandle {
    upstream: JoinHandle<LoopOutcome>,
    downstream: JoinHandle<LoopOutcome>,
    shared: Arc<Shared>,
}

/// Payload bytes forwarded by a finished relay pair.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct RelaySummary {
    /// Bytes read from the local socket and sent to the remote server.
    pub uploaded: u64,
    /// Bytes peeled from remote records and written to the local socket.
    pub downloaded: u64,
}

impl RelayHandle {
    /// Tears the pair down. Calling it again, or after the pair already
    /// stopped on its own, does nothing.
    pub fn close(&self) {
        self.shared.teardown.close();
    }

    /// Whether teardown has started.
    pub fn is_closed(&self) -> bool {
        self.shared.teardown.is_closed()
    }

    /// Waits until both loops have stopped and both sockets are closed.
    ///
    /// A loop that panicked is logged and counted as having forwarded
    /// nothing.
    pub async fn join(self) -> RelaySummary {
        let uploaded = forwarded(Direction::Upstream, self.upstream.await);
        let downloaded = forwarded(Direction::Downstream, self.downstream.await);
        RelaySummary {
            uploaded,
            downloaded,
        }
    }
}

fn forwarded(direction: Direction, joined: Result<LoopOutcome, JoinError>) -> u64 {
    match joined {
        Ok(outcome) => outcome.forwarded,
        Err(e) => {
            warn!(%direction, error = %e, "relay task did not finish cleanly");
            0
        }
    }
}

fn idle_error() -> io::Error {
    io::Error::new(ErrorKind::TimedOut, "relay idle timeout")
}

async fn local_to_remote<Rd, Wr>(mut local: Rd, mut remote: Wr, shared: Arc<Shared>) -> LoopOutcome
where
    Rd: AsyncRead + Unpin,
    Wr: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; RELAY_BUF_LEN];
    let mut forwarded = 0u64;
    let cause = loop {
        let step = async {
            let n = local.read(&mut buf).await?;
            if n == 0 {
                return Err(io::Error::from(ErrorKind::UnexpectedEof));
            }
            let record = add_record_layer(&buf[..n], APPLICATION_DATA, TLS12);
            remote.write_all(&record).await?;
            remote.flush().await?;
            Ok(n)
        };
        tokio::select! {
            biased;
            _ = shared.teardown.closed() => break None,
            _ = shared.activity.idle_for(shared.idle_timeout) => break Some(idle_error()),
            res = step => match res {
                Ok(n) => {
                    forwarded += n as u64;
                    shared.activity.touch();
                }
                Err(e) => break Some(e),
            },
        }
    };
    finish(Direction::Upstream, &mut remote, &shared.teardown, forwarded, cause).await
}

async fn remote_to_local<Rd, Wr>(mut remote: Rd, mut local: Wr, shared: Arc<Shared>) -> LoopOutcome
where
    Rd: AsyncRead + Unpin,
    Wr: AsyncWrite + Unpin,
{
    let mut forwarded = 0u64;
    let cause = loop {
        let step = async {
            let record = read_record(&mut remote).await?;
            let payload = peel_record_layer(&record)?;
            local.write_all(payload).await?;
            local.flush().await?;
            Ok::<_, io::Error>(payload.len())
        };
        tokio::select! {
            biased;
            _ = shared.teardown.closed() => break None,
            _ = shared.activity.idle_for(shared.idle_timeout) => break Some(idle_error()),
            res = step => match res {
                Ok(n) => {
                    forwarded += n as u64;
                    shared.activity.touch();
                }
                Err(e) => break Some(e),
            },
        }
    };
    finish(Direction::Downstream, &mut local, &shared.teardown, forwarded, cause).await
}

async fn finish<Wr>(
    direction: Direction,
    writer: &mut Wr,
    teardown: &Teardown,
    forwarded: u64,
    cause: Option<io::Error>,
) -> LoopOutcome
where
    Wr: AsyncWrite + Unpin,
{
    if teardown.close() {
        debug!(%direction, forwarded, error = ?cause, "relay direction failed, tearing down pair");
    } else {
        debug!(%direction, forwarded, "relay direction stopped by sibling");
    }
    // The peer may already be gone; a failed shutdown changes nothing.
    let _ = writer.shutdown().await;
    LoopOutcome { forwarded, cause }
}
