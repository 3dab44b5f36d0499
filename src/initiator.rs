//! The per-connection handshake.
//!
//! ```text
//!   Dialing ---connected-----> HandshakeSent --response read--> AckReceived
//!      |                            |                               |
//!      |                            |                     reply written
//!      v                            v                               v
//!   Aborted <-----------------------+---------------------------- Relaying
//!                                               (on failure)
//! ```
//!
//! An [`Initiator`] owns nothing but a shared [`SessionState`] and a
//! [`Dialer`], so one value serves every accepted connection. Each call to
//! [`establish`](Initiator::establish) walks the states above for a single
//! local connection. On any failure both the local and the remote socket are
//! dropped before the error is returned. Writing the ClientHello belongs to
//! `HandshakeSent`.
use core::{
    fmt::{Display, Formatter},
    future::Future,
};
use std::{
    io::{self, ErrorKind},
    sync::Arc,
};

use rand::{SeedableRng, rngs::StdRng};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
    time::timeout,
};
use tracing::{debug, warn};

use crate::{
    config::Endpoint,
    error::HandshakeAborted,
    handshake::{compose_client_hello, compose_reply},
    relay::{RelayPair, RelaySummary},
    specification::{DIAL_ATTEMPTS, HANDSHAKE_DISCARD_LEN},
    state::SessionState,
};

/// Opens outbound connections to the remote server.
pub trait Dialer {
    /// The connected stream.
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Makes one connection attempt. Retrying is up to the caller.
    fn dial(&self, endpoint: &Endpoint) -> impl Future<Output = io::Result<Self::Stream>> + Send;
}

/// Dials over TCP with Nagle's algorithm disabled.
#[derive(Copy, Clone, Debug, Default)]
pub struct TcpDialer;

impl Dialer for TcpDialer {
    type Stream = TcpStream;

    async fn dial(&self, endpoint: &Endpoint) -> io::Result<TcpStream> {
        let stream = TcpStream::connect((endpoint.host(), endpoint.port())).await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

/// Where a connection is in its lifecycle.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum HandshakeState {
    /// Connecting to the remote server.
    Dialing,
    /// Sending the ClientHello and waiting for the server's response.
    HandshakeSent,
    /// The response was drained, sending the reply.
    AckReceived,
    /// The relay pair is forwarding traffic.
    Relaying,
    /// The connection was given up. Both sockets are closed.
    ///
    /// This is where every failed connection ends; [`HandshakeAborted`]
    /// reports the state that was running when the failure happened.
    Aborted,
}

impl Display for HandshakeState {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            HandshakeState::Dialing => "dialing",
            HandshakeState::HandshakeSent => "handshake-sent",
            HandshakeState::AckReceived => "ack-received",
            HandshakeState::Relaying => "relaying",
            HandshakeState::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Runs the disguised handshake for accepted local connections.
#[derive(Debug)]
pub struct Initiator<D = TcpDialer> {
    state: Arc<SessionState>,
    dialer: D,
}

impl Initiator<TcpDialer> {
    /// Creates an initiator that dials the remote server over TCP.
    pub fn new(state: Arc<SessionState>) -> Self {
        Self::with_dialer(state, TcpDialer)
    }
}

impl<D: Dialer> Initiator<D> {
    /// Creates an initiator with a custom dialer.
    pub fn with_dialer(state: Arc<SessionState>, dialer: D) -> Self {
        Self { state, dialer }
    }

    /// The shared session state.
    pub fn session_state(&self) -> &SessionState {
        &self.state
    }

    /// Performs the handshake on behalf of `local` and returns the bound
    /// relay pair, not yet started.
    ///
    /// # Errors
    ///
    /// Returns [`HandshakeAborted`] carrying the state in which the first
    /// failure happened. `local` and the remote connection, if any, are
    /// closed by then.
    pub async fn establish<L>(&self, local: L) -> Result<RelayPair<L, D::Stream>, HandshakeAborted>
    where
        L: AsyncRead + AsyncWrite + Send + 'static,
    {
        let config = self.state.config();
        let mut rng = StdRng::from_os_rng();

        let mut remote = self.dial().await.map_err(abort(HandshakeState::Dialing))?;
        let hello = compose_client_hello(&self.state, &mut rng);
        remote
            .write_all(&hello)
            .await
            .map_err(abort(HandshakeState::HandshakeSent))?;
        debug!(len = hello.len(), "client hello sent");

        // The response is drained unread; the server authenticates us, not
        // the other way round.
        let mut discard = [0u8; HANDSHAKE_DISCARD_LEN];
        let read = remote.read(&mut discard);
        let drained = match config.idle_timeout() {
            Some(limit) => timeout(limit, read)
                .await
                .map_err(|_| io::Error::new(ErrorKind::TimedOut, "no handshake response"))
                .and_then(|r| r),
            None => read.await,
        };
        match drained {
            Ok(0) => {
                return Err(HandshakeAborted::new(
                    HandshakeState::HandshakeSent,
                    ErrorKind::UnexpectedEof.into(),
                ));
            }
            Ok(n) => debug!(len = n, "handshake response drained"),
            Err(e) => return Err(HandshakeAborted::new(HandshakeState::HandshakeSent, e)),
        }

        remote
            .write_all(&compose_reply(&mut rng))
            .await
            .map_err(abort(HandshakeState::AckReceived))?;

        Ok(RelayPair::new(local, remote).with_idle_timeout(config.idle_timeout()))
    }

    /// Performs the handshake, then relays until the pair is torn down.
    pub async fn serve<L>(&self, local: L) -> Result<RelaySummary, HandshakeAborted>
    where
        L: AsyncRead + AsyncWrite + Send + 'static,
    {
        let handle = self.establish(local).await?.spawn();
        debug!(state = %HandshakeState::Relaying, "handshake complete");
        Ok(handle.join().await)
    }

    async fn dial(&self) -> io::Result<D::Stream> {
        let remote = self.state.config().remote();
        let mut attempt = 1;
        loop {
            match self.dialer.dial(remote).await {
                Ok(stream) => return Ok(stream),
                Err(e) if attempt < DIAL_ATTEMPTS => {
                    warn!(%remote, attempt, error = %e, "dial failed, retrying");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn abort(state: HandshakeState) -> impl FnOnce(io::Error) -> HandshakeAborted {
    move |e| HandshakeAborted::new(state, e)
}
