//! The local accept loop.
use core::{future::Future, time::Duration};
use std::{
    io,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use tokio::net::TcpListener;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::{
    initiator::{Dialer, HandshakeState, Initiator, TcpDialer},
    state::SessionState,
};

/// Pause after a failed accept, so that running out of descriptors does not
/// turn into a busy loop.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Accepts local connections and hands each one to its own handshake task.
#[derive(Debug)]
pub struct Client<D = TcpDialer> {
    listener: TcpListener,
    initiator: Arc<Initiator<D>>,
    next_id: AtomicU64,
}

impl Client<TcpDialer> {
    /// Binds the configured local endpoint.
    pub async fn bind(state: SessionState) -> io::Result<Self> {
        Self::bind_with_dialer(state, TcpDialer).await
    }
}

impl<D> Client<D>
where
    D: Dialer + Send + Sync + 'static,
{
    /// Binds the configured local endpoint, dialing the remote server
    /// through `dialer`.
    pub async fn bind_with_dialer(state: SessionState, dialer: D) -> io::Result<Self> {
        let local = state.config().local();
        let listener = TcpListener::bind((local.host(), local.port())).await?;
        Ok(Self {
            listener,
            initiator: Arc::new(Initiator::with_dialer(Arc::new(state), dialer)),
            next_id: AtomicU64::new(0),
        })
    }

    /// The address actually bound, useful when the configured port is 0.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections forever.
    pub async fn run(self) {
        self.run_until(core::future::pending::<()>()).await
    }

    /// Accepts connections until `shutdown` completes.
    ///
    /// Connections already accepted keep running in their own tasks.
    pub async fn run_until<S: Future<Output = ()>>(self, shutdown: S) {
        if let Ok(addr) = self.local_addr() {
            info!(%addr, remote = %self.initiator.session_state().config().remote(), "listening");
        }
        tokio::pin!(shutdown);
        loop {
            let accepted = tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => accepted,
            };
            let (sock, peer) = match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            };
            if let Err(e) = sock.set_nodelay(true) {
                debug!(error = %e, "set_nodelay failed");
            }

            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            let initiator = self.initiator.clone();
            tokio::spawn(
                async move {
                    debug!("accepted");
                    match initiator.serve(sock).await {
                        Ok(summary) => info!(
                            uploaded = summary.uploaded,
                            downloaded = summary.downloaded,
                            "connection closed"
                        ),
                        Err(e) => warn!(
                            state = %HandshakeState::Aborted,
                            failed_in = %e.state(),
                            error = %e.io_error(),
                            "handshake aborted"
                        ),
                    }
                }
                .instrument(info_span!("conn", id, %peer)),
            );
        }
        info!("listener stopped");
    }
}

#[cfg(test)]
mod test {
    use tokio::{
        io::AsyncReadExt,
        net::{TcpListener, TcpStream},
        sync::oneshot,
        time::timeout,
    };

    use super::*;
    use crate::{
        config::{Config, Endpoint},
        test::PipeDialer,
    };

    fn loopback_state(remote_port: u16) -> SessionState {
        let config = Config::builder(
            Endpoint::new("127.0.0.1", 0),
            Endpoint::new("127.0.0.1", remote_port),
        )
        .with_password("listener test")
        .with_server_name("www.example.com")
        .build();
        SessionState::new(config)
    }

    #[tokio::test]
    async fn test_unreachable_remote_closes_local() {
        // Reserve a port, then free it so nothing listens there.
        let port = TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let client = Client::bind(loopback_state(port)).await.unwrap();
        let addr = client.local_addr().unwrap();
        tokio::spawn(client.run());

        let mut local = TcpStream::connect(addr).await.unwrap();
        let mut buf = [0u8; 8];
        let n = timeout(Duration::from_secs(5), local.read(&mut buf))
            .await
            .unwrap()
            .unwrap_or(0);
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn test_accepts_many_connections() {
        let (dialer, mut servers) = PipeDialer::new(0);
        let client = Client::bind_with_dialer(loopback_state(443), dialer)
            .await
            .unwrap();
        let addr = client.local_addr().unwrap();
        tokio::spawn(client.run());

        let mut locals = Vec::new();
        for _ in 0..4 {
            locals.push(TcpStream::connect(addr).await.unwrap());
        }
        for _ in 0..4 {
            timeout(Duration::from_secs(5), servers.recv())
                .await
                .unwrap()
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_run_until_stops_accepting() {
        let client = Client::bind(loopback_state(443)).await.unwrap();
        let (stop, stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(client.run_until(async {
            let _ = stopped.await;
        }));
        stop.send(()).unwrap();
        timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
    }
}
