//! TLS listener that only yields fully handshaken, client-authenticated connections
//!
//! The TCP accept loop never waits on a handshake. Each handshake runs in its own task
//! and successful ones are queued for [`TlsListener::accept`], so a slow or hostile
//! client cannot hold up anyone else. Failed handshakes are logged and dropped here;
//! callers never see them.

use std::io;
use std::net::SocketAddr;

use tlsgate_proto::endpoint::Endpoint;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, Instrument};

use crate::TunnelError;

/// Server side of an authenticated TLS session.
pub type TlsConnection = tokio_rustls::server::TlsStream<TcpStream>;

/// One accepted connection, or the error that stopped the accept loop.
pub type Incoming = io::Result<(TlsConnection, SocketAddr)>;

const HANDSHAKE_QUEUE_DEPTH: usize = 64;

pub struct TlsListener {
    local_addr: SocketAddr,
    incoming: mpsc::Receiver<Incoming>,
    accept_task: Option<JoinHandle<()>>,
}

impl TlsListener {
    /// Bind the TCP socket for `endpoint` and start accepting in the background.
    pub async fn bind(endpoint: &Endpoint, acceptor: TlsAcceptor) -> Result<Self, TunnelError> {
        let listener = TcpListener::bind(endpoint.as_pair())
            .await
            .map_err(|e| TunnelError::BindError {
                address: endpoint.host().to_string(),
                port: endpoint.port(),
                reason: e.to_string(),
            })?;

        Self::from_tcp(listener, acceptor).map_err(TunnelError::from)
    }

    /// Wrap an already bound TCP listener.
    pub fn from_tcp(listener: TcpListener, acceptor: TlsAcceptor) -> io::Result<Self> {
        let local_addr = listener.local_addr()?;
        let (tx, incoming) = mpsc::channel(HANDSHAKE_QUEUE_DEPTH);
        let accept_task = tokio::spawn(accept_loop(listener, acceptor, tx).in_current_span());

        Ok(Self {
            local_addr,
            incoming,
            accept_task: Some(accept_task),
        })
    }

    /// Serve connections accepted elsewhere and delivered over `incoming`.
    ///
    /// Closing the sender ends the listener like a failed accept loop does.
    pub fn from_incoming(local_addr: SocketAddr, incoming: mpsc::Receiver<Incoming>) -> Self {
        Self {
            local_addr,
            incoming,
            accept_task: None,
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait for the next authenticated connection.
    ///
    /// An error means the underlying TCP listener failed; it is returned once and the
    /// listener is unusable afterwards.
    pub async fn accept(&mut self) -> Incoming {
        match self.incoming.recv().await {
            Some(incoming) => incoming,
            None => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "TLS accept loop has stopped",
            )),
        }
    }
}

impl Drop for TlsListener {
    fn drop(&mut self) {
        if let Some(task) = &self.accept_task {
            task.abort();
        }
    }
}

async fn accept_loop(listener: TcpListener, acceptor: TlsAcceptor, tx: mpsc::Sender<Incoming>) {
    loop {
        let (socket, peer_addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                let _ = tx.send(Err(e)).await;
                return;
            }
        };

        debug!("TCP connection from {}, starting TLS handshake", peer_addr);

        let acceptor = acceptor.clone();
        let tx = tx.clone();
        tokio::spawn(
            async move {
                match acceptor.accept(socket).await {
                    Ok(stream) => {
                        if tx.send(Ok((stream, peer_addr))).await.is_err() {
                            debug!("Listener closed, dropping connection from {}", peer_addr);
                        }
                    }
                    Err(e) => {
                        debug!("TLS handshake with {} failed: {}", peer_addr, e);
                    }
                }
            }
            .in_current_span(),
        );
    }
}
