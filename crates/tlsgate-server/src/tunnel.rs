//! One configured tunnel: a TLS listener bound to the local endpoint, forwarding every
//! authenticated connection to the remote endpoint

use std::net::SocketAddr;
use std::sync::Arc;

use tlsgate_cert::TrustContext;
use tlsgate_proto::tunnel::TunnelSpec;
use tokio_rustls::TlsAcceptor;
use tracing::{info, info_span, warn, Instrument, Span};

use crate::forwarder::ConnectionForwarder;
use crate::listener::TlsListener;
use crate::TunnelError;

/// Hands out connection ids 0, 1, 2, ... for a single listener.
///
/// Takes `&mut self`, so the accept loop that owns it is the only writer.
#[derive(Debug, Default)]
pub struct ConnectionIdGenerator {
    next: u64,
}

impl ConnectionIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generate(&mut self) -> u64 {
        let id = self.next;
        self.next += 1;
        id
    }
}

pub struct TunnelListener {
    spec: TunnelSpec,
    listener: TlsListener,
    connection_ids: ConnectionIdGenerator,
    span: Span,
}

impl TunnelListener {
    pub async fn bind(spec: TunnelSpec, trust: &TrustContext) -> Result<Self, TunnelError> {
        let span = tunnel_span(&spec);
        let acceptor = TlsAcceptor::from(trust.server_config());

        let listener = TlsListener::bind(spec.local(), acceptor)
            .instrument(span.clone())
            .await?;

        Ok(Self::with_span(spec, listener, span))
    }

    /// Forward connections from a listener that is already running.
    pub fn new(spec: TunnelSpec, listener: TlsListener) -> Self {
        let span = tunnel_span(&spec);
        Self::with_span(spec, listener, span)
    }

    fn with_span(spec: TunnelSpec, listener: TlsListener, span: Span) -> Self {
        span.in_scope(|| {
            info!(
                "Listening on {}, forwarding to {}",
                listener.local_addr(),
                spec.remote()
            )
        });

        Self {
            spec,
            listener,
            connection_ids: ConnectionIdGenerator::new(),
            span,
        }
    }

    pub fn spec(&self) -> &TunnelSpec {
        &self.spec
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr()
    }

    /// Accept connections until the listener fails.
    ///
    /// Each connection is forwarded on its own task. This only returns with the
    /// listener's accept error; sessions already running are left alone.
    pub async fn run(mut self) -> Result<(), TunnelError> {
        let span = self.span.clone();
        self.accept_loop().instrument(span).await
    }

    async fn accept_loop(&mut self) -> Result<(), TunnelError> {
        let remote = Arc::new(self.spec.remote().clone());

        loop {
            let (stream, peer_addr) =
                self.listener
                    .accept()
                    .await
                    .map_err(|source| TunnelError::AcceptError {
                        local: self.spec.local().to_string(),
                        source,
                    })?;

            let connection_id = self.connection_ids.generate();
            info!("#{}: accepted connection from {}", connection_id, peer_addr);

            let forwarder = ConnectionForwarder::new(connection_id, remote.clone());
            tokio::spawn(
                async move {
                    if let Err(e) = forwarder.forward(stream).await {
                        warn!("#{}: {}", connection_id, e);
                    }
                }
                .in_current_span(),
            );
        }
    }
}

fn tunnel_span(spec: &TunnelSpec) -> Span {
    info_span!("tunnel", local = %spec.local(), remote = %spec.remote())
}
