//! Shared fixtures: an in-memory PKI, TLS clients, and plaintext remote endpoints

#![allow(dead_code)]

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use tlsgate_cert::{CertificateAuthority, IssuedCertificate, TrustContext};
use tlsgate_proto::tunnel::TunnelSpec;
use tlsgate_server::TunnelListener;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

pub const WAIT: Duration = Duration::from_secs(5);

/// How long to watch a remote listener to conclude nobody dialed it.
pub const NO_DIAL_WINDOW: Duration = Duration::from_millis(300);

// ============================================================================
// PKI
// ============================================================================

pub struct TestPki {
    pub server_ca: CertificateAuthority,
    pub client_ca: CertificateAuthority,
    pub trust: TrustContext,
    pub client: IssuedCertificate,
}

impl TestPki {
    pub fn new() -> Self {
        let server_ca = CertificateAuthority::generate("tlsgate test server CA").unwrap();
        let client_ca = CertificateAuthority::generate("tlsgate test client CA").unwrap();

        let server = server_ca.issue_server(&["localhost"]).unwrap();
        let trust = TrustContext::from_parts(
            vec![server.to_identity("localhost")],
            vec![client_ca.cert_der()],
        )
        .unwrap();
        let client = client_ca.issue_client("test-client").unwrap();

        Self {
            server_ca,
            client_ca,
            trust,
            client,
        }
    }

    /// Client that presents `self.client`.
    pub fn trusted_client(&self) -> Arc<ClientConfig> {
        client_config(&self.server_ca, Some(&self.client))
    }

    /// Client that presents no certificate at all.
    pub fn anonymous_client(&self) -> Arc<ClientConfig> {
        client_config(&self.server_ca, None)
    }
}

pub fn client_config(
    server_ca: &CertificateAuthority,
    identity: Option<&IssuedCertificate>,
) -> Arc<ClientConfig> {
    tlsgate_cert::ensure_crypto_provider();

    let mut roots = RootCertStore::empty();
    roots.add(server_ca.cert_der()).unwrap();
    let builder = ClientConfig::builder().with_root_certificates(roots);

    let config = match identity {
        Some(identity) => builder
            .with_client_auth_cert(identity.cert_chain(), identity.private_key())
            .unwrap(),
        None => builder.with_no_client_auth(),
    };
    Arc::new(config)
}

// ============================================================================
// NETWORK
// ============================================================================

pub async fn connect(
    addr: SocketAddr,
    config: Arc<ClientConfig>,
) -> io::Result<TlsStream<TcpStream>> {
    let tcp = TcpStream::connect(addr).await?;
    let server_name = ServerName::try_from("localhost").unwrap();
    TlsConnector::from(config).connect(server_name, tcp).await
}

/// Plaintext listener standing in for the remote service.
pub async fn remote_listener() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

/// A loopback port with nothing listening on it.
pub fn unused_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

pub fn loopback_spec(remote_port: u16) -> TunnelSpec {
    format!("127.0.0.1:0:127.0.0.1:{}", remote_port)
        .parse()
        .unwrap()
}

/// Bind a tunnel on an ephemeral loopback port and serve it in the background.
pub async fn start_tunnel(trust: &TrustContext, remote_port: u16) -> SocketAddr {
    let tunnel = TunnelListener::bind(loopback_spec(remote_port), trust)
        .await
        .unwrap();
    let addr = tunnel.local_addr();
    tokio::spawn(tunnel.run());
    addr
}

/// Remote service that echoes every byte back until the tunnel closes.
pub async fn spawn_echo_remote() -> SocketAddr {
    let (listener, addr) = remote_listener().await;
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut reader, mut writer) = socket.split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            });
        }
    });
    addr
}

/// Read until the peer stops sending, treating a TLS close without `close_notify` as
/// the end of the stream too.
pub async fn read_until_closed<S>(stream: &mut S) -> Vec<u8>
where
    S: AsyncRead + Unpin,
{
    let mut received = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => return received,
            Ok(n) => received.extend_from_slice(&buf[..n]),
        }
    }
}

/// Assert the tunnel refused this client: either the handshake fails outright or, with
/// TLS 1.3, the server's alert surfaces on the first read.
pub async fn assert_rejected(addr: SocketAddr, config: Arc<ClientConfig>) {
    let mut stream = match tokio::time::timeout(WAIT, connect(addr, config))
        .await
        .expect("handshake timed out")
    {
        Err(_) => return,
        Ok(stream) => stream,
    };

    let _ = stream.write_all(b"hello").await;
    let mut buf = [0u8; 16];
    let read = tokio::time::timeout(WAIT, stream.read(&mut buf))
        .await
        .expect("rejected client was left hanging");
    assert!(
        matches!(read, Err(_) | Ok(0)),
        "rejected client read data: {:?}",
        read
    );
}
