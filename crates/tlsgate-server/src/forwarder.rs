//! Dials the remote endpoint for one authenticated client and runs its session

use std::sync::Arc;

use tlsgate_proto::endpoint::Endpoint;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, info};

use crate::listener::TlsConnection;
use crate::pump::{ConnectionSession, SessionReport};
use crate::TunnelError;

pub struct ConnectionForwarder {
    connection_id: u64,
    remote: Arc<Endpoint>,
}

impl ConnectionForwarder {
    pub fn new(connection_id: u64, remote: Arc<Endpoint>) -> Self {
        Self {
            connection_id,
            remote,
        }
    }

    /// Connect to the remote endpoint and relay until either side closes.
    ///
    /// When the dial fails the client is sent a TLS close and dropped; nothing else
    /// in the tunnel is affected.
    pub async fn forward(self, mut client: TlsConnection) -> Result<SessionReport, TunnelError> {
        let remote = match TcpStream::connect(self.remote.as_pair()).await {
            Ok(stream) => stream,
            Err(source) => {
                if let Err(e) = client.shutdown().await {
                    debug!("#{}: closing client failed: {}", self.connection_id, e);
                }
                return Err(TunnelError::DialError {
                    address: self.remote.to_string(),
                    source,
                });
            }
        };

        match remote.peer_addr() {
            Ok(addr) => info!("#{}: dialed {}", self.connection_id, addr),
            Err(_) => info!("#{}: dialed {}", self.connection_id, self.remote),
        }

        Ok(ConnectionSession::new(self.connection_id, client, remote)
            .run()
            .await)
    }
}
