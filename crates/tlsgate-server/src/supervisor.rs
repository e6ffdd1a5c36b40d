//! Runs every configured tunnel side by side

use std::net::SocketAddr;

use tlsgate_cert::TrustContext;
use tlsgate_proto::tunnel::TunnelSpec;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::tunnel::TunnelListener;
use crate::TunnelError;

/// What to do when one tunnel's listener stops accepting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ListenerFailurePolicy {
    /// Keep the other tunnels serving; give up once none are left.
    #[default]
    StopTunnel,
    /// Stop everything and report the failure.
    ExitProcess,
}

pub struct Supervisor {
    listeners: Vec<TunnelListener>,
    policy: ListenerFailurePolicy,
}

impl Supervisor {
    /// Bind every tunnel. Nothing is served until all binds have succeeded, and the
    /// first failure is returned.
    pub async fn bind(
        specs: Vec<TunnelSpec>,
        trust: &TrustContext,
        policy: ListenerFailurePolicy,
    ) -> Result<Self, TunnelError> {
        if specs.is_empty() {
            return Err(TunnelError::NoTunnels);
        }

        let mut listeners = Vec::with_capacity(specs.len());
        for spec in specs {
            listeners.push(TunnelListener::bind(spec, trust).await?);
        }

        Self::new(listeners, policy)
    }

    /// Supervise tunnels that are already bound.
    pub fn new(
        listeners: Vec<TunnelListener>,
        policy: ListenerFailurePolicy,
    ) -> Result<Self, TunnelError> {
        if listeners.is_empty() {
            return Err(TunnelError::NoTunnels);
        }

        Ok(Self { listeners, policy })
    }

    /// Bound addresses, in the order the tunnels were given.
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.listeners.iter().map(|l| l.local_addr()).collect()
    }

    /// Serve until the failure policy says to stop. Never returns `Ok`.
    pub async fn run(self) -> Result<(), TunnelError> {
        let mut tunnels = JoinSet::new();
        for listener in self.listeners {
            let tunnel = listener.spec().to_string();
            tunnels.spawn(async move { (tunnel, listener.run().await) });
        }

        info!("Serving {} tunnel(s)", tunnels.len());

        while let Some(joined) = tunnels.join_next().await {
            let failure = match joined {
                Ok((tunnel, Err(e))) => {
                    error!("Tunnel {} stopped: {}", tunnel, e);
                    e
                }
                Ok((tunnel, Ok(()))) => {
                    warn!("Tunnel {} stopped", tunnel);
                    continue;
                }
                Err(e) => {
                    error!("Tunnel task failed: {}", e);
                    TunnelError::ListenerPanicked(e.to_string())
                }
            };

            if self.policy == ListenerFailurePolicy::ExitProcess {
                tunnels.abort_all();
                return Err(failure);
            }

            if !tunnels.is_empty() {
                warn!("{} tunnel(s) still serving", tunnels.len());
            }
        }

        Err(TunnelError::AllTunnelsStopped)
    }
}
