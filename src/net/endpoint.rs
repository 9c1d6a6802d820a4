//! Mesh endpoint
//!
//! Thin wrapper around an iroh endpoint bound to the service namespace.
//! Every session it produces is encrypted by construction; a peer that
//! cannot complete the encrypted handshake (or speaks a different
//! namespace) is rejected at accept time, before the session layer ever
//! sees it. The identity key is generated fresh at process start.

use std::time::Duration;

use iroh::endpoint::Connection;
use iroh::{Endpoint, NodeAddr, SecretKey};

use crate::constants::SERVICE_ALPN;
use crate::error::{NetworkError, SessionError};
use crate::session::PeerId;

/// Endpoint bound to the voicemesh service namespace
pub struct MeshEndpoint {
    endpoint: Endpoint,
    node_id: PeerId,
}

impl MeshEndpoint {
    /// Bind a new endpoint with a fresh process-local identity and local
    /// network discovery enabled.
    pub async fn bind() -> Result<Self, NetworkError> {
        let secret_key = SecretKey::generate(rand::thread_rng());
        let node_id = secret_key.public();

        let endpoint = Endpoint::builder()
            .secret_key(secret_key)
            .alpns(vec![SERVICE_ALPN.to_vec()])
            .discovery_local_network()
            .bind()
            .await
            .map_err(|e| NetworkError::BindFailed(e.to_string()))?;

        tracing::info!(node_id = %node_id, "Mesh endpoint bound");

        Ok(Self { endpoint, node_id })
    }

    /// This node's process-local identifier
    pub fn node_id(&self) -> PeerId {
        self.node_id
    }

    /// Dial a discovered peer, bounded by `timeout`.
    pub async fn connect(
        &self,
        peer: PeerId,
        timeout: Duration,
    ) -> Result<Connection, SessionError> {
        let dial = self.endpoint.connect(NodeAddr::new(peer), SERVICE_ALPN);
        match tokio::time::timeout(timeout, dial).await {
            Ok(Ok(conn)) => Ok(conn),
            Ok(Err(e)) => Err(SessionError::Rejected(e.to_string())),
            Err(_) => Err(SessionError::ConnectTimeout(timeout)),
        }
    }

    /// Accept the next inbound session. `None` means the endpoint closed.
    ///
    /// The encrypted handshake and namespace check have already succeeded
    /// by the time a connection is returned.
    pub async fn accept(&self) -> Option<Connection> {
        loop {
            let incoming = self.endpoint.accept().await?;
            match incoming.await {
                Ok(conn) => return Some(conn),
                Err(e) => {
                    tracing::debug!("Inbound handshake failed: {}", e);
                    continue;
                }
            }
        }
    }

    /// Peers currently visible on the local network (excluding self)
    pub fn discovered_peers(&self) -> Vec<PeerId> {
        self.endpoint
            .remote_info_iter()
            .filter(|info| info.node_id != self.node_id)
            .filter(|info| !info.addrs.is_empty())
            .map(|info| info.node_id)
            .collect()
    }

    /// Close the endpoint and all its sessions
    pub async fn close(&self) {
        self.endpoint.close().await;
    }
}
