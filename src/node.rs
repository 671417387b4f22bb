use crate::config::Config;
use crate::error::ChainError;
use crate::ledger::Ledger;
use crate::network::NetworkNode;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Booting,
    Syncing,
    Ready,
    Stopped,
}

/// One ledger, one listener, one peer set.
pub struct Node {
    pub config: Config,
    pub ledger: Ledger,
    pub network: Arc<NetworkNode>,
    pub state: Arc<RwLock<NodeState>>,
    server: Mutex<Option<JoinHandle<()>>>,
}

impl Node {
    pub fn init(config: Config) -> Result<Self, ChainError> {
        config.validate()?;
        info!("Initializing ledger node (listen = {})", config.network.listen_addr);

        let ledger = Ledger::new();
        let network = NetworkNode::new(ledger.clone()).with_timeouts(
            config.network.connect_timeout(),
            config.network.reply_timeout(),
        );

        Ok(Self {
            config,
            ledger,
            network: Arc::new(network),
            state: Arc::new(RwLock::new(NodeState::Booting)),
            server: Mutex::new(None),
        })
    }

    /// Bind the listener and dial the bootstrap peers. Failing to bind is the
    /// only fatal error; unreachable bootstrap peers are logged.
    pub async fn start(&self) -> Result<SocketAddr, ChainError> {
        if let Some(addr) = &self.config.network.advertise_addr {
            self.network.peers().set_local_addr(addr.clone()).await;
        }

        let (local, handle) = self
            .network
            .start_server(&self.config.network.listen_addr)
            .await?;
        *self.server.lock() = Some(handle);

        *self.state.write().await = NodeState::Syncing;
        for peer in &self.config.network.bootstrap_peers {
            match self.network.connect_peer(peer).await {
                Ok(appended) => info!("Bootstrap peer {}: {} new block(s)", peer, appended),
                Err(e) => warn!("Bootstrap peer {} unavailable: {}", peer, e),
            }
        }
        *self.state.write().await = NodeState::Ready;

        info!(
            "Node ready on {} (height {}, {} peer(s))",
            local,
            self.ledger.height(),
            self.network.peers().peer_count().await
        );
        Ok(local)
    }

    pub async fn state(&self) -> NodeState {
        *self.state.read().await
    }

    /// Stop accepting connections. Connections already being served finish
    /// on their own.
    pub async fn shutdown(&self) {
        let server = self.server.lock().take();
        if let Some(handle) = server {
            handle.abort();
        }
        *self.state.write().await = NodeState::Stopped;
        info!("Node stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn local_config() -> Config {
        let mut config = Config::default();
        config.network.listen_addr = "127.0.0.1:0".to_string();
        config.network.connect_timeout_ms = 500;
        config
    }

    #[tokio::test]
    async fn test_start_binds_and_becomes_ready() {
        tokio::time::timeout(Duration::from_secs(5), async {
            let node = Node::init(local_config()).unwrap();
            assert_eq!(node.state().await, NodeState::Booting);

            let addr = node.start().await.unwrap();
            assert_ne!(addr.port(), 0);
            assert_eq!(node.state().await, NodeState::Ready);
            assert_eq!(node.network.peers().local_addr().await, Some(addr.to_string()));

            node.shutdown().await;
            assert_eq!(node.state().await, NodeState::Stopped);
        })
        .await
        .expect("test_start_binds_and_becomes_ready timed out");
    }

    #[tokio::test]
    async fn test_bind_failure_is_fatal() {
        tokio::time::timeout(Duration::from_secs(5), async {
            let first = Node::init(local_config()).unwrap();
            let addr = first.start().await.unwrap();

            let mut config = local_config();
            config.network.listen_addr = addr.to_string();
            let second = Node::init(config).unwrap();
            assert!(matches!(second.start().await, Err(ChainError::NetworkError(_))));
        })
        .await
        .expect("test_bind_failure_is_fatal timed out");
    }

    #[tokio::test]
    async fn test_unreachable_bootstrap_peer_is_not_fatal() {
        tokio::time::timeout(Duration::from_secs(5), async {
            // Reserve a port, then free it so nothing listens there.
            let closed = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            let dead = closed.local_addr().unwrap().to_string();
            drop(closed);

            let mut config = local_config();
            config.network.bootstrap_peers = vec![dead.clone()];
            let node = Node::init(config).unwrap();
            node.start().await.unwrap();
            assert_eq!(node.state().await, NodeState::Ready);
            assert!(node.network.peers().contains(&dead).await);
        })
        .await
        .expect("test_unreachable_bootstrap_peer_is_not_fatal timed out");
    }

    #[tokio::test]
    async fn test_wildcard_listen_advertises_configured_address_only() {
        tokio::time::timeout(Duration::from_secs(5), async {
            let mut config = local_config();
            config.network.listen_addr = "0.0.0.0:0".to_string();
            let node = Node::init(config.clone()).unwrap();
            node.start().await.unwrap();
            assert_eq!(node.network.peers().local_addr().await, None);
            node.shutdown().await;

            config.network.advertise_addr = Some("10.0.0.7:3000".to_string());
            let node = Node::init(config).unwrap();
            node.start().await.unwrap();
            assert_eq!(
                node.network.peers().local_addr().await,
                Some("10.0.0.7:3000".to_string())
            );
            node.shutdown().await;
        })
        .await
        .expect("test_wildcard_listen_advertises_configured_address_only timed out");
    }

    #[test]
    fn test_init_rejects_invalid_config() {
        let mut config = local_config();
        config.network.reply_timeout_ms = 0;
        assert!(Node::init(config).is_err());
    }
}
