//! Peer registry for chain synchronization
//!
//! Tracks the addresses this node pushes its chain to, plus a little
//! bookkeeping about each one (last contact, delivered pushes, failed dials).
//! Peers are never dropped automatically; an unreachable peer is simply
//! skipped for that broadcast.

use crate::error::ChainError;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

/// Peer sync information
#[derive(Debug, Clone)]
pub struct PeerInfo {
    pub addr: String,
    pub last_seen: Instant,
    pub deliveries: u64,
    pub failures: u32,
}

impl PeerInfo {
    pub fn new(addr: String) -> Self {
        Self {
            addr,
            last_seen: Instant::now(),
            deliveries: 0,
            failures: 0,
        }
    }
}

/// The set of peer addresses known to this node.
#[derive(Clone, Default)]
pub struct PeerSet {
    peers: Arc<RwLock<HashMap<String, PeerInfo>>>,
    /// Our own advertised address; never registered as a peer.
    local_addr: Arc<RwLock<Option<String>>>,
}

impl PeerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_local_addr(&self, addr: impl Into<String>) {
        *self.local_addr.write().await = Some(addr.into());
    }

    pub async fn local_addr(&self) -> Option<String> {
        self.local_addr.read().await.clone()
    }

    /// Register a peer. Returns `true` if it was not known before. Known
    /// peers only get their `last_seen` refreshed.
    pub async fn register_peer(&self, addr: &str) -> Result<bool, ChainError> {
        let addr = addr.trim();
        if addr.is_empty() {
            return Err(ChainError::NetworkError("Peer address is empty".to_string()));
        }
        if self.local_addr.read().await.as_deref() == Some(addr) {
            return Ok(false);
        }

        let mut peers = self.peers.write().await;
        match peers.get_mut(addr) {
            Some(peer) => {
                peer.last_seen = Instant::now();
                Ok(false)
            }
            None => {
                peers.insert(addr.to_string(), PeerInfo::new(addr.to_string()));
                Ok(true)
            }
        }
    }

    /// Remove a peer
    pub async fn remove_peer(&self, addr: &str) -> Result<(), ChainError> {
        self.peers
            .write()
            .await
            .remove(addr)
            .ok_or_else(|| ChainError::NetworkError("Peer not found".to_string()))?;
        Ok(())
    }

    pub async fn contains(&self, addr: &str) -> bool {
        self.peers.read().await.contains_key(addr)
    }

    /// Snapshot of every peer address, sorted for stable output.
    pub async fn all_peers(&self) -> Vec<String> {
        let mut addrs: Vec<String> = self.peers.read().await.keys().cloned().collect();
        addrs.sort();
        addrs
    }

    pub async fn peer_info(&self, addr: &str) -> Option<PeerInfo> {
        self.peers.read().await.get(addr).cloned()
    }

    pub async fn peer_count(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn record_delivery(&self, addr: &str) {
        if let Some(peer) = self.peers.write().await.get_mut(addr) {
            peer.deliveries += 1;
            peer.last_seen = Instant::now();
        }
    }

    pub async fn record_failure(&self, addr: &str) {
        if let Some(peer) = self.peers.write().await.get_mut(addr) {
            peer.failures += 1;
        }
    }
}
