//! Peer-to-peer networking: the TCP listener, the per-connection command
//! dispatcher, chain broadcast and the outbound `connect` handshake.

use crate::blockchain::{ApplyOutcome, Block};
use crate::crypto::short_hex;
use crate::error::ChainError;
use crate::ledger::Ledger;
use crate::protocol::Message;
use crate::sync::PeerSet;
use crate::wire::{PipeCodec, WireCodec};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// What the dispatcher knows about the other end of a connection.
#[derive(Debug, Clone, Default)]
pub struct ConnectionContext {
    pub remote: Option<SocketAddr>,
    /// Listening address announced with `HELLO`, if any.
    pub advertised: Option<String>,
}

impl ConnectionContext {
    pub fn new(remote: SocketAddr) -> Self {
        Self {
            remote: Some(remote),
            advertised: None,
        }
    }

    /// Label for this sender in logs: the advertised address when known,
    /// otherwise the socket address.
    pub fn sender(&self) -> Option<String> {
        self.advertised
            .clone()
            .or_else(|| self.remote.map(|addr| addr.to_string()))
    }
}

#[derive(Clone)]
pub struct NetworkNode {
    ledger: Ledger,
    peers: PeerSet,
    codec: Arc<dyn WireCodec>,
    connect_timeout: Duration,
    reply_timeout: Duration,
}

impl NetworkNode {
    pub fn new(ledger: Ledger) -> Self {
        Self {
            ledger,
            peers: PeerSet::new(),
            codec: Arc::new(PipeCodec),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
        }
    }

    pub fn with_timeouts(mut self, connect_timeout: Duration, reply_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self.reply_timeout = reply_timeout;
        self
    }

    pub fn with_codec(mut self, codec: Arc<dyn WireCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn peers(&self) -> &PeerSet {
        &self.peers
    }

    pub fn codec(&self) -> &dyn WireCodec {
        self.codec.as_ref()
    }

    pub async fn bind(addr: &str) -> Result<TcpListener, ChainError> {
        TcpListener::bind(addr)
            .await
            .map_err(|e| ChainError::NetworkError(format!("Failed to bind {}: {}", addr, e)))
    }

    /// Bind `addr` and spawn the accept loop. Returns the bound address, which
    /// also becomes the advertised address unless one was configured.
    pub async fn start_server(&self, addr: &str) -> Result<(SocketAddr, JoinHandle<()>), ChainError> {
        let listener = Self::bind(addr).await?;
        let local = listener.local_addr()?;
        if self.peers.local_addr().await.is_none() {
            if local.ip().is_unspecified() {
                warn!(
                    "Listening on wildcard {}; set advertise_addr so peers can dial back",
                    local
                );
            } else {
                self.peers.set_local_addr(local.to_string()).await;
            }
        }
        info!("Listening for peers on {}", local);
        Ok((local, self.serve(listener)))
    }

    /// Spawn the accept loop on an already bound listener; one task per
    /// accepted connection.
    pub fn serve(&self, listener: TcpListener) -> JoinHandle<()> {
        let node = self.clone();
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, remote)) => {
                        debug!("Accepted connection from {}", remote);
                        let node = node.clone();
                        tokio::spawn(async move {
                            if let Err(e) = node.handle_connection(stream, remote).await {
                                debug!("Connection {} ended: {}", remote, e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                }
            }
        })
    }

    /// Read lines until the peer closes the connection, writing one reply
    /// line for every command that has one.
    pub async fn handle_connection(&self, stream: TcpStream, remote: SocketAddr) -> Result<(), ChainError> {
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();
        let mut ctx = ConnectionContext::new(remote);

        while let Some(line) = lines.next_line().await? {
            if let Some(reply) = self.handle_message(&line, &mut ctx).await {
                writer.write_all(reply.as_bytes()).await?;
                writer.write_all(b"\n").await?;
                writer.flush().await?;
            }
        }
        debug!("Peer {} closed the connection", remote);
        Ok(())
    }

    /// Dispatch one protocol line. Returns the reply line, if the command
    /// has one. Nothing here closes the connection.
    pub async fn handle_message(&self, line: &str, ctx: &mut ConnectionContext) -> Option<String> {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            return None;
        }

        let message = match Message::parse(line, self.codec()) {
            Ok(message) => message,
            Err(e) => {
                warn!("Rejected line from {:?}: {}", ctx.sender(), e);
                return Some(self.reply(Message::Error(e.to_string())));
            }
        };

        match message {
            Message::Hello(addr) => {
                match self.peers.register_peer(&addr).await {
                    Ok(true) => info!("New peer {} announced itself", addr),
                    Ok(false) => {}
                    Err(e) => warn!("Ignoring HELLO: {}", e),
                }
                ctx.advertised = Some(addr);
                None
            }
            Message::AddBlock(record) => match self.ledger.apply_record(record) {
                Ok(ApplyOutcome::Appended(hash)) => {
                    info!("Added block {} from {:?}", short_hex(&hash), ctx.sender());
                    self.spawn_broadcast();
                    Some(self.reply(Message::BlockAdded(hash)))
                }
                Ok(ApplyOutcome::AlreadyKnown(hash)) => Some(self.reply(Message::BlockKnown(hash))),
                Err(e) => {
                    warn!("Rejected block from {:?}: {}", ctx.sender(), e);
                    Some(self.reply(Message::Error(e.to_string())))
                }
            },
            Message::RequestChain => {
                let chain = self.ledger.encode_chain(self.codec());
                Some(self.reply(Message::ReceiveChain(chain)))
            }
            Message::ReceiveChain(payload) => {
                // Only a HELLO address is dialable; the socket address of an
                // inbound connection is an ephemeral port.
                if let Some(addr) = &ctx.advertised {
                    if let Err(e) = self.peers.register_peer(addr).await {
                        warn!("Could not record sender {}: {}", addr, e);
                    }
                }
                let sender = ctx.sender();
                match self.apply_chain(&payload, sender.as_deref().unwrap_or("unknown peer")) {
                    Ok(_) => None,
                    Err(e) => Some(self.reply(Message::Error(e.to_string()))),
                }
            }
            Message::QueryTransaction(tx) => {
                let found = self.ledger.query_transaction(tx.as_bytes());
                Some(self.reply(Message::QueryResult(found)))
            }
            Message::BuildMerkleTree => {
                let root = self.ledger.history_merkle_root();
                Some(self.reply(Message::MerkleRoot(root)))
            }
            Message::MerkleRoot(root) => {
                info!("Unsolicited Merkle root from {:?}: {}", ctx.sender(), short_hex(&root));
                None
            }
            Message::PrintChain => Some(self.reply(Message::Error(
                "PRINT_CHAIN is only available on the local console".to_string(),
            ))),
            Message::QueryResult(found) => {
                info!("Unsolicited query result from {:?}: {}", ctx.sender(), found);
                None
            }
            Message::BlockAdded(_) | Message::BlockKnown(_) => None,
            Message::Error(msg) => {
                warn!("Peer {:?} reported: {}", ctx.sender(), msg);
                None
            }
        }
    }

    fn reply(&self, message: Message) -> String {
        message.encode(self.codec())
    }

    /// Decode a received chain and apply every record in order. Rejected
    /// records are logged and skipped. Returns the number of blocks appended.
    fn apply_chain(&self, payload: &str, sender: &str) -> Result<usize, ChainError> {
        let records = self.codec.decode_chain(payload)?;
        let total = records.len();
        let mut appended = 0;
        for (i, result) in self.ledger.apply_records(records).into_iter().enumerate() {
            match result {
                Ok(outcome) if outcome.is_appended() => appended += 1,
                Ok(_) => {}
                Err(e) => warn!("Skipping block {} of chain from {}: {}", i, sender, e),
            }
        }
        if appended > 0 {
            info!(
                "Synchronized {} new block(s) from {} ({} received)",
                appended, sender, total
            );
        } else {
            debug!("Chain from {} had nothing new ({} received)", sender, total);
        }
        Ok(appended)
    }

    fn spawn_broadcast(&self) {
        let node = self.clone();
        tokio::spawn(async move {
            node.broadcast_chain().await;
        });
    }

    /// Mine the mempool into a new block, then push the chain to every peer.
    pub async fn mine_block(&self) -> Block {
        let block = self.ledger.mine_block();
        info!(
            "Mined block {} with {} transaction(s)",
            short_hex(&block.hash),
            block.transactions.len()
        );
        self.broadcast_chain().await;
        block
    }

    /// Push the current chain to every known peer, one dial each, all in
    /// parallel. Unreachable peers are logged and skipped. Returns how many
    /// peers received the chain.
    pub async fn broadcast_chain(&self) -> usize {
        let peers = self.peers.all_peers().await;
        if peers.is_empty() {
            debug!("No peers to broadcast to");
            return 0;
        }

        // Serialized under the ledger lock; the lock is released before dialing.
        let chain = self.ledger.encode_chain(self.codec());
        let mut payload = String::new();
        if let Some(local) = self.peers.local_addr().await {
            payload.push_str(&self.reply(Message::Hello(local)));
            payload.push('\n');
        }
        payload.push_str(&self.reply(Message::ReceiveChain(chain)));
        payload.push('\n');
        let payload: Arc<str> = Arc::from(payload);

        let mut dials = JoinSet::new();
        for addr in peers {
            let payload = payload.clone();
            let connect_timeout = self.connect_timeout;
            dials.spawn(async move {
                let result = push_lines(&addr, &payload, connect_timeout).await;
                (addr, result)
            });
        }

        let mut delivered = 0;
        while let Some(joined) = dials.join_next().await {
            match joined {
                Ok((addr, Ok(()))) => {
                    debug!("Chain delivered to {}", addr);
                    self.peers.record_delivery(&addr).await;
                    delivered += 1;
                }
                Ok((addr, Err(e))) => {
                    warn!("Broadcast to {} failed: {}", addr, e);
                    self.peers.record_failure(&addr).await;
                }
                Err(e) => error!("Broadcast task failed: {}", e),
            }
        }
        info!("Broadcast chain to {} peer(s)", delivered);
        delivered
    }

    /// Register `addr` as a peer, request its chain and apply it. Returns the
    /// number of blocks appended locally.
    pub async fn connect_peer(&self, addr: &str) -> Result<usize, ChainError> {
        let local = self.peers.local_addr().await;
        if local.as_deref() == Some(addr.trim()) {
            return Err(ChainError::NetworkError(
                "Refusing to connect to our own address".to_string(),
            ));
        }
        if self.peers.register_peer(addr).await? {
            info!("Registered peer {}", addr);
        }

        let stream = dial(addr, self.connect_timeout).await?;
        let (reader, mut writer) = stream.into_split();

        let mut request = String::new();
        if let Some(local) = local {
            request.push_str(&self.reply(Message::Hello(local)));
            request.push('\n');
        }
        request.push_str(&self.reply(Message::RequestChain));
        request.push('\n');
        writer.write_all(request.as_bytes()).await?;
        writer.flush().await?;

        let mut lines = BufReader::new(reader).lines();
        let line = match timeout(self.reply_timeout, lines.next_line()).await {
            Ok(Ok(Some(line))) => line,
            Ok(Ok(None)) => {
                return Err(ChainError::NetworkError(format!(
                    "{} closed the connection without replying",
                    addr
                )))
            }
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                return Err(ChainError::NetworkError(format!(
                    "No reply from {} within {:?}",
                    addr, self.reply_timeout
                )))
            }
        };

        match Message::parse(line.trim_end_matches('\r'), self.codec())? {
            Message::ReceiveChain(payload) => self.apply_chain(&payload, addr),
            Message::Error(msg) => Err(ChainError::NetworkError(format!(
                "{} replied with an error: {}",
                addr, msg
            ))),
            other => Err(ChainError::MalformedMessage(format!(
                "expected RECEIVE_CHAIN from {}, got {}",
                addr,
                other.name()
            ))),
        }
    }
}

async fn dial(addr: &str, connect_timeout: Duration) -> Result<TcpStream, ChainError> {
    match timeout(connect_timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(ChainError::NetworkError(format!(
            "Failed to connect to {}: {}",
            addr, e
        ))),
        Err(_) => Err(ChainError::NetworkError(format!(
            "Connection to {} timed out after {:?}",
            addr, connect_timeout
        ))),
    }
}

/// Open a connection, write `payload` and close the write side.
async fn push_lines(addr: &str, payload: &str, connect_timeout: Duration) -> Result<(), ChainError> {
    let mut stream = dial(addr, connect_timeout).await?;
    stream.write_all(payload.as_bytes()).await?;
    stream.shutdown().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hash_to_hex;
    use crate::transaction::Transaction;
    use crate::wire::BlockRecord;

    fn ctx() -> ConnectionContext {
        ConnectionContext::new("127.0.0.1:45000".parse().unwrap())
    }

    #[tokio::test]
    async fn test_blank_lines_are_ignored() {
        tokio::time::timeout(Duration::from_secs(5), async {
            let node = NetworkNode::new(Ledger::new());
            assert_eq!(node.handle_message("", &mut ctx()).await, None);
            assert_eq!(node.handle_message("  \r", &mut ctx()).await, None);
        })
        .await
        .expect("test_blank_lines_are_ignored timed out");
    }

    #[tokio::test]
    async fn test_unknown_command_gets_error_reply() {
        tokio::time::timeout(Duration::from_secs(5), async {
            let node = NetworkNode::new(Ledger::new());
            let reply = node.handle_message("FROBNICATE|1", &mut ctx()).await.unwrap();
            assert!(reply.starts_with("ERROR|"));
            assert_eq!(node.ledger().height(), 1);
        })
        .await
        .expect("test_unknown_command_gets_error_reply timed out");
    }

    #[tokio::test]
    async fn test_print_chain_is_refused_over_network() {
        tokio::time::timeout(Duration::from_secs(5), async {
            let node = NetworkNode::new(Ledger::new());
            let reply = node.handle_message("PRINT_CHAIN", &mut ctx()).await.unwrap();
            assert!(reply.starts_with("ERROR|"));
        })
        .await
        .expect("test_print_chain_is_refused_over_network timed out");
    }

    #[tokio::test]
    async fn test_add_block_then_resend() {
        tokio::time::timeout(Duration::from_secs(5), async {
            let node = NetworkNode::new(Ledger::new());
            let parent = node.ledger().latest_block().hash.to_vec();
            let block = Block::new(parent, vec![Transaction::from("remote")], 1_700_000_000);
            let line = Message::AddBlock(BlockRecord::from(&block)).encode(&PipeCodec);

            let first = node.handle_message(&line, &mut ctx()).await.unwrap();
            assert_eq!(first, format!("BLOCK_ADDED|{}", hash_to_hex(&block.hash)));
            let second = node.handle_message(&line, &mut ctx()).await.unwrap();
            assert_eq!(second, format!("BLOCK_KNOWN|{}", hash_to_hex(&block.hash)));

            assert_eq!(node.ledger().height(), 2);
            assert_eq!(node.ledger().latest_block(), block);
        })
        .await
        .expect("test_add_block_then_resend timed out");
    }

    #[tokio::test]
    async fn test_query_transaction_reply() {
        tokio::time::timeout(Duration::from_secs(5), async {
            let node = NetworkNode::new(Ledger::new());
            node.ledger().add_transaction_to_mempool(Transaction::from("paid"));
            node.ledger().mine_block();

            let hit = node.handle_message("QUERY_TRANSACTION|paid", &mut ctx()).await;
            assert_eq!(hit.as_deref(), Some("TRANSACTION_QUERY_RESULT|true"));
            let miss = node.handle_message("QUERY_TRANSACTION|unpaid", &mut ctx()).await;
            assert_eq!(miss.as_deref(), Some("TRANSACTION_QUERY_RESULT|false"));
        })
        .await
        .expect("test_query_transaction_reply timed out");
    }

    #[tokio::test]
    async fn test_hello_then_receive_chain_records_advertised_sender() {
        tokio::time::timeout(Duration::from_secs(5), async {
            let source = Ledger::new();
            source.add_transaction_to_mempool(Transaction::from("x"));
            source.mine_block();
            let line = Message::ReceiveChain(source.encode_chain(&PipeCodec)).encode(&PipeCodec);

            let node = NetworkNode::new(Ledger::new());
            let mut ctx = ctx();
            assert_eq!(node.handle_message("HELLO|10.1.1.1:3000", &mut ctx).await, None);
            assert_eq!(node.handle_message(&line, &mut ctx).await, None);

            assert!(node.peers().contains("10.1.1.1:3000").await);
            assert!(!node.peers().contains("127.0.0.1:45000").await);
            assert_eq!(node.ledger().blocks(), source.blocks());
        })
        .await
        .expect("test_hello_then_receive_chain_records_advertised_sender timed out");
    }

    #[tokio::test]
    async fn test_receive_chain_without_hello_records_no_peer() {
        tokio::time::timeout(Duration::from_secs(5), async {
            let node = NetworkNode::new(Ledger::new());
            let line = Message::ReceiveChain(node.ledger().encode_chain(&PipeCodec)).encode(&PipeCodec);
            assert_eq!(node.handle_message(&line, &mut ctx()).await, None);
            assert!(!node.peers().contains("127.0.0.1:45000").await);
            assert_eq!(node.peers().peer_count().await, 0);
            assert_eq!(node.ledger().height(), 1);
        })
        .await
        .expect("test_receive_chain_without_hello_records_no_peer timed out");
    }

    #[tokio::test]
    async fn test_receive_chain_after_hello_records_advertised_address() {
        tokio::time::timeout(Duration::from_secs(5), async {
            let node = NetworkNode::new(Ledger::new());
            let mut ctx = ctx();
            node.handle_message("HELLO|127.0.0.1:7001", &mut ctx).await;
            let line = Message::ReceiveChain(node.ledger().encode_chain(&PipeCodec)).encode(&PipeCodec);
            node.handle_message(&line, &mut ctx).await;
            assert_eq!(node.peers().all_peers().await, vec!["127.0.0.1:7001".to_string()]);
        })
        .await
        .expect("test_receive_chain_after_hello_records_advertised_address timed out");
    }

    #[tokio::test]
    async fn test_build_merkle_tree_replies_with_history_root() {
        tokio::time::timeout(Duration::from_secs(5), async {
            let node = NetworkNode::new(Ledger::new());
            for tx in ["a", "b", "c"] {
                node.ledger().add_transaction_to_mempool(Transaction::from(tx));
            }
            node.ledger().mine_block();
            node.ledger().add_transaction_to_mempool(Transaction::from("d"));
            node.ledger().mine_block();

            let reply = node.handle_message("BUILD_MERKLE_TREE", &mut ctx()).await.unwrap();
            let expected = crate::merkle::merkle_root(&[
                Transaction::from("a"),
                Transaction::from("b"),
                Transaction::from("c"),
                Transaction::from("d"),
            ]);
            assert_eq!(reply, format!("MERKLE_ROOT|{}", hex::encode(expected)));

            // An unsolicited root is logged, not answered.
            assert_eq!(node.handle_message(&reply, &mut ctx()).await, None);
        })
        .await
        .expect("test_build_merkle_tree_replies_with_history_root timed out");
    }

    #[tokio::test]
    async fn test_wildcard_listener_is_not_advertised() {
        tokio::time::timeout(Duration::from_secs(5), async {
            let node = NetworkNode::new(Ledger::new());
            let (addr, handle) = node.start_server("0.0.0.0:0").await.unwrap();
            assert!(addr.ip().is_unspecified());
            assert_eq!(node.peers().local_addr().await, None);
            handle.abort();

            let node = NetworkNode::new(Ledger::new());
            let (addr, handle) = node.start_server("127.0.0.1:0").await.unwrap();
            assert_eq!(node.peers().local_addr().await, Some(addr.to_string()));
            handle.abort();
        })
        .await
        .expect("test_wildcard_listener_is_not_advertised timed out");
    }

    #[tokio::test]
    async fn test_malformed_chain_gets_error_reply() {
        tokio::time::timeout(Duration::from_secs(5), async {
            let node = NetworkNode::new(Ledger::new());
            let reply = node.handle_message("RECEIVE_CHAIN|1|2|3", &mut ctx()).await.unwrap();
            assert!(reply.starts_with("ERROR|"));
            assert_eq!(node.ledger().height(), 1);
        })
        .await
        .expect("test_malformed_chain_gets_error_reply timed out");
    }

    #[tokio::test]
    async fn test_broadcast_without_peers_delivers_nothing() {
        tokio::time::timeout(Duration::from_secs(5), async {
            let node = NetworkNode::new(Ledger::new());
            assert_eq!(node.broadcast_chain().await, 0);
        })
        .await
        .expect("test_broadcast_without_peers_delivers_nothing timed out");
    }
}
