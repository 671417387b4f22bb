use crate::crypto::{hash_to_hex, sha256, short_hex, Sha256Hash};
use crate::error::ChainError;
use crate::mempool::Mempool;
use crate::merkle::{merkle_root, MerkleTree, EMPTY_MERKLE_ROOT};
use crate::transaction::Transaction;
use crate::wire::BlockRecord;
use std::collections::HashMap;
use tracing::{debug, warn};

use super::validation::validate_chain;

/// Fixed genesis timestamp (2023-01-01T00:00:00Z). Every node derives the same
/// genesis block from it, so chains exchanged between nodes share a root.
pub const GENESIS_TIMESTAMP: i64 = 1_672_531_200;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Seconds since the Unix epoch.
    pub timestamp: i64,
    pub transactions: Vec<Transaction>,
    /// Empty for the genesis block.
    pub previous_hash: Vec<u8>,
    pub merkle_root: Sha256Hash,
    pub hash: Sha256Hash,
}

impl Block {
    pub fn new(previous_hash: Vec<u8>, transactions: Vec<Transaction>, timestamp: i64) -> Self {
        let merkle_root = merkle_root(&transactions);
        let hash = Block::calculate_hash(&previous_hash, &merkle_root, timestamp);

        Block {
            timestamp,
            transactions,
            previous_hash,
            merkle_root,
            hash,
        }
    }

    pub fn genesis() -> Self {
        Block::new(Vec::new(), Vec::new(), GENESIS_TIMESTAMP)
    }

    /// `H(prevBlockHash ‖ merkleRoot ‖ timestamp)`, with the two hashes in hex
    /// and the timestamp in decimal, exactly as the fields travel on the wire.
    pub fn calculate_hash(previous_hash: &[u8], merkle_root: &Sha256Hash, timestamp: i64) -> Sha256Hash {
        let preimage = format!(
            "{}{}{}",
            hex::encode(previous_hash),
            hex::encode(merkle_root),
            timestamp
        );
        sha256(preimage.as_bytes())
    }

    pub fn compute_hash(&self) -> Sha256Hash {
        Block::calculate_hash(&self.previous_hash, &self.merkle_root, self.timestamp)
    }

    pub fn is_genesis(&self) -> bool {
        self.previous_hash.is_empty()
    }

    pub fn transaction_count(&self) -> usize {
        self.transactions.len()
    }
}

/// Result of applying a block description received from a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Appended(Sha256Hash),
    AlreadyKnown(Sha256Hash),
}

impl ApplyOutcome {
    pub fn hash(&self) -> Sha256Hash {
        match self {
            ApplyOutcome::Appended(h) | ApplyOutcome::AlreadyKnown(h) => *h,
        }
    }

    pub fn is_appended(&self) -> bool {
        matches!(self, ApplyOutcome::Appended(_))
    }
}

/// The chain of committed blocks plus the pending mempool. Blocks are only
/// ever appended, through [`Blockchain::add_block`] (and `mine_block`, which
/// feeds it the mempool) or [`Blockchain::apply_record`].
#[derive(Debug, Clone)]
pub struct Blockchain {
    blocks: Vec<Block>,
    mempool: Mempool,
    /// Hash a peer advertised for a block -> hash the block got locally.
    /// Only blocks stored under a different hash (re-linked or deduplicated)
    /// have an entry.
    aliases: HashMap<Sha256Hash, Sha256Hash>,
}

impl Default for Blockchain {
    fn default() -> Self {
        Self::new()
    }
}

impl Blockchain {
    /// Create a chain holding only the genesis block.
    pub fn new() -> Self {
        Blockchain {
            blocks: vec![Block::genesis()],
            mempool: Mempool::new(),
            aliases: HashMap::new(),
        }
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn latest_block(&self) -> &Block {
        // The genesis block is installed by the constructor and never removed.
        &self.blocks[self.blocks.len() - 1]
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn mempool(&self) -> &Mempool {
        &self.mempool
    }

    pub fn add_transaction_to_mempool(&mut self, tx: Transaction) {
        self.mempool.add_transaction(tx);
    }

    /// Commit the whole mempool into a new block. An empty mempool still
    /// produces a block with no transactions.
    pub fn mine_block(&mut self) -> Block {
        let transactions = self.mempool.take_all();
        self.add_block(transactions).clone()
    }

    /// Append a block built from `transactions`, stamped with the local clock.
    pub fn add_block(&mut self, transactions: Vec<Transaction>) -> &Block {
        let timestamp = chrono::Utc::now().timestamp();
        let previous_hash = self.latest_block().hash.to_vec();
        let block = Block::new(previous_hash, transactions, timestamp);
        debug!(
            "Appending block {} ({} txs)",
            short_hex(&block.hash),
            block.transactions.len()
        );
        self.blocks.push(block);
        self.latest_block()
    }

    /// Apply a block description received from a peer.
    ///
    /// The sender's timestamp is kept. The advertised Merkle root must match
    /// the transactions. A record whose hash is already known, either stored
    /// directly or as an alias of a re-linked block, is a no-op. A record
    /// whose parent is not the local tip is still accepted and re-linked onto
    /// the tip; there is no fork choice. The advertised hash is remembered so
    /// the same record is recognised when the peer sends its chain again.
    pub fn apply_record(&mut self, record: BlockRecord) -> Result<ApplyOutcome, ChainError> {
        let expected_root = merkle_root(&record.transactions);
        if expected_root != record.merkle_root {
            return Err(ChainError::InvalidMerkleRoot {
                expected: hash_to_hex(&expected_root),
                actual: hash_to_hex(&record.merkle_root),
            });
        }

        let advertised_hash =
            Block::calculate_hash(&record.previous_hash, &record.merkle_root, record.timestamp);
        if let Some(local) = self.resolve_hash(&advertised_hash) {
            return Ok(ApplyOutcome::AlreadyKnown(local));
        }

        if record.previous_hash.is_empty() {
            return Err(ChainError::GenesisMismatch);
        }

        let parent = self.resolve_hash(&record.previous_hash);
        if let Some(local) = self.find_relinked_copy(&record, parent) {
            debug!(
                "Block {} is a re-linked copy of local block {}",
                short_hex(&advertised_hash),
                short_hex(&local)
            );
            self.aliases.insert(advertised_hash, local);
            return Ok(ApplyOutcome::AlreadyKnown(local));
        }

        let tip = self.latest_block().hash;
        if parent != Some(tip) {
            warn!(
                "Block {} names parent {} but local tip is {}; re-linking onto local tip",
                short_hex(&advertised_hash),
                short_hex(&record.previous_hash),
                short_hex(&tip)
            );
        }

        let block = Block::new(tip.to_vec(), record.transactions, record.timestamp);
        let hash = block.hash;
        if hash != advertised_hash {
            self.aliases.insert(advertised_hash, hash);
        }
        self.blocks.push(block);
        Ok(ApplyOutcome::Appended(hash))
    }

    /// Local hash for `hash`: itself if a block is stored under it, or the
    /// block it was re-linked as.
    pub fn resolve_hash(&self, hash: &[u8]) -> Option<Sha256Hash> {
        let hash: Sha256Hash = hash.try_into().ok()?;
        if self.blocks.iter().any(|b| b.hash == hash) {
            return Some(hash);
        }
        self.aliases.get(&hash).copied()
    }

    /// A re-linked block keeps its timestamp and Merkle root, so a record with
    /// the same pair is the same block coming back with a different parent.
    /// A run of identical blocks (same second, same transactions) is told
    /// apart by its parent carrying the same pair.
    fn find_relinked_copy(&self, record: &BlockRecord, parent: Option<Sha256Hash>) -> Option<Sha256Hash> {
        let same_content =
            |b: &Block| b.timestamp == record.timestamp && b.merkle_root == record.merkle_root;
        if let Some(parent) = parent {
            if self.blocks.iter().any(|b| b.hash == parent && same_content(b)) {
                return None;
            }
        }
        self.blocks
            .iter()
            .skip(1)
            .find(|b| same_content(*b))
            .map(|b| b.hash)
    }

    /// True for hashes stored in the chain and for advertised hashes of
    /// blocks that were re-linked.
    pub fn contains_hash(&self, hash: &Sha256Hash) -> bool {
        self.resolve_hash(hash).is_some()
    }

    /// Root of the Merkle tree over the whole transaction history.
    pub fn history_merkle_root(&self) -> Sha256Hash {
        self.build_merkle_tree().root_hash()
    }

    /// Every committed transaction, in chain order.
    pub fn all_transactions(&self) -> Vec<Transaction> {
        self.blocks
            .iter()
            .flat_map(|b| b.transactions.iter().cloned())
            .collect()
    }

    /// Fresh tree over the entire transaction history.
    pub fn build_merkle_tree(&self) -> MerkleTree {
        MerkleTree::build(&self.all_transactions())
    }

    /// Has `data` ever been committed in any block?
    pub fn query_transaction(&self, data: &[u8]) -> bool {
        self.build_merkle_tree().contains(data)
    }

    pub fn verify_chain(&self) -> bool {
        match validate_chain(&self.blocks) {
            Ok(()) => true,
            Err(e) => {
                warn!("Chain verification failed: {}", e);
                false
            }
        }
    }
}
