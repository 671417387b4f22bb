//! Merkle commitments over ordered transaction lists
//!
//! Leaves hash the raw payload (`H(data)`), internal nodes hash the
//! concatenation of their children (`H(left ‖ right)`). When a level has an
//! odd number of nodes the last one is promoted to the next level unchanged,
//! both for [`merkle_root`] and for [`MerkleTree::build`], so a tree's root
//! hash always equals the standalone root of the same list.

use crate::crypto::{sha256_concat, Sha256Hash};
use crate::transaction::Transaction;

/// Root committed to by a block with no transactions.
pub const EMPTY_MERKLE_ROOT: Sha256Hash = [0u8; 32];

/// Compute the Merkle root of `transactions` without keeping the tree.
pub fn merkle_root(transactions: &[Transaction]) -> Sha256Hash {
    if transactions.is_empty() {
        return EMPTY_MERKLE_ROOT;
    }

    let mut level: Vec<Sha256Hash> = transactions.iter().map(Transaction::hash).collect();

    while level.len() > 1 {
        let mut next_level = Vec::with_capacity(level.len().div_ceil(2));
        for pair in level.chunks(2) {
            match pair {
                [left, right] => next_level.push(sha256_concat(left, right)),
                // Odd one out, promoted unchanged.
                _ => next_level.push(pair[0]),
            }
        }
        level = next_level;
    }

    level[0]
}

/// A node in the Merkle tree. Leaves keep the transaction they commit to so
/// membership can be answered by comparing raw payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleNode {
    pub hash: Sha256Hash,
    pub left: Option<Box<MerkleNode>>,
    pub right: Option<Box<MerkleNode>>,
    pub transaction: Option<Transaction>,
}

impl MerkleNode {
    pub fn leaf(transaction: Transaction) -> Self {
        Self {
            hash: transaction.hash(),
            left: None,
            right: None,
            transaction: Some(transaction),
        }
    }

    pub fn branch(left: MerkleNode, right: MerkleNode) -> Self {
        Self {
            hash: sha256_concat(&left.hash, &right.hash),
            left: Some(Box::new(left)),
            right: Some(Box::new(right)),
            transaction: None,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.left.is_none() && self.right.is_none()
    }

    fn contains(&self, data: &[u8]) -> bool {
        if self.is_leaf() {
            return self
                .transaction
                .as_ref()
                .is_some_and(|tx| tx.as_bytes() == data);
        }
        self.left.as_ref().is_some_and(|l| l.contains(data))
            || self.right.as_ref().is_some_and(|r| r.contains(data))
    }

    fn count_leaves(&self) -> usize {
        if self.is_leaf() {
            return 1;
        }
        self.left.as_ref().map_or(0, |l| l.count_leaves())
            + self.right.as_ref().map_or(0, |r| r.count_leaves())
    }
}

/// A Merkle tree built from a snapshot of transactions. Trees are not cached:
/// callers rebuild one per query so it can never go stale.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MerkleTree {
    pub root: Option<MerkleNode>,
}

impl MerkleTree {
    /// Build a Merkle tree from a list of transactions
    pub fn build(transactions: &[Transaction]) -> MerkleTree {
        let mut level: Vec<MerkleNode> = transactions
            .iter()
            .cloned()
            .map(MerkleNode::leaf)
            .collect();

        if level.is_empty() {
            return MerkleTree { root: None };
        }

        while level.len() > 1 {
            let mut next_level = Vec::with_capacity(level.len().div_ceil(2));
            let mut nodes = level.into_iter();
            while let Some(left) = nodes.next() {
                match nodes.next() {
                    Some(right) => next_level.push(MerkleNode::branch(left, right)),
                    None => next_level.push(left),
                }
            }
            level = next_level;
        }

        MerkleTree { root: level.pop() }
    }

    /// Root hash, or [`EMPTY_MERKLE_ROOT`] for an empty tree.
    pub fn root_hash(&self) -> Sha256Hash {
        self.root.as_ref().map_or(EMPTY_MERKLE_ROOT, |r| r.hash)
    }

    /// True if any leaf's payload equals `data` byte for byte.
    pub fn contains(&self, data: &[u8]) -> bool {
        self.root.as_ref().is_some_and(|r| r.contains(data))
    }

    pub fn leaf_count(&self) -> usize {
        self.root.as_ref().map_or(0, MerkleNode::count_leaves)
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }
}
