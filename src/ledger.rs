//! Shared, lock-protected access to the node's single [`Blockchain`]
//!
//! Every task (connection handlers, broadcast, console) holds a clone of the
//! same [`Ledger`]. All reads and mutations go through one mutex and return
//! owned data, so no guard can be held across an `.await` or a socket call.

use crate::blockchain::{ApplyOutcome, Block, Blockchain};
use crate::crypto::Sha256Hash;
use crate::error::ChainError;
use crate::transaction::Transaction;
use crate::wire::{BlockRecord, WireCodec};
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct Ledger {
    inner: Arc<Mutex<Blockchain>>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::from_chain(Blockchain::new())
    }

    pub fn from_chain(chain: Blockchain) -> Self {
        Self {
            inner: Arc::new(Mutex::new(chain)),
        }
    }

    pub fn add_transaction_to_mempool(&self, tx: Transaction) {
        self.inner.lock().add_transaction_to_mempool(tx);
    }

    pub fn mine_block(&self) -> Block {
        self.inner.lock().mine_block()
    }

    pub fn add_block(&self, transactions: Vec<Transaction>) -> Block {
        self.inner.lock().add_block(transactions).clone()
    }

    pub fn apply_record(&self, record: BlockRecord) -> Result<ApplyOutcome, ChainError> {
        self.inner.lock().apply_record(record)
    }

    /// Apply records in order under a single lock acquisition. Each record
    /// gets its own result; a rejected record does not stop the rest.
    pub fn apply_records(
        &self,
        records: Vec<BlockRecord>,
    ) -> Vec<Result<ApplyOutcome, ChainError>> {
        let mut chain = self.inner.lock();
        records
            .into_iter()
            .map(|record| chain.apply_record(record))
            .collect()
    }

    pub fn latest_block(&self) -> Block {
        self.inner.lock().latest_block().clone()
    }

    pub fn blocks(&self) -> Vec<Block> {
        self.inner.lock().blocks().to_vec()
    }

    pub fn height(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn mempool_len(&self) -> usize {
        self.inner.lock().mempool().len()
    }

    pub fn pending_transactions(&self) -> Vec<Transaction> {
        self.inner.lock().mempool().transactions().to_vec()
    }

    /// Serialize the chain while holding the lock; the caller gets a plain
    /// `String` it can send after the lock is gone.
    pub fn encode_chain(&self, codec: &dyn WireCodec) -> String {
        codec.encode_chain(self.inner.lock().blocks())
    }

    pub fn query_transaction(&self, data: &[u8]) -> bool {
        self.inner.lock().query_transaction(data)
    }

    /// Merkle root over every committed transaction, in chain order.
    pub fn history_merkle_root(&self) -> Sha256Hash {
        self.inner.lock().history_merkle_root()
    }

    pub fn verify_chain(&self) -> bool {
        self.inner.lock().verify_chain()
    }
}
