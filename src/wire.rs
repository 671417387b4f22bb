//! Pipe-delimited wire codec for blocks and chains
//!
//! A block travels as
//!
//! ```text
//! <timestamp>|<prev_hash_hex>|<merkle_root_hex>|<tx1,tx2,...>|
//! ```
//!
//! and a chain is every encoded block followed by one more `|`. The format
//! has no escaping: payloads containing `|`, `,` or a newline cannot be
//! carried. The [`WireCodec`] trait keeps this layout out of the ledger and
//! the protocol dispatcher.

use crate::blockchain::Block;
use crate::crypto::{hash_from_hex, Sha256Hash};
use crate::error::ChainError;
use crate::transaction::Transaction;

const FIELD_SEPARATOR: char = '|';
const TX_SEPARATOR: char = ',';
const BLOCK_FIELDS: usize = 4;
/// Four fields plus the empty token left by the record separator.
const CHAIN_RECORD_TOKENS: usize = BLOCK_FIELDS + 1;

/// A block as described on the wire: everything but the hash, which the
/// receiver derives itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockRecord {
    pub timestamp: i64,
    pub previous_hash: Vec<u8>,
    pub merkle_root: Sha256Hash,
    pub transactions: Vec<Transaction>,
}

impl From<&Block> for BlockRecord {
    fn from(block: &Block) -> Self {
        BlockRecord {
            timestamp: block.timestamp,
            previous_hash: block.previous_hash.clone(),
            merkle_root: block.merkle_root,
            transactions: block.transactions.clone(),
        }
    }
}

/// Encoding used between peers.
pub trait WireCodec: Send + Sync {
    fn encode_record(&self, record: &BlockRecord) -> String;
    fn encode_block(&self, block: &Block) -> String;
    fn encode_chain(&self, blocks: &[Block]) -> String;
    fn decode_block(&self, input: &str) -> Result<BlockRecord, ChainError>;
    fn decode_chain(&self, input: &str) -> Result<Vec<BlockRecord>, ChainError>;
}

/// The pipe-delimited text codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct PipeCodec;

impl WireCodec for PipeCodec {
    fn encode_record(&self, record: &BlockRecord) -> String {
        encode_record(record)
    }

    fn encode_block(&self, block: &Block) -> String {
        encode_block(block)
    }

    fn encode_chain(&self, blocks: &[Block]) -> String {
        encode_chain(blocks)
    }

    fn decode_block(&self, input: &str) -> Result<BlockRecord, ChainError> {
        decode_block_fields(input)
    }

    fn decode_chain(&self, input: &str) -> Result<Vec<BlockRecord>, ChainError> {
        decode_chain(input)
    }
}

/// True when `data` can travel inside a transaction list unchanged.
pub fn is_wire_safe(data: &[u8]) -> bool {
    !data.is_empty()
        && !data
            .iter()
            .any(|b| matches!(*b, b'|' | b',' | b'\n' | b'\r'))
}

pub fn encode_transactions_csv(transactions: &[Transaction]) -> String {
    transactions
        .iter()
        .map(|tx| String::from_utf8_lossy(tx.as_bytes()).into_owned())
        .collect::<Vec<_>>()
        .join(",")
}

/// Split a comma-separated transaction list. The empty string is an empty
/// list, not a list holding one empty payload.
pub fn decode_transactions_csv(input: &str) -> Vec<Transaction> {
    if input.is_empty() {
        return Vec::new();
    }
    input.split(TX_SEPARATOR).map(Transaction::from).collect()
}

pub fn encode_record(record: &BlockRecord) -> String {
    format!(
        "{}|{}|{}|{}|",
        record.timestamp,
        hex::encode(&record.previous_hash),
        hex::encode(record.merkle_root),
        encode_transactions_csv(&record.transactions)
    )
}

pub fn encode_block(block: &Block) -> String {
    encode_record(&BlockRecord::from(block))
}

pub fn encode_chain(blocks: &[Block]) -> String {
    blocks
        .iter()
        .map(|b| {
            let mut record = encode_block(b);
            record.push(FIELD_SEPARATOR);
            record
        })
        .collect()
}

/// Decode one block description. Exactly four fields are required; a single
/// trailing `|` (as produced by [`encode_block`]) is tolerated.
pub fn decode_block_fields(input: &str) -> Result<BlockRecord, ChainError> {
    let mut fields: Vec<&str> = input.split(FIELD_SEPARATOR).collect();
    if fields.len() == BLOCK_FIELDS + 1 && fields[BLOCK_FIELDS].is_empty() {
        fields.pop();
    }
    if fields.len() < BLOCK_FIELDS {
        return Err(ChainError::MalformedMessage(format!(
            "block needs {} fields, got {}",
            BLOCK_FIELDS,
            fields.len()
        )));
    }
    if fields.len() > BLOCK_FIELDS {
        return Err(ChainError::MalformedMessage(format!(
            "block has {} fields, expected {}",
            fields.len(),
            BLOCK_FIELDS
        )));
    }
    record_from_fields(fields[0], fields[1], fields[2], fields[3])
}

/// Decode a chain produced by [`encode_chain`].
pub fn decode_chain(input: &str) -> Result<Vec<BlockRecord>, ChainError> {
    let mut tokens: Vec<&str> = input.split(FIELD_SEPARATOR).collect();
    if tokens.last().is_some_and(|t| t.is_empty()) {
        tokens.pop();
    }
    if tokens.is_empty() {
        return Ok(Vec::new());
    }
    if tokens.len() % CHAIN_RECORD_TOKENS != 0 {
        return Err(ChainError::MalformedMessage(format!(
            "chain has {} fields, not a multiple of {}",
            tokens.len(),
            CHAIN_RECORD_TOKENS
        )));
    }

    tokens
        .chunks(CHAIN_RECORD_TOKENS)
        .enumerate()
        .map(|(i, record)| {
            if !record[BLOCK_FIELDS].is_empty() {
                return Err(ChainError::MalformedMessage(format!(
                    "block record {} is not terminated by an empty field",
                    i
                )));
            }
            record_from_fields(record[0], record[1], record[2], record[3])
        })
        .collect()
}

fn record_from_fields(
    timestamp: &str,
    previous_hash: &str,
    merkle_root: &str,
    transactions: &str,
) -> Result<BlockRecord, ChainError> {
    let timestamp = timestamp.parse::<i64>().map_err(|e| {
        ChainError::MalformedMessage(format!("invalid timestamp {:?}: {}", timestamp, e))
    })?;
    let previous_hash = hex::decode(previous_hash)?;
    let merkle_root = hash_from_hex(merkle_root)?;

    Ok(BlockRecord {
        timestamp,
        previous_hash,
        merkle_root,
        transactions: decode_transactions_csv(transactions),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::Blockchain;

    fn sample_chain() -> Blockchain {
        let mut chain = Blockchain::new();
        chain.add_transaction_to_mempool(Transaction::from("alice"));
        chain.add_transaction_to_mempool(Transaction::from("bob"));
        chain.mine_block();
        chain.mine_block();
        chain
    }

    #[test]
    fn test_encode_block_layout() {
        let block = Block::new(vec![0xab], vec![Transaction::from("a"), Transaction::from("b")], 5);
        let encoded = encode_block(&block);
        assert_eq!(
            encoded,
            format!("5|ab|{}|a,b|", hex::encode(block.merkle_root))
        );
    }

    #[test]
    fn test_genesis_encodes_empty_fields() {
        let encoded = encode_block(&Block::genesis());
        assert!(encoded.starts_with("1672531200||"));
        assert!(encoded.ends_with("||"));
    }

    #[test]
    fn test_block_round_trip() {
        let chain = sample_chain();
        let block = &chain.blocks()[1];
        let record = decode_block_fields(&encode_block(block)).unwrap();
        assert_eq!(record, BlockRecord::from(block));
    }

    #[test]
    fn test_decode_rejects_too_few_fields() {
        let err = decode_block_fields("1|ab|cd").unwrap_err();
        assert!(matches!(err, ChainError::MalformedMessage(_)));
    }

    #[test]
    fn test_decode_rejects_extra_fields() {
        let root = hex::encode([0u8; 32]);
        assert!(decode_block_fields(&format!("1||{}|a|b", root)).is_err());
    }

    #[test]
    fn test_decode_rejects_bad_timestamp_and_hex() {
        let root = hex::encode([0u8; 32]);
        assert!(decode_block_fields(&format!("soon||{}|a", root)).is_err());
        assert!(decode_block_fields(&format!("1|xyz|{}|a", root)).is_err());
        assert!(decode_block_fields("1||abcd|a").is_err());
    }

    #[test]
    fn test_empty_csv_is_empty_list() {
        assert!(decode_transactions_csv("").is_empty());
        assert_eq!(
            decode_transactions_csv("a,b"),
            vec![Transaction::from("a"), Transaction::from("b")]
        );
    }

    #[test]
    fn test_chain_round_trip_includes_empty_blocks() {
        let chain = sample_chain();
        let records = decode_chain(&encode_chain(chain.blocks())).unwrap();
        let expected: Vec<BlockRecord> = chain.blocks().iter().map(BlockRecord::from).collect();
        assert_eq!(records, expected);
    }

    #[test]
    fn test_decode_chain_rejects_truncated_input() {
        let chain = sample_chain();
        let encoded = encode_chain(chain.blocks());
        let truncated = &encoded[..encoded.len() - 10];
        assert!(decode_chain(truncated).is_err());
    }

    #[test]
    fn test_decode_empty_chain() {
        assert!(decode_chain("").unwrap().is_empty());
    }

    #[test]
    fn test_wire_safety() {
        assert!(is_wire_safe(b"pay 5"));
        assert!(!is_wire_safe(b""));
        assert!(!is_wire_safe(b"a|b"));
        assert!(!is_wire_safe(b"a,b"));
        assert!(!is_wire_safe(b"a\nb"));
    }
}
