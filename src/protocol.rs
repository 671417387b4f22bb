//! Line-oriented peer protocol messages
//!
//! Every message is one newline-terminated line: a command name, then its
//! arguments separated by `|`. Block arguments are delegated to a
//! [`WireCodec`].

use crate::crypto::{hash_from_hex, hash_to_hex, Sha256Hash};
use crate::error::ChainError;
use crate::transaction::Transaction;
use crate::wire::{BlockRecord, WireCodec};

pub const HELLO: &str = "HELLO";
pub const ADD_BLOCK: &str = "ADD_BLOCK";
pub const REQUEST_CHAIN: &str = "REQUEST_CHAIN";
pub const RECEIVE_CHAIN: &str = "RECEIVE_CHAIN";
pub const QUERY_TRANSACTION: &str = "QUERY_TRANSACTION";
pub const TRANSACTION_QUERY_RESULT: &str = "TRANSACTION_QUERY_RESULT";
pub const PRINT_CHAIN: &str = "PRINT_CHAIN";
pub const BUILD_MERKLE_TREE: &str = "BUILD_MERKLE_TREE";
pub const MERKLE_ROOT: &str = "MERKLE_ROOT";
pub const BLOCK_ADDED: &str = "BLOCK_ADDED";
pub const BLOCK_KNOWN: &str = "BLOCK_KNOWN";
pub const ERROR: &str = "ERROR";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Advertise the sender's listening address.
    Hello(String),
    AddBlock(BlockRecord),
    RequestChain,
    /// Chain payload, still encoded. The dispatcher decodes it so one bad
    /// record can be reported without losing the others.
    ReceiveChain(String),
    QueryTransaction(Transaction),
    QueryResult(bool),
    /// Console-only; rejected when it arrives over the network.
    PrintChain,
    /// Ask for the Merkle root over every committed transaction.
    BuildMerkleTree,
    MerkleRoot(Sha256Hash),
    BlockAdded(Sha256Hash),
    BlockKnown(Sha256Hash),
    Error(String),
}

impl Message {
    /// Parse one line (without its newline).
    pub fn parse(line: &str, codec: &dyn WireCodec) -> Result<Message, ChainError> {
        let (name, args) = match line.split_once('|') {
            Some((name, args)) => (name, Some(args)),
            None => (line, None),
        };

        match name {
            HELLO => {
                let addr = required(name, args)?.trim();
                if addr.is_empty() {
                    return Err(ChainError::MalformedMessage(
                        "HELLO needs an address".to_string(),
                    ));
                }
                Ok(Message::Hello(addr.to_string()))
            }
            ADD_BLOCK => Ok(Message::AddBlock(codec.decode_block(required(name, args)?)?)),
            REQUEST_CHAIN => Ok(Message::RequestChain),
            RECEIVE_CHAIN => Ok(Message::ReceiveChain(required(name, args)?.to_string())),
            QUERY_TRANSACTION => Ok(Message::QueryTransaction(Transaction::from(required(
                name, args,
            )?))),
            TRANSACTION_QUERY_RESULT => match required(name, args)? {
                "true" => Ok(Message::QueryResult(true)),
                "false" => Ok(Message::QueryResult(false)),
                other => Err(ChainError::MalformedMessage(format!(
                    "query result must be true or false, got {:?}",
                    other
                ))),
            },
            PRINT_CHAIN => Ok(Message::PrintChain),
            BUILD_MERKLE_TREE => Ok(Message::BuildMerkleTree),
            MERKLE_ROOT => Ok(Message::MerkleRoot(hash_from_hex(required(name, args)?)?)),
            BLOCK_ADDED => Ok(Message::BlockAdded(hash_from_hex(required(name, args)?)?)),
            BLOCK_KNOWN => Ok(Message::BlockKnown(hash_from_hex(required(name, args)?)?)),
            ERROR => Ok(Message::Error(args.unwrap_or_default().to_string())),
            other => Err(ChainError::UnknownCommand(other.to_string())),
        }
    }

    /// Command name as it appears on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            Message::Hello(_) => HELLO,
            Message::AddBlock(_) => ADD_BLOCK,
            Message::RequestChain => REQUEST_CHAIN,
            Message::ReceiveChain(_) => RECEIVE_CHAIN,
            Message::QueryTransaction(_) => QUERY_TRANSACTION,
            Message::QueryResult(_) => TRANSACTION_QUERY_RESULT,
            Message::PrintChain => PRINT_CHAIN,
            Message::BuildMerkleTree => BUILD_MERKLE_TREE,
            Message::MerkleRoot(_) => MERKLE_ROOT,
            Message::BlockAdded(_) => BLOCK_ADDED,
            Message::BlockKnown(_) => BLOCK_KNOWN,
            Message::Error(_) => ERROR,
        }
    }

    /// Render as a protocol line, without the trailing newline.
    pub fn encode(&self, codec: &dyn WireCodec) -> String {
        match self {
            Message::Hello(addr) => format!("{}|{}", HELLO, addr),
            Message::AddBlock(record) => format!("{}|{}", ADD_BLOCK, codec.encode_record(record)),
            Message::RequestChain => REQUEST_CHAIN.to_string(),
            Message::ReceiveChain(chain) => format!("{}|{}", RECEIVE_CHAIN, chain),
            Message::QueryTransaction(tx) => format!("{}|{}", QUERY_TRANSACTION, tx),
            Message::QueryResult(found) => format!("{}|{}", TRANSACTION_QUERY_RESULT, found),
            Message::PrintChain => PRINT_CHAIN.to_string(),
            Message::BuildMerkleTree => BUILD_MERKLE_TREE.to_string(),
            Message::MerkleRoot(root) => format!("{}|{}", MERKLE_ROOT, hash_to_hex(root)),
            Message::BlockAdded(hash) => format!("{}|{}", BLOCK_ADDED, hash_to_hex(hash)),
            Message::BlockKnown(hash) => format!("{}|{}", BLOCK_KNOWN, hash_to_hex(hash)),
            Message::Error(msg) => format!("{}|{}", ERROR, msg.replace(['\r', '\n'], " ")),
        }
    }
}

fn required<'a>(name: &str, args: Option<&'a str>) -> Result<&'a str, ChainError> {
    args.ok_or_else(|| ChainError::MalformedMessage(format!("{} is missing its arguments", name)))
}
