use crate::error::ChainError;
use crate::merkle::merkle_root;

use super::chain::Block;

/// Walk the chain checking Merkle roots, stored hashes and parent links.
pub fn validate_chain(blocks: &[Block]) -> Result<(), ChainError> {
    let genesis = blocks
        .first()
        .ok_or_else(|| ChainError::InvalidBlock("Chain has no genesis block".to_string()))?;
    if !genesis.is_genesis() {
        return Err(ChainError::InvalidBlock(
            "First block must have an empty previous hash".to_string(),
        ));
    }

    for (i, block) in blocks.iter().enumerate() {
        let expected_root = merkle_root(&block.transactions);
        if expected_root != block.merkle_root {
            return Err(ChainError::InvalidMerkleRoot {
                expected: hex::encode(expected_root),
                actual: hex::encode(block.merkle_root),
            });
        }

        if block.compute_hash() != block.hash {
            return Err(ChainError::InvalidBlockHash(i));
        }

        if i > 0 && block.previous_hash != blocks[i - 1].hash {
            return Err(ChainError::InvalidBlockLinkage(i));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::Blockchain;
    use crate::transaction::Transaction;

    fn sample_blocks() -> Vec<Block> {
        let mut chain = Blockchain::new();
        chain.add_transaction_to_mempool(Transaction::from("a"));
        chain.mine_block();
        chain.add_transaction_to_mempool(Transaction::from("b"));
        chain.mine_block();
        chain.blocks().to_vec()
    }

    #[test]
    fn test_valid_chain_passes() {
        assert_eq!(validate_chain(&sample_blocks()), Ok(()));
    }

    #[test]
    fn test_empty_chain_fails() {
        assert!(validate_chain(&[]).is_err());
    }

    #[test]
    fn test_tampered_hash_detected() {
        let mut blocks = sample_blocks();
        blocks[1].hash[0] ^= 0xff;
        assert_eq!(validate_chain(&blocks), Err(ChainError::InvalidBlockHash(1)));
    }

    #[test]
    fn test_broken_link_detected() {
        let mut blocks = sample_blocks();
        blocks[2].previous_hash = vec![0u8; 32];
        blocks[2].hash = blocks[2].compute_hash();
        assert_eq!(validate_chain(&blocks), Err(ChainError::InvalidBlockLinkage(2)));
    }

    #[test]
    fn test_tampered_transaction_detected() {
        let mut blocks = sample_blocks();
        blocks[1].transactions[0] = Transaction::from("forged");
        assert!(matches!(
            validate_chain(&blocks),
            Err(ChainError::InvalidMerkleRoot { .. })
        ));
    }
}
