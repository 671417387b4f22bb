//! Operator console commands
//!
//! The console reads one command per line. Names are case-insensitive and
//! the upper-case spellings (`ADD_TRANSACTION`, `MINE_BLOCK`, ...) work too.
//! Arguments follow the name after a space or a `|`. A command given without
//! its argument asks for it on the next line.

use crate::blockchain::Block;
use crate::crypto::{hash_to_hex, short_hex};
use crate::error::ChainError;
use crate::network::NetworkNode;
use crate::transaction::Transaction;
use crate::wire::is_wire_safe;
use colored::*;
use comfy_table::presets::UTF8_FULL;
use comfy_table::Color as TableColor;
use comfy_table::{Attribute, Cell, ContentArrangement, Table};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    AddTransaction(Transaction),
    MineBlock,
    PrintChain,
    Connect(String),
    Query(Transaction),
    Peers,
    MerkleRoot,
    Verify,
    Help,
    Quit,
    /// The command needs an argument that was not on the same line.
    Prompt(ArgumentPrompt),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgumentPrompt {
    Transaction,
    Query,
    Address,
}

impl ArgumentPrompt {
    pub fn text(&self) -> &'static str {
        match self {
            ArgumentPrompt::Transaction => "Enter transaction data: ",
            ArgumentPrompt::Query => "Enter transaction data to look up: ",
            ArgumentPrompt::Address => "Enter address to connect (e.g. 127.0.0.1:3001): ",
        }
    }

    /// Finish the pending command with the line the operator typed.
    pub fn complete(&self, input: &str) -> Result<ConsoleCommand, ChainError> {
        let input = input.trim();
        match self {
            ArgumentPrompt::Transaction => Ok(ConsoleCommand::AddTransaction(payload(input)?)),
            ArgumentPrompt::Query => Ok(ConsoleCommand::Query(payload(input)?)),
            ArgumentPrompt::Address => {
                if input.is_empty() {
                    return Err(ChainError::InvalidInput("Address must not be empty".to_string()));
                }
                Ok(ConsoleCommand::Connect(input.to_string()))
            }
        }
    }
}

fn payload(input: &str) -> Result<Transaction, ChainError> {
    if !is_wire_safe(input.as_bytes()) {
        return Err(ChainError::InvalidInput(
            "Transaction data must be non-empty and must not contain '|', ',' or newlines"
                .to_string(),
        ));
    }
    Ok(Transaction::from(input))
}

impl ConsoleCommand {
    /// Parse one console line. Blank lines parse to `None`.
    pub fn parse(line: &str) -> Result<Option<ConsoleCommand>, ChainError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }

        let (name, arg) = match line.find(|c: char| c.is_whitespace() || c == '|') {
            Some(i) => (&line[..i], line[i + 1..].trim()),
            None => (line, ""),
        };

        let with_arg = |prompt: ArgumentPrompt| {
            if arg.is_empty() {
                Ok(ConsoleCommand::Prompt(prompt))
            } else {
                prompt.complete(arg)
            }
        };

        let command = match name.to_ascii_lowercase().as_str() {
            "addtransaction" | "add_transaction" => with_arg(ArgumentPrompt::Transaction)?,
            "mineblock" | "mine_block" => ConsoleCommand::MineBlock,
            "printchain" | "print_chain" => ConsoleCommand::PrintChain,
            "connect" => with_arg(ArgumentPrompt::Address)?,
            "query" | "query_transaction" => with_arg(ArgumentPrompt::Query)?,
            "peers" => ConsoleCommand::Peers,
            "merkleroot" | "build_merkle_tree" => ConsoleCommand::MerkleRoot,
            "verify" => ConsoleCommand::Verify,
            "help" => ConsoleCommand::Help,
            "quit" | "exit" => ConsoleCommand::Quit,
            _ => return Err(ChainError::UnknownCommand(name.to_string())),
        };
        Ok(Some(command))
    }

    pub fn is_quit(&self) -> bool {
        matches!(self, ConsoleCommand::Quit)
    }
}

/// Run a console command against the node and return the text to show.
pub async fn execute(command: ConsoleCommand, network: &NetworkNode) -> Result<String, ChainError> {
    let ledger = network.ledger();
    match command {
        ConsoleCommand::AddTransaction(tx) => {
            ledger.add_transaction_to_mempool(tx);
            Ok(format!(
                "Transaction added to mempool ({} pending).",
                ledger.mempool_len()
            ))
        }
        ConsoleCommand::MineBlock => {
            let block = network.mine_block().await;
            Ok(format!(
                "{} {} with {} transaction(s)",
                "Mined block".green().bold(),
                hash_to_hex(&block.hash),
                block.transactions.len()
            ))
        }
        ConsoleCommand::PrintChain => Ok(render_chain(&ledger.blocks())),
        ConsoleCommand::Connect(addr) => {
            let appended = network.connect_peer(&addr).await?;
            Ok(format!(
                "Connected to {}; {} new block(s), height {}.",
                addr.cyan(),
                appended,
                ledger.height()
            ))
        }
        ConsoleCommand::Query(tx) => {
            if ledger.query_transaction(tx.as_bytes()) {
                Ok(format!("{} \"{}\" is in the chain", "FOUND".green().bold(), tx))
            } else {
                Ok(format!("{} \"{}\" is not in the chain", "NOT FOUND".red().bold(), tx))
            }
        }
        ConsoleCommand::Peers => {
            let peers = network.peers().all_peers().await;
            if peers.is_empty() {
                return Ok("No known peers.".to_string());
            }
            let mut out = format!("{} known peer(s):", peers.len());
            for addr in peers {
                let info = network.peers().peer_info(&addr).await;
                let (deliveries, failures) = info.map(|p| (p.deliveries, p.failures)).unwrap_or((0, 0));
                out.push_str(&format!(
                    "\n  {}  delivered {}  failed {}",
                    addr, deliveries, failures
                ));
            }
            Ok(out)
        }
        ConsoleCommand::MerkleRoot => Ok(format!(
            "Merkle root over {} block(s): {}",
            ledger.height(),
            hash_to_hex(&ledger.history_merkle_root())
        )),
        ConsoleCommand::Verify => {
            if ledger.verify_chain() {
                Ok(format!("{} ({} blocks)", "Chain is valid".green(), ledger.height()))
            } else {
                Ok("Chain verification FAILED; see log for details".red().to_string())
            }
        }
        ConsoleCommand::Help => Ok(help_text()),
        ConsoleCommand::Quit => Ok("Bye.".to_string()),
        ConsoleCommand::Prompt(prompt) => Ok(prompt.text().to_string()),
    }
}

pub fn help_text() -> String {
    [
        "Commands:",
        "  addtransaction <data>   queue a transaction in the mempool",
        "  mineblock               commit the mempool into a new block and broadcast",
        "  printchain              show every block",
        "  connect <addr>          add a peer and fetch its chain",
        "  query <data>            check whether a transaction was ever committed",
        "  peers                   list known peers",
        "  merkleroot              Merkle root over every committed transaction",
        "  verify                  re-check hashes, Merkle roots and links",
        "  help                    this text",
        "  quit                    stop the node",
    ]
    .join("\n")
}

fn format_timestamp(timestamp: i64) -> String {
    match chrono::DateTime::from_timestamp(timestamp, 0) {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => timestamp.to_string(),
    }
}

/// Render the chain as a table, oldest block first.
pub fn render_chain(blocks: &[Block]) -> String {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(
            ["#", "Timestamp", "Previous", "Merkle root", "Transactions", "Hash"]
                .into_iter()
                .map(|h| Cell::new(h).fg(TableColor::Cyan).add_attribute(Attribute::Bold)),
        );

    for (i, block) in blocks.iter().enumerate() {
        let previous = if block.is_genesis() {
            "(genesis)".to_string()
        } else {
            hex::encode(&block.previous_hash[..block.previous_hash.len().min(8)])
        };
        let transactions = if block.transactions.is_empty() {
            "-".to_string()
        } else {
            block
                .transactions
                .iter()
                .map(|tx| tx.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        };

        table.add_row(vec![
            Cell::new(i).fg(TableColor::White),
            Cell::new(format_timestamp(block.timestamp)).fg(TableColor::Grey),
            Cell::new(previous),
            Cell::new(short_hex(&block.merkle_root)),
            Cell::new(transactions).fg(TableColor::Green),
            Cell::new(short_hex(&block.hash)).fg(TableColor::Yellow),
        ]);
    }

    let tip = blocks
        .last()
        .map(|b| hash_to_hex(&b.hash))
        .unwrap_or_default();
    format!("{}\n{} {} blocks, tip {}", table, "Chain:".bold(), blocks.len(), tip)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::Ledger;
    use std::time::Duration;

    #[test]
    fn test_parse_lowercase_and_aliases() {
        assert_eq!(
            ConsoleCommand::parse("addtransaction pay bob").unwrap(),
            Some(ConsoleCommand::AddTransaction(Transaction::from("pay bob")))
        );
        assert_eq!(
            ConsoleCommand::parse("ADD_TRANSACTION|pay bob").unwrap(),
            Some(ConsoleCommand::AddTransaction(Transaction::from("pay bob")))
        );
        assert_eq!(ConsoleCommand::parse("MINE_BLOCK").unwrap(), Some(ConsoleCommand::MineBlock));
        assert_eq!(ConsoleCommand::parse("PrintChain").unwrap(), Some(ConsoleCommand::PrintChain));
        assert_eq!(
            ConsoleCommand::parse("connect 127.0.0.1:3001").unwrap(),
            Some(ConsoleCommand::Connect("127.0.0.1:3001".to_string()))
        );
        assert_eq!(ConsoleCommand::parse("   ").unwrap(), None);
        assert!(ConsoleCommand::parse("exit").unwrap().unwrap().is_quit());
    }

    #[test]
    fn test_missing_argument_prompts() {
        let command = ConsoleCommand::parse("CONNECT").unwrap().unwrap();
        assert_eq!(command, ConsoleCommand::Prompt(ArgumentPrompt::Address));
        assert_eq!(
            ArgumentPrompt::Address.complete(" 10.0.0.5:3000 \n").unwrap(),
            ConsoleCommand::Connect("10.0.0.5:3000".to_string())
        );
        assert!(ArgumentPrompt::Transaction.complete("").is_err());
    }

    #[test]
    fn test_unsafe_payload_refused() {
        assert!(matches!(
            ConsoleCommand::parse("addtransaction a,b"),
            Err(ChainError::InvalidInput(_))
        ));
        assert!(matches!(
            ConsoleCommand::parse("query a|b"),
            Err(ChainError::InvalidInput(_))
        ));
        assert!(matches!(
            ArgumentPrompt::Address.complete("  "),
            Err(ChainError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_unknown_console_command() {
        assert_eq!(
            ConsoleCommand::parse("launch rockets"),
            Err(ChainError::UnknownCommand("launch".to_string()))
        );
    }

    #[test]
    fn test_render_chain_lists_every_block() {
        let ledger = Ledger::new();
        ledger.add_transaction_to_mempool(Transaction::from("alpha"));
        ledger.mine_block();
        let out = render_chain(&ledger.blocks());
        assert!(out.contains("(genesis)"));
        assert!(out.contains("alpha"));
        assert!(out.contains(&hash_to_hex(&ledger.latest_block().hash)));
    }

    #[tokio::test]
    async fn test_execute_add_mine_query() {
        tokio::time::timeout(Duration::from_secs(5), async {
            let network = NetworkNode::new(Ledger::new());
            for line in ["addtransaction t1", "addtransaction t2", "mineblock"] {
                let command = ConsoleCommand::parse(line).unwrap().unwrap();
                execute(command, &network).await.unwrap();
            }
            let block = network.ledger().latest_block();
            assert_eq!(block.transactions, vec![Transaction::from("t1"), Transaction::from("t2")]);
            assert_eq!(network.ledger().mempool_len(), 0);

            let found = execute(ConsoleCommand::parse("query t2").unwrap().unwrap(), &network)
                .await
                .unwrap();
            assert!(found.contains("is in the chain"));
            let missing = execute(ConsoleCommand::parse("query t9").unwrap().unwrap(), &network)
                .await
                .unwrap();
            assert!(missing.contains("is not in the chain"));

            let root = execute(ConsoleCommand::parse("MERKLEROOT").unwrap().unwrap(), &network)
                .await
                .unwrap();
            assert!(root.ends_with(&hash_to_hex(&network.ledger().history_merkle_root())));
        })
        .await
        .expect("test_execute_add_mine_query timed out");
    }
}
