#![forbid(unsafe_code)]
//! Operator console for ReorgWatch

use clap::{Parser, Subcommand};
use colored::*;
use comfy_table::presets::UTF8_FULL;
use comfy_table::Color as TableColor;
use comfy_table::{Attribute, Cell, ContentArrangement, Table};
use reorgwatch::config::load_config;
use reorgwatch::ledger::{Block, TrackedTransactionView, DEFAULT_COLOR};
use reorgwatch::manager::SideOutcome;
use reorgwatch::network::DisconnectOutcome;
use reorgwatch::response::Envelope;
use reorgwatch::{ReorgError, ReorgManager, Side};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Watch two nodes of the same chain diverge and reorganize", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, global = true, default_value = "reorgwatch.toml")]
    config: String,

    /// Print the JSON envelope instead of tables
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync both nodes and show the blocks and tracked transactions of one day
    Data {
        #[arg(long)]
        date: Option<String>,
    },
    /// Private node connection status, public tip and ledger summary
    Status,
    /// Sync both nodes and refresh tracked transactions
    Sync,
    /// Broadcast a signed transaction through the private node and track it
    Send {
        raw_tx: String,
        #[arg(long, default_value = DEFAULT_COLOR)]
        color: String,
    },
    /// Start tracking a transaction
    Track {
        txid: String,
        #[arg(long, default_value = DEFAULT_COLOR)]
        color: String,
    },
    /// Stop tracking a transaction
    Untrack { txid: String },
    /// Show both nodes' view of a transaction
    Txinfo { txid: String },
    /// Connect the private node to the public node
    Connect,
    /// Disconnect the private node from the public node
    Disconnect,
    /// List the private node's peers
    Peers,
    /// Dates with stored blocks
    Dates,
    /// Ledger statistics per side
    Stats,
    /// List stored blocks
    Blocks {
        /// public, private or all
        #[arg(default_value = "all")]
        side: String,
        #[arg(long)]
        date: Option<String>,
    },
}

fn short(hash: &str) -> String {
    if hash.len() > 16 {
        format!("{}...{}", &hash[..8], &hash[hash.len() - 6..])
    } else {
        hash.to_string()
    }
}

fn header(labels: &[&str]) -> Vec<Cell> {
    labels
        .iter()
        .map(|l| Cell::new(l).fg(TableColor::Cyan).add_attribute(Attribute::Bold))
        .collect()
}

fn new_table(labels: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header(labels));
    table
}

fn side_color(side: Side) -> TableColor {
    match side {
        Side::Public => TableColor::Green,
        Side::Private => TableColor::Magenta,
    }
}

fn print_blocks(blocks: &[Block]) {
    if blocks.is_empty() {
        println!("{}", "No blocks stored for this selection".yellow());
        return;
    }
    let mut table = new_table(&["Height", "Hash", "Prev", "Time", "Coinbase", "Chainwork", "First seen"]);
    for block in blocks {
        table.add_row(vec![
            Cell::new(block.height),
            Cell::new(short(&block.hash)),
            Cell::new(short(&block.prev_hash)),
            Cell::new(format!("{} {}", block.date, block.time)),
            Cell::new(&block.coinbase_message),
            Cell::new(format!("{:.4}", block.chainwork)),
            Cell::new(block.first_seen_by).fg(side_color(block.first_seen_by)),
        ]);
    }
    println!("{table}");
}

fn print_tracked(transactions: &[TrackedTransactionView]) {
    if transactions.is_empty() {
        return;
    }
    let mut table = new_table(&["Txid", "Color", "Blocks", "Inputs", "Outputs"]);
    for tx in transactions {
        let blocks = if tx.is_pending() {
            "pending".to_string()
        } else {
            tx.blocks.iter().map(|b| short(b)).collect::<Vec<_>>().join(", ")
        };
        table.add_row(vec![
            Cell::new(short(&tx.txid)),
            Cell::new(&tx.color),
            Cell::new(blocks),
            Cell::new(tx.inputs.len()),
            Cell::new(tx.outputs.len()),
        ]);
    }
    println!("{table}");
}

fn print_outcomes(outcomes: &[SideOutcome]) {
    for outcome in outcomes {
        let line = format!(
            "{:>7}: {} new blocks, {} shared, {} new links",
            outcome.side, outcome.blocks_inserted, outcome.blocks_adopted, outcome.links_added
        );
        match &outcome.error {
            None => println!("{} {}", "✔".green(), line),
            Some(e) => println!("{} {} ({})", "✘".red(), line, e.red()),
        }
    }
}

fn emit<T: Serialize>(json: bool, result: reorgwatch::Result<T>, render: impl FnOnce(&T)) -> reorgwatch::Result<()> {
    if json {
        let envelope = Envelope::from(result);
        println!("{}", serde_json::to_string_pretty(&envelope)?);
        return Ok(());
    }
    let data = result?;
    render(&data);
    Ok(())
}

async fn run(cli: Cli) -> reorgwatch::Result<()> {
    let config = load_config(&cli.config)?;
    let manager = ReorgManager::from_config(&config)?;
    let json = cli.json;

    match cli.command {
        Commands::Data { date } => {
            let result = manager.get_blockchain_data(date.as_deref()).await;
            emit(json, result, |data| {
                println!("{}", format!("Blocks on {}", data.date).bright_cyan().bold());
                print_outcomes(&data.sync);
                for (side, tip) in [
                    (Side::Private, &data.chain_tips.private),
                    (Side::Public, &data.chain_tips.public),
                ] {
                    match tip {
                        Some(tip) => println!("{:>7} tip: {} @ {}", side, short(&tip.hash), tip.height),
                        None => println!("{:>7} tip: {}", side, "unavailable".red()),
                    }
                }
                print_blocks(&data.chain_blocks);
                print_tracked(&data.transactions);
            })
        }
        Commands::Status => {
            let result = manager.get_network_status().await;
            emit(json, result, |status| {
                let conn = &status.connection;
                let state = if conn.is_connected {
                    "connected".green().bold()
                } else {
                    "partitioned".red().bold()
                };
                println!("Private node: {} ({} peers)", state, conn.peer_count);
                println!("Private tip:  {} @ {}", short(&conn.tip.hash), conn.tip.height);
                match &status.public_tip {
                    Some(tip) => println!("Public tip:   {} @ {}", short(&tip.hash), tip.height),
                    None => println!("Public tip:   {}", "unavailable".red()),
                }
                println!("Stored blocks: {}", status.summary.total.count);
                let mut table = new_table(&["Coinbase", "Blocks", "Heights"]);
                for (message, group) in &status.summary.by_coinbase {
                    table.add_row(vec![
                        Cell::new(message),
                        Cell::new(group.count),
                        Cell::new(format!("{}-{}", group.height_range.min, group.height_range.max)),
                    ]);
                }
                println!("{table}");
            })
        }
        Commands::Sync => {
            let outcomes = manager.sync_recent_data().await;
            emit(json, Ok(outcomes), |outcomes| print_outcomes(outcomes))
        }
        Commands::Send { raw_tx, color } => {
            let result = manager.send_raw_transaction(&raw_tx, &color).await;
            emit(json, result, |sent| {
                println!("{} {}", "Broadcast".green().bold(), sent.txid);
                if let Some(e) = &sent.tracking_error {
                    println!("{} {}", "Not tracked:".yellow(), e);
                }
            })
        }
        Commands::Track { txid, color } => {
            let result = manager.track_transaction(&txid, &color).await;
            emit(json, result, |view| print_tracked(std::slice::from_ref(view)))
        }
        Commands::Untrack { txid } => {
            let result = manager.untrack_transaction(&txid).await;
            emit(json, result, |_| println!("{} {}", "Untracked".green(), txid))
        }
        Commands::Txinfo { txid } => {
            let result = manager.fetch_tx_info(&txid).await;
            emit(json, result, |info| {
                for (side, snapshot) in [(Side::Private, &info.private), (Side::Public, &info.public)] {
                    match snapshot {
                        Some(s) => println!(
                            "{:>7}: {} ({} in / {} out)",
                            side,
                            s.blockhash.as_deref().map(short).unwrap_or_else(|| "mempool".to_string()),
                            s.inputs.len(),
                            s.outputs.len()
                        ),
                        None => println!("{:>7}: {}", side, "unknown".yellow()),
                    }
                }
            })
        }
        Commands::Connect => {
            let result = manager.connect().await;
            emit(json, result, |_| println!("{}", "Connection requested".green()))
        }
        Commands::Disconnect => {
            let outcome = manager.disconnect().await;
            emit(json, Ok(outcome), |outcome| match outcome {
                DisconnectOutcome::Disconnected => println!("{}", "Disconnected".green()),
                DisconnectOutcome::Ignored(e) => println!("{} ({})", "Nothing to disconnect".yellow(), e),
            })
        }
        Commands::Peers => {
            let result = manager.get_peer_addresses().await;
            emit(json, result, |peers| {
                if peers.is_empty() {
                    println!("{}", "No peers".yellow());
                }
                for peer in peers {
                    println!("  {}", peer);
                }
            })
        }
        Commands::Dates => emit(json, manager.available_dates(), |dates| {
            let mut table = new_table(&["Date", "Public", "Private", "Total"]);
            for d in dates {
                table.add_row(vec![
                    Cell::new(&d.date),
                    Cell::new(d.public_blocks),
                    Cell::new(d.private_blocks),
                    Cell::new(d.total_blocks),
                ]);
            }
            println!("{table}");
        }),
        Commands::Stats => emit(json, manager.database_stats(), |stats| {
            let mut table = new_table(&["Side", "Blocks", "Min", "Max", "Span"]);
            for (side, s) in [(Side::Public, &stats.public_network), (Side::Private, &stats.private_network)] {
                let height = |h: Option<u64>| h.map(|v| v.to_string()).unwrap_or_else(|| "N/A".to_string());
                table.add_row(vec![
                    Cell::new(side).fg(side_color(side)),
                    Cell::new(s.total_blocks),
                    Cell::new(height(s.min_height)),
                    Cell::new(height(s.max_height)),
                    Cell::new(s.height_span),
                ]);
            }
            println!("{table}");
            println!(
                "Tracked transactions: {}, block links: {}",
                stats.total_transactions_tracked, stats.total_tx_block_links
            );
        }),
        Commands::Blocks { side, date } => {
            let side = match side.as_str() {
                "all" => None,
                other => Some(other.parse::<Side>()?),
            };
            emit(json, manager.blocks(side, date.as_deref()), |blocks| print_blocks(blocks))
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("{} {}", "Error:".red().bold(), e);
        let code = match e {
            ReorgError::Validation(_) | ReorgError::Config(_) => 2,
            _ => 1,
        };
        std::process::exit(code);
    }
}
