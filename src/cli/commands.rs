use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "work-ledger")]
pub struct Opt {
    #[arg(long = "config", global = true, help = "TOML settings file")]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    #[command(name = "startnode", about = "Start a ledger node")]
    StartNode {
        #[arg(long = "listen", help = "Address to accept peers on")]
        listen: Option<String>,
        #[arg(long = "miner", help = "Enable mining mode and send rewards to ADDRESS")]
        miner: Option<String>,
        #[arg(long = "peer", help = "Bootstrap peer, may be repeated")]
        peers: Vec<String>,
    },
    #[command(
        name = "verifychain",
        about = "Replay the stored chain and check every block and balance"
    )]
    VerifyChain,
    #[command(name = "status", about = "Print the stored chain tip")]
    Status,
    #[command(name = "getbalance", about = "Print the balance and next nonce of an address")]
    GetBalance {
        #[arg(help = "The account address")]
        address: String,
    },
    #[command(name = "getblock", about = "Print a block by hash or height")]
    GetBlock {
        #[arg(help = "64-character block hash or a height")]
        block: String,
    },
}
