use clap::Parser;
use log::{error, info, LevelFilter};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use work_ledger::{
    hash_to_hex, validate_address, BlockRef, Command, Miner, Node, Opt, Server, Settings,
    Synchronizer,
};

fn main() {
    env_logger::builder().filter_level(LevelFilter::Info).init();

    let opt = Opt::parse();
    if let Err(e) = run_command(opt) {
        error!("Error: {e}");
        process::exit(1);
    }
}

/// Each node gets its own database directory unless one is configured.
fn default_data_dir(settings: &mut Settings) {
    if settings.node.data_dir.is_none() {
        let dir = format!("data/node_{}", settings.node_id_from_addr());
        settings.node.data_dir = Some(PathBuf::from(dir));
    }
}

fn load_settings(opt: &Opt) -> work_ledger::Result<Settings> {
    let mut settings = Settings::load(opt.config.as_deref())?;
    default_data_dir(&mut settings);
    Ok(settings)
}

fn run_command(opt: Opt) -> Result<(), Box<dyn std::error::Error>> {
    match &opt.command {
        Command::StartNode {
            listen,
            miner,
            peers,
        } => {
            let mut settings = Settings::load(opt.config.as_deref())?;
            if let Some(listen) = listen {
                settings.node.listen_addr = listen.clone();
            }
            if let Some(miner) = miner {
                settings.node.miner_address = Some(miner.clone());
            }
            settings.node.bootstrap_peers.extend(peers.iter().cloned());
            default_data_dir(&mut settings);
            settings.validate()?;
            start_node(settings)?;
        }
        Command::VerifyChain => {
            let node = Node::open(&load_settings(&opt)?)?;
            node.verify_integrity()?;
            let status = node.status()?;
            println!(
                "Chain OK: height {}, tip {}",
                status.height,
                hash_to_hex(&status.tip)
            );
        }
        Command::Status => {
            let status = Node::open(&load_settings(&opt)?)?.status()?;
            println!("Height:           {}", status.height);
            println!("Tip:              {}", hash_to_hex(&status.tip));
            println!("Cumulative work:  {}", status.cumulative_work);
            println!("Next difficulty:  {}", status.next_difficulty);
            println!("Known blocks:     {}", status.known_blocks);
            println!("Halted:           {}", status.halted);
        }
        Command::GetBalance { address } => {
            let node = Node::open(&load_settings(&opt)?)?;
            let account = node.get_account(address)?;
            println!(
                "Balance of {address}: {} (next nonce {})",
                account.balance, account.nonce
            );
        }
        Command::GetBlock { block } => {
            let node = Node::open(&load_settings(&opt)?)?;
            let key: BlockRef = block.parse()?;
            match node.get_block(key)? {
                Some(block) => println!("{}", serde_json::to_string_pretty(&block)?),
                None => return Err(format!("Block {block} not found").into()),
            }
        }
    }
    Ok(())
}

fn start_node(settings: Settings) -> Result<(), Box<dyn std::error::Error>> {
    let node = Node::open(&settings)?;
    let listen_addr = settings.node.listen_addr.clone();
    let synchronizer = Arc::new(Synchronizer::new(
        node.clone(),
        settings.network.clone(),
        Some(listen_addr.clone()),
    ));
    synchronizer.start()?;

    if let Some(address) = &settings.node.miner_address {
        if !validate_address(address) {
            return Err(format!("Invalid miner address: {address}").into());
        }
        info!("Mining is on. Address to receive rewards: {address}");
        let stop = synchronizer.context().shutdown.clone();
        Miner::new(node, address).spawn(stop)?;
    }

    let server = Server::bind(Arc::clone(&synchronizer), &listen_addr)?;
    server.run(&settings.node.bootstrap_peers)?;
    Ok(())
}
