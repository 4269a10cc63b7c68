use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use quarry_crypto::Signer;
use quarry_node::{run, wallet, NodeConfig};
use quarry_types::Address;

#[derive(Parser, Debug)]
#[command(name = "quarry-node", about = "Proof-of-work ledger node", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a node until ctrl-c
    Run(RunArgs),
    /// Manage wallet key files
    #[command(subcommand)]
    Wallet(WalletCommand),
    /// Sign a transfer and print it as JSON, ready for `POST /transaction`
    SignTx(SignTxArgs),
}

#[derive(Args, Debug, Default)]
struct RunArgs {
    /// TOML config file; flags below override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Peer-to-peer listen address
    #[arg(long)]
    listen: Option<String>,

    /// HTTP API listen address
    #[arg(long)]
    api: Option<SocketAddr>,

    /// Peer to dial at startup (repeatable)
    #[arg(long = "peer")]
    peers: Vec<String>,

    /// Directory holding the persisted chain
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Required leading zero hex digits in block hashes
    #[arg(long)]
    difficulty: Option<u32>,
}

impl RunArgs {
    fn into_config(self) -> anyhow::Result<NodeConfig> {
        let mut config = match &self.config {
            Some(path) => NodeConfig::load(path)?,
            None => NodeConfig::default(),
        };
        if let Some(listen) = self.listen {
            config.p2p_listen = listen;
        }
        if self.api.is_some() {
            config.api_listen = self.api;
        }
        config.peers.extend(self.peers);
        if self.data_dir.is_some() {
            config.data_dir = self.data_dir;
        }
        if let Some(difficulty) = self.difficulty {
            config.consensus.difficulty = difficulty;
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Subcommand, Debug)]
enum WalletCommand {
    /// Generate a new key file
    New {
        #[arg(long)]
        out: PathBuf,
    },
    /// Print the address of a key file
    Address {
        #[arg(long)]
        wallet: PathBuf,
    },
}

#[derive(Args, Debug)]
struct SignTxArgs {
    #[arg(long)]
    wallet: PathBuf,
    #[arg(long)]
    to: Address,
    #[arg(long)]
    amount: u64,
    #[arg(long, default_value_t = 0)]
    fee: u64,
    /// Sender's next nonce, as reported by `GET /nonce`
    #[arg(long)]
    nonce: u64,
}

fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    match Cli::parse().command {
        Command::Run(args) => {
            let config = args.into_config()?;
            init_tracing(&config.log_filter);
            run(config).await
        }
        Command::Wallet(WalletCommand::New { out }) => {
            let keypair = wallet::create(&out)
                .with_context(|| format!("creating wallet {}", out.display()))?;
            println!("{}", keypair.address());
            Ok(())
        }
        Command::Wallet(WalletCommand::Address { wallet: path }) => {
            let keypair = wallet::load(&path)
                .with_context(|| format!("loading wallet {}", path.display()))?;
            println!("{}", keypair.address());
            Ok(())
        }
        Command::SignTx(args) => {
            let keypair = wallet::load(&args.wallet)
                .with_context(|| format!("loading wallet {}", args.wallet.display()))?;
            let tx = wallet::signed_transfer(&keypair, args.to, args.amount, args.fee, args.nonce);
            println!("{}", serde_json::to_string_pretty(&tx)?);
            Ok(())
        }
    }
}
