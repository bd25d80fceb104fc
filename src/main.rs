//! Safe relay CLI
//!
//! Runs the relay and drives the demo flows against it.

use clap::{Parser, Subcommand};
use safe_multisig::cli::{self, CliResult, ServeOptions};
use safe_multisig::client::ServiceClient;
use safe_multisig::crypto::{Address, KeyPair};
use safe_multisig::ledger::DEFAULT_CHAIN_ID;
use safe_multisig::service::ServiceConfig;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "safe")]
#[command(author = "Darshan")]
#[command(version = "0.1.0")]
#[command(about = "M-of-N Safe accounts with an off-chain signature relay", long_about = None)]
struct Cli {
    /// Relay base URL
    #[arg(long, env = "SAFE_SERVICE_URL", default_value = "http://localhost:3000")]
    url: String,

    /// Data directory for relay state
    #[arg(short, long, env = "SAFE_DATA_DIR", default_value = ".safe_data")]
    data_dir: PathBuf,

    /// Private key of owner 1
    #[arg(long, env = "OWNER_1_PRIVATE_KEY", hide_env_values = true)]
    owner_1_key: Option<String>,

    /// Private key of owner 2
    #[arg(long, env = "OWNER_2_PRIVATE_KEY", hide_env_values = true)]
    owner_2_key: Option<String>,

    /// Private key of owner 3
    #[arg(long, env = "OWNER_3_PRIVATE_KEY", hide_env_values = true)]
    owner_3_key: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Key pair operations
    Keys {
        #[command(subcommand)]
        action: KeysCommands,
    },

    /// Run the relay and its ledger
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "3000")]
        port: u16,

        /// Chain id used in every signed hash
        #[arg(long, default_value_t = DEFAULT_CHAIN_ID)]
        chain_id: u64,

        /// Execute envelopes as soon as they reach their threshold
        #[arg(long)]
        auto_execute: bool,

        /// Start from backup N of the state file (0 is the newest)
        #[arg(long)]
        from_backup: Option<usize>,
    },

    /// Deploy a Safe owned by the configured owner keys
    Deploy {
        #[arg(short, long, default_value = "2")]
        threshold: u32,

        #[arg(long, default_value = "0")]
        salt_nonce: u64,

        /// Ether owner 1 deposits into the Safe
        #[arg(long)]
        fund: Option<String>,
    },

    /// Deploy, fund, propose, confirm and execute a transfer
    Transfer {
        /// Recipient
        #[arg(long, default_value = "0xD720205354C0b922666aAf6113C45eF8026a409E")]
        to: String,

        /// Ether to send out of the Safe
        #[arg(short, long, default_value = "0.005")]
        amount: String,

        /// Ether deposited into the Safe first
        #[arg(long, default_value = "0.01")]
        fund: String,
    },

    /// Have owners 1 and 2 sign an off-chain message for a Safe
    SignMessage {
        #[arg(long)]
        safe: String,

        #[arg(short, long, default_value = "I'm the owner of this Safe account")]
        message: String,
    },

    /// Mint test ether
    Faucet {
        #[arg(short, long)]
        address: String,

        #[arg(long, default_value = "1")]
        amount: String,
    },

    /// Show an account balance
    Balance {
        #[arg(short, long)]
        address: String,
    },

    /// List pending envelopes of a Safe
    Pending {
        #[arg(long)]
        safe: String,
    },
}

#[derive(Subcommand)]
enum KeysCommands {
    /// Generate fresh key pairs
    Generate {
        #[arg(short, long, default_value = "3")]
        count: u32,
    },
}

impl Cli {
    /// Owner keys present in the environment or on the command line, in order
    fn owner_keys(&self) -> CliResult<Vec<KeyPair>> {
        let keys = [&self.owner_1_key, &self.owner_2_key, &self.owner_3_key];
        let mut owners = Vec::new();
        for (i, key) in keys.iter().enumerate() {
            if let Some(hex) = key {
                let key_pair = KeyPair::from_private_key_hex(hex)
                    .map_err(|e| format!("OWNER_{}_PRIVATE_KEY: {}", i + 1, e))?;
                owners.push(key_pair);
            }
        }
        if owners.is_empty() {
            return Err("No owner keys set; export OWNER_1_PRIVATE_KEY..OWNER_3_PRIVATE_KEY".into());
        }
        Ok(owners)
    }
}

fn parse_address(s: &str) -> CliResult<Address> {
    s.parse::<Address>()
        .map_err(|e| format!("Invalid address {}: {}", s, e).into())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    if let Commands::Keys {
        action: KeysCommands::Generate { count },
    } = &cli.command
    {
        return cli::cmd_keys_generate(*count);
    }

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(cli))
}

async fn run(cli: Cli) -> CliResult<()> {
    if let Commands::Serve {
        port,
        chain_id,
        auto_execute,
        from_backup,
    } = &cli.command
    {
        return cli::cmd_serve(ServeOptions {
            port: *port,
            data_dir: cli.data_dir.clone(),
            service: ServiceConfig {
                chain_id: *chain_id,
                auto_execute: *auto_execute,
            },
            from_backup: *from_backup,
        })
        .await;
    }

    let client = ServiceClient::new(cli.url.clone())?;

    match &cli.command {
        Commands::Keys { .. } | Commands::Serve { .. } => unreachable!(),

        Commands::Deploy {
            threshold,
            salt_nonce,
            fund,
        } => {
            let owners = cli.owner_keys()?;
            cli::cmd_deploy(&client, &owners, *threshold, *salt_nonce, fund.as_deref()).await?;
        }

        Commands::Transfer { to, amount, fund } => {
            let owners = cli.owner_keys()?;
            cli::cmd_transfer(&client, &owners, parse_address(to)?, amount, fund).await?;
        }

        Commands::SignMessage { safe, message } => {
            let owners = cli.owner_keys()?;
            cli::cmd_sign_message(&client, &owners, parse_address(safe)?, message).await?;
        }

        Commands::Faucet { address, amount } => {
            cli::cmd_faucet(&client, parse_address(address)?, amount).await?;
        }

        Commands::Balance { address } => {
            cli::cmd_balance(&client, parse_address(address)?).await?;
        }

        Commands::Pending { safe } => {
            cli::cmd_pending(&client, parse_address(safe)?).await?;
        }
    }

    Ok(())
}
