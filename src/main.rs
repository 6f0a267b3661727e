use clap::{
    Parser,
    Subcommand,
};
use color_eyre::eyre::{
    Result,
    WrapErr,
};
use hashlock_escrow::{
    config::{
        NetworkConfig,
        NetworkKind,
        ProviderName,
    },
    ledger::{
        EscrowProgram,
        sim::SimLedger,
    },
};
use std::path::PathBuf;
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling,
};
use tracing_subscriber::{
    EnvFilter,
    fmt,
};

mod client;
mod headless;
mod ui;

#[derive(Parser, Debug)]
#[command(
    name = "hashlock",
    about = "Lock funds behind a secret and release them to whoever reveals it",
    version
)]
struct Args {
    /// Ledger backend: sim or fuel (env HASHLOCK_NETWORK)
    #[arg(long, global = true)]
    network: Option<NetworkKind>,

    /// LocalHost, DevNet or TestNet (env HASHLOCK_NETWORK_PROVIDER)
    #[arg(long, global = true)]
    provider: Option<ProviderName>,

    /// Override the provider's RPC URL
    #[arg(long, global = true)]
    rpc_url: Option<String>,

    /// forc-wallet profile name
    #[arg(long, global = true)]
    wallet: Option<String>,

    /// Override forc-wallet directory (defaults to ~/.fuel/wallets)
    #[arg(long, global = true)]
    wallet_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Interactive terminal UI (default)
    Tui,
    /// Print the connected address and balance
    Balance,
    /// Request faucet funds (LocalHost only)
    Faucet,
    /// Open an escrow and wait until it is claimed
    Send {
        /// Amount in whole units, e.g. 12.5
        #[arg(long)]
        amount: String,
        #[arg(long)]
        secret: u64,
    },
    /// Claim an escrow by revealing its secret
    Receive {
        #[arg(long)]
        instance: String,
        #[arg(long)]
        secret: u64,
    },
    /// List escrows opened from this directory
    Escrows,
}

impl Args {
    fn network_config(&self) -> Result<NetworkConfig> {
        let mut config = NetworkConfig::from_env()?;
        if let Some(network) = self.network {
            config.network = network;
        }
        if let Some(provider) = self.provider {
            config.provider = provider;
            config.rpc_url = provider.default_rpc_url().to_string();
        }
        if let Some(url) = &self.rpc_url {
            config.rpc_url = url.clone();
        }
        if let Some(wallet) = &self.wallet {
            config.wallet = Some(wallet.clone());
        }
        if let Some(dir) = &self.wallet_dir {
            config.wallet_dir = Some(dir.clone());
        }
        Ok(config)
    }
}

/// The TUI owns the terminal, so its logs go to a daily file instead.
fn init_tracing(to_file: bool) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if to_file {
        let appender = rolling::daily("logs", "hashlock.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let _ = fmt()
            .with_env_filter(filter)
            .with_writer(writer)
            .with_ansi(false)
            .try_init();
        Some(guard)
    } else {
        let _ = fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
        None
    }
}

async fn dispatch<P: EscrowProgram>(
    program: P,
    config: NetworkConfig,
    command: Command,
) -> Result<()> {
    match command {
        Command::Tui => client::run_app(program, config).await,
        Command::Balance => headless::balance(program, config).await,
        Command::Faucet => headless::faucet(program, config).await,
        Command::Send { amount, secret } => {
            headless::send(program, config, &amount, secret).await
        }
        Command::Receive { instance, secret } => {
            headless::receive(program, config, &instance, secret).await
        }
        Command::Escrows => headless::escrows(&config),
    }
}

#[cfg(feature = "fuel")]
async fn dispatch_fuel(config: NetworkConfig, command: Command) -> Result<()> {
    let ledger = hashlock_escrow::ledger::fuel::FuelLedger::connect(&config)
        .await
        .wrap_err_with(|| format!("failed to connect to {}", config.rpc_url))?;
    dispatch(ledger, config, command).await
}

#[cfg(not(feature = "fuel"))]
async fn dispatch_fuel(_config: NetworkConfig, _command: Command) -> Result<()> {
    Err(color_eyre::eyre::eyre!(
        "this build has no Fuel support; rebuild with `--features fuel`"
    ))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Args::parse();
    let config = args.network_config().wrap_err("invalid network configuration")?;
    let command = args.command.clone().unwrap_or(Command::Tui);
    let _guard = init_tracing(matches!(command, Command::Tui));
    tracing::info!(network = %config.label(), "starting hashlock");

    match config.network {
        NetworkKind::Sim => dispatch(SimLedger::new(), config, command).await,
        NetworkKind::Fuel => dispatch_fuel(config, command).await,
    }
}
