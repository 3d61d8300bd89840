use clap::{Args, Parser, Subcommand};
use libjoin::ChannelRequest;
use std::path::PathBuf;

/// Joint channel funding rounds.
///
/// Run a round coordinator, or take part in a round to open several channels with a single transaction shared with
/// other participants.
#[derive(Parser, Debug)]
#[command(version, about)]
pub struct Config {
    /// Path to the configuration file. The default is `$HOME/.multijoin/config.yml`.
    #[arg(long = "config-file", short = 'c')]
    pub config_file: Option<PathBuf>,
    /// Bitcoin network: bitcoin, testnet or regtest. Overrides the configuration file.
    #[arg(long = "network", short = 'n', env = "MULTIJOIN_NETWORK")]
    pub network: Option<String>,
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Run the round coordinator.
    #[command(name = "serve", alias = "start")]
    Serve(ServeCommand),
    /// Join a round and fund the given channels.
    #[command(name = "join")]
    Join(JoinCommand),
    /// Create or inspect the participant wallet.
    #[command(subcommand, name = "wallet")]
    Wallet(WalletCommand),
}

#[derive(Debug, Args)]
pub struct ServeCommand {
    /// The address to listen on, e.g. `127.0.0.1:7750`.
    #[arg(long = "listen-address", short = 'a')]
    pub listen_address: Option<String>,
    /// Number of participants per round.
    #[arg(long = "quorum", short = 'q')]
    pub quorum: Option<usize>,
    /// Abandon rounds that make no progress for this many seconds.
    #[arg(long = "round-timeout")]
    pub round_timeout_secs: Option<u64>,
    /// Log round transactions instead of publishing them. For testing without a bitcoin node.
    #[arg(long = "mock-broadcast", default_value_t = false)]
    pub mock_broadcast: bool,
}

#[derive(Debug, Args)]
pub struct JoinCommand {
    /// The coordinator's base URL, e.g. `http://127.0.0.1:7750`.
    #[arg(long = "coordinator", short = 's')]
    pub coordinator_url: Option<String>,
    /// Path to the wallet file.
    #[arg(long = "wallet", short = 'w')]
    pub wallet_file: Option<PathBuf>,
    /// Fee rate in sats per virtual byte for this participant's share of the transaction.
    #[arg(long = "fee-rate")]
    pub fee_rate: Option<u64>,
    /// Channels to open, as `peer_id:satoshis[:announce]`.
    #[arg(required = true, value_name = "CHANNEL")]
    pub channels: Vec<ChannelRequest>,
}

#[derive(Debug, Subcommand)]
pub enum WalletCommand {
    /// Create a new wallet with a random key.
    #[command(name = "new", alias = "create")]
    Create {
        /// Where to write the wallet. Defaults to the configured wallet file.
        path: Option<PathBuf>,
    },
    /// Print the wallet's receive address.
    #[command(name = "address", alias = "addr")]
    Address,
    /// Ask bitcoind for the wallet's coins and print the balance.
    #[command(name = "balance")]
    Balance,
}

pub struct GlobalOptions {
    pub config_file: Option<PathBuf>,
    pub network: Option<String>,
}

impl Config {
    pub fn to_parts(self) -> (GlobalOptions, CliCommand) {
        let global = GlobalOptions { config_file: self.config_file, network: self.network };
        (global, self.command)
    }
}
