use clap::Parser;
use multijoin_cli::config::{CliCommand, Config, WalletCommand};
use multijoin_cli::participant::join_round;
use multijoin_cli::server::start_server;
use multijoin_cli::settings::Settings;
use multijoin_cli::wallet_commands::{create_wallet, print_address, print_balance};

#[tokio::main]
async fn main() {
    env_logger::init();
    let config: Config = Config::parse();
    let (global_options, command) = config.to_parts();

    let result = match Settings::load(global_options.config_file.as_deref()) {
        Ok(settings) => {
            let settings = settings.with_network(global_options.network);
            match command {
                CliCommand::Serve(cmd) => start_server(cmd, settings).await,
                CliCommand::Join(cmd) => join_round(cmd, settings).await,
                CliCommand::Wallet(WalletCommand::Create { path }) => create_wallet(path, &settings),
                CliCommand::Wallet(WalletCommand::Address) => print_address(&settings),
                CliCommand::Wallet(WalletCommand::Balance) => print_balance(&settings).await,
            }
        }
        Err(err) => Err(err.into()),
    };

    match result {
        Ok(()) => {
            println!("Bye :)")
        }
        Err(err) => {
            eprintln!("** Error ** \n {err}");
            std::process::exit(1);
        }
    }
}
