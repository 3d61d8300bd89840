use crate::config::ServeCommand;
use crate::settings::Settings;
use anyhow::anyhow;
use libjoin::{BroadcastTransaction, DefaultTransactionBuilder, MockBroadcaster};
use log::*;
use multijoin_net::{Coordinator, CoordinatorConfig, CoordinatorServer};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub async fn start_server(cmd: ServeCommand, settings: Settings) -> Result<(), anyhow::Error> {
    let mut coordinator = settings.coordinator;
    if let Some(address) = cmd.listen_address {
        coordinator.listen_address = address;
    }
    if let Some(quorum) = cmd.quorum {
        coordinator.quorum = quorum;
    }
    if let Some(timeout) = cmd.round_timeout_secs {
        coordinator.round_timeout_secs = timeout;
    }
    let config = coordinator.to_config()?;
    let builder = DefaultTransactionBuilder::new(config.network);
    match (&coordinator.bitcoind, cmd.mock_broadcast) {
        (_, true) => {
            warn!("Round transactions will be logged but not published");
            serve(&coordinator.listen_address, config, builder, MockBroadcaster::new()).await
        }
        (Some(bitcoind), false) => {
            let rpc = bitcoind.connect()?;
            info!("Publishing round transactions through {}", rpc.url());
            serve(&coordinator.listen_address, config, builder, rpc).await
        }
        (None, false) => Err(anyhow!(
            "No bitcoind connection is configured in the coordinator settings. Add one, or run with --mock-broadcast"
        )),
    }
}

async fn serve<X>(
    address: &str,
    config: CoordinatorConfig,
    builder: DefaultTransactionBuilder,
    broadcaster: X,
) -> Result<(), anyhow::Error>
where
    X: BroadcastTransaction + Send + Sync + 'static,
{
    info!("Starting coordinator on {} with rounds of {} participants", config.network, config.quorum);
    let coordinator = Arc::new(Coordinator::new(config, builder, broadcaster));
    let server = CoordinatorServer::bind(address, coordinator).await?;
    println!("Coordinator listening on http://{}", server.local_addr()?);
    let shutdown = CancellationToken::new();
    stop_on_ctrl_c(shutdown.clone());
    server.run_until_stopped(shutdown).await?;
    info!("Server has shut down.");
    Ok(())
}

/// Cancels `token` when the process receives Ctrl-C.
pub fn stop_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl-C received. Shutting down");
                token.cancel();
            }
            Err(e) => error!("Could not listen for Ctrl-C. {e}"),
        }
    });
}
