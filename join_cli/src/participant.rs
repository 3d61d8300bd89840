use crate::config::JoinCommand;
use crate::server::stop_on_ctrl_c;
use crate::settings::Settings;
use crate::wallet_commands::load_wallet;
use anyhow::anyhow;
use log::*;
use multijoin_net::delegates::DummyChannelHost;
use multijoin_net::{Client, ParticipantAgent};
use tokio_util::sync::CancellationToken;

pub async fn join_round(cmd: JoinCommand, settings: Settings) -> Result<(), anyhow::Error> {
    let mut participant = settings.participant;
    if let Some(url) = cmd.coordinator_url {
        participant.coordinator_url = url;
    }
    if let Some(path) = cmd.wallet_file {
        participant.wallet_file = Some(path);
    }
    if let Some(rate) = cmd.fee_rate {
        participant.fee_rate = rate;
    }
    let config = participant.agent_config()?;
    let mut wallet = load_wallet(&participant)?;
    let balance = wallet.refresh(&participant.bitcoind()?.connect()?).await?;
    println!("Wallet {} has {balance} available", wallet.address());

    let client = Client::new(&participant.coordinator_url, participant.request_timeout())?;
    let health = client.health().await?;
    if health.network != config.network.to_string() {
        return Err(anyhow!(
            "The coordinator runs on {}, but this participant is on {}",
            health.network,
            config.network
        ));
    }
    let host = DummyChannelHost::new(&participant.node_name, config.network);
    warn!("No channel host is connected. Channel opens are simulated by {}", participant.node_name);

    let mut agent = ParticipantAgent::new(client, host, wallet, config, cmd.channels);
    let cancel = CancellationToken::new();
    stop_on_ctrl_c(cancel.clone());
    match agent.run(&cancel).await {
        Ok(outcome) => {
            println!("Round {} settled. Transaction {}", outcome.round, outcome.txid);
            for (peer_id, vout) in &outcome.channels {
                println!("  Channel with {peer_id} funded by {}:{vout}", outcome.txid);
            }
            Ok(())
        }
        Err(e) => Err(anyhow!("Round participation failed. {e}")),
    }
}
