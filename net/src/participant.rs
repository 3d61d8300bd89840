use crate::delegates::ChannelHost;
use crate::errors::{AgentStepError, ClientError, ParticipantError};
use crate::network_client::Client;
use crate::polling::{poll_until, with_retry, PollResult, RetryPolicy};
use bitcoin::{Address, Transaction, Txid};
use libjoin::codec::{encode_tx, find_output};
use libjoin::{
    verify_outputs, ChainNetwork, ChannelRequest, FundingRequest, FundingWallet, ParticipantId, Recipient, RoundId,
};
use log::*;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AgentState {
    /// Preparing channel opens and submitting the funding request.
    Registering,
    /// Polling for this participant's turn to sign.
    AwaitingTurn,
    /// Checking the draft against the funding request.
    Verifying,
    Signing,
    Submitting,
    /// Polling for the fully signed transaction.
    AwaitingSettlement,
    /// Completing channel opens and waiting for the broadcast.
    Finalizing,
    Done,
    Aborted,
}

impl Display for AgentState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentState::Registering => write!(f, "Registering"),
            AgentState::AwaitingTurn => write!(f, "AwaitingTurn"),
            AgentState::Verifying => write!(f, "Verifying"),
            AgentState::Signing => write!(f, "Signing"),
            AgentState::Submitting => write!(f, "Submitting"),
            AgentState::AwaitingSettlement => write!(f, "AwaitingSettlement"),
            AgentState::Finalizing => write!(f, "Finalizing"),
            AgentState::Done => write!(f, "Done"),
            AgentState::Aborted => write!(f, "Aborted"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct AgentConfig {
    pub network: ChainNetwork,
    pub retry: RetryPolicy,
}

/// The result of a successful round participation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JoinOutcome {
    pub round: RoundId,
    pub pid: ParticipantId,
    pub txid: Txid,
    /// Funding output index of each channel, by peer id.
    pub channels: BTreeMap<String, u32>,
}

/// Takes one participant through one joint funding round.
///
/// The agent opens its channels on the host node, registers with the coordinator, signs the joint transaction when
/// its turn comes (after checking that it pays exactly what was asked for), and finalizes its channels once the
/// transaction is fully signed. On any failure it cancels the channel opens it started. Finalized channels are closed
/// only while the round can no longer be broadcast: either this participant has not reported completion yet, or the
/// coordinator says the round failed. Otherwise they are left open and the settlement is reported as unknown.
pub struct ParticipantAgent<H, W> {
    client: Client,
    host: H,
    wallet: W,
    config: AgentConfig,
    channels: Vec<ChannelRequest>,
    state: AgentState,
    history: Vec<AgentState>,
    started: Vec<String>,
    completed: Vec<String>,
    completion_sent: bool,
    registration: Option<(RoundId, ParticipantId)>,
    txid: Option<Txid>,
}

impl<H, W> ParticipantAgent<H, W>
where
    H: ChannelHost + Send + Sync,
    W: FundingWallet + Send + Sync,
{
    pub fn new(client: Client, host: H, wallet: W, config: AgentConfig, channels: Vec<ChannelRequest>) -> Self {
        Self {
            client,
            host,
            wallet,
            config,
            channels,
            state: AgentState::Registering,
            history: vec![AgentState::Registering],
            started: Vec::new(),
            completed: Vec::new(),
            completion_sent: false,
            registration: None,
            txid: None,
        }
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    /// Every state the agent has been in, in order.
    pub fn history(&self) -> &[AgentState] {
        &self.history
    }

    pub fn registration(&self) -> Option<(RoundId, ParticipantId)> {
        self.registration
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn wallet(&self) -> &W {
        &self.wallet
    }

    /// Runs the participation to the end. `cancel` stops any polling loop, after which the agent aborts and cleans
    /// up its channel opens.
    pub async fn run(&mut self, cancel: &CancellationToken) -> Result<JoinOutcome, ParticipantError> {
        match self.participate(cancel).await {
            Ok(outcome) => {
                self.transition(AgentState::Done);
                info!("Round {} settled with transaction {}", outcome.round, outcome.txid);
                Ok(outcome)
            }
            Err(e) => Err(self.abort(e).await),
        }
    }

    async fn participate(&mut self, cancel: &CancellationToken) -> Result<JoinOutcome, AgentStepError> {
        let request = self.prepare_funding().await?;
        let policy = self.config.retry.clone();
        let client = self.client.clone();
        let (client, funding) = (&client, &request);

        let started = with_retry(&policy, cancel, "join", move || client.join(funding)).await?;
        let (id, pid) = (started.id, started.pid);
        self.registration = Some((id, pid));
        info!("{}", started.message);

        self.transition(AgentState::AwaitingTurn);
        let draft = poll_until(&policy, cancel, "our turn to sign", move || async move {
            Ok::<_, ClientError>(client.status(id, pid).await?.map_or(PollResult::Pending, PollResult::Ready))
        })
        .await?;

        self.transition(AgentState::Verifying);
        let tx = verify_outputs(&draft, &request.recipients, self.config.network)?;
        debug!("Round {id}: draft {} pays every requested output", tx.compute_txid());

        self.transition(AgentState::Signing);
        let signed = self.wallet.sign(&tx, &request.utxos).await?;

        self.transition(AgentState::Submitting);
        let bytes = encode_tx(&signed);
        let submission = with_retry(&policy, cancel, "signature submission", move || {
            client.submit_signature(id, pid, bytes.clone())
        })
        .await;
        match submission {
            Ok(()) => info!("Round {id}: signature accepted"),
            Err(e) if e.is_already_signed() => info!("Round {id}: signature was already recorded"),
            Err(e) => return Err(e.into()),
        }

        self.transition(AgentState::AwaitingSettlement);
        let update = poll_until(&policy, cancel, "the fully signed transaction", move || async move {
            Ok::<_, ClientError>(client.update(id).await?.map_or(PollResult::Pending, PollResult::Ready))
        })
        .await?;
        let final_tx = verify_outputs(&update.signed, &request.recipients, self.config.network)?;
        let txid = final_tx.compute_txid();
        if update.tx_id != txid.to_string() {
            return Err(AgentStepError::Protocol(format!(
                "coordinator reported txid {} for transaction {txid}",
                update.tx_id
            )));
        }
        self.txid = Some(txid);

        self.transition(AgentState::Finalizing);
        let channels = self.complete_channels(&request, &final_tx, txid).await?;
        self.completion_sent = true;
        with_retry(&policy, cancel, "completion", move || client.complete(id, pid)).await?;
        poll_until(&policy, cancel, "the broadcast", move || async move {
            Ok::<_, ClientError>(match client.update(id).await? {
                Some(update) if update.broadcast => PollResult::Ready(()),
                _ => PollResult::Pending,
            })
        })
        .await?;
        Ok(JoinOutcome { round: id, pid, txid, channels })
    }

    /// Starts a channel open for every requested channel and asks the wallet to pay for them.
    async fn prepare_funding(&mut self) -> Result<FundingRequest, AgentStepError> {
        if self.channels.is_empty() {
            return Err(AgentStepError::Protocol("no channels were requested".into()));
        }
        let mut outputs = BTreeMap::new();
        let mut payments = Vec::with_capacity(self.channels.len());
        for channel in self.channels.clone() {
            let address = self.host.start_channel_open(&channel).await?;
            self.started.push(channel.peer_id.clone());
            let recipient = Recipient::new(address, channel.amount);
            payments.push(recipient.clone());
            outputs.insert(channel.peer_id.clone(), recipient);
        }
        let funding = self.wallet.fund(&payments).await?;
        let mut recipients = payments;
        recipients.extend(funding.change);
        let request = FundingRequest::new(recipients, funding.utxos, outputs);
        request.validate().map_err(|e| AgentStepError::Protocol(e.to_string()))?;
        Ok(request)
    }

    async fn complete_channels(
        &mut self,
        request: &FundingRequest,
        tx: &Transaction,
        txid: Txid,
    ) -> Result<BTreeMap<String, u32>, AgentStepError> {
        let mut result = BTreeMap::new();
        for (peer_id, output) in &request.outputs {
            let address = Address::from_str(&output.address)
                .ok()
                .and_then(|a| a.require_network(self.config.network.to_bitcoin()).ok())
                .ok_or_else(|| AgentStepError::Protocol(format!("invalid funding address {}", output.address)))?;
            let (vout, _) = find_output(tx, &address.script_pubkey())
                .ok_or_else(|| AgentStepError::Protocol(format!("no funding output for channel with {peer_id}")))?;
            self.host.complete_channel_open(peer_id, txid, vout).await?;
            self.completed.push(peer_id.clone());
            result.insert(peer_id.clone(), vout);
        }
        Ok(result)
    }

    /// Cancels channel opens that were not completed and closes those that were, unless the round may still be
    /// broadcast.
    async fn abort(&mut self, cause: AgentStepError) -> ParticipantError {
        let state = self.state;
        self.transition(AgentState::Aborted);
        warn!("Aborting round participation while {state}. {cause}");
        let txid = self.txid.map(|t| t.to_string()).unwrap_or_default();
        if self.completion_sent && !cause.is_round_failure() {
            warn!("Leaving finalized channels open. Transaction {txid} may still be broadcast");
            return ParticipantError::SettlementUnknown { txid, reason: cause.to_string() };
        }
        for peer_id in self.started.iter().filter(|p| !self.completed.contains(*p)) {
            if let Err(e) = self.host.cancel_channel_open(peer_id).await {
                error!("Could not cancel the channel open with {peer_id}. {e}");
            }
        }
        for peer_id in &self.completed {
            if let Err(e) = self.host.close_channel(peer_id).await {
                error!("Could not close the channel with {peer_id}. {e}");
            }
        }
        if self.completed.is_empty() {
            return ParticipantError::aborted(state, cause.to_string());
        }
        ParticipantError::ManualRecovery { txid, reason: cause.to_string() }
    }

    fn transition(&mut self, next: AgentState) {
        trace!("Participant agent: {} -> {next}", self.state);
        self.state = next;
        self.history.push(next);
    }
}
