use crate::errors::CoordinatorError;
use crate::message_types::{HealthStatus, JoinStarted, TransactionSubmission};
use crate::rounds::{ReapReport, RoundRegistry};
use libjoin::codec::decode_tx;
use libjoin::{
    BroadcastTransaction, ChainNetwork, CompletionOutcome, FinalTransaction, FundingRequest, ParticipantId,
    RoundId, RoundSummary, SignatureAccepted, TransactionBuilder,
};
use log::*;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Clone, Debug)]
pub struct CoordinatorConfig {
    pub network: ChainNetwork,
    /// Number of participants that closes a round.
    pub quorum: usize,
    /// A round that makes no progress for this long is abandoned.
    pub round_timeout: Duration,
    /// Finished rounds stay queryable for this long.
    pub retention: Duration,
    /// How often the reaper looks for stale and expired rounds.
    pub reap_interval: Duration,
    pub broadcast_attempts: u32,
    pub broadcast_retry: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            network: ChainNetwork::Testnet,
            quorum: 2,
            round_timeout: Duration::from_secs(600),
            retention: Duration::from_secs(3600),
            reap_interval: Duration::from_secs(30),
            broadcast_attempts: 3,
            broadcast_retry: Duration::from_secs(10),
        }
    }
}

/// The coordination service. Routes each request to the round it names and drives the round's state machine.
/// Transport concerns live in [`crate::server`].
pub struct Coordinator<B, X> {
    config: CoordinatorConfig,
    builder: B,
    broadcaster: X,
    rounds: RoundRegistry,
}

impl<B, X> Coordinator<B, X>
where
    B: TransactionBuilder + 'static,
    X: BroadcastTransaction + Send + Sync + 'static,
{
    pub fn new(config: CoordinatorConfig, builder: B, broadcaster: X) -> Self {
        let rounds = RoundRegistry::new(config.quorum);
        Self { config, builder, broadcaster, rounds }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn broadcaster(&self) -> &X {
        &self.broadcaster
    }

    pub async fn join(&self, request: FundingRequest) -> Result<JoinStarted, CoordinatorError> {
        request.validate()?;
        let (id, registration) = self.rounds.join(request, &self.builder).await?;
        let message = if registration.closed {
            format!("Joined round {id} as participant {}. The round is full and ready for signing", registration.pid)
        } else {
            format!("Joined round {id} as participant {}. Waiting for more participants", registration.pid)
        };
        Ok(JoinStarted { message, id, pid: registration.pid })
    }

    /// The draft, if `pid` is the participant whose signature is awaited in round `id`.
    pub async fn status(&self, id: RoundId, pid: ParticipantId) -> Result<Option<Vec<u8>>, CoordinatorError> {
        let round = self.rounds.get(id).await.ok_or(CoordinatorError::UnknownRound(id))?;
        let round = round.read().await;
        let draft = round.current_draft(pid)?;
        Ok(draft.map(<[u8]>::to_vec))
    }

    pub async fn submit_signature(
        &self,
        submission: TransactionSubmission,
    ) -> Result<SignatureAccepted, CoordinatorError> {
        let TransactionSubmission { tx, id, pid } = submission;
        let mut round = self.rounds.write(id).await.ok_or(CoordinatorError::UnknownRound(id))?;
        let accepted = round.submit_signature(pid, &tx).inspect_err(|e| {
            warn!("Round {id}: rejected signature from participant {pid}. {e}");
        })?;
        Ok(accepted)
    }

    /// Records that `pid` finalized its channels. If this was the last outstanding completion, the broadcast is
    /// started in the background and the call returns without waiting for it.
    pub async fn complete(self: &Arc<Self>, id: RoundId, pid: ParticipantId) -> Result<(), CoordinatorError> {
        let outcome = {
            let mut round = self.rounds.write(id).await.ok_or(CoordinatorError::UnknownRound(id))?;
            round.record_completion(pid)?
        };
        if let CompletionOutcome::ReadyToBroadcast(bytes) = outcome {
            let coordinator = Arc::clone(self);
            tokio::spawn(async move {
                coordinator.broadcast_round(id, bytes).await;
            });
        }
        Ok(())
    }

    /// Publishes the round's transaction, retrying on failure. The round lock is not held while talking to the
    /// network.
    pub async fn broadcast_round(&self, id: RoundId, bytes: Vec<u8>) {
        let result = match decode_tx(&bytes) {
            Ok(tx) => self.broadcast_with_retry(id, &tx).await,
            Err(e) => Err(CoordinatorError::Broadcast(e.to_string())),
        };
        let Some(mut round) = self.rounds.write(id).await else {
            warn!("Round {id} disappeared while its transaction was being broadcast");
            return;
        };
        match result {
            Ok(()) => round.broadcast_succeeded(),
            Err(e) => round.broadcast_failed(e.to_string()),
        }
    }

    async fn broadcast_with_retry(&self, id: RoundId, tx: &bitcoin::Transaction) -> Result<(), CoordinatorError> {
        let attempts = self.config.broadcast_attempts.max(1);
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            match self.broadcaster.broadcast(tx).await {
                Ok(txid) => {
                    info!("Round {id}: transaction {txid} broadcast on attempt {attempt}");
                    return Ok(());
                }
                Err(e) => {
                    warn!("Round {id}: broadcast attempt {attempt}/{attempts} failed. {e}");
                    last_error = e.to_string();
                    if attempt < attempts {
                        tokio::time::sleep(self.config.broadcast_retry).await;
                    }
                }
            }
        }
        Err(CoordinatorError::Broadcast(last_error))
    }

    /// The fully signed transaction of round `id`, once every participant has signed.
    pub async fn update(&self, id: RoundId) -> Result<Option<FinalTransaction>, CoordinatorError> {
        let round = self.rounds.get(id).await.ok_or(CoordinatorError::UnknownRound(id))?;
        let round = round.read().await;
        Ok(round.final_transaction()?)
    }

    pub async fn summary(&self, id: RoundId) -> Result<RoundSummary, CoordinatorError> {
        let round = self.rounds.get(id).await.ok_or(CoordinatorError::UnknownRound(id))?;
        let summary = round.read().await.summary();
        Ok(summary)
    }

    pub async fn health(&self) -> HealthStatus {
        HealthStatus {
            status: "ok".to_string(),
            network: self.config.network.to_string(),
            quorum: self.config.quorum,
            rounds: self.rounds.len().await,
            open_round: self.rounds.open_round().await,
        }
    }

    pub async fn reap(&self, now: Instant) -> ReapReport {
        let report = self.rounds.reap(now, self.config.round_timeout, self.config.retention).await;
        if !report.abandoned.is_empty() || !report.removed.is_empty() {
            info!("Reaper: abandoned rounds {:?}, removed rounds {:?}", report.abandoned, report.removed);
        }
        report
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use libjoin::codec::encode_tx;
    use libjoin::helpers::{test_recipient, test_utxo, CountingBuilder};
    use libjoin::{MockBroadcaster, RoundError, RoundStage};
    use bitcoin::Witness;
    use std::collections::BTreeMap;

    type TestCoordinator = Coordinator<CountingBuilder, MockBroadcaster>;

    fn coordinator(broadcaster: MockBroadcaster) -> Arc<TestCoordinator> {
        let config = CoordinatorConfig {
            network: ChainNetwork::Regtest,
            broadcast_retry: Duration::from_millis(5),
            ..CoordinatorConfig::default()
        };
        Arc::new(Coordinator::new(config, CountingBuilder::new(ChainNetwork::Regtest), broadcaster))
    }

    fn request(n: u8) -> FundingRequest {
        FundingRequest::new(vec![test_recipient(n, 10_000)], vec![test_utxo(n, 20_000)], BTreeMap::new())
    }

    async fn sign(c: &TestCoordinator, id: RoundId, pid: u32, n: u8) {
        let pid = ParticipantId::new(pid);
        let draft = c.status(id, pid).await.unwrap().unwrap();
        let mut tx = decode_tx(&draft).unwrap();
        for input in tx.input.iter_mut().filter(|i| i.previous_output == test_utxo(n, 0).outpoint) {
            input.witness = Witness::from_slice(&[vec![n; 70]]);
        }
        c.submit_signature(TransactionSubmission { tx: encode_tx(&tx), id, pid }).await.unwrap();
    }

    async fn wait_for_stage(c: &TestCoordinator, id: RoundId, stage: RoundStage) {
        for _ in 0..200 {
            if c.summary(id).await.unwrap().stage == stage {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("round {id} never reached {stage}");
    }

    async fn signed_round(c: &Arc<TestCoordinator>) -> RoundId {
        let first = c.join(request(1)).await.unwrap();
        let second = c.join(request(2)).await.unwrap();
        assert_eq!(first.id, second.id);
        sign(c, first.id, 1, 1).await;
        sign(c, first.id, 2, 2).await;
        first.id
    }

    #[tokio::test]
    async fn invalid_requests_do_not_touch_rounds() {
        let c = coordinator(MockBroadcaster::new());
        let mut bad = request(1);
        bad.utxos.clear();
        assert!(matches!(c.join(bad).await, Err(CoordinatorError::InvalidRequest(_))));
        assert_eq!(c.health().await.rounds, 0);
        assert!(matches!(
            c.status(RoundId::new(5), ParticipantId::new(1)).await,
            Err(CoordinatorError::UnknownRound(_))
        ));
    }

    #[tokio::test]
    async fn completions_broadcast_once() {
        let broadcaster = MockBroadcaster::new();
        let c = coordinator(broadcaster.clone());
        let id = signed_round(&c).await;
        let fin = c.update(id).await.unwrap().unwrap();
        assert!(!fin.broadcast);

        let calls: Vec<_> = (0..8)
            .map(|i| {
                let c = Arc::clone(&c);
                tokio::spawn(async move { c.complete(id, ParticipantId::new(1 + i % 2)).await })
            })
            .collect();
        for call in calls {
            call.await.unwrap().unwrap();
        }
        wait_for_stage(&c, id, RoundStage::Broadcast).await;
        assert_eq!(broadcaster.calls(), 1);
        assert_eq!(broadcaster.published(), vec![fin.txid]);
        assert!(c.update(id).await.unwrap().unwrap().broadcast);
    }

    #[tokio::test]
    async fn broadcast_is_retried_then_given_up() {
        let broadcaster = MockBroadcaster::failing(10);
        let c = coordinator(broadcaster.clone());
        let id = signed_round(&c).await;
        c.complete(id, ParticipantId::new(1)).await.unwrap();
        c.complete(id, ParticipantId::new(2)).await.unwrap();
        wait_for_stage(&c, id, RoundStage::BroadcastFailed).await;
        assert_eq!(broadcaster.calls(), 3);
        let err = c.update(id).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::Round(RoundError::RoundFailed(_))));
    }

    #[tokio::test]
    async fn broadcast_recovers_after_transient_failure() {
        let broadcaster = MockBroadcaster::failing(1);
        let c = coordinator(broadcaster.clone());
        let id = signed_round(&c).await;
        c.complete(id, ParticipantId::new(2)).await.unwrap();
        c.complete(id, ParticipantId::new(1)).await.unwrap();
        wait_for_stage(&c, id, RoundStage::Broadcast).await;
        assert_eq!(broadcaster.calls(), 2);
    }

    #[tokio::test]
    async fn early_completion_is_rejected() {
        let c = coordinator(MockBroadcaster::new());
        let joined = c.join(request(1)).await.unwrap();
        let err = c.complete(joined.id, joined.pid).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::Round(RoundError::NotFullySigned)));
    }
}
