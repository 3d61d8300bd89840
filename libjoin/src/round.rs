use crate::builder::TransactionBuilder;
use crate::codec::{decode_tx, encode_tx, same_skeleton};
use crate::error::RoundError;
use crate::funding::{FundingRequest, Recipient, Utxo};
use bitcoin::{OutPoint, Transaction, Txid};
use chrono::{DateTime, Utc};
use log::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::{Display, Formatter};
use std::num::ParseIntError;
use std::str::FromStr;
use std::time::{Duration, Instant};

/// A participant's id within a round. Ids are handed out sequentially from 1 and never reused within a round.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(u32);

impl ParticipantId {
    pub fn new(id: u32) -> Self {
        ParticipantId(id)
    }

    pub fn value(&self) -> u32 {
        self.0
    }
}

impl Display for ParticipantId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ParticipantId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(ParticipantId)
    }
}

/// A round's id. Ids increase monotonically over the lifetime of a coordinator.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoundId(u64);

impl RoundId {
    pub fn new(id: u64) -> Self {
        RoundId(id)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    pub fn next(&self) -> RoundId {
        RoundId(self.0 + 1)
    }
}

impl Display for RoundId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RoundId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(RoundId)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoundStage {
    /// Accepting participants until the quorum is reached.
    Filling,
    /// Closed. Signatures are being collected in participant order.
    Signing,
    /// Every participant has signed. Waiting for all participants to finalize their channels.
    Signed,
    /// Every participant has finalized. The transaction is being broadcast.
    Broadcasting,
    /// The transaction was accepted by the network.
    Broadcast,
    /// The transaction could not be built. Participants must cancel their channel opens.
    Failed,
    /// No progress was made within the round timeout.
    Abandoned,
    /// Broadcasting failed after every retry. Needs manual recovery.
    BroadcastFailed,
}

impl RoundStage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RoundStage::Broadcast | RoundStage::Failed | RoundStage::Abandoned | RoundStage::BroadcastFailed)
    }
}

impl Display for RoundStage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            RoundStage::Filling => write!(f, "Filling"),
            RoundStage::Signing => write!(f, "Signing"),
            RoundStage::Signed => write!(f, "Signed"),
            RoundStage::Broadcasting => write!(f, "Broadcasting"),
            RoundStage::Broadcast => write!(f, "Broadcast"),
            RoundStage::Failed => write!(f, "Failed"),
            RoundStage::Abandoned => write!(f, "Abandoned"),
            RoundStage::BroadcastFailed => write!(f, "BroadcastFailed"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Registration {
    pub pid: ParticipantId,
    /// True if this registration filled the round and the draft transaction was built.
    pub closed: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SignatureAccepted {
    /// The participant whose signature is awaited next, or `None` once everyone has signed.
    pub next: Option<ParticipantId>,
    /// Set once the transaction is fully signed.
    pub txid: Option<Txid>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CompletionOutcome {
    Recorded,
    AlreadyRecorded,
    /// This completion was the last one outstanding. The caller owns the one and only broadcast of these bytes.
    ReadyToBroadcast(Vec<u8>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FinalTransaction {
    pub signed: Vec<u8>,
    pub txid: Txid,
    pub broadcast: bool,
}

/// A read-only view of a round.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundSummary {
    pub id: RoundId,
    pub stage: RoundStage,
    pub quorum: usize,
    pub participants: Vec<ParticipantId>,
    pub signing_cursor: Option<ParticipantId>,
    pub completions: Vec<ParticipantId>,
    pub txid: Option<String>,
    pub failure: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// The authoritative state of one joint funding round.
///
/// All mutation goes through the methods below. Every method that returns an error leaves the round untouched, with
/// the exception of a failed transaction build in [`Round::register`], which fails the round.
pub struct Round {
    id: RoundId,
    quorum: usize,
    participants: BTreeMap<ParticipantId, FundingRequest>,
    next_pid: u32,
    stage: RoundStage,
    unsigned: Option<Vec<u8>>,
    working: Option<Vec<u8>>,
    signed: Option<Vec<u8>>,
    txid: Option<Txid>,
    cursor: u32,
    completions: BTreeSet<ParticipantId>,
    input_owners: HashMap<OutPoint, ParticipantId>,
    failure: Option<String>,
    created_at: DateTime<Utc>,
    last_activity: Instant,
}

impl Round {
    pub fn new(id: RoundId, quorum: usize) -> Self {
        Round {
            id,
            quorum: quorum.max(1),
            participants: BTreeMap::new(),
            next_pid: 1,
            stage: RoundStage::Filling,
            unsigned: None,
            working: None,
            signed: None,
            txid: None,
            cursor: 0,
            completions: BTreeSet::new(),
            input_owners: HashMap::new(),
            failure: None,
            created_at: Utc::now(),
            last_activity: Instant::now(),
        }
    }

    pub fn id(&self) -> RoundId {
        self.id
    }

    pub fn quorum(&self) -> usize {
        self.quorum
    }

    pub fn stage(&self) -> RoundStage {
        self.stage
    }

    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    pub fn is_open(&self) -> bool {
        self.stage == RoundStage::Filling
    }

    pub fn is_fully_signed(&self) -> bool {
        self.txid.is_some()
    }

    /// The participant whose signature is awaited, while the round is collecting signatures.
    pub fn signing_cursor(&self) -> Option<ParticipantId> {
        (self.stage == RoundStage::Signing).then_some(ParticipantId(self.cursor))
    }

    pub fn txid(&self) -> Option<Txid> {
        self.txid
    }

    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    pub fn completions(&self) -> impl Iterator<Item = &ParticipantId> {
        self.completions.iter()
    }

    pub fn funding_request(&self, pid: ParticipantId) -> Option<&FundingRequest> {
        self.participants.get(&pid)
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    /// Adds a participant to the round. The registration that brings the round to quorum closes it and builds the
    /// draft transaction from every participant's recipients and inputs, in participant order.
    pub fn register<B>(&mut self, request: FundingRequest, builder: &B) -> Result<Registration, RoundError>
    where
        B: TransactionBuilder + ?Sized,
    {
        self.check_not_failed()?;
        if self.stage != RoundStage::Filling {
            return Err(RoundError::RoundClosed);
        }
        if let Some(utxo) = request.utxos.iter().find(|u| self.input_owners.contains_key(&u.outpoint)) {
            return Err(RoundError::InputInUse(utxo.outpoint));
        }
        let pid = ParticipantId(self.next_pid);
        self.next_pid += 1;
        for utxo in &request.utxos {
            self.input_owners.insert(utxo.outpoint, pid);
        }
        self.participants.insert(pid, request);
        self.touch();
        info!("Round {}: participant {pid} registered ({}/{})", self.id, self.participants.len(), self.quorum);
        if self.participants.len() < self.quorum {
            return Ok(Registration { pid, closed: false });
        }
        self.close(builder)?;
        Ok(Registration { pid, closed: true })
    }

    fn close<B>(&mut self, builder: &B) -> Result<(), RoundError>
    where
        B: TransactionBuilder + ?Sized,
    {
        let (recipients, utxos): (Vec<Recipient>, Vec<Utxo>) =
            self.participants.values().fold((Vec::new(), Vec::new()), |(mut r, mut u), req| {
                r.extend(req.recipients.iter().cloned());
                u.extend(req.utxos.iter().cloned());
                (r, u)
            });
        match builder.build(&recipients, &utxos) {
            Ok(tx) => {
                let bytes = encode_tx(&tx);
                self.unsigned = Some(bytes.clone());
                self.working = Some(bytes);
                self.cursor = 1;
                self.stage = RoundStage::Signing;
                info!(
                    "Round {} is closed. Draft transaction has {} inputs and {} outputs. Waiting for participant 1 to sign",
                    self.id,
                    tx.input.len(),
                    tx.output.len()
                );
                Ok(())
            }
            Err(e) => {
                warn!("Round {}: could not build the joint transaction. {e}", self.id);
                self.fail(RoundStage::Failed, e.to_string());
                Err(RoundError::Build(e))
            }
        }
    }

    /// The current draft if `pid` is the participant whose signature is awaited, and `None` otherwise.
    pub fn current_draft(&self, pid: ParticipantId) -> Result<Option<&[u8]>, RoundError> {
        self.check_participant(pid)?;
        self.check_not_failed()?;
        if self.stage == RoundStage::Signing && pid.0 == self.cursor {
            Ok(self.working.as_deref())
        } else {
            Ok(None)
        }
    }

    /// Accepts `bytes` as the new working transaction if `pid` holds the signing cursor and the transaction is the
    /// draft with `pid`'s inputs signed. Signatures already present from earlier participants must be kept intact.
    pub fn submit_signature(&mut self, pid: ParticipantId, bytes: &[u8]) -> Result<SignatureAccepted, RoundError> {
        self.check_participant(pid)?;
        self.check_not_failed()?;
        match self.stage {
            RoundStage::Filling => return Err(RoundError::RoundNotClosed),
            RoundStage::Signing => {}
            _ => return Err(RoundError::AlreadySigned(pid)),
        }
        if pid.0 < self.cursor {
            return Err(RoundError::AlreadySigned(pid));
        }
        if pid.0 > self.cursor {
            return Err(RoundError::NotYourTurn { expected: ParticipantId(self.cursor), got: pid });
        }
        let submitted = decode_tx(bytes).map_err(|e| RoundError::invalid_signature(e.to_string()))?;
        self.check_signed_draft(pid, &submitted)?;

        self.working = Some(bytes.to_vec());
        self.cursor += 1;
        self.touch();
        if (self.cursor as usize) <= self.quorum {
            info!("Round {}: accepted signature from participant {pid}. Waiting for participant {}", self.id, self.cursor);
            return Ok(SignatureAccepted { next: Some(ParticipantId(self.cursor)), txid: None });
        }
        let txid = submitted.compute_txid();
        self.signed = Some(bytes.to_vec());
        self.txid = Some(txid);
        self.stage = RoundStage::Signed;
        info!("Round {}: fully signed. Transaction id {txid}", self.id);
        Ok(SignatureAccepted { next: None, txid: Some(txid) })
    }

    fn check_signed_draft(&self, pid: ParticipantId, submitted: &Transaction) -> Result<(), RoundError> {
        let (Some(unsigned), Some(working)) = (&self.unsigned, &self.working) else {
            return Err(RoundError::RoundNotClosed);
        };
        let draft = decode_tx(unsigned).map_err(|e| RoundError::invalid_signature(e.to_string()))?;
        let current = decode_tx(working).map_err(|e| RoundError::invalid_signature(e.to_string()))?;
        if !same_skeleton(&draft, submitted) {
            return Err(RoundError::invalid_signature("the transaction differs from the draft"));
        }
        for (index, (input, before)) in submitted.input.iter().zip(&current.input).enumerate() {
            let owner = self.input_owners.get(&input.previous_output);
            if owner == Some(&pid) {
                if input.witness.is_empty() && input.script_sig.is_empty() {
                    return Err(RoundError::invalid_signature(format!("input {index} is not signed")));
                }
            } else if input.witness != before.witness || input.script_sig != before.script_sig {
                return Err(RoundError::invalid_signature(format!(
                    "input {index} belongs to another participant and may not be changed"
                )));
            }
        }
        Ok(())
    }

    /// Records that `pid` has finalized its channels. The call that completes the set hands back the signed
    /// transaction for broadcast. This happens once per round.
    pub fn record_completion(&mut self, pid: ParticipantId) -> Result<CompletionOutcome, RoundError> {
        self.check_participant(pid)?;
        self.check_not_failed()?;
        if !self.is_fully_signed() {
            return Err(RoundError::NotFullySigned);
        }
        if !self.completions.insert(pid) {
            debug!("Round {}: participant {pid} already reported completion", self.id);
            return Ok(CompletionOutcome::AlreadyRecorded);
        }
        self.touch();
        info!("Round {}: participant {pid} completed ({}/{})", self.id, self.completions.len(), self.quorum);
        if self.completions.len() < self.quorum || self.stage != RoundStage::Signed {
            return Ok(CompletionOutcome::Recorded);
        }
        match &self.signed {
            Some(signed) => {
                self.stage = RoundStage::Broadcasting;
                Ok(CompletionOutcome::ReadyToBroadcast(signed.clone()))
            }
            None => Err(RoundError::NotFullySigned),
        }
    }

    pub fn broadcast_succeeded(&mut self) {
        self.stage = RoundStage::Broadcast;
        self.touch();
        info!("Round {}: transaction {} broadcast", self.id, self.txid.map(|t| t.to_string()).unwrap_or_default());
    }

    pub fn broadcast_failed(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        error!("Round {}: broadcast failed. Manual recovery is required. {reason}", self.id);
        self.fail(RoundStage::BroadcastFailed, format!("Broadcast failed: {reason}"));
    }

    /// The fully signed transaction, once every participant has signed.
    pub fn final_transaction(&self) -> Result<Option<FinalTransaction>, RoundError> {
        self.check_not_failed()?;
        match (&self.signed, self.txid) {
            (Some(signed), Some(txid)) => Ok(Some(FinalTransaction {
                signed: signed.clone(),
                txid,
                broadcast: self.stage == RoundStage::Broadcast,
            })),
            _ => Ok(None),
        }
    }

    /// Marks the round abandoned if it has not made progress for `timeout`. Rounds that are broadcasting or already
    /// finished are never abandoned. Returns true if the round was abandoned by this call.
    pub fn abandon_if_stale(&mut self, now: Instant, timeout: Duration) -> bool {
        let active = matches!(self.stage, RoundStage::Filling | RoundStage::Signing | RoundStage::Signed);
        if !active || now.saturating_duration_since(self.last_activity) < timeout {
            return false;
        }
        warn!("Round {} abandoned in stage {} after {}s without progress", self.id, self.stage, timeout.as_secs());
        self.fail(RoundStage::Abandoned, format!("Round abandoned after {}s without progress", timeout.as_secs()));
        true
    }

    /// True once a finished round has been idle for longer than `retention`.
    pub fn is_expired(&self, now: Instant, retention: Duration) -> bool {
        self.stage.is_terminal() && now.saturating_duration_since(self.last_activity) >= retention
    }

    pub fn summary(&self) -> RoundSummary {
        RoundSummary {
            id: self.id,
            stage: self.stage,
            quorum: self.quorum,
            participants: self.participants.keys().copied().collect(),
            signing_cursor: self.signing_cursor(),
            completions: self.completions.iter().copied().collect(),
            txid: self.txid.map(|t| t.to_string()),
            failure: self.failure.clone(),
            created_at: self.created_at,
        }
    }

    fn check_participant(&self, pid: ParticipantId) -> Result<(), RoundError> {
        if self.participants.contains_key(&pid) {
            Ok(())
        } else {
            Err(RoundError::UnknownParticipant(pid))
        }
    }

    fn check_not_failed(&self) -> Result<(), RoundError> {
        match self.stage {
            RoundStage::Failed | RoundStage::Abandoned | RoundStage::BroadcastFailed => {
                Err(RoundError::RoundFailed(self.failure.clone().unwrap_or_else(|| self.stage.to_string())))
            }
            _ => Ok(()),
        }
    }

    fn fail(&mut self, stage: RoundStage, reason: String) {
        self.stage = stage;
        self.failure = Some(reason);
        self.touch();
    }

    fn touch(&mut self) {
        self.last_activity = Instant::now();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::builder::DefaultTransactionBuilder;
    use crate::error::BuildError;
    use crate::helpers::{test_address, test_recipient, test_utxo, CountingBuilder};
    use crate::network::ChainNetwork;
    use bitcoin::Witness;

    fn request(n: u8) -> FundingRequest {
        let channel = test_recipient(n, 40_000);
        let mut outputs = BTreeMap::new();
        outputs.insert(format!("peer-{n}"), channel.clone());
        FundingRequest::new(vec![channel, test_recipient(n + 100, 9_000)], vec![test_utxo(n, 50_000)], outputs)
    }

    fn sign_inputs(bytes: &[u8], round: &Round, pid: ParticipantId) -> Vec<u8> {
        let mut tx = decode_tx(bytes).unwrap();
        let mine = round.funding_request(pid).unwrap();
        for input in tx.input.iter_mut() {
            if mine.utxos.iter().any(|u| u.outpoint == input.previous_output) {
                input.witness = Witness::from_slice(&[vec![pid.value() as u8; 72], vec![2u8; 33]]);
            }
        }
        encode_tx(&tx)
    }

    fn closed_round(builder: &CountingBuilder) -> Round {
        let mut round = Round::new(RoundId::new(1), 2);
        round.register(request(1), builder).unwrap();
        round.register(request(2), builder).unwrap();
        round
    }

    fn sign_as(round: &mut Round, pid: u32) -> Result<SignatureAccepted, RoundError> {
        let pid = ParticipantId::new(pid);
        let draft = round.current_draft(pid)?.map(|d| d.to_vec()).ok_or(RoundError::RoundNotClosed)?;
        let signed = sign_inputs(&draft, round, pid);
        round.submit_signature(pid, &signed)
    }

    #[test]
    fn quorum_closes_round_and_builds_once() {
        let builder = CountingBuilder::new(ChainNetwork::Regtest);
        let mut round = Round::new(RoundId::new(7), 2);
        let first = round.register(request(1), &builder).unwrap();
        assert_eq!(first, Registration { pid: ParticipantId::new(1), closed: false });
        assert_eq!(builder.calls(), 0);
        assert_eq!(round.current_draft(first.pid).unwrap(), None);

        let second = round.register(request(2), &builder).unwrap();
        assert_eq!(second, Registration { pid: ParticipantId::new(2), closed: true });
        assert_eq!(builder.calls(), 1);
        assert_eq!(round.stage(), RoundStage::Signing);
        assert_eq!(round.signing_cursor(), Some(ParticipantId::new(1)));

        assert_eq!(round.register(request(3), &builder), Err(RoundError::RoundClosed));
        assert_eq!(builder.calls(), 1);
        assert_eq!(round.participant_count(), 2);
    }

    #[test]
    fn draft_concatenates_in_pid_order() {
        let builder = CountingBuilder::new(ChainNetwork::Regtest);
        let round = closed_round(&builder);
        let tx = decode_tx(round.current_draft(ParticipantId::new(1)).unwrap().unwrap()).unwrap();
        assert_eq!(tx.input[0].previous_output, test_utxo(1, 0).outpoint);
        assert_eq!(tx.input[1].previous_output, test_utxo(2, 0).outpoint);
        assert_eq!(tx.output[0].script_pubkey, test_address(1).script_pubkey());
        assert_eq!(tx.output[2].script_pubkey, test_address(2).script_pubkey());
    }

    #[test]
    fn only_the_cursor_sees_the_draft() {
        let builder = CountingBuilder::new(ChainNetwork::Regtest);
        let mut round = closed_round(&builder);
        assert!(round.current_draft(ParticipantId::new(1)).unwrap().is_some());
        assert!(round.current_draft(ParticipantId::new(2)).unwrap().is_none());
        assert_eq!(round.current_draft(ParticipantId::new(9)), Err(RoundError::UnknownParticipant(ParticipantId::new(9))));
        sign_as(&mut round, 1).unwrap();
        assert!(round.current_draft(ParticipantId::new(1)).unwrap().is_none());
        assert!(round.current_draft(ParticipantId::new(2)).unwrap().is_some());
    }

    #[test]
    fn premature_signature_is_rejected_without_change() {
        let builder = CountingBuilder::new(ChainNetwork::Regtest);
        let mut round = closed_round(&builder);
        let draft = round.current_draft(ParticipantId::new(1)).unwrap().unwrap().to_vec();
        let early = sign_inputs(&draft, &round, ParticipantId::new(2));
        let err = round.submit_signature(ParticipantId::new(2), &early).unwrap_err();
        assert_eq!(err, RoundError::NotYourTurn { expected: ParticipantId::new(1), got: ParticipantId::new(2) });
        assert_eq!(round.signing_cursor(), Some(ParticipantId::new(1)));
        assert_eq!(round.current_draft(ParticipantId::new(1)).unwrap().unwrap(), draft.as_slice());
    }

    #[test]
    fn signature_before_close_is_rejected() {
        let builder = CountingBuilder::new(ChainNetwork::Regtest);
        let mut round = Round::new(RoundId::new(1), 2);
        round.register(request(1), &builder).unwrap();
        assert_eq!(round.submit_signature(ParticipantId::new(1), &[0u8; 10]), Err(RoundError::RoundNotClosed));
    }

    #[test]
    fn bad_signatures_are_rejected() {
        let builder = CountingBuilder::new(ChainNetwork::Regtest);
        let mut round = closed_round(&builder);
        let pid = ParticipantId::new(1);
        let draft = round.current_draft(pid).unwrap().unwrap().to_vec();

        let err = round.submit_signature(pid, &[1, 2, 3]).unwrap_err();
        assert!(matches!(err, RoundError::InvalidSignature(_)));

        let err = round.submit_signature(pid, &draft).unwrap_err();
        assert!(matches!(err, RoundError::InvalidSignature(_)), "unsigned draft must be rejected");

        let mut tx = decode_tx(&sign_inputs(&draft, &round, pid)).unwrap();
        tx.output[0].value = bitcoin::Amount::from_sat(1);
        let err = round.submit_signature(pid, &encode_tx(&tx)).unwrap_err();
        assert!(matches!(err, RoundError::InvalidSignature(_)), "altered outputs must be rejected");

        let mut tx = decode_tx(&sign_inputs(&draft, &round, pid)).unwrap();
        tx.input[1].witness = Witness::from_slice(&[vec![9u8; 3]]);
        let err = round.submit_signature(pid, &encode_tx(&tx)).unwrap_err();
        assert!(matches!(err, RoundError::InvalidSignature(_)), "touching another participant's input");

        assert_eq!(round.signing_cursor(), Some(pid));
        assert_eq!(round.current_draft(pid).unwrap().unwrap(), draft.as_slice());
    }

    #[test]
    fn sequential_signing_produces_txid_once() {
        let builder = CountingBuilder::new(ChainNetwork::Regtest);
        let mut round = closed_round(&builder);
        assert_eq!(round.final_transaction().unwrap(), None);
        let first = sign_as(&mut round, 1).unwrap();
        assert_eq!(first, SignatureAccepted { next: Some(ParticipantId::new(2)), txid: None });
        assert!(round.txid().is_none());

        let after_first = round.current_draft(ParticipantId::new(2)).unwrap().unwrap().to_vec();
        let tx = decode_tx(&after_first).unwrap();
        assert!(!tx.input[0].witness.is_empty(), "participant 2 sees participant 1's signature");

        let second = sign_as(&mut round, 2).unwrap();
        let txid = second.txid.unwrap();
        assert_eq!(round.stage(), RoundStage::Signed);
        let fin = round.final_transaction().unwrap().unwrap();
        assert_eq!(fin.txid, txid);
        assert_eq!(decode_tx(&fin.signed).unwrap().compute_txid(), txid);
        assert!(!fin.broadcast);

        let resubmit = round.submit_signature(ParticipantId::new(1), &fin.signed);
        assert_eq!(resubmit, Err(RoundError::AlreadySigned(ParticipantId::new(1))));
        assert_eq!(round.txid(), Some(txid));
    }

    #[test]
    fn completion_triggers_broadcast_exactly_once() {
        let builder = CountingBuilder::new(ChainNetwork::Regtest);
        let mut round = closed_round(&builder);
        assert_eq!(round.record_completion(ParticipantId::new(1)), Err(RoundError::NotFullySigned));
        sign_as(&mut round, 1).unwrap();
        sign_as(&mut round, 2).unwrap();

        assert_eq!(round.record_completion(ParticipantId::new(1)).unwrap(), CompletionOutcome::Recorded);
        assert_eq!(round.record_completion(ParticipantId::new(1)).unwrap(), CompletionOutcome::AlreadyRecorded);
        let outcome = round.record_completion(ParticipantId::new(2)).unwrap();
        assert!(matches!(outcome, CompletionOutcome::ReadyToBroadcast(_)));
        assert_eq!(round.stage(), RoundStage::Broadcasting);
        assert_eq!(round.record_completion(ParticipantId::new(2)).unwrap(), CompletionOutcome::AlreadyRecorded);
        assert_eq!(round.record_completion(ParticipantId::new(1)).unwrap(), CompletionOutcome::AlreadyRecorded);

        round.broadcast_succeeded();
        assert!(round.final_transaction().unwrap().unwrap().broadcast);
        assert_eq!(round.record_completion(ParticipantId::new(2)).unwrap(), CompletionOutcome::AlreadyRecorded);
    }

    #[test]
    fn build_failure_fails_the_round() {
        let builder = DefaultTransactionBuilder::new(ChainNetwork::Regtest);
        let mut round = Round::new(RoundId::new(3), 2);
        round.register(request(1), &builder).unwrap();
        let mut poor = request(2);
        poor.utxos = vec![test_utxo(2, 10)];
        let err = round.register(poor, &builder).unwrap_err();
        assert!(matches!(err, RoundError::Build(BuildError::InsufficientFunds { .. })));
        assert_eq!(round.stage(), RoundStage::Failed);
        assert!(matches!(round.current_draft(ParticipantId::new(1)), Err(RoundError::RoundFailed(_))));
        assert!(matches!(round.final_transaction(), Err(RoundError::RoundFailed(_))));
    }

    #[test]
    fn shared_inputs_are_refused() {
        let builder = CountingBuilder::new(ChainNetwork::Regtest);
        let mut round = Round::new(RoundId::new(1), 3);
        round.register(request(1), &builder).unwrap();
        let mut thief = request(2);
        thief.utxos.push(test_utxo(1, 50_000));
        assert!(matches!(round.register(thief, &builder), Err(RoundError::InputInUse(_))));
        assert_eq!(round.participant_count(), 1);
        let next = round.register(request(3), &builder).unwrap();
        assert_eq!(next.pid, ParticipantId::new(3), "ids are never reused");
    }

    #[test]
    fn stale_rounds_are_abandoned_then_expire() {
        let builder = CountingBuilder::new(ChainNetwork::Regtest);
        let mut round = closed_round(&builder);
        let timeout = Duration::from_secs(600);
        assert!(!round.abandon_if_stale(Instant::now(), timeout));
        let later = Instant::now() + timeout + Duration::from_secs(1);
        assert!(round.abandon_if_stale(later, timeout));
        assert_eq!(round.stage(), RoundStage::Abandoned);
        assert!(!round.abandon_if_stale(later, timeout));
        assert!(matches!(round.current_draft(ParticipantId::new(1)), Err(RoundError::RoundFailed(_))));

        let retention = Duration::from_secs(3600);
        assert!(!round.is_expired(Instant::now(), retention));
        assert!(round.is_expired(Instant::now() + retention, retention));
    }

    #[test]
    fn summary_reflects_progress() {
        let builder = CountingBuilder::new(ChainNetwork::Regtest);
        let mut round = closed_round(&builder);
        sign_as(&mut round, 1).unwrap();
        let summary = round.summary();
        assert_eq!(summary.stage, RoundStage::Signing);
        assert_eq!(summary.participants, vec![ParticipantId::new(1), ParticipantId::new(2)]);
        assert_eq!(summary.signing_cursor, Some(ParticipantId::new(2)));
        assert!(summary.txid.is_none());
    }
}
