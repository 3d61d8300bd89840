use bitcoin::{Amount, OutPoint, ScriptBuf};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

/// A single payment in the joint transaction: `amount` satoshis to `address`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Recipient {
    pub address: String,
    #[serde(with = "bitcoin::amount::serde::as_sat")]
    pub amount: Amount,
}

impl Recipient {
    pub fn new(address: impl Into<String>, amount: Amount) -> Self {
        Self { address: address.into(), amount }
    }
}

impl Display for Recipient {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} sats to {}", self.amount.to_sat(), self.address)
    }
}

/// A spendable output that a participant contributes as an input of the joint transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    pub outpoint: OutPoint,
    #[serde(with = "bitcoin::amount::serde::as_sat")]
    pub amount: Amount,
    pub script_pubkey: ScriptBuf,
}

impl Utxo {
    pub fn new(outpoint: OutPoint, amount: Amount, script_pubkey: ScriptBuf) -> Self {
        Self { outpoint, amount, script_pubkey }
    }
}

/// A request to open a channel with `peer_id`, funded with `amount` satoshis from the joint transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRequest {
    pub peer_id: String,
    #[serde(with = "bitcoin::amount::serde::as_sat")]
    pub amount: Amount,
    #[serde(default = "default_announce")]
    pub announce: bool,
}

fn default_announce() -> bool {
    true
}

impl ChannelRequest {
    pub fn new(peer_id: impl Into<String>, amount: Amount, announce: bool) -> Self {
        Self { peer_id: peer_id.into(), amount, announce }
    }
}

/// Parses `peer_id:satoshis[:announce]`, e.g. `0265b6...:250000:false`.
impl FromStr for ChannelRequest {
    type Err = InvalidFundingRequest;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(':');
        let peer_id = parts.next().filter(|p| !p.is_empty()).ok_or(InvalidFundingRequest::MissingPeerId)?;
        let sats = parts
            .next()
            .ok_or_else(|| InvalidFundingRequest::InvalidChannel(format!("missing amount in '{s}'")))?
            .parse::<u64>()
            .map_err(|e| InvalidFundingRequest::InvalidChannel(format!("invalid amount in '{s}': {e}")))?;
        let announce = match parts.next() {
            None => true,
            Some(flag) => flag
                .parse::<bool>()
                .map_err(|e| InvalidFundingRequest::InvalidChannel(format!("invalid announce flag in '{s}': {e}")))?,
        };
        if parts.next().is_some() {
            return Err(InvalidFundingRequest::InvalidChannel(format!("too many fields in '{s}'")));
        }
        if sats == 0 {
            return Err(InvalidFundingRequest::ZeroAmount(peer_id.to_string()));
        }
        Ok(ChannelRequest::new(peer_id, Amount::from_sat(sats), announce))
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InvalidFundingRequest {
    #[error("A funding request needs at least one recipient")]
    NoRecipients,
    #[error("A funding request needs at least one input")]
    NoInputs,
    #[error("Payment to {0} has a zero amount")]
    ZeroAmount(String),
    #[error("Input {0} is listed more than once")]
    DuplicateInput(OutPoint),
    #[error("Channel output for peer {peer_id} ({recipient}) is not among the recipients")]
    OrphanChannelOutput { peer_id: String, recipient: Recipient },
    #[error("A channel request needs a peer id")]
    MissingPeerId,
    #[error("Invalid channel request: {0}")]
    InvalidChannel(String),
    #[error("Inputs worth {inputs} do not cover payments of {outputs}")]
    Unfunded { inputs: Amount, outputs: Amount },
    #[error("Amounts in the funding request overflow")]
    Overflow,
}

/// One participant's contribution to a round: who gets paid, which coins pay for it, and which of the payments are
/// channel funding outputs (keyed by channel peer id). Recipients that are not channel outputs are change.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundingRequest {
    pub recipients: Vec<Recipient>,
    pub utxos: Vec<Utxo>,
    #[serde(default)]
    pub outputs: BTreeMap<String, Recipient>,
}

impl FundingRequest {
    pub fn new(recipients: Vec<Recipient>, utxos: Vec<Utxo>, outputs: BTreeMap<String, Recipient>) -> Self {
        Self { recipients, utxos, outputs }
    }

    /// Checks the structural rules of a request. Address decoding is left to the transaction builder, which knows
    /// the network.
    pub fn validate(&self) -> Result<(), InvalidFundingRequest> {
        if self.recipients.is_empty() {
            return Err(InvalidFundingRequest::NoRecipients);
        }
        if self.utxos.is_empty() {
            return Err(InvalidFundingRequest::NoInputs);
        }
        if let Some(r) = self.recipients.iter().find(|r| r.amount == Amount::ZERO) {
            return Err(InvalidFundingRequest::ZeroAmount(r.address.clone()));
        }
        let mut seen = HashSet::with_capacity(self.utxos.len());
        for utxo in &self.utxos {
            if !seen.insert(utxo.outpoint) {
                return Err(InvalidFundingRequest::DuplicateInput(utxo.outpoint));
            }
        }
        let inputs = self.total_input().ok_or(InvalidFundingRequest::Overflow)?;
        let outputs = self.total_output().ok_or(InvalidFundingRequest::Overflow)?;
        if inputs < outputs {
            return Err(InvalidFundingRequest::Unfunded { inputs, outputs });
        }
        for (peer_id, output) in &self.outputs {
            if !self.recipients.contains(output) {
                return Err(InvalidFundingRequest::OrphanChannelOutput {
                    peer_id: peer_id.clone(),
                    recipient: output.clone(),
                });
            }
        }
        Ok(())
    }

    pub fn total_input(&self) -> Option<Amount> {
        self.utxos.iter().try_fold(Amount::ZERO, |acc, u| acc.checked_add(u.amount))
    }

    pub fn total_output(&self) -> Option<Amount> {
        self.recipients.iter().try_fold(Amount::ZERO, |acc, r| acc.checked_add(r.amount))
    }
}
