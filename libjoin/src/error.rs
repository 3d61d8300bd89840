use crate::round::ParticipantId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failures of the [`crate::Round`] state machine. None of these leave the round in a modified state, except for
/// [`RoundError::Build`], which marks the round as failed.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RoundError {
    #[error("Participant {0} is not registered in this round")]
    UnknownParticipant(ParticipantId),
    #[error("It is not participant {got}'s turn to sign. Waiting for participant {expected}")]
    NotYourTurn { expected: ParticipantId, got: ParticipantId },
    #[error("The round is still waiting for participants and has no draft transaction yet")]
    RoundNotClosed,
    #[error("The round is closed to new participants")]
    RoundClosed,
    #[error("The round has failed and all pending channel opens must be cancelled. {0}")]
    RoundFailed(String),
    #[error("Participant {0} has already signed this round's transaction")]
    AlreadySigned(ParticipantId),
    #[error("The round's transaction is not fully signed yet")]
    NotFullySigned,
    #[error("The submitted signature was rejected. {0}")]
    InvalidSignature(String),
    #[error("Input {0} is already contributed by another participant of this round")]
    InputInUse(bitcoin::OutPoint),
    #[error("Could not build the round transaction. {0}")]
    Build(#[from] BuildError),
}

impl RoundError {
    pub fn invalid_signature(reason: impl Into<String>) -> Self {
        RoundError::InvalidSignature(reason.into())
    }
}

/// Reasons the transaction builder could not produce a transaction from the aggregated funding requests.
#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum BuildError {
    #[error("There are no recipients to pay")]
    NoRecipients,
    #[error("There are no inputs to spend")]
    NoInputs,
    #[error("Input {0} is contributed more than once")]
    DuplicateInput(String),
    #[error("Recipient amounts must be greater than zero ({0})")]
    ZeroAmount(String),
    #[error("Invalid recipient address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },
    #[error("Inputs total {inputs} sats, which does not cover the {outputs} sats being paid")]
    InsufficientFunds { inputs: u64, outputs: u64 },
    #[error("Amount overflow while summing {0}")]
    Overflow(String),
}

/// A draft transaction did not pay what the participant asked for. The participant must not sign it.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum VerificationError {
    #[error("The draft transaction could not be decoded. {0}")]
    Malformed(String),
    #[error("Expected address {0} cannot be decoded for this network")]
    InvalidAddress(String),
    #[error("No output pays {amount} sats to {address}")]
    MissingOutput { address: String, amount: u64 },
    #[error("Output to {address} pays {actual} sats, but {expected} sats were requested")]
    WrongAmount { address: String, expected: u64, actual: u64 },
    #[error("{found} outputs pay {amount} sats to {address}, expected {expected}")]
    AmbiguousOutput { address: String, amount: u64, found: usize, expected: usize },
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("Invalid transaction encoding. {0}")]
    Transaction(String),
}

impl From<bitcoin::consensus::encode::Error> for CodecError {
    fn from(err: bitcoin::consensus::encode::Error) -> Self {
        CodecError::Transaction(err.to_string())
    }
}

impl From<CodecError> for VerificationError {
    fn from(err: CodecError) -> Self {
        VerificationError::Malformed(err.to_string())
    }
}
