use crate::delegates::error::DelegateError;
use crate::participant::AgentState;
use axum::http::StatusCode;
use libjoin::{FundingWalletError, InvalidFundingRequest, RoundError, RoundId, VerificationError};
use thiserror::Error;

/// Errors raised by the coordination service. Every variant is returned to the caller as the `error` string of the
/// response envelope, with [`CoordinatorError::status_code`] as the HTTP status.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("Round {0} does not exist")]
    UnknownRound(RoundId),
    #[error("Could not decode the request. {0}")]
    Decode(String),
    #[error("Invalid funding request. {0}")]
    InvalidRequest(#[from] InvalidFundingRequest),
    #[error(transparent)]
    Round(#[from] RoundError),
    #[error("Could not broadcast the round transaction. {0}")]
    Broadcast(String),
}

impl CoordinatorError {
    pub fn decode(msg: impl Into<String>) -> Self {
        CoordinatorError::Decode(msg.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            CoordinatorError::UnknownRound(_) => StatusCode::NOT_FOUND,
            CoordinatorError::Decode(_) | CoordinatorError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            CoordinatorError::Broadcast(_) => StatusCode::BAD_GATEWAY,
            CoordinatorError::Round(e) => match e {
                RoundError::UnknownParticipant(_) => StatusCode::NOT_FOUND,
                RoundError::NotYourTurn { .. } | RoundError::RoundNotClosed | RoundError::NotFullySigned => {
                    StatusCode::TOO_EARLY
                }
                RoundError::AlreadySigned(_) => StatusCode::CONFLICT,
                RoundError::RoundClosed | RoundError::InputInUse(_) => StatusCode::CONFLICT,
                RoundError::InvalidSignature(_) => StatusCode::UNPROCESSABLE_ENTITY,
                RoundError::RoundFailed(_) | RoundError::Build(_) => StatusCode::GONE,
            },
        }
    }
}

/// Errors seen by a client of the coordination service.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP transport error. {0}")]
    Transport(#[from] reqwest::Error),
    #[error("The coordinator sent a response that could not be decoded. {0}")]
    Decode(String),
    #[error("The coordinator rejected the request ({status}). {message}")]
    Remote { status: u16, message: String },
    #[error("Gave up after {attempts} attempts. Last error: {last}")]
    RetriesExhausted { attempts: u32, last: Box<ClientError> },
    #[error("Gave up waiting for {0}")]
    PollsExhausted(String),
    #[error("The operation was cancelled")]
    Cancelled,
}

impl ClientError {
    /// True if retrying the same request could succeed: connection problems, timeouts and server-side failures.
    /// Anything the coordinator rejected on its merits is fatal.
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::Transport(e) => e.is_timeout() || e.is_connect() || e.is_request() || e.is_body(),
            ClientError::Remote { status, .. } => {
                matches!(*status, 500 | 502 | 503 | 504) || *status == StatusCode::TOO_MANY_REQUESTS.as_u16()
            }
            _ => false,
        }
    }

    /// True if the coordinator reports that this participant's signature was already accepted.
    pub fn is_already_signed(&self) -> bool {
        matches!(self, ClientError::Remote { status, .. } if *status == StatusCode::CONFLICT.as_u16())
    }

    /// True if the coordinator reports that the round failed and will never be broadcast.
    pub fn is_round_failure(&self) -> bool {
        matches!(self, ClientError::Remote { status, .. } if *status == StatusCode::GONE.as_u16())
    }

    /// The coordinator error message, if the coordinator answered at all.
    pub fn remote_message(&self) -> Option<&str> {
        match self {
            ClientError::Remote { message, .. } => Some(message),
            ClientError::RetriesExhausted { last, .. } => last.remote_message(),
            _ => None,
        }
    }
}

/// Why a participant agent stopped before its round settled.
#[derive(Debug, Error)]
pub enum ParticipantError {
    #[error("Aborted while {state}: {reason}")]
    Aborted { state: AgentState, reason: String },
    #[error("Channels for transaction {txid} were finalized but the round failed. Manual recovery needed: {reason}")]
    ManualRecovery { txid: String, reason: String },
    #[error("Transaction {txid} funds finalized channels but its broadcast was not confirmed: {reason}")]
    SettlementUnknown { txid: String, reason: String },
}

impl ParticipantError {
    pub fn aborted(state: AgentState, reason: impl Into<String>) -> Self {
        ParticipantError::Aborted { state, reason: reason.into() }
    }
}

/// Failures inside a participant step, before they are turned into a [`ParticipantError`].
#[derive(Debug, Error)]
pub enum AgentStepError {
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error(transparent)]
    Delegate(#[from] DelegateError),
    #[error(transparent)]
    Wallet(#[from] FundingWalletError),
    #[error("The draft does not pay what was requested. {0}")]
    Verification(#[from] VerificationError),
    #[error("{0}")]
    Protocol(String),
}

impl AgentStepError {
    pub fn is_round_failure(&self) -> bool {
        matches!(self, AgentStepError::Client(e) if e.is_round_failure())
    }
}
