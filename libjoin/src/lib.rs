pub mod builder;
pub mod chain;
pub mod codec;
pub mod error;
pub mod funding;
pub mod helpers;
pub mod network;
pub mod round;
pub mod verifier;
pub mod wallet;

pub use builder::{DefaultTransactionBuilder, TransactionBuilder};
pub use chain::{BroadcastError, BroadcastTransaction, MockBroadcaster};
pub use error::{BuildError, CodecError, RoundError, VerificationError};
pub use funding::{ChannelRequest, FundingRequest, InvalidFundingRequest, Recipient, Utxo};
pub use network::{ChainNetwork, UnsupportedNetworkError};
pub use round::{
    CompletionOutcome, FinalTransaction, ParticipantId, Registration, Round, RoundId, RoundStage, RoundSummary,
    SignatureAccepted,
};
pub use verifier::{verify_outputs, verify_transaction};
pub use wallet::{FundingInputs, FundingWallet, FundingWalletError, MockWallet};
