pub mod coordinator;
pub mod delegates;
pub mod errors;
pub mod message_types;
mod network_client;
pub mod participant;
pub mod polling;
pub mod rounds;
pub mod server;

pub use coordinator::{Coordinator, CoordinatorConfig};
pub use errors::{ClientError, CoordinatorError, ParticipantError};
pub use network_client::Client;
pub use participant::{AgentConfig, AgentState, JoinOutcome, ParticipantAgent};
pub use polling::RetryPolicy;
pub use server::{router, CoordinatorServer};
