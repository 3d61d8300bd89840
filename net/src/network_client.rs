use crate::errors::ClientError;
use crate::message_types::{
    CompleteResponse, HealthResponse, HealthStatus, JoinStartResponse, JoinStarted, JoinStatusResponse,
    JoinUpdateResponse, RoundSummaryResponse, SubmissionResponse, TransactionSubmission, TxResponse, WireReply,
};
use libjoin::{FundingRequest, ParticipantId, RoundId, RoundSummary};
use log::*;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

/// HTTP client for the coordination service. Cheap to clone; clones share a connection pool.
///
/// Every call is bounded by the request timeout given at construction. Retrying is up to the caller (see
/// [`crate::polling`]).
#[derive(Clone, Debug)]
pub struct Client {
    http: reqwest::Client,
    base_url: String,
}

impl Client {
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder().timeout(request_timeout).build()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn join(&self, request: &FundingRequest) -> Result<JoinStarted, ClientError> {
        let reply: JoinStartResponse = self.post("/join", request).await?;
        reply.response.ok_or_else(|| ClientError::Decode("join response has no payload".into()))
    }

    /// The current draft, if it is `pid`'s turn to sign.
    pub async fn status(&self, id: RoundId, pid: ParticipantId) -> Result<Option<Vec<u8>>, ClientError> {
        let reply: JoinStatusResponse = self.get(&format!("/status/{id}/{pid}")).await?;
        Ok(reply.tx)
    }

    pub async fn submit_signature(&self, id: RoundId, pid: ParticipantId, tx: Vec<u8>) -> Result<(), ClientError> {
        let submission = TransactionSubmission { tx, id, pid };
        let reply: SubmissionResponse = self.post("/sig", &submission).await?;
        if reply.accepted {
            Ok(())
        } else {
            Err(ClientError::Decode("signature was neither accepted nor rejected".into()))
        }
    }

    pub async fn complete(&self, id: RoundId, pid: ParticipantId) -> Result<(), ClientError> {
        let _: CompleteResponse = self.post(&format!("/complete/{id}/{pid}"), &()).await?;
        Ok(())
    }

    /// The fully signed transaction, once every participant of round `id` has signed.
    pub async fn update(&self, id: RoundId) -> Result<Option<TxResponse>, ClientError> {
        let reply: JoinUpdateResponse = self.get(&format!("/update/{id}")).await?;
        Ok(reply.response)
    }

    pub async fn round_summary(&self, id: RoundId) -> Result<RoundSummary, ClientError> {
        let reply: RoundSummaryResponse = self.get(&format!("/rounds/{id}")).await?;
        reply.response.ok_or_else(|| ClientError::Decode("round summary response has no payload".into()))
    }

    pub async fn health(&self) -> Result<HealthStatus, ClientError> {
        let reply: HealthResponse = self.get("/health").await?;
        reply.response.ok_or_else(|| ClientError::Decode("health response has no payload".into()))
    }

    async fn get<R: DeserializeOwned + WireReply>(&self, path: &str) -> Result<R, ClientError> {
        trace!("GET {}{path}", self.base_url);
        let response = self.http.get(format!("{}{path}", self.base_url)).send().await?;
        read_reply(response).await
    }

    async fn post<B: Serialize + ?Sized, R: DeserializeOwned + WireReply>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, ClientError> {
        trace!("POST {}{path}", self.base_url);
        let response = self.http.post(format!("{}{path}", self.base_url)).json(body).send().await?;
        read_reply(response).await
    }
}

/// Decodes a response envelope. A non-empty error string, or a non-success status without a readable envelope,
/// becomes [`ClientError::Remote`].
async fn read_reply<R: DeserializeOwned + WireReply>(response: reqwest::Response) -> Result<R, ClientError> {
    let status = response.status();
    let body = response.bytes().await?;
    match serde_json::from_slice::<R>(&body) {
        Ok(reply) if !reply.error().is_empty() => {
            debug!("Coordinator returned {status}: {}", reply.error());
            Err(ClientError::Remote { status: status.as_u16(), message: reply.error().to_string() })
        }
        Ok(_) if !status.is_success() => {
            Err(ClientError::Remote { status: status.as_u16(), message: status.to_string() })
        }
        Ok(reply) => Ok(reply),
        Err(_) if !status.is_success() => Err(ClientError::Remote {
            status: status.as_u16(),
            message: String::from_utf8_lossy(&body).into_owned(),
        }),
        Err(e) => Err(ClientError::Decode(e.to_string())),
    }
}
