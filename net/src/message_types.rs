//! JSON messages exchanged between participants and the coordinator.
//!
//! Every response carries an `error` string. An empty string means success; anything else is a human-readable
//! reason, and the payload is then `null`.

use libjoin::{FinalTransaction, ParticipantId, RoundId, RoundSummary};
use serde::{Deserialize, Serialize};

/// Responses that carry the uniform error string.
pub trait WireReply {
    fn error(&self) -> &str;

    fn from_error(error: String) -> Self;
}

/// The `{response, error}` envelope used by most endpoints.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub response: Option<T>,
    #[serde(default)]
    pub error: String,
}

impl<T> Envelope<T> {
    pub fn ok(response: T) -> Self {
        Self { response: Some(response), error: String::new() }
    }
}

impl<T> WireReply for Envelope<T> {
    fn error(&self) -> &str {
        &self.error
    }

    fn from_error(error: String) -> Self {
        Self { response: None, error }
    }
}

/// Returned from `join`: which round the participant was placed in, and its participant id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinStarted {
    pub message: String,
    pub id: RoundId,
    pub pid: ParticipantId,
}

pub type JoinStartResponse = Envelope<JoinStarted>;

/// Returned from `status`. `tx` is the current draft if, and only if, the caller is the participant whose signature
/// is awaited.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinStatusResponse {
    #[serde(
        default,
        serialize_with = "libjoin::helpers::option_to_hex",
        deserialize_with = "libjoin::helpers::option_from_hex"
    )]
    pub tx: Option<Vec<u8>>,
    #[serde(default)]
    pub error: String,
}

impl JoinStatusResponse {
    pub fn draft(tx: Option<Vec<u8>>) -> Self {
        Self { tx, error: String::new() }
    }
}

impl WireReply for JoinStatusResponse {
    fn error(&self) -> &str {
        &self.error
    }

    fn from_error(error: String) -> Self {
        Self { tx: None, error }
    }
}

/// A participant's signed transaction, submitted to the `sig` endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionSubmission {
    #[serde(serialize_with = "libjoin::helpers::to_hex", deserialize_with = "libjoin::helpers::from_hex")]
    pub tx: Vec<u8>,
    pub id: RoundId,
    pub pid: ParticipantId,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionResponse {
    #[serde(default)]
    pub accepted: bool,
    #[serde(default)]
    pub error: String,
}

impl SubmissionResponse {
    pub fn accepted() -> Self {
        Self { accepted: true, error: String::new() }
    }
}

impl WireReply for SubmissionResponse {
    fn error(&self) -> &str {
        &self.error
    }

    fn from_error(error: String) -> Self {
        Self { accepted: false, error }
    }
}

/// Acknowledgement of a `complete` call.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteResponse {
    #[serde(default)]
    pub error: String,
}

impl WireReply for CompleteResponse {
    fn error(&self) -> &str {
        &self.error
    }

    fn from_error(error: String) -> Self {
        Self { error }
    }
}

/// The fully signed transaction of a round.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxResponse {
    #[serde(serialize_with = "libjoin::helpers::to_hex", deserialize_with = "libjoin::helpers::from_hex")]
    pub signed: Vec<u8>,
    #[serde(rename = "txId")]
    pub tx_id: String,
    /// True once the coordinator has broadcast the transaction.
    #[serde(default)]
    pub broadcast: bool,
}

impl From<FinalTransaction> for TxResponse {
    fn from(value: FinalTransaction) -> Self {
        Self { signed: value.signed, tx_id: value.txid.to_string(), broadcast: value.broadcast }
    }
}

pub type JoinUpdateResponse = Envelope<TxResponse>;

pub type RoundSummaryResponse = Envelope<RoundSummary>;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub network: String,
    pub quorum: usize,
    pub rounds: usize,
    pub open_round: Option<RoundId>,
}

pub type HealthResponse = Envelope<HealthStatus>;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn join_response_shape() {
        let ok = JoinStartResponse::ok(JoinStarted {
            message: "joined".into(),
            id: RoundId::new(4),
            pid: ParticipantId::new(2),
        });
        let json = serde_json::to_value(&ok).unwrap();
        assert_eq!(json["response"]["id"], 4);
        assert_eq!(json["response"]["pid"], 2);
        assert_eq!(json["error"], "");

        let err = JoinStartResponse::from_error("round failed".into());
        let json = serde_json::to_value(&err).unwrap();
        assert!(json["response"].is_null());
        assert_eq!(json["error"], "round failed");
    }

    #[test]
    fn status_and_submission_use_hex() {
        let status = JoinStatusResponse::draft(Some(vec![0x02, 0x00]));
        assert_eq!(serde_json::to_string(&status).unwrap(), r#"{"tx":"0200","error":""}"#);
        let pending: JoinStatusResponse = serde_json::from_str(r#"{"tx":null,"error":""}"#).unwrap();
        assert_eq!(pending.tx, None);

        let sub: TransactionSubmission = serde_json::from_str(r#"{"tx":"abcd","id":1,"pid":2}"#).unwrap();
        assert_eq!(sub.tx, vec![0xab, 0xcd]);
        assert_eq!(sub.pid, ParticipantId::new(2));
        assert!(serde_json::from_str::<TransactionSubmission>(r#"{"tx":"zz","id":1,"pid":2}"#).is_err());
    }

    #[test]
    fn update_uses_tx_id_field_name() {
        let update = JoinUpdateResponse::ok(TxResponse { signed: vec![1], tx_id: "ab".into(), broadcast: false });
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json["response"]["txId"], "ab");
        assert_eq!(json["response"]["signed"], "01");
        let minimal: JoinUpdateResponse = serde_json::from_str(r#"{"response":{"signed":"01","txId":"ab"}}"#).unwrap();
        assert!(!minimal.response.unwrap().broadcast);
        assert_eq!(minimal.error, "");
    }
}
