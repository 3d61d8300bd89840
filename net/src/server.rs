use crate::coordinator::Coordinator;
use crate::errors::CoordinatorError;
use crate::message_types::{
    CompleteResponse, HealthResponse, JoinStartResponse, JoinStatusResponse, JoinUpdateResponse,
    RoundSummaryResponse, SubmissionResponse, TransactionSubmission, WireReply,
};
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use libjoin::{BroadcastTransaction, FundingRequest, ParticipantId, RoundId, TransactionBuilder};
use log::*;
use serde::Serialize;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

type Shared<B, X> = Arc<Coordinator<B, X>>;

/// A bound coordinator, ready to serve.
pub struct CoordinatorServer<B, X> {
    listener: TcpListener,
    coordinator: Shared<B, X>,
}

impl<B, X> CoordinatorServer<B, X>
where
    B: TransactionBuilder + 'static,
    X: BroadcastTransaction + Send + Sync + 'static,
{
    pub async fn bind(address: &str, coordinator: Shared<B, X>) -> io::Result<Self> {
        let listener = TcpListener::bind(address).await?;
        Ok(Self { listener, coordinator })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn coordinator(&self) -> Shared<B, X> {
        Arc::clone(&self.coordinator)
    }

    /// Serves requests and runs the round reaper until `shutdown` is cancelled.
    pub async fn run_until_stopped(self, shutdown: CancellationToken) -> io::Result<()> {
        let address = self.local_addr()?;
        let reaper = tokio::spawn(reap_rounds(Arc::clone(&self.coordinator), shutdown.clone()));
        let app = router(self.coordinator);
        info!("Coordinator listening on http://{address}");
        let stop = shutdown.clone();
        let result = axum::serve(self.listener, app).with_graceful_shutdown(async move { stop.cancelled().await }).await;
        shutdown.cancel();
        if let Err(e) = reaper.await {
            warn!("Round reaper task ended abnormally. {e}");
        }
        match &result {
            Ok(()) => info!("Coordinator on {address} shut down"),
            Err(e) => error!("Coordinator on {address} failed. {e}"),
        }
        result
    }
}

pub fn router<B, X>(coordinator: Shared<B, X>) -> Router
where
    B: TransactionBuilder + 'static,
    X: BroadcastTransaction + Send + Sync + 'static,
{
    Router::new()
        .route("/join", post(join::<B, X>))
        .route("/status/{id}/{pid}", get(status::<B, X>).post(status::<B, X>))
        .route("/sig", post(submit_signature::<B, X>))
        .route("/complete/{id}/{pid}", post(complete::<B, X>))
        .route("/update/{id}", get(update::<B, X>).post(update::<B, X>))
        .route("/rounds/{id}", get(round_summary::<B, X>))
        .route("/health", get(health::<B, X>))
        .with_state(coordinator)
}

async fn reap_rounds<B, X>(coordinator: Shared<B, X>, shutdown: CancellationToken)
where
    B: TransactionBuilder + 'static,
    X: BroadcastTransaction + Send + Sync + 'static,
{
    let period = coordinator.config().reap_interval.max(Duration::from_millis(10));
    let mut interval = tokio::time::interval(period);
    interval.tick().await;
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {
                coordinator.reap(Instant::now()).await;
            }
        }
    }
    debug!("Round reaper stopped");
}

fn reply<R: WireReply + Serialize>(result: Result<R, CoordinatorError>) -> (StatusCode, Json<R>) {
    match result {
        Ok(r) => (StatusCode::OK, Json(r)),
        Err(e) => {
            debug!("Request failed: {e}");
            (e.status_code(), Json(R::from_error(e.to_string())))
        }
    }
}

fn parse_round(id: &str) -> Result<RoundId, CoordinatorError> {
    id.parse().map_err(|e| CoordinatorError::decode(format!("Invalid round id '{id}'. {e}")))
}

fn parse_participant(pid: &str) -> Result<ParticipantId, CoordinatorError> {
    pid.parse().map_err(|e| CoordinatorError::decode(format!("Invalid participant id '{pid}'. {e}")))
}

async fn join<B, X>(State(coordinator): State<Shared<B, X>>, body: Bytes) -> (StatusCode, Json<JoinStartResponse>)
where
    B: TransactionBuilder + 'static,
    X: BroadcastTransaction + Send + Sync + 'static,
{
    let result = async {
        let request: FundingRequest =
            serde_json::from_slice(&body).map_err(|e| CoordinatorError::decode(e.to_string()))?;
        let started = coordinator.join(request).await?;
        Ok::<_, CoordinatorError>(JoinStartResponse::ok(started))
    };
    reply(result.await)
}

async fn status<B, X>(
    State(coordinator): State<Shared<B, X>>,
    Path((id, pid)): Path<(String, String)>,
) -> (StatusCode, Json<JoinStatusResponse>)
where
    B: TransactionBuilder + 'static,
    X: BroadcastTransaction + Send + Sync + 'static,
{
    let result = async {
        let (id, pid) = (parse_round(&id)?, parse_participant(&pid)?);
        let draft = coordinator.status(id, pid).await?;
        Ok::<_, CoordinatorError>(JoinStatusResponse::draft(draft))
    };
    reply(result.await)
}

async fn submit_signature<B, X>(
    State(coordinator): State<Shared<B, X>>,
    body: Bytes,
) -> (StatusCode, Json<SubmissionResponse>)
where
    B: TransactionBuilder + 'static,
    X: BroadcastTransaction + Send + Sync + 'static,
{
    let result = async {
        let submission: TransactionSubmission =
            serde_json::from_slice(&body).map_err(|e| CoordinatorError::decode(e.to_string()))?;
        coordinator.submit_signature(submission).await?;
        Ok::<_, CoordinatorError>(SubmissionResponse::accepted())
    };
    reply(result.await)
}

async fn complete<B, X>(
    State(coordinator): State<Shared<B, X>>,
    Path((id, pid)): Path<(String, String)>,
) -> (StatusCode, Json<CompleteResponse>)
where
    B: TransactionBuilder + 'static,
    X: BroadcastTransaction + Send + Sync + 'static,
{
    let result = async {
        let (id, pid) = (parse_round(&id)?, parse_participant(&pid)?);
        coordinator.complete(id, pid).await?;
        Ok::<_, CoordinatorError>(CompleteResponse::default())
    };
    reply(result.await)
}

async fn update<B, X>(
    State(coordinator): State<Shared<B, X>>,
    Path(id): Path<String>,
) -> (StatusCode, Json<JoinUpdateResponse>)
where
    B: TransactionBuilder + 'static,
    X: BroadcastTransaction + Send + Sync + 'static,
{
    let result = async {
        let id = parse_round(&id)?;
        let update = coordinator.update(id).await?;
        Ok::<_, CoordinatorError>(JoinUpdateResponse { response: update.map(Into::into), error: String::new() })
    };
    reply(result.await)
}

async fn round_summary<B, X>(
    State(coordinator): State<Shared<B, X>>,
    Path(id): Path<String>,
) -> (StatusCode, Json<RoundSummaryResponse>)
where
    B: TransactionBuilder + 'static,
    X: BroadcastTransaction + Send + Sync + 'static,
{
    let result = async {
        let id = parse_round(&id)?;
        let summary = coordinator.summary(id).await?;
        Ok::<_, CoordinatorError>(RoundSummaryResponse::ok(summary))
    };
    reply(result.await)
}

async fn health<B, X>(State(coordinator): State<Shared<B, X>>) -> (StatusCode, Json<HealthResponse>)
where
    B: TransactionBuilder + 'static,
    X: BroadcastTransaction + Send + Sync + 'static,
{
    (StatusCode::OK, Json(HealthResponse::ok(coordinator.health().await)))
}
