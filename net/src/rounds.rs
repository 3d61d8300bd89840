use libjoin::{FundingRequest, Registration, Round, RoundError, RoundId, TransactionBuilder};
use log::*;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OwnedRwLockWriteGuard, RwLock};

pub type SharedRound = Arc<RwLock<Round>>;

struct Allocator {
    next_id: RoundId,
    open: Option<SharedRound>,
}

/// Every round the coordinator knows about, and the one round that is currently accepting participants.
///
/// Each round has its own lock, so work on different rounds proceeds in parallel. Joins are serialized by the
/// allocator lock, which is always taken before a round lock.
pub struct RoundRegistry {
    quorum: usize,
    rounds: RwLock<HashMap<RoundId, SharedRound>>,
    allocator: Mutex<Allocator>,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReapReport {
    pub abandoned: Vec<RoundId>,
    pub removed: Vec<RoundId>,
}

impl RoundRegistry {
    pub fn new(quorum: usize) -> Self {
        Self {
            quorum,
            rounds: RwLock::new(HashMap::new()),
            allocator: Mutex::new(Allocator { next_id: RoundId::new(1), open: None }),
        }
    }

    pub fn quorum(&self) -> usize {
        self.quorum
    }

    /// Registers `request` in the open round, creating a new round if none is open. If this join fills the round,
    /// the draft transaction is built before the call returns, and the next join starts a new round.
    pub async fn join<B>(
        &self,
        request: FundingRequest,
        builder: &B,
    ) -> Result<(RoundId, Registration), RoundError>
    where
        B: TransactionBuilder + ?Sized,
    {
        let mut allocator = self.allocator.lock().await;
        let open = match allocator.open.take() {
            Some(round) => {
                let is_open = round.read().await.is_open();
                is_open.then_some(round)
            }
            None => None,
        };
        let round = match open {
            Some(round) => round,
            None => {
                let id = allocator.next_id;
                allocator.next_id = id.next();
                let round = Arc::new(RwLock::new(Round::new(id, self.quorum)));
                self.rounds.write().await.insert(id, Arc::clone(&round));
                info!("Opened round {id} for {} participants", self.quorum);
                round
            }
        };
        let mut guard = round.write().await;
        let id = guard.id();
        let result = guard.register(request, builder);
        if guard.is_open() {
            drop(guard);
            allocator.open = Some(round);
        }
        result.map(|registration| (id, registration))
    }

    pub async fn get(&self, id: RoundId) -> Option<SharedRound> {
        self.rounds.read().await.get(&id).cloned()
    }

    pub async fn write(&self, id: RoundId) -> Option<OwnedRwLockWriteGuard<Round>> {
        let round = self.get(id).await?;
        Some(round.write_owned().await)
    }

    pub async fn len(&self) -> usize {
        self.rounds.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rounds.read().await.is_empty()
    }

    pub async fn open_round(&self) -> Option<RoundId> {
        let allocator = self.allocator.lock().await;
        match &allocator.open {
            Some(round) => {
                let round = round.read().await;
                round.is_open().then(|| round.id())
            }
            None => None,
        }
    }

    /// Abandons rounds that have been idle for `timeout` and forgets finished rounds older than `retention`.
    pub async fn reap(&self, now: Instant, timeout: Duration, retention: Duration) -> ReapReport {
        let mut report = ReapReport::default();
        let rounds: Vec<SharedRound> = self.rounds.read().await.values().cloned().collect();
        for round in rounds {
            let mut round = round.write().await;
            if round.abandon_if_stale(now, timeout) {
                report.abandoned.push(round.id());
            } else if round.is_expired(now, retention) {
                report.removed.push(round.id());
            }
        }
        if !report.removed.is_empty() {
            let mut map = self.rounds.write().await;
            for id in &report.removed {
                map.remove(id);
                debug!("Round {id} removed after the retention period");
            }
        }
        report.abandoned.sort();
        report.removed.sort();
        report
    }
}
