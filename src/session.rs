use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Mutex, Notify, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::engine::{Engine, EngineError};
use crate::limits::*;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::observability;
use crate::sync::SyncAdapter;

pub type SharedEngine = Arc<Mutex<Engine>>;

struct Session {
    engine: SharedEngine,
    pump: JoinHandle<()>,
}

/// One live engine per team. Each session gets a pump task that applies
/// realtime team and member pushes from the collaborator.
pub struct SessionManager {
    sessions: DashMap<TeamId, Session>,
    adapter: Arc<dyn SyncAdapter>,
    notify: Arc<NotifyHub>,
    seed: Option<u64>,
}

impl SessionManager {
    pub fn new(adapter: Arc<dyn SyncAdapter>) -> Self {
        Self {
            sessions: DashMap::new(),
            adapter,
            notify: Arc::new(NotifyHub::new()),
            seed: None,
        }
    }

    /// Seed every engine this manager opens, for reproducible generation.
    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    pub fn notify(&self) -> &Arc<NotifyHub> {
        &self.notify
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn get(&self, team: &str) -> Option<SharedEngine> {
        self.sessions.get(team).map(|s| s.engine.clone())
    }

    /// Get the team's session, loading it on first use.
    pub async fn open(&self, team: &str) -> Result<SharedEngine, EngineError> {
        if let Some(engine) = self.get(team) {
            return Ok(engine);
        }
        if team.is_empty() || team.len() > MAX_TEAM_ID_LEN {
            return Err(EngineError::LimitExceeded("team id length"));
        }
        if self.sessions.len() >= MAX_SESSIONS {
            return Err(EngineError::LimitExceeded("too many sessions"));
        }

        // Subscribe before loading so no push between the two is lost.
        let team_rx = self.adapter.subscribe_team(team);
        let members_rx = self.adapter.subscribe_members(team);

        let mut engine = Engine::open(team, self.adapter.clone(), self.notify.clone()).await?;
        if let Some(seed) = self.seed {
            engine = engine.seeded(seed);
        }
        let settled = engine.settled();
        let engine = Arc::new(Mutex::new(engine));

        let engine = match self.sessions.entry(team.to_string()) {
            // Lost a race with a concurrent open; keep the first one.
            Entry::Occupied(existing) => existing.get().engine.clone(),
            Entry::Vacant(slot) => {
                let pump = tokio::spawn(pump_realtime(engine.clone(), settled, team_rx, members_rx));
                slot.insert(Session {
                    engine: engine.clone(),
                    pump,
                });
                engine
            }
        };

        metrics::gauge!(observability::SESSIONS_ACTIVE).set(self.sessions.len() as f64);
        info!("session ready for team {team}");
        Ok(engine)
    }

    /// End a session: stop realtime updates, drain queued saves, refuse
    /// further mutations on handles still held elsewhere.
    pub async fn close(&self, team: &str) -> Result<(), EngineError> {
        let (_, session) = self
            .sessions
            .remove(team)
            .ok_or_else(|| EngineError::NoSession(team.to_string()))?;
        session.pump.abort();

        let mut engine = session.engine.lock().await;
        engine.close();
        let flushed = engine.flush().await;
        drop(engine);

        self.notify.remove(team);
        metrics::gauge!(observability::SESSIONS_ACTIVE).set(self.sessions.len() as f64);
        info!("session closed for team {team}");
        flushed
    }

    /// Flush every open session concurrently.
    pub async fn flush_all(&self) -> Vec<(TeamId, Result<(), EngineError>)> {
        let sessions: Vec<(TeamId, SharedEngine)> = self
            .sessions
            .iter()
            .map(|s| (s.key().clone(), s.engine.clone()))
            .collect();
        let flushes = sessions.into_iter().map(|(team, engine)| async move {
            let result = engine.lock().await.flush().await;
            (team, result)
        });
        futures::future::join_all(flushes).await
    }
}

/// Apply realtime pushes until both subscriptions close. Pushes held back
/// while local saves were in flight are applied when the writer settles.
async fn pump_realtime(
    engine: SharedEngine,
    settled: Arc<Notify>,
    mut team_rx: broadcast::Receiver<TeamDoc>,
    mut members_rx: broadcast::Receiver<Vec<Member>>,
) {
    let mut team_open = true;
    let mut members_open = true;
    while team_open || members_open {
        tokio::select! {
            doc = team_rx.recv(), if team_open => match doc {
                Ok(doc) => {
                    let mut engine = engine.lock().await;
                    // Only the newest document matters.
                    let mut latest = doc;
                    while let Ok(newer) = team_rx.try_recv() {
                        latest = newer;
                    }
                    engine.apply_remote(latest);
                }
                Err(RecvError::Lagged(n)) => warn!("realtime team feed lagged by {n} updates"),
                Err(RecvError::Closed) => team_open = false,
            },
            members = members_rx.recv(), if members_open => match members {
                Ok(members) => engine.lock().await.apply_members(members),
                Err(RecvError::Lagged(n)) => warn!("realtime member feed lagged by {n} updates"),
                Err(RecvError::Closed) => members_open = false,
            },
            _ = settled.notified() => {
                let mut engine = engine.lock().await;
                let mut newer = None;
                while let Ok(doc) = team_rx.try_recv() {
                    newer = Some(doc);
                }
                engine.apply_deferred(newer);
            },
        }
    }
    debug!("realtime pump stopped");
}
