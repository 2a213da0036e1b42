mod conflict;
mod error;
mod mutations;
mod queries;
#[cfg(test)]
mod tests;

pub use conflict::{Candidates, ConflictWarning};
pub use error::EngineError;
pub use mutations::Generated;
pub use queries::{Assignment, CellConflict, CellView, SlotView};

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use tokio::sync::{Notify, mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::history::History;
use crate::model::*;
use crate::notify::{NotifyHub, RosterEvent};
use crate::observability::{self, Op, op_label};
use crate::sync::{RosterDoc, SyncAdapter, SyncError};

// ── Background sync writer ───────────────────────────────

pub(super) enum SyncCommand {
    SaveRoster(RosterDoc),
    SaveRoles(Vec<Role>),
    SaveSettings(Settings),
    UpdateMember(Member),
    Flush {
        response: oneshot::Sender<Result<(), SyncError>>,
    },
}

/// Writes coalesced from one drain of the channel. Whole-value saves replace
/// each other (last writer wins); member updates keep the latest per id.
#[derive(Default)]
struct SyncBatch {
    roster: Option<RosterDoc>,
    roles: Option<Vec<Role>>,
    settings: Option<Settings>,
    members: Vec<Member>,
    waiters: Vec<oneshot::Sender<Result<(), SyncError>>>,
    commands: usize,
    writes: usize,
}

impl SyncBatch {
    fn absorb(&mut self, cmd: SyncCommand) {
        self.commands += 1;
        if !matches!(cmd, SyncCommand::Flush { .. }) {
            self.writes += 1;
        }
        match cmd {
            SyncCommand::SaveRoster(doc) => self.roster = Some(doc),
            SyncCommand::SaveRoles(roles) => self.roles = Some(roles),
            SyncCommand::SaveSettings(settings) => self.settings = Some(settings),
            SyncCommand::UpdateMember(member) => {
                self.members.retain(|m| m.id != member.id);
                self.members.push(member);
            }
            SyncCommand::Flush { response } => self.waiters.push(response),
        }
    }

    /// Run every pending write. Returns the first failure; later writes
    /// still run.
    async fn write(&mut self, adapter: &dyn SyncAdapter, team: &str) -> Result<(), SyncError> {
        let mut first_err = None;
        if let Some(doc) = self.roster.take() {
            note_failure("roster", adapter.save_roster(team, &doc).await, &mut first_err);
        }
        if let Some(roles) = self.roles.take() {
            note_failure("roles", adapter.save_roles(team, &roles).await, &mut first_err);
        }
        if let Some(settings) = self.settings.take() {
            note_failure("settings", adapter.save_settings(team, settings).await, &mut first_err);
        }
        for member in self.members.drain(..) {
            note_failure("member", adapter.update_member(team, &member).await, &mut first_err);
        }
        first_err.map_or(Ok(()), Err)
    }
}

fn note_failure(kind: &'static str, result: Result<(), SyncError>, first: &mut Option<SyncError>) {
    if let Err(e) = result {
        metrics::counter!(observability::SYNC_FAILURES_TOTAL, "kind" => kind).increment(1);
        warn!("sync {kind} write failed: {e}");
        first.get_or_insert(e);
    }
}

/// Background task that owns persistence for one session.
/// 1. Block until a command arrives.
/// 2. Drain everything immediately available into one batch.
/// 3. Write the batch, then release its count from `pending`. Wake the
///    realtime pump when nothing is left in flight.
/// 4. Answer flush waiters with any failure not yet reported.
async fn sync_writer_loop(
    adapter: Arc<dyn SyncAdapter>,
    team: TeamId,
    notify: Arc<NotifyHub>,
    pending: Arc<AtomicUsize>,
    settled: Arc<Notify>,
    mut rx: mpsc::UnboundedReceiver<SyncCommand>,
) {
    let mut unreported: Option<SyncError> = None;
    while let Some(cmd) = rx.recv().await {
        let mut batch = SyncBatch::default();
        batch.absorb(cmd);
        while let Ok(cmd) = rx.try_recv() {
            batch.absorb(cmd);
        }

        metrics::histogram!(observability::SYNC_BATCH_SIZE).record(batch.commands as f64);
        let start = std::time::Instant::now();
        if let Err(e) = batch.write(adapter.as_ref(), &team).await {
            notify.send(
                &team,
                RosterEvent::PersistFailed {
                    team: team.clone(),
                    reason: e.to_string(),
                },
            );
            unreported = Some(e);
        }
        metrics::histogram!(observability::SYNC_FLUSH_DURATION_SECONDS)
            .record(start.elapsed().as_secs_f64());
        if batch.writes > 0 && pending.fetch_sub(batch.writes, Ordering::SeqCst) == batch.writes {
            settled.notify_one();
        }

        if !batch.waiters.is_empty() {
            let outcome = unreported.take().map_or(Ok(()), Err);
            for waiter in batch.waiters.drain(..) {
                let _ = waiter.send(outcome.clone());
            }
        }
    }
    debug!("sync writer for team {team} stopped");
}

// ── Session engine ───────────────────────────────────────

/// One team's live session: canonical state, undo history, the random
/// source used by generation, and the handle to the background writer.
///
/// Mutations are synchronous and either apply fully or return an error
/// before touching state. Persistence happens behind them; call
/// [`Engine::flush`] to learn whether it landed.
pub struct Engine {
    team: TeamId,
    pub(super) state: TeamState,
    pub(super) history: History<Roster>,
    pub(super) rng: Box<dyn RngCore + Send + Sync>,
    sync_tx: mpsc::UnboundedSender<SyncCommand>,
    /// Saves queued or being written. Realtime pushes are held back while
    /// non-zero, since they may be echoes of a half-applied save.
    pending: Arc<AtomicUsize>,
    /// Signalled by the writer each time `pending` drops to zero.
    settled: Arc<Notify>,
    /// Newest realtime document held back while saves were in flight.
    deferred: Option<TeamDoc>,
    pub(super) adapter: Arc<dyn SyncAdapter>,
    pub notify: Arc<NotifyHub>,
    active: bool,
}

impl Engine {
    /// Load the team from the collaborator and start a session.
    pub async fn open(
        team: &str,
        adapter: Arc<dyn SyncAdapter>,
        notify: Arc<NotifyHub>,
    ) -> Result<Self, EngineError> {
        let snapshot = adapter.load(team).await?;
        Ok(Self::from_snapshot(team, snapshot, adapter, notify))
    }

    /// Start a session over an already loaded snapshot. Must be called
    /// inside a tokio runtime (spawns the writer task).
    pub fn from_snapshot(
        team: &str,
        snapshot: TeamSnapshot,
        adapter: Arc<dyn SyncAdapter>,
        notify: Arc<NotifyHub>,
    ) -> Self {
        let state = TeamState::from_snapshot(snapshot);
        let (sync_tx, sync_rx) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));
        let settled = Arc::new(Notify::new());
        tokio::spawn(sync_writer_loop(
            adapter.clone(),
            team.to_string(),
            notify.clone(),
            pending.clone(),
            settled.clone(),
            sync_rx,
        ));

        let mut history = History::new();
        history.record(state.roster.clone());

        info!(
            "session opened for team {team}: {} roles, {} dates, {} members",
            state.roles.len(),
            state.dates.len(),
            state.team_members.len()
        );

        Self {
            team: team.to_string(),
            state,
            history,
            rng: Box::new(StdRng::from_os_rng()),
            sync_tx,
            pending,
            settled,
            deferred: None,
            adapter,
            notify,
            active: true,
        }
    }

    /// Replace the random source used by generation.
    pub fn with_rng(mut self, rng: impl RngCore + Send + Sync + 'static) -> Self {
        self.rng = Box::new(rng);
        self
    }

    pub fn seeded(self, seed: u64) -> Self {
        self.with_rng(StdRng::seed_from_u64(seed))
    }

    pub fn team(&self) -> &str {
        &self.team
    }

    pub fn state(&self) -> &TeamState {
        &self.state
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Stop accepting mutations. Queued saves still drain.
    pub fn close(&mut self) {
        self.active = false;
    }

    pub(super) fn ensure_active(&self) -> Result<(), EngineError> {
        if self.active {
            Ok(())
        } else {
            Err(EngineError::NoSession(self.team.clone()))
        }
    }

    // ── History ──────────────────────────────────────────

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn undo(&mut self) -> Result<(), EngineError> {
        self.ensure_active()?;
        let snapshot = self.history.undo().cloned().ok_or(EngineError::NoOp)?;
        self.restore(snapshot);
        self.persist_roster();
        self.changed(Op::Undo);
        Ok(())
    }

    pub fn redo(&mut self) -> Result<(), EngineError> {
        self.ensure_active()?;
        let snapshot = self.history.redo().cloned().ok_or(EngineError::NoOp)?;
        self.restore(snapshot);
        self.persist_roster();
        self.changed(Op::Redo);
        Ok(())
    }

    /// Swap in a snapshot, dropping columns for roles and rows for dates
    /// deleted since it was taken.
    fn restore(&mut self, mut roster: Roster) {
        roster.retain_known(&self.state.roles, &self.state.dates);
        self.state.roster = roster;
        self.state.enforce_single_slots();
    }

    // ── Realtime ─────────────────────────────────────────

    /// Saves not yet acknowledged by the writer.
    pub fn has_pending_writes(&self) -> bool {
        self.pending.load(Ordering::SeqCst) > 0
    }

    /// Wakes once per drain of the writer back to zero pending saves.
    pub fn settled(&self) -> Arc<Notify> {
        self.settled.clone()
    }

    /// Full-state replace from another session. No merge, no history entry.
    /// Returns false when not applied: the document matches local state, or
    /// local saves are still in flight. In the second case the document is
    /// held and applied by [`Engine::apply_deferred`] once the saves land.
    pub fn apply_remote(&mut self, doc: TeamDoc) -> bool {
        if self.has_pending_writes() {
            debug!("team {}: realtime update deferred, local saves in flight", self.team);
            self.deferred = Some(doc);
            return false;
        }
        self.deferred = None;
        if doc == self.state.to_doc() {
            return false;
        }
        let TeamDoc {
            roles,
            dates,
            roster,
            unavailability,
            settings,
        } = doc;
        self.state.roles = roles;
        self.state.dates = dates;
        self.state.roster = roster;
        self.state.unavailability = unavailability;
        self.state.settings = settings;
        self.state.prune_member_roles();
        self.state.enforce_single_slots();

        metrics::counter!(observability::REMOTE_REPLACES_TOTAL).increment(1);
        info!("team {} replaced by realtime update", self.team);
        self.notify.send(
            &self.team,
            RosterEvent::RemoteApplied {
                team: self.team.clone(),
            },
        );
        true
    }

    /// Apply the document held back by [`Engine::apply_remote`], or `newer`
    /// when a later push has arrived since.
    pub fn apply_deferred(&mut self, newer: Option<TeamDoc>) -> bool {
        match newer.or_else(|| self.deferred.take()) {
            Some(doc) => self.apply_remote(doc),
            None => false,
        }
    }

    /// Replace the member list with the collaborator's current one.
    pub fn apply_members(&mut self, members: Vec<Member>) {
        self.state.team_members = members;
        let pruned = self.state.prune_member_roles();
        if !pruned.is_empty() {
            debug!("pruned dangling role references from {} members", pruned.len());
        }
        self.notify.send(
            &self.team,
            RosterEvent::MembersChanged {
                team: self.team.clone(),
            },
        );
    }

    // ── Persistence ──────────────────────────────────────

    fn enqueue(&self, cmd: SyncCommand) {
        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.sync_tx.send(cmd).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            warn!("sync writer for team {} is gone, dropping save", self.team);
        }
    }

    pub(super) fn persist_roster(&self) {
        self.enqueue(SyncCommand::SaveRoster(RosterDoc {
            roster: self.state.roster.clone(),
            dates: self.state.dates.clone(),
            unavailability: self.state.unavailability.clone(),
        }));
    }

    pub(super) fn persist_roles(&self) {
        self.enqueue(SyncCommand::SaveRoles(self.state.roles.clone()));
    }

    pub(super) fn persist_settings(&self) {
        self.enqueue(SyncCommand::SaveSettings(self.state.settings));
    }

    pub(super) fn persist_member(&self, member: Member) {
        self.enqueue(SyncCommand::UpdateMember(member));
    }

    /// Queue a full save of everything the session owns. This is the retry
    /// path after a failed flush.
    pub fn persist_all(&self) {
        self.persist_roster();
        self.persist_roles();
        self.persist_settings();
    }

    /// Wait until every save queued so far has been attempted. Reports the
    /// first failure since the previous flush.
    pub async fn flush(&self) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.sync_tx
            .send(SyncCommand::Flush { response: tx })
            .map_err(|_| EngineError::from(SyncError::Closed))?;
        rx.await
            .map_err(|_| EngineError::from(SyncError::Closed))?
            .map_err(EngineError::from)
    }

    // ── Commit helpers ───────────────────────────────────

    /// Snapshot the roster, queue a save and tell renderers. Every roster
    /// mutation ends here.
    pub(super) fn commit(&mut self, op: Op) {
        debug_assert!(self.state.slot_invariants_hold(), "slot invariant broken by {op:?}");
        self.history.record(self.state.roster.clone());
        self.persist_roster();
        self.changed(op);
    }

    /// Notify renderers and count the operation.
    pub(super) fn changed(&self, op: Op) {
        metrics::counter!(observability::MUTATIONS_TOTAL, "op" => op_label(op), "status" => "ok")
            .increment(1);
        self.notify.send(
            &self.team,
            RosterEvent::Changed {
                team: self.team.clone(),
                op: op_label(op),
            },
        );
    }

    pub(super) fn rejected<T>(&self, op: Op, result: Result<T, EngineError>) -> Result<T, EngineError> {
        if let Err(e) = &result {
            metrics::counter!(observability::MUTATIONS_TOTAL, "op" => op_label(op), "status" => "error")
                .increment(1);
            debug!("{} rejected for team {}: {e}", op_label(op), self.team);
        }
        result
    }
}
