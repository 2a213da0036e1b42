use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::*;

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    NotFound(TeamId),
    Failure(String),
    /// The adapter or the session's writer went away.
    Closed,
}

impl std::fmt::Display for SyncError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncError::NotFound(team) => write!(f, "team not found: {team}"),
            SyncError::Failure(reason) => write!(f, "{reason}"),
            SyncError::Closed => write!(f, "sync channel closed"),
        }
    }
}

impl std::error::Error for SyncError {}

/// The roster half of the team document, saved as one unit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RosterDoc {
    pub roster: Roster,
    pub dates: Vec<DateSlot>,
    pub unavailability: Unavailability,
}

/// Persistence and realtime collaborator.
///
/// Saves are whole-value replacements. Subscriptions deliver the full team
/// document (or full member list) after every change; dropping the receiver
/// unsubscribes.
#[async_trait]
pub trait SyncAdapter: Send + Sync {
    async fn load(&self, team: &str) -> Result<TeamSnapshot, SyncError>;

    async fn save_roster(&self, team: &str, doc: &RosterDoc) -> Result<(), SyncError>;

    async fn save_roles(&self, team: &str, roles: &[Role]) -> Result<(), SyncError>;

    async fn save_settings(&self, team: &str, settings: Settings) -> Result<(), SyncError>;

    fn subscribe_team(&self, team: &str) -> broadcast::Receiver<TeamDoc>;

    fn subscribe_members(&self, team: &str) -> broadcast::Receiver<Vec<Member>>;

    /// Returns the id the collaborator assigned.
    async fn add_member(&self, team: &str, member: Member) -> Result<MemberId, SyncError>;

    async fn update_member(&self, team: &str, member: &Member) -> Result<(), SyncError>;

    async fn delete_member(&self, team: &str, id: &str) -> Result<(), SyncError>;
}

/// Process-local adapter: team documents and member lists in DashMaps,
/// realtime pushes over broadcast channels.
pub struct InMemorySync {
    teams: DashMap<TeamId, TeamDoc>,
    members: DashMap<TeamId, Vec<Member>>,
    team_channels: DashMap<TeamId, broadcast::Sender<TeamDoc>>,
    member_channels: DashMap<TeamId, broadcast::Sender<Vec<Member>>>,
    /// Number of upcoming writes to reject (failure injection).
    failing_writes: AtomicUsize,
}

impl Default for InMemorySync {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemorySync {
    pub fn new() -> Self {
        Self {
            teams: DashMap::new(),
            members: DashMap::new(),
            team_channels: DashMap::new(),
            member_channels: DashMap::new(),
            failing_writes: AtomicUsize::new(0),
        }
    }

    /// New team with the default role set and a fresh id.
    pub fn create_team(&self) -> TeamId {
        let id = Ulid::new().to_string();
        let doc = TeamDoc {
            roles: default_roles(),
            ..Default::default()
        };
        self.insert_team(&id, doc, Vec::new());
        id
    }

    /// Seed or overwrite a team. Members without an id get one.
    pub fn insert_team(&self, team: &str, doc: TeamDoc, members: Vec<Member>) {
        let members: Vec<Member> = members
            .into_iter()
            .map(|mut m| {
                if m.id.is_empty() {
                    m.id = Ulid::new().to_string();
                }
                m
            })
            .collect();
        self.teams.insert(team.to_string(), doc.clone());
        self.members.insert(team.to_string(), members.clone());
        self.publish_team(team, doc);
        self.publish_members(team, members);
    }

    pub fn team_doc(&self, team: &str) -> Option<TeamDoc> {
        self.teams.get(team).map(|d| d.value().clone())
    }

    pub fn team_members(&self, team: &str) -> Vec<Member> {
        self.members
            .get(team)
            .map(|m| m.value().clone())
            .unwrap_or_default()
    }

    /// Make the next `n` write calls fail.
    pub fn fail_next_writes(&self, n: usize) {
        self.failing_writes.store(n, Ordering::SeqCst);
    }

    fn check_write(&self) -> Result<(), SyncError> {
        let injected = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(SyncError::Failure("injected write failure".into()));
        }
        Ok(())
    }

    fn update_team(&self, team: &str, f: impl FnOnce(&mut TeamDoc)) -> Result<(), SyncError> {
        self.check_write()?;
        let snapshot = {
            let mut doc = self
                .teams
                .get_mut(team)
                .ok_or_else(|| SyncError::NotFound(team.to_string()))?;
            f(doc.value_mut());
            doc.value().clone()
        };
        self.publish_team(team, snapshot);
        Ok(())
    }

    fn update_members(
        &self,
        team: &str,
        f: impl FnOnce(&mut Vec<Member>) -> Result<(), SyncError>,
    ) -> Result<(), SyncError> {
        self.check_write()?;
        let snapshot = {
            let mut members = self
                .members
                .get_mut(team)
                .ok_or_else(|| SyncError::NotFound(team.to_string()))?;
            f(members.value_mut())?;
            members.value().clone()
        };
        self.publish_members(team, snapshot);
        Ok(())
    }

    /// Send to subscribers. No-op if nobody is listening.
    fn publish_team(&self, team: &str, doc: TeamDoc) {
        if let Some(tx) = self.team_channels.get(team) {
            let _ = tx.send(doc);
        }
    }

    fn publish_members(&self, team: &str, members: Vec<Member>) {
        if let Some(tx) = self.member_channels.get(team) {
            let _ = tx.send(members);
        }
    }
}

#[async_trait]
impl SyncAdapter for InMemorySync {
    async fn load(&self, team: &str) -> Result<TeamSnapshot, SyncError> {
        let doc = self
            .team_doc(team)
            .ok_or_else(|| SyncError::NotFound(team.to_string()))?;
        Ok(TeamSnapshot {
            doc,
            members: self.team_members(team),
        })
    }

    async fn save_roster(&self, team: &str, roster: &RosterDoc) -> Result<(), SyncError> {
        self.update_team(team, |doc| {
            doc.roster = roster.roster.clone();
            doc.dates = roster.dates.clone();
            doc.unavailability = roster.unavailability.clone();
        })
    }

    async fn save_roles(&self, team: &str, roles: &[Role]) -> Result<(), SyncError> {
        self.update_team(team, |doc| doc.roles = roles.to_vec())
    }

    async fn save_settings(&self, team: &str, settings: Settings) -> Result<(), SyncError> {
        self.update_team(team, |doc| doc.settings = settings)
    }

    fn subscribe_team(&self, team: &str) -> broadcast::Receiver<TeamDoc> {
        self.team_channels
            .entry(team.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    fn subscribe_members(&self, team: &str) -> broadcast::Receiver<Vec<Member>> {
        self.member_channels
            .entry(team.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    async fn add_member(&self, team: &str, mut member: Member) -> Result<MemberId, SyncError> {
        let id = Ulid::new().to_string();
        member.id = id.clone();
        self.update_members(team, |members| {
            members.push(member);
            Ok(())
        })?;
        Ok(id)
    }

    async fn update_member(&self, team: &str, member: &Member) -> Result<(), SyncError> {
        self.update_members(team, |members| {
            let slot = members
                .iter_mut()
                .find(|m| m.id == member.id)
                .ok_or_else(|| SyncError::Failure(format!("no member with id {}", member.id)))?;
            *slot = member.clone();
            Ok(())
        })
    }

    async fn delete_member(&self, team: &str, id: &str) -> Result<(), SyncError> {
        self.update_members(team, |members| {
            members.retain(|m| m.id != id);
            Ok(())
        })
    }
}
