use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::model::TeamId;

const CHANNEL_CAPACITY: usize = 256;

/// What a renderer needs to know to redraw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RosterEvent {
    /// A local operation changed the session state.
    Changed { team: TeamId, op: &'static str },
    /// A realtime push replaced the team document.
    RemoteApplied { team: TeamId },
    /// The member list was replaced.
    MembersChanged { team: TeamId },
    /// A background save failed. Local state is kept; retry is up to the caller.
    PersistFailed { team: TeamId, reason: String },
}

/// Broadcast hub for renderer notifications, one channel per team.
pub struct NotifyHub {
    channels: DashMap<TeamId, broadcast::Sender<RosterEvent>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to a team's events. Creates the channel if needed.
    pub fn subscribe(&self, team: &str) -> broadcast::Receiver<RosterEvent> {
        let sender = self
            .channels
            .entry(team.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, team: &str, event: RosterEvent) {
        if let Some(sender) = self.channels.get(team) {
            let _ = sender.send(event);
        }
    }

    /// Remove a channel (e.g. when the session closes).
    pub fn remove(&self, team: &str) {
        self.channels.remove(team);
    }
}
