use crate::model::TeamId;
use crate::sync::SyncError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// No active session for the team (closed, or never opened).
    NoSession(TeamId),
    /// The persistence collaborator has no such team.
    TeamNotFound(TeamId),
    DuplicateRole(String),
    DuplicateDate(String),
    UnknownRole(String),
    UnknownDate(String),
    UnknownMember(String),
    InvalidDate(String),
    InvalidSlot {
        date: String,
        role: String,
        index: usize,
    },
    InvalidRoleCount(u32),
    EmptyName,
    LimitExceeded(&'static str),
    /// Undo/redo with nothing to step to.
    NoOp,
    /// Retryable: in-memory state is kept, the save did not land.
    Persistence(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NoSession(team) => write!(f, "no active session for team: {team}"),
            EngineError::TeamNotFound(team) => write!(f, "team not found: {team}"),
            EngineError::DuplicateRole(name) => write!(f, "role already exists: {name}"),
            EngineError::DuplicateDate(date) => write!(f, "date already exists: {date}"),
            EngineError::UnknownRole(name) => write!(f, "unknown role: {name}"),
            EngineError::UnknownDate(date) => write!(f, "unknown date: {date}"),
            EngineError::UnknownMember(name) => write!(f, "unknown member: {name}"),
            EngineError::InvalidDate(raw) => write!(f, "invalid date (expected YYYY-MM-DD): {raw}"),
            EngineError::InvalidSlot { date, role, index } => {
                write!(f, "invalid slot {index} for role {role} on {date}")
            }
            EngineError::InvalidRoleCount(count) => write!(f, "invalid role count: {count}"),
            EngineError::EmptyName => write!(f, "name must not be empty"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::NoOp => write!(f, "nothing to do"),
            EngineError::Persistence(e) => write!(f, "persistence failed: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<SyncError> for EngineError {
    fn from(e: SyncError) -> Self {
        match e {
            SyncError::NotFound(team) => EngineError::TeamNotFound(team),
            other => EngineError::Persistence(other.to_string()),
        }
    }
}
