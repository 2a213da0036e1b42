use std::fmt;
use std::path::Path;

use tracing::debug;

use crate::model::*;

// ── Role-major table ─────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterRow {
    pub role: String,
    /// One entry per column: the filled names in that cell.
    pub cells: Vec<Vec<String>>,
}

/// Roster laid out for printing: one row per role in stored order, one
/// column per date in calendar order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterTable {
    pub dates: Vec<DateSlot>,
    pub rows: Vec<RosterRow>,
}

impl RosterTable {
    pub fn from_state(state: &TeamState) -> Self {
        let mut dates = state.dates.clone();
        // Unparseable keys sort after real dates, by text.
        dates.sort_by(|a, b| match (parse_date(&a.date), parse_date(&b.date)) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => a.date.cmp(&b.date),
        });

        let rows = state
            .roles
            .iter()
            .map(|role| RosterRow {
                role: role.name.clone(),
                cells: dates
                    .iter()
                    .map(|d| {
                        state
                            .roster
                            .cell(&d.date, &role.name)
                            .into_iter()
                            .flatten()
                            .filter(|n| !n.is_empty())
                            .cloned()
                            .collect()
                    })
                    .collect(),
            })
            .collect();

        Self { dates, rows }
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty() || self.rows.is_empty()
    }

    fn header(&self) -> Vec<String> {
        let mut header = vec!["Role".to_string()];
        header.extend(self.dates.iter().map(|d| match &d.event {
            Some(event) => format!("{} ({event})", d.date),
            None => d.date.clone(),
        }));
        header
    }
}

impl fmt::Display for RosterTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let header = self.header();
        let body: Vec<Vec<String>> = self
            .rows
            .iter()
            .map(|row| {
                let mut line = vec![row.role.clone()];
                line.extend(row.cells.iter().map(|names| {
                    if names.is_empty() {
                        "-".to_string()
                    } else {
                        names.join(", ")
                    }
                }));
                line
            })
            .collect();

        let mut widths: Vec<usize> = header.iter().map(|h| h.chars().count()).collect();
        for line in &body {
            for (w, cell) in widths.iter_mut().zip(line) {
                *w = (*w).max(cell.chars().count());
            }
        }

        let write_line = |f: &mut fmt::Formatter<'_>, cells: &[String]| -> fmt::Result {
            let padded: Vec<String> = cells
                .iter()
                .zip(&widths)
                .map(|(c, &w)| format!("{c:<w$}"))
                .collect();
            writeln!(f, "{}", padded.join(" | ").trim_end())
        };

        write_line(f, &header)?;
        let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
        writeln!(f, "{}", rule.join("-+-"))?;
        for line in &body {
            write_line(f, line)?;
        }
        Ok(())
    }
}

// ── Session file ─────────────────────────────────────────────────

#[derive(Debug)]
pub enum SessionFileError {
    Io(std::io::Error),
    Parse(serde_json::Error),
}

impl fmt::Display for SessionFileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionFileError::Io(e) => write!(f, "session file I/O error: {e}"),
            SessionFileError::Parse(e) => write!(f, "session file is not valid: {e}"),
        }
    }
}

impl std::error::Error for SessionFileError {}

impl From<std::io::Error> for SessionFileError {
    fn from(e: std::io::Error) -> Self {
        SessionFileError::Io(e)
    }
}

impl From<serde_json::Error> for SessionFileError {
    fn from(e: serde_json::Error) -> Self {
        SessionFileError::Parse(e)
    }
}

pub fn to_session_json(state: &TeamState) -> Result<String, SessionFileError> {
    Ok(serde_json::to_string_pretty(state)?)
}

/// Parse a saved session. Legacy role records and missing sections are
/// accepted; the result is normalized like a fresh load.
pub fn from_session_json(json: &str) -> Result<TeamState, SessionFileError> {
    let state: TeamState = serde_json::from_str(json)?;
    Ok(TeamState::from_snapshot(state.into_snapshot()))
}

pub fn load_session(path: &Path) -> Result<TeamState, SessionFileError> {
    let json = std::fs::read_to_string(path)?;
    let state = from_session_json(&json)?;
    debug!("loaded session from {}", path.display());
    Ok(state)
}

/// Write via a sibling temp file and rename, so a crash never leaves a
/// half-written session behind.
pub fn save_session(path: &Path, state: &TeamState) -> Result<(), SessionFileError> {
    let json = to_session_json(state)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)?;
    debug!("saved session to {}", path.display());
    Ok(())
}
