use crate::export::RosterTable;
use crate::model::*;

use super::conflict::{Candidates, ConflictWarning, resolve, warnings_for};
use super::{Engine, EngineError};

/// One rendered slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotView {
    pub name: String,
    /// The member cannot serve that day.
    pub unavailable: bool,
    /// Filled with a name that matches no member.
    pub custom: bool,
    /// Also placed in another role that day while duplicates are disallowed.
    pub busy: bool,
}

/// Everything a renderer needs for one (date, role) cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellView {
    pub slots: Vec<SlotView>,
    pub candidates: Candidates,
}

/// Where a volunteer is placed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub date: DateKey,
    pub role: String,
    pub index: usize,
}

/// A conflict found in the live roster, with its position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellConflict {
    pub role: String,
    pub index: usize,
    pub warning: ConflictWarning,
}

impl Engine {
    fn known_cell(&self, date: &str, role: &str) -> Result<(), EngineError> {
        if self.state.role(role).is_none() {
            return Err(EngineError::UnknownRole(role.to_string()));
        }
        if !self.state.has_date(date) {
            return Err(EngineError::UnknownDate(date.to_string()));
        }
        Ok(())
    }

    pub fn candidates(&self, date: &str, role: &str) -> Result<Candidates, EngineError> {
        self.known_cell(date, role)?;
        Ok(resolve(&self.state, role, date))
    }

    pub fn cell_view(&self, date: &str, role: &str) -> Result<CellView, EngineError> {
        let candidates = self.candidates(date, role)?;
        let slots = self
            .state
            .roster
            .slots(date, role)
            .into_iter()
            .map(|name| {
                let filled = !name.is_empty();
                SlotView {
                    unavailable: filled && self.state.is_name_unavailable(&name, date),
                    custom: filled && self.state.member_named(&name).is_none(),
                    busy: filled && candidates.is_busy(&name, ""),
                    name,
                }
            })
            .collect();
        Ok(CellView { slots, candidates })
    }

    pub fn eligible_members(&self, role: &str, date: &str) -> Vec<&Member> {
        self.state.eligible_members(role, date)
    }

    pub fn is_member_unavailable(&self, name: &str, date: &str) -> bool {
        self.state.is_name_unavailable(name, date)
    }

    pub fn unavailable_count(&self, date: &str) -> usize {
        self.state.unavailable_count(date)
    }

    /// Every slot holding `name`, dates in stored order, roles in stored order.
    pub fn assignments_for(&self, name: &str) -> Vec<Assignment> {
        let mut out = Vec::new();
        for date in &self.state.dates {
            for role in &self.state.roles {
                let Some(cell) = self.state.roster.cell(&date.date, &role.name) else {
                    continue;
                };
                for (index, slot) in cell.iter().enumerate() {
                    if slot == name {
                        out.push(Assignment {
                            date: date.date.clone(),
                            role: role.name.clone(),
                            index,
                        });
                    }
                }
            }
        }
        out
    }

    /// Conflicts currently visible on one date, roles in stored order.
    /// A name held in two roles is reported once per role.
    pub fn conflicts_on(&self, date: &str) -> Vec<CellConflict> {
        let mut out = Vec::new();
        for role in &self.state.roles {
            let Some(cell) = self.state.roster.cell(date, &role.name) else {
                continue;
            };
            for (index, name) in cell.iter().enumerate() {
                for warning in warnings_for(&self.state, date, &role.name, name) {
                    out.push(CellConflict {
                        role: role.name.clone(),
                        index,
                        warning,
                    });
                }
            }
        }
        out
    }

    /// Role-major view: rows are roles, columns are dates in calendar order.
    pub fn table(&self) -> RosterTable {
        RosterTable::from_state(&self.state)
    }
}
