use std::collections::{BTreeSet, HashSet};

use crate::model::*;

/// Dropdown options for one (date, role) cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidates {
    /// Eligible members plus whoever already fills a slot here, sorted and deduplicated.
    pub names: Vec<String>,
    /// Names placed in other roles that day. Always empty when duplicates are allowed.
    pub assigned_elsewhere: BTreeSet<String>,
}

impl Candidates {
    /// A name is busy for a slot when another role holds it that day, unless
    /// the slot already holds that same name.
    pub fn is_busy(&self, name: &str, current: &str) -> bool {
        name != current && self.assigned_elsewhere.contains(name)
    }
}

/// Non-fatal problems with an assignment. The write still happens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictWarning {
    /// Member is on their own unavailable list or the date's override list.
    Unavailable { name: String, date: DateKey },
    /// Member also holds these roles that day while duplicates are disallowed.
    AssignedElsewhere {
        name: String,
        date: DateKey,
        roles: Vec<String>,
    },
}

pub(crate) fn resolve(state: &TeamState, role: &str, date: &str) -> Candidates {
    let mut names: BTreeSet<String> = state
        .eligible_members(role, date)
        .into_iter()
        .map(|m| m.name.clone())
        .collect();
    if let Some(cell) = state.roster.cell(date, role) {
        names.extend(cell.iter().filter(|n| !n.is_empty()).cloned());
    }

    let assigned_elsewhere = if state.settings.allow_duplicates {
        BTreeSet::new()
    } else {
        state.assigned_elsewhere(date, role)
    };

    Candidates {
        names: names.into_iter().collect(),
        assigned_elsewhere,
    }
}

/// Members generation may draw from, in member-list order. `used` holds
/// names already placed earlier in the same pass; it only applies when
/// duplicates are disallowed.
pub(crate) fn generation_pool(
    state: &TeamState,
    role: &str,
    date: &str,
    used: &HashSet<String>,
) -> Vec<String> {
    state
        .eligible_members(role, date)
        .into_iter()
        .filter(|m| state.settings.allow_duplicates || !used.contains(&m.name))
        .map(|m| m.name.clone())
        .collect()
}

pub(crate) fn warnings_for(
    state: &TeamState,
    date: &str,
    role: &str,
    name: &str,
) -> Vec<ConflictWarning> {
    let mut warnings = Vec::new();
    if name.is_empty() {
        return warnings;
    }
    if state.is_name_unavailable(name, date) {
        warnings.push(ConflictWarning::Unavailable {
            name: name.to_string(),
            date: date.to_string(),
        });
    }
    if !state.settings.allow_duplicates {
        let roles: Vec<String> = state
            .roster
            .row(date)
            .into_iter()
            .flatten()
            .filter(|(r, cell)| r.as_str() != role && cell.iter().any(|n| n == name))
            .map(|(r, _)| r.clone())
            .collect();
        if !roles.is_empty() {
            warnings.push(ConflictWarning::AssignedElsewhere {
                name: name.to_string(),
                date: date.to_string(),
                roles,
            });
        }
    }
    warnings
}
