use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::limits::{MAX_ROLE_COUNT, MAX_SLOTS_PER_CELL};

/// Identifier of a team document in the persistence collaborator.
pub type TeamId = String;

/// Member identifier, assigned by the persistence collaborator.
pub type MemberId = String;

/// Calendar date in `YYYY-MM-DD` form, the roster's row key.
pub type DateKey = String;

pub const DATE_FORMAT: &str = "%Y-%m-%d";

pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, DATE_FORMAT).ok()
}

// ── Roles ────────────────────────────────────────────────────────

/// A labeled duty slot type. `count` is always 1 unless `is_multiple`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RoleRecord", rename_all = "camelCase")]
pub struct Role {
    pub name: String,
    pub is_multiple: bool,
    pub count: u32,
}

impl Role {
    pub fn single(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_multiple: false,
            count: 1,
        }
    }

    pub fn multiple(name: impl Into<String>, count: u32) -> Self {
        Self {
            name: name.into(),
            is_multiple: true,
            count: count.clamp(1, MAX_ROLE_COUNT),
        }
    }

    /// Number of people generation tries to place.
    pub fn slot_target(&self) -> usize {
        if self.is_multiple {
            (self.count as usize).min(MAX_SLOTS_PER_CELL)
        } else {
            1
        }
    }

    /// Whether a cell for this role may hold more than one slot.
    pub fn allows_growth(&self) -> bool {
        self.is_multiple
    }
}

/// Stored role shape. Older team documents kept roles as bare strings.
#[derive(Deserialize)]
#[serde(untagged)]
enum RoleRecord {
    Name(String),
    Full {
        name: String,
        #[serde(default, rename = "isMultiple")]
        is_multiple: bool,
        #[serde(default = "default_count")]
        count: u32,
    },
}

fn default_count() -> u32 {
    1
}

impl From<RoleRecord> for Role {
    fn from(record: RoleRecord) -> Self {
        match record {
            RoleRecord::Name(name) => Role::single(name),
            RoleRecord::Full { name, is_multiple: true, count } => Role::multiple(name, count),
            RoleRecord::Full { name, .. } => Role::single(name),
        }
    }
}

// ── Dates ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateSlot {
    pub date: DateKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
}

impl DateSlot {
    pub fn new(date: impl Into<String>, event: Option<&str>) -> Self {
        Self {
            date: date.into(),
            event: event.map(str::trim).filter(|e| !e.is_empty()).map(String::from),
        }
    }
}

// ── Members ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    #[serde(default)]
    pub id: MemberId,
    pub name: String,
    /// Role names. Weak references: pruned when the role goes away.
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub availability: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub unavailable_dates: BTreeSet<DateKey>,
}

impl Member {
    pub fn new(name: impl Into<String>, roles: &[&str]) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            roles: roles.iter().map(|r| r.to_string()).collect(),
            availability: String::new(),
            notes: String::new(),
            unavailable_dates: BTreeSet::new(),
        }
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

// ── Roster ───────────────────────────────────────────────────────

/// date → role name → ordered slot values.
///
/// A slot holds `""` (unfilled), a member name, or a free-text custom name.
/// Values are names, not member ids: deleting a member leaves its name behind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Roster(BTreeMap<DateKey, BTreeMap<String, Vec<String>>>);

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn row(&self, date: &str) -> Option<&BTreeMap<String, Vec<String>>> {
        self.0.get(date)
    }

    pub fn cell(&self, date: &str, role: &str) -> Option<&Vec<String>> {
        self.0.get(date).and_then(|row| row.get(role))
    }

    /// Slot values as a renderer sees them: a missing or empty cell is one
    /// unfilled slot.
    pub fn slots(&self, date: &str, role: &str) -> Vec<String> {
        match self.cell(date, role) {
            Some(cell) if !cell.is_empty() => cell.clone(),
            _ => vec![String::new()],
        }
    }

    /// Mutable cell, materialized as `[""]` when absent.
    pub fn cell_mut(&mut self, date: &str, role: &str) -> &mut Vec<String> {
        let cell = self
            .0
            .entry(date.to_string())
            .or_default()
            .entry(role.to_string())
            .or_default();
        if cell.is_empty() {
            cell.push(String::new());
        }
        cell
    }

    pub fn set_cell(&mut self, date: &str, role: &str, slots: Vec<String>) {
        self.0
            .entry(date.to_string())
            .or_default()
            .insert(role.to_string(), slots);
    }

    pub fn remove_role(&mut self, role: &str) {
        for row in self.0.values_mut() {
            row.remove(role);
        }
    }

    pub fn remove_date(&mut self, date: &str) {
        self.0.remove(date);
    }

    pub fn rename_role(&mut self, old: &str, new: &str) {
        for row in self.0.values_mut() {
            if let Some(cell) = row.remove(old) {
                row.insert(new.to_string(), cell);
            }
        }
    }

    /// Collapse every cell of `role` to one slot, keeping the first filled name.
    pub fn collapse_to_single(&mut self, role: &str) -> bool {
        let mut changed = false;
        for row in self.0.values_mut() {
            if let Some(cell) = row.get_mut(role)
                && cell.len() > 1
            {
                let keep = cell.iter().find(|n| !n.is_empty()).cloned().unwrap_or_default();
                *cell = vec![keep];
                changed = true;
            }
        }
        changed
    }

    /// Filled names in every role of `date` except `except_role`.
    pub fn names_on(&self, date: &str, except_role: Option<&str>) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        if let Some(row) = self.0.get(date) {
            for (role, cell) in row {
                if Some(role.as_str()) == except_role {
                    continue;
                }
                names.extend(cell.iter().filter(|n| !n.is_empty()).cloned());
            }
        }
        names
    }

    /// Drop rows and columns for dates/roles that no longer exist.
    pub fn retain_known(&mut self, roles: &[Role], dates: &[DateSlot]) {
        self.0.retain(|date, _| dates.iter().any(|d| &d.date == date));
        for row in self.0.values_mut() {
            row.retain(|role, _| roles.iter().any(|r| &r.name == role));
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&DateKey, &BTreeMap<String, Vec<String>>)> {
        self.0.iter()
    }
}

/// Multi-slot cells never keep blank entries; a cell left with nothing
/// becomes one unfilled slot.
pub fn compact_slots(cell: &mut Vec<String>) {
    if cell.len() > 1 {
        cell.retain(|n| !n.is_empty());
    }
    if cell.is_empty() {
        cell.push(String::new());
    }
}

// ── Unavailability overrides ─────────────────────────────────────

/// Per-date names unavailable in addition to each member's own dates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Unavailability(BTreeMap<DateKey, BTreeSet<String>>);

impl Unavailability {
    pub fn contains(&self, date: &str, name: &str) -> bool {
        self.0.get(date).is_some_and(|names| names.contains(name))
    }

    pub fn names_on(&self, date: &str) -> impl Iterator<Item = &String> {
        self.0.get(date).into_iter().flatten()
    }

    /// Returns false if the name was already marked.
    pub fn mark(&mut self, date: &str, name: &str) -> bool {
        self.0
            .entry(date.to_string())
            .or_default()
            .insert(name.to_string())
    }

    /// Returns false if the name was not marked.
    pub fn clear(&mut self, date: &str, name: &str) -> bool {
        let Some(names) = self.0.get_mut(date) else {
            return false;
        };
        let removed = names.remove(name);
        if names.is_empty() {
            self.0.remove(date);
        }
        removed
    }

    pub fn remove_date(&mut self, date: &str) {
        self.0.remove(date);
    }
}

// ── Settings ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Whether one member may hold several roles on the same date.
    #[serde(default)]
    pub allow_duplicates: bool,
}

// ── Documents exchanged with the sync collaborator ───────────────

/// The team document: everything except the member list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamDoc {
    #[serde(default)]
    pub roles: Vec<Role>,
    #[serde(default)]
    pub dates: Vec<DateSlot>,
    #[serde(default)]
    pub roster: Roster,
    #[serde(default)]
    pub unavailability: Unavailability,
    #[serde(default)]
    pub settings: Settings,
}

/// What `load` hands back: the team document plus its members.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeamSnapshot {
    pub doc: TeamDoc,
    pub members: Vec<Member>,
}

/// Roles a freshly created team starts with.
pub fn default_roles() -> Vec<Role> {
    ["Main Camera", "Second Camera", "ProPresenter", "Live Monitoring"]
        .into_iter()
        .map(Role::single)
        .collect()
}

// ── Canonical session state ──────────────────────────────────────

/// All state owned by one active session. Field names follow the saved
/// session file layout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamState {
    #[serde(default)]
    pub roles: Vec<Role>,
    #[serde(default)]
    pub dates: Vec<DateSlot>,
    #[serde(default)]
    pub team_members: Vec<Member>,
    #[serde(default)]
    pub roster: Roster,
    #[serde(default)]
    pub unavailability: Unavailability,
    #[serde(default)]
    pub settings: Settings,
}

impl TeamState {
    pub fn from_snapshot(snapshot: TeamSnapshot) -> Self {
        let TeamSnapshot { doc, members } = snapshot;
        let mut state = Self {
            roles: doc.roles,
            dates: doc.dates,
            team_members: members,
            roster: doc.roster,
            unavailability: doc.unavailability,
            settings: doc.settings,
        };
        state.prune_member_roles();
        state.enforce_single_slots();
        state
    }

    pub fn to_doc(&self) -> TeamDoc {
        TeamDoc {
            roles: self.roles.clone(),
            dates: self.dates.clone(),
            roster: self.roster.clone(),
            unavailability: self.unavailability.clone(),
            settings: self.settings,
        }
    }

    pub fn into_snapshot(self) -> TeamSnapshot {
        TeamSnapshot {
            doc: TeamDoc {
                roles: self.roles,
                dates: self.dates,
                roster: self.roster,
                unavailability: self.unavailability,
                settings: self.settings,
            },
            members: self.team_members,
        }
    }

    pub fn role(&self, name: &str) -> Option<&Role> {
        self.roles.iter().find(|r| r.name == name)
    }

    pub fn role_index(&self, name: &str) -> Option<usize> {
        self.roles.iter().position(|r| r.name == name)
    }

    pub fn has_date(&self, date: &str) -> bool {
        self.dates.iter().any(|d| d.date == date)
    }

    pub fn member_named(&self, name: &str) -> Option<&Member> {
        self.team_members.iter().find(|m| m.name == name)
    }

    pub fn is_member_unavailable(&self, member: &Member, date: &str) -> bool {
        member.unavailable_dates.contains(date) || self.unavailability.contains(date, &member.name)
    }

    /// True when `name` belongs to a member who cannot serve on `date`.
    /// Custom names are never unavailable.
    pub fn is_name_unavailable(&self, name: &str, date: &str) -> bool {
        self.team_members
            .iter()
            .any(|m| m.name == name && self.is_member_unavailable(m, date))
    }

    /// Members holding `role` who are free on `date`, in member-list order.
    pub fn eligible_members(&self, role: &str, date: &str) -> Vec<&Member> {
        self.team_members
            .iter()
            .filter(|m| m.has_role(role) && !self.is_member_unavailable(m, date))
            .collect()
    }

    /// Names placed in any other role on `date`.
    pub fn assigned_elsewhere(&self, date: &str, excluding_role: &str) -> BTreeSet<String> {
        self.roster.names_on(date, Some(excluding_role))
    }

    /// Distinct people unavailable on `date` from either layer.
    pub fn unavailable_count(&self, date: &str) -> usize {
        let mut names: BTreeSet<&str> = self
            .team_members
            .iter()
            .filter(|m| m.unavailable_dates.contains(date))
            .map(|m| m.name.as_str())
            .collect();
        names.extend(self.unavailability.names_on(date).map(String::as_str));
        names.len()
    }

    /// Bring single-slot roles back to at most one slot per cell.
    pub fn enforce_single_slots(&mut self) -> bool {
        let mut changed = false;
        for role in self.roles.iter().filter(|r| !r.is_multiple) {
            changed |= self.roster.collapse_to_single(&role.name);
        }
        changed
    }

    /// Every cell respects its role's slot rules.
    pub fn slot_invariants_hold(&self) -> bool {
        self.roster.iter().all(|(_, row)| {
            row.iter().all(|(role, cell)| match self.role(role) {
                Some(r) if !r.is_multiple => cell.len() <= 1,
                _ => cell.len() <= crate::limits::MAX_SLOTS_PER_CELL,
            })
        })
    }

    /// Remove member role references to roles that no longer exist.
    /// Returns the ids of members that changed.
    pub fn prune_member_roles(&mut self) -> Vec<MemberId> {
        let known: BTreeSet<&str> = self.roles.iter().map(|r| r.name.as_str()).collect();
        let mut changed = Vec::new();
        for member in &mut self.team_members {
            let before = member.roles.len();
            member.roles.retain(|r| known.contains(r.as_str()));
            if member.roles.len() != before {
                changed.push(member.id.clone());
            }
        }
        changed
    }
}
