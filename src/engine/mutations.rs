use std::collections::HashSet;

use rand::seq::SliceRandom;
use tracing::info;

use crate::limits::*;
use crate::model::*;
use crate::observability::{self, Op};

use super::conflict::{ConflictWarning, generation_pool, warnings_for};
use super::{Engine, EngineError};

/// Outcome of a generation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Generated {
    pub filled: usize,
    pub unfilled: usize,
}

impl Engine {
    // ── Validation helpers ───────────────────────────────

    /// Active session, known role, known date. Returns the role.
    fn checked_cell(&self, date: &str, role: &str) -> Result<Role, EngineError> {
        self.ensure_active()?;
        let role = self
            .state
            .role(role)
            .cloned()
            .ok_or_else(|| EngineError::UnknownRole(role.to_string()))?;
        if !self.state.has_date(date) {
            return Err(EngineError::UnknownDate(date.to_string()));
        }
        Ok(role)
    }

    fn checked_role(&self, name: &str) -> Result<usize, EngineError> {
        self.ensure_active()?;
        self.state
            .role_index(name)
            .ok_or_else(|| EngineError::UnknownRole(name.to_string()))
    }

    // ── Assignment ───────────────────────────────────────

    /// Write `name` into one slot. Blank names clear. Returns conflicts the
    /// caller should show; they never block the write.
    pub fn assign(
        &mut self,
        date: &str,
        role: &str,
        index: usize,
        name: &str,
    ) -> Result<Vec<ConflictWarning>, EngineError> {
        let result = self.try_assign(date, role, index, name);
        self.rejected(Op::Assign, result)
    }

    fn try_assign(
        &mut self,
        date: &str,
        role_name: &str,
        index: usize,
        name: &str,
    ) -> Result<Vec<ConflictWarning>, EngineError> {
        let role = self.checked_cell(date, role_name)?;
        let name = name.trim();
        if name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("name too long"));
        }

        let mut slots = self.state.roster.slots(date, role_name);
        let len = slots.len();
        let in_range = if role.allows_growth() { index <= len } else { index == 0 };
        if !in_range {
            return Err(EngineError::InvalidSlot {
                date: date.to_string(),
                role: role_name.to_string(),
                index,
            });
        }
        if index == len && len >= MAX_SLOTS_PER_CELL && !name.is_empty() {
            return Err(EngineError::LimitExceeded("too many slots in cell"));
        }

        // Blank append on a growable cell: nothing to write.
        if name.is_empty() && index == len && role.allows_growth() {
            return Ok(Vec::new());
        }

        let warnings = warnings_for(&self.state, date, role_name, name);
        if name.is_empty() {
            if !role.allows_growth() {
                slots = vec![String::new()];
            } else if index < len {
                slots.remove(index);
            }
        } else if index == len {
            slots.push(name.to_string());
        } else {
            slots[index] = name.to_string();
        }
        compact_slots(&mut slots);

        self.state.roster.set_cell(date, role_name, slots);
        self.commit(Op::Assign);
        Ok(warnings)
    }

    /// Remove a slot, or clear it when it is the only one.
    pub fn unassign(&mut self, date: &str, role: &str, index: usize) -> Result<(), EngineError> {
        let result = self.try_unassign(date, role, index);
        self.rejected(Op::Unassign, result)
    }

    fn try_unassign(&mut self, date: &str, role: &str, index: usize) -> Result<(), EngineError> {
        self.checked_cell(date, role)?;
        let mut slots = self.state.roster.slots(date, role);
        if index >= slots.len() {
            return Err(EngineError::InvalidSlot {
                date: date.to_string(),
                role: role.to_string(),
                index,
            });
        }
        vacate(&mut slots, index);
        self.state.roster.set_cell(date, role, slots);
        self.commit(Op::Unassign);
        Ok(())
    }

    /// Append an empty slot to a multiple-assignment cell, even past the
    /// role's nominal count. Returns the new slot's index.
    pub fn add_slot(&mut self, date: &str, role: &str) -> Result<usize, EngineError> {
        let result = self.try_add_slot(date, role);
        self.rejected(Op::AddSlot, result)
    }

    fn try_add_slot(&mut self, date: &str, role_name: &str) -> Result<usize, EngineError> {
        let role = self.checked_cell(date, role_name)?;
        let len = self.state.roster.slots(date, role_name).len();
        if !role.allows_growth() {
            return Err(EngineError::InvalidSlot {
                date: date.to_string(),
                role: role_name.to_string(),
                index: len,
            });
        }
        if len >= MAX_SLOTS_PER_CELL {
            return Err(EngineError::LimitExceeded("too many slots in cell"));
        }
        let cell = self.state.roster.cell_mut(date, role_name);
        cell.push(String::new());
        let index = cell.len() - 1;
        self.commit(Op::AddSlot);
        Ok(index)
    }

    /// Drag-and-drop: take the value out of one slot and drop it on another
    /// cell. Eligibility is not checked here; conflicts show up in the
    /// views afterwards. Returns false when nothing moved.
    pub fn move_slot(
        &mut self,
        src_date: &str,
        src_role: &str,
        src_index: usize,
        dest_date: &str,
        dest_role: &str,
    ) -> Result<bool, EngineError> {
        let result = self.try_move(src_date, src_role, src_index, dest_date, dest_role);
        self.rejected(Op::Move, result)
    }

    fn try_move(
        &mut self,
        src_date: &str,
        src_role: &str,
        src_index: usize,
        dest_date: &str,
        dest_role: &str,
    ) -> Result<bool, EngineError> {
        self.checked_cell(src_date, src_role)?;
        let dest = self.checked_cell(dest_date, dest_role)?;

        let mut src_slots = self.state.roster.slots(src_date, src_role);
        let Some(value) = src_slots.get(src_index).cloned() else {
            return Err(EngineError::InvalidSlot {
                date: src_date.to_string(),
                role: src_role.to_string(),
                index: src_index,
            });
        };
        if value.is_empty() || (src_date == dest_date && src_role == dest_role) {
            return Ok(false);
        }

        let mut dest_slots = self.state.roster.slots(dest_date, dest_role);
        if dest.allows_growth() {
            if dest_slots.len() >= MAX_SLOTS_PER_CELL {
                return Err(EngineError::LimitExceeded("too many slots in cell"));
            }
            dest_slots.push(value);
            compact_slots(&mut dest_slots);
            vacate(&mut src_slots, src_index);
        } else {
            // Single-slot target: whoever was there goes back to the source.
            let displaced = std::mem::replace(&mut dest_slots, vec![value]);
            match displaced.into_iter().find(|n| !n.is_empty()) {
                Some(name) => src_slots[src_index] = name,
                None => vacate(&mut src_slots, src_index),
            }
        }

        self.state.roster.set_cell(src_date, src_role, src_slots);
        self.state.roster.set_cell(dest_date, dest_role, dest_slots);
        self.commit(Op::Move);
        Ok(true)
    }

    // ── Generation ───────────────────────────────────────

    /// Overwrite every role's cell on `date` with a random pick of eligible
    /// members. Roles are filled in stored order; with duplicates
    /// disallowed, members picked for an earlier role are skipped later.
    pub fn generate_for_date(&mut self, date: &str) -> Result<Generated, EngineError> {
        let result = self.try_generate_for_date(date);
        self.rejected(Op::GenerateDate, result)
    }

    fn try_generate_for_date(&mut self, date: &str) -> Result<Generated, EngineError> {
        self.ensure_active()?;
        if !self.state.has_date(date) {
            return Err(EngineError::UnknownDate(date.to_string()));
        }
        let generated = self.fill_date(date);
        self.record_generation(generated);
        self.commit(Op::GenerateDate);
        Ok(generated)
    }

    /// Generate every date in stored order. Each date is its own history
    /// entry, so undo steps back one date at a time.
    pub fn generate_all(&mut self) -> Result<Generated, EngineError> {
        let result = self.try_generate_all();
        self.rejected(Op::GenerateAll, result)
    }

    fn try_generate_all(&mut self) -> Result<Generated, EngineError> {
        self.ensure_active()?;
        let dates: Vec<DateKey> = self.state.dates.iter().map(|d| d.date.clone()).collect();
        let mut total = Generated::default();
        for date in &dates {
            let generated = self.fill_date(date);
            self.commit(Op::GenerateAll);
            total.filled += generated.filled;
            total.unfilled += generated.unfilled;
        }
        self.record_generation(total);
        info!(
            "generated roster for team {}: {} dates, {} filled, {} unfilled",
            self.team(),
            dates.len(),
            total.filled,
            total.unfilled
        );
        Ok(total)
    }

    fn fill_date(&mut self, date: &str) -> Generated {
        let roles = self.state.roles.clone();
        let mut used: HashSet<String> = HashSet::new();
        let mut generated = Generated::default();

        for role in &roles {
            let mut pool = generation_pool(&self.state, &role.name, date, &used);
            pool.shuffle(&mut *self.rng);
            let target = role.slot_target();
            pool.truncate(target);

            generated.filled += pool.len();
            generated.unfilled += target - pool.len();
            used.extend(pool.iter().cloned());

            if pool.is_empty() {
                pool.push(String::new());
            }
            self.state.roster.set_cell(date, &role.name, pool);
        }
        generated
    }

    fn record_generation(&self, generated: Generated) {
        metrics::histogram!(observability::GENERATED_SLOTS).record(generated.filled as f64);
        metrics::histogram!(observability::UNFILLED_SLOTS).record(generated.unfilled as f64);
    }

    pub fn clear_roster(&mut self) -> Result<(), EngineError> {
        self.ensure_active()?;
        self.state.roster.clear();
        self.commit(Op::Clear);
        Ok(())
    }

    // ── Roles ────────────────────────────────────────────

    pub fn add_role(&mut self, name: &str) -> Result<(), EngineError> {
        self.ensure_active()?;
        let name = checked_name(name)?;
        if self.state.roles.len() >= MAX_ROLES {
            return Err(EngineError::LimitExceeded("too many roles"));
        }
        if self.state.role(name).is_some() {
            return Err(EngineError::DuplicateRole(name.to_string()));
        }
        self.state.roles.push(Role::single(name));
        self.persist_roles();
        self.changed(Op::AddRole);
        Ok(())
    }

    /// Rename a role and carry the live roster column and member
    /// references along. Older history snapshots keep the old name.
    pub fn rename_role(&mut self, old: &str, new: &str) -> Result<(), EngineError> {
        let idx = self.checked_role(old)?;
        let new = checked_name(new)?;
        if new == old {
            return Ok(());
        }
        if self.state.role(new).is_some() {
            return Err(EngineError::DuplicateRole(new.to_string()));
        }

        self.state.roles[idx].name = new.to_string();
        self.state.roster.rename_role(old, new);
        let mut touched = Vec::new();
        for member in &mut self.state.team_members {
            if let Some(r) = member.roles.iter_mut().find(|r| r.as_str() == old) {
                *r = new.to_string();
                touched.push(member.clone());
            }
        }
        for member in touched {
            self.persist_member(member);
        }

        self.persist_roles();
        self.commit(Op::RenameRole);
        Ok(())
    }

    /// Switch a role between single and multiple assignment. Going single
    /// collapses existing cells to their first filled name.
    pub fn set_role_capacity(
        &mut self,
        name: &str,
        is_multiple: bool,
        count: u32,
    ) -> Result<(), EngineError> {
        let idx = self.checked_role(name)?;
        if is_multiple && (count == 0 || count > MAX_ROLE_COUNT) {
            return Err(EngineError::InvalidRoleCount(count));
        }

        self.state.roles[idx] = if is_multiple {
            Role::multiple(name, count)
        } else {
            Role::single(name)
        };
        self.persist_roles();
        if !is_multiple && self.state.roster.collapse_to_single(name) {
            self.commit(Op::SetRoleCapacity);
        } else {
            self.changed(Op::SetRoleCapacity);
        }
        Ok(())
    }

    /// Move a role to `index` in the display order (clamped to the end).
    pub fn reorder_role(&mut self, name: &str, index: usize) -> Result<(), EngineError> {
        let from = self.checked_role(name)?;
        let role = self.state.roles.remove(from);
        let to = index.min(self.state.roles.len());
        self.state.roles.insert(to, role);
        self.persist_roles();
        self.changed(Op::ReorderRole);
        Ok(())
    }

    /// Remove a role, its roster column on every date, and member
    /// references to it.
    pub fn delete_role(&mut self, name: &str) -> Result<(), EngineError> {
        let idx = self.checked_role(name)?;
        self.state.roles.remove(idx);
        self.state.roster.remove_role(name);

        let pruned = self.state.prune_member_roles();
        let touched: Vec<Member> = self
            .state
            .team_members
            .iter()
            .filter(|m| pruned.contains(&m.id))
            .cloned()
            .collect();
        for member in touched {
            self.persist_member(member);
        }

        self.persist_roles();
        self.commit(Op::DeleteRole);
        Ok(())
    }

    // ── Dates ────────────────────────────────────────────

    /// Add a date row. The date is stored in canonical `YYYY-MM-DD` form.
    pub fn add_date(&mut self, date: &str, event: Option<&str>) -> Result<DateKey, EngineError> {
        self.ensure_active()?;
        let parsed = parse_date(date.trim()).ok_or_else(|| EngineError::InvalidDate(date.to_string()))?;
        let key = parsed.format(DATE_FORMAT).to_string();
        if self.state.has_date(&key) {
            return Err(EngineError::DuplicateDate(key));
        }
        if self.state.dates.len() >= MAX_DATES {
            return Err(EngineError::LimitExceeded("too many dates"));
        }
        if event.is_some_and(|e| e.trim().len() > MAX_EVENT_LEN) {
            return Err(EngineError::LimitExceeded("event label too long"));
        }

        self.state.dates.push(DateSlot::new(key.clone(), event));
        self.persist_roster();
        self.changed(Op::AddDate);
        Ok(key)
    }

    /// Remove a date row and its roster entries. Overrides for the date stay.
    pub fn delete_date(&mut self, date: &str) -> Result<(), EngineError> {
        self.ensure_active()?;
        let idx = self
            .state
            .dates
            .iter()
            .position(|d| d.date == date)
            .ok_or_else(|| EngineError::UnknownDate(date.to_string()))?;
        self.state.dates.remove(idx);
        self.state.roster.remove_date(date);
        self.commit(Op::DeleteDate);
        Ok(())
    }

    // ── Unavailability ───────────────────────────────────

    /// Add `name` to the date's override list. Returns false if already there.
    pub fn mark_unavailable(&mut self, date: &str, name: &str) -> Result<bool, EngineError> {
        self.ensure_active()?;
        let name = checked_name(name)?;
        if !self.state.has_date(date) {
            return Err(EngineError::UnknownDate(date.to_string()));
        }
        if !self.state.unavailability.mark(date, name) {
            return Ok(false);
        }
        self.persist_roster();
        self.changed(Op::MarkUnavailable);
        Ok(true)
    }

    /// Remove `name` from the date's override list. Returns false if absent.
    pub fn clear_unavailable(&mut self, date: &str, name: &str) -> Result<bool, EngineError> {
        self.ensure_active()?;
        if !self.state.unavailability.clear(date, name.trim()) {
            return Ok(false);
        }
        self.persist_roster();
        self.changed(Op::ClearUnavailable);
        Ok(true)
    }

    /// Replace a member's own unavailable dates.
    pub fn set_member_unavailable_dates<I, S>(&mut self, name: &str, dates: I) -> Result<(), EngineError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.ensure_active()?;
        let mut parsed = std::collections::BTreeSet::new();
        for date in dates {
            let raw = date.as_ref().trim();
            let day = parse_date(raw).ok_or_else(|| EngineError::InvalidDate(raw.to_string()))?;
            parsed.insert(day.format(DATE_FORMAT).to_string());
        }
        if parsed.len() > MAX_DATES {
            return Err(EngineError::LimitExceeded("too many unavailable dates"));
        }

        let member = self
            .state
            .team_members
            .iter_mut()
            .find(|m| m.name == name)
            .ok_or_else(|| EngineError::UnknownMember(name.to_string()))?;
        member.unavailable_dates = parsed;
        let member = member.clone();
        self.persist_member(member);
        self.changed(Op::SetMemberDates);
        Ok(())
    }

    // ── Settings ─────────────────────────────────────────

    pub fn set_allow_duplicates(&mut self, allow: bool) -> Result<(), EngineError> {
        self.ensure_active()?;
        self.state.settings.allow_duplicates = allow;
        self.persist_settings();
        self.changed(Op::SetAllowDuplicates);
        Ok(())
    }

    // ── Members (delegated to the collaborator) ──────────

    /// Create a member through the collaborator and mirror it locally.
    /// Role references to unknown roles are dropped.
    pub async fn add_member(&mut self, mut member: Member) -> Result<MemberId, EngineError> {
        self.ensure_active()?;
        member.name = checked_name(&member.name)?.to_string();
        if self.state.team_members.len() >= MAX_MEMBERS {
            return Err(EngineError::LimitExceeded("too many members"));
        }
        member.roles.retain(|r| self.state.role(r).is_some());

        let team = self.team().to_string();
        let id = self.adapter.add_member(&team, member.clone()).await?;
        member.id = id.clone();
        self.state.team_members.push(member);
        Ok(id)
    }

    pub async fn update_member(&mut self, mut member: Member) -> Result<(), EngineError> {
        self.ensure_active()?;
        member.name = checked_name(&member.name)?.to_string();
        let idx = self
            .state
            .team_members
            .iter()
            .position(|m| m.id == member.id)
            .ok_or_else(|| EngineError::UnknownMember(member.id.clone()))?;
        member.roles.retain(|r| self.state.role(r).is_some());

        let team = self.team().to_string();
        self.adapter.update_member(&team, &member).await?;
        self.state.team_members[idx] = member;
        Ok(())
    }

    /// Remove a member. Roster slots holding their name are left as is.
    pub async fn delete_member(&mut self, id: &str) -> Result<(), EngineError> {
        self.ensure_active()?;
        if !self.state.team_members.iter().any(|m| m.id == id) {
            return Err(EngineError::UnknownMember(id.to_string()));
        }
        let team = self.team().to_string();
        self.adapter.delete_member(&team, id).await?;
        self.state.team_members.retain(|m| m.id != id);
        Ok(())
    }
}

/// Empty a slot: drop it when others remain, otherwise blank it.
fn vacate(slots: &mut Vec<String>, index: usize) {
    if slots.len() > 1 {
        slots.remove(index);
    } else {
        slots[0].clear();
    }
    compact_slots(slots);
}

fn checked_name(name: &str) -> Result<&str, EngineError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(EngineError::EmptyName);
    }
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("name too long"));
    }
    Ok(name)
}
