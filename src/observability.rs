// ── Engine metrics ──────────────────────────────────────────────

/// Counter: roster operations applied. Labels: op, status.
pub const MUTATIONS_TOTAL: &str = "roster_mutations_total";

/// Histogram: slots filled per generation pass.
pub const GENERATED_SLOTS: &str = "roster_generated_slots";

/// Histogram: slots left unfilled per generation pass.
pub const UNFILLED_SLOTS: &str = "roster_unfilled_slots";

// ── Sync metrics ────────────────────────────────────────────────

/// Counter: failed collaborator writes. Labels: kind.
pub const SYNC_FAILURES_TOTAL: &str = "roster_sync_failures_total";

/// Histogram: time to drain one batch of saves, in seconds.
pub const SYNC_FLUSH_DURATION_SECONDS: &str = "roster_sync_flush_duration_seconds";

/// Histogram: queued commands coalesced into one batch.
pub const SYNC_BATCH_SIZE: &str = "roster_sync_batch_size";

/// Counter: realtime full-state replaces applied.
pub const REMOTE_REPLACES_TOTAL: &str = "roster_remote_replaces_total";

/// Gauge: open sessions.
pub const SESSIONS_ACTIVE: &str = "roster_sessions_active";

/// Operations that change session state, for metric labels and events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Assign,
    Unassign,
    AddSlot,
    Move,
    GenerateDate,
    GenerateAll,
    Clear,
    Undo,
    Redo,
    AddRole,
    RenameRole,
    SetRoleCapacity,
    ReorderRole,
    DeleteRole,
    AddDate,
    DeleteDate,
    MarkUnavailable,
    ClearUnavailable,
    SetMemberDates,
    SetAllowDuplicates,
}

/// Map an Op variant to a short label for metrics.
pub fn op_label(op: Op) -> &'static str {
    match op {
        Op::Assign => "assign",
        Op::Unassign => "unassign",
        Op::AddSlot => "add_slot",
        Op::Move => "move",
        Op::GenerateDate => "generate_date",
        Op::GenerateAll => "generate_all",
        Op::Clear => "clear",
        Op::Undo => "undo",
        Op::Redo => "redo",
        Op::AddRole => "add_role",
        Op::RenameRole => "rename_role",
        Op::SetRoleCapacity => "set_role_capacity",
        Op::ReorderRole => "reorder_role",
        Op::DeleteRole => "delete_role",
        Op::AddDate => "add_date",
        Op::DeleteDate => "delete_date",
        Op::MarkUnavailable => "mark_unavailable",
        Op::ClearUnavailable => "clear_unavailable",
        Op::SetMemberDates => "set_member_dates",
        Op::SetAllowDuplicates => "set_allow_duplicates",
    }
}
