/// Undo/redo depth. Oldest snapshots are evicted past this.
pub const HISTORY_CAPACITY: usize = 20;

pub const MAX_NAME_LEN: usize = 128;
pub const MAX_EVENT_LEN: usize = 256;
pub const MAX_ROLES: usize = 64;
pub const MAX_DATES: usize = 1024;
pub const MAX_MEMBERS: usize = 2048;

/// Upper bound for `Role::count` on multiple-assignment roles.
pub const MAX_ROLE_COUNT: u32 = 16;

/// Hard cap on slots in a single (date, role) cell, including ones added
/// through `add_slot` beyond the role's nominal count.
pub const MAX_SLOTS_PER_CELL: usize = 32;

pub const MAX_SESSIONS: usize = 256;
pub const MAX_TEAM_ID_LEN: usize = 128;
