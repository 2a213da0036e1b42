use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::*;
use crate::limits::*;
use crate::model::*;
use crate::notify::{NotifyHub, RosterEvent};
use crate::sync::InMemorySync;

const D1: &str = "2024-01-07";
const D2: &str = "2024-01-14";
const MAIN: &str = "Main Camera";
const SECOND: &str = "Second Camera";
const USHERS: &str = "Ushers";

fn member(name: &str, roles: &[&str]) -> Member {
    let mut m = Member::new(name, roles);
    m.id = format!("id-{name}");
    m
}

fn away(name: &str, roles: &[&str], dates: &[&str]) -> Member {
    let mut m = member(name, roles);
    m.unavailable_dates = dates.iter().map(|d| d.to_string()).collect();
    m
}

fn snapshot(roles: Vec<Role>, dates: &[&str], members: Vec<Member>) -> TeamSnapshot {
    TeamSnapshot {
        doc: TeamDoc {
            roles,
            dates: dates.iter().map(|d| DateSlot::new(*d, Some("Service"))).collect(),
            ..Default::default()
        },
        members,
    }
}

fn open_seeded(snap: TeamSnapshot, seed: u64) -> (Engine, Arc<InMemorySync>) {
    let sync = Arc::new(InMemorySync::new());
    sync.insert_team("t", snap.doc.clone(), snap.members.clone());
    let engine = Engine::from_snapshot("t", snap, sync.clone(), Arc::new(NotifyHub::new())).seeded(seed);
    (engine, sync)
}

fn open(snap: TeamSnapshot) -> (Engine, Arc<InMemorySync>) {
    open_seeded(snap, 7)
}

/// Main (single), Second (single), Ushers (3 slots); two dates.
fn standard() -> (Engine, Arc<InMemorySync>) {
    open(snapshot(
        vec![Role::single(MAIN), Role::single(SECOND), Role::multiple(USHERS, 3)],
        &[D1, D2],
        vec![
            member("Alice", &[MAIN, SECOND]),
            member("Bob", &[MAIN, USHERS]),
            member("Cara", &[SECOND, USHERS]),
        ],
    ))
}

fn slots(engine: &Engine, date: &str, role: &str) -> Vec<String> {
    engine.state().roster.slots(date, role)
}

// ── Generation ───────────────────────────────────────────

#[tokio::test]
async fn generate_fills_single_eligible_member() {
    let (mut engine, _) = open(snapshot(
        vec![Role::single(MAIN)],
        &[D1],
        vec![member("Alice", &[MAIN])],
    ));
    let generated = engine.generate_for_date(D1).unwrap();
    assert_eq!(slots(&engine, D1, MAIN), vec!["Alice"]);
    assert_eq!(generated, Generated { filled: 1, unfilled: 0 });
}

#[tokio::test]
async fn generate_skips_member_unavailable_that_day() {
    let (mut engine, _) = open(snapshot(
        vec![Role::single(MAIN)],
        &[D1],
        vec![away("Alice", &[MAIN], &[D1])],
    ));
    let generated = engine.generate_for_date(D1).unwrap();
    assert_eq!(engine.state().roster.cell(D1, MAIN), Some(&vec![String::new()]));
    assert_eq!(generated, Generated { filled: 0, unfilled: 1 });
}

#[tokio::test]
async fn generate_respects_date_overrides() {
    let (mut engine, _) = open(snapshot(
        vec![Role::single(MAIN)],
        &[D1],
        vec![member("Alice", &[MAIN])],
    ));
    assert!(engine.mark_unavailable(D1, "Alice").unwrap());
    engine.generate_for_date(D1).unwrap();
    assert_eq!(slots(&engine, D1, MAIN), vec![""]);
}

#[tokio::test]
async fn generate_never_double_books_when_duplicates_disallowed() {
    let names = ["Ann", "Ben", "Cat", "Dov", "Eve", "Fay"];
    let roles = [MAIN, SECOND, USHERS];
    for seed in 0..25 {
        let members = names
            .iter()
            .enumerate()
            .map(|(i, n)| if i % 4 == 0 { away(n, &roles, &[D1]) } else { member(n, &roles) })
            .collect();
        let (mut engine, _) = open_seeded(
            snapshot(
                vec![Role::single(MAIN), Role::single(SECOND), Role::multiple(USHERS, 2)],
                &[D1, D2],
                members,
            ),
            seed,
        );
        engine.generate_all().unwrap();

        for date in [D1, D2] {
            let placed: Vec<String> = roles
                .iter()
                .flat_map(|r| slots(&engine, date, r))
                .filter(|n| !n.is_empty())
                .collect();
            let distinct: BTreeSet<&String> = placed.iter().collect();
            assert_eq!(placed.len(), distinct.len(), "seed {seed} double-booked {date}");
            for name in &placed {
                assert!(!engine.is_member_unavailable(name, date), "seed {seed}: {name} on {date}");
            }
        }
    }
}

#[tokio::test]
async fn earlier_roles_claim_shared_members_first() {
    let (mut engine, _) = open(snapshot(
        vec![Role::single(MAIN), Role::single(SECOND)],
        &[D1],
        vec![member("Alice", &[MAIN, SECOND])],
    ));
    engine.generate_for_date(D1).unwrap();
    assert_eq!(slots(&engine, D1, MAIN), vec!["Alice"]);
    assert_eq!(slots(&engine, D1, SECOND), vec![""]);
}

#[tokio::test]
async fn allow_duplicates_lets_one_member_fill_several_roles() {
    let (mut engine, _) = open(snapshot(
        vec![Role::single(MAIN), Role::single(SECOND)],
        &[D1],
        vec![member("Alice", &[MAIN, SECOND])],
    ));
    engine.set_allow_duplicates(true).unwrap();
    engine.generate_for_date(D1).unwrap();
    assert_eq!(slots(&engine, D1, MAIN), vec!["Alice"]);
    assert_eq!(slots(&engine, D1, SECOND), vec!["Alice"]);
}

#[tokio::test]
async fn partial_fill_is_not_an_error() {
    let (mut engine, _) = open(snapshot(
        vec![Role::multiple(USHERS, 3)],
        &[D1],
        vec![member("Bob", &[USHERS]), member("Cara", &[USHERS])],
    ));
    let generated = engine.generate_for_date(D1).unwrap();
    let mut cell = slots(&engine, D1, USHERS);
    cell.sort();
    assert_eq!(cell, vec!["Bob", "Cara"]);
    assert_eq!(generated, Generated { filled: 2, unfilled: 1 });
}

#[tokio::test]
async fn generate_overwrites_existing_cells() {
    let (mut engine, _) = standard();
    engine.assign(D1, MAIN, 0, "Guest").unwrap();
    engine.generate_for_date(D1).unwrap();
    assert_ne!(slots(&engine, D1, MAIN), vec!["Guest"]);
}

#[tokio::test]
async fn generate_unknown_date_rejected() {
    let (mut engine, _) = standard();
    assert_eq!(
        engine.generate_for_date("2030-01-01"),
        Err(EngineError::UnknownDate("2030-01-01".into()))
    );
}

#[tokio::test]
async fn generate_all_records_each_date() {
    let (mut engine, _) = standard();
    let before = engine.history_len();
    let generated = engine.generate_all().unwrap();
    assert_eq!(engine.history_len(), before + 2);
    assert!(generated.filled > 0);
    assert!(engine.state().roster.row(D1).is_some());
    assert!(engine.state().roster.row(D2).is_some());

    // Undo walks back one date at a time, last date first.
    engine.undo().unwrap();
    assert!(engine.state().roster.row(D1).is_some());
    assert!(engine.state().roster.row(D2).is_none());
    engine.undo().unwrap();
    assert!(engine.state().roster.is_empty());
    assert_eq!(engine.undo(), Err(EngineError::NoOp));
}

#[tokio::test]
async fn oversized_loaded_count_stays_within_cell_limit() {
    let ushers: Role =
        serde_json::from_str(r#"{"name": "Ushers", "isMultiple": true, "count": 40}"#).unwrap();
    let members: Vec<Member> = (0..40).map(|i| member(&format!("U{i}"), &[USHERS])).collect();
    let (mut engine, _) = open(snapshot(vec![ushers], &[D1], members));

    let generated = engine.generate_for_date(D1).unwrap();
    assert_eq!(generated.filled, MAX_ROLE_COUNT as usize);
    assert_eq!(slots(&engine, D1, USHERS).len(), MAX_ROLE_COUNT as usize);
    assert!(engine.state().slot_invariants_hold());
}

#[tokio::test]
async fn same_seed_same_roster() {
    let (mut a, _) = standard();
    let (mut b, _) = standard();
    a.generate_all().unwrap();
    b.generate_all().unwrap();
    assert_eq!(a.state().roster, b.state().roster);
}

// ── Assign / unassign ────────────────────────────────────

#[tokio::test]
async fn clearing_single_slot_keeps_placeholder() {
    let (mut engine, _) = standard();
    engine.assign(D1, MAIN, 0, "Bob").unwrap();
    engine.assign(D1, MAIN, 0, "").unwrap();
    assert_eq!(engine.state().roster.cell(D1, MAIN), Some(&vec![String::new()]));
}

#[tokio::test]
async fn single_slot_role_accepts_only_index_zero() {
    let (mut engine, _) = standard();
    assert_eq!(
        engine.assign(D1, MAIN, 1, "Bob"),
        Err(EngineError::InvalidSlot {
            date: D1.into(),
            role: MAIN.into(),
            index: 1
        })
    );
}

#[tokio::test]
async fn multiple_role_appends_and_compacts() {
    let (mut engine, _) = standard();
    engine.assign(D1, USHERS, 0, "Bob").unwrap();
    engine.assign(D1, USHERS, 1, "Cara").unwrap();
    assert_eq!(slots(&engine, D1, USHERS), vec!["Bob", "Cara"]);

    engine.assign(D1, USHERS, 0, "").unwrap();
    assert_eq!(slots(&engine, D1, USHERS), vec!["Cara"]);

    engine.assign(D1, USHERS, 0, "").unwrap();
    assert_eq!(engine.state().roster.cell(D1, USHERS), Some(&vec![String::new()]));

    assert!(matches!(
        engine.assign(D1, USHERS, 5, "Bob"),
        Err(EngineError::InvalidSlot { index: 5, .. })
    ));
}

#[tokio::test]
async fn blank_append_records_nothing() {
    let (mut engine, _) = standard();
    engine.assign(D1, USHERS, 0, "Bob").unwrap();
    engine.flush().await.unwrap();
    let history = engine.history_len();

    assert_eq!(engine.assign(D1, USHERS, 1, "  "), Ok(Vec::new()));
    assert_eq!(engine.history_len(), history);
    assert!(!engine.has_pending_writes());
    assert_eq!(slots(&engine, D1, USHERS), vec!["Bob"]);
}

#[tokio::test]
async fn assign_trims_and_accepts_custom_names() {
    let (mut engine, _) = standard();
    let warnings = engine.assign(D1, MAIN, 0, "  Guest Speaker ").unwrap();
    assert!(warnings.is_empty());
    assert_eq!(slots(&engine, D1, MAIN), vec!["Guest Speaker"]);
}

#[tokio::test]
async fn assign_reports_conflicts_but_writes() {
    let (mut engine, _) = open(snapshot(
        vec![Role::single(MAIN), Role::single(SECOND)],
        &[D1],
        vec![away("Alice", &[MAIN, SECOND], &[D1])],
    ));
    let warnings = engine.assign(D1, MAIN, 0, "Alice").unwrap();
    assert_eq!(
        warnings,
        vec![ConflictWarning::Unavailable {
            name: "Alice".into(),
            date: D1.into()
        }]
    );
    assert_eq!(slots(&engine, D1, MAIN), vec!["Alice"]);

    let warnings = engine.assign(D1, SECOND, 0, "Alice").unwrap();
    assert_eq!(warnings.len(), 2);
    assert_eq!(
        warnings[1],
        ConflictWarning::AssignedElsewhere {
            name: "Alice".into(),
            date: D1.into(),
            roles: vec![MAIN.into()]
        }
    );
    assert_eq!(slots(&engine, D1, SECOND), vec!["Alice"]);

    engine.set_allow_duplicates(true).unwrap();
    let warnings = engine.assign(D1, SECOND, 0, "Alice").unwrap();
    assert_eq!(warnings.len(), 1);
}

#[tokio::test]
async fn rejected_assign_changes_nothing() {
    let (mut engine, _) = standard();
    engine.assign(D1, MAIN, 0, "Bob").unwrap();
    let roster = engine.state().roster.clone();
    let history = engine.history_len();

    assert_eq!(
        engine.assign(D1, "Drums", 0, "Bob"),
        Err(EngineError::UnknownRole("Drums".into()))
    );
    assert_eq!(
        engine.assign("2030-01-01", MAIN, 0, "Bob"),
        Err(EngineError::UnknownDate("2030-01-01".into()))
    );
    let long = "x".repeat(MAX_NAME_LEN + 1);
    assert!(matches!(
        engine.assign(D1, MAIN, 0, &long),
        Err(EngineError::LimitExceeded(_))
    ));

    assert_eq!(engine.state().roster, roster);
    assert_eq!(engine.history_len(), history);
}

#[tokio::test]
async fn unassign_removes_or_clears() {
    let (mut engine, _) = standard();
    engine.assign(D1, USHERS, 0, "Bob").unwrap();
    engine.assign(D1, USHERS, 1, "Cara").unwrap();
    engine.unassign(D1, USHERS, 0).unwrap();
    assert_eq!(slots(&engine, D1, USHERS), vec!["Cara"]);
    engine.unassign(D1, USHERS, 0).unwrap();
    assert_eq!(slots(&engine, D1, USHERS), vec![""]);

    engine.assign(D1, MAIN, 0, "Bob").unwrap();
    engine.unassign(D1, MAIN, 0).unwrap();
    assert_eq!(engine.state().roster.cell(D1, MAIN), Some(&vec![String::new()]));

    assert!(matches!(
        engine.unassign(D1, MAIN, 1),
        Err(EngineError::InvalidSlot { index: 1, .. })
    ));
}

#[tokio::test]
async fn add_slot_grows_multiple_roles_only() {
    let (mut engine, _) = standard();
    engine.assign(D1, USHERS, 0, "Bob").unwrap();
    engine.assign(D1, USHERS, 1, "Cara").unwrap();
    engine.assign(D1, USHERS, 2, "Alice").unwrap();
    assert_eq!(engine.add_slot(D1, USHERS).unwrap(), 3);
    assert_eq!(slots(&engine, D1, USHERS), vec!["Bob", "Cara", "Alice", ""]);
    assert!(engine.state().slot_invariants_hold());

    assert_eq!(
        engine.add_slot(D1, MAIN),
        Err(EngineError::InvalidSlot {
            date: D1.into(),
            role: MAIN.into(),
            index: 1
        })
    );
}

#[tokio::test]
async fn add_slot_stops_at_cell_limit() {
    let (mut engine, _) = standard();
    for _ in 1..MAX_SLOTS_PER_CELL {
        engine.add_slot(D2, USHERS).unwrap();
    }
    assert_eq!(slots(&engine, D2, USHERS).len(), MAX_SLOTS_PER_CELL);
    assert!(matches!(
        engine.add_slot(D2, USHERS),
        Err(EngineError::LimitExceeded(_))
    ));
}

// ── Move ─────────────────────────────────────────────────

#[tokio::test]
async fn move_onto_occupied_single_slot_swaps() {
    let (mut engine, _) = standard();
    engine.assign(D1, MAIN, 0, "Alice").unwrap();
    engine.assign(D2, MAIN, 0, "Bob").unwrap();
    assert!(engine.move_slot(D1, MAIN, 0, D2, MAIN).unwrap());
    assert_eq!(slots(&engine, D2, MAIN), vec!["Alice"]);
    assert_eq!(slots(&engine, D1, MAIN), vec!["Bob"]);
}

#[tokio::test]
async fn move_onto_empty_single_slot_vacates_source() {
    let (mut engine, _) = standard();
    engine.assign(D1, MAIN, 0, "Alice").unwrap();
    assert!(engine.move_slot(D1, MAIN, 0, D1, SECOND).unwrap());
    assert_eq!(slots(&engine, D1, SECOND), vec!["Alice"]);
    assert_eq!(slots(&engine, D1, MAIN), vec![""]);
}

#[tokio::test]
async fn move_into_multiple_role_appends() {
    let (mut engine, _) = standard();
    engine.assign(D1, USHERS, 0, "Cara").unwrap();
    engine.assign(D1, MAIN, 0, "Bob").unwrap();
    assert!(engine.move_slot(D1, MAIN, 0, D1, USHERS).unwrap());
    assert_eq!(slots(&engine, D1, USHERS), vec!["Cara", "Bob"]);
    assert_eq!(slots(&engine, D1, MAIN), vec![""]);

    assert!(engine.move_slot(D1, USHERS, 0, D2, USHERS).unwrap());
    assert_eq!(slots(&engine, D2, USHERS), vec!["Cara"]);
    assert_eq!(slots(&engine, D1, USHERS), vec!["Bob"]);
}

#[tokio::test]
async fn move_noops_record_nothing() {
    let (mut engine, _) = standard();
    engine.assign(D1, MAIN, 0, "Alice").unwrap();
    let history = engine.history_len();
    assert!(!engine.move_slot(D1, MAIN, 0, D1, MAIN).unwrap());
    assert!(!engine.move_slot(D2, MAIN, 0, D1, SECOND).unwrap());
    assert_eq!(engine.history_len(), history);
    assert!(matches!(
        engine.move_slot(D1, MAIN, 3, D2, MAIN),
        Err(EngineError::InvalidSlot { index: 3, .. })
    ));
}

#[tokio::test]
async fn move_does_not_check_eligibility() {
    let (mut engine, _) = open(snapshot(
        vec![Role::single(MAIN)],
        &[D1, D2],
        vec![away("Alice", &[MAIN], &[D2])],
    ));
    engine.assign(D1, MAIN, 0, "Alice").unwrap();
    assert!(engine.move_slot(D1, MAIN, 0, D2, MAIN).unwrap());
    assert_eq!(slots(&engine, D2, MAIN), vec!["Alice"]);

    let conflicts = engine.conflicts_on(D2);
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].role, MAIN);
    assert!(matches!(conflicts[0].warning, ConflictWarning::Unavailable { .. }));
}

// ── History ──────────────────────────────────────────────

#[tokio::test]
async fn first_undo_after_open_is_noop() {
    let (mut engine, _) = standard();
    assert!(!engine.can_undo());
    assert_eq!(engine.undo(), Err(EngineError::NoOp));
    assert_eq!(engine.redo(), Err(EngineError::NoOp));
}

#[tokio::test]
async fn undo_redo_walks_roster_snapshots() {
    let (mut engine, _) = standard();
    engine.assign(D1, MAIN, 0, "Alice").unwrap();
    engine.assign(D1, MAIN, 0, "Bob").unwrap();

    engine.undo().unwrap();
    assert_eq!(slots(&engine, D1, MAIN), vec!["Alice"]);
    assert!(engine.can_redo());
    engine.redo().unwrap();
    assert_eq!(slots(&engine, D1, MAIN), vec!["Bob"]);

    engine.undo().unwrap();
    let before = engine.state().roster.clone();
    engine.redo().unwrap();
    engine.undo().unwrap();
    assert_eq!(engine.state().roster, before);
}

#[tokio::test]
async fn new_mutation_after_undo_discards_redo() {
    let (mut engine, _) = standard();
    engine.assign(D1, MAIN, 0, "Alice").unwrap();
    engine.undo().unwrap();
    engine.assign(D1, MAIN, 0, "Bob").unwrap();
    assert!(!engine.can_redo());
    assert_eq!(engine.redo(), Err(EngineError::NoOp));
}

#[tokio::test]
async fn history_keeps_last_twenty_snapshots() {
    let (mut engine, _) = standard();
    for i in 0..25 {
        engine.assign(D1, MAIN, 0, &format!("P{i}")).unwrap();
    }
    assert_eq!(engine.history_len(), HISTORY_CAPACITY);
    for _ in 0..HISTORY_CAPACITY - 1 {
        engine.undo().unwrap();
    }
    assert_eq!(slots(&engine, D1, MAIN), vec!["P5"]);
    assert_eq!(engine.undo(), Err(EngineError::NoOp));
}

#[tokio::test]
async fn history_only_covers_the_roster() {
    let (mut engine, _) = standard();
    engine.assign(D1, MAIN, 0, "Alice").unwrap();
    engine.set_allow_duplicates(true).unwrap();
    engine.undo().unwrap();
    assert!(engine.state().settings.allow_duplicates);
    assert_eq!(slots(&engine, D1, MAIN), vec![""]);
}

#[tokio::test]
async fn clear_roster_can_be_undone() {
    let (mut engine, _) = standard();
    engine.generate_all().unwrap();
    let generated = engine.state().roster.clone();
    engine.clear_roster().unwrap();
    assert!(engine.state().roster.is_empty());
    engine.undo().unwrap();
    assert_eq!(engine.state().roster, generated);
}

// ── Roles and dates ──────────────────────────────────────

#[tokio::test]
async fn delete_role_cascades() {
    let (mut engine, sync) = standard();
    engine.assign(D1, MAIN, 0, "Alice").unwrap();
    engine.assign(D1, SECOND, 0, "Cara").unwrap();
    engine.assign(D2, SECOND, 0, "Alice").unwrap();

    engine.delete_role(SECOND).unwrap();
    assert!(engine.state().role(SECOND).is_none());
    assert!(engine.state().roster.cell(D1, SECOND).is_none());
    assert!(engine.state().roster.cell(D2, SECOND).is_none());
    let alice = engine.state().member_named("Alice").unwrap();
    assert_eq!(alice.roles, vec![MAIN.to_string()]);

    // Older snapshots never bring the column back.
    engine.undo().unwrap();
    assert!(engine.state().roster.cell(D2, SECOND).is_none());
    assert_eq!(slots(&engine, D1, MAIN), vec!["Alice"]);

    engine.flush().await.unwrap();
    assert_eq!(sync.team_doc("t").unwrap().roles.len(), 2);
    let stored: Vec<Member> = sync.team_members("t");
    let cara = stored.iter().find(|m| m.name == "Cara").unwrap();
    assert_eq!(cara.roles, vec![USHERS.to_string()]);
}

#[tokio::test]
async fn delete_date_cascades() {
    let (mut engine, _) = standard();
    engine.assign(D1, MAIN, 0, "Alice").unwrap();
    engine.delete_date(D1).unwrap();
    assert!(engine.state().roster.row(D1).is_none());
    assert!(!engine.state().has_date(D1));

    engine.undo().unwrap();
    assert!(engine.state().roster.row(D1).is_none());
    assert_eq!(engine.delete_date(D1), Err(EngineError::UnknownDate(D1.into())));
}

#[tokio::test]
async fn add_role_validates_names() {
    let (mut engine, _) = standard();
    engine.add_role("  Lighting ").unwrap();
    assert_eq!(engine.state().roles.last(), Some(&Role::single("Lighting")));
    assert_eq!(engine.add_role(MAIN), Err(EngineError::DuplicateRole(MAIN.into())));
    assert_eq!(engine.add_role("   "), Err(EngineError::EmptyName));
}

#[tokio::test]
async fn add_date_validates_and_normalizes() {
    let (mut engine, _) = standard();
    let key = engine.add_date(" 2024-03-31 ", Some("  Easter ")).unwrap();
    assert_eq!(key, "2024-03-31");
    let slot = engine.state().dates.last().unwrap();
    assert_eq!(slot.event.as_deref(), Some("Easter"));

    assert_eq!(engine.add_date(D1, None), Err(EngineError::DuplicateDate(D1.into())));
    assert!(matches!(engine.add_date("07/01/2024", None), Err(EngineError::InvalidDate(_))));
    assert!(matches!(engine.add_date("2024-02-30", None), Err(EngineError::InvalidDate(_))));
}

#[tokio::test]
async fn switching_to_single_slot_collapses_cells() {
    let (mut engine, _) = standard();
    engine.assign(D1, USHERS, 0, "Bob").unwrap();
    engine.assign(D1, USHERS, 1, "Cara").unwrap();
    let history = engine.history_len();

    engine.set_role_capacity(USHERS, false, 5).unwrap();
    assert_eq!(engine.state().role(USHERS), Some(&Role::single(USHERS)));
    assert_eq!(slots(&engine, D1, USHERS), vec!["Bob"]);
    assert_eq!(engine.history_len(), history + 1);

    engine.set_role_capacity(MAIN, true, 2).unwrap();
    assert_eq!(engine.state().role(MAIN), Some(&Role::multiple(MAIN, 2)));
    assert_eq!(engine.history_len(), history + 1);

    assert_eq!(engine.set_role_capacity(MAIN, true, 0), Err(EngineError::InvalidRoleCount(0)));
    assert_eq!(
        engine.set_role_capacity(MAIN, true, MAX_ROLE_COUNT + 1),
        Err(EngineError::InvalidRoleCount(MAX_ROLE_COUNT + 1))
    );
}

#[tokio::test]
async fn rename_role_moves_column_and_member_refs() {
    let (mut engine, _) = standard();
    engine.assign(D1, MAIN, 0, "Alice").unwrap();
    engine.rename_role(MAIN, "Camera 1").unwrap();

    assert_eq!(slots(&engine, D1, "Camera 1"), vec!["Alice"]);
    assert!(engine.state().roster.cell(D1, MAIN).is_none());
    assert!(engine.state().member_named("Alice").unwrap().has_role("Camera 1"));
    assert_eq!(engine.rename_role("Camera 1", SECOND), Err(EngineError::DuplicateRole(SECOND.into())));
    assert_eq!(engine.rename_role("Drums", "Bass"), Err(EngineError::UnknownRole("Drums".into())));
}

#[tokio::test]
async fn reorder_role_moves_and_clamps() {
    let (mut engine, _) = standard();
    engine.reorder_role(USHERS, 0).unwrap();
    let order: Vec<&str> = engine.state().roles.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(order, [USHERS, MAIN, SECOND]);

    engine.reorder_role(USHERS, 99).unwrap();
    let order: Vec<&str> = engine.state().roles.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(order, [MAIN, SECOND, USHERS]);
}

// ── Unavailability ───────────────────────────────────────

#[tokio::test]
async fn overrides_and_member_dates_count_once() {
    let (mut engine, _) = open(snapshot(
        vec![Role::single(MAIN)],
        &[D1],
        vec![away("Alice", &[MAIN], &[D1]), member("Bob", &[MAIN])],
    ));
    assert_eq!(engine.unavailable_count(D1), 1);
    assert!(engine.mark_unavailable(D1, "Bob").unwrap());
    assert!(!engine.mark_unavailable(D1, "Bob").unwrap());
    assert!(engine.mark_unavailable(D1, "Alice").unwrap());
    assert_eq!(engine.unavailable_count(D1), 2);

    assert!(engine.clear_unavailable(D1, "Bob").unwrap());
    assert!(!engine.clear_unavailable(D1, "Bob").unwrap());
    assert_eq!(engine.unavailable_count(D1), 1);
    assert!(matches!(
        engine.mark_unavailable("2030-01-01", "Bob"),
        Err(EngineError::UnknownDate(_))
    ));
}

#[tokio::test]
async fn member_dates_are_validated_and_saved() {
    let (mut engine, sync) = standard();
    engine.set_member_unavailable_dates("Bob", [D2]).unwrap();
    assert!(engine.is_member_unavailable("Bob", D2));
    assert!(!engine.is_member_unavailable("Bob", D1));

    assert!(matches!(
        engine.set_member_unavailable_dates("Bob", ["soon"]),
        Err(EngineError::InvalidDate(_))
    ));
    assert_eq!(
        engine.set_member_unavailable_dates("Zed", [D1]),
        Err(EngineError::UnknownMember("Zed".into()))
    );

    engine.flush().await.unwrap();
    let bob = sync.team_members("t").into_iter().find(|m| m.name == "Bob").unwrap();
    assert!(bob.unavailable_dates.contains(D2));
}

// ── Views ────────────────────────────────────────────────

#[tokio::test]
async fn cell_view_flags_slots_and_candidates() {
    let (mut engine, _) = open(snapshot(
        vec![Role::single(MAIN), Role::single(SECOND)],
        &[D1],
        vec![
            member("Alice", &[MAIN]),
            away("Bob", &[MAIN], &[D1]),
            member("Cara", &[MAIN, SECOND]),
        ],
    ));
    engine.assign(D1, SECOND, 0, "Cara").unwrap();
    engine.assign(D1, MAIN, 0, "Guest").unwrap();

    let view = engine.cell_view(D1, MAIN).unwrap();
    assert_eq!(
        view.slots,
        vec![SlotView {
            name: "Guest".into(),
            unavailable: false,
            custom: true,
            busy: false
        }]
    );
    assert_eq!(view.candidates.names, vec!["Alice", "Cara", "Guest"]);
    assert!(view.candidates.is_busy("Cara", ""));
    assert!(!view.candidates.is_busy("Alice", ""));

    engine.assign(D1, MAIN, 0, "Bob").unwrap();
    let view = engine.cell_view(D1, MAIN).unwrap();
    assert!(view.slots[0].unavailable);
    assert!(!view.slots[0].custom);
    assert!(view.candidates.names.contains(&"Bob".to_string()));

    assert!(matches!(engine.cell_view(D1, "Drums"), Err(EngineError::UnknownRole(_))));
}

#[tokio::test]
async fn assignments_for_lists_every_slot() {
    let (mut engine, _) = standard();
    engine.assign(D1, MAIN, 0, "Bob").unwrap();
    engine.assign(D2, USHERS, 0, "Cara").unwrap();
    engine.assign(D2, USHERS, 1, "Bob").unwrap();

    let found = engine.assignments_for("Bob");
    assert_eq!(
        found,
        vec![
            Assignment {
                date: D1.into(),
                role: MAIN.into(),
                index: 0
            },
            Assignment {
                date: D2.into(),
                role: USHERS.into(),
                index: 1
            },
        ]
    );
    assert!(engine.assignments_for("Nobody").is_empty());
}

#[tokio::test]
async fn table_is_role_major() {
    let (mut engine, _) = standard();
    engine.assign(D2, MAIN, 0, "Bob").unwrap();
    let table = engine.table();
    assert_eq!(table.rows.len(), 3);
    assert_eq!(table.rows[0].role, MAIN);
    assert_eq!(table.rows[0].cells[1], vec!["Bob".to_string()]);
}

// ── Persistence ──────────────────────────────────────────

#[tokio::test]
async fn flush_lands_roster_in_collaborator() {
    let (mut engine, sync) = standard();
    engine.generate_all().unwrap();
    engine.set_allow_duplicates(true).unwrap();
    engine.flush().await.unwrap();

    let doc = sync.team_doc("t").unwrap();
    assert_eq!(doc.roster, engine.state().roster);
    assert!(doc.settings.allow_duplicates);
    assert!(!engine.has_pending_writes());
}

#[tokio::test]
async fn failed_save_is_reported_and_retryable() {
    let (mut engine, sync) = standard();
    let mut events = engine.notify.subscribe("t");
    sync.fail_next_writes(1);

    engine.assign(D1, MAIN, 0, "Alice").unwrap();
    assert!(matches!(engine.flush().await, Err(EngineError::Persistence(_))));
    // Local state stays the source of truth.
    assert_eq!(slots(&engine, D1, MAIN), vec!["Alice"]);
    assert!(sync.team_doc("t").unwrap().roster.is_empty());

    let failed = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if let Ok(RosterEvent::PersistFailed { reason, .. }) = events.recv().await {
                return reason;
            }
        }
    })
    .await
    .unwrap();
    assert!(failed.contains("injected"));

    // Reported once; the retry is explicit.
    engine.flush().await.unwrap();
    assert!(sync.team_doc("t").unwrap().roster.is_empty());
    engine.persist_all();
    engine.flush().await.unwrap();
    assert_eq!(sync.team_doc("t").unwrap().roster, engine.state().roster);
}

#[tokio::test]
async fn closed_session_rejects_mutations() {
    let (mut engine, _) = standard();
    engine.close();
    let no_session = Err(EngineError::NoSession("t".into()));
    assert_eq!(engine.assign(D1, MAIN, 0, "Alice").map(|_| ()), no_session);
    assert_eq!(engine.generate_all().map(|_| ()), no_session);
    assert_eq!(engine.clear_roster(), no_session);
    assert_eq!(engine.undo(), no_session);
    assert_eq!(engine.add_role("Lighting"), no_session);
    // Reads keep working.
    assert!(engine.cell_view(D1, MAIN).is_ok());
}

// ── Realtime ─────────────────────────────────────────────

#[tokio::test]
async fn remote_doc_replaces_everything_without_history() {
    let (mut engine, _) = standard();
    engine.assign(D1, MAIN, 0, "Alice").unwrap();
    engine.flush().await.unwrap();
    let history = engine.history_len();

    let mut doc = engine.state().to_doc();
    doc.roles.retain(|r| r.name != SECOND);
    doc.roster = Roster::new();
    doc.roster.set_cell(D2, MAIN, vec!["Zed".into()]);
    assert!(engine.apply_remote(doc.clone()));

    assert_eq!(engine.state().roster, doc.roster);
    assert_eq!(engine.history_len(), history);
    let alice = engine.state().member_named("Alice").unwrap();
    assert_eq!(alice.roles, vec![MAIN.to_string()]);

    // Same document again is an echo.
    assert!(!engine.apply_remote(doc));
}

#[tokio::test]
async fn remote_doc_waits_for_local_saves() {
    let (mut engine, _) = standard();
    engine.assign(D1, MAIN, 0, "Alice").unwrap();
    // The writer has not run yet on this single-threaded runtime.
    let stale = TeamDoc {
        roles: engine.state().roles.clone(),
        dates: engine.state().dates.clone(),
        ..Default::default()
    };
    assert!(!engine.apply_remote(stale.clone()));
    assert_eq!(slots(&engine, D1, MAIN), vec!["Alice"]);

    engine.flush().await.unwrap();
    tokio::time::timeout(Duration::from_secs(1), engine.settled().notified())
        .await
        .expect("writer never settled");
    assert!(engine.apply_deferred(None));
    assert_eq!(slots(&engine, D1, MAIN), vec![""]);
    assert!(!engine.apply_deferred(None));
}

#[tokio::test]
async fn newer_push_supersedes_deferred_doc() {
    let (mut engine, _) = standard();
    engine.assign(D1, MAIN, 0, "Alice").unwrap();
    let mut first = engine.state().to_doc();
    first.settings.allow_duplicates = true;
    assert!(!engine.apply_remote(first));

    engine.flush().await.unwrap();
    let mut newer = engine.state().to_doc();
    newer.roles.push(Role::single("Drums"));
    assert!(engine.apply_deferred(Some(newer)));
    assert!(engine.state().role("Drums").is_some());
    assert!(!engine.state().settings.allow_duplicates);
}

#[tokio::test]
async fn remote_members_replace_list() {
    let (mut engine, _) = standard();
    engine.apply_members(vec![member("Dan", &[MAIN, "Drums"])]);
    assert_eq!(engine.state().team_members.len(), 1);
    assert_eq!(engine.state().team_members[0].roles, vec![MAIN.to_string()]);
}

// ── Members ──────────────────────────────────────────────

#[tokio::test]
async fn member_crud_goes_through_collaborator() {
    let (mut engine, sync) = standard();
    let id = engine.add_member(Member::new(" Dan ", &[MAIN, "Drums"])).await.unwrap();
    let dan = engine.state().member_named("Dan").unwrap().clone();
    assert_eq!(dan.id, id);
    assert_eq!(dan.roles, vec![MAIN.to_string()]);
    assert!(sync.team_members("t").iter().any(|m| m.id == id));

    let mut updated = dan.clone();
    updated.notes = "evenings only".into();
    engine.update_member(updated).await.unwrap();
    assert_eq!(engine.state().member_named("Dan").unwrap().notes, "evenings only");

    engine.assign(D1, MAIN, 0, "Dan").unwrap();
    engine.delete_member(&id).await.unwrap();
    assert!(engine.state().member_named("Dan").is_none());
    // The roster keeps the name; it now reads as a custom entry.
    assert_eq!(slots(&engine, D1, MAIN), vec!["Dan"]);
    assert!(engine.cell_view(D1, MAIN).unwrap().slots[0].custom);

    assert_eq!(
        engine.delete_member(&id).await,
        Err(EngineError::UnknownMember(id.clone()))
    );
    assert_eq!(
        engine.add_member(Member::new("  ", &[])).await,
        Err(EngineError::EmptyName)
    );
}

// ── Invariants under random operation sequences ──────────

#[tokio::test]
async fn random_operations_keep_slot_invariants() {
    let names = ["Alice", "Bob", "Cara", "Guest", ""];
    let roles = [MAIN, SECOND, USHERS];
    let dates = [D1, D2];
    let (mut engine, _) = standard();
    let mut rng = StdRng::seed_from_u64(2024);

    for step in 0..500 {
        let date = dates[rng.random_range(0..dates.len())];
        let role = roles[rng.random_range(0..roles.len())];
        let index = rng.random_range(0..4);
        let _ = match rng.random_range(0..8) {
            0 => engine
                .assign(date, role, index, names[rng.random_range(0..names.len())])
                .map(|_| ()),
            1 => engine.unassign(date, role, index),
            2 => engine.add_slot(date, role).map(|_| ()),
            3 => {
                let dest_role = roles[rng.random_range(0..roles.len())];
                let dest_date = dates[rng.random_range(0..dates.len())];
                engine.move_slot(date, role, index, dest_date, dest_role).map(|_| ())
            }
            4 => engine.generate_for_date(date).map(|_| ()),
            5 => engine.undo(),
            6 => engine.redo(),
            _ => engine.set_allow_duplicates(rng.random_bool(0.5)),
        };

        assert!(engine.state().slot_invariants_hold(), "step {step}");
        for date in dates {
            for role in [MAIN, SECOND] {
                assert!(slots(&engine, date, role).len() <= 1, "step {step}");
            }
        }
        assert!(engine.history_len() <= HISTORY_CAPACITY);
    }
}
