use super::*;
use crate::state::AreaKind;
use crate::state::test_helpers::{guest, rect_area, round_table};

fn named(id: &str, name: &str, capacity: u32) -> Table {
    let mut t = round_table(id, 200.0, 200.0, capacity);
    t.name = name.to_string();
    t
}

fn conflict(kind: ConflictKind, table_id: &str) -> Conflict {
    Conflict { kind, table_id: table_id.into(), message: "m".into(), overflow: None }
}

#[test]
fn table_meta_counts_seated_parties() {
    let tables = vec![named("T1", "Rose", 8), named("T2", "Lily", 8)];
    let mut a = guest("a", Some("Rose"), 2);
    a.group = Some("Work".into());
    let mut b = guest("b", Some("T1"), 0);
    b.group = Some(" work ".into());
    let metas = table_meta(&tables, &[a, b, guest("c", None, 0)], &[]);

    assert_eq!(metas[0].seated, 4);
    assert_eq!(metas[0].groups.get("work"), Some(&2));
    assert_eq!(metas[0].free(), 4);
    assert_eq!(metas[1].seated, 0);
}

#[test]
fn unbounded_table_reports_sentinel_free() {
    let metas = table_meta(&[named("T", "Open", 0)], &[], &[]);
    assert_eq!(metas[0].free(), UNBOUNDED_FREE);
}

#[test]
fn party_that_does_not_fit_is_excluded() {
    let metas = table_meta(&[named("T", "Small", 2)], &[], &[]);
    assert!(score(&guest("g", None, 2), &metas[0]).is_none());
    assert!(score(&guest("g", None, 1), &metas[0]).is_some());
}

#[test]
fn exact_fit_scores_highest_capacity_bonus() {
    let metas = table_meta(&[named("T", "Four", 4)], &[], &[]);
    let s = score(&guest("g", None, 3), &metas[0]).unwrap();
    // 28 for zero remaining seats plus the exact-fit bonus.
    assert_eq!(s.score, 33);
    assert_eq!(s.free, 4);
}

#[test]
fn capacity_fit_decays_with_slack() {
    let metas = table_meta(&[named("T", "Ten", 10)], &[], &[]);
    // 9 seats left after a solo guest: max(0, 28 - 45) = 0.
    assert_eq!(score(&guest("g", None, 0), &metas[0]).unwrap().score, 0);

    let metas = table_meta(&[named("T", "Four", 4)], &[], &[]);
    // 2 left: 28 - 10.
    assert_eq!(score(&guest("g", None, 1), &metas[0]).unwrap().score, 18);
}

#[test]
fn side_keywords_match_table_names() {
    assert!(side_matches("Novia", "Mesa de la novia"));
    assert!(side_matches("bride", "Novia 2"));
    assert!(side_matches("groom", "Groom's friends"));
    assert!(!side_matches("groom", "Bride family"));
    assert!(side_matches("Cousins", "cousins table"));
    assert!(!side_matches("  ", "anything"));
}

#[test]
fn affinity_bonuses_stack() {
    let tables = vec![named("T", "Bride family", 0)];
    let mut seated = guest("s", Some("T"), 0);
    seated.group = Some("college".into());
    seated.companion_group = Some("smiths".into());
    seated.dietary = Some("vegan".into());
    let metas = table_meta(&tables, &[seated], &[]);

    let mut g = guest("g", None, 0);
    g.side = Some("novia".into());
    g.group = Some("College".into());
    g.companion_group = Some("Smiths".into());
    g.dietary = Some("Vegan".into());
    let s = score(&g, &metas[0]).unwrap();
    // open 8 + side 12 + group 5 + companions 8 + dietary 6
    assert_eq!(s.score, 39);
    assert_eq!(s.reasons.len(), 5);
}

#[test]
fn unmatched_dietary_is_penalized() {
    let metas = table_meta(&[named("T", "Open", 0)], &[], &[]);
    let mut g = guest("g", None, 0);
    g.dietary = Some("kosher".into());
    assert_eq!(score(&g, &metas[0]).unwrap().score, 2);
}

#[test]
fn vip_and_penalties() {
    let mut head = named("H", "Head", 0);
    head.vip = true;
    let mut locked = named("L", "Locked", 0);
    locked.locked = true;
    let tables = vec![head, locked, named("C", "Crowded", 0)];
    let metas = table_meta(&tables, &[], &[conflict(ConflictKind::Spacing, "C")]);

    let mut vip = guest("v", None, 0);
    vip.vip = true;
    assert_eq!(score(&vip, &metas[0]).unwrap().score, 8 + 16);
    assert_eq!(score(&vip, &metas[1]).unwrap().score, 8 + 6 - 8);
    assert_eq!(score(&vip, &metas[2]).unwrap().score, 8 + 6 - 14);
}

#[test]
fn guest_already_seated_is_scored_without_self() {
    let tables = vec![named("T", "Four", 4)];
    let seated = guest("g", Some("T"), 3);
    let metas = table_meta(&tables, std::slice::from_ref(&seated), &[]);
    // Full with the guest; scored as if the seats were free again.
    assert_eq!(score(&seated, &metas[0]).unwrap().score, 33);
}

#[test]
fn overbooked_own_table_is_penalized_not_excluded() {
    let tables = vec![named("T", "Four", 4)];
    let seated = guest("g", Some("T"), 1);
    let others: Vec<Guest> = (0..4).map(|i| guest(&format!("o{i}"), Some("T"), 0)).collect();
    let mut roster = others.clone();
    roster.push(seated.clone());
    let metas = table_meta(&tables, &roster, &[]);
    assert_eq!(metas[0].seated, 6);

    // No fit bonus, two seats over capacity.
    let s = score(&seated, &metas[0]).unwrap();
    assert_eq!(s.score, -36);
    assert!(s.reasons.iter().any(|r| r == "over capacity -36"));

    // A newcomer still cannot be placed there, and the negative score keeps
    // the table out of recommendations.
    assert!(score(&guest("new", None, 0), &metas[0]).is_none());
    assert!(recommend(&seated, &metas).is_empty());
}

#[test]
fn recommend_caps_at_three_and_drops_negatives() {
    let mut tables: Vec<Table> = (0..5).map(|i| named(&format!("T{i}"), &format!("Table {i}"), 4)).collect();
    tables[4].locked = true;
    let metas = table_meta(&tables, &[], &[conflict(ConflictKind::Obstacle, "T4")]);

    let recs = recommend(&guest("g", None, 0), &metas);
    assert_eq!(recs.len(), 3);
    // Equal scores keep table order.
    let ids: Vec<&str> = recs.iter().map(|r| r.table_id.as_str()).collect();
    assert_eq!(ids, vec!["T0", "T1", "T2"]);
    assert!(recs.iter().all(|r| r.score >= 0));
}

#[test]
fn recommend_orders_by_score() {
    let tables = vec![named("big", "Big", 10), named("snug", "Snug", 2)];
    let metas = table_meta(&tables, &[], &[]);
    let recs = recommend(&guest("g", None, 1), &metas);
    assert_eq!(recs[0].table_id, "snug");
}

#[test]
fn overbooking_fix_moves_non_vips_until_overflow_cleared() {
    let tables = vec![named("T1", "Full", 3), named("T2", "Spare", 2), named("T3", "Other", 2)];
    let mut boss = guest("boss", Some("T1"), 0);
    boss.vip = true;
    let guests = vec![boss, guest("a", Some("T1"), 0), guest("b", Some("T1"), 0), guest("c", Some("T1"), 1)];
    let conflicts = validate_overbooking(&tables, &guests);
    assert_eq!(conflicts[0].overflow, Some(2));

    let metas = table_meta(&tables, &guests, &conflicts);
    let ctx = FixContext { tables: &tables, guests: &guests, areas: &[], venue: &Venue::default() };
    let actions = suggest_fixes(&conflicts, &metas, &ctx);

    let moved: Vec<(&str, &str)> = actions
        .iter()
        .filter_map(|a| match a {
            SuggestedAction::Reassign { guest_id, to_table_id, .. } => Some((guest_id.as_str(), to_table_id.as_str())),
            _ => None,
        })
        .collect();
    // The second move sees the seat the first one already took.
    assert_eq!(moved, vec![("a", "T2"), ("b", "T2")]);
}

fn validate_overbooking(tables: &[Table], guests: &[Guest]) -> Vec<Conflict> {
    crate::services::validate::validate(tables, &[], guests, &Venue::default())
        .into_iter()
        .filter(|c| c.kind == ConflictKind::Overbooking)
        .collect()
}

#[test]
fn reassignments_respect_seats_already_proposed() {
    let tables = vec![named("T1", "Full", 1), named("T2", "One left", 1)];
    let guests = vec![guest("a", Some("T1"), 0), guest("b", Some("T1"), 0), guest("c", Some("T1"), 0)];
    let conflicts = validate_overbooking(&tables, &guests);
    let metas = table_meta(&tables, &guests, &conflicts);
    let ctx = FixContext { tables: &tables, guests: &guests, areas: &[], venue: &Venue::default() };

    let actions = suggest_fixes(&conflicts, &metas, &ctx);
    // Only one seat exists elsewhere.
    assert_eq!(actions.len(), 1);
}

#[test]
fn perimeter_fix_clamps_inside_venue() {
    let venue = Venue { width: 1000.0, height: 800.0, min_aisle: 100.0 };
    let tables = vec![round_table("T", 1200.0, -40.0, 8)];
    let ctx = FixContext { tables: &tables, guests: &[], areas: &[], venue: &venue };
    let actions = suggest_fixes(&[conflict(ConflictKind::Perimeter, "T")], &[], &ctx);

    assert_eq!(actions, vec![SuggestedAction::FixPosition { table_id: "T".into(), x: 890.0, y: 110.0 }]);
}

#[test]
fn obstacle_fix_moves_and_focuses() {
    let venue = Venue { width: 1000.0, height: 800.0, min_aisle: 100.0 };
    let areas = vec![
        rect_area("hall", AreaKind::Boundary, 0.0, 0.0, 1000.0, 800.0),
        rect_area("bar", AreaKind::Obstacle, 450.0, 350.0, 550.0, 450.0),
    ];
    let tables = vec![round_table("T", 500.0, 400.0, 8)];
    let ctx = FixContext { tables: &tables, guests: &[], areas: &areas, venue: &venue };
    let actions = suggest_fixes(&[conflict(ConflictKind::Obstacle, "T")], &[], &ctx);

    assert_eq!(actions.len(), 2);
    let SuggestedAction::FixPosition { x, y, .. } = actions[0] else {
        panic!("expected a position fix, got {:?}", actions[0]);
    };
    let mut moved = tables[0].clone();
    moved.x = x;
    moved.y = y;
    assert!(crate::services::validate::validate(&[moved], &areas, &[], &venue).is_empty());
    assert_eq!(actions[1], SuggestedAction::FocusTable { table_id: "T".into() });
}

#[test]
fn spacing_fix_clears_neighbours() {
    let venue = Venue { width: 1000.0, height: 800.0, min_aisle: 100.0 };
    let tables = vec![round_table("A", 400.0, 400.0, 8), round_table("B", 450.0, 400.0, 8)];
    let ctx = FixContext { tables: &tables, guests: &[], areas: &[], venue: &venue };

    // Nearest ring with a clear spot is 180 out, straight right.
    let spot = find_free_spot(&tables[1], &tables, &[], &venue).unwrap();
    assert_eq!(spot, Point::new(630.0, 400.0));

    let actions = suggest_fixes(
        &[conflict(ConflictKind::Spacing, "A"), conflict(ConflictKind::Spacing, "B"), conflict(ConflictKind::Spacing, "B")],
        &[],
        &ctx,
    );
    assert_eq!(actions.len(), 2);
}

#[test]
fn no_free_spot_in_tiny_venue() {
    let venue = Venue { width: 130.0, height: 130.0, min_aisle: 100.0 };
    let tables = vec![round_table("A", 65.0, 65.0, 8), round_table("B", 70.0, 65.0, 8)];
    assert!(find_free_spot(&tables[1], &tables, &[], &venue).is_none());
}

#[test]
fn actions_serialize_with_kebab_tag() {
    let json = serde_json::to_value(SuggestedAction::FixPosition { table_id: "T".into(), x: 1.0, y: 2.0 }).unwrap();
    assert_eq!(json["action"], "fix-position");
    let json = serde_json::to_value(SuggestedAction::FocusTable { table_id: "T".into() }).unwrap();
    assert_eq!(json["action"], "focus-table");
}

#[test]
fn auto_assign_tracks_occupancy_across_the_pass() {
    let tables = vec![named("T1", "Pair", 2), named("T2", "Trio", 3)];
    let seated = guest("s", Some("T2"), 0);
    let roster = vec![seated, guest("a", None, 1), guest("b", None, 0), guest("c", None, 0)];
    let metas = table_meta(&tables, &roster, &[]);

    let plan = auto_assign(&roster, &metas);
    let placed: Vec<(&str, &str)> = plan
        .assignments
        .iter()
        .map(|a| (a.guest_id.as_str(), a.table_id.as_str()))
        .collect();
    // "a" (a couple) fills one table exactly; the two solos share the other.
    assert_eq!(placed, vec![("a", "T1"), ("b", "T2"), ("c", "T2")]);
    assert!(plan.unplaced.is_empty());
}

#[test]
fn auto_assign_seats_vips_first_and_reports_leftovers() {
    let mut vip = guest("v", None, 0);
    vip.vip = true;
    let roster = vec![guest("early", None, 0), vip, guest("seated", Some("T1"), 0)];
    let metas = table_meta(&[named("T1", "Only", 2)], &roster, &[]);

    let plan = auto_assign(&roster, &metas);
    assert_eq!(plan.assignments.len(), 1);
    assert_eq!(plan.assignments[0].guest_id, "v");
    assert_eq!(plan.unplaced, vec!["early".to_string()]);
}

#[test]
fn auto_assign_falls_back_to_negative_scores() {
    let mut locked = named("L", "Locked", 0);
    locked.locked = true;
    let metas = table_meta(&[locked], &[], &[conflict(ConflictKind::Spacing, "L")]);

    let plan = auto_assign(&[guest("g", None, 0)], &metas);
    assert_eq!(plan.assignments.len(), 1);
    assert!(plan.assignments[0].score < 0);
}
