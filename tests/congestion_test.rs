//! Road status machine and notifications

use grid_traffic::simulation::{
    CongestionThresholds, CongestionTracker, EdgeKey, EdgeStatus, EventId, IdGenerator, NodeId,
    NotificationKind, SimId,
};
use proptest::prelude::*;

fn thresholds() -> CongestionThresholds {
    CongestionThresholds {
        congest: 5.0,
        clear: 2.0,
        block_seconds: 6.0,
        clear_persist_seconds: 4.0,
    }
}

fn road() -> EdgeKey {
    EdgeKey::new(NodeId(0), NodeId(1))
}

/// Runs one tick with `load` on the road and returns the notification kinds
fn step(
    tracker: &mut CongestionTracker,
    ids: &mut IdGenerator,
    now: f32,
    load: f32,
) -> Vec<NotificationKind> {
    tracker.reset_loads();
    tracker.add_load(road(), load);
    tracker
        .advance(now, ids)
        .into_iter()
        .map(|n| n.kind)
        .collect()
}

#[test]
fn test_full_lifecycle() {
    let mut tracker = CongestionTracker::new(thresholds(), [road()]);
    let mut ids = IdGenerator::new();

    assert_eq!(step(&mut tracker, &mut ids, 0.0, 5.0), vec![NotificationKind::Warn]);
    assert_eq!(tracker.status(road()), EdgeStatus::Congested);
    assert_eq!(tracker.state(road()).unwrap().congested_since, Some(0.0));

    for t in 1..6 {
        assert!(step(&mut tracker, &mut ids, t as f32, 7.0).is_empty());
        assert_eq!(tracker.status(road()), EdgeStatus::Congested);
    }

    assert_eq!(step(&mut tracker, &mut ids, 6.0, 7.0), vec![NotificationKind::Block]);
    assert_eq!(tracker.status(road()), EdgeStatus::Blocked);
    assert_eq!(tracker.state(road()).unwrap().blocked_since, Some(6.0));

    // Step-down goes to congested, never straight to normal
    assert_eq!(step(&mut tracker, &mut ids, 7.0, 0.0), vec![NotificationKind::Info]);
    assert_eq!(tracker.status(road()), EdgeStatus::Congested);

    for t in 8..11 {
        assert!(step(&mut tracker, &mut ids, t as f32, 1.0).is_empty());
        assert_eq!(tracker.status(road()), EdgeStatus::Congested);
    }

    assert_eq!(step(&mut tracker, &mut ids, 11.0, 1.0), vec![NotificationKind::Clear]);
    assert_eq!(tracker.status(road()), EdgeStatus::Normal);
}

#[test]
fn test_intermediate_load_restarts_clear_timer() {
    let mut tracker = CongestionTracker::new(thresholds(), [road()]);
    let mut ids = IdGenerator::new();

    step(&mut tracker, &mut ids, 0.0, 6.0);
    assert_eq!(tracker.status(road()), EdgeStatus::Congested);

    step(&mut tracker, &mut ids, 1.0, 1.0);
    step(&mut tracker, &mut ids, 3.0, 1.0);
    // Between the thresholds
    step(&mut tracker, &mut ids, 4.0, 3.0);
    step(&mut tracker, &mut ids, 5.0, 1.0);
    assert!(step(&mut tracker, &mut ids, 8.0, 1.0).is_empty());
    assert_eq!(tracker.status(road()), EdgeStatus::Congested);

    assert_eq!(step(&mut tracker, &mut ids, 9.0, 1.0), vec![NotificationKind::Clear]);
}

#[test]
fn test_dip_below_threshold_restarts_block_timer() {
    let mut tracker = CongestionTracker::new(thresholds(), [road()]);
    let mut ids = IdGenerator::new();

    step(&mut tracker, &mut ids, 0.0, 6.0);
    step(&mut tracker, &mut ids, 4.0, 6.0);
    step(&mut tracker, &mut ids, 5.0, 4.0);
    step(&mut tracker, &mut ids, 6.0, 6.0);
    assert!(step(&mut tracker, &mut ids, 11.0, 6.0).is_empty());
    assert_eq!(tracker.status(road()), EdgeStatus::Congested);
    assert_eq!(step(&mut tracker, &mut ids, 12.0, 6.0), vec![NotificationKind::Block]);
}

#[test]
fn test_loads_reset_and_unknown_roads_ignored() {
    let mut tracker = CongestionTracker::new(thresholds(), [road()]);
    tracker.add_load(road(), 2.5);
    tracker.add_load(EdgeKey::new(NodeId(7), NodeId(8)), 100.0);
    assert_eq!(tracker.state(road()).unwrap().load, 2.5);
    assert!(tracker.state(EdgeKey::new(NodeId(7), NodeId(8))).is_none());

    tracker.reset_loads();
    assert_eq!(tracker.state(road()).unwrap().load, 0.0);
}

#[test]
fn test_notifications_carry_ids_and_time() {
    let mut tracker = CongestionTracker::new(thresholds(), [road()]);
    let mut ids = IdGenerator::starting_at(40);

    tracker.add_load(road(), 9.0);
    let notes = tracker.advance(2.5, &mut ids);
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].id, EventId(SimId(40)));
    assert_eq!(notes[0].timestamp, 2.5);
    assert_eq!(notes[0].edge, road());
    assert!(!notes[0].message.is_empty());
    assert_eq!(ids.peek(), 41);
}

proptest! {
    #[test]
    fn prop_status_never_skips_congested(loads in prop::collection::vec(0.0f32..10.0, 1..200)) {
        let mut tracker = CongestionTracker::new(thresholds(), [road()]);
        let mut ids = IdGenerator::new();
        let mut previous = EdgeStatus::Normal;

        for (i, load) in loads.into_iter().enumerate() {
            step(&mut tracker, &mut ids, i as f32 * 0.5, load);
            let current = tracker.status(road());
            prop_assert!(
                !matches!(
                    (previous, current),
                    (EdgeStatus::Normal, EdgeStatus::Blocked) | (EdgeStatus::Blocked, EdgeStatus::Normal)
                ),
                "illegal transition {:?} -> {:?}",
                previous,
                current
            );
            previous = current;
        }
    }
}
