use super::*;
use super::conflict::{check_no_conflict, validate_span};
use crate::clock::ManualClock;
use crate::limits::*;

const H: Ms = 3_600_000; // 1 hour in ms
const M: Ms = 60_000; // 1 minute in ms
const DAY0: Ms = 1_700_000_000_000;

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("roombook_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn room(id: RoomId) -> Room {
    Room {
        id,
        name: format!("Room {id}"),
        capacity: 8,
        location: "2F".into(),
        equipment: "projector".into(),
        description: String::new(),
    }
}

fn user(id: UserId, is_admin: bool) -> User {
    User {
        id,
        username: format!("user{id}"),
        email: format!("user{id}@example.com"),
        is_admin,
    }
}

fn engine_at(path: PathBuf, policy: OverlapPolicy) -> Engine {
    Engine::new(path, Arc::new(ManualClock::new(DAY0)), policy).unwrap()
}

async fn engine_with_rooms(name: &str, rooms: &[RoomId]) -> Engine {
    let engine = engine_at(test_wal_path(name), OverlapPolicy::General);
    for id in rooms {
        engine.register_room(room(*id)).await.unwrap();
    }
    engine
}

fn pending(id: BookingId, start: Ms, end: Ms) -> Booking {
    Booking {
        id,
        room_id: 1,
        user_id: 1,
        span: Span::new(start, end),
        status: BookingStatus::Pending,
        created_at: 0,
        updated_at: 0,
    }
}

// ── Pure conflict checks ─────────────────────────────────

#[test]
fn conflict_touching_is_free() {
    let mut rb = RoomBookings::new(1);
    rb.insert_booking(pending(1, 10 * H, 11 * H));
    let before = Span::new(9 * H, 10 * H);
    let after = Span::new(11 * H, 12 * H);
    assert!(check_no_conflict(&rb, &before, OverlapPolicy::General).is_ok());
    assert!(check_no_conflict(&rb, &after, OverlapPolicy::General).is_ok());
}

#[test]
fn conflict_any_positive_overlap() {
    let mut rb = RoomBookings::new(1);
    rb.insert_booking(pending(1, 10 * H, 11 * H));
    for (s, e) in [
        (10 * H + 30 * M, 10 * H + 45 * M),
        (9 * H, 10 * H + 1),
        (11 * H - 1, 12 * H),
        (9 * H, 12 * H),
    ] {
        assert_eq!(
            check_no_conflict(&rb, &Span::new(s, e), OverlapPolicy::General),
            Err(EngineError::Conflict(1)),
            "[{s}, {e}) should conflict"
        );
    }
}

#[test]
fn conflict_containment_policy_only_rejects_inner() {
    let mut rb = RoomBookings::new(1);
    rb.insert_booking(pending(1, 10 * H, 11 * H));
    let inner = Span::new(10 * H + 30 * M, 10 * H + 45 * M);
    let exact = Span::new(10 * H, 11 * H);
    let partial = Span::new(10 * H + 30 * M, 11 * H + 30 * M);
    let outer = Span::new(9 * H, 12 * H);
    assert!(check_no_conflict(&rb, &inner, OverlapPolicy::Containment).is_err());
    assert!(check_no_conflict(&rb, &exact, OverlapPolicy::Containment).is_err());
    assert!(check_no_conflict(&rb, &partial, OverlapPolicy::Containment).is_ok());
    assert!(check_no_conflict(&rb, &outer, OverlapPolicy::Containment).is_ok());
}

#[test]
fn conflict_ignores_inactive() {
    let mut rb = RoomBookings::new(1);
    let mut rejected = pending(1, 10 * H, 11 * H);
    rejected.status = BookingStatus::Rejected;
    let mut released = pending(2, 10 * H, 11 * H);
    released.status = BookingStatus::Released;
    rb.insert_booking(rejected);
    rb.insert_booking(released);
    assert!(check_no_conflict(&rb, &Span::new(10 * H, 11 * H), OverlapPolicy::General).is_ok());
}

#[test]
fn validate_span_rules() {
    assert!(validate_span(DAY0, DAY0 + H).is_ok());
    assert_eq!(
        validate_span(DAY0, DAY0),
        Err(EngineError::InvalidSpan { start: DAY0, end: DAY0 })
    );
    assert!(matches!(
        validate_span(DAY0 + H, DAY0),
        Err(EngineError::InvalidSpan { .. })
    ));
    assert!(matches!(
        validate_span(-5, 10),
        Err(EngineError::LimitExceeded(_))
    ));
    assert!(matches!(
        validate_span(DAY0, DAY0 + MAX_SPAN_DURATION_MS + 1),
        Err(EngineError::LimitExceeded(_))
    ));
}

#[test]
fn overlap_policy_parse() {
    assert_eq!("general".parse::<OverlapPolicy>().unwrap(), OverlapPolicy::General);
    assert_eq!("Containment".parse::<OverlapPolicy>().unwrap(), OverlapPolicy::Containment);
    assert!("fuzzy".parse::<OverlapPolicy>().is_err());
    assert_eq!(OverlapPolicy::default(), OverlapPolicy::General);
}

// ── Async engine tests ───────────────────────────────────

#[tokio::test]
async fn engine_end_to_end_scenario() {
    let engine = engine_with_rooms("e2e.wal", &[1]).await;
    let t10 = DAY0 + 10 * H;

    let first = engine.create_booking(1, 1, t10, t10 + H).await.unwrap();
    assert_eq!(first.id, 1);
    assert_eq!(first.status, BookingStatus::Pending);

    let err = engine
        .create_booking(1, 2, t10 + 30 * M, t10 + 45 * M)
        .await
        .unwrap_err();
    assert_eq!(err, EngineError::Conflict(1));

    assert_eq!(engine.approve(1).await.unwrap().status, BookingStatus::Approved);
    assert_eq!(engine.release(1).await.unwrap().status, BookingStatus::Released);

    let again = engine.create_booking(1, 2, t10, t10 + H).await.unwrap();
    assert_eq!(again.id, 2);
}

#[tokio::test]
async fn engine_unknown_room_rejected() {
    let engine = engine_with_rooms("unknown_room.wal", &[1]).await;
    assert_eq!(
        engine.create_booking(9, 1, DAY0, DAY0 + H).await,
        Err(EngineError::RoomNotFound(9))
    );
    assert!(!engine.bookings.contains_key(&9));
}

#[tokio::test]
async fn engine_adjacent_bookings_no_conflict() {
    let engine = engine_with_rooms("adjacent.wal", &[1]).await;
    engine.create_booking(1, 1, DAY0, DAY0 + H).await.unwrap();
    engine.create_booking(1, 1, DAY0 + H, DAY0 + 2 * H).await.unwrap();
    engine.create_booking(1, 1, DAY0 - H, DAY0).await.unwrap();
    assert_eq!(engine.bookings_for_room(1).await.len(), 3);
}

#[tokio::test]
async fn engine_rooms_are_independent() {
    let engine = engine_with_rooms("independent.wal", &[1, 2]).await;
    engine.create_booking(1, 1, DAY0, DAY0 + H).await.unwrap();
    engine.create_booking(2, 1, DAY0, DAY0 + H).await.unwrap();
    assert!(engine.conflicts(1, DAY0, DAY0 + H).await.unwrap());
    assert!(!engine.conflicts(3, DAY0, DAY0 + H).await.unwrap());
}

#[tokio::test]
async fn engine_rejected_slot_can_be_rebooked() {
    let engine = engine_with_rooms("rejected_rebook.wal", &[1]).await;
    let b = engine.create_booking(1, 1, DAY0, DAY0 + H).await.unwrap();
    engine.reject(b.id).await.unwrap();
    assert!(!engine.conflicts(1, DAY0, DAY0 + H).await.unwrap());
    engine.create_booking(1, 2, DAY0, DAY0 + H).await.unwrap();
}

#[tokio::test]
async fn engine_containment_policy_allows_partial_overlap() {
    let engine = engine_at(test_wal_path("containment.wal"), OverlapPolicy::Containment);
    engine.register_room(room(1)).await.unwrap();
    engine.create_booking(1, 1, DAY0, DAY0 + H).await.unwrap();
    engine
        .create_booking(1, 1, DAY0 + 30 * M, DAY0 + 90 * M)
        .await
        .unwrap();
    assert!(matches!(
        engine.create_booking(1, 1, DAY0 + 10 * M, DAY0 + 20 * M).await,
        Err(EngineError::Conflict(_))
    ));
}

#[tokio::test]
async fn engine_lifecycle_terminal_states() {
    let engine = engine_with_rooms("terminal.wal", &[1]).await;
    let a = engine.create_booking(1, 1, DAY0, DAY0 + H).await.unwrap();
    let b = engine.create_booking(1, 1, DAY0 + H, DAY0 + 2 * H).await.unwrap();

    engine.reject(a.id).await.unwrap();
    for target in [
        BookingStatus::Pending,
        BookingStatus::Approved,
        BookingStatus::Rejected,
        BookingStatus::Released,
    ] {
        assert!(matches!(
            engine.transition(a.id, target).await,
            Err(EngineError::IllegalTransition { from: BookingStatus::Rejected, .. })
        ));
    }

    engine.approve(b.id).await.unwrap();
    engine.release(b.id).await.unwrap();
    assert!(matches!(
        engine.approve(b.id).await,
        Err(EngineError::IllegalTransition { from: BookingStatus::Released, .. })
    ));
}

#[tokio::test]
async fn engine_release_requires_approval() {
    let engine = engine_with_rooms("release_pending.wal", &[1]).await;
    let b = engine.create_booking(1, 1, DAY0, DAY0 + H).await.unwrap();
    assert_eq!(
        engine.release(b.id).await,
        Err(EngineError::IllegalTransition {
            id: b.id,
            from: BookingStatus::Pending,
            to: BookingStatus::Released
        })
    );
    assert_eq!(engine.get_booking(b.id).await.unwrap().status, BookingStatus::Pending);
}

#[tokio::test]
async fn engine_transition_unknown_booking() {
    let engine = engine_with_rooms("unknown_booking.wal", &[1]).await;
    assert_eq!(engine.approve(42).await, Err(EngineError::BookingNotFound(42)));
    assert_eq!(engine.reject(42).await, Err(EngineError::BookingNotFound(42)));
    assert_eq!(engine.release(42).await, Err(EngineError::BookingNotFound(42)));
}

#[tokio::test]
async fn engine_transition_stamps_updated_at() {
    let clock = Arc::new(ManualClock::new(DAY0));
    let engine = Engine::new(test_wal_path("updated_at.wal"), clock.clone(), OverlapPolicy::General)
        .unwrap();
    engine.register_room(room(1)).await.unwrap();
    let b = engine.create_booking(1, 1, DAY0 + H, DAY0 + 2 * H).await.unwrap();
    clock.advance(std::time::Duration::from_secs(60));
    let approved = engine.approve(b.id).await.unwrap();
    assert_eq!(approved.created_at, DAY0);
    assert_eq!(approved.updated_at, DAY0 + M);
}

#[tokio::test]
async fn engine_concurrent_creates_single_winner() {
    let engine = Arc::new(engine_with_rooms("concurrent.wal", &[1]).await);
    let mut handles = Vec::new();
    for i in 0..32 {
        let engine = engine.clone();
        // All windows share [DAY0 + 30m, DAY0 + 60m).
        let start = DAY0 + (i % 4) * 10 * M;
        handles.push(tokio::spawn(async move {
            engine.create_booking(1, i as UserId, start, DAY0 + H).await
        }));
    }
    let mut winners = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => winners += 1,
            Err(EngineError::Conflict(_)) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(winners, 1);
    assert_eq!(engine.bookings_for_room(1).await.len(), 1);
}

#[tokio::test]
async fn engine_remove_room_cascades_only_that_room() {
    let engine = engine_with_rooms("cascade.wal", &[1, 2]).await;
    engine.create_booking(1, 1, DAY0, DAY0 + H).await.unwrap();
    engine.create_booking(1, 1, DAY0 + H, DAY0 + 2 * H).await.unwrap();
    let other = engine.create_booking(2, 1, DAY0, DAY0 + H).await.unwrap();

    assert_eq!(engine.remove_room(1).await.unwrap(), 2);
    assert!(engine.get_room(1).is_none());
    assert!(engine.bookings_for_room(1).await.is_empty());
    assert_eq!(engine.booking_count(), 1);
    assert_eq!(engine.get_booking(other.id).await.unwrap().room_id, 2);

    assert_eq!(engine.remove_room(1).await, Err(EngineError::RoomNotFound(1)));
    assert_eq!(
        engine.create_booking(1, 1, DAY0, DAY0 + H).await,
        Err(EngineError::RoomNotFound(1))
    );
}

#[tokio::test]
async fn engine_create_queued_on_detached_list_lands_in_live_one() {
    let engine = Arc::new(engine_with_rooms("detached_list.wal", &[1]).await);
    let detached = engine.room_bookings(1);
    let held = detached.clone().write_owned().await;

    let queued = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.create_booking(1, 1, DAY0, DAY0 + H).await })
    };
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    // Same state remove_room + register_room leave behind: the room is
    // registered but its old list is no longer in the map.
    engine.bookings.remove(&1);
    drop(held);

    let booking = queued.await.unwrap().unwrap();
    assert!(detached.read().await.bookings.is_empty());
    let live: Vec<_> = engine.bookings_for_room(1).await.iter().map(|b| b.id).collect();
    assert_eq!(live, vec![booking.id]);
    assert!(engine.conflicts(1, DAY0, DAY0 + H).await.unwrap());
    assert_eq!(
        engine.create_booking(1, 1, DAY0, DAY0 + H).await,
        Err(EngineError::Conflict(booking.id))
    );
}

#[tokio::test]
async fn engine_remove_then_reregister_starts_empty() {
    let engine = engine_with_rooms("reregister.wal", &[1]).await;
    engine.create_booking(1, 1, DAY0, DAY0 + H).await.unwrap();
    engine.remove_room(1).await.unwrap();
    engine.register_room(room(1)).await.unwrap();

    assert!(engine.bookings_for_room(1).await.is_empty());
    let again = engine.create_booking(1, 1, DAY0, DAY0 + H).await.unwrap();
    assert_eq!(engine.bookings_for_room(1).await[0].id, again.id);
}

#[tokio::test]
async fn engine_delete_bookings_for_room_keeps_room() {
    let engine = engine_with_rooms("purge.wal", &[1]).await;
    engine.create_booking(1, 1, DAY0, DAY0 + H).await.unwrap();
    assert_eq!(engine.delete_bookings_for_room(1).await.unwrap(), 1);
    assert_eq!(engine.delete_bookings_for_room(1).await.unwrap(), 0);
    assert_eq!(engine.delete_bookings_for_room(7).await.unwrap(), 0);
    assert!(engine.get_room(1).is_some());
    // Ids keep counting after a purge.
    assert_eq!(engine.create_booking(1, 1, DAY0, DAY0 + H).await.unwrap().id, 2);
}

#[tokio::test]
async fn engine_wal_replay() {
    let path = test_wal_path("replay.wal");
    {
        let engine = engine_at(path.clone(), OverlapPolicy::General);
        engine.register_user(user(1, true)).await.unwrap();
        engine.register_room(room(1)).await.unwrap();
        engine.register_room(room(2)).await.unwrap();
        let a = engine.create_booking(1, 1, DAY0, DAY0 + H).await.unwrap();
        engine.create_booking(2, 1, DAY0, DAY0 + H).await.unwrap();
        engine.approve(a.id).await.unwrap();
        engine.remove_room(2).await.unwrap();
    }

    let engine = engine_at(path, OverlapPolicy::General);
    assert_eq!(engine.list_users(), vec![user(1, true)]);
    assert_eq!(engine.list_rooms(), vec![room(1)]);
    assert_eq!(engine.booking_count(), 1);
    assert_eq!(engine.get_booking(1).await.unwrap().status, BookingStatus::Approved);
    assert!(engine.get_booking(2).await.is_none());
    assert_eq!(engine.create_booking(1, 1, DAY0 + H, DAY0 + 2 * H).await.unwrap().id, 3);
}

#[tokio::test]
async fn engine_compaction_preserves_state_and_sequence() {
    let path = test_wal_path("compact.wal");
    {
        let engine = engine_at(path.clone(), OverlapPolicy::General);
        engine.register_user(user(1, false)).await.unwrap();
        engine.register_room(room(1)).await.unwrap();
        for i in 0..5 {
            let b = engine
                .create_booking(1, 1, DAY0 + i * H, DAY0 + (i + 1) * H)
                .await
                .unwrap();
            engine.approve(b.id).await.unwrap();
        }
        engine.delete_bookings_for_room(1).await.unwrap();
        engine.create_booking(1, 1, DAY0, DAY0 + H).await.unwrap();
        assert!(engine.wal_appends_since_compact().await > 0);

        engine.compact_wal().await.unwrap();
        assert_eq!(engine.wal_appends_since_compact().await, 0);
    }

    let engine = engine_at(path, OverlapPolicy::General);
    assert_eq!(engine.booking_count(), 1);
    assert_eq!(engine.get_booking(6).await.unwrap().status, BookingStatus::Pending);
    assert_eq!(engine.create_booking(1, 1, DAY0 + H, DAY0 + 2 * H).await.unwrap().id, 7);
}

#[tokio::test]
async fn engine_compaction_concurrent_with_writes() {
    let engine = Arc::new(engine_with_rooms("compact_concurrent.wal", &[1, 2, 3, 4]).await);
    let mut handles = Vec::new();
    for r in 1..=4u64 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            for i in 0..25 {
                let start = DAY0 + i * H;
                engine.create_booking(r, 1, start, start + H).await.unwrap();
            }
        }));
    }
    let compactor = {
        let engine = engine.clone();
        tokio::spawn(async move {
            for _ in 0..5 {
                engine.compact_wal().await.unwrap();
                tokio::task::yield_now().await;
            }
        })
    };
    for h in handles {
        h.await.unwrap();
    }
    compactor.await.unwrap();
    assert_eq!(engine.booking_count(), 100);
}

#[tokio::test]
async fn engine_catalog_validation() {
    let engine = engine_with_rooms("catalog.wal", &[]).await;
    let mut nameless = room(1);
    nameless.name = "  ".into();
    assert!(matches!(
        engine.register_room(nameless).await,
        Err(EngineError::InvalidInput(_))
    ));
    let mut bad_email = user(1, false);
    bad_email.email = "nobody".into();
    assert!(matches!(
        engine.register_user(bad_email).await,
        Err(EngineError::InvalidInput(_))
    ));
    let mut long = room(1);
    long.name = "x".repeat(MAX_NAME_LEN + 1);
    assert!(matches!(
        engine.register_room(long).await,
        Err(EngineError::LimitExceeded(_))
    ));
}

#[tokio::test]
async fn engine_first_admin_lowest_id() {
    let engine = engine_with_rooms("admin.wal", &[]).await;
    assert!(engine.first_admin().is_none());
    engine.register_user(user(5, true)).await.unwrap();
    engine.register_user(user(2, false)).await.unwrap();
    engine.register_user(user(3, true)).await.unwrap();
    assert_eq!(engine.first_admin().unwrap().id, 3);
}

#[tokio::test]
async fn engine_snapshot_in_id_order() {
    let engine = engine_with_rooms("snapshot.wal", &[1, 2]).await;
    engine.create_booking(2, 1, DAY0 + 5 * H, DAY0 + 6 * H).await.unwrap();
    engine.create_booking(1, 1, DAY0 + 3 * H, DAY0 + 4 * H).await.unwrap();
    engine.create_booking(1, 1, DAY0, DAY0 + H).await.unwrap();
    let ids: Vec<_> = engine.snapshot_bookings().await.iter().map(|b| b.id).collect();
    assert_eq!(ids, vec![1, 2, 3]);
}
