mod test_support;

use recordsd::config::RecordsPolicy;
use recordsd::model::Role;
use recordsd::policy::Principal;
use recordsd::{classrooms, cycles, db, enrollment, CoreError};
use std::sync::{Arc, Barrier};
use test_support::{account, admin, open_workspace};

fn active_cycle(conn: &rusqlite::Connection, name: &str, year: i32) -> String {
    let c = cycles::create_cycle(
        conn,
        &admin(),
        name,
        &format!("{year}-03-01"),
        &format!("{year}-12-15"),
        None,
    )
    .expect("create cycle");
    cycles::activate_cycle(conn, &admin(), &c.id).expect("activate");
    c.id
}

#[test]
fn second_enrollment_in_same_cycle_conflicts() {
    let (_ws, conn) = open_workspace("records-enroll-duplicate");
    let policy = RecordsPolicy::default();
    let student = account(&conn, Role::Student, "s1");
    let room_a = classrooms::create_classroom(&conn, &admin(), "3A").expect("room a");
    let room_b = classrooms::create_classroom(&conn, &admin(), "3B").expect("room b");
    let cycle = active_cycle(&conn, "2025", 2025);

    let e = enrollment::enroll(&conn, &policy, &admin(), &student, &room_a.id, &cycle).expect("enroll");
    assert_eq!(e.student_id, student);
    assert_eq!(e.classroom_id, room_a.id);

    let err = enrollment::enroll(&conn, &policy, &admin(), &student, &room_b.id, &cycle).unwrap_err();
    assert_eq!(err.conflict_reason(), Some("already-enrolled"));

    let listed = enrollment::list_by_classroom(&conn, &admin(), &room_b.id, &cycle).expect("list b");
    assert!(listed.is_empty());
}

#[test]
fn concurrent_enrollments_admit_exactly_one() {
    let (ws, conn) = open_workspace("records-enroll-race");
    let policy = RecordsPolicy::default();
    let student = account(&conn, Role::Student, "racer");
    let rooms: Vec<String> = (0..6)
        .map(|i| {
            classrooms::create_classroom(&conn, &admin(), &format!("room {i}"))
                .expect("room")
                .id
        })
        .collect();
    let cycle = active_cycle(&conn, "2025", 2025);

    let barrier = Arc::new(Barrier::new(rooms.len()));
    let handles: Vec<_> = rooms
        .into_iter()
        .map(|room| {
            let conn = db::open_db(&ws).expect("open per-thread connection");
            let barrier = Arc::clone(&barrier);
            let (policy, student, cycle) = (policy.clone(), student.clone(), cycle.clone());
            std::thread::spawn(move || {
                barrier.wait();
                enrollment::enroll(&conn, &policy, &admin(), &student, &room, &cycle)
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().expect("thread")).collect();
    let successes = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1);
    for r in results.iter().filter_map(|r| r.as_ref().err()) {
        assert_eq!(r.conflict_reason(), Some("already-enrolled"), "{r}");
    }

    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM enrollments WHERE student_id = ? AND academic_cycle_id = ?",
            (&student, &cycle),
            |r| r.get(0),
        )
        .expect("count");
    assert_eq!(count, 1);
}

#[test]
fn enrollment_requires_the_active_cycle() {
    let (_ws, conn) = open_workspace("records-enroll-active-cycle");
    let policy = RecordsPolicy::default();
    let student = account(&conn, Role::Student, "s1");
    let room = classrooms::create_classroom(&conn, &admin(), "1A").expect("room");
    let old = cycles::create_cycle(&conn, &admin(), "2024", "2024-03-01", "2024-12-15", None).expect("old");

    let e = enrollment::enroll(&conn, &policy, &admin(), &student, &room.id, &old.id).unwrap_err();
    assert!(matches!(e, CoreError::Precondition("no-active-cycle")));

    active_cycle(&conn, "2025", 2025);
    let e = enrollment::enroll(&conn, &policy, &admin(), &student, &room.id, &old.id).unwrap_err();
    assert!(matches!(e, CoreError::Precondition("cycle-not-active")));

    let relaxed = RecordsPolicy {
        writes_require_active_cycle: false,
        ..RecordsPolicy::default()
    };
    enrollment::enroll(&conn, &relaxed, &admin(), &student, &room.id, &old.id).expect("relaxed enroll");
}

#[test]
fn enroll_checks_roles_and_references() {
    let (_ws, conn) = open_workspace("records-enroll-validation");
    let policy = RecordsPolicy::default();
    let teacher = account(&conn, Role::Teacher, "t1");
    let student = account(&conn, Role::Student, "s1");
    let room = classrooms::create_classroom(&conn, &admin(), "1A").expect("room");
    let cycle = active_cycle(&conn, "2025", 2025);

    let e = enrollment::enroll(&conn, &policy, &admin(), &teacher, &room.id, &cycle).unwrap_err();
    assert_eq!(e.code(), "validation_error");
    let e = enrollment::enroll(&conn, &policy, &admin(), "ghost", &room.id, &cycle).unwrap_err();
    assert_eq!(e.code(), "not_found");
    let e = enrollment::enroll(&conn, &policy, &admin(), &student, "no-room", &cycle).unwrap_err();
    assert_eq!(e.code(), "not_found");
    let e = enrollment::enroll(&conn, &policy, &admin(), &student, &room.id, "no-cycle").unwrap_err();
    assert_eq!(e.code(), "not_found");

    let teacher_actor = Principal::new(teacher, Role::Teacher);
    let e = enrollment::enroll(&conn, &policy, &teacher_actor, &student, &room.id, &cycle).unwrap_err();
    assert_eq!(e.code(), "permission_denied");

    let proctor = Principal::new("p1", Role::Proctor);
    enrollment::enroll(&conn, &policy, &proctor, &student, &room.id, &cycle).expect("proctor enrolls");
}

#[test]
fn available_students_exclude_enrolled_ones_and_unenroll_restores_them() {
    let (_ws, conn) = open_workspace("records-enroll-available");
    let policy = RecordsPolicy::default();
    let ana = account(&conn, Role::Student, "ana");
    let bea = account(&conn, Role::Student, "bea");
    account(&conn, Role::Teacher, "teo");
    let room = classrooms::create_classroom(&conn, &admin(), "2B").expect("room");
    let cycle = active_cycle(&conn, "2025", 2025);

    let e = enrollment::enroll(&conn, &policy, &admin(), &ana, &room.id, &cycle).expect("enroll ana");
    let available: Vec<String> = enrollment::list_available(&conn, &admin(), &cycle)
        .expect("available")
        .into_iter()
        .map(|u| u.id)
        .collect();
    assert_eq!(available, vec![bea.clone()]);

    enrollment::unenroll(&conn, &admin(), &e.id).expect("unenroll");
    let e2 = enrollment::unenroll(&conn, &admin(), &e.id).unwrap_err();
    assert_eq!(e2.code(), "not_found");
    assert_eq!(enrollment::list_available(&conn, &admin(), &cycle).expect("available").len(), 2);

    let summaries = classrooms::list_classrooms(&conn, &admin()).expect("classrooms");
    assert_eq!(summaries[0].student_count, 0);
}

#[test]
fn student_reads_only_their_own_enrollment() {
    let (_ws, conn) = open_workspace("records-enroll-for-student");
    let policy = RecordsPolicy::default();
    let ana = account(&conn, Role::Student, "ana");
    let bea = account(&conn, Role::Student, "bea");
    let room = classrooms::create_classroom(&conn, &admin(), "2B").expect("room");
    let cycle = active_cycle(&conn, "2025", 2025);
    enrollment::enroll(&conn, &policy, &admin(), &ana, &room.id, &cycle).expect("enroll");

    let me = Principal::new(ana.clone(), Role::Student);
    let found = enrollment::enrollment_for_student(&conn, &me, &ana, &cycle).expect("own");
    assert_eq!(found.map(|e| e.classroom_id), Some(room.id));
    let e = enrollment::enrollment_for_student(&conn, &me, &bea, &cycle).unwrap_err();
    assert_eq!(e.code(), "permission_denied");
}
