mod test_support;

use recordsd::cycles;
use recordsd::model::Role;
use recordsd::policy::Principal;
use recordsd::CoreError;
use test_support::{admin, open_workspace};

#[test]
fn activating_a_cycle_deactivates_the_previous_one() {
    let (_ws, conn) = open_workspace("records-cycle-single-active");
    let a = cycles::create_cycle(&conn, &admin(), "2024", "2024-03-01", "2024-12-15", None).expect("create 2024");
    let b = cycles::create_cycle(&conn, &admin(), "2025", "2025-03-01", "2025-12-15", None).expect("create 2025");
    assert!(!a.is_active);
    assert!(cycles::get_active_cycle(&conn).expect("active").is_none());

    cycles::activate_cycle(&conn, &admin(), &a.id).expect("activate a");
    let activated = cycles::activate_cycle(&conn, &admin(), &b.id).expect("activate b");
    assert!(activated.is_active);

    let list = cycles::list_cycles(&conn, &admin()).expect("list");
    let active: Vec<_> = list.iter().filter(|c| c.is_active).map(|c| c.id.clone()).collect();
    assert_eq!(active, vec![b.id.clone()]);
    // Newest start date first.
    assert_eq!(list[0].id, b.id);

    let again = cycles::activate_cycle(&conn, &admin(), &b.id).expect("re-activate");
    assert!(again.is_active);
    assert_eq!(cycles::get_active_cycle(&conn).expect("active").map(|c| c.id), Some(b.id));
}

#[test]
fn activating_an_unknown_cycle_is_not_found_and_keeps_the_current_one() {
    let (_ws, conn) = open_workspace("records-cycle-unknown");
    let a = cycles::create_cycle(&conn, &admin(), "2025", "2025-03-01", "2025-12-15", None).expect("create");
    cycles::activate_cycle(&conn, &admin(), &a.id).expect("activate");

    let e = cycles::activate_cycle(&conn, &admin(), "missing").unwrap_err();
    assert!(matches!(e, CoreError::NotFound { entity: "academicCycle", .. }));
    assert_eq!(cycles::get_active_cycle(&conn).expect("active").map(|c| c.id), Some(a.id));
}

#[test]
fn create_cycle_validates_name_and_dates() {
    let (_ws, conn) = open_workspace("records-cycle-validation");
    for (name, start, end) in [
        ("   ", "2025-03-01", "2025-12-15"),
        ("2025", "2025-12-15", "2025-03-01"),
        ("2025", "2025-03-01", "2025-03-01"),
        ("2025", "March 1st", "2025-12-15"),
    ] {
        let e = cycles::create_cycle(&conn, &admin(), name, start, end, None).unwrap_err();
        assert_eq!(e.code(), "validation_error", "{} {} {}", name, start, end);
    }
    assert!(cycles::list_cycles(&conn, &admin()).expect("list").is_empty());
}

#[test]
fn only_admin_and_director_create_or_activate_cycles() {
    let (_ws, conn) = open_workspace("records-cycle-permissions");
    let director = Principal::new("dir-1", Role::Director);
    let c = cycles::create_cycle(&conn, &director, "2025", "2025-03-01", "2025-12-15", None).expect("director creates");

    for role in [Role::Proctor, Role::Teacher, Role::Tutor, Role::Student] {
        let p = Principal::new("someone", role);
        let e = cycles::create_cycle(&conn, &p, "x", "2025-03-01", "2025-12-15", None).unwrap_err();
        assert_eq!(e.code(), "permission_denied");
        let e = cycles::activate_cycle(&conn, &p, &c.id).unwrap_err();
        assert_eq!(e.code(), "permission_denied");
    }
    assert!(cycles::get_active_cycle(&conn).expect("active").is_none());
}

#[test]
fn request_key_replays_the_first_create() {
    let (_ws, conn) = open_workspace("records-cycle-request-key");
    let first = cycles::create_cycle(&conn, &admin(), "2025", "2025-03-01", "2025-12-15", Some("req-42")).expect("first");
    let retry = cycles::create_cycle(&conn, &admin(), "2025", "2025-03-01", "2025-12-15", Some("req-42")).expect("retry");
    assert_eq!(first.id, retry.id);

    let other = cycles::create_cycle(&conn, &admin(), "2025", "2025-03-01", "2025-12-15", None).expect("no key");
    assert_ne!(other.id, first.id);
    assert_eq!(cycles::list_cycles(&conn, &admin()).expect("list").len(), 2);
}

#[test]
fn deactivate_all_leaves_no_active_cycle() {
    let (_ws, conn) = open_workspace("records-cycle-deactivate");
    let c = cycles::create_cycle(&conn, &admin(), "2025", "2025-03-01", "2025-12-15", None).expect("create");
    cycles::activate_cycle(&conn, &admin(), &c.id).expect("activate");
    cycles::deactivate_all(&conn, &admin()).expect("deactivate");
    assert!(cycles::get_active_cycle(&conn).expect("active").is_none());
    assert!(!cycles::get_cycle(&conn, &c.id).expect("get").is_active);
}

#[test]
fn reopening_a_workspace_keeps_cycles_and_request_keys() {
    let (ws, conn) = open_workspace("records-cycle-reopen");
    let first = cycles::create_cycle(&conn, &admin(), "2025", "2025-03-01", "2025-12-15", Some("req-7")).expect("create");
    drop(conn);

    let conn = recordsd::db::open_db(&ws).expect("reopen");
    let retry = cycles::create_cycle(&conn, &admin(), "2025", "2025-03-01", "2025-12-15", Some("req-7")).expect("retry");
    assert_eq!(retry.id, first.id);
    let stored: Option<String> = conn
        .query_row("SELECT request_key FROM academic_cycles WHERE id = ?", [&first.id], |r| r.get(0))
        .expect("request key column");
    assert_eq!(stored.as_deref(), Some("req-7"));
    assert_eq!(cycles::list_cycles(&conn, &admin()).expect("list").len(), 1);
}
