mod test_support;

use recordsd::config::RecordsPolicy;
use recordsd::import::{self, MAX_IMPORT_ROWS};
use recordsd::model::Role;
use recordsd::policy::Principal;
use recordsd::subjects::{self, NewSubject};
use recordsd::{classrooms, cycles, users};
use serde_json::json;
use test_support::{account, admin, open_workspace};

#[test]
fn account_import_reports_each_row() {
    let (_ws, conn) = open_workspace("records-import-accounts");
    let rows = vec![
        json!({ "Name": "Ana", "DNI": 40111222, "Email": "ana@school.test", "Role": "ESTUDIANTE" }),
        json!({ "Name": "Bruno", "DNI": "40111333", "Email": "bruno@school.test", "Role": "docente" }),
        json!({ "Name": "Ana Again", "DNI": "40999999", "Email": "ANA@school.test", "Role": "STUDENT" }),
        json!({ "Name": "No Role", "DNI": "40111444", "Email": "norole@school.test" }),
        json!({ "Name": "Bad Email", "DNI": "40111555", "Email": "nowhere", "Role": "TUTOR" }),
    ];
    let out = import::import_accounts(&conn, &admin(), &rows).expect("import");
    assert_eq!(out.success_count, 2);
    assert_eq!(out.error_count, 3);
    assert_eq!(out.accepted.iter().map(|a| a.index).collect::<Vec<_>>(), vec![0, 1]);

    let rejected: Vec<(i64, &str)> = out.rejected.iter().map(|r| (r.index, r.code.as_str())).collect();
    assert_eq!(rejected, vec![(2, "conflict"), (3, "bad_row"), (4, "validation_error")]);
    assert_eq!(out.rejected[0].input["Name"], "Ana Again");

    let teachers = users::list_accounts(&conn, &admin(), Some(Role::Teacher)).expect("teachers");
    assert_eq!(teachers.len(), 1);
    assert_eq!(teachers[0].national_id, "40111333");
}

#[test]
fn account_import_is_admin_or_director_only() {
    let (_ws, conn) = open_workspace("records-import-accounts-perm");
    let proctor = Principal::new("p1", Role::Proctor);
    let e = import::import_accounts(&conn, &proctor, &[json!({})]).unwrap_err();
    assert_eq!(e.code(), "permission_denied");
}

#[test]
fn oversized_batches_apply_nothing() {
    let (_ws, conn) = open_workspace("records-import-limit");
    let rows: Vec<_> = (0..=MAX_IMPORT_ROWS)
        .map(|i| json!({ "name": format!("S{i}"), "email": format!("s{i}@school.test"), "nationalId": format!("{i}"), "role": "STUDENT" }))
        .collect();
    let out = import::import_accounts(&conn, &admin(), &rows).expect("import");
    assert_eq!(out.success_count, 0);
    assert_eq!(out.rejected[0].code, "too_many_rows");
    assert!(users::list_accounts(&conn, &admin(), None).expect("list").is_empty());
}

#[test]
fn grade_and_enrollment_imports_keep_going_past_failures() {
    let (_ws, conn) = open_workspace("records-import-grades");
    let policy = RecordsPolicy::default();
    let teacher = account(&conn, Role::Teacher, "teacher");
    let s1 = account(&conn, Role::Student, "s1");
    let s2 = account(&conn, Role::Student, "s2");
    let room = classrooms::create_classroom(&conn, &admin(), "5A").expect("room");
    let subject = subjects::create_subject(
        &conn,
        &admin(),
        NewSubject {
            name: "Biology".into(),
            lead_staff_id: Some(teacher.clone()),
            ..NewSubject::default()
        },
    )
    .expect("subject");
    let cycle = cycles::create_cycle(&conn, &admin(), "2025", "2025-03-01", "2025-12-15", None).expect("cycle");
    cycles::activate_cycle(&conn, &admin(), &cycle.id).expect("activate");

    let enrollments = import::import_enrollments(
        &conn,
        &policy,
        &admin(),
        &[
            json!({ "studentId": s1, "classroomId": room.id, "cycleId": cycle.id }),
            json!({ "studentId": s1, "classroomId": room.id, "cycleId": cycle.id }),
            json!({ "studentId": s2, "classroomId": room.id, "cycleId": cycle.id }),
        ],
    )
    .expect("enrollments");
    assert_eq!(enrollments.success_count, 2);
    assert_eq!(enrollments.rejected[0].index, 1);
    assert_eq!(enrollments.rejected[0].code, "conflict");

    let grades = import::import_grades(
        &conn,
        &policy,
        &Principal::new(teacher.clone(), Role::Teacher),
        &[
            json!({ "studentId": s1, "subjectId": subject.id, "cycleId": cycle.id, "trimester": 1, "grade": 8 }),
            json!({ "studentId": s2, "subjectId": subject.id, "cycleId": cycle.id, "trimester": 1, "grade": 11 }),
            json!({ "studentId": s2, "subjectId": subject.id, "cycleId": cycle.id, "trimester": 2, "grade": 6.5 }),
        ],
    )
    .expect("grades");
    assert_eq!(grades.success_count, 2);
    assert_eq!(grades.error_count, 1);
    assert_eq!(grades.rejected[0].index, 1);
    assert_eq!(grades.rejected[0].code, "validation_error");
}
