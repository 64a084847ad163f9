mod test_support;

use serde_json::json;
use test_support::{request_err, request_ok, spawn_sidecar, temp_dir};

const ADMIN: Option<(&str, &str)> = Some(("admin-1", "ADMIN"));

fn str_field(v: &serde_json::Value, key: &str) -> String {
    v.get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_else(|| panic!("missing {} in {}", key, v))
        .to_string()
}

#[test]
fn school_year_flow_over_ipc() {
    let workspace = temp_dir("records-ipc-flow");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let (i, r) = (&mut stdin, &mut reader);

    request_ok(i, r, "1", None, "workspace.select", json!({ "path": workspace.to_string_lossy() }));

    let cycle = request_ok(
        i,
        r,
        "2",
        ADMIN,
        "cycles.create",
        json!({ "name": "2025", "startDate": "2025-03-01", "endDate": "2025-12-15" }),
    );
    let cycle_id = str_field(&cycle, "id");
    assert_eq!(cycle["isActive"], false);
    let activated = request_ok(i, r, "3", ADMIN, "cycles.activate", json!({ "cycleId": cycle_id }));
    assert_eq!(activated["isActive"], true);

    let teacher = request_ok(
        i,
        r,
        "4",
        ADMIN,
        "users.create",
        json!({ "name": "Marta Diaz", "email": "marta@school.test", "nationalId": "20111222", "role": "DOCENTE" }),
    );
    let teacher_id = str_field(&teacher, "id");
    assert_eq!(teacher["role"], "TEACHER");
    let tutor = request_ok(
        i,
        r,
        "5",
        ADMIN,
        "users.create",
        json!({ "name": "Pablo Gil", "email": "pablo@school.test", "nationalId": "20111333", "role": "TUTOR" }),
    );
    let tutor_id = str_field(&tutor, "id");
    let student = request_ok(
        i,
        r,
        "6",
        ADMIN,
        "users.create",
        json!({
            "name": "Sofia Gil",
            "email": "sofia@school.test",
            "nationalId": "45111222",
            "role": "STUDENT",
            "tutorId": tutor_id
        }),
    );
    let student_id = str_field(&student, "id");
    assert_eq!(student["tutorId"], tutor_id.as_str());

    let classroom = request_ok(i, r, "7", ADMIN, "classrooms.create", json!({ "name": "1st A" }));
    let classroom_id = str_field(&classroom, "id");
    let subject = request_ok(
        i,
        r,
        "8",
        ADMIN,
        "subjects.create",
        json!({ "name": "Mathematics", "leadStaffId": teacher_id }),
    );
    let subject_id = str_field(&subject, "id");
    let linked = request_ok(
        i,
        r,
        "9",
        ADMIN,
        "subjects.link",
        json!({ "classroomId": classroom_id, "subjectId": subject_id }),
    );
    assert_eq!(linked["changed"], true);

    let enroll_params = json!({ "studentId": student_id, "classroomId": classroom_id, "cycleId": cycle_id });
    request_ok(i, r, "10", ADMIN, "enrollments.enroll", enroll_params.clone());
    let conflict = request_err(i, r, "11", ADMIN, "enrollments.enroll", enroll_params);
    assert_eq!(conflict["code"], "conflict");
    assert_eq!(conflict["details"]["reason"], "already-enrolled");

    let as_teacher = Some((teacher_id.as_str(), "TEACHER"));
    let grade = |g: f64| {
        json!({
            "studentId": student_id,
            "subjectId": subject_id,
            "cycleId": cycle_id,
            "trimester": 1,
            "grade": g
        })
    };
    request_ok(i, r, "12", as_teacher, "grades.upsert", grade(8.0));
    let corrected = request_ok(i, r, "13", as_teacher, "grades.upsert", grade(9.0));
    assert_eq!(corrected["grade"], 9.0);
    assert_eq!(corrected["teacherId"], teacher_id.as_str());

    let as_tutor = Some((tutor_id.as_str(), "TUTOR"));
    let children = request_ok(i, r, "14", as_tutor, "guardians.children", json!({ "tutorId": tutor_id }));
    assert_eq!(children["children"][0]["id"], student_id.as_str());

    let card = request_ok(
        i,
        r,
        "15",
        as_tutor,
        "grades.reportCard",
        json!({ "studentId": student_id, "cycleId": cycle_id }),
    );
    let row = &card["rows"][0];
    assert_eq!(row["subjectName"], "Mathematics");
    assert_eq!(row["trimester1"], 9.0);
    assert!(row["trimester2"].is_null());
    assert!(row["trimester3"].is_null());
    assert_eq!(row["average"], 9.0);

    let denied = request_err(
        i,
        r,
        "16",
        as_tutor,
        "grades.upsert",
        grade(2.0),
    );
    assert_eq!(denied["code"], "permission_denied");

    let bulk = request_ok(
        i,
        r,
        "17",
        ADMIN,
        "promotion.bulkSet",
        json!({ "statuses": { (student_id.clone()): "Promoted" } }),
    );
    assert_eq!(bulk["updated"], 1);
    let status = request_ok(
        i,
        r,
        "18",
        Some((student_id.as_str(), "STUDENT")),
        "promotion.status",
        json!({ "studentId": student_id }),
    );
    assert_eq!(status["status"], "Promoted");

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn settings_update_changes_grade_validation() {
    let workspace = temp_dir("records-ipc-settings");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let (i, r) = (&mut stdin, &mut reader);
    request_ok(i, r, "1", None, "workspace.select", json!({ "path": workspace.to_string_lossy() }));

    let defaults = request_ok(i, r, "2", ADMIN, "settings.get", json!({}));
    assert_eq!(defaults["passThreshold"], 7.0);
    assert!(defaults["gradeStep"].is_null());

    let updated = request_ok(i, r, "3", ADMIN, "settings.update", json!({ "gradeStep": 0.5 }));
    assert_eq!(updated["gradeStep"], 0.5);
    assert_eq!(updated["writesRequireActiveCycle"], true);

    let e = request_err(i, r, "4", ADMIN, "settings.update", json!({ "gradeStep": -1 }));
    assert_eq!(e["code"], "validation_error");
    let e = request_err(i, r, "5", ADMIN, "settings.update", json!({ "colour": "red" }));
    assert_eq!(e["code"], "bad_params");
    let e = request_err(
        i,
        r,
        "6",
        Some(("d1", "DIRECTOR")),
        "settings.update",
        json!({ "passThreshold": 6 }),
    );
    assert_eq!(e["code"], "permission_denied");

    let reread = request_ok(i, r, "7", ADMIN, "settings.get", json!({}));
    assert_eq!(reread["gradeStep"], 0.5);
    assert_eq!(reread["passThreshold"], 7.0);

    let seen = request_ok(i, r, "8", Some(("t1", "TEACHER")), "settings.get", json!({}));
    assert_eq!(seen["gradeStep"], 0.5);
    let e = request_err(i, r, "9", Some(("s1", "STUDENT")), "settings.get", json!({}));
    assert_eq!(e["code"], "permission_denied");
    assert_eq!(e["details"]["operation"], "readSettings");

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn programs_and_account_edits_over_ipc() {
    let workspace = temp_dir("records-ipc-programs");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let (i, r) = (&mut stdin, &mut reader);
    request_ok(i, r, "1", None, "workspace.select", json!({ "path": workspace.to_string_lossy() }));

    let teacher = request_ok(
        i,
        r,
        "2",
        ADMIN,
        "users.create",
        json!({ "name": "Marta", "email": "marta@school.test", "nationalId": "20111222", "role": "DOCENTE" }),
    );
    let teacher_id = str_field(&teacher, "id");
    let subject = request_ok(
        i,
        r,
        "3",
        ADMIN,
        "subjects.create",
        json!({ "name": "Biology", "leadStaffId": teacher_id }),
    );
    let subject_id = str_field(&subject, "id");
    let cycle = request_ok(
        i,
        r,
        "4",
        ADMIN,
        "cycles.create",
        json!({ "name": "2025", "startDate": "2025-03-01", "endDate": "2025-12-15" }),
    );
    let cycle_id = str_field(&cycle, "id");

    let as_teacher = Some((teacher_id.as_str(), "TEACHER"));
    let e = request_err(
        i,
        r,
        "5",
        as_teacher,
        "programs.upsert",
        json!({ "subjectId": subject_id, "title": "Cells", "content": "Unit 1" }),
    );
    assert_eq!(e["details"]["precondition"], "no-active-cycle");

    request_ok(i, r, "6", ADMIN, "cycles.activate", json!({ "cycleId": cycle_id }));
    let first = request_ok(
        i,
        r,
        "7",
        as_teacher,
        "programs.upsert",
        json!({ "subjectId": subject_id, "title": "Cells", "content": "Unit 1" }),
    );
    assert_eq!(first["academicCycleId"], cycle_id.as_str());
    let second = request_ok(
        i,
        r,
        "8",
        as_teacher,
        "programs.upsert",
        json!({ "subjectId": subject_id, "title": "Cells and tissues", "content": "Units 1-2" }),
    );
    assert_eq!(second["id"], first["id"]);
    assert_eq!(second["createdAt"], first["createdAt"]);

    let got = request_ok(
        i,
        r,
        "9",
        as_teacher,
        "programs.get",
        json!({ "subjectId": subject_id, "cycleId": cycle_id }),
    );
    assert_eq!(got["program"]["title"], "Cells and tissues");
    let listed = request_ok(
        i,
        r,
        "10",
        Some(("p1", "PROCTOR")),
        "programs.forSubject",
        json!({ "subjectId": subject_id, "cycleId": cycle_id }),
    );
    assert_eq!(listed["programs"].as_array().map(|a| a.len()), Some(1));

    let renamed = request_ok(
        i,
        r,
        "11",
        as_teacher,
        "users.update",
        json!({ "userId": teacher_id, "name": "Marta Gil", "email": "MGIL@school.test" }),
    );
    assert_eq!(renamed["name"], "Marta Gil");
    assert_eq!(renamed["email"], "mgil@school.test");
    let e = request_err(
        i,
        r,
        "12",
        as_teacher,
        "users.update",
        json!({ "userId": teacher_id, "role": "ADMIN" }),
    );
    assert_eq!(e["code"], "permission_denied");
    let e = request_err(i, r, "13", ADMIN, "users.delete", json!({ "userId": teacher_id }));
    assert_eq!(e["details"]["reason"], "account-has-records");

    drop(stdin);
    let _ = child.wait();
}
