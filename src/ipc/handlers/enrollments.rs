use crate::enrollment;
use crate::ipc::helpers::{get_required_str, load_policy, to_result, with_actor};
use crate::ipc::types::{AppState, Request};

fn handle_enrollments_enroll(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_actor(state, req, |conn, actor| {
        let student_id = get_required_str(&req.params, "studentId")?;
        let classroom_id = get_required_str(&req.params, "classroomId")?;
        let cycle_id = get_required_str(&req.params, "cycleId")?;
        let policy = load_policy(conn)?;
        to_result(enrollment::enroll(
            conn,
            &policy,
            actor,
            &student_id,
            &classroom_id,
            &cycle_id,
        )?)
    })
}

fn handle_enrollments_unenroll(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_actor(state, req, |conn, actor| {
        let enrollment_id = get_required_str(&req.params, "enrollmentId")?;
        enrollment::unenroll(conn, actor, &enrollment_id)?;
        Ok(serde_json::json!({ "ok": true }))
    })
}

fn handle_enrollments_available(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_actor(state, req, |conn, actor| {
        let cycle_id = get_required_str(&req.params, "cycleId")?;
        let students = enrollment::list_available(conn, actor, &cycle_id)?;
        to_result(serde_json::json!({ "students": students }))
    })
}

fn handle_enrollments_by_classroom(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_actor(state, req, |conn, actor| {
        let classroom_id = get_required_str(&req.params, "classroomId")?;
        let cycle_id = get_required_str(&req.params, "cycleId")?;
        let list = enrollment::list_by_classroom(conn, actor, &classroom_id, &cycle_id)?;
        to_result(serde_json::json!({ "enrollments": list }))
    })
}

fn handle_enrollments_for_student(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_actor(state, req, |conn, actor| {
        let student_id = get_required_str(&req.params, "studentId")?;
        let cycle_id = get_required_str(&req.params, "cycleId")?;
        let found = enrollment::enrollment_for_student(conn, actor, &student_id, &cycle_id)?;
        to_result(serde_json::json!({ "enrollment": found }))
    })
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "enrollments.enroll" => Some(handle_enrollments_enroll(state, req)),
        "enrollments.unenroll" => Some(handle_enrollments_unenroll(state, req)),
        "enrollments.available" => Some(handle_enrollments_available(state, req)),
        "enrollments.byClassroom" => Some(handle_enrollments_by_classroom(state, req)),
        "enrollments.forStudent" => Some(handle_enrollments_for_student(state, req)),
        _ => None,
    }
}
