use crate::grades::{self, GradeEntry};
use crate::ipc::helpers::{get_required_str, load_policy, parse_params, to_result, with_actor};
use crate::ipc::types::{AppState, Request};

fn handle_grades_upsert(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_actor(state, req, |conn, actor| {
        let entry: GradeEntry = parse_params(&req.params)?;
        let policy = load_policy(conn)?;
        to_result(grades::upsert_grade(conn, &policy, actor, &entry)?)
    })
}

fn handle_grades_average(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_actor(state, req, |conn, actor| {
        let student_id = get_required_str(&req.params, "studentId")?;
        let cycle_id = get_required_str(&req.params, "cycleId")?;
        // Without a subject the mean spans the whole cycle.
        let average = match req.params.get("subjectId").and_then(|v| v.as_str()) {
            Some(subject_id) => grades::average_for(conn, actor, &student_id, subject_id, &cycle_id)?,
            None => grades::cycle_average(conn, actor, &student_id, &cycle_id)?,
        };
        Ok(serde_json::json!({ "average": average }))
    })
}

fn handle_grades_report_card(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_actor(state, req, |conn, actor| {
        let student_id = get_required_str(&req.params, "studentId")?;
        let cycle_id = get_required_str(&req.params, "cycleId")?;
        to_result(grades::report_card(conn, actor, &student_id, &cycle_id)?)
    })
}

fn handle_grades_sheet(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_actor(state, req, |conn, actor| {
        let classroom_id = get_required_str(&req.params, "classroomId")?;
        let subject_id = get_required_str(&req.params, "subjectId")?;
        let cycle_id = get_required_str(&req.params, "cycleId")?;
        let rows = grades::grade_sheet(conn, actor, &classroom_id, &subject_id, &cycle_id)?;
        to_result(serde_json::json!({ "rows": rows }))
    })
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grades.upsert" => Some(handle_grades_upsert(state, req)),
        "grades.average" => Some(handle_grades_average(state, req)),
        "grades.reportCard" => Some(handle_grades_report_card(state, req)),
        "grades.sheet" => Some(handle_grades_sheet(state, req)),
        _ => None,
    }
}
