use crate::analytics::{self, DEFAULT_TOP_LIMIT};
use crate::ipc::helpers::{get_required_str, load_policy, to_result, with_actor, HandlerErr};
use crate::ipc::types::{AppState, Request};

fn handle_top_students(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_actor(state, req, |conn, actor| {
        let cycle_id = get_required_str(&req.params, "cycleId")?;
        let limit = match req.params.get("limit") {
            None => DEFAULT_TOP_LIMIT,
            Some(v) => match v.as_u64() {
                Some(n) if n > 0 => n as usize,
                _ => return Err(HandlerErr::bad_params("limit must be a positive integer")),
            },
        };
        let students = analytics::top_students(conn, actor, &cycle_id, limit)?;
        to_result(serde_json::json!({ "students": students }))
    })
}

fn handle_subject_performance(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_actor(state, req, |conn, actor| {
        let classroom_id = get_required_str(&req.params, "classroomId")?;
        let subject_id = get_required_str(&req.params, "subjectId")?;
        let cycle_id = get_required_str(&req.params, "cycleId")?;
        let policy = load_policy(conn)?;
        to_result(analytics::subject_performance(
            conn,
            &policy,
            actor,
            &classroom_id,
            &subject_id,
            &cycle_id,
        )?)
    })
}

fn handle_cohort_summary(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_actor(state, req, |conn, actor| {
        to_result(analytics::cohort_summary(conn, actor)?)
    })
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "analytics.topStudents" => Some(handle_top_students(state, req)),
        "analytics.subjectPerformance" => Some(handle_subject_performance(state, req)),
        "analytics.cohortSummary" => Some(handle_cohort_summary(state, req)),
        _ => None,
    }
}
