use crate::ipc::helpers::{get_optional_str, get_required_str, load_policy, parse_params, to_result, with_actor};
use crate::ipc::types::{AppState, Request};
use crate::programs::{self, ProgramInput};

fn handle_programs_upsert(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_actor(state, req, |conn, actor| {
        let input: ProgramInput = parse_params(&req.params)?;
        let policy = load_policy(conn)?;
        to_result(programs::upsert_program(conn, &policy, actor, &input)?)
    })
}

fn handle_programs_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_actor(state, req, |conn, actor| {
        let teacher_id = get_optional_str(&req.params, "teacherId").unwrap_or_else(|| actor.id.clone());
        let subject_id = get_required_str(&req.params, "subjectId")?;
        let cycle_id = get_required_str(&req.params, "cycleId")?;
        let found = programs::get_program(conn, actor, &teacher_id, &subject_id, &cycle_id)?;
        to_result(serde_json::json!({ "program": found }))
    })
}

fn handle_programs_for_subject(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_actor(state, req, |conn, actor| {
        let subject_id = get_required_str(&req.params, "subjectId")?;
        let cycle_id = get_required_str(&req.params, "cycleId")?;
        let list = programs::programs_for_subject(conn, actor, &subject_id, &cycle_id)?;
        to_result(serde_json::json!({ "programs": list }))
    })
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "programs.upsert" => Some(handle_programs_upsert(state, req)),
        "programs.get" => Some(handle_programs_get(state, req)),
        "programs.forSubject" => Some(handle_programs_for_subject(state, req)),
        _ => None,
    }
}
