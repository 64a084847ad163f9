use crate::ipc::helpers::{get_required_str, parse_params, to_result, with_actor};
use crate::ipc::types::{AppState, Request};
use crate::subjects::{self, NewSubject, SubjectPatch};

fn handle_subjects_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_actor(state, req, |conn, actor| {
        let input: NewSubject = parse_params(&req.params)?;
        to_result(subjects::create_subject(conn, actor, input)?)
    })
}

fn handle_subjects_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_actor(state, req, |conn, actor| {
        let subject_id = get_required_str(&req.params, "subjectId")?;
        let patch: SubjectPatch = match req.params.get("patch") {
            Some(p) => parse_params(p)?,
            None => SubjectPatch::default(),
        };
        to_result(subjects::update_subject(conn, actor, &subject_id, patch)?)
    })
}

fn handle_subjects_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_actor(state, req, |conn, actor| {
        let subject_id = get_required_str(&req.params, "subjectId")?;
        subjects::delete_subject(conn, actor, &subject_id)?;
        Ok(serde_json::json!({ "ok": true }))
    })
}

fn handle_subjects_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_actor(state, req, |conn, actor| {
        let list = subjects::list_subjects(conn, actor)?;
        to_result(serde_json::json!({ "subjects": list }))
    })
}

fn handle_subjects_link(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_actor(state, req, |conn, actor| {
        let classroom_id = get_required_str(&req.params, "classroomId")?;
        let subject_id = get_required_str(&req.params, "subjectId")?;
        let changed = subjects::link_to_classroom(conn, actor, &classroom_id, &subject_id)?;
        Ok(serde_json::json!({ "changed": changed }))
    })
}

fn handle_subjects_unlink(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_actor(state, req, |conn, actor| {
        let classroom_id = get_required_str(&req.params, "classroomId")?;
        let subject_id = get_required_str(&req.params, "subjectId")?;
        let changed = subjects::unlink_from_classroom(conn, actor, &classroom_id, &subject_id)?;
        Ok(serde_json::json!({ "changed": changed }))
    })
}

fn handle_subjects_for_teacher(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_actor(state, req, |conn, actor| {
        let teacher_id = get_required_str(&req.params, "teacherId")?;
        let list = subjects::subjects_for_teacher(conn, actor, &teacher_id)?;
        to_result(serde_json::json!({ "subjects": list }))
    })
}

fn handle_subjects_for_classroom(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_actor(state, req, |conn, actor| {
        let classroom_id = get_required_str(&req.params, "classroomId")?;
        let list = subjects::subjects_for_classroom(conn, actor, &classroom_id)?;
        to_result(serde_json::json!({ "subjects": list }))
    })
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "subjects.create" => Some(handle_subjects_create(state, req)),
        "subjects.update" => Some(handle_subjects_update(state, req)),
        "subjects.delete" => Some(handle_subjects_delete(state, req)),
        "subjects.list" => Some(handle_subjects_list(state, req)),
        "subjects.link" => Some(handle_subjects_link(state, req)),
        "subjects.unlink" => Some(handle_subjects_unlink(state, req)),
        "subjects.forTeacher" => Some(handle_subjects_for_teacher(state, req)),
        "subjects.forClassroom" => Some(handle_subjects_for_classroom(state, req)),
        _ => None,
    }
}
