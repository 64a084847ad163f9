use crate::guardians;
use crate::ipc::helpers::{get_required_str, to_result, with_actor};
use crate::ipc::types::{AppState, Request};

fn handle_guardians_link(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_actor(state, req, |conn, actor| {
        let tutor_id = get_required_str(&req.params, "tutorId")?;
        let student_id = get_required_str(&req.params, "studentId")?;
        to_result(guardians::link_child(conn, actor, &tutor_id, &student_id)?)
    })
}

fn handle_guardians_unlink(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_actor(state, req, |conn, actor| {
        let tutor_id = get_required_str(&req.params, "tutorId")?;
        let student_id = get_required_str(&req.params, "studentId")?;
        guardians::unlink_child(conn, actor, &tutor_id, &student_id)?;
        Ok(serde_json::json!({ "ok": true }))
    })
}

fn handle_guardians_children(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_actor(state, req, |conn, actor| {
        let tutor_id = get_required_str(&req.params, "tutorId")?;
        let children = guardians::children_of(conn, actor, &tutor_id)?;
        to_result(serde_json::json!({ "children": children }))
    })
}

fn handle_guardians_tutor_of(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_actor(state, req, |conn, actor| {
        let student_id = get_required_str(&req.params, "studentId")?;
        let tutor = guardians::tutor_of(conn, actor, &student_id)?;
        to_result(serde_json::json!({ "tutor": tutor }))
    })
}

fn handle_guardians_reconcile(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_actor(state, req, |conn, actor| {
        let removed = guardians::reconcile(conn, actor)?;
        to_result(serde_json::json!({ "removed": removed }))
    })
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "guardians.link" => Some(handle_guardians_link(state, req)),
        "guardians.unlink" => Some(handle_guardians_unlink(state, req)),
        "guardians.children" => Some(handle_guardians_children(state, req)),
        "guardians.tutorOf" => Some(handle_guardians_tutor_of(state, req)),
        "guardians.reconcile" => Some(handle_guardians_reconcile(state, req)),
        _ => None,
    }
}
