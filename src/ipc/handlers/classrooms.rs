use crate::classrooms;
use crate::ipc::helpers::{get_required_str, to_result, with_actor};
use crate::ipc::types::{AppState, Request};

fn handle_classrooms_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_actor(state, req, |conn, actor| {
        let name = get_required_str(&req.params, "name")?;
        to_result(classrooms::create_classroom(conn, actor, &name)?)
    })
}

fn handle_classrooms_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_actor(state, req, |conn, actor| {
        let list = classrooms::list_classrooms(conn, actor)?;
        to_result(serde_json::json!({ "classrooms": list }))
    })
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classrooms.create" => Some(handle_classrooms_create(state, req)),
        "classrooms.list" => Some(handle_classrooms_list(state, req)),
        _ => None,
    }
}
