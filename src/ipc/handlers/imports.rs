use crate::import;
use crate::ipc::helpers::{get_required_array, load_policy, to_result, with_actor};
use crate::ipc::types::{AppState, Request};

fn handle_import_accounts(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_actor(state, req, |conn, actor| {
        let rows = get_required_array(&req.params, "rows")?;
        to_result(import::import_accounts(conn, actor, rows)?)
    })
}

fn handle_import_grades(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_actor(state, req, |conn, actor| {
        let rows = get_required_array(&req.params, "rows")?;
        let policy = load_policy(conn)?;
        to_result(import::import_grades(conn, &policy, actor, rows)?)
    })
}

fn handle_import_enrollments(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_actor(state, req, |conn, actor| {
        let rows = get_required_array(&req.params, "rows")?;
        let policy = load_policy(conn)?;
        to_result(import::import_enrollments(conn, &policy, actor, rows)?)
    })
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "import.accounts" => Some(handle_import_accounts(state, req)),
        "import.grades" => Some(handle_import_grades(state, req)),
        "import.enrollments" => Some(handle_import_enrollments(state, req)),
        _ => None,
    }
}
