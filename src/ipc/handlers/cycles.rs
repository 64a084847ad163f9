use crate::cycles;
use crate::ipc::helpers::{get_optional_str, get_required_str, to_result, with_actor};
use crate::ipc::types::{AppState, Request};
use crate::policy::{authorize, Operation};

fn handle_cycles_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_actor(state, req, |conn, actor| {
        let name = get_required_str(&req.params, "name")?;
        let start_date = get_required_str(&req.params, "startDate")?;
        let end_date = get_required_str(&req.params, "endDate")?;
        let request_key = get_optional_str(&req.params, "requestKey");
        to_result(cycles::create_cycle(
            conn,
            actor,
            &name,
            &start_date,
            &end_date,
            request_key.as_deref(),
        )?)
    })
}

fn handle_cycles_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_actor(state, req, |conn, actor| {
        let list = cycles::list_cycles(conn, actor)?;
        to_result(serde_json::json!({ "cycles": list }))
    })
}

fn handle_cycles_active(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_actor(state, req, |conn, actor| {
        authorize(actor, Operation::ReadCycles)?;
        let active = cycles::get_active_cycle(conn)?;
        to_result(serde_json::json!({ "cycle": active }))
    })
}

fn handle_cycles_activate(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_actor(state, req, |conn, actor| {
        let cycle_id = get_required_str(&req.params, "cycleId")?;
        to_result(cycles::activate_cycle(conn, actor, &cycle_id)?)
    })
}

fn handle_cycles_deactivate(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_actor(state, req, |conn, actor| {
        cycles::deactivate_all(conn, actor)?;
        Ok(serde_json::json!({ "ok": true }))
    })
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "cycles.create" => Some(handle_cycles_create(state, req)),
        "cycles.list" => Some(handle_cycles_list(state, req)),
        "cycles.active" => Some(handle_cycles_active(state, req)),
        "cycles.activate" => Some(handle_cycles_activate(state, req)),
        "cycles.deactivate" => Some(handle_cycles_deactivate(state, req)),
        _ => None,
    }
}
