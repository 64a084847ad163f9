use crate::ipc::helpers::{get_optional_str, get_required_str, parse_params, to_result, with_actor, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::model::Role;
use crate::policy::{authorize, Operation};
use crate::users::{self, AccountPatch, NewAccount};

fn handle_users_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_actor(state, req, |conn, actor| {
        let input: NewAccount = parse_params(&req.params)?;
        to_result(users::create_account(conn, actor, &input)?)
    })
}

fn handle_users_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_actor(state, req, |conn, actor| {
        let user_id = get_required_str(&req.params, "userId")?;
        // Anyone may read their own account.
        if actor.id != user_id {
            authorize(actor, Operation::ReadAccounts)?;
        }
        to_result(users::get_account(conn, &user_id)?)
    })
}

fn handle_users_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_actor(state, req, |conn, actor| {
        let role = match get_optional_str(&req.params, "role") {
            Some(raw) => Some(raw.parse::<Role>().map_err(|e| HandlerErr::bad_params(e))?),
            None => None,
        };
        let accounts = users::list_accounts(conn, actor, role)?;
        to_result(serde_json::json!({ "users": accounts }))
    })
}

fn handle_users_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_actor(state, req, |conn, actor| {
        let user_id = get_required_str(&req.params, "userId")?;
        let patch: AccountPatch = parse_params(&req.params)?;
        to_result(users::update_account(conn, actor, &user_id, &patch)?)
    })
}

fn handle_users_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_actor(state, req, |conn, actor| {
        let user_id = get_required_str(&req.params, "userId")?;
        users::delete_account(conn, actor, &user_id)?;
        Ok(serde_json::json!({ "ok": true }))
    })
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "users.create" => Some(handle_users_create(state, req)),
        "users.get" => Some(handle_users_get(state, req)),
        "users.list" => Some(handle_users_list(state, req)),
        "users.update" => Some(handle_users_update(state, req)),
        "users.delete" => Some(handle_users_delete(state, req)),
        _ => None,
    }
}
