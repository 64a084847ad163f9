use std::collections::BTreeMap;

use crate::ipc::helpers::{get_required_str, parse_params, to_result, with_actor, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::model::PromotionStatus;
use crate::promotion;

fn parse_status(raw: &str) -> Result<PromotionStatus, HandlerErr> {
    raw.parse::<PromotionStatus>().map_err(|e| HandlerErr::bad_params(e))
}

fn handle_promotion_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_actor(state, req, |conn, actor| {
        let student_id = get_required_str(&req.params, "studentId")?;
        let status = parse_status(&get_required_str(&req.params, "status")?)?;
        to_result(promotion::set_promotion_status(conn, actor, &student_id, status)?)
    })
}

fn handle_promotion_bulk_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_actor(state, req, |conn, actor| {
        let Some(raw) = req.params.get("statuses") else {
            return Err(HandlerErr::bad_params("missing statuses"));
        };
        let entries: BTreeMap<String, PromotionStatus> = parse_params(raw)?;
        to_result(promotion::bulk_set_promotion_statuses(conn, actor, &entries)?)
    })
}

fn handle_promotion_status(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_actor(state, req, |conn, actor| {
        let student_id = get_required_str(&req.params, "studentId")?;
        let status = promotion::status_for(conn, actor, &student_id)?;
        Ok(serde_json::json!({ "studentId": student_id, "status": status }))
    })
}

fn handle_promotion_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_actor(state, req, |conn, actor| {
        let list = promotion::list_statuses(conn, actor)?;
        to_result(serde_json::json!({ "students": list }))
    })
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "promotion.set" => Some(handle_promotion_set(state, req)),
        "promotion.bulkSet" => Some(handle_promotion_bulk_set(state, req)),
        "promotion.status" => Some(handle_promotion_status(state, req)),
        "promotion.list" => Some(handle_promotion_list(state, req)),
        _ => None,
    }
}
