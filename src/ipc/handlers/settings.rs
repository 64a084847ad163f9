use crate::config::RecordsPolicy;
use crate::ipc::helpers::{load_policy, to_result, with_actor, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::policy::{authorize, Operation};

fn handle_settings_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_actor(state, req, |conn, actor| {
        authorize(actor, Operation::ReadSettings)?;
        to_result(load_policy(conn)?)
    })
}

/// Merges the supplied keys over the stored policy; unknown keys are rejected.
fn handle_settings_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_actor(state, req, |conn, actor| {
        authorize(actor, Operation::ManageSettings)?;
        let Some(patch) = req.params.as_object() else {
            return Err(HandlerErr::bad_params("params must be an object"));
        };
        let mut merged = to_result(load_policy(conn)?)?;
        for (k, v) in patch {
            if merged.get(k).is_none() {
                return Err(HandlerErr::bad_params(format!("unknown setting: {}", k)));
            }
            merged[k] = v.clone();
        }
        let policy: RecordsPolicy =
            serde_json::from_value(merged).map_err(|e| HandlerErr::bad_params(e.to_string()))?;
        policy.validate().map_err(|message| HandlerErr {
            code: "validation_error",
            message,
            details: None,
        })?;
        policy.save(conn).map_err(|e| HandlerErr {
            code: "db_error",
            message: format!("{e:#}"),
            details: None,
        })?;
        tracing::info!(actor = %actor.id, "records policy updated");
        to_result(policy)
    })
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "settings.get" => Some(handle_settings_get(state, req)),
        "settings.update" => Some(handle_settings_update(state, req)),
        _ => None,
    }
}
