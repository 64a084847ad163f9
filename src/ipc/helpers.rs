use rusqlite::Connection;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::RecordsPolicy;
use crate::error::CoreError;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::policy::Principal;

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn bad_params(message: impl Into<String>) -> Self {
        HandlerErr {
            code: "bad_params",
            message: message.into(),
            details: None,
        }
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<CoreError> for HandlerErr {
    fn from(e: CoreError) -> Self {
        if let CoreError::Db(inner) = &e {
            tracing::error!(error = %inner, "database failure");
        }
        HandlerErr {
            code: e.code(),
            message: e.to_string(),
            details: e.details(),
        }
    }
}

pub fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_optional_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

/// Decodes the whole params object (or one member of it) into a typed input.
pub fn parse_params<T: DeserializeOwned>(value: &serde_json::Value) -> Result<T, HandlerErr> {
    serde_json::from_value(value.clone()).map_err(|e| HandlerErr::bad_params(e.to_string()))
}

pub fn get_required_array<'a>(params: &'a serde_json::Value, key: &str) -> Result<&'a [serde_json::Value], HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_array())
        .map(|v| v.as_slice())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}[]", key)))
}

pub fn to_result<T: Serialize>(value: T) -> Result<serde_json::Value, HandlerErr> {
    serde_json::to_value(value).map_err(|e| HandlerErr {
        code: "internal_error",
        message: e.to_string(),
        details: None,
    })
}

pub fn load_policy(conn: &Connection) -> Result<RecordsPolicy, HandlerErr> {
    RecordsPolicy::load(conn).map_err(|e| HandlerErr {
        code: "db_error",
        message: format!("{e:#}"),
        details: None,
    })
}

/// Common shape of every records handler: needs an open workspace and an
/// authenticated actor, and turns the closure's result into a response.
pub fn with_actor<F>(state: &AppState, req: &Request, f: F) -> serde_json::Value
where
    F: FnOnce(&Connection, &Principal) -> Result<serde_json::Value, HandlerErr>,
{
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(actor) = req.actor.as_ref() else {
        return err(&req.id, "unauthenticated", "request has no actor", None);
    };
    match f(conn, actor) {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    }
}
