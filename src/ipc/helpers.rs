use crate::calc::CalcError;
use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

pub type HandlerResult<T> = Result<T, serde_json::Value>;

pub fn calc_err(id: &str, e: CalcError) -> serde_json::Value {
    err(id, &e.code, e.message, e.details)
}

pub fn db_conn<'a>(state: &'a AppState, req: &Request) -> HandlerResult<&'a Connection> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

pub fn required_str(req: &Request, key: &str) -> HandlerResult<String> {
    match req.params.get(key).and_then(|v| v.as_str()) {
        Some(v) => Ok(v.to_string()),
        None => Err(err(&req.id, "bad_params", format!("missing {}", key), None)),
    }
}

/// Trimmed, non-empty string.
pub fn required_name(req: &Request, key: &str) -> HandlerResult<String> {
    let v = required_str(req, key)?;
    let t = v.trim();
    if t.is_empty() {
        return Err(err(
            &req.id,
            "bad_params",
            format!("{} must not be empty", key),
            None,
        ));
    }
    Ok(t.to_string())
}

/// `None` when the key is absent or null.
pub fn optional_str(req: &Request, key: &str) -> HandlerResult<Option<String>> {
    match req.params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => match v.as_str() {
            Some(s) => Ok(Some(s.to_string())),
            None => Err(err(
                &req.id,
                "bad_params",
                format!("{} must be a string", key),
                None,
            )),
        },
    }
}

/// `None` when the key is absent or null; finite numbers only.
pub fn optional_f64(req: &Request, key: &str) -> HandlerResult<Option<f64>> {
    match req.params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => match v.as_f64().filter(|n| n.is_finite()) {
            Some(n) => Ok(Some(n)),
            None => Err(err(
                &req.id,
                "bad_params",
                format!("{} must be a number", key),
                Some(json!({ "field": key, "value": v })),
            )),
        },
    }
}

pub fn optional_bool(req: &Request, key: &str) -> HandlerResult<bool> {
    match req.params.get(key) {
        None => Ok(false),
        Some(v) if v.is_null() => Ok(false),
        Some(v) => v.as_bool().ok_or_else(|| {
            err(
                &req.id,
                "bad_params",
                format!("{} must be a boolean", key),
                None,
            )
        }),
    }
}

/// Optional list of string ids, e.g. `studentIds`.
pub fn optional_str_list(req: &Request, key: &str) -> HandlerResult<Option<Vec<String>>> {
    let Some(v) = req.params.get(key).filter(|v| !v.is_null()) else {
        return Ok(None);
    };
    let Some(arr) = v.as_array() else {
        return Err(err(
            &req.id,
            "bad_params",
            format!("{} must be an array of strings", key),
            None,
        ));
    };
    let mut out = Vec::with_capacity(arr.len());
    for item in arr {
        match item.as_str() {
            Some(s) => out.push(s.to_string()),
            None => {
                return Err(err(
                    &req.id,
                    "bad_params",
                    format!("{} must be an array of strings", key),
                    None,
                ))
            }
        }
    }
    Ok(Some(out))
}

pub fn ensure_exists(
    conn: &Connection,
    req: &Request,
    sql: &str,
    id: &str,
    what: &str,
) -> HandlerResult<()> {
    let exists: Option<i64> = conn
        .query_row(sql, [id], |r| r.get(0))
        .optional()
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;
    if exists.is_none() {
        return Err(err(&req.id, "not_found", format!("{} not found", what), None));
    }
    Ok(())
}
