use super::handlers;
use super::types::{AppState, Request};
use crate::ipc::error::err;

pub fn handle_request(state: &mut AppState, req: Request) -> serde_json::Value {
    let _span = tracing::debug_span!("request", id = %req.id, method = %req.method).entered();

    if let Some(resp) = handlers::core::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::classes::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::students::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::categories::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::items::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::scores::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::grades::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::transmutation::try_handle(state, &req) {
        return resp;
    }

    tracing::debug!(method = %req.method, "unknown method");
    err(
        &req.id,
        "not_implemented",
        format!("unknown method: {}", req.method),
        None,
    )
}
