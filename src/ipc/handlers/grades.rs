use crate::grading::{self, ComputeOptions};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{calc_err, db_conn, optional_bool, optional_str_list, required_str};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn to_json<T: serde::Serialize>(req: &Request, value: &T) -> serde_json::Value {
    match serde_json::to_value(value) {
        Ok(v) => ok(&req.id, v),
        Err(e) => err(&req.id, "serialize_failed", e.to_string(), None),
    }
}

fn handle_grades_compute(state: &mut AppState, req: &Request) -> serde_json::Value {
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let override_locks = match optional_bool(req, "overrideLocks") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(conn) = state.db.as_mut() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    match grading::compute_final_grades(conn, &class_id, ComputeOptions { override_locks }) {
        Ok(outcome) => to_json(req, &outcome),
        Err(e) => calc_err(&req.id, e),
    }
}

fn handle_grades_summaries(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match grading::list_summaries(conn, &class_id) {
        Ok(listing) => to_json(req, &listing),
        Err(e) => calc_err(&req.id, e),
    }
}

fn handle_grades_sheet(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match grading::grade_sheet(conn, &class_id) {
        Ok(sheet) => to_json(req, &sheet),
        Err(e) => calc_err(&req.id, e),
    }
}

fn handle_grades_breakdown(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match grading::student_breakdown(conn, &class_id, &student_id) {
        Ok(model) => to_json(req, &model),
        Err(e) => calc_err(&req.id, e),
    }
}

fn handle_grades_set_locked(state: &mut AppState, req: &Request, locked: bool) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let student_ids = match optional_str_list(req, "studentIds") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match grading::set_locked(conn, &class_id, student_ids.as_deref(), locked) {
        Ok(changed) => {
            tracing::info!(class_id = %class_id, locked, changed, "summary lock flag set");
            ok(&req.id, json!({ "changed": changed, "locked": locked }))
        }
        Err(e) => calc_err(&req.id, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grades.compute" => Some(handle_grades_compute(state, req)),
        "grades.summaries" => Some(handle_grades_summaries(state, req)),
        "grades.sheet" => Some(handle_grades_sheet(state, req)),
        "grades.breakdown" => Some(handle_grades_breakdown(state, req)),
        "grades.lock" => Some(handle_grades_set_locked(state, req, true)),
        "grades.unlock" => Some(handle_grades_set_locked(state, req, false)),
        _ => None,
    }
}
