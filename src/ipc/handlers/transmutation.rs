use crate::grading;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{calc_err, db_conn};
use crate::ipc::types::{AppState, Request};
use crate::scales::{TransmutationRow, TransmutationTable};
use serde_json::json;

fn table_json(table: &TransmutationTable) -> serde_json::Value {
    json!({
        "rows": table.rows(),
        "isDefault": table.is_default()
    })
}

fn handle_transmutation_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, table_json(&TransmutationTable::default()));
    };
    match grading::load_transmutation_table(conn) {
        Ok(table) => ok(&req.id, table_json(&table)),
        Err(e) => calc_err(&req.id, e),
    }
}

fn handle_transmutation_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let Some(raw) = req.params.get("rows") else {
        return err(&req.id, "bad_params", "missing rows", None);
    };
    let rows: Vec<TransmutationRow> = match serde_json::from_value(raw.clone()) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "bad_params",
                format!("rows must be [{{minPercentage, maxPercentage, equivalentGrade}}]: {}", e),
                None,
            )
        }
    };

    match grading::replace_transmutation_table(conn, &rows) {
        Ok(table) => {
            tracing::info!(rows = rows.len(), "transmutation table replaced");
            ok(&req.id, table_json(&table))
        }
        Err(e) => calc_err(&req.id, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "transmutation.get" => Some(handle_transmutation_get(state, req)),
        "transmutation.set" => Some(handle_transmutation_set(state, req)),
        _ => None,
    }
}
