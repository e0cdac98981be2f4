use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    db_conn, ensure_exists, optional_f64, optional_str, required_name, required_str,
    HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

/// `totalItems` is the item's maximum raw score: a non-negative integer.
fn parse_total_items(req: &Request) -> HandlerResult<Option<i64>> {
    match req.params.get("totalItems") {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => match v.as_i64() {
            Some(n) if n >= 0 => Ok(Some(n)),
            _ => Err(err(
                &req.id,
                "bad_params",
                "totalItems must be a non-negative integer",
                Some(json!({ "totalItems": v })),
            )),
        },
    }
}

fn handle_items_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let category_id = match required_str(req, "categoryId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let name = match required_name(req, "name") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let total_items = match parse_total_items(req) {
        Ok(v) => v.unwrap_or(0),
        Err(resp) => return resp,
    };
    let passing_percentage = match optional_f64(req, "passingPercentage") {
        Ok(v) => v.unwrap_or(0.0),
        Err(resp) => return resp,
    };
    if let Err(resp) = ensure_exists(
        conn,
        req,
        "SELECT 1 FROM categories WHERE id = ?",
        &category_id,
        "category",
    ) {
        return resp;
    }

    let next_sort: i64 = match conn.query_row(
        "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM items WHERE category_id = ?",
        [&category_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let item_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO items(id, category_id, name, total_items, passing_percentage, sort_order)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &item_id,
            &category_id,
            &name,
            total_items,
            passing_percentage,
            next_sort,
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "items" })),
        );
    }

    ok(
        &req.id,
        json!({
            "itemId": item_id,
            "name": name,
            "totalItems": total_items,
            "passingPercentage": passing_percentage
        }),
    )
}

fn handle_items_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let item_id = match required_str(req, "itemId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let current: Option<(String, i64, f64)> = match conn
        .query_row(
            "SELECT name, total_items, passing_percentage FROM items WHERE id = ?",
            [&item_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((current_name, current_total, current_passing)) = current else {
        return err(&req.id, "not_found", "item not found", None);
    };

    let name = match optional_str(req, "name") {
        Ok(Some(v)) => v.trim().to_string(),
        Ok(None) => current_name,
        Err(resp) => return resp,
    };
    if name.is_empty() {
        return err(&req.id, "bad_params", "name must not be empty", None);
    }
    let total_items = match parse_total_items(req) {
        Ok(v) => v.unwrap_or(current_total),
        Err(resp) => return resp,
    };
    let passing_percentage = match optional_f64(req, "passingPercentage") {
        Ok(v) => v.unwrap_or(current_passing),
        Err(resp) => return resp,
    };

    if let Err(e) = conn.execute(
        "UPDATE items SET name = ?, total_items = ?, passing_percentage = ? WHERE id = ?",
        (&name, total_items, passing_percentage, &item_id),
    ) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({
            "itemId": item_id,
            "name": name,
            "totalItems": total_items,
            "passingPercentage": passing_percentage
        }),
    )
}

fn handle_items_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let item_id = match required_str(req, "itemId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if let Err(resp) = ensure_exists(
        conn,
        req,
        "SELECT 1 FROM items WHERE id = ?",
        &item_id,
        "item",
    ) {
        return resp;
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    // Scores go first so none are left pointing at a missing item.
    let removed_scores = match tx.execute("DELETE FROM scores WHERE item_id = ?", [&item_id]) {
        Ok(n) => n,
        Err(e) => {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": "scores" })),
            );
        }
    };
    if let Err(e) = tx.execute("DELETE FROM items WHERE id = ?", [&item_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "items" })),
        );
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true, "removedScores": removed_scores }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "items.create" => Some(handle_items_create(state, req)),
        "items.update" => Some(handle_items_update(state, req)),
        "items.delete" => Some(handle_items_delete(state, req)),
        _ => None,
    }
}
