use crate::calc;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    db_conn, ensure_exists, optional_f64, optional_str, required_name, required_str,
    HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashMap;
use uuid::Uuid;

fn weight_total_excluding(
    conn: &Connection,
    req: &Request,
    class_id: &str,
    exclude_category_id: Option<&str>,
) -> HandlerResult<f64> {
    conn.query_row(
        "SELECT COALESCE(SUM(weight), 0) FROM categories
         WHERE class_id = ?1 AND (?2 IS NULL OR id <> ?2)",
        (class_id, exclude_category_id),
        |r| r.get(0),
    )
    .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))
}

fn validate_weight(req: &Request, weight: f64) -> HandlerResult<f64> {
    if weight < 0.0 {
        return Err(err(
            &req.id,
            "bad_params",
            "weight must be >= 0",
            Some(json!({ "weight": weight })),
        ));
    }
    Ok(weight)
}

fn check_cap(req: &Request, name: &str, others: f64, weight: f64) -> HandlerResult<()> {
    if calc::exceeds_weight_cap(others + weight) {
        return Err(err(
            &req.id,
            "weights_exceeded",
            format!(
                "category '{}' would push the class total past 100% (other categories: {}%)",
                name, others
            ),
            Some(json!({ "currentTotal": others, "weight": weight })),
        ));
    }
    Ok(())
}

fn handle_categories_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let mut items_stmt = match conn.prepare(
        "SELECT i.id, i.category_id, i.name, i.total_items, i.passing_percentage
         FROM items i
         JOIN categories c ON c.id = i.category_id
         WHERE c.class_id = ?
         ORDER BY i.sort_order, i.rowid",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let item_rows = items_stmt
        .query_map([&class_id], |r| {
            let id: String = r.get(0)?;
            let category_id: String = r.get(1)?;
            let name: String = r.get(2)?;
            let total_items: i64 = r.get(3)?;
            let passing_percentage: f64 = r.get(4)?;
            Ok((
                category_id,
                json!({
                    "id": id,
                    "name": name,
                    "totalItems": total_items,
                    "passingPercentage": passing_percentage
                }),
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    let mut items_by_category: HashMap<String, Vec<serde_json::Value>> = HashMap::new();
    match item_rows {
        Ok(rows) => {
            for (category_id, item) in rows {
                items_by_category.entry(category_id).or_default().push(item);
            }
        }
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let mut stmt = match conn.prepare(
        "SELECT id, name, weight FROM categories WHERE class_id = ? ORDER BY name, id",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&class_id], |r| {
            let id: String = r.get(0)?;
            let name: String = r.get(1)?;
            let weight: f64 = r.get(2)?;
            Ok((id, name, weight))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    let rows = match rows {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let weights: Vec<f64> = rows.iter().map(|(_, _, w)| *w).collect();
    let weight_total = calc::weight_total(&weights);
    let categories: Vec<serde_json::Value> = rows
        .into_iter()
        .map(|(id, name, weight)| {
            let items = items_by_category.remove(&id).unwrap_or_default();
            json!({
                "id": id,
                "name": name,
                "weight": weight,
                "items": items
            })
        })
        .collect();

    ok(
        &req.id,
        json!({
            "categories": categories,
            "weightTotal": weight_total,
            "weightsValid": calc::weights_valid(weight_total)
        }),
    )
}

fn handle_categories_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let name = match required_name(req, "name") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let weight = match optional_f64(req, "weight") {
        Ok(Some(w)) => match validate_weight(req, w) {
            Ok(w) => w,
            Err(resp) => return resp,
        },
        Ok(None) => return err(&req.id, "bad_params", "missing weight", None),
        Err(resp) => return resp,
    };
    if let Err(resp) = ensure_exists(
        conn,
        req,
        "SELECT 1 FROM classes WHERE id = ?",
        &class_id,
        "class",
    ) {
        return resp;
    }

    let existing = match weight_total_excluding(conn, req, &class_id, None) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if let Err(resp) = check_cap(req, &name, existing, weight) {
        return resp;
    }

    let category_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO categories(id, class_id, name, weight) VALUES(?, ?, ?, ?)",
        (&category_id, &class_id, &name, weight),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "categories" })),
        );
    }

    ok(
        &req.id,
        json!({
            "categoryId": category_id,
            "name": name,
            "weight": weight,
            "weightTotal": existing + weight
        }),
    )
}

fn handle_categories_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let category_id = match required_str(req, "categoryId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let current: Option<(String, String, f64)> = match conn
        .query_row(
            "SELECT class_id, name, weight FROM categories WHERE id = ?",
            [&category_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((class_id, current_name, current_weight)) = current else {
        return err(&req.id, "not_found", "category not found", None);
    };

    let name = match optional_str(req, "name") {
        Ok(Some(v)) => v.trim().to_string(),
        Ok(None) => current_name,
        Err(resp) => return resp,
    };
    if name.is_empty() {
        return err(&req.id, "bad_params", "name must not be empty", None);
    }
    let weight = match optional_f64(req, "weight") {
        Ok(Some(w)) => match validate_weight(req, w) {
            Ok(w) => w,
            Err(resp) => return resp,
        },
        Ok(None) => current_weight,
        Err(resp) => return resp,
    };

    let others = match weight_total_excluding(conn, req, &class_id, Some(&category_id)) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if let Err(resp) = check_cap(req, &name, others, weight) {
        return resp;
    }

    if let Err(e) = conn.execute(
        "UPDATE categories SET name = ?, weight = ? WHERE id = ?",
        (&name, weight, &category_id),
    ) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({
            "categoryId": category_id,
            "name": name,
            "weight": weight,
            "weightTotal": others + weight
        }),
    )
}

fn handle_categories_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let category_id = match required_str(req, "categoryId") {
        Ok(v) => v,
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

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    for (table, sql) in [
        (
            "scores",
            "DELETE FROM scores WHERE item_id IN (SELECT id FROM items WHERE category_id = ?)",
        ),
        ("items", "DELETE FROM items WHERE category_id = ?"),
        ("categories", "DELETE FROM categories WHERE id = ?"),
    ] {
        if let Err(e) = tx.execute(sql, [&category_id]) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": table })),
            );
        }
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "categories.list" => Some(handle_categories_list(state, req)),
        "categories.create" => Some(handle_categories_create(state, req)),
        "categories.update" => Some(handle_categories_update(state, req)),
        "categories.delete" => Some(handle_categories_delete(state, req)),
        _ => None,
    }
}
