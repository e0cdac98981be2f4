use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, required_str, HandlerResult};
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use rusqlite::Connection;
use serde_json::json;
use std::collections::HashSet;
use uuid::Uuid;

const SCORES_SAVE_MAX_ENTRIES: usize = 5000;

enum EntryScore {
    Blank,
    Value(f64),
    Invalid(&'static str),
}

fn parse_entry_score(v: Option<&serde_json::Value>) -> EntryScore {
    let Some(v) = v.filter(|v| !v.is_null()) else {
        return EntryScore::Blank;
    };
    let parsed = if let Some(s) = v.as_str() {
        let t = s.trim();
        if t.is_empty() {
            return EntryScore::Blank;
        }
        match t.parse::<f64>() {
            Ok(n) => n,
            Err(_) => return EntryScore::Invalid("not_a_number"),
        }
    } else if let Some(n) = v.as_f64() {
        n
    } else {
        return EntryScore::Invalid("not_a_number");
    };

    if !parsed.is_finite() {
        return EntryScore::Invalid("not_a_number");
    }
    if parsed < 0.0 {
        return EntryScore::Invalid("negative_score");
    }
    EntryScore::Value(parsed)
}

fn class_member_ids(
    conn: &Connection,
    req: &Request,
    sql: &str,
    class_id: &str,
) -> HandlerResult<HashSet<String>> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;
    let ids = stmt
        .query_map([class_id], |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<HashSet<_>, _>>())
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;
    Ok(ids)
}

fn handle_scores_save(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(entries) = req.params.get("entries").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "entries must be an array", None);
    };
    if entries.len() > SCORES_SAVE_MAX_ENTRIES {
        return err(
            &req.id,
            "too_many_entries",
            format!("at most {} entries per request", SCORES_SAVE_MAX_ENTRIES),
            Some(json!({ "count": entries.len() })),
        );
    }

    let students = match class_member_ids(
        conn,
        req,
        "SELECT id FROM students WHERE class_id = ?",
        &class_id,
    ) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let items = match class_member_ids(
        conn,
        req,
        "SELECT i.id FROM items i JOIN categories c ON c.id = i.category_id WHERE c.class_id = ?",
        &class_id,
    ) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    let updated_at = Utc::now().to_rfc3339();
    let mut saved = 0_usize;
    let mut skipped = 0_usize;
    let mut rejected: Vec<serde_json::Value> = Vec::new();

    for (index, entry) in entries.iter().enumerate() {
        let student_id = entry.get("studentId").and_then(|v| v.as_str());
        let item_id = entry.get("itemId").and_then(|v| v.as_str());
        let (Some(student_id), Some(item_id)) = (student_id, item_id) else {
            rejected.push(json!({ "index": index, "reason": "bad_entry" }));
            continue;
        };
        let reject = |reason: &str| {
            json!({
                "index": index,
                "studentId": student_id,
                "itemId": item_id,
                "reason": reason
            })
        };
        if !students.contains(student_id) {
            rejected.push(reject("student_not_in_class"));
            continue;
        }
        if !items.contains(item_id) {
            rejected.push(reject("item_not_in_class"));
            continue;
        }

        let value = match parse_entry_score(entry.get("score")) {
            EntryScore::Blank => {
                skipped += 1;
                continue;
            }
            EntryScore::Invalid(reason) => {
                rejected.push(reject(reason));
                continue;
            }
            EntryScore::Value(v) => v,
        };

        if let Err(e) = tx.execute(
            "INSERT INTO scores(id, student_id, item_id, raw_value, updated_at)
             VALUES(?, ?, ?, ?, ?)
             ON CONFLICT(student_id, item_id) DO UPDATE SET
               raw_value = excluded.raw_value,
               updated_at = excluded.updated_at",
            (
                Uuid::new_v4().to_string(),
                student_id,
                item_id,
                value,
                &updated_at,
            ),
        ) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "scores", "index": index })),
            );
        }
        saved += 1;
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    if !rejected.is_empty() {
        tracing::warn!(class_id = %class_id, rejected = rejected.len(), "score entries rejected");
    }
    ok(
        &req.id,
        json!({
            "saved": saved,
            "skipped": skipped,
            "rejected": rejected
        }),
    )
}

fn handle_scores_clear(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let item_id = match required_str(req, "itemId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match conn.execute(
        "DELETE FROM scores WHERE student_id = ? AND item_id = ?",
        (&student_id, &item_id),
    ) {
        Ok(n) => ok(&req.id, json!({ "removed": n })),
        Err(e) => err(&req.id, "db_delete_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "scores.save" => Some(handle_scores_save(state, req)),
        "scores.clear" => Some(handle_scores_clear(state, req)),
        _ => None,
    }
}
