use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    db_conn, ensure_exists, optional_f64, optional_str, required_name, required_str,
};
use crate::ipc::types::{AppState, Request};
use crate::scales::DEFAULT_PASSING_GRADE;
use serde_json::json;
use uuid::Uuid;

fn validate_passing_grade(req: &Request, v: Option<f64>) -> Result<Option<f64>, serde_json::Value> {
    match v {
        Some(pg) if !(0.0..=100.0).contains(&pg) => Err(err(
            &req.id,
            "bad_params",
            "passingGrade must be between 0 and 100",
            Some(json!({ "passingGrade": pg })),
        )),
        other => Ok(other),
    }
}

fn handle_classes_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "classes": [] }));
    };

    // Correlated subqueries avoid double-counting from joins.
    let mut stmt = match conn.prepare(
        "SELECT
           c.id,
           c.name,
           c.passing_grade,
           (SELECT COUNT(*) FROM students s WHERE s.class_id = c.id) AS student_count,
           (SELECT COUNT(*) FROM categories g WHERE g.class_id = c.id) AS category_count,
           (SELECT COALESCE(SUM(g.weight), 0) FROM categories g WHERE g.class_id = c.id) AS weight_total
         FROM classes c
         ORDER BY c.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let passing_grade: Option<f64> = row.get(2)?;
            let student_count: i64 = row.get(3)?;
            let category_count: i64 = row.get(4)?;
            let weight_total: f64 = row.get(5)?;
            Ok(json!({
                "id": id,
                "name": name,
                "passingGrade": passing_grade.unwrap_or(DEFAULT_PASSING_GRADE),
                "studentCount": student_count,
                "categoryCount": category_count,
                "weightTotal": weight_total
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(classes) => ok(&req.id, json!({ "classes": classes })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_classes_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let name = match required_name(req, "name") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let passing_grade =
        match optional_f64(req, "passingGrade").and_then(|v| validate_passing_grade(req, v)) {
            Ok(v) => v,
            Err(resp) => return resp,
        };

    let class_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO classes(id, name, passing_grade) VALUES(?, ?, ?)",
        (&class_id, &name, passing_grade),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "classes" })),
        );
    }

    tracing::info!(class_id = %class_id, "class created");
    ok(
        &req.id,
        json!({
            "classId": class_id,
            "name": name,
            "passingGrade": passing_grade.unwrap_or(DEFAULT_PASSING_GRADE)
        }),
    )
}

fn handle_classes_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
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

    let name = match optional_str(req, "name") {
        Ok(v) => v.map(|s| s.trim().to_string()),
        Err(resp) => return resp,
    };
    if name.as_deref() == Some("") {
        return err(&req.id, "bad_params", "name must not be empty", None);
    }
    if let Some(name) = &name {
        if let Err(e) = conn.execute(
            "UPDATE classes SET name = ? WHERE id = ?",
            (name, &class_id),
        ) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }

    // Explicit null resets to the default threshold; absence leaves it alone.
    if req.params.get("passingGrade").is_some() {
        let passing_grade =
            match optional_f64(req, "passingGrade").and_then(|v| validate_passing_grade(req, v)) {
                Ok(v) => v,
                Err(resp) => return resp,
            };
        if let Err(e) = conn.execute(
            "UPDATE classes SET passing_grade = ? WHERE id = ?",
            (passing_grade, &class_id),
        ) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_classes_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
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

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Dependency order; the schema has no ON DELETE CASCADE.
    let steps: [(&str, &str); 6] = [
        ("grade_summaries", "DELETE FROM grade_summaries WHERE class_id = ?"),
        (
            "scores",
            "DELETE FROM scores
             WHERE item_id IN (
               SELECT i.id FROM items i
               JOIN categories c ON c.id = i.category_id
               WHERE c.class_id = ?1
             )
             OR student_id IN (SELECT s.id FROM students s WHERE s.class_id = ?1)",
        ),
        (
            "items",
            "DELETE FROM items
             WHERE category_id IN (SELECT id FROM categories WHERE class_id = ?)",
        ),
        ("categories", "DELETE FROM categories WHERE class_id = ?"),
        ("students", "DELETE FROM students WHERE class_id = ?"),
        ("classes", "DELETE FROM classes WHERE id = ?"),
    ];
    for (table, sql) in steps {
        if let Err(e) = tx.execute(sql, [&class_id]) {
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
    tracing::info!(class_id = %class_id, "class deleted");
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classes.list" => Some(handle_classes_list(state, req)),
        "classes.create" => Some(handle_classes_create(state, req)),
        "classes.update" => Some(handle_classes_update(state, req)),
        "classes.delete" => Some(handle_classes_delete(state, req)),
        _ => None,
    }
}
