use crate::grading::display_name;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, ensure_exists, optional_str, required_name, required_str};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use uuid::Uuid;

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let mut stmt = match conn.prepare(
        "SELECT id, last_name, first_name, middle_initial, student_no
         FROM students
         WHERE class_id = ?
         ORDER BY last_name, first_name, id",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&class_id], |r| {
            let id: String = r.get(0)?;
            let last: String = r.get(1)?;
            let first: String = r.get(2)?;
            let middle: Option<String> = r.get(3)?;
            let student_no: Option<String> = r.get(4)?;
            Ok(json!({
                "id": id,
                "displayName": display_name(&last, &first, middle.as_deref()),
                "lastName": last,
                "firstName": first,
                "middleInitial": middle,
                "studentNo": student_no
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let last_name = match required_name(req, "lastName") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let first_name = match required_name(req, "firstName") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let middle_initial = match optional_str(req, "middleInitial") {
        Ok(v) => v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()),
        Err(resp) => return resp,
    };
    let student_no = match optional_str(req, "studentNo") {
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

    let student_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO students(id, class_id, last_name, first_name, middle_initial, student_no)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &student_id,
            &class_id,
            &last_name,
            &first_name,
            &middle_initial,
            &student_no,
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }

    ok(
        &req.id,
        json!({
            "studentId": student_id,
            "displayName": display_name(&last_name, &first_name, middle_initial.as_deref())
        }),
    )
}

fn handle_students_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if let Err(resp) = ensure_exists(
        conn,
        req,
        "SELECT 1 FROM students WHERE id = ?",
        &student_id,
        "student",
    ) {
        return resp;
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    for (table, sql) in [
        ("scores", "DELETE FROM scores WHERE student_id = ?"),
        (
            "grade_summaries",
            "DELETE FROM grade_summaries WHERE student_id = ?",
        ),
        ("students", "DELETE FROM students WHERE id = ?"),
    ] {
        if let Err(e) = tx.execute(sql, [&student_id]) {
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
        "students.list" => Some(handle_students_list(state, req)),
        "students.create" => Some(handle_students_create(state, req)),
        "students.delete" => Some(handle_students_delete(state, req)),
        _ => None,
    }
}
