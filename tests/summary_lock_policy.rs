use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_gradebookd");
    let mut child = Command::new(exe)
        .env_remove("GRADEBOOKD_WORKSPACE")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn gradebookd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn str_field(v: &serde_json::Value, key: &str) -> String {
    v.get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_else(|| panic!("missing {} in {}", key, v))
        .to_string()
}

fn f64_field(v: &serde_json::Value, key: &str) -> f64 {
    v.get(key)
        .and_then(|v| v.as_f64())
        .unwrap_or_else(|| panic!("missing {} in {}", key, v))
}

fn summary_for<'a>(listing: &'a serde_json::Value, student_id: &str) -> &'a serde_json::Value {
    listing
        .get("summaries")
        .and_then(|v| v.as_array())
        .and_then(|rows| {
            rows.iter()
                .find(|r| r.get("studentId").and_then(|v| v.as_str()) == Some(student_id))
        })
        .unwrap_or_else(|| panic!("no summary for {} in {}", student_id, listing))
}

#[test]
fn locked_summaries_survive_recompute_unless_overridden() {
    let workspace = temp_dir("gradebook-lock-policy");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let class = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "classes.create",
        json!({ "name": "Locks" }),
    );
    let class_id = str_field(&class, "classId");
    let a = str_field(
        &request_ok(
            &mut stdin,
            &mut reader,
            "3",
            "students.create",
            json!({ "classId": class_id, "lastName": "Abad", "firstName": "Ria" }),
        ),
        "studentId",
    );
    let b = str_field(
        &request_ok(
            &mut stdin,
            &mut reader,
            "4",
            "students.create",
            json!({ "classId": class_id, "lastName": "Bautista", "firstName": "Leo" }),
        ),
        "studentId",
    );
    let cat = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "categories.create",
        json!({ "classId": class_id, "name": "Exam", "weight": 100 }),
    );
    let item_id = str_field(
        &request_ok(
            &mut stdin,
            &mut reader,
            "6",
            "items.create",
            json!({ "categoryId": str_field(&cat, "categoryId"), "name": "Final", "totalItems": 100 }),
        ),
        "itemId",
    );

    let save = |stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>, id: &str, sa: f64, sb: f64| {
        let _ = request_ok(
            stdin,
            reader,
            id,
            "scores.save",
            json!({
                "classId": class_id,
                "entries": [
                    { "studentId": a, "itemId": item_id, "score": sa },
                    { "studentId": b, "itemId": item_id, "score": sb }
                ]
            }),
        );
    };

    save(&mut stdin, &mut reader, "7", 80.0, 60.0);
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "grades.compute",
        json!({ "classId": class_id }),
    );
    let locked = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "grades.lock",
        json!({ "classId": class_id, "studentIds": [a] }),
    );
    assert_eq!(locked.get("changed").and_then(|v| v.as_u64()), Some(1));

    save(&mut stdin, &mut reader, "10", 95.0, 70.0);
    let second = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "grades.compute",
        json!({ "classId": class_id }),
    );
    assert_eq!(second["skippedLocked"], json!([a]));
    assert_eq!(second["written"].as_array().map(|w| w.len()), Some(1));

    let listing = request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "grades.summaries",
        json!({ "classId": class_id }),
    );
    let sa = summary_for(&listing, &a);
    assert!((f64_field(sa, "finalPercentage") - 80.0).abs() < 1e-9);
    assert_eq!(sa.get("locked").and_then(|v| v.as_bool()), Some(true));
    let sb = summary_for(&listing, &b);
    assert!((f64_field(sb, "finalPercentage") - 70.0).abs() < 1e-9);

    let forced = request_ok(
        &mut stdin,
        &mut reader,
        "13",
        "grades.compute",
        json!({ "classId": class_id, "overrideLocks": true }),
    );
    assert_eq!(forced["skippedLocked"], json!([]));
    let listing = request_ok(
        &mut stdin,
        &mut reader,
        "14",
        "grades.summaries",
        json!({ "classId": class_id }),
    );
    let sa = summary_for(&listing, &a);
    assert!((f64_field(sa, "finalPercentage") - 95.0).abs() < 1e-9);
    assert_eq!(f64_field(sa, "equivalentGrade"), 1.0);
    assert_eq!(sa.get("locked").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(listing.get("excellentCount").and_then(|v| v.as_u64()), Some(1));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "15",
        "grades.lock",
        json!({ "classId": class_id }),
    );
    let unlocked = request_ok(
        &mut stdin,
        &mut reader,
        "16",
        "grades.unlock",
        json!({ "classId": class_id }),
    );
    assert_eq!(unlocked.get("changed").and_then(|v| v.as_u64()), Some(2));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
