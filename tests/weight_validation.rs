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

fn error_code(value: &serde_json::Value) -> &str {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
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

fn setup_class(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &std::path::Path,
) -> String {
    let _ = request_ok(
        stdin,
        reader,
        "setup-ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let class = request_ok(
        stdin,
        reader,
        "setup-class",
        "classes.create",
        json!({ "name": "Weights" }),
    );
    str_field(&class, "classId")
}

#[test]
fn compute_refuses_weights_just_under_one_hundred() {
    let workspace = temp_dir("gradebook-weights-under");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let class_id = setup_class(&mut stdin, &mut reader, &workspace);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "students.create",
        json!({ "classId": class_id, "lastName": "Lim", "firstName": "Cora" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "categories.create",
        json!({ "classId": class_id, "name": "Quiz", "weight": 39.999 }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "categories.create",
        json!({ "classId": class_id, "name": "Exam", "weight": 60 }),
    );

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "categories.list",
        json!({ "classId": class_id }),
    );
    assert_eq!(listed.get("weightsValid").and_then(|v| v.as_bool()), Some(false));

    let refused = request(
        &mut stdin,
        &mut reader,
        "5",
        "grades.compute",
        json!({ "classId": class_id }),
    );
    assert_eq!(error_code(&refused), "weights_invalid", "{}", refused);
    let total = refused["error"]["details"]["weightTotal"]
        .as_f64()
        .expect("weightTotal detail");
    assert!((total - 99.999).abs() < 1e-6);

    let summaries = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "grades.summaries",
        json!({ "classId": class_id }),
    );
    assert_eq!(
        summaries.get("summaries").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(0)
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn category_weights_cannot_push_total_past_one_hundred() {
    let workspace = temp_dir("gradebook-weights-over");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let class_id = setup_class(&mut stdin, &mut reader, &workspace);

    let quiz = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "categories.create",
        json!({ "classId": class_id, "name": "Quiz", "weight": 40 }),
    );
    let over = request(
        &mut stdin,
        &mut reader,
        "2",
        "categories.create",
        json!({ "classId": class_id, "name": "Exam", "weight": 60.001 }),
    );
    assert_eq!(error_code(&over), "weights_exceeded", "{}", over);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "categories.create",
        json!({ "classId": class_id, "name": "Exam", "weight": 60 }),
    );
    // Raising an existing category is checked against the others only.
    let raised = request(
        &mut stdin,
        &mut reader,
        "4",
        "categories.update",
        json!({ "categoryId": str_field(&quiz, "categoryId"), "weight": 41 }),
    );
    assert_eq!(error_code(&raised), "weights_exceeded", "{}", raised);
    let renamed = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "categories.update",
        json!({ "categoryId": str_field(&quiz, "categoryId"), "name": "Quizzes", "weight": 40 }),
    );
    assert_eq!(f64_field(&renamed, "weightTotal"), 100.0);

    let negative = request(
        &mut stdin,
        &mut reader,
        "6",
        "categories.create",
        json!({ "classId": class_id, "name": "Bonus", "weight": -5 }),
    );
    assert_eq!(error_code(&negative), "bad_params");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn class_without_categories_cannot_be_computed() {
    let workspace = temp_dir("gradebook-weights-empty");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let class_id = setup_class(&mut stdin, &mut reader, &workspace);

    let refused = request(
        &mut stdin,
        &mut reader,
        "1",
        "grades.compute",
        json!({ "classId": class_id }),
    );
    assert_eq!(error_code(&refused), "weights_invalid");

    let missing = request(
        &mut stdin,
        &mut reader,
        "2",
        "grades.compute",
        json!({ "classId": "no-such-class" }),
    );
    assert_eq!(error_code(&missing), "not_found");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
