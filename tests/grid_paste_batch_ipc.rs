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
    let exe = env!("CARGO_BIN_EXE_gradegridd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn gradegridd");
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

fn error_code(value: &serde_json::Value) -> Option<&str> {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
}

fn seed_class(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>) -> String {
    let created = request_ok(
        stdin,
        reader,
        "seed",
        "class.create",
        json!({
            "name": "Grade 7A",
            "students": [
                { "id": "s1", "displayName": "Dara", "gender": "M" },
                { "id": "s2", "displayName": "Sreymom", "gender": "F" },
                { "id": "s3", "displayName": "Vuthy", "gender": "M" }
            ],
            "subjects": [
                { "id": "math", "code": "MATH", "maxScore": 50, "coefficient": 1 },
                { "id": "khmer", "code": "KHM", "maxScore": 50, "coefficient": 1 }
            ]
        }),
    );
    created
        .get("classId")
        .and_then(|v| v.as_str())
        .expect("classId")
        .to_string()
}

fn cell<'a>(view: &'a serde_json::Value, row: usize, col: usize) -> &'a serde_json::Value {
    &view["rows"][row]["cells"][col]
}

fn open_workspace_grid(prefix: &str, params: serde_json::Value) -> (Child, ChildStdin, BufReader<ChildStdout>, String) {
    let workspace = temp_dir(prefix);
    let (child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    if let Some(config) = params.get("config") {
        let _ = request_ok(&mut stdin, &mut reader, "cfg", "settings.setGrid", config.clone());
    }
    let class_id = seed_class(&mut stdin, &mut reader);
    let mut open = json!({ "classId": class_id, "month": "May", "year": 2026, "role": "admin" });
    if let Some(assignments) = params.get("assignments") {
        open["role"] = json!("teacher");
        open["assignments"] = assignments.clone();
    }
    let _ = request_ok(&mut stdin, &mut reader, "open", "grid.open", open.clone());
    (child, stdin, reader, class_id)
}

fn reopen(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    class_id: &str,
) -> serde_json::Value {
    request_ok(
        stdin,
        reader,
        "reopen",
        "grid.open",
        json!({ "classId": class_id, "month": "May", "year": 2026, "role": "admin" }),
    )
}

#[test]
fn paste_stages_block_and_cancel_reverts_it() {
    let (_child, mut stdin, mut reader, class_id) =
        open_workspace_grid("gradegrid-paste-cancel", json!({}));

    let pasted = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "grid.paste",
        json!({ "text": "40\t35\r\n30\t20\n", "row": 0, "col": 0 }),
    );
    assert_eq!(pasted.get("pastedCount").and_then(|v| v.as_u64()), Some(4));
    assert_eq!(pasted.get("errorCount").and_then(|v| v.as_u64()), Some(0));
    assert_eq!(pasted.get("phase").and_then(|v| v.as_str()), Some("batch_staged"));
    assert_eq!(pasted.get("stagedCount").and_then(|v| v.as_u64()), Some(4));

    let view = request_ok(&mut stdin, &mut reader, "2", "grid.view", json!({}));
    assert_eq!(cell(&view, 0, 0)["value"].as_str(), Some("40"));
    assert_eq!(cell(&view, 1, 1)["value"].as_str(), Some("20"));
    assert_eq!(cell(&view, 0, 0)["pasted"].as_bool(), Some(true));
    assert_eq!(cell(&view, 2, 0)["pasted"].as_bool(), Some(false));
    // Derived values follow unsaved pasted cells.
    assert_eq!(view["rows"][0]["totalScore"].as_f64(), Some(75.0));
    assert_eq!(view["rows"][0]["letterGrade"].as_str(), Some("C"));

    // Nothing autosaves while the paste is under review.
    let tick = request_ok(&mut stdin, &mut reader, "3", "grid.tick", json!({ "nowMs": 60_000 }));
    assert!(tick["flushed"].is_null());

    let cancelled = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "grid.cancelPaste",
        json!({ "nowMs": 60_000 }),
    );
    assert_eq!(cancelled.get("reverted").and_then(|v| v.as_u64()), Some(4));
    assert_eq!(cancelled.get("phase").and_then(|v| v.as_str()), Some("idle"));

    let view = request_ok(&mut stdin, &mut reader, "5", "grid.view", json!({}));
    assert_eq!(cell(&view, 0, 0)["value"].as_str(), Some(""));
    assert_eq!(cell(&view, 0, 0)["pasted"].as_bool(), Some(false));
    assert_eq!(view["rows"][0]["totalScore"].as_f64(), Some(0.0));

    let reopened = reopen(&mut stdin, &mut reader, &class_id);
    assert_eq!(cell(&reopened, 0, 0)["value"].as_str(), Some(""));
}

#[test]
fn save_all_persists_pasted_and_reviewed_cells_in_one_batch() {
    let (_child, mut stdin, mut reader, class_id) =
        open_workspace_grid("gradegrid-paste-save", json!({}));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "grid.paste",
        json!({ "text": "40\n30", "row": 1, "col": 0 }),
    );
    let reviewed = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "grid.setCell",
        json!({ "row": 1, "col": 0, "text": "45", "nowMs": 100 }),
    );
    assert_eq!(reviewed.get("phase").and_then(|v| v.as_str()), Some("batch_staged"));

    let view = request_ok(&mut stdin, &mut reader, "3", "grid.view", json!({}));
    assert_eq!(view.get("stagedCount").and_then(|v| v.as_u64()), Some(2));
    assert_eq!(cell(&view, 1, 0)["editedAfterPaste"].as_bool(), Some(true));
    assert_eq!(cell(&view, 2, 0)["editedAfterPaste"].as_bool(), Some(false));

    let saved = request_ok(&mut stdin, &mut reader, "4", "grid.saveAll", json!({ "nowMs": 200 }));
    assert_eq!(saved.get("saved").and_then(|v| v.as_u64()), Some(2));
    assert_eq!(saved.get("phase").and_then(|v| v.as_str()), Some("idle"));

    let view = request_ok(&mut stdin, &mut reader, "5", "grid.view", json!({}));
    assert_eq!(cell(&view, 1, 0)["dirty"].as_bool(), Some(false));
    assert_eq!(cell(&view, 1, 0)["pasted"].as_bool(), Some(false));

    let reopened = reopen(&mut stdin, &mut reader, &class_id);
    assert_eq!(cell(&reopened, 1, 0)["value"].as_str(), Some("45"));
    assert_eq!(cell(&reopened, 2, 0)["value"].as_str(), Some("30"));
    assert_eq!(cell(&reopened, 0, 0)["value"].as_str(), Some(""));
}

#[test]
fn paste_skips_locked_and_invalid_cells_and_clips_to_grid() {
    let (_child, mut stdin, mut reader, _class_id) = open_workspace_grid(
        "gradegrid-paste-locked",
        json!({ "assignments": ["math"] }),
    );

    let pasted = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "grid.paste",
        json!({ "text": "10\t10\t10\n99,1", "row": 0, "col": 0 }),
    );
    assert_eq!(pasted.get("pastedCount").and_then(|v| v.as_u64()), Some(1));
    assert_eq!(pasted.get("skippedLocked").and_then(|v| v.as_u64()), Some(2));
    assert_eq!(pasted.get("droppedOutOfBounds").and_then(|v| v.as_u64()), Some(1));
    assert_eq!(pasted.get("errorCount").and_then(|v| v.as_u64()), Some(1));
    let errors = pasted
        .get("errors")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0]["row"].as_u64(), Some(1));
    assert_eq!(errors[0]["col"].as_u64(), Some(0));
    assert_eq!(errors[0]["kind"].as_str(), Some("out_of_range"));

    let view = request_ok(&mut stdin, &mut reader, "2", "grid.view", json!({}));
    assert_eq!(cell(&view, 0, 0)["value"].as_str(), Some("10"));
    assert_eq!(cell(&view, 0, 1)["value"].as_str(), Some(""));
    assert_eq!(cell(&view, 1, 0)["value"].as_str(), Some(""));
    assert_eq!(view.get("stagedCount").and_then(|v| v.as_u64()), Some(1));
}

#[test]
fn oversized_paste_is_refused_without_touching_cells() {
    let (_child, mut stdin, mut reader, _class_id) = open_workspace_grid(
        "gradegrid-paste-limit",
        json!({ "config": { "maxPasteCells": 3 } }),
    );

    let refused = request(
        &mut stdin,
        &mut reader,
        "1",
        "grid.paste",
        json!({ "text": "1\t2\n3\t4", "row": 0, "col": 0 }),
    );
    assert_eq!(error_code(&refused), Some("paste_too_large"));
    assert_eq!(refused["error"]["details"]["cells"].as_u64(), Some(4));
    assert_eq!(refused["error"]["details"]["maxCells"].as_u64(), Some(3));

    let view = request_ok(&mut stdin, &mut reader, "2", "grid.view", json!({}));
    assert_eq!(view.get("phase").and_then(|v| v.as_str()), Some("idle"));
    assert_eq!(cell(&view, 0, 0)["value"].as_str(), Some(""));
}

#[test]
fn pending_autosave_waits_for_batch_review_to_end() {
    let (_child, mut stdin, mut reader, class_id) =
        open_workspace_grid("gradegrid-paste-suspend", json!({}));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "grid.setCell",
        json!({ "row": 2, "col": 1, "text": "15", "nowMs": 0 }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "grid.paste",
        json!({ "text": "40", "row": 0, "col": 0 }),
    );

    let suspended = request_ok(&mut stdin, &mut reader, "3", "grid.tick", json!({ "nowMs": 5000 }));
    assert!(suspended["flushed"].is_null());
    assert_eq!(suspended.get("phase").and_then(|v| v.as_str()), Some("batch_staged"));

    let committed = request_ok(&mut stdin, &mut reader, "4", "grid.saveAll", json!({ "nowMs": 5000 }));
    assert_eq!(committed.get("saved").and_then(|v| v.as_u64()), Some(1));
    assert_eq!(
        committed.get("phase").and_then(|v| v.as_str()),
        Some("continuous_pending")
    );

    let resumed = request_ok(&mut stdin, &mut reader, "5", "grid.tick", json!({ "nowMs": 6000 }));
    assert_eq!(resumed["flushed"]["kind"].as_str(), Some("continuous"));
    assert_eq!(resumed["flushed"]["saved"].as_u64(), Some(1));

    let reopened = reopen(&mut stdin, &mut reader, &class_id);
    assert_eq!(cell(&reopened, 0, 0)["value"].as_str(), Some("40"));
    assert_eq!(cell(&reopened, 2, 1)["value"].as_str(), Some("15"));
}

#[test]
fn honor_roll_shares_ranks_between_ties() {
    let (_child, mut stdin, mut reader, _class_id) =
        open_workspace_grid("gradegrid-honor-roll", json!({}));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "grid.paste",
        json!({ "text": "40\t40\n40\t40\n20\t20", "row": 0, "col": 0 }),
    );
    let roll = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "grid.honorRoll",
        json!({}),
    );
    assert_eq!(roll.get("maxRank").and_then(|v| v.as_u64()), Some(5));
    let students = roll
        .get("students")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    assert_eq!(students.len(), 3);
    assert_eq!(students[0]["rank"].as_u64(), Some(1));
    assert_eq!(students[1]["rank"].as_u64(), Some(1));
    assert_eq!(students[2]["rank"].as_u64(), Some(3));

    let top = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "grid.honorRoll",
        json!({ "maxRank": 2 }),
    );
    let top_ids: Vec<&str> = top["students"]
        .as_array()
        .map(|a| a.iter().filter_map(|s| s["studentId"].as_str()).collect())
        .unwrap_or_default();
    assert_eq!(top_ids, vec!["s1", "s2"]);

    // The grid itself keeps distinct ranks in roster order.
    let view = request_ok(&mut stdin, &mut reader, "4", "grid.view", json!({}));
    assert_eq!(view["rows"][0]["rank"].as_u64(), Some(1));
    assert_eq!(view["rows"][1]["rank"].as_u64(), Some(2));
    assert_eq!(view["rows"][2]["rank"].as_u64(), Some(3));
}
