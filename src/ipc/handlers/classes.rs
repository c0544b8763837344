use crate::db::{self, NewStudent, NewSubject};
use crate::grid::AttendanceSummary;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::required_str;
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn parse_students(req: &Request) -> Result<Vec<NewStudent>, serde_json::Value> {
    let Some(arr) = req.params.get("students").and_then(|v| v.as_array()) else {
        return Err(err(&req.id, "bad_params", "missing students[]", None));
    };
    let mut out = Vec::with_capacity(arr.len());
    for (i, s) in arr.iter().enumerate() {
        let Some(name) = s.get("displayName").and_then(|v| v.as_str()) else {
            return Err(err(
                &req.id,
                "bad_params",
                format!("student at index {} missing displayName", i),
                None,
            ));
        };
        out.push(NewStudent {
            id: s.get("id").and_then(|v| v.as_str()).map(str::to_string),
            display_name: name.trim().to_string(),
            gender: s
                .get("gender")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string(),
        });
    }
    Ok(out)
}

fn parse_subjects(req: &Request) -> Result<Vec<NewSubject>, serde_json::Value> {
    let Some(arr) = req.params.get("subjects").and_then(|v| v.as_array()) else {
        return Err(err(&req.id, "bad_params", "missing subjects[]", None));
    };
    let mut out = Vec::with_capacity(arr.len());
    for (i, s) in arr.iter().enumerate() {
        let Some(code) = s.get("code").and_then(|v| v.as_str()) else {
            return Err(err(
                &req.id,
                "bad_params",
                format!("subject at index {} missing code", i),
                None,
            ));
        };
        let max_score = s.get("maxScore").and_then(|v| v.as_f64()).unwrap_or(50.0);
        let coefficient = s.get("coefficient").and_then(|v| v.as_f64()).unwrap_or(1.0);
        if !(max_score > 0.0) || coefficient < 0.0 {
            return Err(err(
                &req.id,
                "bad_params",
                "maxScore must be > 0 and coefficient >= 0",
                Some(json!({ "index": i, "maxScore": max_score, "coefficient": coefficient })),
            ));
        }
        out.push(NewSubject {
            id: s.get("id").and_then(|v| v.as_str()).map(str::to_string),
            code: code.to_string(),
            name: s
                .get("name")
                .and_then(|v| v.as_str())
                .unwrap_or(code)
                .to_string(),
            max_score,
            coefficient,
        });
    }
    Ok(out)
}

fn handle_class_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let name = match required_str(req, "name") {
        Ok(v) => v.trim().to_string(),
        Err(resp) => return resp,
    };
    let students = match parse_students(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let subjects = match parse_subjects(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match db::create_class(conn, &name, &students, &subjects) {
        Ok(created) => ok(
            &req.id,
            json!({
                "classId": created.class_id,
                "studentIds": created.student_ids,
                "subjectIds": created.subject_ids,
            }),
        ),
        Err(e) => err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "classes" })),
        ),
    }
}

fn handle_attendance_set_summary(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let month = match required_str(req, "month") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(year) = req.params.get("year").and_then(|v| v.as_i64()) else {
        return err(&req.id, "bad_params", "missing year", None);
    };
    let Some(rows) = req.params.get("rows").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing rows[]", None);
    };

    let mut updated = 0usize;
    for (i, row) in rows.iter().enumerate() {
        let Some(student_id) = row.get("studentId").and_then(|v| v.as_str()) else {
            return err(
                &req.id,
                "bad_params",
                format!("row at index {} missing studentId", i),
                None,
            );
        };
        let summary = AttendanceSummary {
            absent: row.get("absent").and_then(|v| v.as_i64()).unwrap_or(0),
            permission: row.get("permission").and_then(|v| v.as_i64()).unwrap_or(0),
        };
        if let Err(e) = db::upsert_attendance(conn, class_id, month, year, student_id, summary) {
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "attendance_summary" })),
            );
        }
        updated += 1;
    }

    ok(&req.id, json!({ "updated": updated }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "class.create" => Some(handle_class_create(state, req)),
        "attendance.setSummary" => Some(handle_attendance_set_summary(state, req)),
        _ => None,
    }
}
