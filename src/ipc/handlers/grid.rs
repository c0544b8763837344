use crate::db::{self, SqliteScoreSink};
use crate::grid::cells::{EditOutcome, RejectReason};
use crate::grid::nav::NavKey;
use crate::grid::validate::CallerRole;
use crate::grid::GridSession;
use crate::ipc::error::{err, grid_err, ok};
use crate::ipc::helpers::{now_ms, required_index, required_str, string_list};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

const HONOR_ROLL_DEFAULT_MAX_RANK: usize = 5;

fn no_session(req: &Request) -> serde_json::Value {
    err(&req.id, "no_session", "open a grid first", None)
}

fn outcome_json(outcome: EditOutcome) -> serde_json::Value {
    match outcome {
        EditOutcome::Accepted { dirty, error } => json!({
            "accepted": true,
            "dirty": dirty,
            "error": error,
        }),
        EditOutcome::Rejected(reason) => json!({
            "accepted": false,
            "reason": match reason {
                RejectReason::NotEditable => "not_editable",
                RejectReason::UnknownCell => "unknown_cell",
            },
        }),
    }
}

fn handle_grid_open(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let role = match required_str(req, "role") {
        Ok(v) => CallerRole::parse(v),
        Err(resp) => return resp,
    };
    let assignments = string_list(req, "assignments");

    match db::class_exists(conn, class_id) {
        Ok(true) => {}
        Ok(false) => {
            return err(
                &req.id,
                "not_found",
                "class not found",
                Some(json!({ "classId": class_id })),
            )
        }
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let snapshot = match db::load_grid(conn, class_id, month, year, &role, &assignments) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let attendance = match db::load_attendance(conn, class_id, month, year) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let session = GridSession::open(snapshot, attendance, state.grid_config);
    let view = session.view();
    state.grid = Some(session);
    ok(&req.id, json!(view))
}

fn handle_grid_close(state: &mut AppState, req: &Request) -> serde_json::Value {
    let was_open = state.grid.take().is_some();
    ok(&req.id, json!({ "closed": was_open }))
}

fn handle_grid_view(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(session) = state.grid.as_ref() else {
        return no_session(req);
    };
    ok(&req.id, json!(session.view()))
}

fn handle_grid_set_cell(state: &mut AppState, req: &Request) -> serde_json::Value {
    let now = now_ms(state, req);
    let Some(session) = state.grid.as_mut() else {
        return no_session(req);
    };

    let text = match req.params.get("text") {
        Some(v) if v.is_null() => String::new(),
        Some(v) => match v.as_str() {
            Some(s) => s.to_string(),
            None => v.to_string(),
        },
        None => return err(&req.id, "bad_params", "missing text", None),
    };

    let by_id = (
        req.params.get("studentId").and_then(|v| v.as_str()),
        req.params.get("subjectId").and_then(|v| v.as_str()),
    );
    let outcome = match by_id {
        (Some(student_id), Some(subject_id)) => {
            match session.set_cell_by_id(student_id, subject_id, &text, now) {
                Ok(o) => o,
                Err(e) => return grid_err(&req.id, &e),
            }
        }
        _ => {
            let row = match required_index(req, "row") {
                Ok(v) => v,
                Err(resp) => return resp,
            };
            let col = match required_index(req, "col") {
                Ok(v) => v,
                Err(resp) => return resp,
            };
            match session.set_cell_at(row, col, &text, now) {
                Ok(o) => o,
                Err(e) => return grid_err(&req.id, &e),
            }
        }
    };

    let mut result = outcome_json(outcome);
    result["phase"] = json!(session.phase());
    ok(&req.id, result)
}

fn handle_grid_paste(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(session) = state.grid.as_mut() else {
        return no_session(req);
    };
    let text = match required_str(req, "text") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let row = match required_index(req, "row") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let col = match required_index(req, "col") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match session.paste(text, row, col) {
        Ok(summary) => {
            let mut result = json!(summary);
            result["phase"] = json!(session.phase());
            result["stagedCount"] = json!(session.view().staged_count);
            ok(&req.id, result)
        }
        Err(e) => grid_err(&req.id, &e),
    }
}

fn flush_continuous(state: &mut AppState, req: &Request, retry: bool) -> serde_json::Value {
    let now = now_ms(state, req);
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(session) = state.grid.as_mut() else {
        return no_session(req);
    };
    if retry {
        session.retry(now);
    }

    let class_id = session.class_id().to_string();
    let month = session.month().to_string();
    let mut sink = SqliteScoreSink {
        conn,
        class_id: &class_id,
        month: &month,
        year: session.year(),
    };
    match session.tick(&mut sink, now) {
        Ok(report) => ok(
            &req.id,
            json!({
                "flushed": report,
                "phase": session.phase(),
            }),
        ),
        Err(e) => grid_err(&req.id, &e),
    }
}

fn handle_grid_tick(state: &mut AppState, req: &Request) -> serde_json::Value {
    flush_continuous(state, req, false)
}

fn handle_grid_retry(state: &mut AppState, req: &Request) -> serde_json::Value {
    flush_continuous(state, req, true)
}

fn handle_grid_save_all(state: &mut AppState, req: &Request) -> serde_json::Value {
    let now = now_ms(state, req);
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(session) = state.grid.as_mut() else {
        return no_session(req);
    };

    let class_id = session.class_id().to_string();
    let month = session.month().to_string();
    let mut sink = SqliteScoreSink {
        conn,
        class_id: &class_id,
        month: &month,
        year: session.year(),
    };
    match session.save_all(&mut sink, now) {
        Ok(Some(report)) => match &report.error {
            Some(message) => err(
                &req.id,
                "save_failed",
                message.clone(),
                Some(json!({ "report": report, "phase": session.phase() })),
            ),
            None => ok(
                &req.id,
                json!({ "saved": report.saved, "phase": session.phase() }),
            ),
        },
        Ok(None) => ok(&req.id, json!({ "saved": 0, "phase": session.phase() })),
        Err(e) => grid_err(&req.id, &e),
    }
}

fn handle_grid_cancel_paste(state: &mut AppState, req: &Request) -> serde_json::Value {
    let now = now_ms(state, req);
    let Some(session) = state.grid.as_mut() else {
        return no_session(req);
    };
    match session.cancel_paste(now) {
        Ok(reverted) => ok(
            &req.id,
            json!({ "reverted": reverted, "phase": session.phase() }),
        ),
        Err(e) => grid_err(&req.id, &e),
    }
}

fn handle_grid_focus(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(session) = state.grid.as_mut() else {
        return no_session(req);
    };
    let row = match required_index(req, "row") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let col = match required_index(req, "col") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match session.focus(row, col) {
        Ok(pos) => ok(&req.id, json!({ "focus": pos })),
        Err(e) => grid_err(&req.id, &e),
    }
}

fn handle_grid_navigate(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(session) = state.grid.as_mut() else {
        return no_session(req);
    };
    let key = match required_str(req, "key") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let shift = req
        .params
        .get("shift")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let Some(nav) = NavKey::parse(key, shift) else {
        return err(
            &req.id,
            "bad_params",
            "key must be one of: Enter, ArrowDown, ArrowUp, Tab",
            Some(json!({ "key": key })),
        );
    };
    let pos = session.navigate(nav);
    ok(&req.id, json!({ "focus": pos }))
}

fn handle_grid_honor_roll(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(session) = state.grid.as_ref() else {
        return no_session(req);
    };
    let max_rank = match req.params.get("maxRank") {
        None => HONOR_ROLL_DEFAULT_MAX_RANK,
        Some(v) => match v.as_u64() {
            Some(n) if n > 0 => n as usize,
            _ => {
                return err(
                    &req.id,
                    "bad_params",
                    "maxRank must be a positive integer",
                    Some(json!({ "maxRank": v })),
                )
            }
        },
    };
    ok(
        &req.id,
        json!({ "maxRank": max_rank, "students": session.honor_roll(max_rank) }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grid.open" => Some(handle_grid_open(state, req)),
        "grid.close" => Some(handle_grid_close(state, req)),
        "grid.view" => Some(handle_grid_view(state, req)),
        "grid.setCell" => Some(handle_grid_set_cell(state, req)),
        "grid.paste" => Some(handle_grid_paste(state, req)),
        "grid.tick" => Some(handle_grid_tick(state, req)),
        "grid.retry" => Some(handle_grid_retry(state, req)),
        "grid.saveAll" => Some(handle_grid_save_all(state, req)),
        "grid.cancelPaste" => Some(handle_grid_cancel_paste(state, req)),
        "grid.focus" => Some(handle_grid_focus(state, req)),
        "grid.navigate" => Some(handle_grid_navigate(state, req)),
        "grid.honorRoll" => Some(handle_grid_honor_roll(state, req)),
        _ => None,
    }
}
