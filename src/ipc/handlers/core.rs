use crate::db;
use crate::grid::GridConfig;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string()),
            "gridOpen": state.grid.is_some(),
        }),
    )
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };

    match db::open_db(&path) {
        Ok(conn) => {
            state.grid_config = db::load_grid_config(&conn);
            state.workspace = Some(path.clone());
            state.db = Some(conn);
            // A session belongs to the previous workspace's data.
            state.grid = None;
            tracing::info!(workspace = %path.display(), "workspace selected");
            ok(&req.id, json!({ "workspacePath": path.to_string_lossy() }))
        }
        Err(e) => err(&req.id, "db_open_failed", format!("{e:?}"), None),
    }
}

fn handle_settings_get_grid(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(&req.id, json!(state.grid_config))
}

fn handle_settings_set_grid(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let mut next: GridConfig = state.grid_config;
    if let Some(v) = req.params.get("autosaveQuietMs") {
        match v.as_u64() {
            Some(ms) => next.autosave_quiet_ms = ms,
            None => {
                return err(
                    &req.id,
                    "bad_params",
                    "autosaveQuietMs must be a non-negative integer",
                    Some(json!({ "autosaveQuietMs": v })),
                )
            }
        }
    }
    if let Some(v) = req.params.get("maxPasteCells") {
        match v.as_u64() {
            Some(n) if n > 0 => next.max_paste_cells = n as usize,
            _ => {
                return err(
                    &req.id,
                    "bad_params",
                    "maxPasteCells must be a positive integer",
                    Some(json!({ "maxPasteCells": v })),
                )
            }
        }
    }

    if let Err(e) = db::store_grid_config(conn, &next) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    // Takes effect for the next grid.open.
    state.grid_config = next;
    ok(&req.id, json!(next))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        "settings.getGrid" => Some(handle_settings_get_grid(state, req)),
        "settings.setGrid" => Some(handle_settings_set_grid(state, req)),
        _ => None,
    }
}
