use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request};

pub fn required_str<'a>(req: &'a Request, key: &str) -> Result<&'a str, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

/// Non-negative integer param, e.g. a row or column index.
pub fn required_index(req: &Request, key: &str) -> Result<usize, serde_json::Value> {
    match req.params.get(key).and_then(|v| v.as_i64()) {
        Some(v) if v >= 0 => Ok(v as usize),
        _ => Err(err(
            &req.id,
            "bad_params",
            format!("missing/invalid {}", key),
            None,
        )),
    }
}

pub fn string_list(req: &Request, key: &str) -> Vec<String> {
    req.params
        .get(key)
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// Host clock from `nowMs`, falling back to time since the sidecar started.
pub fn now_ms(state: &AppState, req: &Request) -> u64 {
    req.params
        .get("nowMs")
        .and_then(|v| v.as_u64())
        .unwrap_or_else(|| state.started.elapsed().as_millis() as u64)
}
