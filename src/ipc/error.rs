use serde_json::json;

use crate::grid::GridError;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

pub fn grid_err(id: &str, e: &GridError) -> serde_json::Value {
    let details = match e {
        GridError::OutOfBounds { row, col } => Some(json!({ "row": row, "col": col })),
        GridError::UnknownCell {
            student_id,
            subject_id,
        } => Some(json!({ "studentId": student_id, "subjectId": subject_id })),
        GridError::Paste(crate::grid::paste::PasteError::TooLarge { cells, max }) => {
            Some(json!({ "cells": cells, "maxCells": max }))
        }
        _ => None,
    };
    err(id, e.code(), e.to_string(), details)
}
