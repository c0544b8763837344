use std::path::PathBuf;
use std::time::Instant;

use rusqlite::Connection;
use serde::Deserialize;

use crate::grid::{GridConfig, GridSession};

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub grid_config: GridConfig,
    pub grid: Option<GridSession>,
    /// Fallback clock for requests that carry no `nowMs`.
    pub started: Instant,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            workspace: None,
            db: None,
            grid_config: GridConfig::default(),
            grid: None,
            started: Instant::now(),
        }
    }
}
