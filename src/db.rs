use anyhow::Context;
use rusqlite::{Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use uuid::Uuid;

use crate::grid::validate::{is_subject_editable, CallerRole};
use crate::grid::{
    AttendanceSummary, CellKey, GridConfig, GridSnapshot, SaveBatch, SaveError, ScoreChange,
    Student, Subject,
};

pub const DB_FILE_NAME: &str = "gradegrid.sqlite3";
const GRID_CONFIG_KEY: &str = "grid.config";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)
        .with_context(|| format!("create workspace {}", workspace.display()))?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(&db_path)
        .with_context(|| format!("open {}", db_path.display()))?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            display_name TEXT NOT NULL,
            gender TEXT NOT NULL DEFAULT '',
            sort_order INTEGER NOT NULL,
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class_sort ON students(class_id, sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            code TEXT NOT NULL,
            name TEXT NOT NULL DEFAULT '',
            max_score REAL NOT NULL,
            coefficient REAL NOT NULL,
            sort_order INTEGER NOT NULL,
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subjects_class_sort ON subjects(class_id, sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS scores(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            month TEXT NOT NULL,
            year INTEGER NOT NULL,
            score REAL,
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            UNIQUE(student_id, subject_id, month, year)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_scores_class_month ON scores(class_id, month, year)",
        [],
    )?;
    // Workspaces created before saves were timestamped lack updated_at.
    ensure_scores_updated_at(&conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance_summary(
            class_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            month TEXT NOT NULL,
            year INTEGER NOT NULL,
            absent INTEGER NOT NULL DEFAULT 0,
            permission INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY(class_id, student_id, month, year),
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    Ok(conn)
}

fn ensure_scores_updated_at(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "scores", "updated_at")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE scores ADD COLUMN updated_at TEXT", [])?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(Some(serde_json::from_str(&s)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(conn: &Connection, key: &str, value: &serde_json::Value) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

/// Stored grid config, or defaults when missing or unreadable.
pub fn load_grid_config(conn: &Connection) -> GridConfig {
    match settings_get_json(conn, GRID_CONFIG_KEY) {
        Ok(Some(v)) => serde_json::from_value(v).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "ignoring malformed grid config");
            GridConfig::default()
        }),
        Ok(None) => GridConfig::default(),
        Err(e) => {
            tracing::warn!(error = %e, "failed to read grid config");
            GridConfig::default()
        }
    }
}

pub fn store_grid_config(conn: &Connection, config: &GridConfig) -> anyhow::Result<()> {
    settings_set_json(conn, GRID_CONFIG_KEY, &serde_json::to_value(config)?)
}

pub struct NewStudent {
    pub id: Option<String>,
    pub display_name: String,
    pub gender: String,
}

pub struct NewSubject {
    pub id: Option<String>,
    pub code: String,
    pub name: String,
    pub max_score: f64,
    pub coefficient: f64,
}

pub struct CreatedClass {
    pub class_id: String,
    pub student_ids: Vec<String>,
    pub subject_ids: Vec<String>,
}

/// Inserts a class with its roster; list order becomes sort order.
pub fn create_class(
    conn: &Connection,
    name: &str,
    students: &[NewStudent],
    subjects: &[NewSubject],
) -> rusqlite::Result<CreatedClass> {
    let tx = conn.unchecked_transaction()?;
    let class_id = Uuid::new_v4().to_string();
    tx.execute("INSERT INTO classes(id, name) VALUES(?, ?)", (&class_id, name))?;

    let mut student_ids = Vec::with_capacity(students.len());
    for (i, s) in students.iter().enumerate() {
        let id = s.id.clone().unwrap_or_else(|| Uuid::new_v4().to_string());
        tx.execute(
            "INSERT INTO students(id, class_id, display_name, gender, sort_order)
             VALUES(?, ?, ?, ?, ?)",
            (&id, &class_id, &s.display_name, &s.gender, i as i64),
        )?;
        student_ids.push(id);
    }

    let mut subject_ids = Vec::with_capacity(subjects.len());
    for (i, s) in subjects.iter().enumerate() {
        let id = s.id.clone().unwrap_or_else(|| Uuid::new_v4().to_string());
        tx.execute(
            "INSERT INTO subjects(id, class_id, code, name, max_score, coefficient, sort_order)
             VALUES(?, ?, ?, ?, ?, ?, ?)",
            (&id, &class_id, &s.code, &s.name, s.max_score, s.coefficient, i as i64),
        )?;
        subject_ids.push(id);
    }

    tx.commit()?;
    Ok(CreatedClass {
        class_id,
        student_ids,
        subject_ids,
    })
}

pub fn class_exists(conn: &Connection, class_id: &str) -> rusqlite::Result<bool> {
    conn.query_row("SELECT 1 FROM classes WHERE id = ?", [class_id], |_| Ok(()))
        .optional()
        .map(|r| r.is_some())
}

/// Reads the class-month snapshot a grid session starts from. Subject
/// editability is decided here, once, from the caller's role and assignments.
pub fn load_grid(
    conn: &Connection,
    class_id: &str,
    month: &str,
    year: i64,
    role: &CallerRole,
    assignments: &[String],
) -> rusqlite::Result<GridSnapshot> {
    let mut student_stmt = conn.prepare(
        "SELECT id, display_name, gender, sort_order FROM students
         WHERE class_id = ? ORDER BY sort_order",
    )?;
    let students = student_stmt
        .query_map([class_id], |r| {
            Ok(Student {
                id: r.get(0)?,
                display_name: r.get(1)?,
                gender: r.get(2)?,
                sort_key: r.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut subject_stmt = conn.prepare(
        "SELECT id, code, max_score, coefficient, sort_order FROM subjects
         WHERE class_id = ? ORDER BY sort_order",
    )?;
    let subjects = subject_stmt
        .query_map([class_id], |r| {
            let id: String = r.get(0)?;
            Ok(Subject {
                editable: is_subject_editable(&id, role, assignments),
                id,
                code: r.get(1)?,
                max_score: r.get(2)?,
                coefficient: r.get(3)?,
                display_order: r.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut score_stmt = conn.prepare(
        "SELECT student_id, subject_id, score FROM scores
         WHERE class_id = ? AND month = ? AND year = ? AND score IS NOT NULL",
    )?;
    let scores = score_stmt
        .query_map((class_id, month, year), |r| {
            let student_id: String = r.get(0)?;
            let subject_id: String = r.get(1)?;
            let score: f64 = r.get(2)?;
            Ok((CellKey::new(student_id, subject_id), score))
        })?
        .collect::<Result<HashMap<_, _>, _>>()?;

    Ok(GridSnapshot {
        class_id: class_id.to_string(),
        month: month.to_string(),
        year,
        students,
        subjects,
        scores,
    })
}

pub fn load_attendance(
    conn: &Connection,
    class_id: &str,
    month: &str,
    year: i64,
) -> rusqlite::Result<HashMap<String, AttendanceSummary>> {
    let mut stmt = conn.prepare(
        "SELECT student_id, absent, permission FROM attendance_summary
         WHERE class_id = ? AND month = ? AND year = ?",
    )?;
    let rows = stmt
        .query_map((class_id, month, year), |r| {
            Ok((
                r.get::<_, String>(0)?,
                AttendanceSummary {
                    absent: r.get(1)?,
                    permission: r.get(2)?,
                },
            ))
        })?
        .collect::<Result<HashMap<_, _>, _>>()?;
    Ok(rows)
}

pub fn upsert_attendance(
    conn: &Connection,
    class_id: &str,
    month: &str,
    year: i64,
    student_id: &str,
    summary: AttendanceSummary,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO attendance_summary(class_id, student_id, month, year, absent, permission)
         VALUES(?, ?, ?, ?, ?, ?)
         ON CONFLICT(class_id, student_id, month, year) DO UPDATE SET
           absent = excluded.absent,
           permission = excluded.permission",
        (class_id, student_id, month, year, summary.absent, summary.permission),
    )?;
    Ok(())
}

/// Writes score batches for one class-month. Every batch is one transaction.
pub struct SqliteScoreSink<'a> {
    pub conn: &'a Connection,
    pub class_id: &'a str,
    pub month: &'a str,
    pub year: i64,
}

impl SaveBatch for SqliteScoreSink<'_> {
    fn save_batch(&mut self, changes: &[ScoreChange]) -> Result<(), SaveError> {
        let tx = self.conn.unchecked_transaction()?;
        let now = chrono::Utc::now().to_rfc3339();
        {
            let mut stmt = tx.prepare(
                "INSERT INTO scores(id, class_id, student_id, subject_id, month, year, score, updated_at)
                 VALUES(?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(student_id, subject_id, month, year) DO UPDATE SET
                   score = excluded.score,
                   updated_at = excluded.updated_at",
            )?;
            for c in changes {
                let score_id = Uuid::new_v4().to_string();
                stmt.execute((
                    &score_id,
                    self.class_id,
                    &c.student_id,
                    &c.subject_id,
                    self.month,
                    self.year,
                    c.score,
                    &now,
                ))?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_workspace(prefix: &str) -> std::path::PathBuf {
        let p = std::env::temp_dir().join(format!("{}-{}", prefix, Uuid::new_v4()));
        std::fs::create_dir_all(&p).expect("create temp dir");
        p
    }

    fn seeded(conn: &Connection) -> CreatedClass {
        create_class(
            conn,
            "Grade 7A",
            &[
                NewStudent {
                    id: Some("s1".into()),
                    display_name: "Sok".into(),
                    gender: "F".into(),
                },
                NewStudent {
                    id: Some("s2".into()),
                    display_name: "Dara".into(),
                    gender: "M".into(),
                },
            ],
            &[
                NewSubject {
                    id: Some("math".into()),
                    code: "M".into(),
                    name: "Mathematics".into(),
                    max_score: 50.0,
                    coefficient: 2.0,
                },
                NewSubject {
                    id: Some("khmer".into()),
                    code: "K".into(),
                    name: "Khmer".into(),
                    max_score: 50.0,
                    coefficient: 3.0,
                },
            ],
        )
        .expect("create class")
    }

    #[test]
    fn saved_scores_reload_into_snapshot() {
        let ws = temp_workspace("gradegrid-db");
        let conn = open_db(&ws).expect("open db");
        let class = seeded(&conn);

        let mut sink = SqliteScoreSink {
            conn: &conn,
            class_id: &class.class_id,
            month: "October",
            year: 2026,
        };
        let change = ScoreChange {
            student_id: "s1".into(),
            subject_id: "math".into(),
            score: Some(42.0),
        };
        sink.save_batch(&[change.clone()]).expect("save");
        sink.save_batch(&[change]).expect("idempotent resave");

        let snap = load_grid(
            &conn,
            &class.class_id,
            "October",
            2026,
            &CallerRole::Teacher,
            &["math".to_string()],
        )
        .expect("load");
        assert_eq!(snap.students.len(), 2);
        assert_eq!(snap.scores.get(&CellKey::new("s1", "math")), Some(&42.0));
        let flags: Vec<bool> = snap.subjects.iter().map(|s| s.editable).collect();
        assert_eq!(flags, vec![true, false]);

        let other_month = load_grid(&conn, &class.class_id, "November", 2026, &CallerRole::Admin, &[])
            .expect("load");
        assert!(other_month.scores.is_empty());

        let _ = std::fs::remove_dir_all(ws);
    }

    #[test]
    fn cleared_score_is_not_loaded() {
        let ws = temp_workspace("gradegrid-db-clear");
        let conn = open_db(&ws).expect("open db");
        let class = seeded(&conn);
        let mut sink = SqliteScoreSink {
            conn: &conn,
            class_id: &class.class_id,
            month: "May",
            year: 2026,
        };
        for score in [Some(12.0), None] {
            sink.save_batch(&[ScoreChange {
                student_id: "s2".into(),
                subject_id: "khmer".into(),
                score,
            }])
            .expect("save");
        }
        let snap = load_grid(&conn, &class.class_id, "May", 2026, &CallerRole::Admin, &[]).expect("load");
        assert!(snap.scores.is_empty());

        let _ = std::fs::remove_dir_all(ws);
    }

    #[test]
    fn grid_config_round_trips_and_defaults() {
        let ws = temp_workspace("gradegrid-db-config");
        let conn = open_db(&ws).expect("open db");
        assert_eq!(load_grid_config(&conn), GridConfig::default());

        let cfg = GridConfig {
            autosave_quiet_ms: 250,
            max_paste_cells: 10,
        };
        store_grid_config(&conn, &cfg).expect("store");
        assert_eq!(load_grid_config(&conn), cfg);

        let _ = std::fs::remove_dir_all(ws);
    }
}
