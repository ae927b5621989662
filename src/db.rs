use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

use crate::schema::SchemaRegistry;

pub const DB_FILE_NAME: &str = "coursedesk.sqlite3";

pub fn open_db(workspace: &Path, registry: &SchemaRegistry) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    init_schema(&conn)?;
    verify_registry(&conn, registry)?;
    Ok(conn)
}

#[cfg(test)]
pub fn open_in_memory() -> anyhow::Result<Connection> {
    let conn = Connection::open_in_memory()?;
    init_schema(&conn)?;
    Ok(conn)
}

fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS course_tabs(
            tab_id INTEGER PRIMARY KEY AUTOINCREMENT,
            module TEXT NOT NULL,
            tab_number TEXT NOT NULL,
            title TEXT NOT NULL,
            subtitle TEXT,
            video_url TEXT,
            video_upload TEXT,
            main_content TEXT,
            markdown_sections TEXT,
            code_example TEXT,
            external_links TEXT,
            table_data TEXT,
            reference_links TEXT,
            custom_module TEXT,
            display_order INTEGER NOT NULL,
            extra_html TEXT,
            prompt TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_course_tabs_module ON course_tabs(module, tab_number)",
        [],
    )?;

    // task_type and due_date mirror the source ENUM/DATE column types.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS course_tasks(
            task_id INTEGER PRIMARY KEY AUTOINCREMENT,
            tab_id INTEGER NOT NULL,
            task_type TEXT NOT NULL CHECK(task_type IN ('quiz', 'assignment')),
            question TEXT,
            options_json TEXT,
            correct_answer TEXT,
            assignment_details TEXT,
            solution TEXT,
            points INTEGER DEFAULT 1,
            due_date TEXT CHECK(due_date IS NULL OR date(due_date) IS due_date),
            FOREIGN KEY(tab_id) REFERENCES course_tabs(tab_id) ON DELETE CASCADE
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_course_tasks_tab ON course_tasks(tab_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    Ok(())
}

/// Every registered column (and key) must exist in its physical table.
fn verify_registry(conn: &Connection, registry: &SchemaRegistry) -> anyhow::Result<()> {
    for schema in registry.iter() {
        let present = table_columns(conn, &schema.name)?;
        if present.is_empty() {
            anyhow::bail!("table {} does not exist", schema.name);
        }
        let expected = std::iter::once(schema.primary_key.as_str()).chain(schema.column_names());
        for col in expected {
            if !present.iter().any(|p| p == col) {
                anyhow::bail!("table {} is missing column {}", schema.name, col);
            }
        }
    }
    Ok(())
}

fn table_columns(conn: &Connection, table: &str) -> anyhow::Result<Vec<String>> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        out.push(name);
    }
    Ok(out)
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

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::course_registry;
    use serde_json::json;

    #[test]
    fn fresh_database_matches_registry() {
        let conn = open_in_memory().expect("db");
        let reg = course_registry().expect("registry");
        verify_registry(&conn, &reg).expect("registry matches tables");
    }

    #[test]
    fn drifted_table_is_reported() {
        let conn = Connection::open_in_memory().expect("db");
        conn.execute(
            "CREATE TABLE course_tabs(tab_id INTEGER PRIMARY KEY, module TEXT)",
            [],
        )
        .expect("create");
        let reg = course_registry().expect("registry");
        let e = verify_registry(&conn, &reg).unwrap_err();
        assert!(e.to_string().contains("missing column tab_number"), "{e}");
    }

    #[test]
    fn settings_round_trip_and_overwrite() {
        let conn = open_in_memory().expect("db");
        assert!(settings_get_json(&conn, "setup.import").expect("get").is_none());
        settings_set_json(&conn, "setup.import", &json!({ "a": 1 })).expect("set");
        settings_set_json(&conn, "setup.import", &json!({ "a": 2 })).expect("set");
        assert_eq!(
            settings_get_json(&conn, "setup.import").expect("get"),
            Some(json!({ "a": 2 }))
        );
    }
}
