use rusqlite::Connection;
use std::path::Path;

pub const DB_FILE_NAME: &str = "gradebook.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(&db_path)?;
    init_schema(&conn)?;
    tracing::debug!(path = %db_path.display(), "workspace database ready");
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            passing_grade REAL
        )",
        [],
    )?;
    // Workspaces created before per-class thresholds have no passing_grade.
    ensure_classes_passing_grade(conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            last_name TEXT NOT NULL,
            first_name TEXT NOT NULL,
            middle_initial TEXT,
            student_no TEXT,
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class ON students(class_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS categories(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            name TEXT NOT NULL,
            weight REAL NOT NULL,
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_categories_class ON categories(class_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS items(
            id TEXT PRIMARY KEY,
            category_id TEXT NOT NULL,
            name TEXT NOT NULL,
            total_items INTEGER NOT NULL DEFAULT 0,
            passing_percentage REAL NOT NULL DEFAULT 0,
            sort_order INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(category_id) REFERENCES categories(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_items_category ON items(category_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS scores(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            item_id TEXT NOT NULL,
            raw_value REAL NOT NULL,
            updated_at TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(item_id) REFERENCES items(id),
            UNIQUE(student_id, item_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_scores_item ON scores(item_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_scores_student ON scores(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grade_summaries(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            final_percentage REAL NOT NULL,
            equivalent_grade REAL NOT NULL,
            remarks TEXT NOT NULL,
            is_locked INTEGER NOT NULL DEFAULT 0,
            computed_at TEXT,
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(student_id) REFERENCES students(id),
            UNIQUE(class_id, student_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grade_summaries_class ON grade_summaries(class_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS transmutation_rows(
            id TEXT PRIMARY KEY,
            min_percentage REAL NOT NULL,
            max_percentage REAL NOT NULL,
            equivalent_grade REAL NOT NULL
        )",
        [],
    )?;

    Ok(())
}

fn ensure_classes_passing_grade(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "classes", "passing_grade")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE classes ADD COLUMN passing_grade REAL", [])?;
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
