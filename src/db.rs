use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior};
use std::path::Path;
use std::time::Duration;

pub const DB_FILE_NAME: &str = "records.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    open_db_with_timeout(workspace, Duration::from_secs(5))
}

pub fn open_db_with_timeout(workspace: &Path, busy_timeout: Duration) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;
    // Several daemons may share one workspace; writers queue instead of failing.
    conn.busy_timeout(busy_timeout)?;
    let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |r| r.get(0))?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT NOT NULL UNIQUE,
            national_id TEXT NOT NULL UNIQUE,
            phone TEXT,
            role TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute("CREATE INDEX IF NOT EXISTS idx_users_role ON users(role)", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS academic_cycles(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            start_date TEXT NOT NULL,
            end_date TEXT NOT NULL,
            created_by TEXT NOT NULL,
            created_at TEXT NOT NULL,
            request_key TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_academic_cycles_request_key
         ON academic_cycles(request_key)",
        [],
    )?;

    // Single-row table: the presence of the row names the one active cycle.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS active_cycle(
            slot INTEGER PRIMARY KEY CHECK(slot = 1),
            cycle_id TEXT NOT NULL,
            activated_by TEXT NOT NULL,
            activated_at TEXT NOT NULL,
            FOREIGN KEY(cycle_id) REFERENCES academic_cycles(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classrooms(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT,
            lead_staff_id TEXT,
            substitute_staff_id TEXT,
            aide_staff_id TEXT,
            FOREIGN KEY(lead_staff_id) REFERENCES users(id),
            FOREIGN KEY(substitute_staff_id) REFERENCES users(id),
            FOREIGN KEY(aide_staff_id) REFERENCES users(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classroom_subjects(
            classroom_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            PRIMARY KEY(classroom_id, subject_id),
            FOREIGN KEY(classroom_id) REFERENCES classrooms(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_classroom_subjects_subject ON classroom_subjects(subject_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS enrollments(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            classroom_id TEXT NOT NULL,
            academic_cycle_id TEXT NOT NULL,
            enrolled_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES users(id),
            FOREIGN KEY(classroom_id) REFERENCES classrooms(id),
            FOREIGN KEY(academic_cycle_id) REFERENCES academic_cycles(id),
            UNIQUE(student_id, academic_cycle_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrollments_classroom_cycle
         ON enrollments(classroom_id, academic_cycle_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grades(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            academic_cycle_id TEXT NOT NULL,
            trimester INTEGER NOT NULL CHECK(trimester BETWEEN 1 AND 3),
            grade REAL NOT NULL CHECK(grade >= 0 AND grade <= 10),
            teacher_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES users(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            FOREIGN KEY(academic_cycle_id) REFERENCES academic_cycles(id),
            UNIQUE(student_id, subject_id, academic_cycle_id, trimester)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grades_student_cycle ON grades(student_id, academic_cycle_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grades_subject_cycle ON grades(subject_id, academic_cycle_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS promotion_statuses(
            student_id TEXT NOT NULL,
            academic_cycle_id TEXT NOT NULL,
            status TEXT NOT NULL,
            updated_by TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY(student_id, academic_cycle_id),
            FOREIGN KEY(student_id) REFERENCES users(id),
            FOREIGN KEY(academic_cycle_id) REFERENCES academic_cycles(id)
        )",
        [],
    )?;

    // One syllabus per teacher, subject and cycle.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS programs(
            id TEXT PRIMARY KEY,
            teacher_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            academic_cycle_id TEXT NOT NULL,
            title TEXT NOT NULL,
            content TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(teacher_id) REFERENCES users(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            FOREIGN KEY(academic_cycle_id) REFERENCES academic_cycles(id),
            UNIQUE(teacher_id, subject_id, academic_cycle_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_programs_subject_cycle ON programs(subject_id, academic_cycle_id)",
        [],
    )?;

    // One row per guarded student; the tutor's children are the reverse lookup.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS guardianships(
            student_id TEXT PRIMARY KEY,
            tutor_id TEXT NOT NULL,
            linked_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES users(id),
            FOREIGN KEY(tutor_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_guardianships_tutor ON guardianships(tutor_id)",
        [],
    )?;

    Ok(conn)
}

/// Begins a transaction that takes the write lock up front, so a
/// check-then-insert inside it cannot interleave with another writer.
pub fn write_tx(conn: &Connection) -> rusqlite::Result<Transaction<'_>> {
    Transaction::new_unchecked(conn, TransactionBehavior::Immediate)
}

/// Read snapshot spanning several queries.
pub fn read_tx(conn: &Connection) -> rusqlite::Result<Transaction<'_>> {
    conn.unchecked_transaction()
}

pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
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
