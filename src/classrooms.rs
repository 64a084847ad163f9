use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;

use crate::db;
use crate::error::{CoreError, CoreResult};
use crate::model::Classroom;
use crate::policy::{authorize, Operation, Principal};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassroomSummary {
    pub id: String,
    pub name: String,
    pub subject_count: i64,
    /// Students enrolled in the active cycle; zero when no cycle is active.
    pub student_count: i64,
}

pub fn find_classroom(conn: &Connection, id: &str) -> CoreResult<Option<Classroom>> {
    Ok(conn
        .query_row(
            "SELECT id, name, created_at FROM classrooms WHERE id = ?",
            [id],
            |r| {
                Ok(Classroom {
                    id: r.get(0)?,
                    name: r.get(1)?,
                    created_at: r.get(2)?,
                })
            },
        )
        .optional()?)
}

pub fn get_classroom(conn: &Connection, id: &str) -> CoreResult<Classroom> {
    find_classroom(conn, id)?.ok_or_else(|| CoreError::not_found("classroom", id))
}

pub fn create_classroom(conn: &Connection, actor: &Principal, name: &str) -> CoreResult<Classroom> {
    authorize(actor, Operation::ManageClassrooms)?;
    let name = name.trim();
    if name.is_empty() {
        return Err(CoreError::validation("name must not be empty"));
    }
    let classroom = Classroom {
        id: db::new_id(),
        name: name.to_string(),
        created_at: db::now_rfc3339(),
    };
    conn.execute(
        "INSERT INTO classrooms(id, name, created_at) VALUES(?, ?, ?)",
        (&classroom.id, &classroom.name, &classroom.created_at),
    )?;
    tracing::info!(actor = %actor.id, classroom = %classroom.id, "classroom created");
    Ok(classroom)
}

pub fn list_classrooms(conn: &Connection, actor: &Principal) -> CoreResult<Vec<ClassroomSummary>> {
    authorize(actor, Operation::ReadClassrooms)?;
    // Correlated subqueries avoid double-counting across the two joins.
    let mut stmt = conn.prepare(
        "SELECT
           c.id,
           c.name,
           (SELECT COUNT(*) FROM classroom_subjects cs WHERE cs.classroom_id = c.id),
           (SELECT COUNT(*)
              FROM enrollments e
              JOIN active_cycle a ON a.cycle_id = e.academic_cycle_id
             WHERE e.classroom_id = c.id)
         FROM classrooms c
         ORDER BY c.name, c.id",
    )?;
    let rows = stmt
        .query_map([], |r| {
            Ok(ClassroomSummary {
                id: r.get(0)?,
                name: r.get(1)?,
                subject_count: r.get(2)?,
                student_count: r.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
