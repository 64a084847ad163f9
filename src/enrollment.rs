use rusqlite::{Connection, OptionalExtension, Row};

use crate::config::RecordsPolicy;
use crate::error::{is_unique_violation, CoreError, CoreResult};
use crate::model::{Enrollment, Role, UserAccount};
use crate::policy::{authorize, Operation, Principal};
use crate::{classrooms, cycles, db, guardians, users};

const ENROLLMENT_SELECT: &str = "SELECT e.id, e.student_id, u.name, e.classroom_id, e.academic_cycle_id, e.enrolled_at
     FROM enrollments e
     JOIN users u ON u.id = e.student_id";

fn row_to_enrollment(r: &Row<'_>) -> rusqlite::Result<Enrollment> {
    Ok(Enrollment {
        id: r.get(0)?,
        student_id: r.get(1)?,
        student_name: r.get(2)?,
        classroom_id: r.get(3)?,
        academic_cycle_id: r.get(4)?,
        enrolled_at: r.get(5)?,
    })
}

pub fn enrollment_for(conn: &Connection, student_id: &str, cycle_id: &str) -> CoreResult<Option<Enrollment>> {
    let sql = format!("{ENROLLMENT_SELECT} WHERE e.student_id = ? AND e.academic_cycle_id = ?");
    Ok(conn
        .query_row(&sql, (student_id, cycle_id), row_to_enrollment)
        .optional()?)
}

/// Scoped lookup: students see their own enrollment, tutors their children's.
pub fn enrollment_for_student(
    conn: &Connection,
    actor: &Principal,
    student_id: &str,
    cycle_id: &str,
) -> CoreResult<Option<Enrollment>> {
    if !matches!(actor.role, Role::Student | Role::Tutor) {
        authorize(actor, Operation::ReadEnrollments)?;
    }
    guardians::ensure_student_scope(conn, actor, Operation::ReadEnrollments, student_id)?;
    cycles::get_cycle(conn, cycle_id)?;
    enrollment_for(conn, student_id, cycle_id)
}

/// Check and insert run under one write lock; the UNIQUE(student, cycle)
/// constraint backs it for writers on other connections.
pub fn enroll(
    conn: &Connection,
    policy: &RecordsPolicy,
    actor: &Principal,
    student_id: &str,
    classroom_id: &str,
    cycle_id: &str,
) -> CoreResult<Enrollment> {
    authorize(actor, Operation::Enroll)?;
    let tx = db::write_tx(conn)?;
    users::require_role(&tx, student_id, Role::Student, "studentId")?;
    classrooms::get_classroom(&tx, classroom_id)?;
    cycles::ensure_writable_cycle(&tx, policy, cycle_id)?;

    if let Some(existing) = enrollment_for(&tx, student_id, cycle_id)? {
        tracing::warn!(
            student = %student_id,
            cycle = %cycle_id,
            classroom = %existing.classroom_id,
            "enroll rejected: already enrolled"
        );
        return Err(CoreError::Conflict("already-enrolled"));
    }

    let id = db::new_id();
    tx.execute(
        "INSERT INTO enrollments(id, student_id, classroom_id, academic_cycle_id, enrolled_at)
         VALUES(?, ?, ?, ?, ?)",
        (&id, student_id, classroom_id, cycle_id, db::now_rfc3339()),
    )
    .map_err(|e| {
        if is_unique_violation(&e) {
            CoreError::Conflict("already-enrolled")
        } else {
            CoreError::Db(e)
        }
    })?;
    let sql = format!("{ENROLLMENT_SELECT} WHERE e.id = ?");
    let enrollment = tx.query_row(&sql, [&id], row_to_enrollment)?;
    tx.commit()?;

    tracing::info!(
        actor = %actor.id,
        student = %student_id,
        classroom = %classroom_id,
        cycle = %cycle_id,
        "student enrolled"
    );
    Ok(enrollment)
}

pub fn unenroll(conn: &Connection, actor: &Principal, enrollment_id: &str) -> CoreResult<()> {
    authorize(actor, Operation::Unenroll)?;
    let removed = conn.execute("DELETE FROM enrollments WHERE id = ?", [enrollment_id])?;
    if removed == 0 {
        return Err(CoreError::not_found("enrollment", enrollment_id));
    }
    tracing::info!(actor = %actor.id, enrollment = %enrollment_id, "enrollment removed");
    Ok(())
}

/// Students without an enrollment in the cycle. Advisory only: `enroll`
/// re-checks under its own lock.
pub fn list_available(conn: &Connection, actor: &Principal, cycle_id: &str) -> CoreResult<Vec<UserAccount>> {
    authorize(actor, Operation::ReadEnrollments)?;
    cycles::get_cycle(conn, cycle_id)?;
    let mut stmt = conn.prepare(
        "SELECT u.id
         FROM users u
         WHERE u.role = 'STUDENT'
           AND NOT EXISTS (
             SELECT 1 FROM enrollments e
             WHERE e.student_id = u.id AND e.academic_cycle_id = ?
           )
         ORDER BY u.name, u.id",
    )?;
    let ids = stmt
        .query_map([cycle_id], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    ids.iter().map(|id| users::get_account(conn, id)).collect()
}

pub fn list_by_classroom(
    conn: &Connection,
    actor: &Principal,
    classroom_id: &str,
    cycle_id: &str,
) -> CoreResult<Vec<Enrollment>> {
    authorize(actor, Operation::ReadEnrollments)?;
    classrooms::get_classroom(conn, classroom_id)?;
    cycles::get_cycle(conn, cycle_id)?;
    enrollments_in(conn, classroom_id, cycle_id)
}

pub(crate) fn enrollments_in(conn: &Connection, classroom_id: &str, cycle_id: &str) -> CoreResult<Vec<Enrollment>> {
    let sql = format!(
        "{ENROLLMENT_SELECT}
         WHERE e.classroom_id = ? AND e.academic_cycle_id = ?
         ORDER BY u.name, u.id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map((classroom_id, cycle_id), row_to_enrollment)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
