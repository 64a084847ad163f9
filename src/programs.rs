use rusqlite::{Connection, OptionalExtension, Row};
use serde::Deserialize;

use crate::config::RecordsPolicy;
use crate::error::{CoreError, CoreResult};
use crate::model::{Program, Role, Subject};
use crate::policy::{authorize, Operation, Principal};
use crate::{cycles, db, subjects, users};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgramInput {
    pub subject_id: String,
    /// Defaults to the active cycle.
    #[serde(default, alias = "academicCycleId")]
    pub cycle_id: Option<String>,
    pub title: String,
    pub content: String,
    /// Required when staff write on a teacher's behalf.
    #[serde(default)]
    pub teacher_id: Option<String>,
}

const PROGRAM_SELECT: &str = "SELECT id, teacher_id, subject_id, academic_cycle_id, title, content, created_at, updated_at
     FROM programs";

fn row_to_program(r: &Row<'_>) -> rusqlite::Result<Program> {
    Ok(Program {
        id: r.get(0)?,
        teacher_id: r.get(1)?,
        subject_id: r.get(2)?,
        academic_cycle_id: r.get(3)?,
        title: r.get(4)?,
        content: r.get(5)?,
        created_at: r.get(6)?,
        updated_at: r.get(7)?,
    })
}

fn required_text(field: &str, raw: &str) -> CoreResult<String> {
    let text = raw.trim().to_string();
    if text.is_empty() {
        return Err(CoreError::validation_with(
            format!("{} must not be empty", field),
            serde_json::json!({ "field": field }),
        ));
    }
    Ok(text)
}

fn denied(actor: &Principal, op: Operation) -> CoreError {
    CoreError::Permission {
        role: actor.role,
        operation: op,
    }
}

/// Teachers write under their own id on subjects they staff; other writers
/// must name a teacher assigned to the subject.
fn resolve_author(conn: &Connection, actor: &Principal, subject: &Subject, requested: Option<&str>) -> CoreResult<String> {
    if actor.role == Role::Teacher {
        if requested.is_some_and(|id| id != actor.id) || !subject.has_staff(&actor.id) {
            tracing::warn!(actor = %actor.id, subject = %subject.id, "teacher not assigned to subject");
            return Err(denied(actor, Operation::WritePrograms));
        }
        return Ok(actor.id.clone());
    }
    let Some(teacher_id) = requested else {
        return Err(CoreError::validation_with(
            "teacherId is required",
            serde_json::json!({ "field": "teacherId" }),
        ));
    };
    users::require_role(conn, teacher_id, Role::Teacher, "teacherId")?;
    if !subject.has_staff(teacher_id) {
        return Err(CoreError::validation_with(
            "teacherId must be assigned to the subject",
            serde_json::json!({ "field": "teacherId", "id": teacher_id, "subjectId": subject.id }),
        ));
    }
    Ok(teacher_id.to_string())
}

/// Insert-or-overwrite keyed by (teacher, subject, cycle); `createdAt`
/// survives rewrites.
pub fn upsert_program(
    conn: &Connection,
    policy: &RecordsPolicy,
    actor: &Principal,
    input: &ProgramInput,
) -> CoreResult<Program> {
    authorize(actor, Operation::WritePrograms)?;
    let title = required_text("title", &input.title)?;
    let content = required_text("content", &input.content)?;

    let tx = db::write_tx(conn)?;
    let subject = subjects::get_subject(&tx, &input.subject_id)?;
    let teacher_id = resolve_author(&tx, actor, &subject, input.teacher_id.as_deref())?;
    let cycle_id = match &input.cycle_id {
        Some(id) => id.clone(),
        None => {
            cycles::get_active_cycle(&tx)?
                .ok_or(CoreError::Precondition("no-active-cycle"))?
                .id
        }
    };
    cycles::ensure_writable_cycle(&tx, policy, &cycle_id)?;

    let now = db::now_rfc3339();
    tx.execute(
        "INSERT INTO programs(id, teacher_id, subject_id, academic_cycle_id, title, content, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(teacher_id, subject_id, academic_cycle_id) DO UPDATE SET
           title = excluded.title,
           content = excluded.content,
           updated_at = excluded.updated_at",
        (
            db::new_id(),
            &teacher_id,
            &subject.id,
            &cycle_id,
            &title,
            &content,
            &now,
            &now,
        ),
    )?;
    let sql = format!("{PROGRAM_SELECT} WHERE teacher_id = ? AND subject_id = ? AND academic_cycle_id = ?");
    let program = tx.query_row(&sql, (&teacher_id, &subject.id, &cycle_id), row_to_program)?;
    tx.commit()?;

    tracing::info!(
        actor = %actor.id,
        teacher = %teacher_id,
        subject = %subject.id,
        cycle = %cycle_id,
        "program saved"
    );
    Ok(program)
}

fn readable_subject(conn: &Connection, actor: &Principal, subject_id: &str) -> CoreResult<Subject> {
    authorize(actor, Operation::ReadPrograms)?;
    let subject = subjects::get_subject(conn, subject_id)?;
    if actor.role == Role::Teacher && !subject.has_staff(&actor.id) {
        return Err(denied(actor, Operation::ReadPrograms));
    }
    Ok(subject)
}

pub fn get_program(
    conn: &Connection,
    actor: &Principal,
    teacher_id: &str,
    subject_id: &str,
    cycle_id: &str,
) -> CoreResult<Option<Program>> {
    let tx = db::read_tx(conn)?;
    readable_subject(&tx, actor, subject_id)?;
    cycles::get_cycle(&tx, cycle_id)?;
    let sql = format!("{PROGRAM_SELECT} WHERE teacher_id = ? AND subject_id = ? AND academic_cycle_id = ?");
    let program = tx
        .query_row(&sql, (teacher_id, subject_id, cycle_id), row_to_program)
        .optional()?;
    tx.commit()?;
    Ok(program)
}

/// Every staff member's program for the subject in the cycle.
pub fn programs_for_subject(conn: &Connection, actor: &Principal, subject_id: &str, cycle_id: &str) -> CoreResult<Vec<Program>> {
    let tx = db::read_tx(conn)?;
    readable_subject(&tx, actor, subject_id)?;
    cycles::get_cycle(&tx, cycle_id)?;
    let list = {
        let sql = format!("{PROGRAM_SELECT} WHERE subject_id = ? AND academic_cycle_id = ? ORDER BY created_at, id");
        let mut stmt = tx.prepare(&sql)?;
        let rows = stmt
            .query_map((subject_id, cycle_id), row_to_program)?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };
    tx.commit()?;
    Ok(list)
}
