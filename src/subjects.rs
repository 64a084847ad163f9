use rusqlite::{Connection, OptionalExtension, Row};
use serde::Deserialize;

use crate::error::{CoreError, CoreResult};
use crate::model::{double_option, Role, Subject};
use crate::policy::{authorize, Operation, Principal};
use crate::{classrooms, db, users};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSubject {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub lead_staff_id: Option<String>,
    #[serde(default)]
    pub substitute_staff_id: Option<String>,
    #[serde(default)]
    pub aide_staff_id: Option<String>,
}

/// Absent keys leave a field alone; an explicit `null` clears it.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub lead_staff_id: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub substitute_staff_id: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub aide_staff_id: Option<Option<String>>,
}

const SUBJECT_COLUMNS: &str =
    "s.id, s.name, s.description, s.lead_staff_id, s.substitute_staff_id, s.aide_staff_id";

fn row_to_subject(r: &Row<'_>) -> rusqlite::Result<Subject> {
    Ok(Subject {
        id: r.get(0)?,
        name: r.get(1)?,
        description: r.get(2)?,
        lead_staff_id: r.get(3)?,
        substitute_staff_id: r.get(4)?,
        aide_staff_id: r.get(5)?,
    })
}

fn blank_to_none(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn check_staff(conn: &Connection, field: &str, id: Option<&str>) -> CoreResult<()> {
    if let Some(id) = id {
        users::require_role(conn, id, Role::Teacher, field)?;
    }
    Ok(())
}

pub fn find_subject(conn: &Connection, id: &str) -> CoreResult<Option<Subject>> {
    let sql = format!("SELECT {SUBJECT_COLUMNS} FROM subjects s WHERE s.id = ?");
    Ok(conn.query_row(&sql, [id], row_to_subject).optional()?)
}

pub fn get_subject(conn: &Connection, id: &str) -> CoreResult<Subject> {
    find_subject(conn, id)?.ok_or_else(|| CoreError::not_found("subject", id))
}

pub fn create_subject(conn: &Connection, actor: &Principal, input: NewSubject) -> CoreResult<Subject> {
    authorize(actor, Operation::ManageSubjects)?;
    let name = input.name.trim().to_string();
    if name.is_empty() {
        return Err(CoreError::validation("name must not be empty"));
    }
    let subject = Subject {
        id: db::new_id(),
        name,
        description: blank_to_none(input.description),
        lead_staff_id: blank_to_none(input.lead_staff_id),
        substitute_staff_id: blank_to_none(input.substitute_staff_id),
        aide_staff_id: blank_to_none(input.aide_staff_id),
    };
    check_staff(conn, "leadStaffId", subject.lead_staff_id.as_deref())?;
    check_staff(conn, "substituteStaffId", subject.substitute_staff_id.as_deref())?;
    check_staff(conn, "aideStaffId", subject.aide_staff_id.as_deref())?;

    conn.execute(
        "INSERT INTO subjects(id, name, description, lead_staff_id, substitute_staff_id, aide_staff_id)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &subject.id,
            &subject.name,
            &subject.description,
            &subject.lead_staff_id,
            &subject.substitute_staff_id,
            &subject.aide_staff_id,
        ),
    )?;
    tracing::info!(actor = %actor.id, subject = %subject.id, "subject created");
    Ok(subject)
}

pub fn update_subject(
    conn: &Connection,
    actor: &Principal,
    subject_id: &str,
    patch: SubjectPatch,
) -> CoreResult<Subject> {
    authorize(actor, Operation::ManageSubjects)?;
    let tx = db::write_tx(conn)?;
    let mut subject = get_subject(&tx, subject_id)?;

    if let Some(name) = patch.name {
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(CoreError::validation("name must not be empty"));
        }
        subject.name = name;
    }
    if let Some(v) = patch.description {
        subject.description = blank_to_none(v);
    }
    if let Some(v) = patch.lead_staff_id {
        subject.lead_staff_id = blank_to_none(v);
        check_staff(&tx, "leadStaffId", subject.lead_staff_id.as_deref())?;
    }
    if let Some(v) = patch.substitute_staff_id {
        subject.substitute_staff_id = blank_to_none(v);
        check_staff(&tx, "substituteStaffId", subject.substitute_staff_id.as_deref())?;
    }
    if let Some(v) = patch.aide_staff_id {
        subject.aide_staff_id = blank_to_none(v);
        check_staff(&tx, "aideStaffId", subject.aide_staff_id.as_deref())?;
    }

    tx.execute(
        "UPDATE subjects
         SET name = ?, description = ?, lead_staff_id = ?, substitute_staff_id = ?, aide_staff_id = ?
         WHERE id = ?",
        (
            &subject.name,
            &subject.description,
            &subject.lead_staff_id,
            &subject.substitute_staff_id,
            &subject.aide_staff_id,
            subject_id,
        ),
    )?;
    tx.commit()?;
    tracing::info!(actor = %actor.id, subject = %subject_id, "subject updated");
    Ok(subject)
}

pub fn delete_subject(conn: &Connection, actor: &Principal, subject_id: &str) -> CoreResult<()> {
    authorize(actor, Operation::ManageSubjects)?;
    let tx = db::write_tx(conn)?;
    get_subject(&tx, subject_id)?;
    let graded = tx
        .query_row(
            "SELECT 1 FROM grades WHERE subject_id = ? LIMIT 1",
            [subject_id],
            |r| r.get::<_, i64>(0),
        )
        .optional()?
        .is_some();
    if graded {
        return Err(CoreError::Conflict("subject-has-grades"));
    }
    tx.execute("DELETE FROM classroom_subjects WHERE subject_id = ?", [subject_id])?;
    tx.execute("DELETE FROM subjects WHERE id = ?", [subject_id])?;
    tx.commit()?;
    tracing::info!(actor = %actor.id, subject = %subject_id, "subject deleted");
    Ok(())
}

/// Idempotent: linking an already linked pair changes nothing.
pub fn link_to_classroom(conn: &Connection, actor: &Principal, classroom_id: &str, subject_id: &str) -> CoreResult<bool> {
    authorize(actor, Operation::ManageSubjects)?;
    classrooms::get_classroom(conn, classroom_id)?;
    get_subject(conn, subject_id)?;
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO classroom_subjects(classroom_id, subject_id) VALUES(?, ?)",
        (classroom_id, subject_id),
    )?;
    Ok(inserted > 0)
}

pub fn unlink_from_classroom(conn: &Connection, actor: &Principal, classroom_id: &str, subject_id: &str) -> CoreResult<bool> {
    authorize(actor, Operation::ManageSubjects)?;
    let removed = conn.execute(
        "DELETE FROM classroom_subjects WHERE classroom_id = ? AND subject_id = ?",
        (classroom_id, subject_id),
    )?;
    Ok(removed > 0)
}

pub fn list_subjects(conn: &Connection, actor: &Principal) -> CoreResult<Vec<Subject>> {
    authorize(actor, Operation::ReadSubjects)?;
    let sql = format!("SELECT {SUBJECT_COLUMNS} FROM subjects s ORDER BY s.name, s.id");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], row_to_subject)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn subjects_for_teacher(conn: &Connection, actor: &Principal, teacher_id: &str) -> CoreResult<Vec<Subject>> {
    authorize(actor, Operation::ReadSubjects)?;
    let sql = format!(
        "SELECT {SUBJECT_COLUMNS}
         FROM subjects s
         WHERE s.lead_staff_id = ?1 OR s.substitute_staff_id = ?1 OR s.aide_staff_id = ?1
         ORDER BY s.name, s.id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([teacher_id], row_to_subject)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn subjects_for_classroom(conn: &Connection, actor: &Principal, classroom_id: &str) -> CoreResult<Vec<Subject>> {
    authorize(actor, Operation::ReadSubjects)?;
    classrooms::get_classroom(conn, classroom_id)?;
    linked_subjects(conn, classroom_id)
}

pub(crate) fn linked_subjects(conn: &Connection, classroom_id: &str) -> CoreResult<Vec<Subject>> {
    let sql = format!(
        "SELECT {SUBJECT_COLUMNS}
         FROM subjects s
         JOIN classroom_subjects cs ON cs.subject_id = s.id
         WHERE cs.classroom_id = ?
         ORDER BY s.name, s.id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([classroom_id], row_to_subject)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
