use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;

use crate::error::{CoreError, CoreResult};
use crate::model::{Role, UserAccount};
use crate::policy::{authorize, Operation, Principal};
use crate::{db, users};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkOutcome {
    pub tutor_id: String,
    pub student_id: String,
    /// False when the link already existed.
    pub changed: bool,
    pub previous_tutor_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairedLink {
    pub student_id: String,
    pub tutor_id: String,
    pub reason: &'static str,
}

fn tutor_of_id(conn: &Connection, student_id: &str) -> CoreResult<Option<String>> {
    Ok(conn
        .query_row(
            "SELECT tutor_id FROM guardianships WHERE student_id = ?",
            [student_id],
            |r| r.get(0),
        )
        .optional()?)
}

/// Students see only themselves and tutors only their linked children;
/// every other role passes.
pub fn ensure_student_scope(conn: &Connection, actor: &Principal, op: Operation, student_id: &str) -> CoreResult<()> {
    let allowed = match actor.role {
        Role::Student => actor.id == student_id,
        Role::Tutor => tutor_of_id(conn, student_id)?.as_deref() == Some(actor.id.as_str()),
        _ => true,
    };
    if allowed {
        Ok(())
    } else {
        tracing::warn!(actor = %actor.id, student = %student_id, operation = %op, "out of scope");
        Err(CoreError::Permission {
            role: actor.role,
            operation: op,
        })
    }
}

fn ensure_own_tutor_id(actor: &Principal, op: Operation, tutor_id: &str) -> CoreResult<()> {
    if actor.role == Role::Tutor && actor.id != tutor_id {
        return Err(CoreError::Permission {
            role: actor.role,
            operation: op,
        });
    }
    Ok(())
}

/// Both directions of the link live in one row, so the student's tutorId
/// and the tutor's children can never disagree.
pub fn link_child(conn: &Connection, actor: &Principal, tutor_id: &str, student_id: &str) -> CoreResult<LinkOutcome> {
    authorize(actor, Operation::LinkGuardian)?;
    ensure_own_tutor_id(actor, Operation::LinkGuardian, tutor_id)?;

    let tx = db::write_tx(conn)?;
    users::require_role(&tx, tutor_id, Role::Tutor, "tutorId")?;
    users::require_role(&tx, student_id, Role::Student, "studentId")?;

    let previous = tutor_of_id(&tx, student_id)?;
    match previous.as_deref() {
        Some(current) if current == tutor_id => {
            return Ok(LinkOutcome {
                tutor_id: tutor_id.to_string(),
                student_id: student_id.to_string(),
                changed: false,
                previous_tutor_id: previous,
            });
        }
        Some(_) if actor.role == Role::Tutor => {
            return Err(CoreError::Conflict("linked-to-other-tutor"));
        }
        _ => {}
    }

    tx.execute(
        "INSERT INTO guardianships(student_id, tutor_id, linked_at) VALUES(?, ?, ?)
         ON CONFLICT(student_id) DO UPDATE SET
           tutor_id = excluded.tutor_id,
           linked_at = excluded.linked_at",
        (student_id, tutor_id, db::now_rfc3339()),
    )?;
    tx.commit()?;

    tracing::info!(
        actor = %actor.id,
        tutor = %tutor_id,
        student = %student_id,
        previous = ?previous,
        "guardian linked"
    );
    Ok(LinkOutcome {
        tutor_id: tutor_id.to_string(),
        student_id: student_id.to_string(),
        changed: true,
        previous_tutor_id: previous,
    })
}

pub fn unlink_child(conn: &Connection, actor: &Principal, tutor_id: &str, student_id: &str) -> CoreResult<()> {
    authorize(actor, Operation::LinkGuardian)?;
    ensure_own_tutor_id(actor, Operation::LinkGuardian, tutor_id)?;
    let removed = conn.execute(
        "DELETE FROM guardianships WHERE student_id = ? AND tutor_id = ?",
        (student_id, tutor_id),
    )?;
    if removed == 0 {
        return Err(CoreError::not_found(
            "guardianship",
            format!("{}/{}", tutor_id, student_id),
        ));
    }
    tracing::info!(actor = %actor.id, tutor = %tutor_id, student = %student_id, "guardian unlinked");
    Ok(())
}

pub fn children_of(conn: &Connection, actor: &Principal, tutor_id: &str) -> CoreResult<Vec<UserAccount>> {
    authorize(actor, Operation::ReadGuardians)?;
    ensure_own_tutor_id(actor, Operation::ReadGuardians, tutor_id)?;
    users::require_role(conn, tutor_id, Role::Tutor, "tutorId")?;
    users::children_ids(conn, tutor_id)?
        .iter()
        .map(|id| users::get_account(conn, id))
        .collect()
}

pub fn tutor_of(conn: &Connection, actor: &Principal, student_id: &str) -> CoreResult<Option<UserAccount>> {
    authorize(actor, Operation::ReadGuardians)?;
    ensure_student_scope(conn, actor, Operation::ReadGuardians, student_id)?;
    users::get_account(conn, student_id)?;
    match tutor_of_id(conn, student_id)? {
        Some(id) => Ok(Some(users::get_account(conn, &id)?)),
        None => Ok(None),
    }
}

/// Removes links whose endpoints no longer hold the TUTOR / STUDENT roles
/// (accounts re-roled or rows written around this module).
pub fn reconcile(conn: &Connection, actor: &Principal) -> CoreResult<Vec<RepairedLink>> {
    authorize(actor, Operation::ReconcileGuardians)?;
    let tx = db::write_tx(conn)?;
    let broken = {
        let mut stmt = tx.prepare(
            "SELECT g.student_id, g.tutor_id, s.role, t.role
             FROM guardianships g
             LEFT JOIN users s ON s.id = g.student_id
             LEFT JOIN users t ON t.id = g.tutor_id
             WHERE s.role IS NULL OR s.role <> 'STUDENT'
                OR t.role IS NULL OR t.role <> 'TUTOR'
             ORDER BY g.student_id",
        )?;
        let rows = stmt
            .query_map([], |r| {
                let student_role: Option<String> = r.get(2)?;
                let tutor_role: Option<String> = r.get(3)?;
                let reason = match (student_role.as_deref(), tutor_role.as_deref()) {
                    (None, _) => "student-missing",
                    (Some(s), _) if s != "STUDENT" => "student-not-student",
                    (_, None) => "tutor-missing",
                    _ => "tutor-not-tutor",
                };
                Ok(RepairedLink {
                    student_id: r.get(0)?,
                    tutor_id: r.get(1)?,
                    reason,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };
    for link in &broken {
        tx.execute(
            "DELETE FROM guardianships WHERE student_id = ? AND tutor_id = ?",
            (&link.student_id, &link.tutor_id),
        )?;
        tracing::warn!(
            student = %link.student_id,
            tutor = %link.tutor_id,
            reason = link.reason,
            "removed inconsistent guardian link"
        );
    }
    tx.commit()?;
    Ok(broken)
}
