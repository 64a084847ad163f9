use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::error::{CoreError, CoreResult};
use crate::model::{AcademicCycle, PromotionStatus, Role};
use crate::policy::{authorize, Operation, Principal};
use crate::{cycles, db, guardians, users};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentPromotion {
    pub student_id: String,
    pub student_name: String,
    pub status: PromotionStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkPromotionResult {
    pub cycle_id: String,
    pub updated: usize,
}

fn require_active_cycle(conn: &Connection) -> CoreResult<AcademicCycle> {
    cycles::get_active_cycle(conn)?.ok_or(CoreError::Precondition("no-active-cycle"))
}

fn write_status(
    conn: &Connection,
    actor: &Principal,
    cycle_id: &str,
    student_id: &str,
    status: PromotionStatus,
) -> CoreResult<()> {
    conn.execute(
        "INSERT INTO promotion_statuses(student_id, academic_cycle_id, status, updated_by, updated_at)
         VALUES(?, ?, ?, ?, ?)
         ON CONFLICT(student_id, academic_cycle_id) DO UPDATE SET
           status = excluded.status,
           updated_by = excluded.updated_by,
           updated_at = excluded.updated_at",
        (student_id, cycle_id, status.as_str(), &actor.id, db::now_rfc3339()),
    )?;
    Ok(())
}

fn stored_status(conn: &Connection, student_id: &str, cycle_id: &str) -> CoreResult<PromotionStatus> {
    let status = conn
        .query_row(
            "SELECT status FROM promotion_statuses WHERE student_id = ? AND academic_cycle_id = ?",
            (student_id, cycle_id),
            |r| {
                let raw: String = r.get(0)?;
                raw.parse::<PromotionStatus>().map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, e.into())
                })
            },
        )
        .optional()?;
    Ok(status.unwrap_or_default())
}

/// Records the status against the currently active cycle.
pub fn set_promotion_status(
    conn: &Connection,
    actor: &Principal,
    student_id: &str,
    status: PromotionStatus,
) -> CoreResult<StudentPromotion> {
    authorize(actor, Operation::SetPromotion)?;
    let tx = db::write_tx(conn)?;
    let cycle = require_active_cycle(&tx)?;
    let student = users::require_role(&tx, student_id, Role::Student, "studentId")?;
    write_status(&tx, actor, &cycle.id, student_id, status)?;
    tx.commit()?;

    tracing::info!(
        actor = %actor.id,
        student = %student_id,
        cycle = %cycle.id,
        status = status.as_str(),
        "promotion status set"
    );
    Ok(StudentPromotion {
        student_id: student.id,
        student_name: student.name,
        status,
    })
}

/// All-or-nothing: every entry is checked before any is written, and the
/// writes share one transaction.
pub fn bulk_set_promotion_statuses(
    conn: &Connection,
    actor: &Principal,
    entries: &BTreeMap<String, PromotionStatus>,
) -> CoreResult<BulkPromotionResult> {
    authorize(actor, Operation::SetPromotion)?;
    let tx = db::write_tx(conn)?;
    let cycle = require_active_cycle(&tx)?;

    let mut invalid = Vec::new();
    for student_id in entries.keys() {
        if users::account_role(&tx, student_id)? != Some(Role::Student) {
            invalid.push(student_id.clone());
        }
    }
    if !invalid.is_empty() {
        tracing::warn!(actor = %actor.id, invalid = invalid.len(), "promotion batch rejected");
        return Err(CoreError::validation_with(
            "batch contains ids that are not student accounts",
            serde_json::json!({ "invalidStudentIds": invalid }),
        ));
    }

    for (student_id, status) in entries {
        write_status(&tx, actor, &cycle.id, student_id, *status)?;
    }
    tx.commit()?;

    tracing::info!(actor = %actor.id, cycle = %cycle.id, updated = entries.len(), "promotion batch committed");
    Ok(BulkPromotionResult {
        cycle_id: cycle.id,
        updated: entries.len(),
    })
}

/// `Pending` when nothing was recorded or no cycle is active.
pub fn status_for(conn: &Connection, actor: &Principal, student_id: &str) -> CoreResult<PromotionStatus> {
    authorize(actor, Operation::ReadPromotion)?;
    guardians::ensure_student_scope(conn, actor, Operation::ReadPromotion, student_id)?;
    users::require_role(conn, student_id, Role::Student, "studentId")?;
    match cycles::get_active_cycle(conn)? {
        Some(cycle) => stored_status(conn, student_id, &cycle.id),
        None => Ok(PromotionStatus::Pending),
    }
}

pub fn list_statuses(conn: &Connection, actor: &Principal) -> CoreResult<Vec<StudentPromotion>> {
    authorize(actor, Operation::ReadPromotion)?;
    if !actor.role.is_staff() {
        return Err(CoreError::Permission {
            role: actor.role,
            operation: Operation::ReadPromotion,
        });
    }
    let tx = db::read_tx(conn)?;
    let active = cycles::get_active_cycle(&tx)?;
    let mut out = Vec::new();
    for s in users::list_students(&tx)? {
        let status = match &active {
            Some(cycle) => stored_status(&tx, &s.id, &cycle.id)?,
            None => PromotionStatus::Pending,
        };
        out.push(StudentPromotion {
            student_id: s.id,
            student_name: s.name,
            status,
        });
    }
    tx.commit()?;
    Ok(out)
}
