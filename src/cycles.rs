use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension, Row};

use crate::config::RecordsPolicy;
use crate::db;
use crate::error::{CoreError, CoreResult};
use crate::model::AcademicCycle;
use crate::policy::{authorize, Operation, Principal};

const CYCLE_SELECT: &str = "SELECT c.id, c.name, c.start_date, c.end_date, c.created_by, c.created_at,
            (a.cycle_id IS NOT NULL) AS is_active
     FROM academic_cycles c
     LEFT JOIN active_cycle a ON a.cycle_id = c.id";

fn row_to_cycle(r: &Row<'_>) -> rusqlite::Result<AcademicCycle> {
    Ok(AcademicCycle {
        id: r.get(0)?,
        name: r.get(1)?,
        start_date: r.get(2)?,
        end_date: r.get(3)?,
        created_by: r.get(4)?,
        created_at: r.get(5)?,
        is_active: r.get::<_, i64>(6)? != 0,
    })
}

fn parse_date(field: &str, raw: &str) -> CoreResult<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|_| {
        CoreError::validation_with(
            format!("{} must be YYYY-MM-DD", field),
            serde_json::json!({ "field": field, "value": raw }),
        )
    })
}

pub fn find_cycle(conn: &Connection, id: &str) -> CoreResult<Option<AcademicCycle>> {
    let sql = format!("{CYCLE_SELECT} WHERE c.id = ?");
    Ok(conn.query_row(&sql, [id], row_to_cycle).optional()?)
}

pub fn get_cycle(conn: &Connection, id: &str) -> CoreResult<AcademicCycle> {
    find_cycle(conn, id)?.ok_or_else(|| CoreError::not_found("academicCycle", id))
}

/// `request_key` makes a retried create return the cycle the first attempt made.
pub fn create_cycle(
    conn: &Connection,
    actor: &Principal,
    name: &str,
    start_date: &str,
    end_date: &str,
    request_key: Option<&str>,
) -> CoreResult<AcademicCycle> {
    authorize(actor, Operation::CreateCycle)?;
    let name = name.trim();
    if name.is_empty() {
        return Err(CoreError::validation_with(
            "name must not be empty",
            serde_json::json!({ "field": "name" }),
        ));
    }
    let start = parse_date("startDate", start_date)?;
    let end = parse_date("endDate", end_date)?;
    if start >= end {
        return Err(CoreError::validation_with(
            "startDate must be before endDate",
            serde_json::json!({ "startDate": start_date, "endDate": end_date }),
        ));
    }

    let tx = db::write_tx(conn)?;
    if let Some(key) = request_key {
        let existing: Option<String> = tx
            .query_row(
                "SELECT id FROM academic_cycles WHERE request_key = ?",
                [key],
                |r| r.get(0),
            )
            .optional()?;
        if let Some(id) = existing {
            tracing::debug!(cycle = %id, request_key = %key, "create cycle replayed");
            return get_cycle(&tx, &id);
        }
    }

    let id = db::new_id();
    tx.execute(
        "INSERT INTO academic_cycles(id, name, start_date, end_date, created_by, created_at, request_key)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            name,
            start.format("%Y-%m-%d").to_string(),
            end.format("%Y-%m-%d").to_string(),
            &actor.id,
            db::now_rfc3339(),
            request_key,
        ),
    )?;
    let cycle = get_cycle(&tx, &id)?;
    tx.commit()?;
    tracing::info!(actor = %actor.id, cycle = %id, "academic cycle created");
    Ok(cycle)
}

/// Replaces the single active-cycle row. Readers see either the old or
/// the new cycle active, never both.
pub fn activate_cycle(conn: &Connection, actor: &Principal, cycle_id: &str) -> CoreResult<AcademicCycle> {
    authorize(actor, Operation::ActivateCycle)?;
    let tx = db::write_tx(conn)?;
    let exists = tx
        .query_row("SELECT 1 FROM academic_cycles WHERE id = ?", [cycle_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()?
        .is_some();
    if !exists {
        return Err(CoreError::not_found("academicCycle", cycle_id));
    }
    tx.execute(
        "INSERT INTO active_cycle(slot, cycle_id, activated_by, activated_at)
         VALUES(1, ?, ?, ?)
         ON CONFLICT(slot) DO UPDATE SET
           cycle_id = excluded.cycle_id,
           activated_by = excluded.activated_by,
           activated_at = excluded.activated_at",
        (cycle_id, &actor.id, db::now_rfc3339()),
    )?;
    let cycle = get_cycle(&tx, cycle_id)?;
    tx.commit()?;
    tracing::info!(actor = %actor.id, cycle = %cycle_id, "academic cycle activated");
    Ok(cycle)
}

pub fn deactivate_all(conn: &Connection, actor: &Principal) -> CoreResult<()> {
    authorize(actor, Operation::ActivateCycle)?;
    let removed = conn.execute("DELETE FROM active_cycle", [])?;
    if removed > 0 {
        tracing::info!(actor = %actor.id, "active cycle cleared");
    }
    Ok(())
}

pub fn get_active_cycle(conn: &Connection) -> CoreResult<Option<AcademicCycle>> {
    let sql = format!("{CYCLE_SELECT} WHERE a.slot = 1");
    Ok(conn.query_row(&sql, [], row_to_cycle).optional()?)
}

pub fn list_cycles(conn: &Connection, actor: &Principal) -> CoreResult<Vec<AcademicCycle>> {
    authorize(actor, Operation::ReadCycles)?;
    let sql = format!("{CYCLE_SELECT} ORDER BY c.start_date DESC, c.created_at DESC");
    let mut stmt = conn.prepare(&sql)?;
    let cycles = stmt
        .query_map([], row_to_cycle)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(cycles)
}

/// Write paths scoped to a cycle call this before mutating; with the
/// policy relaxed it only checks the cycle exists.
pub(crate) fn ensure_writable_cycle(conn: &Connection, policy: &RecordsPolicy, cycle_id: &str) -> CoreResult<()> {
    let cycle = get_cycle(conn, cycle_id)?;
    if !policy.writes_require_active_cycle || cycle.is_active {
        return Ok(());
    }
    match get_active_cycle(conn)? {
        None => Err(CoreError::Precondition("no-active-cycle")),
        Some(_) => Err(CoreError::Precondition("cycle-not-active")),
    }
}
