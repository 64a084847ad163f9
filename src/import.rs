use rusqlite::Connection;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::config::RecordsPolicy;
use crate::enrollment;
use crate::error::{CoreError, CoreResult};
use crate::grades::{self, GradeEntry};
use crate::model::Role;
use crate::policy::{authorize, Operation, Principal};
use crate::users::{self, NewAccount};

pub const MAX_IMPORT_ROWS: usize = 5000;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptedRow {
    pub index: usize,
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectedRow {
    /// -1 when the rejection applies to the whole batch.
    pub index: i64,
    pub input: Value,
    pub code: String,
    pub reason: String,
}

/// Per-row outcome of a batch; rows are applied independently.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOutcome {
    pub success_count: usize,
    pub error_count: usize,
    pub accepted: Vec<AcceptedRow>,
    pub rejected: Vec<RejectedRow>,
}

impl BatchOutcome {
    fn accept(&mut self, index: usize, id: String) {
        self.success_count += 1;
        self.accepted.push(AcceptedRow { index, id });
    }

    fn reject(&mut self, index: usize, input: &Value, code: &str, reason: String) {
        self.error_count += 1;
        self.rejected.push(RejectedRow {
            index: index as i64,
            input: input.clone(),
            code: code.to_string(),
            reason,
        });
    }

    fn too_many_rows(count: usize) -> Self {
        BatchOutcome {
            success_count: 0,
            error_count: count,
            accepted: Vec::new(),
            rejected: vec![RejectedRow {
                index: -1,
                input: Value::Null,
                code: "too_many_rows".to_string(),
                reason: format!("batch exceeds max rows: {} > {}", count, MAX_IMPORT_ROWS),
            }],
        }
    }
}

/// Account rows accept both the camelCase field names and the column
/// headers of spreadsheet exports (`Name`, `DNI`, `Email`, `Role`).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountRow {
    #[serde(alias = "Name")]
    name: String,
    #[serde(alias = "Email")]
    email: String,
    #[serde(alias = "DNI", alias = "dni", deserialize_with = "string_or_number")]
    national_id: String,
    #[serde(default, alias = "Phone")]
    phone: Option<String>,
    #[serde(alias = "Role")]
    role: Role,
    #[serde(default)]
    tutor_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EnrollmentRow {
    student_id: String,
    classroom_id: String,
    #[serde(alias = "academicCycleId")]
    cycle_id: String,
}

fn string_or_number<'de, D>(de: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(de)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {}",
            other
        ))),
    }
}

fn check_batch(rows: &[Value]) -> CoreResult<Option<BatchOutcome>> {
    if rows.is_empty() {
        return Err(CoreError::validation("rows must not be empty"));
    }
    if rows.len() > MAX_IMPORT_ROWS {
        tracing::warn!(rows = rows.len(), max = MAX_IMPORT_ROWS, "import batch over limit");
        return Ok(Some(BatchOutcome::too_many_rows(rows.len())));
    }
    Ok(None)
}

/// Runs `apply` on every row; a failing row is recorded and the batch
/// moves on.
fn run_batch<T, F>(rows: &[Value], mut apply: F) -> BatchOutcome
where
    T: for<'de> Deserialize<'de>,
    F: FnMut(T) -> CoreResult<String>,
{
    let mut outcome = BatchOutcome::default();
    for (index, raw) in rows.iter().enumerate() {
        let parsed: T = match serde_json::from_value(raw.clone()) {
            Ok(v) => v,
            Err(e) => {
                outcome.reject(index, raw, "bad_row", e.to_string());
                continue;
            }
        };
        match apply(parsed) {
            Ok(id) => outcome.accept(index, id),
            Err(e) => outcome.reject(index, raw, e.code(), e.to_string()),
        }
    }
    outcome
}

fn log_outcome(kind: &str, actor: &Principal, outcome: &BatchOutcome) {
    tracing::info!(
        actor = %actor.id,
        kind,
        success = outcome.success_count,
        errors = outcome.error_count,
        "import finished"
    );
}

pub fn import_accounts(conn: &Connection, actor: &Principal, rows: &[Value]) -> CoreResult<BatchOutcome> {
    authorize(actor, Operation::ImportAccounts)?;
    if let Some(over) = check_batch(rows)? {
        return Ok(over);
    }
    let outcome = run_batch(rows, |row: AccountRow| {
        let input = NewAccount {
            name: row.name,
            email: row.email,
            national_id: row.national_id,
            phone: row.phone,
            role: row.role,
            tutor_id: row.tutor_id,
        };
        users::create_account(conn, actor, &input).map(|a| a.id)
    });
    log_outcome("accounts", actor, &outcome);
    Ok(outcome)
}

pub fn import_grades(
    conn: &Connection,
    policy: &RecordsPolicy,
    actor: &Principal,
    rows: &[Value],
) -> CoreResult<BatchOutcome> {
    authorize(actor, Operation::RecordGrades)?;
    if let Some(over) = check_batch(rows)? {
        return Ok(over);
    }
    let outcome = run_batch(rows, |entry: GradeEntry| {
        grades::upsert_grade(conn, policy, actor, &entry).map(|g| g.id)
    });
    log_outcome("grades", actor, &outcome);
    Ok(outcome)
}

pub fn import_enrollments(
    conn: &Connection,
    policy: &RecordsPolicy,
    actor: &Principal,
    rows: &[Value],
) -> CoreResult<BatchOutcome> {
    authorize(actor, Operation::Enroll)?;
    if let Some(over) = check_batch(rows)? {
        return Ok(over);
    }
    let outcome = run_batch(rows, |row: EnrollmentRow| {
        enrollment::enroll(conn, policy, actor, &row.student_id, &row.classroom_id, &row.cycle_id).map(|e| e.id)
    });
    log_outcome("enrollments", actor, &outcome);
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn account_row_accepts_spreadsheet_headers() {
        let row: AccountRow = serde_json::from_value(json!({
            "Name": "Ana Ruiz",
            "DNI": 40123456,
            "Email": "ana@example.org",
            "Role": "estudiante"
        }))
        .expect("parse row");
        assert_eq!(row.national_id, "40123456");
        assert_eq!(row.role, Role::Student);
    }

    #[test]
    fn over_limit_batch_is_one_rejection() {
        let rows = vec![json!({}); MAX_IMPORT_ROWS + 1];
        let out = check_batch(&rows).expect("check").expect("over limit");
        assert_eq!(out.success_count, 0);
        assert_eq!(out.error_count, MAX_IMPORT_ROWS + 1);
        assert_eq!(out.rejected.len(), 1);
        assert_eq!(out.rejected[0].code, "too_many_rows");
    }

    #[test]
    fn run_batch_keeps_going_after_a_bad_row() {
        let rows = vec![json!({ "n": 1 }), json!("nope"), json!({ "n": 3 })];
        #[derive(Deserialize)]
        struct Row {
            n: i64,
        }
        let out = run_batch(&rows, |r: Row| {
            if r.n == 3 {
                Err(CoreError::Conflict("already-enrolled"))
            } else {
                Ok(format!("id-{}", r.n))
            }
        });
        assert_eq!(out.success_count, 1);
        assert_eq!(out.error_count, 2);
        assert_eq!(out.accepted[0].id, "id-1");
        assert_eq!(out.rejected[0].index, 1);
        assert_eq!(out.rejected[0].code, "bad_row");
        assert_eq!(out.rejected[1].code, "conflict");
    }
}
