use rusqlite::{Connection, Row};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::config::RecordsPolicy;
use crate::error::{CoreError, CoreResult};
use crate::model::{GradeRecord, Role, Subject, Trimester};
use crate::policy::{authorize, Operation, Principal};
use crate::{classrooms, cycles, db, enrollment, guardians, subjects, users};

pub const MIN_GRADE: f64 = 0.0;
pub const MAX_GRADE: f64 = 10.0;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeEntry {
    pub student_id: String,
    pub subject_id: String,
    #[serde(alias = "academicCycleId")]
    pub cycle_id: String,
    pub trimester: i64,
    pub grade: f64,
    /// Defaults to the acting principal.
    #[serde(default)]
    pub teacher_id: Option<String>,
}

/// The three trimester slots of one student in one subject.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrimesterGrades {
    pub trimester1: Option<f64>,
    pub trimester2: Option<f64>,
    pub trimester3: Option<f64>,
}

impl TrimesterGrades {
    pub fn set(&mut self, trimester: i64, grade: f64) {
        match trimester {
            1 => self.trimester1 = Some(grade),
            2 => self.trimester2 = Some(grade),
            3 => self.trimester3 = Some(grade),
            _ => {}
        }
    }

    /// Mean of the trimesters that hold a grade; missing ones are skipped,
    /// not counted as zero.
    pub fn average(&self) -> Option<f64> {
        let present: Vec<f64> = [self.trimester1, self.trimester2, self.trimester3]
            .into_iter()
            .flatten()
            .collect();
        average_of(&present)
    }

    /// Mean of all three trimesters; `None` until every one is graded.
    pub fn final_average(&self) -> Option<f64> {
        match (self.trimester1, self.trimester2, self.trimester3) {
            (Some(a), Some(b), Some(c)) => Some((a + b + c) / 3.0),
            _ => None,
        }
    }
}

pub fn average_of(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Two-decimal rounding used for rankings and report cards.
pub fn round_2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportCardRow {
    pub subject_id: String,
    pub subject_name: String,
    #[serde(flatten)]
    pub grades: TrimesterGrades,
    /// Over the trimesters graded so far.
    pub average: Option<f64>,
    pub final_average: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportCard {
    pub student_id: String,
    pub student_name: String,
    pub cycle_id: String,
    pub classroom_id: Option<String>,
    pub rows: Vec<ReportCardRow>,
    pub cycle_average: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeSheetRow {
    pub student_id: String,
    pub student_name: String,
    #[serde(flatten)]
    pub grades: TrimesterGrades,
    pub average: Option<f64>,
}

pub fn validate_grade(policy: &RecordsPolicy, grade: f64) -> CoreResult<()> {
    if !grade.is_finite() || !(MIN_GRADE..=MAX_GRADE).contains(&grade) {
        return Err(CoreError::validation_with(
            format!("grade must be between {} and {}", MIN_GRADE, MAX_GRADE),
            serde_json::json!({ "field": "grade", "value": grade }),
        ));
    }
    if let Some(step) = policy.grade_step {
        let snapped = (grade / step).round() * step;
        if (snapped - grade).abs() > 1e-9 {
            return Err(CoreError::validation_with(
                format!("grade must be a multiple of {}", step),
                serde_json::json!({ "field": "grade", "value": grade, "step": step }),
            ));
        }
    }
    Ok(())
}

fn row_to_grade(r: &Row<'_>) -> rusqlite::Result<GradeRecord> {
    let t: i64 = r.get(4)?;
    let trimester = Trimester::new(t).ok_or(rusqlite::Error::IntegralValueOutOfRange(4, t))?;
    Ok(GradeRecord {
        id: r.get(0)?,
        student_id: r.get(1)?,
        subject_id: r.get(2)?,
        academic_cycle_id: r.get(3)?,
        trimester,
        grade: r.get(5)?,
        teacher_id: r.get(6)?,
        created_at: r.get(7)?,
        updated_at: r.get(8)?,
    })
}

/// Resolves whose name the grade is recorded under and checks the actor
/// may record it.
fn resolve_teacher(conn: &Connection, actor: &Principal, subject: &Subject, requested: Option<&str>) -> CoreResult<String> {
    match actor.role {
        Role::Teacher => {
            let teacher_id = requested.unwrap_or(actor.id.as_str());
            if teacher_id != actor.id || !subject.has_staff(&actor.id) {
                tracing::warn!(actor = %actor.id, subject = %subject.id, "teacher not assigned to subject");
                return Err(CoreError::Permission {
                    role: actor.role,
                    operation: Operation::RecordGrades,
                });
            }
            Ok(actor.id.clone())
        }
        _ => match requested {
            Some(id) => {
                users::require_role(conn, id, Role::Teacher, "teacherId")?;
                Ok(id.to_string())
            }
            None => Ok(actor.id.clone()),
        },
    }
}

/// Insert-or-overwrite keyed by (student, subject, cycle, trimester).
/// Concurrent writers to one key serialize on the write lock; the last
/// one wins and no duplicate row can appear.
pub fn upsert_grade(
    conn: &Connection,
    policy: &RecordsPolicy,
    actor: &Principal,
    entry: &GradeEntry,
) -> CoreResult<GradeRecord> {
    authorize(actor, Operation::RecordGrades)?;
    let trimester = Trimester::new(entry.trimester).ok_or_else(|| {
        CoreError::validation_with(
            "trimester must be 1, 2 or 3",
            serde_json::json!({ "field": "trimester", "value": entry.trimester }),
        )
    })?;
    validate_grade(policy, entry.grade)?;

    let tx = db::write_tx(conn)?;
    let subject = subjects::get_subject(&tx, &entry.subject_id)?;
    let teacher_id = resolve_teacher(&tx, actor, &subject, entry.teacher_id.as_deref())?;
    users::require_role(&tx, &entry.student_id, Role::Student, "studentId")?;
    cycles::ensure_writable_cycle(&tx, policy, &entry.cycle_id)?;

    let now = db::now_rfc3339();
    tx.execute(
        "INSERT INTO grades(id, student_id, subject_id, academic_cycle_id, trimester, grade, teacher_id, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id, subject_id, academic_cycle_id, trimester) DO UPDATE SET
           grade = excluded.grade,
           teacher_id = excluded.teacher_id,
           updated_at = excluded.updated_at",
        (
            db::new_id(),
            &entry.student_id,
            &entry.subject_id,
            &entry.cycle_id,
            trimester.get(),
            entry.grade,
            &teacher_id,
            &now,
            &now,
        ),
    )?;
    let record = tx.query_row(
        "SELECT id, student_id, subject_id, academic_cycle_id, trimester, grade, teacher_id, created_at, updated_at
         FROM grades
         WHERE student_id = ? AND subject_id = ? AND academic_cycle_id = ? AND trimester = ?",
        (&entry.student_id, &entry.subject_id, &entry.cycle_id, trimester.get()),
        row_to_grade,
    )?;
    tx.commit()?;

    tracing::debug!(
        actor = %actor.id,
        student = %entry.student_id,
        subject = %entry.subject_id,
        cycle = %entry.cycle_id,
        trimester = trimester.get(),
        grade = entry.grade,
        "grade recorded"
    );
    Ok(record)
}

fn trimester_grades(conn: &Connection, student_id: &str, subject_id: &str, cycle_id: &str) -> CoreResult<TrimesterGrades> {
    let mut stmt = conn.prepare(
        "SELECT trimester, grade FROM grades
         WHERE student_id = ? AND subject_id = ? AND academic_cycle_id = ?",
    )?;
    let mut out = TrimesterGrades::default();
    let rows = stmt.query_map((student_id, subject_id, cycle_id), |r| {
        Ok((r.get::<_, i64>(0)?, r.get::<_, f64>(1)?))
    })?;
    for row in rows {
        let (t, g) = row?;
        out.set(t, g);
    }
    Ok(out)
}

pub fn average_for(
    conn: &Connection,
    actor: &Principal,
    student_id: &str,
    subject_id: &str,
    cycle_id: &str,
) -> CoreResult<Option<f64>> {
    authorize(actor, Operation::ReadGrades)?;
    guardians::ensure_student_scope(conn, actor, Operation::ReadGrades, student_id)?;
    let tx = db::read_tx(conn)?;
    users::require_role(&tx, student_id, Role::Student, "studentId")?;
    subjects::get_subject(&tx, subject_id)?;
    cycles::get_cycle(&tx, cycle_id)?;
    let average = trimester_grades(&tx, student_id, subject_id, cycle_id)?.average();
    tx.commit()?;
    Ok(average)
}

/// Mean over every grade the student holds in the cycle.
pub(crate) fn student_cycle_average(conn: &Connection, student_id: &str, cycle_id: &str) -> CoreResult<Option<f64>> {
    let mut stmt = conn.prepare("SELECT grade FROM grades WHERE student_id = ? AND academic_cycle_id = ?")?;
    let values = stmt
        .query_map((student_id, cycle_id), |r| r.get::<_, f64>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(average_of(&values))
}

pub fn cycle_average(conn: &Connection, actor: &Principal, student_id: &str, cycle_id: &str) -> CoreResult<Option<f64>> {
    authorize(actor, Operation::ReadGrades)?;
    guardians::ensure_student_scope(conn, actor, Operation::ReadGrades, student_id)?;
    let tx = db::read_tx(conn)?;
    users::require_role(&tx, student_id, Role::Student, "studentId")?;
    cycles::get_cycle(&tx, cycle_id)?;
    let average = student_cycle_average(&tx, student_id, cycle_id)?;
    tx.commit()?;
    Ok(average)
}

/// One row per subject linked to the student's classroom for the cycle,
/// graded or not, plus any other subject the student holds grades in.
/// Read inside one snapshot so a concurrent upsert is seen whole or not at all.
pub fn report_card(conn: &Connection, actor: &Principal, student_id: &str, cycle_id: &str) -> CoreResult<ReportCard> {
    authorize(actor, Operation::ReadGrades)?;
    guardians::ensure_student_scope(conn, actor, Operation::ReadGrades, student_id)?;

    let tx = db::read_tx(conn)?;
    let student = users::require_role(&tx, student_id, Role::Student, "studentId")?;
    cycles::get_cycle(&tx, cycle_id)?;
    let enrolled = enrollment::enrollment_for(&tx, student_id, cycle_id)?;

    let mut rows: HashMap<String, ReportCardRow> = HashMap::new();
    if let Some(e) = &enrolled {
        for s in subjects::linked_subjects(&tx, &e.classroom_id)? {
            rows.insert(
                s.id.clone(),
                ReportCardRow {
                    subject_id: s.id,
                    subject_name: s.name,
                    grades: TrimesterGrades::default(),
                    average: None,
                    final_average: None,
                },
            );
        }
    }

    let mut all_grades = Vec::new();
    {
        let mut stmt = tx.prepare(
            "SELECT g.subject_id, s.name, g.trimester, g.grade
             FROM grades g
             JOIN subjects s ON s.id = g.subject_id
             WHERE g.student_id = ? AND g.academic_cycle_id = ?",
        )?;
        let graded = stmt.query_map((student_id, cycle_id), |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, i64>(2)?,
                r.get::<_, f64>(3)?,
            ))
        })?;
        for row in graded {
            let (subject_id, subject_name, trimester, grade) = row?;
            all_grades.push(grade);
            rows.entry(subject_id.clone())
                .or_insert_with(|| ReportCardRow {
                    subject_id,
                    subject_name,
                    grades: TrimesterGrades::default(),
                    average: None,
                    final_average: None,
                })
                .grades
                .set(trimester, grade);
        }
    }
    tx.commit()?;

    let mut rows: Vec<ReportCardRow> = rows
        .into_values()
        .map(|mut row| {
            row.average = row.grades.average().map(round_2);
            row.final_average = row.grades.final_average().map(round_2);
            row
        })
        .collect();
    rows.sort_by(|a, b| {
        a.subject_name
            .cmp(&b.subject_name)
            .then_with(|| a.subject_id.cmp(&b.subject_id))
    });

    Ok(ReportCard {
        student_id: student.id,
        student_name: student.name,
        cycle_id: cycle_id.to_string(),
        classroom_id: enrolled.map(|e| e.classroom_id),
        rows,
        cycle_average: average_of(&all_grades).map(round_2),
    })
}

/// Class grading sheet: every enrolled student with their trimester grades
/// in one subject.
pub fn grade_sheet(
    conn: &Connection,
    actor: &Principal,
    classroom_id: &str,
    subject_id: &str,
    cycle_id: &str,
) -> CoreResult<Vec<GradeSheetRow>> {
    authorize(actor, Operation::ReadGrades)?;
    if matches!(actor.role, Role::Student | Role::Tutor) {
        return Err(CoreError::Permission {
            role: actor.role,
            operation: Operation::ReadGrades,
        });
    }

    let tx = db::read_tx(conn)?;
    classrooms::get_classroom(&tx, classroom_id)?;
    let subject = subjects::get_subject(&tx, subject_id)?;
    if actor.role == Role::Teacher && !subject.has_staff(&actor.id) {
        return Err(CoreError::Permission {
            role: actor.role,
            operation: Operation::ReadGrades,
        });
    }
    cycles::get_cycle(&tx, cycle_id)?;

    let mut sheet = Vec::new();
    for e in enrollment::enrollments_in(&tx, classroom_id, cycle_id)? {
        let grades = trimester_grades(&tx, &e.student_id, subject_id, cycle_id)?;
        sheet.push(GradeSheetRow {
            student_id: e.student_id,
            student_name: e.student_name,
            average: grades.average(),
            grades,
        });
    }
    tx.commit()?;
    Ok(sheet)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn average_skips_missing_trimesters() {
        let mut g = TrimesterGrades::default();
        g.set(1, 8.0);
        g.set(3, 6.0);
        assert_eq!(g.average(), Some(7.0));
    }

    #[test]
    fn final_average_needs_all_three_trimesters() {
        let mut g = TrimesterGrades::default();
        g.set(1, 6.0);
        g.set(2, 7.0);
        assert_eq!(g.final_average(), None);
        g.set(3, 9.5);
        assert_eq!(g.final_average().map(round_2), Some(7.5));
    }

    #[test]
    fn average_is_none_without_grades() {
        assert_eq!(TrimesterGrades::default().average(), None);
        assert_eq!(average_of(&[]), None);
    }

    #[test]
    fn grade_range_is_inclusive() {
        let p = RecordsPolicy::default();
        assert!(validate_grade(&p, 0.0).is_ok());
        assert!(validate_grade(&p, 10.0).is_ok());
        assert!(validate_grade(&p, 7.25).is_ok());
        assert!(validate_grade(&p, -0.5).is_err());
        assert!(validate_grade(&p, 10.5).is_err());
        assert!(validate_grade(&p, f64::NAN).is_err());
    }

    #[test]
    fn grade_step_policy_rejects_off_step_values() {
        let p = RecordsPolicy {
            grade_step: Some(0.5),
            ..RecordsPolicy::default()
        };
        assert!(validate_grade(&p, 7.5).is_ok());
        assert!(validate_grade(&p, 7.25).is_err());
    }

    #[test]
    fn round_2_matches_display_rounding() {
        assert_eq!(round_2(7.666_666), 7.67);
        assert_eq!(round_2(8.0), 8.0);
    }
}
