use rusqlite::Connection;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::config::RecordsPolicy;
use crate::error::{CoreError, CoreResult};
use crate::grades::{average_of, round_2};
use crate::model::{Role, Trimester};
use crate::policy::{authorize, Operation, Principal};
use crate::{classrooms, cycles, db, enrollment, subjects};

pub const DEFAULT_TOP_LIMIT: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedStudent {
    pub student_id: String,
    pub student_name: String,
    pub average: f64,
    pub grade_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrimesterAverage {
    pub trimester: Trimester,
    pub average: Option<f64>,
    pub grade_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectPerformance {
    pub classroom_id: String,
    pub subject_id: String,
    pub cycle_id: String,
    pub pass_threshold: f64,
    pub approved: usize,
    pub disapproved: usize,
    /// Enrolled students with no grade in the subject yet.
    pub ungraded: usize,
    pub class_average: Option<f64>,
    pub by_trimester: Vec<TrimesterAverage>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CohortSummary {
    pub active_cycle_id: Option<String>,
    pub enrolled_students: i64,
    pub students: i64,
    pub teachers: i64,
    pub classrooms: i64,
    pub subjects: i64,
}

/// Students ranked by the mean of all their grades in the cycle, rounded
/// to two decimals. Students with no grades are left out rather than
/// ranked at zero.
pub fn top_students(conn: &Connection, actor: &Principal, cycle_id: &str, limit: usize) -> CoreResult<Vec<RankedStudent>> {
    authorize(actor, Operation::ReadAnalytics)?;
    cycles::get_cycle(conn, cycle_id)?;

    let mut stmt = conn.prepare(
        "SELECT u.id, u.name, g.grade
         FROM grades g
         JOIN users u ON u.id = g.student_id
         WHERE g.academic_cycle_id = ? AND u.role = 'STUDENT'",
    )?;
    let mut per_student: BTreeMap<String, (String, Vec<f64>)> = BTreeMap::new();
    let rows = stmt.query_map([cycle_id], |r| {
        Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?, r.get::<_, f64>(2)?))
    })?;
    for row in rows {
        let (id, name, grade) = row?;
        per_student
            .entry(id)
            .or_insert_with(|| (name, Vec::new()))
            .1
            .push(grade);
    }

    let mut ranked: Vec<RankedStudent> = per_student
        .into_iter()
        .filter_map(|(student_id, (student_name, grades))| {
            average_of(&grades).map(|avg| RankedStudent {
                student_id,
                student_name,
                average: round_2(avg),
                grade_count: grades.len(),
            })
        })
        .collect();
    ranked.sort_by(|a, b| {
        b.average
            .total_cmp(&a.average)
            .then_with(|| a.student_name.cmp(&b.student_name))
            .then_with(|| a.student_id.cmp(&b.student_id))
    });
    ranked.truncate(limit);
    tracing::debug!(cycle = %cycle_id, returned = ranked.len(), "top students computed");
    Ok(ranked)
}

pub fn subject_performance(
    conn: &Connection,
    policy: &RecordsPolicy,
    actor: &Principal,
    classroom_id: &str,
    subject_id: &str,
    cycle_id: &str,
) -> CoreResult<SubjectPerformance> {
    authorize(actor, Operation::ReadAnalytics)?;
    let tx = db::read_tx(conn)?;
    classrooms::get_classroom(&tx, classroom_id)?;
    let subject = subjects::get_subject(&tx, subject_id)?;
    if actor.role == Role::Teacher && !subject.has_staff(&actor.id) {
        return Err(CoreError::Permission {
            role: actor.role,
            operation: Operation::ReadAnalytics,
        });
    }
    cycles::get_cycle(&tx, cycle_id)?;

    let mut approved = 0;
    let mut disapproved = 0;
    let mut ungraded = 0;
    let mut all_grades = Vec::new();
    let mut by_trimester: BTreeMap<Trimester, Vec<f64>> = BTreeMap::new();

    let mut stmt = tx.prepare(
        "SELECT trimester, grade FROM grades
         WHERE student_id = ? AND subject_id = ? AND academic_cycle_id = ?",
    )?;
    for e in enrollment::enrollments_in(&tx, classroom_id, cycle_id)? {
        let grades = stmt
            .query_map((&e.student_id, subject_id, cycle_id), |r| {
                Ok((r.get::<_, i64>(0)?, r.get::<_, f64>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        let values: Vec<f64> = grades.iter().map(|(_, g)| *g).collect();
        match average_of(&values) {
            Some(avg) if avg >= policy.pass_threshold => approved += 1,
            Some(_) => disapproved += 1,
            None => ungraded += 1,
        }
        for (t, g) in grades {
            if let Some(t) = Trimester::new(t) {
                by_trimester.entry(t).or_default().push(g);
            }
        }
        all_grades.extend(values);
    }
    drop(stmt);
    tx.commit()?;

    let by_trimester = Trimester::ALL
        .iter()
        .map(|t| {
            let grades = by_trimester.get(t).map(Vec::as_slice).unwrap_or(&[]);
            TrimesterAverage {
                trimester: *t,
                average: average_of(grades).map(round_2),
                grade_count: grades.len(),
            }
        })
        .collect();

    Ok(SubjectPerformance {
        classroom_id: classroom_id.to_string(),
        subject_id: subject_id.to_string(),
        cycle_id: cycle_id.to_string(),
        pass_threshold: policy.pass_threshold,
        approved,
        disapproved,
        ungraded,
        class_average: average_of(&all_grades).map(round_2),
        by_trimester,
    })
}

pub fn cohort_summary(conn: &Connection, actor: &Principal) -> CoreResult<CohortSummary> {
    authorize(actor, Operation::ReadAnalytics)?;
    let tx = db::read_tx(conn)?;
    let active = cycles::get_active_cycle(&tx)?;
    let count = |sql: &str| -> rusqlite::Result<i64> { tx.query_row(sql, [], |r| r.get(0)) };
    let summary = CohortSummary {
        enrolled_students: count(
            "SELECT COUNT(*) FROM enrollments e JOIN active_cycle a ON a.cycle_id = e.academic_cycle_id",
        )?,
        students: count("SELECT COUNT(*) FROM users WHERE role = 'STUDENT'")?,
        teachers: count("SELECT COUNT(*) FROM users WHERE role = 'TEACHER'")?,
        classrooms: count("SELECT COUNT(*) FROM classrooms")?,
        subjects: count("SELECT COUNT(*) FROM subjects")?,
        active_cycle_id: active.map(|c| c.id),
    };
    tx.commit()?;
    Ok(summary)
}
