use crate::calc::{self, CalcError, CategoryAggregate, ItemInput};
use crate::scales::{self, Remarks, TransmutationRow, TransmutationTable};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Final percentage at or above which a summary counts as excellent.
pub const EXCELLENT_THRESHOLD: f64 = 90.0;

#[derive(Debug, Clone)]
pub struct SnapshotStudent {
    pub id: String,
    pub display_name: String,
}

#[derive(Debug, Clone)]
pub struct SnapshotItem {
    pub id: String,
    pub name: String,
    pub total_items: i64,
    pub passing_percentage: f64,
}

#[derive(Debug, Clone)]
pub struct SnapshotCategory {
    pub id: String,
    pub name: String,
    pub weight: f64,
    pub items: Vec<SnapshotItem>,
}

/// Everything the engine reads for one class, taken in a single pass so a
/// batch never mixes old and new scores.
#[derive(Debug, Clone)]
pub struct ClassSnapshot {
    pub class_id: String,
    pub class_name: String,
    pub passing_grade: Option<f64>,
    pub categories: Vec<SnapshotCategory>,
    pub students: Vec<SnapshotStudent>,
    scores: HashMap<(String, String), f64>,
}

pub fn display_name(last: &str, first: &str, middle_initial: Option<&str>) -> String {
    match middle_initial.map(str::trim).filter(|m| !m.is_empty()) {
        Some(m) => format!("{}, {} {}.", last, first, m),
        None => format!("{}, {}", last, first),
    }
}

pub fn load_class_snapshot(conn: &Connection, class_id: &str) -> Result<ClassSnapshot, CalcError> {
    let class_row: Option<(String, Option<f64>)> = conn
        .query_row(
            "SELECT name, passing_grade FROM classes WHERE id = ?",
            [class_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(|e| CalcError::db("db_query_failed", e))?;
    let Some((class_name, passing_grade)) = class_row else {
        return Err(CalcError::new("not_found", "class not found"));
    };

    let mut students_stmt = conn
        .prepare(
            "SELECT id, last_name, first_name, middle_initial
             FROM students
             WHERE class_id = ?
             ORDER BY last_name, first_name, id",
        )
        .map_err(|e| CalcError::db("db_query_failed", e))?;
    let students: Vec<SnapshotStudent> = students_stmt
        .query_map([class_id], |r| {
            let last: String = r.get(1)?;
            let first: String = r.get(2)?;
            let middle: Option<String> = r.get(3)?;
            Ok(SnapshotStudent {
                id: r.get(0)?,
                display_name: display_name(&last, &first, middle.as_deref()),
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| CalcError::db("db_query_failed", e))?;

    let mut items_stmt = conn
        .prepare(
            "SELECT i.id, i.category_id, i.name, i.total_items, i.passing_percentage
             FROM items i
             JOIN categories c ON c.id = i.category_id
             WHERE c.class_id = ?
             ORDER BY i.sort_order, i.rowid",
        )
        .map_err(|e| CalcError::db("db_query_failed", e))?;
    let mut items_by_category: HashMap<String, Vec<SnapshotItem>> = HashMap::new();
    let item_rows = items_stmt
        .query_map([class_id], |r| {
            let category_id: String = r.get(1)?;
            Ok((
                category_id,
                SnapshotItem {
                    id: r.get(0)?,
                    name: r.get(2)?,
                    total_items: r.get(3)?,
                    passing_percentage: r.get(4)?,
                },
            ))
        })
        .map_err(|e| CalcError::db("db_query_failed", e))?;
    for row in item_rows {
        let (category_id, item) = row.map_err(|e| CalcError::db("db_query_failed", e))?;
        items_by_category.entry(category_id).or_default().push(item);
    }

    let mut categories_stmt = conn
        .prepare(
            "SELECT id, name, weight
             FROM categories
             WHERE class_id = ?
             ORDER BY name, id",
        )
        .map_err(|e| CalcError::db("db_query_failed", e))?;
    let categories: Vec<SnapshotCategory> = categories_stmt
        .query_map([class_id], |r| {
            let id: String = r.get(0)?;
            Ok(SnapshotCategory {
                items: Vec::new(),
                id,
                name: r.get(1)?,
                weight: r.get(2)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| CalcError::db("db_query_failed", e))?
        .into_iter()
        .map(|mut c| {
            c.items = items_by_category.remove(&c.id).unwrap_or_default();
            c
        })
        .collect();

    let mut scores_stmt = conn
        .prepare(
            "SELECT s.student_id, s.item_id, s.raw_value
             FROM scores s
             JOIN items i ON i.id = s.item_id
             JOIN categories c ON c.id = i.category_id
             WHERE c.class_id = ?",
        )
        .map_err(|e| CalcError::db("db_query_failed", e))?;
    let mut scores: HashMap<(String, String), f64> = HashMap::new();
    let score_rows = scores_stmt
        .query_map([class_id], |r| {
            let student_id: String = r.get(0)?;
            let item_id: String = r.get(1)?;
            let raw: f64 = r.get(2)?;
            Ok((student_id, item_id, raw))
        })
        .map_err(|e| CalcError::db("db_query_failed", e))?;
    for row in score_rows {
        let (student_id, item_id, raw) = row.map_err(|e| CalcError::db("db_query_failed", e))?;
        scores.insert((student_id, item_id), raw);
    }

    Ok(ClassSnapshot {
        class_id: class_id.to_string(),
        class_name,
        passing_grade,
        categories,
        students,
        scores,
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemBreakdown {
    pub item_id: String,
    pub name: String,
    pub total_items: i64,
    pub score: Option<f64>,
    pub percentage: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryBreakdown {
    pub category_id: String,
    pub name: String,
    pub weight: f64,
    pub items: Vec<ItemBreakdown>,
    #[serde(flatten)]
    pub aggregate: CategoryAggregate,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentGrade {
    pub student_id: String,
    pub display_name: String,
    pub categories: Vec<CategoryBreakdown>,
    pub final_percentage: f64,
    pub equivalent_grade: f64,
    pub remarks: Remarks,
}

impl ClassSnapshot {
    pub fn weights(&self) -> Vec<f64> {
        self.categories.iter().map(|c| c.weight).collect()
    }

    pub fn weight_total(&self) -> f64 {
        calc::weight_total(&self.weights())
    }

    pub fn student(&self, student_id: &str) -> Option<&SnapshotStudent> {
        self.students.iter().find(|s| s.id == student_id)
    }

    pub fn score(&self, student_id: &str, item_id: &str) -> Option<f64> {
        self.scores
            .get(&(student_id.to_string(), item_id.to_string()))
            .copied()
    }

    /// Missing scores surface here as `None`; the aggregator decides what
    /// they are worth.
    pub fn item_inputs(&self, student_id: &str, category: &SnapshotCategory) -> Vec<ItemInput> {
        category
            .items
            .iter()
            .map(|item| ItemInput {
                max: item.total_items as f64,
                score: self.score(student_id, &item.id),
            })
            .collect()
    }

    pub fn grade_student(&self, student: &SnapshotStudent) -> StudentGrade {
        let mut categories = Vec::with_capacity(self.categories.len());
        let mut contributions = Vec::with_capacity(self.categories.len());

        for cat in &self.categories {
            let inputs = self.item_inputs(&student.id, cat);
            let aggregate = calc::aggregate_category(&inputs, cat.weight);
            contributions.push(aggregate.weighted);

            let items = cat
                .items
                .iter()
                .zip(&inputs)
                .map(|(item, input)| ItemBreakdown {
                    item_id: item.id.clone(),
                    name: item.name.clone(),
                    total_items: item.total_items,
                    score: input.score,
                    percentage: calc::normalize_score(input.score, input.max),
                })
                .collect();
            categories.push(CategoryBreakdown {
                category_id: cat.id.clone(),
                name: cat.name.clone(),
                weight: cat.weight,
                items,
                aggregate,
            });
        }

        let final_percentage = calc::compose_final(&contributions);
        StudentGrade {
            student_id: student.id.clone(),
            display_name: student.display_name.clone(),
            categories,
            final_percentage,
            equivalent_grade: scales::final_equivalent_grade(final_percentage),
            remarks: scales::classify_remarks(final_percentage, self.passing_grade),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeSummary {
    pub student_id: String,
    pub display_name: String,
    pub final_percentage: f64,
    pub equivalent_grade: f64,
    pub remarks: Remarks,
    pub locked: bool,
    pub computed_at: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ComputeOptions {
    /// Overwrite locked summaries too, unlocking them.
    pub override_locks: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputeOutcome {
    pub class_id: String,
    pub weight_total: f64,
    pub written: Vec<GradeSummary>,
    pub skipped_locked: Vec<String>,
}

/// Recomputes every roster student's summary for the class as one
/// transaction. The write lock is taken before the snapshot is read, and any
/// failure drops the transaction so none of the batch is kept.
pub fn compute_final_grades(
    conn: &mut Connection,
    class_id: &str,
    opts: ComputeOptions,
) -> Result<ComputeOutcome, CalcError> {
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(|e| CalcError::db("db_tx_failed", e))?;

    let snapshot = load_class_snapshot(&tx, class_id)?;
    let weight_total = match calc::check_weights(&snapshot.weights()) {
        Ok(total) => total,
        Err(e) => {
            tracing::warn!(
                class_id,
                weight_total = snapshot.weight_total(),
                "final grade computation refused"
            );
            return Err(e);
        }
    };

    let locked = locked_students(&tx, class_id)?;
    let computed_at = Utc::now().to_rfc3339();
    let mut written = Vec::with_capacity(snapshot.students.len());
    let mut skipped_locked = Vec::new();

    for student in &snapshot.students {
        if !opts.override_locks && locked.contains(&student.id) {
            skipped_locked.push(student.id.clone());
            continue;
        }
        let grade = snapshot.grade_student(student);
        write_summary(&tx, class_id, &grade, &computed_at)?;
        written.push(GradeSummary {
            student_id: grade.student_id,
            display_name: grade.display_name,
            final_percentage: grade.final_percentage,
            equivalent_grade: grade.equivalent_grade,
            remarks: grade.remarks,
            locked: false,
            computed_at: Some(computed_at.clone()),
        });
    }

    tx.commit().map_err(|e| CalcError::db("db_tx_failed", e))?;

    tracing::info!(
        class_id,
        roster = snapshot.students.len(),
        written = written.len(),
        skipped_locked = skipped_locked.len(),
        "final grades computed"
    );

    Ok(ComputeOutcome {
        class_id: class_id.to_string(),
        weight_total,
        written,
        skipped_locked,
    })
}

fn locked_students(conn: &Connection, class_id: &str) -> Result<HashSet<String>, CalcError> {
    let mut stmt = conn
        .prepare("SELECT student_id FROM grade_summaries WHERE class_id = ? AND is_locked = 1")
        .map_err(|e| CalcError::db("db_query_failed", e))?;
    let ids = stmt
        .query_map([class_id], |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<HashSet<_>, _>>())
        .map_err(|e| CalcError::db("db_query_failed", e))?;
    Ok(ids)
}

fn write_summary(
    conn: &Connection,
    class_id: &str,
    grade: &StudentGrade,
    computed_at: &str,
) -> Result<(), CalcError> {
    let summary_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO grade_summaries(
           id, class_id, student_id, final_percentage, equivalent_grade, remarks, is_locked, computed_at
         )
         VALUES(?, ?, ?, ?, ?, ?, 0, ?)
         ON CONFLICT(class_id, student_id) DO UPDATE SET
           final_percentage = excluded.final_percentage,
           equivalent_grade = excluded.equivalent_grade,
           remarks = excluded.remarks,
           is_locked = 0,
           computed_at = excluded.computed_at",
        (
            &summary_id,
            class_id,
            &grade.student_id,
            grade.final_percentage,
            grade.equivalent_grade,
            grade.remarks.as_str(),
            computed_at,
        ),
    )
    .map_err(|e| {
        CalcError::db("db_insert_failed", e).with_details(serde_json::json!({
            "table": "grade_summaries",
            "studentId": grade.student_id,
        }))
    })?;
    Ok(())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryStats {
    pub passed_count: usize,
    pub failed_count: usize,
    pub excellent_count: usize,
}

pub fn summary_stats(summaries: &[GradeSummary]) -> SummaryStats {
    let mut stats = SummaryStats::default();
    for s in summaries {
        match s.remarks {
            Remarks::Passed => stats.passed_count += 1,
            Remarks::Failed => stats.failed_count += 1,
        }
        if s.final_percentage >= EXCELLENT_THRESHOLD {
            stats.excellent_count += 1;
        }
    }
    stats
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryListing {
    pub class_id: String,
    pub passing_grade: f64,
    pub summaries: Vec<GradeSummary>,
    #[serde(flatten)]
    pub stats: SummaryStats,
}

fn class_passing_grade(conn: &Connection, class_id: &str) -> Result<Option<f64>, CalcError> {
    let row: Option<Option<f64>> = conn
        .query_row(
            "SELECT passing_grade FROM classes WHERE id = ?",
            [class_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| CalcError::db("db_query_failed", e))?;
    row.ok_or_else(|| CalcError::new("not_found", "class not found"))
}

/// Stored summaries for a class, best first.
pub fn list_summaries(conn: &Connection, class_id: &str) -> Result<SummaryListing, CalcError> {
    let passing_grade = class_passing_grade(conn, class_id)?;

    let mut stmt = conn
        .prepare(
            "SELECT g.student_id, s.last_name, s.first_name, s.middle_initial,
                    g.final_percentage, g.equivalent_grade, g.remarks, g.is_locked, g.computed_at
             FROM grade_summaries g
             JOIN students s ON s.id = g.student_id
             WHERE g.class_id = ?
             ORDER BY g.final_percentage DESC, s.last_name, s.first_name",
        )
        .map_err(|e| CalcError::db("db_query_failed", e))?;
    let summaries: Vec<GradeSummary> = stmt
        .query_map([class_id], |r| {
            let last: String = r.get(1)?;
            let first: String = r.get(2)?;
            let middle: Option<String> = r.get(3)?;
            let remarks: String = r.get(6)?;
            Ok(GradeSummary {
                student_id: r.get(0)?,
                display_name: display_name(&last, &first, middle.as_deref()),
                final_percentage: r.get(4)?,
                equivalent_grade: r.get(5)?,
                remarks: Remarks::parse(&remarks).unwrap_or(Remarks::Failed),
                locked: r.get::<_, i64>(7)? != 0,
                computed_at: r.get(8)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| CalcError::db("db_query_failed", e))?;

    let stats = summary_stats(&summaries);
    Ok(SummaryListing {
        class_id: class_id.to_string(),
        passing_grade: passing_grade.unwrap_or(scales::DEFAULT_PASSING_GRADE),
        summaries,
        stats,
    })
}

/// Sets the advisory lock flag on existing summaries. `None` means every
/// summary in the class. Returns the number of rows touched.
pub fn set_locked(
    conn: &Connection,
    class_id: &str,
    student_ids: Option<&[String]>,
    locked: bool,
) -> Result<usize, CalcError> {
    class_passing_grade(conn, class_id)?;
    let flag = if locked { 1_i64 } else { 0_i64 };

    let Some(ids) = student_ids else {
        return conn
            .execute(
                "UPDATE grade_summaries SET is_locked = ? WHERE class_id = ?",
                (flag, class_id),
            )
            .map_err(|e| CalcError::db("db_update_failed", e));
    };

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| CalcError::db("db_tx_failed", e))?;
    let mut changed = 0;
    for id in ids {
        changed += tx
            .execute(
                "UPDATE grade_summaries SET is_locked = ? WHERE class_id = ? AND student_id = ?",
                (flag, class_id, id),
            )
            .map_err(|e| CalcError::db("db_update_failed", e))?;
    }
    tx.commit().map_err(|e| CalcError::db("db_tx_failed", e))?;
    Ok(changed)
}

pub fn load_transmutation_table(conn: &Connection) -> Result<TransmutationTable, CalcError> {
    let mut stmt = conn
        .prepare(
            "SELECT min_percentage, max_percentage, equivalent_grade
             FROM transmutation_rows
             ORDER BY min_percentage DESC",
        )
        .map_err(|e| CalcError::db("db_query_failed", e))?;
    let rows: Vec<TransmutationRow> = stmt
        .query_map([], |r| {
            Ok(TransmutationRow::new(r.get(0)?, r.get(1)?, r.get(2)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| CalcError::db("db_query_failed", e))?;
    Ok(TransmutationTable::from_rows(rows))
}

/// Replaces the configured table wholesale. An empty list restores the
/// built-in default.
pub fn replace_transmutation_table(
    conn: &Connection,
    rows: &[TransmutationRow],
) -> Result<TransmutationTable, CalcError> {
    for (i, r) in rows.iter().enumerate() {
        let finite = r.min_percentage.is_finite()
            && r.max_percentage.is_finite()
            && r.equivalent_grade.is_finite();
        if !finite || r.min_percentage > r.max_percentage {
            return Err(CalcError::new(
                "bad_params",
                "each row needs finite values with minPercentage <= maxPercentage",
            )
            .with_details(serde_json::json!({ "row": i })));
        }
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| CalcError::db("db_tx_failed", e))?;
    tx.execute("DELETE FROM transmutation_rows", [])
        .map_err(|e| CalcError::db("db_delete_failed", e))?;
    for r in rows {
        tx.execute(
            "INSERT INTO transmutation_rows(id, min_percentage, max_percentage, equivalent_grade)
             VALUES(?, ?, ?, ?)",
            (
                Uuid::new_v4().to_string(),
                r.min_percentage,
                r.max_percentage,
                r.equivalent_grade,
            ),
        )
        .map_err(|e| CalcError::db("db_insert_failed", e))?;
    }
    tx.commit().map_err(|e| CalcError::db("db_tx_failed", e))?;

    Ok(TransmutationTable::from_rows(rows.to_vec()))
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetItem {
    pub item_id: String,
    pub name: String,
    pub total_items: i64,
    pub passing_percentage: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetStudentAverage {
    pub student_id: String,
    pub average: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetCategory {
    pub category_id: String,
    pub name: String,
    pub weight: f64,
    pub items: Vec<SheetItem>,
    pub averages: Vec<SheetStudentAverage>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetScore {
    pub student_id: String,
    pub item_id: String,
    pub score: f64,
    pub percentage: f64,
    pub equivalent_grade: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetStudent {
    pub student_id: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetModel {
    pub class_id: String,
    pub class_name: String,
    pub passing_grade: f64,
    pub weight_total: f64,
    pub students: Vec<SheetStudent>,
    pub categories: Vec<SheetCategory>,
    pub scores: Vec<SheetScore>,
    pub transmutation: Vec<TransmutationRow>,
}

/// Grade-sheet view: per-category display averages over recorded scores only
/// and the item-level equivalent for every recorded score.
pub fn grade_sheet(conn: &Connection, class_id: &str) -> Result<SheetModel, CalcError> {
    let snapshot = load_class_snapshot(conn, class_id)?;
    let table = load_transmutation_table(conn)?;

    let mut categories = Vec::with_capacity(snapshot.categories.len());
    let mut scores = Vec::new();
    for cat in &snapshot.categories {
        let mut averages = Vec::with_capacity(snapshot.students.len());
        for student in &snapshot.students {
            let inputs = snapshot.item_inputs(&student.id, cat);
            averages.push(SheetStudentAverage {
                student_id: student.id.clone(),
                average: calc::present_average(&inputs),
            });
            for (item, input) in cat.items.iter().zip(&inputs) {
                let Some(raw) = input.score else {
                    continue;
                };
                scores.push(SheetScore {
                    student_id: student.id.clone(),
                    item_id: item.id.clone(),
                    score: raw,
                    percentage: calc::normalize_score(Some(raw), input.max),
                    equivalent_grade: scales::item_equivalent_grade(raw, item.total_items, &table),
                });
            }
        }
        categories.push(SheetCategory {
            category_id: cat.id.clone(),
            name: cat.name.clone(),
            weight: cat.weight,
            items: cat
                .items
                .iter()
                .map(|i| SheetItem {
                    item_id: i.id.clone(),
                    name: i.name.clone(),
                    total_items: i.total_items,
                    passing_percentage: i.passing_percentage,
                })
                .collect(),
            averages,
        });
    }

    Ok(SheetModel {
        class_id: snapshot.class_id.clone(),
        class_name: snapshot.class_name.clone(),
        passing_grade: snapshot
            .passing_grade
            .unwrap_or(scales::DEFAULT_PASSING_GRADE),
        weight_total: snapshot.weight_total(),
        students: snapshot
            .students
            .iter()
            .map(|s| SheetStudent {
                student_id: s.id.clone(),
                display_name: s.display_name.clone(),
            })
            .collect(),
        categories,
        scores,
        transmutation: table.rows().to_vec(),
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakdownModel {
    pub class_id: String,
    pub weight_total: f64,
    pub weights_valid: bool,
    pub passing_grade: f64,
    pub summary: Option<GradeSummary>,
    #[serde(flatten)]
    pub grade: StudentGrade,
}

/// What a recompute would produce for one student right now, next to the
/// stored summary (if any).
pub fn student_breakdown(
    conn: &Connection,
    class_id: &str,
    student_id: &str,
) -> Result<BreakdownModel, CalcError> {
    let snapshot = load_class_snapshot(conn, class_id)?;
    let Some(student) = snapshot.student(student_id) else {
        return Err(CalcError::new("not_found", "student not found in class"));
    };
    let grade = snapshot.grade_student(student);
    let weight_total = snapshot.weight_total();
    let summary = list_summaries(conn, class_id)?
        .summaries
        .into_iter()
        .find(|s| s.student_id == student_id);

    Ok(BreakdownModel {
        class_id: class_id.to_string(),
        weight_total,
        weights_valid: calc::weights_valid(weight_total),
        passing_grade: snapshot
            .passing_grade
            .unwrap_or(scales::DEFAULT_PASSING_GRADE),
        summary,
        grade,
    })
}
