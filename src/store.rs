use anyhow::Result;
use rusqlite::{named_params, params_from_iter, types::Value, Connection};
use std::path::Path;

use crate::classify::EnrollmentFootprint;

/// Administrative sections that never carry grades.
pub const EXCLUDED_SECTIONS: [&str; 2] = ["87", "147"];
/// The single attendance status whose rows are eligible for grade updates.
pub const COUNTABLE_ATTENDANCE: &str = "Normal";
/// Grade value the term-prefix strategy rewrites.
pub const IN_PROGRESS_GRADE: &str = "IP";

/// How enrollment rows are matched to a batch. The two variants are distinct
/// on purpose: the pattern form matches a course family across all terms and
/// gates on the enrollment footprint, the term-prefix form targets one term's
/// in-progress rows and ignores the course pattern entirely.
#[derive(Debug, Clone)]
pub enum MatchScope {
    PatternAcrossAllTerms { class_pattern: String },
    TermPrefixWithStatus { term_id: String },
}

impl MatchScope {
    /// WHERE fragment shared by the count query and the gated update. Both
    /// render from this one definition so the read-side classification and
    /// the write-side gate cannot drift apart.
    fn predicate(&self, col: &str) -> String {
        match self {
            MatchScope::PatternAcrossAllTerms { .. } => format!(
                "{col}class_id LIKE :pattern AND {col}student_id = :student \
                 AND {col}section NOT IN (:sect1, :sect2) AND {col}attendance = :attendance"
            ),
            MatchScope::TermPrefixWithStatus { .. } => format!(
                "{col}class_id LIKE :term_prefix AND {col}grade = :required_grade \
                 AND {col}student_id = :student"
            ),
        }
    }

    fn term_prefix(term_id: &str) -> String {
        format!("{}%", term_id)
    }
}

#[derive(Debug, Clone)]
pub struct EnrollmentRow {
    pub student_id: String,
    pub class_id: String,
    pub grade: Option<String>,
    pub section: Option<String>,
}

/// Why a term-prefix record found nothing to update.
#[derive(Debug, Clone, Copy)]
pub struct MissingDiagnosis {
    pub student_exists: bool,
    pub has_term_rows: bool,
    pub has_status_rows: bool,
}

impl MissingDiagnosis {
    pub fn reason(&self) -> &'static str {
        if !self.student_exists {
            "Student ID not in database"
        } else if !self.has_term_rows {
            "No records for this term"
        } else if !self.has_status_rows {
            "No in-progress grade (already updated or different status)"
        } else {
            "Unknown"
        }
    }
}

/// Read/write capability over the enrollment table. The reconciler only talks
/// to this trait; tests substitute an in-memory double.
pub trait EnrollmentStore {
    /// Count enrollment rows matching the scope for one student.
    fn count_enrollments(&self, scope: &MatchScope, student_id: &str) -> Result<u32>;

    /// Current rows for a set of students, bounded, ordered by student id.
    /// Used for dry-run previews only.
    fn sample_current(
        &self,
        scope: &MatchScope,
        student_ids: &[String],
        limit: usize,
    ) -> Result<Vec<EnrollmentRow>>;

    /// Conditionally rewrite the grade. When `gate` is set, the update only
    /// fires if a fresh count still falls inside the footprint bounds; that
    /// re-count happens inside the statement itself, so the check and the
    /// mutation are atomic with respect to other writers. Returns rows affected.
    fn apply_grade(
        &self,
        scope: &MatchScope,
        student_id: &str,
        grade: &str,
        gate: Option<EnrollmentFootprint>,
    ) -> Result<usize>;

    /// Per-condition probes for a term-prefix record that matched nothing.
    fn diagnose_missing(&self, term_id: &str, student_id: &str) -> Result<MissingDiagnosis>;
}

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(db_path: &Path) -> Result<SqliteStore> {
        let conn = Connection::open(db_path)?;
        ensure_schema(&conn)?;
        Ok(SqliteStore { conn })
    }

    #[cfg(test)]
    fn open_in_memory() -> Result<SqliteStore> {
        let conn = Connection::open_in_memory()?;
        ensure_schema(&conn)?;
        Ok(SqliteStore { conn })
    }
}

fn ensure_schema(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS course_takers(
            student_id TEXT NOT NULL,
            class_id TEXT NOT NULL,
            section TEXT NOT NULL DEFAULT '',
            attendance TEXT NOT NULL DEFAULT '',
            grade TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_course_takers_student ON course_takers(student_id, class_id)",
        [],
    )?;
    Ok(())
}

impl EnrollmentStore for SqliteStore {
    fn count_enrollments(&self, scope: &MatchScope, student_id: &str) -> Result<u32> {
        let sql = format!(
            "SELECT COUNT(*) FROM course_takers WHERE {}",
            scope.predicate("")
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let n: i64 = match scope {
            MatchScope::PatternAcrossAllTerms { class_pattern } => stmt.query_row(
                named_params! {
                    ":pattern": class_pattern,
                    ":student": student_id,
                    ":sect1": EXCLUDED_SECTIONS[0],
                    ":sect2": EXCLUDED_SECTIONS[1],
                    ":attendance": COUNTABLE_ATTENDANCE,
                },
                |row| row.get(0),
            )?,
            MatchScope::TermPrefixWithStatus { term_id } => stmt.query_row(
                named_params! {
                    ":term_prefix": MatchScope::term_prefix(term_id),
                    ":required_grade": IN_PROGRESS_GRADE,
                    ":student": student_id,
                },
                |row| row.get(0),
            )?,
        };
        Ok(n.max(0) as u32)
    }

    fn sample_current(
        &self,
        scope: &MatchScope,
        student_ids: &[String],
        limit: usize,
    ) -> Result<Vec<EnrollmentRow>> {
        if student_ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; student_ids.len()].join(", ");

        let (sql, values) = match scope {
            MatchScope::PatternAcrossAllTerms { class_pattern } => {
                let sql = format!(
                    "SELECT student_id, class_id, grade, section FROM course_takers \
                     WHERE class_id LIKE ? AND student_id IN ({placeholders}) \
                     AND section NOT IN (?, ?) AND attendance = ? \
                     ORDER BY student_id LIMIT ?"
                );
                let mut values: Vec<Value> = Vec::new();
                values.push(Value::from(class_pattern.clone()));
                values.extend(student_ids.iter().map(|s| Value::from(s.clone())));
                values.push(Value::from(EXCLUDED_SECTIONS[0].to_string()));
                values.push(Value::from(EXCLUDED_SECTIONS[1].to_string()));
                values.push(Value::from(COUNTABLE_ATTENDANCE.to_string()));
                values.push(Value::from(limit as i64));
                (sql, values)
            }
            MatchScope::TermPrefixWithStatus { term_id } => {
                let sql = format!(
                    "SELECT student_id, class_id, grade, section FROM course_takers \
                     WHERE class_id LIKE ? AND grade = ? AND student_id IN ({placeholders}) \
                     ORDER BY student_id LIMIT ?"
                );
                let mut values: Vec<Value> = Vec::new();
                values.push(Value::from(MatchScope::term_prefix(term_id)));
                values.push(Value::from(IN_PROGRESS_GRADE.to_string()));
                values.extend(student_ids.iter().map(|s| Value::from(s.clone())));
                values.push(Value::from(limit as i64));
                (sql, values)
            }
        };

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(values), |row| {
                Ok(EnrollmentRow {
                    student_id: row.get(0)?,
                    class_id: row.get(1)?,
                    grade: row.get(2)?,
                    section: row.get(3)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn apply_grade(
        &self,
        scope: &MatchScope,
        student_id: &str,
        grade: &str,
        gate: Option<EnrollmentFootprint>,
    ) -> Result<usize> {
        let mut sql = format!(
            "UPDATE course_takers SET grade = :grade WHERE {}",
            scope.predicate("")
        );
        if gate.is_some() {
            // Fresh re-count at the point of mutation, same predicate text as
            // the outer WHERE.
            sql.push_str(&format!(
                " AND (SELECT COUNT(*) FROM course_takers t WHERE {}) BETWEEN :fp_min AND :fp_max",
                scope.predicate("t.")
            ));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let affected = match (scope, gate) {
            (MatchScope::PatternAcrossAllTerms { class_pattern }, Some(fp)) => {
                stmt.execute(named_params! {
                    ":grade": grade,
                    ":pattern": class_pattern,
                    ":student": student_id,
                    ":sect1": EXCLUDED_SECTIONS[0],
                    ":sect2": EXCLUDED_SECTIONS[1],
                    ":attendance": COUNTABLE_ATTENDANCE,
                    ":fp_min": fp.min as i64,
                    ":fp_max": fp.max as i64,
                })?
            }
            (MatchScope::PatternAcrossAllTerms { class_pattern }, None) => {
                stmt.execute(named_params! {
                    ":grade": grade,
                    ":pattern": class_pattern,
                    ":student": student_id,
                    ":sect1": EXCLUDED_SECTIONS[0],
                    ":sect2": EXCLUDED_SECTIONS[1],
                    ":attendance": COUNTABLE_ATTENDANCE,
                })?
            }
            (MatchScope::TermPrefixWithStatus { term_id }, Some(fp)) => {
                stmt.execute(named_params! {
                    ":grade": grade,
                    ":term_prefix": MatchScope::term_prefix(term_id),
                    ":required_grade": IN_PROGRESS_GRADE,
                    ":student": student_id,
                    ":fp_min": fp.min as i64,
                    ":fp_max": fp.max as i64,
                })?
            }
            (MatchScope::TermPrefixWithStatus { term_id }, None) => {
                stmt.execute(named_params! {
                    ":grade": grade,
                    ":term_prefix": MatchScope::term_prefix(term_id),
                    ":required_grade": IN_PROGRESS_GRADE,
                    ":student": student_id,
                })?
            }
        };
        Ok(affected)
    }

    fn diagnose_missing(&self, term_id: &str, student_id: &str) -> Result<MissingDiagnosis> {
        let prefix = MatchScope::term_prefix(term_id);
        let student_exists: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM course_takers WHERE student_id = ?1",
            [student_id],
            |row| row.get(0),
        )?;
        let has_term_rows: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM course_takers WHERE student_id = ?1 AND class_id LIKE ?2",
            [student_id, prefix.as_str()],
            |row| row.get(0),
        )?;
        let has_status_rows: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM course_takers \
             WHERE student_id = ?1 AND class_id LIKE ?2 AND grade = ?3",
            [student_id, prefix.as_str(), IN_PROGRESS_GRADE],
            |row| row.get(0),
        )?;
        Ok(MissingDiagnosis {
            student_exists: student_exists > 0,
            has_term_rows: has_term_rows > 0,
            has_status_rows: has_status_rows > 0,
        })
    }
}
