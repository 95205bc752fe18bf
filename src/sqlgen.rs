use anyhow::{Context, Result};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::classify::EnrollmentFootprint;
use crate::extract::read_grade_csv;
use crate::pattern::{class_pattern, parse_descriptor};
use crate::store::{COUNTABLE_ATTENDANCE, EXCLUDED_SECTIONS};

/// Escape a value for embedding in a SQL string literal. The emitted file is
/// meant for manual execution, so unlike the live path there is no parameter
/// binding here; quotes are doubled instead.
pub fn sql_quote(s: &str) -> String {
    s.replace('\'', "''")
}

/// One standalone conditional UPDATE, same predicate and footprint-bounds
/// subquery as the apply path.
pub fn render_update(
    student_id: &str,
    grade: &str,
    pattern: &str,
    fp: EnrollmentFootprint,
) -> String {
    let id = sql_quote(student_id);
    let grade = sql_quote(grade);
    let pattern = sql_quote(pattern);
    format!(
        "-- Student: {id}, Grade: {grade}\n\
         UPDATE course_takers\n\
         SET grade = '{grade}'\n\
         WHERE student_id = '{id}'\n\
         \x20 AND class_id LIKE '{pattern}'\n\
         \x20 AND section NOT IN ('{s0}', '{s1}')\n\
         \x20 AND attendance = '{att}'\n\
         \x20 AND (\n\
         \x20   SELECT COUNT(*)\n\
         \x20   FROM course_takers AS t\n\
         \x20   WHERE t.student_id = '{id}'\n\
         \x20     AND t.class_id LIKE '{pattern}'\n\
         \x20     AND t.section NOT IN ('{s0}', '{s1}')\n\
         \x20     AND t.attendance = '{att}'\n\
         \x20 ) BETWEEN {min} AND {max};\n",
        s0 = EXCLUDED_SECTIONS[0],
        s1 = EXCLUDED_SECTIONS[1],
        att = COUNTABLE_ATTENDANCE,
        min = fp.min,
        max = fp.max,
    )
}

/// Read every extract and write one UPDATE per row to `out_path`. Files that
/// fail to parse are logged and skipped; returns the statement count.
pub fn generate_sql_file(
    csv_files: &[PathBuf],
    out_path: &Path,
    fp: EnrollmentFootprint,
) -> Result<usize> {
    let mut out = File::create(out_path)
        .with_context(|| format!("create {}", out_path.display()))?;

    writeln!(out, "-- UPDATE statements for all grade extract files")?;
    writeln!(
        out,
        "-- Class pattern matching, no term filtering; subquery validates"
    )?;
    writeln!(
        out,
        "-- {}-{} total records across all time",
        fp.min, fp.max
    )?;
    writeln!(out, "-- Total files: {}", csv_files.len())?;
    writeln!(out, "--\n")?;

    let mut total = 0usize;
    for path in csv_files {
        let name = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("<unnamed>");
        let extracted = match read_grade_csv(path) {
            Ok(e) => e,
            Err(e) => {
                warn!(file = name, error = %e, "skipping unreadable extract");
                continue;
            }
        };
        let Some(first) = extracted.records.first() else {
            continue;
        };

        let desc = parse_descriptor(&first.descriptor);
        let pattern = class_pattern(&desc.class_code);

        writeln!(out, "-- ========================================")?;
        writeln!(out, "-- File: {}", name)?;
        writeln!(out, "-- Class: {}, Term: {}", desc.class_code, desc.term_id)?;
        writeln!(out, "-- Pattern: {}", pattern)?;
        writeln!(out, "-- Students: {}", extracted.records.len())?;
        writeln!(out, "-- ========================================\n")?;

        for rec in &extracted.records {
            writeln!(
                out,
                "{}",
                render_update(&rec.student_id, &rec.grade, &pattern, fp)
            )?;
            total += 1;
        }
        writeln!(out)?;
    }
    writeln!(out, "-- Total UPDATE statements: {}", total)?;
    Ok(total)
}
