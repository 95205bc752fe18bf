use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Student ids in the enrollment table are fixed-width zero-padded strings.
pub const STUDENT_ID_WIDTH: usize = 5;

/// One normalized row from a grade extract. Immutable once parsed.
#[derive(Debug, Clone)]
pub struct GradeRecord {
    pub student_id: String,
    pub grade: String,
    /// The `filename` column embedded in the extract, carrying class code and
    /// term id.
    pub descriptor: String,
}

#[derive(Debug, Deserialize)]
struct RawRow {
    filename: String,
    student_id: String,
    grade: String,
}

#[derive(Debug, Default)]
pub struct ExtractedFile {
    pub records: Vec<GradeRecord>,
    /// Per-row problems that did not stop the file (missing id or grade,
    /// unparseable row). Order follows the file.
    pub row_errors: Vec<String>,
}

pub fn zero_pad_id(raw: &str) -> String {
    let t = raw.trim();
    format!("{:0>width$}", t, width = STUDENT_ID_WIDTH)
}

pub fn normalize_grade(raw: &str) -> String {
    raw.trim().to_uppercase()
}

/// Read an extract CSV into ordered records. Requires a header row with at
/// least `filename`, `student_id` and `grade` columns; content beyond field
/// presence is not validated.
pub fn read_grade_csv(path: &Path) -> Result<ExtractedFile> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("open {}", path.display()))?;

    let mut out = ExtractedFile::default();
    for (idx, row) in reader.deserialize::<RawRow>().enumerate() {
        let line_no = idx + 2; // 1-based, after the header
        let row = match row {
            Ok(r) => r,
            Err(e) => {
                out.row_errors.push(format!("row {}: {}", line_no, e));
                continue;
            }
        };

        let student_id = row.student_id.trim();
        let grade = normalize_grade(&row.grade);
        if student_id.is_empty() || grade.is_empty() {
            out.row_errors
                .push(format!("row {}: missing student_id or grade", line_no));
            continue;
        }

        out.records.push(GradeRecord {
            student_id: zero_pad_id(student_id),
            grade,
            descriptor: row.filename.trim().to_string(),
        });
    }
    Ok(out)
}
