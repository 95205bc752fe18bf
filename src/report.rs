use serde::Serialize;

use crate::reconcile::{FileResult, RunMode};

/// Read-only aggregation over an ordered run of file results.
#[derive(Debug, Clone, Serialize)]
pub struct RunTotals {
    pub total_files: usize,
    pub successful_files: usize,
    pub failed_files: usize,
    pub total_students: usize,
    pub matched_students: usize,
    pub updated_students: usize,
    pub updated_records: usize,
    pub overall_match_percent: f64,
}

pub fn totals(results: &[FileResult]) -> RunTotals {
    let total_files = results.len();
    let successful_files = results.iter().filter(|r| r.success).count();
    let total_students: usize = results.iter().map(|r| r.total_students).sum();
    let matched_students: usize = results.iter().map(|r| r.matched).sum();
    RunTotals {
        total_files,
        successful_files,
        failed_files: total_files - successful_files,
        total_students,
        matched_students,
        updated_students: results.iter().map(|r| r.updated_students).sum(),
        updated_records: results.iter().map(|r| r.updated_records).sum(),
        overall_match_percent: if total_students > 0 {
            matched_students as f64 / total_students as f64 * 100.0
        } else {
            0.0
        },
    }
}

const RULE: &str =
    "================================================================================";

/// Render the audit report. Deterministic for a given result sequence and
/// timestamp; file order follows the run order.
pub fn render_report(results: &[FileResult], mode: RunMode, generated_at: &str) -> String {
    let t = totals(results);
    let mut lines: Vec<String> = vec![
        RULE.to_string(),
        format!("GRADE UPDATE AUDIT REPORT - {}", mode.label()),
        format!("Generated: {}", generated_at),
        RULE.to_string(),
        String::new(),
        "SUMMARY:".to_string(),
        format!("  Total Files Processed: {}", t.total_files),
        format!("  Successful Files: {}", t.successful_files),
        format!("  Failed Files: {}", t.failed_files),
        String::new(),
        format!("  Total Students in CSVs: {}", t.total_students),
        format!("  Students Matched in DB: {}", t.matched_students),
        format!("  Students Updated: {}", t.updated_students),
        format!("  Database Records Updated: {}", t.updated_records),
        String::new(),
        format!("  Overall Match Rate: {:.1}%", t.overall_match_percent),
        String::new(),
        RULE.to_string(),
        "SUCCESSFUL FILES:".to_string(),
        RULE.to_string(),
    ];

    let mut any = false;
    for r in results.iter().filter(|r| r.success) {
        any = true;
        lines.push(format!(
            "  OK   {:<50} | {:<12} | {:<15} | {:>3}/{:>3} students ({:>5.1}%)",
            r.file,
            r.class_code.as_deref().unwrap_or("-"),
            r.term_id.as_deref().unwrap_or("-"),
            r.matched,
            r.total_students,
            r.match_percent
        ));
    }
    if !any {
        lines.push("  (none)".to_string());
    }

    lines.push(String::new());
    lines.push(RULE.to_string());
    lines.push("FAILED FILES:".to_string());
    lines.push(RULE.to_string());

    let mut any = false;
    for r in results.iter().filter(|r| !r.success) {
        any = true;
        let reason = if r.errors.is_empty() {
            "Unknown error".to_string()
        } else {
            r.errors.join("; ")
        };
        lines.push(format!(
            "  FAIL {:<50} | {:<12} | {:<15}",
            r.file,
            r.class_code.as_deref().unwrap_or("-"),
            r.term_id.as_deref().unwrap_or("-")
        ));
        lines.push(format!("       Reason: {}", reason));
        lines.push(format!(
            "       Match: {}/{} students ({:.1}%)",
            r.matched, r.total_students, r.match_percent
        ));
    }
    if !any {
        lines.push("  (none)".to_string());
    }

    let missing: Vec<(&str, &crate::reconcile::NotFoundRecord)> = results
        .iter()
        .flat_map(|r| r.not_found.iter().map(move |n| (r.file.as_str(), n)))
        .collect();
    if !missing.is_empty() {
        lines.push(String::new());
        lines.push(RULE.to_string());
        lines.push("RECORDS NOT FOUND IN DATABASE:".to_string());
        lines.push(RULE.to_string());
        for (file, n) in missing {
            lines.push(format!(
                "  {} | student {} | grade {:<5} | {}",
                file, n.student_id, n.grade, n.reason
            ));
        }
    }

    lines.push(String::new());
    lines.push(RULE.to_string());
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::NotFoundRecord;

    fn result(file: &str, success: bool) -> FileResult {
        let mut r = base();
        r.file = file.to_string();
        r.success = success;
        r
    }

    fn base() -> FileResult {
        FileResult {
            file: "f.csv".to_string(),
            class_code: None,
            term_id: None,
            total_students: 0,
            matched: 0,
            skipped: 0,
            unmatched: 0,
            match_percent: 0.0,
            updated_students: 0,
            updated_records: 0,
            not_found: Vec::new(),
            preview: Vec::new(),
            success: false,
            errors: Vec::new(),
        }
    }

    #[test]
    fn empty_run_renders_none_placeholders() {
        let report = render_report(&[], RunMode::DryRun, "2026-01-01 00:00:00");
        assert!(report.contains("GRADE UPDATE AUDIT REPORT - DRY RUN"));
        assert_eq!(report.matches("  (none)").count(), 2);
        assert!(report.contains("Overall Match Rate: 0.0%"));
    }

    #[test]
    fn totals_never_divide_by_zero() {
        let t = totals(&[]);
        assert_eq!(t.overall_match_percent, 0.0);
    }

    #[test]
    fn partitions_success_and_failure_in_run_order() {
        let mut ok = result("b.csv", true);
        ok.matched = 4;
        ok.total_students = 5;
        ok.match_percent = 80.0;
        let mut bad = result("a.csv", false);
        bad.errors.push("Empty CSV file".to_string());

        let report = render_report(&[bad, ok], RunMode::Apply, "ts");
        assert!(report.contains("REAL UPDATE"));
        let ok_pos = report.find("OK   b.csv").unwrap();
        let fail_pos = report.find("FAIL a.csv").unwrap();
        assert!(ok_pos < fail_pos, "successful section comes first");
        assert!(report.contains("Reason: Empty CSV file"));
        assert!(!report.contains("(none)"));
    }

    #[test]
    fn not_found_records_get_their_own_section() {
        let mut r = result("a.csv", false);
        r.not_found.push(NotFoundRecord {
            student_id: "00042".to_string(),
            grade: "A".to_string(),
            reason: "No records for this term".to_string(),
        });
        let report = render_report(&[r], RunMode::Apply, "ts");
        assert!(report.contains("RECORDS NOT FOUND IN DATABASE:"));
        assert!(report.contains("student 00042"));
        assert!(report.contains("No records for this term"));
    }

    #[test]
    fn missing_section_absent_when_nothing_is_missing() {
        let report = render_report(&[result("a.csv", true)], RunMode::DryRun, "ts");
        assert!(!report.contains("RECORDS NOT FOUND"));
    }
}
