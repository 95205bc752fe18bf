use anyhow::Result;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::{info, warn};

use crate::classify::{classify, EnrollmentFootprint, Verdict};
use crate::extract::{ExtractedFile, GradeRecord};
use crate::pattern::{class_pattern, parse_descriptor, term_id_from_extract_name};
use crate::store::{EnrollmentStore, MatchScope};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    DryRun,
    Apply,
}

impl RunMode {
    pub fn label(self) -> &'static str {
        match self {
            RunMode::DryRun => "DRY RUN",
            RunMode::Apply => "REAL UPDATE",
        }
    }
}

/// The two gating strategies the caller picks between. They are deliberately
/// not merged: the pattern strategy classifies by enrollment footprint across
/// all terms, the term-prefix strategy rewrites one term's in-progress grades
/// record by record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateStrategy {
    PatternAcrossAllTerms,
    TermPrefixWithStatus,
}

#[derive(Debug, Clone, Copy)]
pub struct ReconcileOptions {
    pub mode: RunMode,
    pub strategy: GateStrategy,
    pub min_match_percent: f64,
    pub footprint: EnrollmentFootprint,
    pub sample_limit: usize,
    pub diagnostic: bool,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        ReconcileOptions {
            mode: RunMode::DryRun,
            strategy: GateStrategy::PatternAcrossAllTerms,
            min_match_percent: 80.0,
            footprint: EnrollmentFootprint::default(),
            sample_limit: 5,
            diagnostic: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NotFoundRecord {
    pub student_id: String,
    pub grade: String,
    pub reason: String,
}

/// Outcome of one file. Finalized when `reconcile_file` returns, read-only
/// after that.
#[derive(Debug, Clone, Serialize)]
pub struct FileResult {
    pub file: String,
    pub class_code: Option<String>,
    pub term_id: Option<String>,
    pub total_students: usize,
    pub matched: usize,
    pub skipped: usize,
    pub unmatched: usize,
    pub match_percent: f64,
    pub updated_students: usize,
    pub updated_records: usize,
    pub not_found: Vec<NotFoundRecord>,
    pub preview: Vec<String>,
    pub success: bool,
    pub errors: Vec<String>,
}

impl FileResult {
    fn new(file: &str) -> FileResult {
        FileResult {
            file: file.to_string(),
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

    /// Result for a file that could not be processed at all (unreadable CSV,
    /// store unavailable). Failure of one file never stops the run.
    pub fn failed(file: &str, error: String) -> FileResult {
        let mut r = FileResult::new(file);
        r.errors.push(error);
        r
    }
}

/// Process one extract file against the store. Never panics or propagates:
/// any fault is recorded on the result so the run can continue with the next
/// file.
pub fn reconcile_file(
    store: &dyn EnrollmentStore,
    file_name: &str,
    extracted: &ExtractedFile,
    opts: &ReconcileOptions,
) -> FileResult {
    let mut result = FileResult::new(file_name);
    result.total_students = extracted.records.len();
    result.errors.extend(extracted.row_errors.iter().cloned());

    let outcome = match opts.strategy {
        GateStrategy::PatternAcrossAllTerms => {
            run_pattern(store, &extracted.records, opts, &mut result)
        }
        GateStrategy::TermPrefixWithStatus => {
            run_term_prefix(store, file_name, &extracted.records, opts, &mut result)
        }
    };
    if let Err(e) = outcome {
        warn!(file = file_name, error = %e, "file processing failed");
        result.errors.push(format!("{e:#}"));
        result.success = false;
    }
    result
}

fn unique_in_order(records: &[GradeRecord]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for r in records {
        if seen.insert(r.student_id.as_str()) {
            out.push(r.student_id.clone());
        }
    }
    out
}

fn run_pattern(
    store: &dyn EnrollmentStore,
    records: &[GradeRecord],
    opts: &ReconcileOptions,
    result: &mut FileResult,
) -> Result<()> {
    let Some(first) = records.first() else {
        result.errors.push("Empty CSV file".to_string());
        return Ok(());
    };

    let desc = parse_descriptor(&first.descriptor);
    let pattern = class_pattern(&desc.class_code);
    info!(
        class = %desc.class_code,
        term = %desc.term_id,
        pattern = %pattern,
        "derived class pattern"
    );
    result.class_code = Some(desc.class_code);
    result.term_id = Some(desc.term_id);
    let scope = MatchScope::PatternAcrossAllTerms {
        class_pattern: pattern,
    };

    // Classification runs once per unique student; the update later applies
    // per original record.
    let unique = unique_in_order(records);
    let mut verdicts: HashMap<&str, Verdict> = HashMap::new();
    for id in &unique {
        let count = store.count_enrollments(&scope, id)?;
        let verdict = classify(count, opts.footprint);
        match verdict {
            Verdict::Matched => result.matched += 1,
            Verdict::Skipped => result.skipped += 1,
            Verdict::Unmatched => result.unmatched += 1,
        }
        verdicts.insert(id.as_str(), verdict);
    }
    if result.skipped > 0 {
        info!(
            skipped = result.skipped,
            "students with repeat enrollments excluded from update"
        );
    }

    result.match_percent = if unique.is_empty() {
        0.0
    } else {
        result.matched as f64 / unique.len() as f64 * 100.0
    };

    if result.matched == 0 {
        result
            .errors
            .push("No matching records in database".to_string());
        return Ok(());
    }
    // `<` on purpose: a batch sitting exactly at the threshold passes.
    if result.match_percent < opts.min_match_percent {
        result.errors.push(format!(
            "Low match rate: {:.1}% < {}%",
            result.match_percent, opts.min_match_percent
        ));
        return Ok(());
    }

    match opts.mode {
        RunMode::DryRun => {
            let grade_by_id: HashMap<&str, &str> = {
                let mut m = HashMap::new();
                for r in records {
                    m.entry(r.student_id.as_str()).or_insert(r.grade.as_str());
                }
                m
            };
            let samples = store.sample_current(&scope, &unique, opts.sample_limit)?;
            for row in samples {
                let current = row.grade.as_deref().unwrap_or("NULL");
                let proposed = grade_by_id
                    .get(row.student_id.as_str())
                    .copied()
                    .unwrap_or("?");
                result.preview.push(format!(
                    "{} | {} | Section {} | {} -> {}",
                    row.student_id,
                    row.class_id,
                    row.section.as_deref().unwrap_or("-"),
                    current.trim(),
                    proposed
                ));
            }
            result.success = result.errors.is_empty();
        }
        RunMode::Apply => {
            let mut updated_ids: HashSet<&str> = HashSet::new();
            for rec in records {
                let affected =
                    store.apply_grade(&scope, &rec.student_id, &rec.grade, Some(opts.footprint))?;
                if affected > 0 {
                    updated_ids.insert(rec.student_id.as_str());
                    result.updated_records += affected;
                } else if verdicts.get(rec.student_id.as_str()) == Some(&Verdict::Matched) {
                    // Passed classification but the gated update found nothing:
                    // the count moved between the read and the write.
                    result.not_found.push(NotFoundRecord {
                        student_id: rec.student_id.clone(),
                        grade: rec.grade.clone(),
                        reason: "No rows affected by conditional update".to_string(),
                    });
                }
            }
            result.updated_students = updated_ids.len();

            let updated_matched = unique
                .iter()
                .filter(|id| {
                    verdicts.get(id.as_str()) == Some(&Verdict::Matched)
                        && updated_ids.contains(id.as_str())
                })
                .count();
            if updated_matched < result.matched {
                result.errors.push(format!(
                    "Update mismatch: {}/{}",
                    updated_matched, result.matched
                ));
            }
            result.success = result.errors.is_empty();
        }
    }
    Ok(())
}

fn run_term_prefix(
    store: &dyn EnrollmentStore,
    file_name: &str,
    records: &[GradeRecord],
    opts: &ReconcileOptions,
    result: &mut FileResult,
) -> Result<()> {
    if records.is_empty() {
        result.errors.push("Empty CSV file".to_string());
        return Ok(());
    }

    // The extract file name carries the term id; older batches only have it
    // in the embedded descriptor column.
    let term_id = term_id_from_extract_name(file_name)
        .or_else(|| records.first().map(|r| parse_descriptor(&r.descriptor).term_id))
        .filter(|t| !t.is_empty());
    let Some(term_id) = term_id else {
        result
            .errors
            .push("Could not extract term id".to_string());
        return Ok(());
    };
    info!(term = %term_id, "term-prefix strategy");
    result.term_id = Some(term_id.clone());
    let scope = MatchScope::TermPrefixWithStatus {
        term_id: term_id.clone(),
    };

    for rec in records {
        match opts.mode {
            RunMode::DryRun => {
                let count = store.count_enrollments(&scope, &rec.student_id)?;
                if count == 0 {
                    let reason = if opts.diagnostic {
                        store
                            .diagnose_missing(&term_id, &rec.student_id)?
                            .reason()
                            .to_string()
                    } else {
                        "No records matching criteria".to_string()
                    };
                    result.not_found.push(NotFoundRecord {
                        student_id: rec.student_id.clone(),
                        grade: rec.grade.clone(),
                        reason,
                    });
                } else {
                    result.matched += 1;
                }
            }
            RunMode::Apply => {
                let affected = store.apply_grade(&scope, &rec.student_id, &rec.grade, None)?;
                if affected == 0 {
                    result.not_found.push(NotFoundRecord {
                        student_id: rec.student_id.clone(),
                        grade: rec.grade.clone(),
                        reason: "No records matching criteria".to_string(),
                    });
                } else {
                    result.matched += 1;
                    result.updated_students += 1;
                    result.updated_records += affected;
                }
            }
        }
    }

    result.unmatched = result.not_found.len();
    result.match_percent = if records.is_empty() {
        0.0
    } else {
        result.matched as f64 / records.len() as f64 * 100.0
    };
    result.success = result.not_found.is_empty() && result.errors.is_empty();
    Ok(())
}
