use rusqlite::Connection;
use std::path::Path;
use std::process::{Command, Output};

fn seed_db(db_path: &Path, rows: &[(&str, &str, &str, &str, &str)]) {
    let conn = Connection::open(db_path).expect("open db");
    conn.execute(
        "CREATE TABLE IF NOT EXISTS course_takers(
            student_id TEXT NOT NULL,
            class_id TEXT NOT NULL,
            section TEXT NOT NULL DEFAULT '',
            attendance TEXT NOT NULL DEFAULT '',
            grade TEXT
        )",
        [],
    )
    .expect("create table");
    for (student, class, section, attendance, grade) in rows {
        conn.execute(
            "INSERT INTO course_takers(student_id, class_id, section, attendance, grade) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            [student, class, section, attendance, grade],
        )
        .expect("seed row");
    }
}

fn grades(db_path: &Path, student: &str) -> Vec<Option<String>> {
    let conn = Connection::open(db_path).expect("open db");
    let mut stmt = conn
        .prepare("SELECT grade FROM course_takers WHERE student_id = ?1 ORDER BY class_id")
        .expect("prepare");
    stmt.query_map([student], |r| r.get(0))
        .expect("query")
        .collect::<Result<_, _>>()
        .expect("rows")
}

fn run_tool(workdir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_gradeimport"))
        .current_dir(workdir)
        .args(args)
        .output()
        .expect("spawn gradeimport")
}

fn write_extract(dir: &Path, name: &str, body: &str) {
    std::fs::create_dir_all(dir).expect("create pending dir");
    std::fs::write(dir.join(name), body).expect("write extract");
}

const EXTRACT_NAME: &str = "grades_extract_2021T2T2E_EHSS-02.csv";
const EXTRACT_BODY: &str = "filename,student_id,grade\n\
    EHSS-02 final 28-06-21_2021T2T2E,11993,a\n\
    EHSS-02 final 28-06-21_2021T2T2E,42,b\n";

fn normal_enrollment_rows() -> Vec<(&'static str, &'static str, &'static str, &'static str, &'static str)> {
    vec![
        ("11993", "2021T2T2E-EHSS-2-A", "1", "Normal", "IP"),
        ("11993", "2021T2T2E-EHSS-2-B", "1", "Normal", "IP"),
        ("00042", "2021T2T2E-EHSS-2-A", "1", "Normal", "IP"),
        ("00042", "2021T2T2E-EHSS-2-B", "1", "Normal", "IP"),
    ]
}

#[test]
fn dry_run_reports_without_mutating_or_moving() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let db = tmp.path().join("enrollment.sqlite3");
    seed_db(&db, &normal_enrollment_rows());
    write_extract(&tmp.path().join("extracted"), EXTRACT_NAME, EXTRACT_BODY);

    let out = run_tool(tmp.path(), &["run", "--db", "enrollment.sqlite3"]);
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));

    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("GRADE UPDATE AUDIT REPORT - DRY RUN"));
    assert!(stdout.contains(EXTRACT_NAME));

    // No mutation, no triage moves.
    assert_eq!(
        grades(&db, "11993"),
        vec![Some("IP".to_string()), Some("IP".to_string())]
    );
    assert!(tmp.path().join("extracted").join(EXTRACT_NAME).exists());
    assert!(!tmp.path().join("success").exists());
}

#[test]
fn apply_updates_grades_and_triages_to_success() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let db = tmp.path().join("enrollment.sqlite3");
    seed_db(&db, &normal_enrollment_rows());
    write_extract(&tmp.path().join("extracted"), EXTRACT_NAME, EXTRACT_BODY);

    let out = run_tool(
        tmp.path(),
        &[
            "run",
            "--db",
            "enrollment.sqlite3",
            "--apply",
            "--audit-report",
            "audit.txt",
            "--json-summary",
            "summary.json",
        ],
    );
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));

    assert_eq!(
        grades(&db, "11993"),
        vec![Some("A".to_string()), Some("A".to_string())]
    );
    assert_eq!(
        grades(&db, "00042"),
        vec![Some("B".to_string()), Some("B".to_string())]
    );

    assert!(tmp.path().join("success").join(EXTRACT_NAME).exists());
    assert!(!tmp.path().join("extracted").join(EXTRACT_NAME).exists());

    let audit = std::fs::read_to_string(tmp.path().join("audit.txt")).expect("audit file");
    assert!(audit.contains("REAL UPDATE"));
    assert!(audit.contains("Successful Files: 1"));

    let summary: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(tmp.path().join("summary.json")).unwrap())
            .expect("summary json");
    assert_eq!(summary["totals"]["updated_students"], 2);
    assert_eq!(summary["files"][0]["success"], true);
}

#[test]
fn unmatched_batch_fails_and_triages_to_failed() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let db = tmp.path().join("enrollment.sqlite3");
    // Database knows nothing about these students.
    seed_db(&db, &[]);
    write_extract(&tmp.path().join("extracted"), EXTRACT_NAME, EXTRACT_BODY);

    let out = run_tool(tmp.path(), &["run", "--db", "enrollment.sqlite3", "--apply"]);
    assert!(!out.status.success());

    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("No matching records in database"));
    assert!(tmp.path().join("failed").join(EXTRACT_NAME).exists());
    assert!(!tmp.path().join("extracted").join(EXTRACT_NAME).exists());
}

#[test]
fn term_prefix_strategy_rewrites_in_progress_rows() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let db = tmp.path().join("enrollment.sqlite3");
    seed_db(
        &db,
        &[
            // One in-progress row for the term, one already graded elsewhere.
            ("11993", "2021T2T2E-EHSS-2-A", "1", "Normal", "IP"),
            ("00042", "2021T2T2E-EHSS-2-A", "1", "Normal", "IP"),
            ("00042", "2020T1T1E-EHSS-2-A", "1", "Normal", "C"),
        ],
    );
    write_extract(&tmp.path().join("extracted"), EXTRACT_NAME, EXTRACT_BODY);

    let out = run_tool(
        tmp.path(),
        &[
            "run",
            "--db",
            "enrollment.sqlite3",
            "--apply",
            "--strategy",
            "term-prefix",
        ],
    );
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));

    assert_eq!(grades(&db, "11993"), vec![Some("A".to_string())]);
    // The old term's grade is untouched.
    assert_eq!(
        grades(&db, "00042"),
        vec![Some("C".to_string()), Some("B".to_string())]
    );
}

#[test]
fn empty_pending_directory_is_run_fatal() {
    let tmp = tempfile::tempdir().expect("tempdir");
    std::fs::create_dir_all(tmp.path().join("extracted")).unwrap();
    let out = run_tool(tmp.path(), &["run", "--db", "enrollment.sqlite3"]);
    assert!(!out.status.success());
}

#[test]
fn gen_sql_writes_one_statement_per_row() {
    let tmp = tempfile::tempdir().expect("tempdir");
    write_extract(&tmp.path().join("extracted"), EXTRACT_NAME, EXTRACT_BODY);

    let out = run_tool(tmp.path(), &["gen-sql", "--output", "updates.sql"]);
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));

    let sql = std::fs::read_to_string(tmp.path().join("updates.sql")).expect("sql file");
    assert!(sql.contains("-- Pattern: %EHSS-2%"));
    assert!(sql.contains("WHERE student_id = '11993'"));
    assert!(sql.contains("WHERE student_id = '00042'"));
    assert!(sql.contains(") BETWEEN 2 AND 3;"));
    assert!(sql.contains("-- Total UPDATE statements: 2"));
}
