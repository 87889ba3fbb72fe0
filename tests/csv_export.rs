mod common;

use caf_extract::{
    CourseCodeParser, CourseRule, ExtractOptions, OcrMode, RECORD_COLUMNS, Capture, extract_caf_bytes_to_csv_string,
    extract_caf_to_csv,
};
use common::{PageSpec, build_pdf, write_pdf};
use pretty_assertions::assert_eq;
use tempfile::tempdir;

fn text_only_options() -> ExtractOptions {
    let mut options = ExtractOptions::default();
    options.ocr.mode = OcrMode::Off;
    options
}

fn course_page() -> PageSpec {
    PageSpec::default()
        .text(40, 60, "COURSE APPROVAL FORM")
        .text(40, 80, "CIEE Central European Studies in Prague")
        .text(40, 200, "CU 270: Culture and Cuisine")
        .text(200, 200, "3 credits")
        .text(40, 230, "POLI 3003 PRAG Central European Politics")
}

#[test]
fn csv_has_fixed_columns_and_one_line_per_course() {
    let pdf = build_pdf(&[course_page()]).expect("build pdf");

    let (csv, report) = extract_caf_bytes_to_csv_string(&pdf, &text_only_options()).expect("extract");

    let lines = csv.lines().collect::<Vec<_>>();
    assert_eq!(lines[0], RECORD_COLUMNS.join(","));
    assert_eq!(
        lines[1..].to_vec(),
        vec![
            "CIEE Central European Studies in Prague,\"Prague, Czech Republic\",CU 270,Culture and Cuisine,,Unknown,,3 credits,,",
            "CIEE Central European Studies in Prague,\"Prague, Czech Republic\",POLI 3003 PRAG,Central European Politics,,Unknown,,,,",
        ]
    );
    assert_eq!(report.record_count, 2);
    assert!(report.row_count >= 4);
    assert_eq!(report.header.program, "CIEE Central European Studies in Prague");
}

#[test]
fn document_without_courses_still_writes_the_header() {
    let pdf = build_pdf(&[PageSpec::default().text(40, 60, "COURSE APPROVAL FORM")]).expect("build pdf");

    let (csv, report) = extract_caf_bytes_to_csv_string(&pdf, &text_only_options()).expect("extract");

    assert_eq!(csv.lines().count(), 1);
    assert_eq!(report.record_count, 0);
    assert!(
        report
            .warnings()
            .iter()
            .any(|warning| warning.code == caf_extract::WarningCode::NoCoursesDetected)
    );
}

#[test]
fn writes_csv_file_with_custom_delimiter() {
    let dir = tempdir().expect("tempdir");
    let input = dir.path().join("caf.pdf");
    let output = dir.path().join("caf.csv");
    write_pdf(&input, &[course_page()]).expect("write pdf");

    let mut options = text_only_options();
    options.delimiter = b';';
    let report = extract_caf_to_csv(&input, &output, &options).expect("extract");

    let csv = std::fs::read_to_string(&output).expect("read csv");
    assert_eq!(report.record_count, 2);
    assert!(csv.starts_with("Program;City/Country;Course Code;"));
    assert!(csv.contains(";Prague, Czech Republic;CU 270;Culture and Cuisine;"));
}

#[test]
fn missing_input_is_an_error() {
    let dir = tempdir().expect("tempdir");
    let result = extract_caf_to_csv(
        &dir.path().join("missing.pdf"),
        &dir.path().join("out.csv"),
        &text_only_options(),
    );
    assert!(matches!(result, Err(caf_extract::ExtractError::Io(_))));
    assert!(!dir.path().join("out.csv").exists());
}

#[test]
fn invalid_options_are_rejected_up_front() {
    let pdf = build_pdf(&[course_page()]).expect("build pdf");
    let mut options = text_only_options();
    options.delimiter = b'"';

    let result = extract_caf_bytes_to_csv_string(&pdf, &options);
    assert!(matches!(result, Err(caf_extract::ExtractError::InvalidOption(_))));
}

#[test]
fn parser_accepts_an_extended_rule_table() {
    const CATALOG_NUMBER: CourseRule = CourseRule {
        name: "catalog_number",
        pattern: r"^Course\s+#(\d{4,6})\s*-\s*(.+)$",
        captures: &[Capture::Code, Capture::Title],
    };
    let mut rules = vec![CATALOG_NUMBER];
    rules.extend_from_slice(caf_extract::COURSE_RULES);

    let parser = CourseCodeParser::with_rules(&rules).expect("rules compile");
    let parsed = parser.parse("Course #40211 - Urban Sociology").expect("custom format parses");
    assert_eq!(parsed.code, "40211");
    assert_eq!(parsed.title, "Urban Sociology");
    assert_eq!(parsed.rule, "catalog_number");

    let fallback = parser.parse("CU 270: Culture and Cuisine").expect("built-in format parses");
    assert_eq!(fallback.rule, "colon_separated");
}
