//! Mapping aligned rows onto the output schema.

use std::sync::LazyLock;

use regex::Regex;

use crate::classify::Verdict;
use crate::course_code::{ParsedCourse, RowParse};
use crate::header::Header;
use crate::model::{CourseRecord, Fragment, Row, Tier};

/// The column a form field feeds, recognized from its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRole {
    Course,
    UrEquivalent,
    UrCredits,
    ForeignCredits,
    CourseLink,
    SyllabusLink,
    Comments,
    ElectiveApproval,
    MajorMinorApproval,
    Signature,
    Other,
}

/// Checked in order against the normalized field name; the first alias
/// contained in the name decides the role. An alias starting with `^` only
/// matches at the start of the name.
const FIELD_ALIASES: &[(FieldRole, &[&str])] = &[
    (FieldRole::SyllabusLink, &["syllabus"]),
    (
        FieldRole::CourseLink,
        &["courselink", "coursepage", "courseurl", "coursedescription", "link", "url"],
    ),
    (FieldRole::UrEquivalent, &["equiv", "urcourse"]),
    (FieldRole::MajorMinorApproval, &["majorminor", "major", "minor"]),
    (FieldRole::ElectiveApproval, &["elecapprove", "elective", "^elec"]),
    (FieldRole::Signature, &["signature", "initials", "approvedby", "approver"]),
    (FieldRole::Comments, &["comment", "notes", "remark"]),
    (FieldRole::UrCredits, &["urcredit", "urcr", "homecredit"]),
    (
        FieldRole::ForeignCredits,
        &["foreigncredit", "hostcredit", "abroadcredit", "ects", "credit"],
    ),
    (FieldRole::Course, &["course", "title"]),
];

/// Lowercase letters only: `Course 1`, `course_1` and `COURSE1` all become
/// `course`. Only the last component of a qualified name is considered.
pub(crate) fn normalize_field_name(name: &str) -> String {
    let last = name.rsplit('.').find(|part| !part.trim().is_empty()).unwrap_or(name);
    last.chars()
        .filter(char::is_ascii_alphabetic)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

#[must_use]
pub fn field_role(name: &str) -> FieldRole {
    let normalized = normalize_field_name(name);
    FIELD_ALIASES
        .iter()
        .find(|(_, aliases)| {
            aliases.iter().any(|alias| match alias.strip_prefix('^') {
                Some(prefix) => normalized.starts_with(prefix),
                None => normalized.contains(alias),
            })
        })
        .map_or(FieldRole::Other, |(role, _)| *role)
}

static URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:https?://|www\.)[^\s<>]+").expect("hardcoded URL regex is valid")
});
static CREDITS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\d+(?:[.,]\d+)?\s*(?:credits?|cr\.?|ects|units?|hours?)$")
        .expect("hardcoded credits regex is valid")
});

fn field_value(row: &Row, role: FieldRole) -> Option<String> {
    row.fragments
        .iter()
        .filter(|f| f.tier == Tier::FormField)
        .find(|f| f.field_name.as_deref().map(field_role) == Some(role))
        .map(|f| f.text.clone())
}

fn urls(fragments: &[Fragment]) -> Vec<String> {
    fragments
        .iter()
        .flat_map(|f| URL_RE.find_iter(&f.text).map(|m| m.as_str().trim_end_matches(['.', ',', ')']).to_string()))
        .collect()
}

fn credits_cell(row: &Row) -> Option<String> {
    row.fragments
        .iter()
        .filter(|f| f.field_name.is_none())
        .map(|f| f.text.trim())
        .find(|text| CREDITS_RE.is_match(text))
        .map(ToString::to_string)
}

/// Everything known about one aligned row after parsing and classification.
#[derive(Debug, Clone)]
pub struct AnalyzedRow {
    pub row: Row,
    pub parse: RowParse,
    pub verdict: Verdict,
}

impl AnalyzedRow {
    /// Rows become records when a course code was recognized, or when the
    /// row carries a course field whose text is at least a title.
    #[must_use]
    pub fn emits_record(&self) -> bool {
        match &self.parse {
            RowParse::Parsed(_) => true,
            RowParse::Unparsed { course_text } => course_text.is_some(),
            RowParse::Excluded(_) => false,
        }
    }

    #[must_use]
    pub fn to_record(&self, header: &Header) -> Option<CourseRecord> {
        let (code, title) = match &self.parse {
            RowParse::Parsed(parsed) => (parsed.display_code(), parsed.title.clone()),
            RowParse::Unparsed {
                course_text: Some(title),
            } => (String::new(), title.clone()),
            _ => return None,
        };
        Some(assemble(header, &self.row, code, title, &self.verdict))
    }

    #[must_use]
    pub fn parsed(&self) -> Option<&ParsedCourse> {
        match &self.parse {
            RowParse::Parsed(parsed) => Some(parsed),
            _ => None,
        }
    }
}

fn assemble(header: &Header, row: &Row, course_code: String, course_title: String, verdict: &Verdict) -> CourseRecord {
    let found_urls = urls(&row.fragments);
    let syllabus_link = field_value(row, FieldRole::SyllabusLink)
        .or_else(|| found_urls.iter().find(|url| url.to_lowercase().contains("syllabus")).cloned())
        .unwrap_or_default();
    let course_link = field_value(row, FieldRole::CourseLink)
        .or_else(|| found_urls.iter().find(|url| **url != syllabus_link).cloned())
        .unwrap_or_default();

    CourseRecord {
        program: header.program.clone(),
        city_country: header.city_country.clone(),
        course_code,
        course_title,
        ur_equivalent: field_value(row, FieldRole::UrEquivalent).unwrap_or_default(),
        classification: verdict.classification,
        ur_credits: field_value(row, FieldRole::UrCredits).unwrap_or_default(),
        foreign_credits: field_value(row, FieldRole::ForeignCredits)
            .or_else(|| credits_cell(row))
            .unwrap_or_default(),
        course_link,
        syllabus_link,
    }
}
