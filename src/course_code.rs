//! Splitting course text into program prefix, course code and title.
//!
//! Formats are an ordered table of [`CourseRule`]s. The most specific shapes
//! come first so that the generic fallbacks never get the chance to mis-split
//! a format a dedicated rule understands.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::assemble::{FieldRole, field_role};
use crate::model::{Row, Tier};

/// What a capture group of a rule holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capture {
    Prefix,
    Code,
    Title,
    /// Matched but not reported, such as an internal registration id.
    Skip,
}

/// One course-code format: a regex anchored at the start of the text and the
/// role of each of its capture groups, in group order.
#[derive(Debug, Clone, Copy)]
pub struct CourseRule {
    pub name: &'static str,
    pub pattern: &'static str,
    pub captures: &'static [Capture],
}

use Capture::{Code, Prefix, Skip, Title};

pub const COURSE_RULES: &[CourseRule] = &[
    // (GI) Econ 3006 PRCZ Economics of the European Union
    CourseRule {
        name: "prefixed_site_code",
        pattern: r"^\(([A-Z]+)\)\s+([A-Za-z]{2,4}\s+\d{2,4}\s+[A-Z]{2,4})\s+(.+)$",
        captures: &[Prefix, Code, Title],
    },
    // POLI 3003 PRAG The Rise and Fall of Central European Totalitarianism
    CourseRule {
        name: "site_code",
        pattern: r"^([A-Z]{2,4}\s+\d{2,4}\s+[A-Z]{2,4})\s+(.+)$",
        captures: &[Code, Title],
    },
    // CU 270-01 - 2163268-Culture and Cuisine
    CourseRule {
        name: "section_with_registration_id",
        pattern: r"^([A-Z]{2,4}\s+\d{2,4}(?:-\d{2})?)\s*-\s*(\d{7})-\s*(.+)$",
        captures: &[Code, Skip, Title],
    },
    // CU 270: Culture and Cuisine
    CourseRule {
        name: "colon_separated",
        pattern: r"^([A-Z]{2,4}\s+\d{2,4}[A-Z]?)\s*:\s*(.+)$",
        captures: &[Code, Title],
    },
    // BOCCONI 30150 - Introduction to Options and Futures
    CourseRule {
        name: "subject_number_dash",
        pattern: r"^([A-Z]{2,8}\s+\d{2,5})\s*[-–—]\s*(.+)$",
        captures: &[Code, Title],
    },
    // E 101 - Intro to Film
    CourseRule {
        name: "short_subject_dash",
        pattern: r"^([A-Z]{1,4}(?:/[A-Z]{1,4})?\s*\d{2,3}[A-Z]?)\s*[-–—]\s*(.+)$",
        captures: &[Code, Title],
    },
    // PO/EC 246 European Union Policies in Practice
    CourseRule {
        name: "slashed_subject",
        pattern: r"^([A-Z]{1,4}/[A-Z]{1,4}\s*\d{2,4}[A-Z]?)\s*[-–—]?\s*(.+)$",
        captures: &[Code, Title],
    },
    // BBLCO1221U – Corporate Finance, ASIA2041 - Mainland Southeast Asia
    CourseRule {
        name: "compact_code_dash",
        pattern: r"^([A-Z]{2,10}(?:-[A-Z0-9]+)*\d[A-Z0-9]*)\s*[-–—]\s*(.+)$",
        captures: &[Code, Title],
    },
    // BA-BHAAV1058U Management Accounting and Control Systems
    CourseRule {
        name: "compact_code",
        pattern: r"^([A-Z]{2,10}(?:-[A-Z0-9]+)*\d[A-Z0-9]*)\s+(.+)$",
        captures: &[Code, Title],
    },
    CourseRule {
        name: "leading_code",
        pattern: r"^([A-Z]{2,10}(?:-[A-Z0-9]+)*\d[A-Z0-9]*)(?:\s*[-–—:]\s*|\s*$)(.*)$",
        captures: &[Code, Title],
    },
];

/// Form headings and instructions that look like course lines.
pub const BOILERPLATE_PATTERNS: &[&str] = &[
    r"^THE\s+COLLEGE",
    r"^COURSE\s+APPROVAL",
    r"^IES\s+Abroad",
    r"^DEPARTMENT\s+OR\s+OFFICE",
    r"^STUDENTS\s+Complete",
    r"^AUTHORIZED\s+APPROVERS",
    r"^HOW\s+TO\s+TRANSFER",
    r"^FORM\s*$",
    r"^APPROVAL\s*$",
    r"^COLLEGE\s*$",
    r"^COURSE\s*$",
    r"^USE\s+ONLY\s*$",
    r"^ONLY\s*$",
];

static LINK_SUFFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\s*Link to course description.*$").expect("hardcoded link suffix regex is valid")
});

/// Drops a trailing "Link to course description", collapses whitespace and
/// trims stray separators.
#[must_use]
pub fn clean_course_text(text: &str) -> String {
    let flattened = text.replace(['\n', '\r'], " ");
    let without_link = LINK_SUFFIX_RE.replace(flattened.trim(), "");
    let collapsed = without_link.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.trim_matches([' ', '-', ':']).to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub struct ParsedCourse {
    pub prefix: String,
    pub code: String,
    pub title: String,
    pub rule: &'static str,
}

impl ParsedCourse {
    /// Code as printed on the form, with the program prefix when there is one.
    #[must_use]
    pub fn display_code(&self) -> String {
        if self.prefix.is_empty() {
            self.code.clone()
        } else {
            format!("({}) {}", self.prefix, self.code)
        }
    }
}

/// Outcome of parsing one row.
#[derive(Debug, Clone, PartialEq)]
pub enum RowParse {
    Parsed(ParsedCourse),
    /// Boilerplate heading; the pattern that matched.
    Excluded(&'static str),
    /// No rule matched. `course_text` holds the text of a course field, when
    /// the row has one.
    Unparsed { course_text: Option<String> },
}

struct CompiledRule {
    rule: CourseRule,
    regex: Regex,
}

pub struct CourseCodeParser {
    rules: Vec<CompiledRule>,
    boilerplate: Vec<(&'static str, Regex)>,
}

impl Default for CourseCodeParser {
    fn default() -> Self {
        Self::new()
    }
}

impl CourseCodeParser {
    #[must_use]
    pub fn new() -> Self {
        Self::with_rules(COURSE_RULES).expect("built-in course rules are valid")
    }

    /// Builds a parser from a custom rule table, tried in the given order.
    pub fn with_rules(rules: &[CourseRule]) -> Result<Self, regex::Error> {
        let rules = rules
            .iter()
            .map(|rule| {
                Ok(CompiledRule {
                    rule: *rule,
                    regex: Regex::new(rule.pattern)?,
                })
            })
            .collect::<Result<Vec<_>, regex::Error>>()?;
        let boilerplate = BOILERPLATE_PATTERNS
            .iter()
            .map(|pattern| Ok((*pattern, Regex::new(&format!("(?i){pattern}"))?)))
            .collect::<Result<Vec<_>, regex::Error>>()?;
        Ok(Self { rules, boilerplate })
    }

    /// First matching rule for one piece of course text.
    #[must_use]
    pub fn parse(&self, text: &str) -> Option<ParsedCourse> {
        let text = clean_course_text(text);
        if text.is_empty() {
            return None;
        }
        self.rules.iter().find_map(|compiled| apply(compiled, &text))
    }

    #[must_use]
    pub fn boilerplate_match(&self, text: &str) -> Option<&'static str> {
        let text = clean_course_text(text);
        self.boilerplate
            .iter()
            .find(|(_, regex)| regex.is_match(&text))
            .map(|(pattern, _)| *pattern)
    }

    /// Parses a row. A course field, when present, is the only candidate;
    /// otherwise every cell not claimed by another field role is tried.
    /// Rules are the outer loop, so a specific format anywhere in the row wins
    /// over a generic one further left.
    #[must_use]
    pub fn parse_row(&self, row: &Row) -> RowParse {
        let course_fields = row
            .fragments
            .iter()
            .filter(|f| f.tier == Tier::FormField)
            .filter(|f| f.field_name.as_deref().map(field_role) == Some(FieldRole::Course))
            .map(|f| clean_course_text(&f.text))
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>();

        let candidates = if course_fields.is_empty() {
            row.fragments
                .iter()
                .filter(|f| {
                    f.field_name
                        .as_deref()
                        .is_none_or(|name| matches!(field_role(name), FieldRole::Course | FieldRole::Other))
                })
                .map(|f| clean_course_text(&f.text))
                .filter(|text| !text.is_empty())
                .collect::<Vec<_>>()
        } else {
            course_fields.clone()
        };

        if let Some(pattern) = candidates.first().and_then(|text| self.boilerplate_match(text)) {
            return RowParse::Excluded(pattern);
        }

        for compiled in &self.rules {
            if let Some(parsed) = candidates.iter().find_map(|text| apply(compiled, text)) {
                debug!(rule = parsed.rule, code = %parsed.code, "course rule matched");
                return RowParse::Parsed(parsed);
            }
        }

        RowParse::Unparsed {
            course_text: course_fields.into_iter().next(),
        }
    }
}

fn apply(compiled: &CompiledRule, text: &str) -> Option<ParsedCourse> {
    let captures = compiled.regex.captures(text)?;
    let mut parsed = ParsedCourse {
        rule: compiled.rule.name,
        ..ParsedCourse::default()
    };
    for (index, role) in compiled.rule.captures.iter().enumerate() {
        let value = captures.get(index + 1).map_or("", |m| m.as_str().trim());
        match role {
            Prefix => parsed.prefix = value.to_string(),
            Code => parsed.code = value.to_string(),
            Title => parsed.title = value.trim_matches([' ', '-', ':', '–']).to_string(),
            Skip => {}
        }
    }
    (!parsed.code.is_empty()).then_some(parsed)
}

#[cfg(test)]
mod tests {
    use super::{CourseCodeParser, ParsedCourse, RowParse, clean_course_text};
    use crate::model::{Bounds, Fragment, Row, Tier};

    fn parse(text: &str) -> ParsedCourse {
        CourseCodeParser::new()
            .parse(text)
            .unwrap_or_else(|| panic!("{text} should parse"))
    }

    fn split(text: &str) -> (String, String, String) {
        let parsed = parse(text);
        (parsed.prefix, parsed.code, parsed.title)
    }

    fn owned(prefix: &str, code: &str, title: &str) -> (String, String, String) {
        (prefix.to_string(), code.to_string(), title.to_string())
    }

    #[test]
    fn prefixed_site_code() {
        assert_eq!(
            split("(GI) Econ 3006 PRCZ Economics of the European Union"),
            owned("GI", "Econ 3006 PRCZ", "Economics of the European Union")
        );
        assert_eq!(
            parse("(GI) Econ 3006 PRCZ Economics of the European Union").display_code(),
            "(GI) Econ 3006 PRCZ"
        );
    }

    #[test]
    fn site_code() {
        assert_eq!(
            split("POLI 3003 PRAG The Rise and Fall of Central European Totalitarianism"),
            owned(
                "",
                "POLI 3003 PRAG",
                "The Rise and Fall of Central European Totalitarianism"
            )
        );
    }

    #[test]
    fn registration_id_is_dropped() {
        assert_eq!(
            split("CU 270-01 - 2163268-Culture and Cuisine"),
            owned("", "CU 270-01", "Culture and Cuisine")
        );
    }

    #[test]
    fn colon_separated() {
        assert_eq!(
            split("CU 270: Culture and Cuisine"),
            owned("", "CU 270", "Culture and Cuisine")
        );
    }

    #[test]
    fn subject_number_dash() {
        assert_eq!(
            split("BOCCONI 30150 - Introduction to Options and Futures"),
            owned("", "BOCCONI 30150", "Introduction to Options and Futures")
        );
        assert_eq!(
            split("FI 356 - International Financial Markets and Investments"),
            owned("", "FI 356", "International Financial Markets and Investments")
        );
    }

    #[test]
    fn single_letter_subject() {
        let parsed = parse("E 101 - Intro to Film");
        assert_eq!(parsed.code, "E 101");
        assert_eq!(parsed.title, "Intro to Film");
        assert_eq!(parsed.rule, "short_subject_dash");
        assert_eq!(
            split("M 210A – Linear Algebra"),
            owned("", "M 210A", "Linear Algebra")
        );
        assert_eq!(
            split("PO/EC 246 - European Union Policies in Practice"),
            owned("", "PO/EC 246", "European Union Policies in Practice")
        );
    }

    #[test]
    fn slashed_subject() {
        assert_eq!(
            split("PO/EC 246 European Union Policies in Practice"),
            owned("", "PO/EC 246", "European Union Policies in Practice")
        );
    }

    #[test]
    fn compact_code_with_en_dash() {
        assert_eq!(
            split("BBLCO1221U – Corporate Finance"),
            owned("", "BBLCO1221U", "Corporate Finance")
        );
        assert_eq!(
            split("ASIA2041 - Mainland Southeast Asia"),
            owned("", "ASIA2041", "Mainland Southeast Asia")
        );
    }

    #[test]
    fn compact_hyphenated_code() {
        assert_eq!(
            split("BA-BHAAV1058U Management Accounting and Control Systems"),
            owned("", "BA-BHAAV1058U", "Management Accounting and Control Systems")
        );
    }

    #[test]
    fn bare_code_falls_back() {
        let parsed = parse("ECON2010");
        assert_eq!(parsed.code, "ECON2010");
        assert_eq!(parsed.title, "");
        assert_eq!(parsed.rule, "leading_code");
    }

    #[test]
    fn headings_and_prose_do_not_parse() {
        let parser = CourseCodeParser::new();
        assert!(parser.parse("COURSE APPROVAL FORM").is_none());
        assert!(parser.parse("Corporate Finance").is_none());
        assert!(parser.boilerplate_match("Course Approval Form").is_some());
        assert!(parser.boilerplate_match("AUTHORIZED APPROVERS ONLY").is_some());
    }

    #[test]
    fn cleans_link_suffix() {
        assert_eq!(
            clean_course_text("ASIA2041 - Mainland Southeast Asia\nLink to course description"),
            "ASIA2041 - Mainland Southeast Asia"
        );
        assert_eq!(clean_course_text("  CU 270:  "), "CU 270");
    }

    fn cell(text: &str, x: f32, field_name: Option<&str>) -> Fragment {
        Fragment {
            tier: if field_name.is_some() { Tier::FormField } else { Tier::TextLayer },
            page: 1,
            text: text.to_string(),
            field_name: field_name.map(ToString::to_string),
            bounds: Bounds::new(x, 100.0, 80.0, 10.0),
            seq: 0,
        }
    }

    fn row(fragments: Vec<Fragment>) -> Row {
        Row {
            page: 1,
            anchor_y: 105.0,
            fragments,
            shadowed: Vec::new(),
            continued_from: Vec::new(),
        }
    }

    #[test]
    fn specific_rule_wins_across_cells() {
        let parser = CourseCodeParser::new();
        let parsed = parser.parse_row(&row(vec![
            cell("RP", 20.0, None),
            cell("CU 270: Culture and Cuisine", 60.0, None),
        ]));
        let RowParse::Parsed(parsed) = parsed else {
            panic!("row should parse");
        };
        assert_eq!(parsed.code, "CU 270");
    }

    #[test]
    fn equivalent_field_is_not_a_candidate() {
        let parser = CourseCodeParser::new();
        let parsed = parser.parse_row(&row(vec![
            cell("Corporate Finance", 20.0, Some("Course3")),
            cell("ECON 273", 300.0, Some("Equivalent3")),
        ]));
        assert_eq!(
            parsed,
            RowParse::Unparsed {
                course_text: Some("Corporate Finance".to_string())
            }
        );
    }

    #[test]
    fn boilerplate_row_is_excluded() {
        let parser = CourseCodeParser::new();
        let parsed = parser.parse_row(&row(vec![cell("COURSE APPROVAL FORM", 20.0, None)]));
        assert!(matches!(parsed, RowParse::Excluded(_)));
    }
}
