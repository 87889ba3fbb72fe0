//! Form-level facts (student, program, term) and the program's location.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::document::norm_space;
use crate::model::{Fragment, RawField};

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Header {
    pub name: String,
    pub student_id: String,
    pub class_year: String,
    pub date: String,
    pub program: String,
    pub semester: String,
    /// "City, Country", or empty when the program gives no location.
    pub city_country: String,
}

static PERSON_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z][A-Za-z .'-]+ [A-Za-z][A-Za-z .'-]+$").expect("hardcoded name regex is valid")
});
static STUDENT_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{5,10}$").expect("hardcoded student id regex is valid"));
static CLASS_YEAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}$").expect("hardcoded class year regex is valid"));
static YEAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:19|20)\d{2}\b").expect("hardcoded year regex is valid"));
static DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b\d{1,2}[/-]\d{1,2}[/-]\d{2,4}\b").expect("hardcoded date regex is valid")
});
static TERM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:fall|spring|summer|winter)\b").expect("hardcoded term regex is valid")
});
static PROGRAM_VALUE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(university|college|program|institute|\bies\b|ciee|arcadia|barcelona|madrid|london|paris|florence|milan)",
    )
    .expect("hardcoded program regex is valid")
});
static PROVIDER_TEXT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(ies\s+abroad.*milan.*business|ies\s+milan.*university.*bocconi|university.*bocconi|ciee.*central.*european.*studies.*prague)",
    )
    .expect("hardcoded provider regex is valid")
});
static OTHER_PROVIDER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(ciee|arcadia|dis|cis|api)\b").expect("hardcoded provider regex is valid")
});
static COURSE_WORDS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)course|subject|number|title").expect("hardcoded course words regex is valid")
});

/// Field name and value, name lowercased, in document order.
struct FieldView {
    entries: Vec<(String, String)>,
}

impl FieldView {
    fn new(fields: &[RawField]) -> Self {
        let entries = fields
            .iter()
            .map(|field| (field.field_name.trim().to_lowercase(), norm_space(&field.value)))
            .filter(|(_, value)| !value.is_empty())
            .collect();
        Self { entries }
    }

    fn pick(&self, keys: &[&str], avoid: &[&str], shape: Option<&Regex>) -> Option<String> {
        self.entries
            .iter()
            .filter(|(key, _)| keys.iter().any(|wanted| key.contains(wanted)))
            .filter(|(key, _)| !avoid.iter().any(|bad| key.contains(bad)))
            .find(|(_, value)| shape.is_none_or(|shape| shape.is_match(value)))
            .map(|(_, value)| value.clone())
    }

    fn values(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(_, value)| value.as_str())
    }
}

/// Infers the header from form fields, falling back to value shapes and, for
/// the program, to page text that names a known provider.
#[must_use]
pub fn infer_header(fields: &[RawField], text: &[Fragment]) -> Header {
    let view = FieldView::new(fields);

    let name = view
        .pick(&["name"], &["course", "comments", "equiv", "approve"], None)
        .or_else(|| view.values().find(|v| PERSON_NAME_RE.is_match(v)).map(str::to_string))
        .unwrap_or_default();

    let student_id = view
        .pick(&["student", "id"], &[], Some(&*STUDENT_ID_RE))
        .or_else(|| view.values().find(|v| STUDENT_ID_RE.is_match(v)).map(str::to_string))
        .unwrap_or_default();

    let class_year = view
        .pick(&["class"], &[], Some(&*CLASS_YEAR_RE))
        .or_else(|| {
            view.values()
                .filter(|v| v.len() <= 6)
                .find_map(|v| YEAR_RE.find(v).map(|m| m.as_str().to_string()))
        })
        .unwrap_or_default();

    let date = view
        .pick(&["date"], &[], Some(&*DATE_RE))
        .or_else(|| view.values().find_map(|v| DATE_RE.find(v).map(|m| m.as_str().to_string())))
        .unwrap_or_default();

    let program = view
        .pick(
            &["college where", "study abroad", "program", "college"],
            &["course", "comments", "equiv", "approve", "class", "semester"],
            None,
        )
        .or_else(|| program_by_value(&view))
        .or_else(|| program_from_text(text))
        .unwrap_or_default();

    let semester = view
        .pick(&["semester"], &[], Some(&*TERM_RE))
        .or_else(|| view.values().find(|v| TERM_RE.is_match(v)).map(str::to_string))
        .unwrap_or_default();

    Header {
        name,
        student_id,
        class_year,
        date,
        city_country: city_country(&program),
        program,
        semester,
    }
}

fn program_by_value(view: &FieldView) -> Option<String> {
    const NOT_PROGRAM: &[&str] = &[
        "course", "comments", "equiv", "approve", "majorminor", "class", "semester", "id", "date", "name",
    ];
    view.entries
        .iter()
        .filter(|(key, _)| !NOT_PROGRAM.iter().any(|bad| key.contains(bad)))
        .filter(|(_, value)| PROGRAM_VALUE_RE.is_match(value))
        .map(|(_, value)| value)
        .max_by_key(|value| value.len())
        .cloned()
}

fn program_from_text(text: &[Fragment]) -> Option<String> {
    text.iter().map(|f| f.text.trim()).find_map(|line| {
        let known = PROVIDER_TEXT_RE.is_match(line);
        let other = OTHER_PROVIDER_RE.is_match(line) && line.len() > 20 && !COURSE_WORDS_RE.is_match(line);
        (known || other).then(|| line.to_string())
    })
}

/// Lowercase key found in program text, and the city and country it implies.
/// University names map to the city they are in.
const KNOWN_LOCATIONS: &[(&str, &str, &str)] = &[
    ("milan", "Milan", "Italy"),
    ("bocconi", "Milan", "Italy"),
    ("barcelona", "Barcelona", "Spain"),
    ("madrid", "Madrid", "Spain"),
    ("london", "London", "United Kingdom"),
    ("paris", "Paris", "France"),
    ("florence", "Florence", "Italy"),
    ("rome", "Rome", "Italy"),
    ("prague", "Prague", "Czech Republic"),
    ("copenhagen", "Copenhagen", "Denmark"),
    ("stockholm", "Stockholm", "Sweden"),
    ("dublin", "Dublin", "Ireland"),
    ("amsterdam", "Amsterdam", "Netherlands"),
    ("berlin", "Berlin", "Germany"),
    ("tokyo", "Tokyo", "Japan"),
    ("sydney", "Sydney", "Australia"),
    ("buenos aires", "Buenos Aires", "Argentina"),
    ("cape town", "Cape Town", "South Africa"),
    ("hong kong", "Hong Kong", "China"),
    ("singapore", "Singapore", "Singapore"),
    ("seoul", "Seoul", "South Korea"),
    ("kyoto", "Kyoto", "Japan"),
    ("nagoya", "Nagoya", "Japan"),
    ("waseda", "Tokyo", "Japan"),
    ("yonsei", "Seoul", "South Korea"),
    ("leeds", "Leeds", "United Kingdom"),
    ("bristol", "Bristol", "United Kingdom"),
    ("newcastle", "Newcastle", "Australia"),
    ("auckland", "Auckland", "New Zealand"),
    ("cairo", "Cairo", "Egypt"),
    ("munich", "Munich", "Germany"),
    ("salaya", "Salaya", "Thailand"),
    ("christchurch", "Christchurch", "New Zealand"),
    ("york", "York", "United Kingdom"),
    ("bath", "Bath", "United Kingdom"),
];

const NOT_A_PLACE: &[&str] = &[
    "university", "college", "institute", "politics", "law", "economics", "studies", "program",
];
const NOT_A_CITY: &[&str] = &["ies", "abroad", "program", "studies"];

static TRAILING_LOCATION_RE: LazyLock<[Regex; 2]> = LazyLock::new(|| {
    [
        Regex::new(r"([^,]+),\s*([A-Za-z ]+)$").expect("hardcoded location regex is valid"),
        Regex::new(r"([^,]+?)\s*-\s*([A-Za-z ]+)$").expect("hardcoded location regex is valid"),
    ]
});

/// "City, Country" for a program description, or empty.
#[must_use]
pub fn city_country(program: &str) -> String {
    if program.trim().is_empty() {
        return String::new();
    }
    let lower = program.to_lowercase();
    let known = KNOWN_LOCATIONS.iter().find(|(key, _, _)| {
        lower
            .match_indices(key)
            .any(|(start, _)| is_word_boundary(&lower, start, start + key.len()))
    });
    if let Some((_, city, country)) = known {
        return format!("{city}, {country}");
    }

    for regex in TRAILING_LOCATION_RE.iter() {
        if let Some(captures) = regex.captures(program.trim()) {
            let (first, second) = (captures[1].trim(), captures[2].trim());
            let second_lower = second.to_lowercase();
            let first_lower = first.to_lowercase();
            if !second.is_empty()
                && second.len() <= 20
                && !NOT_A_PLACE.iter().any(|word| second_lower.contains(word))
                && !NOT_A_CITY.iter().any(|word| first_lower.contains(word))
            {
                return format!("{first}, {second}");
            }
        }
    }
    String::new()
}

fn is_word_boundary(text: &str, start: usize, end: usize) -> bool {
    let before = text[..start].chars().next_back();
    let after = text[end..].chars().next();
    !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
}
