use std::fmt;

use serde::Serialize;

/// Extraction tiers in priority order: earlier variants are structurally more
/// reliable and win conflicts against later ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    FormField,
    TextLayer,
    Ocr,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::FormField, Tier::TextLayer, Tier::Ocr];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FormField => "form_field",
            Self::TextLayer => "text_layer",
            Self::Ocr => "ocr",
        }
    }

    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Axis-aligned box in page space: points, origin at the top-left corner,
/// y growing downward.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Bounds {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Bounds {
    #[must_use]
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width: width.max(0.0),
            height: height.max(0.0),
        }
    }

    /// Canonical vertical position used for row clustering.
    #[must_use]
    pub fn center_y(&self) -> f32 {
        self.y + self.height / 2.0
    }

    #[must_use]
    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    #[must_use]
    pub fn overlaps_horizontally(&self, other: &Bounds) -> bool {
        self.x < other.right() && other.x < self.right()
    }

    #[must_use]
    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    #[must_use]
    pub fn intersects(&self, other: &Bounds) -> bool {
        self.overlaps_horizontally(other) && self.y < other.bottom() && other.y < self.bottom()
    }

    #[must_use]
    pub fn union(&self, other: &Bounds) -> Bounds {
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        let right = self.right().max(other.right());
        let bottom = self.bottom().max(other.bottom());
        Bounds::new(x, y, right - x, bottom - y)
    }
}

/// A named AcroForm value (tier 1).
#[derive(Debug, Clone, PartialEq)]
pub struct RawField {
    pub field_name: String,
    pub value: String,
    pub page: u32,
    pub bounds: Option<Bounds>,
}

/// Positioned text from the text layer (tier 2) or OCR (tier 3).
#[derive(Debug, Clone, PartialEq)]
pub struct TextRun {
    pub text: String,
    pub page: u32,
    pub bounds: Bounds,
}

impl TextRun {
    #[must_use]
    pub fn y_position(&self) -> f32 {
        self.bounds.center_y()
    }

    #[must_use]
    pub fn x_position(&self) -> f32 {
        self.bounds.x
    }
}

/// Uniform tier output consumed by the row aligner.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Fragment {
    pub tier: Tier,
    pub page: u32,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_name: Option<String>,
    pub bounds: Bounds,
    /// First-seen order across the whole document; the final tie-breaker.
    pub seq: usize,
}

impl Fragment {
    /// Fields without a widget rectangle cannot be placed on a row.
    #[must_use]
    pub fn from_field(field: RawField) -> Option<Self> {
        let bounds = field.bounds?;
        Some(Self {
            tier: Tier::FormField,
            page: field.page,
            text: field.value,
            field_name: Some(field.field_name),
            bounds,
            seq: 0,
        })
    }

    #[must_use]
    pub fn from_run(tier: Tier, run: TextRun) -> Self {
        Self {
            tier,
            page: run.page,
            text: run.text,
            field_name: None,
            bounds: run.bounds,
            seq: 0,
        }
    }

    #[must_use]
    pub fn y(&self) -> f32 {
        self.bounds.center_y()
    }

    /// Tier priority first, then first-seen order.
    #[must_use]
    pub fn precedence(&self) -> (Tier, usize) {
        (self.tier, self.seq)
    }
}

/// Fragments judged to describe one physical course line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Row {
    pub page: u32,
    pub anchor_y: f32,
    /// Winning fragments ordered left to right, then by tier.
    pub fragments: Vec<Fragment>,
    /// Fragments that lost a slot to a more reliable tier. Still visible to
    /// the approval classifier.
    pub shadowed: Vec<Fragment>,
    /// Pages whose clusters were merged into this row as continuations.
    pub continued_from: Vec<u32>,
}

pub(crate) const CELL_SEPARATOR: &str = "  ";

impl Row {
    /// Winning fragment texts joined with a double space, the cell boundary
    /// used throughout the crate.
    #[must_use]
    pub fn text(&self) -> String {
        self.cells().join(CELL_SEPARATOR)
    }

    #[must_use]
    pub fn cells(&self) -> Vec<&str> {
        self.fragments
            .iter()
            .map(|fragment| fragment.text.trim())
            .filter(|text| !text.is_empty())
            .collect()
    }

    pub fn all_fragments(&self) -> impl Iterator<Item = &Fragment> {
        self.fragments.iter().chain(self.shadowed.iter())
    }

    #[must_use]
    pub fn tiers(&self) -> Vec<Tier> {
        let mut tiers = self.all_fragments().map(|f| f.tier).collect::<Vec<_>>();
        tiers.sort();
        tiers.dedup();
        tiers
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Default)]
pub enum Classification {
    Elective,
    #[serde(rename = "Major/Minor")]
    MajorMinor,
    #[serde(rename = "Not Approved")]
    NotApproved,
    #[default]
    Unknown,
}

impl Classification {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Elective => "Elective",
            Self::MajorMinor => "Major/Minor",
            Self::NotApproved => "Not Approved",
            Self::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const RECORD_COLUMNS: [&str; 10] = [
    "Program",
    "City/Country",
    "Course Code",
    "Course Title",
    "UR Equivalent",
    "Classification",
    "UR Credits",
    "Foreign Credits",
    "Course Link",
    "Syllabus Link",
];

/// One output line. Field order is the CSV column order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub struct CourseRecord {
    #[serde(rename = "Program")]
    pub program: String,
    #[serde(rename = "City/Country")]
    pub city_country: String,
    #[serde(rename = "Course Code")]
    pub course_code: String,
    #[serde(rename = "Course Title")]
    pub course_title: String,
    #[serde(rename = "UR Equivalent")]
    pub ur_equivalent: String,
    #[serde(rename = "Classification")]
    pub classification: Classification,
    #[serde(rename = "UR Credits")]
    pub ur_credits: String,
    #[serde(rename = "Foreign Credits")]
    pub foreign_credits: String,
    #[serde(rename = "Course Link")]
    pub course_link: String,
    #[serde(rename = "Syllabus Link")]
    pub syllabus_link: String,
}
