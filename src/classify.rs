use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::assemble::{FieldRole, field_role};
use crate::document::norm_space;
use crate::model::{Classification, Fragment, Tier};
use crate::options::ClassifierOptions;

static INTR_COMMENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bINTR\s*:\s*[A-Za-z]{1,6}").expect("hardcoded INTR regex is valid")
});

/// An approval verdict and the fragments that decided it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Verdict {
    pub classification: Classification,
    pub evidence: Vec<Fragment>,
}

impl Verdict {
    fn unknown() -> Self {
        Self {
            classification: Classification::Unknown,
            evidence: Vec::new(),
        }
    }

    fn from_evidence(classification: Classification, evidence: Vec<&Fragment>) -> Option<Self> {
        (!evidence.is_empty()).then(|| Self {
            classification,
            evidence: evidence.into_iter().cloned().collect(),
        })
    }
}

/// Decides a row's approval status from its fragments. Checks run from the
/// least to the most ambiguous signal: rejection wording, structured
/// major/minor comments, then signatures.
#[derive(Debug, Clone)]
pub struct ApprovalClassifier {
    stoplist: HashSet<String>,
    negative_marks: HashSet<String>,
    not_approved: Vec<String>,
    major_minor_terms: Vec<String>,
    elective_terms: Vec<String>,
}

impl Default for ApprovalClassifier {
    fn default() -> Self {
        Self::new(&ClassifierOptions::default())
    }
}

fn fold(text: &str) -> String {
    norm_space(text).to_lowercase()
}

fn folded_terms(terms: &[String]) -> Vec<String> {
    terms.iter().map(|term| fold(term)).filter(|term| !term.is_empty()).collect()
}

fn trim_marks(text: &str) -> &str {
    text.trim_matches(|c: char| c.is_ascii_punctuation() && c != '/')
}

/// `term` occurs in `text` with no letter or digit directly on either side.
fn contains_word(text: &str, term: &str) -> bool {
    text.match_indices(term).any(|(start, _)| {
        let before = text[..start].chars().next_back();
        let after = text[start + term.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}

impl ApprovalClassifier {
    #[must_use]
    pub fn new(options: &ClassifierOptions) -> Self {
        Self {
            stoplist: options.stoplist.iter().map(|word| fold(word)).collect(),
            negative_marks: options.negative_marks.iter().map(|mark| fold(mark)).collect(),
            not_approved: folded_terms(&options.not_approved_terms),
            major_minor_terms: folded_terms(&options.major_minor_terms),
            elective_terms: folded_terms(&options.elective_terms),
        }
    }

    /// Stoplisted values never count as a signature.
    #[must_use]
    pub fn is_boilerplate(&self, text: &str) -> bool {
        self.stoplist.contains(trim_marks(&fold(text)))
    }

    /// Whether a typed elective or major/minor approval value grants the
    /// approval. Only empty and negative values do not.
    #[must_use]
    pub fn is_typed_approval(&self, text: &str) -> bool {
        let folded = fold(text);
        let value = trim_marks(&folded);
        !value.is_empty() && !self.negative_marks.contains(value)
    }

    fn comment_mentions(text: &str, terms: &[String]) -> bool {
        let folded = fold(text);
        terms.iter().any(|term| contains_word(&folded, term))
    }

    #[must_use]
    pub fn classify(&self, fragments: &[&Fragment]) -> Verdict {
        self.not_approved(fragments)
            .or_else(|| self.major_minor(fragments))
            .or_else(|| self.elective(fragments))
            .unwrap_or_else(Verdict::unknown)
    }

    /// True when the fragments already carry any approval evidence, so OCR
    /// has nothing left to add.
    #[must_use]
    pub fn has_indicator(&self, fragments: &[Fragment]) -> bool {
        let refs = fragments.iter().collect::<Vec<_>>();
        self.classify(&refs).classification != Classification::Unknown
    }

    fn not_approved(&self, fragments: &[&Fragment]) -> Option<Verdict> {
        let evidence = fragments
            .iter()
            .copied()
            .filter(|fragment| {
                let text = fold(&fragment.text);
                self.not_approved.iter().any(|term| text.contains(term.as_str()))
            })
            .collect();
        Verdict::from_evidence(Classification::NotApproved, evidence)
    }

    fn major_minor(&self, fragments: &[&Fragment]) -> Option<Verdict> {
        let evidence = fragments
            .iter()
            .copied()
            .filter(|fragment| {
                if INTR_COMMENT_RE.is_match(&fragment.text) {
                    return true;
                }
                match fragment.field_name.as_deref().map(field_role) {
                    Some(FieldRole::MajorMinorApproval) => self.is_typed_approval(&fragment.text),
                    Some(FieldRole::Comments) => Self::comment_mentions(&fragment.text, &self.major_minor_terms),
                    _ => false,
                }
            })
            .collect();
        Verdict::from_evidence(Classification::MajorMinor, evidence)
    }

    fn elective(&self, fragments: &[&Fragment]) -> Option<Verdict> {
        let typed = fragments
            .iter()
            .copied()
            .filter(|fragment| fragment.tier != Tier::Ocr)
            .collect::<Vec<_>>();
        let typed_text = typed.iter().map(|f| fold(&f.text)).collect::<Vec<_>>().join(" ");

        let evidence = fragments
            .iter()
            .copied()
            .filter(|fragment| match fragment.tier {
                Tier::Ocr => self.is_handwritten_signature(fragment, &typed, &typed_text),
                _ => match fragment.field_name.as_deref().map(field_role) {
                    Some(FieldRole::ElectiveApproval) => self.is_typed_approval(&fragment.text),
                    Some(FieldRole::Signature) => !self.is_boilerplate(&fragment.text),
                    Some(FieldRole::Comments) => Self::comment_mentions(&fragment.text, &self.elective_terms),
                    _ => false,
                },
            })
            .collect();
        Verdict::from_evidence(Classification::Elective, evidence)
    }

    fn is_handwritten_signature(&self, fragment: &Fragment, typed: &[&Fragment], typed_text: &str) -> bool {
        if self.is_boilerplate(&fragment.text) || !looks_like_name(&fragment.text) {
            return false;
        }
        // OCR re-reading printed text is not a signature.
        if typed.iter().any(|other| other.bounds.intersects(&fragment.bounds)) {
            return false;
        }
        !typed_text.contains(&fold(&fragment.text))
    }
}

/// Two or more capitalized word tokens and no digits.
pub(crate) fn looks_like_name(text: &str) -> bool {
    if text.chars().any(|c| c.is_ascii_digit()) {
        return false;
    }
    let tokens = text.split_whitespace().collect::<Vec<_>>();
    tokens.len() >= 2
        && tokens.iter().all(|token| {
            token.chars().next().is_some_and(char::is_uppercase)
                && token
                    .chars()
                    .all(|c| c.is_alphabetic() || matches!(c, '.' | '\'' | '-' | '’'))
        })
}

#[cfg(test)]
mod tests {
    use super::{ApprovalClassifier, contains_word, looks_like_name};
    use crate::model::{Bounds, Classification, Fragment, Tier};
    use crate::options::ClassifierOptions;

    fn fragment(tier: Tier, text: &str, x: f32) -> Fragment {
        Fragment {
            tier,
            page: 1,
            text: text.to_string(),
            field_name: None,
            bounds: Bounds::new(x, 100.0, 80.0, 10.0),
            seq: 0,
        }
    }

    fn field(name: &str, text: &str, x: f32) -> Fragment {
        Fragment {
            field_name: Some(name.to_string()),
            ..fragment(Tier::FormField, text, x)
        }
    }

    #[test]
    fn rejection_outranks_signature() {
        let classifier = ApprovalClassifier::default();
        let course = field("Course1", "BBLCO1221U Corporate Finance", 40.0);
        let name = fragment(Tier::Ocr, "Erin Smith", 300.0);
        let comment = fragment(Tier::Ocr, "Not approved", 420.0);

        let verdict = classifier.classify(&[&course, &name, &comment]);
        assert_eq!(verdict.classification, Classification::NotApproved);
        assert_eq!(verdict.evidence.len(), 1);
        assert_eq!(verdict.evidence[0].text, "Not approved");
    }

    #[test]
    fn ocr_name_is_elective_signature() {
        let classifier = ApprovalClassifier::default();
        let course = field("Course1", "CU 270: Culture and Cuisine", 40.0);
        let name = fragment(Tier::Ocr, "Erin Smith", 300.0);

        let verdict = classifier.classify(&[&course, &name]);
        assert_eq!(verdict.classification, Classification::Elective);
    }

    #[test]
    fn stoplisted_ocr_text_is_not_a_signature() {
        let classifier = ApprovalClassifier::default();
        let approved = fragment(Tier::Ocr, "Approved", 300.0);
        let general = fragment(Tier::Ocr, "General Credit", 400.0);

        let verdict = classifier.classify(&[&approved, &general]);
        assert_eq!(verdict.classification, Classification::Unknown);
    }

    #[test]
    fn ocr_echo_of_typed_text_is_ignored() {
        let classifier = ApprovalClassifier::default();
        let typed = fragment(Tier::TextLayer, "Corporate Finance", 40.0);
        let echo = fragment(Tier::Ocr, "Corporate Finance", 300.0);

        assert_eq!(
            classifier.classify(&[&typed, &echo]).classification,
            Classification::Unknown
        );
    }

    #[test]
    fn intr_comment_is_major_minor() {
        let classifier = ApprovalClassifier::default();
        let comment = fragment(Tier::Ocr, "INTR: PPD", 300.0);
        let name = fragment(Tier::Ocr, "Erin Smith", 400.0);

        assert_eq!(
            classifier.classify(&[&comment, &name]).classification,
            Classification::MajorMinor
        );
    }

    #[test]
    fn typed_approval_fields() {
        let classifier = ApprovalClassifier::default();
        let initials = field("ElecApprove2", "RP", 300.0);
        let yes = field("ElecApprove3", "Yes", 300.0);
        let approved = field("ElecApprove4", "Approved", 300.0);
        let major = field("MajorMinorApproval2", "GoN", 400.0);
        let major_yes = field("MajorMinorApproval3", "Yes", 400.0);

        for value in [&initials, &yes, &approved] {
            assert_eq!(
                classifier.classify(&[value]).classification,
                Classification::Elective,
                "{}",
                value.text
            );
        }
        assert_eq!(
            classifier.classify(&[&initials, &major]).classification,
            Classification::MajorMinor
        );
        assert_eq!(
            classifier.classify(&[&major_yes]).classification,
            Classification::MajorMinor
        );
    }

    #[test]
    fn negative_approval_values_are_not_approvals() {
        let classifier = ApprovalClassifier::default();
        for value in ["", "No", "n", "None", "N/A", "General Credit", " no. "] {
            let elective = field("ElecApprove1", value, 300.0);
            let major = field("MajorMinorApproval1", value, 400.0);
            assert_eq!(
                classifier.classify(&[&elective, &major]).classification,
                Classification::Unknown,
                "{value:?}"
            );
        }
    }

    #[test]
    fn typed_signature_field_keeps_the_stoplist() {
        let classifier = ApprovalClassifier::default();
        let placeholder = field("Signature1", "Signature", 300.0);
        let yes = field("Initials1", "yes", 300.0);
        let initials = field("Initials2", "E.S.", 300.0);

        assert_eq!(
            classifier.classify(&[&placeholder, &yes]).classification,
            Classification::Unknown
        );
        assert_eq!(
            classifier.classify(&[&initials]).classification,
            Classification::Elective
        );
    }

    #[test]
    fn approver_initials_in_comments_are_major_minor() {
        let classifier = ApprovalClassifier::default();
        for text in ["PPD", "ok per GoN; PaC", "Counts toward the minor"] {
            let comment = field("Comments1", text, 500.0);
            assert_eq!(
                classifier.classify(&[&comment]).classification,
                Classification::MajorMinor,
                "{text}"
            );
        }
        let unrelated = field("Comments1", "Gone abroad, see pace of course", 500.0);
        assert_eq!(
            classifier.classify(&[&unrelated]).classification,
            Classification::Unknown
        );
    }

    #[test]
    fn elective_in_comments() {
        let classifier = ApprovalClassifier::default();
        for text in ["Elective", "general elective", "Elective only."] {
            let comment = field("Comments1", text, 500.0);
            assert_eq!(
                classifier.classify(&[&comment]).classification,
                Classification::Elective,
                "{text}"
            );
        }
        let electives = field("Comments1", "electives list pending", 500.0);
        assert_eq!(
            classifier.classify(&[&electives]).classification,
            Classification::Unknown
        );
    }

    #[test]
    fn comment_terms_are_configurable() {
        let options = ClassifierOptions {
            major_minor_terms: vec!["KLM".to_string()],
            elective_terms: vec!["free credit".to_string()],
            ..ClassifierOptions::default()
        };
        let classifier = ApprovalClassifier::new(&options);

        let initials = field("Comments1", "klm", 500.0);
        let old_initials = field("Comments1", "PPD", 500.0);
        let phrase = field("Comments1", "Free  credit", 500.0);

        assert_eq!(
            classifier.classify(&[&initials]).classification,
            Classification::MajorMinor
        );
        assert_eq!(
            classifier.classify(&[&old_initials]).classification,
            Classification::Unknown
        );
        assert_eq!(
            classifier.classify(&[&phrase]).classification,
            Classification::Elective
        );
    }

    #[test]
    fn word_matching() {
        assert!(contains_word("intr: ppd", "ppd"));
        assert!(contains_word("gon;pac", "pac"));
        assert!(!contains_word("pacific", "pac"));
        assert!(!contains_word("", "gon"));
    }

    #[test]
    fn indicator_detection_ignores_plain_text() {
        let classifier = ApprovalClassifier::default();
        let plain = vec![fragment(Tier::TextLayer, "Erin Smith", 40.0)];
        let rejected = vec![fragment(Tier::TextLayer, "Denied", 40.0)];

        assert!(!classifier.has_indicator(&plain));
        assert!(classifier.has_indicator(&rejected));
    }

    #[test]
    fn name_shape() {
        assert!(looks_like_name("Erin Smith"));
        assert!(looks_like_name("J. O'Neil"));
        assert!(!looks_like_name("Erin"));
        assert!(!looks_like_name("erin smith"));
        assert!(!looks_like_name("ECON 101"));
    }
}
