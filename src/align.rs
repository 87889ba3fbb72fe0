//! Grouping fragments from every tier into course rows.
//!
//! Per page, rows are seeded from the most reliable tier present and the
//! remaining fragments are attached to the nearest row by vertical centre.
//! A second pass joins rows that continue across a page break: a row with no
//! course of its own is folded into a course row on an adjacent page only
//! when it brings a cell that row is missing.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use tracing::debug;

use crate::assemble::{FieldRole, field_role};
use crate::classify::looks_like_name;
use crate::course_code::{CourseCodeParser, RowParse};
use crate::document::PageInfo;
use crate::model::{Fragment, Row, Tier};
use crate::options::AlignOptions;

/// Cells a course row can spill onto the next page.
const CONTINUATION_ROLES: &[FieldRole] = &[
    FieldRole::UrEquivalent,
    FieldRole::UrCredits,
    FieldRole::ForeignCredits,
    FieldRole::CourseLink,
    FieldRole::SyllabusLink,
    FieldRole::Comments,
    FieldRole::ElectiveApproval,
    FieldRole::MajorMinorApproval,
    FieldRole::Signature,
];

fn field_roles(row: &Row) -> Vec<FieldRole> {
    row.fragments
        .iter()
        .filter(|f| f.tier == Tier::FormField)
        .filter_map(|f| f.field_name.as_deref().map(field_role))
        .collect()
}

/// A piece may only be folded into `target` when it carries a form cell the
/// target lacks, or is nothing but handwritten names.
fn completes(piece: &Row, target: &Row) -> bool {
    let present = field_roles(target);
    let fills_a_cell = field_roles(piece)
        .into_iter()
        .any(|role| CONTINUATION_ROLES.contains(&role) && !present.contains(&role));
    fills_a_cell
        || (!piece.fragments.is_empty()
            && piece
                .fragments
                .iter()
                .all(|f| f.tier == Tier::Ocr && looks_like_name(&f.text)))
}

struct Cluster {
    anchor_y: f32,
    seeds: usize,
    members: Vec<Fragment>,
}

impl Cluster {
    fn new(fragment: Fragment) -> Self {
        Self {
            anchor_y: fragment.y(),
            seeds: 1,
            members: vec![fragment],
        }
    }

    /// Seeds move the anchor to their running mean; attached fragments do not.
    #[allow(clippy::cast_precision_loss)]
    fn seed(&mut self, fragment: Fragment) {
        self.seeds += 1;
        self.anchor_y += (fragment.y() - self.anchor_y) / self.seeds as f32;
        self.members.push(fragment);
    }

    fn distance(&self, fragment: &Fragment) -> f32 {
        (fragment.y() - self.anchor_y).abs()
    }

    fn into_row(self, page: u32) -> Row {
        let mut members = self.members;
        members.sort_by(|a, b| a.precedence().cmp(&b.precedence()));

        let mut fragments: Vec<Fragment> = Vec::with_capacity(members.len());
        let mut shadowed = Vec::new();
        for fragment in members {
            let loses = fragments
                .iter()
                .any(|kept| kept.tier < fragment.tier && kept.bounds.overlaps_horizontally(&fragment.bounds));
            if loses {
                shadowed.push(fragment);
            } else {
                fragments.push(fragment);
            }
        }
        fragments.sort_by(reading_order);

        Row {
            page,
            anchor_y: self.anchor_y,
            fragments,
            shadowed,
            continued_from: Vec::new(),
        }
    }
}

/// Left to right, then tier priority, then first-seen order.
fn reading_order(a: &Fragment, b: &Fragment) -> Ordering {
    a.bounds
        .x
        .total_cmp(&b.bounds.x)
        .then_with(|| a.precedence().cmp(&b.precedence()))
}

pub struct RowAligner<'a> {
    options: &'a AlignOptions,
    parser: &'a CourseCodeParser,
}

impl<'a> RowAligner<'a> {
    #[must_use]
    pub fn new(options: &'a AlignOptions, parser: &'a CourseCodeParser) -> Self {
        Self { options, parser }
    }

    fn tolerance(&self, tier: Tier) -> f32 {
        match tier {
            Tier::Ocr => self.options.row_tolerance.max(self.options.ocr_tolerance),
            _ => self.options.row_tolerance,
        }
    }

    /// Rows of every page, in page order and top to bottom within a page.
    /// Fragments must carry their document-wide `seq`.
    #[must_use]
    pub fn align(&self, fragments: Vec<Fragment>, pages: &[PageInfo]) -> Vec<Row> {
        let mut by_page: BTreeMap<u32, Vec<Fragment>> = BTreeMap::new();
        for fragment in fragments {
            by_page.entry(fragment.page).or_default().push(fragment);
        }

        let mut rows = by_page
            .into_iter()
            .flat_map(|(page, fragments)| self.align_page(page, fragments))
            .collect::<Vec<_>>();
        self.merge_continuations(&mut rows, pages);
        rows
    }

    fn align_page(&self, page: u32, mut fragments: Vec<Fragment>) -> Vec<Row> {
        let Some(seed_tier) = fragments.iter().map(|f| f.tier).min() else {
            return Vec::new();
        };
        fragments.sort_by(|a, b| a.precedence().cmp(&b.precedence()));
        let split = fragments.partition_point(|f| f.tier == seed_tier);
        let others = fragments.split_off(split);
        let mut seeds = fragments;
        seeds.sort_by(|a, b| a.y().total_cmp(&b.y()).then_with(|| a.seq.cmp(&b.seq)));

        let seed_tolerance = self.tolerance(seed_tier);
        let mut clusters: Vec<Cluster> = Vec::new();
        for fragment in seeds {
            match clusters.last_mut() {
                Some(cluster) if cluster.distance(&fragment) <= seed_tolerance => cluster.seed(fragment),
                _ => clusters.push(Cluster::new(fragment)),
            }
        }

        for fragment in others {
            let tolerance = self.tolerance(fragment.tier);
            let nearest = clusters
                .iter_mut()
                .map(|cluster| (cluster.distance(&fragment), cluster))
                .filter(|(distance, _)| *distance <= tolerance)
                .min_by(|(a, _), (b, _)| a.total_cmp(b));
            match nearest {
                Some((_, cluster)) => cluster.members.push(fragment),
                None => clusters.push(Cluster::new(fragment)),
            }
        }

        let mut rows = clusters
            .into_iter()
            .map(|cluster| cluster.into_row(page))
            .collect::<Vec<_>>();
        rows.sort_by(|a, b| {
            a.anchor_y
                .total_cmp(&b.anchor_y)
                .then_with(|| first_seq(a).cmp(&first_seq(b)))
        });
        debug!(page, ?seed_tier, rows = rows.len(), "page aligned");
        rows
    }

    /// Folds a row without any course into the course row on an adjacent
    /// page at the same relative height, when it completes that row.
    fn merge_continuations(&self, rows: &mut Vec<Row>, pages: &[PageInfo]) {
        let tolerance = self.options.continuation_tolerance;
        if tolerance <= 0.0 || rows.len() < 2 {
            return;
        }
        let height = |page: u32| {
            pages
                .iter()
                .find(|info| info.number == page)
                .map_or(792.0, |info| info.height)
                .max(1.0)
        };
        let offsets = rows
            .iter()
            .map(|row| row.anchor_y / height(row.page))
            .collect::<Vec<_>>();
        let parses = rows.iter().map(|row| self.parser.parse_row(row)).collect::<Vec<_>>();
        let has_code = parses
            .iter()
            .map(|parse| matches!(parse, RowParse::Parsed(_)))
            .collect::<Vec<_>>();
        // Excluded headings and rows with a course field stand on their own.
        let is_piece = rows
            .iter()
            .zip(&parses)
            .map(|(row, parse)| {
                matches!(parse, RowParse::Unparsed { course_text: None })
                    && !field_roles(row).contains(&FieldRole::Course)
            })
            .collect::<Vec<_>>();

        let mut targets: Vec<Option<usize>> = vec![None; rows.len()];
        for (index, row) in rows.iter().enumerate() {
            if !is_piece[index] {
                continue;
            }
            let target = rows
                .iter()
                .enumerate()
                .filter(|(other, candidate)| {
                    has_code[*other] && targets[*other].is_none() && candidate.page.abs_diff(row.page) == 1
                })
                .map(|(other, candidate)| ((offsets[other] - offsets[index]).abs(), candidate, other))
                .filter(|(delta, candidate, _)| *delta <= tolerance && completes(row, candidate))
                .min_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.page.cmp(&b.1.page)))
                .map(|(_, _, other)| other);
            targets[index] = target;
        }

        if targets.iter().all(Option::is_none) {
            return;
        }

        let mut continuations: BTreeMap<usize, Vec<Row>> = BTreeMap::new();
        let mut kept = Vec::with_capacity(rows.len());
        for (index, (row, target)) in rows.drain(..).zip(&targets).enumerate() {
            match target {
                Some(target) => continuations.entry(*target).or_default().push(row),
                None => kept.push((index, row)),
            }
        }

        for (index, row) in &mut kept {
            let Some(pieces) = continuations.remove(&*index) else {
                continue;
            };
            for piece in pieces {
                debug!(page = row.page, from = piece.page, "joined continuation row");
                row.continued_from.push(piece.page);
                row.fragments.extend(piece.fragments);
                row.shadowed.extend(piece.shadowed);
            }
            row.fragments.sort_by(reading_order);
        }
        rows.extend(kept.into_iter().map(|(_, row)| row));
    }
}

fn first_seq(row: &Row) -> usize {
    row.all_fragments().map(|f| f.seq).min().unwrap_or(usize::MAX)
}
