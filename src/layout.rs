// src/layout.rs

use regex::Regex;
use std::fmt;
use std::sync::LazyLock;
use time::Date;
use time::macros::date;

/// Provincial table layouts seen in the daily reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayoutKind {
    /// Allocation by manufacturer and dose (six dose markers).
    Allocation,
    /// Doses given with group breakdown (ten dose markers).
    Given,
    /// Pre-dose-grouping table headed "เข็มที่ 1 และ ...".
    Legacy,
    /// Given table with twelve dose markers.
    NewGiven,
    /// Coverage / cumulative table introduced in July 2021.
    July,
    /// Coverage percentages per population, from August 2021.
    Percent,
}

impl fmt::Display for LayoutKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LayoutKind::Allocation => "allocation",
            LayoutKind::Given => "given",
            LayoutKind::Legacy => "legacy given",
            LayoutKind::NewGiven => "new given",
            LayoutKind::July => "july",
            LayoutKind::Percent => "percent",
        };
        f.write_str(name)
    }
}

/// "เข็มที่ 1" / "เข็มที่ 2" with the glyph variants the extractor produces.
static DOSE_MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(เข็ม(?:ที|ที่|ท่ี)\s.?(?:1|2)\s*)").expect("invalid dose marker regex")
});

/// "(ร้อยละ)" column heading.
static PERCENT_HEADING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\( *(?:ร้อยละ|รอ้ยละ) *\)").expect("invalid percent heading regex")
});

static LEGACY_HEADING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(เข็มที่ 1 วัคซีน|เข็มท่ี 1 และ|เข็มที ่1 และ)")
        .expect("invalid legacy heading regex")
});

/// What a heading block says about its table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeadingSignature {
    /// Most dose markers on any one heading line.
    pub dose_markers: usize,
    pub legacy: bool,
    pub percent_heading: bool,
}

fn max_matches(re: &Regex, headings: &[&str]) -> usize {
    headings
        .iter()
        .map(|h| re.find_iter(h).count())
        .max()
        .unwrap_or(0)
}

pub fn signature(headings: &[&str]) -> HeadingSignature {
    HeadingSignature {
        dose_markers: max_matches(&DOSE_MARKER_RE, headings),
        legacy: max_matches(&LEGACY_HEADING_RE, headings) > 0,
        percent_heading: max_matches(&PERCENT_HEADING_RE, headings) > 0,
    }
}

#[derive(Debug, Clone, Copy)]
enum Condition {
    DoseMarkers(usize),
    Legacy,
    PercentHeading,
}

struct HeadingRule {
    condition: Condition,
    /// Exclusive lower bound on the report date.
    after: Option<Date>,
    layout: LayoutKind,
}

const fn markers(n: usize, layout: LayoutKind) -> HeadingRule {
    HeadingRule {
        condition: Condition::DoseMarkers(n),
        after: None,
        layout,
    }
}

/// Checked top to bottom; the bare "(ร้อยละ)" heading is the catch-all.
const HEADING_RULES: &[HeadingRule] = &[
    markers(12, LayoutKind::NewGiven),
    markers(10, LayoutKind::Given),
    markers(6, LayoutKind::Allocation),
    markers(14, LayoutKind::July),
    markers(16, LayoutKind::July),
    HeadingRule {
        condition: Condition::Legacy,
        after: None,
        layout: LayoutKind::Legacy,
    },
    HeadingRule {
        condition: Condition::PercentHeading,
        after: Some(date!(2021-08-01)),
        layout: LayoutKind::Percent,
    },
    HeadingRule {
        condition: Condition::PercentHeading,
        after: None,
        layout: LayoutKind::July,
    },
];

/// Classify a heading block. `None` means "not a data table", skip it.
pub fn classify(headings: &[&str], on: Date) -> Option<LayoutKind> {
    let sig = signature(headings);
    HEADING_RULES
        .iter()
        .filter(|r| r.after.is_none_or(|after| on > after))
        .find(|r| match r.condition {
            Condition::DoseMarkers(n) => sig.dose_markers == n,
            Condition::Legacy => sig.legacy,
            Condition::PercentHeading => sig.percent_heading,
        })
        .map(|r| r.layout)
}

/// A heading run and the body lines that follow it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Block<'a> {
    pub headings: Vec<&'a str>,
    pub body: Vec<&'a str>,
}

/// Whether a line starts a heading run. Lines carrying the report year are
/// date lines, not headings.
pub fn is_heading(line: &str, year_marker: &str) -> bool {
    (PERCENT_HEADING_RE.is_match(line)
        || DOSE_MARKER_RE.is_match(line)
        || LEGACY_HEADING_RE.is_match(line))
        && !line.contains(year_marker)
}

/// Partition lines into alternating heading and body runs. Text before the
/// first heading is discarded.
pub fn split_blocks<'a>(lines: &[&'a str], year_marker: &str) -> Vec<Block<'a>> {
    let mut runs: Vec<Vec<&'a str>> = vec![Vec::new()];
    let mut in_heading = false;
    for &line in lines {
        let heading = is_heading(line, year_marker);
        if heading != in_heading {
            runs.push(Vec::new());
            in_heading = heading;
        }
        if let Some(run) = runs.last_mut() {
            run.push(line);
        }
    }

    let mut blocks = Vec::new();
    let mut runs = runs.into_iter().skip(1);
    while let Some(headings) = runs.next() {
        let body = runs.next().unwrap_or_default();
        blocks.push(Block { headings, body });
    }
    blocks
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn doses(n: usize) -> String {
        (0..n)
            .map(|i| format!("เข็มที่ {}", i % 2 + 1))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn test_marker_counts_pick_layout() {
        let on = date!(2021-06-01);
        assert_eq!(classify(&[&doses(10)], on), Some(LayoutKind::Given));
        assert_eq!(classify(&[&doses(12)], on), Some(LayoutKind::NewGiven));
        assert_eq!(classify(&[&doses(6)], on), Some(LayoutKind::Allocation));
        assert_eq!(classify(&[&doses(16)], on), Some(LayoutKind::July));
    }

    #[test]
    fn test_max_over_lines_not_sum() {
        let a = doses(6);
        let b = doses(4);
        assert_eq!(
            classify(&[a.as_str(), b.as_str()], date!(2021-06-01)),
            Some(LayoutKind::Allocation)
        );
    }

    #[test]
    fn test_legacy_heading() {
        assert_eq!(
            classify(&["จังหวัด เข็มท่ี 1 และ เข็มที่ 2"], date!(2021-03-20)),
            Some(LayoutKind::Legacy)
        );
    }

    #[test]
    fn test_percent_heading_depends_on_date() {
        let h = ["ประชากร เข็มที่ 1 (ร้อยละ)"];
        assert_eq!(classify(&h, date!(2021-07-20)), Some(LayoutKind::July));
        assert_eq!(classify(&h, date!(2021-08-02)), Some(LayoutKind::Percent));
    }

    #[test]
    fn test_unknown_heading_unclassified() {
        assert_eq!(classify(&[&doses(3)], date!(2021-06-01)), None);
    }

    #[test]
    fn test_split_blocks_pairs_headings_with_bodies() {
        let lines = [
            "ณ วันที่ 23 มิถุนายน 2564",
            "จังหวัด เข็มที่ 1 เข็มที่ 2",
            "(ร้อยละ)",
            "กรุงเทพมหานคร 1 2 3 4 5",
            "นนทบุรี 1 2 3 4 5",
            "จังหวัด เข็มที่ 1",
        ];
        let blocks = split_blocks(&lines, "2564");
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].headings, vec![lines[1], lines[2]]);
        assert_eq!(blocks[0].body, vec![lines[3], lines[4]]);
        assert_eq!(blocks[1].headings, vec![lines[5]]);
        assert!(blocks[1].body.is_empty());
    }

    #[test]
    fn test_year_line_is_not_a_heading() {
        assert!(!is_heading("ข้อมูล เข็มที่ 1 ณ 23 มิถุนายน 2564", "2564"));
        assert!(is_heading("ข้อมูล เข็มที่ 1", "2564"));
    }
}
