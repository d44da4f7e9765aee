// src/rules.rs
//
// Every report-date-gated decision lives here: layout variants, cutovers,
// tolerances, exempt dates, coverage requirements and per-date text patches.
// The values were worked out from anomalies in the published reports, so
// treat them as tunable constants rather than business rules.

use crate::layout::LayoutKind;
use time::Date;
use time::macros::date;

/// Provinces in a complete provincial table.
pub const PROVINCE_COUNT: usize = 77;

/// Dose-1 and dose-2 group lists must line up on reports after this date.
pub const DOSE_GROUPING_FROM: Date = date!(2021-04-24);

/// From here on every daily report carries the full population-group breakdown,
/// and validation failures stop ingestion instead of dropping the row.
pub const EXPECTED_COMPLETE_FROM: Date = date!(2021-07-12);

/// Provincial tables turn cumulative (and the percentage table appears).
pub const CUMULATIVE_TABLES_FROM: Date = date!(2021-08-01);

/// Slide decks before this date do not carry the manufacturer table.
pub const MANUFACTURER_SLIDES_FROM: Date = date!(2021-03-21);

/// Slide decks before this date sometimes split the doses header from its cell.
pub const SPLIT_SLIDE_HEADER_UNTIL: Date = date!(2021-10-14);

/// Accepted range for `sum(components) / total`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tolerance {
    pub lower: f64,
    pub upper: f64,
}

impl Tolerance {
    pub const EXACT: Tolerance = Tolerance {
        lower: 1.0,
        upper: 1.0,
    };

    pub const fn within(fraction: f64) -> Tolerance {
        Tolerance {
            lower: 1.0 - fraction,
            upper: 1.0 + fraction,
        }
    }

    pub fn accepts(&self, sum: f64, total: f64) -> bool {
        if *self == Tolerance::EXACT {
            return sum == total;
        }
        if total == 0.0 {
            return sum == 0.0;
        }
        let ratio = sum / total;
        self.lower <= ratio && ratio <= self.upper
    }
}

/// Daily summary group breakdowns round badly and sometimes omit a group.
pub const GROUP_SUM: Tolerance = Tolerance {
    lower: 0.945,
    upper: 1.01,
};

/// Slide-deck manufacturer totals after the cutover.
pub const MANUFACTURER_SUM: Tolerance = Tolerance::within(0.01);

/// Which arithmetic relation is being checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SumCheck {
    /// Population groups against the daily dose total.
    GroupSum,
    /// Manufacturer doses against the slide-deck dose total.
    ManufacturerTotal { dose: u8 },
    /// Per-manufacturer allocations against a provincial allocation total.
    AllocationTotal,
}

impl std::fmt::Display for SumCheck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SumCheck::GroupSum => write!(f, "group sum"),
            SumCheck::ManufacturerTotal { dose } => write!(f, "dose {dose} manufacturer total"),
            SumCheck::AllocationTotal => write!(f, "allocation total"),
        }
    }
}

/// Source defects that are passed through unchecked.
const SUM_EXEMPTIONS: &[(Date, SumCheck)] = &[
    (date!(2021-08-11), SumCheck::GroupSum),
    (date!(2021-08-15), SumCheck::ManufacturerTotal { dose: 3 }),
];

/// Tolerance for a check on a report date, `None` when the date is exempt.
pub fn tolerance(check: SumCheck, on: Date) -> Option<Tolerance> {
    if SUM_EXEMPTIONS.contains(&(on, check)) {
        return None;
    }
    // Slide-deck dose-2 totals never matched their manufacturer split.
    if check == (SumCheck::ManufacturerTotal { dose: 2 }) {
        return None;
    }
    Some(match check {
        SumCheck::GroupSum => GROUP_SUM,
        SumCheck::ManufacturerTotal { .. } if on < CUMULATIVE_TABLES_FROM => Tolerance::EXACT,
        SumCheck::ManufacturerTotal { .. } => MANUFACTURER_SUM,
        SumCheck::AllocationTotal if on < CUMULATIVE_TABLES_FROM => Tolerance::EXACT,
        SumCheck::AllocationTotal => MANUFACTURER_SUM,
    })
}

/// Whether the daily dose-2 frontline figure is known to be wrong.
pub fn frontline_dose2_is_garbage(on: Date) -> bool {
    on == date!(2021-08-11)
}

/// Literal repairs applied to a daily summary page before extraction.
pub struct TextPatch {
    pub on: Option<Date>,
    pub find: &'static str,
    pub replace: &'static str,
}

pub const DAILY_TEXT_PATCHES: &[TextPatch] = &[
    TextPatch {
        on: Some(date!(2021-05-06)),
        find: ",5 9 รำย",
        replace: "",
    },
    TextPatch {
        on: None,
        find: "ผัสผู้ป่วย 1,022",
        replace: "",
    },
];

/// How many values a provincial row must have for a shape to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Count {
    Exactly(usize),
    AtLeast(usize),
}

impl Count {
    fn admits(self, n: usize) -> bool {
        match self {
            Count::Exactly(c) => n == c,
            Count::AtLeast(c) => n >= c,
        }
    }
}

/// Half-open index range into a provincial row.
pub type Span = (usize, usize);

/// Named column arrangement of one provincial row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// Allocation split by manufacturer and dose, values 3..7.
    AllocationByDose,
    /// Sinovac and AstraZeneca allocations ahead of the 14 given columns.
    GivenWithAllocation,
    /// Doses 1-2 with percentages and five groups by two doses.
    Given,
    /// Pre-dose-grouping layout: allocation, target, given, percent, groups.
    Legacy,
    /// Two dose totals followed by five groups by two doses.
    DailyGiven,
    /// Population, allocation, givens and six groups by two doses.
    CumulativeGiven,
    /// Population and dose-1/2 coverage.
    Coverage,
    /// Cumulative table with optional allocation and givens blocks.
    Cumulative {
        alloc: Option<Span>,
        givens: Option<Span>,
        groups_from: usize,
    },
    /// Population with dose 1-3 counts and percentages.
    Percent,
}

/// One entry of the provincial shape table.
pub struct ShapeRule {
    pub layout: LayoutKind,
    pub count: Count,
    pub valid_from: Option<Date>,
    pub valid_to: Option<Date>,
    pub shape: Shape,
}

const fn rule(layout: LayoutKind, count: Count, shape: Shape) -> ShapeRule {
    ShapeRule {
        layout,
        count,
        valid_from: None,
        valid_to: None,
        shape,
    }
}

const fn cumulative(alloc: Option<Span>, givens: Option<Span>, groups_from: usize) -> Shape {
    Shape::Cumulative {
        alloc,
        givens,
        groups_from,
    }
}

/// Ordered: the first matching rule wins.
pub const SHAPES: &[ShapeRule] = &[
    rule(LayoutKind::Allocation, Count::AtLeast(7), Shape::AllocationByDose),
    rule(LayoutKind::Given, Count::Exactly(16), Shape::GivenWithAllocation),
    rule(LayoutKind::Given, Count::Exactly(14), Shape::Given),
    rule(LayoutKind::Legacy, Count::AtLeast(9), Shape::Legacy),
    // e.g. the 2021-05-11 report
    rule(LayoutKind::NewGiven, Count::Exactly(12), Shape::DailyGiven),
    // from 2021-07-20
    rule(LayoutKind::NewGiven, Count::Exactly(21), Shape::CumulativeGiven),
    rule(LayoutKind::July, Count::Exactly(5), Shape::Coverage),
    // givens collapsed into a single total, 2021-08-16
    rule(LayoutKind::July, Count::Exactly(21), cumulative(Some((1, 5)), None, 6)),
    // the single given total also counts Sinopharm, 2021-08-15
    ShapeRule {
        layout: LayoutKind::July,
        count: Count::Exactly(22),
        valid_from: None,
        valid_to: Some(date!(2021-10-04)),
        shape: cumulative(Some((1, 6)), None, 7),
    },
    // no allocations or givens, 2021-08-10
    rule(LayoutKind::July, Count::Exactly(17), cumulative(None, None, 2)),
    // 2021-08-06
    rule(LayoutKind::July, Count::Exactly(27), cumulative(Some((1, 5)), Some((5, 11)), 12)),
    // 2021-08-05
    rule(LayoutKind::July, Count::Exactly(33), cumulative(Some((1, 5)), Some((5, 11)), 12)),
    // 2021-10-05
    rule(LayoutKind::July, Count::Exactly(31), cumulative(Some((1, 6)), None, 7)),
    // 2021-11-17
    rule(LayoutKind::July, Count::Exactly(32), cumulative(Some((1, 7)), None, 8)),
    // 2021-08-10, then the over-60 extension of 2021-09-09 and 2021-10-05
    rule(LayoutKind::Percent, Count::Exactly(13), Shape::Percent),
    rule(LayoutKind::Percent, Count::Exactly(18), Shape::Percent),
    rule(LayoutKind::Percent, Count::Exactly(22), Shape::Percent),
];

/// Look up the shape for a classified row.
pub fn shape_for(layout: LayoutKind, count: usize, on: Date) -> Option<Shape> {
    SHAPES
        .iter()
        .filter(|r| r.layout == layout && r.count.admits(count))
        .filter(|r| r.valid_from.is_none_or(|from| on >= from))
        .filter(|r| r.valid_to.is_none_or(|to| on <= to))
        .map(|r| r.shape)
        .next()
}

/// What a provincial table must contain to be merged for a date range.
#[derive(Debug, Clone, Copy)]
pub enum Requirement {
    /// At least this many province rows.
    MinRows(usize),
    /// Exactly this many province rows.
    ExactRows(usize),
    /// This many non-null values in a column, otherwise allocations and
    /// givens came from different province sets.
    FilledColumn(&'static str, usize),
}

pub struct CoverageRule {
    pub from: Date,
    pub to: Date,
    pub requirement: Requirement,
}

pub const COVERAGE: &[CoverageRule] = &[
    CoverageRule {
        from: date!(2021-04-09),
        to: date!(2021-05-03),
        requirement: Requirement::FilledColumn("Vac Group Risk: Location 1 Cum", PROVINCE_COUNT),
    },
    CoverageRule {
        from: date!(2021-05-04),
        to: date!(2021-08-01),
        requirement: Requirement::MinRows(PROVINCE_COUNT),
    },
    CoverageRule {
        from: date!(2021-08-02),
        to: Date::MAX,
        requirement: Requirement::ExactRows(PROVINCE_COUNT),
    },
];

pub fn coverage_for(on: Date) -> Option<Requirement> {
    COVERAGE
        .iter()
        .find(|r| r.from <= on && on <= r.to)
        .map(|r| r.requirement)
}
