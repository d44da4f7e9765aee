use crate::error::{Error, Result};
use regex::Regex;
use std::borrow::Cow;
use std::sync::LazyLock;

static NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d[\d,]*(?:\.\d+)?").expect("invalid number regex"));

/// A digit group split off by a stray space, e.g. "1 ,234".
static SPLIT_GROUP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d) +(,\d)").expect("invalid split-group regex"));

/// Table cell delimiter: a number, or a dash standing for zero.
static NUM_OR_DASH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([0-9,.]+|-)-?").expect("invalid cell regex"));

/// Rejoin digit groups that the text extractor broke apart with spaces.
pub fn repair_digits(text: &str) -> Cow<'_, str> {
    SPLIT_GROUP_RE.replace_all(text, "$1$2")
}

/// Parse "1,234" or "12.5". Separators at either end are ignored.
pub fn parse_number(token: &str) -> Option<f64> {
    let cleaned = token.trim().trim_matches(',').replace(',', "");
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok()
}

/// Every number in `text`, in order.
pub fn numbers_in(text: &str) -> Vec<f64> {
    NUMBER_RE
        .find_iter(text)
        .filter_map(|m| parse_number(m.as_str()))
        .collect()
}

/// Anchor patterns tried in priority order, with an optional terminator.
#[derive(Debug, Clone, Default)]
pub struct Anchor<'a> {
    patterns: Vec<&'a str>,
    until: Option<&'a str>,
    require_until: bool,
    required: bool,
}

impl<'a> Anchor<'a> {
    pub fn new(patterns: &[&'a str]) -> Self {
        Self {
            patterns: patterns.to_vec(),
            ..Self::default()
        }
    }

    /// Stop collecting numbers at the first match of `pattern`.
    pub fn until(mut self, pattern: &'a str) -> Self {
        self.until = Some(pattern);
        self
    }

    /// Only accept an anchor whose terminator is also present.
    pub fn require_until(mut self) -> Self {
        self.require_until = true;
        self
    }

    /// Fail with `AnchorNotFound` instead of yielding nothing.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    fn not_found(&self) -> Error {
        Error::AnchorNotFound {
            anchors: self.patterns.iter().map(|p| p.to_string()).collect(),
        }
    }
}

/// Numbers found after an anchor.
#[derive(Debug, Clone, PartialEq)]
pub struct Found<'t> {
    pub numbers: Vec<f64>,
    /// The anchor text that matched.
    pub matched: &'t str,
    /// Text between the anchor and the terminator.
    pub segment: &'t str,
    /// Text from the terminator on.
    pub rest: &'t str,
}

struct Section<'t> {
    matched: &'t str,
    segment: &'t str,
    rest: &'t str,
}

/// Locate the first anchor that matches and split off the text it governs.
fn locate<'t>(text: &'t str, anchor: &Anchor<'_>) -> Result<Option<Section<'t>>> {
    let until = anchor.until.map(Regex::new).transpose()?;
    for pattern in &anchor.patterns {
        let re = Regex::new(pattern)?;
        let Some(m) = re.find(text) else {
            continue;
        };
        let after = &text[m.end()..];
        let (segment, rest) = match until.as_ref().and_then(|u| u.find(after)) {
            Some(u) => (&after[..u.start()], &after[u.start()..]),
            None if anchor.require_until && until.is_some() => continue,
            None => (after, ""),
        };
        return Ok(Some(Section {
            matched: m.as_str(),
            segment,
            rest,
        }));
    }
    Ok(None)
}

/// All numbers between the first matching anchor and its terminator.
pub fn next_numbers<'t>(text: &'t str, anchor: &Anchor<'_>) -> Result<Found<'t>> {
    match locate(text, anchor)? {
        Some(section) => Ok(Found {
            numbers: numbers_in(section.segment),
            matched: section.matched,
            segment: section.segment,
            rest: section.rest,
        }),
        None if anchor.required => Err(anchor.not_found()),
        None => Ok(Found {
            numbers: Vec::new(),
            matched: "",
            segment: "",
            rest: text,
        }),
    }
}

/// The first number after the first matching anchor, and the text after it.
pub fn next_number<'t>(text: &'t str, anchor: &Anchor<'_>) -> Result<(Option<f64>, &'t str)> {
    let Some(Section { segment, .. }) = locate(text, anchor)? else {
        if anchor.required {
            return Err(anchor.not_found());
        }
        return Ok((None, text));
    };
    let Some(m) = NUMBER_RE.find(segment) else {
        if anchor.required {
            return Err(anchor.not_found());
        }
        return Ok((None, text));
    };
    // `segment` borrows from `text`, so the offset carries over.
    let offset = segment.as_ptr() as usize - text.as_ptr() as usize;
    Ok((parse_number(m.as_str()), &text[offset + m.end()..]))
}

/// Split a table line into text pieces and number-or-dash cells, in order.
pub fn split_cells(line: &str) -> Vec<&str> {
    let mut cells = Vec::new();
    let mut last = 0;
    for caps in NUM_OR_DASH_RE.captures_iter(line) {
        let whole = caps.get(0).expect("group 0 always present");
        let cell = caps.get(1).expect("group 1 always participates");
        cells.push(line[last..whole.start()].trim());
        cells.push(cell.as_str());
        last = whole.end();
    }
    cells.push(line[last..].trim());
    cells.retain(|c| !c.is_empty());
    cells
}

/// Whether a token opens with a number or a dash (row numbers, blank cells).
pub fn starts_numeric(token: &str) -> bool {
    NUM_OR_DASH_RE.find(token).is_some_and(|m| m.start() == 0)
}

/// A table cell as a number. A lone dash is an explicit zero.
pub fn parse_cell(cell: &str) -> Option<f64> {
    if cell == "-" {
        return Some(0.0);
    }
    parse_number(cell)
}
