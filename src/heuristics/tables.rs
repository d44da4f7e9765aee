use super::tokens::{parse_cell, repair_digits, split_cells, starts_numeric};
use crate::document::Page;
use crate::error::{Disposition, Error, Policy, Result};
use crate::frame::ExtractedRow;
use crate::layout::{self, LayoutKind};
use crate::mapper;
use crate::provinces::ProvinceResolver;
use crate::thai;
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use time::Date;
use tracing::{debug, warn};

/// First words of heading continuation and footer lines inside a table body.
const NOISE_AREAS: [&str; 8] = [
    "เข็มที่",
    "และ",
    "จ",
    "ควำมครอบคลุม",
    "ตั้งแต่วันที่",
    "หมายเหตุ",
    "เขต",
    "เข็ม",
];

/// A body row with fewer cells ends the table.
const MIN_CELLS: usize = 5;

/// Fewer data rows than this means the heading was misread.
const MIN_TABLE_ROWS: usize = 8;

/// Provincial rows from one document, one row per province and row date.
#[derive(Debug, Clone)]
pub struct ProvincialTable {
    pub date: Date,
    pub rows: BTreeMap<(Date, String), ExtractedRow>,
    pub layouts: Vec<LayoutKind>,
}

impl ProvincialTable {
    pub fn new(date: Date) -> Self {
        Self {
            date,
            rows: BTreeMap::new(),
            layouts: Vec::new(),
        }
    }

    /// Rows for a province already seen on that date keep their values.
    pub fn add(&mut self, row: ExtractedRow) {
        let Some(province) = row.province.clone() else {
            return;
        };
        match self.rows.entry((row.date, province)) {
            Entry::Occupied(mut existing) => existing.get_mut().absorb(row),
            Entry::Vacant(slot) => {
                slot.insert(row);
            }
        }
    }

    /// Distinct provinces, whatever the row dates.
    pub fn len(&self) -> usize {
        self.rows
            .keys()
            .map(|(_, province)| province)
            .collect::<BTreeSet<_>>()
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Provinces with a value in `column`.
    pub fn count_filled(&self, column: &str) -> usize {
        self.rows
            .iter()
            .filter(|(_, r)| r.get(column).is_some())
            .map(|((_, province), _)| province)
            .collect::<BTreeSet<_>>()
            .len()
    }
}

#[derive(Debug, PartialEq)]
enum BodyLine {
    /// Heading continuation, subtotal or footer.
    Skip,
    /// Too few cells: the table is over.
    End,
    Row(String, Vec<f64>),
}

fn parse_line(line: &str) -> BodyLine {
    let line = repair_digits(line);
    let (area, rest) = line.split_once(' ').unwrap_or((line.as_ref(), ""));
    if NOISE_AREAS.contains(&area) || area == "รวม" || rest.is_empty() {
        return BodyLine::Skip;
    }
    let mut cells = split_cells(rest);
    if cells.len() < MIN_CELLS {
        return BodyLine::End;
    }
    // Row numbers come first on some layouts.
    let name = if starts_numeric(area) {
        cells.remove(0)
    } else {
        area
    };
    let values = cells.iter().filter_map(|c| parse_cell(c)).collect();
    BodyLine::Row(name.to_string(), values)
}

/// Scan a page for provincial tables and add their rows to `table`.
pub fn scan(
    page: &Page,
    on: Date,
    resolver: &dyn ProvinceResolver,
    policy: &Policy,
    table: &mut ProvincialTable,
) -> Result<()> {
    let lines = page.lines();
    let year = thai::buddhist_year(on);

    for block in layout::split_blocks(&lines, &year) {
        let Some(kind) = layout::classify(&block.headings, on) else {
            continue;
        };
        debug!(date = %on, page = page.index, layout = %kind, "Provincial table");

        let mut added: Option<usize> = None;
        for line in &block.body {
            let (name, values) = match parse_line(line) {
                BodyLine::Row(name, values) => (name, values),
                BodyLine::Skip => continue,
                BodyLine::End => break,
            };
            let count = added.get_or_insert(0);
            *count += 1;

            let Some(province) = resolver.resolve(&name) else {
                continue;
            };
            match mapper::map_row(kind, &values, on, &province) {
                Ok(row) => table.add(row),
                Err(e) => match policy.disposition(&e, on) {
                    Disposition::Skip => warn!(date = %on, %province, error = %e, "Row dropped"),
                    Disposition::Abort => return Err(e),
                },
            }
        }

        if let Some(n) = added {
            if n < MIN_TABLE_ROWS {
                return Err(Error::LayoutContradiction {
                    date: on,
                    detail: format!("{kind} table with only {n} rows"),
                });
            }
            table.layouts.push(kind);
        }
    }
    Ok(())
}
