use super::tokens::numbers_in;
use crate::document::Page;
use crate::error::{Error, Result};
use crate::frame::{ExtractedRow, MANUFACTURERS, manufacturer_given};
use crate::rules::{self, SumCheck};
use crate::thai;
use crate::validate;
use regex::Regex;
use std::sync::LazyLock;
use tracing::{debug, info};

static MANUFACTURER_PAGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(ผลการฉีดวคัซีนสะสมจ|ผลการฉีดวัคซีนสะสมจ|านวนผู้ได้รับวัคซีน|านวนการได้รับวัคซีนสะสม|านวนผูไ้ดร้บัวคัซนี)",
    )
    .expect("invalid manufacturer page regex")
});

/// Doses by manufacturer, in `MANUFACTURERS` order.
type Doses = [Option<f64>; 5];

/// Per-dose totals and manufacturer splits read from the doses cell.
#[derive(Debug)]
struct Breakdown {
    totals: [Option<f64>; 3],
    doses: [Doses; 3],
}

/// Texts of the first grid column that has any content.
fn first_column(grid: &[Vec<String>]) -> Vec<&str> {
    let width = grid.iter().map(Vec::len).max().unwrap_or(0);
    (0..width)
        .map(|col| {
            grid.iter()
                .filter_map(|row| row.get(col))
                .map(|cell| cell.trim())
                .filter(|cell| !cell.is_empty())
                .collect::<Vec<_>>()
        })
        .find(|cells| !cells.is_empty())
        .unwrap_or_default()
}

/// The manufacturer set grew over time; each variant lists the numbers in a
/// fixed order. `1`, `2` and `3` are dose subtitles and are dropped first.
fn breakdown(doses_cell: &str, on: time::Date) -> Result<Breakdown> {
    let numbers: Vec<f64> = numbers_in(doses_cell)
        .into_iter()
        .filter(|n| ![1.0, 2.0, 3.0].contains(n))
        .collect();
    let lower = doses_cell.to_lowercase();
    let v = |n: f64| Some(n);

    let parsed = if lower.contains("moderna") {
        match numbers[..] {
            [t1, sv1, az1, sp1, pf1, md1, t2, sv2, az2, sp2, pf2, md2, t3, az3, pf3, md3] => Breakdown {
                totals: [v(t1), v(t2), v(t3)],
                doses: [
                    [v(sv1), v(az1), v(sp1), v(pf1), v(md1)],
                    [v(sv2), v(az2), v(sp2), v(pf2), v(md2)],
                    [None, v(az3), None, v(pf3), v(md3)],
                ],
            },
            _ => return Err(mismatch(&numbers, on)),
        }
    } else if lower.contains("pfizer") {
        match numbers[..] {
            [t1, sv1, az1, sp1, pf1, t2, sv2, az2, sp2, pf2, t3, ref dose3 @ ..] => {
                let third = match *dose3 {
                    [az3, pf3] => [None, v(az3), None, v(pf3), None],
                    [sv3, az3, sp3, pf3] => [v(sv3), v(az3), v(sp3), v(pf3), None],
                    _ => return Err(mismatch(&numbers, on)),
                };
                Breakdown {
                    totals: [v(t1), v(t2), v(t3)],
                    doses: [
                        [v(sv1), v(az1), v(sp1), v(pf1), None],
                        [v(sv2), v(az2), v(sp2), v(pf2), None],
                        third,
                    ],
                }
            }
            _ => return Err(mismatch(&numbers, on)),
        }
    } else if doses_cell.contains("Sinopharm") {
        match numbers[..] {
            [t1, sv1, az1, sp1, t2, sv2, az2, sp2] => Breakdown {
                totals: [v(t1), v(t2), None],
                doses: [
                    [v(sv1), v(az1), v(sp1), None, None],
                    [v(sv2), v(az2), v(sp2), None, None],
                    [None; 5],
                ],
            },
            _ => return Err(mismatch(&numbers, on)),
        }
    } else {
        let (t1, sv1, az1, t2, sv2, az2) = match numbers[..] {
            [t1, sv1, az1, t2, sv2, az2] => (t1, sv1, az1, t2, sv2, az2),
            // the second total sometimes ends up inside the subtitle brackets
            [t1, sv1, az1, sv2, az2] => (t1, sv1, az1, sv2 + az2, sv2, az2),
            _ => return Err(mismatch(&numbers, on)),
        };
        Breakdown {
            totals: [v(t1), v(t2), None],
            doses: [
                [v(sv1), v(az1), None, None, None],
                [v(sv2), v(az2), None, None, None],
                [None; 5],
            ],
        }
    };
    Ok(parsed)
}

fn mismatch(numbers: &[f64], on: time::Date) -> Error {
    Error::SchemaMismatch {
        layout: "manufacturer slide".into(),
        count: numbers.len(),
        date: on,
    }
}

/// Cumulative doses by manufacturer from a slide-deck page, `None` if the
/// page does not carry that table.
pub fn extract(page: &Page) -> Result<Option<ExtractedRow>> {
    if !MANUFACTURER_PAGE_RE.is_match(&page.text) || !page.text.contains("AstraZeneca") {
        return Ok(None);
    }
    let Some(grid) = page.grid.as_deref() else {
        debug!(page = page.index, "Manufacturer page without a table");
        return Ok(None);
    };
    let cells = first_column(grid);
    let [title, _daily, _subtitle, doses_cell, rest @ ..] = cells.as_slice() else {
        return Ok(None);
    };
    let Some(on) = thai::find_report_date(title) else {
        debug!(page = page.index, "Manufacturer table without a date");
        return Ok(None);
    };
    if on < rules::MANUFACTURER_SLIDES_FROM {
        return Ok(None);
    }

    // header and cell sometimes land in separate rows
    let doses_cell = match rest {
        [cell, _, _] if on < rules::SPLIT_SLIDE_HEADER_UNTIL => *cell,
        _ => *doses_cell,
    };
    let (_, doses_cell) = thai::take_date(doses_cell);

    let parsed = breakdown(&doses_cell, on)?;
    for (i, (total, doses)) in parsed.totals.iter().zip(&parsed.doses).enumerate() {
        let dose = i as u8 + 1;
        if *total == Some(0.0) {
            continue;
        }
        validate::check_sum(SumCheck::ManufacturerTotal { dose }, on, doses, *total)?;
    }

    let mut row = ExtractedRow::new(on);
    for (i, doses) in parsed.doses.iter().enumerate() {
        let dose = i as u8 + 1;
        row.extend(MANUFACTURERS.iter().map(|m| manufacturer_given(m, dose)), doses);
    }
    info!(date = %on, page = page.index, "Vac slides");
    Ok(Some(row))
}
