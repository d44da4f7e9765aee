// src/mapper.rs
//
// Turns one flat provincial row into named fields. The row shape comes from
// `rules::shape_for`; everything here is positional.

use crate::error::{Error, Result};
use crate::frame::{
    ExtractedRow, GROUPS, MANUFACTURERS, POPULATION, allocated, allocated_dose, given_cum, given_pct, group_cum,
};
use crate::layout::LayoutKind;
use crate::rules::{self, Shape, Span, SumCheck};
use crate::validate;
use time::Date;

/// Groups reported before the pregnant and student breakdowns existed.
const GROUPS_SIX: [&str; 6] = [
    "Medical Staff",
    "Health Volunteer",
    "Other Frontline Staff",
    "Over 60",
    "Risk: Disease",
    "Risk: Location",
];

/// As above, before volunteers were counted separately.
const GROUPS_FIVE: [&str; 5] = [
    "Medical Staff",
    "Other Frontline Staff",
    "Over 60",
    "Risk: Disease",
    "Risk: Location",
];

/// Cumulative tables carry three doses for all eight groups.
const CUMULATIVE_GROUP_VALUES: usize = GROUPS.len() * 3;

fn given_columns(doses: u8) -> Vec<String> {
    (1..=doses)
        .flat_map(|d| [given_cum(d), given_pct(d)])
        .collect()
}

/// Group-major: every dose of the first group, then the next group.
fn group_columns(groups: &[&str], doses: u8) -> Vec<String> {
    groups
        .iter()
        .flat_map(|g| (1..=doses).map(move |d| group_cum(g, d)))
        .collect()
}

fn present(values: &[f64]) -> Vec<Option<f64>> {
    values.iter().copied().map(Some).collect()
}

fn slice(values: &[f64], (from, to): Span, on: Date) -> Result<&[f64]> {
    values
        .get(from..to)
        .ok_or_else(|| Error::LayoutContradiction {
            date: on,
            detail: format!("span {from}..{to} outside a {}-value row", values.len()),
        })
}

/// Doses 1-2 with percentages, then five groups by two doses.
fn five_by_two(row: &mut ExtractedRow, values: &[f64]) {
    let columns = given_columns(2)
        .into_iter()
        .chain(group_columns(&GROUPS_FIVE, 2));
    row.extend(columns, &present(values));
}

/// Manufacturer allocations in `MANUFACTURERS` order, and the stated total.
/// The column set grew over time: Pfizer first, then Sinopharm, then Moderna.
fn split_allocations(alloc: &[Option<f64>], on: Date) -> Result<([Option<f64>; 5], Option<f64>)> {
    let Some((total, parts)) = alloc.split_last() else {
        return Ok(([None; 5], None));
    };
    let by_manufacturer = match *parts {
        [sv, az, pf] => [sv, az, None, pf, None],
        [sv, az, sp, pf] => [sv, az, sp, pf, None],
        [sv, az, sp, pf, md] => [sv, az, sp, pf, md],
        _ => {
            return Err(Error::LayoutContradiction {
                date: on,
                detail: format!("{} allocation values", alloc.len()),
            });
        }
    };
    Ok((by_manufacturer, *total))
}

/// Medical staff had three doses while the rest had two: pad the missing
/// third doses, then the student group that did not exist yet.
fn pad_groups(mut groups: Vec<Option<f64>>) -> Vec<Option<f64>> {
    if groups.len() == 15 {
        let mut at = 5;
        while at < 21 {
            groups.insert(at, None);
            at += 3;
        }
    }
    if groups.len() < CUMULATIVE_GROUP_VALUES {
        groups.extend([None; 3]);
    }
    groups
}

fn map_cumulative(
    row: &mut ExtractedRow,
    values: &[f64],
    alloc: Option<Span>,
    givens: Option<Span>,
    groups_from: usize,
    on: Date,
) -> Result<()> {
    let alloc = match alloc {
        Some(span) => present(slice(values, span, on)?),
        None => Vec::new(),
    };
    let (by_manufacturer, total) = split_allocations(&alloc, on)?;
    validate::check_sum(SumCheck::AllocationTotal, on, &by_manufacturer, total)?;

    if let Some(span) = givens {
        row.extend(given_columns(3), &present(slice(values, span, on)?));
    }

    let groups = pad_groups(present(slice(values, (groups_from, values.len()), on)?));
    row.extend(group_columns(&GROUPS, 3), &groups);
    row.set(POPULATION, values.first().copied());

    let manufacturers = MANUFACTURERS.iter().map(|m| allocated(m));
    row.extend(manufacturers, &by_manufacturer);
    Ok(())
}

/// Map a provincial row for `province` on report date `on`.
pub fn map_row(layout: LayoutKind, values: &[f64], on: Date, province: &str) -> Result<ExtractedRow> {
    let shape = rules::shape_for(layout, values.len(), on).ok_or_else(|| Error::SchemaMismatch {
        layout: layout.to_string(),
        count: values.len(),
        date: on,
    })?;

    let mut row = ExtractedRow::for_province(on, province);
    match shape {
        Shape::AllocationByDose => {
            let (sv1, sv2, az1, az2) = (values[3], values[4], values[5], values[6]);
            row.extend(
                [
                    allocated_dose("Sinovac", 1),
                    allocated_dose("Sinovac", 2),
                    allocated_dose("AstraZeneca", 1),
                    allocated_dose("AstraZeneca", 2),
                    allocated("Sinovac"),
                    allocated("AstraZeneca"),
                ],
                &present(&[sv1, sv2, az1, az2, sv1 + sv2, az1 + az2]),
            );
        }
        Shape::GivenWithAllocation => {
            row.extend(
                [allocated("Sinovac"), allocated("AstraZeneca")],
                &present(&values[..2]),
            );
            five_by_two(&mut row, &values[2..]);
        }
        Shape::Given => five_by_two(&mut row, values),
        Shape::Legacy => {
            // alloc, target, given, percent, then groups
            let alloc = values[0];
            row.set(given_cum(1), Some(values[2]));
            row.set(given_pct(1), Some(values[3]));
            let groups = [
                "Medical Staff",
                "Other Frontline Staff",
                "Risk: Disease",
                "Over 60",
                "Risk: Location",
            ];
            row.extend(groups.map(|g| group_cum(g, 1)), &present(&values[4..9]));
            row.set(allocated_dose("Sinovac", 1), Some(alloc));
            row.set(allocated("Sinovac"), Some(alloc));
        }
        Shape::DailyGiven => {
            row.set(given_cum(1), Some(values[0]));
            row.set(given_cum(2), Some(values[1]));
            row.extend(group_columns(&GROUPS_FIVE, 2), &present(&values[2..]));
        }
        Shape::CumulativeGiven => {
            let (sv, az, total) = (values[1], values[2], values[3]);
            validate::check_sum(SumCheck::AllocationTotal, on, &[Some(sv), Some(az)], Some(total))?;
            row.extend(given_columns(2), &present(&values[4..8]));
            row.extend(group_columns(&GROUPS_SIX, 2), &present(&values[9..21]));
            row.set(POPULATION, Some(values[0]));
            row.set(allocated("Sinovac"), Some(sv));
            row.set(allocated("AstraZeneca"), Some(az));
        }
        Shape::Coverage => {
            row.set(POPULATION, Some(values[0]));
            row.extend(given_columns(2), &present(&values[1..5]));
        }
        Shape::Cumulative {
            alloc,
            givens,
            groups_from,
        } => map_cumulative(&mut row, values, alloc, givens, groups_from, on)?,
        Shape::Percent => {
            row.set(POPULATION, Some(values[0]));
            row.extend(given_columns(3), &present(&values[1..7]));
        }
    }

    validate::check_percentages(&row)?;
    Ok(row)
}
