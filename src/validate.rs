// src/validate.rs

use crate::error::{Error, Result};
use crate::frame::ExtractedRow;
use crate::rules::{self, SumCheck};
use time::Date;
use tracing::warn;

/// Upper bound (exclusive) for percentage columns. Coverage can exceed 100%
/// when the registered population undercounts residents.
pub const PERCENT_CEILING: f64 = 500.0;

/// Components against a declared total. A missing total has nothing to check;
/// missing components count as zero.
pub fn check_sum(
    check: SumCheck,
    on: Date,
    components: &[Option<f64>],
    total: Option<f64>,
) -> Result<()> {
    let Some(total) = total else {
        return Ok(());
    };
    let Some(tolerance) = rules::tolerance(check, on) else {
        return Ok(());
    };
    let sum: f64 = components.iter().flatten().sum();
    if tolerance.accepts(sum, total) {
        Ok(())
    } else {
        Err(Error::SumMismatch {
            check: check.to_string(),
            date: on,
            sum,
            total,
        })
    }
}

/// Every `%` field must lie in [0, 500).
pub fn check_percentages(row: &ExtractedRow) -> Result<()> {
    for (field, value) in &row.fields {
        let Some(value) = value else { continue };
        if field.ends_with('%') && !(0.0..PERCENT_CEILING).contains(value) {
            return Err(Error::PercentOutOfRange {
                field: field.clone(),
                date: row.date,
                value: *value,
            });
        }
    }
    Ok(())
}

/// Dose-1 and dose-2 group lists must line up once doses were grouped.
pub fn check_dose_cardinality(on: Date, dose1: usize, dose2: usize) -> Result<()> {
    if dose1 == dose2 {
        return Ok(());
    }
    if on <= rules::DOSE_GROUPING_FROM {
        warn!(date = %on, dose1, dose2, "Dose group counts differ, accepted");
        return Ok(());
    }
    Err(Error::DoseCardinalityMismatch {
        date: on,
        dose1,
        dose2,
    })
}
