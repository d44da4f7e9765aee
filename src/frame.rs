// src/frame.rs

use crate::error::{Error, Result};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;
use time::Date;
use tracing::warn;

/// Field name → value. `None` is an explicit "not reported".
pub type Fields = BTreeMap<String, Option<f64>>;

pub const GROUPS: [&str; 8] = [
    "Medical Staff",
    "Health Volunteer",
    "Other Frontline Staff",
    "Over 60",
    "Risk: Disease",
    "Risk: Pregnant",
    "Risk: Location",
    "Student",
];

pub const MANUFACTURERS: [&str; 5] = ["Sinovac", "AstraZeneca", "Sinopharm", "Pfizer", "Moderna"];

pub const POPULATION: &str = "Vac Population";
pub const PROBLEM_ANAPHYLAXIS: &str = "Vac Problem Anaphylaxis";
pub const PROBLEM_POLYNEUROPATHY: &str = "Vac Problem Polyneuropathy";

pub fn given_cum(dose: u8) -> String {
    format!("Vac Given {dose} Cum")
}

pub fn given_pct(dose: u8) -> String {
    format!("Vac Given {dose} %")
}

pub fn group_cum(group: &str, dose: u8) -> String {
    format!("Vac Group {group} {dose} Cum")
}

pub fn medical_all_cum(dose: u8) -> String {
    format!("Vac Group Medical All {dose} Cum")
}

pub fn allocated(manufacturer: &str) -> String {
    format!("Vac Allocated {manufacturer}")
}

pub fn allocated_dose(manufacturer: &str, dose: u8) -> String {
    format!("Vac Allocated {manufacturer} {dose}")
}

pub fn manufacturer_given(manufacturer: &str, dose: u8) -> String {
    format!("Vac Given {manufacturer} {dose} Cum")
}

/// Fixed column registry for one output series.
#[derive(Debug, Clone)]
pub struct Schema {
    name: &'static str,
    columns: BTreeSet<String>,
}

impl Schema {
    pub fn new(name: &'static str, columns: impl IntoIterator<Item = String>) -> Self {
        Self {
            name,
            columns: columns.into_iter().collect(),
        }
    }

    /// National daily summary.
    pub fn daily() -> Self {
        let mut cols = Vec::new();
        for dose in 1..=3 {
            cols.push(given_cum(dose));
            cols.push(medical_all_cum(dose));
            cols.extend(GROUPS.iter().map(|g| group_cum(g, dose)));
        }
        cols.push(allocated("Sinovac"));
        cols.push(allocated("AstraZeneca"));
        cols.push(PROBLEM_ANAPHYLAXIS.to_string());
        cols.push(PROBLEM_POLYNEUROPATHY.to_string());
        Self::new("daily", cols)
    }

    /// Per-province tables.
    pub fn provincial() -> Self {
        let mut cols = vec![POPULATION.to_string()];
        for dose in 1..=3 {
            cols.push(given_cum(dose));
            cols.push(given_pct(dose));
            cols.extend(GROUPS.iter().map(|g| group_cum(g, dose)));
        }
        cols.extend(MANUFACTURERS.iter().map(|m| allocated(m)));
        for m in ["Sinovac", "AstraZeneca"] {
            cols.push(allocated_dose(m, 1));
            cols.push(allocated_dose(m, 2));
        }
        Self::new("provincial", cols)
    }

    /// Slide-deck doses by manufacturer.
    pub fn manufacturer() -> Self {
        let cols = (1..=3).flat_map(|dose| MANUFACTURERS.iter().map(move |m| manufacturer_given(m, dose)));
        Self::new("manufacturer", cols)
    }

    /// Coldchain dashboard figures.
    pub fn coldchain() -> Self {
        Self::new(
            "coldchain",
            ["Vac Given", "Vac Delivered", "Vac Imported"].map(String::from),
        )
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn contains(&self, column: &str) -> bool {
        self.columns.contains(column)
    }
}

/// A candidate observation from one document.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedRow {
    pub date: Date,
    pub province: Option<String>,
    pub fields: Fields,
}

impl ExtractedRow {
    pub fn new(date: Date) -> Self {
        Self {
            date,
            province: None,
            fields: Fields::new(),
        }
    }

    pub fn for_province(date: Date, province: impl Into<String>) -> Self {
        Self {
            province: Some(province.into()),
            ..Self::new(date)
        }
    }

    pub fn set(&mut self, column: impl Into<String>, value: Option<f64>) {
        self.fields.insert(column.into(), value);
    }

    pub fn with(mut self, column: impl Into<String>, value: Option<f64>) -> Self {
        self.set(column, value);
        self
    }

    /// Zip column names with values.
    pub fn extend<I, S>(&mut self, columns: I, values: &[Option<f64>])
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for (col, v) in columns.into_iter().zip(values) {
            self.set(col, *v);
        }
    }

    pub fn get(&self, column: &str) -> Option<f64> {
        self.fields.get(column).copied().flatten()
    }

    /// Fill this row's gaps from `other`; values already present stay.
    pub fn absorb(&mut self, other: ExtractedRow) {
        for (col, v) in other.fields {
            match self.fields.get(&col) {
                Some(Some(_)) => {}
                _ => {
                    self.fields.insert(col, v);
                }
            }
        }
    }
}

/// What a merge did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub filled: usize,
    pub kept: usize,
    pub conflicts: usize,
}

impl std::ops::AddAssign for MergeStats {
    fn add_assign(&mut self, rhs: Self) {
        self.filled += rhs.filled;
        self.kept += rhs.kept;
        self.conflicts += rhs.conflicts;
    }
}

/// Accumulated time series. A value, once recorded, never changes.
#[derive(Debug, Clone)]
pub struct Frame<K: Ord> {
    schema: Schema,
    rows: BTreeMap<K, Fields>,
}

/// One serialised frame row.
#[derive(Debug, Serialize)]
pub struct Record<'a, K: Serialize> {
    pub key: &'a K,
    pub values: &'a Fields,
}

impl<K: Ord + Clone + Debug> Frame<K> {
    pub fn new(schema: Schema) -> Self {
        Self {
            schema,
            rows: BTreeMap::new(),
        }
    }

    /// Fill-missing merge of one row. Unknown columns reject the whole row.
    pub fn merge_row(&mut self, key: K, fields: &Fields) -> Result<MergeStats> {
        if let Some(col) = fields.keys().find(|c| !self.schema.contains(c)) {
            return Err(Error::UnknownColumn {
                series: self.schema.name(),
                column: col.clone(),
            });
        }

        let mut stats = MergeStats::default();
        let existing = self.rows.entry(key.clone()).or_default();
        for (col, value) in fields {
            match existing.get(col) {
                Some(Some(old)) => {
                    stats.kept += 1;
                    if let Some(new) = value {
                        if new != old {
                            stats.conflicts += 1;
                            warn!(
                                series = self.schema.name(),
                                key = ?key,
                                column = %col,
                                kept = old,
                                ignored = new,
                                "Conflicting value ignored"
                            );
                        }
                    }
                }
                _ => {
                    if value.is_some() {
                        stats.filled += 1;
                    }
                    existing.insert(col.clone(), *value);
                }
            }
        }
        Ok(stats)
    }

    /// Fill-missing merge of a whole frame.
    pub fn merge_frame(&mut self, other: &Frame<K>) -> Result<MergeStats> {
        let mut stats = MergeStats::default();
        for (key, fields) in &other.rows {
            stats += self.merge_row(key.clone(), fields)?;
        }
        Ok(stats)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }
}

#[cfg(test)]
impl<K: Ord + Clone + Debug> Frame<K> {
    pub fn get(&self, key: &K, column: &str) -> Option<f64> {
        self.rows.get(key)?.get(column).copied().flatten()
    }

    pub fn row(&self, key: &K) -> Option<&Fields> {
        self.rows.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl<K: Ord + Clone + Debug + Serialize> Frame<K> {
    pub fn records(&self) -> Vec<Record<'_, K>> {
        self.rows
            .iter()
            .map(|(key, values)| Record { key, values })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use time::macros::date;

    fn schema_ab() -> Schema {
        Schema::new("test", ["A", "B"].map(String::from))
    }

    fn fields(pairs: &[(&str, Option<f64>)]) -> Fields {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_first_value_wins_nulls_fill() {
        let mut frame = Frame::new(schema_ab());
        let day = date!(2021-08-10);
        frame
            .merge_row(day, &fields(&[("A", Some(5.0)), ("B", None)]))
            .unwrap();
        let stats = frame
            .merge_row(day, &fields(&[("A", Some(9.0)), ("B", Some(3.0))]))
            .unwrap();

        assert_eq!(frame.get(&day, "A"), Some(5.0));
        assert_eq!(frame.get(&day, "B"), Some(3.0));
        assert_eq!(
            stats,
            MergeStats {
                filled: 1,
                kept: 1,
                conflicts: 1
            }
        );
    }

    #[test]
    fn test_unknown_column_rejects_row() {
        let mut frame = Frame::new(schema_ab());
        let err = frame
            .merge_row(date!(2021-08-10), &fields(&[("A", Some(1.0)), ("Z", Some(2.0))]))
            .unwrap_err();
        assert!(matches!(err, Error::UnknownColumn { .. }));
        assert!(frame.is_empty());
    }

    #[test]
    fn test_absorb_keeps_existing() {
        let day = date!(2021-08-10);
        let mut row = ExtractedRow::for_province(day, "Bangkok").with("A", Some(1.0));
        row.absorb(
            ExtractedRow::for_province(day, "Bangkok")
                .with("A", Some(2.0))
                .with("B", Some(3.0)),
        );
        assert_eq!(row.get("A"), Some(1.0));
        assert_eq!(row.get("B"), Some(3.0));
    }

    #[test]
    fn test_registries_cover_generated_names() {
        assert!(Schema::daily().contains("Vac Group Risk: Location 2 Cum"));
        assert!(Schema::provincial().contains("Vac Allocated AstraZeneca 2"));
        assert!(Schema::provincial().contains("Vac Given 3 %"));
        assert!(Schema::manufacturer().contains("Vac Given Moderna 3 Cum"));
        assert!(!Schema::daily().contains("Vac Given 1 %"));
    }

    proptest! {
        #[test]
        fn merge_never_changes_recorded_values(
            first in proptest::collection::vec(proptest::option::of(0u32..1000), 2),
            second in proptest::collection::vec(proptest::option::of(0u32..1000), 2),
        ) {
            let day = date!(2021-08-10);
            let mut frame = Frame::new(schema_ab());
            let to_fields = |vals: &[Option<u32>]| -> Fields {
                ["A", "B"].iter().zip(vals).map(|(k, v)| (k.to_string(), v.map(f64::from))).collect()
            };
            frame.merge_row(day, &to_fields(&first)).unwrap();
            let before = frame.row(&day).cloned().unwrap();
            frame.merge_row(day, &to_fields(&second)).unwrap();

            for (col, value) in before {
                if let Some(v) = value {
                    prop_assert_eq!(frame.get(&day, &col), Some(v));
                } else {
                    let idx = if col == "A" { 0 } else { 1 };
                    prop_assert_eq!(frame.get(&day, &col), second[idx].map(f64::from));
                }
            }
        }
    }
}
