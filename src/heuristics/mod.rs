// src/heuristics/mod.rs

mod daily;
mod slides;
mod tables;
pub mod tokens;

use crate::document::Page;
use crate::error::{Policy, Result};
use crate::frame::ExtractedRow;
use crate::provinces::ProvinceResolver;
use time::Date;

pub use tables::ProvincialTable;

/// National totals from a daily summary page.
pub fn extract_daily(text: &str, on: Date) -> Result<Option<ExtractedRow>> {
    daily::extract(text, on)
}

/// Anaphylaxis and polyneuropathy counts.
pub fn extract_adverse_events(text: &str, on: Date) -> Result<Option<ExtractedRow>> {
    daily::adverse_events(text, on)
}

/// Add a page's provincial rows to `table`.
pub fn extract_provincial(
    page: &Page,
    on: Date,
    resolver: &dyn ProvinceResolver,
    policy: &Policy,
    table: &mut ProvincialTable,
) -> Result<()> {
    tables::scan(page, on, resolver, policy, table)
}

/// Cumulative doses by manufacturer from a slide-deck page.
pub fn extract_manufacturer(page: &Page) -> Result<Option<ExtractedRow>> {
    slides::extract(page)
}
