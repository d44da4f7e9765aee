// src/document.rs

use crate::error::Result;
use crate::thai;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};
use time::{Date, OffsetDateTime};

/// One page as handed over by the text/table extraction service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    pub index: usize,
    pub text: String,
    /// Cell grid, row-major, when the extractor found a table on the page.
    #[serde(default)]
    pub grid: Option<Vec<Vec<String>>>,
}

impl Page {
    pub fn new(index: usize, text: impl Into<String>) -> Self {
        Self {
            index,
            text: text.into(),
            grid: None,
        }
    }

    #[cfg(test)]
    pub fn with_grid(mut self, grid: Vec<Vec<String>>) -> Self {
        self.grid = Some(grid);
        self
    }

    /// Trimmed, non-empty lines in page order.
    pub fn lines(&self) -> Vec<&str> {
        self.text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    /// Daily situation report with national summary and provincial tables.
    DailyReport,
    /// Presentation deck with the manufacturer breakdown.
    SlideDeck,
}

/// One source report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// URL or file name.
    pub id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub retrieved_at: OffsetDateTime,
    pub kind: DocumentKind,
    pub pages: Vec<Page>,
}

impl Document {
    /// Load a page dump written by the extraction service.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// The first date any page declares its figures as of.
    pub fn report_date(&self) -> Option<Date> {
        self.pages
            .iter()
            .find_map(|p| thai::find_report_date(&p.text))
    }
}

/// Newest first, ties broken by id, at most `max` documents (0 = all).
pub fn order_for_ingest(mut docs: Vec<Document>, max: usize) -> Vec<Document> {
    docs.sort_by(|a, b| {
        b.retrieved_at
            .cmp(&a.retrieved_at)
            .then_with(|| b.id.cmp(&a.id))
    });
    if max > 0 {
        docs.truncate(max);
    }
    docs
}
