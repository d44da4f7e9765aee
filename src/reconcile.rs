// src/reconcile.rs

use crate::coldchain::ColdchainKey;
use crate::document::{Document, DocumentKind, Page};
use crate::error::{Disposition, Error, Policy, Result};
use crate::frame::{ExtractedRow, Frame, MergeStats, Schema, given_cum};
use crate::heuristics::{self, ProvincialTable};
use crate::provinces::ProvinceResolver;
use crate::rules::{self, Requirement};
use crate::thai;
use time::{Date, OffsetDateTime};
use tracing::{debug, info, info_span, warn};

/// Whole-table acceptance check for a document's provincial rows.
///
/// An empty table passes: the document simply had none.
pub fn accept_document(table: &ProvincialTable) -> Result<()> {
    if table.is_empty() {
        return Ok(());
    }
    let Some(requirement) = rules::coverage_for(table.date) else {
        return Ok(());
    };
    let too_low = |reason, found, required| {
        Err(Error::CoverageTooLow {
            date: table.date,
            reason,
            found,
            required,
        })
    };
    match requirement {
        Requirement::MinRows(n) if table.len() < n => too_low("missing provinces", table.len(), n),
        Requirement::ExactRows(n) if table.len() != n => {
            too_low("province count differs", table.len(), n)
        }
        Requirement::FilledColumn(column, n) => {
            let filled = table.count_filled(column);
            if filled != n {
                too_low("allocation doesn't match provinces", filled, n)
            } else {
                Ok(())
            }
        }
        _ => Ok(()),
    }
}

/// Everything one document contributed, merged only once the document
/// has been read to the end.
#[derive(Debug, Default)]
struct Staged {
    daily: Vec<ExtractedRow>,
    provincial: Option<ProvincialTable>,
    manufacturer: Vec<ExtractedRow>,
}

/// The growing output series.
#[derive(Debug)]
pub struct Timeline {
    pub daily: Frame<Date>,
    pub provinces: Frame<(Date, String)>,
    pub manufacturer: Frame<Date>,
    pub coldchain: Frame<ColdchainKey>,
}

impl Default for Timeline {
    fn default() -> Self {
        Self {
            daily: Frame::new(Schema::daily()),
            provinces: Frame::new(Schema::provincial()),
            manufacturer: Frame::new(Schema::manufacturer()),
            coldchain: Frame::new(Schema::coldchain()),
        }
    }
}

/// Run `result` through the policy: skipped failures become `None`.
fn route<T>(result: Result<Option<T>>, policy: &Policy, on: Date, what: &str) -> Result<Option<T>> {
    match result {
        Ok(v) => Ok(v),
        Err(e) => match policy.disposition(&e, on) {
            Disposition::Skip => {
                warn!(date = %on, error = %e, "{what} dropped");
                Ok(None)
            }
            Disposition::Abort => Err(e),
        },
    }
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold documents newest first. Stops at the first failure the policy
    /// says to abort on.
    pub fn ingest_all(
        &mut self,
        docs: &[Document],
        resolver: &dyn ProvinceResolver,
        policy: &Policy,
    ) -> Result<MergeStats> {
        let mut stats = MergeStats::default();
        for doc in docs {
            stats += self.ingest(doc, resolver, policy)?;
        }
        info!(
            documents = docs.len(),
            daily = self.daily.len(),
            provinces = self.provinces.len(),
            manufacturer = self.manufacturer.len(),
            filled = stats.filled,
            conflicts = stats.conflicts,
            "Ingest finished"
        );
        Ok(stats)
    }

    pub fn ingest(
        &mut self,
        doc: &Document,
        resolver: &dyn ProvinceResolver,
        policy: &Policy,
    ) -> Result<MergeStats> {
        let span = info_span!("document", id = %doc.id);
        let _guard = span.enter();

        let staged = match doc.kind {
            DocumentKind::DailyReport => {
                let Some(date) = doc.report_date() else {
                    warn!("No report date, document skipped");
                    return Ok(MergeStats::default());
                };
                read_report(doc, date, resolver, policy)?
            }
            DocumentKind::SlideDeck => read_slides(doc, policy)?,
        };
        self.commit(staged, policy)
    }

    /// Fold a coldchain run in like any other source.
    pub fn merge_coldchain(&mut self, frame: &Frame<ColdchainKey>, policy: &Policy) -> Result<MergeStats> {
        let today = OffsetDateTime::now_utc().date();
        let stats = route(self.coldchain.merge_frame(frame).map(Some), policy, today, "Coldchain frame")?;
        Ok(stats.unwrap_or_default())
    }

    fn commit(&mut self, staged: Staged, policy: &Policy) -> Result<MergeStats> {
        let mut stats = MergeStats::default();

        for row in staged.daily {
            stats += merged(self.daily.merge_row(row.date, &row.fields), policy, row.date)?;
        }
        for row in staged.manufacturer {
            stats += merged(self.manufacturer.merge_row(row.date, &row.fields), policy, row.date)?;
        }

        if let Some(table) = staged.provincial {
            match accept_document(&table) {
                Ok(()) => {
                    for ((date, province), row) in table.rows {
                        let result = self.provinces.merge_row((date, province), &row.fields);
                        stats += merged(result, policy, date)?;
                    }
                }
                Err(e) => match policy.disposition(&e, table.date) {
                    Disposition::Skip => {
                        warn!(date = %table.date, provinces = table.len(), error = %e, "Provincial table dropped");
                    }
                    Disposition::Abort => return Err(e),
                },
            }
        }
        debug!(filled = stats.filled, kept = stats.kept, "Document merged");
        Ok(stats)
    }
}

fn merged(result: Result<MergeStats>, policy: &Policy, on: Date) -> Result<MergeStats> {
    Ok(route(result.map(Some), policy, on, "Row")?.unwrap_or_default())
}

fn page_date(page: &Page, fallback: Date) -> Date {
    thai::find_report_date(&page.text).unwrap_or(fallback)
}

fn read_report(
    doc: &Document,
    date: Date,
    resolver: &dyn ProvinceResolver,
    policy: &Policy,
) -> Result<Staged> {
    let mut staged = Staged::default();
    let mut table = ProvincialTable::new(date);
    let mut table_ok = true;

    for page in &doc.pages {
        let on = page_date(page, date);

        if let Some(row) = route(heuristics::extract_daily(&page.text, on), policy, on, "Daily summary")? {
            info!(
                date = %on,
                given1 = ?row.get(&given_cum(1)),
                given2 = ?row.get(&given_cum(2)),
                given3 = ?row.get(&given_cum(3)),
                "Vac Sum"
            );
            staged.daily.push(row);
        }
        if let Some(row) = route(
            heuristics::extract_adverse_events(&page.text, on),
            policy,
            on,
            "Adverse events",
        )? {
            staged.daily.push(row);
        }

        if table_ok {
            let scanned = heuristics::extract_provincial(page, on, resolver, policy, &mut table);
            if route(scanned.map(Some), policy, on, "Provincial table")?.is_none() {
                table_ok = false;
            }
        }
    }

    if table_ok && !table.is_empty() {
        debug!(date = %date, provinces = table.len(), layouts = ?table.layouts, "Provincial table read");
        staged.provincial = Some(table);
    }
    Ok(staged)
}

fn read_slides(doc: &Document, policy: &Policy) -> Result<Staged> {
    let mut staged = Staged::default();
    let fallback = doc.report_date();
    for page in &doc.pages {
        let result = heuristics::extract_manufacturer(page);
        let on = fallback.unwrap_or(rules::MANUFACTURER_SLIDES_FROM);
        if let Some(row) = route(result, policy, on, "Slide")? {
            staged.manufacturer.push(row);
        }
    }
    Ok(staged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{POPULATION, PROBLEM_ANAPHYLAXIS, given_pct, group_cum};
    use crate::provinces::ProvinceAliases;
    use pretty_assertions::assert_eq;
    use time::macros::{date, datetime};

    fn table(on: Date, rows: usize) -> ProvincialTable {
        let mut t = ProvincialTable::new(on);
        for i in 0..rows {
            t.add(
                ExtractedRow::for_province(on, format!("P{i}"))
                    .with(POPULATION, Some(1000.0))
                    .with(given_pct(1), Some(50.0)),
            );
        }
        t
    }

    fn located(on: Date, rows: usize, filled: usize) -> ProvincialTable {
        let mut t = ProvincialTable::new(on);
        for i in 0..rows {
            let location = (i < filled).then_some(10.0);
            t.add(
                ExtractedRow::for_province(on, format!("P{i}"))
                    .with(group_cum("Risk: Location", 1), location),
            );
        }
        t
    }

    fn coverage_report(heading_date: &str) -> Document {
        let provinces = [
            "กรุงเทพมหานคร",
            "นนทบุรี",
            "ปทุมธานี",
            "สมุทรปราการ",
            "เชียงใหม่",
            "ขอนแก่น",
            "ภูเก็ต",
            "ชลบุรี",
            "นครราชสีมา",
            "สงขลา",
        ];
        let mut text = format!(
            "ความครอบคลุมการได้รับวัคซีน ณ วันที่ {heading_date}\n\
             จังหวัด ประชากร เข็มที่ 1 (ร้อยละ) เข็มที่ 2 (ร้อยละ)\n"
        );
        for (i, name) in provinces.iter().enumerate() {
            text.push_str(&format!("{} {name} 1,000 500 50.0 100 10.0\n", i + 1));
        }
        text.push_str("หมายเหตุ ข้อมูลจาก MOPH\n");
        Document {
            id: "coverage.pdf".into(),
            retrieved_at: OffsetDateTime::UNIX_EPOCH,
            kind: DocumentKind::DailyReport,
            pages: vec![Page::new(1, text)],
        }
    }

    fn staged_daily(rows: Vec<ExtractedRow>) -> Staged {
        Staged {
            daily: rows,
            ..Staged::default()
        }
    }

    #[test]
    fn test_coverage_requirements() {
        assert!(accept_document(&table(date!(2021-06-01), 77)).is_ok());
        assert!(accept_document(&table(date!(2021-06-01), 80)).is_ok());
        assert!(matches!(
            accept_document(&table(date!(2021-10-01), 78)),
            Err(Error::CoverageTooLow { found: 78, required: 77, .. })
        ));
        assert!(matches!(
            accept_document(&table(date!(2021-04-20), 77)),
            Err(Error::CoverageTooLow { reason: "allocation doesn't match provinces", found: 0, .. })
        ));
        assert!(accept_document(&table(date!(2021-03-01), 3)).is_ok());
        assert!(accept_document(&table(date!(2021-06-01), 0)).is_ok());
    }

    #[test]
    fn test_location_column_needs_every_province() {
        let on = date!(2021-04-20);
        assert!(accept_document(&located(on, 77, 77)).is_ok());
        assert!(matches!(
            accept_document(&located(on, 77, 76)),
            Err(Error::CoverageTooLow { found: 76, required: 77, .. })
        ));
        assert!(matches!(
            accept_document(&located(on, 78, 78)),
            Err(Error::CoverageTooLow { found: 78, required: 77, .. })
        ));
    }

    #[test]
    fn test_table_without_location_column_dropped_on_ingest() {
        let mut timeline = Timeline::new();
        timeline
            .ingest(&coverage_report("20 เมษายน 2564"), &ProvinceAliases::default(), &Policy::default())
            .unwrap();
        assert!(timeline.provinces.is_empty());

        // no coverage requirement yet
        timeline
            .ingest(&coverage_report("1 มีนาคม 2564"), &ProvinceAliases::default(), &Policy::default())
            .unwrap();
        assert_eq!(timeline.provinces.len(), 10);
        assert_eq!(
            timeline.provinces.get(&(date!(2021-03-01), "ภูเก็ต".into()), POPULATION),
            Some(1000.0)
        );
    }

    #[test]
    fn test_rows_keyed_by_their_own_date() {
        let on = date!(2021-06-01);
        let mut provincial = table(on, 77);
        provincial.add(ExtractedRow::for_province(date!(2021-05-31), "P0").with(POPULATION, Some(990.0)));

        let mut timeline = Timeline::new();
        let staged = Staged {
            provincial: Some(provincial),
            ..Staged::default()
        };
        timeline.commit(staged, &Policy::default()).unwrap();
        assert_eq!(timeline.provinces.len(), 78);
        assert_eq!(timeline.provinces.get(&(on, "P0".into()), POPULATION), Some(1000.0));
        assert_eq!(
            timeline.provinces.get(&(date!(2021-05-31), "P0".into()), POPULATION),
            Some(990.0)
        );
    }

    #[test]
    fn test_short_table_contributes_nothing() {
        let mut timeline = Timeline::new();
        let staged = Staged {
            provincial: Some(table(date!(2021-06-01), 70)),
            ..Staged::default()
        };
        let stats = timeline.commit(staged, &Policy::default()).unwrap();
        assert_eq!(stats, MergeStats::default());
        assert!(timeline.provinces.is_empty());

        let staged = Staged {
            provincial: Some(table(date!(2021-06-01), 77)),
            ..Staged::default()
        };
        timeline.commit(staged, &Policy::default()).unwrap();
        assert_eq!(timeline.provinces.len(), 77);
        assert_eq!(
            timeline.provinces.get(&(date!(2021-06-01), "P3".into()), POPULATION),
            Some(1000.0)
        );
    }

    #[test]
    fn test_later_documents_only_fill_gaps() {
        let on = date!(2021-08-10);
        let mut timeline = Timeline::new();
        let first = ExtractedRow::new(on)
            .with(given_cum(1), Some(5.0))
            .with(given_cum(2), None);
        let second = ExtractedRow::new(on)
            .with(given_cum(1), Some(9.0))
            .with(given_cum(2), Some(3.0));

        timeline.commit(staged_daily(vec![first]), &Policy::default()).unwrap();
        let stats = timeline.commit(staged_daily(vec![second]), &Policy::default()).unwrap();

        assert_eq!(timeline.daily.get(&on, &given_cum(1)), Some(5.0));
        assert_eq!(timeline.daily.get(&on, &given_cum(2)), Some(3.0));
        assert_eq!(stats.conflicts, 1);
    }

    #[test]
    fn test_unknown_column_aborts_under_hard_stop() {
        let on = date!(2021-08-10);
        let row = ExtractedRow::new(on).with("Vac Mystery", Some(1.0));

        let mut timeline = Timeline::new();
        let err = timeline
            .commit(staged_daily(vec![row.clone()]), &Policy::default())
            .unwrap_err();
        assert!(matches!(err, Error::UnknownColumn { .. }));

        let lenient = Policy { hard_stop: false };
        timeline.commit(staged_daily(vec![row]), &lenient).unwrap();
        assert!(timeline.daily.is_empty());
    }

    #[test]
    fn test_ingest_document_pages() {
        let doc = Document {
            id: "report-2021-08-10.pdf".into(),
            retrieved_at: datetime!(2021-08-11 09:00 UTC),
            kind: DocumentKind::DailyReport,
            pages: vec![
                Page::new(1, "รายงานความปลอดภัย ณ วันที่ 10 สิงหาคม 2564"),
                Page::new(2, "Anaphylaxis 12 ราย Polyneuropathy 3 ราย"),
            ],
        };
        let mut timeline = Timeline::new();
        timeline
            .ingest_all(&[doc], &ProvinceAliases::default(), &Policy::default())
            .unwrap();

        let on = date!(2021-08-10);
        assert_eq!(timeline.daily.get(&on, PROBLEM_ANAPHYLAXIS), Some(12.0));
        assert!(timeline.provinces.is_empty());
    }

    #[test]
    fn test_undated_document_skipped() {
        let doc = Document {
            id: "blank".into(),
            retrieved_at: OffsetDateTime::UNIX_EPOCH,
            kind: DocumentKind::DailyReport,
            pages: vec![Page::new(1, "Anaphylaxis 12 ราย Polyneuropathy 3 ราย")],
        };
        let mut timeline = Timeline::new();
        let stats = timeline
            .ingest(&doc, &ProvinceAliases::default(), &Policy::default())
            .unwrap();
        assert_eq!(stats, MergeStats::default());
        assert!(timeline.daily.is_empty());
    }

    #[test]
    fn test_coldchain_frame_folds_in() {
        let key = ColdchainKey {
            date: date!(2021-06-01),
            province: Some("Bangkok".into()),
            vaccine: Some("Sinovac".into()),
        };
        let mut run = Frame::new(Schema::coldchain());
        let fields = [("Vac Given".to_string(), Some(100.0))].into_iter().collect();
        run.merge_row(key.clone(), &fields).unwrap();

        let mut timeline = Timeline::new();
        timeline.merge_coldchain(&run, &Policy::default()).unwrap();
        let stats = timeline.merge_coldchain(&run, &Policy::default()).unwrap();
        assert_eq!(stats.filled, 0);
        assert_eq!(timeline.coldchain.get(&key, "Vac Given"), Some(100.0));
    }
}
