use super::tokens::{Anchor, Found, next_number, next_numbers, repair_digits};
use crate::error::{Error, Result};
use crate::frame::{
    ExtractedRow, GROUPS, PROBLEM_ANAPHYLAXIS, PROBLEM_POLYNEUROPATHY, allocated, given_cum,
    group_cum, medical_all_cum,
};
use crate::rules::{self, SumCheck};
use crate::validate;
use regex::Regex;
use std::sync::LazyLock;
use time::Date;
use tracing::{debug, info};

static SUMMARY_PAGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(ให้หน่วยบริกำร|ใหห้นว่ยบริกำร|สรปุกำรจดัสรรวคัซนีโควดิ 19|ริการวัคซีนโควิด 19|ผู้ได้รับวัคซีนเข็มที่ 1)",
    )
    .expect("invalid summary page regex")
});

/// Any population-group label, medical staff being the one always present.
static GROUPS_PRESENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(ากรทางการแพท|บุคคลที่มีโรคประจ|ากรทางการแพทย|กรทำงกำรแพทย์)")
        .expect("invalid group label regex")
});

/// Labels that only appear in a population-group breakdown.
static RISK_GROUPS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(บุคคลที่มีโรคประจ|บุคคลท่ีมีโรคประจําตัว|ผู้ที่มีอายุตั้งแต่ 60|จำนวน|ได้รับวัคซีน 2|7 กลุ)")
        .expect("invalid risk group regex")
});

const DOSE_UNIT: &str = "โดส";
const PERSON_UNIT: &str = "(?:ราย|รำย)";
/// Start of the day-on-day increments at the bottom of the page.
const INCREMENTS_MARKER: &str = "หรับรำยงำนจ";

const DOSE1_ANCHORS: &[&str] = &[
    r"1\s*(?:จํานวน|จำนวน|จ ำนวน)",
    r"เข็ม(?:ท่ี|ที่) 1 จํานวน",
    r"ซีนเข็มที่ 1 จ",
];
const DOSE2_ANCHORS: &[&str] = &[r"ได้รับวัคซีน 2 เข็ม", r"ไดรับวัคซีน 2 เข็ม"];
const DOSE2_END: &str = r"(?:ดังรูป|โควิด 19|จังหวัดที่|\(Booster dose\))";

fn patched(text: &str, on: Date) -> String {
    let mut text = repair_digits(text).into_owned();
    for patch in rules::DAILY_TEXT_PATCHES {
        if patch.on.is_none_or(|d| d == on) {
            text = text.replace(patch.find, patch.replace);
        }
    }
    text
}

/// Drop label numbers ("60 years", "7 diseases", "12-17 years") that sit
/// between the counts.
fn clean_numbers(numbers: &[f64]) -> Vec<f64> {
    let noise: &[f64] = if numbers.len() > 8 {
        &[60.0, 17.0, 12.0, 7.0, 3.0]
    } else {
        &[60.0, 7.0]
    };
    numbers
        .iter()
        .copied()
        .filter(|n| !noise.contains(n))
        .collect()
}

/// One dose's population-group breakdown.
#[derive(Debug, Default)]
struct DoseGroups {
    total: Option<f64>,
    medical_all: Option<f64>,
    medical: Option<f64>,
    volunteer: Option<f64>,
    frontline: Option<f64>,
    over60: Option<f64>,
    chronic: Option<f64>,
    pregnant: Option<f64>,
    area: Option<f64>,
    student: Option<f64>,
}

impl DoseGroups {
    /// Early layout: total, medical, frontline, over 60, chronic, area.
    fn positional(numbers: &[f64]) -> Self {
        let at = |i: usize| numbers.get(i).copied();
        Self {
            total: at(0),
            medical_all: at(1),
            frontline: at(2),
            over60: at(3),
            chronic: at(4),
            area: at(5),
            ..Self::default()
        }
    }

    /// Later layouts moved the groups around; pick each one by its label.
    fn by_label(segment: &str, dose: u8, total: f64, on: Date) -> Result<Self> {
        let pick = |anchors: &[&str], required: bool| -> Result<Option<f64>> {
            let mut anchor = Anchor::new(anchors).until(PERSON_UNIT);
            if required {
                anchor = anchor.required();
            }
            Ok(next_number(segment, &anchor)?.0)
        };

        let medical = pick(&["างการแพท", "งกำรแพท"], true)?;
        let mut frontline = pick(&["นหน้ำ", "านหน้า", "านหนา"], false)?;
        let volunteer = pick(&["อาสาสมัคร", "อำสำสมัคร"], true)?;
        let over60 = pick(&[r"60 *(?:ปี|ป)\s*?\s*(?:ขึ|ปี|ข้ึ)"], true)?;
        let pregnant = pick(&["งครร(?:ภ์|ภ)", "จำนวน"], true)?;
        let area = pick(&["าชนทั่วไป", "ประชาชน", "ประชำชน"], true)?;

        let diseases = next_numbers(segment, &Anchor::new(&["โรค"]).until(PERSON_UNIT).required())?;
        let chronic = match diseases.numbers.as_slice() {
            [groups, chronic, ..] if *groups == 7.0 => Some(*chronic),
            other => {
                return Err(Error::LayoutContradiction {
                    date: on,
                    detail: format!("chronic disease count not after the 7 groups: {other:?}"),
                });
            }
        };

        let students = next_numbers(segment, &Anchor::new(&["นักเรียน"]).until(PERSON_UNIT))?;
        let student = match students.numbers.as_slice() {
            [] => None,
            [from, to, count] if (*from, *to) == (12.0, 17.0) => Some(*count),
            other => {
                return Err(Error::LayoutContradiction {
                    date: on,
                    detail: format!("unexpected student values {other:?}"),
                });
            }
        };

        if dose == 2 && rules::frontline_dose2_is_garbage(on) {
            frontline = None;
        }

        Ok(Self {
            total: Some(total),
            medical_all: medical.zip(volunteer).map(|(m, v)| m + v),
            medical,
            volunteer,
            frontline,
            over60,
            chronic,
            pregnant,
            area,
            student,
        })
    }

    /// In `GROUPS` order, medical falling back to the combined medical figure.
    fn components(&self) -> [Option<f64>; 8] {
        [
            self.medical.or(self.medical_all),
            self.volunteer,
            self.frontline,
            self.over60,
            self.chronic,
            self.pregnant,
            self.area,
            self.student,
        ]
    }

    fn write(&self, row: &mut ExtractedRow, dose: u8) {
        row.set(given_cum(dose), self.total);
        row.set(medical_all_cum(dose), self.medical_all);
        let values = [
            self.medical,
            self.volunteer,
            self.frontline,
            self.over60,
            self.chronic,
            self.pregnant,
            self.area,
            self.student,
        ];
        row.extend(GROUPS.iter().map(|g| group_cum(g, dose)), &values);
    }
}

fn incomplete(on: Date, detail: String) -> Result<()> {
    if on >= rules::EXPECTED_COMPLETE_FROM {
        return Err(Error::LayoutContradiction { date: on, detail });
    }
    debug!(date = %on, %detail, "Incomplete daily summary");
    Ok(())
}

fn add_dose(row: &mut ExtractedRow, dose: u8, found: &Found<'_>, on: Date) -> Result<()> {
    let numbers = clean_numbers(&found.numbers);
    let has_groups = RISK_GROUPS_RE.is_match(found.matched) || RISK_GROUPS_RE.is_match(found.segment);

    match numbers.len() {
        n @ (6 | 8 | 9) if has_groups => {
            let groups = if n >= 8 {
                DoseGroups::by_label(found.segment, dose, numbers[0], on)?
            } else {
                DoseGroups::positional(&numbers)
            };
            validate::check_sum(SumCheck::GroupSum, on, &groups.components(), groups.total)?;
            groups.write(row, dose);
        }
        0 if dose == 3 => DoseGroups::default().write(row, dose),
        2 if dose == 3 => DoseGroups {
            total: Some(numbers[0]),
            medical_all: Some(numbers[1]),
            ..DoseGroups::default()
        }
        .write(row, dose),
        n if dose == 3 => {
            return Err(Error::SchemaMismatch {
                layout: "booster summary".into(),
                count: n,
                date: on,
            });
        }
        0 => incomplete(on, format!("no dose {dose} figures"))?,
        n => {
            incomplete(on, format!("{n} dose {dose} figures without group labels"))?;
            row.set(given_cum(dose), Some(numbers[0]));
        }
    }
    Ok(())
}

/// National totals from a daily summary page, `None` if the page is not one.
pub fn extract(text: &str, on: Date) -> Result<Option<ExtractedRow>> {
    if !SUMMARY_PAGE_RE.is_match(text) {
        return Ok(None);
    }
    let text = patched(text, on);

    let mut row = ExtractedRow::new(on);
    let (sinovac, _) = next_number(&text, &Anchor::new(&["Sinovac"]).until(DOSE_UNIT))?;
    let (astrazeneca, _) = next_number(&text, &Anchor::new(&["AstraZeneca"]).until(DOSE_UNIT))?;
    row.set(allocated("Sinovac"), sinovac);
    row.set(allocated("AstraZeneca"), astrazeneca);

    if !GROUPS_PRESENT_RE.is_match(&text) {
        incomplete(on, "daily summary without population groups".into())?;
        info!(date = %on, ?sinovac, ?astrazeneca, "Vac Sum (missing groups)");
        return Ok(Some(row));
    }

    let groups_text = text.split(INCREMENTS_MARKER).next().unwrap_or_default();
    let dose1 = next_numbers(
        groups_text,
        &Anchor::new(DOSE1_ANCHORS).until("(?:2 เข็ม)").require_until(),
    )?;
    let dose2 = next_numbers(
        groups_text,
        &Anchor::new(DOSE2_ANCHORS).until(DOSE2_END).require_until(),
    )?;
    let dose3 = next_numbers(groups_text, &Anchor::new(&[r"\(Booster dose\)"]).until("ดังรูป"))?;

    validate::check_dose_cardinality(
        on,
        clean_numbers(&dose1.numbers).len(),
        clean_numbers(&dose2.numbers).len(),
    )?;

    for (dose, found) in [(1, &dose1), (2, &dose2), (3, &dose3)] {
        add_dose(&mut row, dose, found, on)?;
    }
    Ok(Some(row))
}

/// Adverse-event counts, `None` when the page does not report them.
pub fn adverse_events(text: &str, on: Date) -> Result<Option<ExtractedRow>> {
    if !text.contains("Anaphylaxis") {
        return Ok(None);
    }
    let (anaphylaxis, _) = next_number(text, &Anchor::new(&["Anaphylaxis"]).required())?;
    let (polyneuropathy, _) = next_number(text, &Anchor::new(&["Polyneuropathy"]).required())?;
    Ok(Some(
        ExtractedRow::new(on)
            .with(PROBLEM_ANAPHYLAXIS, anaphylaxis)
            .with(PROBLEM_POLYNEUROPATHY, polyneuropathy),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use time::macros::date;

    const HEADER: &str = "ผลการให้บริการวัคซีนโควิด 19 ณ วันที่ 10 สิงหาคม 2564\n\
        Sinovac 1,000 โดส AstraZeneca 2,000 โดส\n";

    const DOSE1: &str = "ผู้ได้รับวัคซีนเข็มที่ 1 จำนวน 1,000 ราย บุคลากรทางการแพทย์ 300 ราย \
        เจ้าหน้าที่ด่านหน้า 200 ราย ผู้ที่มีอายุตั้งแต่ 60 ปีขึ้นไป 250 ราย \
        บุคคลที่มีโรคประจำตัว 7 กลุ่มโรค 150 ราย ประชาชนในพื้นที่เสี่ยง 100 ราย\n";

    const DOSE2: &str = "ผู้ได้รับวัคซีน 2 เข็ม 500 ราย บุคลากรทางการแพทย์ 150 ราย \
        เจ้าหน้าที่ด่านหน้า 100 ราย ผู้ที่มีอายุตั้งแต่ 60 ปีขึ้นไป 125 ราย \
        บุคคลที่มีโรคประจำตัว 7 กลุ่มโรค 75 ราย ประชาชนในพื้นที่เสี่ยง 50 ราย ดังรูป\n";

    const LABELLED_DOSE1: &str = "ผู้ได้รับวัคซีนเข็มที่ 1 จำนวน 1,000 ราย บุคลากรทางการแพทย์ 200 ราย \
        อาสาสมัครสาธารณสุข 100 ราย เจ้าหน้าที่ด่านหน้า 100 ราย ผู้ที่มีอายุตั้งแต่ 60 ปีขึ้นไป 250 ราย \
        บุคคลที่มีโรคประจำตัว 7 กลุ่มโรค 150 ราย หญิงตั้งครรภ์ 50 ราย ประชาชนทั่วไป 150 ราย\n";

    const LABELLED_DOSE2: &str = "ผู้ได้รับวัคซีน 2 เข็ม 500 ราย บุคลากรทางการแพทย์ 100 ราย \
        อาสาสมัครสาธารณสุข 50 ราย เจ้าหน้าที่ด่านหน้า 50 ราย ผู้ที่มีอายุตั้งแต่ 60 ปีขึ้นไป 125 ราย \
        บุคคลที่มีโรคประจำตัว 7 กลุ่มโรค 75 ราย หญิงตั้งครรภ์ 25 ราย ประชาชนทั่วไป 75 ราย ดังรูป\n";

    #[test]
    fn test_labelled_groups() {
        let text = format!("{HEADER}{LABELLED_DOSE1}{LABELLED_DOSE2}");
        let row = extract(&text, date!(2021-08-10)).unwrap().unwrap();

        assert_eq!(row.get("Vac Group Medical All 1 Cum"), Some(300.0));
        assert_eq!(row.get("Vac Group Risk: Pregnant 1 Cum"), Some(50.0));
        assert_eq!(row.get("Vac Group Other Frontline Staff 2 Cum"), Some(50.0));
        assert_eq!(row.get("Vac Group Risk: Disease 2 Cum"), Some(75.0));
    }

    #[test]
    fn test_second_dose_frontline_discarded() {
        let text = format!("{HEADER}{LABELLED_DOSE1}{LABELLED_DOSE2}");
        let row = extract(&text, date!(2021-08-11)).unwrap().unwrap();

        assert_eq!(row.get("Vac Group Other Frontline Staff 1 Cum"), Some(100.0));
        assert_eq!(row.get("Vac Group Other Frontline Staff 2 Cum"), None);
        assert_eq!(row.get("Vac Group Over 60 2 Cum"), Some(125.0));
    }

    #[test]
    fn test_text_patches() {
        let text = "ผู้ได้รับวัคซีน 1,200 ราย,5 9 รำย ผัสผู้ป่วย 1,022 คน";
        let on_day = patched(text, date!(2021-05-06));
        assert!(!on_day.contains(",5 9 รำย"));
        assert!(!on_day.contains("1,022"));

        let other_day = patched(text, date!(2021-05-07));
        assert!(other_day.contains(",5 9 รำย"));
        assert!(!other_day.contains("1,022"));
    }

    #[test]
    fn test_positional_groups() {
        let text = format!("{HEADER}{DOSE1}{DOSE2}");
        let row = extract(&text, date!(2021-08-10)).unwrap().unwrap();

        assert_eq!(row.get("Vac Allocated Sinovac"), Some(1000.0));
        assert_eq!(row.get("Vac Allocated AstraZeneca"), Some(2000.0));
        assert_eq!(row.get("Vac Given 1 Cum"), Some(1000.0));
        assert_eq!(row.get("Vac Group Medical All 1 Cum"), Some(300.0));
        assert_eq!(row.get("Vac Group Over 60 1 Cum"), Some(250.0));
        assert_eq!(row.get("Vac Group Risk: Location 2 Cum"), Some(50.0));
        assert_eq!(row.get("Vac Given 3 Cum"), None);
        assert!(row.fields.contains_key("Vac Given 3 Cum"));
    }

    #[test]
    fn test_mismatched_group_counts() {
        let dose2 = DOSE2.replace("ประชาชนในพื้นที่เสี่ยง 50 ราย ", "");
        let text = format!("{HEADER}{DOSE1}{dose2}");
        let err = extract(&text, date!(2021-08-10)).unwrap_err();
        assert!(matches!(err, Error::DoseCardinalityMismatch { .. }));
    }

    #[test]
    fn test_group_sum_outside_tolerance() {
        let dose1 = DOSE1.replace("จำนวน 1,000 ราย", "จำนวน 2,000 ราย");
        let text = format!("{HEADER}{dose1}{DOSE2}");
        let err = extract(&text, date!(2021-08-10)).unwrap_err();
        assert!(matches!(err, Error::SumMismatch { .. }));
        // exempt date
        assert!(extract(&text, date!(2021-08-11)).is_ok());
    }

    #[test]
    fn test_missing_groups_only_allowed_early() {
        let text = "ผู้ได้รับวัคซีนเข็มที่ 1 Sinovac 500 โดส";
        let row = extract(text, date!(2021-05-01)).unwrap().unwrap();
        assert_eq!(row.get("Vac Allocated Sinovac"), Some(500.0));
        assert_eq!(row.get("Vac Allocated AstraZeneca"), None);

        let err = extract(text, date!(2021-08-01)).unwrap_err();
        assert!(matches!(err, Error::LayoutContradiction { .. }));
    }

    #[test]
    fn test_other_pages_ignored() {
        assert!(extract("หน้าอื่น 1 2 3", date!(2021-08-10)).unwrap().is_none());
    }

    #[test]
    fn test_adverse_events() {
        let row = adverse_events("Anaphylaxis 12 ราย Polyneuropathy 3 ราย", date!(2021-06-01))
            .unwrap()
            .unwrap();
        assert_eq!(row.get("Vac Problem Anaphylaxis"), Some(12.0));
        assert_eq!(row.get("Vac Problem Polyneuropathy"), Some(3.0));

        let err = adverse_events("Anaphylaxis 12 ราย", date!(2021-06-01)).unwrap_err();
        assert!(matches!(err, Error::AnchorNotFound { .. }));
    }

    #[test]
    fn test_label_numbers_removed() {
        assert_eq!(
            clean_numbers(&[100.0, 60.0, 5.0, 7.0]),
            vec![100.0, 5.0]
        );
        let long = [100.0, 12.0, 17.0, 3.0, 1.0, 2.0, 4.0, 5.0, 6.0];
        assert_eq!(clean_numbers(&long), vec![100.0, 1.0, 2.0, 4.0, 5.0, 6.0]);
    }
}
