// src/thai.rs

use regex::Regex;
use std::sync::LazyLock;
use time::{Date, Month};

/// Month names as they appear in extracted report text. Some fonts come out
/// with "ำ" where "า" was printed, so the vowel is matched as an alternation.
const MONTHS: [&str; 12] = [
    r"ม\.?ค\.?|มกร[าำ]คม",
    r"ก\.?พ\.?|กุมภ[าำ]พันธ์",
    r"มี\.?ค\.?|มีน[าำ]คม",
    r"เม\.?ย\.?|เมษ[าำ]ยน",
    r"พ\.?ค\.?|พฤษภ[าำ]คม",
    r"มิ\.?ย\.?|มิถุน[าำ]ยน",
    r"ก\.?ค\.?|กรกฎ[าำ]คม",
    r"ส\.?ค\.?|สิงห[าำ]คม",
    r"ก\.?ย\.?|กันย[าำ]ยน",
    r"ต\.?ค\.?|ตุล[าำ]คม",
    r"พ\.?ย\.?|พฤศจิก[าำ]ยน",
    r"ธ\.?ค\.?|ธันว[าำ]คม",
];

static MONTH_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    MONTHS
        .iter()
        .map(|m| Regex::new(&format!("^(?:{m})$")).expect("invalid month regex"))
        .collect()
});

static DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    // Full names are tried before abbreviations so "มิถุนายน" is not cut to "มิ.ย".
    let mut names: Vec<&str> = MONTHS.iter().flat_map(|m| m.split('|')).collect();
    names.sort_by_key(|n| std::cmp::Reverse(n.len()));
    Regex::new(&format!(
        r"(\d{{1,2}})\s*({})\s*(?:พ\.ศ\.\s*)?(25\d{{2}}|20\d{{2}})",
        names.join("|")
    ))
    .expect("invalid thai date regex")
});

/// "ณ วันที่" and its broken-glyph variants directly before a date.
static AS_OF_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"ณ[^\d\n]{0,12}$").expect("invalid as-of regex"));

fn month_of(name: &str) -> Option<Month> {
    let idx = MONTH_RES.iter().position(|re| re.is_match(name))?;
    Month::try_from(idx as u8 + 1).ok()
}

fn to_date(caps: &regex::Captures<'_>) -> Option<Date> {
    let day: u8 = caps[1].parse().ok()?;
    let month = month_of(&caps[2])?;
    let mut year: i32 = caps[3].parse().ok()?;
    if year > 2400 {
        year -= 543;
    }
    Date::from_calendar_date(year, month, day).ok()
}

/// The date a page's figures are as of.
///
/// A date introduced by "ณ วันที่" wins over any earlier date (reports open
/// with the start of the campaign); otherwise the first date in the text.
pub fn find_report_date(text: &str) -> Option<Date> {
    let mut first = None;
    for caps in DATE_RE.captures_iter(text) {
        let Some(date) = to_date(&caps) else {
            continue;
        };
        let start = caps.get(0).map_or(0, |m| m.start());
        if AS_OF_RE.is_match(&text[..start]) {
            return Some(date);
        }
        first.get_or_insert(date);
    }
    first
}

/// Find the first date and return the text with it cut out.
pub fn take_date(text: &str) -> (Option<Date>, String) {
    for caps in DATE_RE.captures_iter(text) {
        if let Some(date) = to_date(&caps) {
            let m = caps.get(0).expect("group 0 always present");
            let rest = format!("{}{}", &text[..m.start()], &text[m.end()..]);
            return (Some(date), rest);
        }
    }
    (None, text.to_string())
}

/// Buddhist-era year as printed in reports, e.g. "2564" for 2021.
pub fn buddhist_year(date: Date) -> String {
    (date.year() + 543).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use time::macros::date;

    #[test]
    fn test_as_of_date_preferred() {
        let text = "สรุปการฉีดวัคซีนโควิด 19 ตั้งแต่วันที่ 7 มิถุนายน 2564\n\
                    ผลการให้บริการ ณ วันที่ 23 มิถุนายน 2564 เวลา 18.00 น.";
        assert_eq!(find_report_date(text), Some(date!(2021-06-23)));
    }

    #[test]
    fn test_first_date_without_marker() {
        let text = "สะสมตั้งแต่วันที่ 28 กุมภาพันธ์ – 9 สิงหาคม 2564";
        assert_eq!(find_report_date(text), Some(date!(2021-08-09)));
    }

    #[test]
    fn test_legacy_vowel_and_abbreviation() {
        assert_eq!(find_report_date("17 ตุลำคม 2564"), Some(date!(2021-10-17)));
        assert_eq!(find_report_date("9 ส.ค. 2564"), Some(date!(2021-08-09)));
    }

    #[test]
    fn test_take_date_removes_it() {
        let (date, rest) = take_date("เข็มที่ 1 (9 สิงหาคม 2564) 1,000");
        assert_eq!(date, Some(date!(2021-08-09)));
        assert_eq!(rest, "เข็มที่ 1 () 1,000");
    }

    #[test]
    fn test_no_date() {
        assert_eq!(find_report_date("no date here 2564"), None);
        assert_eq!(buddhist_year(date!(2021-06-01)), "2564");
    }
}
