//! Loan identifiers: `LN-YYYYMMDD-NNN`, sequenced per calendar day

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::LoanId;

static LOAN_ID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^LN-(\d{8})-(\d{3,})$").unwrap());

/// Common prefix of every identifier issued on `day`
pub fn day_prefix(day: NaiveDate) -> String {
    format!("LN-{}-", day.format("%Y%m%d"))
}

/// Sequence numbers are zero-padded to three digits and widen past 999
pub fn format_loan_id(day: NaiveDate, sequence: u32) -> LoanId {
    LoanId(format!("{}{:03}", day_prefix(day), sequence))
}

/// Split an identifier into its day and sequence number
pub fn parse_loan_id(id: &str) -> Option<(NaiveDate, u32)> {
    let caps = LOAN_ID_PATTERN.captures(id)?;
    let day = NaiveDate::parse_from_str(&caps[1], "%Y%m%d").ok()?;
    let sequence = caps[2].parse().ok()?;
    Some((day, sequence))
}

/// Sequence to issue next on `day`, given identifiers that already exist.
///
/// Compares sequence numbers numerically so that `LN-…-1000` sorts after
/// `LN-…-999`; identifiers of other days or of unknown shape are ignored.
pub fn next_sequence<'a, I>(day: NaiveDate, existing: I) -> u32
where
    I: IntoIterator<Item = &'a LoanId>,
{
    existing
        .into_iter()
        .filter_map(|id| parse_loan_id(id.as_str()))
        .filter(|(d, _)| *d == day)
        .map(|(_, seq)| seq)
        .max()
        .unwrap_or(0)
        + 1
}
