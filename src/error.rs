// src/error.rs

use crate::rules;
use thiserror::Error;
use time::Date;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("none of the anchors {anchors:?} matched")]
    AnchorNotFound { anchors: Vec<String> },

    #[error("{layout} row with {count} values matches no known variant on {date}")]
    SchemaMismatch {
        layout: String,
        count: usize,
        date: Date,
    },

    #[error("{check} on {date}: components sum to {sum} but total is {total}")]
    SumMismatch {
        check: String,
        date: Date,
        sum: f64,
        total: f64,
    },

    #[error("{field} = {value} on {date} is outside [0, 500)")]
    PercentOutOfRange {
        field: String,
        date: Date,
        value: f64,
    },

    #[error("{dose1} dose-1 groups but {dose2} dose-2 groups on {date}")]
    DoseCardinalityMismatch {
        date: Date,
        dose1: usize,
        dose2: usize,
    },

    #[error("provincial table for {date} dropped: {reason} ({found} of {required})")]
    CoverageTooLow {
        date: Date,
        reason: &'static str,
        found: usize,
        required: usize,
    },

    #[error("query {query} timed out")]
    TransportTimeout { query: String },

    #[error("backend reported an error for {query}: {reason}")]
    BackendStatus { query: String, reason: String },

    #[error("no cached response for {0}")]
    CacheMiss(String),

    #[error("layout contradiction on {date}: {detail}")]
    LayoutContradiction { date: Date, detail: String },

    #[error("column {column:?} is not registered for the {series} series")]
    UnknownColumn { series: &'static str, column: String },

    #[error("malformed coldchain response: {0}")]
    MalformedResponse(String),

    #[error(transparent)]
    Pattern(#[from] regex::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Config(#[from] toml::de::Error),
}

/// Coarse classification used by the ingestion policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    AnchorNotFound,
    SchemaMismatch,
    SumMismatch,
    PercentOutOfRange,
    DoseCardinalityMismatch,
    CoverageTooLow,
    TransportTimeout,
    Backend,
    LayoutContradiction,
    Infrastructure,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::AnchorNotFound { .. } => ErrorKind::AnchorNotFound,
            Error::SchemaMismatch { .. } => ErrorKind::SchemaMismatch,
            Error::SumMismatch { .. } => ErrorKind::SumMismatch,
            Error::PercentOutOfRange { .. } => ErrorKind::PercentOutOfRange,
            Error::DoseCardinalityMismatch { .. } => ErrorKind::DoseCardinalityMismatch,
            Error::CoverageTooLow { .. } => ErrorKind::CoverageTooLow,
            Error::TransportTimeout { .. } => ErrorKind::TransportTimeout,
            Error::BackendStatus { .. } | Error::CacheMiss(_) | Error::MalformedResponse(_) => {
                ErrorKind::Backend
            }
            Error::LayoutContradiction { .. } | Error::UnknownColumn { .. } => {
                ErrorKind::LayoutContradiction
            }
            Error::Pattern(_)
            | Error::Json(_)
            | Error::Sqlite(_)
            | Error::Http(_)
            | Error::Io(_)
            | Error::Config(_) => ErrorKind::Infrastructure,
        }
    }
}

/// What the orchestrator does with a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Log it, drop the row or document, keep going.
    Skip,
    /// Stop ingestion and surface the error.
    Abort,
}

/// Skip-vs-abort decisions for extraction and validation failures.
#[derive(Debug, Clone, Copy)]
pub struct Policy {
    pub hard_stop: bool,
}

impl Default for Policy {
    fn default() -> Self {
        Self { hard_stop: true }
    }
}

impl Policy {
    pub fn disposition(&self, err: &Error, date: Date) -> Disposition {
        if !self.hard_stop {
            return Disposition::Skip;
        }
        match err.kind() {
            ErrorKind::LayoutContradiction | ErrorKind::DoseCardinalityMismatch => {
                Disposition::Abort
            }
            ErrorKind::SumMismatch | ErrorKind::PercentOutOfRange
                if date >= rules::EXPECTED_COMPLETE_FROM =>
            {
                Disposition::Abort
            }
            // A broken pattern is a programming error, not a bad document.
            ErrorKind::Infrastructure if matches!(err, Error::Pattern(_)) => Disposition::Abort,
            _ => Disposition::Skip,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    fn sum_mismatch(date: Date) -> Error {
        Error::SumMismatch {
            check: "group sum".into(),
            date,
            sum: 90.0,
            total: 100.0,
        }
    }

    #[test]
    fn test_validation_failures_abort_only_in_complete_range() {
        let policy = Policy::default();
        let late = date!(2021-09-01);
        let early = date!(2021-05-01);
        assert_eq!(
            policy.disposition(&sum_mismatch(late), late),
            Disposition::Abort
        );
        assert_eq!(
            policy.disposition(&sum_mismatch(early), early),
            Disposition::Skip
        );
    }

    #[test]
    fn test_soft_policy_never_aborts() {
        let policy = Policy { hard_stop: false };
        let err = Error::LayoutContradiction {
            date: date!(2021-09-01),
            detail: "x".into(),
        };
        assert_eq!(
            policy.disposition(&err, date!(2021-09-01)),
            Disposition::Skip
        );
    }

    #[test]
    fn test_timeouts_are_never_fatal() {
        let err = Error::TransportTimeout {
            query: "vac_request_givenprov.json".into(),
        };
        assert_eq!(err.kind(), ErrorKind::TransportTimeout);
        assert_eq!(
            Policy::default().disposition(&err, date!(2021-09-01)),
            Disposition::Skip
        );
    }
}
