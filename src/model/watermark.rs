//! Poll watermark: the start time of the latest process instance emitted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Checkpoint value passed into and returned from each poll.
///
/// `Watermark::default()` is the empty watermark (nothing emitted yet).
/// Ordering treats empty as smaller than any timestamp, so [`advance`]
/// never moves backwards.
///
/// [`advance`]: Watermark::advance
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Watermark(Option<DateTime<Utc>>);

impl Watermark {
    pub fn empty() -> Self {
        Self(None)
    }

    pub fn at(t: DateTime<Utc>) -> Self {
        Self(Some(t))
    }

    pub fn as_time(&self) -> Option<DateTime<Utc>> {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    /// Return the larger of `self` and `other`.
    #[must_use]
    pub fn advance(self, other: Watermark) -> Watermark {
        self.max(other)
    }

    /// Return the larger of `self` and a single observed start time.
    #[must_use]
    pub fn observe(self, start_time: DateTime<Utc>) -> Watermark {
        self.advance(Watermark::at(start_time))
    }
}

impl std::fmt::Display for Watermark {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            Some(t) => write!(f, "{}", super::rfc3339(t)),
            None => write!(f, "<empty>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn empty_is_below_everything() {
        assert!(Watermark::empty() < Watermark::at(t(0)));
        assert_eq!(Watermark::empty().observe(t(5)), Watermark::at(t(5)));
    }

    #[test]
    fn advance_never_rewinds() {
        let wm = Watermark::at(t(10));
        assert_eq!(wm.observe(t(3)), wm);
        assert_eq!(wm.advance(Watermark::empty()), wm);
        assert_eq!(wm.observe(t(11)), Watermark::at(t(11)));
    }

    #[test]
    fn serializes_as_nullable_timestamp() {
        assert_eq!(serde_json::to_string(&Watermark::empty()).unwrap(), "null");
        let wm: Watermark = serde_json::from_str("\"2024-05-01T07:30:00Z\"").unwrap();
        assert_eq!(wm, Watermark::at(Utc.with_ymd_and_hms(2024, 5, 1, 7, 30, 0).unwrap()));
    }
}
