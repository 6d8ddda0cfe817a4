//! Interval grid alignment for provider observations.

use crate::frequency::Interval;
use crate::types::Point;

/// Snaps observations onto the nominal grid of `interval`.
///
/// Each timestamp is floored to the start of its bucket (see
/// [`Interval::floor`]). When several observations fall into the same bucket
/// the latest one wins. The result is sorted with strictly increasing
/// timestamps; empty buckets are left absent.
#[must_use]
pub fn align_to_interval(mut observations: Vec<Point>, interval: Interval) -> Vec<Point> {
    observations.sort_by_key(|p| p.timestamp);

    let mut aligned: Vec<Point> = Vec::with_capacity(observations.len());
    for obs in observations {
        let bucket = interval.floor(obs.timestamp);
        match aligned.last_mut() {
            Some(last) if last.timestamp == bucket => last.value = obs.value,
            _ => aligned.push(Point::new(bucket, obs.value)),
        }
    }
    aligned
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_irregular_daily_timestamps_snap_to_midnight() {
        let raw = vec![
            Point::new(Utc.with_ymd_and_hms(2024, 1, 2, 14, 30, 0).unwrap(), 2.0),
            Point::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 7).unwrap(), 1.0),
            Point::new(Utc.with_ymd_and_hms(2024, 1, 3, 21, 0, 0).unwrap(), 3.0),
        ];
        let aligned = align_to_interval(raw, Interval::Day);
        assert_eq!(aligned.len(), 3);
        assert_eq!(
            aligned[0].timestamp,
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
        );
        assert_eq!(aligned[1].value, 2.0);
        assert!(aligned.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[test]
    fn test_same_bucket_keeps_latest_observation() {
        let raw = vec![
            Point::new(Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap(), 1.0),
            Point::new(Utc.with_ymd_and_hms(2024, 1, 1, 10, 4, 59).unwrap(), 1.5),
            Point::new(Utc.with_ymd_and_hms(2024, 1, 1, 10, 5, 0).unwrap(), 2.0),
        ];
        let aligned = align_to_interval(raw, Interval::FiveMinute);
        assert_eq!(aligned.len(), 2);
        assert_eq!(aligned[0].value, 1.5);
        assert_eq!(aligned[1].value, 2.0);
    }

    #[test]
    fn test_gaps_are_not_filled() {
        let raw = vec![
            Point::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(), 1.0),
            Point::new(Utc.with_ymd_and_hms(2024, 1, 5, 0, 0, 0).unwrap(), 2.0),
        ];
        assert_eq!(align_to_interval(raw, Interval::Day).len(), 2);
    }

    #[test]
    fn test_empty_input() {
        assert!(align_to_interval(Vec::new(), Interval::Week).is_empty());
    }
}
