//! Calendar encodings
//!
//! Raw integer positions plus sin/cos projections so that hour 23 sits next
//! to hour 0, Sunday next to Monday and December next to January.

use chrono::{DateTime, Datelike, Timelike, Utc};
use std::f64::consts::PI;

/// Names of the raw calendar columns, in emission order
pub const CALENDAR_FEATURES: [&str; 4] = ["hour", "day_of_week", "month", "is_weekend"];

/// Names of the cyclical columns, in emission order
pub const CYCLICAL_FEATURES: [&str; 6] = [
    "hour_sin",
    "hour_cos",
    "dow_sin",
    "dow_cos",
    "month_sin",
    "month_cos",
];

/// Calendar position of one timestamp
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalendarFeatures {
    /// 0..=23
    pub hour: u32,
    /// Monday = 0 .. Sunday = 6
    pub day_of_week: u32,
    /// 1..=12
    pub month: u32,
    pub is_weekend: bool,
}

impl CalendarFeatures {
    pub fn from_timestamp(ts: &DateTime<Utc>) -> Self {
        let day_of_week = ts.weekday().num_days_from_monday();
        Self {
            hour: ts.hour(),
            day_of_week,
            month: ts.month(),
            is_weekend: day_of_week >= 5,
        }
    }

    /// Raw values in `CALENDAR_FEATURES` order
    pub fn raw(&self) -> [f64; 4] {
        [
            self.hour as f64,
            self.day_of_week as f64,
            self.month as f64,
            if self.is_weekend { 1.0 } else { 0.0 },
        ]
    }

    /// Sin/cos pairs in `CYCLICAL_FEATURES` order
    pub fn cyclical(&self) -> [f64; 6] {
        let (hour_sin, hour_cos) = cyclical(self.hour as f64, 24.0);
        let (dow_sin, dow_cos) = cyclical(self.day_of_week as f64, 7.0);
        let (month_sin, month_cos) = cyclical(self.month as f64, 12.0);
        [hour_sin, hour_cos, dow_sin, dow_cos, month_sin, month_cos]
    }
}

/// `(sin(2πx/period), cos(2πx/period))`
pub fn cyclical(value: f64, period: f64) -> (f64, f64) {
    let angle = 2.0 * PI * value / period;
    (angle.sin(), angle.cos())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_calendar_positions() {
        // 2025-03-08 is a Saturday
        let ts = Utc.with_ymd_and_hms(2025, 3, 8, 17, 30, 0).unwrap();
        let cal = CalendarFeatures::from_timestamp(&ts);
        assert_eq!(cal.hour, 17);
        assert_eq!(cal.day_of_week, 5);
        assert_eq!(cal.month, 3);
        assert!(cal.is_weekend);
        assert_eq!(cal.raw(), [17.0, 5.0, 3.0, 1.0]);
    }

    #[test]
    fn test_cyclical_continuity_at_boundary() {
        let (s23, c23) = cyclical(23.0, 24.0);
        let (s0, c0) = cyclical(0.0, 24.0);
        let (s12, c12) = cyclical(12.0, 24.0);
        let near = ((s23 - s0).powi(2) + (c23 - c0).powi(2)).sqrt();
        let far = ((s12 - s0).powi(2) + (c12 - c0).powi(2)).sqrt();
        assert!(near < 0.3, "hour 23 should be adjacent to hour 0, distance {}", near);
        assert!(far > 1.9);
    }

    #[test]
    fn test_cyclical_unit_circle() {
        let ts = Utc.with_ymd_and_hms(2025, 12, 31, 23, 0, 0).unwrap();
        let enc = CalendarFeatures::from_timestamp(&ts).cyclical();
        for pair in enc.chunks(2) {
            assert!((pair[0].powi(2) + pair[1].powi(2) - 1.0).abs() < 1e-12);
        }
    }
}
