//! Log record layout.
//!
//! A record is one CSV line: timestamp, the 12 reading words, latitude,
//! longitude, elevation and a status token. The store's first line is
//! [`HEADER`]; it is written once and never parsed as data.

use std::fmt;

use chrono::{DateTime, Utc};

use crate::frame::SensorReading;

/// Column names, in stored order.
pub const COLUMNS: [&str; 17] = [
    "Timestamp",
    "PM1.0_std",
    "PM2.5_std",
    "PM10.0_std",
    "PM1.0_atm",
    "PM2.5_atm",
    "PM10.0_atm",
    "count_0.3um",
    "count_0.5um",
    "count_1.0um",
    "count_2.5um",
    "count_5.0um",
    "count_10.0um",
    "Latitude",
    "Longitude",
    "Elevation",
    "Status",
];

/// Header line written once at store creation (without terminator).
pub const HEADER: &str = "Timestamp, PM1.0_std, PM2.5_std, PM10.0_std, PM1.0_atm, PM2.5_atm, PM10.0_atm, count_0.3um, count_0.5um, count_1.0um, count_2.5um, count_5.0um, count_10.0um, Latitude, Longitude, Elevation, Status";

/// Status token marking a trustworthy record.
pub const GOOD: &str = "good";

/// Status reason used when the fix did not advance.
pub const STALE_GPS: &str = "stale gps";

/// UTC wall-clock time of a fix.
pub type Timestamp = DateTime<Utc>;

/// Stored timestamp layout, second resolution, always UTC.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S+00:00";

/// A validated position fix, supplied by the GPS collaborator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoFix {
    pub timestamp: Timestamp,
    /// Decimal degrees, north positive
    pub latitude: f64,
    /// Decimal degrees, east positive
    pub longitude: f64,
    /// Metres above mean sea level
    pub elevation_m: f64,
}

/// Per-record trust marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Good,
    /// Degraded reading with a free-text reason
    Stale(String),
}

impl Status {
    pub fn is_good(&self) -> bool {
        matches!(self, Status::Good)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Good => f.write_str(GOOD),
            Status::Stale(reason) => f.write_str(reason),
        }
    }
}

/// Marks a fix stale when its timestamp does not move forward.
///
/// The GPS collaborator can hand back the same fix twice when it has not
/// seen a new sentence; such samples are still logged but never uploaded.
#[derive(Debug, Default, Clone)]
pub struct FixTracker {
    last: Option<Timestamp>,
}

impl FixTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Status for a sample taken at `fix`.
    pub fn observe(&mut self, fix: &GeoFix) -> Status {
        match self.last {
            Some(prev) if fix.timestamp <= prev => Status::Stale(STALE_GPS.to_string()),
            _ => {
                self.last = Some(fix.timestamp);
                Status::Good
            }
        }
    }
}

/// One durable log line.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub fix: GeoFix,
    pub reading: SensorReading,
    pub status: Status,
}

impl LogRecord {
    pub fn new(fix: GeoFix, reading: SensorReading, status: Status) -> Self {
        Self {
            fix,
            reading,
            status,
        }
    }

    /// Render as a CSV line, terminator included.
    ///
    /// Commas and line breaks in a stale reason are replaced so the record
    /// stays on one line with a fixed column count.
    pub fn to_csv_line(&self) -> String {
        let mut line = self.fix.timestamp.format(TIMESTAMP_FORMAT).to_string();
        for word in self.reading.words() {
            line.push(',');
            line.push_str(&word.to_string());
        }
        line.push_str(&format!(
            ",{:.5},{:.5},{:.2},",
            self.fix.latitude, self.fix.longitude, self.fix.elevation_m
        ));
        line.push_str(
            &self
                .status
                .to_string()
                .replace(|c: char| matches!(c, ',' | '\r' | '\n'), ";"),
        );
        line.push('\n');
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LogStore;
    use crate::volume::MemVolume;
    use chrono::TimeZone;

    fn fix_at(minute: u32, second: u32) -> GeoFix {
        GeoFix {
            timestamp: Utc.with_ymd_and_hms(2021, 5, 3, 14, minute, second).unwrap(),
            latitude: 42.40594,
            longitude: -71.11632,
            elevation_m: 24.5,
        }
    }

    #[test]
    fn test_header_matches_columns() {
        let names: Vec<&str> = HEADER.split(", ").collect();
        assert_eq!(names, COLUMNS);
    }

    #[test]
    fn test_timestamp_format() {
        let ts = Utc.with_ymd_and_hms(2021, 5, 3, 4, 7, 9).unwrap();
        assert_eq!(ts.format(TIMESTAMP_FORMAT).to_string(), "2021-05-03T04:07:09+00:00");

        let leap_day = Utc.timestamp_opt(951_782_400, 0).unwrap();
        assert_eq!(
            leap_day.format(TIMESTAMP_FORMAT).to_string(),
            "2000-02-29T00:00:00+00:00"
        );
    }

    #[test]
    fn test_csv_line() {
        let reading = SensorReading::from_words([1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]);
        let record = LogRecord::new(fix_at(2, 0), reading, Status::Good);

        assert_eq!(
            record.to_csv_line(),
            "2021-05-03T14:02:00+00:00,1,2,3,4,5,6,7,8,9,10,11,12,42.40594,-71.11632,24.50,good\n"
        );
    }

    #[test]
    fn test_csv_line_has_17_fields() {
        let record = LogRecord::new(
            fix_at(0, 0),
            SensorReading::default(),
            Status::Stale("no fix, retrying".to_string()),
        );
        let line = record.to_csv_line();
        assert_eq!(line.trim_end().split(',').count(), COLUMNS.len());
        assert!(line.ends_with("no fix; retrying\n"));
    }

    #[test]
    fn test_line_breaks_in_reason_stay_on_one_line() {
        let record = LogRecord::new(
            fix_at(0, 0),
            SensorReading::default(),
            Status::Stale("no fix\r\ngood".to_string()),
        );
        let line = record.to_csv_line();
        assert_eq!(line.matches('\n').count(), 1);
        assert!(line.ends_with(",no fix;;good\n"));

        let volume = MemVolume::new();
        let store = LogStore::open_or_create(volume, "data.txt").unwrap();
        store.append(&record).unwrap();
        let lines: Vec<_> = store.read_from(0).unwrap().map(|l| l.unwrap()).collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].is_header());
        assert!(!lines[1].content().starts_with(b"good"));
    }

    #[test]
    fn test_fix_tracker() {
        let mut tracker = FixTracker::new();

        assert_eq!(tracker.observe(&fix_at(1, 0)), Status::Good);
        assert_eq!(tracker.observe(&fix_at(1, 5)), Status::Good);
        assert_eq!(
            tracker.observe(&fix_at(1, 5)),
            Status::Stale(STALE_GPS.to_string())
        );
        assert!(!tracker.observe(&fix_at(0, 59)).is_good());
        assert!(tracker.observe(&fix_at(1, 6)).is_good());
    }
}
