//! Local dump of the log store.
//!
//! Writes complete lines verbatim to any `Write` sink, either the whole
//! store (header included) or only the lines after a cursor. Exporting
//! never moves the upload cursor.

use std::io::Write;

use tracing::{info, warn};

use crate::cursor::Cursor;
use crate::error::{Result, StorageError};
use crate::store::LogStore;
use crate::volume::Volume;

/// Name reported when the export sink fails.
const SINK_NAME: &str = "export output";

/// What one export wrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExportSummary {
    /// Offset the dump started from
    pub start: Cursor,
    /// Offset after the last complete line written
    pub end: Cursor,
    pub lines: u64,
    pub bytes: u64,
}

/// Copy every complete line at or after `from` into `out`.
///
/// A `from` past the end of the store (the store was recreated) dumps the
/// whole store instead. A trailing partial line is not written.
pub fn export_lines<V, W>(store: &LogStore<V>, from: Cursor, out: &mut W) -> Result<ExportSummary>
where
    V: Volume,
    W: Write + ?Sized,
{
    let store_len = store.len()?;
    let start = if from.offset() > store_len {
        warn!(
            cursor = from.offset(),
            store_len, "export cursor is past the end of the store, dumping everything"
        );
        Cursor::START
    } else {
        from
    };

    let mut summary = ExportSummary {
        start,
        end: start,
        ..ExportSummary::default()
    };
    let sink_error = |source: std::io::Error| StorageError::Write {
        name: SINK_NAME.to_string(),
        source,
    };

    for line in store.read_from(start.offset())? {
        let line = line?;
        out.write_all(&line.bytes).map_err(sink_error)?;
        summary.lines += 1;
        summary.bytes += line.bytes.len() as u64;
        summary.end = Cursor(line.end);
    }
    out.flush().map_err(sink_error)?;

    info!(
        from = start.offset(),
        to = summary.end.offset(),
        lines = summary.lines,
        "export complete"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::frame::SensorReading;
    use crate::record::{GeoFix, LogRecord, Status, HEADER};
    use crate::volume::MemVolume;
    use chrono::{TimeZone, Utc};

    fn store_with(records: u32) -> LogStore<MemVolume> {
        let store = LogStore::open_or_create(MemVolume::new(), "data.txt").unwrap();
        for minute in 0..records {
            let fix = GeoFix {
                timestamp: Utc.with_ymd_and_hms(2021, 5, 3, 14, minute, 0).unwrap(),
                latitude: 1.0,
                longitude: 2.0,
                elevation_m: 3.0,
            };
            let record = LogRecord::new(fix, SensorReading::default(), Status::Good);
            store.append(&record).unwrap();
        }
        store
    }

    /// Sink that refuses every write.
    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_full_export_includes_header() {
        let store = store_with(3);
        let mut out = Vec::new();

        let summary = export_lines(&store, Cursor::START, &mut out).unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with(HEADER));
        assert_eq!(text.lines().count(), 4);
        assert_eq!(summary.lines, 4);
        assert_eq!(summary.end, Cursor(store.len().unwrap()));
        assert_eq!(summary.bytes, store.len().unwrap());
    }

    #[test]
    fn test_export_from_cursor_only_newer_lines() {
        let store = store_with(2);
        let mid = store.len().unwrap();
        store
            .append(&LogRecord::new(
                GeoFix {
                    timestamp: Utc.with_ymd_and_hms(2021, 5, 3, 15, 0, 0).unwrap(),
                    latitude: 1.0,
                    longitude: 2.0,
                    elevation_m: 3.0,
                },
                SensorReading::default(),
                Status::Good,
            ))
            .unwrap();
        let mut out = Vec::new();

        let summary = export_lines(&store, Cursor(mid), &mut out).unwrap();

        let text = String::from_utf8(out).unwrap();
        assert_eq!(summary.lines, 1);
        assert!(text.starts_with("2021-05-03T15:00:00+00:00,"));
    }

    #[test]
    fn test_export_skips_partial_tail() {
        let store = store_with(2);
        let complete = store.len().unwrap();
        store.volume().append_raw("data.txt", b"2021-05-03T16:00:00+00:00,1,2");
        let mut out = Vec::new();

        let summary = export_lines(&store, Cursor::START, &mut out).unwrap();

        assert_eq!(summary.end, Cursor(complete));
        assert_eq!(out.len() as u64, complete);
    }

    #[test]
    fn test_export_cursor_past_end_dumps_everything() {
        let store = store_with(1);
        let mut out = Vec::new();

        let summary = export_lines(&store, Cursor(1_000_000), &mut out).unwrap();

        assert_eq!(summary.start, Cursor::START);
        assert_eq!(summary.lines, 2);
    }

    #[test]
    fn test_export_sink_failure_is_storage_error() {
        let store = store_with(1);
        let result = export_lines(&store, Cursor::START, &mut BrokenPipe);
        assert!(matches!(
            result,
            Err(Error::Storage(StorageError::Write { .. }))
        ));
    }
}
