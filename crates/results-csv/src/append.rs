use crate::{SummaryRow, SummaryWriter};
use anyhow::Result;
use std::path::Path;
use tracing::debug;

/// Open (or create) the summary file at `path` and add one row.
pub fn append_summary(path: impl AsRef<Path>, row: &SummaryRow) -> Result<()> {
    let mut writer = SummaryWriter::open_or_create(path)?;
    writer.append(row)?;
    debug!(path = %writer.path().display(), created = writer.created(), "summary row written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use quic_probe::CounterSnapshot;
    use time::macros::datetime;

    fn row(total: u32, reachable: u32) -> SummaryRow {
        let counters = CounterSnapshot { total, reachable, ..Default::default() };
        SummaryRow::new(datetime!(2024-06-01 12:00:00 UTC), &counters).unwrap()
    }

    #[test]
    fn header_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("summary.csv");
        append_summary(&path, &row(5, 3)).unwrap();
        append_summary(&path, &row(5, 4)).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "UtcDateTime,Total,Reachable,TooMuch,WayTooMuch,MultiRtt,Retry,IPv6,QuicV2",
                "2024.06.01-12:00:00,5,3,0,0,0,0,0,0",
                "2024.06.01-12:00:00,5,4,0,0,0,0,0,0",
            ]
        );
    }

    #[test]
    fn existing_file_is_appended_without_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("existing.csv");
        std::fs::write(&path, "previous\n").unwrap();
        let writer = SummaryWriter::open_or_create(&path).unwrap();
        assert!(!writer.created());
        drop(writer);
        append_summary(&path, &row(1, 1)).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "previous\n2024.06.01-12:00:00,1,1,0,0,0,0,0,0\n");
    }

    #[test]
    fn missing_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("no-such-dir").join("summary.csv");
        assert!(append_summary(&path, &row(1, 0)).is_err());
    }
}
