use anyhow::Result;
use quic_probe::CounterSnapshot;
use serde::Serialize;
use time::macros::format_description;
use time::OffsetDateTime;

/// One pass worth of counters, as stored in the summary file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SummaryRow {
    #[serde(rename = "UtcDateTime")]
    pub utc_date_time: String,
    #[serde(rename = "Total")]
    pub total: u32,
    #[serde(rename = "Reachable")]
    pub reachable: u32,
    #[serde(rename = "TooMuch")]
    pub too_much: u32,
    #[serde(rename = "WayTooMuch")]
    pub way_too_much: u32,
    #[serde(rename = "MultiRtt")]
    pub multi_rtt: u32,
    #[serde(rename = "Retry")]
    pub retry: u32,
    #[serde(rename = "IPv6")]
    pub ipv6: u32,
    #[serde(rename = "QuicV2")]
    pub quic_v2: u32,
}

pub const HEADER: [&str; 9] =
    ["UtcDateTime", "Total", "Reachable", "TooMuch", "WayTooMuch", "MultiRtt", "Retry", "IPv6", "QuicV2"];

impl SummaryRow {
    pub fn new(at: OffsetDateTime, counters: &CounterSnapshot) -> Result<Self> {
        Ok(SummaryRow {
            utc_date_time: format_timestamp(at)?,
            total: counters.total,
            reachable: counters.reachable,
            too_much: counters.too_much,
            way_too_much: counters.way_too_much,
            multi_rtt: counters.multi_rtt,
            retry: counters.retry,
            ipv6: counters.ipv6,
            quic_v2: counters.quic_v2,
        })
    }
}

/// `YYYY.MM.DD-hh:mm:ss`, converted to UTC first.
pub fn format_timestamp(at: OffsetDateTime) -> Result<String> {
    let fmt = format_description!("[year].[month].[day]-[hour]:[minute]:[second]");
    Ok(at.to_offset(time::UtcOffset::UTC).format(&fmt)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn timestamp_is_utc_and_zero_padded() {
        assert_eq!(format_timestamp(datetime!(2024-03-05 07:08:09 UTC)).unwrap(), "2024.03.05-07:08:09");
        assert_eq!(format_timestamp(datetime!(2024-03-05 01:00:00 +02:00)).unwrap(), "2024.03.04-23:00:00");
    }

    #[test]
    fn row_copies_counters() {
        let counters = CounterSnapshot { total: 5, reachable: 3, multi_rtt: 2, ipv6: 1, ..Default::default() };
        let row = SummaryRow::new(datetime!(2024-01-01 00:00:00 UTC), &counters).unwrap();
        assert_eq!(row.total, 5);
        assert_eq!(row.reachable, 3);
        assert_eq!(row.multi_rtt, 2);
        assert_eq!(row.ipv6, 1);
        assert_eq!(row.quic_v2, 0);
    }
}
