use quic_probe::{AttemptOutcome, CounterSnapshot, PassReport, Verdict};
use serde_json::{json, Value};
use std::time::Duration;
use time::format_description::well_known::Rfc3339;

pub fn stats_header() -> String {
    format!(
        "{:>30}           RTT        TIME_I        TIME_H               SEND:RECV      C1      S1    FAMILY",
        "SERVER"
    )
}

/// One table row. Unreachable hosts get the name column only.
pub fn stats_line(outcome: &AttemptOutcome) -> String {
    let mut line = format!("{:>30}", outcome.host);
    if let Some(c) = outcome.classification() {
        let s = &c.stats;
        line.push_str(&format!(
            "    {}    {}    {}    {}:{} {}:{} ({:2.1}x)    {:>4}    {:>4}    {}     {}",
            ms(Duration::from_micros(s.rtt_us)),
            ms(c.initial_time),
            ms(c.handshake_time),
            s.send_total_packets,
            s.recv_total_packets,
            s.send_total_bytes,
            s.recv_total_bytes,
            c.amplification,
            flight(s.client_flight1_bytes),
            flight(s.server_flight1_bytes),
            c.family,
            c.tag_string(),
        ));
    }
    line
}

fn ms(d: Duration) -> String {
    let us = d.as_micros();
    format!("{:>3}.{:03} ms", us / 1000, us % 1000)
}

fn flight(bytes: Option<u32>) -> String {
    bytes.map(|b| b.to_string()).unwrap_or_else(|| "-".to_string())
}

/// Closing block under the table; empty unless more than one host was reachable.
pub fn summary_lines(counters: &CounterSnapshot) -> Vec<String> {
    if counters.reachable <= 1 {
        return Vec::new();
    }
    let mut lines = vec![
        format!("{:>4} domain(s) attempted", counters.total),
        format!("{:>4} domain(s) reachable", counters.reachable),
    ];
    let optional = [
        (counters.multi_rtt, "required multiple round trips (*)"),
        (counters.too_much, "exceeded amplification limits (!)"),
        (counters.way_too_much, "severely exceeded amplification limits"),
        (counters.retry, "sent RETRY packets (R)"),
        (counters.ipv6, "connected over IPv6"),
        (counters.quic_v2, "negotiated QUIC v2"),
    ];
    for (count, what) in optional {
        if count != 0 {
            lines.push(format!("{count:>4} domain(s) {what}"));
        }
    }
    lines
}

pub fn host_json(outcome: &AttemptOutcome) -> Value {
    match &outcome.verdict {
        Verdict::Reachable(c) => {
            let s = &c.stats;
            json!({
                "host": outcome.host,
                "reachable": true,
                "remote": c.remote.to_string(),
                "family": c.family.to_string(),
                "version": c.version.to_string(),
                "rtt_us": s.rtt_us,
                "initial_us": c.initial_time.as_micros() as u64,
                "handshake_us": c.handshake_time.as_micros() as u64,
                "send_packets": s.send_total_packets,
                "recv_packets": s.recv_total_packets,
                "send_bytes": s.send_total_bytes,
                "recv_bytes": s.recv_total_bytes,
                "amplification": c.amplification,
                "client_flight1_bytes": s.client_flight1_bytes,
                "server_flight1_bytes": s.server_flight1_bytes,
                "multi_rtt": c.multi_rtt,
                "too_much": c.excess_amplification,
                "way_too_much": c.severe_amplification,
                "retry": c.retry,
                "elapsed_ms": outcome.elapsed.as_millis() as u64,
            })
        }
        Verdict::Unreachable(reason) => json!({
            "host": outcome.host,
            "reachable": false,
            "error": reason.to_string(),
            "elapsed_ms": outcome.elapsed.as_millis() as u64,
        }),
    }
}

fn pass_header(report: &PassReport) -> Value {
    json!({
        "pass": report.pass,
        "started_at": report.started_at.format(&Rfc3339).unwrap_or_default(),
        "elapsed_ms": report.elapsed.as_millis() as u64,
        "counters": report.counters,
    })
}

pub fn pass_json(report: &PassReport) -> Value {
    let mut doc = pass_header(report);
    doc["hosts"] = Value::Array(report.outcomes.iter().map(host_json).collect());
    doc
}

/// One line per host, then the pass counters.
pub fn pass_jsonl(report: &PassReport) -> serde_json::Result<Vec<String>> {
    let mut lines = report
        .outcomes
        .iter()
        .map(|o| serde_json::to_string(&host_json(o)))
        .collect::<serde_json::Result<Vec<_>>>()?;
    lines.push(serde_json::to_string(&pass_header(report))?);
    Ok(lines)
}
