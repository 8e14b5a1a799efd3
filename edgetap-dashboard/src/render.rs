//! Plain-text rendering of the dashboard for terminals and logs.

use crate::metrics::DerivedMetrics;
use crate::state::DashboardState;
use crate::view::{MISSING, RowDetail, ViewFilter};
use edgetap_core::{StorageRow, timefmt};
use std::fmt::Write;

/// Render status cards, the per-path table and up to `max_rows` of the
/// filtered window.
pub fn render(state: &DashboardState, filter: &ViewFilter, max_rows: usize) -> String {
    let window = state.window();
    let metrics = DerivedMetrics::compute(window);
    let mut out = String::new();

    render_status_cards(&mut out, &metrics);
    out.push('\n');
    render_path_table(&mut out, &metrics);
    out.push('\n');

    let shown = filter.apply(window);
    let _ = writeln!(
        out,
        "Requests ({} shown of {} in window, {} buffered)",
        shown.len().min(max_rows),
        window.len(),
        state.buffer().len()
    );
    let _ = writeln!(
        out,
        "{:<24} {:<7} {:<28} {:>6} {:>12} {:<7} {}",
        "Time", "Method", "Path", "Status", "Latency (ms)", "Country", "IP"
    );
    for row in shown.into_iter().take(max_rows) {
        render_row(&mut out, row);
    }

    if state.has_more() {
        out.push_str("(more available)\n");
    }
    if let Some(err) = state.last_error() {
        let _ = writeln!(out, "last fetch failed: {err}");
    }
    out
}

fn render_status_cards(out: &mut String, metrics: &DerivedMetrics) {
    let _ = writeln!(
        out,
        "total {}  |  2xx {}  |  3xx {}  |  4xx {}  |  5xx {}",
        metrics.total,
        metrics.status.success,
        metrics.status.redirect,
        metrics.status.client_error,
        metrics.status.server_error,
    );
}

fn render_path_table(out: &mut String, metrics: &DerivedMetrics) {
    let _ = writeln!(
        out,
        "{:<28} {:>6} {:>6} {:>7} {:>6} {:>6} {:>6} {:>6}",
        "Path", "Count", "Errors", "Err %", "Avg", "Min", "Max", "P95"
    );
    for p in &metrics.paths {
        let _ = writeln!(
            out,
            "{:<28} {:>6} {:>6} {:>7.1} {:>6} {:>6} {:>6} {:>6}",
            truncate(&p.path, 28),
            p.total,
            p.errors,
            p.error_rate,
            p.avg_latency_ms,
            p.min_latency_ms,
            p.max_latency_ms,
            p.p95_latency_ms,
        );
    }
}

fn render_row(out: &mut String, row: &StorageRow) {
    let _ = writeln!(
        out,
        "{:<24} {:<7} {:<28} {:>6} {:>12} {:<7} {}",
        timefmt::format(&row.ts),
        row.method,
        truncate(&row.path, 28),
        row.status,
        row.latency_ms,
        row.country,
        row.ip,
    );
}

/// Full record for one request: summary fields, then request headers and
/// edge metadata.
pub fn render_detail(detail: &RowDetail) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Request {}", detail.request_id);
    let fields: [(&str, String); 8] = [
        ("Time", detail.ts.clone()),
        ("Method", detail.method.clone()),
        ("URL", detail.url.clone()),
        ("Path", detail.path.clone()),
        ("Status", detail.status.to_string()),
        ("Latency", format!("{} ms", detail.latency_ms)),
        ("IP", detail.ip.clone()),
        ("User-Agent", detail.user_agent.clone()),
    ];
    for (label, value) in &fields {
        let _ = writeln!(out, "  {label:<11} {value}");
    }

    out.push_str("\nHeaders\n");
    if detail.headers.is_empty() {
        let _ = writeln!(out, "  {MISSING}");
    }
    for (name, value) in &detail.headers {
        let _ = writeln!(out, "  {name}: {value}");
    }

    out.push_str("\nEdge\n");
    if detail.edge.is_empty() {
        let _ = writeln!(out, "  {MISSING}");
    }
    for (key, value) in &detail.edge {
        match value {
            serde_json::Value::String(s) => {
                let _ = writeln!(out, "  {key}: {s}");
            }
            other => {
                let _ = writeln!(out, "  {key}: {other}");
            }
        }
    }
    out
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut cut: String = s.chars().take(max.saturating_sub(1)).collect();
    cut.push('…');
    cut
}
