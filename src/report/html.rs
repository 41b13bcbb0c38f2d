//! HTML rendering of the engine's reporting matrix. Pure formatting over the
//! matrix — no business logic; severity tiers and deltas arrive pre-computed.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;

use crate::config::{RunWindow, SpikeThresholds};
use crate::engine::{Comparison, ReportMatrix};
use crate::error::Result;

/// Report-wide context shown in the page header and legend.
#[derive(Debug, Clone)]
pub struct ReportMeta {
    pub generated_at: NaiveDateTime,
    pub window: RunWindow,
    pub lookback_days_avg: usize,
    pub avg_prev_offset: usize,
    pub thresholds: SpikeThresholds,
}

const CSS: &str = "\
<style>
  body { font-family: -apple-system, Segoe UI, Roboto, Helvetica, Arial, sans-serif; margin: 20px; }
  table { border-collapse: collapse; width: 100%; }
  th, td { border: 1px solid #ddd; padding: 6px 8px; text-align: right; font-variant-numeric: tabular-nums; }
  th.sticky { position: sticky; top: 0; background: #fafafa; z-index: 1; }
  td.date, th.date { text-align: left; }
  td.sev-low { background-color: #ffef99; }
  td.sev-medium { background-color: #ffc78f; }
  td.sev-high { background-color: #ff9aa2; }
  .delta-pos { color: #b45309; font-size: 0.85em; }
  .delta-neg { color: #065f46; font-size: 0.85em; }
  .muted { color: #6b7280; font-size: 0.85em; }
  .legend { margin: 8px 0 16px; font-size: 0.9em; }
  .legend span { display: inline-block; margin-right: 12px; }
  .pill { border-radius: 999px; padding: 2px 8px; font-size: 0.75em; }
  .pill.low { background: #ffef99; }
  .pill.medium { background: #ffc78f; }
  .pill.high { background: #ff9aa2; }
</style>
";

/// "-" for absent; integral rendering when the value is within rounding noise
/// of a whole amount, two decimals otherwise.
pub fn fmt_money(v: Option<f64>) -> String {
    match v {
        None => "-".to_string(),
        Some(v) if (v - v.round()).abs() < 1e-6 => format!("{}", v.round() as i64),
        Some(v) => format!("{v:.2}"),
    }
}

/// Signed whole-percent rendering: +13%, -5%. Absent deltas render as empty
/// strings upstream, never as "0%".
pub fn fmt_delta(pct: f64) -> String {
    let sign = if pct >= 0.0 { "+" } else { "" };
    format!("{sign}{:.0}%", pct * 100.0)
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn delta_span(pct: f64) -> String {
    let class = if pct >= 0.0 { "delta-pos" } else { "delta-neg" };
    format!(" <span class='{class}'>({})</span>", fmt_delta(pct))
}

fn sev_class(cmp: &Comparison) -> Option<String> {
    cmp.tier.map(|t| format!("sev-{t}"))
}

pub fn render_report(matrix: &ReportMatrix, meta: &ReportMeta) -> String {
    let mut html = String::new();

    html.push_str("<html><head><meta charset='utf-8'>");
    html.push_str(CSS);
    html.push_str("</head><body>\n");

    let ts = meta.generated_at.format("%Y-%m-%d %H:%M");
    let _ = writeln!(html, "<h2>Hotel Prices Report — {ts}</h2>");

    let window = format!(
        "{} → {}",
        meta.window.start.map_or_else(|| "open".to_string(), |d| d.to_string()),
        meta.window.end.map_or_else(|| "open".to_string(), |d| d.to_string()),
    );
    let t = &meta.thresholds;
    let _ = writeln!(
        html,
        "<div class='legend'>\
         <span><strong>Window:</strong> {window}</span>\
         <span><strong>Avg spike vs trailing:</strong> last {lookback} runs</span>\
         <span><strong>Δ Avg vs run:</strong> n-{offset}</span>\
         <span><strong>Spikes:</strong> \
         <span class='pill low'>low ≥ {low:.0}%</span> \
         <span class='pill medium'>med ≥ {medium:.0}%</span> \
         <span class='pill high'>high ≥ {high:.0}%</span></span>\
         </div>",
        lookback = meta.lookback_days_avg,
        offset = meta.avg_prev_offset,
        low = t.low * 100.0,
        medium = t.medium * 100.0,
        high = t.high * 100.0,
    );

    html.push_str("<table>\n<tr><th class='sticky date'>Date</th>");
    for hotel in &matrix.hotels {
        let _ = write!(html, "<th class='sticky'>{}</th>", escape_html(&hotel.name));
    }
    html.push_str("<th class='sticky'>Avg</th><th class='sticky'>Δ Avg vs prev</th></tr>\n");

    for row in &matrix.rows {
        let _ = write!(html, "<tr><td class='date'>{}</td>", row.stay_date);

        for cell in &row.cells {
            let delta = cell.delta.map(delta_span).unwrap_or_default();
            let _ = write!(html, "<td>{}{delta}</td>", fmt_money(cell.price));
        }

        // Avg cell: highlighted when the trailing comparison classifies, with
        // the signed pct kept visible so direction survives the highlight.
        let (avg_class, avg_delta) = match &row.avg_spike {
            Some(cmp) => (
                sev_class(cmp).map(|c| format!(" class='{c}'")).unwrap_or_default(),
                delta_span(cmp.pct),
            ),
            None => (String::new(), String::new()),
        };
        let _ = write!(html, "<td{avg_class}>{}{avg_delta}</td>", fmt_money(row.row_avg));

        // Δ Avg vs run n-k.
        match &row.delta_vs_prev {
            Some(cmp) => {
                let class = sev_class(cmp)
                    .map(|c| format!(" class='{c}'"))
                    .unwrap_or_else(|| " class='muted'".to_string());
                let _ = write!(html, "<td{class}>{}</td>", fmt_delta(cmp.pct));
            }
            None => html.push_str("<td class='muted'></td>"),
        }
        html.push_str("</tr>\n");
    }

    html.push_str("</table>\n");
    let _ = writeln!(
        html,
        "<p class='muted'>Only the Avg cell (vs the trailing {lookback}-run average) and the \
         Δ Avg vs run n-{offset} cell are highlighted when a spike crosses the configured \
         thresholds. Missing values are ignored in averages.</p>",
        lookback = meta.lookback_days_avg,
        offset = meta.avg_prev_offset,
    );
    html.push_str("</body></html>\n");
    html
}

/// Render and write the timestamped report artifact; returns its path.
pub fn write_report(report_dir: &Path, matrix: &ReportMatrix, meta: &ReportMeta) -> Result<PathBuf> {
    std::fs::create_dir_all(report_dir)?;
    let name = format!("report_{}.html", meta.generated_at.format("%Y%m%d_%H%M"));
    let path = report_dir.join(name);
    std::fs::write(&path, render_report(matrix, meta))?;
    Ok(path)
}
