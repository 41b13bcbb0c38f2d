//! Regenerates the reports index: one page linking every report artifact,
//! newest first, with a shortcut to the latest.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Extract the `YYYYMMDD_HHMM` stamp from a `report_<stamp>.html` file name.
/// Anything that doesn't match the artifact naming is skipped.
fn parse_report_stamp(name: &str) -> Option<&str> {
    let stamp = name.strip_prefix("report_")?.strip_suffix(".html")?;
    let bytes = stamp.as_bytes();
    if bytes.len() != 13 || bytes[8] != b'_' {
        return None;
    }
    let digits_ok = stamp[..8].bytes().all(|b| b.is_ascii_digit())
        && stamp[9..].bytes().all(|b| b.is_ascii_digit());
    digits_ok.then_some(stamp)
}

/// Scan `report_dir` for report artifacts and rewrite `index.html`.
pub fn rebuild_index(report_dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(report_dir)?;

    let mut entries: Vec<(String, String)> = Vec::new();
    for entry in std::fs::read_dir(report_dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if let Some(stamp) = parse_report_stamp(name) {
            entries.push((stamp.to_string(), name.to_string()));
        }
    }
    entries.sort_by(|a, b| b.0.cmp(&a.0));

    let mut html = String::new();
    html.push_str("<html><head><meta charset='utf-8'><title>Reports</title>\n");
    html.push_str(
        "<style>body{font-family:-apple-system,Segoe UI,Roboto,Helvetica,Arial,sans-serif;\
         margin:20px} ul{line-height:1.8}</style></head><body>\n",
    );
    html.push_str("<h2>Hotel Prices Reports</h2>\n");
    if let Some((_, latest)) = entries.first() {
        let _ = writeln!(html, "<p><strong>Latest:</strong> <a href='{latest}'>{latest}</a></p>");
    }
    html.push_str("<h3>All Reports</h3>\n<ul>\n");
    for (_, name) in &entries {
        let _ = writeln!(html, "<li><a href='{name}'>{name}</a></li>");
    }
    html.push_str("</ul>\n</body></html>\n");

    let path = report_dir.join("index.html");
    std::fs::write(&path, html)?;
    Ok(path)
}
