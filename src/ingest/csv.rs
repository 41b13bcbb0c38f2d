//! Price CSV ingest and export. One row per stay date, one column per hotel:
//!
//! ```text
//! Date,Hotel Aurora,Hotel Borealis
//! 2026-08-10,120,95.5
//! 2026-08-11,,null
//! ```
//!
//! Empty or `n/a` / `na` / `null` / `none` price fields are the absent marker;
//! unparsable numbers are treated the same way rather than failing the ingest.

use chrono::NaiveDate;

use crate::error::{AppError, Result};

/// Parsed price table: hotel column order from the header plus one price row
/// per stay date, aligned to that order.
#[derive(Debug, Clone)]
pub struct PriceCsv {
    pub hotel_names: Vec<String>,
    pub rows: Vec<(NaiveDate, Vec<Option<f64>>)>,
}

impl PriceCsv {
    pub fn min_date(&self) -> Option<NaiveDate> {
        self.rows.iter().map(|(d, _)| *d).min()
    }

    pub fn max_date(&self) -> Option<NaiveDate> {
        self.rows.iter().map(|(d, _)| *d).max()
    }
}

/// Absent-price marker parsing; never an error.
pub fn parse_price(field: &str) -> Option<f64> {
    let s = field.trim();
    if s.is_empty() {
        return None;
    }
    match s.to_ascii_lowercase().as_str() {
        "n/a" | "na" | "null" | "none" => None,
        _ => s.parse().ok(),
    }
}

/// Minimal CSV parser, quote and CRLF tolerant. Blank lines are dropped.
fn parse_rows(text: &str) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '"' => {
                if in_quotes {
                    if matches!(chars.peek(), Some('"')) {
                        chars.next();
                        field.push('"');
                    } else {
                        in_quotes = false;
                    }
                } else {
                    in_quotes = true;
                }
            }
            ',' if !in_quotes => row.push(std::mem::take(&mut field)),
            '\n' | '\r' if !in_quotes => {
                if ch == '\r' && matches!(chars.peek(), Some('\n')) {
                    chars.next();
                }
                row.push(std::mem::take(&mut field));
                if !(row.len() == 1 && row[0].is_empty()) {
                    rows.push(std::mem::take(&mut row));
                } else {
                    row.clear();
                }
            }
            _ => field.push(ch),
        }
    }

    row.push(field);
    if !(row.len() == 1 && row[0].is_empty()) {
        rows.push(row);
    }
    rows
}

/// Parse a full price CSV document. The first column must be `Date`; malformed
/// headers, dates, or ragged rows are fatal — only prices may be absent.
pub fn read_price_csv(text: &str) -> Result<PriceCsv> {
    let mut rows = parse_rows(text).into_iter();
    let header = rows.next().ok_or_else(|| AppError::Csv("CSV is empty".to_string()))?;
    if !header.first().is_some_and(|c| c.trim().eq_ignore_ascii_case("date")) {
        return Err(AppError::Csv("first column must be 'Date'".to_string()));
    }
    let hotel_names: Vec<String> = header[1..].iter().map(|s| s.trim().to_string()).collect();
    if hotel_names.is_empty() {
        return Err(AppError::Csv("no hotel columns in header".to_string()));
    }

    let mut out_rows = Vec::new();
    for (i, row) in rows.enumerate() {
        let line = i + 2;
        let date: NaiveDate = row[0]
            .trim()
            .parse()
            .map_err(|_| AppError::Csv(format!("line {line}: malformed date {:?}", row[0])))?;
        if row.len() != hotel_names.len() + 1 {
            return Err(AppError::Csv(format!(
                "line {line}: expected {} fields, found {}",
                hotel_names.len() + 1,
                row.len()
            )));
        }
        let prices = row[1..].iter().map(|f| parse_price(f)).collect();
        out_rows.push((date, prices));
    }

    Ok(PriceCsv { hotel_names, rows: out_rows })
}

fn needs_quotes(field: &str) -> bool {
    field.contains(',') || field.contains('"') || field.contains('\n') || field.contains('\r')
}

fn push_field(out: &mut String, field: &str) {
    if needs_quotes(field) {
        out.push('"');
        out.push_str(&field.replace('"', "\"\""));
        out.push('"');
    } else {
        out.push_str(field);
    }
}

/// Export-side price formatting: `null` for absent, integral when the value is
/// within rounding noise of a whole amount (matches the report rendering).
fn price_field(price: Option<f64>) -> String {
    match price {
        None => "null".to_string(),
        Some(v) if (v - v.round()).abs() < 1e-6 => format!("{}", v.round() as i64),
        Some(v) => format!("{v}"),
    }
}

/// Serialize a price table back into the ingest format.
pub fn write_price_csv(csv: &PriceCsv) -> String {
    let mut out = String::new();
    out.push_str("Date");
    for name in &csv.hotel_names {
        out.push(',');
        push_field(&mut out, name);
    }
    out.push('\n');

    for (date, prices) in &csv.rows {
        out.push_str(&date.to_string());
        for price in prices {
            out.push(',');
            push_field(&mut out, &price_field(*price));
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absence_markers_parse_to_none() {
        for field in ["", "  ", "n/a", "NA", "null", "None", "abc", "12,5"] {
            assert_eq!(parse_price(field), None, "field {field:?}");
        }
        assert_eq!(parse_price("120"), Some(120.0));
        assert_eq!(parse_price(" 95.5 "), Some(95.5));
    }

    #[test]
    fn reads_a_simple_document() {
        let csv = read_price_csv("Date,Aurora,Borealis\n2026-08-10,120,95.5\n2026-08-11,,null\n")
            .expect("valid csv");
        assert_eq!(csv.hotel_names, vec!["Aurora", "Borealis"]);
        assert_eq!(csv.rows.len(), 2);
        assert_eq!(csv.rows[0].1, vec![Some(120.0), Some(95.5)]);
        assert_eq!(csv.rows[1].1, vec![None, None]);
        assert_eq!(csv.min_date(), Some("2026-08-10".parse().expect("date")));
        assert_eq!(csv.max_date(), Some("2026-08-11".parse().expect("date")));
    }

    #[test]
    fn tolerates_crlf_and_quoted_names() {
        let csv = read_price_csv("Date,\"Grand, Hotel \"\"Rex\"\"\"\r\n2026-08-10,100\r\n")
            .expect("valid csv");
        assert_eq!(csv.hotel_names, vec!["Grand, Hotel \"Rex\""]);
        assert_eq!(csv.rows[0].1, vec![Some(100.0)]);
    }

    #[test]
    fn rejects_missing_date_header() {
        assert!(matches!(read_price_csv("Day,Aurora\n"), Err(AppError::Csv(_))));
        assert!(matches!(read_price_csv(""), Err(AppError::Csv(_))));
    }

    #[test]
    fn rejects_malformed_dates_and_ragged_rows() {
        assert!(matches!(
            read_price_csv("Date,Aurora\nnot-a-date,100\n"),
            Err(AppError::Csv(_))
        ));
        assert!(matches!(
            read_price_csv("Date,Aurora,Borealis\n2026-08-10,100\n"),
            Err(AppError::Csv(_))
        ));
    }

    #[test]
    fn export_uses_null_markers_and_integral_prices() {
        let csv = PriceCsv {
            hotel_names: vec!["Aurora".to_string(), "Grand, Hotel".to_string()],
            rows: vec![
                ("2026-08-10".parse().expect("date"), vec![Some(120.0), Some(95.5)]),
                ("2026-08-11".parse().expect("date"), vec![None, Some(101.25)]),
            ],
        };
        let text = write_price_csv(&csv);
        assert_eq!(
            text,
            "Date,Aurora,\"Grand, Hotel\"\n2026-08-10,120,95.5\n2026-08-11,null,101.25\n"
        );
    }

    #[test]
    fn export_roundtrips_through_read() {
        let text = "Date,Aurora\n2026-08-10,120\n2026-08-11,null\n";
        let csv = read_price_csv(text).expect("read");
        assert_eq!(write_price_csv(&csv), text);
    }
}
