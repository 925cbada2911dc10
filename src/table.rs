use std::borrow::Cow;
use std::io::{Cursor, Read};
use std::path::Path;

use calamine::{open_workbook_auto_from_rs, Data, Reader};
use chrono::NaiveTime;
use encoding_rs::WINDOWS_1252;

use crate::error::{PipelineError, Result};

const WORKBOOK_EXTENSIONS: [&str; 2] = ["xlsx", "xls"];

/// A spreadsheet export as read from disk, before any validation.
#[derive(Debug, Clone, Default)]
pub struct RawTable {
    /// Column names as the file states them, trimmed.
    pub headers: Vec<String>,
    /// One entry per data row, positionally aligned with `headers`.
    pub rows: Vec<Vec<String>>,
}

impl RawTable {
    /// Excel workbooks are picked by extension; anything else is read as
    /// delimited text.
    pub async fn load(path: &Path) -> Result<Self> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|err| PipelineError::Read {
                path: path.to_path_buf(),
                source: err.into(),
            })?;

        if is_workbook(path) {
            Self::from_workbook(bytes).map_err(|source| PipelineError::Workbook {
                path: path.to_path_buf(),
                source,
            })
        } else {
            Self::from_reader(bytes.as_slice()).map_err(|source| PipelineError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    }

    /// Reads the first worksheet; its first row holds the headers.
    pub fn from_workbook(bytes: Vec<u8>) -> std::result::Result<Self, calamine::Error> {
        let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes))?;
        let range = workbook
            .worksheet_range_at(0)
            .ok_or(calamine::Error::Msg("workbook has no worksheets"))??;

        let mut lines = range.rows();
        let headers = lines
            .next()
            .map(|line| line.iter().map(|cell| render_cell(cell).trim().to_string()).collect())
            .unwrap_or_default();
        let rows = lines
            .map(|line| line.iter().map(render_cell).collect::<Vec<_>>())
            .filter(|row| !row.iter().all(|cell| cell.trim().is_empty()))
            .collect();

        Ok(Self { headers, rows })
    }

    /// Reads delimited text, sniffing `;` versus `,` from the header line.
    /// Bytes that are not UTF-8 are decoded as Windows-1252.
    pub fn from_reader<R: Read>(mut reader: R) -> std::result::Result<Self, csv::Error> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        let text = match std::str::from_utf8(&bytes) {
            Ok(text) => Cow::Borrowed(text),
            Err(_) => WINDOWS_1252.decode_without_bom_handling(&bytes).0,
        };
        let text = text.strip_prefix('\u{feff}').unwrap_or(&text);

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(sniff_delimiter(text))
            .flexible(true)
            .from_reader(text.as_bytes());

        let headers = reader
            .headers()?
            .iter()
            .map(|header| header.trim().to_string())
            .collect::<Vec<_>>();

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            if record.iter().all(|cell| cell.trim().is_empty()) {
                continue;
            }
            rows.push(record.iter().map(str::to_string).collect());
        }

        Ok(Self { headers, rows })
    }

    pub fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|header| header == name)
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

fn is_workbook(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map_or(false, |ext| {
            WORKBOOK_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
}

/// Whole-number floats render without a fraction so numeric ids survive;
/// date cells render as ISO dates.
fn render_cell(cell: &Data) -> String {
    match cell {
        Data::Empty | Data::Error(_) => String::new(),
        Data::String(value) | Data::DateTimeIso(value) | Data::DurationIso(value) => value.clone(),
        Data::Int(value) => value.to_string(),
        Data::Float(value) if value.fract() == 0.0 && value.abs() < 1e15 => {
            (*value as i64).to_string()
        }
        Data::Float(value) => value.to_string(),
        Data::Bool(value) => value.to_string(),
        Data::DateTime(moment) => match moment.as_datetime() {
            Some(moment) if moment.time() == NaiveTime::MIN => moment.date().to_string(),
            Some(moment) => moment.format("%Y-%m-%d %H:%M:%S").to_string(),
            None => moment.as_f64().to_string(),
        },
    }
}

fn sniff_delimiter(text: &str) -> u8 {
    let header = text.lines().next().unwrap_or_default();
    let semicolons = header.matches(';').count();
    let commas = header.matches(',').count();
    if semicolons > commas {
        b';'
    } else {
        b','
    }
}
