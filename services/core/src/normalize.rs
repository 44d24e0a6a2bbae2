//! Record normalizer - turns uploaded weight/loss sheets into typed records
//!
//! Responsibilities:
//! - Decode raw bytes (UTF-8, falling back to Windows-1252 exports)
//! - Read CSV or the first sheet of an XLS/XLSX/ODS workbook into a RawTable
//! - Locate the required columns by header name
//! - Parse DD/MM/YY dates, karat and masses; derive pure gold fields
//!
//! A single bad row fails the whole file. Nothing is half-imported.

use crate::error::InputError;
use crate::model::{LossRecord, RecordKind, Records, WeightRecord};
use crate::purity::{round3, to_pure_gold};
use calamine::{open_workbook_auto_from_rs, Data, DataType, Reader};
use chrono::NaiveDate;
use std::io::Cursor;
use tracing::debug;

/// Header names used by the shop's exports.
pub mod columns {
    pub const DATE: &str = "DATE";
    pub const ITEM_NO: &str = "ITEM NO.";
    pub const KT: &str = "KT";
    pub const KARIGAR: &str = "KAR";
    pub const PROCESS: &str = "PROCESS";
    pub const LOSS: &str = "LOSS";
    pub const GROSS_WT: &str = "GROSS WT";
    pub const NET_WT: &str = "NET WT.";

    pub const WEIGHT_REQUIRED: &[&str] = &[DATE, ITEM_NO, KT, GROSS_WT, NET_WT];
    pub const LOSS_REQUIRED: &[&str] = &[DATE, ITEM_NO, KT, KARIGAR, PROCESS, LOSS];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Csv,
    Workbook,
}

impl FileFormat {
    /// Detect from a file name or MIME type. Anything that is not a
    /// spreadsheet is treated as delimited text.
    pub fn detect(name_or_mime: &str) -> Self {
        let lower = name_or_mime.to_lowercase();
        if lower.contains("excel")
            || lower.contains("spreadsheet")
            || lower.ends_with(".xls")
            || lower.ends_with(".xlsx")
            || lower.ends_with(".ods")
        {
            FileFormat::Workbook
        } else {
            FileFormat::Csv
        }
    }
}

/// One data row with the source line it came from (1-indexed, header is line 1).
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    pub line: u64,
    pub cells: Vec<String>,
}

impl RawRow {
    fn is_blank(&self) -> bool {
        self.cells.iter().all(|c| c.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<RawRow>,
}

/// Decode uploaded bytes into text. Strips a UTF-8 BOM; input that is not
/// valid UTF-8 is read as Windows-1252.
pub fn decode_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.strip_prefix('\u{feff}').unwrap_or(text).to_string(),
        Err(_) => {
            let (text, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
            text.into_owned()
        }
    }
}

pub fn read_table(bytes: &[u8], format: FileFormat) -> Result<RawTable, InputError> {
    match format {
        FileFormat::Csv => read_csv(&decode_text(bytes)),
        FileFormat::Workbook => read_workbook(bytes),
    }
}

/// Candidate field separators, in preference order on a tie.
const DELIMITERS: [u8; 4] = [b',', b';', b'\t', b'|'];

/// Pick the separator that splits the header line into the most fields.
/// Falls back to comma when nothing splits it.
pub fn sniff_delimiter(content: &str) -> u8 {
    let header = content
        .lines()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("");

    let mut best = (b',', 0usize);
    for delimiter in DELIMITERS {
        let fields = header.split(char::from(delimiter)).count();
        if fields > best.1 {
            best = (delimiter, fields);
        }
    }
    best.0
}

pub fn read_csv(content: &str) -> Result<RawTable, InputError> {
    let delimiter = sniff_delimiter(content);
    debug!(delimiter = %char::from(delimiter).escape_default(), "reading delimited text");

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let headers: Vec<String> = reader.headers()?.iter().map(|h| h.to_string()).collect();
    if headers.iter().all(|h| h.is_empty()) {
        return Err(InputError::NoHeader);
    }

    let mut rows = Vec::new();
    for (idx, result) in reader.records().enumerate() {
        let record = result?;
        let line = record
            .position()
            .map(|p| p.line())
            .unwrap_or(idx as u64 + 2);
        let row = RawRow {
            line,
            cells: record.iter().map(|c| c.to_string()).collect(),
        };
        if !row.is_blank() {
            rows.push(row);
        }
    }

    Ok(RawTable { headers, rows })
}

/// Read the first sheet of a workbook. Date cells come out as DD/MM/YYYY so
/// they go through the same date parser as CSV input.
pub fn read_workbook(bytes: &[u8]) -> Result<RawTable, InputError> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))?;

    let sheet_names = workbook.sheet_names().to_vec();
    let sheet_name = sheet_names
        .first()
        .ok_or_else(|| InputError::Workbook("workbook has no sheets".to_string()))?;

    let range = workbook.worksheet_range(sheet_name)?;
    let (row_count, col_count) = range.get_size();
    debug!(sheet = %sheet_name, row_count, col_count, "reading workbook sheet");

    let mut iter = range.rows();
    let headers: Vec<String> = iter
        .next()
        .ok_or(InputError::NoHeader)?
        .iter()
        .map(cell_text)
        .collect();
    if headers.iter().all(|h| h.is_empty()) {
        return Err(InputError::NoHeader);
    }

    let rows = iter
        .enumerate()
        .map(|(idx, cells)| RawRow {
            line: idx as u64 + 2,
            cells: cells.iter().map(cell_text).collect(),
        })
        .filter(|row| !row.is_blank())
        .collect();

    Ok(RawTable { headers, rows })
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.trim().to_string(),
        Data::Float(f) => f.to_string(),
        Data::Int(i) => i.to_string(),
        Data::DateTime(_) => match cell.as_date() {
            Some(date) => date.format("%d/%m/%Y").to_string(),
            None => cell.to_string(),
        },
        Data::DateTimeIso(s) => match NaiveDate::parse_from_str(s.get(..10).unwrap_or(s), "%Y-%m-%d") {
            Ok(date) => date.format("%d/%m/%Y").to_string(),
            Err(_) => s.clone(),
        },
        other => other.to_string(),
    }
}

/// Parse `DD/MM/YY` or `DD/MM/YYYY`. Two-digit years are 20YY.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let mut parts = raw.trim().split('/');
    let day: u32 = parts.next()?.trim().parse().ok()?;
    let month: u32 = parts.next()?.trim().parse().ok()?;
    let year: u32 = parts.next()?.trim().parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    let year = if year < 100 { 2000 + year } else { year };
    NaiveDate::from_ymd_opt(i32::try_from(year).ok()?, month, day)
}

/// Column positions resolved from the header row.
struct ColumnIndex {
    positions: Vec<(&'static str, usize)>,
}

impl ColumnIndex {
    fn locate(headers: &[String], required: &[&'static str]) -> Result<Self, InputError> {
        let mut positions = Vec::with_capacity(required.len());
        for &column in required {
            let idx = headers
                .iter()
                .position(|h| h.trim().eq_ignore_ascii_case(column))
                .ok_or_else(|| InputError::MissingColumn {
                    column,
                    found: headers.to_vec(),
                })?;
            positions.push((column, idx));
        }
        Ok(Self { positions })
    }

    fn position(&self, column: &'static str) -> usize {
        self.positions
            .iter()
            .find(|(name, _)| *name == column)
            .map(|(_, idx)| *idx)
            .unwrap_or(usize::MAX)
    }
}

/// Typed access to one row's cells.
struct Cells<'a> {
    row: &'a RawRow,
    index: &'a ColumnIndex,
}

impl<'a> Cells<'a> {
    fn raw(&self, column: &'static str) -> &'a str {
        self.row
            .cells
            .get(self.index.position(column))
            .map(|c| c.trim())
            .unwrap_or("")
    }

    fn text(&self, column: &'static str) -> Result<String, InputError> {
        let value = self.raw(column);
        if value.is_empty() {
            return Err(InputError::EmptyField {
                line: self.row.line,
                column,
            });
        }
        Ok(value.to_string())
    }

    fn date(&self, column: &'static str) -> Result<NaiveDate, InputError> {
        let value = self.raw(column);
        parse_date(value).ok_or_else(|| InputError::InvalidDate {
            line: self.row.line,
            value: value.to_string(),
        })
    }

    fn karat(&self, column: &'static str) -> Result<i32, InputError> {
        let value = self.raw(column);
        value.parse().map_err(|_| InputError::InvalidNumber {
            line: self.row.line,
            column,
            value: value.to_string(),
            expected: "an integer karat",
        })
    }

    fn mass(&self, column: &'static str) -> Result<f64, InputError> {
        let value = self.raw(column);
        match value.parse::<f64>() {
            Ok(mass) if mass.is_finite() => Ok(mass),
            _ => Err(InputError::InvalidNumber {
                line: self.row.line,
                column,
                value: value.to_string(),
                expected: "a number",
            }),
        }
    }
}

pub fn normalize_weight(table: &RawTable) -> Result<Vec<WeightRecord>, InputError> {
    use columns::*;

    let index = ColumnIndex::locate(&table.headers, WEIGHT_REQUIRED)?;
    table
        .rows
        .iter()
        .map(|row| {
            let cells = Cells { row, index: &index };
            let kt = cells.karat(KT)?;
            let net_wt = cells.mass(NET_WT)?;
            Ok(WeightRecord {
                item_no: cells.text(ITEM_NO)?,
                date: cells.date(DATE)?,
                kt,
                gross_wt: cells.mass(GROSS_WT)?,
                net_wt,
                pure_gold_weight: to_pure_gold(net_wt, kt),
            })
        })
        .collect()
}

pub fn normalize_loss(table: &RawTable) -> Result<Vec<LossRecord>, InputError> {
    use columns::*;

    let index = ColumnIndex::locate(&table.headers, LOSS_REQUIRED)?;
    table
        .rows
        .iter()
        .map(|row| {
            let cells = Cells { row, index: &index };
            let kt = cells.karat(KT)?;
            let loss = cells.mass(LOSS)?;
            Ok(LossRecord {
                item_no: cells.text(ITEM_NO)?,
                date: cells.date(DATE)?,
                kt,
                karigar: cells.raw(KARIGAR).to_string(),
                process: cells.raw(PROCESS).to_string(),
                loss,
                pure_gold_loss: round3(to_pure_gold(loss, kt)),
            })
        })
        .collect()
}

pub fn normalize(kind: RecordKind, table: &RawTable) -> Result<Records, InputError> {
    match kind {
        RecordKind::Weight => normalize_weight(table).map(Records::Weight),
        RecordKind::Loss => normalize_loss(table).map(Records::Loss),
    }
}

/// Decode, read and normalize an uploaded file in one step.
pub fn parse_upload(kind: RecordKind, bytes: &[u8], format: FileFormat) -> Result<Records, InputError> {
    let table = read_table(bytes, format)?;
    debug!(%kind, rows = table.rows.len(), "read upload table");
    normalize(kind, &table)
}
