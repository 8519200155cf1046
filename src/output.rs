//! Rendering sinks for an [`OrderedGroupedResultSet`].
//!
//! Every sink emits the same seven columns in the same order. The XLSX
//! workbook is the primary table: a styled header, thin borders on every
//! cell, and a medium top border on the first row of each new holder group.
//! CSV is plain data with no grouping marks. JSON carries the group flags
//! explicitly. Files are written atomically via a temp file and rename.

use crate::error::PatentError;
use crate::normalize::canonical_date;
use crate::ranking::OrderedGroupedResultSet;
use crate::record::PatentRecord;
use async_trait::async_trait;
use rust_xlsxwriter::{Color, Format, FormatAlign, FormatBorder, Workbook, XlsxError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::info;

/// Column headers, in output order.
pub const TABLE_HEADERS: [&str; 7] = [
    "专利号",
    "专利名称",
    "权利人",
    "专利类型",
    "发明人",
    "申请日期",
    "文件路径",
];

/// File-name stem used when no record names a holder.
pub const DEFAULT_OUTPUT_STEM: &str = "专利信息汇总";

/// Suffix appended to the holder name in the output file name.
pub const OUTPUT_SUFFIX: &str = "专利信息";

/// Worksheet name inside the workbook.
pub const SHEET_NAME: &str = "专利信息";

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

const HEADER_FILL: u32 = 0xD9E1F2;
const MIN_COLUMN_WIDTH: f64 = 8.0;
const MAX_COLUMN_WIDTH: f64 = 60.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Xlsx,
    Csv,
    Json,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Xlsx => "xlsx",
            OutputFormat::Csv => "csv",
            OutputFormat::Json => "json",
        }
    }

    pub fn sink(self) -> Box<dyn RecordSink> {
        match self {
            OutputFormat::Xlsx => Box::new(XlsxSink),
            OutputFormat::Csv => Box::new(CsvSink),
            OutputFormat::Json => Box::new(JsonSink),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = PatentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "xlsx" | "excel" => Ok(OutputFormat::Xlsx),
            "csv" => Ok(OutputFormat::Csv),
            "json" => Ok(OutputFormat::Json),
            other => Err(PatentError::InvalidConfig(format!(
                "Unknown output format '{other}' (expected xlsx, csv or json)"
            ))),
        }
    }
}

/// A tabular output format.
#[async_trait]
pub trait RecordSink: Send + Sync {
    fn format(&self) -> OutputFormat;

    /// Serialise the whole set to bytes.
    fn render(&self, set: &OrderedGroupedResultSet) -> Result<Vec<u8>, PatentError>;

    /// Render and write atomically to `path`.
    async fn write(&self, set: &OrderedGroupedResultSet, path: &Path) -> Result<(), PatentError> {
        let bytes = self.render(set)?;
        write_atomic(path, &bytes).await?;
        info!("Wrote {} records to {}", set.len(), path.display());
        Ok(())
    }
}

/// The seven display cells of a record: normalized type, ISO date when the
/// raw date parses, empty string for absent fields.
pub fn display_cells(record: &PatentRecord) -> [String; 7] {
    let text = |v: &Option<String>| v.clone().unwrap_or_default();
    [
        text(&record.patent_number),
        text(&record.title),
        text(&record.holder),
        record.normalized_type(),
        text(&record.inventors),
        canonical_date(record.application_date.as_deref()).unwrap_or_default(),
        record.source_path.clone(),
    ]
}

/// Data rows (0-based, header excluded) that get a medium top border: every
/// holder change after the first row.
pub fn group_border_rows(set: &OrderedGroupedResultSet) -> Vec<bool> {
    set.rows()
        .iter()
        .enumerate()
        .map(|(i, row)| row.new_group && i > 0)
        .collect()
}

/// Column widths fitted to the longest cell, counting CJK and other
/// non-ASCII characters as two columns.
pub fn column_widths(set: &OrderedGroupedResultSet) -> [f64; 7] {
    let mut widths = TABLE_HEADERS.map(display_width);
    for row in set.rows() {
        for (w, cell) in widths.iter_mut().zip(display_cells(&row.record)) {
            *w = (*w).max(display_width(&cell));
        }
    }
    widths.map(|w| (w as f64 + 2.0).clamp(MIN_COLUMN_WIDTH, MAX_COLUMN_WIDTH))
}

fn display_width(s: &str) -> usize {
    s.chars().map(|c| if c.is_ascii() { 1 } else { 2 }).sum()
}

/// Excel workbook with one sheet; holder groups are separated by a border,
/// never by an extra row.
#[derive(Debug, Clone, Copy, Default)]
pub struct XlsxSink;

impl XlsxSink {
    fn build(set: &OrderedGroupedResultSet) -> Result<Vec<u8>, XlsxError> {
        let header = Format::new()
            .set_bold()
            .set_align(FormatAlign::Center)
            .set_background_color(Color::RGB(HEADER_FILL))
            .set_border(FormatBorder::Thin);
        let body = Format::new()
            .set_align(FormatAlign::VerticalCenter)
            .set_border(FormatBorder::Thin);
        let group_start = body.clone().set_border_top(FormatBorder::Medium);

        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.set_name(SHEET_NAME)?;

        for (col, title) in TABLE_HEADERS.iter().enumerate() {
            sheet.write_string_with_format(0, col as u16, *title, &header)?;
        }
        for (i, (row, starts_group)) in set.rows().iter().zip(group_border_rows(set)).enumerate() {
            let format = if starts_group { &group_start } else { &body };
            let line = (i + 1) as u32;
            for (col, cell) in display_cells(&row.record).into_iter().enumerate() {
                if cell.is_empty() {
                    sheet.write_blank(line, col as u16, format)?;
                } else {
                    sheet.write_string_with_format(line, col as u16, cell, format)?;
                }
            }
        }
        for (col, width) in column_widths(set).into_iter().enumerate() {
            sheet.set_column_width(col as u16, width)?;
        }
        sheet.set_freeze_panes(1, 0)?;

        workbook.save_to_buffer()
    }
}

impl RecordSink for XlsxSink {
    fn format(&self) -> OutputFormat {
        OutputFormat::Xlsx
    }

    fn render(&self, set: &OrderedGroupedResultSet) -> Result<Vec<u8>, PatentError> {
        Self::build(set).map_err(|e| PatentError::RenderFailed(format!("XLSX: {e}")))
    }
}

/// CSV with a UTF-8 BOM (so spreadsheet apps detect the encoding). One line
/// per record, in ranking order.
#[derive(Debug, Clone, Copy, Default)]
pub struct CsvSink;

impl RecordSink for CsvSink {
    fn format(&self) -> OutputFormat {
        OutputFormat::Csv
    }

    fn render(&self, set: &OrderedGroupedResultSet) -> Result<Vec<u8>, PatentError> {
        let mut wtr = csv::Writer::from_writer(UTF8_BOM.to_vec());
        let csv_err = |e: csv::Error| PatentError::RenderFailed(format!("CSV: {e}"));

        wtr.write_record(TABLE_HEADERS).map_err(csv_err)?;
        for row in set.rows() {
            wtr.write_record(display_cells(&row.record)).map_err(csv_err)?;
        }
        wtr.into_inner()
            .map_err(|e| PatentError::RenderFailed(format!("CSV flush: {e}")))
    }
}

/// Pretty-printed JSON document with explicit group flags.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSink;

#[derive(Serialize)]
struct JsonDocument<'a> {
    generated_at: String,
    record_count: usize,
    group_count: usize,
    rows: Vec<JsonRow<'a>>,
}

#[derive(Serialize)]
struct JsonRow<'a> {
    #[serde(flatten)]
    record: &'a PatentRecord,
    normalized_type: String,
    iso_date: Option<String>,
    new_group: bool,
    type_changed: bool,
}

impl RecordSink for JsonSink {
    fn format(&self) -> OutputFormat {
        OutputFormat::Json
    }

    fn render(&self, set: &OrderedGroupedResultSet) -> Result<Vec<u8>, PatentError> {
        let doc = JsonDocument {
            generated_at: chrono::Local::now().to_rfc3339(),
            record_count: set.len(),
            group_count: set.group_count(),
            rows: set
                .rows()
                .iter()
                .map(|row| JsonRow {
                    record: &row.record,
                    normalized_type: row.record.normalized_type(),
                    iso_date: row.record.parsed_date().iso(),
                    new_group: row.new_group,
                    type_changed: row.type_changed,
                })
                .collect(),
        };
        serde_json::to_vec_pretty(&doc).map_err(|e| PatentError::RenderFailed(format!("JSON: {e}")))
    }
}

/// Strip characters that are invalid in file names on common platforms.
pub fn sanitize_file_stem(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, '\\' | '/' | '*' | '?' | ':' | '"' | '<' | '>' | '|'))
        .collect::<String>()
        .trim()
        .to_string()
}

/// `<holder>-专利信息.<ext>`, using the first record (in the order given,
/// i.e. extraction order) whose holder survives sanitising, or
/// [`DEFAULT_OUTPUT_STEM`].
pub fn output_file_name<'a>(
    records: impl IntoIterator<Item = &'a PatentRecord>,
    format: OutputFormat,
) -> String {
    let stem = records
        .into_iter()
        .filter_map(|r| r.holder.as_deref())
        .map(sanitize_file_stem)
        .find(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_OUTPUT_STEM.to_string());
    format!("{stem}-{OUTPUT_SUFFIX}.{}", format.extension())
}

/// `output_dir` joined with [`output_file_name`].
pub fn output_path(output_dir: &Path, records: &[PatentRecord], format: OutputFormat) -> PathBuf {
    output_dir.join(output_file_name(records, format))
}

/// Write via `<path>.tmp` + rename so readers never see a partial file.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), PatentError> {
    let write_err = |e: std::io::Error| PatentError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    tokio::fs::write(&tmp_path, bytes).await.map_err(write_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_err)?;
    Ok(())
}
