use anyhow::Context;
use rust_xlsxwriter::{Color, Format, FormatAlign, Workbook};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::info;

use crate::models::ProductRecord;

pub const SHEET_NAME: &str = "Results";
pub const MAX_COLUMN_WIDTH: usize = 50;
const HEADER_FILL: u32 = 0x366092;
const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    Sequence,
    FileName,
    Field(&'static str),
    Status,
    Score,
    ProcessedAt,
    FilePath,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Text(String),
    Number(f64),
}

impl Cell {
    pub fn text(&self) -> String {
        match self {
            Cell::Text(s) => s.clone(),
            Cell::Number(n) => format!("{n}"),
        }
    }
}

impl Column {
    pub fn header(&self) -> &'static str {
        match self {
            Column::Sequence => "sequence",
            Column::FileName => "file_name",
            Column::Field(name) => *name,
            Column::Status => "status",
            Column::Score => "score",
            Column::ProcessedAt => "processed_at",
            Column::FilePath => "file_path",
        }
    }

    pub fn cell(&self, record: &ProductRecord) -> Option<Cell> {
        let assessment = record.assessment.as_ref();
        match self {
            Column::Sequence => assessment.map(|a| Cell::Number(a.sequence as f64)),
            Column::FileName => Some(Cell::Text(record.file_name.clone())),
            Column::Field(name) => record.fields.get(name).map(|v| Cell::Text(v.to_string())),
            Column::Status => assessment.map(|a| Cell::Text(a.status.to_string())),
            Column::Score => assessment.map(|a| Cell::Number((a.score * 10.0).round() / 10.0)),
            Column::ProcessedAt => assessment.map(|a| Cell::Text(a.processed_at.clone())),
            Column::FilePath => Some(Cell::Text(record.file_path.clone())),
        }
    }
}

pub fn table_columns() -> Vec<Column> {
    let mut columns = vec![Column::Sequence, Column::FileName];
    columns.extend(crate::models::FIELD_NAMES.into_iter().map(Column::Field));
    columns.extend([Column::Status, Column::Score, Column::ProcessedAt, Column::FilePath]);
    columns
}

pub fn sheet_columns() -> Vec<Column> {
    table_columns()
        .into_iter()
        .filter(|c| *c != Column::FilePath)
        .collect()
}

/// Keeps the columns that at least one record can fill.
pub fn project(columns: Vec<Column>, records: &[ProductRecord]) -> Vec<Column> {
    columns
        .into_iter()
        .filter(|col| records.iter().any(|r| col.cell(r).is_some()))
        .collect()
}

#[derive(Debug, Clone)]
pub struct ReportPaths {
    pub csv: PathBuf,
    pub xlsx: PathBuf,
}

pub fn emit(records: &[ProductRecord], output_dir: &Path, session_id: &str) -> anyhow::Result<ReportPaths> {
    let csv = output_dir.join(format!("analysis_results_{session_id}.csv"));
    let xlsx = output_dir.join(format!("analysis_results_{session_id}.xlsx"));
    write_csv(records, &csv)?;
    write_xlsx(records, &xlsx)?;
    Ok(ReportPaths { csv, xlsx })
}

pub fn write_csv(records: &[ProductRecord], path: &Path) -> anyhow::Result<()> {
    let columns = project(table_columns(), records);
    let mut file = fs::File::create(path)
        .with_context(|| format!("cannot create {}", path.display()))?;
    file.write_all(UTF8_BOM)?;

    let mut writer = csv::Writer::from_writer(file);
    writer.write_record(columns.iter().map(Column::header))?;
    for record in records {
        writer.write_record(columns.iter().map(|col| match col.cell(record) {
            Some(Cell::Number(n)) if *col == Column::Score => format!("{n:.1}"),
            Some(cell) => cell.text(),
            None => String::new(),
        }))?;
    }
    writer.flush()?;
    info!("csv report written: {}", path.display());
    Ok(())
}

pub fn write_xlsx(records: &[ProductRecord], path: &Path) -> anyhow::Result<()> {
    let columns = project(sheet_columns(), records);
    let header_format = Format::new()
        .set_bold()
        .set_font_color(Color::White)
        .set_background_color(Color::RGB(HEADER_FILL))
        .set_align(FormatAlign::Center);

    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.set_name(SHEET_NAME)?;

    for (col_idx, column) in columns.iter().enumerate() {
        let col = col_idx as u16;
        let mut longest = column.header().chars().count();
        sheet.write_string_with_format(0, col, column.header(), &header_format)?;
        for (row_idx, record) in records.iter().enumerate() {
            let row = row_idx as u32 + 1;
            match column.cell(record) {
                Some(Cell::Number(n)) => {
                    sheet.write_number(row, col, n)?;
                    longest = longest.max(Cell::Number(n).text().chars().count());
                }
                Some(Cell::Text(s)) => {
                    sheet.write_string(row, col, &s)?;
                    longest = longest.max(s.chars().count());
                }
                None => {}
            }
        }
        sheet.set_column_width(col, column_width(longest) as f64)?;
    }

    workbook
        .save(path)
        .with_context(|| format!("cannot write {}", path.display()))?;
    info!("spreadsheet written: {}", path.display());
    Ok(())
}

pub fn column_width(longest_cell: usize) -> usize {
    (longest_cell + 2).min(MAX_COLUMN_WIDTH)
}

/// CSV and XLSX reports in `output_dir`, newest first.
pub fn latest_reports(output_dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut reports: Vec<(SystemTime, PathBuf)> = fs::read_dir(output_dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| {
            matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("csv" | "xlsx")
            )
        })
        .map(|path| {
            let modified = fs::metadata(&path)
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            (modified, path)
        })
        .collect();
    reports.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)));
    Ok(reports.into_iter().map(|(_, path)| path).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ImageRef, ProductFields};
    use crate::normalizer::normalize;

    fn record(name: &str) -> ProductRecord {
        let image = ImageRef {
            path: PathBuf::from(format!("/staging/{name}")),
            source_name: name.to_string(),
            size_bytes: 1,
            dimensions: None,
        };
        let fields = ProductFields {
            product_name: format!("Product, \"{name}\""),
            price: "1 000 F".into(),
            ..ProductFields::default()
        };
        ProductRecord::for_image(fields, &image)
    }

    fn read_csv(path: &Path) -> Vec<Vec<String>> {
        let bytes = fs::read(path).unwrap();
        assert!(bytes.starts_with(UTF8_BOM));
        let mut reader = csv::Reader::from_reader(&bytes[UTF8_BOM.len()..]);
        let mut rows = vec![reader.headers().unwrap().iter().map(String::from).collect()];
        for row in reader.records() {
            rows.push(row.unwrap().iter().map(String::from).collect());
        }
        rows
    }

    #[test]
    fn column_order_is_fixed() {
        let headers: Vec<&str> = table_columns().iter().map(Column::header).collect();
        assert_eq!(
            headers,
            vec![
                "sequence",
                "file_name",
                "product_name",
                "description",
                "volume",
                "price",
                "barcode",
                "article_code",
                "source_information",
                "status",
                "score",
                "processed_at",
                "file_path",
            ]
        );
        assert!(!sheet_columns().contains(&Column::FilePath));
    }

    #[test]
    fn unassessed_columns_are_dropped() {
        let records = vec![record("a.jpg")];
        let headers: Vec<&str> = project(table_columns(), &records)
            .iter()
            .map(Column::header)
            .collect();
        assert!(!headers.contains(&"sequence"));
        assert!(!headers.contains(&"status"));
        assert!(headers.contains(&"file_path"));
    }

    #[test]
    fn widths_are_capped() {
        assert_eq!(column_width(5), 7);
        assert_eq!(column_width(200), MAX_COLUMN_WIDTH);
    }

    #[test]
    fn emits_both_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let (records, _) = normalize(vec![record("a.jpg"), record("b.jpg")]);
        let paths = emit(&records, dir.path(), "20240101_120000").unwrap();

        assert_eq!(
            paths.csv.file_name().unwrap(),
            "analysis_results_20240101_120000.csv"
        );
        assert!(paths.xlsx.exists());
        assert!(fs::metadata(&paths.xlsx).unwrap().len() > 0);

        let rows = read_csv(&paths.csv);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0][0], "sequence");
        assert_eq!(rows[0].len(), 13);
        assert_eq!(rows[1][0], "1");
        assert_eq!(rows[1][1], "a.jpg");
        assert_eq!(rows[1][2], "Product, \"a.jpg\"");
        assert_eq!(rows[1][5], "1000");
        assert_eq!(rows[2][9], "Partial");
        assert_eq!(rows[2][10], "28.6");
        assert_eq!(rows[2][12], "/staging/b.jpg");
    }

    #[test]
    fn latest_reports_lists_only_tables() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.csv"), "x").unwrap();
        fs::write(dir.path().join("b.xlsx"), "x").unwrap();
        fs::write(dir.path().join("c.log"), "x").unwrap();
        let found = latest_reports(dir.path()).unwrap();
        assert_eq!(found.len(), 2);
    }
}
