use chrono::Local;
use rust_xlsxwriter::{Color, Format, FormatAlign, Workbook};
use std::path::PathBuf;

use crate::errors::ExportError;
use crate::models::ResultRow;

// Excel refuses cells longer than this many characters.
const MAX_CELL_CHARS: usize = 32_767;

const SHEET_NAME: &str = "Analysis Results";

// (header, width) per column
const COLUMNS: [(&str, f64); 4] = [
    ("Image", 30.0),
    ("Model", 20.0),
    ("Analysis", 50.0),
    ("English Translation", 50.0),
];

#[derive(Debug, Clone)]
pub struct ExportedFile {
    pub path: PathBuf,
    pub file_name: String,
}

#[derive(Debug, Clone)]
pub struct SpreadsheetExporter {
    output_dir: PathBuf,
}

impl SpreadsheetExporter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self { output_dir: output_dir.into() }
    }

    /// Writes one row per result under a header row. `label` keeps names unique
    /// when two batches finish within the same second.
    pub fn export(&self, rows: &[ResultRow], label: &str) -> Result<ExportedFile, ExportError> {
        std::fs::create_dir_all(&self.output_dir)?;

        let file_name = format!(
            "analysis_results_{}_{}.xlsx",
            Local::now().format("%Y%m%d_%H%M%S"),
            label
        );
        let path = self.output_dir.join(&file_name);

        let header_format = Format::new()
            .set_bold()
            .set_background_color(Color::RGB(0xE0E0E0));
        let text_format = Format::new().set_text_wrap().set_align(FormatAlign::Top);

        let mut workbook = Workbook::new();
        let worksheet = workbook.add_worksheet();
        worksheet.set_name(SHEET_NAME)?;

        for (col, (header, width)) in COLUMNS.iter().enumerate() {
            let col = col as u16;
            worksheet.set_column_width(col, *width)?;
            worksheet.write_string_with_format(0, col, *header, &header_format)?;
        }
        worksheet.set_freeze_panes(1, 0)?;

        for (index, row) in rows.iter().enumerate() {
            let r = index as u32 + 1;
            worksheet.write_string(r, 0, clip(&row.image_name))?;
            worksheet.write_string(r, 1, clip(&row.model))?;
            worksheet.write_string_with_format(r, 2, clip(&row.analysis), &text_format)?;
            worksheet.write_string_with_format(r, 3, clip(&row.translation), &text_format)?;
        }

        workbook.save(&path)?;
        tracing::info!("Spreadsheet with {} rows written to {}", rows.len(), path.display());

        Ok(ExportedFile { path, file_name })
    }
}

fn clip(text: &str) -> String {
    if text.chars().count() <= MAX_CELL_CHARS {
        text.to_string()
    } else {
        text.chars().take(MAX_CELL_CHARS).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::read_xlsx_rows;

    fn row(image: &str, model: &str) -> ResultRow {
        ResultRow {
            image_name: image.into(),
            stored_name: format!("20240101_000000_01_{}", image),
            model: model.into(),
            analysis: "分析".into(),
            translation: "analysis".into(),
        }
    }

    #[test]
    fn writes_an_xlsx_workbook() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = SpreadsheetExporter::new(dir.path().join("results"));

        let rows = vec![row("a.png", "gpt-4.1"), row("a.png", "gpt-4o-0806"), row("b.jpg", "gpt-4.1")];
        let exported = exporter.export(&rows, "abcd1234").unwrap();

        assert!(exported.file_name.starts_with("analysis_results_"));
        assert!(exported.file_name.ends_with("_abcd1234.xlsx"));
        assert_eq!(exported.path, dir.path().join("results").join(&exported.file_name));

        // xlsx files are zip containers
        let bytes = std::fs::read(&exported.path).unwrap();
        assert_eq!(&bytes[..2], b"PK");
    }

    #[test]
    fn workbook_holds_header_and_one_row_per_result() {
        let dir = tempfile::tempdir().unwrap();
        let rows: Vec<ResultRow> = [("a.png", "gpt-4.1"), ("a.png", "gpt-4o-0806"), ("b.png", "gpt-4.1"), ("b.png", "gpt-4o-0806")]
            .iter()
            .map(|(image, model)| ResultRow {
                image_name: image.to_string(),
                stored_name: format!("stored_{}", image),
                model: model.to_string(),
                analysis: format!("{} 的分析 by {}", image, model),
                translation: format!("Analysis of {} by {} & more", image, model),
            })
            .collect();

        let exported = SpreadsheetExporter::new(dir.path()).export(&rows, "t").unwrap();
        let sheet = read_xlsx_rows(&std::fs::read(&exported.path).unwrap());

        assert_eq!(sheet[0], vec!["Image", "Model", "Analysis", "English Translation"]);
        assert_eq!(sheet.len(), rows.len() + 1);
        for (cells, row) in sheet[1..].iter().zip(&rows) {
            assert_eq!(
                cells,
                &vec![
                    row.image_name.clone(),
                    row.model.clone(),
                    row.analysis.clone(),
                    row.translation.clone(),
                ]
            );
        }
    }

    #[test]
    fn oversized_cells_are_clipped() {
        let long = "字".repeat(MAX_CELL_CHARS + 10);
        assert_eq!(clip(&long).chars().count(), MAX_CELL_CHARS);
        assert_eq!(clip("short"), "short");

        let dir = tempfile::tempdir().unwrap();
        let mut big = row("big.png", "gpt-4.1");
        big.analysis = long;
        assert!(SpreadsheetExporter::new(dir.path()).export(&[big], "x").is_ok());
    }

    #[test]
    fn io_failures_surface_as_errors() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"file").unwrap();

        let err = SpreadsheetExporter::new(&blocker).export(&[row("a.png", "m")], "x").unwrap_err();
        assert!(matches!(err, ExportError::Io(_)));
    }
}
