//! Workbook readers: spreadsheet files through calamine and JSON snapshots.
//! External workbook links of OOXML packages are read from the zip parts.

use std::path::Path;

use sheetguard_core::reader::WorkbookReader;

pub mod links;
pub mod snapshot;
pub mod xlsx;

pub use snapshot::SnapshotReader;
pub use xlsx::SpreadsheetReader;

/// Every built-in reader, in lookup order.
pub fn readers() -> Vec<Box<dyn WorkbookReader>> {
    vec![Box::new(SpreadsheetReader), Box::new(SnapshotReader)]
}

/// Workbook display name: the file name, falling back to the full path.
pub(crate) fn workbook_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format_of(path: &str) -> Option<&'static str> {
        readers()
            .into_iter()
            .find(|r| r.handles(Path::new(path)))
            .map(|r| r.format())
    }

    #[test]
    fn test_reader_lookup_by_extension() {
        assert_eq!(format_of("model.xlsx"), Some("spreadsheet"));
        assert_eq!(format_of("MODEL.XLSM"), Some("spreadsheet"));
        assert_eq!(format_of("legacy.xls"), Some("spreadsheet"));
        assert_eq!(format_of("calc.ods"), Some("spreadsheet"));
        assert_eq!(format_of("a.xlsb"), Some("spreadsheet"));
        assert_eq!(format_of("snapshot.json"), Some("snapshot"));
        assert_eq!(format_of("notes.txt"), None);
        assert_eq!(format_of("no_extension"), None);
    }

    #[test]
    fn test_workbook_name_is_file_name() {
        assert_eq!(workbook_name(Path::new("/models/q3/plan.xlsx")), "plan.xlsx");
    }
}
