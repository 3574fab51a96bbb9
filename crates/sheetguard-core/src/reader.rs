use std::path::Path;

use anyhow::Result;

use crate::workbook::WorkbookData;

/// Trait each workbook format must implement.
pub trait WorkbookReader: Send + Sync {
    /// Format name (e.g., "xlsx", "snapshot")
    fn format(&self) -> &'static str;

    /// File extensions this reader handles, lowercase and without the dot.
    fn file_extensions(&self) -> &[&str];

    /// Read every sheet's cells, used range and defined names.
    fn read(&self, path: &Path) -> Result<WorkbookData>;

    fn handles(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                let ext = ext.to_ascii_lowercase();
                self.file_extensions().iter().any(|e| *e == ext)
            })
    }
}
