pub mod aggregate;
pub mod builder;
pub mod classify;
pub mod config;
pub mod cycles;
pub mod drift;
pub mod error;
pub mod finding;
pub mod graph;
pub mod impact;
pub mod pipeline;
pub mod reader;
pub mod resolver;
pub mod token;
pub mod tokenizer;
pub mod types;
pub mod workbook;

pub use aggregate::{AuditReport, SeverityScore, SheetSummary};
pub use config::Config;
pub use error::FormulaError;
pub use finding::{FindingKind, FindingScope, RiskCategory, RiskFinding};
pub use graph::DependencyGraph;
pub use pipeline::{audit, AuditPipeline, FullAudit};
pub use reader::WorkbookReader;
pub use types::*;
pub use workbook::{CellContent, CellValue, DefinedName, RawCell, SheetData, WorkbookData};
