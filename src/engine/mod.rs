//! Core engine: the fetch → compute → rank scan pipeline.

pub mod scanner;

pub use scanner::{
    normalize_symbols, RowStatus, ScanOrchestrator, ScanReport, ScanRequest, ScannerSettings,
    SymbolReport,
};
