//! Source reading for raw CSV objects.

pub mod reader;

pub use reader::{CsvReader, CsvReaderConfig, ReadResult};
