//! Tabular output: projection, tabulation and file writing

pub mod projector;
pub mod table_writer;
pub mod tabulate;

pub use projector::{map_header_to_path, AttributePath, Column, RecordProjector, TableRow};
pub use table_writer::{sort_rows, TableFiles, TableWriter};
pub use tabulate::{tabulate, ErrorLogEntry, Tabulation};
