// flowline/src/stages/mod.rs

//! General-purpose stages useful across ETL jobs.

pub mod func_transformer;
pub mod sql_reader;
pub mod sql_writer;

pub use func_transformer::FuncTransformer;
pub use sql_reader::SqlReader;
pub use sql_writer::SqlWriter;
