//! PostgreSQL driver.
//!
//! - [`PostgresReader`]: source reader
//! - [`PostgresWriter`]: staged target writer

mod reader;
mod writer;

pub use reader::PostgresReader;
pub use writer::PostgresWriter;
