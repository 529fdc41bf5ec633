pub mod csv_parser;
pub mod delimiter;

pub use csv_parser::StreamingCsvParser;
