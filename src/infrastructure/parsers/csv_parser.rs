use csv::ReaderBuilder;
use std::fs::File;
use std::io::{BufRead, BufReader, Cursor, ErrorKind, Read};
use std::path::Path;
use tracing::{debug, info, error};
use crate::domain::{
    error::SourceError,
    models::{CsvTable, Record},
    ports::CsvParser,
};
use super::delimiter::detect_delimiter;

const UTF8_BOM: [u8; 3] = [0xEF, 0xBB, 0xBF];

#[derive(Debug, Default, Clone, Copy)]
pub struct StreamingCsvParser;

impl StreamingCsvParser {
    pub fn new() -> Self {
        Self
    }
}

impl CsvParser for StreamingCsvParser {
    fn parse_file(&self, path: &Path) -> Result<CsvTable, SourceError> {
        debug!("Opening CSV file: {}", path.display());
        let file = File::open(path).map_err(|e| {
            error!("Failed to open CSV file {}: {}", path.display(), e);
            match e.kind() {
                ErrorKind::NotFound => SourceError::NotFound(path.display().to_string()),
                _ => SourceError::Unreadable(format!("{}: {}", path.display(), e)),
            }
        })?;
        parse_csv(file)
    }

    fn parse_bytes(&self, bytes: &[u8]) -> Result<CsvTable, SourceError> {
        debug!("Parsing {} bytes of in-memory CSV", bytes.len());
        let normalized = String::from_utf8_lossy(bytes)
            .replace("\r\n", "\n")
            .replace('\r', "\n");
        parse_csv(Cursor::new(normalized.into_bytes()))
    }
}

/// Parses a CSV stream in a single forward pass: optional BOM, header line,
/// delimiter detection, then one record per data line.
pub fn parse_csv<R: Read>(input: R) -> Result<CsvTable, SourceError> {
    let mut input = input;
    let mut head = Vec::with_capacity(UTF8_BOM.len());
    (&mut input)
        .take(UTF8_BOM.len() as u64)
        .read_to_end(&mut head)
        .map_err(|e| SourceError::Unreadable(e.to_string()))?;

    let prefix = if head == UTF8_BOM {
        debug!("Skipping UTF-8 byte order mark");
        Vec::new()
    } else {
        head
    };
    let mut reader = BufReader::new(Cursor::new(prefix).chain(input));

    let mut header_bytes = Vec::new();
    let read = reader
        .read_until(b'\n', &mut header_bytes)
        .map_err(|e| SourceError::Unreadable(e.to_string()))?;
    if read == 0 {
        error!("CSV stream is empty, no header row");
        return Err(SourceError::Empty);
    }
    let header_line = String::from_utf8_lossy(&header_bytes).into_owned();

    let delimiter = detect_delimiter(&header_line);
    let headers = split_header(&header_line, delimiter)?;
    debug!("CSV headers: {:?}", headers);
    info!("Found {} columns in CSV (delimiter {:?})", headers.len(), delimiter as char);

    let mut rows_reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(reader);

    let mut rows = Vec::new();
    let mut line_no = 1;

    // invalid UTF-8 is replaced per field, never per file
    for record in rows_reader.byte_records() {
        line_no += 1;
        let record = record.map_err(|e| {
            error!("Failed to read CSV record near line {}: {}", line_no, e);
            SourceError::Parse(e.to_string())
        })?;

        if record.is_empty() {
            continue;
        }

        let mut row = Record::new();
        for (i, header) in headers.iter().enumerate() {
            let value = record
                .get(i)
                .map(|field| String::from_utf8_lossy(field).trim().to_string())
                .unwrap_or_default();
            row.insert(header.clone(), value);
        }
        rows.push(row);

        if rows.len() % 1000 == 0 {
            debug!("Processed {} CSV rows", rows.len());
        }
    }

    info!("Parsed {} rows from CSV", rows.len());
    Ok(CsvTable {
        total_rows: rows.len(),
        headers,
        rows,
        delimiter: delimiter as char,
    })
}

fn split_header(line: &str, delimiter: u8) -> Result<Vec<String>, SourceError> {
    let line = line.trim_end_matches(&['\r', '\n'][..]);
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(line.as_bytes());

    let headers: Vec<String> = match reader.records().next() {
        Some(record) => record?.iter().map(|h| h.trim().to_string()).collect(),
        None => Vec::new(),
    };

    if headers.iter().all(|h| h.is_empty()) {
        error!("CSV header row has no usable column names: {:?}", line);
        return Err(SourceError::EmptyHeader);
    }
    Ok(headers)
}
