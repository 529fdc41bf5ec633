use csv::ReaderBuilder;
use tracing::debug;

/// Candidates in tie-break order: the first declared wins.
pub const CANDIDATES: [u8; 4] = [b',', b';', b'\t', b'|'];

/// Splits `line` on `delimiter` honoring CSV quoting and returns the field count.
pub fn count_fields(line: &str, delimiter: u8) -> usize {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(line.as_bytes());

    match reader.records().next() {
        Some(Ok(record)) => record.len(),
        _ => 0,
    }
}

/// Picks the candidate producing the most columns on the header line.
pub fn detect_delimiter(header_line: &str) -> u8 {
    let line = header_line.trim_end_matches(&['\r', '\n'][..]);
    let mut best = CANDIDATES[0];
    let mut best_count = 0;

    for &candidate in CANDIDATES.iter() {
        let count = count_fields(line, candidate);
        debug!("Delimiter {:?} yields {} fields", candidate as char, count);
        if count > best_count {
            best = candidate;
            best_count = count;
        }
    }

    debug!("Detected delimiter {:?}", best as char);
    best
}
