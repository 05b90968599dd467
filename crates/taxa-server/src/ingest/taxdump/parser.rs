//! NCBI taxdump record parser
//!
//! Streams `nodes.dmp` and `names.dmp` into typed records, one line at a time.
//!
//! # File Format
//! Fields are separated by `\t|\t` and lines end with `\t|`:
//!
//! ```text
//! nodes.dmp:  tax_id | parent tax_id | rank | embl code | division id | ...
//!             9606   | 9605          | species | HS | 5 | ...
//! names.dmp:  tax_id | name_txt | unique name | name class
//!             9606   | human    |             | genbank common name
//! ```
//!
//! Malformed lines are skipped and counted in [`ParseStats`]; they never end
//! the stream. Errors reading the underlying stream are yielded as `Err`.

use std::io::{self, BufRead};

use serde::{Deserialize, Serialize};
use taxa_common::TaxonId;
use tracing::{debug, warn};

/// Field separator used by every `.dmp` file
pub const FIELD_SEPARATOR: &str = "\t|\t";

/// Malformed lines logged at `warn` before dropping to `debug`
const MAX_LOGGED_SKIPS: usize = 10;

/// One line of `nodes.dmp`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRecord {
    pub taxon_id: TaxonId,
    pub parent_id: TaxonId,
    pub rank: Option<String>,
}

/// Name classes kept from `names.dmp`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NameClass {
    Scientific,
    GenbankCommon,
    Common,
}

impl NameClass {
    /// Map a `name class` field; `None` for classes that are not kept
    pub fn from_field(field: &str) -> Option<Self> {
        match field {
            "scientific name" => Some(NameClass::Scientific),
            "genbank common name" => Some(NameClass::GenbankCommon),
            "common name" => Some(NameClass::Common),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NameClass::Scientific => "scientific name",
            NameClass::GenbankCommon => "genbank common name",
            NameClass::Common => "common name",
        }
    }
}

/// One kept line of `names.dmp`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameRecord {
    pub taxon_id: TaxonId,
    pub name: String,
    pub class: NameClass,
}

/// Line counters for one parsed stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseStats {
    /// Lines read, blank lines included
    pub lines: usize,
    /// Records yielded
    pub records: usize,
    /// Malformed lines skipped
    pub skipped: usize,
    /// Well-formed lines dropped by the name-class filter
    pub filtered: usize,
}

impl ParseStats {
    pub fn merge(&self, other: &ParseStats) -> ParseStats {
        ParseStats {
            lines: self.lines + other.lines,
            records: self.records + other.records,
            skipped: self.skipped + other.skipped,
            filtered: self.filtered + other.filtered,
        }
    }
}

/// Why a line was rejected
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedLine(pub String);

impl std::fmt::Display for MalformedLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn split_fields(line: &str) -> Vec<&str> {
    let line = line.trim_end_matches(['\n', '\r']);
    let line = line.strip_suffix("\t|").unwrap_or(line);
    line.split(FIELD_SEPARATOR).map(str::trim).collect()
}

fn parse_id(field: &str, what: &str) -> Result<TaxonId, MalformedLine> {
    field
        .parse::<TaxonId>()
        .map_err(|_| MalformedLine(format!("invalid {}: {:?}", what, field)))
}

/// Parse a single `nodes.dmp` line
///
/// Only the first three fields are read; the rest of the record is ignored.
/// An empty parent field marks a root and is read as a self-parent.
pub fn parse_node_line(line: &str) -> Result<NodeRecord, MalformedLine> {
    let fields = split_fields(line);
    if fields.len() < 3 {
        return Err(MalformedLine(format!(
            "expected at least 3 fields, got {}",
            fields.len()
        )));
    }

    let taxon_id = parse_id(fields[0], "tax_id")?;
    let parent_id = if fields[1].is_empty() {
        taxon_id
    } else {
        parse_id(fields[1], "parent tax_id")?
    };
    let rank = Some(fields[2]).filter(|r| !r.is_empty()).map(str::to_string);

    Ok(NodeRecord {
        taxon_id,
        parent_id,
        rank,
    })
}

/// Parse a single `names.dmp` line
///
/// Returns `Ok(None)` for name classes that are not kept.
pub fn parse_name_line(line: &str) -> Result<Option<NameRecord>, MalformedLine> {
    let fields = split_fields(line);
    if fields.len() < 4 {
        return Err(MalformedLine(format!(
            "expected 4 fields, got {}",
            fields.len()
        )));
    }

    let taxon_id = parse_id(fields[0], "tax_id")?;
    let Some(class) = NameClass::from_field(fields[3]) else {
        return Ok(None);
    };
    if fields[1].is_empty() {
        return Err(MalformedLine("empty name".to_string()));
    }

    Ok(Some(NameRecord {
        taxon_id,
        name: fields[1].to_string(),
        class,
    }))
}

/// Reads lines as lossy UTF-8 so a stray byte only affects its own line
struct LineReader<R> {
    reader: R,
    buf: Vec<u8>,
    line_number: usize,
}

impl<R: BufRead> LineReader<R> {
    fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::with_capacity(256),
            line_number: 0,
        }
    }

    fn next_line(&mut self) -> Option<io::Result<String>> {
        self.buf.clear();
        match self.reader.read_until(b'\n', &mut self.buf) {
            Ok(0) => None,
            Ok(_) => {
                self.line_number += 1;
                Some(Ok(String::from_utf8_lossy(&self.buf).into_owned()))
            },
            Err(e) => Some(Err(e)),
        }
    }
}

fn record_skip(stats: &mut ParseStats, file: &str, line_number: usize, reason: &MalformedLine) {
    stats.skipped += 1;
    if stats.skipped <= MAX_LOGGED_SKIPS {
        warn!(file, line = line_number, reason = %reason, "Skipping malformed line");
    } else {
        debug!(file, line = line_number, reason = %reason, "Skipping malformed line");
    }
}

/// Lazy, single-pass iterator over `nodes.dmp` records
pub struct NodeRecords<R> {
    lines: LineReader<R>,
    stats: ParseStats,
}

impl<R: BufRead> NodeRecords<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: LineReader::new(reader),
            stats: ParseStats::default(),
        }
    }

    pub fn stats(&self) -> ParseStats {
        self.stats
    }
}

impl<R: BufRead> Iterator for NodeRecords<R> {
    type Item = io::Result<NodeRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next_line()? {
                Ok(line) => line,
                Err(e) => return Some(Err(e)),
            };
            self.stats.lines += 1;
            if line.trim().is_empty() {
                continue;
            }

            match parse_node_line(&line) {
                Ok(record) => {
                    self.stats.records += 1;
                    return Some(Ok(record));
                },
                Err(reason) => {
                    record_skip(&mut self.stats, "nodes.dmp", self.lines.line_number, &reason)
                },
            }
        }
    }
}

/// Lazy, single-pass iterator over kept `names.dmp` records
pub struct NameRecords<R> {
    lines: LineReader<R>,
    stats: ParseStats,
}

impl<R: BufRead> NameRecords<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: LineReader::new(reader),
            stats: ParseStats::default(),
        }
    }

    pub fn stats(&self) -> ParseStats {
        self.stats
    }
}

impl<R: BufRead> Iterator for NameRecords<R> {
    type Item = io::Result<NameRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next_line()? {
                Ok(line) => line,
                Err(e) => return Some(Err(e)),
            };
            self.stats.lines += 1;
            if line.trim().is_empty() {
                continue;
            }

            match parse_name_line(&line) {
                Ok(Some(record)) => {
                    self.stats.records += 1;
                    return Some(Ok(record));
                },
                Ok(None) => self.stats.filtered += 1,
                Err(reason) => {
                    record_skip(&mut self.stats, "names.dmp", self.lines.line_number, &reason)
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_parse_node_line() {
        let line = "9606\t|\t9605\t|\tspecies\t|\tHS\t|\t5\t|\t1\t|\t1\t|\t1\t|\t2\t|\t1\t|\t1\t|\t0\t|\t\t|";
        let record = parse_node_line(line).unwrap();
        assert_eq!(record.taxon_id, 9606);
        assert_eq!(record.parent_id, 9605);
        assert_eq!(record.rank.as_deref(), Some("species"));
    }

    #[test]
    fn test_parse_node_line_root_and_empty_rank() {
        let record = parse_node_line("1\t|\t1\t|\t\t|").unwrap();
        assert_eq!(record.parent_id, 1);
        assert_eq!(record.rank, None);
    }

    #[test]
    fn test_parse_node_line_absent_parent_is_root() {
        let record = parse_node_line("1\t|\t\t|\tno rank\t|").unwrap();
        assert_eq!(record.parent_id, 1);
        assert_eq!(record.rank.as_deref(), Some("no rank"));
    }

    #[test]
    fn test_parse_node_line_rejects_bad_ids() {
        assert!(parse_node_line("abc\t|\t1\t|\tno rank\t|").is_err());
        assert!(parse_node_line("2\t|\tx\t|\tno rank\t|").is_err());
        assert!(parse_node_line("2\t|").is_err());
    }

    #[test]
    fn test_parse_name_line() {
        let record = parse_name_line("9606\t|\thuman\t|\t\t|\tgenbank common name\t|")
            .unwrap()
            .unwrap();
        assert_eq!(record.taxon_id, 9606);
        assert_eq!(record.name, "human");
        assert_eq!(record.class, NameClass::GenbankCommon);

        let filtered = parse_name_line("9606\t|\tHomo sapiens Linnaeus, 1758\t|\t\t|\tauthority\t|");
        assert_eq!(filtered.unwrap(), None);
    }

    #[test]
    fn test_name_records_counts_filtered_and_skipped() {
        let data = "1\t|\troot\t|\t\t|\tscientific name\t|\n\
                    1\t|\tall\t|\t\t|\tsynonym\t|\n\
                    oops\n\
                    \n\
                    2\t|\tBacteria\t|\tBacteria <bacteria>\t|\tscientific name\t|\n";
        let mut records = NameRecords::new(Cursor::new(data));
        let names: Vec<NameRecord> = records.by_ref().map(|r| r.unwrap()).collect();

        assert_eq!(names.len(), 2);
        assert_eq!(names[1].name, "Bacteria");

        let stats = records.stats();
        assert_eq!(stats.lines, 5);
        assert_eq!(stats.records, 2);
        assert_eq!(stats.filtered, 1);
        assert_eq!(stats.skipped, 1);
    }

    #[test]
    fn test_node_records_survive_invalid_utf8() {
        let mut data = b"1\t|\t1\t|\tno rank\t|\n".to_vec();
        data.extend_from_slice(b"\xff\xfe\t|\t1\t|\tgenus\t|\n");
        data.extend_from_slice(b"2\t|\t1\t|\tsuperkingdom\t|\n");

        let mut records = NodeRecords::new(Cursor::new(data));
        let ids: Vec<TaxonId> = records.by_ref().map(|r| r.unwrap().taxon_id).collect();

        assert_eq!(ids, vec![1, 2]);
        assert_eq!(records.stats().skipped, 1);
    }

    #[test]
    fn test_io_error_is_surfaced() {
        struct Broken;
        impl io::Read for Broken {
            fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
            }
        }

        let mut records = NodeRecords::new(io::BufReader::new(Broken));
        let first = records.next().unwrap();
        assert_eq!(first.unwrap_err().kind(), io::ErrorKind::ConnectionReset);
    }
}
