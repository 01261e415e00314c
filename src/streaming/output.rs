//! Efficient output formatting for streaming operations.
//!
//! Uses itoa for integer formatting and ryu for float formatting
//! to avoid allocation in the hot path. Written files may get a `.meta`
//! sidecar describing the range, checksum and line count of their rows.

use crate::genome::GenomicKey;
use crate::gor::{GorError, Result};
use crate::row::{Header, Row};
use crate::streaming::buffers::DEFAULT_OUTPUT_BUFFER;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Format an integer with itoa.
#[inline]
pub fn format_int(n: i64) -> String {
    itoa::Buffer::new().format(n).to_string()
}

/// Format a float with ryu (`1.5`, `1e20`, `NaN`).
#[inline]
pub fn format_float(f: f64) -> String {
    ryu::Buffer::new().format(f).to_string()
}

/// Format a computed number: integral values print without a fraction.
#[inline]
pub fn format_number(f: f64) -> String {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e15 {
        format_int(f as i64)
    } else {
        format_float(f)
    }
}

/// Tab-separated row writer.
///
/// Uses large buffering; in NOR mode the synthetic key columns are not
/// written.
pub struct GorWriter<W: Write> {
    writer: BufWriter<W>,
    nor: bool,
    keep_key: bool,
    rows_written: u64,
}

impl<W: Write> GorWriter<W> {
    /// Create a new writer with the default 2MB buffer.
    pub fn new(output: W) -> Self {
        Self::with_capacity(DEFAULT_OUTPUT_BUFFER, output)
    }

    /// Create a new writer with specified buffer size.
    pub fn with_capacity(capacity: usize, output: W) -> Self {
        Self {
            writer: BufWriter::with_capacity(capacity, output),
            nor: false,
            keep_key: false,
            rows_written: 0,
        }
    }

    /// Also write the synthetic NOR key columns, so the file reads back as
    /// an already keyed NOR table.
    pub fn keep_nor_key(mut self) -> Self {
        self.keep_key = true;
        self
    }

    /// Write the header line and fix the NOR mode for following rows.
    pub fn write_header(&mut self, header: &Header) -> Result<()> {
        self.nor = header.is_nor() && !self.keep_key;
        let line = if self.nor {
            header.to_line()
        } else {
            header.names().join("\t")
        };
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    #[inline]
    pub fn write_row(&mut self, row: &Row) -> Result<()> {
        let cols = if self.nor {
            &row.cols()[2.min(row.len())..]
        } else {
            row.cols()
        };
        for (i, cell) in cols.iter().enumerate() {
            if i > 0 {
                self.writer.write_all(b"\t")?;
            }
            self.writer.write_all(cell.as_bytes())?;
        }
        self.writer.write_all(b"\n")?;
        self.rows_written += 1;
        Ok(())
    }

    /// Write a full line as-is with newline.
    #[inline]
    pub fn write_line(&mut self, line: &str) -> Result<()> {
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    /// Flush the output buffer.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    /// Flush and return the underlying writer.
    pub fn into_inner(self) -> Result<W> {
        self.writer
            .into_inner()
            .map_err(|e| GorError::Io(e.into_error()))
    }
}

/// Contents of a `.meta` sidecar.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetaInfo {
    /// First and last key written; `None` for an empty file.
    pub range: Option<(GenomicKey, GenomicKey)>,
    /// SHA-256 of the written lines, hex encoded.
    pub checksum: String,
    pub lines: u64,
    /// Distinct values of designated columns.
    pub cardinality: Vec<(String, Vec<String>)>,
    /// Column type codes.
    pub schema: Option<Vec<String>>,
    pub tags: Option<String>,
}

impl MetaInfo {
    /// Sidecar path for a data file: `<file>.meta`.
    pub fn path_for(path: &Path) -> PathBuf {
        let mut name = path.as_os_str().to_os_string();
        name.push(".meta");
        PathBuf::from(name)
    }

    pub fn to_text(&self) -> String {
        let mut out = String::new();
        if let Some((first, last)) = &self.range {
            out.push_str(&format!(
                "## RANGE: {}\t{}\t{}\t{}\n",
                first.chrom, first.pos, last.chrom, last.pos
            ));
        }
        out.push_str(&format!("## CHECKSUM: {}\n", self.checksum));
        out.push_str(&format!("## LINES: {}\n", self.lines));
        for (col, values) in &self.cardinality {
            out.push_str(&format!("## CARDCOL[{}]: {}\n", col, values.join(",")));
        }
        if let Some(schema) = &self.schema {
            out.push_str(&format!("## SCHEMA: {}\n", schema.join(",")));
        }
        if let Some(tags) = &self.tags {
            out.push_str(&format!("## TAGS: {}\n", tags));
        }
        out
    }

    pub fn write(&self, data_path: &Path) -> Result<()> {
        fs::write(Self::path_for(data_path), self.to_text())?;
        Ok(())
    }

    /// Read the sidecar of `data_path`; a missing sidecar yields `None`.
    pub fn read(data_path: &Path) -> Result<Option<MetaInfo>> {
        let path = Self::path_for(data_path);
        let text = match fs::read_to_string(&path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Self::parse(&text, &path).map(Some)
    }

    fn parse(text: &str, path: &Path) -> Result<MetaInfo> {
        let bad = |line: &str| {
            GorError::data(format!("Malformed meta line in {}: {}", path.display(), line))
        };
        let mut meta = MetaInfo::default();
        for line in text.lines() {
            let Some(body) = line.strip_prefix("## ") else {
                continue;
            };
            let Some((key, value)) = body.split_once(": ") else {
                continue;
            };
            match key {
                "RANGE" => {
                    let f: Vec<&str> = value.split('\t').collect();
                    if f.len() != 4 {
                        return Err(bad(line));
                    }
                    let p1 = f[1].parse().map_err(|_| bad(line))?;
                    let p2 = f[3].parse().map_err(|_| bad(line))?;
                    meta.range = Some((GenomicKey::new(f[0], p1), GenomicKey::new(f[2], p2)));
                }
                "CHECKSUM" => meta.checksum = value.to_string(),
                "LINES" => meta.lines = value.parse().map_err(|_| bad(line))?,
                "SCHEMA" => meta.schema = Some(value.split(',').map(String::from).collect()),
                "TAGS" => meta.tags = Some(value.to_string()),
                k if k.starts_with("CARDCOL[") && k.ends_with(']') => {
                    let col = &k[8..k.len() - 1];
                    let values = if value.is_empty() {
                        Vec::new()
                    } else {
                        value.split(',').map(String::from).collect()
                    };
                    meta.cardinality.push((col.to_string(), values));
                }
                _ => {}
            }
        }
        Ok(meta)
    }
}

/// Accumulates a [`MetaInfo`] while rows are written.
pub struct MetaBuilder {
    hasher: Sha256,
    first: Option<GenomicKey>,
    last: Option<GenomicKey>,
    lines: u64,
    cardinality: Vec<(String, usize, BTreeSet<String>)>,
}

impl MetaBuilder {
    /// `card_columns` are (name, index) pairs whose distinct values are kept.
    pub fn new(card_columns: Vec<(String, usize)>) -> Self {
        Self {
            hasher: Sha256::new(),
            first: None,
            last: None,
            lines: 0,
            cardinality: card_columns
                .into_iter()
                .map(|(name, idx)| (name, idx, BTreeSet::new()))
                .collect(),
        }
    }

    #[inline]
    pub fn observe(&mut self, row: &Row, line: &str) {
        if self.first.is_none() {
            self.first = Some(GenomicKey::new(row.chrom(), row.pos()));
        }
        match &mut self.last {
            Some(last) if last.chrom == row.chrom() => last.pos = row.pos(),
            _ => self.last = Some(GenomicKey::new(row.chrom(), row.pos())),
        }
        self.hasher.update(line.as_bytes());
        self.hasher.update(b"\n");
        self.lines += 1;
        for (_, idx, values) in &mut self.cardinality {
            let v = row.col(*idx);
            if !values.contains(v) {
                values.insert(v.to_string());
            }
        }
    }

    pub fn finish(self) -> MetaInfo {
        let digest = self.hasher.finalize();
        let checksum = digest.iter().map(|b| format!("{:02x}", b)).collect();
        let range = match (self.first, self.last) {
            (Some(f), Some(l)) => Some((f, l)),
            _ => None,
        };
        MetaInfo {
            range,
            checksum,
            lines: self.lines,
            cardinality: self
                .cardinality
                .into_iter()
                .map(|(name, _, values)| (name, values.into_iter().collect()))
                .collect(),
            schema: None,
            tags: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_format_numbers() {
        assert_eq!(format_int(-42), "-42");
        assert_eq!(format_float(1.5), "1.5");
        assert_eq!(format_number(3.0), "3");
        assert_eq!(format_number(2.25), "2.25");
        assert_eq!(format_number(f64::NAN), "NaN");
    }

    #[test]
    fn test_write_rows() {
        let mut writer = GorWriter::new(Vec::new());
        writer
            .write_header(&Header::from_names(&["Chrom", "Pos", "A"]))
            .unwrap();
        writer
            .write_row(&Row::from_parts("chr1", 5, vec!["x".to_string()]))
            .unwrap();
        assert_eq!(writer.rows_written(), 1);
        let out = writer.into_inner().unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "Chrom\tPos\tA\nchr1\t5\tx\n");
    }

    #[test]
    fn test_write_nor_hides_key() {
        let mut writer = GorWriter::new(Vec::new());
        writer
            .write_header(&Header::nor(vec!["a".into(), "b".into()]))
            .unwrap();
        writer
            .write_row(&Row::nor(vec!["1".into(), "2".into()]))
            .unwrap();
        let out = writer.into_inner().unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "a\tb\n1\t2\n");

        let mut keyed = GorWriter::new(Vec::new()).keep_nor_key();
        keyed.write_header(&Header::nor(vec!["a".into()])).unwrap();
        keyed.write_row(&Row::nor(vec!["1".into()])).unwrap();
        let out = keyed.into_inner().unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "ChromNOR\tPosNOR\ta\nchrN\t0\t1\n");
    }

    #[test]
    fn test_meta_roundtrip() {
        let dir = TempDir::new().unwrap();
        let data = dir.path().join("out.gor");
        let mut builder = MetaBuilder::new(vec![("Tag".to_string(), 2)]);
        for (chrom, pos, tag) in [("chr1", 1, "b"), ("chr1", 9, "a"), ("chr2", 3, "b")] {
            let row = Row::from_parts(chrom, pos, vec![tag.to_string()]);
            builder.observe(&row, &row.to_line());
        }
        let mut meta = builder.finish();
        meta.schema = Some(vec!["S".into(), "I".into(), "S".into()]);
        meta.write(&data).unwrap();

        let read = MetaInfo::read(&data).unwrap().unwrap();
        assert_eq!(read, meta);
        assert_eq!(read.lines, 3);
        assert_eq!(
            read.range,
            Some((GenomicKey::new("chr1", 1), GenomicKey::new("chr2", 3)))
        );
        assert_eq!(read.cardinality[0].1, vec!["a", "b"]);
        assert_eq!(read.checksum.len(), 64);
    }

    #[test]
    fn test_missing_meta() {
        let dir = TempDir::new().unwrap();
        assert!(MetaInfo::read(&dir.path().join("none.gor")).unwrap().is_none());
    }
}
