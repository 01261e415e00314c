//! Synthetic row sources: `gorrows`, `norrows` and `gorrow`.
//!
//! Rows are generated lazily, so large ranges cost no memory, and `seek`
//! jumps straight to the target position.

use crate::genome::ChromOrder;
use crate::gor::{GorError, Result};
use crate::query::parser::CommandLine;
use crate::row::{ColumnType, Header, Row};
use crate::streaming::{format_int, RowSource, VecSource};
use std::cmp::Ordering;
use std::sync::Arc;

/// Parse `chrom:start-stop`, where stop is required.
fn parse_position(text: &str) -> Result<(String, u64, u64)> {
    let invalid = || {
        GorError::parse_option("gorrows", "-p", format!("Invalid range value '{}'", text))
    };
    let missing_stop =
        || GorError::parse_option("gorrows", "-p", "Error stop_position is required");
    let Some((chrom, span)) = text.split_once(':') else {
        if text.is_empty() || text.contains('-') {
            return Err(invalid());
        }
        return Err(missing_stop());
    };
    if chrom.is_empty() {
        return Err(invalid());
    }
    let Some((start, stop)) = span.split_once('-') else {
        return Err(missing_stop());
    };
    let start: u64 = start.trim().parse().map_err(|_| invalid())?;
    if stop.trim().is_empty() {
        return Err(missing_stop());
    }
    let stop: u64 = stop.trim().parse().map_err(|_| invalid())?;
    if stop < start {
        return Err(GorError::parse_option(
            "gorrows",
            "-p",
            format!("stop cannot be lower than {}", start),
        ));
    }
    if stop == start {
        return Err(GorError::parse_option(
            "gorrows",
            "-p",
            format!("stop_position cannot be lower than {}", start + 1),
        ));
    }
    Ok((chrom.to_string(), start, stop))
}

/// `gorrows -p chrom:start-stop [-step N] [-segment N]`.
///
/// Emits positions `start, start+step, ...` below `stop`. With `-segment N`
/// every row is a segment `pos pos+N`.
pub struct GorRowsSource {
    header: Header,
    chrom: String,
    start: u64,
    next: u64,
    stop: u64,
    step: u64,
    segment: Option<u64>,
    order: Arc<ChromOrder>,
}

impl GorRowsSource {
    pub fn from_command(line: &CommandLine, order: Arc<ChromOrder>) -> Result<Self> {
        let opts = line.options(&[], &["-p", "-step", "-segment"])?;
        let position = opts
            .value("-p")
            .ok_or_else(|| opts.option_error("-p", "Position option -p is required"))?;
        let (chrom, start, stop) = parse_position(position)?;
        let step = match opts.int("-step")? {
            None => 1,
            Some(n) if n >= 1 => n as u64,
            Some(_) => return Err(opts.option_error("-step", "-step cannot be lower than 1")),
        };
        let segment = match opts.int("-segment")? {
            None => None,
            Some(n) if n >= 1 => Some(n as u64),
            Some(_) => {
                return Err(opts.option_error("-segment", "-segment cannot be lower than 1"))
            }
        };
        Ok(Self::new(&chrom, start, stop, step, segment, order))
    }

    pub fn new(
        chrom: &str,
        start: u64,
        stop: u64,
        step: u64,
        segment: Option<u64>,
        order: Arc<ChromOrder>,
    ) -> Self {
        let mut header = match segment {
            Some(_) => Header::from_names(&["chrom", "bpStart", "bpStop"]),
            None => Header::from_names(&["chrom", "pos"]),
        };
        header.set_type(0, ColumnType::String);
        for i in 1..header.len() {
            header.set_type(i, ColumnType::Long);
        }
        Self {
            header,
            chrom: chrom.to_string(),
            start,
            next: start,
            stop,
            step: step.max(1),
            segment,
            order,
        }
    }
}

impl RowSource for GorRowsSource {
    fn header(&self) -> &Header {
        &self.header
    }

    fn has_next(&mut self) -> Result<bool> {
        Ok(self.next < self.stop)
    }

    fn next_row(&mut self) -> Result<Row> {
        if self.next >= self.stop {
            return Err(GorError::system("next_row called on exhausted gorrows"));
        }
        let pos = self.next;
        self.next += self.step;
        let rest: Vec<String> = match self.segment {
            Some(len) => vec![format_int((pos + len) as i64)],
            None => Vec::new(),
        };
        Ok(Row::from_parts(&self.chrom, pos, rest))
    }

    fn seek(&mut self, chrom: &str, pos: u64) -> Result<()> {
        match self.order.cmp_chrom(&self.chrom, chrom) {
            Ordering::Less => self.next = self.stop,
            Ordering::Greater => {}
            Ordering::Equal if pos > self.next => {
                let steps = (pos - self.start).div_ceil(self.step);
                self.next = self.start + steps * self.step;
            }
            Ordering::Equal => {}
        }
        Ok(())
    }

    fn close(&mut self) {
        self.next = self.stop;
    }
}

/// `norrows N [-offset K]`: a NOR table with column `RowNum` holding
/// `K..K+N`.
pub struct NorRowsSource {
    header: Header,
    next: u64,
    end: u64,
}

impl NorRowsSource {
    pub fn from_command(line: &CommandLine) -> Result<Self> {
        let opts = line.options(&[], &["-offset"])?;
        let [n] = opts.positional() else {
            return Err(opts.error("Expected a row count"));
        };
        let count: u64 = n
            .parse()
            .map_err(|_| opts.error(format!("Invalid row count '{}'", n)))?;
        let offset = opts.count("-offset", 0)? as u64;
        Ok(Self::new(count, offset))
    }

    pub fn new(count: u64, offset: u64) -> Self {
        let mut header = Header::nor(vec!["RowNum".to_string()]);
        header.set_type(2, ColumnType::Long);
        Self {
            header,
            next: offset,
            end: offset + count,
        }
    }
}

impl RowSource for NorRowsSource {
    fn header(&self) -> &Header {
        &self.header
    }

    fn has_next(&mut self) -> Result<bool> {
        Ok(self.next < self.end)
    }

    fn next_row(&mut self) -> Result<Row> {
        if self.next >= self.end {
            return Err(GorError::system("next_row called on exhausted norrows"));
        }
        let n = self.next;
        self.next += 1;
        Ok(Row::nor(vec![format_int(n as i64)]))
    }

    fn seek(&mut self, _chrom: &str, _pos: u64) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) {
        self.next = self.end;
    }
}

/// `gorrow chrom,pos[,end]`: one row.
pub fn gorrow_source(line: &CommandLine, order: Arc<ChromOrder>) -> Result<VecSource> {
    let text = line.args().trim();
    let values: Vec<&str> = text.split(',').map(str::trim).collect();
    let header = match values.len() {
        2 => Header::from_names(&["chrom", "pos"]),
        3 => Header::from_names(&["chrom", "bpStart", "bpStop"]),
        _ => {
            return Err(GorError::parse(
                line.name(),
                format!("Expected chrom,pos[,end], got '{}'", text),
            ))
        }
    };
    let row = Row::new(values.iter().map(|v| v.to_string()).collect()).map_err(|_| {
        GorError::parse(line.name(), format!("Invalid position in '{}'", text))
    })?;
    if values.len() == 3 && values[2].parse::<u64>().is_err() {
        return Err(GorError::parse(line.name(), format!("Invalid end in '{}'", text)));
    }
    Ok(VecSource::new(header, vec![row], order))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gor::ErrorCategory;
    use crate::streaming::collect_rows;

    fn gorrows(text: &str) -> Result<GorRowsSource> {
        GorRowsSource::from_command(
            &CommandLine::parse(text).unwrap(),
            Arc::new(ChromOrder::default()),
        )
    }

    fn lines(source: &mut dyn RowSource) -> Vec<String> {
        collect_rows(source)
            .unwrap()
            .iter()
            .map(|r| r.to_line())
            .collect()
    }

    #[test]
    fn test_gorrows_positions() {
        let mut src = gorrows("gorrows -p chr1:0-10").unwrap();
        assert_eq!(src.header().names(), &["chrom", "pos"]);
        let out = lines(&mut src);
        assert_eq!(out.len(), 10);
        assert_eq!(out[0], "chr1\t0");
        assert_eq!(out[9], "chr1\t9");
    }

    #[test]
    fn test_gorrows_segment_and_step() {
        let mut src = gorrows("gorrows -p chr1:0-100 -segment 100 -step 10").unwrap();
        assert_eq!(src.header().names(), &["chrom", "bpStart", "bpStop"]);
        let out = lines(&mut src);
        assert_eq!(out.len(), 10);
        assert_eq!(out[0], "chr1\t0\t100");
        assert_eq!(out[9], "chr1\t90\t190");
    }

    #[test]
    fn test_gorrows_errors() {
        let message = |text: &str| gorrows(text).err().unwrap().to_string();
        assert!(message("gorrows").contains("Position option"));
        assert!(message("gorrows -p chr1").contains("Error stop_position is required"));
        assert!(message("gorrows -p chr1:1-").contains("Error stop_position is required"));
        assert!(message("gorrows -p chr1:-1-10").contains("Invalid range value 'chr1:-1-10'"));
        assert!(message("gorrows -p chr1:100-10").contains("stop cannot be lower than 100"));
        assert!(message("gorrows -p chr1:100-100").contains("stop_position cannot be lower than 101"));
        assert!(message("gorrows -p chr1:0-10 -segment 0").contains("-segment cannot be lower than 1"));
        assert!(message("gorrows -p chr1:0-10 -step 0").contains("-step cannot be lower than 1"));
        assert_eq!(
            gorrows("gorrows -p").err().unwrap().category(),
            ErrorCategory::Parsing
        );
    }

    #[test]
    fn test_gorrows_seek() {
        let mut src = gorrows("gorrows -p chr1:0-100 -step 10").unwrap();
        src.seek("chr1", 35).unwrap();
        assert_eq!(src.next_row().unwrap().pos(), 40);
        src.seek("chr2", 0).unwrap();
        assert!(!src.has_next().unwrap());
    }

    #[test]
    fn test_norrows() {
        let line = CommandLine::parse("norrows 3 -offset 5").unwrap();
        let mut src = NorRowsSource::from_command(&line).unwrap();
        assert_eq!(src.header().to_line(), "RowNum");
        let rows = collect_rows(&mut src).unwrap();
        assert_eq!(rows.iter().map(|r| r.col(2)).collect::<Vec<_>>(), ["5", "6", "7"]);
    }

    #[test]
    fn test_gorrow() {
        let line = CommandLine::parse("gorrow chr1,2,3").unwrap();
        let mut src = gorrow_source(&line, Arc::new(ChromOrder::default())).unwrap();
        assert_eq!(src.header().names(), &["chrom", "bpStart", "bpStop"]);
        assert_eq!(lines(&mut src), vec!["chr1\t2\t3"]);
        let bad = CommandLine::parse("gorrow chr1").unwrap();
        assert!(gorrow_source(&bad, Arc::new(ChromOrder::default())).is_err());
    }
}
