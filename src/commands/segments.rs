//! Segment algebra over `chrom bpStart bpStop` streams: spanning, projection
//! into non-overlapping pieces and histogram binning.
//!
//! Segments here use bp coordinates, so `[start, stop)` pieces that only
//! touch do not overlap.

use super::{resolve_columns, Emitter, Step};
use crate::gor::{GorError, Result};
use crate::query::parser::CommandLine;
use crate::row::{ColumnType, Header, Row};
use crate::streaming::{format_int, format_number};
use rustc_hash::FxHashMap;

fn segment_end(row: &Row) -> Result<u64> {
    row.col(2).parse().map_err(|_| {
        GorError::data(format!(
            "Segment stop '{}' at {}:{} is not a position",
            row.col(2),
            row.chrom(),
            row.pos()
        ))
    })
}

fn require_segments(line: &CommandLine, input: &Header) -> Result<()> {
    if input.len() < 3 || input.is_nor() {
        return Err(GorError::parse(
            line.name(),
            "Input must have chromosome, start and stop columns",
        ));
    }
    Ok(())
}

fn group_key(row: &Row, columns: &[usize]) -> Vec<String> {
    columns.iter().map(|&c| row.col(c).to_string()).collect()
}

fn segment_header(input: &Header, group_columns: &[usize], last: &str, last_type: ColumnType) -> Header {
    let mut h = input.project(&[0, 1, 2]);
    for &g in group_columns {
        h.push(input.name(g), input.type_of(g));
    }
    h.push(h.unique_name(last), last_type);
    h
}

/// Output pieces held until every group has moved past their start.
#[derive(Debug, Default)]
struct Pending {
    pieces: Vec<(u64, u64, Vec<String>, String)>,
}

impl Pending {
    fn emit_before(&mut self, chrom: &str, limit: Option<u64>, out: &mut Emitter) {
        self.pieces.sort_by_key(|p| p.0);
        let split = match limit {
            Some(l) => self.pieces.partition_point(|p| p.0 < l),
            None => self.pieces.len(),
        };
        for (start, stop, key, value) in self.pieces.drain(..split) {
            let mut cells = vec![format_int(stop as i64)];
            cells.extend(key);
            cells.push(value);
            out.emit(Row::from_parts(chrom, start, cells));
        }
    }
}

#[derive(Debug)]
struct Span {
    start: u64,
    stop: u64,
    count: u64,
}

/// `segspan [-gc cols] [-maxseg N]`: merges overlapping segments and counts
/// them in `segCount`.
pub struct SegSpanStep {
    header: Header,
    group_columns: Vec<usize>,
    chrom: Option<String>,
    open: FxHashMap<Vec<String>, Span>,
    pending: Pending,
}

impl SegSpanStep {
    pub fn from_command(line: &CommandLine, input: &Header) -> Result<Self> {
        let opts = line.options(&[], &["-gc", "-maxseg"])?;
        require_segments(line, input)?;
        if !opts.positional().is_empty() {
            return Err(opts.error("Unexpected arguments"));
        }
        let group_columns = match opts.value("-gc") {
            Some(spec) => resolve_columns(input, spec, line.name())?,
            None => Vec::new(),
        };
        Ok(Self {
            header: segment_header(input, &group_columns, "segCount", ColumnType::Int),
            group_columns,
            chrom: None,
            open: FxHashMap::default(),
            pending: Pending::default(),
        })
    }

    fn close_all(&mut self, out: &mut Emitter) {
        for (key, span) in self.open.drain() {
            self.pending
                .pieces
                .push((span.start, span.stop, key, format_int(span.count as i64)));
        }
        if let Some(chrom) = &self.chrom {
            self.pending.emit_before(chrom, None, out);
        }
    }
}

impl Step for SegSpanStep {
    fn header(&self) -> &Header {
        &self.header
    }

    fn process(&mut self, row: Row, out: &mut Emitter) -> Result<()> {
        if self.chrom.as_deref() != Some(row.chrom()) {
            self.close_all(out);
            self.chrom = Some(row.chrom().to_string());
        }
        let start = row.pos();
        let stop = segment_end(&row)?;
        let key = group_key(&row, &self.group_columns);
        match self.open.get_mut(&key) {
            Some(span) if start < span.stop => {
                span.stop = span.stop.max(stop);
                span.count += 1;
            }
            Some(span) => {
                let closed = std::mem::replace(span, Span { start, stop, count: 1 });
                self.pending.pieces.push((
                    closed.start,
                    closed.stop,
                    key,
                    format_int(closed.count as i64),
                ));
            }
            None => {
                self.open.insert(key, Span { start, stop, count: 1 });
            }
        }
        let min_open = self.open.values().map(|s| s.start).min();
        self.pending.emit_before(row.chrom(), min_open, out);
        Ok(())
    }

    fn finish(&mut self, out: &mut Emitter) -> Result<()> {
        self.close_all(out);
        Ok(())
    }
}

/// Active segments of one group in a projection.
#[derive(Debug, Default)]
struct Projection {
    cursor: u64,
    active: Vec<(u64, f64)>,
}

impl Projection {
    /// Cut pieces up to `upto` (or to the end of every active segment).
    fn advance(&mut self, upto: Option<u64>, mut piece: impl FnMut(u64, u64, f64, usize)) {
        while let Some(next_end) = self.active.iter().map(|a| a.0).min() {
            let boundary = upto.map_or(next_end, |u| next_end.min(u));
            if boundary > self.cursor {
                let weight = self.active.iter().map(|a| a.1).sum();
                piece(self.cursor, boundary, weight, self.active.len());
                self.cursor = boundary;
            }
            if upto.is_some_and(|u| next_end > u) {
                break;
            }
            self.active.retain(|a| a.0 > next_end);
        }
        if let Some(u) = upto {
            self.cursor = self.cursor.max(u);
        }
    }
}

/// `segproj [-gc cols] [-sumcol col] [-maxseg N]`: projects overlapping
/// segments onto non-overlapping pieces with their overlap count, or the sum
/// of `-sumcol` over the overlapping segments.
pub struct SegProjStep {
    header: Header,
    group_columns: Vec<usize>,
    sum_column: Option<usize>,
    chrom: Option<String>,
    groups: FxHashMap<Vec<String>, Projection>,
    pending: Pending,
}

impl SegProjStep {
    pub fn from_command(line: &CommandLine, input: &Header) -> Result<Self> {
        let opts = line.options(&[], &["-gc", "-sumcol", "-maxseg"])?;
        require_segments(line, input)?;
        let group_columns = match opts.value("-gc") {
            Some(spec) => resolve_columns(input, spec, line.name())?,
            None => Vec::new(),
        };
        let sum_column = match opts.value("-sumcol") {
            Some(spec) => match resolve_columns(input, spec, line.name())?.as_slice() {
                [c] => Some(*c),
                _ => return Err(opts.option_error("-sumcol", "Expected a single column")),
            },
            None => None,
        };
        let header = match sum_column {
            Some(c) => segment_header(
                input,
                &group_columns,
                &format!("sum_{}", input.name(c)),
                ColumnType::Double,
            ),
            None => segment_header(input, &group_columns, "segCount", ColumnType::Int),
        };
        Ok(Self {
            header,
            group_columns,
            sum_column,
            chrom: None,
            groups: FxHashMap::default(),
            pending: Pending::default(),
        })
    }

    fn advance_all(&mut self, upto: Option<u64>) {
        let summing = self.sum_column.is_some();
        let pending = &mut self.pending;
        for (key, projection) in self.groups.iter_mut() {
            projection.advance(upto, |start, stop, weight, count| {
                let value = if summing {
                    format_number(weight)
                } else {
                    format_int(count as i64)
                };
                pending.pieces.push((start, stop, key.clone(), value));
            });
        }
        self.groups.retain(|_, p| !p.active.is_empty());
    }
}

impl Step for SegProjStep {
    fn header(&self) -> &Header {
        &self.header
    }

    fn process(&mut self, row: Row, out: &mut Emitter) -> Result<()> {
        if self.chrom.as_deref() != Some(row.chrom()) {
            self.finish(out)?;
            self.chrom = Some(row.chrom().to_string());
        }
        let start = row.pos();
        let stop = segment_end(&row)?;
        let weight = match self.sum_column {
            Some(c) => row.col(c).parse::<f64>().map_err(|_| {
                GorError::data(format!(
                    "segproj: '{}' at {}:{} is not a number",
                    row.col(c),
                    row.chrom(),
                    row.pos()
                ))
            })?,
            None => 1.0,
        };
        self.advance_all(Some(start));
        self.pending.emit_before(row.chrom(), Some(start), out);
        let key = group_key(&row, &self.group_columns);
        let projection = self.groups.entry(key).or_default();
        if projection.active.is_empty() {
            projection.cursor = start;
        }
        if stop > start {
            projection.active.push((stop, weight));
        }
        Ok(())
    }

    fn finish(&mut self, out: &mut Emitter) -> Result<()> {
        self.advance_all(None);
        if let Some(chrom) = &self.chrom {
            self.pending.emit_before(chrom, None, out);
        }
        self.groups.clear();
        Ok(())
    }
}

/// `seghist N`: merges consecutive segments of a chromosome until their
/// summed count reaches N.
///
/// The count is taken from `segCount` when present, otherwise from the last
/// column.
pub struct SegHistStep {
    header: Header,
    count_column: usize,
    threshold: u64,
    current: Option<(String, u64, u64, u64)>,
}

impl SegHistStep {
    pub fn from_command(line: &CommandLine, input: &Header) -> Result<Self> {
        let opts = line.options(&[], &[])?;
        require_segments(line, input)?;
        let [n] = opts.positional() else {
            return Err(opts.error("Expected a count threshold"));
        };
        let threshold = n
            .parse::<u64>()
            .ok()
            .filter(|&t| t > 0)
            .ok_or_else(|| opts.error(format!("Invalid count threshold '{}'", n)))?;
        let count_column = input.index_of("segCount").unwrap_or(input.len() - 1);
        let mut header = input.project(&[0, 1, 2]);
        header.push("count", ColumnType::Int);
        Ok(Self {
            header,
            count_column,
            threshold,
            current: None,
        })
    }

    fn emit_current(&mut self, out: &mut Emitter) {
        if let Some((chrom, start, stop, count)) = self.current.take() {
            out.emit(Row::from_parts(
                &chrom,
                start,
                [format_int(stop as i64), format_int(count as i64)],
            ));
        }
    }
}

impl Step for SegHistStep {
    fn header(&self) -> &Header {
        &self.header
    }

    fn process(&mut self, row: Row, out: &mut Emitter) -> Result<()> {
        let stop = segment_end(&row)?;
        let count: u64 = row.col(self.count_column).parse().map_err(|_| {
            GorError::data(format!(
                "seghist: count '{}' at {}:{} is not an integer",
                row.col(self.count_column),
                row.chrom(),
                row.pos()
            ))
        })?;
        if self
            .current
            .as_ref()
            .is_some_and(|(chrom, ..)| chrom != row.chrom())
        {
            self.emit_current(out);
        }
        match &mut self.current {
            Some((_, _, cur_stop, cur_count)) => {
                *cur_stop = stop;
                *cur_count += count;
            }
            None => self.current = Some((row.chrom().to_string(), row.pos(), stop, count)),
        }
        if self.current.as_ref().is_some_and(|c| c.3 >= self.threshold) {
            self.emit_current(out);
        }
        Ok(())
    }

    fn finish(&mut self, out: &mut Emitter) -> Result<()> {
        self.emit_current(out);
        Ok(())
    }
}
