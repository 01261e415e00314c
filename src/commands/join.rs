//! Positional joins between the pipeline (left) and a second ordered source
//! (right).
//!
//! The right side is read with a forward sweep: rows are pulled until they
//! start past the current left row, kept in an [`ActiveSet`] while they can
//! still overlap later left rows and expired once they end before it.
//! Segments are `(start, end]`, i.e. a segment row covers `start+1 ..= end`;
//! a SNP covers its position. With fuzz `f` a right row matches when it
//! lies within `f` bases of the left row.

use super::{resolve_columns, Emitter, Step};
use crate::genome::{ChromOrder, KeyRange};
use crate::gor::{GorError, Result};
use crate::query::parser::CommandLine;
use crate::query::Session;
use crate::row::{ColumnType, Header, Row};
use crate::streaming::{
    format_int, ActiveSet, BoxedSource, OrderValidator, PeekSource, RangeSource, Span,
};
use log::debug;
use rustc_hash::FxHashSet;
use std::cmp::Ordering;
use std::sync::Arc;

/// Left and right interval kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    SnpSnp,
    SnpSeg,
    SegSnp,
    SegSeg,
}

impl JoinKind {
    fn from_flag(flag: &str) -> Option<JoinKind> {
        match flag {
            "-snpsnp" => Some(JoinKind::SnpSnp),
            "-snpseg" => Some(JoinKind::SnpSeg),
            "-segsnp" => Some(JoinKind::SegSnp),
            "-segseg" => Some(JoinKind::SegSeg),
            _ => None,
        }
    }

    pub fn left_is_segment(&self) -> bool {
        matches!(self, JoinKind::SegSnp | JoinKind::SegSeg)
    }

    pub fn right_is_segment(&self) -> bool {
        matches!(self, JoinKind::SnpSeg | JoinKind::SegSeg)
    }
}

/// What is emitted per left row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JoinOutput {
    Pairs,
    Collapsed,
    Included,
    Excluded,
    RightRows,
    Count,
}

/// Parsed join options.
#[derive(Debug, Clone)]
pub struct JoinOptions {
    pub kind: JoinKind,
    pub fuzz: u64,
    pub closest_only: bool,
    pub closest: Option<usize>,
    pub collapse: bool,
    pub reduced: bool,
    pub included: bool,
    pub excluded: bool,
    pub right_rows: bool,
    pub count: bool,
    pub left_outer: bool,
    pub fill: String,
    pub left_keys: Option<String>,
    pub right_keys: Option<String>,
    pub case_insensitive: bool,
    pub max_segment: Option<u64>,
    pub right_prefix: Option<String>,
}

impl JoinOptions {
    pub fn new(kind: JoinKind) -> Self {
        Self {
            kind,
            fuzz: 0,
            closest_only: false,
            closest: None,
            collapse: false,
            reduced: false,
            included: false,
            excluded: false,
            right_rows: false,
            count: false,
            left_outer: false,
            fill: String::new(),
            left_keys: None,
            right_keys: None,
            case_insensitive: false,
            max_segment: None,
            right_prefix: None,
        }
    }

    fn output(&self) -> JoinOutput {
        if self.count {
            JoinOutput::Count
        } else if self.right_rows {
            JoinOutput::RightRows
        } else if self.included {
            JoinOutput::Included
        } else if self.excluded {
            JoinOutput::Excluded
        } else if self.collapse {
            JoinOutput::Collapsed
        } else {
            JoinOutput::Pairs
        }
    }

    fn has_distance(&self) -> bool {
        !self.reduced && !(self.kind == JoinKind::SnpSnp && self.fuzz == 0)
    }

    /// First right column copied to the output.
    fn right_from(&self) -> usize {
        match (self.has_distance(), self.kind.right_is_segment()) {
            (true, _) => 1,
            (false, true) => 3,
            (false, false) => 2,
        }
    }
}

const FLAGS: &[&str] = &[
    "-snpsnp", "-snpseg", "-segsnp", "-segseg", "-m", "-t", "-r", "-i", "-n", "-ir", "-ic",
    "-l", "-xcis",
];
const VALUED: &[&str] = &["-f", "-o", "-e", "-xl", "-xr", "-maxseg", "-rprefix", "-p"];

/// A right row buffered in the sweep window.
#[derive(Debug)]
struct Buffered {
    serial: u64,
    row: Row,
    key: String,
}

/// Covered closed position range of a row.
fn covered(row: &Row, segment: bool) -> Result<(u64, u64)> {
    if !segment {
        return Ok((row.pos(), row.pos()));
    }
    let end: u64 = row.col(2).parse().map_err(|_| {
        GorError::data(format!(
            "Segment end '{}' at {}:{} is not a position",
            row.col(2),
            row.chrom(),
            row.pos()
        ))
    })?;
    Ok((row.pos() + 1, end.max(row.pos() + 1)))
}

/// Signed distance from the left range `[la, lb]` to the right range
/// `[ra, rb]`; 0 when they overlap.
pub fn distance(la: u64, lb: u64, ra: u64, rb: u64) -> i64 {
    if rb < la {
        -((la - rb) as i64)
    } else if ra > lb {
        (ra - lb) as i64
    } else {
        0
    }
}

/// `join`: positional join against a right source.
pub struct JoinStep {
    header: Header,
    options: JoinOptions,
    output: JoinOutput,
    order: Arc<ChromOrder>,
    right: PeekSource,
    right_width: usize,
    validator: OrderValidator,
    window: ActiveSet<Span<Buffered>>,
    chrom: Option<String>,
    serial: u64,
    emitted: FxHashSet<u64>,
    left_keys: Vec<usize>,
    right_keys: Vec<usize>,
}

impl JoinStep {
    pub fn from_command(line: &CommandLine, input: &Header, session: &Session) -> Result<Self> {
        let opts = line.options(FLAGS, VALUED)?;
        let kinds: Vec<JoinKind> = FLAGS
            .iter()
            .filter(|f| opts.has(f))
            .filter_map(|f| JoinKind::from_flag(f))
            .collect();
        let kind = match kinds.as_slice() {
            [k] => *k,
            [] => JoinKind::SnpSnp,
            _ => return Err(opts.error("Only one of -snpsnp, -snpseg, -segsnp, -segseg allowed")),
        };
        let mut options = JoinOptions::new(kind);
        options.fuzz = opts.count("-f", 0)? as u64;
        options.closest_only = opts.has("-m");
        options.closest = match opts.value("-o") {
            Some(_) => Some(opts.count("-o", 1)?),
            None => None,
        };
        options.collapse = opts.has("-t");
        options.reduced = opts.has("-r");
        options.included = opts.has("-i");
        options.excluded = opts.has("-n");
        options.right_rows = opts.has("-ir");
        options.count = opts.has("-ic");
        options.left_outer = opts.has("-l");
        options.fill = opts.value("-e").unwrap_or("").to_string();
        options.left_keys = opts.value("-xl").map(String::from);
        options.right_keys = opts.value("-xr").map(String::from);
        options.case_insensitive = opts.has("-xcis");
        options.max_segment = match opts.value("-maxseg") {
            Some(_) => Some(opts.count("-maxseg", 0)? as u64),
            None => None,
        };
        options.right_prefix = opts.value("-rprefix").map(String::from);
        let exclusive = [
            options.included,
            options.excluded,
            options.right_rows,
            options.count,
        ];
        if exclusive.iter().filter(|b| **b).count() > 1 {
            return Err(opts.error("Options -i, -n, -ir and -ic are mutually exclusive"));
        }
        if options.left_keys.is_some() != options.right_keys.is_some() {
            return Err(opts.error("Options -xl and -xr must be used together"));
        }

        let [target] = opts.positional() else {
            return Err(opts.error("Expected one right-side source"));
        };
        let mut right = session.open_source(target)?;
        if let Some(range) = opts.value("-p") {
            right = Box::new(RangeSource::new(right, KeyRange::parse(range)?, session.order()));
        }
        Self::new(options, input, right, session.order()).map_err(|e| match e {
            GorError::Parse { .. } => e,
            other => GorError::parse(line.name(), other.to_string()),
        })
    }

    pub fn new(
        options: JoinOptions,
        input: &Header,
        right: BoxedSource,
        order: Arc<ChromOrder>,
    ) -> Result<Self> {
        let right_header = right.header().clone();
        let right_width = right_header.len();
        if options.kind.left_is_segment() && input.len() < 3 {
            return Err(GorError::parse("join", "Left input has no segment end column"));
        }
        if options.kind.right_is_segment() && right_width < 3 {
            return Err(GorError::parse("join", "Right input has no segment end column"));
        }
        let (left_keys, right_keys) = match (&options.left_keys, &options.right_keys) {
            (Some(l), Some(r)) => {
                let lk = resolve_columns(input, l, "join")?;
                let rk = resolve_columns(&right_header, r, "join")?;
                if lk.len() != rk.len() {
                    return Err(GorError::parse_option(
                        "join",
                        "-xr",
                        "Number of -xl and -xr columns differ",
                    ));
                }
                (lk, rk)
            }
            _ => (Vec::new(), Vec::new()),
        };

        let output = options.output();
        let header = match output {
            JoinOutput::Included | JoinOutput::Excluded => input.clone(),
            JoinOutput::RightRows => right_header.clone(),
            JoinOutput::Count => {
                let mut h = input.clone();
                h.push(h.unique_name("OverlapCount"), ColumnType::Int);
                h
            }
            JoinOutput::Pairs | JoinOutput::Collapsed => {
                let mut h = input.clone();
                if options.has_distance() {
                    h.push(h.unique_name("distance"), ColumnType::Int);
                }
                for i in options.right_from()..right_width {
                    let base = match &options.right_prefix {
                        Some(p) => format!("{}_{}", p, right_header.name(i)),
                        None => right_header.name(i).to_string(),
                    };
                    let t = if output == JoinOutput::Collapsed {
                        ColumnType::String
                    } else {
                        right_header.type_of(i)
                    };
                    h.push(h.unique_name(&base), t);
                }
                h
            }
        };
        debug!(
            "join {:?}: {} left columns, {} right columns, fuzz {}",
            options.kind,
            input.len(),
            right_width,
            options.fuzz
        );

        Ok(Self {
            header,
            output,
            validator: OrderValidator::new(order.clone(), "join right input"),
            order,
            right: PeekSource::new(right),
            right_width,
            window: ActiveSet::new(),
            chrom: None,
            serial: 0,
            emitted: FxHashSet::default(),
            left_keys,
            right_keys,
            options,
        })
    }

    fn equi_key(&self, row: &Row, columns: &[usize]) -> String {
        let mut key = String::new();
        for (i, &c) in columns.iter().enumerate() {
            if i > 0 {
                key.push('\t');
            }
            if self.options.case_insensitive {
                key.push_str(&row.col(c).to_lowercase());
            } else {
                key.push_str(row.col(c));
            }
        }
        key
    }

    /// Lowest right start that can still match a left row starting at `la`.
    fn reach_back(&self, la: u64) -> Option<u64> {
        let span = if self.options.kind.right_is_segment() {
            self.options.max_segment?
        } else {
            0
        };
        Some(la.saturating_sub(self.options.fuzz + span))
    }

    /// Move the right cursor to the left row's chromosome and buffer every
    /// right row starting at or before `lb + fuzz`.
    fn advance_right(&mut self, chrom: &str, la: u64, lb: u64) -> Result<()> {
        if self.chrom.as_deref() != Some(chrom) {
            self.window.clear();
            self.emitted.clear();
            self.chrom = Some(chrom.to_string());
            let target = self.reach_back(la).unwrap_or(0);
            self.right.seek(&self.order, chrom, target)?;
        } else if self.window.is_empty() {
            if let Some(target) = self.reach_back(la) {
                let behind = match self.right.peek()? {
                    Some(r) => r.chrom() == chrom && r.pos() < target,
                    None => false,
                };
                if behind {
                    self.right.seek(&self.order, chrom, target)?;
                }
            }
        }

        let limit = lb + self.options.fuzz;
        let segment = self.options.kind.right_is_segment();
        loop {
            let next_start = match self.right.peek()? {
                None => break,
                Some(r) => match self.order.cmp_chrom(r.chrom(), chrom) {
                    Ordering::Less => None,
                    Ordering::Greater => break,
                    Ordering::Equal => Some(covered(r, segment)?.0),
                },
            };
            if matches!(next_start, Some(start) if start > limit) {
                break;
            }
            let Some(row) = self.right.take()? else {
                break;
            };
            self.validator.validate_row(&row)?;
            if next_start.is_none() {
                continue;
            }
            if row.len() != self.right_width {
                return Err(GorError::data(format!(
                    "Right row at {}:{} has {} columns, header has {}",
                    row.chrom(),
                    row.pos(),
                    row.len(),
                    self.right_width
                )));
            }
            let (ra, rb) = covered(&row, segment)?;
            let key = self.equi_key(&row, &self.right_keys);
            self.serial += 1;
            self.window.push(Span::new(
                ra,
                rb,
                Buffered {
                    serial: self.serial,
                    row,
                    key,
                },
            ));
        }

        let fuzz = self.options.fuzz;
        let emitted = &mut self.emitted;
        self.window.retain(|s| {
            let keep = s.end + fuzz >= la;
            if !keep {
                emitted.remove(&s.item.serial);
            }
            keep
        });
        Ok(())
    }

    fn right_cells(&self, row: &Row, dist: i64) -> Vec<String> {
        let mut cells = Vec::with_capacity(self.right_width);
        if self.options.has_distance() {
            cells.push(format_int(dist));
        }
        cells.extend(row.cols()[self.options.right_from()..].iter().cloned());
        cells
    }

    fn fill_cells(&self) -> Vec<String> {
        vec![self.options.fill.clone(); self.pair_width()]
    }

    fn pair_width(&self) -> usize {
        usize::from(self.options.has_distance()) + self.right_width - self.options.right_from()
    }
}

impl Step for JoinStep {
    fn header(&self) -> &Header {
        &self.header
    }

    fn process(&mut self, row: Row, out: &mut Emitter) -> Result<()> {
        let (la, lb) = covered(&row, self.options.kind.left_is_segment())?;
        let chrom = row.chrom().to_string();
        self.advance_right(&chrom, la, lb)?;

        let fuzz = self.options.fuzz;
        let left_key = self.equi_key(&row, &self.left_keys);
        let mut matches: Vec<(i64, &Buffered)> = self
            .window
            .iter_overlapping(la.saturating_sub(fuzz), lb + fuzz)
            .filter(|s| self.left_keys.is_empty() || s.item.key == left_key)
            .map(|s| (distance(la, lb, s.start, s.end), &s.item))
            .collect();
        if self.options.closest_only {
            if let Some(best) = matches.iter().map(|(d, _)| d.unsigned_abs()).min() {
                matches.retain(|(d, _)| d.unsigned_abs() == best);
            }
        }
        if let Some(n) = self.options.closest {
            matches.sort_by_key(|(d, _)| d.unsigned_abs());
            matches.truncate(n);
        }

        match self.output {
            JoinOutput::Count => {
                let n = matches.len() as i64;
                let mut row = row;
                row.push(format_int(n));
                out.emit(row);
            }
            JoinOutput::Included => {
                if !matches.is_empty() {
                    out.emit(row);
                }
            }
            JoinOutput::Excluded => {
                if matches.is_empty() {
                    out.emit(row);
                }
            }
            JoinOutput::RightRows => {
                let fresh: Vec<(u64, Row)> = matches
                    .iter()
                    .filter(|(_, b)| !self.emitted.contains(&b.serial))
                    .map(|(_, b)| (b.serial, b.row.clone()))
                    .collect();
                for (serial, right) in fresh {
                    self.emitted.insert(serial);
                    out.emit(right);
                }
            }
            JoinOutput::Pairs => {
                if matches.is_empty() {
                    if self.options.left_outer {
                        let fill = self.fill_cells();
                        let mut row = row;
                        for cell in fill {
                            row.push(cell);
                        }
                        out.emit(row);
                    }
                    return Ok(());
                }
                let rows: Vec<Vec<String>> = matches
                    .iter()
                    .map(|(d, b)| self.right_cells(&b.row, *d))
                    .collect();
                for cells in rows {
                    let mut joined = row.clone();
                    for cell in cells {
                        joined.push(cell);
                    }
                    out.emit(joined);
                }
            }
            JoinOutput::Collapsed => {
                if matches.is_empty() {
                    if self.options.left_outer {
                        let fill = self.fill_cells();
                        let mut row = row;
                        for cell in fill {
                            row.push(cell);
                        }
                        out.emit(row);
                    }
                    return Ok(());
                }
                let per_match: Vec<Vec<String>> = matches
                    .iter()
                    .map(|(d, b)| self.right_cells(&b.row, *d))
                    .collect();
                let mut joined = row;
                for col in 0..per_match[0].len() {
                    let list: Vec<&str> = per_match.iter().map(|m| m[col].as_str()).collect();
                    joined.push(list.join(","));
                }
                out.emit(joined);
            }
        }
        Ok(())
    }

    fn close(&mut self) {
        self.window.clear();
        self.right.close();
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::streaming::VecSource;

    fn rows(lines: &[&str]) -> Vec<Row> {
        lines.iter().map(|l| Row::parse_line(l).unwrap()).collect()
    }

    fn right(names: &[&str], lines: &[&str]) -> BoxedSource {
        Box::new(VecSource::new(
            header(names),
            rows(lines),
            Arc::new(ChromOrder::default()),
        ))
    }

    fn join(options: JoinOptions, left: &[&str], right_src: BoxedSource, data: &[&str]) -> (Header, Vec<String>) {
        let mut step = JoinStep::new(
            options,
            &header(left),
            right_src,
            Arc::new(ChromOrder::default()),
        )
        .unwrap();
        let out = run_step(&mut step, rows(data)).unwrap();
        (step.header().clone(), cells(&out))
    }

    fn snps() -> BoxedSource {
        right(
            &["Chrom", "Pos", "Right1"],
            &["chr1\t1\tr1", "chr2\t23\tr23", "chr2\t23\tr23b"],
        )
    }

    #[test]
    fn test_distance() {
        assert_eq!(distance(11, 20, 2, 8), -3);
        assert_eq!(distance(11, 20, 23, 40), 3);
        assert_eq!(distance(11, 20, 15, 15), 0);
    }

    #[test]
    fn test_snpsnp() {
        let (h, out) = join(
            JoinOptions::new(JoinKind::SnpSnp),
            &["Chrom", "Pos", "Left1"],
            snps(),
            &["chr1\t1\tl1", "chr2\t23\tl23"],
        );
        assert_eq!(h.names(), &["Chrom", "Pos", "Left1", "Right1"]);
        assert_eq!(out, vec!["chr1\t1\tl1\tr1", "chr2\t23\tl23\tr23", "chr2\t23\tl23\tr23b"]);
    }

    #[test]
    fn test_snpsnp_collapsed_and_negated() {
        let mut options = JoinOptions::new(JoinKind::SnpSnp);
        options.collapse = true;
        let (_, out) = join(options, &["Chrom", "Pos", "Left1"], snps(), &["chr2\t23\tl23"]);
        assert_eq!(out, vec!["chr2\t23\tl23\tr23,r23b"]);

        let mut options = JoinOptions::new(JoinKind::SnpSnp);
        options.excluded = true;
        let (_, out) = join(options, &["Chrom", "Pos", "Left1"], snps(), &["chr1\t1\ta", "chr3\t23\tb"]);
        assert_eq!(out, vec!["chr3\t23\tb"]);
    }

    #[test]
    fn test_snpsnp_fuzz_closest() {
        let right_src = || {
            right(
                &["Chrom", "Pos", "Right1"],
                &["chr1\t1\ta", "chr2\t19\tb", "chr2\t20\tc", "chr2\t21\td", "chr2\t23\te", "chr2\t24\tf"],
            )
        };
        let mut options = JoinOptions::new(JoinKind::SnpSnp);
        options.fuzz = 5;
        options.closest = Some(2);
        let (h, out) = join(options, &["Chrom", "Pos", "Left1"], right_src(), &["chr1\t1\tx", "chr2\t20\ty"]);
        assert_eq!(h.names(), &["Chrom", "Pos", "Left1", "distance", "Posx", "Right1"]);
        assert_eq!(
            out,
            vec!["chr1\t1\tx\t0\t1\ta", "chr2\t20\ty\t0\t20\tc", "chr2\t20\ty\t-1\t19\tb"]
        );

        let mut options = JoinOptions::new(JoinKind::SnpSnp);
        options.fuzz = 5;
        options.closest_only = true;
        let (_, out) = join(options, &["Chrom", "Pos", "Left1"], right_src(), &["chr2\t22\ty"]);
        assert_eq!(out, vec!["chr2\t22\ty\t-1\t21\td", "chr2\t22\ty\t1\t23\te"]);
    }

    #[test]
    fn test_segseg_fuzz() {
        let right_src = right(
            &["Chrom", "Start", "End", "Right1"],
            &["chr1\t1\t8\ta", "chr1\t1\t20\tb", "chr1\t22\t40\tc", "chr2\t1\t50\td", "chr2\t10\t20\te"],
        );
        let mut options = JoinOptions::new(JoinKind::SegSeg);
        options.fuzz = 5;
        let (h, out) = join(
            options,
            &["Chrom", "Start", "End", "Left1"],
            right_src,
            &["chr1\t10\t20\tx", "chr2\t23\t46\ty"],
        );
        assert_eq!(h.names()[4..], ["distance", "Startx", "Endx", "Right1"]);
        assert_eq!(
            out,
            vec![
                "chr1\t10\t20\tx\t-3\t1\t8\ta",
                "chr1\t10\t20\tx\t0\t1\t20\tb",
                "chr1\t10\t20\tx\t3\t22\t40\tc",
                "chr2\t23\t46\ty\t0\t1\t50\td",
                "chr2\t23\t46\ty\t-4\t10\t20\te",
            ]
        );
    }

    #[test]
    fn test_snpseg_reduced_boundaries() {
        // (1,3] covers 2..3 and (2,4] covers 3..4.
        let right_src = right(
            &["chrom", "pos", "end", "mapq"],
            &["chr1\t1\t3\t10", "chr1\t2\t4\t10"],
        );
        let mut options = JoinOptions::new(JoinKind::SnpSeg);
        options.reduced = true;
        let (h, out) = join(options, &["chrom", "pos"], right_src, &["chr1\t1", "chr1\t2"]);
        assert_eq!(h.names(), &["chrom", "pos", "mapq"]);
        assert_eq!(out, vec!["chr1\t2\t10"]);
    }

    #[test]
    fn test_segsnp_included_and_count() {
        let right_src = || {
            right(
                &["Chrom", "Pos", "R"],
                &["chr1\t15\ta", "chr2\t1\tb", "chr2\t40\tc", "chr2\t41\td"],
            )
        };
        let left = ["chr1\t10\t20\tx", "chr2\t23\t46\ty", "chr3\t1\t5\tz"];
        let mut options = JoinOptions::new(JoinKind::SegSnp);
        options.count = true;
        let (h, out) = join(options, &["Chrom", "Start", "End", "L"], right_src(), &left);
        assert_eq!(h.name(4), "OverlapCount");
        assert_eq!(out, vec!["chr1\t10\t20\tx\t1", "chr2\t23\t46\ty\t2", "chr3\t1\t5\tz\t0"]);

        let mut options = JoinOptions::new(JoinKind::SegSnp);
        options.right_rows = true;
        let (_, out) = join(options, &["Chrom", "Start", "End", "L"], right_src(), &left);
        assert_eq!(out, vec!["chr1\t15\ta", "chr2\t40\tc", "chr2\t41\td"]);
    }

    #[test]
    fn test_distinct_right_rows_across_left_rows() {
        let right_src = right(&["Chrom", "Pos", "R"], &["chr1\t5\ta", "chr1\t7\tb"]);
        let mut options = JoinOptions::new(JoinKind::SegSnp);
        options.right_rows = true;
        let (_, out) = join(
            options,
            &["Chrom", "Start", "End"],
            right_src,
            &["chr1\t1\t6", "chr1\t2\t10"],
        );
        assert_eq!(out, vec!["chr1\t5\ta", "chr1\t7\tb"]);
    }

    #[test]
    fn test_equi_join_case_insensitive_and_left_outer() {
        let right_src = || {
            right(
                &["Chrom", "Pos", "Right1", "Data"],
                &["chr1\t1\tr1\tx", "chr2\t23\tr23\tx", "chr2\t23\tr23b\ty"],
            )
        };
        let left = ["chr1\t1\tl1\tX", "chr1\t1\tl1\tY", "chr2\t23\tl23\tx"];
        let mut options = JoinOptions::new(JoinKind::SnpSnp);
        options.left_keys = Some("Data".into());
        options.right_keys = Some("Data".into());
        options.case_insensitive = true;
        let (h, out) = join(options.clone(), &["Chrom", "Pos", "Left1", "Data"], right_src(), &left);
        assert_eq!(h.names()[4..], ["Right1", "Datax"]);
        assert_eq!(out, vec!["chr1\t1\tl1\tX\tr1\tx", "chr2\t23\tl23\tx\tr23\tx"]);

        options.left_outer = true;
        options.fill = "NA".into();
        let (_, out) = join(options, &["Chrom", "Pos", "Left1", "Data"], right_src(), &left);
        assert_eq!(out[1], "chr1\t1\tl1\tY\tNA\tNA");
    }

    #[test]
    fn test_right_prefix_and_count_name_collision() {
        let mut options = JoinOptions::new(JoinKind::SnpSnp);
        options.right_prefix = Some("R".into());
        let (h, _) = join(options, &["Chrom", "Pos", "Left1"], snps(), &[]);
        assert_eq!(h.name(3), "R_Right1");

        let mut options = JoinOptions::new(JoinKind::SnpSnp);
        options.count = true;
        let (h, out) = join(options, &["Chrom", "Pos", "OverlapCount"], snps(), &["chr2\t23\tx"]);
        assert_eq!(h.name(3), "OverlapCountx");
        assert_eq!(out, vec!["chr2\t23\tx\t2"]);
    }

    #[test]
    fn test_right_order_violation() {
        let right_src = right(
            &["Chrom", "Start", "End"],
            &["chr1\t9\t12", "chr1\t3\t5"],
        );
        let mut step = JoinStep::new(
            JoinOptions::new(JoinKind::SnpSeg),
            &header(&["Chrom", "Pos"]),
            right_src,
            Arc::new(ChromOrder::default()),
        )
        .unwrap();
        let err = run_step(&mut step, rows(&["chr1\t10"])).unwrap_err();
        assert_eq!(err.category(), crate::gor::ErrorCategory::Data);
    }
}
