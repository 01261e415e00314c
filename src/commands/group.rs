//! Aggregation over genomic bins.
//!
//! Rows are grouped by a bin (fixed width, chromosome or whole genome) and
//! optionally by grouping columns. A bin is flushed as soon as the first
//! row of a later bin arrives, so memory holds one bin at a time.

use super::{resolve_columns, Emitter, Step};
use crate::genome::{Genome, UNKNOWN_CHROM_SIZE};
use crate::gor::{GorError, Result};
use crate::query::parser::CommandLine;
use crate::row::{ColumnType, Header, Row};
use crate::streaming::{format_int, format_number};
use rustc_hash::FxHashSet;
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Default maximum length of `-set` and `-lis` values.
pub const DEFAULT_LIST_LENGTH: usize = 10_000;

/// Bin of a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupWindow {
    /// Fixed-width bins: a row at `pos` falls in `((pos-1)/N)*N .. +N`.
    Bin(u64),
    /// One bin per chromosome.
    Chrom,
    /// One bin for the whole stream.
    Genome,
    /// Unordered tables: one group set for all rows.
    Table,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Int,
    Float,
    Text,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Func {
    Min,
    Med,
    Max,
    Avg,
    Std,
    Sum,
    Dis,
    Set,
    Lis,
}

impl Func {
    fn prefix(&self) -> &'static str {
        match self {
            Func::Min => "min",
            Func::Med => "med",
            Func::Max => "max",
            Func::Avg => "avg",
            Func::Std => "std",
            Func::Sum => "sum",
            Func::Dis => "dis",
            Func::Set => "set",
            Func::Lis => "lis",
        }
    }

    fn applies_to(&self, kind: Kind) -> bool {
        kind != Kind::Text || !matches!(self, Func::Avg | Func::Std | Func::Sum)
    }

    fn output_type(&self, kind: Kind) -> ColumnType {
        match (self, kind) {
            (Func::Dis, _) => ColumnType::Int,
            (Func::Set | Func::Lis, _) | (_, Kind::Text) => ColumnType::String,
            (Func::Avg | Func::Std | Func::Med, _) => ColumnType::Double,
            (_, Kind::Int) => ColumnType::Long,
            (_, Kind::Float) => ColumnType::Double,
        }
    }
}

const ALL_FUNCS: [(&str, Func); 9] = [
    ("-min", Func::Min),
    ("-med", Func::Med),
    ("-max", Func::Max),
    ("-avg", Func::Avg),
    ("-std", Func::Std),
    ("-sum", Func::Sum),
    ("-dis", Func::Dis),
    ("-set", Func::Set),
    ("-lis", Func::Lis),
];

#[derive(Debug, Clone)]
struct AggColumn {
    idx: usize,
    name: String,
    kind: Kind,
}

/// Running state of one aggregated column within one group.
#[derive(Debug, Clone, Default)]
struct Acc {
    count: u64,
    sum: f64,
    sum_sq: f64,
    int_sum: i64,
    min: Option<String>,
    max: Option<String>,
    min_f: f64,
    max_f: f64,
    values: Vec<String>,
    distinct: FxHashSet<String>,
}

impl Acc {
    fn add(&mut self, value: &str, kind: Kind, keep_values: bool, keep_distinct: bool) -> Result<()> {
        if value.is_empty() {
            return Ok(());
        }
        match kind {
            Kind::Text => {
                if self.min.as_deref().is_none_or(|m| value < m) {
                    self.min = Some(value.to_string());
                }
                if self.max.as_deref().is_none_or(|m| value > m) {
                    self.max = Some(value.to_string());
                }
            }
            Kind::Int | Kind::Float => {
                let x: f64 = value.parse().map_err(|_| {
                    GorError::data(format!("group: cannot use '{}' as a number", value))
                })?;
                if kind == Kind::Int {
                    let i: i64 = value.parse().map_err(|_| {
                        GorError::data(format!("group: cannot use '{}' as an integer", value))
                    })?;
                    self.int_sum = self.int_sum.wrapping_add(i);
                }
                if self.count == 0 || x < self.min_f {
                    self.min_f = x;
                }
                if self.count == 0 || x > self.max_f {
                    self.max_f = x;
                }
                self.sum += x;
                self.sum_sq += x * x;
            }
        }
        self.count += 1;
        if keep_values {
            self.values.push(value.to_string());
        }
        if keep_distinct && !self.distinct.contains(value) {
            self.distinct.insert(value.to_string());
        }
        Ok(())
    }
}

fn number_text(x: f64, kind: Kind) -> String {
    if kind == Kind::Int {
        format_int(x as i64)
    } else {
        format_number(x)
    }
}

fn sort_values(values: &mut [String], kind: Kind) {
    if kind == Kind::Text {
        values.sort();
    } else {
        values.sort_by(|a, b| {
            let x = a.parse::<f64>().unwrap_or(f64::NAN);
            let y = b.parse::<f64>().unwrap_or(f64::NAN);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        });
    }
}

#[derive(Debug, Default)]
struct GroupState {
    count: u64,
    accs: Vec<Acc>,
}

/// `group`: counts and aggregates per bin and grouping columns.
pub struct GroupStep {
    header: Header,
    window: GroupWindow,
    genome: Genome,
    group_columns: Vec<usize>,
    columns: Vec<AggColumn>,
    funcs: Vec<Func>,
    count: bool,
    separator: String,
    max_length: usize,
    truncate: bool,
    current: Option<(String, u64)>,
    groups: BTreeMap<Vec<String>, GroupState>,
}

impl GroupStep {
    pub fn from_command(line: &CommandLine, input: &Header, genome: Genome) -> Result<Self> {
        let flags: Vec<&str> = ["-count", "-notruncate"]
            .into_iter()
            .chain(ALL_FUNCS.iter().map(|(f, _)| *f))
            .collect();
        let opts = line.options(&flags, &["-gc", "-ic", "-fc", "-sc", "-len", "-s"])?;
        let window = match (opts.positional(), input.is_nor()) {
            ([], true) => GroupWindow::Table,
            ([w], true) if w.eq_ignore_ascii_case("genome") => GroupWindow::Table,
            (_, true) => return Err(opts.error("Cannot have binSize in NOR context")),
            ([], false) => return Err(opts.error("Missing bin size: 1, N, chrom or genome")),
            ([w], false) => match w.to_lowercase().as_str() {
                "chrom" => GroupWindow::Chrom,
                "genome" => GroupWindow::Genome,
                n => match n.parse::<u64>() {
                    Ok(size) if size > 0 => GroupWindow::Bin(size),
                    _ => return Err(opts.error(format!("Invalid bin size '{}'", w))),
                },
            },
            _ => return Err(opts.error("Expected a single bin size")),
        };

        let group_columns = match opts.value("-gc") {
            Some(spec) => resolve_columns(input, spec, line.name())?,
            None => Vec::new(),
        };
        let mut columns: Vec<AggColumn> = Vec::new();
        for (option, kind) in [("-ic", Kind::Int), ("-fc", Kind::Float), ("-sc", Kind::Text)] {
            let Some(spec) = opts.value(option) else {
                continue;
            };
            for idx in resolve_columns(input, spec, line.name())? {
                if group_columns.contains(&idx) {
                    return Err(opts.option_error(
                        option,
                        format!("Column {} is also a grouping column", input.name(idx)),
                    ));
                }
                if !columns.iter().any(|c| c.idx == idx) {
                    columns.push(AggColumn {
                        idx,
                        name: input.name(idx).to_string(),
                        kind,
                    });
                }
            }
        }
        let funcs: Vec<Func> = ALL_FUNCS
            .iter()
            .filter(|(flag, _)| opts.has(flag))
            .map(|(_, f)| *f)
            .collect();
        if !funcs.is_empty() && columns.is_empty() {
            return Err(opts.error("Aggregate functions need -ic, -fc or -sc columns"));
        }
        if funcs.is_empty() && !columns.is_empty() {
            return Err(opts.error("Aggregate columns given without an aggregate function"));
        }
        let count = opts.has("-count");
        let max_length = opts.count("-len", DEFAULT_LIST_LENGTH)?;

        let mut names: Vec<String> = Vec::new();
        let mut types: Vec<ColumnType> = Vec::new();
        for &g in &group_columns {
            names.push(input.name(g).to_string());
            types.push(input.type_of(g));
        }
        if count {
            names.push("allCount".to_string());
            types.push(ColumnType::Int);
        }
        for col in &columns {
            for func in funcs.iter().filter(|f| f.applies_to(col.kind)) {
                names.push(format!("{}_{}", func.prefix(), col.name));
                types.push(func.output_type(col.kind));
            }
        }
        let header = if input.is_nor() {
            let mut h = Header::nor(names);
            let mut all = vec![ColumnType::String, ColumnType::Int];
            all.extend(types);
            h.set_types(all);
            h
        } else {
            let mut all = vec![
                "Chrom".to_string(),
                "bpStart".to_string(),
                "bpStop".to_string(),
            ];
            all.extend(names);
            let mut h = Header::new(all);
            let mut all_types = vec![ColumnType::String, ColumnType::Int, ColumnType::Int];
            all_types.extend(types);
            h.set_types(all_types);
            h
        };

        Ok(Self {
            header,
            window,
            genome,
            group_columns,
            columns,
            funcs,
            count,
            separator: opts.value("-s").unwrap_or(",").to_string(),
            max_length,
            truncate: !opts.has("-notruncate"),
            current: None,
            groups: BTreeMap::new(),
        })
    }

    pub fn window(&self) -> GroupWindow {
        self.window
    }

    fn bin_of(&self, row: &Row) -> (String, u64) {
        match self.window {
            GroupWindow::Bin(size) => (row.chrom().to_string(), row.pos().saturating_sub(1) / size * size),
            GroupWindow::Chrom => (row.chrom().to_string(), 0),
            GroupWindow::Genome => ("chrA".to_string(), 0),
            GroupWindow::Table => ("chrN".to_string(), 0),
        }
    }

    fn bin_stop(&self, chrom: &str, start: u64) -> u64 {
        match self.window {
            GroupWindow::Bin(size) => start + size,
            GroupWindow::Chrom => self.genome.size_or_default(chrom),
            GroupWindow::Genome | GroupWindow::Table => UNKNOWN_CHROM_SIZE,
        }
    }

    fn keeps_values(&self) -> bool {
        self.funcs
            .iter()
            .any(|f| matches!(f, Func::Med | Func::Set | Func::Lis))
    }

    fn list_value(&self, joined: String, name: &str) -> Result<String> {
        if joined.chars().count() <= self.max_length {
            return Ok(joined);
        }
        if !self.truncate {
            return Err(GorError::data(format!(
                "group: value of {} is longer than {} characters",
                name, self.max_length
            )));
        }
        let mut short: String = joined.chars().take(self.max_length).collect();
        short.push_str("...");
        Ok(short)
    }

    fn render(&self, acc: &Acc, col: &AggColumn, func: Func) -> Result<String> {
        let kind = col.kind;
        Ok(match func {
            Func::Min if kind == Kind::Text => acc.min.clone().unwrap_or_default(),
            Func::Max if kind == Kind::Text => acc.max.clone().unwrap_or_default(),
            Func::Min | Func::Max if acc.count == 0 => String::new(),
            Func::Min => number_text(acc.min_f, kind),
            Func::Max => number_text(acc.max_f, kind),
            Func::Sum if kind == Kind::Int => format_int(acc.int_sum),
            Func::Sum => format_number(acc.sum),
            Func::Avg | Func::Std if acc.count == 0 => String::new(),
            Func::Avg => format_number(acc.sum / acc.count as f64),
            Func::Std => {
                let n = acc.count as f64;
                let mean = acc.sum / n;
                format_number((acc.sum_sq / n - mean * mean).max(0.0).sqrt())
            }
            Func::Med => {
                let mut values = acc.values.clone();
                if values.is_empty() {
                    return Ok(String::new());
                }
                sort_values(&mut values, kind);
                let n = values.len();
                if kind != Kind::Text && n % 2 == 0 {
                    let a: f64 = values[n / 2 - 1].parse().unwrap_or(0.0);
                    let b: f64 = values[n / 2].parse().unwrap_or(0.0);
                    format_number((a + b) / 2.0)
                } else {
                    values[(n - 1) / 2].clone()
                }
            }
            Func::Dis => format_int(acc.distinct.len() as i64),
            Func::Set => {
                let mut values: Vec<String> = acc.distinct.iter().cloned().collect();
                sort_values(&mut values, kind);
                self.list_value(values.join(&self.separator), &col.name)?
            }
            Func::Lis => self.list_value(acc.values.join(&self.separator), &col.name)?,
        })
    }

    fn flush(&mut self, out: &mut Emitter) -> Result<()> {
        let Some((chrom, start)) = self.current.take() else {
            return Ok(());
        };
        let groups = std::mem::take(&mut self.groups);
        let stop = self.bin_stop(&chrom, start);
        for (key, state) in groups {
            let mut cells: Vec<String> = Vec::with_capacity(self.header.len());
            if self.window != GroupWindow::Table {
                cells.push(format_int(stop as i64));
            }
            cells.extend(key);
            if self.count {
                cells.push(format_int(state.count as i64));
            }
            for (col, acc) in self.columns.iter().zip(&state.accs) {
                for &func in self.funcs.iter().filter(|f| f.applies_to(col.kind)) {
                    cells.push(self.render(acc, col, func)?);
                }
            }
            let row = if self.window == GroupWindow::Table {
                Row::nor(cells)
            } else {
                Row::from_parts(&chrom, start, cells)
            };
            out.emit(row);
        }
        Ok(())
    }
}

impl Step for GroupStep {
    fn header(&self) -> &Header {
        &self.header
    }

    fn process(&mut self, row: Row, out: &mut Emitter) -> Result<()> {
        let bin = self.bin_of(&row);
        if self.current.as_ref() != Some(&bin) {
            self.flush(out)?;
            self.current = Some(bin);
        }
        let key: Vec<String> = self
            .group_columns
            .iter()
            .map(|&g| row.col(g).to_string())
            .collect();
        let keep_values = self.keeps_values();
        let keep_distinct = self
            .funcs
            .iter()
            .any(|f| matches!(f, Func::Dis | Func::Set));
        let n = self.columns.len();
        let state = self.groups.entry(key).or_insert_with(|| GroupState {
            count: 0,
            accs: vec![Acc::default(); n],
        });
        state.count += 1;
        for (col, acc) in self.columns.iter().zip(state.accs.iter_mut()) {
            acc.add(row.col(col.idx), col.kind, keep_values, keep_distinct)?;
        }
        Ok(())
    }

    fn finish(&mut self, out: &mut Emitter) -> Result<()> {
        self.flush(out)
    }
}
