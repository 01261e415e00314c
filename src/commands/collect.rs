//! Running statistics over a trailing row window.

use super::{resolve_columns, Emitter, Step};
use crate::gor::{GorError, Result};
use crate::query::parser::CommandLine;
use crate::row::{ColumnType, Header, Row};
use crate::streaming::format_number;
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stat {
    Sum,
    Avg,
    Std,
}

/// Window state for one column.
#[derive(Debug, Default)]
struct Window {
    values: VecDeque<f64>,
    sum: f64,
    sum_sq: f64,
}

impl Window {
    fn push(&mut self, x: f64, size: usize) {
        self.values.push_back(x);
        self.sum += x;
        self.sum_sq += x * x;
        if self.values.len() > size {
            if let Some(old) = self.values.pop_front() {
                self.sum -= old;
                self.sum_sq -= old * old;
            }
        }
    }

    fn clear(&mut self) {
        self.values.clear();
        self.sum = 0.0;
        self.sum_sq = 0.0;
    }

    fn value(&self, stat: Stat) -> f64 {
        let n = self.values.len() as f64;
        match stat {
            Stat::Sum => self.sum,
            Stat::Avg => self.sum / n,
            Stat::Std => {
                let mean = self.sum / n;
                (self.sum_sq / n - mean * mean).max(0.0).sqrt()
            }
        }
    }
}

/// `collect -w N [-sum] [-avg] [-std] cols`.
///
/// Each output row carries the statistics of the last N rows of its
/// chromosome, itself included.
pub struct CollectStep {
    header: Header,
    size: usize,
    columns: Vec<usize>,
    stats: Vec<Stat>,
    windows: Vec<Window>,
    chrom: Option<String>,
}

impl CollectStep {
    pub fn from_command(line: &CommandLine, input: &Header) -> Result<Self> {
        let opts = line.options(&["-sum", "-avg", "-std"], &["-w"])?;
        let size = opts.count("-w", 0)?;
        if size == 0 {
            return Err(opts.option_error("-w", "Window size must be at least 1"));
        }
        let spec = opts.positional().join(",");
        if spec.is_empty() {
            return Err(opts.error("Missing column list"));
        }
        let columns = resolve_columns(input, &spec, line.name())?;
        let stats: Vec<Stat> = [("-sum", Stat::Sum), ("-avg", Stat::Avg), ("-std", Stat::Std)]
            .into_iter()
            .filter(|(flag, _)| opts.has(flag))
            .map(|(_, s)| s)
            .collect();
        if stats.is_empty() {
            return Err(opts.error("Expected at least one of -sum, -avg or -std"));
        }

        let mut header = input.clone();
        for &c in &columns {
            for stat in &stats {
                let prefix = match stat {
                    Stat::Sum => "sum",
                    Stat::Avg => "avg",
                    Stat::Std => "std",
                };
                let name = header.unique_name(&format!("{}_{}", prefix, input.name(c)));
                header.push(name, ColumnType::Double);
            }
        }
        let windows = columns.iter().map(|_| Window::default()).collect();
        Ok(Self {
            header,
            size,
            columns,
            stats,
            windows,
            chrom: None,
        })
    }
}

impl Step for CollectStep {
    fn header(&self) -> &Header {
        &self.header
    }

    fn process(&mut self, mut row: Row, out: &mut Emitter) -> Result<()> {
        if self.chrom.as_deref() != Some(row.chrom()) {
            self.windows.iter_mut().for_each(Window::clear);
            self.chrom = Some(row.chrom().to_string());
        }
        for (window, &c) in self.windows.iter_mut().zip(&self.columns) {
            let x: f64 = row.col(c).parse().map_err(|_| {
                GorError::data(format!(
                    "collect: '{}' in column {} at {}:{} is not a number",
                    row.col(c),
                    c + 1,
                    row.chrom(),
                    row.pos()
                ))
            })?;
            window.push(x, self.size);
        }
        for window in &self.windows {
            for &stat in &self.stats {
                row.push(format_number(window.value(stat)));
            }
        }
        out.emit(row);
        Ok(())
    }
}
