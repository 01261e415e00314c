//! Sort command implementation.
//!
//! Sort order:
//! 1. Primary: chromosome (session order)
//! 2. Secondary: position
//! 3. Then the `-c` columns, numeric when both cells are numbers, `:r` reversed
//! 4. Ties: input order preserved (stable sort)
//!
//! `sort N` only reorders rows within a sliding window of N bases, so it
//! streams; `sort chrom` holds one chromosome and `sort genome` the whole input.

use super::{resolve_columns, Emitter, Step};
use crate::genome::ChromOrder;
use crate::gor::Result;
use crate::query::parser::CommandLine;
use crate::row::{Header, Row};
use rayon::prelude::*;
use std::cmp::Ordering;
use std::sync::Arc;

/// Sort window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortWindow {
    Genome,
    Chrom,
    Bases(u64),
}

#[derive(Debug, Clone, Copy)]
struct SortColumn {
    idx: usize,
    reverse: bool,
}

fn cmp_cells(a: &str, b: &str) -> Ordering {
    match (a.parse::<f64>(), b.parse::<f64>()) {
        (Ok(x), Ok(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        _ => a.cmp(b),
    }
}

/// `sort genome|chrom|N [-c cols[:r]]`.
pub struct SortStep {
    header: Header,
    window: SortWindow,
    columns: Vec<SortColumn>,
    order: Arc<ChromOrder>,
    buffer: Vec<Row>,
}

impl SortStep {
    pub fn from_command(line: &CommandLine, input: &Header, order: Arc<ChromOrder>) -> Result<Self> {
        let opts = line.options(&[], &["-c"])?;
        let window = match opts.positional() {
            [w] if w.eq_ignore_ascii_case("genome") => SortWindow::Genome,
            [w] if w.eq_ignore_ascii_case("chrom") => SortWindow::Chrom,
            [w] => match w.parse::<u64>() {
                Ok(n) => SortWindow::Bases(n),
                Err(_) => return Err(opts.error(format!("Invalid sort window '{}'", w))),
            },
            [] => SortWindow::Genome,
            _ => return Err(opts.error("Expected one sort window: genome, chrom or N")),
        };
        let mut columns = Vec::new();
        if let Some(spec) = opts.value("-c") {
            for item in spec.split(',') {
                let (name, reverse) = match item.rsplit_once(':') {
                    Some((name, flag)) if flag.eq_ignore_ascii_case("r") => (name, true),
                    Some((_, flag)) => {
                        return Err(opts.option_error("-c", format!("Unknown sort flag '{}'", flag)))
                    }
                    None => (item, false),
                };
                for idx in resolve_columns(input, name, line.name())? {
                    columns.push(SortColumn { idx, reverse });
                }
            }
        }
        Ok(Self {
            header: input.clone(),
            window,
            columns,
            order,
            buffer: Vec::new(),
        })
    }

    pub fn window(&self) -> SortWindow {
        self.window
    }

    fn sort_buffer(&mut self) {
        let order = self.order.clone();
        let columns = self.columns.clone();
        self.buffer.par_sort_by(|a, b| {
            a.key_cmp(b, &order).then_with(|| {
                for c in &columns {
                    let ord = cmp_cells(a.col(c.idx), b.col(c.idx));
                    let ord = if c.reverse { ord.reverse() } else { ord };
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                Ordering::Equal
            })
        });
    }

    fn flush_all(&mut self, out: &mut Emitter) {
        self.sort_buffer();
        for row in self.buffer.drain(..) {
            out.emit(row);
        }
    }

    /// Emit the sorted prefix that no later row can precede.
    fn flush_before(&mut self, chrom: &str, pos: u64, out: &mut Emitter) {
        self.sort_buffer();
        let order = self.order.clone();
        let split = self
            .buffer
            .iter()
            .position(|r| order.cmp_key(r.chrom(), r.pos(), chrom, pos) != Ordering::Less)
            .unwrap_or(self.buffer.len());
        for row in self.buffer.drain(..split) {
            out.emit(row);
        }
    }
}

impl Step for SortStep {
    fn header(&self) -> &Header {
        &self.header
    }

    fn process(&mut self, row: Row, out: &mut Emitter) -> Result<()> {
        match self.window {
            SortWindow::Genome => {}
            SortWindow::Chrom => {
                if self.buffer.last().is_some_and(|last| last.chrom() != row.chrom()) {
                    self.flush_all(out);
                }
            }
            SortWindow::Bases(n) => {
                let chrom_changed = self.buffer.last().is_some_and(|last| last.chrom() != row.chrom());
                if chrom_changed {
                    self.flush_all(out);
                } else if row.pos() > n && self.buffer.len() > 1 {
                    let limit = row.pos() - n;
                    let chrom = row.chrom().to_string();
                    self.flush_before(&chrom, limit, out);
                }
            }
        }
        self.buffer.push(row);
        Ok(())
    }

    fn finish(&mut self, out: &mut Emitter) -> Result<()> {
        self.flush_all(out);
        Ok(())
    }

    fn close(&mut self) {
        self.buffer.clear();
    }
}
