//! Centralized streaming utilities.
//!
//! This module defines the pull-based [`RowSource`] protocol every stage of
//! a query speaks, plus shared components:
//! - Zero-allocation line parsing
//! - Order validation
//! - Efficient output formatting and `.meta` sidecars
//! - Active set management with automatic compaction
//! - Stable K-way merging of ordered sources
//!
//! All sources preserve the (chromosome, position) order of their rows.

pub mod active_set;
pub mod buffers;
pub mod merge;
pub mod output;
pub mod parsing;
pub mod validation;

pub use active_set::{ActiveSet, Span};
pub use merge::{MergeQueue, MergeSource};
pub use output::{format_float, format_int, format_number, GorWriter, MetaBuilder, MetaInfo};
pub use parsing::{parse_key, parse_u64_fast, should_skip_line, split_tabs};
pub use validation::{verify_sorted, OrderValidator};

use crate::genome::{ChromOrder, KeyRange};
use crate::gor::{GorError, Result};
use crate::row::{Header, Row};
use std::cmp::Ordering;
use std::collections::VecDeque;
use std::sync::Arc;

/// Pull-based cursor over an ordered row stream.
///
/// `has_next` is idempotent between calls to `next_row`. `close` releases
/// held resources, may be called at any time and more than once; a closed
/// source reports no more rows. Sources are used by one thread at a time.
pub trait RowSource: Send {
    fn header(&self) -> &Header;

    fn has_next(&mut self) -> Result<bool>;

    /// Next row; calling this when `has_next` is false is an error.
    fn next_row(&mut self) -> Result<Row>;

    /// Skip forward to the first row whose key is not below the target.
    /// Never moves backwards.
    fn seek(&mut self, chrom: &str, pos: u64) -> Result<()>;

    fn close(&mut self);

    /// `next_row` folded into an option.
    fn next_opt(&mut self) -> Result<Option<Row>> {
        if self.has_next()? {
            self.next_row().map(Some)
        } else {
            Ok(None)
        }
    }
}

pub type BoxedSource = Box<dyn RowSource>;

impl RowSource for BoxedSource {
    fn header(&self) -> &Header {
        (**self).header()
    }

    fn has_next(&mut self) -> Result<bool> {
        (**self).has_next()
    }

    fn next_row(&mut self) -> Result<Row> {
        (**self).next_row()
    }

    fn seek(&mut self, chrom: &str, pos: u64) -> Result<()> {
        (**self).seek(chrom, pos)
    }

    fn close(&mut self) {
        (**self).close()
    }
}

fn exhausted() -> GorError {
    GorError::system("next_row called on an exhausted source")
}

/// Drain a source into a vector, closing it afterwards.
pub fn collect_rows(source: &mut dyn RowSource) -> Result<Vec<Row>> {
    let mut rows = Vec::new();
    let result: Result<()> = (|| {
        while source.has_next()? {
            rows.push(source.next_row()?);
        }
        Ok(())
    })();
    source.close();
    result.map(|_| rows)
}

/// In-memory row source.
pub struct VecSource {
    header: Header,
    rows: VecDeque<Row>,
    order: Arc<ChromOrder>,
}

impl VecSource {
    pub fn new(header: Header, rows: Vec<Row>, order: Arc<ChromOrder>) -> Self {
        Self {
            header,
            rows: rows.into(),
            order,
        }
    }

    /// Empty stream with the given header.
    pub fn empty(header: Header) -> Self {
        Self::new(header, Vec::new(), Arc::new(ChromOrder::default()))
    }
}

impl RowSource for VecSource {
    fn header(&self) -> &Header {
        &self.header
    }

    fn has_next(&mut self) -> Result<bool> {
        Ok(!self.rows.is_empty())
    }

    fn next_row(&mut self) -> Result<Row> {
        self.rows.pop_front().ok_or_else(exhausted)
    }

    fn seek(&mut self, chrom: &str, pos: u64) -> Result<()> {
        while let Some(front) = self.rows.front() {
            if self.order.cmp_key(front.chrom(), front.pos(), chrom, pos) != Ordering::Less {
                break;
            }
            self.rows.pop_front();
        }
        Ok(())
    }

    fn close(&mut self) {
        self.rows.clear();
    }
}

/// Restricts a source to a [`KeyRange`]: seeks to the start on first pull
/// and stops (closing the inner source) at the end bound.
pub struct RangeSource {
    inner: BoxedSource,
    range: KeyRange,
    order: Arc<ChromOrder>,
    peeked: Option<Row>,
    started: bool,
    done: bool,
}

impl RangeSource {
    pub fn new(inner: BoxedSource, range: KeyRange, order: Arc<ChromOrder>) -> Self {
        Self {
            inner,
            range,
            order,
            peeked: None,
            started: false,
            done: false,
        }
    }

    fn fill(&mut self) -> Result<()> {
        if self.done || self.peeked.is_some() {
            return Ok(());
        }
        if !self.started {
            self.started = true;
            if let Some(start) = self.range.start.clone() {
                self.inner.seek(&start.chrom, start.pos)?;
            }
        }
        while let Some(row) = self.inner.next_opt()? {
            if !self.range.after_start(&self.order, row.chrom(), row.pos()) {
                continue;
            }
            if !self.range.before_end(&self.order, row.chrom(), row.pos()) {
                break;
            }
            self.peeked = Some(row);
            return Ok(());
        }
        self.done = true;
        self.inner.close();
        Ok(())
    }
}

impl RowSource for RangeSource {
    fn header(&self) -> &Header {
        self.inner.header()
    }

    fn has_next(&mut self) -> Result<bool> {
        self.fill()?;
        Ok(self.peeked.is_some())
    }

    fn next_row(&mut self) -> Result<Row> {
        self.fill()?;
        self.peeked.take().ok_or_else(exhausted)
    }

    fn seek(&mut self, chrom: &str, pos: u64) -> Result<()> {
        if let Some(row) = &self.peeked {
            if self.order.cmp_key(row.chrom(), row.pos(), chrom, pos) != Ordering::Less {
                return Ok(());
            }
            self.peeked = None;
        }
        if !self.started {
            self.started = true;
            let target = match &self.range.start {
                Some(s) if self.order.cmp_key(&s.chrom, s.pos, chrom, pos) == Ordering::Greater => {
                    (s.chrom.clone(), s.pos)
                }
                _ => (chrom.to_string(), pos),
            };
            return self.inner.seek(&target.0, target.1);
        }
        self.inner.seek(chrom, pos)
    }

    fn close(&mut self) {
        self.done = true;
        self.peeked = None;
        self.inner.close();
    }
}

/// One-row lookahead over a boxed source.
pub struct PeekSource {
    inner: BoxedSource,
    peeked: Option<Row>,
}

impl PeekSource {
    pub fn new(inner: BoxedSource) -> Self {
        Self {
            inner,
            peeked: None,
        }
    }

    pub fn header(&self) -> &Header {
        self.inner.header()
    }

    pub fn peek(&mut self) -> Result<Option<&Row>> {
        if self.peeked.is_none() {
            self.peeked = self.inner.next_opt()?;
        }
        Ok(self.peeked.as_ref())
    }

    pub fn take(&mut self) -> Result<Option<Row>> {
        if let Some(row) = self.peeked.take() {
            return Ok(Some(row));
        }
        self.inner.next_opt()
    }

    /// Seek unless the buffered row is already at or past the target.
    pub fn seek(&mut self, order: &ChromOrder, chrom: &str, pos: u64) -> Result<()> {
        if let Some(row) = &self.peeked {
            if order.cmp_key(row.chrom(), row.pos(), chrom, pos) != Ordering::Less {
                return Ok(());
            }
            self.peeked = None;
        }
        self.inner.seek(chrom, pos)
    }

    pub fn close(&mut self) {
        self.peeked = None;
        self.inner.close();
    }
}

/// Presents a GOR stream as an unordered table: the key becomes ordinary
/// columns behind a synthetic `ChromNOR`/`PosNOR` key.
pub struct NorView {
    inner: BoxedSource,
    header: Header,
}

impl NorView {
    pub fn new(inner: BoxedSource) -> Self {
        let header = if inner.header().is_nor() {
            inner.header().clone()
        } else {
            let mut h = Header::nor(inner.header().names().to_vec());
            let mut types = vec![Default::default(), Default::default()];
            types.extend_from_slice(inner.header().types());
            h.set_types(types);
            h.into_nor()
        };
        Self { inner, header }
    }
}

impl RowSource for NorView {
    fn header(&self) -> &Header {
        &self.header
    }

    fn has_next(&mut self) -> Result<bool> {
        self.inner.has_next()
    }

    fn next_row(&mut self) -> Result<Row> {
        let row = self.inner.next_row()?;
        if self.inner.header().is_nor() {
            Ok(row)
        } else {
            Ok(Row::nor(row.into_cols()))
        }
    }

    fn seek(&mut self, _chrom: &str, _pos: u64) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) {
        self.inner.close();
    }
}
