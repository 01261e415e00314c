//! Stable K-way merge of ordered row sources.
//!
//! Uses a min-heap keyed on (chromosome, position, input index) so rows
//! with equal keys come out in input order.

use crate::genome::ChromOrder;
use crate::gor::{GorError, Result};
use crate::row::{ColumnType, Header, Row};
use crate::streaming::{BoxedSource, OrderValidator, RowSource};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

/// Wrapper for min-heap (BinaryHeap is max-heap by default).
struct HeapEntry {
    row: Row,
    idx: usize,
    order: Arc<ChromOrder>,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap
        other
            .row
            .key_cmp(&self.row, &self.order)
            .then(other.idx.cmp(&self.idx))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Min-heap of head rows tagged with the index of the input they came from.
pub struct MergeQueue {
    heap: BinaryHeap<HeapEntry>,
    order: Arc<ChromOrder>,
}

impl MergeQueue {
    pub fn new(order: Arc<ChromOrder>) -> Self {
        Self {
            heap: BinaryHeap::new(),
            order,
        }
    }

    #[inline]
    pub fn push(&mut self, row: Row, idx: usize) {
        self.heap.push(HeapEntry {
            row,
            idx,
            order: self.order.clone(),
        });
    }

    /// Smallest row; ties go to the lowest input index.
    #[inline]
    pub fn pop(&mut self) -> Option<(Row, usize)> {
        self.heap.pop().map(|e| (e.row, e.idx))
    }

    #[inline]
    pub fn peek(&self) -> Option<(&Row, usize)> {
        self.heap.peek().map(|e| (&e.row, e.idx))
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Remove and return every queued entry.
    pub fn drain(&mut self) -> Vec<(Row, usize)> {
        self.heap.drain().map(|e| (e.row, e.idx)).collect()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
    }
}

/// Merges several ordered sources into one ordered stream.
///
/// All inputs must have compatible headers. With `labels`, a source column
/// holding the label of the input each row came from is appended.
pub struct MergeSource {
    sources: Vec<BoxedSource>,
    labels: Option<Vec<String>>,
    header: Header,
    order: Arc<ChromOrder>,
    queue: MergeQueue,
    validator: OrderValidator,
    primed: bool,
    closed: bool,
}

impl MergeSource {
    pub fn new(sources: Vec<BoxedSource>, order: Arc<ChromOrder>) -> Result<Self> {
        Self::build(sources, order, None)
    }

    /// Merge and append a source column called `column`.
    pub fn with_source_column(
        sources: Vec<BoxedSource>,
        order: Arc<ChromOrder>,
        column: &str,
        labels: Vec<String>,
    ) -> Result<Self> {
        Self::build(sources, order, Some((column.to_string(), labels)))
    }

    fn build(
        mut sources: Vec<BoxedSource>,
        order: Arc<ChromOrder>,
        source_column: Option<(String, Vec<String>)>,
    ) -> Result<Self> {
        let Some(first) = sources.first() else {
            return Err(GorError::system("Merge requires at least one input"));
        };
        let mut header = first.header().clone();
        if let Some(mismatch) = sources[1..]
            .iter()
            .find(|s| !s.header().is_compatible(&header))
        {
            let message = format!(
                "Merged inputs have incompatible headers: [{}] and [{}]",
                header.names().join(", "),
                mismatch.header().names().join(", ")
            );
            for s in sources.iter_mut() {
                s.close();
            }
            return Err(GorError::data(message));
        }
        let labels = match source_column {
            Some((name, labels)) => {
                let name = header.unique_name(&name);
                header.push(name, ColumnType::String);
                Some(labels)
            }
            None => None,
        };
        Ok(Self {
            sources,
            labels,
            header,
            queue: MergeQueue::new(order.clone()),
            validator: OrderValidator::new(order.clone(), "Merged input"),
            order,
            primed: false,
            closed: false,
        })
    }

    fn prime(&mut self) -> Result<()> {
        if self.primed || self.closed {
            return Ok(());
        }
        self.primed = true;
        for (idx, source) in self.sources.iter_mut().enumerate() {
            if let Some(row) = source.next_opt()? {
                self.queue.push(row, idx);
            }
        }
        Ok(())
    }

    fn fail<T>(&mut self, err: GorError) -> Result<T> {
        self.close();
        Err(err)
    }
}

impl RowSource for MergeSource {
    fn header(&self) -> &Header {
        &self.header
    }

    fn has_next(&mut self) -> Result<bool> {
        if let Err(e) = self.prime() {
            return self.fail(e);
        }
        Ok(!self.queue.is_empty())
    }

    fn next_row(&mut self) -> Result<Row> {
        if let Err(e) = self.prime() {
            return self.fail(e);
        }
        let Some((mut row, idx)) = self.queue.pop() else {
            return Err(GorError::system("next_row called on an exhausted merge"));
        };
        match self.sources[idx].next_opt() {
            Ok(Some(next)) => self.queue.push(next, idx),
            Ok(None) => {}
            Err(e) => return self.fail(e),
        }
        if let Err(e) = self.validator.validate_row(&row) {
            return self.fail(e);
        }
        if let Some(labels) = &self.labels {
            row.push(labels.get(idx).cloned().unwrap_or_default());
        }
        Ok(row)
    }

    fn seek(&mut self, chrom: &str, pos: u64) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        if !self.primed {
            for source in self.sources.iter_mut() {
                source.seek(chrom, pos)?;
            }
            return self.prime();
        }
        for (row, idx) in self.queue.drain() {
            if self.order.cmp_key(row.chrom(), row.pos(), chrom, pos) != Ordering::Less {
                self.queue.push(row, idx);
                continue;
            }
            let source = &mut self.sources[idx];
            source.seek(chrom, pos)?;
            if let Some(next) = source.next_opt()? {
                self.queue.push(next, idx);
            }
        }
        self.validator.reset();
        Ok(())
    }

    fn close(&mut self) {
        self.closed = true;
        self.queue.clear();
        for source in self.sources.iter_mut() {
            source.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gor::ErrorCategory;
    use crate::streaming::{collect_rows, VecSource};

    fn source(names: &[&str], data: &[(&str, u64, &str)]) -> BoxedSource {
        let rows = data
            .iter()
            .map(|(c, p, v)| Row::from_parts(c, *p, vec![v.to_string()]))
            .collect();
        Box::new(VecSource::new(
            Header::from_names(names),
            rows,
            Arc::new(ChromOrder::default()),
        ))
    }

    #[test]
    fn test_merge_is_ordered_and_stable() {
        let a = source(&["Chrom", "Pos", "V"], &[("chr1", 1, "a1"), ("chr1", 5, "a5")]);
        let b = source(&["Chrom", "Pos", "V"], &[("chr1", 1, "b1"), ("chr1", 3, "b3")]);
        let mut merged = MergeSource::new(vec![a, b], Arc::new(ChromOrder::default())).unwrap();
        let values: Vec<String> = collect_rows(&mut merged)
            .unwrap()
            .iter()
            .map(|r| r.col(2).to_string())
            .collect();
        assert_eq!(values, vec!["a1", "b1", "b3", "a5"]);
    }

    #[test]
    fn test_merge_source_column() {
        let a = source(&["Chrom", "Pos", "V"], &[("chr1", 2, "x")]);
        let b = source(&["Chrom", "Pos", "V"], &[("chr1", 1, "y")]);
        let mut merged = MergeSource::with_source_column(
            vec![a, b],
            Arc::new(ChromOrder::default()),
            "Source",
            vec!["A".into(), "B".into()],
        )
        .unwrap();
        assert_eq!(merged.header().names(), &["Chrom", "Pos", "V", "Source"]);
        let rows = collect_rows(&mut merged).unwrap();
        assert_eq!(rows[0].col(3), "B");
        assert_eq!(rows[1].col(3), "A");
    }

    #[test]
    fn test_incompatible_headers() {
        let a = source(&["Chrom", "Pos", "V"], &[]);
        let b = source(&["Chrom", "Pos", "W"], &[]);
        let err = MergeSource::new(vec![a, b], Arc::new(ChromOrder::default()))
            .err()
            .unwrap();
        assert_eq!(err.category(), ErrorCategory::Data);
    }

    #[test]
    fn test_merge_detects_unsorted_input() {
        let a = source(&["Chrom", "Pos", "V"], &[("chr1", 5, "x"), ("chr1", 1, "y")]);
        let mut merged = MergeSource::new(vec![a], Arc::new(ChromOrder::default())).unwrap();
        let err = collect_rows(&mut merged).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Data);
    }

    #[test]
    fn test_merge_seek() {
        let a = source(&["Chrom", "Pos", "V"], &[("chr1", 1, "a"), ("chr2", 1, "b")]);
        let b = source(&["Chrom", "Pos", "V"], &[("chr1", 7, "c"), ("chr3", 1, "d")]);
        let mut merged = MergeSource::new(vec![a, b], Arc::new(ChromOrder::default())).unwrap();
        assert_eq!(merged.next_row().unwrap().col(2), "a");
        merged.seek("chr2", 0).unwrap();
        let rest: Vec<String> = collect_rows(&mut merged)
            .unwrap()
            .iter()
            .map(|r| r.col(2).to_string())
            .collect();
        assert_eq!(rest, vec!["b", "d"]);
    }
}
