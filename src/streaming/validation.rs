//! Order validation for streaming operations.
//!
//! Streaming algorithms require ordered input. A stream violating the
//! (chromosome, position) order is a data-integrity error, so sweeps check
//! their inputs inline with an [`OrderValidator`] instead of trusting them.
//!
//! Order validation checks that:
//! 1. Chromosomes appear in non-decreasing order (which also makes them
//!    contiguous)
//! 2. Within a chromosome, positions are non-decreasing

use crate::genome::ChromOrder;
use crate::gor::{GorError, Result};
use crate::row::Row;
use crate::streaming::RowSource;
use std::cmp::Ordering;
use std::sync::Arc;

/// Inline order validator for use within streaming loops.
#[derive(Debug)]
pub struct OrderValidator {
    order: Arc<ChromOrder>,
    label: String,
    prev_chrom: Option<String>,
    prev_pos: u64,
    record_count: usize,
}

impl OrderValidator {
    /// Create a validator; `label` names the stream in error messages.
    pub fn new(order: Arc<ChromOrder>, label: impl Into<String>) -> Self {
        Self {
            order,
            label: label.into(),
            prev_chrom: None,
            prev_pos: 0,
            record_count: 0,
        }
    }

    /// Validate that the given key maintains order.
    #[inline]
    pub fn validate(&mut self, chrom: &str, pos: u64) -> Result<()> {
        self.record_count += 1;

        if let Some(ref pc) = self.prev_chrom {
            if chrom != pc {
                if self.order.cmp_chrom(pc, chrom) == Ordering::Greater {
                    return Err(GorError::data(format!(
                        "{} not sorted: chromosome '{}' at row {} comes after '{}'",
                        self.label, chrom, self.record_count, pc
                    )));
                }
                self.prev_chrom = Some(chrom.to_string());
            } else if pos < self.prev_pos {
                return Err(GorError::data(format!(
                    "{} not sorted: position {} at row {} comes after {} on {}",
                    self.label, pos, self.record_count, self.prev_pos, chrom
                )));
            }
        } else {
            self.prev_chrom = Some(chrom.to_string());
        }

        self.prev_pos = pos;
        Ok(())
    }

    #[inline]
    pub fn validate_row(&mut self, row: &Row) -> Result<()> {
        self.validate(row.chrom(), row.pos())
    }

    /// Reset validator state (for a new stream).
    pub fn reset(&mut self) {
        self.prev_chrom = None;
        self.prev_pos = 0;
        self.record_count = 0;
    }

    /// Get the number of records validated.
    pub fn record_count(&self) -> usize {
        self.record_count
    }
}

/// Verify that a whole source is ordered, consuming and closing it.
///
/// Returns the number of rows checked.
pub fn verify_sorted(source: &mut dyn RowSource, order: Arc<ChromOrder>) -> Result<usize> {
    let mut validator = OrderValidator::new(order, "Input");
    let result = (|| -> Result<usize> {
        while source.has_next()? {
            let row = source.next_row()?;
            validator.validate_row(&row)?;
        }
        Ok(validator.record_count())
    })();
    source.close();
    result
}
