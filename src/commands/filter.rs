//! Row filters: predicates, row windows, duplicates and order checks.

use super::{Emitter, Step};
use crate::expr::{Expr, ExprError};
use crate::genome::ChromOrder;
use crate::gor::{GorError, Result};
use crate::query::parser::CommandLine;
use crate::row::{ColumnType, Header, Row};
use crate::streaming::OrderValidator;
use log::debug;
use rustc_hash::FxHashSet;
use std::sync::Arc;

fn expression_text(line: &CommandLine) -> Result<&str> {
    let text = line.args().trim();
    if text.is_empty() {
        return Err(GorError::parse(line.name(), "Missing expression"));
    }
    Ok(text)
}

fn single_count(line: &CommandLine) -> Result<usize> {
    let opts = line.options(&[], &[])?;
    let [n] = opts.positional() else {
        return Err(opts.error("Expected one row count"));
    };
    n.parse::<usize>()
        .map_err(|_| opts.error(format!("Invalid row count '{}'", n)))
}

/// `where` and `trywhere`.
///
/// A `trywhere` whose expression names a missing column passes every row.
pub struct WhereStep {
    header: Header,
    expr: Option<Expr>,
}

impl WhereStep {
    pub fn new(header: Header, expr: Expr) -> Self {
        Self {
            header,
            expr: Some(expr),
        }
    }

    pub fn from_command(line: &CommandLine, input: &Header, lenient: bool) -> Result<Self> {
        let text = expression_text(line)?;
        match Expr::compile(text, input) {
            Ok(expr) => Ok(Self::new(input.clone(), expr)),
            Err(ExprError::UnknownColumn(col)) if lenient => {
                debug!("{}: column {} absent, passing rows through", line.name(), col);
                Ok(Self {
                    header: input.clone(),
                    expr: None,
                })
            }
            Err(e) => Err(e.into_gor(line.name())),
        }
    }
}

impl Step for WhereStep {
    fn header(&self) -> &Header {
        &self.header
    }

    #[inline]
    fn process(&mut self, row: Row, out: &mut Emitter) -> Result<()> {
        match &self.expr {
            Some(expr) if !expr.test(&row)? => {}
            _ => out.emit(row),
        }
        Ok(())
    }
}

/// Fails the query on the first row matching the expression.
pub struct ThrowIfStep {
    header: Header,
    expr: Expr,
}

impl ThrowIfStep {
    pub fn from_command(line: &CommandLine, input: &Header) -> Result<Self> {
        let expr = Expr::compile(expression_text(line)?, input).map_err(|e| e.into_gor(line.name()))?;
        Ok(Self {
            header: input.clone(),
            expr,
        })
    }
}

impl Step for ThrowIfStep {
    fn header(&self) -> &Header {
        &self.header
    }

    fn process(&mut self, row: Row, out: &mut Emitter) -> Result<()> {
        if self.expr.test(&row)? {
            return Err(GorError::data(format!(
                "throwif condition '{}' met at {}:{}",
                self.expr.text(),
                row.chrom(),
                row.pos()
            )));
        }
        out.emit(row);
        Ok(())
    }
}

/// Ends the stream before the first row matching the expression.
pub struct UntilStep {
    header: Header,
    expr: Expr,
}

impl UntilStep {
    pub fn from_command(line: &CommandLine, input: &Header) -> Result<Self> {
        let expr = Expr::compile(expression_text(line)?, input).map_err(|e| e.into_gor(line.name()))?;
        Ok(Self {
            header: input.clone(),
            expr,
        })
    }
}

impl Step for UntilStep {
    fn header(&self) -> &Header {
        &self.header
    }

    fn process(&mut self, row: Row, out: &mut Emitter) -> Result<()> {
        if self.expr.test(&row)? {
            out.stop();
        } else {
            out.emit(row);
        }
        Ok(())
    }
}

/// First N rows.
pub struct TopStep {
    header: Header,
    limit: usize,
    seen: usize,
}

impl TopStep {
    pub fn new(header: Header, limit: usize) -> Self {
        Self {
            header,
            limit,
            seen: 0,
        }
    }

    pub fn from_command(line: &CommandLine, input: &Header) -> Result<Self> {
        Ok(Self::new(input.clone(), single_count(line)?))
    }
}

impl Step for TopStep {
    fn header(&self) -> &Header {
        &self.header
    }

    fn process(&mut self, row: Row, out: &mut Emitter) -> Result<()> {
        if self.seen < self.limit {
            self.seen += 1;
            out.emit(row);
        }
        if self.seen >= self.limit {
            out.stop();
        }
        Ok(())
    }
}

/// Drops the first N rows.
pub struct SkipStep {
    header: Header,
    skip: usize,
    seen: usize,
}

impl SkipStep {
    pub fn from_command(line: &CommandLine, input: &Header) -> Result<Self> {
        Ok(Self {
            header: input.clone(),
            skip: single_count(line)?,
            seen: 0,
        })
    }
}

impl Step for SkipStep {
    fn header(&self) -> &Header {
        &self.header
    }

    fn process(&mut self, row: Row, out: &mut Emitter) -> Result<()> {
        if self.seen < self.skip {
            self.seen += 1;
        } else {
            out.emit(row);
        }
        Ok(())
    }
}

/// Drops repeated rows.
///
/// Equal rows share their key, so only rows at the current position are
/// remembered.
pub struct DistinctStep {
    header: Header,
    key: Option<(String, u64)>,
    seen: FxHashSet<Vec<String>>,
}

impl DistinctStep {
    pub fn from_command(line: &CommandLine, input: &Header) -> Result<Self> {
        line.options(&[], &[])?;
        Ok(Self {
            header: input.clone(),
            key: None,
            seen: FxHashSet::default(),
        })
    }
}

impl Step for DistinctStep {
    fn header(&self) -> &Header {
        &self.header
    }

    fn process(&mut self, row: Row, out: &mut Emitter) -> Result<()> {
        let same_key = matches!(&self.key, Some((c, p)) if c == row.chrom() && *p == row.pos());
        if !same_key {
            self.key = Some((row.chrom().to_string(), row.pos()));
            self.seen.clear();
        }
        if self.seen.insert(row.cols().to_vec()) {
            out.emit(row);
        }
        Ok(())
    }
}

/// Fails on the first row out of (chromosome, position) order.
pub struct VerifyOrderStep {
    header: Header,
    validator: OrderValidator,
}

impl VerifyOrderStep {
    pub fn from_command(line: &CommandLine, input: &Header, order: Arc<ChromOrder>) -> Result<Self> {
        line.options(&[], &[])?;
        Ok(Self {
            header: input.clone(),
            validator: OrderValidator::new(order, "verifyorder"),
        })
    }
}

impl Step for VerifyOrderStep {
    fn header(&self) -> &Header {
        &self.header
    }

    fn process(&mut self, row: Row, out: &mut Emitter) -> Result<()> {
        self.validator.validate_row(&row)?;
        out.emit(row);
        Ok(())
    }
}

/// Appends a 1-based `rownum` column.
pub struct RowNumStep {
    header: Header,
    next: u64,
}

impl RowNumStep {
    pub fn from_command(line: &CommandLine, input: &Header) -> Result<Self> {
        line.options(&[], &[])?;
        let mut header = input.clone();
        let name = header.unique_name("rownum");
        header.push(name, ColumnType::Int);
        Ok(Self { header, next: 1 })
    }
}

impl Step for RowNumStep {
    fn header(&self) -> &Header {
        &self.header
    }

    fn process(&mut self, mut row: Row, out: &mut Emitter) -> Result<()> {
        row.push(itoa::Buffer::new().format(self.next).to_string());
        self.next += 1;
        out.emit(row);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::gor::ErrorCategory;

    fn cmd(text: &str) -> CommandLine {
        CommandLine::parse(text).unwrap()
    }

    fn data() -> Vec<Row> {
        vec![
            row("chr1", 1, &["a", "5"]),
            row("chr1", 2, &["b", "7"]),
            row("chr1", 3, &["c", "9"]),
        ]
    }

    #[test]
    fn test_where() {
        let h = header(&["Chrom", "Pos", "Name", "Val"]);
        let mut step = WhereStep::from_command(&cmd("where Val > 6"), &h, false).unwrap();
        let out = run_step(&mut step, data()).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].col(2), "b");
    }

    #[test]
    fn test_where_unknown_column() {
        let h = header(&["Chrom", "Pos", "Name"]);
        let err = WhereStep::from_command(&cmd("where Missing = 1"), &h, false)
            .err()
            .unwrap();
        assert_eq!(err.category(), ErrorCategory::Parsing);

        let mut step = WhereStep::from_command(&cmd("trywhere Missing = 1"), &h, true).unwrap();
        assert_eq!(run_step(&mut step, data()).unwrap().len(), 3);
    }

    #[test]
    fn test_throwif() {
        let h = header(&["Chrom", "Pos", "Name", "Val"]);
        let mut step = ThrowIfStep::from_command(&cmd("throwif Val = 7"), &h).unwrap();
        let err = run_step(&mut step, data()).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Data);
    }

    #[test]
    fn test_until() {
        let h = header(&["Chrom", "Pos", "Name", "Val"]);
        let mut step = UntilStep::from_command(&cmd("until Name = 'c'"), &h).unwrap();
        assert_eq!(run_step(&mut step, data()).unwrap().len(), 2);
    }

    #[test]
    fn test_top_and_skip() {
        let h = header(&["Chrom", "Pos", "Name", "Val"]);
        let mut top = TopStep::from_command(&cmd("top 2"), &h).unwrap();
        assert_eq!(run_step(&mut top, data()).unwrap().len(), 2);
        let mut top0 = TopStep::from_command(&cmd("top 0"), &h).unwrap();
        assert!(run_step(&mut top0, data()).unwrap().is_empty());
        let mut skip = SkipStep::from_command(&cmd("skip 2"), &h).unwrap();
        assert_eq!(cells(&run_step(&mut skip, data()).unwrap()), vec!["chr1\t3\tc\t9"]);
        assert!(TopStep::from_command(&cmd("top x"), &h).is_err());
    }

    #[test]
    fn test_distinct() {
        let h = header(&["Chrom", "Pos", "Name"]);
        let mut step = DistinctStep::from_command(&cmd("distinct"), &h).unwrap();
        let rows = vec![
            row("chr1", 1, &["a"]),
            row("chr1", 1, &["a"]),
            row("chr1", 1, &["b"]),
            row("chr1", 2, &["a"]),
        ];
        assert_eq!(run_step(&mut step, rows).unwrap().len(), 3);
    }

    #[test]
    fn test_verifyorder() {
        let h = header(&["Chrom", "Pos"]);
        let mut step =
            VerifyOrderStep::from_command(&cmd("verifyorder"), &h, Arc::new(ChromOrder::default()))
                .unwrap();
        let err = run_step(&mut step, vec![row("chr2", 1, &[]), row("chr1", 5, &[])]).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Data);
    }

    #[test]
    fn test_rownum() {
        let h = header(&["Chrom", "Pos", "rownum"]);
        let mut step = RowNumStep::from_command(&cmd("rownum"), &h).unwrap();
        assert_eq!(step.header().name(3), "rownumx");
        let out = run_step(&mut step, vec![row("chr1", 1, &["x"]), row("chr1", 2, &["y"])]).unwrap();
        assert_eq!(out[1].col(3), "2");
    }
}
