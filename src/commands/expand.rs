//! Steps that turn one row into several.

use super::{resolve_columns, Emitter, Step};
use crate::gor::{GorError, Result};
use crate::query::parser::CommandLine;
use crate::row::{ColumnType, Header, Row};

/// Splits list-valued columns into one row per element.
///
/// Several columns split in lockstep and must hold the same number of
/// elements.
pub struct SplitStep {
    header: Header,
    columns: Vec<usize>,
    separator: String,
}

impl SplitStep {
    pub fn from_command(line: &CommandLine, input: &Header) -> Result<Self> {
        let opts = line.options(&[], &["-s"])?;
        let [spec] = opts.positional() else {
            return Err(opts.error("Usage: split <columns> [-s separator]"));
        };
        let columns = resolve_columns(input, spec, line.name())?;
        if columns.iter().any(|&c| c < 2) {
            return Err(opts.error("Chromosome and position columns cannot be split"));
        }
        let separator = opts.value("-s").unwrap_or(",").to_string();
        if separator.is_empty() {
            return Err(opts.option_error("-s", "Separator is empty"));
        }
        Ok(Self {
            header: input.clone(),
            columns,
            separator,
        })
    }
}

impl Step for SplitStep {
    fn header(&self) -> &Header {
        &self.header
    }

    fn process(&mut self, row: Row, out: &mut Emitter) -> Result<()> {
        let parts: Vec<Vec<String>> = self
            .columns
            .iter()
            .map(|&c| row.col(c).split(self.separator.as_str()).map(String::from).collect())
            .collect();
        let n = parts[0].len();
        if parts.iter().any(|p| p.len() != n) {
            return Err(GorError::data(format!(
                "split: columns at {}:{} have different element counts",
                row.chrom(),
                row.pos()
            )));
        }
        for i in 0..n {
            let mut copy = row.clone();
            for (k, &c) in self.columns.iter().enumerate() {
                copy.set(c, parts[k][i].clone())?;
            }
            out.emit(copy);
        }
        Ok(())
    }
}

/// Turns columns into (name, value) rows.
pub struct UnpivotStep {
    header: Header,
    keep: Vec<usize>,
    columns: Vec<usize>,
    names: Vec<String>,
}

impl UnpivotStep {
    pub fn from_command(line: &CommandLine, input: &Header) -> Result<Self> {
        let opts = line.options(&[], &[])?;
        let spec = opts.positional().join(",");
        if spec.is_empty() {
            return Err(opts.error("Missing column list"));
        }
        let columns = resolve_columns(input, &spec, line.name())?;
        if columns.iter().any(|&c| c < 2) {
            return Err(opts.error("Chromosome and position columns cannot be unpivoted"));
        }
        let keep: Vec<usize> = (0..input.len()).filter(|i| !columns.contains(i)).collect();
        let mut header = input.project(&keep);
        header.push(header.unique_name("Col_Name"), ColumnType::String);
        header.push(header.unique_name("Col_Value"), ColumnType::Unknown);
        let names = columns.iter().map(|&c| input.name(c).to_string()).collect();
        Ok(Self {
            header,
            keep,
            columns,
            names,
        })
    }
}

impl Step for UnpivotStep {
    fn header(&self) -> &Header {
        &self.header
    }

    fn process(&mut self, row: Row, out: &mut Emitter) -> Result<()> {
        let base = row.project(&self.keep);
        for (name, &c) in self.names.iter().zip(&self.columns) {
            let mut copy = base.clone();
            copy.push(name.clone());
            copy.push(row.col(c).to_string());
            out.emit(copy);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;

    fn cmd(text: &str) -> CommandLine {
        CommandLine::parse(text).unwrap()
    }

    #[test]
    fn test_split() {
        let h = header(&["Chrom", "Pos", "Genes", "Ids"]);
        let mut step = SplitStep::from_command(&cmd("split Genes,Ids"), &h).unwrap();
        let out = run_step(&mut step, vec![row("chr1", 5, &["A,B", "1,2"])]).unwrap();
        assert_eq!(cells(&out), vec!["chr1\t5\tA\t1", "chr1\t5\tB\t2"]);

        let err = run_step(&mut step, vec![row("chr1", 5, &["A,B", "1"])]).unwrap_err();
        assert_eq!(err.category(), crate::gor::ErrorCategory::Data);
    }

    #[test]
    fn test_split_separator() {
        let h = header(&["Chrom", "Pos", "Genes"]);
        let mut step = SplitStep::from_command(&cmd("split Genes -s ;"), &h).unwrap();
        let out = run_step(&mut step, vec![row("chr1", 5, &["A;B;C"])]).unwrap();
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn test_unpivot() {
        let h = header(&["Chrom", "Pos", "Id", "GT1", "GT2"]);
        let mut step = UnpivotStep::from_command(&cmd("unpivot GT1,GT2"), &h).unwrap();
        assert_eq!(step.header().names(), &["Chrom", "Pos", "Id", "Col_Name", "Col_Value"]);
        let out = run_step(&mut step, vec![row("chr1", 5, &["x", "0/1", "1/1"])]).unwrap();
        assert_eq!(cells(&out), vec!["chr1\t5\tx\tGT1\t0/1", "chr1\t5\tx\tGT2\t1/1"]);
    }
}
