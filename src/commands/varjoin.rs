//! Variant join: matches rows on chromosome, position and alleles.

use super::{resolve_columns, Emitter, Step};
use crate::genome::ChromOrder;
use crate::gor::{GorError, Result};
use crate::query::parser::{CommandLine, Options};
use crate::query::Session;
use crate::row::{ColumnType, Header, Row};
use crate::streaming::{format_int, ActiveSet, BoxedSource, OrderValidator, PeekSource, Span};
use std::cmp::Ordering;
use std::sync::Arc;

/// Default variant span considered when alleles are normalized.
pub const DEFAULT_NORM_SPAN: u64 = 100;

/// Upper-cased alleles with the shared suffix and then the shared prefix
/// trimmed; the position moves right by the trimmed prefix length. At
/// least one base is kept on each side.
pub fn normalize(pos: u64, reference: &str, alt: &str) -> (u64, String, String) {
    let r = reference.to_uppercase();
    let a = alt.to_uppercase();
    let (mut r, mut a) = (r.as_bytes(), a.as_bytes());
    while r.len() > 1 && a.len() > 1 && r[r.len() - 1] == a[a.len() - 1] {
        r = &r[..r.len() - 1];
        a = &a[..a.len() - 1];
    }
    let mut shift = 0;
    while r.len() > 1 && a.len() > 1 && r[0] == a[0] {
        r = &r[1..];
        a = &a[1..];
        shift += 1;
    }
    (
        pos + shift,
        String::from_utf8_lossy(r).into_owned(),
        String::from_utf8_lossy(a).into_owned(),
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VarOutput {
    Pairs,
    Included,
    Excluded,
    Count,
}

/// Allele and equi-join columns of one side.
#[derive(Debug, Clone)]
struct AlleleColumns {
    reference: usize,
    alt: usize,
    keys: Vec<usize>,
}

fn allele_column(
    header: &Header,
    given: Option<&str>,
    names: &[&str],
    fallback: usize,
    opts: &Options,
    option: &str,
) -> Result<usize> {
    if let Some(name) = given {
        return header
            .column_index(name)
            .ok_or_else(|| opts.option_error(option, format!("Column {} not found", name)));
    }
    if let Some(idx) = names.iter().find_map(|n| header.index_of(n)) {
        return Ok(idx);
    }
    if fallback < header.len() {
        Ok(fallback)
    } else {
        Err(opts.error(format!("No {} column", names[0])))
    }
}

#[derive(Debug)]
struct Variant {
    key: String,
    row: Row,
}

/// `varjoin`: variant join against a right source.
pub struct VarJoinStep {
    header: Header,
    output: VarOutput,
    order: Arc<ChromOrder>,
    right: PeekSource,
    validator: OrderValidator,
    window: ActiveSet<Span<Variant>>,
    chrom: Option<String>,
    left: AlleleColumns,
    right_columns: AlleleColumns,
    right_out: Vec<usize>,
    normalize: bool,
    span: u64,
    left_outer: bool,
    fill: String,
}

impl VarJoinStep {
    pub fn from_command(line: &CommandLine, input: &Header, session: &Session) -> Result<Self> {
        let opts = line.options(
            &["-norm", "-r", "-i", "-n", "-l", "-ic"],
            &["-ref", "-alt", "-refl", "-altl", "-refr", "-altr", "-span", "-e", "-xl", "-xr"],
        )?;
        let [target] = opts.positional() else {
            return Err(opts.error("Expected one right-side source"));
        };
        let right = session.open_source(target)?;
        Self::with_options(&opts, input, right, session.order())
    }

    fn with_options(
        opts: &Options,
        input: &Header,
        right: BoxedSource,
        order: Arc<ChromOrder>,
    ) -> Result<Self> {
        let right_header = right.header().clone();
        let ref_names = ["ref", "reference"];
        let alt_names = ["alt", "call"];
        let refl = opts.value("-refl").or(opts.value("-ref"));
        let altl = opts.value("-altl").or(opts.value("-alt"));
        let refr = opts.value("-refr").or(opts.value("-ref"));
        let altr = opts.value("-altr").or(opts.value("-alt"));
        let mut left = AlleleColumns {
            reference: allele_column(input, refl, &ref_names, 2, opts, "-refl")?,
            alt: allele_column(input, altl, &alt_names, 3, opts, "-altl")?,
            keys: Vec::new(),
        };
        let mut right_columns = AlleleColumns {
            reference: allele_column(&right_header, refr, &ref_names, 2, opts, "-refr")?,
            alt: allele_column(&right_header, altr, &alt_names, 3, opts, "-altr")?,
            keys: Vec::new(),
        };
        match (opts.value("-xl"), opts.value("-xr")) {
            (Some(l), Some(r)) => {
                left.keys = resolve_columns(input, l, opts.command())?;
                right_columns.keys = resolve_columns(&right_header, r, opts.command())?;
                if left.keys.len() != right_columns.keys.len() {
                    return Err(opts.option_error("-xr", "Number of -xl and -xr columns differ"));
                }
            }
            (None, None) => {}
            _ => return Err(opts.error("Options -xl and -xr must be used together")),
        }

        let output = if opts.has("-ic") {
            VarOutput::Count
        } else if opts.has("-i") {
            VarOutput::Included
        } else if opts.has("-n") {
            VarOutput::Excluded
        } else {
            VarOutput::Pairs
        };
        let right_out: Vec<usize> = if opts.has("-r") {
            (2..right_header.len())
                .filter(|&i| i != right_columns.reference && i != right_columns.alt)
                .collect()
        } else {
            (1..right_header.len()).collect()
        };
        let header = match output {
            VarOutput::Included | VarOutput::Excluded => input.clone(),
            VarOutput::Count => {
                let mut h = input.clone();
                h.push(h.unique_name("OverlapCount"), ColumnType::Int);
                h
            }
            VarOutput::Pairs => {
                let mut h = input.clone();
                for &i in &right_out {
                    h.push(h.unique_name(right_header.name(i)), right_header.type_of(i));
                }
                h
            }
        };
        let normalize = opts.has("-norm");
        let default_span = if normalize { DEFAULT_NORM_SPAN } else { 0 };
        let span = match opts.value("-span") {
            Some(_) => opts.count("-span", 0)? as u64,
            None => default_span,
        };

        Ok(Self {
            header,
            output,
            validator: OrderValidator::new(order.clone(), "varjoin right input"),
            order,
            right: PeekSource::new(right),
            window: ActiveSet::new(),
            chrom: None,
            left,
            right_columns,
            right_out,
            normalize,
            span,
            left_outer: opts.has("-l"),
            fill: opts.value("-e").unwrap_or("").to_string(),
        })
    }

    fn variant_key(&self, row: &Row, columns: &AlleleColumns) -> String {
        let (pos, r, a) = if self.normalize {
            normalize(row.pos(), row.col(columns.reference), row.col(columns.alt))
        } else {
            (
                row.pos(),
                row.col(columns.reference).to_uppercase(),
                row.col(columns.alt).to_uppercase(),
            )
        };
        let mut key = format!("{}\t{}\t{}", pos, r, a);
        for &k in &columns.keys {
            key.push('\t');
            key.push_str(row.col(k));
        }
        key
    }

    fn advance_right(&mut self, chrom: &str, pos: u64) -> Result<()> {
        if self.chrom.as_deref() != Some(chrom) {
            self.window.clear();
            self.chrom = Some(chrom.to_string());
            let target = pos.saturating_sub(self.span);
            self.right.seek(&self.order, chrom, target)?;
        }
        let limit = pos + self.span;
        loop {
            let same_chrom = match self.right.peek()? {
                None => break,
                Some(r) => match self.order.cmp_chrom(r.chrom(), chrom) {
                    Ordering::Less => false,
                    Ordering::Greater => break,
                    Ordering::Equal if r.pos() > limit => break,
                    Ordering::Equal => true,
                },
            };
            let Some(row) = self.right.take()? else {
                break;
            };
            self.validator.validate_row(&row)?;
            if same_chrom {
                let key = self.variant_key(&row, &self.right_columns);
                self.window.push(Span::new(row.pos(), row.pos() + self.span, Variant { key, row }));
            }
        }
        self.window.expire_before(pos);
        Ok(())
    }
}

impl Step for VarJoinStep {
    fn header(&self) -> &Header {
        &self.header
    }

    fn process(&mut self, mut row: Row, out: &mut Emitter) -> Result<()> {
        if row.len() <= self.left.reference.max(self.left.alt) {
            return Err(GorError::data(format!(
                "varjoin: row at {}:{} has no allele columns",
                row.chrom(),
                row.pos()
            )));
        }
        let chrom = row.chrom().to_string();
        self.advance_right(&chrom, row.pos())?;
        let key = self.variant_key(&row, &self.left);
        let matches: Vec<&Row> = self
            .window
            .iter()
            .filter(|s| s.item.key == key)
            .map(|s| &s.item.row)
            .collect();

        match self.output {
            VarOutput::Count => {
                row.push(format_int(matches.len() as i64));
                out.emit(row);
            }
            VarOutput::Included => {
                if !matches.is_empty() {
                    out.emit(row);
                }
            }
            VarOutput::Excluded => {
                if matches.is_empty() {
                    out.emit(row);
                }
            }
            VarOutput::Pairs => {
                if matches.is_empty() {
                    if self.left_outer {
                        for _ in &self.right_out {
                            row.push(self.fill.clone());
                        }
                        out.emit(row);
                    }
                    return Ok(());
                }
                for right in matches {
                    let mut joined = row.clone();
                    for &i in &self.right_out {
                        joined.push(right.col(i).to_string());
                    }
                    out.emit(joined);
                }
            }
        }
        Ok(())
    }

    fn close(&mut self) {
        self.window.clear();
        self.right.close();
    }
}
