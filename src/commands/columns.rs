//! Column projection, renaming, computed columns and type coercion.

use super::{resolve_columns, Emitter, Step};
use crate::expr::Expr;
use crate::gor::{GorError, Result};
use crate::query::parser::{split_top_level, CommandLine};
use crate::row::{ColumnType, Header, Row};
use regex::RegexBuilder;

fn key_columns(header: &Header) -> usize {
    header.len().min(2)
}

/// `select` and `tryselect`: keep the key columns plus the listed ones.
pub struct SelectStep {
    header: Header,
    indices: Vec<usize>,
}

impl SelectStep {
    pub fn new(input: &Header, columns: &[usize]) -> Self {
        let mut indices: Vec<usize> = (0..key_columns(input)).collect();
        for &c in columns {
            if !indices.contains(&c) {
                indices.push(c);
            }
        }
        Self {
            header: input.project(&indices),
            indices,
        }
    }

    pub fn from_command(line: &CommandLine, input: &Header, lenient: bool) -> Result<Self> {
        let opts = line.options(&[], &[])?;
        let spec = opts.positional().join(",");
        if spec.is_empty() {
            return Err(opts.error("Missing column list"));
        }
        let columns = if lenient {
            input.resolve_lenient(&spec)
        } else {
            resolve_columns(input, &spec, line.name())?
        };
        Ok(Self::new(input, &columns))
    }
}

impl Step for SelectStep {
    fn header(&self) -> &Header {
        &self.header
    }

    #[inline]
    fn process(&mut self, row: Row, out: &mut Emitter) -> Result<()> {
        out.emit(row.project(&self.indices));
        Ok(())
    }
}

/// `hide` and `tryhide`: drop the listed columns.
pub struct HideStep {
    header: Header,
    indices: Vec<usize>,
}

impl HideStep {
    pub fn from_command(line: &CommandLine, input: &Header, lenient: bool) -> Result<Self> {
        let opts = line.options(&[], &[])?;
        let spec = opts.positional().join(",");
        if spec.is_empty() {
            return Err(opts.error("Missing column list"));
        }
        let hidden = if lenient {
            input.resolve_lenient(&spec)
        } else {
            resolve_columns(input, &spec, line.name())?
        };
        if hidden.iter().any(|&c| c < key_columns(input)) {
            return Err(opts.error("Chromosome and position columns cannot be hidden"));
        }
        let indices: Vec<usize> = (0..input.len()).filter(|i| !hidden.contains(i)).collect();
        Ok(Self {
            header: input.project(&indices),
            indices,
        })
    }
}

impl Step for HideStep {
    fn header(&self) -> &Header {
        &self.header
    }

    #[inline]
    fn process(&mut self, row: Row, out: &mut Emitter) -> Result<()> {
        out.emit(row.project(&self.indices));
        Ok(())
    }
}

/// Substitute `#{n}` group references of `template` with `captures`.
fn expand_template(template: &str, captures: &regex::Captures) -> std::result::Result<String, usize> {
    let mut out = String::new();
    let mut rest = template;
    while let Some(start) = rest.find("#{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return Ok(out);
        };
        let inner = &after[..end];
        match inner.parse::<usize>() {
            Ok(n) => match captures.get(n) {
                Some(m) => out.push_str(m.as_str()),
                None => return Err(n),
            },
            Err(_) => out.push_str(&rest[start..start + 2 + end + 1]),
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Renames a column, or every column matching an anchored regex.
///
/// Regex renames use `#{n}` in the new name for capture group `n`.
pub struct RenameStep {
    header: Header,
}

impl RenameStep {
    pub fn from_command(line: &CommandLine, input: &Header) -> Result<Self> {
        let opts = line.options(&[], &[])?;
        let [from, to] = opts.positional() else {
            return Err(opts.error("Usage: rename <column|regex> <new name>"));
        };
        let mut header = input.clone();
        if let Some(idx) = input.column_index(from) {
            header.rename(idx, to.as_str());
        } else {
            let pattern = RegexBuilder::new(&format!("^(?:{})$", from))
                .case_insensitive(true)
                .build()
                .map_err(|e| opts.error(format!("Invalid rename pattern '{}': {}", from, e)))?;
            let groups = pattern.captures_len() - 1;
            let mut matched = false;
            for (i, name) in input.names().iter().enumerate() {
                let Some(captures) = pattern.captures(name) else {
                    continue;
                };
                matched = true;
                let new_name = expand_template(to, &captures).map_err(|n| {
                    opts.error(format!(
                        "Group #{{{}}} referenced in '{}' but the pattern has {} group(s)",
                        n, to, groups
                    ))
                })?;
                header.rename(i, new_name);
            }
            if !matched {
                return Err(opts.error(format!("Column {} not found", from)));
            }
        }
        for (i, name) in header.names().iter().enumerate() {
            if header.names()[..i].iter().any(|n| n.eq_ignore_ascii_case(name)) {
                return Err(opts.error(format!("Column name {} is used twice", name)));
            }
        }
        Ok(Self { header })
    }
}

impl Step for RenameStep {
    fn header(&self) -> &Header {
        &self.header
    }

    #[inline]
    fn process(&mut self, row: Row, out: &mut Emitter) -> Result<()> {
        out.emit(row);
        Ok(())
    }
}

/// Appends computed columns.
pub struct CalcStep {
    header: Header,
    exprs: Vec<Expr>,
}

impl CalcStep {
    pub fn from_command(line: &CommandLine, input: &Header) -> Result<Self> {
        let mut header = input.clone();
        let mut exprs = Vec::new();
        for part in split_top_level(line.args(), ',') {
            let part = part.trim();
            let Some((name, text)) = part.split_once(char::is_whitespace) else {
                return Err(GorError::parse(
                    line.name(),
                    format!("Expected '<name> <expression>', got '{}'", part),
                ));
            };
            if header.index_of(name).is_some() {
                return Err(GorError::data(format!(
                    "Column {} already exists; calc cannot overwrite it",
                    name
                )));
            }
            let expr = Expr::compile(text.trim(), &header).map_err(|e| e.into_gor(line.name()))?;
            header.push(name, expr.result_type());
            exprs.push(expr);
        }
        Ok(Self { header, exprs })
    }
}

impl Step for CalcStep {
    fn header(&self) -> &Header {
        &self.header
    }

    fn process(&mut self, mut row: Row, out: &mut Emitter) -> Result<()> {
        for expr in &self.exprs {
            let value = expr.eval(&row)?;
            row.push(value.to_string());
        }
        out.emit(row);
        Ok(())
    }
}

/// Fixes the type of columns and checks every value against it.
pub struct SetColTypeStep {
    header: Header,
    checks: Vec<(usize, ColumnType)>,
}

impl SetColTypeStep {
    pub fn from_command(line: &CommandLine, input: &Header) -> Result<Self> {
        let opts = line.options(&[], &[])?;
        let [cols, types] = opts.positional() else {
            return Err(opts.error("Usage: setcoltype <columns> <types>"));
        };
        let indices = resolve_columns(input, cols, line.name())?;
        let codes: Vec<ColumnType> = types
            .split(',')
            .map(|code| {
                ColumnType::from_code(code.trim())
                    .ok_or_else(|| opts.error(format!("Unknown column type '{}'", code)))
            })
            .collect::<Result<_>>()?;
        if codes.len() != 1 && codes.len() != indices.len() {
            return Err(opts.error(format!(
                "{} column(s) but {} type(s)",
                indices.len(),
                codes.len()
            )));
        }
        let mut header = input.clone();
        let mut checks = Vec::new();
        for (n, &idx) in indices.iter().enumerate() {
            let t = if codes.len() == 1 { codes[0] } else { codes[n] };
            let allowed = match idx {
                0 if !input.is_nor() => t == ColumnType::String,
                1 if !input.is_nor() => matches!(t, ColumnType::Int | ColumnType::Long),
                _ => true,
            };
            if !allowed {
                return Err(opts.error(format!(
                    "Column {} cannot have type {}",
                    input.name(idx),
                    t.code()
                )));
            }
            header.set_type(idx, t);
            checks.push((idx, t));
        }
        Ok(Self { header, checks })
    }
}

impl Step for SetColTypeStep {
    fn header(&self) -> &Header {
        &self.header
    }

    fn process(&mut self, row: Row, out: &mut Emitter) -> Result<()> {
        for &(idx, t) in &self.checks {
            let value = row.col(idx);
            if !value.is_empty() && !t.accepts(value) {
                return Err(GorError::data(format!(
                    "Cannot coerce '{}' in column {} to type {}",
                    value,
                    self.header.name(idx),
                    t.code()
                )));
            }
        }
        out.emit(row);
        Ok(())
    }
}
