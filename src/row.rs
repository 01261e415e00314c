//! Row and header model.
//!
//! A row is an owned vector of cells whose first two columns are the
//! ordering key: chromosome and position. Cells stay as text; columns carry
//! an inferred [`ColumnType`] fixed once per stream.

use crate::genome::ChromOrder;
use crate::gor::{GorError, Result};
use crate::streaming::parsing::{parse_u64_fast, split_tabs};
use std::cmp::Ordering;
use std::fmt;

/// Pipeline keywords that may not be used verbatim as column names.
pub const RESERVED_WORDS: &[&str] = &[
    "and", "or", "not", "in", "like", "from", "where", "select", "join", "group", "as", "by",
];

/// Inferred type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColumnType {
    #[default]
    Unknown,
    Int,
    Long,
    Double,
    String,
}

impl ColumnType {
    /// Infer a type from a sample of values; empty cells are ignored.
    pub fn infer<'a>(values: impl Iterator<Item = &'a str>) -> ColumnType {
        let mut result = ColumnType::Unknown;
        for value in values {
            if value.is_empty() {
                continue;
            }
            let t = if value.parse::<i32>().is_ok() {
                ColumnType::Int
            } else if value.parse::<i64>().is_ok() {
                ColumnType::Long
            } else if value.parse::<f64>().is_ok() {
                ColumnType::Double
            } else {
                ColumnType::String
            };
            result = result.widen(t);
            if result == ColumnType::String {
                break;
            }
        }
        result
    }

    fn widen(self, other: ColumnType) -> ColumnType {
        use ColumnType::*;
        match (self, other) {
            (Unknown, t) | (t, Unknown) => t,
            (String, _) | (_, String) => String,
            (Double, _) | (_, Double) => Double,
            (Long, _) | (_, Long) => Long,
            (Int, Int) => Int,
        }
    }

    pub fn from_code(code: &str) -> Option<ColumnType> {
        match code.to_ascii_uppercase().as_str() {
            "I" | "INT" => Some(ColumnType::Int),
            "L" | "LONG" => Some(ColumnType::Long),
            "D" | "F" | "DOUBLE" | "FLOAT" => Some(ColumnType::Double),
            "S" | "STRING" => Some(ColumnType::String),
            _ => None,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ColumnType::Unknown => "U",
            ColumnType::Int => "I",
            ColumnType::Long => "L",
            ColumnType::Double => "D",
            ColumnType::String => "S",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            ColumnType::Int | ColumnType::Long | ColumnType::Double
        )
    }

    /// Check that `value` can be read as this type.
    pub fn accepts(&self, value: &str) -> bool {
        match self {
            ColumnType::Unknown | ColumnType::String => true,
            ColumnType::Int => value.parse::<i32>().is_ok(),
            ColumnType::Long => value.parse::<i64>().is_ok(),
            ColumnType::Double => value.parse::<f64>().is_ok(),
        }
    }
}

/// One tuple of the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    cols: Vec<String>,
    pos: u64,
}

impl Row {
    /// Build a row from its cells; the second cell must be a position.
    pub fn new(cols: Vec<String>) -> Result<Row> {
        if cols.len() < 2 {
            return Err(GorError::data(format!(
                "Row needs chromosome and position, got {} column(s)",
                cols.len()
            )));
        }
        let pos = parse_u64_fast(cols[1].as_bytes()).ok_or_else(|| {
            GorError::data(format!("Invalid position '{}'", cols[1]))
        })?;
        Ok(Row { cols, pos })
    }

    /// Build a row from a key and trailing cells.
    pub fn from_parts<I>(chrom: &str, pos: u64, rest: I) -> Row
    where
        I: IntoIterator<Item = String>,
    {
        let mut cols = vec![chrom.to_string(), pos.to_string()];
        cols.extend(rest);
        Row { cols, pos }
    }

    /// Build an unordered-table row with the synthetic key.
    pub fn nor(values: Vec<String>) -> Row {
        Row::from_parts("chrN", 0, values)
    }

    pub fn parse_line(line: &str) -> Result<Row> {
        Row::new(split_tabs(line))
    }

    #[inline]
    pub fn chrom(&self) -> &str {
        &self.cols[0]
    }

    #[inline]
    pub fn pos(&self) -> u64 {
        self.pos
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.cols.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cols.is_empty()
    }

    /// Cell text, or the empty string past the end.
    #[inline]
    pub fn col(&self, i: usize) -> &str {
        self.cols.get(i).map(String::as_str).unwrap_or("")
    }

    pub fn cols(&self) -> &[String] {
        &self.cols
    }

    pub fn into_cols(self) -> Vec<String> {
        self.cols
    }

    pub fn set(&mut self, i: usize, value: String) -> Result<()> {
        if i == 1 {
            self.pos = parse_u64_fast(value.as_bytes())
                .ok_or_else(|| GorError::data(format!("Invalid position '{}'", value)))?;
        }
        match self.cols.get_mut(i) {
            Some(cell) => {
                *cell = value;
                Ok(())
            }
            None => Err(GorError::data(format!(
                "Column {} out of range for row with {} columns",
                i + 1,
                self.cols.len()
            ))),
        }
    }

    pub fn push(&mut self, value: String) {
        self.cols.push(value);
    }

    /// Keep only the given columns, in the given order.
    pub fn project(&self, indices: &[usize]) -> Row {
        let cols: Vec<String> = indices.iter().map(|&i| self.col(i).to_string()).collect();
        let pos = if indices.get(1) == Some(&1) {
            self.pos
        } else {
            cols.get(1)
                .and_then(|c| parse_u64_fast(c.as_bytes()))
                .unwrap_or(self.pos)
        };
        Row { cols, pos }
    }

    /// Integer value of a cell.
    pub fn int(&self, i: usize) -> Result<i64> {
        let v = self.col(i);
        v.parse::<i64>().map_err(|_| {
            GorError::data(format!(
                "Cannot coerce '{}' in column {} to an integer",
                v,
                i + 1
            ))
        })
    }

    /// Floating point value of a cell.
    pub fn float(&self, i: usize) -> Result<f64> {
        let v = self.col(i);
        v.parse::<f64>().map_err(|_| {
            GorError::data(format!(
                "Cannot coerce '{}' in column {} to a number",
                v,
                i + 1
            ))
        })
    }

    #[inline]
    pub fn key_cmp(&self, other: &Row, order: &ChromOrder) -> Ordering {
        order.cmp_key(self.chrom(), self.pos, other.chrom(), other.pos)
    }

    pub fn to_line(&self) -> String {
        self.cols.join("\t")
    }
}

impl fmt::Display for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.cols.join("\t"))
    }
}

/// Column names and inferred types of a stream.
///
/// In NOR mode the first two columns are the synthetic `ChromNOR`/`PosNOR`
/// key: they are hidden on output and column numbers skip them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    names: Vec<String>,
    types: Vec<ColumnType>,
    nor: bool,
}

impl Header {
    pub fn new(names: Vec<String>) -> Header {
        let types = vec![ColumnType::Unknown; names.len()];
        Header {
            names,
            types,
            nor: false,
        }
    }

    pub fn from_names(names: &[&str]) -> Header {
        Header::new(names.iter().map(|s| s.to_string()).collect())
    }

    /// Unordered-table header with the synthetic key prepended.
    pub fn nor(names: Vec<String>) -> Header {
        let mut all = vec!["ChromNOR".to_string(), "PosNOR".to_string()];
        all.extend(names);
        Header::new(all).into_nor()
    }

    pub fn into_nor(mut self) -> Header {
        self.nor = true;
        if let Some(t) = self.types.get_mut(1) {
            *t = ColumnType::Int;
        }
        self
    }

    /// Parse a header line; a leading `#` is dropped and names are sanitized.
    pub fn parse_line(line: &str) -> Header {
        let line = line.strip_prefix('#').unwrap_or(line);
        Header::new(sanitize_column_names(split_tabs(line)))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    #[inline]
    pub fn is_nor(&self) -> bool {
        self.nor
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn name(&self, i: usize) -> &str {
        self.names.get(i).map(String::as_str).unwrap_or("")
    }

    /// Names as written on output.
    pub fn visible_names(&self) -> &[String] {
        if self.nor {
            &self.names[2.min(self.names.len())..]
        } else {
            &self.names
        }
    }

    pub fn types(&self) -> &[ColumnType] {
        &self.types
    }

    pub fn type_of(&self, i: usize) -> ColumnType {
        self.types.get(i).copied().unwrap_or_default()
    }

    pub fn set_types(&mut self, types: Vec<ColumnType>) {
        self.types = types;
        self.types.resize(self.names.len(), ColumnType::Unknown);
    }

    pub fn set_type(&mut self, i: usize, t: ColumnType) {
        if let Some(slot) = self.types.get_mut(i) {
            *slot = t;
        }
    }

    pub fn push(&mut self, name: impl Into<String>, t: ColumnType) {
        self.names.push(name.into());
        self.types.push(t);
    }

    pub fn rename(&mut self, i: usize, name: impl Into<String>) {
        if let Some(slot) = self.names.get_mut(i) {
            *slot = name.into();
        }
    }

    /// New header with the given columns, in the given order.
    pub fn project(&self, indices: &[usize]) -> Header {
        Header {
            names: indices.iter().map(|&i| self.name(i).to_string()).collect(),
            types: indices.iter().map(|&i| self.type_of(i)).collect(),
            nor: self.nor,
        }
    }

    /// Case-insensitive column lookup.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n.eq_ignore_ascii_case(name))
    }

    /// Resolve a single column reference: a name, `#N` or `N` (1-based).
    pub fn column_index(&self, item: &str) -> Option<usize> {
        let item = item.trim();
        let number = item.strip_prefix('#').unwrap_or(item);
        if !number.is_empty() && number.bytes().all(|b| b.is_ascii_digit()) {
            let n: usize = number.parse().ok()?;
            let offset = if self.nor { 2 } else { 0 };
            let idx = n.checked_sub(1)? + offset;
            return (idx < self.len()).then_some(idx);
        }
        self.index_of(item)
    }

    /// Resolve a column specification such as `1-3,Name,5-,Pre*`.
    ///
    /// Returns the first unresolvable item on failure.
    pub fn resolve(&self, spec: &str) -> std::result::Result<Vec<usize>, String> {
        let mut out: Vec<usize> = Vec::new();
        for item in spec.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            for idx in self.resolve_item(item)? {
                if !out.contains(&idx) {
                    out.push(idx);
                }
            }
        }
        Ok(out)
    }

    /// Resolve a specification, skipping items that do not exist.
    pub fn resolve_lenient(&self, spec: &str) -> Vec<usize> {
        let mut out: Vec<usize> = Vec::new();
        for item in spec.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            if let Ok(indices) = self.resolve_item(item) {
                for idx in indices {
                    if !out.contains(&idx) {
                        out.push(idx);
                    }
                }
            }
        }
        out
    }

    fn resolve_item(&self, item: &str) -> std::result::Result<Vec<usize>, String> {
        if item == "*" {
            let start = if self.nor { 2 } else { 0 };
            return Ok((start..self.len()).collect());
        }
        if let Some(idx) = self.column_index(item) {
            return Ok(vec![idx]);
        }
        if item.contains('*') {
            let matched: Vec<usize> = (0..self.len())
                .filter(|&i| glob_match(item, &self.names[i]))
                .collect();
            return if matched.is_empty() {
                Err(item.to_string())
            } else {
                Ok(matched)
            };
        }
        if let Some((from, to)) = item.split_once('-') {
            let first = if from.is_empty() {
                Some(if self.nor { 2 } else { 0 })
            } else {
                self.column_index(from)
            };
            let last = if to.is_empty() {
                self.len().checked_sub(1)
            } else {
                self.column_index(to)
            };
            if let (Some(a), Some(b)) = (first, last) {
                if a <= b {
                    return Ok((a..=b).collect());
                }
            }
        }
        Err(item.to_string())
    }

    /// A column name derived from `base` that does not collide.
    pub fn unique_name(&self, base: &str) -> String {
        let mut name = base.to_string();
        while self.index_of(&name).is_some() {
            name.push('x');
        }
        name
    }

    /// Same column count and names, ignoring case.
    pub fn is_compatible(&self, other: &Header) -> bool {
        self.len() == other.len()
            && self
                .names
                .iter()
                .zip(other.names.iter())
                .all(|(a, b)| a.eq_ignore_ascii_case(b))
    }

    pub fn to_line(&self) -> String {
        self.visible_names().join("\t")
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_line())
    }
}

/// Match `name` against a pattern with `*` wildcards, ignoring case.
pub fn glob_match(pattern: &str, name: &str) -> bool {
    let p: Vec<char> = pattern.to_lowercase().chars().collect();
    let n: Vec<char> = name.to_lowercase().chars().collect();
    let (mut pi, mut ni) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;
    while ni < n.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == n[ni]) {
            pi += 1;
            ni += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ni));
            pi += 1;
        } else if let Some((sp, sn)) = star {
            pi = sp + 1;
            ni = sn + 1;
            star = Some((sp, sn + 1));
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

/// Make header names safe for the pipeline language.
///
/// Reserved words get an `x` suffix, characters outside `[A-Za-z0-9_.-]`
/// become `_`, empty names become `col<N>` and repeated names get their
/// 1-based column number appended.
pub fn sanitize_column_names(names: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(names.len());
    for (i, name) in names.into_iter().enumerate() {
        let mut clean: String = name
            .trim()
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        if clean.is_empty() {
            clean = format!("col{}", i + 1);
        }
        if RESERVED_WORDS.iter().any(|w| w.eq_ignore_ascii_case(&clean)) {
            clean.push('x');
        }
        if out.iter().any(|o| o.eq_ignore_ascii_case(&clean)) {
            clean = format!("{}_{}", clean, i + 1);
        }
        out.push(clean);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> Header {
        Header::from_names(&["Chrom", "Pos", "Ref", "Alt", "Data"])
    }

    #[test]
    fn test_row_accessors() {
        let row = Row::parse_line("chr1\t100\tA\tC").unwrap();
        assert_eq!(row.chrom(), "chr1");
        assert_eq!(row.pos(), 100);
        assert_eq!(row.col(2), "A");
        assert_eq!(row.col(9), "");
        assert_eq!(row.len(), 4);
    }

    #[test]
    fn test_row_invalid_position() {
        assert!(Row::parse_line("chr1\tabc").is_err());
        assert!(Row::parse_line("chr1").is_err());
    }

    #[test]
    fn test_row_set_updates_position() {
        let mut row = Row::parse_line("chr1\t100\tx").unwrap();
        row.set(1, "250".to_string()).unwrap();
        assert_eq!(row.pos(), 250);
        assert!(row.set(1, "bad".to_string()).is_err());
        assert!(row.set(7, "x".to_string()).is_err());
    }

    #[test]
    fn test_row_coercion_errors() {
        let row = Row::parse_line("chr1\t1\t3\tfoo").unwrap();
        assert_eq!(row.int(2).unwrap(), 3);
        assert!(row.int(3).is_err());
        assert!(row.float(3).is_err());
    }

    #[test]
    fn test_column_type_inference() {
        assert_eq!(ColumnType::infer(["1", "2"].into_iter()), ColumnType::Int);
        assert_eq!(
            ColumnType::infer(["1", "9999999999"].into_iter()),
            ColumnType::Long
        );
        assert_eq!(ColumnType::infer(["1", "2.5"].into_iter()), ColumnType::Double);
        assert_eq!(ColumnType::infer(["1", "x"].into_iter()), ColumnType::String);
        assert_eq!(ColumnType::infer(["", ""].into_iter()), ColumnType::Unknown);
    }

    #[test]
    fn test_resolve_columns() {
        let h = header();
        assert_eq!(h.resolve("ref,#4").unwrap(), vec![2, 3]);
        assert_eq!(h.resolve("2-4").unwrap(), vec![1, 2, 3]);
        assert_eq!(h.resolve("4-").unwrap(), vec![3, 4]);
        assert_eq!(h.resolve("Ref-Alt").unwrap(), vec![2, 3]);
        assert_eq!(h.resolve("missing"), Err("missing".to_string()));
        assert_eq!(h.resolve_lenient("missing,Data"), vec![4]);
    }

    #[test]
    fn test_resolve_glob() {
        let h = Header::from_names(&["Chrom", "Pos", "ac_1", "ac_2", "b"]);
        assert_eq!(h.resolve("ac_*").unwrap(), vec![2, 3]);
    }

    #[test]
    fn test_nor_column_numbers() {
        let h = Header::nor(vec!["a".into(), "b".into()]);
        assert_eq!(h.column_index("1"), Some(2));
        assert_eq!(h.column_index("#2"), Some(3));
        assert_eq!(h.visible_names(), &["a", "b"]);
        assert_eq!(h.to_line(), "a\tb");
    }

    #[test]
    fn test_unique_name() {
        let h = header();
        assert_eq!(h.unique_name("Pos"), "Posx");
        assert_eq!(h.unique_name("New"), "New");
    }

    #[test]
    fn test_sanitize_names() {
        let names = sanitize_column_names(vec![
            "from".into(),
            "a b".into(),
            "".into(),
            "X".into(),
            "x".into(),
        ]);
        assert_eq!(names, vec!["fromx", "a_b", "col3", "X", "x_5"]);
    }

    #[test]
    fn test_header_compatibility() {
        let a = header();
        let b = Header::from_names(&["chrom", "pos", "ref", "alt", "data"]);
        let c = Header::from_names(&["Chrom", "Pos"]);
        assert!(a.is_compatible(&b));
        assert!(!a.is_compatible(&c));
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match("a*", "abc"));
        assert!(glob_match("*c", "abc"));
        assert!(glob_match("a?c", "ABC"));
        assert!(!glob_match("a*d", "abc"));
    }
}
