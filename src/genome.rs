//! Chromosome sizes, chromosome ordering and genomic keys.
//!
//! Parses .genome files (tab-delimited: chrom\tsize). Without a genome file
//! chromosomes sort lexicographically (chr1, chr10, chr11, ..., chr2, ...),
//! which is the order GOR files are written in.

use rustc_hash::FxHashMap;
use std::cmp::Ordering;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::gor::{GorError, Result};

/// Size used for chromosomes that the build does not know.
pub const UNKNOWN_CHROM_SIZE: u64 = 1_000_000_000;

/// Rounded chromosome sizes of the default human build.
const DEFAULT_BUILD: &[(&str, u64)] = &[
    ("chr1", 250_000_000),
    ("chr2", 250_000_000),
    ("chr3", 200_000_000),
    ("chr4", 200_000_000),
    ("chr5", 200_000_000),
    ("chr6", 200_000_000),
    ("chr7", 200_000_000),
    ("chr8", 150_000_000),
    ("chr9", 150_000_000),
    ("chr10", 150_000_000),
    ("chr11", 150_000_000),
    ("chr12", 150_000_000),
    ("chr13", 150_000_000),
    ("chr14", 150_000_000),
    ("chr15", 150_000_000),
    ("chr16", 100_000_000),
    ("chr17", 100_000_000),
    ("chr18", 100_000_000),
    ("chr19", 100_000_000),
    ("chr20", 100_000_000),
    ("chr21", 100_000_000),
    ("chr22", 100_000_000),
    ("chrM", 20_000),
    ("chrX", 200_000_000),
    ("chrY", 100_000_000),
];

/// Genome information containing chromosome sizes.
/// Preserves chromosome order from input file.
#[derive(Debug, Clone, Default)]
pub struct Genome {
    sizes: FxHashMap<String, u64>,
    order: Vec<String>,
}

impl Genome {
    /// Create an empty genome.
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in build used when no genome file is configured.
    pub fn default_build() -> Self {
        let mut genome = Self::new();
        for (chrom, size) in DEFAULT_BUILD {
            genome.insert(chrom.to_string(), *size);
        }
        genome
    }

    /// Load genome from a file.
    /// Format: tab-delimited with chrom\tsize per line
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            GorError::system(format!("Cannot open genome file {}: {}", path.display(), e))
        })?;
        let reader = BufReader::new(file);
        let mut genome = Self::new();

        for (line_num, line_result) in reader.lines().enumerate() {
            let line = line_result?;
            let line = line.trim();

            // Skip empty lines and comments
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() < 2 {
                return Err(GorError::data(format!(
                    "Genome file line {} requires two columns: chrom and size",
                    line_num + 1
                )));
            }

            let size: u64 = fields[1].parse().map_err(|_| {
                GorError::data(format!(
                    "Invalid chromosome size at line {}: {}",
                    line_num + 1,
                    fields[1]
                ))
            })?;
            genome.insert(fields[0].to_string(), size);
        }

        Ok(genome)
    }

    /// Get the size of a chromosome.
    #[inline]
    pub fn chrom_size(&self, chrom: &str) -> Option<u64> {
        self.sizes.get(chrom).copied()
    }

    /// Size of a chromosome, falling back to [`UNKNOWN_CHROM_SIZE`].
    #[inline]
    pub fn size_or_default(&self, chrom: &str) -> u64 {
        self.chrom_size(chrom).unwrap_or(UNKNOWN_CHROM_SIZE)
    }

    /// Get all chromosome names in file order.
    pub fn chromosomes(&self) -> impl Iterator<Item = &String> {
        self.order.iter()
    }

    /// Chromosome names sorted by `order`.
    pub fn sorted_chromosomes(&self, order: &ChromOrder) -> Vec<String> {
        let mut chroms = self.order.clone();
        chroms.sort_by(|a, b| order.cmp_chrom(a, b));
        chroms
    }

    /// Get number of chromosomes.
    pub fn len(&self) -> usize {
        self.sizes.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.sizes.is_empty()
    }

    /// Insert a chromosome size (appends to order if new).
    pub fn insert(&mut self, chrom: String, size: u64) {
        if !self.sizes.contains_key(&chrom) {
            self.order.push(chrom.clone());
        }
        self.sizes.insert(chrom, size);
    }
}

/// Ordering of chromosome names.
#[derive(Debug, Clone, Default)]
pub enum ChromOrder {
    /// Plain byte-wise string order.
    #[default]
    Lexicographic,
    /// Rank from a genome file; unknown names sort after known ones.
    Ranked(FxHashMap<String, usize>),
}

impl ChromOrder {
    pub fn from_genome(genome: &Genome) -> Self {
        ChromOrder::Ranked(
            genome
                .chromosomes()
                .enumerate()
                .map(|(i, c)| (c.clone(), i))
                .collect(),
        )
    }

    #[inline]
    pub fn cmp_chrom(&self, a: &str, b: &str) -> Ordering {
        if a == b {
            return Ordering::Equal;
        }
        match self {
            ChromOrder::Lexicographic => a.cmp(b),
            ChromOrder::Ranked(ranks) => match (ranks.get(a), ranks.get(b)) {
                (Some(x), Some(y)) => x.cmp(y),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => a.cmp(b),
            },
        }
    }

    #[inline]
    pub fn cmp_key(&self, a_chrom: &str, a_pos: u64, b_chrom: &str, b_pos: u64) -> Ordering {
        self.cmp_chrom(a_chrom, b_chrom).then(a_pos.cmp(&b_pos))
    }
}

/// A point in the (chromosome, position) domain.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GenomicKey {
    pub chrom: String,
    pub pos: u64,
}

impl GenomicKey {
    pub fn new(chrom: impl Into<String>, pos: u64) -> Self {
        Self {
            chrom: chrom.into(),
            pos,
        }
    }

    pub fn cmp_with(&self, other: &GenomicKey, order: &ChromOrder) -> Ordering {
        order.cmp_key(&self.chrom, self.pos, &other.chrom, other.pos)
    }
}

/// Half-open key interval `[start, end)`; `None` bounds are unbounded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyRange {
    pub start: Option<GenomicKey>,
    pub end: Option<GenomicKey>,
}

impl KeyRange {
    /// The whole domain.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn new(start: Option<GenomicKey>, end: Option<GenomicKey>) -> Self {
        Self { start, end }
    }

    /// All positions `from..=to` on one chromosome.
    pub fn closed(chrom: &str, from: u64, to: u64) -> Self {
        Self {
            start: Some(GenomicKey::new(chrom, from)),
            end: Some(GenomicKey::new(chrom, to.saturating_add(1))),
        }
    }

    pub fn is_all(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }

    /// Key is at or after the start bound.
    #[inline]
    pub fn after_start(&self, order: &ChromOrder, chrom: &str, pos: u64) -> bool {
        match &self.start {
            Some(s) => order.cmp_key(chrom, pos, &s.chrom, s.pos) != Ordering::Less,
            None => true,
        }
    }

    /// Key is before the end bound.
    #[inline]
    pub fn before_end(&self, order: &ChromOrder, chrom: &str, pos: u64) -> bool {
        match &self.end {
            Some(e) => order.cmp_key(chrom, pos, &e.chrom, e.pos) == Ordering::Less,
            None => true,
        }
    }

    #[inline]
    pub fn contains(&self, order: &ChromOrder, chrom: &str, pos: u64) -> bool {
        self.after_start(order, chrom, pos) && self.before_end(order, chrom, pos)
    }

    /// Whether the inclusive key span `[from, to]` intersects this range.
    pub fn intersects(&self, order: &ChromOrder, from: &GenomicKey, to: &GenomicKey) -> bool {
        let starts_before_end = self.before_end(order, &from.chrom, from.pos);
        let ends_after_start = self.after_start(order, &to.chrom, to.pos);
        starts_before_end && ends_after_start
    }

    /// Intersection of two ranges.
    pub fn intersect(&self, other: &KeyRange, order: &ChromOrder) -> KeyRange {
        let start = match (&self.start, &other.start) {
            (Some(a), Some(b)) => Some(if a.cmp_with(b, order) == Ordering::Less {
                b.clone()
            } else {
                a.clone()
            }),
            (a, b) => a.clone().or_else(|| b.clone()),
        };
        let end = match (&self.end, &other.end) {
            (Some(a), Some(b)) => Some(if a.cmp_with(b, order) == Ordering::Less {
                a.clone()
            } else {
                b.clone()
            }),
            (a, b) => a.clone().or_else(|| b.clone()),
        };
        KeyRange { start, end }
    }

    /// Parse `chr`, `chr:pos`, `chr:from-` or `chr:from-to`; positions are
    /// inclusive.
    pub fn parse(text: &str) -> Result<KeyRange> {
        let text = text.trim();
        let invalid = || GorError::parse("range", format!("Invalid range value '{}'", text));
        let (chrom, rest) = match text.split_once(':') {
            Some((c, r)) => (c, Some(r)),
            None => (text, None),
        };
        if chrom.is_empty() {
            return Err(invalid());
        }
        let Some(rest) = rest else {
            return Ok(KeyRange::new(
                Some(GenomicKey::new(chrom, 0)),
                Some(GenomicKey::new(chrom, u64::MAX)),
            ));
        };
        let (from, to) = match rest.split_once('-') {
            Some((f, t)) => (f, Some(t)),
            None => (rest, None),
        };
        let from: u64 = parse_position(from).ok_or_else(invalid)?;
        match to {
            Some(t) if !t.is_empty() => {
                let to = parse_position(t).ok_or_else(invalid)?;
                if to < from {
                    return Err(invalid());
                }
                Ok(KeyRange::closed(chrom, from, to))
            }
            _ => Ok(KeyRange::new(
                Some(GenomicKey::new(chrom, from)),
                Some(GenomicKey::new(chrom, u64::MAX)),
            )),
        }
    }
}

fn parse_position(text: &str) -> Option<u64> {
    let cleaned: String = text.chars().filter(|c| *c != ',').collect();
    cleaned.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_genome_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "chr1\t1000000").unwrap();
        writeln!(file, "chr2\t500000").unwrap();
        writeln!(file, "# comment line").unwrap();
        writeln!(file, "chr3\t250000").unwrap();

        let genome = Genome::from_file(file.path()).unwrap();

        assert_eq!(genome.chrom_size("chr1"), Some(1000000));
        assert_eq!(genome.chrom_size("chr3"), Some(250000));
        assert_eq!(genome.chrom_size("chr4"), None);
        assert_eq!(genome.size_or_default("chr4"), UNKNOWN_CHROM_SIZE);
        assert_eq!(genome.len(), 3);
    }

    #[test]
    fn test_default_build_sizes() {
        let genome = Genome::default_build();
        assert_eq!(genome.chrom_size("chr1"), Some(250_000_000));
        assert_eq!(genome.chrom_size("chr22"), Some(100_000_000));
        assert_eq!(genome.chrom_size("chrM"), Some(20_000));
    }

    #[test]
    fn test_lexicographic_order() {
        let genome = Genome::default_build();
        let sorted = genome.sorted_chromosomes(&ChromOrder::Lexicographic);
        assert_eq!(&sorted[0..4], &["chr1", "chr10", "chr11", "chr12"]);
        assert_eq!(sorted.last().map(String::as_str), Some("chrY"));
    }

    #[test]
    fn test_ranked_order() {
        let mut genome = Genome::new();
        genome.insert("chr2".into(), 10);
        genome.insert("chr10".into(), 10);
        let order = ChromOrder::from_genome(&genome);
        assert_eq!(order.cmp_chrom("chr2", "chr10"), Ordering::Less);
        assert_eq!(order.cmp_chrom("chrZ", "chr10"), Ordering::Greater);
        assert_eq!(order.cmp_key("chr2", 5, "chr2", 3), Ordering::Greater);
    }

    #[test]
    fn test_parse_range() {
        let r = KeyRange::parse("chr1:100-200").unwrap();
        let order = ChromOrder::default();
        assert!(r.contains(&order, "chr1", 100));
        assert!(r.contains(&order, "chr1", 200));
        assert!(!r.contains(&order, "chr1", 201));
        assert!(!r.contains(&order, "chr2", 150));

        let whole = KeyRange::parse("chr2").unwrap();
        assert!(whole.contains(&order, "chr2", 5_000_000));
        assert!(!whole.contains(&order, "chr3", 0));

        assert!(KeyRange::parse("chr1:-1-10").is_err());
        assert!(KeyRange::parse("chr1:20-10").is_err());
        assert!(KeyRange::parse(":1-2").is_err());
    }

    #[test]
    fn test_range_intersects() {
        let order = ChromOrder::default();
        let r = KeyRange::closed("chr1", 100, 200);
        assert!(r.intersects(&order, &GenomicKey::new("chr1", 50), &GenomicKey::new("chr1", 100)));
        assert!(!r.intersects(&order, &GenomicKey::new("chr1", 201), &GenomicKey::new("chr1", 300)));
        assert!(r.intersects(&order, &GenomicKey::new("chr0", 1), &GenomicKey::new("chr2", 1)));
    }

    #[test]
    fn test_range_intersect() {
        let order = ChromOrder::default();
        let a = KeyRange::closed("chr1", 0, 100);
        let b = KeyRange::new(Some(GenomicKey::new("chr1", 50)), None);
        let c = a.intersect(&b, &order);
        assert_eq!(c.start, Some(GenomicKey::new("chr1", 50)));
        assert_eq!(c.end, Some(GenomicKey::new("chr1", 101)));
    }
}
