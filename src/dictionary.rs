//! Dictionary-backed virtual tables (`.gord` / `.nord`).
//!
//! A dictionary maps one logical table to many physical files, each tagged
//! with an alias and optionally a covered range. Lines look like
//!
//! ```text
//! ## SOURCE_COLUMN=PN
//! #Chrom	Pos	Ref	Alt
//! part1.gor|bucket1.gor	PN1	chr1	0	chr1	5000
//! part2.gor|D|bucket1.gor	PN2
//! ```
//!
//! Selection by tag and range happens on the parsed index; entry files are
//! only opened when the merge frontier reaches the start of their range.

use crate::genome::{ChromOrder, GenomicKey, KeyRange};
use crate::gor::{read_header, FileOpener, GorError, Result};
use crate::query::cache::FileCache;
use crate::row::{ColumnType, Header, Row};
use crate::streaming::{BoxedSource, MergeQueue, RangeSource, RowSource};
use log::{debug, info};
use rustc_hash::{FxHashMap, FxHashSet};
use std::cmp::Ordering;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// File name of the dictionary inside a dictionary folder.
pub const FOLDER_DICTIONARY_NAME: &str = "thedict.gord";

/// Dictionaries cached by path and modification time.
pub type DictionaryCache = FileCache<Dictionary>;

/// One line of a dictionary.
#[derive(Debug, Clone, PartialEq)]
pub struct DictionaryEntry {
    pub path: PathBuf,
    pub alias: String,
    /// Tags the entry answers to; the alias when none are listed.
    pub tags: Vec<String>,
    /// Inclusive first and last key covered by the file.
    pub range: Option<(GenomicKey, GenomicKey)>,
    pub bucket: Option<PathBuf>,
    pub deleted: bool,
}

impl DictionaryEntry {
    /// Parse one entry line; relative paths resolve against `root`.
    pub fn parse(line: &str, root: &Path) -> Result<DictionaryEntry> {
        let columns: Vec<&str> = line.split('\t').collect();
        let file_info: Vec<&str> = columns[0].split('|').collect();
        let flags = if file_info.len() > 2 { Some(file_info[1]) } else { None };
        let bucket = match file_info.len() {
            n if n > 2 => Some(file_info[2]),
            2 => Some(file_info[1]),
            _ => None,
        };
        let deleted = flags.is_some_and(|f| f.to_ascii_lowercase().contains('d'));
        let alias = columns.get(1).map(|s| s.trim().to_string()).unwrap_or_default();

        let mut range = None;
        let mut tags = Vec::new();
        if columns.len() > 2 {
            if columns.len() < 6 {
                return Err(GorError::data(format!(
                    "Dictionary line '{}' needs 4 columns for a range specification",
                    line
                )));
            }
            let pos = |s: &str| {
                s.trim().parse::<u64>().map_err(|_| {
                    GorError::data(format!("Invalid position '{}' in dictionary line '{}'", s, line))
                })
            };
            if !columns[2].is_empty() {
                range = Some((
                    GenomicKey::new(columns[2], pos(columns[3])?),
                    GenomicKey::new(columns[4], pos(columns[5])?),
                ));
            }
            if columns.len() > 6 {
                tags = if columns[6].contains(',') {
                    columns[6].split(',').map(|t| t.trim().to_string()).collect()
                } else {
                    columns[6..].iter().map(|t| t.trim().to_string()).collect()
                };
                tags.retain(|t| !t.is_empty());
            }
        }
        if tags.is_empty() && !alias.is_empty() {
            tags.push(alias.clone());
        }
        Ok(DictionaryEntry {
            path: resolve(root, file_info[0]),
            alias,
            tags,
            range,
            bucket: bucket.filter(|b| !b.is_empty()).map(|b| resolve(root, b)),
            deleted,
        })
    }

    /// Dictionary line for this entry with paths relative to `root` when
    /// possible.
    pub fn to_line(&self, root: &Path) -> String {
        let mut line = relative(root, &self.path);
        if let Some(bucket) = &self.bucket {
            if self.deleted {
                line.push_str("|D");
            }
            line.push('|');
            line.push_str(&relative(root, bucket));
        }
        line.push('\t');
        line.push_str(&self.alias);
        if let Some((first, last)) = &self.range {
            line.push_str(&format!(
                "\t{}\t{}\t{}\t{}",
                first.chrom, first.pos, last.chrom, last.pos
            ));
            if self.tags.len() > 1 || self.tags.first() != Some(&self.alias) {
                line.push('\t');
                line.push_str(&self.tags.join(","));
            }
        }
        line
    }
}

fn resolve(root: &Path, path: &str) -> PathBuf {
    let p = Path::new(path.trim());
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        root.join(p)
    }
}

fn relative(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .to_string()
}

/// A parsed dictionary with its tag index.
#[derive(Debug, Clone, Default)]
pub struct Dictionary {
    path: PathBuf,
    entries: Vec<DictionaryEntry>,
    tag_index: FxHashMap<String, Vec<usize>>,
    header: Option<Header>,
    source_column: Option<String>,
    nor: bool,
}

impl Dictionary {
    /// Load a dictionary file or dictionary folder.
    ///
    /// A missing dictionary yields an empty dictionary.
    pub fn load(path: &Path) -> Result<Dictionary> {
        if path.is_dir() {
            return Self::from_folder(path);
        }
        let nor = path
            .extension()
            .is_some_and(|e| e.eq_ignore_ascii_case("nord"));
        let text = match fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Dictionary {} does not exist, treating as empty", path.display());
                String::new()
            }
            Err(e) => return Err(e.into()),
        };
        let root = path.parent().unwrap_or(Path::new("."));
        let mut dict = Self::parse(&text, root)?;
        dict.path = path.to_path_buf();
        dict.nor = nor;
        info!(
            "Loaded dictionary {} with {} entries",
            path.display(),
            dict.entries.len()
        );
        Ok(dict)
    }

    /// Folder written by `write -d`: its `thedict.gord`, or every `*.gor`
    /// part in name order tagged by file stem.
    pub fn from_folder(dir: &Path) -> Result<Dictionary> {
        let inner = dir.join(FOLDER_DICTIONARY_NAME);
        if inner.exists() {
            return Self::load(&inner);
        }
        let mut parts: Vec<PathBuf> = fs::read_dir(dir)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|e| e == "gor"))
            .collect();
        parts.sort();
        let mut dict = Dictionary {
            path: dir.to_path_buf(),
            ..Default::default()
        };
        for part in parts {
            let alias = part
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default();
            dict.push(DictionaryEntry {
                path: part,
                tags: vec![alias.clone()],
                alias,
                range: None,
                bucket: None,
                deleted: false,
            });
        }
        Ok(dict)
    }

    /// Parse dictionary text; relative entry paths resolve against `root`.
    pub fn parse(text: &str, root: &Path) -> Result<Dictionary> {
        let mut dict = Dictionary::default();
        for line in text.lines() {
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }
            if let Some(meta) = line.strip_prefix("##") {
                if let Some((key, value)) = meta.split_once('=') {
                    if key.trim().eq_ignore_ascii_case("SOURCE_COLUMN") {
                        dict.source_column = Some(value.trim().to_string());
                    }
                }
                continue;
            }
            if line.starts_with('#') {
                dict.header = Some(Header::parse_line(line));
                continue;
            }
            dict.push(DictionaryEntry::parse(line, root)?);
        }
        Ok(dict)
    }

    fn push(&mut self, entry: DictionaryEntry) {
        let idx = self.entries.len();
        for tag in &entry.tags {
            self.tag_index.entry(tag.clone()).or_default().push(idx);
        }
        self.entries.push(entry);
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries(&self) -> &[DictionaryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn header(&self) -> Option<&Header> {
        self.header.as_ref()
    }

    pub fn source_column(&self) -> Option<&str> {
        self.source_column.as_deref()
    }

    pub fn is_nor(&self) -> bool {
        self.nor
    }

    /// All tags in dictionary order.
    pub fn tags(&self) -> Vec<String> {
        let mut seen = FxHashSet::default();
        let mut out = Vec::new();
        for entry in &self.entries {
            for tag in &entry.tags {
                if seen.insert(tag.clone()) {
                    out.push(tag.clone());
                }
            }
        }
        out
    }

    /// Entries answering to any of `tags`, in dictionary order.
    ///
    /// An unknown tag is a data error unless `silent` is set.
    pub fn entries_for_tags(&self, tags: &[String], silent: bool) -> Result<Vec<usize>> {
        let mut selected = FxHashSet::default();
        for tag in tags {
            match self.tag_index.get(tag) {
                Some(indices) => selected.extend(indices.iter().copied()),
                None if silent => {}
                None => {
                    return Err(GorError::data(format!(
                        "Invalid Source Filter: tag '{}' not found in dictionary {}",
                        tag,
                        self.path.display()
                    )))
                }
            }
        }
        let mut out: Vec<usize> = selected.into_iter().collect();
        out.sort_unstable();
        Ok(out)
    }

    /// Resolve a selection into the parts to read.
    ///
    /// Entries outside `range` are dropped. When the requested tags cover at
    /// least `threshold` of a bucket's tags, or a selected entry only lives in
    /// its bucket (deleted flag), the bucket file is read instead.
    pub fn select(
        &self,
        tags: Option<&[String]>,
        range: &KeyRange,
        order: &ChromOrder,
        threshold: f64,
        silent: bool,
    ) -> Result<Vec<DictionaryPart>> {
        let candidates = match tags {
            Some(tags) => self.entries_for_tags(tags, silent)?,
            None => (0..self.entries.len())
                .filter(|&i| !self.entries[i].deleted || self.entries[i].bucket.is_some())
                .collect(),
        };
        let requested: Option<FxHashSet<&str>> =
            tags.map(|t| t.iter().map(String::as_str).collect());

        let mut by_bucket: FxHashMap<&Path, Vec<usize>> = FxHashMap::default();
        let mut parts = Vec::new();
        for idx in candidates {
            let entry = &self.entries[idx];
            if let Some((first, last)) = &entry.range {
                if !range.intersects(order, first, last) {
                    continue;
                }
            }
            match &entry.bucket {
                Some(bucket) => by_bucket.entry(bucket.as_path()).or_default().push(idx),
                None if entry.deleted => {}
                None => parts.push(DictionaryPart::file(entry, idx)),
            }
        }

        let mut buckets: Vec<(&Path, Vec<usize>)> = by_bucket.into_iter().collect();
        buckets.sort_by_key(|(_, indices)| indices[0]);
        for (bucket, indices) in buckets {
            let bucket_tags: FxHashSet<&str> = self
                .entries
                .iter()
                .filter(|e| e.bucket.as_deref() == Some(bucket))
                .flat_map(|e| e.tags.iter().map(String::as_str))
                .collect();
            let wanted: FxHashSet<String> = indices
                .iter()
                .flat_map(|&i| self.entries[i].tags.iter())
                .filter(|t| requested.as_ref().map_or(true, |r| r.contains(t.as_str())))
                .cloned()
                .collect();
            let any_deleted = indices.iter().any(|&i| self.entries[i].deleted);
            let coverage = wanted.len() as f64 / bucket_tags.len().max(1) as f64;
            if any_deleted || coverage >= threshold {
                debug!(
                    "Reading bucket {} for {} of {} tags",
                    bucket.display(),
                    wanted.len(),
                    bucket_tags.len()
                );
                let ranges: Vec<_> = indices.iter().map(|&i| &self.entries[i].range).collect();
                let range = if ranges.iter().any(|r| r.is_none()) {
                    None
                } else {
                    let first = ranges
                        .iter()
                        .filter_map(|r| r.as_ref().map(|(f, _)| f))
                        .min_by(|a, b| a.cmp_with(b, order))
                        .cloned();
                    let last = ranges
                        .iter()
                        .filter_map(|r| r.as_ref().map(|(_, l)| l))
                        .max_by(|a, b| a.cmp_with(b, order))
                        .cloned();
                    first.zip(last)
                };
                parts.push(DictionaryPart {
                    path: bucket.to_path_buf(),
                    label: String::new(),
                    range,
                    bucket_tags: Some(wanted),
                    first_entry: indices[0],
                });
            } else {
                parts.extend(
                    indices
                        .iter()
                        .map(|&i| DictionaryPart::file(&self.entries[i], i)),
                );
            }
        }

        parts.sort_by(|a, b| match (&a.range, &b.range) {
            (None, None) => a.first_entry.cmp(&b.first_entry),
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some((x, _)), Some((y, _))) => x
                .cmp_with(y, order)
                .then(a.first_entry.cmp(&b.first_entry)),
        });
        Ok(parts)
    }
}

/// A file to read for a dictionary query.
#[derive(Debug, Clone, PartialEq)]
pub struct DictionaryPart {
    pub path: PathBuf,
    /// Source column value for rows of a plain entry file.
    pub label: String,
    pub range: Option<(GenomicKey, GenomicKey)>,
    /// For bucket files: the tags whose rows are kept.
    pub bucket_tags: Option<FxHashSet<String>>,
    first_entry: usize,
}

impl DictionaryPart {
    fn file(entry: &DictionaryEntry, idx: usize) -> Self {
        Self {
            path: entry.path.clone(),
            label: entry.alias.clone(),
            range: entry.range.clone(),
            bucket_tags: None,
            first_entry: idx,
        }
    }

    pub fn is_bucket(&self) -> bool {
        self.bucket_tags.is_some()
    }
}

/// Options of a dictionary read.
#[derive(Debug, Clone, Default)]
pub struct DictionaryOptions {
    pub tags: Option<Vec<String>>,
    pub range: KeyRange,
    /// Name of the source column to append, if any.
    pub source_column: Option<String>,
    pub silent_tags: bool,
    pub fallback_header: Option<Header>,
    pub bucket_threshold: f64,
}

/// Rows of a bucket file restricted to the requested tags.
struct BucketFilter {
    inner: BoxedSource,
    tags: FxHashSet<String>,
    keep_column: bool,
    header: Header,
    peeked: Option<Row>,
}

impl BucketFilter {
    fn new(inner: BoxedSource, tags: FxHashSet<String>, keep_column: bool) -> Self {
        let full = inner.header();
        let header = if keep_column {
            full.clone()
        } else {
            full.project(&(0..full.len().saturating_sub(1)).collect::<Vec<_>>())
        };
        Self {
            inner,
            tags,
            keep_column,
            header,
            peeked: None,
        }
    }

    fn fill(&mut self) -> Result<()> {
        while self.peeked.is_none() {
            let Some(row) = self.inner.next_opt()? else {
                return Ok(());
            };
            let tag_col = row.len() - 1;
            if !self.tags.contains(row.col(tag_col)) {
                continue;
            }
            self.peeked = Some(if self.keep_column {
                row
            } else {
                row.project(&(0..tag_col).collect::<Vec<_>>())
            });
        }
        Ok(())
    }
}

impl RowSource for BucketFilter {
    fn header(&self) -> &Header {
        &self.header
    }

    fn has_next(&mut self) -> Result<bool> {
        self.fill()?;
        Ok(self.peeked.is_some())
    }

    fn next_row(&mut self) -> Result<Row> {
        self.fill()?;
        self.peeked
            .take()
            .ok_or_else(|| GorError::system("next_row called on an exhausted bucket"))
    }

    fn seek(&mut self, chrom: &str, pos: u64) -> Result<()> {
        self.peeked = None;
        self.inner.seek(chrom, pos)
    }

    fn close(&mut self) {
        self.peeked = None;
        self.inner.close();
    }
}

/// Lazily merged rows of the selected dictionary parts.
pub struct DictionarySource {
    dictionary: PathBuf,
    pending: VecDeque<DictionaryPart>,
    open: Vec<(BoxedSource, String)>,
    queue: MergeQueue,
    header: Header,
    opener: FileOpener,
    range: KeyRange,
    add_source: bool,
    nor: bool,
    seek_floor: Option<GenomicKey>,
    closed: bool,
}

impl DictionarySource {
    pub fn new(dict: &Dictionary, options: &DictionaryOptions, opener: FileOpener) -> Result<Self> {
        let parts = dict.select(
            options.tags.as_deref(),
            &options.range,
            &opener.order,
            options.bucket_threshold,
            options.silent_tags,
        )?;
        debug!(
            "Dictionary {} selected {} part(s)",
            dict.path().display(),
            parts.len()
        );
        let mut header = match dict.header() {
            Some(h) => h.clone(),
            None => Self::header_from_entries(dict, options)?,
        };
        if dict.is_nor() && !header.is_nor() {
            header = Header::nor(header.names().to_vec());
        }
        if let Some(name) = &options.source_column {
            let name = header.unique_name(name);
            header.push(name, ColumnType::String);
        }
        Ok(Self {
            dictionary: dict.path().to_path_buf(),
            pending: parts.into(),
            open: Vec::new(),
            queue: MergeQueue::new(opener.order.clone()),
            header,
            opener,
            range: options.range.clone(),
            add_source: options.source_column.is_some(),
            nor: dict.is_nor(),
            seek_floor: None,
            closed: false,
        })
    }

    /// Header of the first tag-selected entry whose file is readable.
    fn header_from_entries(dict: &Dictionary, options: &DictionaryOptions) -> Result<Header> {
        let indices: Vec<usize> = match &options.tags {
            Some(tags) => dict.entries_for_tags(tags, true)?,
            None => (0..dict.len()).collect(),
        };
        for idx in indices {
            let entry = &dict.entries()[idx];
            if !entry.deleted {
                if let Ok(h) = read_header(&entry.path) {
                    return Ok(h);
                }
            }
            if let Some(bucket) = &entry.bucket {
                if let Ok(h) = read_header(bucket) {
                    return Ok(h.project(&(0..h.len().saturating_sub(1)).collect::<Vec<_>>()));
                }
            }
        }
        Ok(options
            .fallback_header
            .clone()
            .unwrap_or_else(|| Header::from_names(&["Chrom", "Pos"])))
    }

    fn base_len(&self) -> usize {
        self.header.len() - usize::from(self.add_source)
    }

    fn open_part(&mut self, part: DictionaryPart) -> Result<()> {
        let file = self.opener.open(&part.path, self.nor)?;
        let file_header = file.header().clone();
        let expected = self.base_len() + usize::from(part.is_bucket());
        let names_match = file_header
            .names()
            .iter()
            .take(self.base_len())
            .zip(self.header.names())
            .all(|(a, b)| a.eq_ignore_ascii_case(b));
        if file_header.len() != expected || !names_match {
            return Err(GorError::data(format!(
                "Header of {} [{}] does not match dictionary {} [{}]",
                part.path.display(),
                file_header.names().join(", "),
                self.dictionary.display(),
                self.header.names()[..self.base_len()].join(", ")
            )));
        }
        let mut source: BoxedSource = Box::new(file);
        if let Some(tags) = part.bucket_tags.clone() {
            source = Box::new(BucketFilter::new(source, tags, self.add_source));
        }
        if !self.nor {
            let mut range = self.range.clone();
            if let Some(floor) = &self.seek_floor {
                range = range.intersect(&KeyRange::new(Some(floor.clone()), None), &self.opener.order);
            }
            if !range.is_all() {
                source = Box::new(RangeSource::new(source, range, self.opener.order.clone()));
            }
        }
        let idx = self.open.len();
        let label = if part.is_bucket() { String::new() } else { part.label };
        self.open.push((source, label));
        if let Some(row) = self.open[idx].0.next_opt()? {
            self.queue.push(row, idx);
        }
        Ok(())
    }

    /// Open every pending part that may hold the next row.
    fn advance_frontier(&mut self) -> Result<()> {
        loop {
            let Some(part) = self.pending.front() else {
                return Ok(());
            };
            let due = match self.queue.peek() {
                None => true,
                Some(_) if self.nor => false,
                Some((head, _)) => match &part.range {
                    None => true,
                    Some((first, _)) => {
                        self.opener
                            .order
                            .cmp_key(&first.chrom, first.pos, head.chrom(), head.pos())
                            != Ordering::Greater
                    }
                },
            };
            if !due {
                return Ok(());
            }
            let Some(part) = self.pending.pop_front() else {
                return Ok(());
            };
            if let (Some(floor), Some((_, last))) = (&self.seek_floor, &part.range) {
                if last.cmp_with(floor, &self.opener.order) == Ordering::Less {
                    continue;
                }
            }
            self.open_part(part)?;
        }
    }

    fn fail<T>(&mut self, err: GorError) -> Result<T> {
        self.close();
        Err(err)
    }
}

impl RowSource for DictionarySource {
    fn header(&self) -> &Header {
        &self.header
    }

    fn has_next(&mut self) -> Result<bool> {
        if self.closed {
            return Ok(false);
        }
        if let Err(e) = self.advance_frontier() {
            return self.fail(e);
        }
        Ok(!self.queue.is_empty())
    }

    fn next_row(&mut self) -> Result<Row> {
        if let Err(e) = self.advance_frontier() {
            return self.fail(e);
        }
        let Some((mut row, idx)) = self.queue.pop() else {
            return Err(GorError::system("next_row called on an exhausted dictionary"));
        };
        match self.open[idx].0.next_opt() {
            Ok(Some(next)) => self.queue.push(next, idx),
            Ok(None) => self.open[idx].0.close(),
            Err(e) => return self.fail(e),
        }
        if self.add_source && row.len() < self.header.len() {
            row.push(self.open[idx].1.clone());
        }
        Ok(row)
    }

    fn seek(&mut self, chrom: &str, pos: u64) -> Result<()> {
        if self.nor || self.closed {
            return Ok(());
        }
        let order = self.opener.order.clone();
        self.seek_floor = Some(GenomicKey::new(chrom, pos));
        for (row, idx) in self.queue.drain() {
            if order.cmp_key(row.chrom(), row.pos(), chrom, pos) != Ordering::Less {
                self.queue.push(row, idx);
                continue;
            }
            let source = &mut self.open[idx].0;
            source.seek(chrom, pos)?;
            if let Some(next) = source.next_opt()? {
                self.queue.push(next, idx);
            }
        }
        Ok(())
    }

    fn close(&mut self) {
        self.closed = true;
        self.queue.clear();
        self.pending.clear();
        for (source, _) in self.open.iter_mut() {
            source.close();
        }
    }
}

/// Load a dictionary through the session cache.
pub fn load_cached(cache: &DictionaryCache, path: &Path) -> Result<Arc<Dictionary>> {
    let key = if path.is_dir() && path.join(FOLDER_DICTIONARY_NAME).exists() {
        path.join(FOLDER_DICTIONARY_NAME)
    } else {
        path.to_path_buf()
    };
    cache.get_or_load(&key, Dictionary::load)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gor::IoStats;
    use crate::streaming::collect_rows;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    fn opener(stats: Arc<IoStats>) -> FileOpener {
        FileOpener::new(Arc::new(ChromOrder::default()), 10, stats)
    }

    fn options(tags: Option<&[&str]>) -> DictionaryOptions {
        DictionaryOptions {
            tags: tags.map(|t| t.iter().map(|s| s.to_string()).collect()),
            bucket_threshold: 0.4,
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_entry() {
        let root = Path::new("/data");
        let e = DictionaryEntry::parse("a.gor|D|b.gor\tPN1\tchr1\t0\tchr2\t100\tx,y", root).unwrap();
        assert_eq!(e.path, PathBuf::from("/data/a.gor"));
        assert_eq!(e.bucket, Some(PathBuf::from("/data/b.gor")));
        assert!(e.deleted);
        assert_eq!(e.tags, vec!["x", "y"]);
        assert_eq!(e.range.as_ref().unwrap().1, GenomicKey::new("chr2", 100));

        let plain = DictionaryEntry::parse("/abs/c.gor\tPN2", root).unwrap();
        assert_eq!(plain.path, PathBuf::from("/abs/c.gor"));
        assert_eq!(plain.tags, vec!["PN2"]);
        assert!(plain.bucket.is_none());

        assert!(DictionaryEntry::parse("a.gor\tPN\tchr1\t0", root).is_err());
    }

    #[test]
    fn test_entry_line_roundtrip() {
        let root = Path::new("/data");
        let line = "a.gor|D|b.gor\tPN1\tchr1\t0\tchr2\t100";
        let e = DictionaryEntry::parse(line, root).unwrap();
        assert_eq!(e.to_line(root), line);
    }

    #[test]
    fn test_missing_dictionary_is_empty() {
        let dir = TempDir::new().unwrap();
        let dict = Dictionary::load(&dir.path().join("none.gord")).unwrap();
        assert!(dict.is_empty());
    }

    #[test]
    fn test_metadata_and_header() {
        let dict = Dictionary::parse(
            "## SOURCE_COLUMN=PN\n#Chrom\tPos\tV\na.gor\tA\n",
            Path::new("/d"),
        )
        .unwrap();
        assert_eq!(dict.source_column(), Some("PN"));
        assert_eq!(dict.header().unwrap().names(), &["Chrom", "Pos", "V"]);
        assert_eq!(dict.tags(), vec!["A"]);
    }

    #[test]
    fn test_unknown_tag() {
        let dict = Dictionary::parse("a.gor\tA\n", Path::new("/d")).unwrap();
        let err = dict
            .entries_for_tags(&["B".to_string()], false)
            .unwrap_err();
        assert!(err.to_string().contains("Invalid Source Filter"));
        assert!(dict.entries_for_tags(&["B".to_string()], true).unwrap().is_empty());
    }

    #[test]
    fn test_select_by_range() {
        let dict = Dictionary::parse(
            "a.gor\tA\tchr1\t0\tchr1\t100\nb.gor\tB\tchr2\t0\tchr2\t100\n",
            Path::new("/d"),
        )
        .unwrap();
        let order = ChromOrder::default();
        let parts = dict
            .select(None, &KeyRange::closed("chr2", 5, 10), &order, 0.4, false)
            .unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].label, "B");
    }

    #[test]
    fn test_bucket_substitution() {
        let text = "a.gor|bk.gor\tA\nb.gor|bk.gor\tB\nc.gor|bk.gor\tC\nd.gor|bk.gor\tD\nx.gor\tX\n";
        let dict = Dictionary::parse(text, Path::new("/d")).unwrap();
        let order = ChromOrder::default();
        let few = dict
            .select(Some(&["A".to_string()]), &KeyRange::all(), &order, 0.4, false)
            .unwrap();
        assert_eq!(few.len(), 1);
        assert!(!few[0].is_bucket());

        let tags: Vec<String> = ["A", "B"].iter().map(|s| s.to_string()).collect();
        let many = dict
            .select(Some(&tags), &KeyRange::all(), &order, 0.4, false)
            .unwrap();
        assert_eq!(many.len(), 1);
        assert!(many[0].is_bucket());
        assert_eq!(many[0].path, PathBuf::from("/d/bk.gor"));
    }

    #[test]
    fn test_deleted_entry_reads_bucket() {
        let text = "a.gor|D|bk.gor\tA\nb.gor|bk.gor\tB\nc.gor|bk.gor\tC\n";
        let dict = Dictionary::parse(text, Path::new("/d")).unwrap();
        let parts = dict
            .select(
                Some(&["A".to_string()]),
                &KeyRange::all(),
                &ChromOrder::default(),
                0.9,
                false,
            )
            .unwrap();
        assert_eq!(parts.len(), 1);
        assert!(parts[0].is_bucket());
    }

    #[test]
    fn test_dictionary_source_merges_in_order() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a.gor", "Chrom\tPos\tV\nchr1\t1\ta\nchr1\t10\ta\n");
        write(dir.path(), "b.gor", "Chrom\tPos\tV\nchr1\t5\tb\n");
        let dict_path = write(dir.path(), "t.gord", "a.gor\tA\nb.gor\tB\n");
        let dict = Dictionary::load(&dict_path).unwrap();
        let mut opts = options(None);
        opts.source_column = Some("PN".to_string());
        let mut src =
            DictionarySource::new(&dict, &opts, opener(Arc::new(IoStats::new()))).unwrap();
        assert_eq!(src.header().names(), &["Chrom", "Pos", "V", "PN"]);
        let rows = collect_rows(&mut src).unwrap();
        let got: Vec<(u64, String)> = rows.iter().map(|r| (r.pos(), r.col(3).to_string())).collect();
        assert_eq!(
            got,
            vec![(1, "A".into()), (5, "B".into()), (10, "A".into())]
        );
    }

    #[test]
    fn test_tag_filter_does_not_open_other_files() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a.gor", "Chrom\tPos\nchr1\t1\n");
        write(dir.path(), "b.gor", "Chrom\tPos\nchr1\t2\n");
        let dict_path = write(dir.path(), "t.gord", "a.gor\tA\nb.gor\tB\n");
        let dict = Dictionary::load(&dict_path).unwrap();
        let stats = Arc::new(IoStats::new());
        let mut src =
            DictionarySource::new(&dict, &options(Some(&["B"])), opener(stats.clone())).unwrap();
        let rows = collect_rows(&mut src).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(stats.opened_paths(), vec![dir.path().join("b.gor")]);
    }

    #[test]
    fn test_lazy_open_by_range() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a.gor", "Chrom\tPos\nchr1\t1\nchr1\t2\n");
        write(dir.path(), "b.gor", "Chrom\tPos\nchr2\t1\n");
        let dict_path = write(
            dir.path(),
            "t.gord",
            "a.gor\tA\tchr1\t0\tchr1\t2\nb.gor\tB\tchr2\t0\tchr2\t1\n",
        );
        let dict = Dictionary::load(&dict_path).unwrap();
        let stats = Arc::new(IoStats::new());
        let mut src = DictionarySource::new(&dict, &options(None), opener(stats.clone())).unwrap();
        src.next_row().unwrap();
        assert_eq!(stats.files_opened(), 1);
        assert_eq!(collect_rows(&mut src).unwrap().len(), 2);
        assert_eq!(stats.files_opened(), 2);
    }

    #[test]
    fn test_missing_entry_file_fails_when_needed() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a.gor", "Chrom\tPos\nchr1\t1\n");
        let dict_path = write(dir.path(), "t.gord", "a.gor\tA\nmissing.gor\tB\n");
        let dict = Dictionary::load(&dict_path).unwrap();
        let mut src =
            DictionarySource::new(&dict, &options(None), opener(Arc::new(IoStats::new()))).unwrap();
        let err = collect_rows(&mut src).unwrap_err();
        assert_eq!(err.category(), crate::gor::ErrorCategory::Data);
    }

    #[test]
    fn test_header_mismatch() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a.gor", "Chrom\tPos\tV\nchr1\t1\tx\n");
        write(dir.path(), "b.gor", "Chrom\tPos\tW\nchr1\t2\ty\n");
        let dict_path = write(dir.path(), "t.gord", "a.gor\tA\nb.gor\tB\n");
        let dict = Dictionary::load(&dict_path).unwrap();
        let mut src =
            DictionarySource::new(&dict, &options(None), opener(Arc::new(IoStats::new()))).unwrap();
        let err = collect_rows(&mut src).unwrap_err();
        assert!(err.to_string().contains("does not match dictionary"));
    }

    #[test]
    fn test_bucket_rows_filtered_by_tag() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "bk.gor",
            "Chrom\tPos\tV\tPN\nchr1\t1\tx\tA\nchr1\t2\ty\tB\nchr1\t3\tz\tC\n",
        );
        let dict_path = write(
            dir.path(),
            "t.gord",
            "a.gor|bk.gor\tA\nb.gor|bk.gor\tB\nc.gor|bk.gor\tC\n",
        );
        let dict = Dictionary::load(&dict_path).unwrap();
        let mut src = DictionarySource::new(
            &dict,
            &options(Some(&["A", "C"])),
            opener(Arc::new(IoStats::new())),
        )
        .unwrap();
        assert_eq!(src.header().names(), &["Chrom", "Pos", "V"]);
        let rows = collect_rows(&mut src).unwrap();
        let values: Vec<&str> = rows.iter().map(|r| r.col(2)).collect();
        assert_eq!(values, vec!["x", "z"]);
        assert_eq!(rows[0].len(), 3);
    }

    #[test]
    fn test_implicit_folder_dictionary() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "part_1.gor", "Chrom\tPos\nchr1\t1\n");
        write(dir.path(), "part_2.gor", "Chrom\tPos\nchr2\t1\n");
        let dict = Dictionary::load(dir.path()).unwrap();
        assert_eq!(dict.len(), 2);
        assert_eq!(dict.entries()[0].alias, "part_1");
    }
}
