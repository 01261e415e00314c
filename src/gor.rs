//! Streaming GOR/NOR file parser and the engine's error taxonomy.

use crate::genome::ChromOrder;
use crate::row::{ColumnType, Header, Row};
use crate::streaming::buffers::DEFAULT_INPUT_BUFFER;
use crate::streaming::parsing::{parse_key, should_skip_line, split_tabs};
use crate::streaming::RowSource;
use memchr::{memchr, memrchr};
use memmap2::Mmap;
use std::cmp::Ordering;
use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;
use thiserror::Error;

/// Errors raised while planning or streaming a query.
#[derive(Error, Debug)]
pub enum GorError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Parse error in {command}{}: {message}", .option.as_ref().map(|o| format!(" (option {})", o)).unwrap_or_default())]
    Parse {
        command: String,
        option: Option<String>,
        message: String,
    },

    #[error("Data error: {message}")]
    Data { message: String },

    #[error("System error: {message}")]
    System { message: String },

    #[error("Security error: command '{command}' is not in the allowed command list")]
    Security { command: String },

    #[error("Query cancelled")]
    Cancelled,
}

/// Coarse error classes that callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Parsing,
    Data,
    System,
    Security,
}

impl GorError {
    pub fn parse(command: impl Into<String>, message: impl Into<String>) -> Self {
        GorError::Parse {
            command: command.into().to_uppercase(),
            option: None,
            message: message.into(),
        }
    }

    pub fn parse_option(
        command: impl Into<String>,
        option: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        GorError::Parse {
            command: command.into().to_uppercase(),
            option: Some(option.into()),
            message: message.into(),
        }
    }

    pub fn data(message: impl Into<String>) -> Self {
        GorError::Data {
            message: message.into(),
        }
    }

    pub fn system(message: impl Into<String>) -> Self {
        GorError::System {
            message: message.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            GorError::Parse { .. } => ErrorCategory::Parsing,
            GorError::Data { .. } => ErrorCategory::Data,
            GorError::Security { .. } => ErrorCategory::Security,
            GorError::Io(_) | GorError::System { .. } | GorError::Cancelled => {
                ErrorCategory::System
            }
        }
    }

    /// Command name attached to a parse error, if any.
    pub fn command(&self) -> Option<&str> {
        match self {
            GorError::Parse { command, .. } => Some(command),
            GorError::Security { command } => Some(command),
            _ => None,
        }
    }

    /// Option name attached to a parse error, if any.
    pub fn option(&self) -> Option<&str> {
        match self {
            GorError::Parse { option, .. } => option.as_deref(),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, GorError>;

/// Counts and records every data file the engine opens.
#[derive(Debug, Default)]
pub struct IoStats {
    opened: AtomicUsize,
    live: AtomicUsize,
    peak: AtomicUsize,
    paths: parking_lot::Mutex<Vec<PathBuf>>,
}

impl IoStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_open(&self, path: &Path) {
        self.opened.fetch_add(1, AtomicOrdering::Relaxed);
        self.paths.lock().push(path.to_path_buf());
    }

    pub fn files_opened(&self) -> usize {
        self.opened.load(AtomicOrdering::Relaxed)
    }

    pub fn opened_paths(&self) -> Vec<PathBuf> {
        self.paths.lock().clone()
    }

    /// Count `path` as opened and as held until the guard is dropped.
    pub fn track_open(self: &Arc<Self>, path: &Path) -> OpenFileGuard {
        self.record_open(path);
        let live = self.live.fetch_add(1, AtomicOrdering::Relaxed) + 1;
        self.peak.fetch_max(live, AtomicOrdering::Relaxed);
        OpenFileGuard {
            stats: self.clone(),
        }
    }

    /// Data files currently held open.
    pub fn open_files(&self) -> usize {
        self.live.load(AtomicOrdering::Relaxed)
    }

    /// Most data files held open at the same time.
    pub fn peak_open_files(&self) -> usize {
        self.peak.load(AtomicOrdering::Relaxed)
    }
}

/// Keeps a file counted in [`IoStats::open_files`] while it is alive.
#[derive(Debug)]
pub struct OpenFileGuard {
    stats: Arc<IoStats>,
}

impl Drop for OpenFileGuard {
    fn drop(&mut self) {
        self.stats.live.fetch_sub(1, AtomicOrdering::Relaxed);
    }
}

/// Shared settings for opening row files.
#[derive(Debug, Clone)]
pub struct FileOpener {
    pub order: Arc<ChromOrder>,
    pub sample_size: usize,
    pub stats: Arc<IoStats>,
}

impl FileOpener {
    pub fn new(order: Arc<ChromOrder>, sample_size: usize, stats: Arc<IoStats>) -> Self {
        Self {
            order,
            sample_size,
            stats,
        }
    }

    /// Open a GOR file, or a NOR file when `nor` is set.
    pub fn open(&self, path: &Path, nor: bool) -> Result<GorFileSource> {
        let mut source = GorFileSource::open(path, nor, self.order.clone(), self.sample_size)?;
        source.guard = Some(self.stats.track_open(path));
        Ok(source)
    }
}

/// Read the header line of a file without streaming its rows.
pub fn read_header(path: &Path) -> Result<Header> {
    let file = open_data_file(path)?;
    let mut reader = BufReader::new(file);
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            return Err(empty_file_error(path));
        }
        let trimmed = line.trim_end_matches(['\n', '\r']);
        if trimmed.starts_with("##") {
            continue;
        }
        return Ok(Header::parse_line(trimmed));
    }
}

fn open_data_file(path: &Path) -> Result<File> {
    File::open(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => {
            GorError::data(format!("File not found: {}", path.display()))
        }
        _ => GorError::Io(e),
    })
}

fn empty_file_error(path: &Path) -> GorError {
    GorError::data(format!(
        "Empty file {}: a header line is required",
        path.display()
    ))
}

/// Line reader shared by file and process sources.
///
/// Reads the header, samples a prefix of rows to infer column types and
/// checks every row's column count against the header.
pub struct GorReader<R: Read> {
    reader: BufReader<R>,
    header: Header,
    buffered: VecDeque<Row>,
    line: String,
    line_number: usize,
    label: String,
    nor: bool,
    wrap_nor: bool,
    exhausted: bool,
}

impl<R: Read> GorReader<R> {
    /// Create a reader; `nor` reads an unordered table whose rows get the
    /// synthetic ChromNOR/PosNOR key.
    pub fn new(input: R, label: &str, nor: bool, sample_size: usize) -> Result<Self> {
        let mut reader = BufReader::with_capacity(DEFAULT_INPUT_BUFFER, input);
        let mut line = String::new();
        let mut line_number = 0;
        let mut saw_bytes = false;
        let header_line = loop {
            line.clear();
            let n = reader.read_line(&mut line)?;
            if n == 0 {
                break None;
            }
            saw_bytes = true;
            line_number += 1;
            let trimmed = line.trim_end_matches(['\n', '\r']);
            if trimmed.starts_with("##") {
                continue;
            }
            break Some(trimmed.to_string());
        };
        let header_line = match header_line {
            Some(h) => h,
            None if !saw_bytes => {
                return Err(GorError::data(format!(
                    "Empty input {}: a header line is required",
                    label
                )))
            }
            None => {
                return Err(GorError::data(format!(
                    "Input {} has no header line",
                    label
                )))
            }
        };

        let parsed = Header::parse_line(&header_line);
        // Materialized NOR results already carry the synthetic key columns.
        let already_keyed = parsed
            .names()
            .first()
            .map(|n| n.eq_ignore_ascii_case("ChromNOR"))
            .unwrap_or(false);
        let wrap_nor = nor && !already_keyed;
        let header = if wrap_nor {
            Header::nor(parsed.names().to_vec())
        } else if already_keyed {
            parsed.into_nor()
        } else {
            parsed
        };
        if header.len() < 2 {
            return Err(GorError::data(format!(
                "Header of {} must have at least chromosome and position columns",
                label
            )));
        }

        let mut this = Self {
            reader,
            header,
            buffered: VecDeque::new(),
            line,
            line_number,
            label: label.to_string(),
            nor: nor || already_keyed,
            wrap_nor,
            exhausted: false,
        };
        this.sample(sample_size)?;
        Ok(this)
    }

    fn sample(&mut self, sample_size: usize) -> Result<()> {
        while self.buffered.len() < sample_size {
            match self.read_row()? {
                Some(row) => self.buffered.push_back(row),
                None => break,
            }
        }
        let types: Vec<ColumnType> = (0..self.header.len())
            .map(|i| ColumnType::infer(self.buffered.iter().map(|r| r.col(i))))
            .collect();
        self.header.set_types(types);
        Ok(())
    }

    fn read_row(&mut self) -> Result<Option<Row>> {
        if self.exhausted {
            return Ok(None);
        }
        loop {
            self.line.clear();
            let n = self.reader.read_line(&mut self.line)?;
            if n == 0 {
                self.exhausted = true;
                return Ok(None);
            }
            self.line_number += 1;
            let trimmed = self.line.trim_end_matches(['\n', '\r']);
            if should_skip_line(trimmed.as_bytes()) {
                continue;
            }
            let mut cols = split_tabs(trimmed);
            if self.wrap_nor {
                cols.splice(0..0, ["chrN".to_string(), "0".to_string()]);
            }
            if cols.len() != self.header.len() {
                return Err(GorError::data(format!(
                    "Wrong number of columns in {} at line {}: expected {}, got {}",
                    self.label,
                    self.line_number,
                    self.header.len(),
                    cols.len()
                )));
            }
            let row = Row::new(cols).map_err(|e| {
                GorError::data(format!(
                    "{} at line {} of {}",
                    e, self.line_number, self.label
                ))
            })?;
            return Ok(Some(row));
        }
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn is_nor(&self) -> bool {
        self.nor
    }

    pub fn next_row(&mut self) -> Result<Option<Row>> {
        if let Some(row) = self.buffered.pop_front() {
            return Ok(Some(row));
        }
        self.read_row()
    }

    pub fn peek(&mut self) -> Result<Option<&Row>> {
        if self.buffered.is_empty() {
            if let Some(row) = self.read_row()? {
                self.buffered.push_back(row);
            }
        }
        Ok(self.buffered.front())
    }

    fn into_inner(self) -> R {
        self.reader.into_inner()
    }
}

/// Row source over a sorted GOR file.
///
/// `seek` binary-searches the memory-mapped file for the first line whose
/// key is not below the target, so range-restricted scans never read the
/// skipped prefix.
pub struct GorFileSource {
    path: PathBuf,
    reader: Option<GorReader<File>>,
    header: Header,
    data_start: u64,
    order: Arc<ChromOrder>,
    nor: bool,
    guard: Option<OpenFileGuard>,
}

impl GorFileSource {
    pub fn open(
        path: &Path,
        nor: bool,
        order: Arc<ChromOrder>,
        sample_size: usize,
    ) -> Result<Self> {
        let file = open_data_file(path)?;
        let label = path.display().to_string();
        let reader = GorReader::new(file, &label, nor, sample_size).map_err(|e| match e {
            GorError::Data { message } if message.starts_with("Empty input") => {
                empty_file_error(path)
            }
            other => other,
        })?;
        let header = reader.header().clone();
        let nor = reader.is_nor();
        let data_start = header_end_offset(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            reader: Some(reader),
            header,
            data_start,
            order,
            nor,
            guard: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn reader(&mut self) -> Result<&mut GorReader<File>> {
        self.reader
            .as_mut()
            .ok_or_else(|| GorError::system(format!("{} is closed", self.path.display())))
    }

    fn binary_seek(&mut self, chrom: &str, pos: u64) -> Result<()> {
        let file = open_data_file(&self.path)?;
        if file.metadata()?.len() <= self.data_start {
            return Ok(());
        }
        // SAFETY: the mapping is read-only and dropped before returning.
        let map = unsafe { Mmap::map(&file)? };
        let offset = seek_offset(&map, self.data_start as usize, &self.order, chrom, pos);
        drop(map);

        let mut file = file;
        file.seek(SeekFrom::Start(offset as u64))?;
        let label = self.path.display().to_string();
        self.reader = Some(GorReader::headless(file, &label, self.header.clone()));
        Ok(())
    }
}

impl GorReader<File> {
    /// Reader positioned inside the data section of an already parsed file.
    fn headless(file: File, label: &str, header: Header) -> Self {
        Self {
            reader: BufReader::with_capacity(DEFAULT_INPUT_BUFFER, file),
            header,
            buffered: VecDeque::new(),
            line: String::new(),
            line_number: 0,
            label: label.to_string(),
            nor: false,
            wrap_nor: false,
            exhausted: false,
        }
    }
}

impl RowSource for GorFileSource {
    fn header(&self) -> &Header {
        &self.header
    }

    fn has_next(&mut self) -> Result<bool> {
        match self.reader.as_mut() {
            Some(reader) => Ok(reader.peek()?.is_some()),
            None => Ok(false),
        }
    }

    fn next_row(&mut self) -> Result<Row> {
        let path = self.path.display().to_string();
        self.reader()?
            .next_row()?
            .ok_or_else(|| GorError::system(format!("Read past end of {}", path)))
    }

    fn seek(&mut self, chrom: &str, pos: u64) -> Result<()> {
        if self.nor {
            return Ok(());
        }
        let order = self.order.clone();
        if let Some(head) = self.reader()?.peek()? {
            if order.cmp_key(head.chrom(), head.pos(), chrom, pos) != Ordering::Less {
                return Ok(());
            }
        } else {
            return Ok(());
        }
        self.binary_seek(chrom, pos)
    }

    fn close(&mut self) {
        self.reader = None;
        self.guard = None;
    }
}

/// Byte offset of the first data line, skipping `##` lines and the header.
fn header_end_offset(path: &Path) -> Result<u64> {
    let mut reader = BufReader::new(open_data_file(path)?);
    let mut offset = 0u64;
    let mut line = Vec::new();
    loop {
        line.clear();
        let n = reader.read_until(b'\n', &mut line)?;
        if n == 0 {
            return Ok(offset);
        }
        offset += n as u64;
        if !line.starts_with(b"##") {
            return Ok(offset);
        }
    }
}

/// Binary search for the first line at or after `(chrom, pos)`.
///
/// `data_start` must be a line start. Lines that cannot be parsed compare
/// as not-less so the search never skips past them.
pub fn seek_offset(
    map: &[u8],
    data_start: usize,
    order: &ChromOrder,
    chrom: &str,
    pos: u64,
) -> usize {
    let mut lo = data_start.min(map.len());
    let mut hi = map.len();
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        let start = match memrchr(b'\n', &map[lo..mid]) {
            Some(i) => lo + i + 1,
            None => lo,
        };
        let end = memchr(b'\n', &map[start..])
            .map(|i| start + i)
            .unwrap_or(map.len());
        match parse_key(&map[start..end]) {
            Some((c, p)) if order.cmp_key(c, p, chrom, pos) == Ordering::Less => lo = end + 1,
            _ => hi = start,
        }
    }
    lo.min(map.len())
}

/// Row source reading the standard output of an external program.
///
/// Closing the source kills the child so a blocked read returns promptly.
pub struct ProcessSource {
    program: String,
    child: Child,
    reader: Option<GorReader<ChildStdout>>,
    header: Header,
    order: Arc<ChromOrder>,
}

impl ProcessSource {
    /// Spawn `argv` if its program is in `allowed`.
    pub fn spawn(
        argv: &[String],
        allowed: &[String],
        nor: bool,
        opener: &FileOpener,
    ) -> Result<Self> {
        let program = argv
            .first()
            .ok_or_else(|| GorError::parse("cmd", "Missing program to run"))?
            .clone();
        let base = Path::new(&program)
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .unwrap_or_else(|| program.clone());
        if !allowed.iter().any(|a| a == &program || a == &base) {
            return Err(GorError::Security { command: program });
        }
        let mut child = Command::new(&program)
            .args(&argv[1..])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| GorError::system(format!("Failed to start {}: {}", program, e)))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| GorError::system(format!("No output stream from {}", program)))?;
        let reader = match GorReader::new(stdout, &program, nor, opener.sample_size) {
            Ok(r) => r,
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(e);
            }
        };
        let header = reader.header().clone();
        Ok(Self {
            program,
            child,
            reader: Some(reader),
            header,
            order: opener.order.clone(),
        })
    }
}

impl RowSource for ProcessSource {
    fn header(&self) -> &Header {
        &self.header
    }

    fn has_next(&mut self) -> Result<bool> {
        match self.reader.as_mut() {
            Some(reader) => Ok(reader.peek()?.is_some()),
            None => Ok(false),
        }
    }

    fn next_row(&mut self) -> Result<Row> {
        let program = self.program.clone();
        self.reader
            .as_mut()
            .ok_or_else(|| GorError::system(format!("{} is closed", program)))?
            .next_row()?
            .ok_or_else(|| GorError::system(format!("Read past end of {}", program)))
    }

    fn seek(&mut self, chrom: &str, pos: u64) -> Result<()> {
        let order = self.order.clone();
        let Some(reader) = self.reader.as_mut() else {
            return Ok(());
        };
        while let Some(head) = reader.peek()? {
            if order.cmp_key(head.chrom(), head.pos(), chrom, pos) != Ordering::Less {
                break;
            }
            reader.next_row()?;
        }
        Ok(())
    }

    fn close(&mut self) {
        if let Some(reader) = self.reader.take() {
            let _ = self.child.kill();
            drop(reader.into_inner());
            let _ = self.child.wait();
        }
    }
}

impl Drop for ProcessSource {
    fn drop(&mut self) {
        self.close();
    }
}
