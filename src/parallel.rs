//! Partitioned execution for `pgor`, `parallel` and `partgor`.
//!
//! `pgor` splits the key domain into disjoint, contiguous partitions and runs
//! one copy of the pipeline per partition on a bounded rayon pool. Results
//! flow back through bounded channels and are read partition by partition;
//! because partitions are ordered and disjoint, that concatenation is the
//! ordered merge of the partial streams.
//!
//! `parallel` and `partgor` sub-queries may overlap, so their results are
//! materialized to temporary files and merged with a K-way merge.

use crate::genome::{ChromOrder, Genome, GenomicKey, KeyRange};
use crate::gor::{FileOpener, GorError, Result};
use crate::row::{Header, Row};
use crate::streaming::buffers::{PARTITION_CHANNEL_CAPACITY, PART_OUTPUT_BUFFER};
use crate::streaming::{BoxedSource, GorWriter, MergeSource, OrderValidator, RowSource};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use log::{debug, error, info};
use rayon::prelude::*;
use regex::Regex;
use std::cmp::Ordering;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;

/// Rows sent per channel message.
const BATCH_SIZE: usize = 1024;

/// One slice of the key domain.
#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    pub chrom: String,
    pub bp_start: u64,
    pub bp_stop: u64,
    /// Keys this partition is responsible for.
    pub range: KeyRange,
}

impl Partition {
    pub fn tag(&self) -> String {
        format!("{}_{}_{}", self.chrom, self.bp_start, self.bp_stop)
    }

    /// Replace the partition macros in a query template.
    pub fn substitute(&self, template: &str) -> String {
        let window = format!(
            "(chrom = '{}' and pos >= {} and pos < {})",
            self.chrom, self.bp_start, self.bp_stop
        );
        template
            .replace("#{CHROM}", &self.chrom)
            .replace("#{BPSTART}", &self.bp_start.to_string())
            .replace("#{BPSTOP}", &self.bp_stop.to_string())
            .replace("#{RANGETAG}", &self.tag())
            .replace("##WHERE_SPLIT_WINDOW##", &window)
    }
}

/// Partitions covering the whole domain.
///
/// Without `parts` every chromosome of the build is one partition;
/// otherwise chromosomes are cut into bins of about `total / parts` bases.
/// The first partition is unbounded below and the last unbounded above, so
/// rows on chromosomes outside the build are still covered exactly once.
pub fn genome_partitions(genome: &Genome, order: &ChromOrder, parts: Option<usize>) -> Vec<Partition> {
    let chroms = genome.sorted_chromosomes(order);
    let total: u64 = chroms.iter().map(|c| genome.size_or_default(c)).sum();
    let bin = parts
        .filter(|&n| n > 0)
        .map(|n| total.div_ceil(n as u64).max(1));
    let mut pieces = Vec::new();
    for chrom in chroms {
        let size = genome.size_or_default(&chrom);
        let step = bin.unwrap_or(size).max(1);
        let mut start = 0;
        loop {
            let stop = (start + step).min(size);
            pieces.push((chrom.clone(), start, stop));
            if stop >= size {
                break;
            }
            start = stop;
        }
    }
    let starts: Vec<GenomicKey> = pieces
        .iter()
        .map(|(c, s, _)| GenomicKey::new(c.as_str(), *s))
        .collect();
    pieces
        .into_iter()
        .enumerate()
        .map(|(i, (chrom, bp_start, bp_stop))| {
            let start = if i == 0 { None } else { Some(starts[i].clone()) };
            let end = starts.get(i + 1).cloned();
            Partition {
                chrom,
                bp_start,
                bp_stop,
                range: KeyRange::new(start, end),
            }
        })
        .collect()
}

/// Partitions from segment rows `chrom bpStart bpStop`; each covers keys
/// from `bpStart` up to, not including, `bpStop`.
pub fn segment_partitions(rows: &[Row]) -> Result<Vec<Partition>> {
    rows.iter()
        .map(|row| {
            let stop: u64 = row.col(2).parse().map_err(|_| {
                GorError::data(format!(
                    "Split segment {}:{} has an invalid stop '{}'",
                    row.chrom(),
                    row.pos(),
                    row.col(2)
                ))
            })?;
            Ok(Partition {
                chrom: row.chrom().to_string(),
                bp_start: row.pos(),
                bp_stop: stop,
                range: KeyRange::new(
                    Some(GenomicKey::new(row.chrom(), row.pos())),
                    Some(GenomicKey::new(row.chrom(), stop)),
                ),
            })
        })
        .collect()
}

/// Fail before execution when a fan-out exceeds its limits.
pub fn check_job_count(jobs: usize, limit: Option<usize>, ceiling: usize, command: &str) -> Result<()> {
    if let Some(limit) = limit {
        if jobs > limit {
            return Err(GorError::parse_option(
                command,
                "-limit",
                format!("{} jobs exceed the limit of {}", jobs, limit),
            ));
        }
    }
    if jobs > ceiling {
        return Err(GorError::parse(
            command,
            format!("{} jobs exceed the maximum of {} parallel jobs", jobs, ceiling),
        ));
    }
    Ok(())
}

fn column_macro() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"#\{col:([^}]+)\}").expect("valid pattern"))
}

/// Replace `#{col:Name}` with the value of column `Name` of a parts row.
pub fn substitute_columns(template: &str, header: &Header, row: &Row, command: &str) -> Result<String> {
    let mut missing = None;
    let out = column_macro().replace_all(template, |cap: &regex::Captures| {
        match header.column_index(cap[1].trim()) {
            Some(i) => row.col(i).to_string(),
            None => {
                missing.get_or_insert_with(|| cap[1].to_string());
                String::new()
            }
        }
    });
    match missing {
        Some(name) => Err(GorError::parse(
            command,
            format!("Column {} in #{{col:{}}} not found in parts", name, name),
        )),
        None => Ok(out.into_owned()),
    }
}

/// Replace `#{tags}` with a comma list and `#{tags:q}` with a quoted one.
pub fn substitute_tags(template: &str, tags: &[String]) -> String {
    let quoted: Vec<String> = tags.iter().map(|t| format!("'{}'", t)).collect();
    template
        .replace("#{tags:q}", &quoted.join(","))
        .replace("#{tags}", &tags.join(","))
}

enum Message {
    Rows(Vec<Row>),
    Failed(GorError),
}

/// Builds a job's source on the worker that runs it, so inputs are only
/// open while a worker holds them.
pub type SourceFactory = Box<dyn FnOnce() -> Result<BoxedSource> + Send>;

/// Factory for a source that is already open.
pub fn ready_source(source: BoxedSource) -> SourceFactory {
    Box::new(move || Ok(source))
}

fn build_checked(build: SourceFactory, header: &Header) -> Result<BoxedSource> {
    let mut source = build()?;
    if !source.header().is_compatible(header) {
        let names = source.header().names().join(", ");
        source.close();
        return Err(GorError::data(format!(
            "Partition header [{}] differs from [{}]",
            names,
            header.names().join(", ")
        )));
    }
    Ok(source)
}

fn drain_partition(
    build: SourceFactory,
    header: &Header,
    sender: crossbeam_channel::Sender<Message>,
    cancel: &AtomicBool,
) {
    if cancel.load(AtomicOrdering::Relaxed) {
        return;
    }
    let mut source = match build_checked(build, header) {
        Ok(source) => source,
        Err(e) => {
            let _ = sender.send(Message::Failed(e));
            return;
        }
    };
    let mut batch = Vec::with_capacity(BATCH_SIZE);
    loop {
        if cancel.load(AtomicOrdering::Relaxed) {
            break;
        }
        match source.next_opt() {
            Ok(Some(row)) => {
                batch.push(row);
                if batch.len() < BATCH_SIZE {
                    continue;
                }
                let full = std::mem::replace(&mut batch, Vec::with_capacity(BATCH_SIZE));
                if sender.send(Message::Rows(full)).is_err() {
                    break;
                }
            }
            Ok(None) => {
                if !batch.is_empty() {
                    let _ = sender.send(Message::Rows(batch));
                }
                break;
            }
            Err(e) => {
                let _ = sender.send(Message::Failed(e));
                break;
            }
        }
    }
    source.close();
}

/// Results of partition pipelines running on a worker pool, read in
/// partition order.
pub struct PartitionedSource {
    header: Header,
    pending: VecDeque<(KeyRange, Receiver<Message>)>,
    ready: VecDeque<Row>,
    cancel: Arc<AtomicBool>,
    done: Receiver<()>,
    running: usize,
    timeout: Duration,
    order: Arc<ChromOrder>,
    validator: OrderValidator,
    floor: Option<GenomicKey>,
    closed: bool,
    _pool: Arc<rayon::ThreadPool>,
}

impl PartitionedSource {
    /// Start one worker job per `(range, factory)` pair on `workers` threads.
    ///
    /// Each job builds its source when a worker picks it up; every source
    /// must produce `header`.
    pub fn spawn(
        header: Header,
        partitions: Vec<(KeyRange, SourceFactory)>,
        workers: usize,
        timeout: Duration,
        order: Arc<ChromOrder>,
    ) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .thread_name(|i| format!("gorpipe-part-{}", i))
            .build()
            .map_err(|e| GorError::system(format!("Cannot start worker pool: {}", e)))?;
        let pool = Arc::new(pool);
        let cancel = Arc::new(AtomicBool::new(false));
        let (done_tx, done) = crossbeam_channel::unbounded();
        let running = partitions.len();
        info!("Running {} partition(s) on {} worker(s)", running, workers.max(1));

        let mut pending = VecDeque::with_capacity(partitions.len());
        for (range, build) in partitions {
            let (tx, rx) = bounded(PARTITION_CHANNEL_CAPACITY / BATCH_SIZE + 1);
            let cancel = cancel.clone();
            let done_tx = done_tx.clone();
            let header = header.clone();
            pool.spawn_fifo(move || {
                drain_partition(build, &header, tx, &cancel);
                let _ = done_tx.send(());
            });
            pending.push_back((range, rx));
        }
        Ok(Self {
            header,
            pending,
            ready: VecDeque::new(),
            cancel,
            done,
            running,
            timeout,
            validator: OrderValidator::new(order.clone(), "Partitioned result"),
            order,
            floor: None,
            closed: false,
            _pool: pool,
        })
    }

    fn below_floor(&self, row: &Row) -> bool {
        self.floor.as_ref().is_some_and(|f| {
            self.order.cmp_key(row.chrom(), row.pos(), &f.chrom, f.pos) == Ordering::Less
        })
    }

    fn fill(&mut self) -> Result<()> {
        while self.ready.is_empty() && !self.closed {
            let Some((_, receiver)) = self.pending.front() else {
                self.shutdown()?;
                return Ok(());
            };
            match receiver.recv() {
                Ok(Message::Rows(rows)) => {
                    for row in rows {
                        if self.below_floor(&row) {
                            continue;
                        }
                        if !self.header.is_nor() {
                            self.validator.validate_row(&row)?;
                        }
                        self.ready.push_back(row);
                    }
                }
                Ok(Message::Failed(e)) => return Err(e),
                Err(_) => {
                    self.pending.pop_front();
                }
            }
        }
        Ok(())
    }

    /// Stop every worker and wait for them, failing when a worker does not
    /// finish within the close timeout.
    pub fn shutdown(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.cancel.store(true, AtomicOrdering::Relaxed);
        self.pending.clear();
        self.ready.clear();
        let deadline = Instant::now() + self.timeout;
        while self.running > 0 {
            let left = deadline.saturating_duration_since(Instant::now());
            match self.done.recv_timeout(left) {
                Ok(()) => self.running -= 1,
                Err(RecvTimeoutError::Timeout) => {
                    return Err(GorError::system(format!(
                        "{} partition worker(s) did not stop within {:?}",
                        self.running, self.timeout
                    )))
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        debug!("All partition workers stopped");
        Ok(())
    }

    fn fail<T>(&mut self, err: GorError) -> Result<T> {
        self.close();
        Err(err)
    }
}

impl RowSource for PartitionedSource {
    fn header(&self) -> &Header {
        &self.header
    }

    fn has_next(&mut self) -> Result<bool> {
        if let Err(e) = self.fill() {
            return self.fail(e);
        }
        Ok(!self.ready.is_empty())
    }

    fn next_row(&mut self) -> Result<Row> {
        if !self.has_next()? {
            return Err(GorError::system("next_row called on exhausted partitions"));
        }
        self.ready
            .pop_front()
            .ok_or_else(|| GorError::system("next_row called on exhausted partitions"))
    }

    fn seek(&mut self, chrom: &str, pos: u64) -> Result<()> {
        let target = GenomicKey::new(chrom, pos);
        while let Some((range, _)) = self.pending.front() {
            let before = range
                .end
                .as_ref()
                .is_some_and(|end| end.cmp_with(&target, &self.order) != Ordering::Greater);
            if !before || self.pending.len() == 1 {
                break;
            }
            self.pending.pop_front();
        }
        while self
            .ready
            .front()
            .is_some_and(|r| self.order.cmp_key(r.chrom(), r.pos(), chrom, pos) == Ordering::Less)
        {
            self.ready.pop_front();
        }
        self.floor = Some(target);
        Ok(())
    }

    fn close(&mut self) {
        if let Err(e) = self.shutdown() {
            error!("{}", e);
        }
    }
}

impl Drop for PartitionedSource {
    fn drop(&mut self) {
        self.close();
    }
}

/// Sources read one after another; used for unordered (NOR) results.
pub struct ConcatSource {
    header: Header,
    sources: VecDeque<BoxedSource>,
}

impl ConcatSource {
    pub fn new(header: Header, sources: Vec<BoxedSource>) -> Self {
        Self {
            header,
            sources: sources.into(),
        }
    }
}

impl RowSource for ConcatSource {
    fn header(&self) -> &Header {
        &self.header
    }

    fn has_next(&mut self) -> Result<bool> {
        while let Some(front) = self.sources.front_mut() {
            if front.has_next()? {
                return Ok(true);
            }
            front.close();
            self.sources.pop_front();
        }
        Ok(false)
    }

    fn next_row(&mut self) -> Result<Row> {
        if !self.has_next()? {
            return Err(GorError::system("next_row called on an exhausted source"));
        }
        match self.sources.front_mut() {
            Some(front) => front.next_row(),
            None => Err(GorError::system("next_row called on an exhausted source")),
        }
    }

    fn seek(&mut self, _chrom: &str, _pos: u64) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) {
        for source in self.sources.iter_mut() {
            source.close();
        }
        self.sources.clear();
    }
}

/// Merged results of materialized sub-queries; owns their temporary files.
pub struct MaterializedSource {
    inner: BoxedSource,
    _files: Vec<NamedTempFile>,
}

impl RowSource for MaterializedSource {
    fn header(&self) -> &Header {
        self.inner.header()
    }

    fn has_next(&mut self) -> Result<bool> {
        self.inner.has_next()
    }

    fn next_row(&mut self) -> Result<Row> {
        self.inner.next_row()
    }

    fn seek(&mut self, chrom: &str, pos: u64) -> Result<()> {
        self.inner.seek(chrom, pos)
    }

    fn close(&mut self) {
        self.inner.close();
    }
}

fn write_temp(build: SourceFactory, header: &Header, dir: &Path) -> Result<NamedTempFile> {
    let mut source = build_checked(build, header)?;
    let result = (|| {
        let file = NamedTempFile::new_in(dir)?;
        let mut writer = GorWriter::with_capacity(PART_OUTPUT_BUFFER, file).keep_nor_key();
        writer.write_header(source.header())?;
        while let Some(row) = source.next_opt()? {
            writer.write_row(&row)?;
        }
        writer.into_inner()
    })();
    source.close();
    result
}

/// Run every job to a temporary file in `dir` on `workers` threads, then
/// merge the files; unordered results are concatenated in job order.
///
/// Jobs build their sources on the worker, and every source must produce
/// `header`.
pub fn materialize_and_merge(
    header: Header,
    jobs: Vec<SourceFactory>,
    dir: &Path,
    workers: usize,
    opener: &FileOpener,
) -> Result<MaterializedSource> {
    if jobs.is_empty() {
        return Err(GorError::system("No sub-queries to run"));
    }
    let nor = header.is_nor();
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .thread_name(|i| format!("gorpipe-sub-{}", i))
        .build()
        .map_err(|e| GorError::system(format!("Cannot start worker pool: {}", e)))?;
    info!("Materializing {} sub-queries", jobs.len());
    let files: Vec<NamedTempFile> = pool.install(|| {
        jobs.into_par_iter()
            .map(|build| write_temp(build, &header, dir))
            .collect::<Result<Vec<_>>>()
    })?;
    let mut opened: Vec<BoxedSource> = Vec::with_capacity(files.len());
    for file in &files {
        opened.push(Box::new(opener.open(file.path(), nor)?));
    }
    let inner: BoxedSource = if nor {
        Box::new(ConcatSource::new(header, opened))
    } else {
        Box::new(MergeSource::new(opened, opener.order.clone())?)
    };
    Ok(MaterializedSource {
        inner,
        _files: files,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gor::IoStats;
    use crate::streaming::{collect_rows, RangeSource, VecSource};
    use tempfile::TempDir;

    fn small_genome() -> Genome {
        let mut g = Genome::new();
        g.insert("chr1".into(), 100);
        g.insert("chr2".into(), 50);
        g
    }

    fn rows(spec: &[(&str, u64)]) -> Vec<Row> {
        spec.iter()
            .map(|(c, p)| Row::from_parts(c, *p, Vec::<String>::new()))
            .collect()
    }

    fn source(spec: &[(&str, u64)]) -> BoxedSource {
        Box::new(VecSource::new(
            Header::from_names(&["Chrom", "Pos"]),
            rows(spec),
            Arc::new(ChromOrder::default()),
        ))
    }

    #[test]
    fn test_genome_partitions_cover_domain() {
        let order = ChromOrder::default();
        let parts = genome_partitions(&small_genome(), &order, None);
        assert_eq!(parts.len(), 2);
        assert!(parts[0].range.start.is_none());
        assert_eq!(parts[0].range.end, Some(GenomicKey::new("chr2", 0)));
        assert!(parts[1].range.end.is_none());

        let parts = genome_partitions(&small_genome(), &order, Some(3));
        assert_eq!(
            parts.iter().map(|p| p.tag()).collect::<Vec<_>>(),
            ["chr1_0_50", "chr1_50_100", "chr2_0_50"]
        );
        for key in [("chr0", 5), ("chr1", 49), ("chr1", 50), ("chr3", 1)] {
            let hits = parts
                .iter()
                .filter(|p| p.range.contains(&order, key.0, key.1))
                .count();
            assert_eq!(hits, 1, "{:?}", key);
        }
    }

    #[test]
    fn test_partition_macros() {
        let p = &genome_partitions(&small_genome(), &ChromOrder::default(), Some(3))[1];
        assert_eq!(
            p.substitute("gor x.gor -p #{CHROM}:#{BPSTART}-#{BPSTOP} | calc t '#{RANGETAG}'"),
            "gor x.gor -p chr1:50-100 | calc t 'chr1_50_100'"
        );
        assert!(p.substitute("where ##WHERE_SPLIT_WINDOW##").contains("pos >= 50"));
    }

    #[test]
    fn test_job_limits() {
        assert!(check_job_count(3, Some(5), 10, "pgor").is_ok());
        let err = check_job_count(6, Some(5), 10, "pgor").err().unwrap();
        assert_eq!(err.option(), Some("-limit"));
        assert!(check_job_count(11, None, 10, "parallel").is_err());
    }

    #[test]
    fn test_column_and_tag_macros() {
        let header = Header::nor(vec!["Name".into()]);
        let row = Row::nor(vec!["abc".into()]);
        assert_eq!(
            substitute_columns("gor #{col:Name}.gor", &header, &row, "parallel").unwrap(),
            "gor abc.gor"
        );
        assert!(substitute_columns("#{col:Missing}", &header, &row, "parallel").is_err());
        let tags = vec!["a".to_string(), "b".to_string()];
        assert_eq!(substitute_tags("-f #{tags} in (#{tags:q})", &tags), "-f a,b in ('a','b')");
    }

    #[test]
    fn test_partitioned_source_matches_serial() {
        let order = Arc::new(ChromOrder::default());
        let all = [("chr1", 1), ("chr1", 60), ("chr1", 99), ("chr2", 3), ("chr2", 40)];
        let parts = genome_partitions(&small_genome(), &order, Some(3));
        let jobs: Vec<(KeyRange, SourceFactory)> = parts
            .iter()
            .map(|p| {
                let range = p.range.clone();
                let order = order.clone();
                let build: SourceFactory = Box::new(move || {
                    Ok(Box::new(RangeSource::new(source(&all), range, order)) as BoxedSource)
                });
                (p.range.clone(), build)
            })
            .collect();
        let mut merged = PartitionedSource::spawn(
            Header::from_names(&["Chrom", "Pos"]),
            jobs,
            2,
            Duration::from_secs(5),
            order,
        )
        .unwrap();
        let out = collect_rows(&mut merged).unwrap();
        assert_eq!(out, rows(&all));
    }

    #[test]
    fn test_early_close_stops_workers() {
        let order = Arc::new(ChromOrder::default());
        let many: Vec<(&str, u64)> = (0..50_000).map(|p| ("chr1", p)).collect();
        let jobs = vec![
            (KeyRange::all(), ready_source(source(&many))),
            (KeyRange::all(), ready_source(source(&many))),
        ];
        let mut merged = PartitionedSource::spawn(
            Header::from_names(&["Chrom", "Pos"]),
            jobs,
            2,
            Duration::from_secs(5),
            order,
        )
        .unwrap();
        assert!(merged.has_next().unwrap());
        merged.next_row().unwrap();
        let started = Instant::now();
        assert!(merged.shutdown().is_ok());
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!merged.has_next().unwrap());
    }

    #[test]
    fn test_failing_job_stops_the_rest() {
        let order = Arc::new(ChromOrder::default());
        let many: Vec<(&str, u64)> = (0..50_000).map(|p| ("chr2", p)).collect();
        let failing: SourceFactory = Box::new(|| Err(GorError::data("bad partition")));
        let jobs = vec![
            (KeyRange::all(), ready_source(source(&[("chr1", 1)]))),
            (KeyRange::all(), failing),
            (KeyRange::all(), ready_source(source(&many))),
        ];
        let mut merged = PartitionedSource::spawn(
            Header::from_names(&["Chrom", "Pos"]),
            jobs,
            2,
            Duration::from_secs(5),
            order,
        )
        .unwrap();
        let started = Instant::now();
        let err = collect_rows(&mut merged).unwrap_err();
        assert_eq!(err.category(), crate::gor::ErrorCategory::Data);
        assert_eq!(merged.running, 0);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_mismatched_header_fails() {
        let order = Arc::new(ChromOrder::default());
        let other: BoxedSource = Box::new(VecSource::new(
            Header::from_names(&["Chrom", "Pos", "Extra"]),
            Vec::new(),
            order.clone(),
        ));
        let jobs = vec![
            (KeyRange::all(), ready_source(source(&[("chr1", 1)]))),
            (KeyRange::all(), ready_source(other)),
        ];
        let mut merged = PartitionedSource::spawn(
            Header::from_names(&["Chrom", "Pos"]),
            jobs,
            1,
            Duration::from_secs(5),
            order,
        )
        .unwrap();
        let err = collect_rows(&mut merged).unwrap_err();
        assert_eq!(err.category(), crate::gor::ErrorCategory::Data);
    }

    #[test]
    fn test_materialize_and_merge() {
        let dir = TempDir::new().unwrap();
        let opener = FileOpener::new(Arc::new(ChromOrder::default()), 10, Arc::new(IoStats::new()));
        let jobs = vec![
            ready_source(source(&[("chr1", 5), ("chr2", 1)])),
            ready_source(source(&[("chr1", 2), ("chr1", 9)])),
        ];
        let header = Header::from_names(&["Chrom", "Pos"]);
        let mut merged = materialize_and_merge(header, jobs, dir.path(), 2, &opener).unwrap();
        let out = collect_rows(&mut merged).unwrap();
        assert_eq!(out, rows(&[("chr1", 2), ("chr1", 5), ("chr1", 9), ("chr2", 1)]));
    }
}
