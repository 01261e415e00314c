//! Query planning and execution.
//!
//! A [`Session`] owns everything queries share: configuration, the genome
//! build, the dictionary cache, the result cache and session templates.
//! Executing a query text runs three phases:
//!
//! 1. statements are split; `def` macros are expanded and `create`
//!    statements are bound as virtual files,
//! 2. virtual files are materialized level by level under their cache
//!    signatures, independent ones in parallel,
//! 3. the final query is turned into a [`Pipeline`] whose source may be a
//!    partitioned (`pgor`) or materialized (`parallel`, `partgor`) stream.

pub mod cache;
pub mod parser;
pub mod signature;
pub mod virtual_files;

use crate::commands::{build_step, gorrow_source, GorRowsSource, NorRowsSource, Pipeline, PipelineStats};
use crate::config::SessionConfig;
use crate::dictionary::{load_cached, DictionaryCache, DictionaryOptions, DictionarySource};
use crate::genome::{ChromOrder, Genome, KeyRange};
use crate::gor::{FileOpener, GorError, IoStats, ProcessSource, Result};
use crate::parallel::{
    check_job_count, genome_partitions, materialize_and_merge, ready_source, segment_partitions,
    substitute_columns, substitute_tags, PartitionedSource, SourceFactory,
};
use crate::row::Header;
use crate::streaming::{
    collect_rows, BoxedSource, GorWriter, MergeSource, NorView, RangeSource, RowSource, VecSource,
};
use cache::ResultCache;
use log::{debug, info};
use parking_lot::{Mutex, RwLock};
use parser::{braced, nested_query, split_pipes, split_statements, tokenize, unquote, CommandLine, Options};
use rayon::prelude::*;
use regex::Regex;
use rustc_hash::FxHashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::SystemTime;
use virtual_files::VirtualFileManager;

/// Options shared by `gor` and `pgor`.
const GOR_FLAGS: &[&str] = &["-fs"];
const GOR_VALUED: &[&str] = &["-p", "-f", "-ff", "-s", "-dh"];
/// Options of `nor`; the same inputs without a range.
const NOR_VALUED: &[&str] = &["-f", "-ff", "-s", "-dh"];

/// A parameterized query registered with the session, invoked as
/// `@name(arg, ...)`. The body refers to parameters as `#{param}`.
#[derive(Debug, Clone)]
pub struct Template {
    pub params: Vec<String>,
    pub body: String,
}

/// Inputs of a `gor` source.
#[derive(Debug, Clone, Default)]
struct GorInputs {
    files: Vec<String>,
    range: KeyRange,
    tags: Option<Vec<String>>,
    silent_tags: bool,
    source_column: Option<String>,
    fallback_header: Option<Header>,
    /// Read plain files as unordered tables.
    nor: bool,
}

impl GorInputs {
    fn from_options(opts: &Options) -> Result<Self> {
        let range = match opts.value("-p") {
            Some(p) => KeyRange::parse(p).map_err(|e| opts.option_error("-p", e.to_string()))?,
            None => KeyRange::all(),
        };
        let mut tags: Option<Vec<String>> = opts.value("-f").map(|f| {
            f.split(',')
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect()
        });
        if let Some(file) = opts.value("-ff") {
            let text = fs::read_to_string(file).map_err(|e| {
                opts.option_error("-ff", format!("Cannot read tag file {}: {}", file, e))
            })?;
            tags.get_or_insert_with(Vec::new).extend(
                text.lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty() && !l.starts_with('#'))
                    .map(String::from),
            );
        }
        let fallback_header = opts.value("-dh").map(|h| {
            Header::new(
                h.split([',', '\t'])
                    .map(|n| n.trim().to_string())
                    .filter(|n| !n.is_empty())
                    .collect(),
            )
        });
        let files: Vec<String> = opts.positional().to_vec();
        if files.is_empty() {
            return Err(opts.error("Expected at least one input"));
        }
        Ok(Self {
            files,
            range,
            tags,
            silent_tags: opts.has("-fs"),
            source_column: opts.value("-s").map(String::from),
            fallback_header,
            nor: false,
        })
    }
}

fn is_dictionary(path: &Path) -> bool {
    path.is_dir()
        || path
            .extension()
            .is_some_and(|e| e.eq_ignore_ascii_case("gord") || e.eq_ignore_ascii_case("nord"))
}

fn is_nor_file(path: &Path) -> bool {
    path.extension()
        .is_some_and(|e| e.eq_ignore_ascii_case("nor") || e.eq_ignore_ascii_case("tsv"))
}

fn file_label(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

fn virtual_name(token: &str) -> Option<&str> {
    token.strip_prefix('[').and_then(|t| t.strip_suffix(']'))
}

fn template_call() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"@([A-Za-z_][A-Za-z0-9_]*)\(([^()]*)\)").expect("valid pattern")
    })
}

/// `keyword name = body` with the keyword already stripped.
fn split_binding<'a>(rest: &'a str, keyword: &str) -> Result<(&'a str, &'a str)> {
    let (name, body) = rest.split_once('=').ok_or_else(|| {
        GorError::parse(keyword, format!("Expected '{} name = query'", keyword))
    })?;
    let name = name.trim();
    if name.is_empty() {
        return Err(GorError::parse(keyword, "Name is empty"));
    }
    Ok((name, body.trim()))
}

fn strip_keyword<'a>(statement: &'a str, keyword: &str) -> Option<&'a str> {
    let head = statement.get(..keyword.len())?;
    let rest = &statement[keyword.len()..];
    (head.eq_ignore_ascii_case(keyword) && rest.starts_with(char::is_whitespace)).then_some(rest)
}

/// Shared state of query execution.
///
/// Clones share every cache and the template registry.
#[derive(Clone)]
pub struct Session {
    config: SessionConfig,
    genome: Genome,
    order: Arc<ChromOrder>,
    stats: Arc<IoStats>,
    dictionaries: Arc<DictionaryCache>,
    results: Arc<ResultCache>,
    write_lock: Arc<Mutex<()>>,
    templates: Arc<RwLock<FxHashMap<String, Template>>>,
}

impl Session {
    /// Create a session.
    ///
    /// A configured genome file defines both chromosome sizes and their
    /// order; without one the built-in build is used with lexicographic
    /// chromosome order.
    pub fn new(config: SessionConfig) -> Result<Self> {
        let (genome, order) = match &config.genome_file {
            Some(path) => {
                let genome = Genome::from_file(path)?;
                let order = ChromOrder::from_genome(&genome);
                (genome, order)
            }
            None => (Genome::default_build(), ChromOrder::default()),
        };
        let results = ResultCache::new(config.cache_dir.as_deref())?;
        debug!("Session cache directory {}", results.dir().display());
        Ok(Self {
            config,
            genome,
            order: Arc::new(order),
            stats: Arc::new(IoStats::new()),
            dictionaries: Arc::new(DictionaryCache::new()),
            results: Arc::new(results),
            write_lock: Arc::new(Mutex::new(())),
            templates: Arc::new(RwLock::new(FxHashMap::default())),
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn genome(&self) -> &Genome {
        &self.genome
    }

    pub fn order(&self) -> Arc<ChromOrder> {
        self.order.clone()
    }

    pub fn stats(&self) -> Arc<IoStats> {
        self.stats.clone()
    }

    pub fn dictionaries(&self) -> Arc<DictionaryCache> {
        self.dictionaries.clone()
    }

    pub fn results(&self) -> Arc<ResultCache> {
        self.results.clone()
    }

    /// Lock serializing updates of dictionary folders.
    pub fn write_lock(&self) -> Arc<Mutex<()>> {
        self.write_lock.clone()
    }

    pub fn opener(&self) -> FileOpener {
        FileOpener::new(self.order.clone(), self.config.type_sample_size, self.stats.clone())
    }

    pub fn register_template(&self, name: &str, params: &[&str], body: &str) {
        self.templates.write().insert(
            name.to_lowercase(),
            Template {
                params: params.iter().map(|p| p.to_string()).collect(),
                body: body.to_string(),
            },
        );
    }

    fn pool(&self) -> Result<rayon::ThreadPool> {
        rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.max_workers.max(1))
            .build()
            .map_err(|e| GorError::system(format!("Cannot start worker pool: {}", e)))
    }

    /// Plan a query text into a runnable pipeline.
    pub fn execute(&self, query: &str) -> Result<Pipeline> {
        let mut defs: Vec<(String, String)> = Vec::new();
        let mut files = VirtualFileManager::new(self.config.max_macro_depth);
        let mut last: Option<String> = None;
        for statement in split_statements(query) {
            let statement = self.expand_defs(&statement, &defs)?;
            if let Some(rest) = strip_keyword(&statement, "def") {
                let (name, body) = split_binding(rest, "def")?;
                let name = name.trim_matches('#').to_string();
                if body.contains(&format!("#{}#", name)) {
                    return Err(GorError::parse(
                        "def",
                        format!("Macro #{}# references itself", name),
                    ));
                }
                defs.push((name, body.to_string()));
            } else if let Some(rest) = strip_keyword(&statement, "create") {
                let (name, body) = split_binding(rest, "create")?;
                let name = virtual_name(name).unwrap_or(name);
                files.add(name, body)?;
            } else if last.is_some() {
                return Err(GorError::parse(
                    "query",
                    "Only one query may follow the def and create statements",
                ));
            } else {
                last = Some(statement);
            }
        }
        let last = last.ok_or_else(|| GorError::parse("query", "No query to run"))?;
        self.materialize_virtual_files(&mut files)?;
        let text = files.replace_virtual_files(&last)?;
        let text = self.expand_templates(&text)?;
        self.query_pipeline(&text)
    }

    /// Execute `query` and write its header and rows to `out`.
    pub fn run<W: Write>(&self, query: &str, out: W) -> Result<PipelineStats> {
        let pipeline = self.execute(query)?;
        let mut writer = GorWriter::new(out);
        pipeline.run(&mut writer)
    }

    /// Cache signature of a single query at the current time.
    pub fn signature(&self, query: &str) -> Result<String> {
        signature::compute(query, &[], SystemTime::now())
    }

    /// Replace `#name#` with the text of earlier `def` statements, until
    /// nothing changes.
    fn expand_defs(&self, text: &str, defs: &[(String, String)]) -> Result<String> {
        let mut current = text.to_string();
        for _ in 0..self.config.max_macro_depth {
            let mut next = current.clone();
            for (name, body) in defs {
                next = next.replace(&format!("#{}#", name), body);
            }
            if next == current {
                return Ok(current);
            }
            current = next;
        }
        Err(GorError::parse(
            "def",
            format!("Macros nested deeper than {}", self.config.max_macro_depth),
        ))
    }

    /// Replace `@name(args)` with the registered template body.
    fn expand_templates(&self, text: &str) -> Result<String> {
        let templates = self.templates.read();
        let mut current = text.to_string();
        for _ in 0..self.config.max_macro_depth {
            let mut failure: Option<GorError> = None;
            let next = template_call().replace_all(&current, |cap: &regex::Captures| {
                let name = cap[1].to_lowercase();
                let Some(template) = templates.get(&name) else {
                    failure.get_or_insert_with(|| {
                        GorError::parse("template", format!("Unknown template @{}", &cap[1]))
                    });
                    return cap[0].to_string();
                };
                let args: Vec<&str> = if cap[2].trim().is_empty() {
                    Vec::new()
                } else {
                    cap[2].split(',').map(|a| unquote(a.trim())).collect()
                };
                if args.len() != template.params.len() {
                    failure.get_or_insert_with(|| {
                        GorError::parse(
                            "template",
                            format!(
                                "@{} expects {} argument(s), got {}",
                                &cap[1],
                                template.params.len(),
                                args.len()
                            ),
                        )
                    });
                    return cap[0].to_string();
                }
                let mut body = template.body.clone();
                for (param, arg) in template.params.iter().zip(args) {
                    body = body.replace(&format!("#{{{}}}", param), arg);
                }
                body
            });
            if let Some(e) = failure {
                return Err(e);
            }
            if next == current {
                return Ok(current);
            }
            current = next.into_owned();
        }
        Err(GorError::parse(
            "template",
            format!("Templates nested deeper than {}", self.config.max_macro_depth),
        ))
    }

    /// Materialize every unresolved virtual file.
    fn materialize_virtual_files(&self, files: &mut VirtualFileManager) -> Result<()> {
        if files.is_empty() {
            return Ok(());
        }
        let mut signatures: FxHashMap<String, String> = FxHashMap::default();
        let pool = self.pool()?;
        for level in files.levels()? {
            let jobs = level
                .iter()
                .map(|name| {
                    let query = files
                        .get(name)
                        .map(|b| b.query().to_string())
                        .ok_or_else(|| GorError::system(format!("Virtual file [{}] vanished", name)))?;
                    let deps: Vec<String> = files
                        .dependencies(&query)
                        .iter()
                        .filter_map(|d| signatures.get(d).cloned())
                        .collect();
                    let text = files.replace_virtual_files(&query)?;
                    Ok((name.clone(), query, text, deps))
                })
                .collect::<Result<Vec<_>>>()?;
            let now = SystemTime::now();
            info!("Materializing {} virtual file(s)", jobs.len());
            let done = pool.install(|| {
                jobs.into_par_iter()
                    .map(|(name, query, text, deps)| {
                        let signature = signature::compute(&query, &deps, now)?;
                        let path = self.materialize(&signature, &text)?;
                        Ok((name, signature, path))
                    })
                    .collect::<Result<Vec<_>>>()
            })?;
            for (name, signature, path) in done {
                debug!("[{}] -> {}", name, path.display());
                files.resolve(&name, path)?;
                signatures.insert(name, signature);
            }
        }
        Ok(())
    }

    /// Result file for `signature`, running `text` if it does not exist.
    fn materialize(&self, signature: &str, text: &str) -> Result<PathBuf> {
        for nor in [false, true] {
            let path = self.results.path_for(signature, nor);
            if path.exists() {
                debug!("Cache hit for {}", signature);
                return Ok(path);
            }
        }
        let text = self.expand_templates(text)?;
        let mut pipeline = Some(self.query_pipeline(&text)?);
        let nor = pipeline.as_ref().is_some_and(|p| p.header().is_nor());
        let path = self.results.get_or_materialize(signature, nor, |out| {
            let pipeline = pipeline
                .take()
                .ok_or_else(|| GorError::system("Sub-query already consumed"))?;
            let mut writer = GorWriter::new(out).keep_nor_key();
            pipeline.run(&mut writer)?;
            Ok(())
        });
        if let Some(mut unused) = pipeline {
            unused.close();
        }
        path
    }

    /// Pipeline for one query without statements.
    pub fn query_pipeline(&self, text: &str) -> Result<Pipeline> {
        let commands = split_pipes(text)?;
        let first = CommandLine::parse(&commands[0])?;
        let rest = &commands[1..];
        match first.name() {
            "pgor" => self.pgor(text),
            "parallel" => {
                let source = self.parallel(&first)?;
                self.build_pipeline(source, rest)
            }
            "partgor" => {
                let source = self.partgor(&first)?;
                self.build_pipeline(source, rest)
            }
            _ => {
                let source = self.source_from_command(&first, &KeyRange::all())?;
                self.build_pipeline(source, rest)
            }
        }
    }

    /// Chain the steps of `commands` onto `source`.
    pub fn build_pipeline(&self, source: BoxedSource, commands: &[String]) -> Result<Pipeline> {
        let mut pipeline = Pipeline::new(source, self.order());
        for text in commands {
            let line = CommandLine::parse(text)?;
            if line.name() == "signature" {
                continue;
            }
            match build_step(&line, pipeline.header(), self) {
                Ok(step) => pipeline.push_step(step),
                Err(e) => {
                    pipeline.close();
                    return Err(e);
                }
            }
        }
        Ok(pipeline)
    }

    /// Source named by the first command of a pipeline, restricted to
    /// `range`.
    fn source_from_command(&self, line: &CommandLine, range: &KeyRange) -> Result<BoxedSource> {
        let source: BoxedSource = match line.name() {
            "gor" | "pgor" => {
                let mut valued = GOR_VALUED.to_vec();
                let mut flags = GOR_FLAGS.to_vec();
                if line.name() == "pgor" {
                    valued.extend(["-split", "-limit"]);
                    flags.push("-splitzero");
                }
                let opts = line.options(&flags, &valued)?;
                let inputs = GorInputs::from_options(&opts)?;
                return self.open_gor(&inputs, range);
            }
            "nor" => {
                let opts = line.options(GOR_FLAGS, NOR_VALUED)?;
                let inputs = GorInputs {
                    nor: true,
                    ..GorInputs::from_options(&opts)?
                };
                Box::new(NorView::new(self.open_gor(&inputs, &KeyRange::all())?))
            }
            "gorrows" => Box::new(GorRowsSource::from_command(line, self.order())?),
            "norrows" => Box::new(NorRowsSource::from_command(line)?),
            "gorrow" => Box::new(gorrow_source(line, self.order())?),
            "cmd" => {
                let opts = line.options(&["-n"], &[])?;
                let argv: Vec<String> = match opts.positional() {
                    [single] if braced(single).is_some() => {
                        tokenize(braced(single).unwrap_or_default())
                            .iter()
                            .map(|t| unquote(t).to_string())
                            .collect()
                    }
                    tokens => tokens.iter().map(|t| unquote(t).to_string()).collect(),
                };
                Box::new(ProcessSource::spawn(
                    &argv,
                    &self.config.allowed_commands,
                    opts.has("-n"),
                    &self.opener(),
                )?)
            }
            other => return Err(GorError::parse(other, "Unknown source command")),
        };
        Ok(self.restrict(source, range))
    }

    fn restrict(&self, source: BoxedSource, range: &KeyRange) -> BoxedSource {
        if range.is_all() || source.header().is_nor() {
            source
        } else {
            Box::new(RangeSource::new(source, range.clone(), self.order()))
        }
    }

    /// A source token: `<(query)`, a file, a dictionary or a folder.
    pub fn open_source(&self, target: &str) -> Result<BoxedSource> {
        if let Some(query) = nested_query(target) {
            return Ok(Box::new(self.query_pipeline(query)?));
        }
        if let Some(name) = virtual_name(target) {
            return Err(GorError::parse(
                "query",
                format!("Virtual file [{}] is not defined", name),
            ));
        }
        let path = Path::new(unquote(target));
        if is_dictionary(path) {
            let dict = load_cached(&self.dictionaries, path)?;
            let options = DictionaryOptions {
                bucket_threshold: self.config.bucket_threshold,
                ..Default::default()
            };
            return Ok(Box::new(DictionarySource::new(&dict, &options, self.opener())?));
        }
        Ok(Box::new(self.opener().open(path, is_nor_file(path))?))
    }

    /// Inputs of a `gor` command merged into one ordered stream.
    fn open_gor(&self, inputs: &GorInputs, range: &KeyRange) -> Result<BoxedSource> {
        let range = inputs.range.intersect(range, &self.order);
        let single = inputs.files.len() == 1;
        let mut sources: Vec<BoxedSource> = Vec::with_capacity(inputs.files.len());
        let mut labels = Vec::with_capacity(inputs.files.len());
        let mut labelled_by_dictionary = false;
        for file in &inputs.files {
            if let Some(query) = nested_query(file) {
                let source: BoxedSource = Box::new(self.query_pipeline(query)?);
                sources.push(self.restrict(source, &range));
                labels.push(String::from("nested"));
                continue;
            }
            let path = Path::new(unquote(file));
            if is_dictionary(path) {
                let dict = load_cached(&self.dictionaries, path)?;
                let options = DictionaryOptions {
                    tags: inputs.tags.clone(),
                    range: range.clone(),
                    source_column: if single {
                        inputs.source_column.clone()
                    } else {
                        None
                    },
                    silent_tags: inputs.silent_tags,
                    fallback_header: inputs.fallback_header.clone(),
                    bucket_threshold: self.config.bucket_threshold,
                };
                labelled_by_dictionary |= single && inputs.source_column.is_some();
                sources.push(Box::new(DictionarySource::new(&dict, &options, self.opener())?));
                labels.push(file_label(path));
                continue;
            }
            let source: BoxedSource = match (&inputs.fallback_header, path.exists()) {
                (Some(header), false) => {
                    debug!("{} is missing, using the declared header", path.display());
                    let header = if inputs.nor {
                        Header::nor(header.names().to_vec())
                    } else {
                        header.clone()
                    };
                    Box::new(VecSource::empty(header))
                }
                _ => Box::new(self.opener().open(path, inputs.nor && is_nor_file(path))?),
            };
            sources.push(self.restrict(source, &range));
            labels.push(file_label(path));
        }
        match (&inputs.source_column, labelled_by_dictionary) {
            (Some(column), false) => Ok(Box::new(MergeSource::with_source_column(
                sources,
                self.order(),
                column,
                labels,
            )?)),
            _ if sources.len() == 1 => Ok(sources.remove(0)),
            _ => Ok(Box::new(MergeSource::new(sources, self.order())?)),
        }
    }

    /// `pgor`: one copy of the whole pipeline per partition.
    fn pgor(&self, text: &str) -> Result<Pipeline> {
        let commands = split_pipes(text)?;
        let first = CommandLine::parse(&commands[0])?;
        let mut valued = GOR_VALUED.to_vec();
        valued.extend(["-split", "-limit"]);
        let mut flags = GOR_FLAGS.to_vec();
        flags.push("-splitzero");
        let opts = first.options(&flags, &valued)?;
        let limit = opts.int("-limit")?.map(|n| n.max(0) as usize);

        let partitions = match opts.value("-split") {
            None => genome_partitions(&self.genome, &self.order, None),
            Some(split) => match nested_query(split) {
                Some(query) => {
                    let mut segments = self.query_pipeline(query)?;
                    let rows = collect_rows(&mut segments)?;
                    if rows.is_empty() && !opts.has("-splitzero") {
                        genome_partitions(&self.genome, &self.order, None)
                    } else {
                        segment_partitions(&rows)?
                    }
                }
                None => {
                    let n: usize = split.parse().map_err(|_| {
                        opts.option_error("-split", format!("Invalid split value '{}'", split))
                    })?;
                    if n == 0 {
                        return Err(opts.option_error("-split", "-split must be at least 1"));
                    }
                    genome_partitions(&self.genome, &self.order, Some(n))
                }
            },
        };
        check_job_count(partitions.len(), limit, self.config.max_parallel_jobs, "pgor")?;

        // The first partition is built here to type-check the query and to
        // supply the header; the others are built by the worker that runs
        // them.
        let mut partitions = partitions.into_iter();
        let mut jobs: Vec<(KeyRange, SourceFactory)> = Vec::with_capacity(partitions.len());
        let header = match partitions.next() {
            Some(first) => {
                let pipeline = self.partition_pipeline(&first.substitute(text), &first.range)?;
                let header = pipeline.header().clone();
                jobs.push((first.range, ready_source(Box::new(pipeline))));
                header
            }
            None => {
                let sample = genome_partitions(&self.genome, &self.order, None)
                    .first()
                    .map(|p| p.substitute(text))
                    .unwrap_or_else(|| text.to_string());
                let mut planned = self.partition_pipeline(&sample, &KeyRange::all())?;
                let header = planned.header().clone();
                planned.close();
                header
            }
        };
        let shared = Arc::new(self.clone());
        for partition in partitions {
            let session = shared.clone();
            let query = partition.substitute(text);
            let range = partition.range.clone();
            let build: SourceFactory = Box::new(move || {
                let pipeline = session.partition_pipeline(&query, &range)?;
                Ok(Box::new(pipeline) as BoxedSource)
            });
            jobs.push((partition.range, build));
        }
        let source = PartitionedSource::spawn(
            header,
            jobs,
            self.config.max_workers,
            self.config.close_timeout,
            self.order(),
        )?;
        Ok(Pipeline::new(Box::new(source), self.order()))
    }

    fn partition_pipeline(&self, text: &str, range: &KeyRange) -> Result<Pipeline> {
        let commands = split_pipes(text)?;
        let first = CommandLine::parse(&commands[0])?;
        let source = self.source_from_command(&first, range)?;
        self.build_pipeline(source, &commands[1..])
    }

    fn template_arg<'a>(opts: &'a Options) -> Result<&'a str> {
        let [template] = opts.positional() else {
            return Err(opts.error("Expected one query template <(...)"));
        };
        nested_query(template)
            .ok_or_else(|| opts.error(format!("Expected <(...), got '{}'", template)))
    }

    /// `parallel -parts source <(template)>`.
    fn parallel(&self, line: &CommandLine) -> Result<BoxedSource> {
        let opts = line.options(&[], &["-parts", "-limit"])?;
        let template = Self::template_arg(&opts)?;
        let parts_target = opts.required("-parts")?;
        let mut parts = self.open_source(parts_target)?;
        let header = parts.header().clone();
        let rows = collect_rows(&mut parts)?;
        if rows.is_empty() {
            return Err(opts.option_error("-parts", "The parts source has no rows"));
        }
        let limit = opts.int("-limit")?.map(|n| n.max(0) as usize);
        check_job_count(rows.len(), limit, self.config.max_parallel_jobs, "parallel")?;
        let queries = rows
            .iter()
            .map(|row| substitute_columns(template, &header, row, "parallel"))
            .collect::<Result<Vec<_>>>()?;
        self.run_sub_queries(queries)
    }

    /// `partgor -dict d.gord [-f tags] [-partsize N] <(template)>`.
    fn partgor(&self, line: &CommandLine) -> Result<BoxedSource> {
        let opts = line.options(&[], &["-dict", "-f", "-partsize", "-limit"])?;
        let template = Self::template_arg(&opts)?;
        let dict_path = opts.required("-dict")?;
        let dict = load_cached(&self.dictionaries, Path::new(dict_path))?;
        let tags: Vec<String> = match opts.value("-f") {
            Some(f) => f.split(',').map(|t| t.trim().to_string()).filter(|t| !t.is_empty()).collect(),
            None => dict.tags(),
        };
        if tags.is_empty() {
            return Err(opts.option_error("-dict", format!("No tags to partition in {}", dict_path)));
        }
        let default_size = tags.len().div_ceil(self.config.max_workers.max(1));
        let size = match opts.count("-partsize", default_size)? {
            0 => return Err(opts.option_error("-partsize", "-partsize must be at least 1")),
            n => n,
        };
        let chunks: Vec<&[String]> = tags.chunks(size).collect();
        let limit = opts.int("-limit")?.map(|n| n.max(0) as usize);
        check_job_count(chunks.len(), limit, self.config.max_parallel_jobs, "partgor")?;
        let queries: Vec<String> = chunks
            .iter()
            .map(|chunk| substitute_tags(template, chunk))
            .collect();
        self.run_sub_queries(queries)
    }

    /// Materialize every sub-query and merge the results. Only the first
    /// is planned up front; workers plan the rest as they reach them.
    fn run_sub_queries(&self, queries: Vec<String>) -> Result<BoxedSource> {
        let mut queries = queries.into_iter();
        let first = queries
            .next()
            .ok_or_else(|| GorError::system("No sub-queries to run"))?;
        let first = self.query_pipeline(&first)?;
        let header = first.header().clone();
        let mut jobs: Vec<SourceFactory> = Vec::with_capacity(queries.len() + 1);
        jobs.push(ready_source(Box::new(first)));
        let shared = Arc::new(self.clone());
        for query in queries {
            let session = shared.clone();
            jobs.push(Box::new(move || {
                Ok(Box::new(session.query_pipeline(&query)?) as BoxedSource)
            }));
        }
        let merged = materialize_and_merge(
            header,
            jobs,
            self.results.dir(),
            self.config.max_workers,
            &self.opener(),
        )?;
        Ok(Box::new(merged))
    }
}
