// Clippy allows
#![allow(clippy::too_many_arguments)]

//! gorpipe: run GOR queries over genomic-ordered files
//!
//! Usage: gorpipe <COMMAND> [OPTIONS]

use clap::{Parser, Subcommand};
use log::{debug, info};
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process;

use gor_pipe::config::SessionConfig;
use gor_pipe::gor::{ErrorCategory, GorError, Result};
use gor_pipe::query::Session;
use gor_pipe::streaming::{verify_sorted, GorWriter};

#[derive(Parser)]
#[command(name = "gorpipe")]
#[command(version)]
#[command(about = "gorpipe: streaming queries over genomic-position-ordered tables", long_about = None)]
struct Cli {
    /// Number of worker threads for parallel operators (default: number of CPUs)
    #[arg(long, short = 't', global = true)]
    threads: Option<usize>,

    /// Directory for cached sub-query results; must exist
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Genome file (chrom<TAB>size) defining chromosome order and sizes
    #[arg(long, short = 'g', global = true)]
    genome: Option<PathBuf>,

    /// Allow the `cmd` source to run this program (repeatable)
    #[arg(long = "allow-command", global = true)]
    allow_command: Vec<String>,

    /// Log debug messages to stderr
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a query and write the result to stdout
    Query {
        /// Query text
        query: Option<String>,

        /// Read the query from a file
        #[arg(short = 'f', long = "file")]
        file: Option<PathBuf>,

        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Print pipeline statistics to stderr
        #[arg(long)]
        stats: bool,
    },

    /// Check that a file is sorted by chromosome and position
    Verify {
        /// Input file (.gor, .gord or a dictionary folder)
        input: String,
    },

    /// Print the cache signature of a query
    Signature {
        /// Query text
        query: String,
    },
}

/// Exit status per error category.
fn exit_code(err: &GorError) -> i32 {
    match err.category() {
        ErrorCategory::Parsing => 2,
        ErrorCategory::Data => 3,
        ErrorCategory::System => 4,
        ErrorCategory::Security => 5,
    }
}

fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp(None)
        .init();

    let result = session_config(&cli).and_then(|config| {
        let session = Session::new(config)?;
        match cli.command {
            Commands::Query {
                query,
                file,
                output,
                stats,
            } => run_query(&session, query, file, output, stats),
            Commands::Verify { input } => run_verify(&session, &input),
            Commands::Signature { query } => run_signature(&session, &query),
        }
    });

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(exit_code(&e));
    }
}

/// Environment settings overridden by command-line flags.
fn session_config(cli: &Cli) -> Result<SessionConfig> {
    let mut config = SessionConfig::from_env();
    if let Some(n) = cli.threads {
        config = config.with_workers(n);
    }
    if let Some(dir) = &cli.cache_dir {
        config = config.with_cache_dir(dir);
    }
    if let Some(genome) = &cli.genome {
        config = config.with_genome_file(genome);
    }
    for program in &cli.allow_command {
        config = config.with_allowed_command(program);
    }
    debug!("Workers: {}", config.max_workers);
    Ok(config)
}

fn run_query(
    session: &Session,
    query: Option<String>,
    file: Option<PathBuf>,
    output: Option<PathBuf>,
    stats: bool,
) -> Result<()> {
    let text = match (query, file) {
        (Some(q), None) => q,
        (None, Some(path)) => fs::read_to_string(&path).map_err(|e| {
            GorError::system(format!("Cannot read query file {}: {}", path.display(), e))
        })?,
        (Some(_), Some(_)) => {
            return Err(GorError::parse("query", "Give either a query or --file, not both"))
        }
        (None, None) => return Err(GorError::parse("query", "No query given")),
    };
    let pipeline = session.execute(&text)?;
    let result = match output {
        Some(path) => {
            let file = fs::File::create(&path)?;
            let mut writer = GorWriter::new(file);
            pipeline.run(&mut writer)?
        }
        None => {
            let stdout = io::stdout();
            let mut writer = GorWriter::new(stdout.lock());
            pipeline.run(&mut writer)?
        }
    };
    info!("Query finished: {}", result);
    if stats {
        eprintln!("Pipeline stats: {}", result);
        eprintln!("Files opened: {}", session.stats().files_opened());
    }
    Ok(())
}

fn run_verify(session: &Session, input: &str) -> Result<()> {
    let mut source = session.open_source(input)?;
    let rows = verify_sorted(&mut source, session.order())?;
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    writeln!(handle, "{}: {} rows in order", input, rows)?;
    Ok(())
}

fn run_signature(session: &Session, query: &str) -> Result<()> {
    let signature = session.signature(query)?;
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    writeln!(handle, "{}", signature)?;
    Ok(())
}
