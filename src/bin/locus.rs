use std::fs;
use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use locus::cache::{DiskCache, ResultCache};
use locus::config::{ConfigLoader, ResolvedConfig};
use locus::domain::{Locus, ResizeAnchor};
use locus::error::LocusError;
use locus::output::JsonLines;
use locus::processor::Processor;
use locus::request::Outcome;
use locus::source::PixelFileOpener;

#[derive(Parser)]
#[command(name = "locus")]
#[command(about = "Genomic locus arithmetic and cached contact-matrix requests")]
#[command(version, author)]
struct Cli {
    /// Path to a locus.json config file
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Run JSON requests and print one cache key or error per region")]
    Request(RequestArgs),
    #[command(about = "Resize loci given as JSON records or chrom:start-end strings")]
    Resize(ResizeArgs),
    #[command(about = "Inspect a result cache")]
    Cache(CacheArgs),
}

#[derive(Args)]
struct RequestArgs {
    /// Request envelopes as JSON text
    requests: Vec<String>,

    /// Read requests from a JSON file (one object or a list of objects)
    #[arg(long)]
    file: Option<String>,
}

#[derive(Args)]
struct ResizeArgs {
    records: Vec<String>,

    #[arg(long)]
    size: i64,

    #[arg(long, value_enum, default_value_t = ResizeAnchor::Center)]
    how: ResizeAnchor,

    /// Suffix of the locus fields in JSON records, e.g. `1` for chrom1/start1/end1
    #[arg(long, default_value = "")]
    suffix: String,
}

#[derive(Args)]
struct CacheArgs {
    /// Cache directory (defaults to the configured one)
    #[arg(long, global = true)]
    dir: Option<String>,

    #[command(subcommand)]
    command: CacheCommand,
}

#[derive(Subcommand)]
enum CacheCommand {
    #[command(about = "List cached keys")]
    List,
    #[command(about = "Print a cached matrix")]
    Show { key: String },
    #[command(about = "Remove one cached key")]
    Remove { key: String },
    #[command(about = "Remove every cached key")]
    Clear,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<LocusError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &LocusError) -> u8 {
    match error {
        LocusError::FileNotFound(_) | LocusError::ConfigRead(_) => 2,
        LocusError::SourceOpen(_) | LocusError::CacheOpen(_) => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ConfigLoader::resolve(cli.config.as_deref())?;

    match cli.command {
        Commands::Request(args) => run_request(args, &config),
        Commands::Resize(args) => run_resize(args, &config),
        Commands::Cache(args) => run_cache(args, &config),
    }
}

fn run_request(args: RequestArgs, config: &ResolvedConfig) -> miette::Result<()> {
    let mut envelopes = Vec::new();
    if let Some(path) = &args.file {
        let content = fs::read_to_string(path)
            .map_err(|err| LocusError::Filesystem(format!("read {path}: {err}")))?;
        match serde_json::from_str::<Value>(&content)
            .map_err(|err| LocusError::ConfigParse(err.to_string()))?
        {
            Value::Array(items) => envelopes.extend(items.into_iter().map(Ok)),
            other => envelopes.push(Ok(other)),
        }
    }
    for raw in args.requests {
        envelopes.push(serde_json::from_str::<Value>(&raw).map_err(|err| (raw, err)));
    }
    if envelopes.is_empty() {
        return Err(miette::Report::msg("no requests given (try `locus request --help`)"));
    }

    let processor = Processor::new(
        PixelFileOpener::new(config.layout.clone()),
        locus::cache::DiskCacheOpener,
    );
    for envelope in envelopes {
        match envelope {
            Ok(envelope) => {
                for outcome in processor.dispatch(envelope) {
                    JsonLines::print_outcome(&outcome).into_diagnostic()?;
                }
            }
            Err((raw, err)) => {
                let err = LocusError::InvalidRequest(err.to_string());
                JsonLines::print_outcome(&Outcome::failure(&Value::String(raw), &err))
                    .into_diagnostic()?;
            }
        }
    }
    Ok(())
}

fn run_resize(args: ResizeArgs, config: &ResolvedConfig) -> miette::Result<()> {
    for raw in args.records {
        match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(mut record)) => {
                config
                    .layout
                    .resize_record(&mut record, args.size, args.how, &args.suffix)?;
                JsonLines::print_json(&record).into_diagnostic()?;
            }
            _ => {
                let locus: Locus = raw.parse()?;
                println!("{}", locus.resize(args.size, args.how)?);
            }
        }
    }
    Ok(())
}

fn run_cache(args: CacheArgs, config: &ResolvedConfig) -> miette::Result<()> {
    let root = args
        .dir
        .map(Utf8PathBuf::from)
        .unwrap_or_else(|| config.cache_directory.clone());
    let cache = DiskCache::open(root, true)?;

    match args.command {
        CacheCommand::List => {
            for entry in cache.entries()? {
                JsonLines::print_listing(&entry).into_diagnostic()?;
            }
        }
        CacheCommand::Show { key } => {
            let matrix = cache
                .get(&key)?
                .ok_or_else(|| miette::Report::msg(format!("no cache entry for {key}")))?;
            let rows = matrix.rows().into_iter().map(|row| row.to_vec()).collect::<Vec<_>>();
            JsonLines::print_json(&rows).into_diagnostic()?;
        }
        CacheCommand::Remove { key } => {
            if !cache.remove(&key)? {
                return Err(miette::Report::msg(format!("no cache entry for {key}")));
            }
        }
        CacheCommand::Clear => {
            let removed = cache.clear()?;
            tracing::info!(removed, "cleared cache");
        }
    }
    Ok(())
}
