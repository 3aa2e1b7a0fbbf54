//! json-refs CLI
//!
//! Command-line interface for resolving JSON References in JSON and YAML documents.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use json_refs::{
    find_refs, load_document_str, resolve_refs_at, to_location, CircularPolicy, DefaultFetcher,
    FetchRequest, Fetcher, HeaderHook, RefFilter, ResolveOptions,
};
use serde::Serialize;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "json-refs")]
#[command(about = "Resolve JSON References in JSON and YAML documents")]
#[command(version)]
struct Cli {
    /// Log fetches, cache hits and circular references to stderr
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve all references in a document
    Resolve {
        /// Document location: file path or URL (http:// or https://)
        location: String,

        /// Reference types to resolve (comma-separated: local,relative,remote)
        #[arg(long, value_name = "TYPES")]
        filter: Option<RefFilter>,

        /// Header to send with remote requests ('Name: value'), repeatable
        #[arg(long = "header", short = 'H', value_name = "HEADER")]
        headers: Vec<String>,

        /// Fail if any reference could not be resolved
        #[arg(long)]
        strict: bool,

        /// Fail if any reference is invalid instead of leaving it in place
        #[arg(long)]
        exclude_invalid: bool,

        /// Placeholder for circular references: reference or marker
        #[arg(long, default_value = "reference")]
        circular: CircularPolicy,

        /// Output format
        #[arg(long, value_enum, default_value_t = Format::Json)]
        format: Format,

        /// Pretty-print JSON output
        #[arg(long)]
        pretty: bool,

        /// Print the reference report alongside the resolved document
        #[arg(long)]
        report: bool,

        /// Output file (stdout if not specified)
        #[arg(long)]
        output: Option<PathBuf>,

        /// Give up after this many seconds
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,
    },

    /// List the references in a document without resolving them
    Refs {
        /// Document location: file path or URL (http:// or https://)
        location: String,

        /// Reference types to list (comma-separated: local,relative,remote)
        #[arg(long, value_name = "TYPES")]
        filter: Option<RefFilter>,

        /// Output format
        #[arg(long, value_enum, default_value_t = Format::Json)]
        format: Format,
    },
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Json,
    Yaml,
}

struct ResolveArgs {
    location: String,
    filter: Option<RefFilter>,
    headers: Vec<String>,
    strict: bool,
    exclude_invalid: bool,
    circular: CircularPolicy,
    format: Format,
    pretty: bool,
    report: bool,
    output: Option<PathBuf>,
    timeout: Option<u64>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Resolve {
            location,
            filter,
            headers,
            strict,
            exclude_invalid,
            circular,
            format,
            pretty,
            report,
            output,
            timeout,
        } => {
            run_resolve(ResolveArgs {
                location,
                filter,
                headers,
                strict,
                exclude_invalid,
                circular,
                format,
                pretty,
                report,
                output,
                timeout,
            })
            .await
        }

        Commands::Refs {
            location,
            filter,
            format,
        } => run_refs(&location, filter, format).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(code) => ExitCode::from(code),
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

async fn run_resolve(args: ResolveArgs) -> Result<(), u8> {
    let location = to_location(&args.location).map_err(|e| {
        eprintln!("Error: {}", e);
        e.exit_code() as u8
    })?;

    let mut options = ResolveOptions::new()
        .strict(args.strict)
        .include_invalid(!args.exclude_invalid)
        .circular(args.circular);
    if let Some(filter) = args.filter {
        options = options.filter(filter);
    }
    if let Some(secs) = args.timeout {
        options = options.timeout(Duration::from_secs(secs));
    }
    if !args.headers.is_empty() {
        let headers = args
            .headers
            .iter()
            .map(|line| HeaderHook::parse_header(line))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| {
                eprintln!("Error: {}", e);
                2u8
            })?;
        options = options.request_hook(Arc::new(HeaderHook::new(headers)));
    }

    let resolution = match resolve_refs_at(&location, &options, &DefaultFetcher::new()).await {
        Ok(resolution) => resolution,
        Err(e) => {
            eprintln!("Error: {}", e);
            if let Some(resolution) = e.resolution() {
                for (ptr, result) in resolution.refs.iter() {
                    if let Some(error) = &result.error {
                        eprintln!("  {}: {}", ptr, error);
                    }
                }
            }
            return Err(e.exit_code() as u8);
        }
    };

    for (ptr, result) in resolution.refs.iter() {
        if let Some(error) = &result.error {
            warn!(location = %ptr, "{}", error);
        }
    }

    let rendered = if args.report {
        render(&resolution, args.format, args.pretty)
    } else {
        render(&resolution.resolved, args.format, args.pretty)
    }?;

    match args.output {
        Some(path) => {
            std::fs::write(&path, &rendered).map_err(|e| {
                eprintln!("Error writing to {}: {}", path.display(), e);
                3u8
            })?;
        }
        None => {
            println!("{}", rendered.trim_end());
        }
    }

    Ok(())
}

async fn run_refs(source: &str, filter: Option<RefFilter>, format: Format) -> Result<(), u8> {
    let location = to_location(source).map_err(|e| {
        eprintln!("Error: {}", e);
        e.exit_code() as u8
    })?;

    let text = DefaultFetcher::new()
        .fetch(&FetchRequest::new(location.clone()))
        .await
        .map_err(|e| {
            eprintln!("Error: {}", e);
            e.exit_code() as u8
        })?;
    let document = load_document_str(&text).map_err(|e| {
        eprintln!("Error: {}", e);
        e.exit_code() as u8
    })?;

    let mut options = ResolveOptions::new().base(location);
    if let Some(filter) = filter {
        options = options.filter(filter);
    }
    let refs = find_refs(&document, &options);

    println!("{}", render(&refs, format, true)?.trim_end());
    Ok(())
}

fn render<T: Serialize>(value: &T, format: Format, pretty: bool) -> Result<String, u8> {
    let rendered = match format {
        Format::Json if pretty => serde_json::to_string_pretty(value).map_err(|e| e.to_string()),
        Format::Json => serde_json::to_string(value).map_err(|e| e.to_string()),
        Format::Yaml => serde_yaml::to_string(value).map_err(|e| e.to_string()),
    };
    rendered.map_err(|e| {
        eprintln!("Error serializing output: {}", e);
        2u8
    })
}
