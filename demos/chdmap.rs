use chdmap::{
    ChdBuildConfig, ChdBuilder, ChdTable, RawBinaryLoader, StructuredLoader, TableLoader,
    write_raw, write_structured,
};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use serde_json::Value;
use std::fs::File;
use std::fmt::Display;
use std::io::{BufReader, Error, ErrorKind, Result};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Build(args) => run_build(args),
        Command::Info(args) => run_info(args),
        Command::Get(args) => run_get(args),
        Command::Dump(args) => run_dump(args),
    }
}

#[derive(Parser)]
#[command(
    author,
    version,
    about = "chdmap utility for building and querying CHD perfect hash tables",
    subcommand_required = true,
    arg_required_else_help = true
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build a table from a JSON key-value file
    Build(BuildArgs),
    /// Print a summary of a table
    Info(InfoArgs),
    /// Look up a single key
    Get(GetArgs),
    /// Print the entries of a table in slot order
    Dump(DumpArgs),
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    /// Raw little-endian layout, memory-mapped on load
    Raw,
    /// Length-prefixed MessagePack message
    Structured,
}

#[derive(clap::Args)]
struct TableArgs {
    /// Path to the table file
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Encoding of the table file
    #[arg(short, long, value_enum, default_value_t = Format::Raw)]
    format: Format,
}

#[derive(clap::Args)]
struct BuildArgs {
    /// Path to the source JSON file containing key-value pairs
    #[arg(short, long, value_name = "FILE")]
    input: PathBuf,

    /// Path to the table file to produce
    #[arg(short, long, value_name = "FILE")]
    output: PathBuf,

    /// Encoding of the produced table
    #[arg(short, long, value_enum, default_value_t = Format::Raw)]
    format: Format,

    /// JSON build configuration; flags below override it
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Seed for a reproducible build
    #[arg(long, value_name = "SEED")]
    seed: Option<u64>,

    /// Buckets per key
    #[arg(long, value_name = "RATIO")]
    bucket_ratio: Option<f64>,

    /// Skip reloading the written table and checking every entry
    #[arg(long = "no-verify", action = ArgAction::SetFalse)]
    verify: bool,
}

#[derive(clap::Args)]
struct InfoArgs {
    #[command(flatten)]
    table: TableArgs,

    /// Optional key to look up in the table
    #[arg(short, long)]
    key: Option<String>,
}

#[derive(clap::Args)]
struct GetArgs {
    #[command(flatten)]
    table: TableArgs,

    /// Key to look up
    #[arg(value_name = "KEY")]
    key: String,
}

#[derive(clap::Args)]
struct DumpArgs {
    #[command(flatten)]
    table: TableArgs,

    /// Stop after this many entries
    #[arg(short, long)]
    limit: Option<usize>,
}

fn open_table(path: &Path, format: Format) -> Result<ChdTable> {
    let table = match format {
        Format::Raw => RawBinaryLoader.load_file(path)?,
        Format::Structured => StructuredLoader.load_file(path)?,
    };
    Ok(table)
}

fn run_build(args: BuildArgs) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => ChdBuildConfig::load(path)?,
        None => ChdBuildConfig::default(),
    };
    if let Some(seed) = args.seed {
        config.seed = Some(seed);
    }
    if let Some(ratio) = args.bucket_ratio {
        config.bucket_ratio = ratio;
    }

    let entries = load_entries_from_json(&args.input)?;
    let table = ChdBuilder::default()
        .with_config(config)
        .build(entries.iter().map(|(k, v)| (k, v)))?;

    let writer = File::create(&args.output)?;
    match args.format {
        Format::Raw => write_raw(&table, writer)?,
        Format::Structured => write_structured(&table, writer)?,
    };

    if args.verify {
        verify_written(&args.output, args.format, &entries)?;
    }
    print_json(&table.info())
}

/// Reloads `path` and checks that it answers every source entry.
fn verify_written(path: &Path, format: Format, entries: &[(String, String)]) -> Result<()> {
    let table = open_table(path, format)?;
    if table.len() != entries.len() {
        return Err(Error::new(
            ErrorKind::InvalidData,
            format!(
                "{} holds {} entries, expected {}",
                path.display(),
                table.len(),
                entries.len()
            ),
        ));
    }
    let lookup = table.lookup();
    for (key, value) in entries {
        if lookup.get(key) != Some(value.as_bytes()) {
            return Err(Error::new(
                ErrorKind::InvalidData,
                format!("{} returns a wrong value for key {key:?}", path.display()),
            ));
        }
    }
    tracing::info!(entries = entries.len(), path = %path.display(), "verified table");
    Ok(())
}

fn run_info(args: InfoArgs) -> Result<()> {
    let table = open_table(&args.table.input, args.table.format)?;
    print_json(&table.info())?;

    if let Some(key) = args.key {
        let value = table.lookup().get(&key).map(String::from_utf8_lossy);
        println!("{}: {:?}", key, value);
    }
    Ok(())
}

fn run_get(args: GetArgs) -> Result<()> {
    let table = open_table(&args.table.input, args.table.format)?;
    match table.lookup().get(&args.key) {
        Some(value) => {
            println!("{}", String::from_utf8_lossy(value));
            Ok(())
        }
        None => Err(Error::new(
            ErrorKind::NotFound,
            format!("key {:?} not found", args.key),
        )),
    }
}

fn run_dump(args: DumpArgs) -> Result<()> {
    let table = open_table(&args.table.input, args.table.format)?;
    let limit = args.limit.unwrap_or(usize::MAX);
    for (key, value) in table.lookup().items().take(limit) {
        println!(
            "{}\t{}",
            String::from_utf8_lossy(key),
            String::from_utf8_lossy(value)
        );
    }
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| Error::other(format!("Failed to format JSON: {e}")))?;
    println!("{}", json);
    Ok(())
}

fn load_entries_from_json(path: &Path) -> Result<Vec<(String, String)>> {
    let reader = BufReader::new(File::open(path)?);
    let value: Value = serde_json::from_reader(reader)
        .map_err(|e| bad_input(format_args!("{}: {e}", path.display())))?;
    match value {
        Value::Object(map) => map
            .into_iter()
            .enumerate()
            .map(|(index, (key, value))| Ok((key, entry_value(value, index)?)))
            .collect(),
        Value::Array(items) => items.into_iter().enumerate().map(entry_pair).collect(),
        other => Err(bad_input(format_args!(
            "expected an object or an array of pairs, found {other}"
        ))),
    }
}

/// Decodes one `[key, value]` element of the array input form.
fn entry_pair((index, item): (usize, Value)) -> Result<(String, String)> {
    let Value::Array(pair) = item else {
        return Err(bad_input(format_args!("entry {index} is not a [key, value] pair")));
    };
    match <[Value; 2]>::try_from(pair) {
        Ok([Value::String(key), value]) => Ok((key, entry_value(value, index)?)),
        Ok([key, _]) => Err(bad_input(format_args!("entry {index} has non-string key {key}"))),
        Err(pair) => Err(bad_input(format_args!(
            "entry {index} has {} elements instead of 2",
            pair.len()
        ))),
    }
}

/// Strings are stored verbatim, anything else as its JSON text.
fn entry_value(value: Value, index: usize) -> Result<String> {
    match value {
        Value::String(s) => Ok(s),
        Value::Null => Err(bad_input(format_args!("entry {index} has a null value"))),
        other => Ok(other.to_string()),
    }
}

fn bad_input(message: impl Display) -> Error {
    Error::new(ErrorKind::InvalidData, format!("invalid JSON input: {message}"))
}
