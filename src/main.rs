use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use rayon::prelude::*;
use serde::Serialize;
use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::info;

use tuonella_unique::constants::{
    BYTES_PER_KB, DEFAULT_LOG_VERBOSITY, INPUT_BUFFER_SIZE_KB, OUTPUT_BUFFER_SIZE_KB,
};
use tuonella_unique::unique::{
    cost::{estimate_cost_with, tree_count},
    ByteOrder, KeyComparator, LittleEndianU32, LittleEndianU64, SequentialStream, Unique,
    UniqueConfig, UniqueStats,
};
use tuonella_unique::utils;

#[derive(Parser)]
#[command(name = "tuonella-unique")]
#[command(about = "Tuonella Unique - bounded-memory duplicate elimination for fixed-size binary keys")]
struct Args {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, global = true, help = "Verbose output")]
    verbose: bool,

    #[arg(long, global = true, help = "Print results as JSON")]
    json: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Deduplicate a file of fixed-size keys into a sorted file of unique keys
    Dedup(DedupArgs),
    /// Estimate the cost of deduplicating a workload under several budgets
    Estimate(EstimateArgs),
}

#[derive(clap::Args)]
struct DedupArgs {
    #[arg(short, long, help = "Input file of concatenated fixed-size keys")]
    input: PathBuf,

    #[arg(short, long, help = "Output file for sorted unique keys")]
    output: PathBuf,

    #[arg(short, long, help = "Key size in bytes")]
    key_size: usize,

    #[arg(short, long, help = "Configuration file path")]
    config: Option<PathBuf>,

    #[arg(long, help = "Memory budget in KB, overrides the configuration")]
    budget_kb: Option<usize>,

    #[arg(long, value_enum, default_value_t = KeyOrder::Bytes, help = "Key ordering")]
    order: KeyOrder,

    #[arg(long, value_enum, default_value_t = Mode::Walk, help = "Finalisation path")]
    mode: Mode,
}

#[derive(clap::Args)]
struct EstimateArgs {
    #[arg(short = 'n', long, help = "Number of keys")]
    keys: u64,

    #[arg(short, long, help = "Key size in bytes")]
    key_size: usize,

    #[arg(short, long, help = "Comma-separated memory budgets in KB")]
    budget_kb: String,

    #[arg(short, long, help = "Configuration file path")]
    config: Option<PathBuf>,
}

#[derive(Clone, Copy, ValueEnum)]
enum KeyOrder {
    Bytes,
    LeU32,
    LeU64,
}

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    /// Stream keys straight from the merge to the output
    Walk,
    /// Materialise into a temporary stream first, then copy it out
    Get,
}

#[derive(Serialize)]
struct DedupReport {
    input_keys: u64,
    unique_keys: u64,
    elapsed_ms: u64,
    stats: UniqueStats,
}

#[derive(Serialize)]
struct EstimateRow {
    budget_kb: usize,
    runs: u64,
    cost: f64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let verbosity = if args.verbose { "verbose" } else { DEFAULT_LOG_VERBOSITY };
    utils::setup_logging(verbosity)?;

    match args.command {
        Command::Dedup(dedup) => run_dedup(dedup, args.json).await,
        Command::Estimate(estimate) => run_estimate(estimate, args.json).await,
    }
}

async fn load_config(path: Option<&Path>) -> Result<UniqueConfig> {
    let Some(path) = path else {
        return Ok(UniqueConfig::default());
    };
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    UniqueConfig::from_json(&content)
        .with_context(|| format!("Invalid config file {}", path.display()))
}

async fn run_dedup(args: DedupArgs, json: bool) -> Result<()> {
    let mut config = load_config(args.config.as_deref()).await?;
    if let Some(kb) = args.budget_kb {
        config = config.with_memory_budget(kb * BYTES_PER_KB);
    }
    config.validate().context("Invalid configuration")?;

    if !args.input.exists() {
        bail!("Input file does not exist: {}", args.input.display());
    }
    match (args.order, args.key_size) {
        (KeyOrder::LeU32, size) if size != 4 => bail!("le-u32 keys must be 4 bytes, got {}", size),
        (KeyOrder::LeU64, size) if size != 8 => bail!("le-u64 keys must be 8 bytes, got {}", size),
        _ => {}
    }

    info!("Starting Tuonella Unique deduplication");
    info!("Input file: {}", args.input.display());
    info!("Output file: {}", args.output.display());
    info!("Memory budget: {}", utils::format_bytes(config.memory_budget() as u64));

    let start = Instant::now();
    let (input_keys, stats) = tokio::task::spawn_blocking(move || match args.order {
        KeyOrder::Bytes => dedup_file(ByteOrder, &args, config),
        KeyOrder::LeU32 => dedup_file(LittleEndianU32, &args, config),
        KeyOrder::LeU64 => dedup_file(LittleEndianU64, &args, config),
    })
    .await
    .context("Deduplication task failed")??;
    let elapsed = start.elapsed();

    if json {
        let report = DedupReport {
            input_keys,
            unique_keys: stats.keys_emitted,
            elapsed_ms: elapsed.as_millis() as u64,
            stats,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    info!("Deduplication completed successfully!");
    info!("Input keys: {}", input_keys);
    info!("Unique keys: {}", stats.keys_emitted);
    info!("Duplicates removed: {}", stats.duplicates_removed());
    info!("Runs written: {}", stats.flushes);
    info!("Collapse passes: {}", stats.collapse_passes);
    info!("Scratch written: {}", utils::format_bytes(stats.scratch_bytes_written));
    info!("Scratch read: {}", utils::format_bytes(stats.scratch_bytes_read));
    info!("Processing time: {}", utils::format_duration(elapsed.as_secs_f64()));

    Ok(())
}

fn dedup_file<C: KeyComparator>(
    cmp: C,
    args: &DedupArgs,
    config: UniqueConfig,
) -> Result<(u64, UniqueStats)> {
    let temp_directory = config.temp_directory.clone();
    let io_buffer_size = config.io_buffer_size_bytes();
    let mut engine = Unique::new(cmp, args.key_size, config)?;

    let input = File::open(&args.input)
        .with_context(|| format!("Failed to open input {}", args.input.display()))?;
    let mut reader = BufReader::with_capacity(INPUT_BUFFER_SIZE_KB * BYTES_PER_KB, input);
    let mut key = vec![0u8; args.key_size];
    let mut input_keys = 0u64;
    while read_key(&mut reader, &mut key)? {
        engine.put(&key)?;
        input_keys += 1;
    }

    let output = File::create(&args.output)
        .with_context(|| format!("Failed to create output {}", args.output.display()))?;
    let mut writer = BufWriter::with_capacity(OUTPUT_BUFFER_SIZE_KB * BYTES_PER_KB, output);

    match args.mode {
        Mode::Walk => {
            engine.walk(|key| writer.write_all(key).map_err(anyhow::Error::from))?;
        }
        Mode::Get => {
            let mut stream = SequentialStream::new_in(&temp_directory, io_buffer_size);
            engine.get(&mut stream)?;
            while stream.next_key(&mut key)? {
                writer.write_all(&key)?;
            }
        }
    }
    writer.flush()?;

    Ok((input_keys, engine.stats()))
}

/// Fills `buf` with the next key. `Ok(false)` at a clean end of input.
fn read_key(reader: &mut impl Read, buf: &mut [u8]) -> Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    match filled {
        0 => Ok(false),
        n if n == buf.len() => Ok(true),
        n => bail!("Input ends with a partial key of {} bytes", n),
    }
}

async fn run_estimate(args: EstimateArgs, json: bool) -> Result<()> {
    let config = load_config(args.config.as_deref()).await?;
    let params = config.cost_params();
    params.validate().context("Invalid cost parameters")?;
    if args.key_size == 0 {
        bail!("Key size must be positive");
    }

    let budgets = utils::parse_kb_list(&args.budget_kb)?;
    let rows: Vec<EstimateRow> = budgets
        .par_iter()
        .map(|&budget_kb| {
            let budget = budget_kb * BYTES_PER_KB;
            EstimateRow {
                budget_kb,
                runs: tree_count(args.keys, args.key_size, budget, &params),
                cost: estimate_cost_with(args.keys, args.key_size, budget, &params),
            }
        })
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    println!("{:>12} {:>10} {:>16}", "budget", "runs", "cost");
    for row in &rows {
        println!(
            "{:>12} {:>10} {:>16.2}",
            utils::format_bytes((row.budget_kb * BYTES_PER_KB) as u64),
            row.runs,
            row.cost
        );
    }

    Ok(())
}
