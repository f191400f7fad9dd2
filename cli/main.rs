#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

use clap::{ArgGroup, Args, Parser, Subcommand, ValueEnum};
use log::info;
use serde_json::json;
use std::error::Error;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process;

use vcfgraph::columns::SampleSelector;
use vcfgraph::config::LoadConfig;
use vcfgraph::document::extract_sample;
use vcfgraph::header::read_preamble;
use vcfgraph::identity::IdentityStrategy;
use vcfgraph::row::ContigPolicy;
use vcfgraph::shard::{ShardCoordinator, merge_parts};
use vcfgraph::shared::files::open_text_source;

#[derive(Clone, Copy, ValueEnum)]
pub enum IdentityCli {
    /// The identifier column, or a content key when it is '.'
    Identifier,
    /// A UUIDv5 over chromosome, position and alleles
    Content,
    /// A random UUIDv4
    Random,
}

impl From<IdentityCli> for IdentityStrategy {
    fn from(value: IdentityCli) -> Self {
        match value {
            IdentityCli::Identifier => IdentityStrategy::Identifier,
            IdentityCli::Content => IdentityStrategy::Content,
            IdentityCli::Random => IdentityStrategy::Random,
        }
    }
}

#[derive(Args)]
pub struct LoadArgs {
    /// VCF file to load (plain or .gz); '-' reads standard input
    #[arg(value_name = "VCF")]
    pub input: PathBuf,

    /// Directory receiving variants.jsonl, samples.jsonl and calls.jsonl
    #[arg(long, value_name = "DIR")]
    pub out: PathBuf,

    /// Number of worker threads (defaults to the number of CPUs)
    #[arg(long, value_name = "N")]
    pub workers: Option<usize>,

    /// How variant keys are assigned
    #[arg(long, value_enum)]
    pub identity: Option<IdentityCli>,

    /// Data rows per dispatched batch
    #[arg(long, value_name = "N")]
    pub batch_rows: Option<usize>,

    /// TOML file with load settings; flags given here take precedence
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Delete the per-worker part files after a successful merge
    #[arg(long)]
    pub clean_parts: bool,

    /// Drop rows on unplaced contigs (GL000207.1, hs37d5) instead of failing the load
    #[arg(long)]
    pub skip_unplaced_contigs: bool,
}

impl LoadArgs {
    fn resolve_config(&self) -> Result<LoadConfig, Box<dyn Error>> {
        let mut config = match &self.config {
            Some(path) => LoadConfig::from_toml_file(path)?,
            None => LoadConfig::default(),
        };
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(identity) = self.identity {
            config.identity = identity.into();
        }
        if let Some(batch_rows) = self.batch_rows {
            config.batch_rows = batch_rows;
        }
        if self.clean_parts {
            config.keep_parts = false;
        }
        if self.skip_unplaced_contigs {
            config.contigs = ContigPolicy::Skip;
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Args)]
#[command(group(ArgGroup::new("selector").required(true).args(["name", "index"])))]
pub struct SampleArgs {
    /// VCF file to read (plain or .gz); '-' reads standard input
    #[arg(value_name = "VCF")]
    pub input: PathBuf,

    /// Sample column name
    #[arg(long)]
    pub name: Option<String>,

    /// 0-based position among the sample columns
    #[arg(long, value_name = "N")]
    pub index: Option<usize>,

    /// How variant keys are assigned; must match the load that produced the variants
    #[arg(long, value_enum, default_value_t = IdentityCli::Identifier)]
    pub identity: IdentityCli,

    /// Write the sample document here instead of standard output
    #[arg(long, value_name = "FILE")]
    pub out: Option<PathBuf>,
}

#[derive(Parser)]
#[command(
    name = "vcfgraph",
    about = "Turns VCF text into variant, sample and genotype-call records",
    long_about = "Parses VCF header declarations and data rows into typed entities and \
                 writes them as JSON lines, optionally sharding the rows across worker threads."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a VCF into variants.jsonl, samples.jsonl and calls.jsonl
    #[command(about = "Load a VCF with sharded workers")]
    Load(LoadArgs),

    /// Re-merge part files left by an earlier load
    #[command(about = "Merge part files into one output")]
    Merge {
        /// Directory holding part-NNN.variants.jsonl and part-NNN.calls.jsonl files
        #[arg(long, value_name = "DIR")]
        parts: PathBuf,

        /// Directory receiving variants.jsonl and calls.jsonl
        #[arg(long, value_name = "DIR")]
        out: PathBuf,
    },

    /// Write the document of a single sample
    #[command(about = "Extract one sample with all of its calls")]
    Sample(SampleArgs),

    /// Print the declared INFO and ALT schema and the sample names as JSON
    #[command(about = "Show the parsed header")]
    Header {
        /// VCF file to read (plain or .gz); '-' reads standard input
        #[arg(value_name = "VCF")]
        input: PathBuf,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let Cli { command } = Cli::parse();
    let result = match command {
        Commands::Load(args) => run_load(&args),
        Commands::Merge { parts, out } => run_merge(&parts, &out),
        Commands::Sample(args) => run_sample(&args),
        Commands::Header { input } => run_header(&input),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run_load(args: &LoadArgs) -> Result<(), Box<dyn Error>> {
    let config = args.resolve_config()?;
    let coordinator = ShardCoordinator::new(config)?;
    let summary = coordinator.run(&args.input, &args.out)?;
    println!(
        "{} rows, {} variants, {} samples, {} calls across {} shard(s)",
        summary.rows, summary.variants, summary.samples, summary.calls, summary.shards
    );
    if summary.skipped > 0 {
        println!("{} rows on unplaced contigs skipped", summary.skipped);
    }
    Ok(())
}

fn run_merge(parts: &Path, out: &Path) -> Result<(), Box<dyn Error>> {
    let summary = merge_parts(parts, out)?;
    println!(
        "{} parts, {} variants, {} calls",
        summary.parts, summary.variants, summary.calls
    );
    Ok(())
}

fn run_sample(args: &SampleArgs) -> Result<(), Box<dyn Error>> {
    let selector = match (&args.name, args.index) {
        (Some(name), _) => SampleSelector::Name(name.clone()),
        (None, Some(index)) => SampleSelector::Position(index),
        (None, None) => return Err("either --name or --index is required".into()),
    };

    let mut source = open_text_source(&args.input)?;
    let sample = extract_sample(source.as_mut(), &selector, args.identity.into())?;

    let mut writer: Box<dyn Write> = match &args.out {
        Some(path) => Box::new(BufWriter::new(File::create(path)?)),
        None => Box::new(io::stdout().lock()),
    };
    serde_json::to_writer(&mut writer, &sample)?;
    writeln!(writer)?;
    writer.flush()?;

    info!("Sample '{}' has {} calls", sample.key, sample.calls.len());
    Ok(())
}

fn run_header(input: &Path) -> Result<(), Box<dyn Error>> {
    let mut source = open_text_source(input)?;
    let preamble = read_preamble(source.as_mut())?;
    let samples = preamble.columns().ok().map(|columns| columns.samples());

    let report = json!({
        "info": &preamble.schema.info,
        "alt": &*preamble.schema.alt,
        "samples": samples,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
