use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use serde_json::json;

use framelog_frames::to_prototxt;
use framelog_logs::SourceLocator;
use framelog_pipeline::{
    BackendExit, Flow, FrameHistory, FramedDocument, FrontendExit, Pipeline, PipelineConfig,
};
use framelog_types::Level;

/// framelog - follow a glog stream and print the frame-tagged documents in it
#[derive(Parser, Debug)]
#[command(name = "framelog")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log to follow: a local path or [user@]host:path
    #[arg(value_name = "LOCATOR")]
    locator: String,

    /// TOML config file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Record filter, repeatable: level=W,E  thread=12  filename=app_.*\.cc
    #[arg(long = "filter", value_name = "SPEC")]
    filters: Vec<String>,

    /// Drop records below this level (I, W, E, F)
    #[arg(long, value_name = "LEVEL")]
    min_level: Option<Level>,

    /// Stop at the first malformed document instead of skipping it
    #[arg(long)]
    strict: bool,

    /// Pairs buffered between the reader and the printer
    #[arg(long)]
    channel_capacity: Option<usize>,

    /// Output format
    #[arg(long, value_enum, default_value_t = Format::Json)]
    format: Format,

    /// Stop after this many documents
    #[arg(long)]
    count: Option<u64>,

    /// Read a local file to its end instead of following it
    #[arg(long)]
    once: bool,

    /// Print the last numeric values of a top-level key on exit, repeatable
    #[arg(long, value_name = "KEY")]
    series: Vec<String>,

    /// Documents kept for --series
    #[arg(long, default_value = "100")]
    history: usize,

    /// Print the effective config and exit
    #[arg(long)]
    print_config: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Format {
    /// One JSON object per line
    Json,
    /// Frame header followed by indented JSON
    Pretty,
    /// Frame comment followed by protobuf text format
    Prototxt,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // stdout carries documents, diagnostics go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let result = run(args).await;

    if let Err(e) = &result {
        eprintln!("Error: {:#}", e);
    }

    result
}

fn load_config(args: &Args) -> Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };

    config.filters.extend(args.filters.iter().cloned());
    if args.strict {
        config.persistent = false;
    }
    if let Some(capacity) = args.channel_capacity {
        config.channel_capacity = capacity;
    }
    Ok(config)
}

async fn run(args: Args) -> Result<()> {
    let config = load_config(&args)?;
    if args.print_config {
        print!("{}", toml::to_string(&config)?);
        return Ok(());
    }

    let mut filter = config.record_filter().context("invalid record filter")?;
    if let Some(level) = args.min_level {
        filter = filter.with_min_level(level);
    }
    tracing::debug!(?filter, "record filter");
    let pipeline = Pipeline::new(config)?.with_filter(filter);

    let history = FrameHistory::new(args.history);
    let format = args.format;
    let limit = args.count;
    let mut printed = 0u64;
    let renderer = history.record(move |pair: &FramedDocument| -> Result<Flow> {
        print_pair(pair, format)?;
        printed += 1;
        Ok(match limit {
            Some(limit) if printed >= limit => Flow::Stop,
            _ => Flow::Continue,
        })
    });

    let locator = SourceLocator::parse(&args.locator);
    let report = if args.once {
        let SourceLocator::Local(path) = &locator else {
            bail!("--once needs a local file, got {}", locator);
        };
        let file = File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
        pipeline.run_reader(file, renderer).await
    } else {
        pipeline.run(&locator, renderer).await?
    };
    tracing::info!(?report, received = history.received(), "done");

    for key in &args.series {
        println!("{}", json!({ "series": key, "values": history.series(key) }));
    }

    if let FrontendExit::RenderFailed(reason) = report.frontend {
        bail!("output failed: {}", reason);
    }
    if let BackendExit::Failed(reason) = report.backend {
        bail!("{}", reason);
    }
    Ok(())
}

fn print_pair(pair: &FramedDocument, format: Format) -> Result<()> {
    let mut out = std::io::stdout().lock();
    match format {
        Format::Json => writeln!(out, "{}", serde_json::to_string(pair)?)?,
        Format::Pretty => writeln!(
            out,
            "--- {}\n{}",
            pair.frame,
            serde_json::to_string_pretty(&pair.document)?
        )?,
        Format::Prototxt => match to_prototxt(&pair.document) {
            Ok(text) => write!(out, "# {}\n{}", pair.frame, text)?,
            Err(e) => {
                tracing::warn!(error = %e, frame = %pair.frame, "not a message, printing JSON");
                writeln!(out, "# {}\n{}", pair.frame, pair.document)?;
            }
        },
    }
    out.flush()?;
    Ok(())
}
