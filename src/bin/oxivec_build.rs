//! Builds a partition tree over a seeded random dataset and reports what the
//! builder emitted.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use futures::stream::{self, TryStreamExt};
use oxivec::core::indexing::stats::{Stats, StatsKey};
use oxivec::{
    Config, FileRangeStoreFactory, IndexRange, IterativeBuilder, KeyedStore, MemoryRangeStore, MemoryStore, NodeId,
    Point, PointId, RangeStoreFactory, RecursiveBuilder, SplitDescriptor,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::time::Instant;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Strategy {
    /// Depth first over node-local range stores
    Recursive,
    /// Wave by wave over keyed stores
    Iterative,
}

#[derive(Parser, Debug)]
#[command(name = "oxivec-build")]
#[command(about = "Build a partition tree over a random dataset", long_about = None)]
struct Args {
    /// Number of points
    #[arg(short = 'n', long, default_value_t = 10_000)]
    count: u64,

    /// Dimensions per point
    #[arg(short, long, default_value_t = 16)]
    dimension: usize,

    /// Seed of the dataset
    #[arg(long, default_value_t = 42)]
    seed: u64,

    #[arg(short, long, value_enum, default_value_t = Strategy::Recursive)]
    strategy: Strategy,

    /// Spill recursive range stores to temporary files
    #[arg(long)]
    file_stores: bool,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Overrides `parallelism` from the configuration
    #[arg(long)]
    parallelism: Option<usize>,

    /// Overrides `range_buffer` from the configuration
    #[arg(long)]
    range_buffer: Option<usize>,

    /// Fail instead of skipping nodes whose id overflows 64 bits
    #[arg(long)]
    strict_node_ids: bool,

    /// Write the emitted ranges as JSON lines
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Default)]
struct Report {
    ranges: u64,
    singletons: u64,
    degenerate: u64,
    aliased: u64,
}

impl Report {
    fn record(&mut self, range: &IndexRange) {
        self.ranges += 1;
        match range.descriptor {
            SplitDescriptor::Singleton { .. } => self.singletons += 1,
            SplitDescriptor::Degenerate { .. } => self.degenerate += 1,
            SplitDescriptor::Hyperplane { .. } => {}
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let mut config = Config::load_or_default(args.config.as_deref())?;
    if let Some(parallelism) = args.parallelism {
        config.parallelism = parallelism;
    }
    if let Some(range_buffer) = args.range_buffer {
        config.range_buffer = range_buffer;
    }
    config.strict_node_ids |= args.strict_node_ids;
    config.validate()?;

    let points = random_points(args.seed, args.count, args.dimension);
    info!(count = args.count, dimension = args.dimension, strategy = ?args.strategy, "dataset ready");

    let mut output = match &args.output {
        Some(path) => Some(BufWriter::new(
            File::create(path).with_context(|| format!("cannot create {}", path.display()))?,
        )),
        None => None,
    };

    let started = Instant::now();
    let report = match args.strategy {
        Strategy::Recursive if args.file_stores => {
            let factory = FileRangeStoreFactory::new(args.dimension, &config)?;
            run_recursive(points, factory, &config, output.as_mut()).await?
        }
        Strategy::Recursive => run_recursive(points, MemoryRangeStore::create, &config, output.as_mut()).await?,
        Strategy::Iterative => run_iterative(points, &config, output.as_mut()).await?,
    };
    let elapsed = started.elapsed();

    if let Some(mut output) = output {
        output.flush()?;
    }

    println!(
        "{} ranges, {} singletons, {} degenerate splits, {} unpublished past the node id limit in {:.3}s",
        report.ranges,
        report.singletons,
        report.degenerate,
        report.aliased,
        elapsed.as_secs_f64()
    );
    Ok(())
}

fn random_points(seed: u64, count: u64, dimension: usize) -> Vec<Point> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|id| (id, (0..dimension).map(|_| rng.gen_range(-1.0..=1.0)).collect()))
        .collect()
}

async fn run_recursive<F: RangeStoreFactory>(
    points: Vec<Point>,
    factory: F,
    config: &Config,
    mut output: Option<&mut BufWriter<File>>,
) -> Result<Report> {
    let input = stream::iter(points.into_iter().map(Ok));
    let mut builder = RecursiveBuilder::from_stream(input, factory).await?.strict_node_ids(config.strict_node_ids);

    let mut report = Report::default();
    while let Some(range) = builder.next_range().await? {
        report.record(&range);
        if let Some(output) = output.as_deref_mut() {
            write_range(output, &range)?;
        }
    }
    report.aliased = builder.aliased();
    Ok(report)
}

async fn run_iterative(
    points: Vec<Point>,
    config: &Config,
    mut output: Option<&mut BufWriter<File>>,
) -> Result<Report> {
    let point_store: MemoryStore<PointId, Vec<f32>> = points.into_iter().collect();
    let ranges: MemoryStore<NodeId, IndexRange> = MemoryStore::new();
    let point_nodes: MemoryStore<PointId, NodeId> = MemoryStore::new();
    let stats: MemoryStore<StatsKey, Vec<Stats>> = MemoryStore::new();

    let summary = IterativeBuilder::new(config)?.build(&point_store, &ranges, &point_nodes, &stats).await?;
    info!(waves = summary.waves, segment_merges = summary.segment_merges, "iterative build done");

    if let Some(output) = output.as_deref_mut() {
        let mut items = ranges.items();
        while let Some((_, range)) = items.try_next().await? {
            write_range(output, &range)?;
        }
    }
    Ok(Report {
        ranges: summary.ranges - summary.aliased,
        singletons: summary.singletons,
        degenerate: summary.degenerate,
        aliased: summary.aliased,
    })
}

fn write_range(output: &mut BufWriter<File>, range: &IndexRange) -> Result<()> {
    serde_json::to_writer(&mut *output, range)?;
    writeln!(output)?;
    Ok(())
}
