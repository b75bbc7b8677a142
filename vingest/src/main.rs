// VecIngest — main.rs
// Binary entry point: loads the movie and user feature CSVs into their
// collections.
// Author: d65v <https://github.com/d65v>

use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};

use vingest::{
    shared_ingestor, CollectionSink, CsvRowSource, FileSink, IngestionPipeline, MemorySink,
    PipelineConfig, SchemaRegistry, Summary,
};

fn main() {
    // Load .env first so it can set RUST_LOG too (non-fatal if missing)
    let _ = dotenv::dotenv();

    // Logger respects RUST_LOG
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let mode = args.get(1).map(|s| s.as_str()).unwrap_or("run");

    let outcome = match mode {
        "run" => run_load(false),
        "dry-run" => run_load(true),
        "schema" => print_schemas(),
        "help" | "--help" | "-h" => {
            print_help();
            Ok(())
        }
        unknown => {
            eprintln!("[VecIngest] Unknown mode: '{}'. Try --help.", unknown);
            std::process::exit(1);
        }
    };

    if let Err(e) = outcome {
        log::error!("{:#}", e);
        eprintln!("[VecIngest] error: {:#}", e);
        std::process::exit(1);
    }
}

fn run_load(dry_run: bool) -> Result<()> {
    let registry = SchemaRegistry::with_builtin().context("registering built-in schemas")?;

    let sink: Arc<dyn CollectionSink> = if dry_run {
        log::info!("dry run: records stay in memory");
        Arc::new(MemorySink::new())
    } else {
        let root = env::var("VECINGEST_STORAGE_PATH").unwrap_or_else(|_| "./data/store".into());
        Arc::new(
            FileSink::open(PathBuf::from(&root))
                .with_context(|| format!("opening storage at {}", root))?,
        )
    };

    let jobs = [
        PipelineConfig::from_env("movie", PipelineConfig::movie_features()),
        PipelineConfig::from_env("user", PipelineConfig::user_features()),
    ];
    let pipelines = jobs
        .into_iter()
        .map(|cfg| IngestionPipeline::new(&registry, cfg))
        .collect::<vingest::Result<Vec<_>>>()?;

    for pipeline in &pipelines {
        pipeline
            .prepare_collection(sink.as_ref())
            .with_context(|| format!("preparing '{}'", pipeline.schema().name))?;
    }

    let concurrent = pipelines.iter().any(|p| p.config().workers > 1);
    let summaries = if concurrent {
        load_concurrently(&pipelines, sink)?
    } else {
        let mut out = Vec::with_capacity(pipelines.len());
        for pipeline in &pipelines {
            println!("Inserting {} data...", pipeline.schema().name);
            let summary = pipeline
                .run_csv(Arc::clone(&sink))
                .with_context(|| format!("loading {}", pipeline.config().csv_path.display()))?;
            out.push(summary);
        }
        out
    };

    print_summaries(&summaries);
    Ok(())
}

/// One thread per collection over a shared ingestor; finalized once at the end.
fn load_concurrently(
    pipelines: &[IngestionPipeline<'_>],
    sink: Arc<dyn CollectionSink>,
) -> Result<Vec<Summary>> {
    let ingestor = shared_ingestor(pipelines, sink);

    let outcomes: Vec<Result<Summary>> = thread::scope(|s| {
        let handles: Vec<_> = pipelines
            .iter()
            .map(|pipeline| {
                let ingestor = &ingestor;
                s.spawn(move || -> Result<Summary> {
                    let path = &pipeline.config().csv_path;
                    let rows = CsvRowSource::open(path)
                        .with_context(|| format!("opening {}", path.display()))?;
                    Ok(pipeline.run_with(rows, ingestor)?)
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)))
            .collect()
    });

    ingestor.finalize()?;
    outcomes.into_iter().collect()
}

fn print_summaries(summaries: &[Summary]) {
    println!("\n[VecIngest] Ingestion summary:");
    for s in summaries {
        println!(
            "  {:26}  read={:<7} accepted={:<7} rejected={:<6} flushed={:<7} {}ms{}",
            s.collection,
            s.read,
            s.accepted,
            s.rejected,
            s.flushed,
            s.elapsed_ms,
            if s.stopped_at_limit { "  (limit reached)" } else { "" }
        );
        for (kind, count) in &s.rejections {
            println!("      {:18} {}", kind, count);
        }
    }
}

fn print_schemas() -> Result<()> {
    let registry = SchemaRegistry::with_builtin()?;
    for name in registry.names() {
        let schema = registry.get(name)?;
        println!("{}", serde_json::to_string_pretty(schema)?);
    }
    Ok(())
}

fn print_help() {
    println!(
        r#"
VecIngest — Schema-validated CSV ingestion for vector stores

USAGE:
  vecingest [MODE]

MODES:
  run       Load both feature CSVs into the flat-file store (default)
  dry-run   Same, but keep records in memory and only report
  schema    Print the built-in collection schemas as JSON
  help      Show this message

ENVIRONMENT:
  VECINGEST_STORAGE_PATH        Store directory (default: ./data/store)
  VECINGEST_MOVIE_CSV           Movie CSV (default: data/movie_feature_calculated.csv)
  VECINGEST_USER_CSV            User CSV (default: data/user_feature_calculated.csv)
  VECINGEST_LIMIT               Stop after more than N accepted rows, or "none" (default: 20000)
  VECINGEST_BATCH_SIZE          Records per insert (default: 1)
  VECINGEST_MAX_BATCH_BYTES     Byte bound per insert (default: unbounded)
  VECINGEST_MAX_FIELD_LENGTH    Max chars per text cell (default: 10000)
  VECINGEST_TIMEOUT_MS          Per-insert timeout (default: none)
  VECINGEST_WORKERS             Transform threads; >1 also loads both files in parallel (default: 1)
  VECINGEST_<JOB>_<KEY>         Per-job override, JOB = MOVIE | USER
  RUST_LOG                      Log level: info | debug | warn | error

AUTHOR:
  d65v <https://github.com/d65v>
"#
    );
}
