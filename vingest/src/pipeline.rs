// VecIngest — pipeline.rs
// Read → transform → batch → sink, for one collection per run.
// Author: d65v <https://github.com/d65v>

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use serde::Serialize;

use crate::batch::{BatchIngestor, IngestResult};
use crate::record::{RawRow, Record};
use crate::schema::{CollectionSchema, SchemaRegistry};
use crate::sink::CollectionSink;
use crate::source::CsvRowSource;
use crate::transform::RecordTransformer;
use crate::{IngestError, PipelineConfig, RejectKind, Rejection, Result, SinkError};

/// Rows each worker transforms per window in concurrent mode.
const ROWS_PER_WORKER: usize = 64;

// ── Summary ───────────────────────────────────────────────────────────────────

/// What happened to every row a run looked at.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Summary {
    pub collection: String,
    /// Rows examined
    pub read: usize,
    /// Rows turned into records and handed to the ingestor
    pub accepted: usize,
    pub rejected: usize,
    pub rejections: BTreeMap<RejectKind, usize>,
    /// Records confirmed delivered to the sink
    pub flushed: usize,
    /// The run ended on the limit rather than at end of input
    pub stopped_at_limit: bool,
    pub elapsed_ms: u128,
}

impl Summary {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            ..Self::default()
        }
    }

    pub fn rejected_for(&self, kind: RejectKind) -> usize {
        self.rejections.get(&kind).copied().unwrap_or(0)
    }

    fn reject(&mut self, rejection: &Rejection) {
        log::debug!("rejected: {}", rejection);
        self.rejected += 1;
        *self.rejections.entry(rejection.kind()).or_insert(0) += 1;
    }

    fn add_flushed(&mut self, results: &[IngestResult]) {
        self.flushed += results.iter().map(|r| r.accepted).sum::<usize>();
    }
}

// ── Pipeline ──────────────────────────────────────────────────────────────────

pub struct IngestionPipeline<'a> {
    config: PipelineConfig,
    transformer: RecordTransformer<'a>,
}

impl<'a> IngestionPipeline<'a> {
    /// Resolve the schema and check the config. Every setup error surfaces
    /// here, before any row is read.
    pub fn new(registry: &'a SchemaRegistry, config: PipelineConfig) -> Result<Self> {
        let schema = registry.get(&config.schema_name)?;
        config.validate(schema)?;
        let transformer = RecordTransformer::new(schema, &config.rules())?;
        Ok(Self {
            config,
            transformer,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn schema(&self) -> &'a CollectionSchema {
        self.transformer.schema()
    }

    /// Drop and create the target collection when `recreate_collection` is set.
    pub fn prepare_collection(&self, sink: &dyn CollectionSink) -> Result<()> {
        if !self.config.recreate_collection {
            return Ok(());
        }
        let schema = self.schema();
        let sink_err = |source: SinkError| IngestError::Sink {
            collection: schema.name.clone(),
            source,
            pending: Vec::new(),
        };
        if sink.drop_collection(&schema.name).map_err(sink_err)? {
            log::info!("dropped existing collection '{}'", schema.name);
        }
        sink.create_collection(schema).map_err(sink_err)?;
        log::info!(
            "created collection '{}' ({} fields)",
            schema.name,
            schema.fields.len()
        );
        Ok(())
    }

    /// Load `config.csv_path` into `sink`.
    pub fn run_csv(&self, sink: Arc<dyn CollectionSink>) -> Result<Summary> {
        self.run(CsvRowSource::open(&self.config.csv_path)?, sink)
    }

    /// Ingest `rows` through a batch ingestor owned by this run.
    ///
    /// The ingestor is finalized on every exit path except a failed
    /// submission, whose undelivered records come back in
    /// `IngestError::Sink::pending` instead.
    pub fn run<I>(&self, rows: I, sink: Arc<dyn CollectionSink>) -> Result<Summary>
    where
        I: IntoIterator<Item = Result<RawRow>>,
    {
        let ingestor = BatchIngestor::new(sink, self.config.batch_options());
        let mut summary = Summary::new(&self.schema().name);
        let started = Instant::now();

        match self.drive(rows, &ingestor, &mut summary) {
            Ok(()) => {
                let results = ingestor.finalize()?;
                summary.add_flushed(&results);
                summary.elapsed_ms = started.elapsed().as_millis();
                log_summary(&summary);
                Ok(summary)
            }
            Err(IngestError::Sink {
                collection, source, ..
            }) => Err(IngestError::Sink {
                collection,
                source,
                pending: ingestor.into_pending(),
            }),
            Err(cause) => match ingestor.finalize() {
                Ok(_) => Err(cause),
                Err(flush) => Err(flush_failed(cause, flush, Vec::new())),
            },
        }
    }

    /// Ingest `rows` through a shared ingestor. Only this collection's batch
    /// is flushed at the end; `finalize` stays with the ingestor's owner.
    pub fn run_with<I>(&self, rows: I, ingestor: &BatchIngestor) -> Result<Summary>
    where
        I: IntoIterator<Item = Result<RawRow>>,
    {
        let name = &self.schema().name;
        let mut summary = Summary::new(name);
        let started = Instant::now();

        let outcome = self
            .drive(rows, ingestor, &mut summary)
            .and_then(|()| self.flush_own(ingestor, &mut summary));
        match outcome {
            Ok(()) => {
                summary.elapsed_ms = started.elapsed().as_millis();
                log_summary(&summary);
                Ok(summary)
            }
            Err(IngestError::Sink {
                collection, source, ..
            }) => Err(IngestError::Sink {
                collection,
                source,
                pending: ingestor.take_pending(name),
            }),
            Err(cause) => match self.flush_own(ingestor, &mut summary) {
                Ok(()) => Err(cause),
                Err(flush) => Err(flush_failed(cause, flush, ingestor.take_pending(name))),
            },
        }
    }

    fn flush_own(&self, ingestor: &BatchIngestor, summary: &mut Summary) -> Result<()> {
        let name = &self.schema().name;
        let result = ingestor.flush(name).map_err(|source| self.sink_error(source))?;
        summary.add_flushed(&[result]);
        Ok(())
    }

    fn sink_error(&self, source: SinkError) -> IngestError {
        IngestError::Sink {
            collection: self.schema().name.clone(),
            source,
            pending: Vec::new(),
        }
    }

    // ── Private: Row Loop ─────────────────────────────────────────────────────

    fn drive<I>(&self, rows: I, ingestor: &BatchIngestor, summary: &mut Summary) -> Result<()>
    where
        I: IntoIterator<Item = Result<RawRow>>,
    {
        log::info!(
            "ingesting into '{}' (limit={:?}, batch_size={}, workers={})",
            self.schema().name,
            self.config.limit,
            self.config.batch_size,
            self.config.workers
        );
        if self.config.workers > 1 {
            self.drive_concurrent(rows, ingestor, summary)
        } else {
            self.drive_sequential(rows, ingestor, summary)
        }
    }

    fn drive_sequential<I>(
        &self,
        rows: I,
        ingestor: &BatchIngestor,
        summary: &mut Summary,
    ) -> Result<()>
    where
        I: IntoIterator<Item = Result<RawRow>>,
    {
        for row in rows {
            let row = row?;
            if self.consume(self.transformer.transform(&row), ingestor, summary)? {
                break;
            }
        }
        Ok(())
    }

    /// Transform windows of rows on scoped threads, then consume the outcomes
    /// in source order so results match the sequential path exactly.
    fn drive_concurrent<I>(
        &self,
        rows: I,
        ingestor: &BatchIngestor,
        summary: &mut Summary,
    ) -> Result<()>
    where
        I: IntoIterator<Item = Result<RawRow>>,
    {
        let window = self.config.workers * ROWS_PER_WORKER;
        let mut rows = rows.into_iter();

        loop {
            let mut buf = Vec::with_capacity(window);
            let mut fault = None;
            for row in rows.by_ref() {
                match row {
                    Ok(row) => {
                        buf.push(row);
                        if buf.len() == window {
                            break;
                        }
                    }
                    Err(e) => {
                        fault = Some(e);
                        break;
                    }
                }
            }

            for outcome in self.transform_parallel(&buf) {
                if self.consume(outcome, ingestor, summary)? {
                    return Ok(());
                }
            }
            if let Some(e) = fault {
                return Err(e);
            }
            if buf.len() < window {
                return Ok(());
            }
        }
    }

    fn transform_parallel(&self, rows: &[RawRow]) -> Vec<std::result::Result<Record, Rejection>> {
        if rows.is_empty() {
            return Vec::new();
        }
        let chunk = rows.len().div_ceil(self.config.workers);
        let transformer = &self.transformer;

        thread::scope(|s| {
            let handles: Vec<_> = rows
                .chunks(chunk)
                .map(|part| {
                    s.spawn(move || {
                        part.iter()
                            .map(|row| transformer.transform(row))
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            handles
                .into_iter()
                .flat_map(|h| h.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)))
                .collect()
        })
    }

    /// Account for one examined row. Returns `true` once the limit is passed.
    ///
    /// The check runs after each accept with a strict `>`, so a limit of `L`
    /// lets `L + 1` records through and no row after that one is read.
    fn consume(
        &self,
        outcome: std::result::Result<Record, Rejection>,
        ingestor: &BatchIngestor,
        summary: &mut Summary,
    ) -> Result<bool> {
        summary.read += 1;
        match outcome {
            Ok(record) => {
                summary.accepted += 1;
                if let Some(result) = ingestor.add(record).map_err(|e| self.sink_error(e))? {
                    summary.add_flushed(&[result]);
                }
                let over = matches!(self.config.limit, Some(limit) if summary.accepted > limit);
                summary.stopped_at_limit = over;
                Ok(over)
            }
            Err(rejection) => {
                summary.reject(&rejection);
                Ok(false)
            }
        }
    }
}

/// One ingestor for several pipelines, each collection batched with its own
/// job's options. Defaults come from the first pipeline.
pub fn shared_ingestor(
    pipelines: &[IngestionPipeline<'_>],
    sink: Arc<dyn CollectionSink>,
) -> BatchIngestor {
    let defaults = pipelines
        .first()
        .map(|p| p.config().batch_options())
        .unwrap_or_default();
    pipelines
        .iter()
        .fold(BatchIngestor::new(sink, defaults), |ingestor, p| {
            ingestor.with_collection_options(&p.schema().name, p.config().batch_options())
        })
}

/// Fold a failed cleanup flush into the error that stopped the run, keeping
/// the undelivered records with it.
fn flush_failed(cause: IngestError, flush: IngestError, extra: Vec<Record>) -> IngestError {
    match flush {
        IngestError::Sink {
            collection,
            source,
            mut pending,
        } => {
            pending.extend(extra);
            log::warn!(
                "'{}': flush after failed run also failed, {} record(s) undelivered",
                collection,
                pending.len()
            );
            IngestError::Unflushed {
                cause: Box::new(cause),
                collection,
                source,
                pending,
            }
        }
        other => {
            log::warn!("flush after failed run also failed: {}", other);
            cause
        }
    }
}

fn log_summary(summary: &Summary) {
    log::info!(
        "'{}': read={} accepted={} rejected={} flushed={} in {}ms",
        summary.collection,
        summary.read,
        summary.accepted,
        summary.rejected,
        summary.flushed,
        summary.elapsed_ms
    );
}

// ── Tests ─────────────────────────────────────────────────────────────────────
