// VecIngest — batch.rs
// Per-collection batch buffering and submission to a collection sink.
// Author: d65v <https://github.com/d65v>
//
// One pending batch per collection, each behind its own mutex. The mutex is
// held across the sink call, so a collection never has two inserts in flight.

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::record::Record;
use crate::sink::CollectionSink;
use crate::{IngestError, SinkError};

// ── Options / Results ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct BatchOptions {
    /// Flush once this many records are pending
    pub batch_size: usize,
    /// Also flush once the pending byte estimate reaches this
    pub max_batch_bytes: Option<usize>,
    /// Abandon a sink call after this long
    pub submit_timeout: Option<Duration>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            batch_size: 1,
            max_batch_bytes: None,
            submit_timeout: None,
        }
    }
}

/// Outcome of one successful flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestResult {
    pub collection: String,
    pub accepted: usize,
}

// ── Pending Batch ─────────────────────────────────────────────────────────────

/// An insert abandoned after a timeout. Its batch is neither pending nor
/// delivered until the worker reports back.
#[derive(Debug)]
struct Stalled {
    worker: JoinHandle<()>,
    outcome: Receiver<Result<(), SinkError>>,
    batch: Vec<Record>,
}

#[derive(Debug, Default)]
struct Pending {
    records: Vec<Record>,
    bytes: usize,
    stalled: Option<Stalled>,
}

impl Pending {
    /// Records not yet known to be delivered, in flight or queued.
    fn undelivered(&self) -> usize {
        self.records.len() + self.stalled.as_ref().map_or(0, |s| s.batch.len())
    }

    fn push(&mut self, record: Record) {
        self.bytes += record.estimated_size();
        self.records.push(record);
    }

    fn take(&mut self) -> Vec<Record> {
        self.bytes = 0;
        std::mem::take(&mut self.records)
    }

    fn restore(&mut self, records: Vec<Record>) {
        self.bytes = records.iter().map(Record::estimated_size).sum();
        self.records = records;
    }

    /// Put a batch back ahead of whatever was queued after it.
    fn requeue(&mut self, mut batch: Vec<Record>) {
        batch.extend(self.take());
        self.restore(batch);
    }

    /// Everything undelivered, oldest first. Forgets any stalled worker.
    fn take_all(&mut self) -> Vec<Record> {
        let mut out = self.stalled.take().map(|s| s.batch).unwrap_or_default();
        out.extend(self.take());
        out
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ── Batch Ingestor ────────────────────────────────────────────────────────────

/// Buffers records per collection and submits them in bounded batches.
///
/// A failed flush leaves the batch pending and intact; nothing is retried
/// automatically. A timed-out batch is held aside until its abandoned insert
/// reports back: delivered, it is dropped; failed, it is queued again and the
/// failure is returned. [`BatchIngestor::finalize`] must run once at shutdown,
/// otherwise whatever is still buffered is dropped (with a warning).
pub struct BatchIngestor {
    sink: Arc<dyn CollectionSink>,
    options: BatchOptions,
    overrides: HashMap<String, BatchOptions>,
    slots: Mutex<HashMap<String, Arc<Mutex<Pending>>>>,
}

impl BatchIngestor {
    pub fn new(sink: Arc<dyn CollectionSink>, options: BatchOptions) -> Self {
        Self {
            sink,
            options,
            overrides: HashMap::new(),
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Use `options` instead of the defaults for one collection.
    pub fn with_collection_options(mut self, collection: &str, options: BatchOptions) -> Self {
        self.overrides.insert(collection.to_string(), options);
        self
    }

    /// Options in effect for `collection`.
    pub fn options(&self, collection: &str) -> &BatchOptions {
        self.overrides.get(collection).unwrap_or(&self.options)
    }

    fn slot(&self, collection: &str) -> Arc<Mutex<Pending>> {
        let mut slots = lock(&self.slots);
        Arc::clone(slots.entry(collection.to_string()).or_default())
    }

    /// Queue a record for its collection, flushing if the batch is full.
    ///
    /// Returns the flush outcome when one happened. On error the record is
    /// kept pending along with the rest of the batch.
    pub fn add(&self, record: Record) -> Result<Option<IngestResult>, SinkError> {
        let collection = record.collection.clone();
        let slot = self.slot(&collection);
        let mut pending = lock(&slot);
        pending.push(record);

        let options = self.options(&collection);
        let full = pending.records.len() >= options.batch_size
            || options.max_batch_bytes.is_some_and(|max| pending.bytes >= max);
        if !full {
            return Ok(None);
        }
        self.submit(&collection, &mut pending).map(Some)
    }

    /// Submit whatever is pending for `collection`, even a partial batch.
    pub fn flush(&self, collection: &str) -> Result<IngestResult, SinkError> {
        let slot = self.slot(collection);
        let mut pending = lock(&slot);
        self.submit(collection, &mut pending)
    }

    /// Records of `collection` not yet known to be delivered, including a
    /// stalled batch.
    pub fn pending_len(&self, collection: &str) -> usize {
        let slot = lock(&self.slots).get(collection).cloned();
        slot.map_or(0, |slot| lock(&slot).undelivered())
    }

    /// Remove and return the undelivered records of `collection` without
    /// submitting them, oldest first.
    ///
    /// A stalled batch is included and its insert is no longer tracked; it
    /// may still land in the sink.
    pub fn take_pending(&self, collection: &str) -> Vec<Record> {
        let slot = lock(&self.slots).get(collection).cloned();
        slot.map(|slot| lock(&slot).take_all()).unwrap_or_default()
    }

    /// Flush every collection's remaining partial batch, in name order.
    ///
    /// # Errors
    /// Stops at the first failing collection and returns `IngestError::Sink`
    /// carrying every record that was not delivered: the failed batch first,
    /// then the collections that were not attempted.
    pub fn finalize(self) -> Result<Vec<IngestResult>, IngestError> {
        let mut names: Vec<String> = lock(&self.slots).keys().cloned().collect();
        names.sort_unstable();

        let mut results = Vec::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
            if self.pending_len(name) == 0 {
                continue;
            }
            match self.flush(name) {
                Ok(result) if result.accepted == 0 => {}
                Ok(result) => results.push(result),
                Err(source) => {
                    let mut pending = self.take_pending(name);
                    for rest in &names[i + 1..] {
                        pending.extend(self.take_pending(rest));
                    }
                    return Err(IngestError::Sink {
                        collection: name.clone(),
                        source,
                        pending,
                    });
                }
            }
        }
        Ok(results)
    }

    /// Drain every buffered record without submitting anything.
    pub fn into_pending(self) -> Vec<Record> {
        let mut names: Vec<String> = lock(&self.slots).keys().cloned().collect();
        names.sort_unstable();
        names.iter().flat_map(|name| self.take_pending(name)).collect()
    }

    // ── Private: Submission ───────────────────────────────────────────────────

    fn submit(&self, collection: &str, pending: &mut Pending) -> Result<IngestResult, SinkError> {
        settle_stalled(collection, pending)?;

        let count = pending.records.len();
        if count == 0 {
            return Ok(IngestResult {
                collection: collection.to_string(),
                accepted: 0,
            });
        }

        let outcome = match self.options(collection).submit_timeout {
            None => self.sink.insert(collection, &pending.records),
            Some(after) => self.submit_with_timeout(collection, pending, after),
        };

        match outcome {
            Ok(()) => {
                pending.take();
                log::debug!("'{}': flushed {} record(s)", collection, count);
                Ok(IngestResult {
                    collection: collection.to_string(),
                    accepted: count,
                })
            }
            Err(e) => {
                log::warn!("'{}': insert of {} record(s) failed: {}", collection, count, e);
                Err(e)
            }
        }
    }

    /// Run the insert on a helper thread and wait at most `after`.
    /// On a timeout the batch is held in `pending.stalled`; on any other
    /// error it is back in `pending.records`.
    fn submit_with_timeout(
        &self,
        collection: &str,
        pending: &mut Pending,
        after: Duration,
    ) -> Result<(), SinkError> {
        let batch = Arc::new(pending.take());
        let (tx, rx) = mpsc::channel();

        let worker = {
            let sink = Arc::clone(&self.sink);
            let batch = Arc::clone(&batch);
            let name = collection.to_string();
            thread::Builder::new()
                .name(format!("vecingest-insert-{}", collection))
                .spawn(move || {
                    let _ = tx.send(sink.insert(&name, &batch));
                })
        };
        let worker = match worker {
            Ok(handle) => handle,
            Err(e) => {
                pending.restore(unwrap_batch(batch));
                return Err(SinkError::Io(e));
            }
        };

        match rx.recv_timeout(after) {
            Ok(result) => {
                let _ = worker.join();
                if result.is_err() {
                    pending.restore(unwrap_batch(batch));
                }
                result
            }
            Err(RecvTimeoutError::Timeout) => {
                log::warn!("'{}': insert timed out after {:?}", collection, after);
                pending.stalled = Some(Stalled {
                    worker,
                    outcome: rx,
                    batch: unwrap_batch(batch),
                });
                Err(SinkError::Timeout {
                    collection: collection.to_string(),
                    after,
                })
            }
            Err(RecvTimeoutError::Disconnected) => {
                let _ = worker.join();
                pending.restore(unwrap_batch(batch));
                Err(SinkError::Backend("insert worker panicked".into()))
            }
        }
    }
}

/// Resolve an abandoned insert before anything else is submitted.
///
/// Still running: `Stalled`. Delivered: the held batch is dropped. Failed:
/// the batch is queued again, ahead of newer records, and the failure is
/// returned without resubmitting.
fn settle_stalled(collection: &str, pending: &mut Pending) -> Result<(), SinkError> {
    let Some(stalled) = pending.stalled.take() else {
        return Ok(());
    };
    if !stalled.worker.is_finished() {
        pending.stalled = Some(stalled);
        log::warn!("'{}': previous insert still stalled, not submitting", collection);
        return Err(SinkError::Stalled {
            collection: collection.to_string(),
        });
    }

    let Stalled {
        worker,
        outcome,
        batch,
    } = stalled;
    let _ = worker.join();
    let result = outcome
        .try_recv()
        .unwrap_or_else(|_| Err(SinkError::Backend("insert worker panicked".into())));
    match result {
        Ok(()) => {
            log::info!(
                "'{}': abandoned insert of {} record(s) completed late",
                collection,
                batch.len()
            );
            Ok(())
        }
        Err(e) => {
            log::warn!(
                "'{}': abandoned insert of {} record(s) failed: {}",
                collection,
                batch.len(),
                e
            );
            pending.requeue(batch);
            Err(e)
        }
    }
}

/// Take the batch back, copying it only if the worker still holds a reference.
fn unwrap_batch(batch: Arc<Vec<Record>>) -> Vec<Record> {
    Arc::try_unwrap(batch).unwrap_or_else(|shared| shared.as_ref().clone())
}

impl Drop for BatchIngestor {
    fn drop(&mut self) {
        let slots = self
            .slots
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for (name, slot) in slots.iter() {
            let left = lock(slot).undelivered();
            if left > 0 {
                log::warn!("'{}': dropping {} unflushed record(s)", name, left);
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
