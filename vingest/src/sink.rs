// VecIngest — sink.rs
// The collection sink interface and two implementations:
// an in-memory store and a bincode flat-file store.
// Author: d65v <https://github.com/d65v>

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crate::record::Record;
use crate::schema::CollectionSchema;
use crate::SinkError;

// ── Sink Interface ────────────────────────────────────────────────────────────

/// Narrow view of an external vector store: collections and inserts only.
/// Search, indexing and deletes stay on the store's own API.
pub trait CollectionSink: Send + Sync {
    fn create_collection(&self, schema: &CollectionSchema) -> Result<(), SinkError>;

    /// Returns `true` if the collection existed.
    fn drop_collection(&self, name: &str) -> Result<bool, SinkError>;

    /// Insert one batch. Must be all-or-nothing.
    fn insert(&self, collection: &str, batch: &[Record]) -> Result<(), SinkError>;
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ── Memory Sink ───────────────────────────────────────────────────────────────

#[derive(Debug)]
struct MemCollection {
    schema: CollectionSchema,
    records: Vec<Record>,
    insert_calls: usize,
}

/// In-process store. Used for dry runs, tests and benches.
#[derive(Debug, Default)]
pub struct MemorySink {
    collections: Mutex<HashMap<String, MemCollection>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored records in insertion order.
    pub fn records(&self, collection: &str) -> Option<Vec<Record>> {
        lock(&self.collections)
            .get(collection)
            .map(|c| c.records.clone())
    }

    pub fn len(&self, collection: &str) -> usize {
        lock(&self.collections)
            .get(collection)
            .map_or(0, |c| c.records.len())
    }

    /// Number of `insert` calls that reached this collection.
    pub fn insert_calls(&self, collection: &str) -> usize {
        lock(&self.collections)
            .get(collection)
            .map_or(0, |c| c.insert_calls)
    }

    pub fn schema(&self, collection: &str) -> Option<CollectionSchema> {
        lock(&self.collections)
            .get(collection)
            .map(|c| c.schema.clone())
    }
}

impl CollectionSink for MemorySink {
    fn create_collection(&self, schema: &CollectionSchema) -> Result<(), SinkError> {
        let mut collections = lock(&self.collections);
        if collections.contains_key(&schema.name) {
            return Err(SinkError::CollectionExists(schema.name.clone()));
        }
        collections.insert(
            schema.name.clone(),
            MemCollection {
                schema: schema.clone(),
                records: Vec::new(),
                insert_calls: 0,
            },
        );
        Ok(())
    }

    fn drop_collection(&self, name: &str) -> Result<bool, SinkError> {
        Ok(lock(&self.collections).remove(name).is_some())
    }

    fn insert(&self, collection: &str, batch: &[Record]) -> Result<(), SinkError> {
        let mut collections = lock(&self.collections);
        let target = collections
            .get_mut(collection)
            .ok_or_else(|| SinkError::UnknownCollection(collection.to_string()))?;
        target.records.extend_from_slice(batch);
        target.insert_calls += 1;
        Ok(())
    }
}

// ── File Sink ─────────────────────────────────────────────────────────────────

/// Flat-file store: `<root>/<collection>.bin` holds bincode-encoded batches
/// back to back, `<root>/<collection>.schema.json` the schema.
#[derive(Debug)]
pub struct FileSink {
    root: PathBuf,
    // Serialises appends so batches never interleave within a file.
    write_lock: Mutex<()>,
}

impl FileSink {
    /// Open (creating if needed) a storage directory.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, SinkError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn data_path(&self, collection: &str) -> PathBuf {
        self.root.join(format!("{}.bin", collection))
    }

    fn schema_path(&self, collection: &str) -> PathBuf {
        self.root.join(format!("{}.schema.json", collection))
    }

    /// Decode every stored record of `collection`, in insertion order.
    pub fn read_collection(&self, collection: &str) -> Result<Vec<Record>, SinkError> {
        let path = self.data_path(collection);
        if !path.exists() {
            return Err(SinkError::UnknownCollection(collection.to_string()));
        }

        let bytes = fs::read(&path)?;
        let total = bytes.len() as u64;
        let mut cursor = Cursor::new(bytes);
        let mut records = Vec::new();
        while cursor.position() < total {
            let batch: Vec<Record> = bincode::deserialize_from(&mut cursor)?;
            records.extend(batch);
        }
        Ok(records)
    }
}

impl CollectionSink for FileSink {
    fn create_collection(&self, schema: &CollectionSchema) -> Result<(), SinkError> {
        let _guard = lock(&self.write_lock);
        let data = self.data_path(&schema.name);
        if data.exists() {
            return Err(SinkError::CollectionExists(schema.name.clone()));
        }
        fs::write(
            self.schema_path(&schema.name),
            serde_json::to_vec_pretty(schema)?,
        )?;
        File::create(data)?;
        Ok(())
    }

    fn drop_collection(&self, name: &str) -> Result<bool, SinkError> {
        let _guard = lock(&self.write_lock);
        let data = self.data_path(name);
        let existed = data.exists();
        if existed {
            fs::remove_file(data)?;
        }
        let schema = self.schema_path(name);
        if schema.exists() {
            fs::remove_file(schema)?;
        }
        Ok(existed)
    }

    fn insert(&self, collection: &str, batch: &[Record]) -> Result<(), SinkError> {
        let _guard = lock(&self.write_lock);
        let path = self.data_path(collection);
        if !path.exists() {
            return Err(SinkError::UnknownCollection(collection.to_string()));
        }

        // Encode fully before touching the file so a failed encode appends nothing.
        let encoded = bincode::serialize(batch)?;
        let file = OpenOptions::new().append(true).open(path)?;
        append_or_rollback(&file, |file| {
            let mut out = BufWriter::new(file);
            out.write_all(&encoded)?;
            out.flush()
        })?;
        Ok(())
    }
}

/// Run `write` against `file`; if it fails, truncate back to the starting
/// length so no partial frame is left behind.
fn append_or_rollback<F>(file: &File, write: F) -> std::io::Result<()>
where
    F: FnOnce(&File) -> std::io::Result<()>,
{
    let start = file.metadata()?.len();
    if let Err(e) = write(file) {
        if let Err(undo) = file.set_len(start) {
            log::error!("could not roll back partial write to {} bytes: {}", start, undo);
        }
        return Err(e);
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::FieldValue;
    use crate::schema::FieldSpec;

    fn schema(name: &str) -> CollectionSchema {
        CollectionSchema::new(
            name,
            "test",
            vec![
                FieldSpec::int64("id").primary(),
                FieldSpec::float_vector("vec", 2),
            ],
        )
    }

    fn record(collection: &str, id: i64) -> Record {
        Record {
            collection: collection.into(),
            fields: vec![
                ("id".into(), FieldValue::Int64(id)),
                ("vec".into(), FieldValue::FloatVector(vec![id as f64, 0.5])),
            ],
        }
    }

    #[test]
    fn test_memory_sink_lifecycle() {
        let sink = MemorySink::new();
        sink.create_collection(&schema("c")).unwrap();
        assert!(matches!(
            sink.create_collection(&schema("c")),
            Err(SinkError::CollectionExists(_))
        ));

        sink.insert("c", &[record("c", 1), record("c", 2)]).unwrap();
        sink.insert("c", &[record("c", 3)]).unwrap();
        assert_eq!(sink.len("c"), 3);
        assert_eq!(sink.insert_calls("c"), 2);
        assert_eq!(sink.schema("c"), Some(schema("c")));

        assert!(sink.drop_collection("c").unwrap());
        assert!(!sink.drop_collection("c").unwrap());
        assert_eq!(sink.len("c"), 0);
    }

    #[test]
    fn test_memory_sink_unknown_collection() {
        let sink = MemorySink::new();
        assert!(matches!(
            sink.insert("nope", &[record("nope", 1)]),
            Err(SinkError::UnknownCollection(_))
        ));
    }

    #[test]
    fn test_file_sink_roundtrip_keeps_order() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileSink::open(dir.path()).unwrap();
        sink.create_collection(&schema("c")).unwrap();

        sink.insert("c", &[record("c", 1), record("c", 2)]).unwrap();
        sink.insert("c", &[record("c", 3)]).unwrap();

        let stored = sink.read_collection("c").unwrap();
        let ids: Vec<i64> = stored
            .iter()
            .filter_map(|r| r.get("id").and_then(FieldValue::as_i64))
            .collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(stored[2], record("c", 3));
        assert!(dir.path().join("c.schema.json").exists());
    }

    #[test]
    fn test_file_sink_drop_and_recreate() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileSink::open(dir.path()).unwrap();
        assert!(!sink.drop_collection("c").unwrap());

        sink.create_collection(&schema("c")).unwrap();
        sink.insert("c", &[record("c", 1)]).unwrap();
        assert!(sink.drop_collection("c").unwrap());

        sink.create_collection(&schema("c")).unwrap();
        assert!(sink.read_collection("c").unwrap().is_empty());
    }

    #[test]
    fn test_file_sink_failed_write_leaves_no_partial_frame() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileSink::open(dir.path()).unwrap();
        sink.create_collection(&schema("c")).unwrap();
        sink.insert("c", &[record("c", 1)]).unwrap();

        let path = dir.path().join("c.bin");
        let before = fs::metadata(&path).unwrap().len();
        let file = OpenOptions::new().append(true).open(&path).unwrap();
        let half = bincode::serialize(&[record("c", 2)]).unwrap();
        let err = append_or_rollback(&file, |mut f| {
            f.write_all(&half[..half.len() / 2])?;
            Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full"))
        })
        .unwrap_err();
        assert_eq!(err.to_string(), "disk full");
        assert_eq!(fs::metadata(&path).unwrap().len(), before);

        sink.insert("c", &[record("c", 3)]).unwrap();
        let ids: Vec<i64> = sink
            .read_collection("c")
            .unwrap()
            .iter()
            .filter_map(|r| r.get("id").and_then(FieldValue::as_i64))
            .collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[test]
    fn test_file_sink_unknown_collection() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileSink::open(dir.path()).unwrap();
        assert!(matches!(
            sink.insert("ghost", &[]),
            Err(SinkError::UnknownCollection(_))
        ));
        assert!(matches!(
            sink.read_collection("ghost"),
            Err(SinkError::UnknownCollection(_))
        ));
    }
}
