// VecIngest — example/ingest.rs
// Demonstrates schema registration, row transformation and batched ingestion
// into an in-memory sink.
// Run with:  cargo run --example ingest  (from vingest/ directory)

use std::sync::Arc;

use vingest::{
    CollectionSchema, FieldSpec, IngestionPipeline, MemorySink, PipelineConfig, RawRow,
    SchemaRegistry,
};

fn main() {
    env_logger::init();

    println!("── VecIngest Basic Example ───────────────────");

    let mut registry = SchemaRegistry::new();
    registry
        .register(CollectionSchema::new(
            "animals",
            "tiny demo collection",
            vec![
                FieldSpec::int64("id").primary(),
                FieldSpec::varchar("name", 5),
                FieldSpec::float_vector("embedding", 2),
            ],
        ))
        .expect("schema is valid");

    let config = PipelineConfig {
        schema_name: "animals".into(),
        numeric_positions: Some(vec![0]),
        drop_index_column: false,
        batch_size: 2,
        limit: None,
        ..PipelineConfig::default()
    };
    let pipeline = IngestionPipeline::new(&registry, config).expect("pipeline setup");

    let sink = Arc::new(MemorySink::new());
    pipeline
        .prepare_collection(sink.as_ref())
        .expect("create collection");

    let rows = vec![
        RawRow::from_cells(2, ["1", "cat", "[0.9, 0.1]"]),
        RawRow::from_cells(3, ["2", "dog's", "[0.8, 0.2]"]),
        RawRow::from_cells(4, ["3", "hippopotamus", "[0.1, 0.9]"]), // too long
        RawRow::from_cells(5, ["4", "fish", "[0.5]"]),              // wrong dim
        RawRow::from_cells(6, ["5", "bus"]),                        // short row
        RawRow::from_cells(7, ["6", "owl", "(0.3, 0.7)"]),
    ];

    let summary = pipeline
        .run(rows.into_iter().map(Ok), sink.clone())
        .expect("ingestion");

    println!(
        "read={} accepted={} rejected={} flushed={}",
        summary.read, summary.accepted, summary.rejected, summary.flushed
    );
    for (kind, count) in &summary.rejections {
        println!("  rejected {:16} x{}", kind, count);
    }

    println!("\nStored records ({} insert calls):", sink.insert_calls("animals"));
    for record in sink.records("animals").unwrap_or_default() {
        println!("  {:?}", record.fields);
    }

    println!("\nExpected: cat, dog s, owl");
}
