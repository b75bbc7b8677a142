// VecIngest — schema.rs
// Field specs, collection schemas, and the in-memory schema registry.
// Also defines the two built-in feature collections.
// Author: d65v <https://github.com/d65v>

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::{IngestError, Result};

// ── Field Specs ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldKind {
    Int64,
    VarChar { max_len: usize },
    FloatVector { dim: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    pub is_primary_key: bool,
}

impl FieldSpec {
    pub fn int64(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Int64)
    }

    pub fn varchar(name: impl Into<String>, max_len: usize) -> Self {
        Self::new(name, FieldKind::VarChar { max_len })
    }

    pub fn float_vector(name: impl Into<String>, dim: usize) -> Self {
        Self::new(name, FieldKind::FloatVector { dim })
    }

    /// Mark this field as the collection's primary key.
    pub fn primary(mut self) -> Self {
        self.is_primary_key = true;
        self
    }

    fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            is_primary_key: false,
        }
    }
}

// ── Collection Schema ─────────────────────────────────────────────────────────

/// Ordered field list; position `i` maps to data column `i` of a row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionSchema {
    pub name: String,
    pub description: String,
    pub fields: Vec<FieldSpec>,
}

impl CollectionSchema {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        fields: Vec<FieldSpec>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            fields,
        }
    }

    /// Check the structural invariants.
    ///
    /// # Errors
    /// `IngestError::InvalidSchema` on an empty name or field list, duplicate
    /// field names, a primary key count other than one, a vector primary key,
    /// or a zero `max_len` / `dim`.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| IngestError::InvalidSchema {
            schema: self.name.clone(),
            reason,
        };

        if self.name.trim().is_empty() {
            return Err(invalid("collection name is empty".into()));
        }
        if self.fields.is_empty() {
            return Err(invalid("schema has no fields".into()));
        }

        let mut seen = HashSet::new();
        for field in &self.fields {
            if field.name.trim().is_empty() {
                return Err(invalid("field name is empty".into()));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(invalid(format!("duplicate field '{}'", field.name)));
            }
            match field.kind {
                FieldKind::VarChar { max_len: 0 } => {
                    return Err(invalid(format!("field '{}': max_len must be > 0", field.name)));
                }
                FieldKind::FloatVector { dim: 0 } => {
                    return Err(invalid(format!("field '{}': dim must be > 0", field.name)));
                }
                _ => {}
            }
        }

        let keys: Vec<&FieldSpec> = self.fields.iter().filter(|f| f.is_primary_key).collect();
        match keys.as_slice() {
            [key] if matches!(key.kind, FieldKind::FloatVector { .. }) => Err(invalid(format!(
                "primary key '{}' cannot be a vector",
                key.name
            ))),
            [_] => Ok(()),
            _ => Err(invalid(format!(
                "expected exactly one primary key, found {}",
                keys.len()
            ))),
        }
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn primary_key(&self) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.is_primary_key)
    }

    /// Positions of every Int64 field, in order.
    pub fn int64_positions(&self) -> Vec<usize> {
        self.fields
            .iter()
            .enumerate()
            .filter(|(_, f)| f.kind == FieldKind::Int64)
            .map(|(i, _)| i)
            .collect()
    }
}

// ── Registry ──────────────────────────────────────────────────────────────────

/// Named schemas, owned for the lifetime of the process.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<String, CollectionSchema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the movie and user feature schemas.
    pub fn with_builtin() -> Result<Self> {
        let mut registry = Self::new();
        registry.register(movie_feature_schema())?;
        registry.register(user_feature_schema())?;
        Ok(registry)
    }

    /// Validate and store a schema under its name.
    ///
    /// # Errors
    /// `InvalidSchema` if validation fails, `DuplicateSchema` if the name is taken.
    pub fn register(&mut self, schema: CollectionSchema) -> Result<()> {
        schema.validate()?;
        if self.schemas.contains_key(&schema.name) {
            return Err(IngestError::DuplicateSchema { name: schema.name });
        }
        log::debug!(
            "registered schema '{}' ({} fields)",
            schema.name,
            schema.fields.len()
        );
        self.schemas.insert(schema.name.clone(), schema);
        Ok(())
    }

    /// # Errors
    /// `UnknownSchema` if nothing is registered under `name`.
    pub fn get(&self, name: &str) -> Result<&CollectionSchema> {
        self.schemas.get(name).ok_or_else(|| IngestError::UnknownSchema {
            name: name.to_string(),
        })
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.schemas.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}

// ── Built-in Schemas ──────────────────────────────────────────────────────────

pub const MOVIE_FEATURE_COLLECTION: &str = "movie_feature_collection";
pub const USER_FEATURE_COLLECTION: &str = "user_feature_collection";

pub const FEATURE_DIM: usize = 128;
pub const FEATURE_TEXT_MAX_LEN: usize = 10_000;

/// Int64 columns of the movie CSV (after the index column is dropped).
pub const MOVIE_NUMERIC_POSITIONS: [usize; 7] = [5, 8, 12, 19, 20, 25, 26];
pub const USER_NUMERIC_POSITIONS: [usize; 1] = [0];

pub fn movie_feature_schema() -> CollectionSchema {
    let text = |name: &str| FieldSpec::varchar(name, FEATURE_TEXT_MAX_LEN);

    CollectionSchema::new(
        MOVIE_FEATURE_COLLECTION,
        "Description: schema for movie feature data",
        vec![
            text("cast"),
            text("crew"),
            text("keywords"),
            text("adult"),
            text("belongs_to_collection"),
            FieldSpec::int64("budget"),
            text("genres"),
            text("homepage"),
            FieldSpec::int64("id").primary(),
            text("original_language"),
            text("original_title"),
            text("overview"),
            FieldSpec::int64("popularity"),
            text("poster_path"),
            text("production_companies"),
            text("production_countries"),
            text("release_date"),
            text("release_date_timestamp"),
            text("have_release_date"),
            FieldSpec::int64("revenue"),
            FieldSpec::int64("runtime"),
            text("spoken_languages"),
            text("status"),
            text("tagline"),
            text("title"),
            FieldSpec::int64("vote_average"),
            FieldSpec::int64("vote_count"),
            FieldSpec::float_vector("movie_feature", FEATURE_DIM),
        ],
    )
}

pub fn user_feature_schema() -> CollectionSchema {
    CollectionSchema::new(
        USER_FEATURE_COLLECTION,
        "Description: schema for movie user feature data",
        vec![
            FieldSpec::int64("user_id").primary(),
            FieldSpec::varchar("user_feature_20230101", FEATURE_TEXT_MAX_LEN),
            FieldSpec::varchar("user_feature_20220101", FEATURE_TEXT_MAX_LEN),
            FieldSpec::varchar("user_feature_20200101", FEATURE_TEXT_MAX_LEN),
            FieldSpec::varchar("user_feature_20150101", FEATURE_TEXT_MAX_LEN),
            FieldSpec::float_vector("user_feature_20100101", FEATURE_DIM),
        ],
    )
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn demo_schema() -> CollectionSchema {
        CollectionSchema::new(
            "demo",
            "demo collection",
            vec![
                FieldSpec::int64("id").primary(),
                FieldSpec::varchar("name", 5),
                FieldSpec::float_vector("vec", 2),
            ],
        )
    }

    fn assert_invalid(schema: CollectionSchema) {
        let err = SchemaRegistry::new().register(schema).unwrap_err();
        assert!(matches!(err, IngestError::InvalidSchema { .. }), "got {:?}", err);
    }

    #[test]
    fn test_register_then_get_returns_equal_schema() {
        let mut registry = SchemaRegistry::new();
        registry.register(demo_schema()).unwrap();
        assert_eq!(registry.get("demo").unwrap(), &demo_schema());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_duplicate_schema() {
        let mut registry = SchemaRegistry::new();
        registry.register(demo_schema()).unwrap();
        let err = registry.register(demo_schema()).unwrap_err();
        assert!(matches!(err, IngestError::DuplicateSchema { name } if name == "demo"));
    }

    #[test]
    fn test_unknown_schema() {
        let registry = SchemaRegistry::new();
        assert!(matches!(
            registry.get("ghost").unwrap_err(),
            IngestError::UnknownSchema { .. }
        ));
    }

    #[test]
    fn test_missing_primary_key() {
        let mut schema = demo_schema();
        schema.fields[0].is_primary_key = false;
        assert_invalid(schema);
    }

    #[test]
    fn test_two_primary_keys() {
        let mut schema = demo_schema();
        schema.fields[1].is_primary_key = true;
        assert_invalid(schema);
    }

    #[test]
    fn test_vector_primary_key() {
        let mut schema = demo_schema();
        schema.fields[0].is_primary_key = false;
        schema.fields[2].is_primary_key = true;
        assert_invalid(schema);
    }

    #[test]
    fn test_zero_max_len_and_dim() {
        let mut schema = demo_schema();
        schema.fields[1] = FieldSpec::varchar("name", 0);
        assert_invalid(schema);

        let mut schema = demo_schema();
        schema.fields[2] = FieldSpec::float_vector("vec", 0);
        assert_invalid(schema);
    }

    #[test]
    fn test_duplicate_field_names() {
        let mut schema = demo_schema();
        schema.fields.push(FieldSpec::varchar("name", 3));
        assert_invalid(schema);
    }

    #[test]
    fn test_empty_schema() {
        assert_invalid(CollectionSchema::new("empty", "", vec![]));
    }

    #[test]
    fn test_builtin_movie_schema_layout() {
        let schema = movie_feature_schema();
        assert_eq!(schema.field_count(), 28);
        assert_eq!(schema.primary_key().map(|f| f.name.as_str()), Some("id"));
        assert_eq!(schema.position("id"), Some(8));
        assert_eq!(schema.int64_positions(), MOVIE_NUMERIC_POSITIONS.to_vec());
        assert_eq!(
            schema.fields.last().map(|f| &f.kind),
            Some(&FieldKind::FloatVector { dim: 128 })
        );
    }

    #[test]
    fn test_builtin_registry() {
        let registry = SchemaRegistry::with_builtin().unwrap();
        assert_eq!(
            registry.names(),
            vec![MOVIE_FEATURE_COLLECTION, USER_FEATURE_COLLECTION]
        );
        let users = registry.get(USER_FEATURE_COLLECTION).unwrap();
        assert_eq!(users.int64_positions(), USER_NUMERIC_POSITIONS.to_vec());
    }
}
