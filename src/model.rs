//! Binding between user models and stored documents.
//!
//! A model declares its collection and a static list of field descriptors. The descriptors drive
//! two things: the registration-time check rejecting raw time fields, and the choice of ordering
//! (alphabetic vs numeric) when a query orders by a field. Field values themselves travel through
//! `serde`.

use crate::dates::DateTime;
use crate::errors::DbError;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};

pub const METADATA_KEY: &str = "@metadata";
pub(crate) const META_ID: &str = "@id";
pub(crate) const META_CHANGE_VECTOR: &str = "@change-vector";
pub(crate) const META_COLLECTION: &str = "@collection";
pub(crate) const META_EXPIRES: &str = "@expires";
pub(crate) const META_PROJECTION: &str = "@projection";

// Nested descriptor lists deeper than this are treated as cycles.
const MAX_FIELD_DEPTH: usize = 32;

/// Identity and concurrency state of a stored model.
///
/// Embed it in every model behind `#[serde(skip)]`; it is carried in the document metadata and
/// the request URL, never in the document body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelTracking {
    pub id: String,
    pub change_vector: String,
    pub expires: DateTime,
}

impl ModelTracking {
    #[must_use]
    pub fn with_id(id: impl Into<String>) -> Self {
        Self { id: id.into(), ..Self::default() }
    }

    /// True until the model has been read from or written to the server.
    #[must_use]
    pub fn is_new(&self) -> bool {
        self.change_vector.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
pub enum FieldKind {
    String,
    Integer,
    Float,
    Bool,
    Date,
    DateTime,
    /// A bare calendar value. Never valid inside a model.
    RawTime,
    List,
    Map,
    Struct(fn() -> &'static [FieldDescriptor]),
}

#[derive(Debug, Clone, Copy)]
pub struct FieldDescriptor {
    /// Key of the field in the stored document.
    pub key: &'static str,
    pub kind: FieldKind,
}

impl FieldDescriptor {
    #[must_use]
    pub const fn new(key: &'static str, kind: FieldKind) -> Self {
        Self { key, kind }
    }

    #[must_use]
    pub const fn string(key: &'static str) -> Self {
        Self::new(key, FieldKind::String)
    }

    #[must_use]
    pub const fn integer(key: &'static str) -> Self {
        Self::new(key, FieldKind::Integer)
    }

    #[must_use]
    pub const fn float(key: &'static str) -> Self {
        Self::new(key, FieldKind::Float)
    }

    #[must_use]
    pub const fn boolean(key: &'static str) -> Self {
        Self::new(key, FieldKind::Bool)
    }

    #[must_use]
    pub const fn date(key: &'static str) -> Self {
        Self::new(key, FieldKind::Date)
    }

    #[must_use]
    pub const fn datetime(key: &'static str) -> Self {
        Self::new(key, FieldKind::DateTime)
    }

    #[must_use]
    pub const fn nested(key: &'static str, fields: fn() -> &'static [FieldDescriptor]) -> Self {
        Self::new(key, FieldKind::Struct(fields))
    }
}

/// A record stored as a document of one collection.
///
/// ```
/// use rdb::{FieldDescriptor, Model, ModelTracking};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Default, Serialize, Deserialize)]
/// #[serde(rename_all = "PascalCase")]
/// struct Invoice {
///     #[serde(skip)]
///     tracking: ModelTracking,
///     number: String,
///     total: f64,
/// }
///
/// impl Model for Invoice {
///     fn collection() -> &'static str {
///         "invoices"
///     }
///     fn fields() -> &'static [FieldDescriptor] {
///         const FIELDS: &[FieldDescriptor] = &[FieldDescriptor::string("Number"), FieldDescriptor::float("Total")];
///         FIELDS
///     }
///     fn tracking(&self) -> &ModelTracking {
///         &self.tracking
///     }
///     fn tracking_mut(&mut self) -> &mut ModelTracking {
///         &mut self.tracking
///     }
/// }
///
/// assert_eq!(Invoice::fields().len(), 2);
/// ```
pub trait Model: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Name of the collection, written to `@metadata.@collection`.
    fn collection() -> &'static str;

    /// Descriptors of the stored fields.
    ///
    /// Bind the list to a `const` item and return it; a slice literal built from the
    /// `FieldDescriptor` constructors is not promoted to `'static` on its own.
    fn fields() -> &'static [FieldDescriptor];

    fn tracking(&self) -> &ModelTracking;

    fn tracking_mut(&mut self) -> &mut ModelTracking;

    fn id(&self) -> &str {
        &Model::tracking(self).id
    }
}

/// Panics when a raw time field appears anywhere in the descriptor tree.
///
/// Called once when a collection is registered; a failure is a programming error in the model.
pub fn check_fields(collection: &str, fields: &[FieldDescriptor]) {
    walk_fields(collection, "", fields, 0);
}

fn walk_fields(collection: &str, prefix: &str, fields: &[FieldDescriptor], depth: usize) {
    if depth > MAX_FIELD_DEPTH {
        panic!("model {collection}: field tree under {prefix:?} is nested too deeply");
    }
    for field in fields {
        let path = if prefix.is_empty() { field.key.to_string() } else { format!("{prefix}.{}", field.key) };
        match field.kind {
            FieldKind::RawTime => panic!(
                "model {collection}: field {path} stores a raw time value; use rdb::Date or rdb::DateTime"
            ),
            FieldKind::Struct(nested) => walk_fields(collection, &path, nested(), depth + 1),
            _ => {}
        }
    }
}

/// Resolves the kind of a (possibly dotted) field path.
#[must_use]
pub fn field_kind(fields: &[FieldDescriptor], path: &str) -> Option<FieldKind> {
    let mut current = fields;
    let mut parts = path.split('.').peekable();
    while let Some(part) = parts.next() {
        let field = current.iter().find(|f| f.key == part)?;
        if parts.peek().is_none() {
            return Some(field.kind);
        }
        match field.kind {
            FieldKind::Struct(nested) => current = nested(),
            _ => return None,
        }
    }
    None
}

/// Metadata block of a stored document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelMetadata {
    pub id: String,
    pub change_vector: String,
    pub collection: String,
    pub expires: DateTime,
    pub projection: bool,
}

impl ModelMetadata {
    /// Reads the `@metadata` block of a document without modifying it.
    #[must_use]
    pub fn read(doc: &Value) -> Self {
        let Some(meta) = doc.get(METADATA_KEY).and_then(Value::as_object) else {
            return Self::default();
        };
        let text = |key: &str| meta.get(key).and_then(Value::as_str).unwrap_or_default().to_string();
        Self {
            id: text(META_ID),
            change_vector: text(META_CHANGE_VECTOR),
            collection: text(META_COLLECTION),
            expires: meta
                .get(META_EXPIRES)
                .cloned()
                .and_then(|v| serde_json::from_value(v).ok())
                .unwrap_or_default(),
            projection: meta.get(META_PROJECTION).and_then(Value::as_bool).unwrap_or(false),
        }
    }

    pub fn apply(&self, tracking: &mut ModelTracking) {
        tracking.id.clone_from(&self.id);
        tracking.change_vector.clone_from(&self.change_vector);
        tracking.expires = self.expires;
    }
}

/// Object-safe view of a model used by sessions to hold heterogeneous pending writes.
pub(crate) trait Tracked: Send {
    fn collection_name(&self) -> &'static str;
    fn encode_document(&self) -> Result<Value, DbError>;
    fn state(&self) -> &ModelTracking;
    fn state_mut(&mut self) -> &mut ModelTracking;
}

impl<M: Model> Tracked for M {
    fn collection_name(&self) -> &'static str {
        M::collection()
    }

    fn encode_document(&self) -> Result<Value, DbError> {
        encode(self)
    }

    fn state(&self) -> &ModelTracking {
        Model::tracking(self)
    }

    fn state_mut(&mut self) -> &mut ModelTracking {
        Model::tracking_mut(self)
    }
}

/// Serializes a model into a document body carrying its collection metadata.
pub fn encode<M: Model>(model: &M) -> Result<Value, DbError> {
    let mut value = serde_json::to_value(model)?;
    let Value::Object(obj) = &mut value else {
        return Err(DbError::Model(format!(
            "models of collection {} must serialize to a JSON object",
            M::collection()
        )));
    };
    let mut meta = Map::new();
    meta.insert(META_COLLECTION.into(), json!(M::collection()));
    if let Some(expires) = Model::tracking(model).expires.to_wire() {
        meta.insert(META_EXPIRES.into(), json!(expires));
    }
    obj.insert(METADATA_KEY.into(), Value::Object(meta));
    Ok(value)
}

/// Deserializes a stored document into a model, copying its metadata into the tracking state.
///
/// A document stored under another collection is rejected.
pub fn decode<M: Model>(mut doc: Value) -> Result<M, DbError> {
    let meta = ModelMetadata::read(&doc);
    if !meta.projection && !meta.collection.is_empty() && meta.collection != M::collection() {
        return Err(DbError::CollectionMismatch {
            id: meta.id,
            expected: M::collection().to_string(),
            actual: meta.collection,
        });
    }
    if let Value::Object(obj) = &mut doc {
        obj.remove(METADATA_KEY);
    }
    let mut model: M = serde_json::from_value(doc)?;
    meta.apply(Model::tracking_mut(&mut model));
    Ok(model)
}
