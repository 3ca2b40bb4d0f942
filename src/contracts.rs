// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The narrow contracts the query subsystem consumes from the rest of the
//! database (`spec.md` §1 "Explicitly out of scope", §6 "External
//! interfaces"). The page manager, B-tree index, serializer, transaction
//! manager and collection façade all live outside this crate; this module is
//! the entire surface this crate needs from them.

use crate::value::{Document, Value};

/// A row under evaluation: either a schema-less [`Document`] or a
/// strongly-typed host record exposing its fields through [`RecordFields`].
///
/// `spec.md` §9 design note: "represent rows as a `Row` sum type with two
/// variants ... and dispatch through trait-style methods for member access.
/// The evaluator's logic is then a single pattern match, not a duplicated
/// pair of code paths."
pub enum Row<'a, R: RecordFields> {
    Record(&'a R),
    Document(&'a Document),
}

/// Host-object field access, with the record-side lookup rules from
/// `spec.md` §3: "field lookup first tries the exact name, then falls
/// through to a `null` for absent members (never panics)".
pub trait RecordFields {
    fn field(&self, name: &str) -> Value;
}

impl<'a, R: RecordFields> Row<'a, R> {
    /// Resolves a member by name, applying the document alias rules
    /// (literal name, then lowerCamelCase, then `_id` for `Id`) or the
    /// record fallback-to-null rule, as appropriate for the row's shape.
    pub fn member(&self, name: &str) -> Value {
        match self {
            Row::Record(record) => record.field(name),
            Row::Document(doc) => lookup_document_field(doc, name),
        }
    }
}

/// Document field lookup per `spec.md` §3: literal name, then lowerCamelCase
/// variant, then `_id` when the requested name is `Id`.
pub fn lookup_document_field(doc: &Document, name: &str) -> Value {
    if let Some(v) = doc.get(name) {
        return v.clone();
    }
    let camel = to_lower_camel(name);
    if camel != name {
        if let Some(v) = doc.get(&camel) {
            return v.clone();
        }
    }
    if name == "Id" {
        if let Some(v) = doc.get("_id") {
            return v.clone();
        }
    }
    Value::Null
}

fn to_lower_camel(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// The stable identity of a document within a collection, as stored by the
/// page manager.
pub fn document_id(doc: &Document) -> Value {
    doc.get("_id").cloned().unwrap_or(Value::Null)
}

/// Reads the `_collection` tag embedded in a document, if present.
///
/// `spec.md` §6: "documents include either an embedded `_collection` tag or
/// none (both must be handled)".
pub fn document_collection_tag(doc: &Document) -> Option<&str> {
    doc.get("_collection").and_then(Value::as_str)
}

/// `spec.md` §6: "Storage scanner contract. `scan(collection) -> iterator<Document>`".
pub trait StorageScanner {
    fn scan<'a>(&'a self, collection: &str) -> Box<dyn Iterator<Item = Document> + 'a>;
}

/// Read-only statistics about one secondary index, as surfaced by the index
/// catalog (`spec.md` §6).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexStatistics {
    pub name: String,
    pub fields: Vec<String>,
    pub is_unique: bool,
}

/// A half-open or closed range over an index's key domain
/// (`spec.md` §3 `IndexScanRange`).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct IndexScanRange {
    pub include_min: bool,
    pub min: Option<Value>,
    pub include_max: bool,
    pub max: Option<Value>,
}

impl IndexScanRange {
    pub const UNBOUNDED: Self = Self {
        include_min: false,
        min: None,
        include_max: false,
        max: None,
    };
}

/// A document located through an index, paired with its primary key.
#[derive(Clone, Debug)]
pub struct DocumentRef {
    pub id: Value,
    pub document: Document,
}

/// `spec.md` §6: "Index access contract. `seek(key)`, `seek_unique(key)`,
/// `scan(range)` (natural order). A missing index returns null from `get`
/// — the executor must fall back."
pub trait IndexAccess {
    fn seek<'a>(&'a self, key: &Value) -> Box<dyn Iterator<Item = DocumentRef> + 'a>;
    fn seek_unique(&self, key: &Value) -> Option<DocumentRef>;
    fn scan<'a>(&'a self, range: &IndexScanRange) -> Box<dyn Iterator<Item = DocumentRef> + 'a>;
}

/// `spec.md` §6: "Index catalog contract."
pub trait IndexCatalog {
    fn list(&self, collection: &str) -> Vec<IndexStatistics>;
    fn get(&self, collection: &str, name: &str) -> Option<&dyn IndexAccess>;
}

/// `spec.md` §6: "Overlay contract." Transaction-scoped pending writes that
/// shadow base storage during reads (`spec.md` §3 invariant 5).
pub trait Overlay {
    fn inserts<'a>(&'a self, collection: &str) -> Box<dyn Iterator<Item = Document> + 'a>;
    fn is_deleted(&self, collection: &str, id: &Value) -> bool;
    fn updated(&self, collection: &str, id: &Value) -> Option<Document>;
}

/// A [`RecordFields`] witness for contexts that only ever evaluate against
/// [`Document`] rows or bare [`Value`]s and never a host record — most of the
/// query layer's internals, since the host record type is only known at the
/// collection façade boundary (out of this crate's scope).
pub struct NoFields;

impl RecordFields for NoFields {
    fn field(&self, _name: &str) -> Value {
        Value::Null
    }
}

/// An overlay with no pending writes, used when executing outside a
/// transaction.
pub struct EmptyOverlay;

impl Overlay for EmptyOverlay {
    fn inserts<'a>(&'a self, _collection: &str) -> Box<dyn Iterator<Item = Document> + 'a> {
        Box::new(std::iter::empty())
    }

    fn is_deleted(&self, _collection: &str, _id: &Value) -> bool {
        false
    }

    fn updated(&self, _collection: &str, _id: &Value) -> Option<Document> {
        None
    }
}

/// `spec.md` §6: "Mapper contract. `doc_to_record(T, doc) -> T`;
/// `record_to_doc(T, value) -> Document`."
pub trait Mapper<R> {
    fn doc_to_record(&self, doc: &Document) -> R;
    fn record_to_doc(&self, record: &R) -> Document;
}

/// A caller-observable cancellation signal, checked by the executor and the
/// pipeline's terminal operators between row deliveries (`spec.md` §5
/// "Cancellation").
pub trait Cancellable {
    fn is_cancelled(&self) -> bool;
}

impl Cancellable for () {
    fn is_cancelled(&self) -> bool {
        false
    }
}
