// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The query executor (`spec.md` §4.5): drives the strategy the optimizer
//! chose, merges the base storage scan with the transaction overlay, and
//! re-checks the original predicate against every candidate row.

use std::collections::HashSet;

use tracing::{debug, instrument, trace};

use crate::contracts::{
    document_collection_tag, document_id, Cancellable, IndexAccess, IndexCatalog, NoFields, Overlay, Row,
    StorageScanner,
};
use crate::error::{ErrorKind, Result};
use crate::query::algebra::Expr;
use crate::query::eval;
use crate::query::optimizer;
use crate::query::plan::{QueryExecutionPlan, Strategy};
use crate::value::{Document, Value};

/// The conventional name under which a collection's primary-key index is
/// registered with the [`IndexCatalog`] (`spec.md` §6). `PrimaryKeyLookup`
/// degrades to a full scan when no such index is present, the same way a
/// missing secondary index does.
const PRIMARY_KEY_INDEX: &str = "_id";

/// Observability sink for the plan the optimizer chose, addressing
/// `spec.md` §9's open question about plan introspection.
#[derive(Clone, Debug, PartialEq)]
pub struct PlanReport {
    pub strategy: Strategy,
    pub index_name: Option<String>,
    pub scanned_keys: usize,
}

impl From<&QueryExecutionPlan> for PlanReport {
    fn from(plan: &QueryExecutionPlan) -> Self {
        PlanReport {
            strategy: plan.strategy.clone(),
            index_name: plan.use_index.clone(),
            scanned_keys: plan.index_scan_keys.len(),
        }
    }
}

/// Wraps a boxed iterator so the scan is visibly closed on every exit path
/// (early return, error, or exhaustion), matching the teacher's
/// `PipelineSlice`/`ItemProducer` ownership discipline.
struct ScopedScan<'a, T> {
    inner: Box<dyn Iterator<Item = T> + 'a>,
    label: &'static str,
}

impl<'a, T> ScopedScan<'a, T> {
    fn new(label: &'static str, inner: Box<dyn Iterator<Item = T> + 'a>) -> Self {
        Self { inner, label }
    }
}

impl<'a, T> Iterator for ScopedScan<'a, T> {
    type Item = T;
    fn next(&mut self) -> Option<T> {
        self.inner.next()
    }
}

impl<'a, T> Drop for ScopedScan<'a, T> {
    fn drop(&mut self) {
        trace!(scan = self.label, "scan closed");
    }
}

/// Executes `predicate` against `collection`, returning every matching
/// document plus a report of the plan the optimizer chose.
#[instrument(skip(predicate, storage, catalog, overlay, cancellable))]
pub fn execute(
    collection: &str,
    predicate: Option<Expr>,
    storage: &dyn StorageScanner,
    catalog: &dyn IndexCatalog,
    overlay: &dyn Overlay,
    cancellable: &dyn Cancellable,
) -> Result<(Vec<Document>, PlanReport)> {
    if collection.trim().is_empty() {
        return Err(ErrorKind::InvalidArgument.with_message("collection name must not be empty"));
    }

    let plan = optimizer::optimize(collection, predicate, catalog);
    debug!(strategy = ?plan.strategy, use_index = ?plan.use_index, "plan selected");
    let report = PlanReport::from(&plan);

    let rows = match &plan.strategy {
        Strategy::FullTableScan => full_table_scan(&plan, storage, overlay, cancellable)?,
        Strategy::IndexScan { index } => index_scan(&plan, index, storage, catalog, overlay, cancellable)?,
        Strategy::IndexSeek { index } => index_seek(&plan, index, storage, catalog, overlay, cancellable)?,
        Strategy::PrimaryKeyLookup { keys } => primary_key_lookup(&plan, keys, storage, catalog, overlay, cancellable)?,
    };

    Ok((rows, report))
}

fn check_cancelled(cancellable: &dyn Cancellable) -> Result<()> {
    if cancellable.is_cancelled() {
        return Err(ErrorKind::Cancelled.into());
    }
    Ok(())
}

fn matches_predicate(plan: &QueryExecutionPlan, doc: &Document) -> Result<bool> {
    match &plan.original_expression {
        None => Ok(true),
        Some(expr) => eval::evaluate::<NoFields>(expr, Row::Document(doc)),
    }
}

/// Merges base storage output with the overlay: overlay deletes suppress a
/// row, overlay updates replace its content, and overlay inserts are
/// appended, each scanned exactly once (`spec.md` §3 invariant 5).
fn merged_rows<'a>(
    collection: &'a str,
    storage: &'a dyn StorageScanner,
    overlay: &'a dyn Overlay,
) -> ScopedScan<'a, Document> {
    let seen = std::rc::Rc::new(std::cell::RefCell::new(HashSet::new()));
    let seen_in_base = seen.clone();
    let base = storage.scan(collection).filter_map(move |doc| {
        if let Some(tag) = document_collection_tag(&doc) {
            if tag != collection {
                return None;
            }
        }
        let id = document_id(&doc);
        if overlay.is_deleted(collection, &id) {
            return None;
        }
        seen_in_base.borrow_mut().insert(id.stringify());
        Some(overlay.updated(collection, &id).unwrap_or(doc))
    });
    let inserted = overlay.inserts(collection).filter(move |doc| {
        !seen.borrow().contains(&document_id(doc).stringify())
    });
    ScopedScan::new("merged_rows", Box::new(base.chain(inserted)))
}

fn full_table_scan(
    plan: &QueryExecutionPlan,
    storage: &dyn StorageScanner,
    overlay: &dyn Overlay,
    cancellable: &dyn Cancellable,
) -> Result<Vec<Document>> {
    let mut out = Vec::new();
    for doc in merged_rows(&plan.collection, storage, overlay) {
        check_cancelled(cancellable)?;
        if matches_predicate(plan, &doc)? {
            out.push(doc);
        }
    }
    Ok(out)
}

fn index_scan(
    plan: &QueryExecutionPlan,
    index_name: &str,
    storage: &dyn StorageScanner,
    catalog: &dyn IndexCatalog,
    overlay: &dyn Overlay,
    cancellable: &dyn Cancellable,
) -> Result<Vec<Document>> {
    let Some(index) = catalog.get(&plan.collection, index_name) else {
        debug!(index = index_name, "index missing at execution time, falling back to full scan");
        return full_table_scan(plan, storage, overlay, cancellable);
    };
    let Some(key) = plan.index_scan_keys.first() else {
        return full_table_scan(plan, storage, overlay, cancellable);
    };
    let range = key.to_range();

    let mut out = Vec::new();
    for doc_ref in index.scan(&range) {
        check_cancelled(cancellable)?;
        if overlay.is_deleted(&plan.collection, &doc_ref.id) {
            continue;
        }
        let doc = overlay.updated(&plan.collection, &doc_ref.id).unwrap_or(doc_ref.document);
        if matches_predicate(plan, &doc)? {
            out.push(doc);
        }
    }
    for doc in overlay.inserts(&plan.collection) {
        check_cancelled(cancellable)?;
        if matches_predicate(plan, &doc)? {
            out.push(doc);
        }
    }
    Ok(out)
}

fn index_seek(
    plan: &QueryExecutionPlan,
    index_name: &str,
    storage: &dyn StorageScanner,
    catalog: &dyn IndexCatalog,
    overlay: &dyn Overlay,
    cancellable: &dyn Cancellable,
) -> Result<Vec<Document>> {
    let Some(index) = catalog.get(&plan.collection, index_name) else {
        debug!(index = index_name, "index missing at execution time, falling back to full scan");
        return full_table_scan(plan, storage, overlay, cancellable);
    };
    let Some(key) = plan.index_scan_keys.first() else {
        return full_table_scan(plan, storage, overlay, cancellable);
    };

    let mut out = Vec::new();
    if let Some(doc_ref) = index.seek_unique(&key.value) {
        check_cancelled(cancellable)?;
        if !overlay.is_deleted(&plan.collection, &doc_ref.id) {
            let doc = overlay.updated(&plan.collection, &doc_ref.id).unwrap_or(doc_ref.document);
            if matches_predicate(plan, &doc)? {
                out.push(doc);
            }
        }
    }
    for doc in overlay.inserts(&plan.collection) {
        check_cancelled(cancellable)?;
        if matches_predicate(plan, &doc)? {
            out.push(doc);
        }
    }
    Ok(out)
}

fn primary_key_lookup(
    plan: &QueryExecutionPlan,
    keys: &[Value],
    storage: &dyn StorageScanner,
    catalog: &dyn IndexCatalog,
    overlay: &dyn Overlay,
    cancellable: &dyn Cancellable,
) -> Result<Vec<Document>> {
    if keys.is_empty() {
        return Ok(Vec::new());
    }
    let Some(primary) = catalog.get(&plan.collection, PRIMARY_KEY_INDEX) else {
        debug!("no primary-key index registered, falling back to full scan");
        return full_table_scan(plan, storage, overlay, cancellable);
    };

    let mut out = Vec::new();
    for key in keys {
        check_cancelled(cancellable)?;
        if overlay.is_deleted(&plan.collection, key) {
            continue;
        }
        let doc = match overlay.updated(&plan.collection, key) {
            Some(doc) => Some(doc),
            None => fetch_by_id(primary, key),
        };
        if let Some(doc) = doc {
            if matches_predicate(plan, &doc)? {
                out.push(doc);
            }
        }
    }
    for doc in overlay.inserts(&plan.collection) {
        check_cancelled(cancellable)?;
        let id = document_id(&doc);
        if keys.iter().any(|k| crate::query::comparator::equals(k, &id)) && matches_predicate(plan, &doc)? {
            out.push(doc);
        }
    }
    Ok(out)
}

fn fetch_by_id(index: &dyn IndexAccess, key: &Value) -> Option<Document> {
    index.seek_unique(key).map(|r| r.document)
}
