//! Merging of incremental (deferred and streamed) response chunks.
//!
//! One [`ResponseMerger`] follows one operation. It remembers the placeholders
//! every normalization reported and routes later chunks to them. Chunks that
//! arrive before their placeholder are queued and retried after each
//! successful merge; repeated chunks are ignored.
//!
//! Chunks land on records written by earlier chunks, so the operation should
//! stay retained while it is in flight. A chunk whose parent record has been
//! collected in the meantime is reported as unmatched and dropped.

use crate::normalizer::{
    normalize_deferred, normalize_stream_item, IncrementalPlaceholder, NormalizeOutput,
};
use crate::store::Store;
use std::collections::{HashMap, HashSet};
use tessera_core::{
    format_path, Diagnostic, NormalizationError, PathSegment, PayloadChunk, PayloadKind, Selector,
    TesseraResult,
};

type ChunkKey = (String, Vec<PathSegment>);

/// What happened to one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Normalized and published.
    Applied,
    /// Waiting for its placeholder.
    Queued,
    /// Already applied earlier; nothing written.
    Duplicate,
    /// Its placeholder's parent record is gone; dropped and reported.
    Unmatched,
}

/// Incremental merge state for one in-flight operation.
pub struct ResponseMerger {
    selector: Selector,
    placeholders: HashMap<ChunkKey, IncrementalPlaceholder>,
    applied: HashSet<ChunkKey>,
    pending: Vec<PayloadChunk>,
}

impl ResponseMerger {
    pub fn new(selector: Selector) -> Self {
        Self {
            selector,
            placeholders: HashMap::new(),
            applied: HashSet::new(),
            pending: Vec::new(),
        }
    }

    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    /// Chunks waiting for a placeholder.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Merge one chunk into the store's base source.
    ///
    /// Notification is left to the caller. After a chunk is applied, queued
    /// chunks are retried until none makes progress; a queued chunk that
    /// fails on retry is dropped and logged.
    pub fn merge(&mut self, store: &mut Store, chunk: PayloadChunk) -> TesseraResult<MergeOutcome> {
        let outcome = self.try_apply(store, &chunk)?;
        match outcome {
            MergeOutcome::Queued => {
                tracing::debug!(
                    kind = %chunk.kind,
                    path = %format_path(&chunk.path),
                    "Queued incremental chunk"
                );
                self.pending.push(chunk);
            }
            MergeOutcome::Applied => self.retry_pending(store),
            MergeOutcome::Duplicate => {
                tracing::debug!(
                    kind = %chunk.kind,
                    path = %format_path(&chunk.path),
                    "Ignored repeated chunk"
                );
            }
            MergeOutcome::Unmatched => {}
        }
        Ok(outcome)
    }

    /// Close the operation, reporting every chunk that never found its
    /// placeholder. Returns how many were dropped.
    pub fn finish(self, store: &mut Store) -> usize {
        let dropped = self.pending.len();
        for chunk in self.pending {
            store.report(Diagnostic::UnmatchedIncremental {
                label: chunk.kind.label().unwrap_or_default().to_string(),
                path: format_path(&chunk.path),
            });
        }
        dropped
    }

    fn retry_pending(&mut self, store: &mut Store) {
        loop {
            let mut progressed = false;
            for chunk in std::mem::take(&mut self.pending) {
                match self.try_apply(store, &chunk) {
                    Ok(MergeOutcome::Applied) => progressed = true,
                    Ok(MergeOutcome::Queued) => self.pending.push(chunk),
                    Ok(MergeOutcome::Duplicate | MergeOutcome::Unmatched) => {}
                    Err(err) => {
                        tracing::error!(
                            error = %err,
                            kind = %chunk.kind,
                            path = %format_path(&chunk.path),
                            "Dropped queued chunk"
                        );
                    }
                }
            }
            if !progressed || self.pending.is_empty() {
                break;
            }
        }
    }

    fn try_apply(
        &mut self,
        store: &mut Store,
        chunk: &PayloadChunk,
    ) -> TesseraResult<MergeOutcome> {
        match &chunk.kind {
            PayloadKind::Complete => {
                let output = store.normalize_response(&self.selector, &chunk.data)?;
                self.register(output);
                Ok(MergeOutcome::Applied)
            }
            PayloadKind::DeferPatch { label } => {
                let key = (label.clone(), chunk.path.clone());
                if self.applied.contains(&key) {
                    return Ok(MergeOutcome::Duplicate);
                }
                let Some(IncrementalPlaceholder::Defer {
                    parent_id,
                    selections,
                    path,
                    ..
                }) = self.placeholders.get(&key).cloned()
                else {
                    return Ok(MergeOutcome::Queued);
                };
                if !store.get_source().get(&parent_id).is_present() {
                    return Ok(unmatched(store, label, chunk));
                }
                let options = store.normalize_options().with_path(path);
                let variables = self.selector.variables().clone();
                let output = store.write_base(|mutator| {
                    normalize_deferred(
                        mutator,
                        &parent_id,
                        &selections,
                        &variables,
                        &chunk.data,
                        &options,
                    )
                })?;
                self.applied.insert(key);
                self.register(output);
                Ok(MergeOutcome::Applied)
            }
            PayloadKind::StreamAppend { label } => {
                let (index, list_path) = match chunk.path.split_last() {
                    Some((PathSegment::Index(index), list_path)) => (*index, list_path.to_vec()),
                    _ => {
                        return Err(NormalizationError::StructuralMismatch {
                            path: format_path(&chunk.path),
                            expected: "path ending in a list index".to_string(),
                            found: "no index".to_string(),
                        }
                        .into())
                    }
                };
                let key = (label.clone(), chunk.path.clone());
                if self.applied.contains(&key) {
                    return Ok(MergeOutcome::Duplicate);
                }
                let Some(IncrementalPlaceholder::Stream {
                    parent_id, field, ..
                }) = self.placeholders.get(&(label.clone(), list_path.clone())).cloned()
                else {
                    return Ok(MergeOutcome::Queued);
                };
                if !store.get_source().get(&parent_id).is_present() {
                    return Ok(unmatched(store, label, chunk));
                }
                let options = store.normalize_options().with_path(list_path);
                let variables = self.selector.variables().clone();
                let output = store.write_base(|mutator| {
                    normalize_stream_item(
                        mutator,
                        &parent_id,
                        &field,
                        index,
                        &variables,
                        &chunk.data,
                        &options,
                    )
                })?;
                self.applied.insert(key);
                self.register(output);
                Ok(MergeOutcome::Applied)
            }
        }
    }

    fn register(&mut self, output: NormalizeOutput) {
        for placeholder in output.placeholders {
            let key = (placeholder.label().to_string(), placeholder.path().to_vec());
            self.placeholders.insert(key, placeholder);
        }
    }
}

fn unmatched(store: &mut Store, label: &str, chunk: &PayloadChunk) -> MergeOutcome {
    store.report(Diagnostic::UnmatchedIncremental {
        label: label.to_string(),
        path: format_path(&chunk.path),
    });
    MergeOutcome::Unmatched
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use tessera_core::{
        DataId, LinkedField, ReaderNode, Selection, StoreConfig, TesseraError, Variables,
    };

    fn feed_query() -> Selector {
        let node = ReaderNode::new(
            "FeedQuery",
            "__Root",
            vec![Selection::linked(
                LinkedField::new(
                    "viewer",
                    vec![
                        Selection::scalar("id"),
                        Selection::defer("ViewerBio", vec![Selection::scalar("bio")]),
                        Selection::linked(
                            LinkedField::new("feed", vec![Selection::scalar("id")])
                                .with_concrete_type("Post")
                                .with_stream("Feed"),
                        ),
                    ],
                )
                .with_concrete_type("User"),
            )],
        );
        Selector::operation(Arc::new(node), Variables::new())
    }

    fn viewer_path() -> Vec<PathSegment> {
        vec![PathSegment::from("viewer")]
    }

    fn initial_chunk() -> PayloadChunk {
        PayloadChunk::complete(json!({ "viewer": { "id": "1", "feed": [] } }))
    }

    fn store() -> Store {
        Store::new(StoreConfig::new().with_gc(false)).unwrap()
    }

    #[test]
    fn test_defer_patch_after_complete() {
        let mut store = store();
        let mut merger = ResponseMerger::new(feed_query());

        merger.merge(&mut store, initial_chunk()).unwrap();
        let outcome = merger
            .merge(
                &mut store,
                PayloadChunk::defer_patch("ViewerBio", viewer_path(), json!({ "bio": "hi" })),
            )
            .unwrap();

        assert_eq!(outcome, MergeOutcome::Applied);
        let snapshot = store.lookup(&feed_query());
        assert_eq!(
            snapshot.data,
            Some(json!({ "viewer": { "id": "1", "bio": "hi", "feed": [] } }))
        );
        assert!(!snapshot.is_missing_data);
    }

    #[test]
    fn test_early_chunk_is_queued_then_applied() {
        let mut store = store();
        let mut merger = ResponseMerger::new(feed_query());

        let early = merger
            .merge(
                &mut store,
                PayloadChunk::defer_patch("ViewerBio", viewer_path(), json!({ "bio": "hi" })),
            )
            .unwrap();
        assert_eq!(early, MergeOutcome::Queued);
        assert_eq!(merger.pending_count(), 1);

        merger.merge(&mut store, initial_chunk()).unwrap();

        assert_eq!(merger.pending_count(), 0);
        assert!(!store.lookup(&feed_query()).is_missing_data);
    }

    #[test]
    fn test_repeated_chunk_is_duplicate() {
        let mut store = store();
        let mut merger = ResponseMerger::new(feed_query());
        merger.merge(&mut store, initial_chunk()).unwrap();
        let chunk = PayloadChunk::stream_append(
            "Feed",
            vec![
                PathSegment::from("viewer"),
                PathSegment::from("feed"),
                PathSegment::Index(0),
            ],
            json!({ "id": "p0" }),
        );

        assert_eq!(merger.merge(&mut store, chunk.clone()).unwrap(), MergeOutcome::Applied);
        assert_eq!(merger.merge(&mut store, chunk).unwrap(), MergeOutcome::Duplicate);
    }

    fn feed_item(index: usize) -> PayloadChunk {
        PayloadChunk::stream_append(
            "Feed",
            vec![
                PathSegment::from("viewer"),
                PathSegment::from("feed"),
                PathSegment::Index(index),
            ],
            json!({ "id": format!("p{index}") }),
        )
    }

    #[test]
    fn test_stream_index_far_past_end_rejected() {
        let config = StoreConfig::new().with_gc(false).with_max_stream_gap(2);
        let mut store = Store::new(config).unwrap();
        let mut merger = ResponseMerger::new(feed_query());
        merger.merge(&mut store, initial_chunk()).unwrap();

        let result = merger.merge(&mut store, feed_item(usize::MAX));
        match result {
            Err(TesseraError::Normalization(NormalizationError::StructuralMismatch {
                path, ..
            })) => assert_eq!(path, format!("viewer.feed[{}]", usize::MAX)),
            other => panic!("Expected StructuralMismatch error, got: {:?}", other),
        }
        assert!(merger.merge(&mut store, feed_item(3)).is_err());
        assert!(store.get_source().get(&DataId::new("p3")).is_unknown());

        assert_eq!(merger.merge(&mut store, feed_item(2)).unwrap(), MergeOutcome::Applied);
        assert_eq!(
            store.lookup(&feed_query()).data,
            Some(json!({ "viewer": { "id": "1", "feed": [null, null, { "id": "p2" }] } }))
        );
    }

    #[test]
    fn test_stream_path_without_index_rejected() {
        let mut store = store();
        let mut merger = ResponseMerger::new(feed_query());
        let result = merger.merge(
            &mut store,
            PayloadChunk::stream_append("Feed", viewer_path(), json!({ "id": "p0" })),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_chunk_for_collected_parent_is_unmatched() {
        let mut store = Store::default();
        let mut merger = ResponseMerger::new(feed_query());
        merger.merge(&mut store, initial_chunk()).unwrap();
        store.notify();
        assert!(store.get_source().get(&DataId::new("1")).is_unknown());

        let defer = merger
            .merge(
                &mut store,
                PayloadChunk::defer_patch("ViewerBio", viewer_path(), json!({ "bio": "hi" })),
            )
            .unwrap();
        let stream = merger.merge(&mut store, feed_item(0)).unwrap();

        assert_eq!(defer, MergeOutcome::Unmatched);
        assert_eq!(stream, MergeOutcome::Unmatched);
        assert_eq!(merger.pending_count(), 0);
        assert_eq!(
            store.take_diagnostics(),
            vec![
                Diagnostic::UnmatchedIncremental {
                    label: "ViewerBio".to_string(),
                    path: "viewer".to_string(),
                },
                Diagnostic::UnmatchedIncremental {
                    label: "Feed".to_string(),
                    path: "viewer.feed[0]".to_string(),
                },
            ]
        );
        assert!(store.get_source().get(&DataId::new("p0")).is_unknown());
    }

    #[test]
    fn test_retained_operation_keeps_parent_for_chunks() {
        let mut store = Store::default();
        let _handle = store.retain(&feed_query());
        let mut merger = ResponseMerger::new(feed_query());
        merger.merge(&mut store, initial_chunk()).unwrap();
        store.notify();

        let outcome = merger
            .merge(
                &mut store,
                PayloadChunk::defer_patch("ViewerBio", viewer_path(), json!({ "bio": "hi" })),
            )
            .unwrap();

        assert_eq!(outcome, MergeOutcome::Applied);
        assert!(store.take_diagnostics().is_empty());
    }

    #[test]
    fn test_finish_reports_unmatched_chunks() {
        let mut store = store();
        let mut merger = ResponseMerger::new(feed_query());
        merger
            .merge(
                &mut store,
                PayloadChunk::defer_patch("Other", viewer_path(), json!({})),
            )
            .unwrap();

        assert_eq!(merger.finish(&mut store), 1);
        let diagnostics = store.take_diagnostics();
        assert_eq!(
            diagnostics,
            vec![Diagnostic::UnmatchedIncremental {
                label: "Other".to_string(),
                path: "viewer".to_string(),
            }]
        );
        assert!(store.lookup(&feed_query()).data.is_none());
    }
}
