//! Optimistic layers over the base source.
//!
//! Each layer is a sparse diff recorded when its updater ran. Diffs are
//! independent snapshots rather than deltas against each other, so removing a
//! layer from the middle of the stack leaves the layers above untouched.

use std::collections::BTreeSet;
use tessera_core::{
    layer_state, DataId, InvariantError, OptimisticToken, RecordSource, RecordSourceView,
    RecordState, TesseraResult,
};

/// One in-flight optimistic write.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimisticLayer {
    token: OptimisticToken,
    diff: RecordSource,
}

impl OptimisticLayer {
    pub fn token(&self) -> OptimisticToken {
        self.token
    }

    pub fn diff(&self) -> &RecordSource {
        &self.diff
    }
}

/// Ordered stack of optimistic layers, oldest first.
///
/// Layers are only ever appended or removed by token; the order of the
/// remaining layers never changes.
#[derive(Debug, Clone, Default)]
pub struct OverlayStack {
    layers: Vec<OptimisticLayer>,
}

impl OverlayStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn contains(&self, token: OptimisticToken) -> bool {
        self.position(token).is_some()
    }

    pub fn layers(&self) -> &[OptimisticLayer] {
        &self.layers
    }

    /// Push a new top layer.
    pub fn push(&mut self, token: OptimisticToken, diff: RecordSource) -> TesseraResult<()> {
        if self.contains(token) {
            return Err(InvariantError::DuplicateOptimisticToken { token }.into());
        }
        self.layers.push(OptimisticLayer { token, diff });
        Ok(())
    }

    /// Remove the layer for `token` wherever it sits.
    ///
    /// Returns the removed diff and every ID whose effective state may have
    /// changed: the IDs in the removed diff and in every layer above it.
    pub fn remove(&mut self, token: OptimisticToken) -> Option<(RecordSource, BTreeSet<DataId>)> {
        let position = self.position(token)?;
        let removed = self.layers.remove(position);
        let mut dirty: BTreeSet<DataId> = removed.diff.record_ids().cloned().collect();
        for layer in &self.layers[position..] {
            dirty.extend(layer.diff.record_ids().cloned());
        }
        Some((removed.diff, dirty))
    }

    fn position(&self, token: OptimisticToken) -> Option<usize> {
        self.layers.iter().position(|layer| layer.token == token)
    }
}

/// Read view of the base source with every layer applied in order.
///
/// Later layers win per field; a field no layer touched falls through to the
/// base.
#[derive(Clone, Copy)]
pub struct EffectiveSource<'a> {
    base: &'a RecordSource,
    layers: &'a [OptimisticLayer],
}

impl<'a> EffectiveSource<'a> {
    pub fn new(base: &'a RecordSource, overlays: &'a OverlayStack) -> Self {
        Self {
            base,
            layers: overlays.layers(),
        }
    }

    pub fn base(&self) -> &'a RecordSource {
        self.base
    }
}

impl RecordSourceView for EffectiveSource<'_> {
    fn get(&self, id: &DataId) -> RecordState {
        self.layers
            .iter()
            .fold(self.base.get(id), |state, layer| layer_state(state, layer.diff.get(id)))
    }

    fn record_ids(&self) -> Box<dyn Iterator<Item = DataId> + '_> {
        let mut ids: BTreeSet<DataId> = self.base.record_ids().cloned().collect();
        for layer in self.layers {
            ids.extend(layer.diff.record_ids().cloned());
        }
        Box::new(ids.into_iter())
    }
}
