//! Store orchestration.
//!
//! The [`Store`] owns the base source and the optimistic layer stack. Every
//! write goes through `publish`, `apply_optimistic`, `rollback` or `commit`
//! and accumulates dirty IDs; `notify` re-reads the affected subscriptions
//! and then runs one GC pass. While optimistic layers are applied the pass is
//! postponed until the last one is rolled back or committed.

use crate::gc::{self, GcReport, RetainRegistry};
use crate::normalizer::{normalize, NormalizeOptions, NormalizeOutput};
use crate::overlay::{EffectiveSource, OverlayStack};
use crate::reader::read;
use crate::subscriptions::SubscriptionRegistry;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::rc::Rc;
use tessera_core::{
    Availability, DataId, Diagnostic, InvariantError, OptimisticToken, RecordSource, Selector,
    SelectorKey, Snapshot, SourceMutator, StoreConfig, TesseraResult,
};

// ============================================================================
// HANDLES
// ============================================================================

/// Registration of a selector as a GC root. Pass it to [`Store::release`].
#[must_use = "a retain handle must be passed to Store::release"]
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct RetainHandle {
    id: u64,
}

impl RetainHandle {
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// Active subscription. Pass it to [`Store::unsubscribe`].
#[must_use = "a subscription handle must be passed to Store::unsubscribe"]
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    id: u64,
}

impl SubscriptionHandle {
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// Pause on garbage collection. Pass it to [`Store::release_gc_hold`].
#[must_use = "a GC hold must be passed to Store::release_gc_hold"]
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct GcHold {
    id: u64,
}

impl GcHold {
    pub fn id(&self) -> u64 {
        self.id
    }
}

// ============================================================================
// DEFERRED PUBLISH
// ============================================================================

/// Queue for diffs published from inside subscription callbacks.
///
/// Callbacks cannot reach the store while it is notifying. Diffs queued here
/// are published once the current notify cycle and its GC pass are done, so
/// their notifications go out on the next cycle.
#[derive(Debug, Clone, Default)]
pub struct DeferredPublisher {
    queue: Rc<RefCell<VecDeque<RecordSource>>>,
}

impl DeferredPublisher {
    pub fn publish(&self, diff: RecordSource) {
        self.queue.borrow_mut().push_back(diff);
    }

    pub fn len(&self) -> usize {
        self.queue.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.borrow().is_empty()
    }

    fn drain(&self) -> Vec<RecordSource> {
        self.queue.borrow_mut().drain(..).collect()
    }
}

// ============================================================================
// STATS
// ============================================================================

/// Running counters for one store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub publishes: u64,
    pub notify_cycles: u64,
    pub callbacks_fired: u64,
    pub gc_runs: u64,
    pub records_collected: u64,
}

// ============================================================================
// STORE
// ============================================================================

/// Normalized graph cache.
pub struct Store {
    config: StoreConfig,
    base: RecordSource,
    overlays: OverlayStack,
    retains: RetainRegistry,
    retain_handles: HashMap<u64, SelectorKey>,
    next_retain_id: u64,
    subscriptions: SubscriptionRegistry,
    pending_dirty: BTreeSet<DataId>,
    deferred: DeferredPublisher,
    diagnostics: Vec<Diagnostic>,
    gc_holds: BTreeSet<u64>,
    next_gc_hold_id: u64,
    gc_pending: bool,
    retired_tokens: HashSet<OptimisticToken>,
    stats: StoreStats,
}

impl Store {
    /// Create a store with an empty base source.
    pub fn new(config: StoreConfig) -> TesseraResult<Self> {
        Self::with_source(config, RecordSource::new())
    }

    /// Create a store over an existing base source.
    pub fn with_source(config: StoreConfig, base: RecordSource) -> TesseraResult<Self> {
        config.validate()?;
        Ok(Self::build(config, base))
    }

    fn build(config: StoreConfig, base: RecordSource) -> Self {
        Self {
            retains: RetainRegistry::new(config.gc_release_buffer_size),
            config,
            base,
            overlays: OverlayStack::new(),
            retain_handles: HashMap::new(),
            next_retain_id: 0,
            subscriptions: SubscriptionRegistry::new(),
            pending_dirty: BTreeSet::new(),
            deferred: DeferredPublisher::default(),
            diagnostics: Vec::new(),
            gc_holds: BTreeSet::new(),
            next_gc_hold_id: 0,
            gc_pending: false,
            retired_tokens: HashSet::new(),
            stats: StoreStats::default(),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// The base source, without optimistic layers.
    pub fn get_source(&self) -> &RecordSource {
        &self.base
    }

    /// The base source with every optimistic layer applied.
    pub fn effective_source(&self) -> EffectiveSource<'_> {
        EffectiveSource::new(&self.base, &self.overlays)
    }

    pub fn optimistic_layer_count(&self) -> usize {
        self.overlays.len()
    }

    pub fn pending_dirty(&self) -> &BTreeSet<DataId> {
        &self.pending_dirty
    }

    pub fn stats(&self) -> StoreStats {
        self.stats
    }

    /// Drain the diagnostics reported since the last call.
    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.diagnostics)
    }

    pub fn deferred_publisher(&self) -> DeferredPublisher {
        self.deferred.clone()
    }

    pub(crate) fn normalize_options(&self) -> NormalizeOptions {
        NormalizeOptions::from_config(&self.config)
    }

    // ========================================================================
    // READS
    // ========================================================================

    /// Read a selector against the effective source.
    pub fn lookup(&self, selector: &Selector) -> Snapshot {
        read(&self.effective_source(), selector)
    }

    /// Whether a selector can be served from the cache right now.
    pub fn check(&self, selector: &Selector) -> Availability {
        let snapshot = self.lookup(selector);
        if snapshot.is_missing_data || snapshot.data.is_none() {
            return Availability::Missing;
        }
        let fetch_time = self
            .retains
            .get(&selector.key())
            .and_then(|entry| entry.fetch_time());
        let expiration = self.config.query_cache_expiration;
        if let (Some(fetched_at), Some(expiration)) = (fetch_time, expiration) {
            let expired = chrono::Duration::from_std(expiration)
                .map(|expiration| Utc::now() - fetched_at > expiration)
                .unwrap_or(false);
            if expired {
                return Availability::Stale;
            }
        }
        Availability::Available { fetch_time }
    }

    // ========================================================================
    // SUBSCRIPTIONS AND RETAINS
    // ========================================================================

    /// Register a callback fired by `notify` whenever the selector's result
    /// changes. Does not retain data.
    pub fn subscribe<F>(&mut self, selector: &Selector, callback: F) -> SubscriptionHandle
    where
        F: FnMut(&Snapshot) + 'static,
    {
        let snapshot = self.lookup(selector);
        let id = self.subscriptions.insert(snapshot, Box::new(callback));
        tracing::debug!(subscription_id = id, selector = %selector.key(), "Subscribed");
        SubscriptionHandle { id }
    }

    pub fn unsubscribe(&mut self, handle: SubscriptionHandle) -> TesseraResult<()> {
        if self.subscriptions.remove(handle.id) {
            return Ok(());
        }
        let err = InvariantError::UnknownSubscription {
            subscription_id: handle.id,
        };
        tracing::error!(error = %err, "Invalid unsubscribe");
        Err(err.into())
    }

    /// Snapshot last delivered to a subscription.
    pub fn subscription_snapshot(&self, handle: &SubscriptionHandle) -> Option<&Snapshot> {
        self.subscriptions.snapshot(handle.id)
    }

    /// Register a selector as a GC root.
    pub fn retain(&mut self, selector: &Selector) -> RetainHandle {
        let key = self.retains.retain(selector);
        self.next_retain_id = self.next_retain_id.saturating_add(1);
        let id = self.next_retain_id;
        tracing::debug!(retain_id = id, selector = %key, "Retained selector");
        self.retain_handles.insert(id, key);
        RetainHandle { id }
    }

    /// Drop one retain. The selector stops being a root once its count
    /// reaches zero; its records go at the next GC pass.
    pub fn release(&mut self, handle: RetainHandle) -> TesseraResult<()> {
        match self.retain_handles.remove(&handle.id) {
            Some(key) => {
                self.retains.release(&key);
                Ok(())
            }
            None => {
                let err = InvariantError::UnknownRetainHandle {
                    handle_id: handle.id,
                };
                tracing::error!(error = %err, "Invalid release");
                Err(err.into())
            }
        }
    }

    pub fn is_retained(&self, selector: &Selector) -> bool {
        self.retains.is_retained(&selector.key())
    }

    // ========================================================================
    // WRITES
    // ========================================================================

    /// Merge a diff into the base source and queue the changed IDs for the
    /// next `notify`. Returns how many IDs changed.
    pub fn publish(&mut self, diff: RecordSource) -> usize {
        let changed = self.base.merge_diff(&diff);
        let count = changed.len();
        self.pending_dirty.extend(changed);
        self.stats.publishes += 1;
        tracing::debug!(records = diff.size(), changed = count, "Published diff");
        count
    }

    /// Normalize a complete response into the base source and publish it.
    ///
    /// Fields written before a shape error are still published. A retained
    /// selector gets its fetch time stamped.
    pub fn normalize_response(
        &mut self,
        selector: &Selector,
        payload: &Value,
    ) -> TesseraResult<NormalizeOutput> {
        let options = self.normalize_options();
        let output = self.write_base(|mutator| normalize(mutator, selector, payload, &options))?;
        self.retains.mark_fetched(&selector.key(), Utc::now());
        Ok(output)
    }

    /// Run a normalization against the base source and publish what it wrote.
    pub(crate) fn write_base<F>(&mut self, write: F) -> TesseraResult<NormalizeOutput>
    where
        F: FnOnce(&mut SourceMutator<'_>) -> TesseraResult<NormalizeOutput>,
    {
        let mut diff = RecordSource::new();
        let result = {
            let mut mutator = SourceMutator::new(&self.base, &mut diff);
            write(&mut mutator)
        };
        if !diff.is_empty() {
            self.publish(diff);
        }
        match result {
            Ok(output) => {
                self.diagnostics.extend(output.diagnostics.iter().cloned());
                Ok(output)
            }
            Err(err) => {
                tracing::warn!(error = %err, "Normalization aborted; earlier writes kept");
                Err(err)
            }
        }
    }

    pub(crate) fn report(&mut self, diagnostic: Diagnostic) {
        tracing::warn!(diagnostic = %diagnostic, "Store diagnostic");
        self.diagnostics.push(diagnostic);
    }

    // ========================================================================
    // OPTIMISTIC UPDATES
    // ========================================================================

    /// Run `updater` against a fresh diff whose reads fall through to the
    /// effective source, and push the diff as the top layer.
    ///
    /// When the updater fails nothing is pushed.
    pub fn apply_optimistic<F>(&mut self, token: OptimisticToken, updater: F) -> TesseraResult<()>
    where
        F: FnOnce(&mut SourceMutator<'_>) -> TesseraResult<()>,
    {
        if self.overlays.contains(token) {
            let err = InvariantError::DuplicateOptimisticToken { token };
            tracing::error!(error = %err, "Invalid optimistic update");
            return Err(err.into());
        }
        let mut diff = RecordSource::new();
        let result = {
            let effective = EffectiveSource::new(&self.base, &self.overlays);
            let mut mutator = SourceMutator::new(&effective, &mut diff);
            updater(&mut mutator).map(|()| mutator.into_dirty_ids())
        };
        let dirty = match result {
            Ok(dirty) => dirty,
            Err(err) => {
                tracing::warn!(
                    token = %token,
                    error = %err,
                    "Optimistic updater failed; layer discarded"
                );
                return Err(err);
            }
        };
        tracing::debug!(token = %token, records = diff.size(), "Applied optimistic layer");
        self.overlays.push(token, diff)?;
        self.retired_tokens.remove(&token);
        self.pending_dirty.extend(dirty);
        Ok(())
    }

    /// Normalize a predicted response into a new optimistic layer.
    pub fn apply_optimistic_response(
        &mut self,
        token: OptimisticToken,
        selector: &Selector,
        payload: &Value,
    ) -> TesseraResult<NormalizeOutput> {
        let options = self.normalize_options();
        let mut output = NormalizeOutput::default();
        self.apply_optimistic(token, |mutator| {
            output = normalize(mutator, selector, payload, &options)?;
            Ok(())
        })?;
        self.diagnostics.extend(output.diagnostics.iter().cloned());
        Ok(output)
    }

    /// Remove an optimistic layer wherever it sits in the stack.
    ///
    /// Layers above it keep their recorded diffs. Rolling back a token that
    /// was already rolled back or committed is a no-op.
    pub fn rollback(&mut self, token: OptimisticToken) -> TesseraResult<()> {
        if let Some((_, dirty)) = self.overlays.remove(token) {
            tracing::debug!(token = %token, dirty = dirty.len(), "Rolled back optimistic layer");
            self.pending_dirty.extend(dirty);
            self.retired_tokens.insert(token);
            self.run_pending_gc();
            return Ok(());
        }
        if self.retired_tokens.contains(&token) {
            tracing::debug!(token = %token, "Rollback of retired token ignored");
            return Ok(());
        }
        let err = InvariantError::UnknownOptimisticToken { token };
        tracing::error!(error = %err, "Invalid rollback");
        Err(err.into())
    }

    /// Write the server response into the base source, then drop the
    /// optimistic layer.
    ///
    /// The layer is dropped even when the response fails to normalize; the
    /// fields written before the failure stay in the base.
    pub fn commit(
        &mut self,
        token: OptimisticToken,
        selector: &Selector,
        payload: &Value,
    ) -> TesseraResult<NormalizeOutput> {
        if !self.overlays.contains(token) && !self.retired_tokens.contains(&token) {
            let err = InvariantError::UnknownOptimisticToken { token };
            tracing::error!(error = %err, "Invalid commit");
            return Err(err.into());
        }
        let result = self.normalize_response(selector, payload);
        if let Some((_, dirty)) = self.overlays.remove(token) {
            self.pending_dirty.extend(dirty);
            self.retired_tokens.insert(token);
            self.run_pending_gc();
        }
        tracing::debug!(token = %token, ok = result.is_ok(), "Committed optimistic layer");
        result
    }

    // ========================================================================
    // NOTIFY AND GC
    // ========================================================================

    /// Deliver pending changes to affected subscriptions, then collect.
    ///
    /// Returns how many callbacks fired.
    pub fn notify(&mut self) -> usize {
        let dirty = std::mem::take(&mut self.pending_dirty);
        let mut fired = 0;
        if !dirty.is_empty() {
            let candidates = self.subscriptions.affected_by(&dirty);
            let effective = EffectiveSource::new(&self.base, &self.overlays);
            for id in candidates {
                let Some(selector) = self.subscriptions.snapshot(id).map(|s| s.selector.clone())
                else {
                    continue;
                };
                let next = read(&effective, &selector);
                if self.subscriptions.deliver(id, next) {
                    fired += 1;
                }
            }
        }
        self.stats.notify_cycles += 1;
        self.stats.callbacks_fired += fired as u64;
        tracing::debug!(dirty = dirty.len(), fired, "Notify cycle complete");

        if self.config.gc_enabled {
            self.collect_garbage();
        }

        for diff in self.deferred.drain() {
            self.publish(diff);
        }
        fired
    }

    /// Run a GC pass now. Returns `None` when the pass is postponed.
    ///
    /// A pass is postponed while a hold is active or while any optimistic
    /// layer is applied. It runs once the last hold is released or the last
    /// layer is rolled back or committed.
    pub fn collect_garbage(&mut self) -> Option<GcReport> {
        if !self.gc_holds.is_empty() || !self.overlays.is_empty() {
            tracing::debug!(
                holds = self.gc_holds.len(),
                layers = self.overlays.len(),
                "Garbage collection postponed"
            );
            self.gc_pending = true;
            return None;
        }
        self.gc_pending = false;
        let report = gc::collect(&mut self.base, self.retains.roots());
        self.stats.gc_runs += 1;
        self.stats.records_collected += report.swept as u64;
        tracing::debug!(marked = report.marked, swept = report.swept, "Garbage collection pass");
        Some(report)
    }

    /// Postpone GC until every hold is released.
    pub fn hold_gc(&mut self) -> GcHold {
        self.next_gc_hold_id = self.next_gc_hold_id.saturating_add(1);
        let id = self.next_gc_hold_id;
        self.gc_holds.insert(id);
        GcHold { id }
    }

    /// Release a hold. A pass postponed while held runs when the last hold
    /// goes away.
    pub fn release_gc_hold(&mut self, hold: GcHold) -> TesseraResult<()> {
        if !self.gc_holds.remove(&hold.id) {
            let err = InvariantError::UnknownGcHold { hold_id: hold.id };
            tracing::error!(error = %err, "Invalid GC hold release");
            return Err(err.into());
        }
        self.run_pending_gc();
        Ok(())
    }

    pub fn is_gc_pending(&self) -> bool {
        self.gc_pending
    }

    fn run_pending_gc(&mut self) {
        if self.gc_pending && self.gc_holds.is_empty() && self.overlays.is_empty() {
            self.collect_garbage();
        }
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::build(StoreConfig::default(), RecordSource::new())
    }
}
