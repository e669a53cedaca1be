//! Tessera Store - Normalized Graph Cache
//!
//! Behaviour on top of `tessera-core`: the reader that denormalizes
//! selectors, the normalizer that merges payloads back into records,
//! optimistic layers, garbage collection and the [`Store`] that ties them
//! together.
//!
//! The store is single-threaded. Every mutation runs to completion before
//! the next one starts; subscription callbacks that want to write go through
//! a [`DeferredPublisher`].

pub mod gc;
pub mod incremental;
pub mod normalizer;
pub mod overlay;
pub mod reader;
pub mod store;
pub mod subscriptions;

pub use gc::{collect, GcReport, RetainRegistry, RetainedSelector};
pub use incremental::{MergeOutcome, ResponseMerger};
pub use normalizer::{
    normalize, normalize_into, IncrementalPlaceholder, NormalizeOptions, NormalizeOutput,
};
pub use overlay::{EffectiveSource, OptimisticLayer, OverlayStack};
pub use reader::read;
pub use store::{
    DeferredPublisher, GcHold, RetainHandle, Store, StoreStats, SubscriptionHandle,
};
pub use subscriptions::{SubscriptionCallback, SubscriptionRegistry};
