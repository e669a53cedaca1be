//! Fuzz test for the normalizer
//!
//! Feeds arbitrary JSON documents through a fixed selector with nested,
//! plural and streamed fields. Normalization must return Ok or Err without
//! panicking, and a successful pass must leave a source the reader can walk.
//!
//! Run with: cargo +nightly fuzz run normalize_fuzz -- -max_total_time=60

#![no_main]

use libfuzzer_sys::fuzz_target;
use serde_json::Value;
use std::sync::Arc;
use tessera_core::{LinkedField, ReaderNode, RecordSource, Selection, Selector, Variables};
use tessera_store::{normalize_into, read, NormalizeOptions};

fn selector() -> Selector {
    let node = ReaderNode::new(
        "FuzzQuery",
        "__Root",
        vec![
            Selection::scalar("title"),
            Selection::linked(
                LinkedField::new(
                    "user",
                    vec![
                        Selection::scalar("id"),
                        Selection::scalar("name"),
                        Selection::defer("Bio", vec![Selection::scalar("bio")]),
                        Selection::on_type("Admin", vec![Selection::scalar("level")]),
                        Selection::linked(
                            LinkedField::new("friends", vec![Selection::scalar("id")])
                                .with_concrete_type("User")
                                .plural()
                                .with_stream("Friends"),
                        ),
                    ],
                )
                .with_concrete_type("User"),
            ),
        ],
    );
    Selector::operation(Arc::new(node), Variables::new())
}

fuzz_target!(|data: &[u8]| {
    let Ok(payload) = serde_json::from_slice::<Value>(data) else {
        return;
    };
    let selector = selector();
    let mut source = RecordSource::new();
    let result = normalize_into(&mut source, &selector, &payload, &NormalizeOptions::default());

    // Partial writes must stay readable either way.
    let snapshot = read(&source, &selector);
    if result.is_ok() {
        assert!(snapshot.data.is_some(), "Normalized payload should read back");
    }
});
