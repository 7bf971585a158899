//! # Chronicle Testkit
//!
//! Testing utilities for the Chronicle audit ledger.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Golden vectors**: pinned canonical encodings and integrity hashes
//! - **Generators**: Proptest strategies for property-based testing
//! - **Fixtures**: a ledger over a shared memory store, for tamper and
//!   foreign-writer scenarios
//! - **Fault injection**: [`FlakyStore`], a store wrapper that fails on command
//!
//! ## Golden Vectors
//!
//! ```rust
//! use chronicle_testkit::vectors::{build_event_vectors, event_vectors};
//!
//! for (vector, event) in event_vectors().iter().zip(build_event_vectors()) {
//!     assert_eq!(event.integrity_hash.to_hex(), vector.expected_integrity_hash);
//! }
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use chronicle_testkit::generators::{chain_from_params, chain_key, EventParams};
//!
//! proptest! {
//!     #[test]
//!     fn chains_verify(key in chain_key(), params in prop::collection::vec(any::<EventParams>(), 0..8)) {
//!         let events = chain_from_params(&key, &params);
//!         prop_assert!(chronicle_core::verify_events(key, &events).valid);
//!     }
//! }
//! ```

pub mod fixtures;
pub mod flaky;
pub mod generators;
pub mod vectors;

pub use fixtures::TestFixture;
pub use flaky::FlakyStore;
