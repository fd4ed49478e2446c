//! # Cachescope Testkit
//!
//! Testing utilities for Cachescope.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Golden vectors**: Known payloads and query hashes that a remote serializer must match
//! - **Generators**: Proptest strategies for value graphs, query keys and snapshots
//! - **Fixtures**: Simulated devices and a ready inspector
//!
//! ## Golden Vectors
//!
//! ```rust
//! use cachescope_testkit::vectors::verify_all_vectors;
//!
//! for result in verify_all_vectors() {
//!     assert!(result.passed, "{}: {}", result.name, result.detail);
//! }
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use cachescope_testkit::generators::{query_from_params, QueryParams};
//!
//! proptest! {
//!     #[test]
//!     fn hash_follows_key(params: QueryParams) {
//!         let query = query_from_params(&params);
//!         prop_assert_eq!(query.query_hash, params.key.hash());
//!     }
//! }
//! ```
//!
//! ## Test Fixtures
//!
//! ```rust
//! use cachescope_core::{QueryKey, StorageCategory};
//! use cachescope_testkit::fixtures::DeviceFixture;
//!
//! let device = DeviceFixture::with_id("device-1", "Pixel");
//! device.put_query(QueryKey::from(["todos"]), 3);
//! device.put_storage(StorageCategory::Secure, "token", "abc");
//! let frame = device.frame().unwrap();
//! assert!(!frame.is_empty());
//! ```

pub mod fixtures;
pub mod generators;
pub mod vectors;

pub use fixtures::{inspector, multi_device_fixtures, socket, DeviceFixture};
pub use generators::{query_from_params, QueryParams};
pub use vectors::{all_vectors, hash_vectors, verify_all_vectors, GoldenVector, HashVector};
