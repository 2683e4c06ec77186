//! Common test infrastructure
//!
//! On-disk databases with canonical recordings, and in-process fakes for the
//! remote sites, the fingerprint engine and the lookup service.
//! Tests should only import from this module, not from internal submodules.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::{raw_track, FakeSite, TestDb};
//!
//! #[test]
//! fn test_import() {
//!     let db = TestDb::new();
//!     let site = FakeSite::new("bs").with_pages(vec![vec![raw_track("1", "Band", "Song")]]);
//!     let ctx = db.context(vec![std::sync::Arc::new(site)], None);
//! }
//! ```

mod fakes;
mod fixtures;

// Public API - this is what tests import
#[allow(unused_imports)]
pub use fakes::{
    beatsaber_package, lookup_result, raw_track, CountingStore, EchoEngine, FakeSite,
    TableLookup,
};
#[allow(unused_imports)]
pub use fixtures::{wait_until, TestDb};
