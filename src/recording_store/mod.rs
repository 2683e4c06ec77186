//! Lookups against the replicated canonical recording database.

mod normalize;
mod store;

pub use normalize::{casefold, register_casefold};
pub use store::{RecordingCandidate, RecordingStore, RedirectResolution, SqliteRecordingStore};
