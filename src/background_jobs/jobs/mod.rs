//! One job per pipeline stage.

pub mod fingerprint_generation;
pub mod fingerprint_lookup;
pub mod site_import;
pub mod string_match;

pub use fingerprint_generation::FingerprintGenerationJob;
pub use fingerprint_lookup::FingerprintLookupJob;
pub use site_import::SiteImportJob;
pub use string_match::StringMatchJob;
