//! Profiles shipped with the crate.

pub mod semantic;

pub use semantic::SemanticProfile;
