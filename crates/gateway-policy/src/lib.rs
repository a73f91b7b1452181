pub mod engine;
pub mod evidence;

pub use engine::{decide, Settings};
pub use evidence::{validate, EvidenceValidationError, ValidatedEvidence};
