//! Manifest handling for the reconciliation engine.
//!
//! This module covers everything between a YAML file on disk and a
//! validated set of resource specs:
//! - Parsing and deserializing manifest documents
//! - Validation of declarations and references
//! - Computing desired-state hashes for change detection

mod hash;
mod manifest;
mod parser;
mod validator;

pub use hash::SpecHasher;
pub use manifest::{Manifest, ManifestDefaults, ProjectMeta, ResourceEntry};
pub use parser::{DEFAULT_MANIFEST_FILES, ManifestParser, find_manifest_file};
pub use validator::{ManifestValidator, ValidationError, ValidationResult};
