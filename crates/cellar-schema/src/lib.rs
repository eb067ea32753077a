//! Shared formula data shapes for cellar.
//!
//! These types are what a recipe loader produces and what the engine in
//! `cellar-core` consumes. Nothing here touches the filesystem beyond
//! reading definition documents.

pub mod arch;
pub mod definition;
pub mod spec;
pub mod version;

// Re-exports
pub use arch::*;
pub use definition::{DefinitionError, FormulaDefinition};
pub use spec::*;
pub use version::{HEAD_VERSION, ParseIdentityError, Version, VersionedIdentity};
