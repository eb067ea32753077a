//! Formula engine for cellar: spec selection, dependency expansion,
//! locking, pinning, build execution and installation layout.

pub mod bottle;
pub mod build;
pub mod catalog;
pub mod config;
pub mod describe;
pub mod environment;
pub mod error;
pub mod expand;
pub mod fetch;
pub mod formula;
pub mod layout;
pub mod lock;
pub mod logging;
pub mod options;
pub mod pin;
pub mod receipt;
pub mod reporter;
pub mod requirement;

mod persist;

pub use build::{BuildError, BuildExecutor, BuildInvocation};
pub use catalog::{Catalog, CatalogError};
pub use config::{Config, ConfigError};
pub use describe::{FormulaInfo, describe};
pub use environment::{BuildEnvironment, HostEnvironment};
pub use error::{Error, Result};
pub use expand::{
    Action, DependencyGraphExpander, Edge, ExpandContext, ExpandError, Expansion,
    FormulaResolver, NodeKind, ResolvedNode, default_filter,
};
pub use fetch::{FetchedArtifact, IntegrityError};
pub use formula::{Field, Formula, FormulaError};
pub use layout::{Keg, Layout};
pub use lock::{FormulaLock, LockError, LockManager, LockMetadata};
pub use options::BuildOptions;
pub use pin::{Pin, PinError, PinRegistry};
pub use receipt::InstallReceipt;
pub use reporter::{BuildReporter, ConsoleReporter, NullReporter};
