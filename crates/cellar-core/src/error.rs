//! Umbrella error for callers driving a whole install.

use thiserror::Error;

use crate::build::BuildError;
use crate::catalog::CatalogError;
use crate::config::ConfigError;
use crate::expand::ExpandError;
use crate::fetch::IntegrityError;
use crate::formula::FormulaError;
use crate::lock::LockError;
use crate::pin::PinError;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Formula(#[from] FormulaError),

    #[error(transparent)]
    Expand(#[from] ExpandError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Pin(#[from] PinError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Integrity(#[from] IntegrityError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
