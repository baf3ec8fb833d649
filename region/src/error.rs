use std::io;

use thiserror::Error;

use crate::block::OwnerId;
use crate::table::Mode;

pub type Result<T> = core::result::Result<T, RegionError>;

#[derive(Debug, Error)]
pub enum RegionError {
    #[error("invalid size: requested size must be greater than zero")]
    InvalidSize,

    /// The request exceeds the total free memory; checked before any hole search.
    #[error("insufficient memory: requested {requested}, free {free}")]
    InsufficientMemory { requested: usize, free: usize },

    /// Enough free memory in aggregate, but no single hole is large enough.
    #[error("no hole large enough for {requested}")]
    NoFit { requested: usize },

    #[error("owner {0} not found among occupied blocks")]
    NotFound(OwnerId),

    #[error("nothing to compact: no occupied blocks")]
    NothingToCompact,

    #[error("backing store failure: {0}")]
    BackingStoreFailure(#[from] BackingError),

    #[error("operation requires {expected:?} mode, table is in {actual:?} mode")]
    ModeMismatch { expected: Mode, actual: Mode },

    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    #[error("region table invariant violated: {0}")]
    InvariantViolation(String),
}

#[derive(Debug, Error)]
pub enum BackingError {
    #[error("cannot acquire an empty backing region")]
    ZeroLength,

    #[error("{units} units of {unit_bytes} bytes do not fit in the address space")]
    SizeOverflow { units: usize, unit_bytes: usize },

    #[error("{0} bytes cannot be rounded up to a whole page")]
    TooLarge(usize),

    #[error("backing store `{0}` is unavailable")]
    Unavailable(&'static str),

    #[error("os call failed: {0}")]
    Os(#[from] io::Error),
}
