//! Per-algorithm paying rates and the set of algorithms considered stable.

mod cache;
mod registry;

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub use cache::{read_cache, write_cache};
pub use registry::{
    ProfitabilityConfig, ProfitabilityRegistry, StableSetDiff, BASELINE_STABLE_ALGORITHMS,
    BOOTSTRAP_RATES, FORCED_PAYING_RATE,
};

/// Numeric algorithm identity as used by the pool API.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct AlgorithmId(pub u16);

impl fmt::Display for AlgorithmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u16> for AlgorithmId {
    fn from(id: u16) -> Self {
        Self(id)
    }
}

#[derive(Error, Debug)]
pub enum ProfitabilityError {
    #[error("unknown algorithm {0}")]
    UnknownAlgorithm(AlgorithmId),

    #[error("profitability cache I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid profitability cache: {0}")]
    Json(#[from] serde_json::Error),
}
