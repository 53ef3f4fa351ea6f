//! Traffic shift and proxy errors.

use std::path::PathBuf;
use std::time::Duration;

use slotswap_core::{Slot, WeightError};
use thiserror::Error;

pub type ProxyResult<T> = Result<T, ProxyError>;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("traffic schedule is empty")]
    EmptySchedule,

    #[error("schedule step {index}: {source}")]
    InvalidSchedule {
        index: usize,
        #[source]
        source: WeightError,
    },

    #[error("cannot shift traffic from {0} to itself")]
    SameSlot(Slot),

    #[error("invalid {field} for proxy configuration: {value:?}")]
    InvalidField { field: &'static str, value: String },

    #[error(transparent)]
    Weight(#[from] WeightError),

    #[error("failed to write proxy configuration {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("proxy reload failed: {0}")]
    Reload(String),

    #[error("proxy reload timed out after {0:?}")]
    Timeout(Duration),
}
