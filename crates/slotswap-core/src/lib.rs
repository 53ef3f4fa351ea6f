pub mod config;
pub mod duration;
pub mod error;
pub mod options;
pub mod types;

pub use config::SlotswapConfig;
pub use duration::parse_duration;
pub use error::{ConfigError, ConfigResult, WeightError};
pub use options::{Namespace, OptionsTable, ResolvedOptions};
pub use types::*;
