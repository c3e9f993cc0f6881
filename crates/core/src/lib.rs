pub mod config;
pub mod error;
pub mod factor;
pub mod paths;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use factor::{DictValue, ExecutionResult, FactorStats, FactorValue, FailureKind, SeriesData};
pub use paths::Paths;
pub use types::{Fixture, Variant};
