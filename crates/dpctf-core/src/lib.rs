pub mod config;
pub mod error;
pub mod params;
pub mod result;
pub mod types;

pub use config::ObservationConfig;
pub use error::{DpctfError, Result};
pub use params::ParametersDict;
pub use result::{ObservationResult, ObservationStatus};
pub use types::*;
