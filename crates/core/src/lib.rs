pub mod config;
pub mod error;
pub mod frame;
pub mod types;

pub use config::AppConfig;
pub use error::{CohortError, CohortResult};
pub use frame::{Cell, Frame};
pub use types::Granularity;
