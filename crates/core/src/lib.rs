pub mod age;
pub mod config;
pub mod error;
pub mod stats;

pub use age::{parse_age_range, AgeRange, AgeUnit};
pub use config::Config;
pub use error::*;
pub use stats::*;
