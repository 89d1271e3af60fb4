use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("unknown age unit: {0}")]
    UnknownAgeUnit(String),

    #[error("missing configuration: {0}")]
    MissingConfig(&'static str),
}
