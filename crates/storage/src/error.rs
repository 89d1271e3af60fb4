use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("scheduled job not found: {0}")]
    JobNotFound(String),

    #[error("invalid row: {0}")]
    InvalidRow(String),
}
