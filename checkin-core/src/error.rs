use thiserror::Error;

#[derive(Error, Debug)]
pub enum CheckinError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}
