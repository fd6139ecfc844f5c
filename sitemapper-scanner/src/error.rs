use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Decode error ({encoding}): {reason}")]
    DecodeError { encoding: String, reason: String },
}

pub type Result<T> = std::result::Result<T, ScanError>;
