use reqwest::StatusCode;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum UploadError {
    /// The configured base URL could not be parsed or cannot carry a path.
    #[error("Invalid base URL: {0}")]
    InvalidBaseUrl(String),

    /// The local path has no usable file name to append to the base URL.
    #[error("Invalid file name: {0}")]
    InvalidFileName(String),

    /// Failed to read the local file.
    #[error("File system error: {0}")]
    FileSystemError(#[from] io::Error),

    /// An error occurred while making the HTTP request (network, TLS, timeout).
    #[error("HTTP request failed: {0}")]
    HttpRequestError(#[from] reqwest::Error),

    /// The storage endpoint answered with a non-2xx status.
    #[error("Upload rejected with HTTP status {status}: {body}")]
    StatusError { status: StatusCode, body: String },
}

impl UploadError {
    /// HTTP status of a rejected upload, if the endpoint answered at all.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            UploadError::StatusError { status, .. } => Some(*status),
            UploadError::HttpRequestError(err) => err.status(),
            _ => None,
        }
    }
}
