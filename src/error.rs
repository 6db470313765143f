//! Error handling utilities for the crate
use thiserror::Error;

use reqwest::Error as ReqwestError;

use crate::model::BlobReference;

/// All errors raised by this crate will be instances of BlobError
#[derive(Error, Debug)]
pub enum BlobError {
    #[error("No connection string. Expected environment variable AZURE_STORAGE_CONNECTION_STRING to contain one")]
    NotAuthenticated(),
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),
    #[error("Invalid request: {0}")]
    BadRequest(String),
    /// Carries the service's error code, e.g. AuthenticationFailed
    #[error("Access denied ({0}), please provide valid credentials for this resource")]
    Forbidden(String),
    #[error("The requested container does not exist")]
    ContainerNotFound(),
    #[error("The requested blob does not exist")]
    BlobNotFound(),
    #[error("Internal HTTP error: {0}")]
    HttpError(#[from] ReqwestError),
    #[error("Malformed response from the blob store: {0}")]
    Deserialize(String),
    #[error("Unknown error from the blob store ({0}): {1}")]
    UnknownError(u16, String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Listing failed after {} blobs: {source}", partial.len())]
    ListingFailed {
        /// Everything accumulated before the failing page
        partial: Vec<BlobReference>,
        source: Box<BlobError>,
    },
    #[error("Upload failed: {source}")]
    UploadFailed { source: Box<BlobError> },
    #[error("The operation was cancelled")]
    Cancelled(),
}

impl BlobError {
    pub fn unknown_error(status_code: reqwest::StatusCode) -> Self {
        BlobError::UnknownError(
            status_code.as_u16(),
            status_code
                .canonical_reason()
                .unwrap_or("Unknown Error")
                .to_string(),
        )
    }

    pub fn required(field_name: &str) -> Self {
        BlobError::InvalidInput(format!("{} is required", field_name))
    }

    /// True when the failure comes down to a missing or inaccessible container
    ///
    /// A credential that is valid but not allowed to reach the container counts
    /// as inaccessible.  A credential the service rejects outright does not.
    pub fn is_invalid_container(&self) -> bool {
        match self {
            BlobError::ContainerNotFound() => true,
            BlobError::Forbidden(code) => {
                code.starts_with("Authorization") || code == "InsufficientAccountPermissions"
            }
            BlobError::ListingFailed { source, .. } | BlobError::UploadFailed { source } => {
                source.is_invalid_container()
            }
            _ => false,
        }
    }

    /// The blobs gathered before a listing failed, if this is a listing failure
    pub fn partial_result(&self) -> Option<&[BlobReference]> {
        match self {
            BlobError::ListingFailed { partial, .. } => Some(partial),
            _ => None,
        }
    }
}

pub(crate) type Result<T> = std::result::Result<T, BlobError>;
